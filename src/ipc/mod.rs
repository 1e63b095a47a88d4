// Action channel
//
// The local IPC mechanism connecting the adaptor (producer) and the worker
// (consumer): a shared FIFO action queue plus a Unix-socket server the
// worker polls.

mod action;
mod server;

pub use action::{Action, ActionQueue, CLOSE_ACTION};
pub use server::{ActionResponse, AdaptorServer, ClientRequest, PathResponse, ServerHandle};
