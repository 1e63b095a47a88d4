use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the action that tells the worker to end its request loop.
pub const CLOSE_ACTION: &str = "close";

/// A named remote-procedure request plus payload, the unit of work exchanged
/// over the action channel. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,

    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Action {
    /// Create an action with the given name and payload map.
    pub fn new(name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Create an action whose payload is a single `{key: value}` entry.
    pub fn with_value(name: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        let mut payload = Map::new();
        payload.insert(key.into(), value);
        Self::new(name, payload)
    }

    /// The poison-pill action that ends the worker's request loop.
    pub fn close() -> Self {
        Self::new(CLOSE_ACTION, Map::new())
    }

    pub fn is_close(&self) -> bool {
        self.name == CLOSE_ACTION
    }
}

/// Ordered queue of actions shared between the adaptor (producer) and the
/// IPC server (consumer, on behalf of the polling worker).
///
/// The producer never pops; it only observes the length, which reaching zero
/// is the signal that the worker has drained its initialization actions.
/// `enqueue_front` exists solely so cleanup can pre-empt pending work with a
/// `close` action.
#[derive(Debug, Default)]
pub struct ActionQueue {
    inner: Mutex<VecDeque<Action>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action to the back of the queue.
    pub fn enqueue_action(&self, action: Action) {
        self.inner.lock().unwrap().push_back(action);
    }

    /// Prepend an action so it is popped before anything already pending.
    pub fn enqueue_front(&self, action: Action) {
        self.inner.lock().unwrap().push_front(action);
    }

    /// Pop the next pending action, if any. Only ever called in response to
    /// a worker request.
    pub fn dequeue_action(&self) -> Option<Action> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
