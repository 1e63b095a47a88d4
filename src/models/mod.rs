// Data models
//
// Payload schemas exchanged with the task runner and the path-mapping rule
// set consumed by the action channel and the arnold side channel.

mod path_mapping;
mod payloads;

pub use path_mapping::{PathMappingRule, SourceOs, map_path, parse_rules};
pub use payloads::{InitData, Renderer, RunData};
