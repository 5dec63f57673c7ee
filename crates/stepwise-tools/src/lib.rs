pub mod builtin;
pub mod registry;

pub use registry::{stringify_result, ToolRegistry};
