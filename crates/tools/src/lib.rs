//! Tool system: the process-wide registry, the executor with its uniform
//! outcome contract, builtin tools, and the loader that reconciles the
//! registry against persisted tool records.

pub mod builtin;
pub mod executor;
pub mod loader;
pub mod registry;

pub use executor::{ToolExecutor, ToolOutcome};
pub use registry::{NativeTool, RegisteredTool, ToolHandler, ToolRegistry};
