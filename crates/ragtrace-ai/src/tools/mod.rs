//! Agent tool abstraction

pub mod registry;
pub mod traits;

pub use registry::ToolRegistry;
pub use traits::{Tool, ToolOutput, ToolSchema};
