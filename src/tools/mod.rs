//! Mode-gated tool execution.
//!
//! - [`types`]: Descriptors, availability classes, the [`Tool`] trait
//! - [`registry`]: [`ToolCapabilityRegistry`] with gating and metrics
//! - [`lifecycle`]: Pre/post/error observers
//! - [`builtins`]: File, command, and status tools

pub mod builtins;
pub mod lifecycle;
pub mod registry;
pub mod types;

pub use builtins::{
    FetchStatusTool, ListDirTool, ReadFileTool, RunCommandTool, SystemStatusTool, WriteFileTool,
    register_builtins,
};
pub use lifecycle::{LifecycleEvent, ToolLifecycleListener};
pub use registry::{CategoryStats, RegistryStats, ToolCapabilityRegistry, ToolStats};
pub use types::{
    AvailabilityClass, Tool, ToolCapabilities, ToolCategory, ToolContext, ToolDescriptor,
    ToolResult, truncate_output,
};
