//! Tool execution: validation, dispatch, and the built-in inspection tools.

pub mod common;
pub mod core;
pub mod validate;

pub use common::{Grep, ListFiles, ReadFile, RunCommand};
pub use core::{
    MAX_OUTPUT_BYTES, Notifier, ToolError, ToolExecutor, ToolFuture, ToolHandler, ToolOutcome,
    ToolStatus, truncate_output,
};
pub use validate::validate_command;
