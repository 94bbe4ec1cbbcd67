//! Session orchestration and working state.

pub mod session;
pub mod state;

pub use session::{MAX_TOOL_ROUNDS, Session};
pub use state::{
    ActionRecord, ContextInfo, MAX_DENIALS, StateSnapshot, StateTracker, ToolEvent,
    extract_hypothesis,
};
