//! Conversation context: the message store, slicing, and compaction.

pub mod store;
pub mod summarize;

pub use store::{ContextStore, SUMMARY_HEADER, SliceMode};
pub use summarize::SummarizeConfig;
