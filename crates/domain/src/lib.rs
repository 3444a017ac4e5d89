//! Shared data model for the agent runtime: messages, tool calls, the
//! streaming event vocabulary, and the crate-wide error type.
//!
//! This crate has no async runtime dependency of its own beyond the
//! `futures_core::Stream` trait used by [`stream::BoxStream`] — it is pure
//! data, shared by `agentcore-providers` (the transport) and
//! `agentcore-core` (the orchestration layer).

pub mod error;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
pub use stream::{BoxStream, StreamEvent, Usage};
pub use tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
