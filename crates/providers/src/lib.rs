//! The Model Client's transport contract (§6): the [`LlmProvider`] trait
//! every adapter implements, the SSE draining helpers shared by streaming
//! adapters, and one concrete adapter exercising the trait end to end.

pub mod openai_compat;
pub mod traits;
pub(crate) mod sse;

pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};

/// Convert a `reqwest::Error` into the shared domain error type.
pub(crate) fn from_reqwest(e: reqwest::Error) -> agentcore_domain::error::Error {
    if e.is_timeout() {
        agentcore_domain::error::Error::Timeout(e.to_string())
    } else {
        agentcore_domain::error::Error::Http(e.to_string())
    }
}
