/// Shared error type used across the domain/providers/context crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error represents a cooperative cancellation rather than
    /// a genuine transport/provider failure. Cancellation is never retried.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_recognized_as_cancellation() {
        assert!(Error::Cancelled.is_cancellation());
    }

    #[test]
    fn provider_error_is_not_cancellation() {
        let err = Error::Provider {
            provider: "openai".into(),
            message: "500".into(),
        };
        assert!(!err.is_cancellation());
    }
}
