/// Error type for the runtime crate. Composes the transport/domain error
/// via `#[from]`; adds the synchronous validation errors the runtime
/// itself raises (§7.4).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Domain(#[from] agentcore_domain::error::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Domain(e) if e.is_cancellation())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_cancellation_propagates() {
        let err: Error = agentcore_domain::error::Error::Cancelled.into();
        assert!(err.is_cancellation());
    }

    #[test]
    fn validation_is_not_cancellation() {
        let err = Error::Validation("intervalMs must be >= 1000".into());
        assert!(!err.is_cancellation());
    }
}
