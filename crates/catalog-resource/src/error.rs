//! Error types for cached resource operations

/// Errors surfaced by queries and mutations.
///
/// `Clone` because one shared fetch result is handed to every caller
/// awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    Transport(#[from] catalog_transport::Error),

    /// The caller's own cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Query cannot run with the given input (empty or placeholder id).
    #[error("query disabled: {0}")]
    Disabled(String),

    /// Fetch task ended without a result (resource dropped, task panicked).
    #[error("fetch aborted: {0}")]
    Aborted(String),
}

impl ResourceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ResourceError::Cancelled | ResourceError::Transport(catalog_transport::Error::Cancelled)
        )
    }

    /// HTTP status of the underlying response, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ResourceError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_pass_through() {
        let err: ResourceError = catalog_transport::Error::Status {
            status: 404,
            body: "not found".into(),
        }
        .into();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "server returned 404: not found");
    }

    #[test]
    fn both_cancellation_sources_count() {
        assert!(ResourceError::Cancelled.is_cancelled());
        assert!(ResourceError::from(catalog_transport::Error::Cancelled).is_cancelled());
        assert!(!ResourceError::Aborted("dropped".into()).is_cancelled());
    }
}
