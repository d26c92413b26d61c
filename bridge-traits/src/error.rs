use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The remote API refused the call because of throttling.
    ///
    /// `retry_after` is filled by the adapter from the vendor's hint
    /// (`Retry-After` header, quota reset field, ...). `None` means the API
    /// throttled without saying for how long.
    #[error("Rate limited: {message}{}", format_hint(.retry_after))]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry after {}s)", wait.as_secs_f64()),
        None => String::new(),
    }
}

impl BridgeError {
    /// Build a rate-limit error carrying an explicit wait.
    pub fn rate_limited(retry_after: Duration, message: impl Into<String>) -> Self {
        Self::RateLimited {
            retry_after: Some(retry_after),
            message: message.into(),
        }
    }

    /// The explicit wait requested by the remote side, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient(_) | Self::OperationFailed(_) => true,
            Self::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            Self::NotAvailable(_) | Self::NotFound(_) | Self::InvalidRequest(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display_includes_hint() {
        let error = BridgeError::rate_limited(Duration::from_secs(5), "quota exhausted");
        assert_eq!(
            error.to_string(),
            "Rate limited: quota exhausted (retry after 5s)"
        );
        assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
        assert!(error.is_rate_limited());
    }

    #[test]
    fn test_rate_limited_without_hint() {
        let error = BridgeError::RateLimited {
            retry_after: None,
            message: "slow down".to_string(),
        };
        assert_eq!(error.to_string(), "Rate limited: slow down");
        assert_eq!(error.retry_after(), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::Transient("502".to_string()).is_transient());
        assert!(!BridgeError::NotFound("sku".to_string()).is_transient());
        assert!(!BridgeError::InvalidRequest("bad field".to_string()).is_transient());
        assert!(BridgeError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_transient());
        assert!(!BridgeError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_transient());
    }
}
