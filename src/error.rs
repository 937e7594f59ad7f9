//! Error taxonomy for upstream requests.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error! status: {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
    #[error("trip queries require at least one route id")]
    MissingRouteFilter,
    #[error("request superseded")]
    Cancelled,
}

impl FetchError {
    /// Superseded requests are dropped silently by every loader.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    /// Sentence shown next to the manual retry action.
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::Network(e) if e.is_timeout() => "The request timed out. Please try again.",
            FetchError::Network(_) => {
                "Unable to reach the server. Check your internet connection."
            }
            FetchError::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS => {
                "Too many requests. Please wait a moment before trying again."
            }
            FetchError::Status { status, .. } if *status == StatusCode::NOT_FOUND => {
                "The requested data was not found."
            }
            FetchError::Status { status, .. } if status.is_server_error() => {
                "The transit server is having trouble. Please try again later."
            }
            _ => "An unexpected error occurred. Please try again.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
        assert!(!FetchError::MissingRouteFilter.is_retryable());
    }

    #[test]
    fn test_only_cancelled_is_cancelled() {
        assert!(FetchError::Cancelled.is_cancelled());
        assert!(!status(500).is_cancelled());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            status(429).user_message(),
            "Too many requests. Please wait a moment before trying again."
        );
        assert_eq!(status(404).user_message(), "The requested data was not found.");
        assert_eq!(
            status(500).user_message(),
            "The transit server is having trouble. Please try again later."
        );
        assert_eq!(
            FetchError::MissingRouteFilter.user_message(),
            "An unexpected error occurred. Please try again."
        );
    }
}
