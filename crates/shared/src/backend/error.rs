use thiserror::Error;

/// Failure of a single call against the backend-as-a-service.
///
/// Every variant names the operation that failed; rejections additionally
/// carry the HTTP status and the backend's error type so callers can decide
/// between surfacing a generic message and propagating specifics.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{operation}: resource not found")]
    NotFound { operation: &'static str },
    #[error("{operation}: caller is not authorized")]
    Unauthorized { operation: &'static str },
    #[error("{operation}: backend rejected request (status={status}, code={code}): {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        code: String,
        message: String,
    },
    #[error("{operation}: backend unavailable: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },
    #[error("{operation}: backend returned an invalid payload: {message}")]
    InvalidPayload {
        operation: &'static str,
        message: String,
    },
}

impl BackendError {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::NotFound { operation }
            | Self::Unauthorized { operation }
            | Self::Rejected { operation, .. }
            | Self::Unavailable { operation, .. }
            | Self::InvalidPayload { operation, .. } => operation,
        }
    }

    /// Backend error code when the backend supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code.as_str()),
            Self::NotFound { .. } => Some("not_found"),
            Self::Unauthorized { .. } => Some("unauthorized"),
            Self::Unavailable { .. } | Self::InvalidPayload { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::Rejected { status: 400, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected { status: 409, .. })
    }

    pub(crate) fn invalid_payload(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::InvalidPayload {
            operation,
            message: err.to_string(),
        }
    }
}
