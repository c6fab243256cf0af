use thiserror::Error;

/// Coarse classification the gateway acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Unauthorized,
    Unreachable,
    Other,
}

/// Error returned by every transport in the request pipeline.
///
/// `Clone` because a single refresh outcome is broadcast to every request
/// queued behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Unauthorized - token may be expired ({url})")]
    Unauthorized { url: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Token refresh was abandoned before it completed")]
    RefreshAborted,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl HttpError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, url: &str, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => HttpError::Unauthorized {
                url: url.to_string(),
            },
            403 => HttpError::AccessDenied(truncated),
            404 => HttpError::NotFound(truncated),
            429 => HttpError::RateLimited,
            code @ 500..=599 => HttpError::Server {
                status: code,
                body: truncated,
            },
            code => HttpError::Status {
                status: code,
                body: truncated,
            },
        }
    }

    /// Map a reqwest failure that produced no HTTP status.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            HttpError::Unreachable(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidRequest(err.to_string())
        } else if err.is_decode() || err.is_body() {
            HttpError::InvalidResponse(err.to_string())
        } else {
            HttpError::Unreachable(err.to_string())
        }
    }

    pub fn kind(&self) -> HttpErrorKind {
        match self {
            HttpError::Unauthorized { .. } => HttpErrorKind::Unauthorized,
            HttpError::Unreachable(_) => HttpErrorKind::Unreachable,
            _ => HttpErrorKind::Other,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind() == HttpErrorKind::Unauthorized
    }
}
