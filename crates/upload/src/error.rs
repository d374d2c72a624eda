use cloudinary_core::ConfigurationError;

/// Sentinel status code reported for request timeouts.
pub const TIMEOUT_HTTP_CODE: u16 = 499;

/// Errors produced by upload calls.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Invalid input caught before any request was made.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Request Timeout")]
    Timeout,

    #[error("Server returned unexpected status code - {0}")]
    UnexpectedResponse(u16),

    /// Error payload returned by the service, or a body that was not JSON.
    #[error("{message}")]
    Server {
        http_code: u16,
        message: String,
        name: String,
    },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload source is empty")]
    EmptySource,
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

impl UploadError {
    /// HTTP-like status code: the real one for server errors, 499 for timeouts.
    pub fn http_code(&self) -> Option<u16> {
        match self {
            Self::Timeout => Some(TIMEOUT_HTTP_CODE),
            Self::UnexpectedResponse(code) => Some(*code),
            Self::Server { http_code, .. } => Some(*http_code),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Error class name as reported by the service.
    pub fn name(&self) -> &str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Timeout => "TimeoutError",
            Self::UnexpectedResponse(_) => "UnexpectedResponse",
            Self::Server { name, .. } => name,
            _ => "Error",
        }
    }
}
