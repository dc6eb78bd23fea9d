//! Error types for calls against the processing platform

/// Result type for vidqueue client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error types for vidqueue client operations
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication rejected: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Invalid video file: {0}")]
    InvalidFile(String),

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Expired or invalid credentials. These must reach the caller so it can
    /// re-authenticate; estimators never swallow them.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    /// Failures a poller may retry within its attempt budget.
    pub fn is_transient(&self) -> bool {
        !self.is_auth()
    }

    /// Map a non-success HTTP status into the error taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = extract_message(body);
        match status.as_u16() {
            401 | 403 => ClientError::Unauthorized(message),
            404 => ClientError::NotFound(message),
            code => ClientError::Server { status: code, message },
        }
    }
}

/// Pull a human readable message out of an error body (`message` or `error`
/// field), falling back to the raw text.
fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error", "detail"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}
