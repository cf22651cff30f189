//! Error types for parley-ai

use thiserror::Error;

/// Result type alias using parley-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to hosted model APIs
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a local input (reference image) failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key ({0})")]
    InvalidApiKey(&'static str),

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// The response stream failed after it was opened
    #[error("Stream failed: {0}")]
    Stream(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The image endpoint answered without any image part
    #[error("No image in response{}", .text.as_deref().map(|t| format!(". Text: {t}")).unwrap_or_default())]
    NoImage { text: Option<String> },

    /// Invalid request or configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status and body to an error
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Self::RateLimited { retry_after: None };
        }
        Self::api(format!("http_{}", status.as_u16()), body)
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("overloaded")
                    || et.starts_with("http_5")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_retryable_api_server_error() {
        let e = Error::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream".into());
        assert!(e.is_retryable());
    }

    #[test]
    fn test_too_many_requests_maps_to_rate_limited() {
        let e = Error::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(matches!(e, Error::RateLimited { .. }));
    }

    #[test]
    fn test_retryable_api_overloaded_message() {
        let e = Error::api("server_error", "API is overloaded right now");
        assert!(e.is_retryable());
    }

    #[test]
    fn test_not_retryable_auth() {
        let e = Error::from_status(reqwest::StatusCode::UNAUTHORIZED, "Invalid API key".into());
        assert!(!e.is_retryable());
        assert!(!Error::InvalidApiKey("OPENAI_API_KEY").is_retryable());
    }

    #[test]
    fn test_no_image_message_includes_text() {
        let e = Error::NoImage {
            text: Some("I cannot draw that".into()),
        };
        assert_eq!(e.to_string(), "No image in response. Text: I cannot draw that");
        assert_eq!(Error::NoImage { text: None }.to_string(), "No image in response");
    }
}
