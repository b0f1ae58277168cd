use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("Encoding request was cancelled")]
    Cancelled,

    #[error("Encoding request timed out")]
    Timeout,

    #[error("Encoder rate limited the request: {0}")]
    RateLimited(String),

    #[error("Connection to encoder failed: {0}")]
    Connection(String),

    #[error("Encoder returned status {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Failed to parse encoder response: {0}")]
    Parse(String),

    #[error("Invalid encoder url: {0}")]
    Url(String),
}

impl EncoderError {
    /// Transient failures the next encoding round will retry without any special handling.
    pub fn is_transient(&self) -> bool {
        matches!(self, EncoderError::RateLimited(_) | EncoderError::Connection(_) | EncoderError::Timeout)
    }

    pub fn from_reqwest_error(source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return EncoderError::Timeout;
        }
        if source.is_connect() || source.is_request() {
            return EncoderError::Connection(source.to_string());
        }
        match source.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => EncoderError::RateLimited(source.to_string()),
            Some(status) => EncoderError::Api { status, message: source.to_string() },
            None if source.is_decode() => EncoderError::Parse(source.to_string()),
            None => EncoderError::Connection(source.to_string()),
        }
    }
}
