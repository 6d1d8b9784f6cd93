use std::time::SystemTime;
use thiserror::Error;

/// Type alias for Result with AssistantError
pub type Result<T> = std::result::Result<T, AssistantError>;

/// Error types for the mailbox assistant
#[derive(Error, Debug)]
pub enum AssistantError {
    /// Mail provider returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed or the session could not be refreshed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Provider message could not be turned into a canonical message
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// A single message could not be fetched
    #[error("Failed to fetch message {message_id}: {reason}")]
    FetchError { message_id: String, reason: String },

    /// Draft could not be built or stored
    #[error("Draft error: {0}")]
    DraftError(String),

    /// Activity log / statistics store failure
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// SQLite error from the activity store
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Run state errors
    #[error("State error: {0}")]
    StateError(String),
}

impl AssistantError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AssistantError::RateLimitExceeded { .. }
                | AssistantError::ServerError { .. }
                | AssistantError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Errors that abort a whole run before any message is touched.
    ///
    /// Everything else is isolated to the message that raised it.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            AssistantError::AuthError(_)
                | AssistantError::ConfigError(_)
                | AssistantError::DatabaseError(_)
        )
    }
}

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Seconds to wait according to a `Retry-After` value.
///
/// Accepts delay-seconds (`"120"`) or an HTTP date. Missing, unparsable or
/// already-past values give the default of 5 seconds.
pub fn retry_after_seconds(value: Option<&str>, now: SystemTime) -> u64 {
    value
        .and_then(|raw| {
            let raw = raw.trim();
            raw.parse::<u64>().ok().or_else(|| {
                httpdate::parse_http_date(raw)
                    .ok()
                    .and_then(|at| at.duration_since(now).ok())
                    .map(|wait| wait.as_secs())
            })
        })
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

impl AssistantError {
    /// Map an unsuccessful provider HTTP status
    fn from_status(status: u16, reason: &str, retry_after: Option<&str>) -> Self {
        let message = format!("HTTP {}: {}", status, reason);
        match status {
            429 => AssistantError::RateLimitExceeded {
                retry_after: retry_after_seconds(retry_after, SystemTime::now()),
            },
            401 => AssistantError::AuthError(message),
            403 => AssistantError::Forbidden(message),
            404 => AssistantError::MessageNotFound("Resource not found".to_string()),
            400 => AssistantError::BadRequest(message),
            500..=599 => AssistantError::ServerError { status, message },
            _ => AssistantError::ApiError(message),
        }
    }
}

impl From<google_gmail1::Error> for AssistantError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let retry_after = response
                    .headers()
                    .get(hyper::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok());
                AssistantError::from_status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                    retry_after,
                )
            }
            google_gmail1::Error::BadRequest(ref err) => AssistantError::BadRequest(err.to_string()),
            google_gmail1::Error::MissingToken(ref err) => {
                AssistantError::AuthError(format!("Missing token: {}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                AssistantError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => AssistantError::NetworkError(err.to_string()),
            _ => AssistantError::ApiError(error.to_string()),
        }
    }
}
