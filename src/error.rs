//! Error types and handling for the datapoints SDK.

use std::fmt;
use thiserror::Error;

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the datapoints SDK
#[derive(Debug)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Additional context about the error
    pub context: Option<String>,
    /// The underlying source error, if any
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Different kinds of errors that can occur
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// Neither an id nor an external id was supplied for a time series
    #[error("Missing time series identifier: {message}")]
    MissingIdentifier {
        /// What was missing and where
        message: String,
    },

    /// The query window is empty or reversed
    #[error("Invalid time range, end={end} must be later than start={start}")]
    InvalidRange {
        /// Resolved start in ms
        start: i64,
        /// Resolved end in ms
        end: i64,
    },

    /// Aggregates were requested without a granularity
    #[error("When passing `aggregates`, argument `granularity` is also required")]
    MissingGranularity,

    /// A granularity was given without any aggregates
    #[error("When passing `granularity`, argument `aggregates` is also required")]
    MissingAggregates,

    /// Two individually valid options that cannot be used together
    #[error("Unsupported combination: {message}")]
    UnsupportedCombination {
        /// Which options collided
        message: String,
    },

    /// A per-series override dict contained keys that are not understood
    #[error(
        "Dict provided by argument `{argument}` included key(s) not understood: {bad_keys:?}. \
         Required key: `{argument}`. Allowed optional keys: {allowed:?}"
    )]
    UnknownKey {
        /// The identifier argument the dict was passed through
        argument: String,
        /// Keys that were rejected
        bad_keys: Vec<String>,
        /// Keys that are accepted besides the identifier
        allowed: Vec<String>,
    },

    /// No time series were requested at all
    #[error("Pass at least one time series `id` or `external_id`")]
    EmptyBatch,

    /// A value had the wrong runtime type
    #[error("Wrong type for `{field}`: expected {expected}, got {found}")]
    Type {
        /// Field that had the wrong type
        field: String,
        /// Human-readable description of the accepted types
        expected: String,
        /// What was actually supplied
        found: String,
    },

    /// A granularity or time-ago string did not match its format
    #[error("Invalid format: `{input}`. Must be on format {expected}")]
    InvalidFormat {
        /// The offending input
        input: String,
        /// Description of the accepted format
        expected: String,
    },

    /// A timestamp resolved to a value outside the range the platform accepts
    #[error("{input} was converted to {ms}ms, which is outside the accepted range [{min_ms}, {max_ms}]ms")]
    OutOfRange {
        /// The user-supplied value
        input: String,
        /// The resolved value in ms
        ms: i64,
        /// Smallest accepted value in ms
        min_ms: i64,
        /// Largest accepted value in ms
        max_ms: i64,
    },

    /// Any other input validation failure
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: Option<String>,
        /// Value that failed validation
        value: Option<String>,
        /// Validation error message
        message: String,
    },

    /// A runtime-only query field was read before the server reported it
    #[error("`{field}` is not known until the first response for the query has been received")]
    NotYetKnown {
        /// Name of the field
        field: &'static str,
    },

    /// Network-related errors
    #[error("Network error")]
    Network {
        /// HTTP status code, if available
        status_code: Option<u16>,
        /// Response body, if available
        response_body: Option<String>,
    },

    /// Authentication and authorization errors
    #[error("Authentication error: {message}")]
    Authentication {
        /// Specific authentication error message
        message: String,
    },

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimit {
        /// Number of seconds to wait before retrying
        retry_after: Option<u64>,
    },

    /// Request timeout errors
    #[error("Request timeout")]
    Timeout {
        /// Timeout duration in seconds
        timeout_seconds: u64,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Serialization error message
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Internal SDK errors
    #[error("Internal error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl Error {
    /// Create a new error with the given kind
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Create a new error with context
    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Create a new error with a source error
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a missing identifier error
    pub fn missing_identifier<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::MissingIdentifier {
            message: message.into(),
        })
    }

    /// Create an invalid range error
    pub fn invalid_range(start: i64, end: i64) -> Self {
        Self::new(ErrorKind::InvalidRange { start, end })
    }

    /// Create an unsupported combination error
    pub fn unsupported_combination<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::UnsupportedCombination {
            message: message.into(),
        })
    }

    /// Create an unknown key error
    pub fn unknown_key<S: Into<String>>(argument: S, bad_keys: Vec<String>, allowed: Vec<String>) -> Self {
        Self::new(ErrorKind::UnknownKey {
            argument: argument.into(),
            bad_keys,
            allowed,
        })
    }

    /// Create a wrong type error
    pub fn wrong_type<F, E, G>(field: F, expected: E, found: G) -> Self
    where
        F: Into<String>,
        E: Into<String>,
        G: Into<String>,
    {
        Self::new(ErrorKind::Type {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        })
    }

    /// Create an invalid format error
    pub fn invalid_format<I: Into<String>, E: Into<String>>(input: I, expected: E) -> Self {
        Self::new(ErrorKind::InvalidFormat {
            input: input.into(),
            expected: expected.into(),
        })
    }

    /// Create an out of range error
    pub fn out_of_range<S: Into<String>>(input: S, ms: i64) -> Self {
        Self::new(ErrorKind::OutOfRange {
            input: input.into(),
            ms,
            min_ms: crate::time::MIN_TIMESTAMP_MS,
            max_ms: crate::time::MAX_TIMESTAMP_MS,
        })
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(
        message: S,
        field: Option<String>,
        value: Option<String>,
    ) -> Self {
        Self::new(ErrorKind::Validation {
            field,
            value,
            message: message.into(),
        })
    }

    /// Create a not yet known error
    pub fn not_yet_known(field: &'static str) -> Self {
        Self::new(ErrorKind::NotYetKnown { field })
    }

    /// Create a network error
    pub fn network(status_code: Option<u16>, response_body: Option<String>) -> Self {
        Self::new(ErrorKind::Network {
            status_code,
            response_body,
        })
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Authentication {
            message: message.into(),
        })
    }

    /// Create a rate limit error
    pub fn rate_limit(retry_after: Option<u64>) -> Self {
        Self::new(ErrorKind::RateLimit { retry_after })
    }

    /// Create a timeout error
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::new(ErrorKind::Timeout { timeout_seconds })
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Serialization {
            message: message.into(),
        })
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Configuration {
            message: message.into(),
        })
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }

    /// Check if this error was raised while validating user input, before any I/O
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::MissingIdentifier { .. }
                | ErrorKind::InvalidRange { .. }
                | ErrorKind::MissingGranularity
                | ErrorKind::MissingAggregates
                | ErrorKind::UnsupportedCombination { .. }
                | ErrorKind::UnknownKey { .. }
                | ErrorKind::EmptyBatch
                | ErrorKind::Type { .. }
                | ErrorKind::InvalidFormat { .. }
                | ErrorKind::OutOfRange { .. }
                | ErrorKind::Validation { .. }
        )
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::Network { status_code, .. } => {
                match status_code {
                    Some(500..=599) => true, // Server errors are retryable
                    Some(429) => true,       // Rate limit is retryable
                    Some(408) => true,       // Request timeout is retryable
                    None => true,            // Connection never got a response
                    _ => false,
                }
            }
            ErrorKind::RateLimit { .. } => true,
            ErrorKind::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get the retry delay for retryable errors
    pub fn retry_delay(&self) -> Option<std::time::Duration> {
        match &self.kind {
            ErrorKind::RateLimit { retry_after } => {
                retry_after.map(std::time::Duration::from_secs)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "{}: {}", context, self.kind)?;
        } else {
            write!(f, "{}", self.kind)?;
        }

        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

// Conversion from common error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(crate::defaults::TIMEOUT.as_secs()).with_source(err)
        } else if err.is_decode() {
            Self::serialization(err.to_string()).with_source(err)
        } else if let Some(status) = err.status() {
            Self::network(Some(status.as_u16()), None).with_source(err)
        } else {
            Self::network(None, None).with_source(err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string()).with_source(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::configuration(format!("Invalid URL: {}", err)).with_source(err)
    }
}
