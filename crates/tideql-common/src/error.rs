use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of failure kinds surfaced by the federation core.
///
/// `PushdownUnsupported` is consumed by the execution engine's fallback path
/// and never reaches the caller; every other kind surfaces unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Connection(String),
    Authentication(String),
    Query(String),
    Adapter(String),
    Schema(String),
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },
    PushdownUnsupported(String),
    Timeout(String),
    Configuration(String),
}

impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Error::Authentication(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Error::Query(msg.into())
    }

    pub fn adapter(msg: impl Into<String>) -> Self {
        Error::Adapter(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    pub fn rate_limit(msg: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::RateLimit {
            message: msg.into(),
            retry_after,
        }
    }

    pub fn pushdown_unsupported(msg: impl Into<String>) -> Self {
        Error::PushdownUnsupported(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Seconds-to-wait hint carried by a rate-limit failure.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimit { .. })
    }

    pub fn is_pushdown_unsupported(&self) -> bool {
        matches!(self, Error::PushdownUnsupported(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(msg) => write!(f, "Connection error: {}", msg),
            Error::Authentication(msg) => write!(f, "Authentication failed: {}", msg),
            Error::Query(msg) => write!(f, "Query error: {}", msg),
            Error::Adapter(msg) => write!(f, "Adapter error: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
            Error::RateLimit {
                message,
                retry_after: Some(seconds),
            } => {
                write!(f, "Rate limit exceeded: {} (retry after {}s)", message, seconds)
            }
            Error::RateLimit {
                message,
                retry_after: None,
            } => write!(f, "Rate limit exceeded: {}", message),
            Error::PushdownUnsupported(msg) => write!(f, "Pushdown unsupported: {}", msg),
            Error::Timeout(msg) => write!(f, "Timed out: {}", msg),
            Error::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
