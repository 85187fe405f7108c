use std::fmt;

/// Top-level error type shared by every component of the scheduler.
#[derive(Debug)]
pub enum Error {
    /// Configuration errors (missing/invalid fields, file not found).
    Config(String),

    /// Authoritative-database errors (SQLx wrapped).
    Database(sqlx::Error),

    /// Coordination-store errors (Redis wrapped, or the in-memory fake's own failures).
    Coordination(String),

    /// Message-bus errors (AMQP wrapped).
    Bus(String),

    /// Worker-local outbox / durable-store errors (sled wrapped).
    Outbox(String),

    /// Dispatch-time errors: job lookup, routing-pattern resolution, cron evaluation.
    Dispatch(String),

    /// Execution-time errors surfaced by the worker runtime around user code.
    Execution(String),

    /// Not-found errors (job, occurrence, failed-occurrence lookups).
    NotFound(String),

    /// Validation errors on inbound definitions or messages.
    Validation(String),

    /// Serialization/deserialization errors.
    Serialization(serde_json::Error),

    /// IO errors.
    Io(std::io::Error),

    /// Generic errors with description.
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Database(e) => write!(f, "database error: {}", e),
            Error::Coordination(msg) => write!(f, "coordination-store error: {}", msg),
            Error::Bus(msg) => write!(f, "message-bus error: {}", msg),
            Error::Outbox(msg) => write!(f, "outbox error: {}", msg),
            Error::Dispatch(msg) => write!(f, "dispatch error: {}", msg),
            Error::Execution(msg) => write!(f, "execution error: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Validation(msg) => write!(f, "validation error: {}", msg),
            Error::Serialization(e) => write!(f, "serialization error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}


impl From<redis::RedisError> for Error {
    fn from(error: redis::RedisError) -> Self {
        Error::Coordination(error.to_string())
    }
}

impl From<lapin::Error> for Error {
    fn from(error: lapin::Error) -> Self {
        Error::Bus(error.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(error: sled::Error) -> Self {
        Error::Outbox(error.to_string())
    }
}

impl From<cron::error::Error> for Error {
    fn from(error: cron::error::Error) -> Self {
        Error::Dispatch(format!("invalid cron expression: {}", error))
    }
}

impl Error {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn coordination<T: Into<String>>(msg: T) -> Self {
        Error::Coordination(msg.into())
    }

    pub fn bus<T: Into<String>>(msg: T) -> Self {
        Error::Bus(msg.into())
    }

    pub fn dispatch<T: Into<String>>(msg: T) -> Self {
        Error::Dispatch(msg.into())
    }

    pub fn execution<T: Into<String>>(msg: T) -> Self {
        Error::Execution(msg.into())
    }

    /// Error category used for logging/metrics grouping.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Coordination(_) => "coordination",
            Error::Bus(_) => "bus",
            Error::Outbox(_) => "outbox",
            Error::Dispatch(_) => "dispatch",
            Error::Execution(_) => "execution",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }

    /// Whether the caller should apply the bounded-retry policy from the
    /// error-handling table rather than treat this as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Coordination(_) | Error::Bus(_) | Error::Database(_) | Error::Outbox(_)
        )
    }
}
