use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventsLogError {
    #[error("connectivity error: {message}")]
    Connectivity { message: String },
    #[error("malformed query: {message}")]
    MalformedQuery { message: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },
    #[error("capacity exceeded: {message}")]
    CapacityExceeded { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("config error: {message}")]
    Config { message: String },
}

impl EventsLogError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedQuery {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for transient failures the write path retries and fails over on.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

pub type EventsLogResult<T> = Result<T, EventsLogError>;

/// Driver messages that mean the connection went away rather than the
/// statement being wrong.
const CONNECTIVITY_MARKERS: &[&str] = &[
    "terminating connection",
    "connection refused",
    "connection reset",
    "connection closed",
    "broken pipe",
    "error communicating with database",
    "pool timed out",
    "pool closed",
    "unable to open database file",
];

pub fn is_connectivity_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CONNECTIVITY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

impl From<sea_orm::DbErr> for EventsLogError {
    fn from(value: sea_orm::DbErr) -> Self {
        let message = value.to_string();
        match value {
            sea_orm::DbErr::ConnectionAcquire(_) | sea_orm::DbErr::Conn(_) => {
                EventsLogError::connectivity(message)
            }
            _ if is_connectivity_message(&message) => EventsLogError::connectivity(message),
            _ => EventsLogError::storage(message),
        }
    }
}

impl From<std::io::Error> for EventsLogError {
    fn from(value: std::io::Error) -> Self {
        EventsLogError::storage(value.to_string())
    }
}
