use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an estimator failure, used to pick a message the user can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    Auth,
    Quota,
    Network,
    Other,
}

impl ServiceErrorKind {
    /// Classify a failure by inspecting the HTTP status (if any) and the error text.
    pub fn classify(status: Option<u16>, text: &str) -> Self {
        let lower = text.to_lowercase();
        match status {
            Some(401) | Some(403) => return ServiceErrorKind::Auth,
            Some(429) | Some(402) => return ServiceErrorKind::Quota,
            _ => {}
        }
        if lower.contains("api key")
            || lower.contains("api_key")
            || lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("401")
        {
            ServiceErrorKind::Auth
        } else if lower.contains("quota")
            || lower.contains("rate limit")
            || lower.contains("insufficient")
            || lower.contains("billing")
            || lower.contains("429")
        {
            ServiceErrorKind::Quota
        } else if lower.contains("network")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("connect")
            || lower.contains("dns")
        {
            ServiceErrorKind::Network
        } else {
            ServiceErrorKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorKind::Auth => "authentication failed",
            ServiceErrorKind::Quota => "quota exceeded",
            ServiceErrorKind::Network => "network error",
            ServiceErrorKind::Other => "service error",
        }
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Reading, writing, renaming or creating a file or folder failed
    #[error("storage error at '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fragment or structure the operation depends on could not be found
    #[error("structure not found: {0}")]
    StructuralMatch(String),

    /// Input rejected before any I/O was attempted
    #[error("invalid input: {0}")]
    Validation(String),

    /// The nutrition estimator could not be reached or refused the request
    #[error("{kind}: {message}")]
    ExternalService {
        kind: ServiceErrorKind,
        message: String,
    },

    /// The estimator answered but the answer was not usable
    #[error("could not parse model output: {0}")]
    Parse(String),

    #[error("meal not found: {0}")]
    MealNotFound(String),

    /// Another delete is still holding the lock
    #[error("another delete is already in progress")]
    Busy,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl Error {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn external(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        Error::ExternalService {
            kind: ServiceErrorKind::classify(status, &message),
            message,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Error::ExternalService { kind, .. } => match kind {
                ServiceErrorKind::Auth => {
                    "The nutrition service rejected the API key. Check the key in settings.".to_string()
                }
                ServiceErrorKind::Quota => {
                    "The nutrition service quota is exhausted. Check your plan or try again later."
                        .to_string()
                }
                ServiceErrorKind::Network => {
                    "Could not reach the nutrition service. Check your connection.".to_string()
                }
                ServiceErrorKind::Other => format!("Nutrition lookup failed: {}", self),
            },
            Error::Parse(_) => {
                "The nutrition service returned an answer that could not be read. Try rephrasing."
                    .to_string()
            }
            Error::Busy => "A delete is already in progress.".to_string(),
            other => other.to_string(),
        }
    }
}
