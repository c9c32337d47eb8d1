use std::{fmt, io, path::StripPrefixError};

use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};
use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

use crate::{event::Notification, watch::LoopCommand};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FixmeError {
    #[error("Notification channel error: {0}")]
    Channel(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    /// Resolution stopped making progress; `stuck` holds the import paths left unordered.
    #[error("Dependency cycle detected among: {}", stuck.join(", "))]
    CycleDetected { stuck: Vec<String> },
    #[error("Import lookup failed for {import_path}: {message}")]
    ImportLookup {
        import_path: String,
        message: String,
    },
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Project store error: {0}")]
    Store(String),
    /// The check tool could not be run at all (missing binary, spawn failure).
    #[error("Could not run `{tool}`: {message}")]
    Toolchain { tool: String, message: String },
    #[error("File watch error: {0}")]
    Watch(String),
}

impl FixmeError {
    pub fn is_cycle(&self) -> bool {
        matches!(self, FixmeError::CycleDetected { .. })
    }
}

impl From<StripPrefixError> for FixmeError {
    fn from(src: StripPrefixError) -> FixmeError {
        FixmeError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for FixmeError {
    fn from(src: toml::de::Error) -> FixmeError {
        FixmeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for FixmeError {
    fn from(src: toml::ser::Error) -> FixmeError {
        FixmeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for FixmeError {
    fn from(src: JsonError) -> FixmeError {
        FixmeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for FixmeError {
    fn from(src: uuid::Error) -> FixmeError {
        FixmeError::Serialization(format!("Project id conversion failed: {src}"))
    }
}

impl From<io::Error> for FixmeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => FixmeError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => FixmeError::PermissionDenied,
            _ => FixmeError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for FixmeError {
    fn from(x: fmt::Error) -> Self {
        FixmeError::Custom(format!("{x}"))
    }
}

impl From<RegexError> for FixmeError {
    fn from(x: RegexError) -> Self {
        FixmeError::Config(format!("Regex parse failed: {x}"))
    }
}

impl From<walkdir::Error> for FixmeError {
    fn from(x: walkdir::Error) -> Self {
        match x.io_error().map(|e| e.kind()) {
            Some(io::ErrorKind::NotFound) => FixmeError::NotFound(format!("{x}")),
            Some(io::ErrorKind::PermissionDenied) => FixmeError::PermissionDenied,
            _ => FixmeError::Io(format!("Directory walk failed: {x}")),
        }
    }
}

impl From<TokioSendError<Notification>> for FixmeError {
    fn from(x: TokioSendError<Notification>) -> Self {
        FixmeError::Channel(format!(
            "Channel update send Error, could not transmit notification {:?}",
            x.0
        ))
    }
}

impl From<TokioSendError<LoopCommand>> for FixmeError {
    fn from(x: TokioSendError<LoopCommand>) -> Self {
        FixmeError::Channel(format!(
            "Watch loop is no longer running, could not deliver {:?}",
            x.0
        ))
    }
}

impl From<tokio::task::JoinError> for FixmeError {
    fn from(x: tokio::task::JoinError) -> Self {
        FixmeError::Custom(format!("Check pass task failed: {x}"))
    }
}

impl From<NotifyError> for FixmeError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => {
                FixmeError::Watch(format!("notify: {}, paths: {:?}", msg, notify_error.paths))
            }
            NotifyErrorKind::Io(io_error) => FixmeError::Watch(format!(
                "notify: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => FixmeError::NotFound(format!(
                "notify: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => FixmeError::NotFound(format!(
                "notify: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                FixmeError::Watch("notify invalid config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                FixmeError::Watch("notify max file watch limit reached".to_string())
            }
        }
    }
}
