//! Error taxonomy shared by every layer of the engine.
//!
//! Process failure (non-zero exit, timeout) is never an error value; it is
//! recorded in a [`TaskResult`](super::types::TaskResult) and drives retry.
//! Everything here is fatal to the call that produced it.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ViperError>;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum ViperError {
    /// Malformed input: bad arguments, empty commands, wrong symbol kinds.
    #[error("invalid input: {0}")]
    Input(String),

    /// A record could not be decoded into an item.
    #[error("invalid record for {kind}: {message}")]
    Decode { kind: &'static str, message: String },

    /// A symbolic path is not registered.
    #[error("could not resolve {0:?}")]
    Resolution(String),

    /// A pre-run or post-run hook failed.
    #[error("hook failed: {0}")]
    Hook(String),

    /// The resolved command could not be started at all.
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The result schema already exists and `force` was not given.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Storage backend failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A worker of the batch pool died before reporting.
    #[error("worker failed: {0}")]
    Worker(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closed classification used by outer layers to pick exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Resolution,
    Hook,
    Spawn,
    Store,
    Worker,
    Config,
}

impl ViperError {
    /// Shorthand for hook implementations.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    pub fn decode(kind: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            kind,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) | Self::Decode { .. } => ErrorKind::Input,
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Hook(_) => ErrorKind::Hook,
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::AlreadyExists(_) | Self::Store(_) | Self::Io(_) => ErrorKind::Store,
            Self::Worker(_) => ErrorKind::Worker,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Always true: a failed process is a result, not an error.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(ViperError::Input("x".into()).kind(), ErrorKind::Input);
        assert_eq!(ViperError::decode("Host", "missing ip").kind(), ErrorKind::Input);
        assert_eq!(
            ViperError::Resolution("demo.ping".into()).kind(),
            ErrorKind::Resolution
        );
        assert_eq!(ViperError::hook("boom").kind(), ErrorKind::Hook);
        assert_eq!(
            ViperError::AlreadyExists("table results".into()).kind(),
            ErrorKind::Store
        );
    }

    #[test]
    fn test_error_display() {
        let e = ViperError::decode("Host", "missing field `ip`");
        assert_eq!(e.to_string(), "invalid record for Host: missing field `ip`");
        let e = ViperError::Resolution("demo.ping".into());
        assert_eq!(e.to_string(), "could not resolve \"demo.ping\"");
    }
}
