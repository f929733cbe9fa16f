use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendRef, RawMessage};

/// Outcome classification of a completed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    InvalidArgument,
    SystemError,
    NotSupported,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// A shared, read-only description of an error.
///
/// Backend-owned messages are released through the backend's own free
/// routine when the last clone is dropped. Messages for locally detected
/// errors are static and never allocated.
#[derive(Clone)]
pub struct ErrorMessage(Repr);

#[derive(Clone)]
enum Repr {
    Static(&'static str),
    Owned(Arc<BackendMessage>),
}

struct BackendMessage {
    backend: BackendRef,
    raw: RawMessage,
    text: String,
}

impl Drop for BackendMessage {
    fn drop(&mut self) {
        self.backend.free_error_message(self.raw);
    }
}

impl ErrorMessage {
    pub(crate) fn from_static(text: &'static str) -> Self {
        ErrorMessage(Repr::Static(text))
    }

    /// Takes ownership of the backend's current error string.
    pub(crate) fn capture(backend: &BackendRef) -> Self {
        let raw = backend.last_error_message();
        let text = backend.message_text(raw);
        ErrorMessage(Repr::Owned(Arc::new(BackendMessage {
            backend: backend.clone(),
            raw,
            text,
        })))
    }

    pub fn as_str(&self) -> &str {
        match &self.0 {
            Repr::Static(text) => text,
            Repr::Owned(owned) => &owned.text,
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl AsRef<str> for ErrorMessage {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Per-call failure report, replacing the C-style shared status register.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("system error: {0}")]
    System(ErrorMessage),

    #[error("not supported")]
    NotSupported,
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidArgument => Status::InvalidArgument,
            Error::System(_) => Status::SystemError,
            Error::NotSupported => Status::NotSupported,
        }
    }

    /// The description for this error. Only system errors carry a
    /// backend-allocated string; the rest share static text.
    pub fn message(&self) -> ErrorMessage {
        match self {
            Error::InvalidArgument => ErrorMessage::from_static("invalid argument"),
            Error::System(message) => message.clone(),
            Error::NotSupported => ErrorMessage::from_static("not supported"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Builds an [`Error`] for a failed backend call, fetching the backend's
/// error string only for system errors.
pub(crate) fn backend_error(backend: &BackendRef, status: Status) -> Error {
    match status {
        Status::SystemError => Error::System(ErrorMessage::capture(backend)),
        Status::NotSupported => Error::NotSupported,
        _ => Error::InvalidArgument,
    }
}

pub(crate) fn check_status(backend: &BackendRef, status: Status) -> Result<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(backend_error(backend, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locally_detected_errors_use_static_messages() {
        assert_eq!(Error::InvalidArgument.status(), Status::InvalidArgument);
        assert_eq!(Error::InvalidArgument.message().as_str(), "invalid argument");
        assert_eq!(Error::NotSupported.status(), Status::NotSupported);
        assert_eq!(Error::NotSupported.message().as_str(), "not supported");
    }

    #[test]
    fn display_matches_the_taxonomy() {
        assert_eq!(Error::InvalidArgument.to_string(), "invalid argument");
        assert_eq!(Error::NotSupported.to_string(), "not supported");
    }
}
