use thiserror::Error;

/// Client error taxonomy. Each variant carries the human-readable message
/// delivered to the failing command's completion handle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The operation is already in effect, e.g. connecting twice.
    #[error("duplicate operation: {0}")]
    Duplicate(String),
    /// Transport failure; carries the transport's error string.
    #[error("transport error: {0}")]
    Internal(String),
    /// Protocol framing surprise: wrong number of tagged lines, unknown
    /// greeting code.
    #[error("unexpected response: {0}")]
    Unexpected(String),
    /// A command was issued while disconnected.
    #[error("not connected: {0}")]
    NotConnected(String),
    /// The server replied BAD, or the tagged keyword did not match what the
    /// command expects.
    #[error("bad command: {0}")]
    BadCommand(String),
    /// LOGIN was refused by the server.
    #[error("login failed: {0}")]
    Login(String),
    /// NO reply to LIST/SELECT/SEARCH/FETCH: the mailbox or reference is
    /// invalid.
    #[error("bad reference: {0}")]
    Reference(String),
    /// The response did not match any expected form.
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Duplicate(_) => ErrorKind::Duplicate,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Unexpected(_) => ErrorKind::Unexpected,
            Error::NotConnected(_) => ErrorKind::NotConnected,
            Error::BadCommand(_) => ErrorKind::BadCommand,
            Error::Login(_) => ErrorKind::Login,
            Error::Reference(_) => ErrorKind::Reference,
            Error::Parse(_) => ErrorKind::Parse,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Duplicate(m)
            | Error::Internal(m)
            | Error::Unexpected(m)
            | Error::NotConnected(m)
            | Error::BadCommand(m)
            | Error::Login(m)
            | Error::Reference(m)
            | Error::Parse(m) => m,
        }
    }
}

/// Discriminant of [`Error`]. `NoErr` stands for the empty last-error slot
/// of the client engine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorKind {
    #[default]
    NoErr,
    Duplicate,
    Internal,
    Unexpected,
    NotConnected,
    BadCommand,
    Login,
    Reference,
    Parse,
}
