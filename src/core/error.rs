use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    InvalidCredentials,
    InvalidCode,
    ChallengeExpired,
    NotAuthenticated,
    Unauthorized,
    RateLimited,
    NotFound,
    ServerError,
    Network,
    BadRequest,
    InvalidResponse,
    CacheMiss,
    Schema,
    OutOfDate,
    NotFriends,
    AlreadyFriends,
    Usage,
    Internal,
}

/// Coarse grouping of [`ErrorKind`] by the layer that raises it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Auth,
    Transport,
    Cache,
    Payload,
    Usage,
}

impl ErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::InvalidCredentials
            | ErrorKind::InvalidCode
            | ErrorKind::ChallengeExpired
            | ErrorKind::NotAuthenticated => ErrorClass::Auth,
            ErrorKind::Unauthorized
            | ErrorKind::RateLimited
            | ErrorKind::NotFound
            | ErrorKind::ServerError
            | ErrorKind::Network
            | ErrorKind::BadRequest
            | ErrorKind::InvalidResponse
            | ErrorKind::NotFriends
            | ErrorKind::AlreadyFriends => ErrorClass::Transport,
            ErrorKind::CacheMiss => ErrorClass::Cache,
            ErrorKind::Schema | ErrorKind::OutOfDate => ErrorClass::Payload,
            ErrorKind::Usage | ErrorKind::Internal => ErrorClass::Usage,
        }
    }

    /// Kinds the transport may retry on its own, subject to the retry policy.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Network | ErrorKind::ServerError
        )
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    status: Option<u16>,
    path: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            status: None,
            path: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {path})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}
