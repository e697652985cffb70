//! Error taxonomy for the reconciliation core.
//!
//! Collaborator failures are wrapped with the name of the operation that hit
//! them and propagated without changing their kind. Nothing here retries.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures raised by the local SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures talking to the POS.
#[derive(Debug, Error)]
pub enum PosError {
    #[error("cannot reach POS at {url}: {message}")]
    Transport { url: String, message: String },

    #[error("POS returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed POS payload: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for PosError {
    fn from(e: serde_json::Error) -> Self {
        PosError::Decode(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op}: upstream POS error: {source}")]
    Upstream {
        op: &'static str,
        #[source]
        source: PosError,
    },

    #[error("{op}: store error: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{op}: not found: {what}")]
    NotFound { op: &'static str, what: String },

    #[error("{op}: conflict: {what}")]
    Conflict { op: &'static str, what: String },

    #[error("{op}: invalid state: {what}")]
    InvalidState { op: &'static str, what: String },

    #[error("{op}: invalid input: {what}")]
    InvalidInput { op: &'static str, what: String },
}

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Upstream,
    Store,
    NotFound,
    Conflict,
    InvalidState,
    InvalidInput,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Upstream { .. } => ErrorKind::Upstream,
            Error::Store { .. } => ErrorKind::Store,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::InvalidInput { .. } => ErrorKind::InvalidInput,
        }
    }

    pub(crate) fn not_found(op: &'static str, what: impl Into<String>) -> Self {
        Error::NotFound {
            op,
            what: what.into(),
        }
    }

    pub(crate) fn conflict(op: &'static str, what: impl Into<String>) -> Self {
        Error::Conflict {
            op,
            what: what.into(),
        }
    }

    pub(crate) fn invalid_state(op: &'static str, what: impl Into<String>) -> Self {
        Error::InvalidState {
            op,
            what: what.into(),
        }
    }

    pub(crate) fn invalid_input(op: &'static str, what: impl Into<String>) -> Self {
        Error::InvalidInput {
            op,
            what: what.into(),
        }
    }
}

/// Attach an operation name to store failures.
pub trait StoreResultExt<T> {
    fn store_ctx(self, op: &'static str) -> Result<T>;
}

impl<T, E: Into<StoreError>> StoreResultExt<T> for std::result::Result<T, E> {
    fn store_ctx(self, op: &'static str) -> Result<T> {
        self.map_err(|e| Error::Store {
            op,
            source: e.into(),
        })
    }
}

/// Attach an operation name to POS failures.
pub trait PosResultExt<T> {
    fn upstream_ctx(self, op: &'static str) -> Result<T>;
}

impl<T> PosResultExt<T> for std::result::Result<T, PosError> {
    fn upstream_ctx(self, op: &'static str) -> Result<T> {
        self.map_err(|source| Error::Upstream { op, source })
    }
}
