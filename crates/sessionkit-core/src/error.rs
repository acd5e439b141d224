//! Error types for sessionkit Core
//!
//! Stores report failures as [`StoreError`]; the [`From<StoreError>`] impl on
//! [`Error`] is the single place where backend failures are translated into the
//! canonical vocabulary callers match on.

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

/// Canonical session error kinds shared by every backend.
///
/// The numeric codes are the stable wire convention between stores and core:
/// 1 = invalid session, 2 = field not found, 3 = type assertion, 4 = nil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidSession,
    FieldNotFound,
    AssertType,
    Nil,
}

impl ErrorKind {
    pub fn code(self) -> u8 {
        match self {
            ErrorKind::InvalidSession => 1,
            ErrorKind::FieldNotFound => 2,
            ErrorKind::AssertType => 3,
            ErrorKind::Nil => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorKind::InvalidSession),
            2 => Some(ErrorKind::FieldNotFound),
            3 => Some(ErrorKind::AssertType),
            4 => Some(ErrorKind::Nil),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidSession => "invalid session",
            ErrorKind::FieldNotFound => "field not found",
            ErrorKind::AssertType => "type assertion failed",
            ErrorKind::Nil => "nil value",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    // Canonical session errors
    #[error("Invalid session")]
    InvalidSession,

    #[error("Field not found")]
    FieldNotFound,

    #[error("Type assertion failed")]
    AssertType,

    #[error("Nil value")]
    Nil,

    // Setup errors
    #[error("Session store is not configured")]
    StoreNotConfigured,

    #[error("Cookie hooks are not configured")]
    CookieHooksNotConfigured,

    #[error("Session ID generation failed: {0}")]
    IdGeneration(String),

    #[error("Cookie error: {0}")]
    Cookie(String),

    /// Backend failure passed through from the store untranslated
    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Canonical kind of this error, `None` for setup and backend errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::InvalidSession => Some(ErrorKind::InvalidSession),
            Error::FieldNotFound => Some(ErrorKind::FieldNotFound),
            Error::AssertType => Some(ErrorKind::AssertType),
            Error::Nil => Some(ErrorKind::Nil),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidSession => Error::InvalidSession,
            StoreError::FieldNotFound => Error::FieldNotFound,
            StoreError::AssertType => Error::AssertType,
            StoreError::Nil => Error::Nil,
            StoreError::Backend(msg) => Error::Backend(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
