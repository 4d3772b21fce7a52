//! Error types for the sheet access layer and the repositories built on it.

use thiserror::Error;

/// Failures raised by a [`SheetClient`](crate::sheet::SheetClient) backend.
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Unable to parse range: {0}")]
    InvalidRange(String),

    #[error("Unknown sheet: {0}")]
    UnknownSheet(String),

    #[error("No grid with id: {0}")]
    UnknownSheetId(u32),

    #[error("Remote API returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication with the spreadsheet API failed: {0}")]
    Auth(String),

    #[error("Failed to persist workbook: {0}")]
    Persist(String),

    #[error("Failed to decode remote payload: {0}")]
    Decode(String),
}

impl From<std::io::Error> for SheetError {
    fn from(e: std::io::Error) -> Self {
        SheetError::Persist(e.to_string())
    }
}

impl From<bincode::Error> for SheetError {
    fn from(e: bincode::Error) -> Self {
        SheetError::Persist(e.to_string())
    }
}

/// Failures raised by the story and user repositories.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error("Invalid story ID")]
    InvalidStoryId,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Row has {found} cells, expected at most {expected}")]
    RowShape { expected: usize, found: usize },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is not active")]
    AccountInactive,

    #[error("Password hashing failed")]
    PasswordHash,
}

/// Startup configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read {key}: {reason}")]
    Unreadable { key: &'static str, reason: String },
}
