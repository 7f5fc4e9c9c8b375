use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error in {path}: {message}")]
    Template { path: String, message: String },

    #[error("Could not resolve user_id for {table}: {message}")]
    IdentifierResolution { table: String, message: String },

    #[error("Result set is missing column {0}")]
    MissingColumn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("File discovery error: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Staging error: {0}")]
    Stage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code for this class of failure.
    ///
    /// Configuration problems exit with 2, I/O and warehouse failures with 3,
    /// and data-quality failures (unresolvable identifiers, metric drift) with 4.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) | Error::Template { .. } | Error::Pattern(_) => 2,
            Error::Io(_)
            | Error::Glob(_)
            | Error::Csv(_)
            | Error::Spreadsheet(_)
            | Error::Stage(_)
            | Error::Database(_)
            | Error::Migration(_) => 3,
            Error::IdentifierResolution { .. } | Error::MissingColumn(_) => 4,
            Error::Other(_) => 1,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<calamine::Error> for Error {
    fn from(e: calamine::Error) -> Self {
        Error::Spreadsheet(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
