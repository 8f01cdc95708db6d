//! # Database Error Codes
//!
//! This module defines the enumerated error conditions that the storage and
//! execution core reports across its public seams. Everything is carried
//! through [`eyre::Report`] like the rest of the crate; the typed
//! [`DbError`] sits at the root of the report chain so callers that need to
//! branch on a condition (duplicate key on the insert retry path, row not
//! found under lock-mode OFF) can recover it with [`error_code`].
//!
//! ## Taxonomy
//!
//! - **Storage corruption** (`FileCorrupted`, `ErrorReadingFailed`): a page of
//!   the wrong type, a non-positive record length prefix, a partial off-heap
//!   overwrite, or an undo round-trip with a mismatched operation code. Fatal
//!   for the current operation; always carries page/table context.
//! - **Constraint violation** (`DuplicateKey`, `RowNotFoundWhenDeleting`):
//!   bubbles up unchanged, except where lock-mode OFF makes concurrent
//!   row-level conflicts expected.
//! - **Concurrency / lifecycle** (`DatabaseAlreadyOpen`,
//!   `DatabaseCalledAtShutdown`, `AuthenticatorNotAvailable`): retried
//!   internally where a policy exists.
//! - **Credential** (`WrongUserOrPassword`): a single code for both unknown
//!   user and bad password, surfaced only after the timing-protection delay.
//!
//! ## Usage
//!
//! ```ignore
//! return Err(DbError::get(ErrorCode::FileCorrupted, format!("page {id}")));
//!
//! if error_code(&err) == Some(ErrorCode::DuplicateKey) { /* retry */ }
//! ```

use std::fmt;

/// Enumerated database error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The store returned a page of an unexpected type, or a file header or
    /// record failed validation.
    FileCorrupted,
    /// A row with the same key already exists in a data index.
    DuplicateKey,
    /// A delete did not find the target row.
    RowNotFoundWhenDeleting,
    /// Unknown user or bad password (deliberately indistinguishable).
    WrongUserOrPassword,
    /// `IFEXISTS` was set and the database files do not exist.
    DatabaseNotFoundWithIfExists,
    /// Creation was forbidden and the database files do not exist.
    RemoteDatabaseNotFound,
    /// The database is already open in another process or instance.
    DatabaseAlreadyOpen,
    /// The database was shutting down while a session tried to open it.
    DatabaseCalledAtShutdown,
    /// A clustered peer connected to a database running stand-alone.
    ClusterErrorDatabaseRunsAlone,
    /// A stand-alone peer connected to a database running clustered.
    ClusterErrorDatabaseRunsClustered,
    /// A connection setting names a feature this build does not support.
    UnsupportedSetting,
    /// `AUTHREALM` was set but no authenticator is registered.
    AuthenticatorNotAvailable,
    /// An off-heap or file read could not be satisfied, or a partial
    /// overwrite / partial free / partial truncate was requested.
    ErrorReadingFailed,
    /// Internal invariant violation. Always a bug.
    InternalError,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FileCorrupted => "FILE_CORRUPTED_1",
            ErrorCode::DuplicateKey => "DUPLICATE_KEY_1",
            ErrorCode::RowNotFoundWhenDeleting => "ROW_NOT_FOUND_WHEN_DELETING_1",
            ErrorCode::WrongUserOrPassword => "WRONG_USER_OR_PASSWORD",
            ErrorCode::DatabaseNotFoundWithIfExists => "DATABASE_NOT_FOUND_WITH_IF_EXISTS_1",
            ErrorCode::RemoteDatabaseNotFound => "REMOTE_DATABASE_NOT_FOUND_1",
            ErrorCode::DatabaseAlreadyOpen => "DATABASE_ALREADY_OPEN_1",
            ErrorCode::DatabaseCalledAtShutdown => "DATABASE_CALLED_AT_SHUTDOWN",
            ErrorCode::ClusterErrorDatabaseRunsAlone => "CLUSTER_ERROR_DATABASE_RUNS_ALONE",
            ErrorCode::ClusterErrorDatabaseRunsClustered => {
                "CLUSTER_ERROR_DATABASE_RUNS_CLUSTERED_1"
            }
            ErrorCode::UnsupportedSetting => "UNSUPPORTED_SETTING_1",
            ErrorCode::AuthenticatorNotAvailable => "AUTHENTICATOR_NOT_AVAILABLE",
            ErrorCode::ErrorReadingFailed => "ERROR_READING_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed database error with its enumerated code and context message.
#[derive(Debug, Clone)]
pub struct DbError {
    code: ErrorCode,
    message: String,
}

impl DbError {
    /// Builds an [`eyre::Report`] rooted in a typed `DbError`.
    pub fn get(code: ErrorCode, message: impl Into<String>) -> eyre::Report {
        eyre::Report::new(DbError {
            code,
            message: message.into(),
        })
    }

    /// Internal invariant violations.
    pub fn internal(message: impl Into<String>) -> eyre::Report {
        Self::get(ErrorCode::InternalError, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for DbError {}

/// Recovers the enumerated code from a report, if it is a typed database
/// error.
pub fn error_code(report: &eyre::Report) -> Option<ErrorCode> {
    report.downcast_ref::<DbError>().map(DbError::code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_report() {
        let report = DbError::get(ErrorCode::DuplicateKey, "key 42");

        assert_eq!(error_code(&report), Some(ErrorCode::DuplicateKey));
        assert!(report.to_string().contains("DUPLICATE_KEY_1"));
        assert!(report.to_string().contains("key 42"));
    }

    #[test]
    fn error_code_is_none_for_plain_reports() {
        let report = eyre::eyre!("not a database error");

        assert_eq!(error_code(&report), None);
    }

    #[test]
    fn display_without_message_is_just_the_code() {
        let report = DbError::get(ErrorCode::WrongUserOrPassword, "");

        assert_eq!(report.to_string(), "WRONG_USER_OR_PASSWORD");
    }
}
