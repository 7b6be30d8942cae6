//! # Error Handling
//!
//! This module defines the centralized error type for the `config-repo`
//! library. It uses the `thiserror` library to create a single `Error` enum
//! covering every failure mode of the update-and-merge pipeline, with
//! descriptive messages suitable for health panels and CLI output.
//!
//! ## Taxonomy
//!
//! The variants fall into a few families:
//!
//! - **Admission**: `AlreadyInProgress` is informational. A second update
//!   request for a material that is already updating is turned away without
//!   blocking.
//! - **Checkout**: `CheckoutFailed` is fatal to one update cycle and is
//!   reported against the material's own health scope.
//! - **Fragments**: `MalformedDocument`, `SchemaViolation` and
//!   `MergeConflict` are fatal to one update cycle and are reported against
//!   the config-repository scope. The previously merged configuration stays.
//! - **Transactions**: `MultipleTransactionsNotPermitted`,
//!   `UnexpectedRollback` and `SynchronizationNotActive` signal misuse of the
//!   transaction scope and are never suppressed.
//! - **Infrastructure**: settings parsing, persistence, I/O and the wrapped
//!   third-party errors.
//!
//! The `Result` type alias is used to return `Result<T, Error>` from
//! functions throughout the library.

use std::path::PathBuf;

use thiserror::Error;

/// Message used when a second top-level transaction is opened inside one
/// surrounding block.
pub const MULTIPLE_TRANSACTIONS_MESSAGE: &str =
    "Multiple independent transactions are not permitted inside single transaction surrounding.";

/// Main error type for config-repo operations
#[derive(Error, Debug)]
pub enum Error {
    /// An update cycle for this material fingerprint is already running.
    #[error("Update already in progress for material {fingerprint}")]
    AlreadyInProgress { fingerprint: String },

    /// Checking out or updating a material's working copy failed.
    ///
    /// The URL is always the masked form, never carrying a password.
    #[error("Checkout failed for {url}: {message}")]
    CheckoutFailed { url: String, message: String },

    /// A configuration fragment is not well-formed markup.
    #[error("Malformed document {}{}: {message}", file.display(), line.map(|l| format!(" (line {})", l)).unwrap_or_default())]
    MalformedDocument {
        file: PathBuf,
        /// Line reported by the markup parser, when it reports one
        line: Option<usize>,
        message: String,
    },

    /// A well-formed configuration fragment breaks a schema constraint.
    #[error("Schema violation in {} at {path}: {message}", file.display())]
    SchemaViolation {
        file: PathBuf,
        /// Element path of the offending node, e.g. `/cruise/pipelines[@group='g']`
        path: String,
        message: String,
    },

    /// A parsed partial configuration cannot be merged with the rest of the
    /// configuration.
    #[error("Merge conflict for {subject}: {message}")]
    MergeConflict { subject: String, message: String },

    /// A second top-level transaction was opened inside one surrounding block.
    #[error("{}", MULTIPLE_TRANSACTIONS_MESSAGE)]
    MultipleTransactionsNotPermitted,

    /// The transaction was marked rollback-only by a nested body, but the
    /// outermost body completed normally.
    #[error("Transaction rolled back because it has been marked as rollback-only")]
    UnexpectedRollback,

    /// A synchronization was registered with no transaction or surrounding
    /// block open.
    #[error("Transaction synchronization is not active")]
    SynchronizationNotActive,

    /// An error occurred while parsing the `config-repo.yaml` settings file.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// Reading or writing a persisted update record failed.
    #[error("Persistence error at {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

impl Error {
    /// Whether this error describes a bad configuration fragment rather than
    /// an infrastructure failure.
    ///
    /// Fragment errors are reported against the config-repository health
    /// scope and leave the last good configuration in place.
    pub fn is_fragment_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedDocument { .. } | Error::SchemaViolation { .. } | Error::MergeConflict { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
