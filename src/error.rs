//! Error types for diag-impact
//!
//! Every variant names the place it came from (byte offset, variable/type
//! key, configuration field) so a manifest entry is actionable on its own.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// diag-impact error types
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer bytes were available than the record layout requires.
    ///
    /// Fatal for the affected file: no partial table is returned.
    #[error("Truncated record at byte {offset}: need {needed} bytes, only {available} available")]
    TruncatedRecord {
        /// Byte offset where the short record starts
        offset: u64,
        /// Bytes the layout requires
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// A block carried a variable token the schema does not know.
    ///
    /// Recoverable: the decoder skips the block and keeps going.
    #[error("Unknown variable token '{token}' at byte {offset} ({records} records skipped)")]
    UnknownVariableToken {
        /// Token as read from the file
        token: String,
        /// Byte offset of the block header
        offset: u64,
        /// Declared record count of the skipped block
        records: usize,
    },

    /// Background and analysis files disagree on a block's record count.
    #[error(
        "Outer-loop mismatch for {variable}/{type_code}: background has {background} records, analysis has {analysis}"
    )]
    OuterLoopMismatch {
        /// Variable token
        variable: String,
        /// Type code (kx or platform)
        type_code: String,
        /// Record count in the background (first outer loop) file
        background: usize,
        /// Record count in the analysis (last outer loop) file
        analysis: usize,
    },

    /// Family tag not registered, or not inferable from the stream.
    #[error("Unknown record family: {0}")]
    UnknownFamily(String),

    /// Requested block is not in the table
    #[error("No block for {variable}/{type_code}")]
    MissingBlock {
        /// Variable token
        variable: String,
        /// Type code (kx or platform)
        type_code: String,
    },

    /// File or block header could not be interpreted
    #[error("Invalid header at byte {offset}: {reason}")]
    InvalidHeader {
        /// Byte offset of the offending record
        offset: u64,
        /// What was wrong
        reason: String,
    },

    /// Background and analysis tables come from different families
    #[error("Family mismatch: background is '{background}', analysis is '{analysis}'")]
    FamilyMismatch {
        /// Background family tag
        background: String,
        /// Analysis family tag
        analysis: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration value out of range or unparsable
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error (columnar export)
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// JSON error (configuration, reports)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether decoding may continue past this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownVariableToken { .. })
    }
}
