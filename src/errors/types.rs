//! Error type definitions for the channel-list core
//!
//! This module defines all error types used throughout the library,
//! providing a hierarchical error system that separates fatal failures
//! from the non-fatal warnings that receiver data routinely produces.
//!
//! Propagation policy: structural and version errors abort the enclosing
//! call; referential and matching issues become `Warning` values attached
//! to a still-usable result. Receiver file sets are full of stale
//! references and the codecs must stay usable despite them.

use thiserror::Error;

use crate::models::ServiceRef;

/// Top-level library error type
///
/// Wraps the per-layer error enums so callers can use a single result type
/// across parse, serialize and merge operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Parse-layer errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Serialize-layer errors
    #[error("Serialize error: {0}")]
    Serialize(#[from] SerializeError),

    /// Merge-engine errors
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Cooperative cancellation; no partial result was produced
    #[error("Operation cancelled")]
    Cancelled,

    /// A background task failed outside the operation itself
    #[error("Worker task failed: {message}")]
    Task { message: String },
}

/// Errors produced while parsing one of the list formats
#[derive(Error, Debug)]
pub enum ParseError {
    /// A record violated the format; fatal to the single parse call
    #[error("Malformed record {record}: {message}")]
    MalformedRecord { record: usize, message: String },

    /// The service database header named a schema version this codec
    /// does not read
    #[error("Unsupported service database version: {found}")]
    UnsupportedVersion { found: String },

    /// The input was not decodable text where text was required
    #[error("Encoding error: {message}")]
    Encoding { message: String },
}

/// Errors produced while serializing a document or bouquet
#[derive(Error, Debug)]
pub enum SerializeError {
    /// Version 3 documents are read-only; callers must upgrade first
    #[error("Cannot write service database at version {version}; upgrade to 4 or 5 first")]
    UnsupportedWriteVersion { version: u8 },

    /// Two transponders in one grouping share the same tuning key
    #[error("Duplicate transponder in '{grouping}': {key}")]
    DuplicateTransponder { grouping: String, key: String },

    /// A grouping holds transponders of a different kind than the table
    /// being written
    #[error("Grouping '{grouping}' does not belong in the {expected} table")]
    WrongTableKind { grouping: String, expected: String },

    /// The version-5 layout quotes service names and the format has no
    /// escape for an embedded quote
    #[error("Service name {name:?} cannot be quoted in the version-5 layout")]
    UnquotableName { name: String },

    /// The XML writer failed; only reachable with a failing sink
    #[error("XML write failed: {message}")]
    Xml { message: String },
}

/// Errors for structurally invalid merge inputs
///
/// Everything else the merge engine encounters (unresolvable entries,
/// empty bouquets) is reported as a `Warning`, not an error.
#[derive(Error, Debug)]
pub enum MergeError {
    /// The selection referenced a bouquet the source set does not contain
    #[error("Selected bouquet '{name}' is not present in the import source")]
    UnknownBouquet { name: String },
}

/// Non-fatal issues collected alongside a usable result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A reference did not resolve in the document it was parsed against;
    /// the referencing item is retained as-is
    DanglingReference {
        context: String,
        sref: ServiceRef,
    },
    /// A bouquet-only import dropped an entry that does not resolve in
    /// the target service database
    UnresolvedEntry {
        bouquet: String,
        sref: ServiceRef,
    },
    /// A selected bouquet imported with no resolvable entries
    EmptyBouquet { bouquet: String },
    /// A duplicate record was dropped during parsing
    DuplicateDropped { context: String, key: String },
    /// The bouquet index referenced a file the caller did not supply
    MissingBouquetFile { file: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::DanglingReference { context, sref } => {
                write!(f, "dangling reference in {context}: {sref}")
            }
            Warning::UnresolvedEntry { bouquet, sref } => {
                write!(f, "entry {sref} in bouquet '{bouquet}' does not resolve in the target database")
            }
            Warning::EmptyBouquet { bouquet } => {
                write!(f, "bouquet '{bouquet}' imported without any resolvable entries")
            }
            Warning::DuplicateDropped { context, key } => {
                write!(f, "duplicate {key} dropped while reading {context}")
            }
            Warning::MissingBouquetFile { file } => {
                write!(f, "bouquet index references missing file '{file}'")
            }
        }
    }
}

impl CoreError {
    /// Create a task failure error
    pub fn task<S: Into<String>>(message: S) -> Self {
        Self::Task {
            message: message.into(),
        }
    }
}

impl ParseError {
    /// Create a malformed-record error for the given record index
    pub fn malformed<S: Into<String>>(record: usize, message: S) -> Self {
        Self::MalformedRecord {
            record,
            message: message.into(),
        }
    }
}
