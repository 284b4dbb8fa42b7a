//! Error handling for the channel-list core
//!
//! Re-exports the error types and provides the `CoreResult` alias used by
//! every public codec/merge function.

pub mod types;

pub use types::{CoreError, MergeError, ParseError, SerializeError, Warning};

/// Convenience result type used throughout the library surface
pub type CoreResult<T> = Result<T, CoreError>;
