//! # e2lists
//!
//! Core library for reading, editing, merging and writing Enigma2-style
//! receiver channel lists: the `lamedb` service database (schema versions
//! 3 to 5), userbouquet files with their index, the XML transponder
//! tables and extended M3U playlists for webTv bouquets.
//!
//! The crate is a pure data-transformation core: every codec consumes
//! byte slices and produces byte vectors, file and network I/O belong to
//! the caller. Results carry non-fatal [`errors::Warning`] values for the
//! referential rot that real receiver exports accumulate, so a stale
//! bouquet entry never aborts a load.
//!
//! Typical flow: parse a `lamedb` and its bouquets into a
//! [`models::DataSet`], combine another set into it with [`merge::merge`]
//! under a [`merge::Selection`], then serialize back out at version 4
//! or 5.

pub mod codecs;
pub mod config;
pub mod epg;
pub mod errors;
pub mod merge;
pub mod models;
pub mod tasks;

pub use config::{EpgMatchOptions, MergeOptions, ReferenceMatchPolicy};
pub use epg::{EpgIndex, EpgIndexEntry, UnmatchedEntry};
pub use errors::{CoreError, CoreResult, MergeError, ParseError, SerializeError, Warning};
pub use merge::{ImportSource, MergeOutcome, Selection};
pub use models::{
    Bouquet, BouquetEntry, BouquetIndexEntry, BouquetKind, DataSet, Document, EpgLink, Grouping,
    IptvEntry, IptvPayload, Service, ServiceRef, TableKind, Transponder, TransponderKey,
    WriteVersion,
};
