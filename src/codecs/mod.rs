//! File format codecs
//!
//! Each submodule is a self-contained parse/serialize pair for one of the
//! receiver's on-disk formats. Codecs read from byte slices and write to
//! byte vectors; all file I/O stays with the caller.

pub mod bouquet;
pub mod lamedb;
pub mod playlist;
pub mod transponders;
