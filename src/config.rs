//! Tunable policies for merging and EPG matching
//!
//! The presentation layer loads these from its TOML settings and passes
//! them into the core per call; the core itself never reads configuration
//! from the environment.

use serde::{Deserialize, Serialize};

/// How a bouquet-only import decides that an entry is "already present"
/// in the target service database
///
/// Full-reference equality is the safe default. `IgnoreNamespace` matches
/// on (sid, tsid, onid, type) only, which helps when the same logical
/// services were scanned under different dish namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMatchPolicy {
    #[default]
    FullReference,
    IgnoreNamespace,
}

/// Options for one merge invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Resolution policy for bouquet-only imports
    #[serde(default)]
    pub reference_match: ReferenceMatchPolicy,
    /// How many records a long loop processes between cancellation checks
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            reference_match: ReferenceMatchPolicy::default(),
            cancel_check_interval: default_cancel_check_interval(),
        }
    }
}

fn default_cancel_check_interval() -> usize {
    256
}

/// Options for EPG name matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgMatchOptions {
    /// Drop quality-suffix tokens (HD, FHD, UHD, 4K, SD) before the
    /// normalized comparison
    #[serde(default = "default_strip_quality_suffixes")]
    pub strip_quality_suffixes: bool,
}

impl Default for EpgMatchOptions {
    fn default() -> Self {
        EpgMatchOptions {
            strip_quality_suffixes: default_strip_quality_suffixes(),
        }
    }
}

fn default_strip_quality_suffixes() -> bool {
    true
}
