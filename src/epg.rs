//! EPG linking for IPTV bouquet entries
//!
//! The EPG index is supplied by the caller (typically deserialized from a
//! provider's JSON channel list); the core only matches bouquet entries
//! against it. Matching is best-effort: exact display-name match first,
//! then a normalized comparison. Unmatched entries come back as a report,
//! never as an error.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EpgMatchOptions;
use crate::errors::CoreResult;
use crate::models::{Bouquet, BouquetEntry, EpgLink};

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9 ]+").expect("valid literal regex"));

/// Quality suffixes that providers append inconsistently
const QUALITY_TOKENS: [&str; 6] = ["hd", "fhd", "uhd", "sd", "4k", "8k"];

/// One channel of an externally supplied EPG index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgIndexEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// An opaque EPG channel index with prebuilt lookup tables
#[derive(Debug, Clone, Default)]
pub struct EpgIndex {
    exact: HashMap<String, String>,
    normalized: HashMap<String, String>,
    options: EpgMatchOptions,
}

impl EpgIndex {
    pub fn new(entries: Vec<EpgIndexEntry>, options: EpgMatchOptions) -> Self {
        let mut exact = HashMap::new();
        let mut normalized = HashMap::new();
        for entry in entries {
            for name in std::iter::once(&entry.name).chain(entry.aliases.iter()) {
                exact.entry(name.clone()).or_insert_with(|| entry.id.clone());
                normalized
                    .entry(normalize(name, &options))
                    .or_insert_with(|| entry.id.clone());
            }
        }
        EpgIndex {
            exact,
            normalized,
            options,
        }
    }

    /// Build an index from a JSON array of `{id, name, aliases?}` records
    pub fn from_json(bytes: &[u8], options: EpgMatchOptions) -> CoreResult<Self> {
        let entries: Vec<EpgIndexEntry> = serde_json::from_slice(bytes).map_err(|e| {
            crate::errors::CoreError::Parse(crate::errors::ParseError::Encoding {
                message: format!("EPG index is not valid JSON: {e}"),
            })
        })?;
        Ok(Self::new(entries, options))
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.exact
            .get(name)
            .or_else(|| self.normalized.get(&normalize(name, &self.options)))
            .map(String::as_str)
    }
}

/// An IPTV entry the index could not match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedEntry {
    pub entry: usize,
    pub name: String,
}

/// Match a bouquet's IPTV entries against an EPG index
///
/// Returns the links for matched entries and the list of IPTV entries no
/// heuristic matched. Non-IPTV entries are ignored; entries that already
/// carry an EPG id are re-linked only if the index knows their name,
/// otherwise their existing id is kept out of both lists.
pub fn link(bouquet: &Bouquet, index: &EpgIndex) -> (Vec<EpgLink>, Vec<UnmatchedEntry>) {
    let mut links = Vec::new();
    let mut unmatched = Vec::new();

    for (pos, entry) in bouquet.entries.iter().enumerate() {
        let BouquetEntry::Iptv(iptv) = entry else {
            continue;
        };
        match index.lookup(&iptv.name) {
            Some(id) => {
                debug!(name = %iptv.name, epg_id = %id, "matched EPG channel");
                links.push(EpgLink {
                    entry: pos,
                    name: iptv.name.clone(),
                    epg_id: id.to_string(),
                });
            }
            None if iptv.epg_id.is_some() => {
                debug!(name = %iptv.name, "keeping existing EPG id, index has no match");
            }
            None => unmatched.push(UnmatchedEntry {
                entry: pos,
                name: iptv.name.clone(),
            }),
        }
    }

    info!(
        bouquet = %bouquet.name,
        matched = links.len(),
        unmatched = unmatched.len(),
        "EPG linking finished"
    );
    (links, unmatched)
}

/// Lowercase, strip punctuation, collapse whitespace and optionally drop
/// quality-suffix tokens
fn normalize(name: &str, options: &EpgMatchOptions) -> String {
    let lowered = name.to_lowercase();
    let stripped = NON_ALNUM.replace_all(&lowered, " ");
    stripped
        .split_whitespace()
        .filter(|token| {
            !(options.strip_quality_suffixes && QUALITY_TOKENS.contains(token))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BouquetKind, IptvEntry};

    fn index() -> EpgIndex {
        EpgIndex::new(
            vec![
                EpgIndexEntry {
                    id: "cnn.us".into(),
                    name: "CNN International".into(),
                    aliases: vec!["CNN Int".into()],
                },
                EpgIndexEntry {
                    id: "arte.de".into(),
                    name: "ARTE".into(),
                    aliases: vec![],
                },
            ],
            EpgMatchOptions::default(),
        )
    }

    fn webtv(names: &[&str]) -> Bouquet {
        let mut bq = Bouquet::new("IPTV", BouquetKind::WebTv);
        for name in names {
            bq.entries.push(BouquetEntry::Iptv(IptvEntry {
                name: name.to_string(),
                url: format!("http://host/{name}.m3u8"),
                stream_type: 4097,
                epg_id: None,
            }));
        }
        bq
    }

    #[test]
    fn test_exact_match_wins() {
        let (links, unmatched) = link(&webtv(&["CNN International"]), &index());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].epg_id, "cnn.us");
        assert!(unmatched.is_empty());
    }

    #[test]
    fn test_normalized_match_ignores_case_and_quality_suffix() {
        let (links, unmatched) = link(&webtv(&["arte HD", "Arte.", "ARTE 4K"]), &index());
        assert_eq!(links.len(), 3);
        assert!(links.iter().all(|l| l.epg_id == "arte.de"));
        assert!(unmatched.is_empty());
    }

    #[test]
    fn test_unmatched_entries_are_reported_not_fatal() {
        let (links, unmatched) = link(&webtv(&["Totally Unknown"]), &index());
        assert!(links.is_empty());
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].name, "Totally Unknown");
    }

    #[test]
    fn test_alias_match() {
        let (links, _) = link(&webtv(&["CNN Int"]), &index());
        assert_eq!(links[0].epg_id, "cnn.us");
    }

    #[test]
    fn test_from_json() {
        let json = br#"[{"id":"arte.de","name":"ARTE"}]"#;
        let idx = EpgIndex::from_json(json, EpgMatchOptions::default()).unwrap();
        let (links, _) = link(&webtv(&["ARTE"]), &idx);
        assert_eq!(links[0].epg_id, "arte.de");
    }
}
