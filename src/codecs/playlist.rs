//! Playlist (extended M3U) conversion for webTv bouquets
//!
//! Export flattens a bouquet into `#EXTINF` records carrying the stream
//! URL, display name, optional `tvg-id` (the EPG reference) and
//! `group-title` (the bouquet name). Import is the reverse: every record
//! becomes an inline IPTV placeholder entry — playlists carry no
//! receiver-native identifiers, so import never consults a service
//! database and never produces resolved references.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::errors::{CoreResult, ParseError};
use crate::models::{Bouquet, BouquetEntry, BouquetKind, IptvEntry};

/// Stream type assigned to imported playlist entries
const DEFAULT_STREAM_TYPE: u32 = 4097;

/// Parse a playlist into a proposed webTv bouquet
///
/// The bouquet is named after the first `group-title` found, falling
/// back to "IPTV". Hand the result to the merge engine like any other
/// import source.
pub fn import(bytes: &[u8]) -> CoreResult<Bouquet> {
    let content = std::str::from_utf8(bytes).map_err(|e| {
        crate::errors::CoreError::Parse(ParseError::Encoding {
            message: format!("playlist is not valid UTF-8: {e}"),
        })
    })?;

    let mut bouquet = Bouquet::new("IPTV", BouquetKind::WebTv);
    let mut named = false;
    let mut pending: Option<IptvEntry> = None;

    for (line_num, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || (line.starts_with('#') && !line.starts_with("#EXTINF")) {
            continue;
        }

        if let Some(extinf) = line.strip_prefix("#EXTINF:") {
            let (entry, group) = parse_extinf(extinf, line_num + 1)?;
            if !named && let Some(group) = group {
                bouquet.name = group;
                named = true;
            }
            pending = Some(entry);
        } else {
            // A stream URL line completes the pending record
            match pending.take() {
                Some(mut entry) => {
                    entry.url = line.to_string();
                    bouquet.entries.push(BouquetEntry::Iptv(entry));
                }
                None => {
                    warn!(line = line_num + 1, "stream URL without EXTINF metadata");
                    bouquet.entries.push(BouquetEntry::Iptv(IptvEntry {
                        name: name_from_url(line),
                        url: line.to_string(),
                        stream_type: DEFAULT_STREAM_TYPE,
                        epg_id: None,
                    }));
                }
            }
        }
    }

    info!(
        name = %bouquet.name,
        entries = bouquet.entries.len(),
        "imported playlist"
    );
    Ok(bouquet)
}

/// Serialize a bouquet as a playlist
///
/// Reference entries cannot be exported (no stream URL) and markers have
/// no playlist representation; both are skipped.
pub fn export(bouquet: &Bouquet) -> Vec<u8> {
    let mut out = String::from("#EXTM3U\n");
    for entry in &bouquet.entries {
        let BouquetEntry::Iptv(e) = entry else {
            debug!(bouquet = %bouquet.name, "skipping non-IPTV entry on playlist export");
            continue;
        };
        out.push_str("#EXTINF:-1");
        if let Some(epg_id) = &e.epg_id {
            out.push_str(&format!(" tvg-id=\"{epg_id}\""));
        }
        out.push_str(&format!(" group-title=\"{}\",{}\n", bouquet.name, e.name));
        out.push_str(&e.url);
        out.push('\n');
    }
    out.into_bytes()
}

/// Parse one EXTINF payload into a pending entry plus its group title
fn parse_extinf(extinf: &str, line_no: usize) -> CoreResult<(IptvEntry, Option<String>)> {
    let comma_pos = extinf
        .rfind(',')
        .ok_or_else(|| ParseError::malformed(line_no, "EXTINF missing comma"))?;
    let (duration_and_attrs, title) = extinf.split_at(comma_pos);
    let title = title.trim_start_matches(',').trim();

    let attributes = parse_attributes(duration_and_attrs);
    let entry = IptvEntry {
        name: if title.is_empty() {
            attributes
                .get("tvg-name")
                .cloned()
                .unwrap_or_else(|| "Unnamed Channel".to_string())
        } else {
            title.to_string()
        },
        url: String::new(),
        stream_type: DEFAULT_STREAM_TYPE,
        epg_id: attributes.get("tvg-id").cloned().filter(|v| !v.is_empty()),
    };
    Ok((entry, attributes.get("group-title").cloned()))
}

/// Parse `key="value"` pairs from the EXTINF attribute section
fn parse_attributes(attrs_part: &str) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    let mut chars = attrs_part.chars().peekable();
    let mut current_key = String::new();
    let mut current_value = String::new();
    let mut in_quotes = false;
    let mut in_key = false;
    let mut in_value = false;

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' if !in_quotes => {
                if in_value {
                    if !current_key.is_empty() && !current_value.is_empty() {
                        attributes.insert(current_key.clone(), current_value.clone());
                    }
                    current_key.clear();
                    current_value.clear();
                    in_value = false;
                }
                in_key = true;
            }
            '=' if !in_quotes => {
                in_key = false;
                in_value = true;
                if chars.peek() == Some(&'"') {
                    chars.next();
                    in_quotes = true;
                }
            }
            '"' if in_value => {
                in_quotes = false;
                if !current_key.is_empty() {
                    attributes.insert(current_key.clone(), current_value.clone());
                }
                current_key.clear();
                current_value.clear();
                in_value = false;
            }
            _ => {
                if in_key {
                    current_key.push(ch);
                } else if in_value {
                    current_value.push(ch);
                }
            }
        }
    }
    if in_value && !current_key.is_empty() && !current_value.is_empty() {
        attributes.insert(current_key, current_value);
    }
    attributes
}

fn name_from_url(url: &str) -> String {
    url.split('/')
        .next_back()
        .unwrap_or("Unnamed Channel")
        .split('?')
        .next()
        .unwrap_or("Unnamed Channel")
        .to_string()
}
