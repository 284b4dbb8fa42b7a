//! Bouquet file codec (userbouquet.* and the bouquets.tv/radio index)
//!
//! A bouquet file is a `#NAME` header followed by `#SERVICE` lines. A
//! service reference is ten colon-separated fields
//! (`type:flags:stype:sid:tsid:onid:namespace:parent_sid:parent_tsid:unused`;
//! type and flags decimal, the DVB fields hex) with an optional tail: IPTV
//! entries carry a URL-encoded stream URL, a display name and an optional
//! URL-encoded EPG identifier; markers (flags bit 64) carry their label.
//!
//! Broadcast references are resolved against the supplied service
//! database. Unresolved references are retained and reported as
//! `DanglingReference` warnings so a round trip never drops them.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::errors::{CoreResult, ParseError, Warning};
use crate::models::{
    Bouquet, BouquetEntry, BouquetIndexEntry, BouquetKind, Document, IptvEntry, ServiceRef,
};

const MARKER_FLAG: u32 = 64;
/// Reference type for plain DVB services
const TYPE_DVB: u32 = 1;
/// Reference type for GStreamer/IPTV services
const TYPE_IPTV: u32 = 4097;
/// Directory flags used by index entries
const INDEX_FLAGS: u32 = 7;

/// Parse one bouquet file against a service database
///
/// The kind is supplied by the caller (it comes from the index or the
/// file suffix, not the file body).
pub fn parse(bytes: &[u8], db: &Document, kind: BouquetKind) -> CoreResult<Bouquet> {
    let text = text_from(bytes)?;
    let mut bouquet = Bouquet::new("", kind);

    let lines: Vec<&str> = text.lines().collect();
    let mut idx = 0usize;
    while idx < lines.len() {
        let line = lines[idx].trim();
        if let Some(name) = line.strip_prefix("#NAME ") {
            bouquet.name = name.trim().to_string();
        } else if let Some(service) = line.strip_prefix("#SERVICE ") {
            // A marker's #DESCRIPTION echo line is consumed together with
            // its #SERVICE line
            let description = lines
                .get(idx + 1)
                .and_then(|l| l.trim().strip_prefix("#DESCRIPTION "));
            let (mut entry, used_description) =
                parse_service_line(service.trim(), description, idx + 1)?;
            if used_description {
                idx += 1;
            }
            resolve_entry(&mut entry, db, &mut bouquet);
            bouquet.entries.push(entry);
        } else if !line.is_empty() && !line.starts_with('#') {
            return Err(ParseError::malformed(idx + 1, format!("unexpected line '{line}'")).into());
        }
        idx += 1;
    }

    info!(
        name = %bouquet.name,
        %kind,
        entries = bouquet.entries.len(),
        unresolved = bouquet.warnings.len(),
        "parsed bouquet"
    );
    Ok(bouquet)
}

/// Serialize one bouquet file
pub fn serialize(bouquet: &Bouquet) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("#NAME ");
    out.push_str(&bouquet.name);
    out.push('\n');
    for entry in &bouquet.entries {
        match entry {
            BouquetEntry::Reference { sref, .. } => {
                out.push_str(&format!(
                    "#SERVICE {}:0:{:X}:{:X}:{:X}:{:X}:{:X}:0:0:0:\n",
                    TYPE_DVB,
                    sref.service_type,
                    sref.service_id,
                    sref.transport_stream_id,
                    sref.original_network_id,
                    sref.namespace
                ));
            }
            BouquetEntry::Iptv(e) => {
                // Name is URL-encoded like the URL; a raw name could carry
                // ':' and shift the EPG tail field
                out.push_str(&format!(
                    "#SERVICE {}:0:1:0:0:0:0:0:0:0:{}:{}",
                    e.stream_type,
                    urlencoding::encode(&e.url),
                    urlencoding::encode(&e.name)
                ));
                if let Some(epg_id) = &e.epg_id {
                    out.push(':');
                    out.push_str(&urlencoding::encode(epg_id));
                }
                out.push('\n');
            }
            BouquetEntry::Marker { number, label } => {
                out.push_str(&format!(
                    "#SERVICE {}:{}:{:X}:0:0:0:0:0:0:0::{}\n#DESCRIPTION {}\n",
                    TYPE_DVB, MARKER_FLAG, number, label, label
                ));
            }
        }
    }
    out.into_bytes()
}

/// Parse the bouquet index (`bouquets.tv` / `bouquets.radio`)
pub fn parse_index(bytes: &[u8]) -> CoreResult<Vec<BouquetIndexEntry>> {
    let text = text_from(bytes)?;
    let mut entries = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let Some(service) = line.strip_prefix("#SERVICE ") else {
            continue;
        };
        let Some(from) = service.split("FROM BOUQUET ").nth(1) else {
            debug!(line, "index line without FROM BOUQUET clause");
            continue;
        };
        let file = from
            .trim()
            .trim_start_matches('"')
            .split('"')
            .next()
            .unwrap_or_default()
            .to_string();
        if file.is_empty() {
            return Err(
                ParseError::malformed(line_no + 1, "empty bouquet file reference").into(),
            );
        }
        let kind = if file.ends_with(".radio") {
            BouquetKind::Radio
        } else {
            BouquetKind::Tv
        };
        entries.push(BouquetIndexEntry { file, kind });
    }
    Ok(entries)
}

/// Serialize the bouquet index for one kind
pub fn serialize_index(entries: &[BouquetIndexEntry], kind: BouquetKind) -> Vec<u8> {
    let mut out = String::new();
    let label = match kind {
        BouquetKind::Radio => "Radio",
        _ => "TV",
    };
    out.push_str(&format!("#NAME Bouquets ({label})\n"));
    for entry in entries {
        out.push_str(&format!(
            "#SERVICE {TYPE_DVB}:{INDEX_FLAGS}:{}:0:0:0:0:0:0:0:FROM BOUQUET \"{}\" ORDER BY bouquet\n",
            if entry.kind == BouquetKind::Radio { 2 } else { 1 },
            entry.file
        ));
    }
    out.into_bytes()
}

/// Parse an index plus the per-bouquet file contents into an ordered
/// bouquet sequence
///
/// Files missing from the supplied map are skipped and reported; the
/// remaining bouquets keep the index order.
pub fn parse_directory(
    index: &[u8],
    files: &BTreeMap<String, Vec<u8>>,
    db: &Document,
) -> CoreResult<(Vec<Bouquet>, Vec<Warning>)> {
    let entries = parse_index(index)?;
    let mut bouquets = Vec::with_capacity(entries.len());
    let mut warnings = Vec::new();
    for entry in entries {
        match files.get(&entry.file) {
            Some(bytes) => bouquets.push(parse(bytes, db, entry.kind)?),
            None => {
                warn!(file = %entry.file, "bouquet index references a missing file");
                warnings.push(Warning::MissingBouquetFile { file: entry.file });
            }
        }
    }
    Ok((bouquets, warnings))
}

fn text_from(bytes: &[u8]) -> CoreResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| {
        crate::errors::CoreError::Parse(ParseError::Encoding {
            message: format!("bouquet file is not valid UTF-8: {e}"),
        })
    })
}

/// Parse one `#SERVICE` payload; returns the entry and whether the
/// following `#DESCRIPTION` line was consumed
fn parse_service_line(
    line: &str,
    description: Option<&str>,
    line_no: usize,
) -> CoreResult<(BouquetEntry, bool)> {
    // At most 13 tokens: ten reference fields, URL, name, EPG id
    let parts: Vec<&str> = line.splitn(13, ':').collect();
    if parts.len() < 10 {
        return Err(ParseError::malformed(
            line_no,
            format!("service reference needs 10 fields, got {}", parts.len()),
        )
        .into());
    }

    let ref_type = dec_field(parts[0], line_no, "type")?;
    let flags = dec_field(parts[1], line_no, "flags")?;

    if flags & MARKER_FLAG != 0 {
        let number = hex_field(parts[2], line_no, "marker number")? as u16;
        let inline_label = parts.get(11).copied().unwrap_or_default();
        let label = description.unwrap_or(inline_label).to_string();
        return Ok((BouquetEntry::Marker { number, label }, description.is_some()));
    }

    if ref_type != TYPE_DVB {
        // IPTV entry: self-contained, inline data in the tail
        let url_token = parts.get(10).copied().unwrap_or_default();
        let url = urlencoding::decode(url_token)
            .map_err(|e| ParseError::malformed(line_no, format!("undecodable URL: {e}")))?
            .into_owned();
        let name = urlencoding::decode(parts.get(11).copied().unwrap_or_default())
            .map_err(|e| ParseError::malformed(line_no, format!("undecodable name: {e}")))?
            .into_owned();
        let epg_id = match parts.get(12) {
            Some(token) if !token.is_empty() => Some(
                urlencoding::decode(token)
                    .map_err(|e| {
                        ParseError::malformed(line_no, format!("undecodable EPG id: {e}"))
                    })?
                    .into_owned(),
            ),
            _ => None,
        };
        return Ok((
            BouquetEntry::Iptv(IptvEntry {
                name,
                url,
                stream_type: ref_type,
                epg_id,
            }),
            false,
        ));
    }

    let sref = ServiceRef {
        service_type: hex_field(parts[2], line_no, "service_type")? as u8,
        service_id: hex_field(parts[3], line_no, "sid")? as u16,
        transport_stream_id: hex_field(parts[4], line_no, "tsid")? as u16,
        original_network_id: hex_field(parts[5], line_no, "onid")? as u16,
        namespace: hex_field(parts[6], line_no, "namespace")?,
    };
    Ok((
        BouquetEntry::Reference {
            sref,
            resolved: false,
        },
        false,
    ))
}

fn resolve_entry(entry: &mut BouquetEntry, db: &Document, bouquet: &mut Bouquet) {
    if let BouquetEntry::Reference { sref, resolved } = entry {
        if db.service(sref).is_some() {
            *resolved = true;
        } else {
            debug!(%sref, bouquet = %bouquet.name, "bouquet entry does not resolve");
            bouquet.warnings.push(Warning::DanglingReference {
                context: format!("bouquet '{}'", bouquet.name),
                sref: *sref,
            });
        }
    }
}

fn dec_field(s: &str, line_no: usize, what: &str) -> CoreResult<u32> {
    s.parse::<u32>()
        .map_err(|_| ParseError::malformed(line_no, format!("bad {what}: '{s}'")).into())
}

fn hex_field(s: &str, line_no: usize, what: &str) -> CoreResult<u32> {
    u32::from_str_radix(s, 16)
        .map_err(|_| ParseError::malformed(line_no, format!("bad hex {what}: '{s}'")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Service;

    fn db_with(sref: ServiceRef) -> Document {
        let mut doc = Document {
            version: 4,
            ..Default::default()
        };
        doc.services.insert(
            sref,
            Service {
                sref,
                name: "Known".into(),
                provider: String::new(),
                flags: 0,
                service_number: 0,
                transponder: Some(sref.transponder_key()),
                iptv: None,
            },
        );
        doc
    }

    fn known_ref() -> ServiceRef {
        ServiceRef {
            service_id: 0x2B66,
            transport_stream_id: 0x03F3,
            original_network_id: 0x0001,
            namespace: 0x00C0_0000,
            service_type: 0x19,
        }
    }

    const BOUQUET: &str = "#NAME Favourites\n\
#SERVICE 1:0:19:2B66:3F3:1:C00000:0:0:0:\n\
#SERVICE 1:64:1:0:0:0:0:0:0:0::-- Movies --\n\
#DESCRIPTION -- Movies --\n\
#SERVICE 4097:0:1:0:0:0:0:0:0:0:http%3A%2F%2Fhost%2Fstream.m3u8:Channel One:cnn.us\n\
#SERVICE 1:0:1:AAAA:1:1:C00000:0:0:0:\n";

    #[test]
    fn test_parse_bouquet_entries() {
        let db = db_with(known_ref());
        let bq = parse(BOUQUET.as_bytes(), &db, BouquetKind::Tv).unwrap();
        assert_eq!(bq.name, "Favourites");
        assert_eq!(bq.entries.len(), 4);

        assert!(matches!(
            &bq.entries[0],
            BouquetEntry::Reference { sref, .. } if *sref == known_ref()
        ));
        assert!(matches!(
            &bq.entries[1],
            BouquetEntry::Marker { label, .. } if label == "-- Movies --"
        ));
        match &bq.entries[2] {
            BouquetEntry::Iptv(e) => {
                assert_eq!(e.url, "http://host/stream.m3u8");
                assert_eq!(e.name, "Channel One");
                assert_eq!(e.stream_type, 4097);
                assert_eq!(e.epg_id.as_deref(), Some("cnn.us"));
            }
            other => panic!("expected IPTV entry, got {other:?}"),
        }
        // Entry 3 is unresolved but retained
        assert!(matches!(&bq.entries[3], BouquetEntry::Reference { .. }));
        assert_eq!(bq.warnings.len(), 1);
        assert!(matches!(
            &bq.warnings[0],
            Warning::DanglingReference { sref, .. } if sref.service_id == 0xAAAA
        ));
    }

    #[test]
    fn test_round_trip_preserves_order_and_unresolved() {
        let db = db_with(known_ref());
        let bq = parse(BOUQUET.as_bytes(), &db, BouquetKind::Tv).unwrap();
        let bytes = serialize(&bq);
        let again = parse(&bytes, &db, BouquetKind::Tv).unwrap();
        assert_eq!(again, bq);
    }

    #[test]
    fn test_iptv_name_with_colon_round_trips() {
        let mut bq = Bouquet::new("Web", BouquetKind::Tv);
        bq.entries.push(BouquetEntry::Iptv(IptvEntry {
            name: "News: Today".into(),
            url: "http://host/n.m3u8".into(),
            stream_type: 4097,
            epg_id: Some("news.example".into()),
        }));
        let bytes = serialize(&bq);
        let again = parse(&bytes, &Document::default(), BouquetKind::Tv).unwrap();
        assert_eq!(again, bq);
        match &again.entries[0] {
            BouquetEntry::Iptv(e) => {
                assert_eq!(e.name, "News: Today");
                assert_eq!(e.epg_id.as_deref(), Some("news.example"));
            }
            other => panic!("expected IPTV entry, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_index_order_and_kinds() {
        let index = "#NAME Bouquets (TV)\n\
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.favourites.tv\" ORDER BY bouquet\n\
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.sports.tv\" ORDER BY bouquet\n";
        let entries = parse_index(index.as_bytes()).unwrap();
        assert_eq!(
            entries
                .iter()
                .map(|e| e.file.as_str())
                .collect::<Vec<_>>(),
            ["userbouquet.favourites.tv", "userbouquet.sports.tv"]
        );
        assert!(entries.iter().all(|e| e.kind == BouquetKind::Tv));
    }

    #[test]
    fn test_index_round_trip() {
        let entries = vec![
            BouquetIndexEntry {
                file: "userbouquet.favourites.tv".into(),
                kind: BouquetKind::Tv,
            },
            BouquetIndexEntry {
                file: "userbouquet.news.tv".into(),
                kind: BouquetKind::Tv,
            },
        ];
        let bytes = serialize_index(&entries, BouquetKind::Tv);
        assert_eq!(parse_index(&bytes).unwrap(), entries);
    }

    #[test]
    fn test_parse_directory_reports_missing_files() {
        let db = Document::default();
        let index = serialize_index(
            &[
                BouquetIndexEntry {
                    file: "userbouquet.a.tv".into(),
                    kind: BouquetKind::Tv,
                },
                BouquetIndexEntry {
                    file: "userbouquet.gone.tv".into(),
                    kind: BouquetKind::Tv,
                },
            ],
            BouquetKind::Tv,
        );
        let mut files = BTreeMap::new();
        files.insert(
            "userbouquet.a.tv".to_string(),
            b"#NAME A\n".to_vec(),
        );
        let (bouquets, warnings) = parse_directory(&index, &files, &db).unwrap();
        assert_eq!(bouquets.len(), 1);
        assert_eq!(bouquets[0].name, "A");
        assert!(matches!(
            &warnings[0],
            Warning::MissingBouquetFile { file } if file == "userbouquet.gone.tv"
        ));
    }

    #[test]
    fn test_malformed_reference_is_fatal() {
        let text = "#NAME X\n#SERVICE 1:0:19\n";
        let err = parse(text.as_bytes(), &Document::default(), BouquetKind::Tv).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CoreError::Parse(ParseError::MalformedRecord { record: 2, .. })
        ));
    }
}
