//! Transponder table codec (satellites.xml / terrestrial.xml / cables.xml)
//!
//! Streaming quick-xml reader for the three per-kind tables and a writer
//! that always emits attributes in canonical order with plain decimal
//! values, so serializing is deterministic regardless of how the input was
//! formatted. Frequency and symbol-rate ranges are validated while
//! reading; a violation is fatal and names the offending record.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Writer;
use tracing::{debug, info};

use crate::errors::{CoreError, CoreResult, ParseError, SerializeError};
use crate::models::{
    CableParams, Grouping, SatelliteParams, TableKind, TerrestrialParams, Transponder,
};

/// Parse one transponder table into its groupings
pub fn parse(bytes: &[u8], kind: TableKind) -> CoreResult<Vec<Grouping>> {
    let content = std::str::from_utf8(bytes).map_err(|e| {
        CoreError::Parse(ParseError::Encoding {
            message: format!("transponder table is not valid UTF-8: {e}"),
        })
    })?;

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut groupings: Vec<Grouping> = Vec::new();
    let mut current: Option<Grouping> = None;
    let mut record = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = element_name(e.name().as_ref())?;
                if name == group_element(kind) {
                    let attrs = parse_attributes(e);
                    current = Some(Grouping {
                        kind,
                        name: attrs.get("name").cloned().unwrap_or_default(),
                        position: attrs
                            .get("position")
                            .and_then(|p| p.parse().ok())
                            .unwrap_or(0),
                        flags: attrs.get("flags").and_then(|f| f.parse().ok()).unwrap_or(0),
                        transponders: Vec::new(),
                    });
                } else if name == "transponder" {
                    record += 1;
                    let attrs = parse_attributes(e);
                    let tp = parse_transponder(&attrs, kind, record)?;
                    match current.as_mut() {
                        Some(group) => group.transponders.push(tp),
                        None => {
                            return Err(ParseError::malformed(
                                record,
                                "transponder element outside a grouping",
                            )
                            .into());
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if element_name(e.name().as_ref())? == group_element(kind)
                    && let Some(group) = current.take()
                {
                    debug!(
                        name = %group.name,
                        transponders = group.transponders.len(),
                        "read transponder grouping"
                    );
                    groupings.push(group);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::malformed(record, format!("XML error: {e}")).into());
            }
            _ => {}
        }
    }

    info!(
        %kind,
        groupings = groupings.len(),
        transponders = record,
        "parsed transponder table"
    );
    Ok(groupings)
}

/// Serialize groupings as one transponder table
///
/// Rejects groupings of the wrong kind and duplicate tuning keys within a
/// grouping (position + frequency + polarization for satellites, frequency
/// for the others).
pub fn serialize(groupings: &[Grouping], kind: TableKind) -> CoreResult<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_element_open(&mut writer, root_element(kind))?;

    for group in groupings {
        if group.kind != kind {
            return Err(CoreError::Serialize(SerializeError::WrongTableKind {
                grouping: group.name.clone(),
                expected: kind.to_string(),
            }));
        }
        write_grouping(&mut writer, group, kind)?;
    }

    write_element_close(&mut writer, root_element(kind))?;
    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn group_element(kind: TableKind) -> &'static str {
    match kind {
        TableKind::Satellite => "sat",
        TableKind::Terrestrial => "terrestrial",
        TableKind::Cable => "cable",
    }
}

fn root_element(kind: TableKind) -> &'static str {
    match kind {
        TableKind::Satellite => "satellites",
        TableKind::Terrestrial => "locations",
        TableKind::Cable => "cables",
    }
}

fn element_name(name: &[u8]) -> CoreResult<String> {
    std::str::from_utf8(name)
        .map(|s| s.to_string())
        .map_err(|e| {
            CoreError::Parse(ParseError::Encoding {
                message: format!("invalid UTF-8 in XML element name: {e}"),
            })
        })
}

/// Parse XML attributes into a map
fn parse_attributes(element: &BytesStart) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for attr in element.attributes().flatten() {
        if let (Ok(key), Ok(value)) = (
            std::str::from_utf8(attr.key.as_ref()),
            std::str::from_utf8(&attr.value),
        ) {
            attrs.insert(key.to_string(), value.to_string());
        }
    }
    attrs
}

fn attr_u32(attrs: &HashMap<String, String>, key: &str) -> u32 {
    attrs.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn attr_u8(attrs: &HashMap<String, String>, key: &str) -> u8 {
    attrs.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn attr_opt_u8(attrs: &HashMap<String, String>, key: &str) -> Option<u8> {
    attrs.get(key).and_then(|v| v.parse().ok())
}

fn parse_transponder(
    attrs: &HashMap<String, String>,
    kind: TableKind,
    record: usize,
) -> CoreResult<Transponder> {
    let tp = match kind {
        TableKind::Satellite => Transponder::Satellite(SatelliteParams {
            frequency: attr_u32(attrs, "frequency"),
            symbol_rate: attr_u32(attrs, "symbol_rate"),
            polarization: attr_u8(attrs, "polarization"),
            fec_inner: attr_u8(attrs, "fec_inner"),
            position: 0, // carried on the grouping, filled by callers that need it
            inversion: attr_u8(attrs, "inversion"),
            flags: attr_u32(attrs, "flags"),
            system: attr_opt_u8(attrs, "system"),
            modulation: attr_opt_u8(attrs, "modulation"),
            rolloff: attr_opt_u8(attrs, "rolloff"),
            pilot: attr_opt_u8(attrs, "pilot"),
        }),
        TableKind::Terrestrial => Transponder::Terrestrial(TerrestrialParams {
            frequency: attr_u32(attrs, "centre_frequency"),
            bandwidth: attr_u8(attrs, "bandwidth"),
            code_rate_hp: attr_u8(attrs, "code_rate_hp"),
            code_rate_lp: attr_u8(attrs, "code_rate_lp"),
            modulation: attr_u8(attrs, "constellation"),
            transmission_mode: attr_u8(attrs, "transmission_mode"),
            guard_interval: attr_u8(attrs, "guard_interval"),
            hierarchy: attr_u8(attrs, "hierarchy_information"),
            inversion: attr_u8(attrs, "inversion"),
            flags: attr_u32(attrs, "flags"),
        }),
        TableKind::Cable => Transponder::Cable(CableParams {
            frequency: attr_u32(attrs, "frequency"),
            symbol_rate: attr_u32(attrs, "symbol_rate"),
            inversion: attr_u8(attrs, "inversion"),
            modulation: attr_u8(attrs, "modulation"),
            fec_inner: attr_u8(attrs, "fec_inner"),
            flags: attr_u32(attrs, "flags"),
        }),
    };

    validate_ranges(&tp, record)?;
    Ok(tp)
}

fn validate_ranges(tp: &Transponder, record: usize) -> CoreResult<()> {
    if tp.frequency() == 0 {
        return Err(ParseError::malformed(record, "frequency must be positive").into());
    }
    let symbol_rate = match tp {
        Transponder::Satellite(p) => Some(p.symbol_rate),
        Transponder::Cable(p) => Some(p.symbol_rate),
        Transponder::Terrestrial(_) => None,
    };
    if symbol_rate == Some(0) {
        return Err(ParseError::malformed(record, "symbol_rate must be positive").into());
    }
    Ok(())
}

/// Tuning key used for write-time duplicate rejection within one grouping
fn duplicate_key(group: &Grouping, tp: &Transponder) -> String {
    match tp {
        Transponder::Satellite(p) => {
            format!("{}/{}/{}", group.position, p.frequency, p.polarization)
        }
        Transponder::Terrestrial(p) => p.frequency.to_string(),
        Transponder::Cable(p) => p.frequency.to_string(),
    }
}

fn write_element_open(writer: &mut Writer<Vec<u8>>, name: &str) -> CoreResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_write_error)
}

fn write_element_close(writer: &mut Writer<Vec<u8>>, name: &str) -> CoreResult<()> {
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new(name)))
        .map_err(xml_write_error)
}

fn xml_write_error<E: std::fmt::Display>(e: E) -> CoreError {
    CoreError::Serialize(SerializeError::Xml {
        message: e.to_string(),
    })
}

fn write_grouping(
    writer: &mut Writer<Vec<u8>>,
    group: &Grouping,
    kind: TableKind,
) -> CoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for tp in &group.transponders {
        let key = duplicate_key(group, tp);
        if !seen.insert(key.clone()) {
            return Err(CoreError::Serialize(SerializeError::DuplicateTransponder {
                grouping: group.name.clone(),
                key,
            }));
        }
    }

    let mut start = BytesStart::new(group_element(kind));
    start.push_attribute(("name", group.name.as_str()));
    start.push_attribute(("flags", group.flags.to_string().as_str()));
    if kind == TableKind::Satellite {
        start.push_attribute(("position", group.position.to_string().as_str()));
    }
    writer
        .write_event(Event::Start(start))
        .map_err(xml_write_error)?;

    for tp in &group.transponders {
        let mut el = BytesStart::new("transponder");
        // Canonical attribute order per kind; never copies input ordering
        match tp {
            Transponder::Satellite(p) => {
                el.push_attribute(("frequency", p.frequency.to_string().as_str()));
                el.push_attribute(("symbol_rate", p.symbol_rate.to_string().as_str()));
                el.push_attribute(("polarization", p.polarization.to_string().as_str()));
                el.push_attribute(("fec_inner", p.fec_inner.to_string().as_str()));
                // Zero is the parse-time default for both, so zero values
                // stay implicit and round-trip unchanged
                if p.inversion != 0 {
                    el.push_attribute(("inversion", p.inversion.to_string().as_str()));
                }
                if p.flags != 0 {
                    el.push_attribute(("flags", p.flags.to_string().as_str()));
                }
                if let Some(system) = p.system {
                    el.push_attribute(("system", system.to_string().as_str()));
                }
                if let Some(modulation) = p.modulation {
                    el.push_attribute(("modulation", modulation.to_string().as_str()));
                }
                if let Some(rolloff) = p.rolloff {
                    el.push_attribute(("rolloff", rolloff.to_string().as_str()));
                }
                if let Some(pilot) = p.pilot {
                    el.push_attribute(("pilot", pilot.to_string().as_str()));
                }
            }
            Transponder::Terrestrial(p) => {
                el.push_attribute(("centre_frequency", p.frequency.to_string().as_str()));
                el.push_attribute(("bandwidth", p.bandwidth.to_string().as_str()));
                el.push_attribute(("constellation", p.modulation.to_string().as_str()));
                el.push_attribute(("code_rate_hp", p.code_rate_hp.to_string().as_str()));
                el.push_attribute(("code_rate_lp", p.code_rate_lp.to_string().as_str()));
                el.push_attribute(("transmission_mode", p.transmission_mode.to_string().as_str()));
                el.push_attribute(("guard_interval", p.guard_interval.to_string().as_str()));
                el.push_attribute(("hierarchy_information", p.hierarchy.to_string().as_str()));
                el.push_attribute(("inversion", p.inversion.to_string().as_str()));
                if p.flags != 0 {
                    el.push_attribute(("flags", p.flags.to_string().as_str()));
                }
            }
            Transponder::Cable(p) => {
                el.push_attribute(("frequency", p.frequency.to_string().as_str()));
                el.push_attribute(("symbol_rate", p.symbol_rate.to_string().as_str()));
                el.push_attribute(("modulation", p.modulation.to_string().as_str()));
                el.push_attribute(("fec_inner", p.fec_inner.to_string().as_str()));
                if p.inversion != 0 {
                    el.push_attribute(("inversion", p.inversion.to_string().as_str()));
                }
                if p.flags != 0 {
                    el.push_attribute(("flags", p.flags.to_string().as_str()));
                }
            }
        }
        writer.write_event(Event::Empty(el)).map_err(xml_write_error)?;
    }

    write_element_close(writer, group_element(kind))
}
