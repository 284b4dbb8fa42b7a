//! Core data model for channel-list documents
//!
//! Everything here is a plain value object: codecs build these from bytes,
//! the merge engine combines them, and every "edit" produces a new value.
//! Nothing in this module holds process-wide state, so snapshots can be
//! parsed, merged and serialized on a worker while the owning session keeps
//! reading its own copies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

use crate::errors::{SerializeError, Warning};

/// Service flag bit: parental lock
pub const FLAG_LOCKED: u32 = 0x01;
/// Service flag bit: hidden from the channel list
pub const FLAG_HIDDEN: u32 = 0x02;

/// Composite identifier of one service, unique within a service database
///
/// Equality and ordering are over all five fields; this is the key used to
/// resolve bouquet entries and to deduplicate services during merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceRef {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub namespace: u32,
    pub service_type: u8,
}

impl ServiceRef {
    /// The DVB triple this service is carried on
    pub fn transponder_key(&self) -> TransponderKey {
        TransponderKey {
            namespace: self.namespace,
            transport_stream_id: self.transport_stream_id,
            original_network_id: self.original_network_id,
        }
    }
}

impl std::fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04X}:{:04X}:{:04X}:{:08X}:{}",
            self.service_id,
            self.transport_stream_id,
            self.original_network_id,
            self.namespace,
            self.service_type
        )
    }
}

/// Key of a transponder within a service database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransponderKey {
    pub namespace: u32,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
}

impl std::fmt::Display for TransponderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08X}:{:04X}:{:04X}",
            self.namespace, self.transport_stream_id, self.original_network_id
        )
    }
}

/// Satellite tuning parameters
///
/// The trailing DVB-S2 fields are absent in version-3 databases and in
/// plain DVB-S records, so they stay optional in the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteParams {
    pub frequency: u32,
    pub symbol_rate: u32,
    pub polarization: u8,
    pub fec_inner: u8,
    pub position: i16,
    pub inversion: u8,
    pub flags: u32,
    pub system: Option<u8>,
    pub modulation: Option<u8>,
    pub rolloff: Option<u8>,
    pub pilot: Option<u8>,
}

/// Terrestrial tuning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrestrialParams {
    pub frequency: u32,
    pub bandwidth: u8,
    pub code_rate_hp: u8,
    pub code_rate_lp: u8,
    pub modulation: u8,
    pub transmission_mode: u8,
    pub guard_interval: u8,
    pub hierarchy: u8,
    pub inversion: u8,
    pub flags: u32,
}

/// Cable tuning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableParams {
    pub frequency: u32,
    pub symbol_rate: u32,
    pub inversion: u8,
    pub modulation: u8,
    pub fec_inner: u8,
    pub flags: u32,
}

/// One tuned broadcast carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transponder {
    Satellite(SatelliteParams),
    Terrestrial(TerrestrialParams),
    Cable(CableParams),
}

impl Transponder {
    pub fn frequency(&self) -> u32 {
        match self {
            Transponder::Satellite(p) => p.frequency,
            Transponder::Terrestrial(p) => p.frequency,
            Transponder::Cable(p) => p.frequency,
        }
    }
}

/// Which transponder table a grouping belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TableKind {
    Satellite,
    Terrestrial,
    Cable,
}

/// A named grouping of transponders from one of the XML tables
///
/// `position` is only meaningful for satellites (tenths of a degree,
/// negative is west) and stays zero for terrestrial/cable regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub kind: TableKind,
    pub name: String,
    pub position: i16,
    pub flags: u32,
    pub transponders: Vec<Transponder>,
}

/// Inline stream data for an IPTV service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IptvPayload {
    pub url: String,
    pub stream_type: u32,
}

/// One service record in a service database
///
/// A service with an IPTV payload has no transponder key; a broadcast
/// service always has one (which may still dangle, see `Document::warnings`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub sref: ServiceRef,
    pub name: String,
    pub provider: String,
    pub flags: u32,
    pub service_number: u16,
    pub transponder: Option<TransponderKey>,
    pub iptv: Option<IptvPayload>,
}

impl Service {
    pub fn is_locked(&self) -> bool {
        self.flags & FLAG_LOCKED != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.flags & FLAG_HIDDEN != 0
    }
}

/// Service database schema versions this crate reads
pub const READ_VERSIONS: [u8; 3] = [3, 4, 5];

/// Schema versions the serializer accepts
///
/// Version 3 is read-only by design; version 5 output is experimental and
/// has not been verified against real receiver firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteVersion {
    V4,
    V5,
}

impl WriteVersion {
    pub fn tag(self) -> u8 {
        match self {
            WriteVersion::V4 => 4,
            WriteVersion::V5 => 5,
        }
    }

    /// Map a numeric version tag to a writable version
    pub fn from_tag(version: u8) -> Result<Self, SerializeError> {
        match version {
            4 => Ok(WriteVersion::V4),
            5 => Ok(WriteVersion::V5),
            other => Err(SerializeError::UnsupportedWriteVersion { version: other }),
        }
    }
}

/// A parsed service database: the in-memory, version-agnostic "lamedb"
///
/// The version field is a plain tag; all three schema versions parse into
/// the same record set. Warnings collected during parsing ride along but
/// are excluded from equality (diagnostics, not data).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub version: u8,
    pub transponders: BTreeMap<TransponderKey, Transponder>,
    pub services: BTreeMap<ServiceRef, Service>,
    #[serde(skip)]
    pub warnings: Vec<Warning>,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.transponders == other.transponders
            && self.services == other.services
    }
}

impl Eq for Document {}

impl Document {
    /// Structural copy at a new (writable) schema version
    ///
    /// The in-memory model is version-agnostic, so upgrading only changes
    /// the tag. This is the required step before serializing a version-3
    /// database.
    pub fn upgraded(&self, version: WriteVersion) -> Document {
        Document {
            version: version.tag(),
            transponders: self.transponders.clone(),
            services: self.services.clone(),
            warnings: Vec::new(),
        }
    }

    /// Look up a service by full reference
    pub fn service(&self, sref: &ServiceRef) -> Option<&Service> {
        self.services.get(sref)
    }

    /// Whether a bouquet entry reference resolves in this database under
    /// the given policy
    pub fn resolves(&self, sref: &ServiceRef, policy: crate::config::ReferenceMatchPolicy) -> bool {
        match policy {
            crate::config::ReferenceMatchPolicy::FullReference => {
                self.services.contains_key(sref)
            }
            crate::config::ReferenceMatchPolicy::IgnoreNamespace => {
                self.services.contains_key(sref)
                    || self.services.keys().any(|k| {
                        k.service_id == sref.service_id
                            && k.transport_stream_id == sref.transport_stream_id
                            && k.original_network_id == sref.original_network_id
                            && k.service_type == sref.service_type
                    })
            }
        }
    }
}

/// Bouquet kinds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BouquetKind {
    Tv,
    Radio,
    #[strum(serialize = "webtv")]
    #[serde(rename = "webtv")]
    WebTv,
}

impl BouquetKind {
    /// File extension used by the bouquet index; webTv bouquets live in
    /// the tv index
    pub fn file_suffix(self) -> &'static str {
        match self {
            BouquetKind::Tv | BouquetKind::WebTv => "tv",
            BouquetKind::Radio => "radio",
        }
    }
}

/// An IPTV entry carried inline in a bouquet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IptvEntry {
    pub name: String,
    pub url: String,
    pub stream_type: u32,
    /// Inline EPG reference; pairs with `EpgLink`
    pub epg_id: Option<String>,
}

/// One ordered entry of a bouquet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "lowercase")]
pub enum BouquetEntry {
    /// A reference into a service database; `resolved` records whether the
    /// database supplied at parse time contained it. Unresolved references
    /// are retained so round-tripping never drops them.
    Reference { sref: ServiceRef, resolved: bool },
    /// Inline IPTV service, self-contained
    Iptv(IptvEntry),
    /// Text marker separating sections of a bouquet
    Marker { number: u16, label: String },
}

impl BouquetEntry {
    pub fn display_name<'a>(&'a self, db: Option<&'a Document>) -> Option<&'a str> {
        match self {
            BouquetEntry::Reference { sref, .. } => {
                db.and_then(|d| d.service(sref)).map(|s| s.name.as_str())
            }
            BouquetEntry::Iptv(e) => Some(e.name.as_str()),
            BouquetEntry::Marker { label, .. } => Some(label.as_str()),
        }
    }
}

/// A user-ordered named grouping of channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bouquet {
    pub name: String,
    pub kind: BouquetKind,
    pub entries: Vec<BouquetEntry>,
    #[serde(skip)]
    pub warnings: Vec<Warning>,
}

impl PartialEq for Bouquet {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.entries == other.entries
    }
}

impl Eq for Bouquet {}

impl Bouquet {
    pub fn new<S: Into<String>>(name: S, kind: BouquetKind) -> Self {
        Bouquet {
            name: name.into(),
            kind,
            entries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// New bouquet with EPG identifiers applied to the addressed IPTV
    /// entries; non-IPTV entries and out-of-range indices are left alone
    pub fn with_epg_links(&self, links: &[EpgLink]) -> Bouquet {
        let mut out = self.clone();
        for link in links {
            if let Some(BouquetEntry::Iptv(e)) = out.entries.get_mut(link.entry) {
                e.epg_id = Some(link.epg_id.clone());
            }
        }
        out
    }
}

/// One line of the bouquet index (`bouquets.tv` / `bouquets.radio`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BouquetIndexEntry {
    pub file: String,
    pub kind: BouquetKind,
}

/// EPG linkage for one IPTV bouquet entry
///
/// `entry` is the index into the bouquet the link was produced from; the
/// name is carried for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgLink {
    pub entry: usize,
    pub name: String,
    pub epg_id: String,
}

/// A document plus its loaded bouquets: one side of a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSet {
    pub document: Document,
    pub bouquets: Vec<Bouquet>,
}

impl DataSet {
    pub fn new(document: Document, bouquets: Vec<Bouquet>) -> Self {
        DataSet { document, bouquets }
    }

    pub fn bouquet(&self, name: &str) -> Option<&Bouquet> {
        self.bouquets.iter().find(|b| b.name == name)
    }
}
