//! Selective bouquet import and merge
//!
//! Combines a source data set into a target data set under a user
//! selection. Two modes fall out of the source shape:
//!
//! - with a source service database, selected bouquets pull exactly the
//!   services they reference (plus those services' transponders) and are
//!   appended to the target;
//! - without one ("loose" bouquet files), only entries already resolvable
//!   in the target database survive, IPTV entries always pass through.
//!
//! The merge is additive: an item already present in the target wins by
//! key and is never overwritten, so prior manual edits survive any
//! import. Inputs are borrowed immutably and the outcome is a fresh
//! document + bouquet list.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MergeOptions;
use crate::errors::{CoreError, CoreResult, MergeError, Warning};
use crate::models::{Bouquet, BouquetEntry, DataSet, Document};

/// The subset of source bouquets the user picked, in pick order
///
/// Order is user-visible: bouquets are appended to the target in exactly
/// this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub bouquets: Vec<String>,
}

impl Selection {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection {
            bouquets: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bouquets.is_empty()
    }
}

/// One side of an import: bouquets with or without their service database
///
/// A missing document switches the engine to bouquet-only filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSource {
    pub document: Option<Document>,
    pub bouquets: Vec<Bouquet>,
}

impl ImportSource {
    /// Loose bouquet files with no accompanying database
    pub fn bouquets_only(bouquets: Vec<Bouquet>) -> Self {
        ImportSource {
            document: None,
            bouquets,
        }
    }

    pub fn bouquet(&self, name: &str) -> Option<&Bouquet> {
        self.bouquets.iter().find(|b| b.name == name)
    }
}

impl From<DataSet> for ImportSource {
    fn from(set: DataSet) -> Self {
        ImportSource {
            document: Some(set.document),
            bouquets: set.bouquets,
        }
    }
}

/// Result of one merge invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub document: Document,
    pub bouquets: Vec<Bouquet>,
    pub warnings: Vec<Warning>,
}

/// Merge the selected source bouquets into the target
pub fn merge(
    target: &DataSet,
    source: &ImportSource,
    selection: &Selection,
    options: &MergeOptions,
) -> CoreResult<MergeOutcome> {
    merge_inner(target, source, selection, options, None)
}

/// Merge with cooperative cancellation
pub fn merge_cancellable(
    target: &DataSet,
    source: &ImportSource,
    selection: &Selection,
    options: &MergeOptions,
    cancel: &CancellationToken,
) -> CoreResult<MergeOutcome> {
    merge_inner(target, source, selection, options, Some(cancel))
}

fn merge_inner(
    target: &DataSet,
    source: &ImportSource,
    selection: &Selection,
    options: &MergeOptions,
    cancel: Option<&CancellationToken>,
) -> CoreResult<MergeOutcome> {
    // Structural validation first: an unknown selection entry is the one
    // fatal merge condition
    for name in &selection.bouquets {
        if source.bouquet(name).is_none() {
            return Err(CoreError::Merge(MergeError::UnknownBouquet {
                name: name.clone(),
            }));
        }
    }

    if selection.is_empty() {
        debug!("empty selection, returning target unchanged");
        return Ok(MergeOutcome {
            document: target.document.clone(),
            bouquets: target.bouquets.clone(),
            warnings: Vec::new(),
        });
    }

    let mut document = target.document.clone();
    document.warnings.clear();
    let mut bouquets = target.bouquets.clone();
    let mut warnings = Vec::new();
    let mut processed = 0usize;

    for name in &selection.bouquets {
        let Some(src_bouquet) = source.bouquet(name) else {
            return Err(CoreError::Merge(MergeError::UnknownBouquet {
                name: name.clone(),
            }));
        };
        let mut merged = match &source.document {
            Some(src_doc) => import_full(
                src_bouquet,
                src_doc,
                &mut document,
                &mut warnings,
                options,
                cancel,
                &mut processed,
            )?,
            None => import_bouquet_only(
                src_bouquet,
                &document,
                &mut warnings,
                options,
                cancel,
                &mut processed,
            )?,
        };
        merged.name = unique_name(&merged.name, &bouquets);
        debug!(bouquet = %merged.name, entries = merged.entries.len(), "bouquet imported");
        bouquets.push(merged);
    }

    info!(
        selected = selection.bouquets.len(),
        services = document.services.len(),
        warnings = warnings.len(),
        "merge finished"
    );
    Ok(MergeOutcome {
        document,
        bouquets,
        warnings,
    })
}

/// Full import: pull referenced services (and their transponders) from
/// the source document; the target always wins on key collisions
fn import_full(
    src_bouquet: &Bouquet,
    src_doc: &Document,
    document: &mut Document,
    warnings: &mut Vec<Warning>,
    options: &MergeOptions,
    cancel: Option<&CancellationToken>,
    processed: &mut usize,
) -> CoreResult<Bouquet> {
    let mut out = Bouquet::new(src_bouquet.name.clone(), src_bouquet.kind);
    let mut resolvable = 0usize;

    for entry in &src_bouquet.entries {
        *processed += 1;
        check_cancel(cancel, *processed, options.cancel_check_interval)?;

        match entry {
            BouquetEntry::Reference { sref, .. } => {
                if let Some(service) = src_doc.service(sref) {
                    document
                        .services
                        .entry(*sref)
                        .or_insert_with(|| service.clone());
                    if let Some(key) = &service.transponder
                        && let Some(tp) = src_doc.transponders.get(key)
                    {
                        document
                            .transponders
                            .entry(*key)
                            .or_insert_with(|| tp.clone());
                    }
                    out.entries.push(BouquetEntry::Reference {
                        sref: *sref,
                        resolved: true,
                    });
                    resolvable += 1;
                } else {
                    // Dangling in the source itself: retained verbatim
                    warnings.push(Warning::DanglingReference {
                        context: format!("import of bouquet '{}'", src_bouquet.name),
                        sref: *sref,
                    });
                    out.entries.push(BouquetEntry::Reference {
                        sref: *sref,
                        resolved: false,
                    });
                }
            }
            BouquetEntry::Iptv(_) => {
                resolvable += 1;
                out.entries.push(entry.clone());
            }
            BouquetEntry::Marker { .. } => out.entries.push(entry.clone()),
        }
    }

    if resolvable == 0 {
        warnings.push(Warning::EmptyBouquet {
            bouquet: src_bouquet.name.clone(),
        });
    }
    Ok(out)
}

/// Bouquet-only import: keep entries that already resolve in the target
/// database; IPTV entries and markers carry their own data and always
/// pass through
fn import_bouquet_only(
    src_bouquet: &Bouquet,
    document: &Document,
    warnings: &mut Vec<Warning>,
    options: &MergeOptions,
    cancel: Option<&CancellationToken>,
    processed: &mut usize,
) -> CoreResult<Bouquet> {
    let mut out = Bouquet::new(src_bouquet.name.clone(), src_bouquet.kind);
    let mut resolvable = 0usize;

    for entry in &src_bouquet.entries {
        *processed += 1;
        check_cancel(cancel, *processed, options.cancel_check_interval)?;

        match entry {
            BouquetEntry::Reference { sref, .. } => {
                if document.resolves(sref, options.reference_match) {
                    out.entries.push(BouquetEntry::Reference {
                        sref: *sref,
                        resolved: true,
                    });
                    resolvable += 1;
                } else {
                    warnings.push(Warning::UnresolvedEntry {
                        bouquet: src_bouquet.name.clone(),
                        sref: *sref,
                    });
                }
            }
            BouquetEntry::Iptv(_) => {
                resolvable += 1;
                out.entries.push(entry.clone());
            }
            BouquetEntry::Marker { .. } => out.entries.push(entry.clone()),
        }
    }

    if resolvable == 0 {
        warnings.push(Warning::EmptyBouquet {
            bouquet: src_bouquet.name.clone(),
        });
    }
    Ok(out)
}

/// Resolve bouquet name collisions with a deterministic numeric suffix
fn unique_name(name: &str, existing: &[Bouquet]) -> String {
    let taken = |candidate: &str| existing.iter().any(|b| b.name == candidate);
    if !taken(name) {
        return name.to_string();
    }
    let mut counter = 1usize;
    loop {
        let candidate = format!("{name} ({counter})");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn check_cancel(
    cancel: Option<&CancellationToken>,
    count: usize,
    interval: usize,
) -> CoreResult<()> {
    // count is 1-based; the first entry always checks, and an interval of
    // 1 checks every entry
    if (count - 1) % interval.max(1) == 0
        && let Some(token) = cancel
        && token.is_cancelled()
    {
        return Err(CoreError::Cancelled);
    }
    Ok(())
}
