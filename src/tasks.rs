//! Async facade over the blocking core operations
//!
//! The codecs and the merge engine are synchronous and CPU-bound. UI and
//! service callers run them through these wrappers, which move owned
//! inputs onto `tokio::task::spawn_blocking` and propagate a
//! `CancellationToken` into the long loops. A cancelled operation returns
//! `CoreError::Cancelled`; a panicked or aborted worker surfaces as
//! `CoreError::Task`.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codecs::lamedb;
use crate::config::MergeOptions;
use crate::errors::{CoreError, CoreResult};
use crate::merge::{self, ImportSource, MergeOutcome, Selection};
use crate::models::{DataSet, Document};

/// Parse a service database off the async runtime
pub async fn parse_lamedb(bytes: Vec<u8>, cancel: CancellationToken) -> CoreResult<Document> {
    run_blocking("lamedb parse", move || {
        lamedb::parse_cancellable(&bytes, &cancel)
    })
    .await
}

/// Serialize a service database off the async runtime
pub async fn serialize_lamedb(
    document: Document,
    version: crate::models::WriteVersion,
) -> CoreResult<Vec<u8>> {
    run_blocking("lamedb serialize", move || {
        lamedb::serialize(&document, version)
    })
    .await
}

/// Run a merge off the async runtime
pub async fn merge(
    target: DataSet,
    source: ImportSource,
    selection: Selection,
    options: MergeOptions,
    cancel: CancellationToken,
) -> CoreResult<MergeOutcome> {
    run_blocking("merge", move || {
        merge::merge_cancellable(&target, &source, &selection, &options, &cancel)
    })
    .await
}

/// Run EPG linking off the async runtime
pub async fn link_epg(
    bouquet: crate::models::Bouquet,
    index: crate::epg::EpgIndex,
) -> CoreResult<(Vec<crate::models::EpgLink>, Vec<crate::epg::UnmatchedEntry>)> {
    run_blocking("EPG link", move || Ok(crate::epg::link(&bouquet, &index))).await
}

async fn run_blocking<T, F>(label: &'static str, work: F) -> CoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CoreResult<T> + Send + 'static,
{
    debug!(operation = label, "dispatching blocking operation");
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CoreError::task(format!("{label} worker failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BouquetKind;

    const LAMEDB_V4: &str = "eDVB services /4/\n\
transponders\n\
00c00000:0441:0001\n\
\ts 11362000:22000000:1:2:192:2:0\n\
/\n\
end\n\
services\n\
0019:00c00000:0441:0001:25:0\n\
Channel One\n\
p:Provider\n\
end\n\
Have a lot of fun!\n";

    #[test_log::test(tokio::test)]
    async fn test_parse_lamedb_task() {
        let doc = parse_lamedb(LAMEDB_V4.as_bytes().to_vec(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(doc.version, 4);
        assert_eq!(doc.services.len(), 1);
    }

    #[test]
    fn test_cancelled_task_reports_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let err = tokio_test::block_on(parse_lamedb(LAMEDB_V4.as_bytes().to_vec(), token))
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[tokio::test]
    async fn test_merge_task() {
        let target = DataSet::default();
        let source = ImportSource::bouquets_only(vec![crate::models::Bouquet::new(
            "Empty",
            BouquetKind::Tv,
        )]);
        let outcome = merge(
            target,
            source,
            Selection::new(["Empty"]),
            MergeOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.bouquets.len(), 1);
    }
}
