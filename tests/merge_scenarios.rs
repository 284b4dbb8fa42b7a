//! End-to-end merge scenarios: parse real file text on both sides, run
//! the merge engine, and check what landed in the target.

use e2lists::codecs::{bouquet, lamedb, playlist};
use e2lists::{
    BouquetEntry, BouquetKind, DataSet, ImportSource, MergeOptions, Selection, Warning,
};

const SOURCE_LAMEDB: &str = "eDVB services /4/\n\
transponders\n\
00c00000:0441:0001\n\
\ts 11362000:22000000:1:2:192:2:0\n\
/\n\
00c00000:0451:0001\n\
\ts 11778000:27500000:0:3:192:2:0\n\
/\n\
end\n\
services\n\
0001:00c00000:0441:0001:1:0\n\
Sport One\n\
p:Sports Corp\n\
0002:00c00000:0441:0001:1:0\n\
Sport Two\n\
p:Sports Corp\n\
0003:00c00000:0451:0001:1:0\n\
Sport Three\n\
p:Sports Corp\n\
0004:00c00000:0451:0001:1:0\n\
Unrelated Channel\n\
p:Other Corp\n\
end\n\
Have a lot of fun!\n";

const SPORTS_BOUQUET: &str = "#NAME Sports\n\
#SERVICE 1:0:1:1:441:1:C00000:0:0:0:\n\
#SERVICE 1:0:1:2:441:1:C00000:0:0:0:\n\
#SERVICE 1:0:1:3:451:1:C00000:0:0:0:\n\
#SERVICE 1:0:1:BEEF:999:9:C00000:0:0:0:\n";

const PLAYLIST: &str = "#EXTM3U\n\
#EXTINF:-1 tvg-id=\"one.example\" group-title=\"IPTV\",Web One\n\
http://host/one.m3u8\n\
#EXTINF:-1 group-title=\"IPTV\",Web Two\n\
http://host/two.m3u8\n";

fn source_set() -> ImportSource {
    let doc = lamedb::parse(SOURCE_LAMEDB.as_bytes()).unwrap();
    let sports = bouquet::parse(SPORTS_BOUQUET.as_bytes(), &doc, BouquetKind::Tv).unwrap();
    ImportSource {
        document: Some(doc),
        bouquets: vec![sports],
    }
}

fn empty_target() -> DataSet {
    let doc = lamedb::parse(b"eDVB services /4/\ntransponders\nend\nservices\nend\n").unwrap();
    DataSet::new(doc, Vec::new())
}

#[test]
fn sports_bouquet_into_empty_target() {
    let outcome = e2lists::merge::merge(
        &empty_target(),
        &source_set(),
        &Selection::new(["Sports"]),
        &MergeOptions::default(),
    )
    .unwrap();

    // The 3 referenced services came over, "Unrelated Channel" did not
    assert_eq!(outcome.document.services.len(), 3);
    assert!(outcome
        .document
        .services
        .values()
        .all(|s| s.provider == "Sports Corp"));
    // Both transponders are referenced and were pulled along
    assert_eq!(outcome.document.transponders.len(), 2);

    let sports = &outcome.bouquets[0];
    assert_eq!(sports.name, "Sports");
    assert_eq!(sports.entries.len(), 4);
    // The dangling fourth entry is retained verbatim and reported
    assert!(matches!(
        sports.entries[3],
        BouquetEntry::Reference { resolved: false, .. }
    ));
    assert_eq!(
        outcome
            .warnings
            .iter()
            .filter(|w| matches!(w, Warning::DanglingReference { .. }))
            .count(),
        1
    );
}

#[test]
fn merging_same_playlist_twice_suffixes_the_second_bouquet() {
    let web = playlist::import(PLAYLIST.as_bytes()).unwrap();
    assert_eq!(web.name, "IPTV");

    let first = e2lists::merge::merge(
        &empty_target(),
        &ImportSource::bouquets_only(vec![web.clone()]),
        &Selection::new(["IPTV"]),
        &MergeOptions::default(),
    )
    .unwrap();
    let target = DataSet::new(first.document, first.bouquets);
    let second = e2lists::merge::merge(
        &target,
        &ImportSource::bouquets_only(vec![web]),
        &Selection::new(["IPTV"]),
        &MergeOptions::default(),
    )
    .unwrap();

    let names: Vec<_> = second.bouquets.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["IPTV", "IPTV (1)"]);
    // IPTV entries pass a bouquet-only import untouched
    assert_eq!(second.bouquets[1].entries.len(), 2);
}

#[test]
fn bouquet_only_import_keeps_resolvable_and_iptv_entries() {
    // Target knows service 1 only
    let target_db = "eDVB services /4/\n\
transponders\n\
00c00000:0441:0001\n\
\ts 11362000:22000000:1:2:192:2:0\n\
/\n\
end\n\
services\n\
0001:00c00000:0441:0001:1:0\n\
Sport One\n\
p:Sports Corp\n\
end\n\
Have a lot of fun!\n";
    let target = DataSet::new(lamedb::parse(target_db.as_bytes()).unwrap(), Vec::new());

    let mixed = "#NAME Mixed\n\
#SERVICE 1:0:1:1:441:1:C00000:0:0:0:\n\
#SERVICE 1:0:1:BEEF:999:9:C00000:0:0:0:\n\
#SERVICE 4097:0:1:0:0:0:0:0:0:0:http%3A%2F%2Fhost%2Fweb.m3u8:Web Channel\n";
    let loose = bouquet::parse(
        mixed.as_bytes(),
        &e2lists::Document::default(),
        BouquetKind::Tv,
    )
    .unwrap();

    let outcome = e2lists::merge::merge(
        &target,
        &ImportSource::bouquets_only(vec![loose]),
        &Selection::new(["Mixed"]),
        &MergeOptions::default(),
    )
    .unwrap();

    let merged = &outcome.bouquets[0];
    assert_eq!(merged.entries.len(), 2);
    assert!(matches!(
        merged.entries[0],
        BouquetEntry::Reference { resolved: true, .. }
    ));
    assert!(matches!(merged.entries[1], BouquetEntry::Iptv(_)));
    assert!(outcome
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::UnresolvedEntry { sref, .. } if sref.service_id == 0xBEEF)));
    // Bouquet-only imports never touch the service database
    assert_eq!(outcome.document, target.document);
}

#[test]
fn merge_twice_is_idempotent_on_the_document() {
    let once = e2lists::merge::merge(
        &empty_target(),
        &source_set(),
        &Selection::new(["Sports"]),
        &MergeOptions::default(),
    )
    .unwrap();
    let target = DataSet::new(once.document.clone(), once.bouquets.clone());
    let twice = e2lists::merge::merge(
        &target,
        &source_set(),
        &Selection::new(["Sports"]),
        &MergeOptions::default(),
    )
    .unwrap();
    assert_eq!(twice.document, once.document);
    assert_eq!(twice.bouquets.len(), 2);
}

#[test]
fn merged_result_survives_a_full_write_read_cycle() {
    let outcome = e2lists::merge::merge(
        &empty_target(),
        &source_set(),
        &Selection::new(["Sports"]),
        &MergeOptions::default(),
    )
    .unwrap();

    let db_bytes = lamedb::serialize(&outcome.document, e2lists::WriteVersion::V4).unwrap();
    let doc = lamedb::parse(&db_bytes).unwrap();
    assert_eq!(doc, outcome.document);

    let bq_bytes = bouquet::serialize(&outcome.bouquets[0]);
    let bq = bouquet::parse(&bq_bytes, &doc, BouquetKind::Tv).unwrap();
    assert_eq!(bq, outcome.bouquets[0]);
}
