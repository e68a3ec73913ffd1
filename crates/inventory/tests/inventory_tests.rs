// Inventory database behavior against a real SQLite file.

mod common;

use bagcache_core::roles::VolumeStatus;
use bagcache_inventory::repos::{ObjectRepo, SummaryRepo, VolumeRepo};
use bagcache_inventory::{
    BiggestFirst, InventoryError, OldestFirst, SizeLimitedSelection, escape_like,
};
use common::{TestInventory, file_md, md};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_add_object_replaces_same_volume_and_name() {
    let inv = TestInventory::new().await.unwrap();

    inv.db
        .add_object("ds1/a.txt", "foobar", "ds1/a.txt", &file_md(10))
        .await
        .unwrap();
    inv.db
        .add_object("ds1/a.txt", "foobar", "ds1/a.txt", &file_md(20))
        .await
        .unwrap();

    assert_eq!(inv.row_count().await, 1);
    let found = inv
        .db
        .find_object("ds1/a.txt", VolumeStatus::Get)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].size, Some(20));

    // same name in another volume is a second copy
    inv.db
        .add_object("ds1/a.txt", "fundrum", "ds1/a.txt", &file_md(20))
        .await
        .unwrap();
    assert_eq!(inv.row_count().await, 2);
}

#[tokio::test]
async fn test_add_object_records_columns_and_metadata() {
    let inv = TestInventory::new().await.unwrap();
    let mut meta = file_md(42);
    meta.insert("ediid".into(), json!("ark:/88434/mds2-2106"));
    meta.insert("priority".into(), json!(5));

    let obj = inv
        .db
        .add_object("mds2-2106/file.csv", "foobar", "mds2-2106/file.csv", &meta)
        .await
        .unwrap();
    assert!(obj.cached);
    assert_eq!(obj.size, Some(42));
    assert_eq!(obj.priority, 5);
    assert_eq!(obj.checksum.as_deref(), Some("deadbeef"));
    assert_eq!(obj.checksum_algorithm.as_deref(), Some("sha256"));
    assert_eq!(obj.checked, 0);
    assert!(obj.since > 0);
    assert!(obj.metadata.contains_key("sinceDate"));

    let again = inv
        .db
        .find_object_in("foobar", "mds2-2106/file.csv")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.metadatum_str("contentType"), Some("text/plain"));
    assert_eq!(again.metadatum_str("ediid"), Some("ark:/88434/mds2-2106"));
}

#[tokio::test]
async fn test_add_object_rejects_unknown_volume_and_algorithm() {
    let inv = TestInventory::new().await.unwrap();

    let err = inv
        .db
        .add_object("ds1/a.txt", "nowhere", "ds1/a.txt", &file_md(1))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::VolumeNotFound(v) if v == "nowhere"));

    let mut meta = file_md(1);
    meta.insert("checksumAlgorithm".into(), json!("md5"));
    let err = inv
        .db
        .add_object("ds1/a.txt", "foobar", "ds1/a.txt", &meta)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::UnknownAlgorithm(a) if a == "md5"));

    inv.db.register_algorithm("md5").await.unwrap();
    inv.db
        .add_object("ds1/a.txt", "foobar", "ds1/a.txt", &meta)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_add_object_rejects_mistyped_metadata() {
    let inv = TestInventory::new().await.unwrap();
    let err = inv
        .db
        .add_object("ds1/a.txt", "foobar", "ds1/a.txt", &md(json!({"size": "big"})))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::Metadata { ref name, .. } if name == "size"));
    assert_eq!(inv.row_count().await, 0);
}

#[tokio::test]
async fn test_find_object_respects_status_and_cached_flag() {
    let inv = TestInventory::new().await.unwrap();
    inv.db
        .add_object("ds1/a.txt", "foobar", "ds1/a.txt", &file_md(10))
        .await
        .unwrap();

    inv.set_status("foobar", VolumeStatus::InfoOnly).await;
    assert!(inv.db.find_object("ds1/a.txt", VolumeStatus::Get).await.unwrap().is_empty());
    assert_eq!(
        inv.db
            .find_object("ds1/a.txt", VolumeStatus::InfoOnly)
            .await
            .unwrap()
            .len(),
        1
    );

    inv.set_status("foobar", VolumeStatus::Update).await;
    inv.db.remove_object("foobar", "ds1/a.txt").await.unwrap();
    assert!(inv.db.find_object("ds1/a.txt", VolumeStatus::Get).await.unwrap().is_empty());
    let history = inv
        .db
        .find_object("ds1/a.txt", VolumeStatus::InfoOnly)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].cached);

    inv.db.purge_object("foobar", "ds1/a.txt").await.unwrap();
    assert_eq!(inv.row_count().await, 0);

    // removing something absent is not an error
    inv.db.remove_object("foobar", "ds1/a.txt").await.unwrap();
    inv.db.purge_object("foobar", "ds1/a.txt").await.unwrap();
}

#[tokio::test]
async fn test_update_metadata_merges() {
    let inv = TestInventory::new().await.unwrap();
    inv.db
        .add_object("ds1/a.txt", "foobar", "ds1/a.txt", &md(json!({"size": 10})))
        .await
        .unwrap();

    let updated = inv
        .db
        .update_metadata(
            "foobar",
            "ds1/a.txt",
            &md(json!({"checksum": "cafe", "priority": 3, "color": "red"})),
        )
        .await
        .unwrap();
    assert!(updated);

    let obj = inv
        .db
        .find_object_in("foobar", "ds1/a.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(obj.checksum.as_deref(), Some("cafe"));
    assert_eq!(obj.priority, 3);
    assert_eq!(obj.size, Some(10));
    assert_eq!(obj.metadatum_str("color"), Some("red"));

    let missing = inv
        .db
        .update_metadata("foobar", "ds1/none.txt", &md(json!({"priority": 3})))
        .await
        .unwrap();
    assert!(!missing);
}

#[tokio::test]
async fn test_space_accounting() {
    let inv = TestInventory::new().await.unwrap();
    assert_eq!(inv.db.get_available_space("foobar").await.unwrap(), 1000);

    inv.db
        .add_object("ds1/a", "foobar", "ds1/a", &file_md(300))
        .await
        .unwrap();
    inv.db
        .add_object("ds1/b", "foobar", "ds1/b", &file_md(200))
        .await
        .unwrap();
    assert_eq!(inv.db.get_used_space("foobar").await.unwrap(), 500);
    assert_eq!(inv.db.get_available_space("foobar").await.unwrap(), 500);

    inv.db.remove_object("foobar", "ds1/a").await.unwrap();
    assert_eq!(inv.db.get_available_space("foobar").await.unwrap(), 800);

    assert!(matches!(
        inv.db.get_available_space("nowhere").await,
        Err(InventoryError::VolumeNotFound(_))
    ));
}

#[tokio::test]
async fn test_volume_registration_roundtrip() {
    let inv = TestInventory::new().await.unwrap();
    assert_eq!(inv.db.volumes().await.unwrap(), vec!["foobar", "fundrum"]);

    let rec = inv.db.get_volume_info("foobar").await.unwrap().unwrap();
    assert_eq!(rec.capacity, 1000);
    assert!(rec.info.roles.general);
    assert_eq!(rec.info.status, VolumeStatus::Update);

    inv.set_status("foobar", VolumeStatus::Get).await;
    assert_eq!(
        inv.db.get_volume_status("foobar").await.unwrap(),
        VolumeStatus::Get
    );
    assert!(inv.db.get_volume_info("nowhere").await.unwrap().is_none());
    assert!(inv.db.set_volume_status("nowhere", VolumeStatus::Get).await.is_err());
}

#[tokio::test]
async fn test_select_objects_from_scores_and_sorts() {
    let inv = TestInventory::new().await.unwrap();
    for (name, size) in [("ds1/a", 100u64), ("ds1/b", 300), ("ds1/c", 200)] {
        inv.db
            .add_object(name, "foobar", name, &file_md(size))
            .await
            .unwrap();
    }

    let mut sel = SizeLimitedSelection::new(Arc::new(BiggestFirst { norm: 100.0 }), 10_000, 250);
    let cands = inv.db.select_objects_from("foobar", &mut sel).await.unwrap();
    let names: Vec<_> = cands.iter().map(|c| c.object.name.as_str()).collect();
    assert_eq!(names, vec!["ds1/b", "ds1/c", "ds1/a"]);
    assert_eq!(sel.total_size(), 600);
    assert_eq!(sel.sufficient_size(), 300);

    // a small limit stops the stream early
    let mut sel = SizeLimitedSelection::new(Arc::new(BiggestFirst { norm: 100.0 }), 250, 250);
    let cands = inv.db.select_objects_from("foobar", &mut sel).await.unwrap();
    assert!(cands.len() < 3);
    assert!(sel.limit_reached());
}

#[tokio::test]
async fn test_select_objects_from_skips_young_and_unwritable() {
    let inv = TestInventory::new().await.unwrap();
    inv.db
        .add_object("ds1/young", "foobar", "ds1/young", &file_md(100))
        .await
        .unwrap();
    inv.db
        .add_object("ds1/old", "foobar", "ds1/old", &file_md(100))
        .await
        .unwrap();
    inv.db
        .update_metadata("foobar", "ds1/old", &md(json!({"since": 1_000})))
        .await
        .unwrap();

    let mut sel = SizeLimitedSelection::new(Arc::new(OldestFirst::default()), 10_000, 100);
    let cands = inv.db.select_objects_from("foobar", &mut sel).await.unwrap();
    assert_eq!(cands[0].object.name, "ds1/old");
    assert!(cands[0].score > 0.0);
    let young = cands.iter().find(|c| c.object.name == "ds1/young").unwrap();
    assert_eq!(young.score, 0.0);
    assert_eq!(sel.total_size(), 100);

    inv.set_status("foobar", VolumeStatus::Get).await;
    let mut sel = SizeLimitedSelection::new(Arc::new(OldestFirst::default()), 10_000, 100);
    assert!(inv.db.select_objects_from("foobar", &mut sel).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_select_objects_to_check_oldest_first() {
    let inv = TestInventory::new().await.unwrap();
    for name in ["ds1/a", "ds1/b", "ds1/c"] {
        inv.db
            .add_object(name, "foobar", name, &file_md(1))
            .await
            .unwrap();
    }
    inv.db.update_checked_time("foobar", "ds1/a", 5_000).await.unwrap();
    inv.db.update_checked_time("foobar", "ds1/c", 9_000_000_000_000).await.unwrap();

    let due = inv.db.select_objects_to_check(1_000_000, 10).await.unwrap();
    let names: Vec<_> = due.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["ds1/b", "ds1/a"]);
    assert!(due[1].metadata.contains_key("checkedDate"));

    let due = inv.db.select_objects_to_check(1_000_000, 1).await.unwrap();
    assert_eq!(due.len(), 1);
}

#[tokio::test]
async fn test_select_objects_like_id() {
    let inv = TestInventory::new().await.unwrap();
    for id in ["ds1/a", "ds1/b#2", "ds10/a"] {
        inv.db.add_object(id, "foobar", id, &file_md(1)).await.unwrap();
    }
    let found = inv
        .db
        .select_objects_like_id("ds1/%", VolumeStatus::Get)
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn test_escape_like() {
    assert_eq!(escape_like("mds2-2106"), "mds2-2106");
    assert_eq!(escape_like("a_b%c\\"), "a\\_b\\%c\\\\");
}

#[tokio::test]
async fn test_dataset_summary_matches_id_literally() {
    let inv = TestInventory::new().await.unwrap();
    inv.db.add_object("ds_1/a", "foobar", "ds_1/a", &file_md(10)).await.unwrap();
    inv.db.add_object("dsX1/b", "foobar", "dsX1/b", &file_md(20)).await.unwrap();

    let summary = inv.db.summarize_dataset("ds_1").await.unwrap().unwrap();
    assert_eq!(summary.filecount, 1);
    assert_eq!(summary.totalsize, 10);
    assert!(inv.db.summarize_dataset("ds%").await.unwrap().is_none());
}

#[tokio::test]
async fn test_volume_totals_and_summaries() {
    let inv = TestInventory::new().await.unwrap();

    let totals = inv.db.get_volume_totals("foobar").await.unwrap();
    assert_eq!(totals.filecount, 0);
    assert_eq!(totals.checked_date, "(never)");
    assert!(inv.db.summarize_dataset("ds1").await.unwrap().is_none());

    let mut meta = file_md(100);
    meta.insert("ediid".into(), json!("ark:/88434/ds1"));
    inv.db.add_object("ds1/a", "foobar", "ds1/a", &meta).await.unwrap();
    inv.db.add_object("ds1/b", "fundrum", "ds1/b", &meta).await.unwrap();
    inv.db.add_object("ds2/a", "fundrum", "ds2/a", &file_md(7)).await.unwrap();

    let totals = inv.db.get_volume_totals("fundrum").await.unwrap();
    assert_eq!(totals.filecount, 2);
    assert_eq!(totals.totalsize, 107);

    let summary = inv.db.summarize_dataset("ds1").await.unwrap().unwrap();
    assert_eq!(summary.aipid, "ds1");
    assert_eq!(summary.filecount, 2);
    assert_eq!(summary.totalsize, 200);

    let contents = inv.db.summarize_contents(None).await.unwrap();
    assert_eq!(contents.len(), 2);
    let contents = inv.db.summarize_contents(Some("foobar")).await.unwrap();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].aipid, "ds1");
}
