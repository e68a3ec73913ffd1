// Long-term bag store lookups

mod common;

use bagcache_core::hash::Checksum;
use bagcache_storage::{BagStorage, FallbackBagStorage, FilesystemBagStore, StorageError};
use common::{TestBagDir, collect};
use std::sync::Arc;

async fn store(dir: &TestBagDir) -> FilesystemBagStore {
    FilesystemBagStore::new("public", dir.path()).await.unwrap()
}

fn populated() -> TestBagDir {
    let dir = TestBagDir::new();
    dir.put("mds2-2106.mbag0_4-0.zip", b"bag0")
        .put("mds2-2106.mbag0_4-0.zip.sha256", b"not-a-real-hash  mds2-2106.mbag0_4-0.zip\n")
        .put("mds2-2106.1_1_0.mbag0_4-1.zip", b"bag1")
        .put("mds2-2106.1_2_0.mbag0_4-2.zip", b"bag2")
        .put("mds2-2106.1_2_0.mbag0_4-3.zip", b"bag3")
        .put("mds2-2106x.mbag0_4-9.zip", b"other")
        .put("mds2-2107.mbag0_4-0.zip", b"other")
        .put("README.txt", b"not a bag");
    dir
}

#[tokio::test]
async fn test_find_bags_for() {
    let dir = populated();
    let store = store(&dir).await;

    let bags = store.find_bags_for("mds2-2106").await.unwrap();
    assert_eq!(
        bags,
        vec![
            "mds2-2106.mbag0_4-0.zip",
            "mds2-2106.1_1_0.mbag0_4-1.zip",
            "mds2-2106.1_2_0.mbag0_4-2.zip",
            "mds2-2106.1_2_0.mbag0_4-3.zip",
        ]
    );
    assert!(store.find_bags_for("mds2-9999").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_find_head_bag_for() {
    let dir = populated();
    let store = store(&dir).await;

    assert_eq!(
        store.find_head_bag_for("mds2-2106", None).await.unwrap().as_deref(),
        Some("mds2-2106.1_2_0.mbag0_4-3.zip")
    );
    assert_eq!(
        store.find_head_bag_for("mds2-2106", Some("1.1.0")).await.unwrap().as_deref(),
        Some("mds2-2106.1_1_0.mbag0_4-1.zip")
    );
    assert_eq!(
        store.find_head_bag_for("mds2-2106", Some("1")).await.unwrap().as_deref(),
        Some("mds2-2106.mbag0_4-0.zip")
    );
    assert_eq!(store.find_head_bag_for("mds2-2106", Some("3")).await.unwrap(), None);
    assert_eq!(store.find_head_bag_for("mds2-9999", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_open_and_size() {
    let dir = populated();
    let store = store(&dir).await;

    let stream = store.open_file("mds2-2106.1_1_0.mbag0_4-1.zip").await.unwrap().unwrap();
    assert_eq!(collect(stream).await, b"bag1");
    assert_eq!(store.get_size("mds2-2106.1_1_0.mbag0_4-1.zip").await.unwrap(), Some(4));
    assert!(store.exists("README.txt").await.unwrap());

    assert!(store.open_file("missing.zip").await.unwrap().is_none());
    assert_eq!(store.get_size("missing.zip").await.unwrap(), None);
    assert!(!store.exists("missing.zip").await.unwrap());
}

#[tokio::test]
async fn test_get_checksum_prefers_sidecar() {
    let dir = populated();
    let store = store(&dir).await;

    assert_eq!(
        store.get_checksum("mds2-2106.mbag0_4-0.zip").await.unwrap().as_deref(),
        Some("not-a-real-hash")
    );
    assert_eq!(
        store.get_checksum("mds2-2106.1_1_0.mbag0_4-1.zip").await.unwrap(),
        Some(Checksum::compute(b"bag1").to_hex())
    );
    assert_eq!(store.get_checksum("missing.zip").await.unwrap(), None);
}

#[tokio::test]
async fn test_rejects_traversal() {
    let dir = populated();
    let store = store(&dir).await;
    let err = store.exists("../etc/passwd").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidName(_)));
}

#[tokio::test]
async fn test_fallback_prefers_primary() {
    let public = populated();
    let restricted = TestBagDir::new();
    restricted
        .put("mds2-2106.1_3_0.mbag0_4-4.zip", b"rpa bag")
        .put("mds2-2106.1_1_0.mbag0_4-1.zip", b"rpa copy");

    let store = FallbackBagStorage::new(
        Arc::new(FilesystemBagStore::new("restricted", restricted.path()).await.unwrap()),
        Arc::new(store(&public).await),
    );

    assert_eq!(
        store.find_head_bag_for("mds2-2106", None).await.unwrap().as_deref(),
        Some("mds2-2106.1_3_0.mbag0_4-4.zip")
    );
    // version only held publicly
    assert_eq!(
        store.find_head_bag_for("mds2-2106", Some("1.2.0")).await.unwrap().as_deref(),
        Some("mds2-2106.1_2_0.mbag0_4-3.zip")
    );
    // dataset only held publicly
    assert_eq!(
        store.find_bags_for("mds2-2107").await.unwrap(),
        vec!["mds2-2107.mbag0_4-0.zip"]
    );

    let copy = store.open_file("mds2-2106.1_1_0.mbag0_4-1.zip").await.unwrap().unwrap();
    assert_eq!(collect(copy).await, b"rpa copy");
    let public_only = store.open_file("mds2-2106.1_2_0.mbag0_4-2.zip").await.unwrap().unwrap();
    assert_eq!(collect(public_only).await, b"bag2");
    assert!(store.open_file("missing.zip").await.unwrap().is_none());
    assert_eq!(store.get_size("mds2-2106.1_3_0.mbag0_4-4.zip").await.unwrap(), Some(7));
}
