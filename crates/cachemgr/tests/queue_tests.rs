//! Integration tests for the persisted caching queue and its worker.

mod common;

use bagcache_cachemgr::CachingQueue;
use bagcache_cachemgr::queue::parse_line;
use bagcache_core::CacheOpts;
use common::{DataFile, TestCaches, seeded_bytes, write_dataset};

const HEAD: &str = "ds1.1_0_0.mbag0_4-1";
const MEMBER: &str = "ds1.1_0_0.mbag0_4-0";

#[tokio::test]
async fn test_queue_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("queue/caching.txt");
    {
        let queue = CachingQueue::open(&path).await.unwrap();
        queue.enqueue("ds1", &CacheOpts::default()).await.unwrap();
        queue
            .enqueue("ds2/a.txt", &CacheOpts::recache(true))
            .await
            .unwrap();
        queue
            .enqueue(
                "ds3",
                &CacheOpts {
                    seq: Some("batch7".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let queue = CachingQueue::open(&path).await.unwrap();
    let entries: Vec<(String, CacheOpts)> = queue
        .entries()
        .await
        .unwrap()
        .iter()
        .map(|l| parse_line(l).unwrap())
        .collect();
    let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["ds1", "ds2/a.txt", "ds3"]);
    assert!(entries[1].1.recache);
    assert_eq!(entries[2].1.seq.as_deref(), Some("batch7"));

    assert!(queue.is_queued("ds2/a.txt").await.unwrap());
    assert!(!queue.is_queued("ds2").await.unwrap());
}

#[tokio::test]
async fn test_queue_rejects_unrepresentable_ids() {
    let temp = tempfile::tempdir().unwrap();
    let queue = CachingQueue::open(temp.path().join("q.txt")).await.unwrap();
    assert!(queue.enqueue("", &CacheOpts::default()).await.is_err());
    assert!(queue.enqueue("ds1\tx", &CacheOpts::default()).await.is_err());
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_queued_requests_are_drained() {
    let files = vec![
        DataFile::new("a.csv", seeded_bytes(1, 100), MEMBER),
        DataFile::new("b.csv", seeded_bytes(2, 100), HEAD),
    ];
    let files2 = vec![DataFile::new("c.csv", seeded_bytes(3, 100), "ds2.mbag0_4-0")];
    let tc = TestCaches::new(1_000_000, |store| {
        write_dataset(store, "ds1", "1.0.0", HEAD, &files, &[]);
        write_dataset(store, "ds2", "1", "ds2.mbag0_4-0", &files2, &[]);
    })
    .await;

    tc.manager.queue_cache("ds1", false, None).await.unwrap();
    tc.manager.queue_cache("ds9/missing.csv", false, None).await.unwrap();
    tc.manager.queue_cache("ds2/c.csv", false, None).await.unwrap();
    tc.manager.queue_runner().wait().await;

    // a failed request does not stop the ones behind it
    assert!(tc.manager.is_cached("ds1/a.csv").await.unwrap());
    assert!(tc.manager.is_cached("ds1/b.csv").await.unwrap());
    assert!(tc.manager.is_cached("ds2/c.csv").await.unwrap());

    let status = tc.manager.caching_queue_status().await.unwrap();
    assert_eq!(status.queued, 0);
    assert!(!status.running);
    assert!(status.current.is_none());
}

#[tokio::test]
async fn test_queue_resumes_after_restart() {
    let files = vec![DataFile::new("a.csv", seeded_bytes(1, 100), HEAD)];
    let tc = TestCaches::new(1_000_000, |store| {
        write_dataset(store, "ds1", "1.0.0", HEAD, &files, &[]);
    })
    .await;

    let queue = CachingQueue::open(tc.root().join("queue.txt")).await.unwrap();
    queue.enqueue("ds1/a.csv", &CacheOpts::default()).await.unwrap();

    assert!(tc.manager.resume_queue().await.unwrap());
    tc.manager.queue_runner().wait().await;
    assert!(tc.manager.is_cached("ds1/a.csv").await.unwrap());
    assert!(!tc.manager.resume_queue().await.unwrap());
}
