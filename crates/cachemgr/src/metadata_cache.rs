//! On-disk cache of per-file dataset metadata.
//!
//! Layout under the base directory:
//!
//! ```text
//! <dsid>/latest_version
//! <dsid>/<version>/_                     resource-level fields
//! <dsid>/<version>/<fp with / as :>.json per-file metadata
//! ```
//!
//! The per-file records double as the file lookup: each one carries the
//! `filepath` and the `bagfile` holding it.

use crate::atomic::{read_optional, write_atomic};
use crate::error::{CacheError, CacheResult};
use bagcache_core::bag_name::{compare_bag_names, parse_bag_name};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const LATEST_VERSION_FILE: &str = "latest_version";
const RESOURCE_FILE: &str = "_";

pub struct MetadataCache {
    basedir: PathBuf,
    lock: Mutex<()>,
}

impl MetadataCache {
    /// Open a metadata cache rooted at an existing, writable directory.
    pub async fn open(basedir: impl Into<PathBuf>) -> CacheResult<Self> {
        let basedir = basedir.into();
        let meta = fs::metadata(&basedir).await.map_err(|e| {
            CacheError::Config(format!(
                "metadata cache directory {}: {e}",
                basedir.display()
            ))
        })?;
        if !meta.is_dir() {
            return Err(CacheError::Config(format!(
                "metadata cache path is not a directory: {}",
                basedir.display()
            )));
        }
        let marker = basedir.join(format!(".writable.{}", uuid::Uuid::new_v4()));
        fs::write(&marker, b"").await?;
        fs::remove_file(&marker).await?;
        Ok(Self {
            basedir,
            lock: Mutex::new(()),
        })
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    fn dataset_dir(&self, dsid: &str, version: &str) -> CacheResult<PathBuf> {
        if dsid.is_empty() || version.is_empty() {
            return Err(CacheError::Config(
                "dataset id and version must not be empty".to_string(),
            ));
        }
        Ok(self.basedir.join(dsid).join(version))
    }

    async fn ensure_dataset_dir(&self, dsid: &str, version: &str) -> CacheResult<PathBuf> {
        let dir = self.dataset_dir(dsid, version)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    fn file_record_name(filepath: &str) -> String {
        format!("{}.json", filepath.replace('/', ":"))
    }

    /// Drop everything recorded for one version of a dataset.
    pub async fn forget(&self, dsid: &str, version: &str) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        let dir = self.dataset_dir(dsid, version)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // Removes the dataset directory only once no other versions remain.
        let _ = fs::remove_dir(self.basedir.join(dsid)).await;
        Ok(())
    }

    pub async fn set_latest_version(&self, dsid: &str, version: &str) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        self.ensure_dataset_dir(dsid, version).await?;
        let path = self.basedir.join(dsid).join(LATEST_VERSION_FILE);
        write_atomic(&path, format!("{version}\n").as_bytes()).await?;
        Ok(())
    }

    pub async fn get_latest_version(&self, dsid: &str) -> CacheResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let path = self.basedir.join(dsid).join(LATEST_VERSION_FILE);
        Ok(read_optional(&path)
            .await?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    /// Merge `md` into the record for the file it names by `filepath`.
    pub async fn cache_file_metadata(
        &self,
        dsid: &str,
        version: &str,
        md: &Map<String, Value>,
    ) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        self.merge_file_metadata(dsid, version, md).await
    }

    async fn merge_file_metadata(
        &self,
        dsid: &str,
        version: &str,
        md: &Map<String, Value>,
    ) -> CacheResult<()> {
        let filepath = md
            .get("filepath")
            .and_then(Value::as_str)
            .filter(|fp| !fp.is_empty())
            .ok_or_else(|| CacheError::Config("file metadata lacks a filepath".to_string()))?;
        let dir = self.ensure_dataset_dir(dsid, version).await?;
        let path = dir.join(Self::file_record_name(filepath));
        let mut record = read_record(&path).await?.unwrap_or_default();
        for (k, v) in md {
            record.insert(k.clone(), v.clone());
        }
        write_atomic(&path, &serde_json::to_vec_pretty(&record)?).await?;
        Ok(())
    }

    /// Save the resource-level fields of a dataset record.
    pub async fn cache_resource_metadata(
        &self,
        dsid: &str,
        version: &str,
        resource: &Value,
    ) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        let dir = self.ensure_dataset_dir(dsid, version).await?;
        let mut fields = resource.as_object().cloned().unwrap_or_default();
        fields.remove("components");
        write_atomic(&dir.join(RESOURCE_FILE), &serde_json::to_vec_pretty(&fields)?).await?;
        Ok(())
    }

    /// Metadata to store in the inventory for a file; empty if nothing has
    /// been recorded. The dataset title is added as `resTitle` when known.
    pub async fn get_metadata_for_cache(
        &self,
        dsid: &str,
        filepath: &str,
        version: &str,
    ) -> CacheResult<Map<String, Value>> {
        let _guard = self.lock.lock().await;
        let dir = self.dataset_dir(dsid, version)?;
        let Some(mut out) = read_record(&dir.join(Self::file_record_name(filepath))).await? else {
            return Ok(Map::new());
        };
        if let Some(resource) = read_record(&dir.join(RESOURCE_FILE)).await?
            && let Some(title) = resource.get("title")
        {
            out.insert("resTitle".into(), title.clone());
        }
        Ok(out)
    }

    /// Record that `filepath` lives in `member_bag`.
    pub async fn map(
        &self,
        dsid: &str,
        version: &str,
        filepath: &str,
        member_bag: &str,
    ) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        let mut md = Map::new();
        md.insert("filepath".into(), filepath.into());
        md.insert("bagfile".into(), member_bag.into());
        self.merge_file_metadata(dsid, version, &md).await
    }

    pub async fn member_bag_for(
        &self,
        dsid: &str,
        version: &str,
        filepath: &str,
    ) -> CacheResult<Option<String>> {
        Ok(self.load_mappings(dsid, version).await?.remove(filepath))
    }

    /// Member bags mapped so far, in bag order.
    pub async fn member_bags(&self, dsid: &str, version: &str) -> CacheResult<Vec<String>> {
        let bags: BTreeSet<String> = self
            .load_mappings(dsid, version)
            .await?
            .into_values()
            .collect();
        let mut bags: Vec<String> = bags.into_iter().collect();
        bags.sort_by(|a, b| match (parse_bag_name(a), parse_bag_name(b)) {
            (Ok(na), Ok(nb)) => compare_bag_names(&na, a, &nb, b),
            _ => a.cmp(b),
        });
        Ok(bags)
    }

    /// File paths mapped to a member bag, sorted.
    pub async fn data_files_in_bag(
        &self,
        dsid: &str,
        version: &str,
        member_bag: &str,
    ) -> CacheResult<BTreeSet<String>> {
        Ok(self
            .load_mappings(dsid, version)
            .await?
            .into_iter()
            .filter(|(_, bag)| bag == member_bag)
            .map(|(fp, _)| fp)
            .collect())
    }

    async fn load_mappings(&self, dsid: &str, version: &str) -> CacheResult<BTreeMap<String, String>> {
        let _guard = self.lock.lock().await;
        let dir = self.dataset_dir(dsid, version)?;
        let mut out = BTreeMap::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(Some(md)) = read_record(&path).await else {
                continue;
            };
            if let (Some(fp), Some(bag)) = (
                md.get("filepath").and_then(Value::as_str),
                md.get("bagfile").and_then(Value::as_str),
            ) {
                out.insert(fp.to_string(), bag.to_string());
            }
        }
        Ok(out)
    }
}

async fn read_record(path: &Path) -> CacheResult<Option<Map<String, Value>>> {
    match read_optional(path).await? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn md(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::open(dir.path()).await.unwrap();
        assert!(cache.get_latest_version("mds2-2106").await.unwrap().is_none());
        cache.set_latest_version("mds2-2106", "1.2.0").await.unwrap();
        assert_eq!(
            cache.get_latest_version("mds2-2106").await.unwrap().as_deref(),
            Some("1.2.0")
        );
        assert!(dir.path().join("mds2-2106/1.2.0").is_dir());
    }

    #[tokio::test]
    async fn test_file_metadata_merges_and_adds_title() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::open(dir.path()).await.unwrap();
        cache
            .cache_file_metadata("ds1", "1", &md(json!({"filepath": "a/b.csv", "size": 10})))
            .await
            .unwrap();
        cache
            .cache_file_metadata("ds1", "1", &md(json!({"filepath": "a/b.csv", "contentType": "text/csv"})))
            .await
            .unwrap();
        assert!(dir.path().join("ds1/1/a:b.csv.json").is_file());

        let got = cache.get_metadata_for_cache("ds1", "a/b.csv", "1").await.unwrap();
        assert_eq!(got["size"], 10);
        assert_eq!(got["contentType"], "text/csv");
        assert!(!got.contains_key("resTitle"));

        cache
            .cache_resource_metadata("ds1", "1", &json!({"title": "Cool data", "components": []}))
            .await
            .unwrap();
        let got = cache.get_metadata_for_cache("ds1", "a/b.csv", "1").await.unwrap();
        assert_eq!(got["resTitle"], "Cool data");
        assert!(cache.get_metadata_for_cache("ds1", "nope", "1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::open(dir.path()).await.unwrap();
        cache.map("ds1", "1", "a.csv", "ds1.mbag0_4-2.zip").await.unwrap();
        cache.map("ds1", "1", "b.csv", "ds1.mbag0_4-10.zip").await.unwrap();
        cache.map("ds1", "1", "c.csv", "ds1.mbag0_4-2.zip").await.unwrap();

        assert_eq!(
            cache.member_bag_for("ds1", "1", "b.csv").await.unwrap().as_deref(),
            Some("ds1.mbag0_4-10.zip")
        );
        assert_eq!(
            cache.member_bags("ds1", "1").await.unwrap(),
            vec!["ds1.mbag0_4-2.zip", "ds1.mbag0_4-10.zip"]
        );
        let files = cache.data_files_in_bag("ds1", "1", "ds1.mbag0_4-2.zip").await.unwrap();
        assert_eq!(files.into_iter().collect::<Vec<_>>(), vec!["a.csv", "c.csv"]);

        cache.forget("ds1", "1").await.unwrap();
        assert!(cache.member_bags("ds1", "1").await.unwrap().is_empty());
        assert!(!dir.path().join("ds1").exists());
    }

    #[tokio::test]
    async fn test_open_rejects_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MetadataCache::open(dir.path().join("nope")).await.is_err());
    }
}
