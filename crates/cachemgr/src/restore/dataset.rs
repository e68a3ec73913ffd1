//! Restoring dataset files out of multibag-serialized preservation bags.
//!
//! A file is found by reading its dataset's head bag: the resource record
//! supplies the file's descriptive metadata and the multibag lookup names
//! the member bag holding its bytes. A whole dataset is restored by opening
//! each member bag once and extracting every needed file in a single pass.

use crate::cache::Cache;
use crate::error::{CacheError, CacheResult};
use crate::metadata_cache::MetadataCache;
use crate::reservation::Reservation;
use crate::restore::headbag::{HeadBagCache, find_component_by_filepath};
use crate::restore::{Restorer, archive, naming};
use async_trait::async_trait;
use bagcache_core::bag_name::parse_bag_name;
use bagcache_core::config::RestoreConfig;
use bagcache_core::error::format_capped;
use bagcache_core::hash::SHA256;
use bagcache_core::id::ObjectId;
use bagcache_core::roles::CacheRoles;
use bagcache_core::timestamp::now_millis;
use bagcache_inventory::CacheObject;
use bagcache_inventory::repos::ObjectRepo;
use bagcache_storage::{BagStorage, ByteStream};
use futures::TryStreamExt;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

const MANIFEST_ENTRY: &str = "manifest-sha256.txt";

/// Restores individual dataset files, and whole datasets, from long-term
/// bag storage.
pub struct DatasetRestorer {
    store: Arc<dyn BagStorage>,
    headbags: Arc<HeadBagCache>,
    small_size_limit: u64,
    restricted: Option<RestrictedAccess>,
    mdcache: Option<Arc<MetadataCache>>,
}

/// Where restricted-access datasets live and how long their files stay.
struct RestrictedAccess {
    store: Arc<dyn BagStorage>,
    expiry: Duration,
}

/// Settings shared by every file extracted during one restoration.
struct Extraction<'a> {
    resource: &'a Value,
    prefs: CacheRoles,
    restricted: bool,
    for_version: Option<&'a str>,
    cache: &'a Cache,
    recache: bool,
    target: Option<&'a str>,
}

impl DatasetRestorer {
    pub fn new(
        store: Arc<dyn BagStorage>,
        headbags: Arc<HeadBagCache>,
        config: &RestoreConfig,
    ) -> Self {
        Self {
            store,
            headbags,
            small_size_limit: config.small_size_limit,
            restricted: None,
            mdcache: None,
        }
    }

    /// A restorer that also serves restricted-access data. `store` is
    /// expected to look in `restricted_store` first and fall back to the
    /// public one. Datasets with bags in `restricted_store` are cached with
    /// the restricted roles and an expiry; all others as public data.
    pub fn restricted(
        store: Arc<dyn BagStorage>,
        restricted_store: Arc<dyn BagStorage>,
        headbags: Arc<HeadBagCache>,
        config: &RestoreConfig,
    ) -> Self {
        Self {
            restricted: Some(RestrictedAccess {
                store: restricted_store,
                expiry: config.restricted_expiry(),
            }),
            ..Self::new(store, headbags, config)
        }
    }

    pub fn with_metadata_cache(mut self, mdcache: Arc<MetadataCache>) -> Self {
        self.mdcache = Some(mdcache);
        self
    }

    pub fn head_bags(&self) -> &Arc<HeadBagCache> {
        &self.headbags
    }

    /// True if this restorer can serve restricted-access data.
    pub fn is_restricted(&self) -> bool {
        self.restricted.is_some()
    }

    /// True if the dataset's bags are held in the restricted store.
    pub async fn is_restricted_dataset(&self, dsid: &str) -> CacheResult<bool> {
        match &self.restricted {
            Some(access) => Ok(!access.store.find_bags_for(dsid).await?.is_empty()),
            None => Ok(false),
        }
    }

    pub fn parse_id(&self, id: &str) -> CacheResult<ObjectId> {
        Ok(ObjectId::parse(id)?)
    }

    /// Roles used for a dataset's files when the caller expresses none.
    fn default_prefs(versioned: bool, restricted: bool) -> CacheRoles {
        match (versioned, restricted) {
            (true, true) => CacheRoles::OLD_RESTRICTED,
            (true, false) => CacheRoles::OLD_VERSIONS,
            (false, true) => CacheRoles::RESTRICTED,
            (false, false) => CacheRoles::GENERAL,
        }
    }

    /// Add the small-object role to `prefs` for a small current file.
    fn prefs_for_size(&self, prefs: CacheRoles, size: u64) -> CacheRoles {
        if !prefs.is_versioned()
            && !prefs.restricted
            && size > 0
            && size <= self.small_size_limit
        {
            prefs.union(&CacheRoles::SMALL)
        } else {
            prefs
        }
    }

    async fn component_for(&self, id: &ObjectId) -> CacheResult<Option<Value>> {
        let Some(filepath) = &id.filepath else {
            return Ok(None);
        };
        self.headbags
            .resolve_distribution(&id.dataset, filepath, id.version.as_deref())
            .await
    }

    /// Open a bag for reading, preferring a copy in the head-bag cache.
    async fn open_bag(&self, bagfile: &str) -> CacheResult<ByteStream> {
        if let Some(stream) = self.headbags.open_cached(bagfile).await? {
            return Ok(stream);
        }
        self.store
            .open_file(bagfile)
            .await?
            .ok_or_else(|| CacheError::ObjectNotFound(bagfile.to_string()))
    }

    /// Cache every data file of a dataset version (the latest when
    /// `version` is `None`) into `cache`.
    ///
    /// Member bags that cannot be found, and files that fail to cache, are
    /// logged and skipped. Returns the file paths now in the cache.
    pub async fn cache_dataset(
        &self,
        dsid: &str,
        version: Option<&str>,
        cache: &Cache,
        recache: bool,
        prefs: CacheRoles,
        target: Option<&str>,
    ) -> CacheResult<BTreeSet<String>> {
        let label = match version {
            Some(v) => format!("{dsid}#{v}"),
            None => dsid.to_string(),
        };
        let headbag = self
            .headbags
            .head_bag_for(dsid, version)
            .await?
            .ok_or_else(|| CacheError::ObjectNotFound(label.clone()))?;
        if !headbag.ends_with(".zip") {
            return Err(CacheError::restoration(
                &headbag,
                "unsupported serialization type on bag",
            ));
        }
        let restricted = self.is_restricted_dataset(dsid).await?;
        let prefs = if prefs.is_empty() {
            Self::default_prefs(version.is_some(), restricted)
        } else {
            prefs
        };

        let contents = self.headbags.read_contents(&headbag).await?;
        let mut by_bag: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (path, bag) in &contents.lookup {
            let Some(filepath) = path.strip_prefix("data/") else {
                continue;
            };
            if path.ends_with(".sha256") {
                continue;
            }
            let bagfile = if bag.ends_with(".zip") {
                bag.clone()
            } else {
                format!("{bag}.zip")
            };
            by_bag.entry(bagfile).or_default().insert(filepath.to_string());
        }

        let job = Extraction {
            resource: &contents.resource,
            prefs,
            restricted,
            for_version: version,
            cache,
            recache,
            target,
        };
        let mut cached = BTreeSet::new();
        let mut missing = Vec::new();
        for (bagfile, mut need) in by_bag {
            tracing::info!(dataset = %label, bag = %bagfile, files = need.len(), "Caching files from bag");
            match self.extract_from_bag(&job, &bagfile, Some(&mut need), &mut cached).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!(bag = %bagfile, "Member bag not found in store (skipping)");
                }
                Err(e) => {
                    tracing::error!(
                        bag = %bagfile,
                        error = %e,
                        "Problem pulling files from bag; skipping the rest of this bag"
                    );
                }
            }
            missing.extend(need);
        }

        if !missing.is_empty() {
            missing.sort();
            tracing::warn!(
                dataset = %label,
                count = missing.len(),
                "Failed to cache {} data file(s), including: {}",
                missing.len(),
                format_capped(&missing)
            );
        }

        if let Some(mdcache) = &self.mdcache
            && let Err(e) = self
                .record_metadata(mdcache, dsid, version, &contents.resource, &contents.lookup)
                .await
        {
            tracing::warn!(dataset = %label, error = %e, "Failed to update metadata cache");
        }

        Ok(cached)
    }

    /// Cache the data files found in one member bag. With `files` only
    /// those file paths are extracted; otherwise every data file is.
    pub async fn cache_from_bag(
        &self,
        bagfile: &str,
        files: Option<BTreeSet<String>>,
        for_version: Option<&str>,
        cache: &Cache,
        recache: bool,
    ) -> CacheResult<BTreeSet<String>> {
        let bag = parse_bag_name(bagfile).map_err(|_| {
            CacheError::restoration(bagfile, "illegal bag file name")
        })?;
        let version = bag.dotted_version();
        let resource = self
            .headbags
            .resolve_dataset(&bag.dataset, Some(&version))
            .await?
            .ok_or_else(|| {
                CacheError::restoration(bagfile, "unable to find metadata for bag's dataset")
            })?;
        let restricted = self.is_restricted_dataset(&bag.dataset).await?;
        let job = Extraction {
            resource: &resource,
            prefs: Self::default_prefs(for_version.is_some(), restricted),
            restricted,
            for_version,
            cache,
            recache,
            target: None,
        };
        let mut cached = BTreeSet::new();
        let mut need = files;
        self.extract_from_bag(&job, bagfile, need.as_mut(), &mut cached)
            .await?;
        Ok(cached)
    }

    /// Stream through a member bag once, caching the needed data files.
    /// Files cached (or found already cached) are moved from `need` to
    /// `cached`.
    async fn extract_from_bag(
        &self,
        job: &Extraction<'_>,
        bagfile: &str,
        mut need: Option<&mut BTreeSet<String>>,
        cached: &mut BTreeSet<String>,
    ) -> CacheResult<()> {
        if !bagfile.ends_with(".zip") {
            return Err(CacheError::restoration(
                bagfile,
                "unsupported serialization type on bag",
            ));
        }
        let bag = parse_bag_name(bagfile)
            .map_err(|_| CacheError::restoration(bagfile, "illegal bag file name"))?;

        let file = archive::spool(self.open_bag(bagfile).await?).await?;
        let mut entries = archive::stream_entries(file);

        let mut manifest: HashMap<String, String> = HashMap::new();
        let mut unchecked: Vec<(CacheObject, String)> = Vec::new();

        while let Some(entry) = entries.recv().await {
            let entry = entry.map_err(|source| CacheError::Archive {
                bag: bagfile.to_string(),
                source,
            })?;
            let Some((_, rel)) = entry.name.split_once('/') else {
                continue;
            };

            if rel == MANIFEST_ENTRY {
                let text = read_body(entry.body).await?;
                manifest = parse_manifest(&text);
                continue;
            }
            let Some(filepath) = rel.strip_prefix("data/") else {
                continue;
            };
            if filepath.is_empty() || filepath.ends_with(".sha256") {
                continue;
            }
            if let Some(need) = need.as_deref()
                && !need.contains(filepath)
            {
                continue;
            }
            let filepath = filepath.to_string();

            let id = naming::id_for_object(&bag.dataset, &filepath, job.for_version, job.target);
            if job.cache.is_cached(&id).await? {
                if job.recache {
                    job.cache.uncache(&id).await?;
                } else {
                    tracing::debug!(id = %id, "Skipping already cached file");
                    if let Some(need) = need.as_deref_mut() {
                        need.remove(&filepath);
                    }
                    cached.insert(filepath);
                    continue;
                }
            }

            let prefs = self.prefs_for_size(job.prefs, entry.size);
            let mut md = match find_component_by_filepath(job.resource, &filepath) {
                Some(component) => cache_metadata_from(component),
                None => {
                    tracing::warn!(bag = %bagfile, filepath = %filepath, "Unable to find metadata for file");
                    let mut md = Map::new();
                    md.insert("size".into(), entry.size.into());
                    md
                }
            };
            bag_metadata(&mut md, bagfile, job.resource);
            md.insert("cachePrefs".into(), prefs.to_bits().into());
            self.add_expiry(&mut md, job.restricted);

            let name = naming::name_for_object(
                &bag.dataset,
                &filepath,
                job.for_version,
                prefs,
                job.target,
            );
            let saved = match job.cache.reserve_space(entry.size, prefs).await {
                Ok(reservation) => reservation.save_as(entry.body, &id, &name, md).await,
                Err(e) => Err(e),
            };
            match saved {
                Ok(object) => {
                    if object.checksum.is_none() {
                        tracing::debug!(id = %id, "Cached object lacks a checksum (will try to fix)");
                        unchecked.push((object, filepath.clone()));
                    }
                    if let Some(need) = need.as_deref_mut() {
                        need.remove(&filepath);
                    }
                    cached.insert(filepath);
                }
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "Problem caching file; skipping");
                }
            }
        }

        if !unchecked.is_empty() {
            self.fix_missing_checksums(job.cache, unchecked, &manifest, need, cached)
                .await;
        }
        Ok(())
    }

    /// Record checksums from the bag manifest on objects cached without
    /// one; objects the manifest does not cover are dropped again.
    async fn fix_missing_checksums(
        &self,
        cache: &Cache,
        objects: Vec<(CacheObject, String)>,
        manifest: &HashMap<String, String>,
        mut need: Option<&mut BTreeSet<String>>,
        cached: &mut BTreeSet<String>,
    ) {
        for (object, filepath) in objects {
            if let Some(hash) = manifest.get(&filepath) {
                let mut delta = Map::new();
                delta.insert("checksum".into(), hash.clone().into());
                delta.insert("checksumAlgorithm".into(), SHA256.into());
                match cache
                    .inventory()
                    .update_metadata(&object.volume, &object.name, &delta)
                    .await
                {
                    Ok(_) => tracing::debug!(id = %object.id, "Added missing checksum"),
                    Err(e) => {
                        tracing::warn!(id = %object.id, error = %e, "Failed to add checksum")
                    }
                }
                continue;
            }
            tracing::warn!(id = %object.id, "No checksum available in manifest; uncaching");
            if let Err(e) = cache.remove_copy(&object).await {
                tracing::warn!(id = %object.id, error = %e, "Trouble uncaching object without checksum");
                continue;
            }
            cached.remove(&filepath);
            if let Some(need) = need.as_deref_mut() {
                need.insert(filepath);
            }
        }
    }

    /// The SHA-256 the bag's manifest records for one of its data files.
    async fn manifest_checksum(
        &self,
        file: &File,
        bagfile: &str,
        root: &str,
        filepath: &str,
    ) -> CacheResult<Option<String>> {
        let entry = format!("{root}/{MANIFEST_ENTRY}");
        let wanted = entry.clone();
        let texts = archive::read_text_entries(file.try_clone()?, move |n| n == wanted)
            .await
            .map_err(|source| CacheError::Archive {
                bag: bagfile.to_string(),
                source,
            })?;
        Ok(texts
            .get(&entry)
            .and_then(|text| parse_manifest(text).remove(filepath)))
    }

    fn add_expiry(&self, md: &mut Map<String, Value>, restricted: bool) {
        if let Some(access) = &self.restricted
            && restricted
        {
            let ttl = i64::try_from(access.expiry.as_millis()).unwrap_or(i64::MAX);
            let expires = now_millis().saturating_add(ttl);
            md.insert("expires".into(), expires.into());
        }
    }

    async fn record_metadata(
        &self,
        mdcache: &MetadataCache,
        dsid: &str,
        version: Option<&str>,
        resource: &Value,
        lookup: &HashMap<String, String>,
    ) -> CacheResult<()> {
        let resource_version = resource
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("1");
        let version = version.unwrap_or(resource_version);
        if version == resource_version {
            mdcache.set_latest_version(dsid, version).await?;
        }
        mdcache.cache_resource_metadata(dsid, version, resource).await?;
        let components = resource
            .get("components")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for component in components {
            let Some(filepath) = component.get("filepath").and_then(Value::as_str) else {
                continue;
            };
            let mut md = cache_metadata_from(component);
            if let Some(bag) = lookup.get(&format!("data/{filepath}")) {
                md.insert("bagfile".into(), format!("{bag}.zip").into());
            }
            mdcache.cache_file_metadata(dsid, version, &md).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Restorer for DatasetRestorer {
    async fn does_not_exist(&self, id: &str) -> CacheResult<bool> {
        let id = self.parse_id(id)?;
        Ok(self.store.find_bags_for(&id.dataset).await?.is_empty())
    }

    async fn get_size_of(&self, id: &str) -> CacheResult<Option<u64>> {
        let parsed = self.parse_id(id)?;
        let Some(component) = self.component_for(&parsed).await? else {
            return Ok(None);
        };
        component
            .get("size")
            .and_then(Value::as_u64)
            .map(Some)
            .ok_or_else(|| CacheError::restoration(id, "size of file is not recorded"))
    }

    async fn get_checksum(&self, id: &str) -> CacheResult<Option<String>> {
        let parsed = self.parse_id(id)?;
        let Some(component) = self.component_for(&parsed).await? else {
            return Ok(None);
        };
        Ok(sha256_of(&component).map(str::to_string))
    }

    async fn restore_object(
        &self,
        id: &str,
        reservation: Reservation,
        name: &str,
        metadata: Map<String, Value>,
    ) -> CacheResult<CacheObject> {
        let parsed = self.parse_id(id)?;
        let filepath = parsed
            .filepath
            .as_deref()
            .ok_or_else(|| CacheError::ObjectNotFound(id.to_string()))?;
        let headbag = self
            .headbags
            .head_bag_for(&parsed.dataset, parsed.version.as_deref())
            .await?
            .ok_or_else(|| CacheError::ObjectNotFound(id.to_string()))?;
        let resource = self.headbags.resource_metadata(&headbag).await?;
        let component = find_component_by_filepath(&resource, filepath)
            .ok_or_else(|| CacheError::ObjectNotFound(id.to_string()))?;

        let member = component
            .get("_location")
            .and_then(Value::as_str)
            .ok_or_else(|| CacheError::ObjectNotFound(id.to_string()))?;
        let bagfile = match parse_bag_name(member) {
            Ok(b) if b.extension.is_empty() => format!("{member}.zip"),
            Ok(b) if b.extension == "zip" => member.to_string(),
            _ => {
                return Err(CacheError::restoration(
                    member,
                    "unsupported serialization type on bag",
                ));
            }
        };
        let root = bagfile.trim_end_matches(".zip");

        let mut md = cache_metadata_from(component);
        bag_metadata(&mut md, &bagfile, &resource);
        let restricted = self.is_restricted_dataset(&parsed.dataset).await?;
        self.add_expiry(&mut md, restricted);
        for (k, v) in metadata {
            md.entry(k).or_insert(v);
        }

        let file = archive::spool(self.open_bag(&bagfile).await?).await?;
        if !md.contains_key("checksum") {
            match self.manifest_checksum(&file, &bagfile, root, filepath).await {
                Ok(Some(hash)) => {
                    md.insert("checksum".into(), hash.into());
                    md.insert("checksumAlgorithm".into(), SHA256.into());
                }
                Ok(None) => {
                    tracing::warn!(id = %id, bag = %bagfile, "No checksum for file in bag manifest")
                }
                Err(e) => {
                    tracing::warn!(id = %id, bag = %bagfile, error = %e, "Unable to read bag manifest")
                }
            }
        }
        let entry_name = format!("{root}/data/{filepath}");
        let entry = archive::open_entry(file, &entry_name)
            .await
            .map_err(|source| CacheError::Archive {
                bag: bagfile.clone(),
                source,
            })?
            .ok_or_else(|| {
                CacheError::restoration(id, format!("data file missing from source bag {bagfile}"))
            })?;
        reservation.save_as(entry.body, id, name, md).await
    }

    fn name_for_object(&self, id: &str, roles: CacheRoles) -> String {
        match ObjectId::parse(id) {
            Ok(ObjectId {
                dataset,
                filepath: Some(filepath),
                version,
            }) => naming::name_for_object(&dataset, &filepath, version.as_deref(), roles, None),
            _ => id.to_string(),
        }
    }

    async fn preferences_for(&self, id: &str, size: u64) -> CacheResult<CacheRoles> {
        let parsed = self.parse_id(id)?;
        let restricted = self.is_restricted_dataset(&parsed.dataset).await?;
        let prefs = Self::default_prefs(parsed.version.is_some(), restricted);
        Ok(self.prefs_for_size(prefs, size))
    }
}

/// Inventory metadata derived from a file's component record. Checksums
/// are carried only when they are SHA-256.
pub fn cache_metadata_from(component: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(fp) = component.get("filepath") {
        out.insert("filepath".into(), fp.clone());
    }
    if let Some(mt) = component.get("mediaType") {
        out.insert("contentType".into(), mt.clone());
    }
    if let Some(size) = component.get("size") {
        out.insert("size".into(), size.clone());
    }
    if let Some(hash) = sha256_of(component) {
        out.insert("checksum".into(), hash.into());
        out.insert("checksumAlgorithm".into(), SHA256.into());
    }
    out
}

fn sha256_of(component: &Value) -> Option<&str> {
    let checksum = component.get("checksum")?;
    let tag = checksum.get("algorithm")?.get("tag")?.as_str()?;
    if tag != SHA256 {
        return None;
    }
    checksum.get("hash")?.as_str()
}

/// Dataset identifiers recorded on every file restored from `bagfile`.
fn bag_metadata(md: &mut Map<String, Value>, bagfile: &str, resource: &Value) {
    if let Ok(bag) = parse_bag_name(bagfile) {
        md.insert("version".into(), bag.dotted_version().into());
        md.insert("aipid".into(), bag.dataset.into());
    }
    md.insert("bagfile".into(), bagfile.into());
    if let Some(id) = resource.get("@id") {
        md.insert("pdrid".into(), id.clone());
    }
    if let Some(ediid) = resource.get("ediid") {
        md.insert("ediid".into(), ediid.clone());
    }
}

/// `data/`-relative file path to hash, from a BagIt SHA-256 manifest.
fn parse_manifest(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (hash, path) = line.trim().split_once(char::is_whitespace)?;
            let filepath = path.trim_start().strip_prefix("data/")?;
            (!hash.is_empty() && !filepath.is_empty())
                .then(|| (filepath.to_string(), hash.to_string()))
        })
        .collect()
}

async fn read_body(body: ByteStream) -> CacheResult<String> {
    let chunks: Vec<_> = body.try_collect().await?;
    Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_metadata_from_component() {
        let component = json!({
            "filepath": "sub/file.csv",
            "mediaType": "text/csv",
            "size": 1234,
            "checksum": {"hash": "abc123", "algorithm": {"tag": "sha256"}}
        });
        let md = cache_metadata_from(&component);
        assert_eq!(md["filepath"], "sub/file.csv");
        assert_eq!(md["contentType"], "text/csv");
        assert_eq!(md["size"], 1234);
        assert_eq!(md["checksum"], "abc123");
        assert_eq!(md["checksumAlgorithm"], "sha256");
    }

    #[test]
    fn test_weak_checksums_are_not_carried() {
        let component = json!({
            "filepath": "file.csv",
            "checksum": {"hash": "abc123", "algorithm": {"tag": "md5"}}
        });
        let md = cache_metadata_from(&component);
        assert!(!md.contains_key("checksum"));
        assert!(!md.contains_key("checksumAlgorithm"));
        assert!(sha256_of(&json!({"checksum": {"hash": "x"}})).is_none());
    }

    #[test]
    fn test_bag_metadata() {
        let mut md = Map::new();
        let resource = json!({"@id": "ark:/88434/mds2-2106", "ediid": "ark:/88434/pdr02d4t"});
        bag_metadata(&mut md, "mds2-2106.1_2_0.mbag0_4-2.zip", &resource);
        assert_eq!(md["aipid"], "mds2-2106");
        assert_eq!(md["version"], "1.2.0");
        assert_eq!(md["bagfile"], "mds2-2106.1_2_0.mbag0_4-2.zip");
        assert_eq!(md["pdrid"], "ark:/88434/mds2-2106");
        assert_eq!(md["ediid"], "ark:/88434/pdr02d4t");

        let mut md = Map::new();
        bag_metadata(&mut md, "mds1491.mbag0_2-0.zip", &json!({}));
        assert_eq!(md["version"], "1");
        assert!(!md.contains_key("pdrid"));
    }

    #[test]
    fn test_parse_manifest() {
        let text = "aaa  data/file.csv\nbbb data/sub/x.txt\nccc  metadata/nerdm.json\n\nbad\n";
        let manifest = parse_manifest(text);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["file.csv"], "aaa");
        assert_eq!(manifest["sub/x.txt"], "bbb");
    }
}
