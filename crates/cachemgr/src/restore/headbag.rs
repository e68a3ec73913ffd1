//! The head-bag cache.
//!
//! Head bags hold a dataset's descriptive metadata and the lookup table that
//! says which member bag holds each file. They are consulted on every
//! restoration, so they live in a cache of their own, keyed by bag name.

use crate::basic::BasicCacheManager;
use crate::cache::Cache;
use crate::error::{CacheError, CacheResult};
use crate::reservation::Reservation;
use crate::restore::{Restorer, archive};
use async_trait::async_trait;
use bagcache_core::bag_name::{
    find_latest_head_bag, multibag_version_of, parse_bag_name, select_version,
};
use bagcache_core::hash::SHA256;
use bagcache_core::multibag::{DEFAULT_MULTIBAG_VERSION, file_lookup_entry, parse_file_lookup};
use bagcache_core::roles::{CacheRoles, VolumeStatus};
use bagcache_inventory::CacheObject;
use bagcache_inventory::repos::ObjectRepo;
use bagcache_storage::{BagStorage, ByteStream};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;

/// Restores whole bag files from long-term storage; the id of a bag is its
/// file name.
pub struct BagRestorer {
    store: Arc<dyn BagStorage>,
    ark_naan: String,
}

impl BagRestorer {
    pub fn new(store: Arc<dyn BagStorage>, ark_naan: impl Into<String>) -> Self {
        Self {
            store,
            ark_naan: ark_naan.into(),
        }
    }

    /// Dataset identifiers derived from a bag name.
    fn enrich(&self, bagfile: &str, md: &mut Map<String, Value>) {
        let Ok(bag) = parse_bag_name(bagfile) else {
            return;
        };
        md.insert("aipid".into(), bag.dataset.clone().into());
        md.insert("version".into(), bag.dotted_version().into());
        let mut ediid = bag.dataset;
        if !ediid.starts_with("ark:/") && ediid.len() < 30 {
            ediid = format!("ark:/{}/{ediid}", self.ark_naan);
            md.insert("pdrid".into(), ediid.clone().into());
        }
        md.insert("ediid".into(), ediid.into());
    }
}

#[async_trait]
impl Restorer for BagRestorer {
    async fn does_not_exist(&self, id: &str) -> CacheResult<bool> {
        Ok(!self.store.exists(id).await?)
    }

    async fn get_size_of(&self, id: &str) -> CacheResult<Option<u64>> {
        Ok(self.store.get_size(id).await?)
    }

    async fn get_checksum(&self, id: &str) -> CacheResult<Option<String>> {
        Ok(self.store.get_checksum(id).await?)
    }

    async fn restore_object(
        &self,
        id: &str,
        reservation: Reservation,
        name: &str,
        mut metadata: Map<String, Value>,
    ) -> CacheResult<CacheObject> {
        let stream = self
            .store
            .open_file(id)
            .await?
            .ok_or_else(|| CacheError::ObjectNotFound(id.to_string()))?;
        if let Some(checksum) = self.store.get_checksum(id).await? {
            metadata.insert("checksum".into(), checksum.into());
            metadata.insert("checksumAlgorithm".into(), SHA256.into());
        }
        self.enrich(id, &mut metadata);
        reservation.save_as(stream, id, name, metadata).await
    }

    fn name_for_object(&self, id: &str, _roles: CacheRoles) -> String {
        id.to_string()
    }
}

/// What a restoration needs from a head bag.
#[derive(Debug, Clone)]
pub struct HeadBagContents {
    /// Resource record with its file components annotated by location.
    pub resource: Value,
    /// `data/<filepath>` to member bag name.
    pub lookup: HashMap<String, String>,
}

/// Cache of head bags with helpers for reading their contents.
pub struct HeadBagCache {
    manager: BasicCacheManager,
    store: Arc<dyn BagStorage>,
}

impl HeadBagCache {
    pub fn new(cache: Arc<Cache>, store: Arc<dyn BagStorage>, ark_naan: &str) -> Self {
        let restorer = Arc::new(BagRestorer::new(store.clone(), ark_naan));
        Self {
            manager: BasicCacheManager::new(cache, restorer),
            store,
        }
    }

    pub fn manager(&self) -> &BasicCacheManager {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<Cache> {
        self.manager.cache()
    }

    pub fn store(&self) -> &Arc<dyn BagStorage> {
        &self.store
    }

    /// Name of the head bag for a dataset version, or for the latest
    /// version when none is given.
    ///
    /// A pinned version can be answered from the bags already cached; the
    /// latest version always needs long-term storage since a newer one may
    /// have been published.
    pub async fn head_bag_for(
        &self,
        dsid: &str,
        version: Option<&str>,
    ) -> CacheResult<Option<String>> {
        if let Some(v) = version {
            let cached: Vec<String> = self
                .cache()
                .inventory()
                .select_objects_like_id(&format!("{dsid}.%"), VolumeStatus::Get)
                .await?
                .into_iter()
                .map(|o| o.id)
                .filter(|id| parse_bag_name(id).is_ok_and(|b| b.dataset == dsid))
                .collect();
            if let Some(bag) = find_latest_head_bag(&select_version(&cached, v)) {
                return Ok(Some(bag));
            }
        }
        Ok(self.store.find_head_bag_for(dsid, version).await?)
    }

    /// The cached copy of a head bag, fetching it if needed.
    pub async fn get_head_bag(&self, bagfile: &str) -> CacheResult<CacheObject> {
        self.manager.get_object(bagfile).await
    }

    /// A stream over a bag's bytes if this cache holds a copy.
    pub async fn open_cached(&self, bagfile: &str) -> CacheResult<Option<ByteStream>> {
        let Some(object) = self.cache().find_object(bagfile).await? else {
            return Ok(None);
        };
        let Some(volume) = self.cache().volume(&object.volume) else {
            return Ok(None);
        };
        Ok(Some(volume.get_stream(&object.name).await?))
    }

    /// Cache a head bag if necessary and spool it for reading.
    async fn open_head_bag(&self, bagfile: &str) -> CacheResult<File> {
        if !bagfile.ends_with(".zip") {
            return Err(CacheError::restoration(
                bagfile,
                "unsupported serialization type on head bag",
            ));
        }
        let object = self.get_head_bag(bagfile).await?;
        let volume = self.cache().volume(&object.volume).ok_or_else(|| {
            CacheError::Config(format!("volume not attached: {}", object.volume))
        })?;
        let stream = volume.get_stream(&object.name).await?;
        Ok(archive::spool(stream).await?)
    }

    /// The multibag file lookup of a head bag: `data/<filepath>` to member
    /// bag name (without extension).
    pub async fn read_file_lookup(&self, bagfile: &str) -> CacheResult<HashMap<String, String>> {
        let file = self.open_head_bag(bagfile).await?;
        let (root, mbver) = bag_layout(bagfile);
        let entry = file_lookup_entry(root, &mbver);
        let wanted = entry.clone();
        let texts = archive::read_text_entries(file, move |n| n == wanted)
            .await
            .map_err(|source| CacheError::Archive {
                bag: bagfile.to_string(),
                source,
            })?;
        let text = texts
            .get(&entry)
            .ok_or_else(|| CacheError::restoration(bagfile, format!("missing {entry}")))?;
        Ok(parse_file_lookup(&mbver, text)?)
    }

    /// The dataset's resource record from a head bag, with one entry in
    /// `components` per file, each annotated with the member bag holding
    /// it under `_location`.
    pub async fn resource_metadata(&self, bagfile: &str) -> CacheResult<Value> {
        Ok(self.read_contents(bagfile).await?.resource)
    }

    /// Resource record and file lookup of a head bag, read in one pass.
    pub async fn read_contents(&self, bagfile: &str) -> CacheResult<HeadBagContents> {
        let file = self.open_head_bag(bagfile).await?;
        let (root, mbver) = bag_layout(bagfile);
        let resource_entry = format!("{root}/metadata/nerdm.json");
        let metadata_dir = format!("{root}/metadata/");
        let lookup_entry = file_lookup_entry(root, &mbver);

        let (re, md, le) = (
            resource_entry.clone(),
            metadata_dir.clone(),
            lookup_entry.clone(),
        );
        let mut texts = archive::read_text_entries(file, move |n| {
            n == le || n == re || (n.starts_with(&md) && n.ends_with("/nerdm.json"))
        })
        .await
        .map_err(|source| CacheError::Archive {
            bag: bagfile.to_string(),
            source,
        })?;

        let resource_text = texts.remove(&resource_entry).ok_or_else(|| {
            CacheError::restoration(bagfile, "head bag has no resource metadata")
        })?;
        let mut resource: Value = serde_json::from_str(&resource_text).map_err(|e| {
            CacheError::restoration(bagfile, format!("unparseable resource metadata: {e}"))
        })?;
        let lookup_text = texts.remove(&lookup_entry).ok_or_else(|| {
            CacheError::restoration(bagfile, "head bag is missing multibag metadata")
        })?;
        let lookup = parse_file_lookup(&mbver, &lookup_text)?;

        let mut components = Vec::new();
        for (entry, text) in texts {
            let mut component: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(bag = %bagfile, entry = %entry, error = %e, "Skipping unparseable component metadata");
                    continue;
                }
            };
            let location = component
                .get("filepath")
                .and_then(Value::as_str)
                .and_then(|fp| lookup.get(&format!("data/{fp}")))
                .cloned();
            if let Some(obj) = component.as_object_mut() {
                obj.insert("_location".into(), location.map(Value::from).unwrap_or(Value::Null));
            }
            components.push(component);
        }
        components.sort_by(|a, b| {
            let fa = a.get("filepath").and_then(Value::as_str).unwrap_or("");
            let fb = b.get("filepath").and_then(Value::as_str).unwrap_or("");
            fa.cmp(fb)
        });

        let obj = resource.as_object_mut().ok_or_else(|| {
            CacheError::restoration(bagfile, "resource metadata is not an object")
        })?;
        match obj.get_mut("components").and_then(Value::as_array_mut) {
            Some(existing) => existing.extend(components),
            None => {
                obj.insert("components".into(), Value::Array(components));
            }
        }
        Ok(HeadBagContents { resource, lookup })
    }

    /// Resource record for a dataset; `None` if the dataset is unknown.
    /// Anything after a `/` in `dsid` is ignored.
    pub async fn resolve_dataset(
        &self,
        dsid: &str,
        version: Option<&str>,
    ) -> CacheResult<Option<Value>> {
        let dsid = dsid.split('/').next().unwrap_or_default();
        if dsid.is_empty() {
            return Ok(None);
        }
        let Some(head) = self.head_bag_for(dsid, version).await? else {
            return Ok(None);
        };
        Ok(Some(self.resource_metadata(&head).await?))
    }

    /// Component record for one file of a dataset.
    pub async fn resolve_distribution(
        &self,
        dsid: &str,
        filepath: &str,
        version: Option<&str>,
    ) -> CacheResult<Option<Value>> {
        let Some(resource) = self.resolve_dataset(dsid, version).await? else {
            return Ok(None);
        };
        Ok(find_component_by_filepath(&resource, filepath).cloned())
    }
}

/// Bag root directory (name without `.zip`) and dotted multibag version.
fn bag_layout(bagfile: &str) -> (&str, String) {
    let root = bagfile.strip_suffix(".zip").unwrap_or(bagfile);
    let mut mbver = multibag_version_of(bagfile);
    if mbver.is_empty() {
        mbver = DEFAULT_MULTIBAG_VERSION.to_string();
    }
    (root, mbver)
}

/// The component of a resource record with the given `filepath`.
pub fn find_component_by_filepath<'a>(resource: &'a Value, filepath: &str) -> Option<&'a Value> {
    find_component(resource, "filepath", filepath)
}

fn find_component<'a>(resource: &'a Value, key: &str, wanted: &str) -> Option<&'a Value> {
    resource
        .get("components")?
        .as_array()?
        .iter()
        .find(|c| c.get(key).and_then(Value::as_str) == Some(wanted))
}
