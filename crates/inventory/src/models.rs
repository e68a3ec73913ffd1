//! Inventory records and the rows they are loaded from.

use crate::error::{InventoryError, InventoryResult};
use bagcache_core::roles::{CacheRoles, VolumeStatus};
use bagcache_core::timestamp::format_millis;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

// =============================================================================
// Cache objects
// =============================================================================

/// One copy of a data object held (or once held) in a cache volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheObject {
    /// Business identifier, e.g. `dataset/filepath#version`.
    pub id: String,
    /// Name of the volume holding the copy.
    pub volume: String,
    /// Storage name within the volume.
    pub name: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub checksum_algorithm: Option<String>,
    pub priority: i32,
    /// Time of insertion or last access, epoch milliseconds.
    pub since: i64,
    /// Time of last successful integrity check, epoch milliseconds; 0 if never.
    pub checked: i64,
    /// False once the copy has been evicted.
    pub cached: bool,
    pub metadata: Map<String, Value>,
}

impl CacheObject {
    pub fn metadatum_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn metadatum_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(Value::as_i64)
    }

    /// Size as a signed quantity for space arithmetic; unknown sizes count as 0.
    pub fn size_or_zero(&self) -> i64 {
        self.size.map(|s| s as i64).unwrap_or(0)
    }
}

/// Object row joined with its volume and algorithm names.
#[derive(Debug, Clone, FromRow)]
pub struct ObjectRow {
    pub id: String,
    pub name: String,
    pub volume: String,
    pub size: Option<i64>,
    pub checksum: Option<String>,
    pub algorithm: Option<String>,
    pub priority: i64,
    pub since: i64,
    pub checked: i64,
    pub cached: bool,
    pub metadata: Option<String>,
}

impl ObjectRow {
    /// Convert to a [`CacheObject`], folding the column values into its
    /// metadata the way callers expect to see them.
    pub fn into_object(self) -> InventoryResult<CacheObject> {
        let mut md: Map<String, Value> = match self.metadata.as_deref() {
            Some(text) if !text.is_empty() => {
                serde_json::from_str(text).map_err(|source| InventoryError::CorruptMetadata {
                    volume: self.volume.clone(),
                    object: self.name.clone(),
                    source,
                })?
            }
            _ => Map::new(),
        };

        if let Some(size) = self.size {
            md.insert("size".into(), size.into());
        }
        md.insert("priority".into(), self.priority.into());
        md.insert("since".into(), self.since.into());
        md.insert("sinceDate".into(), format_millis(self.since).into());
        md.insert("checked".into(), self.checked.into());
        if self.checked > 0 {
            md.insert("checkedDate".into(), format_millis(self.checked).into());
        }

        Ok(CacheObject {
            id: self.id,
            volume: self.volume,
            name: self.name,
            size: self.size.filter(|s| *s >= 0).map(|s| s as u64),
            checksum: self.checksum,
            checksum_algorithm: self.algorithm,
            priority: self.priority as i32,
            since: self.since,
            checked: self.checked,
            cached: self.cached,
            metadata: md,
        })
    }
}

// =============================================================================
// Volumes
// =============================================================================

/// Static description of a volume registered with the inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: VolumeStatus,
    #[serde(default)]
    pub roles: CacheRoles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_base: Option<String>,
    /// Additional free-form properties.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// A registered volume with its capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeRecord {
    pub name: String,
    pub capacity: u64,
    #[serde(flatten)]
    pub info: VolumeInfo,
}

#[derive(Debug, Clone, FromRow)]
pub struct VolumeRow {
    pub name: String,
    pub capacity: i64,
    pub priority: i64,
    pub status: i64,
    pub metadata: Option<String>,
}

impl VolumeRow {
    pub fn into_record(self) -> InventoryResult<VolumeRecord> {
        let mut info: VolumeInfo = match self.metadata.as_deref() {
            Some(text) if !text.is_empty() => serde_json::from_str(text)?,
            _ => VolumeInfo::default(),
        };
        // columns are authoritative
        info.priority = self.priority as i32;
        info.status = VolumeStatus::from_i64(self.status)?;
        Ok(VolumeRecord {
            name: self.name,
            capacity: self.capacity.max(0) as u64,
            info,
        })
    }
}

// =============================================================================
// Aggregation views
// =============================================================================

/// Totals over the cached objects in one volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeTotals {
    pub name: String,
    pub filecount: u64,
    pub totalsize: u64,
    /// Most recent access among the volume's objects.
    pub since: i64,
    pub since_date: String,
    /// Oldest integrity check among the volume's objects.
    pub checked: i64,
    pub checked_date: String,
}

impl VolumeTotals {
    pub(crate) fn from_aggregate(name: &str, agg: AggregateRow) -> Self {
        let since = agg.newest.unwrap_or(0);
        let checked = agg.oldest.unwrap_or(0);
        Self {
            name: name.to_string(),
            filecount: agg.count.max(0) as u64,
            totalsize: agg.totsz.unwrap_or(0).max(0) as u64,
            since,
            since_date: format_millis(since),
            checked,
            checked_date: format_millis(checked),
        }
    }
}

/// Totals over the cached files of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub aipid: String,
    pub ediid: Option<String>,
    pub filecount: u64,
    pub totalsize: u64,
    pub since: i64,
    pub since_date: String,
    pub checked: i64,
    pub checked_date: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct AggregateRow {
    pub count: i64,
    pub totsz: Option<i64>,
    pub newest: Option<i64>,
    pub oldest: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DatasetAggregateRow {
    pub ediid: Option<String>,
    pub sample_id: String,
    pub count: i64,
    pub totsz: Option<i64>,
    pub newest: Option<i64>,
    pub oldest: Option<i64>,
}

impl DatasetAggregateRow {
    pub fn into_summary(self) -> DatasetSummary {
        let aipid = match self.ediid.as_deref() {
            Some(ediid) => strip_ark_prefix(ediid).to_string(),
            None => self
                .sample_id
                .split(['/', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        let since = self.newest.unwrap_or(0);
        let checked = self.oldest.unwrap_or(0);
        DatasetSummary {
            aipid,
            ediid: self.ediid,
            filecount: self.count.max(0) as u64,
            totalsize: self.totsz.unwrap_or(0).max(0) as u64,
            since,
            since_date: format_millis(since),
            checked,
            checked_date: format_millis(checked),
        }
    }
}

/// Strip an `ark:/NNNNN/` prefix from an identifier.
pub fn strip_ark_prefix(id: &str) -> &str {
    let Some(rest) = id.strip_prefix("ark:/") else {
        return id;
    };
    match rest.split_once('/') {
        Some((naan, tail)) if !naan.is_empty() && naan.chars().all(|c| c.is_ascii_digit()) => tail,
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ObjectRow {
        ObjectRow {
            id: "mds2-2106/file.csv".into(),
            name: "mds2-2106/file.csv".into(),
            volume: "vol1".into(),
            size: Some(42),
            checksum: Some("abc".into()),
            algorithm: Some("sha256".into()),
            priority: 10,
            since: 86_400_000,
            checked: 0,
            cached: true,
            metadata: Some(r#"{"contentType":"text/csv","ediid":"ark:/88434/mds2-2106"}"#.into()),
        }
    }

    #[test]
    fn test_row_folds_columns_into_metadata() {
        let obj = row().into_object().unwrap();
        assert_eq!(obj.size, Some(42));
        assert_eq!(obj.metadatum_str("contentType"), Some("text/csv"));
        assert_eq!(obj.metadatum_i64("size"), Some(42));
        assert_eq!(obj.metadatum_str("sinceDate"), Some("1970-01-02T00:00:00Z"));
        assert!(!obj.metadata.contains_key("checkedDate"));
    }

    #[test]
    fn test_corrupt_metadata_is_reported() {
        let mut r = row();
        r.metadata = Some("{not json".into());
        let err = r.into_object().unwrap_err();
        assert!(matches!(err, InventoryError::CorruptMetadata { .. }));
    }

    #[test]
    fn test_strip_ark_prefix() {
        assert_eq!(strip_ark_prefix("ark:/88434/mds2-2106"), "mds2-2106");
        assert_eq!(strip_ark_prefix("mds2-2106"), "mds2-2106");
        assert_eq!(strip_ark_prefix("ark:/x/y"), "ark:/x/y");
    }

    #[test]
    fn test_volume_info_roundtrips_extra_fields() {
        let text = r#"{"roles":["small","fast"],"location":"file:///cache"}"#;
        let info: VolumeInfo = serde_json::from_str(text).unwrap();
        assert!(info.roles.small && info.roles.fast);
        assert_eq!(info.extra["location"], "file:///cache");
        assert_eq!(info.status, VolumeStatus::Update);
    }
}
