//! Inventory database trait and the SQLite implementation.

use crate::error::InventoryResult;
use crate::repos::{ObjectRepo, SummaryRepo, VolumeRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

/// Combined inventory database trait.
#[async_trait]
pub trait InventoryDb: ObjectRepo + VolumeRepo + SummaryRepo + Send + Sync {
    /// Create tables and seed data if missing.
    async fn migrate(&self) -> InventoryResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> InventoryResult<()>;

    /// Database-wide lock held while a selection is turned into deletions.
    ///
    /// Plain reads never take it.
    fn planning_lock(&self) -> &Mutex<()>;
}

/// Escape the `LIKE` wildcards in a literal prefix, for patterns matched
/// with `ESCAPE '\'`.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// SQLite-based inventory.
pub struct SqliteInventory {
    pool: Pool<Sqlite>,
    planning: Mutex<()>,
}

impl SqliteInventory {
    /// Open (creating if needed) an inventory database file.
    pub async fn new(path: impl AsRef<Path>) -> InventoryResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection serializes every mutating call.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            planning: Mutex::new(()),
        };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "opened inventory database");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl InventoryDb for SqliteInventory {
    async fn migrate(&self) -> InventoryResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> InventoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn planning_lock(&self) -> &Mutex<()> {
        &self.planning
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::InventoryError;
    use crate::models::{
        AggregateRow, CacheObject, DatasetAggregateRow, DatasetSummary, ObjectRow, VolumeInfo,
        VolumeRecord, VolumeRow, VolumeTotals,
    };
    use crate::strategy::{ScoredObject, SizeLimitedSelection};
    use bagcache_core::hash::SHA256;
    use bagcache_core::roles::VolumeStatus;
    use bagcache_core::timestamp::{format_millis, now_millis};
    use futures::TryStreamExt;
    use serde_json::{Map, Value};

    const FIND_SQL_BASE: &str = "SELECT d.objid AS id, d.name AS name, v.name AS volume, \
         d.size AS size, d.checksum AS checksum, a.name AS algorithm, d.priority AS priority, \
         d.since AS since, d.checked AS checked, d.cached AS cached, d.metadata AS metadata \
         FROM objects d JOIN volumes v ON d.volume = v.id \
         LEFT JOIN algorithms a ON d.algorithm = a.id ";

    const DATASET_AGGREGATE_BASE: &str = "SELECT d.ediid AS ediid, MIN(d.objid) AS sample_id, \
         COUNT(*) AS count, SUM(d.size) AS totsz, MAX(d.since) AS newest, MIN(d.checked) AS oldest \
         FROM objects d JOIN volumes v ON d.volume = v.id WHERE d.cached = 1 ";

    /// Groups objects by EDI id, or by the dataset part of the object id
    /// when there is none.
    const DATASET_GROUP: &str = "GROUP BY COALESCE(d.ediid, CASE WHEN instr(d.objid, '/') > 0 \
         THEN substr(d.objid, 1, instr(d.objid, '/') - 1) ELSE d.objid END)";

    /// Values stored in dedicated object columns.
    #[derive(Debug, Clone)]
    struct ObjectColumns {
        size: Option<i64>,
        checksum: Option<String>,
        algorithm: String,
        priority: i64,
        since: i64,
        checked: i64,
        pdrid: Option<String>,
        ediid: Option<String>,
    }

    impl ObjectColumns {
        fn defaults(since: i64) -> Self {
            Self {
                size: None,
                checksum: None,
                algorithm: SHA256.to_string(),
                priority: 10,
                since,
                checked: 0,
                pdrid: None,
                ediid: None,
            }
        }

        fn of(obj: &CacheObject) -> Self {
            Self {
                size: obj.size.map(|s| s as i64),
                checksum: obj.checksum.clone(),
                algorithm: obj
                    .checksum_algorithm
                    .clone()
                    .unwrap_or_else(|| SHA256.to_string()),
                priority: obj.priority as i64,
                since: obj.since,
                checked: obj.checked,
                pdrid: obj.metadatum_str("pdrid").map(str::to_string),
                ediid: obj.metadatum_str("ediid").map(str::to_string),
            }
        }

        /// Override defaults with any column values present in `md`.
        fn merge(mut self, md: &Map<String, Value>) -> InventoryResult<Self> {
            if let Some(v) = get_i64(md, "size")? {
                self.size = Some(v);
            }
            if let Some(v) = get_string(md, "checksum")? {
                self.checksum = Some(v);
            }
            if let Some(v) = get_string(md, "checksumAlgorithm")? {
                self.algorithm = v;
            }
            if let Some(v) = get_i64(md, "priority")? {
                self.priority = v;
            }
            if let Some(v) = get_i64(md, "since")? {
                self.since = v;
            }
            if let Some(v) = get_i64(md, "checked")? {
                self.checked = v;
            }
            if let Some(v) = get_string(md, "pdrid")? {
                self.pdrid = Some(v);
            }
            if let Some(v) = get_string(md, "ediid")? {
                self.ediid = Some(v);
            }
            Ok(self)
        }
    }

    fn get_i64(md: &Map<String, Value>, name: &str) -> InventoryResult<Option<i64>> {
        match md.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| InventoryError::metadata(name, format!("expected integer, got {v}"))),
        }
    }

    fn get_string(md: &Map<String, Value>, name: &str) -> InventoryResult<Option<String>> {
        match md.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v) => Err(InventoryError::metadata(
                name,
                format!("expected string, got {v}"),
            )),
        }
    }

    impl SqliteInventory {
        async fn volume_id(&self, name: &str) -> InventoryResult<i64> {
            sqlx::query_scalar::<_, i64>("SELECT id FROM volumes WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| InventoryError::VolumeNotFound(name.to_string()))
        }

        async fn algorithm_id(&self, name: &str) -> InventoryResult<i64> {
            sqlx::query_scalar::<_, i64>("SELECT id FROM algorithms WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| InventoryError::UnknownAlgorithm(name.to_string()))
        }

        async fn query_objects(
            &self,
            sql: &str,
            binds: &[&str],
            status: Option<VolumeStatus>,
        ) -> InventoryResult<Vec<CacheObject>> {
            let mut query = sqlx::query_as::<_, ObjectRow>(sql);
            for b in binds {
                query = query.bind(*b);
            }
            if let Some(status) = status {
                query = query.bind(status.as_i64());
            }
            let rows = query.fetch_all(&self.pool).await?;
            rows.into_iter().map(ObjectRow::into_object).collect()
        }
    }

    #[async_trait]
    impl ObjectRepo for SqliteInventory {
        async fn add_object(
            &self,
            id: &str,
            volume: &str,
            name: &str,
            metadata: &Map<String, Value>,
        ) -> InventoryResult<CacheObject> {
            let vid = self.volume_id(volume).await?;
            let since = now_millis();

            let mut cols = ObjectColumns::defaults(since).merge(metadata)?;
            cols.since = since;
            cols.checked = 0;
            let algid = self.algorithm_id(&cols.algorithm).await?;

            let mut md = metadata.clone();
            md.insert("since".into(), since.into());
            md.insert("sinceDate".into(), format_millis(since).into());
            let jmd = serde_json::to_string(&md)?;

            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM objects WHERE volume = ? AND name = ?")
                .bind(vid)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO objects (objid, name, size, checksum, algorithm, priority, volume, \
                 since, checked, cached, pdrid, ediid, metadata) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?, ?, ?)",
            )
            .bind(id)
            .bind(name)
            .bind(cols.size)
            .bind(&cols.checksum)
            .bind(algid)
            .bind(cols.priority)
            .bind(vid)
            .bind(since)
            .bind(&cols.pdrid)
            .bind(&cols.ediid)
            .bind(&jmd)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            ObjectRow {
                id: id.to_string(),
                name: name.to_string(),
                volume: volume.to_string(),
                size: cols.size,
                checksum: cols.checksum,
                algorithm: Some(cols.algorithm),
                priority: cols.priority,
                since,
                checked: 0,
                cached: true,
                metadata: Some(jmd),
            }
            .into_object()
        }

        async fn find_object(
            &self,
            id: &str,
            min_status: VolumeStatus,
        ) -> InventoryResult<Vec<CacheObject>> {
            let mut sql = format!("{FIND_SQL_BASE}WHERE d.objid = ? AND v.status >= ?");
            if min_status >= VolumeStatus::Get {
                sql.push_str(" AND d.cached = 1");
            }
            self.query_objects(&sql, &[id], Some(min_status)).await
        }

        async fn find_object_in(
            &self,
            volume: &str,
            name: &str,
        ) -> InventoryResult<Option<CacheObject>> {
            let sql = format!("{FIND_SQL_BASE}WHERE v.name = ? AND d.name = ?");
            let row = sqlx::query_as::<_, ObjectRow>(&sql)
                .bind(volume)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            row.map(ObjectRow::into_object).transpose()
        }

        async fn remove_object(&self, volume: &str, name: &str) -> InventoryResult<()> {
            sqlx::query(
                "UPDATE objects SET cached = 0 \
                 WHERE volume = (SELECT id FROM volumes WHERE name = ?) AND name = ?",
            )
            .bind(volume)
            .bind(name)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn purge_object(&self, volume: &str, name: &str) -> InventoryResult<()> {
            sqlx::query(
                "DELETE FROM objects \
                 WHERE volume = (SELECT id FROM volumes WHERE name = ?) AND name = ?",
            )
            .bind(volume)
            .bind(name)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn update_metadata(
            &self,
            volume: &str,
            name: &str,
            delta: &Map<String, Value>,
        ) -> InventoryResult<bool> {
            let Some(obj) = self.find_object_in(volume, name).await? else {
                return Ok(false);
            };
            let vid = self.volume_id(volume).await?;

            let cols = ObjectColumns::of(&obj).merge(delta)?;
            let algid = self.algorithm_id(&cols.algorithm).await?;

            let mut md = obj.metadata;
            for (k, v) in delta {
                md.insert(k.clone(), v.clone());
            }
            if delta.contains_key("since") && !delta.contains_key("sinceDate") {
                md.insert("sinceDate".into(), format_millis(cols.since).into());
            }
            if delta.contains_key("checked") && cols.checked > 0 {
                md.insert("checkedDate".into(), format_millis(cols.checked).into());
            }

            let result = sqlx::query(
                "UPDATE objects SET size = ?, checksum = ?, algorithm = ?, priority = ?, \
                 since = ?, checked = ?, pdrid = ?, ediid = ?, metadata = ? \
                 WHERE volume = ? AND name = ?",
            )
            .bind(cols.size)
            .bind(&cols.checksum)
            .bind(algid)
            .bind(cols.priority)
            .bind(cols.since)
            .bind(cols.checked)
            .bind(&cols.pdrid)
            .bind(&cols.ediid)
            .bind(serde_json::to_string(&md)?)
            .bind(vid)
            .bind(name)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() > 0)
        }

        async fn update_access_time(&self, volume: &str, name: &str) -> InventoryResult<bool> {
            let mut md = Map::new();
            md.insert("since".into(), now_millis().into());
            self.update_metadata(volume, name, &md).await
        }

        async fn update_checked_time(
            &self,
            volume: &str,
            name: &str,
            time_ms: i64,
        ) -> InventoryResult<bool> {
            let mut md = Map::new();
            md.insert("checked".into(), time_ms.into());
            self.update_metadata(volume, name, &md).await
        }

        async fn select_objects_from(
            &self,
            volume: &str,
            selection: &mut SizeLimitedSelection,
        ) -> InventoryResult<Vec<ScoredObject>> {
            selection.reset();
            let sql = format!(
                "{FIND_SQL_BASE}WHERE v.status >= ? AND d.cached = 1 AND d.priority > 0 \
                 AND v.name = ? {}",
                selection.purpose().order_clause()
            );

            let mut out = Vec::new();
            {
                let mut rows = sqlx::query_as::<_, ObjectRow>(&sql)
                    .bind(VolumeStatus::Update.as_i64())
                    .bind(volume)
                    .fetch(&self.pool);
                while !selection.limit_reached() {
                    let Some(row) = rows.try_next().await? else {
                        break;
                    };
                    out.push(selection.score(row.into_object()?));
                }
            }

            SizeLimitedSelection::sort(&mut out);
            Ok(out)
        }

        async fn select_objects_to_check(
            &self,
            cutoff_ms: i64,
            limit: u32,
        ) -> InventoryResult<Vec<CacheObject>> {
            let sql = format!(
                "{FIND_SQL_BASE}WHERE d.checked < ? AND d.cached = 1 \
                 ORDER BY d.checked ASC, d.since ASC LIMIT ?"
            );
            let rows = sqlx::query_as::<_, ObjectRow>(&sql)
                .bind(cutoff_ms)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter().map(ObjectRow::into_object).collect()
        }

        async fn select_objects_like_id(
            &self,
            pattern: &str,
            min_status: VolumeStatus,
        ) -> InventoryResult<Vec<CacheObject>> {
            let mut sql = format!("{FIND_SQL_BASE}WHERE d.objid LIKE ? ESCAPE '\\' AND v.status >= ?");
            if min_status >= VolumeStatus::Get {
                sql.push_str(" AND d.cached = 1");
            }
            sql.push_str(" ORDER BY d.since ASC");
            self.query_objects(&sql, &[pattern], Some(min_status)).await
        }
    }

    #[async_trait]
    impl VolumeRepo for SqliteInventory {
        async fn register_volume(
            &self,
            name: &str,
            capacity: u64,
            info: &VolumeInfo,
        ) -> InventoryResult<()> {
            let jmd = serde_json::to_string(info)?;
            sqlx::query(
                "INSERT INTO volumes (name, capacity, priority, status, metadata) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(name) DO UPDATE SET capacity = excluded.capacity, \
                 priority = excluded.priority, status = excluded.status, \
                 metadata = excluded.metadata",
            )
            .bind(name)
            .bind(capacity as i64)
            .bind(info.priority as i64)
            .bind(info.status.as_i64())
            .bind(&jmd)
            .execute(&self.pool)
            .await?;

            tracing::debug!(volume = %name, capacity, status = %info.status, "registered volume");
            Ok(())
        }

        async fn volumes(&self) -> InventoryResult<Vec<String>> {
            let names = sqlx::query_scalar::<_, String>("SELECT name FROM volumes ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(names)
        }

        async fn get_volume_info(&self, name: &str) -> InventoryResult<Option<VolumeRecord>> {
            let row = sqlx::query_as::<_, VolumeRow>(
                "SELECT name, capacity, priority, status, metadata FROM volumes WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            row.map(VolumeRow::into_record).transpose()
        }

        async fn set_volume_status(&self, name: &str, status: VolumeStatus) -> InventoryResult<()> {
            let result = sqlx::query("UPDATE volumes SET status = ? WHERE name = ?")
                .bind(status.as_i64())
                .bind(name)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(InventoryError::VolumeNotFound(name.to_string()));
            }
            Ok(())
        }

        async fn get_volume_status(&self, name: &str) -> InventoryResult<VolumeStatus> {
            let status = sqlx::query_scalar::<_, i64>("SELECT status FROM volumes WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| InventoryError::VolumeNotFound(name.to_string()))?;
            Ok(VolumeStatus::from_i64(status)?)
        }

        async fn get_available_space(&self, name: &str) -> InventoryResult<i64> {
            let capacity =
                sqlx::query_scalar::<_, i64>("SELECT capacity FROM volumes WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| InventoryError::VolumeNotFound(name.to_string()))?;
            let used = self.get_used_space(name).await?;
            Ok(capacity - used as i64)
        }

        async fn get_used_space(&self, name: &str) -> InventoryResult<u64> {
            let vid = self.volume_id(name).await?;
            let used = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(SUM(size), 0) FROM objects \
                 WHERE volume = ? AND cached = 1 AND size > 0",
            )
            .bind(vid)
            .fetch_one(&self.pool)
            .await?;
            Ok(used.max(0) as u64)
        }

        async fn register_algorithm(&self, name: &str) -> InventoryResult<()> {
            sqlx::query("INSERT OR IGNORE INTO algorithms (name) VALUES (?)")
                .bind(name)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn checksum_algorithms(&self) -> InventoryResult<Vec<String>> {
            let names = sqlx::query_scalar::<_, String>("SELECT name FROM algorithms ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(names)
        }
    }

    #[async_trait]
    impl SummaryRepo for SqliteInventory {
        async fn get_volume_totals(&self, name: &str) -> InventoryResult<VolumeTotals> {
            let vid = self.volume_id(name).await?;
            let agg = sqlx::query_as::<_, AggregateRow>(
                "SELECT COUNT(*) AS count, SUM(size) AS totsz, MAX(since) AS newest, \
                 MIN(checked) AS oldest FROM objects WHERE cached = 1 AND volume = ?",
            )
            .bind(vid)
            .fetch_one(&self.pool)
            .await?;
            Ok(VolumeTotals::from_aggregate(name, agg))
        }

        async fn summarize_dataset(&self, dsid: &str) -> InventoryResult<Option<DatasetSummary>> {
            let sql = format!(
                "{DATASET_AGGREGATE_BASE}AND v.name != 'old' AND d.objid LIKE ? ESCAPE '\\' \
                 {DATASET_GROUP}"
            );
            let row = sqlx::query_as::<_, DatasetAggregateRow>(&sql)
                .bind(format!("{}/%", escape_like(dsid)))
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.map(DatasetAggregateRow::into_summary))
        }

        async fn summarize_contents(
            &self,
            volume: Option<&str>,
        ) -> InventoryResult<Vec<DatasetSummary>> {
            let rows = match volume {
                Some(volume) => {
                    let sql = format!(
                        "{DATASET_AGGREGATE_BASE}AND v.name = ? {DATASET_GROUP} ORDER BY oldest"
                    );
                    sqlx::query_as::<_, DatasetAggregateRow>(&sql)
                        .bind(volume)
                        .fetch_all(&self.pool)
                        .await?
                }
                None => {
                    let sql = format!(
                        "{DATASET_AGGREGATE_BASE}AND v.name != 'old' {DATASET_GROUP} ORDER BY oldest"
                    );
                    sqlx::query_as::<_, DatasetAggregateRow>(&sql)
                        .fetch_all(&self.pool)
                        .await?
                }
            };
            Ok(rows
                .into_iter()
                .map(DatasetAggregateRow::into_summary)
                .collect())
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS algorithms (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
INSERT OR IGNORE INTO algorithms (name) VALUES ('sha256');

CREATE TABLE IF NOT EXISTS volumes (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    priority INTEGER NOT NULL DEFAULT 0,
    capacity INTEGER NOT NULL,
    -- 0=disabled, 1=info only, 2=get, 3=update
    status INTEGER NOT NULL DEFAULT 3,
    metadata TEXT
);

CREATE TABLE IF NOT EXISTS objects (
    objid TEXT NOT NULL,
    name TEXT NOT NULL,
    size INTEGER,
    checksum TEXT,
    algorithm INTEGER REFERENCES algorithms(id),
    priority INTEGER NOT NULL,
    volume INTEGER NOT NULL REFERENCES volumes(id),
    since INTEGER NOT NULL,
    checked INTEGER NOT NULL DEFAULT 0,
    cached INTEGER NOT NULL DEFAULT 0,
    pdrid TEXT,
    ediid TEXT,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_objects_objid ON objects(objid);
CREATE UNIQUE INDEX IF NOT EXISTS idx_objects_volume_name ON objects(volume, name);
CREATE INDEX IF NOT EXISTS idx_objects_checked ON objects(checked) WHERE cached = 1;
"#;
