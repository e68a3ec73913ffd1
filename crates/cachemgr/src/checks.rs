//! Checks the integrity monitor applies to cached objects.

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use bagcache_core::config::CheckConfig;
use bagcache_core::hash::{Checksum, SHA256};
use bagcache_core::timestamp::now_millis;
use bagcache_inventory::CacheObject;
use bagcache_storage::CacheVolume;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// A test of one cached object.
///
/// A failed test returns [`CacheError::Integrity`]; any other error means
/// the object could not be tested.
#[async_trait]
pub trait CacheObjectCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, object: &CacheObject, volume: &dyn CacheVolume) -> CacheResult<()>;
}

fn label(object: &CacheObject) -> String {
    format!("{}:{}", object.volume, object.name)
}

/// Compares the stored size with the recorded one, then recomputes the
/// SHA-256 digest.
pub struct ChecksumCheck;

#[async_trait]
impl CacheObjectCheck for ChecksumCheck {
    fn name(&self) -> &'static str {
        "checksum"
    }

    async fn check(&self, object: &CacheObject, volume: &dyn CacheVolume) -> CacheResult<()> {
        SizeCheck.compare_size(object, volume).await?;

        let algorithm = object.checksum_algorithm.as_deref().ok_or_else(|| {
            CacheError::unverifiable(label(object), "missing checksumAlgorithm metadatum")
        })?;
        let expected = object.checksum.as_deref().ok_or_else(|| {
            CacheError::unverifiable(label(object), "missing checksum metadatum")
        })?;
        if algorithm != SHA256 {
            return Err(CacheError::unverifiable(
                label(object),
                format!("Unsupported checksum algorithm: {algorithm}"),
            ));
        }

        let mut stream = volume.get_stream(&object.name).await?;
        let mut hasher = Checksum::hasher();
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
        }
        let computed = hasher.finalize();
        if !computed.matches_hex(expected) {
            return Err(CacheError::integrity(
                label(object),
                format!("checksum mismatch: recorded {expected}, computed {}", computed.to_hex()),
            ));
        }
        Ok(())
    }
}

/// Compares the stored size with the recorded one.
pub struct SizeCheck;

impl SizeCheck {
    async fn compare_size(&self, object: &CacheObject, volume: &dyn CacheVolume) -> CacheResult<()> {
        let stored = volume.describe(&object.name).await?;
        match object.size {
            Some(recorded) if recorded != stored.size => Err(CacheError::integrity(
                label(object),
                format!("size mismatch: recorded {recorded}, stored {}", stored.size),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CacheObjectCheck for SizeCheck {
    fn name(&self) -> &'static str {
        "size"
    }

    async fn check(&self, object: &CacheObject, volume: &dyn CacheVolume) -> CacheResult<()> {
        if object.size.is_none() {
            return Err(CacheError::unverifiable(label(object), "missing size metadatum"));
        }
        self.compare_size(object, volume).await
    }
}

/// Fails objects whose lifetime is over: past their `expires` metadatum
/// (epoch milliseconds), or older than the TTL when none is recorded.
pub struct ExpiryCheck {
    ttl: Duration,
}

impl ExpiryCheck {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    fn expires_at(&self, object: &CacheObject) -> i64 {
        object.metadatum_i64("expires").unwrap_or_else(|| {
            object
                .since
                .saturating_add(i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX))
        })
    }
}

impl Default for ExpiryCheck {
    fn default() -> Self {
        Self::new(Duration::from_secs(14 * 86400))
    }
}

#[async_trait]
impl CacheObjectCheck for ExpiryCheck {
    fn name(&self) -> &'static str {
        "expiry"
    }

    async fn check(&self, object: &CacheObject, _volume: &dyn CacheVolume) -> CacheResult<()> {
        let expires = self.expires_at(object);
        if now_millis() > expires {
            return Err(CacheError::integrity(
                label(object),
                format!("expired at {}", bagcache_core::timestamp::format_millis(expires)),
            ));
        }
        Ok(())
    }
}

/// Build the configured checks.
pub fn checks_from_config(config: &[CheckConfig]) -> Vec<Arc<dyn CacheObjectCheck>> {
    config
        .iter()
        .map(|c| -> Arc<dyn CacheObjectCheck> {
            match c {
                CheckConfig::Checksum => Arc::new(ChecksumCheck),
                CheckConfig::Size => Arc::new(SizeCheck),
                CheckConfig::Expiry { ttl_secs } => {
                    Arc::new(ExpiryCheck::new(Duration::from_secs(*ttl_secs)))
                }
            }
        })
        .collect()
}
