//! Deletion-planning selection strategies.
//!
//! A strategy scores the objects of a volume so that the most deletable ones
//! come first. The inventory streams candidate rows in the order given by the
//! strategy's [`SelectionPurpose`], scores them through a
//! [`SizeLimitedSelection`] until enough bytes have been collected, and then
//! sorts the candidates by descending score.

use crate::models::CacheObject;
use bagcache_core::config::DeletionStrategyConfig;
use bagcache_core::timestamp::now_millis;
use std::fmt;
use std::sync::Arc;

/// Row ordering used when streaming deletion candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPurpose {
    /// Highest priority first, then least recently used.
    DeletionByPriority,
    /// Highest priority first, then biggest.
    DeletionBySize,
    /// Least recently used first.
    DeletionByDate,
}

impl SelectionPurpose {
    pub(crate) fn order_clause(self) -> &'static str {
        match self {
            Self::DeletionByPriority => "ORDER BY d.priority DESC, d.since ASC",
            Self::DeletionBySize => "ORDER BY d.priority DESC, d.size DESC, d.since ASC",
            Self::DeletionByDate => "ORDER BY d.since ASC, d.priority DESC",
        }
    }
}

/// Scores an object for deletion; 0 means "do not delete".
pub trait DeletionScorer: Send + Sync + fmt::Debug {
    fn purpose(&self) -> SelectionPurpose;

    fn score(&self, obj: &CacheObject, now_ms: i64) -> f64;
}

/// Prefers objects that have not been accessed for a long time.
#[derive(Debug, Clone)]
pub struct OldestFirst {
    pub normal_priority: i32,
    pub min_age_ms: i64,
    pub unit_age_ms: i64,
}

impl Default for OldestFirst {
    fn default() -> Self {
        Self {
            normal_priority: 10,
            min_age_ms: 3_600_000,
            unit_age_ms: 86_400_000,
        }
    }
}

impl DeletionScorer for OldestFirst {
    fn purpose(&self) -> SelectionPurpose {
        SelectionPurpose::DeletionByPriority
    }

    fn score(&self, obj: &CacheObject, now_ms: i64) -> f64 {
        let age = now_ms - obj.since;
        if age < self.min_age_ms {
            return 0.0;
        }
        let prinorm = self.normal_priority.max(1) as f64;
        obj.priority as f64 * age as f64 / (self.unit_age_ms as f64 * prinorm)
    }
}

/// Prefers the biggest objects.
#[derive(Debug, Clone)]
pub struct BiggestFirst {
    pub norm: f64,
}

impl Default for BiggestFirst {
    fn default() -> Self {
        Self { norm: 5.0e8 }
    }
}

impl DeletionScorer for BiggestFirst {
    fn purpose(&self) -> SelectionPurpose {
        SelectionPurpose::DeletionBySize
    }

    fn score(&self, obj: &CacheObject, _now_ms: i64) -> f64 {
        let sz = obj.size_or_zero() as f64 / self.norm;
        if sz >= 0.0 { sz } else { 0.0 }
    }
}

/// Prefers objects that are both big and old.
///
/// The age factor stays near zero until roughly the age turnover and grows
/// linearly beyond twice that; the size factor is linear below the size
/// turnover and saturates at 1 above it.
#[derive(Debug, Clone)]
pub struct BigOld {
    pub age_turnover_ms: f64,
    pub size_turnover: f64,
}

impl Default for BigOld {
    fn default() -> Self {
        Self {
            age_turnover_ms: 2.5 * 3_600_000.0,
            size_turnover: 5.0e8,
        }
    }
}

impl DeletionScorer for BigOld {
    fn purpose(&self) -> SelectionPurpose {
        SelectionPurpose::DeletionBySize
    }

    fn score(&self, obj: &CacheObject, now_ms: i64) -> f64 {
        let age = (now_ms - obj.since) as f64;
        let ageto = self.age_turnover_ms;
        let fage = 0.1 * age * (1.0 - 1.0 / (1.0 + (age / (2.0 * ageto)).powi(4)).sqrt()) / ageto;

        let sz = obj.size_or_zero() as f64;
        let fsz = 2.0 / (1.0 + 8f64.powf(-sz / self.size_turnover)) - 1.0;

        fage * fsz * obj.priority as f64
    }
}

/// Build the scorer named by a configuration entry.
pub fn scorer_from_config(config: &DeletionStrategyConfig) -> Arc<dyn DeletionScorer> {
    match config {
        DeletionStrategyConfig::Oldest {
            normal_priority,
            min_age_secs,
            unit_age_secs,
        } => Arc::new(OldestFirst {
            normal_priority: if *normal_priority > 0 { *normal_priority } else { 10 },
            min_age_ms: (*min_age_secs as i64) * 1000,
            unit_age_ms: (*unit_age_secs as i64).max(1) * 1000,
        }),
        DeletionStrategyConfig::Size { norm } => Arc::new(BiggestFirst {
            norm: if *norm > 0.0 { *norm } else { 5.0e8 },
        }),
        DeletionStrategyConfig::Bigold {
            age_turnover_secs,
            size_turnover,
        } => Arc::new(BigOld {
            age_turnover_ms: (*age_turnover_secs).max(1) as f64 * 1000.0,
            size_turnover: if *size_turnover > 0.0 { *size_turnover } else { 5.0e8 },
        }),
    }
}

/// A deletion candidate with its score.
#[derive(Debug, Clone)]
pub struct ScoredObject {
    pub object: CacheObject,
    pub score: f64,
}

/// Scoring pass that stops collecting candidates once their total size
/// exceeds a limit.
#[derive(Debug, Clone)]
pub struct SizeLimitedSelection {
    scorer: Arc<dyn DeletionScorer>,
    size_limit: u64,
    need: u64,
    total: u64,
    sufficient: u64,
    now_ms: i64,
}

impl SizeLimitedSelection {
    pub fn new(scorer: Arc<dyn DeletionScorer>, size_limit: u64, need: u64) -> Self {
        Self {
            scorer,
            size_limit,
            need,
            total: 0,
            sufficient: 0,
            now_ms: now_millis(),
        }
    }

    pub fn purpose(&self) -> SelectionPurpose {
        self.scorer.purpose()
    }

    /// Start a fresh pass.
    pub fn reset(&mut self) {
        self.total = 0;
        self.sufficient = 0;
        self.now_ms = now_millis();
    }

    pub fn score(&mut self, object: CacheObject) -> ScoredObject {
        let score = self.scorer.score(&object, self.now_ms);
        if let Some(size) = object.size
            && size > 0
            && score > 0.0
        {
            self.total += size;
        }
        if self.sufficient < self.need {
            self.sufficient = self.total;
        }
        ScoredObject { object, score }
    }

    pub fn limit_reached(&self) -> bool {
        self.total > self.size_limit
    }

    /// Total size of all positively scored candidates seen so far.
    pub fn total_size(&self) -> u64 {
        self.total
    }

    /// Total size at the point the needed amount was first met (or the
    /// running total if it never was).
    pub fn sufficient_size(&self) -> u64 {
        self.sufficient
    }

    /// Order candidates by descending score; ties go to the earliest `since`.
    pub fn sort(candidates: &mut [ScoredObject]) {
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.object.since.cmp(&b.object.since))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn obj(size: u64, since: i64, priority: i32) -> CacheObject {
        CacheObject {
            id: format!("ds/{since}"),
            volume: "v".into(),
            name: format!("ds/{since}"),
            size: Some(size),
            checksum: None,
            checksum_algorithm: None,
            priority,
            since,
            checked: 0,
            cached: true,
            metadata: Map::new(),
        }
    }

    const DAY: i64 = 86_400_000;

    #[test]
    fn test_oldest_first_ignores_young_objects() {
        let s = OldestFirst::default();
        let now = 10 * DAY;
        assert_eq!(s.score(&obj(10, now - 60_000, 10), now), 0.0);
        let one_day = s.score(&obj(10, now - DAY, 10), now);
        assert!((one_day - 1.0).abs() < 1e-9);
        assert!(s.score(&obj(10, now - 2 * DAY, 10), now) > one_day);
    }

    #[test]
    fn test_biggest_first() {
        let s = BiggestFirst { norm: 100.0 };
        assert_eq!(s.score(&obj(250, 0, 10), 0), 2.5);
    }

    #[test]
    fn test_big_old_grows_with_age_and_size() {
        let s = BigOld::default();
        let now = 30 * DAY;
        let small_old = s.score(&obj(1_000, now - 10 * DAY, 10), now);
        let big_old = s.score(&obj(1_000_000_000, now - 10 * DAY, 10), now);
        let big_young = s.score(&obj(1_000_000_000, now - 60_000, 10), now);
        assert!(big_old > small_old);
        assert!(big_old > big_young);
        assert!(big_young < 1e-6);
    }

    #[test]
    fn test_size_limited_selection_tracks_totals() {
        let mut sel = SizeLimitedSelection::new(Arc::new(BiggestFirst::default()), 250, 150);
        sel.score(obj(100, 1, 10));
        assert_eq!(sel.sufficient_size(), 100);
        sel.score(obj(100, 2, 10));
        assert_eq!(sel.sufficient_size(), 200);
        assert!(!sel.limit_reached());
        sel.score(obj(100, 3, 10));
        assert_eq!(sel.total_size(), 300);
        assert_eq!(sel.sufficient_size(), 200);
        assert!(sel.limit_reached());
    }

    #[test]
    fn test_sort_breaks_ties_by_since() {
        let mut cands = vec![
            ScoredObject { object: obj(1, 30, 10), score: 1.0 },
            ScoredObject { object: obj(1, 10, 10), score: 1.0 },
            ScoredObject { object: obj(1, 20, 10), score: 2.0 },
        ];
        SizeLimitedSelection::sort(&mut cands);
        let order: Vec<i64> = cands.iter().map(|c| c.object.since).collect();
        assert_eq!(order, vec![20, 10, 30]);
    }

    #[test]
    fn test_scorer_from_config() {
        let s = scorer_from_config(&DeletionStrategyConfig::default());
        assert_eq!(s.purpose(), SelectionPurpose::DeletionByPriority);
        let s = scorer_from_config(&DeletionStrategyConfig::Size { norm: 1.0 });
        assert_eq!(s.purpose(), SelectionPurpose::DeletionBySize);
    }
}
