use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use statrs::distribution::{Discrete, Poisson};

use crate::error::ConfigError;

/// Memoized Poisson probabilities for counts below a truncation bound.
///
/// The first query for a rate evaluates the whole row `0..bound` once and
/// keeps it for the life of the cache. Rows are handed out as shared slices
/// so the return model can read them without touching the lock again.
pub struct PoissonCache {
    bound: u8,
    rows: RwLock<HashMap<u64, Arc<[f64]>>>,
    evaluations: AtomicUsize,
}

impl PoissonCache {
    pub fn new(bound: u8) -> PoissonCache {
        PoissonCache {
            bound,
            rows: RwLock::new(HashMap::new()),
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Probability of exactly `count` events for a Poisson process with
    /// mean `rate`. Counts at or past the bound are truncated to zero.
    pub fn probability(&self, count: u32, rate: f64) -> Result<f64, ConfigError> {
        let row = self.row(rate)?;
        Ok(row.get(count as usize).copied().unwrap_or(0.0))
    }

    /// The cached row `[P(0), P(1), .., P(bound - 1)]` for `rate`.
    pub fn row(&self, rate: f64) -> Result<Arc<[f64]>, ConfigError> {
        let key = rate.to_bits();
        if let Some(row) = self.read_rows().get(&key) {
            return Ok(Arc::clone(row));
        }
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        // Another thread may have filled the row while we waited.
        if let Some(row) = rows.get(&key) {
            return Ok(Arc::clone(row));
        }
        let invalid = ConfigError::InvalidRate { name: "rate", value: rate };
        if !(rate.is_finite() && rate > 0.0) {
            return Err(invalid);
        }
        let dist = Poisson::new(rate).map_err(|_| invalid)?;
        let row: Arc<[f64]> = (0..u64::from(self.bound)).map(|n| dist.pmf(n)).collect();
        self.evaluations.fetch_add(row.len(), Ordering::Relaxed);
        rows.insert(key, Arc::clone(&row));
        Ok(row)
    }

    /// Number of probability mass evaluations performed so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    fn read_rows(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, Arc<[f64]>>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }
}
