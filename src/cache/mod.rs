//! Kernel row cache
//!
//! Caches full kernel rows `K(x_i, ·)` keyed by sample index. Slots are
//! fixed-size rows inside one contiguous buffer; which sample occupies which
//! slot, and which slot is recycled on a miss, is decided by an
//! [`EvictionPolicy`]. The default policy is least-recently-used.
//!
//! A block request resolves all hits first, assigns slots for the misses and
//! then computes every missing row in one parallel pass. Each missing row is
//! written to its own slot, so the pass needs no locking. Concurrent block
//! requests on the same cache are not supported; `&mut self` enforces that.

use crate::core::{try_filled, try_zeroed, DalError, Result};
use crate::data::FeatureTable;
use crate::kernel::Kernel;
use lru::LruCache;
use rayon::prelude::*;
use std::num::NonZeroUsize;

/// Maps sample indices to cache slots and chooses victims on a miss
pub trait EvictionPolicy: Send {
    /// Slot holding `key`, marking it as used
    fn touch(&mut self, key: usize) -> Option<usize>;

    /// Slot holding `key` without affecting eviction order
    fn peek(&self, key: usize) -> Option<usize>;

    /// Assign a slot to `key`, returning the slot and the evicted key, if any
    fn insert(&mut self, key: usize) -> (usize, Option<usize>);

    /// Drop `key`, freeing its slot
    fn remove(&mut self, key: usize) -> Option<usize>;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Least-recently-used slot assignment backed by `lru::LruCache`
pub struct LruPolicy {
    slots: LruCache<usize, usize>,
    free: Vec<usize>,
}

impl LruPolicy {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: LruCache::new(capacity),
            free: (0..capacity.get()).rev().collect(),
        }
    }
}

impl EvictionPolicy for LruPolicy {
    fn touch(&mut self, key: usize) -> Option<usize> {
        self.slots.get(&key).copied()
    }

    fn peek(&self, key: usize) -> Option<usize> {
        self.slots.peek(&key).copied()
    }

    fn insert(&mut self, key: usize) -> (usize, Option<usize>) {
        if let Some(&slot) = self.slots.get(&key) {
            return (slot, None);
        }
        match self.free.pop() {
            Some(slot) => {
                self.slots.put(key, slot);
                (slot, None)
            }
            // Full: recycle the least recently used slot
            None => match self.slots.pop_lru() {
                Some((victim, slot)) => {
                    self.slots.put(key, slot);
                    (slot, Some(victim))
                }
                // No free slot and nothing resident only when capacity is zero,
                // which `new` rules out
                None => {
                    self.slots.put(key, 0);
                    (0, None)
                }
            },
        }
    }

    fn remove(&mut self, key: usize) -> Option<usize> {
        let slot = self.slots.pop(&key)?;
        self.free.push(slot);
        Some(slot)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn capacity(&self) -> usize {
        self.slots.cap().get()
    }
}

/// Cache of kernel rows over one training table
pub struct KernelRowCache<P: EvictionPolicy = LruPolicy> {
    policy: P,
    data: Vec<f64>,
    row_len: usize,
    pending: Vec<Option<usize>>,
    hits: u64,
    misses: u64,
}

impl KernelRowCache<LruPolicy> {
    /// Size the cache from a byte budget
    ///
    /// The number of rows is `cache_bytes / (n_samples * 8)`, raised to
    /// `min_rows` so a full working set always fits and capped at `n_samples`.
    pub fn with_memory_limit(n_samples: usize, cache_bytes: usize, min_rows: usize) -> Result<Self> {
        let row_bytes = n_samples.max(1) * std::mem::size_of::<f64>();
        let rows = (cache_bytes / row_bytes)
            .max(min_rows)
            .min(n_samples)
            .max(1);
        Self::new(n_samples, rows)
    }

    /// Cache holding up to `capacity` rows of length `n_samples`
    pub fn new(n_samples: usize, capacity: usize) -> Result<Self> {
        Self::with_policy(n_samples, LruPolicy::new(capacity))
    }
}

impl<P: EvictionPolicy> KernelRowCache<P> {
    pub fn with_policy(n_samples: usize, policy: P) -> Result<Self> {
        let capacity = policy.capacity();
        let total = n_samples.checked_mul(capacity).ok_or_else(|| {
            DalError::MemoryAllocation(format!("kernel cache of {capacity} rows overflows"))
        })?;
        Ok(Self {
            policy,
            data: try_zeroed(total, "kernel cache")?,
            row_len: n_samples,
            pending: try_filled(capacity, None, "kernel cache bookkeeping")?,
            hits: 0,
            misses: 0,
        })
    }

    /// Number of rows the cache can hold at once
    pub fn capacity(&self) -> usize {
        self.policy.capacity()
    }

    /// Return the kernel rows for `indices`, computing the ones not resident
    ///
    /// `rows.row(k)` is `K(x_{indices[k]}, x_j)` for every `j`. The number of
    /// distinct indices must not exceed the cache capacity.
    pub fn get_rows_block<K: Kernel>(
        &mut self,
        kernel: &K,
        table: &FeatureTable,
        indices: &[usize],
    ) -> Result<CachedRows<'_>> {
        if table.n_rows() != self.row_len {
            return Err(DalError::DimensionMismatch {
                expected: self.row_len,
                actual: table.n_rows(),
            });
        }
        if indices.len() > self.capacity() {
            let mut distinct = indices.to_vec();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() > self.capacity() {
                return Err(DalError::InvalidParameter(format!(
                    "requested {} kernel rows but the cache holds {}",
                    distinct.len(),
                    self.capacity()
                )));
            }
        }

        let mut slots = Vec::with_capacity(indices.len());
        let mut n_pending = 0;
        for &index in indices {
            if index >= self.row_len {
                return Err(DalError::InvalidParameter(format!(
                    "row index {index} out of range for {} samples",
                    self.row_len
                )));
            }
            if let Some(slot) = self.policy.touch(index) {
                self.hits += 1;
                slots.push(slot);
                continue;
            }
            self.misses += 1;
            let (slot, _evicted) = self.policy.insert(index);
            self.pending[slot] = Some(index);
            n_pending += 1;
            slots.push(slot);
        }

        if n_pending > 0 {
            self.fill_pending(kernel, table)?;
        }

        Ok(CachedRows {
            data: &self.data,
            row_len: self.row_len,
            slots,
        })
    }

    /// Compute every pending row in parallel; each slot is written by one task
    fn fill_pending<K: Kernel>(&mut self, kernel: &K, table: &FeatureTable) -> Result<()> {
        let row_len = self.row_len;
        let pending = &self.pending;
        let failed: Vec<usize> = self
            .data
            .par_chunks_mut(row_len)
            .enumerate()
            .filter_map(|(slot, row)| {
                let index = pending[slot]?;
                kernel.compute_row(table, index, row);
                if row.iter().all(|v| v.is_finite()) {
                    None
                } else {
                    Some(index)
                }
            })
            .collect();

        self.pending.iter_mut().for_each(|p| *p = None);

        if let Some(&index) = failed.first() {
            // Never leave a half-valid row resident
            for &bad in &failed {
                self.policy.remove(bad);
            }
            return Err(DalError::Computation(format!(
                "kernel produced a non-finite value in row {index}"
            )));
        }
        Ok(())
    }

    /// Cached row for `index`, if resident, without changing eviction order
    pub fn peek_row(&self, index: usize) -> Option<&[f64]> {
        let slot = self.policy.peek(index)?;
        Some(&self.data[slot * self.row_len..(slot + 1) * self.row_len])
    }

    /// Get cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            capacity: self.policy.capacity(),
            size: self.policy.len(),
        }
    }
}

/// Borrowed view of the rows returned by one block request
pub struct CachedRows<'a> {
    data: &'a [f64],
    row_len: usize,
    slots: Vec<usize>,
}

impl<'a> CachedRows<'a> {
    /// Row for the `k`-th requested index
    pub fn row(&self, k: usize) -> &'a [f64] {
        let slot = self.slots[k];
        &self.data[slot * self.row_len..(slot + 1) * self.row_len]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub capacity: usize,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{LinearKernel, RbfKernel};

    fn table() -> FeatureTable {
        FeatureTable::from_dense(
            &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, -1.0, -0.5, 0.5, 3.0, 0.0],
            6,
            2,
        )
        .unwrap()
    }

    fn direct_row<K: Kernel>(kernel: &K, table: &FeatureTable, i: usize) -> Vec<f64> {
        (0..table.n_rows())
            .map(|j| kernel.compute(table.row(i), table.row(j)))
            .collect()
    }

    #[test]
    fn test_lru_policy_slots() {
        let mut policy = LruPolicy::new(2);
        assert_eq!(policy.insert(10), (0, None));
        assert_eq!(policy.insert(20), (1, None));
        assert_eq!(policy.touch(10), Some(0));

        // 20 is now least recently used
        assert_eq!(policy.insert(30), (1, Some(20)));
        assert_eq!(policy.peek(20), None);
        assert_eq!(policy.len(), 2);

        assert_eq!(policy.remove(10), Some(0));
        assert_eq!(policy.insert(40), (0, None));
    }

    #[test]
    fn test_block_hits_and_misses() {
        let table = table();
        let kernel = LinearKernel::new();
        let mut cache = KernelRowCache::new(table.n_rows(), 3).unwrap();

        let rows = cache.get_rows_block(&kernel, &table, &[0, 2]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.row(1), direct_row(&kernel, &table, 2).as_slice());
        assert_eq!(cache.stats().misses, 2);

        cache.get_rows_block(&kernel, &table, &[2, 3]).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.size, 3);
        assert_eq!(cache.hit_rate(), 0.25);
    }

    #[test]
    fn test_eviction_is_least_recently_used() {
        let table = table();
        let kernel = LinearKernel::new();
        let mut cache = KernelRowCache::new(table.n_rows(), 2).unwrap();

        cache.get_rows_block(&kernel, &table, &[0]).unwrap();
        cache.get_rows_block(&kernel, &table, &[1]).unwrap();
        cache.get_rows_block(&kernel, &table, &[0]).unwrap();
        cache.get_rows_block(&kernel, &table, &[4]).unwrap();

        assert!(cache.peek_row(0).is_some());
        assert!(cache.peek_row(1).is_none());
        assert!(cache.peek_row(4).is_some());
    }

    #[test]
    fn test_cached_rows_match_direct_computation() {
        let table = table();
        let kernel = RbfKernel::new(0.8).unwrap();
        let mut cache = KernelRowCache::new(table.n_rows(), 3).unwrap();

        let requests: [&[usize]; 6] = [&[0, 1], &[5, 1, 2], &[3], &[4, 0], &[2, 2], &[1, 5, 3]];
        for request in requests {
            let rows = cache.get_rows_block(&kernel, &table, request).unwrap();
            for (k, &index) in request.iter().enumerate() {
                assert_eq!(rows.row(k), direct_row(&kernel, &table, index).as_slice());
            }
        }

        for index in 0..table.n_rows() {
            if let Some(row) = cache.peek_row(index) {
                assert_eq!(row, direct_row(&kernel, &table, index).as_slice());
            }
        }
        assert!(cache.stats().size <= 3);
    }

    #[test]
    fn test_block_larger_than_capacity_is_rejected() {
        let table = table();
        let kernel = LinearKernel::new();
        let mut cache = KernelRowCache::new(table.n_rows(), 2).unwrap();
        let result = cache.get_rows_block(&kernel, &table, &[0, 1, 2]);
        assert!(matches!(result, Err(DalError::InvalidParameter(_))));

        // Duplicates count once
        assert!(cache.get_rows_block(&kernel, &table, &[0, 1, 0]).is_ok());
    }

    #[test]
    fn test_memory_limit_sizing() {
        let cache = KernelRowCache::with_memory_limit(100, 100 * 8 * 10, 2).unwrap();
        assert_eq!(cache.capacity(), 10);

        let tiny = KernelRowCache::with_memory_limit(100, 8, 4).unwrap();
        assert_eq!(tiny.capacity(), 4);

        let capped = KernelRowCache::with_memory_limit(5, usize::MAX / 2, 2).unwrap();
        assert_eq!(capped.capacity(), 5);
    }
}
