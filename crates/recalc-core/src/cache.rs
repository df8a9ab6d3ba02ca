//! Calculation cache and invalidation propagation.
//!
//! Entries are keyed by `(SheetHandle, CellRef)` and remember the version of
//! every precedent at the time they were computed. Validity is checked
//! lazily on lookup by comparing those snapshots with the current
//! [`VersionTable`]; there is no expiry.
//!
//! Invalidation walks dependents with an explicit worklist and a visited
//! set, so reference cycles terminate and each cell is handled once per
//! call.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::cell_ref::{CellAddress, CellRef};
use crate::eval::SheetHandle;
use crate::value::CellValue;

/// Engine-owned versions, bumped on every invalidation of a cell.
///
/// Unknown addresses are at version 0. Independent of store versions.
#[derive(Debug, Default)]
pub struct VersionTable {
    versions: FxHashMap<CellAddress, u64>,
}

impl VersionTable {
    pub fn get(&self, address: &CellAddress) -> u64 {
        self.versions.get(address).copied().unwrap_or(0)
    }

    /// Increment and return the new version.
    pub fn bump(&mut self, address: &CellAddress) -> u64 {
        let version = self.versions.entry(address.clone()).or_insert(0);
        *version += 1;
        *version
    }
}

/// A computed result and what it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub result: CellValue,
    /// Formula text the result was computed from.
    pub formula: String,
    /// Precedents with their versions at compute time.
    pub dependencies: Vec<(CellAddress, u64)>,
}

/// Statistics reported by the Cache Stats request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_size: usize,
    pub dirty_cells_count: usize,
    /// `cache_size / (cache_size + dirty_cells_count)`, 0 when both are 0.
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before the first lookup.
    pub lookup_hit_rate: f64,
    pub loaded_sheets: usize,
}

/// Outcome of one invalidation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Every address visited, root first.
    pub invalidated: Vec<CellAddress>,
    /// Number of cache entries removed.
    pub evicted: usize,
}

#[derive(Debug, Default)]
pub struct CalcCache {
    entries: FxHashMap<(SheetHandle, CellRef), CacheEntry>,
    versions: VersionTable,
    dirty: FxHashSet<CellAddress>,
    hits: u64,
    misses: u64,
}

impl CalcCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self, address: &CellAddress) -> u64 {
        self.versions.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_dirty(&self, address: &CellAddress) -> bool {
        self.dirty.contains(address)
    }

    pub fn contains(&self, handle: SheetHandle, cell_ref: CellRef) -> bool {
        self.entries.contains_key(&(handle, cell_ref))
    }

    pub fn entry(&self, handle: SheetHandle, cell_ref: CellRef) -> Option<&CacheEntry> {
        self.entries.get(&(handle, cell_ref))
    }

    fn is_valid(&self, entry: &CacheEntry, formula: &str) -> bool {
        entry.formula == formula
            && entry
                .dependencies
                .iter()
                .all(|(address, snapshot)| self.versions.get(address) == *snapshot)
    }

    /// Return the cached result if the entry is still valid.
    ///
    /// A stale entry is removed. Counts a hit or a miss.
    pub fn lookup(
        &mut self,
        handle: SheetHandle,
        cell_ref: CellRef,
        formula: &str,
    ) -> Option<CellValue> {
        let key = (handle, cell_ref);
        let valid = self
            .entries
            .get(&key)
            .map(|entry| self.is_valid(entry, formula));

        match valid {
            Some(true) => {
                self.hits += 1;
                self.entries.get(&key).map(|entry| entry.result.clone())
            }
            Some(false) => {
                self.misses += 1;
                self.entries.remove(&key);
                tracing::debug!("Removed stale cache entry {} on {}", cell_ref, handle);
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Pair each precedent with its current version.
    pub fn snapshot(&self, precedents: Vec<CellAddress>) -> Vec<(CellAddress, u64)> {
        precedents
            .into_iter()
            .map(|address| {
                let version = self.versions.get(&address);
                (address, version)
            })
            .collect()
    }

    /// Store a freshly computed entry and clear the address from the dirty set.
    pub fn insert(&mut self, handle: SheetHandle, address: &CellAddress, entry: CacheEntry) {
        self.dirty.remove(address);
        self.entries.insert((handle, address.cell_ref()), entry);
    }

    pub fn evict(&mut self, handle: SheetHandle, cell_ref: CellRef) -> bool {
        self.entries.remove(&(handle, cell_ref)).is_some()
    }

    /// Invalidate `root` and, transitively, everything depending on it.
    ///
    /// Each visited address has its version bumped exactly once, its entry
    /// evicted and is marked dirty. Without a handle the sheet is not
    /// loaded: only the root version is bumped.
    pub fn invalidate<F>(
        &mut self,
        root: CellAddress,
        handle: Option<SheetHandle>,
        mut dependents: F,
    ) -> InvalidationReport
    where
        F: FnMut(&CellAddress) -> Vec<CellAddress>,
    {
        let Some(handle) = handle else {
            self.versions.bump(&root);
            return InvalidationReport {
                invalidated: vec![root],
                evicted: 0,
            };
        };

        let mut report = InvalidationReport::default();
        let mut visited = FxHashSet::default();
        let mut worklist = VecDeque::from([root]);

        while let Some(address) = worklist.pop_front() {
            if !visited.insert(address.clone()) {
                continue;
            }
            self.versions.bump(&address);
            if self.evict(handle, address.cell_ref()) {
                report.evicted += 1;
            }
            self.dirty.insert(address.clone());
            for dependent in dependents(&address) {
                if !visited.contains(&dependent) {
                    worklist.push_back(dependent);
                }
            }
            report.invalidated.push(address);
        }

        report
    }

    /// Drop entries, the dirty set and lookup counters. Versions survive.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self, loaded_sheets: usize) -> CacheStats {
        let cache_size = self.entries.len();
        let dirty_cells_count = self.dirty.len();
        CacheStats {
            cache_size,
            dirty_cells_count,
            hit_rate: ratio(cache_size as u64, dirty_cells_count as u64),
            hits: self.hits,
            misses: self.misses,
            lookup_hit_rate: ratio(self.hits, self.misses),
            loaded_sheets,
        }
    }
}

fn ratio(part: u64, rest: u64) -> f64 {
    let total = part + rest;
    if total == 0 { 0.0 } else { part as f64 / total as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(row: u32, col: u32) -> CellAddress {
        CellAddress::new("S1", row, col)
    }

    fn entry(result: f64, formula: &str, deps: Vec<(CellAddress, u64)>) -> CacheEntry {
        CacheEntry {
            result: CellValue::Number(result),
            formula: formula.to_string(),
            dependencies: deps,
        }
    }

    #[test]
    fn test_lookup_hit_and_formula_mismatch() {
        let h = SheetHandle::new(0);
        let mut cache = CalcCache::new();
        let b1 = addr(0, 1);
        let deps = cache.snapshot(vec![addr(0, 0)]);
        cache.insert(h, &b1, entry(2.0, "=A1*2", deps));

        assert_eq!(cache.entry(h, b1.cell_ref()).map(|e| e.dependencies.len()), Some(1));
        assert_eq!(cache.lookup(h, b1.cell_ref(), "=A1*2"), Some(CellValue::Number(2.0)));
        assert_eq!(cache.lookup(h, b1.cell_ref(), "=A1*3"), None);
        assert!(!cache.contains(h, b1.cell_ref()));

        let stats = cache.stats(1);
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.lookup_hit_rate, 0.5);
    }

    #[test]
    fn test_version_change_makes_entry_stale() {
        let h = SheetHandle::new(0);
        let mut cache = CalcCache::new();
        let b1 = addr(0, 1);
        let deps = cache.snapshot(vec![addr(0, 0)]);
        cache.insert(h, &b1, entry(2.0, "=A1*2", deps));

        cache.versions.bump(&addr(0, 0));
        assert_eq!(cache.lookup(h, b1.cell_ref(), "=A1*2"), None);
    }

    #[test]
    fn test_invalidate_walks_dependents_once() {
        let h = SheetHandle::new(0);
        let mut cache = CalcCache::new();
        // A1 -> B1 -> C1 -> A1, plus unrelated D1.
        for (row, col) in [(0, 0), (0, 1), (0, 2), (0, 3)] {
            cache.insert(h, &addr(row, col), entry(0.0, "=x", vec![]));
        }
        let report = cache.invalidate(addr(0, 0), Some(h), |a| match a.col {
            0 => vec![addr(0, 1)],
            1 => vec![addr(0, 2)],
            2 => vec![addr(0, 0)],
            _ => vec![],
        });

        assert_eq!(report.invalidated, vec![addr(0, 0), addr(0, 1), addr(0, 2)]);
        assert_eq!(report.evicted, 3);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(h, addr(0, 3).cell_ref()));
        for col in 0..3 {
            assert_eq!(cache.version(&addr(0, col)), 1);
            assert!(cache.is_dirty(&addr(0, col)));
        }
        assert_eq!(cache.version(&addr(0, 3)), 0);
    }

    #[test]
    fn test_invalidate_unloaded_bumps_root_only() {
        let mut cache = CalcCache::new();
        let report = cache.invalidate(addr(4, 4), None, |_| vec![addr(5, 5)]);
        assert_eq!(report.invalidated, vec![addr(4, 4)]);
        assert_eq!(cache.version(&addr(4, 4)), 1);
        assert_eq!(cache.version(&addr(5, 5)), 0);
        assert_eq!(cache.dirty_count(), 0);
    }

    #[test]
    fn test_stats_and_clear() {
        let h = SheetHandle::new(0);
        let mut cache = CalcCache::new();
        assert_eq!(cache.stats(0).hit_rate, 0.0);

        cache.insert(h, &addr(0, 0), entry(1.0, "=1", vec![]));
        cache.insert(h, &addr(1, 0), entry(1.0, "=1", vec![]));
        cache.insert(h, &addr(2, 0), entry(1.0, "=1", vec![]));
        cache.invalidate(addr(9, 9), Some(h), |_| vec![]);

        let stats = cache.stats(1);
        assert_eq!(stats.cache_size, 3);
        assert_eq!(stats.dirty_cells_count, 1);
        assert_eq!(stats.hit_rate, 0.75);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.dirty_count(), 0);
        assert_eq!(cache.version(&addr(9, 9)), 1);
    }
}
