use std::slice::Iter;

use crate::instance::Instance;
use crate::misc::{FullHashMap, HashSet};

/// Values at or below this count as "not selected" for pruning.
pub const ZERO_TOL: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColumnId(pub u32);

impl std::hash::Hash for ColumnId {
    fn hash<H: std::hash::Hasher>(&self, hasher: &mut H) {
        hasher.write_u32(self.0)
    }
}

impl nohash_hasher::IsEnabled for ColumnId {}

/// An aisle together with the orders it serves on its own.
///
/// `orders` is kept sorted and deduplicated so that two patterns with the
/// same key compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub aisle: usize,
    pub orders: Vec<usize>,
    pub units: u64,
}

impl Pattern {
    pub fn new<I: IntoIterator<Item = usize>>(instance: &Instance, aisle: usize, orders: I) -> Self {
        let mut orders: Vec<usize> = orders.into_iter().collect();
        orders.sort_unstable();
        orders.dedup();
        let units = instance.units_of(&orders);
        Pattern { aisle, orders, units }
    }

    /// Pattern serving no order, the per aisle fallback.
    pub fn void(aisle: usize) -> Self {
        Pattern {
            aisle,
            orders: Vec::new(),
            units: 0,
        }
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        self.orders.is_empty()
    }

    /// Demand of the orders fits into the aisle's own supply.
    pub fn is_feasible(&self, instance: &Instance) -> bool {
        instance.fits_aisle(self.aisle, &self.orders)
    }

    #[inline]
    pub fn contains_order(&self, order: usize) -> bool {
        self.orders.binary_search(&order).is_ok()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub id: ColumnId,
    pub pattern: Pattern,
    /// Consecutive relaxation solves in which the column stayed at zero.
    pub zero_streak: u32,
}

/// Holds all patterns known for one RMP(k).
///
/// Ids grow monotonically and are never reused, so columns stay sorted by
/// id even after pruning.
#[derive(Clone, Debug, Default)]
pub struct PatternPool {
    local_column_counter: u32,
    columns: Vec<Column>,
    index: FullHashMap<(usize, Vec<usize>), ColumnId>,
}

impl PatternPool {
    pub fn new() -> Self {
        PatternPool::default()
    }

    /// Total number of columns in pool
    pub fn count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get_column(&self, id: ColumnId) -> Option<&Column> {
        self.columns
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|i| &self.columns[i])
    }

    pub fn iter(&self) -> Iter<'_, Column> {
        self.columns.iter()
    }

    pub fn contains(&self, aisle: usize, orders: &[usize]) -> bool {
        self.find(aisle, orders).is_some()
    }

    pub fn find(&self, aisle: usize, orders: &[usize]) -> Option<ColumnId> {
        self.index.get(&(aisle, orders.to_vec())).copied()
    }

    /// Adds a pattern unless one with the same key is present.
    /// Returns the id of the new column.
    pub fn add_pattern(&mut self, pattern: Pattern) -> Option<ColumnId> {
        let key = (pattern.aisle, pattern.orders.clone());
        if self.index.contains_key(&key) {
            return None;
        }

        #[cfg(feature = "validity_assertions")]
        {
            assert!(self.columns.iter().all(|c| c.pattern != pattern));
        }

        let id = ColumnId(self.local_column_counter);
        self.local_column_counter += 1;
        self.index.insert(key, id);
        self.columns.push(Column {
            id,
            pattern,
            zero_streak: 0,
        });
        Some(id)
    }

    /// Updates the inactivity counters from one relaxation solve.
    /// Columns missing from `values` count as zero.
    pub fn record_activity<I: IntoIterator<Item = (ColumnId, f64)>>(&mut self, values: I) {
        let active: HashSet<ColumnId> = values
            .into_iter()
            .filter(|&(_, v)| v > ZERO_TOL)
            .map(|(id, _)| id)
            .collect();

        for column in &mut self.columns {
            if active.contains(&column.id) {
                column.zero_streak = 0;
            } else {
                column.zero_streak = column.zero_streak.saturating_add(1);
            }
        }
    }

    /// Removes columns that stayed at zero for `window` consecutive solves.
    ///
    /// Void patterns are kept as the per aisle fallback, and so is anything
    /// listed in `protect` (currently selected columns).
    pub fn prune(&mut self, window: u32, protect: &[ColumnId]) -> Vec<ColumnId> {
        if window == 0 {
            return Vec::new();
        }
        let mut removed = Vec::new();
        self.columns.retain(|c| {
            let keep = c.pattern.is_void() || c.zero_streak < window || protect.contains(&c.id);
            if !keep {
                removed.push(c.id);
            }
            keep
        });
        if !removed.is_empty() {
            self.index = self
                .columns
                .iter()
                .map(|c| ((c.pattern.aisle, c.pattern.orders.clone()), c.id))
                .collect();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new(
            vec![vec![2, 1], vec![0, 3], vec![1, 1]],
            vec![vec![3, 4], vec![1, 1]],
            0,
            100,
        )
        .unwrap()
    }

    #[test]
    fn insertion_is_idempotent_on_key() {
        let inst = instance();
        let mut pool = PatternPool::new();
        let a = pool.add_pattern(Pattern::new(&inst, 0, [2, 0]));
        let b = pool.add_pattern(Pattern::new(&inst, 0, [0, 2, 0]));
        assert_eq!(a, Some(ColumnId(0)));
        assert_eq!(b, None);
        assert_eq!(pool.count(), 1);
        assert!(pool.contains(0, &[0, 2]));
        assert!(!pool.contains(1, &[0, 2]));
        assert_eq!(pool.get_column(ColumnId(0)).unwrap().pattern.units, 5);
    }

    #[test]
    fn pattern_feasibility_uses_own_aisle() {
        let inst = instance();
        assert!(Pattern::new(&inst, 0, [0]).is_feasible(&inst));
        // [2, 4] uses all of item 1, one more unit of it does not fit
        assert!(Pattern::new(&inst, 0, [0, 1]).is_feasible(&inst));
        assert!(!Pattern::new(&inst, 0, [0, 1, 2]).is_feasible(&inst));
        assert!(!Pattern::new(&inst, 1, [0]).is_feasible(&inst));
        assert!(Pattern::void(1).is_feasible(&inst));
    }

    #[test]
    fn pruning_respects_window_void_and_protection() {
        let inst = instance();
        let mut pool = PatternPool::new();
        let void = pool.add_pattern(Pattern::void(0)).unwrap();
        let idle = pool.add_pattern(Pattern::new(&inst, 0, [0])).unwrap();
        let busy = pool.add_pattern(Pattern::new(&inst, 0, [1])).unwrap();
        let guarded = pool.add_pattern(Pattern::new(&inst, 0, [2])).unwrap();

        for _ in 0..3 {
            pool.record_activity([(busy, 1.0), (idle, 1e-9)]);
        }
        assert!(pool.prune(4, &[]).is_empty());

        let removed = pool.prune(3, &[guarded]);
        assert_eq!(removed, vec![idle]);
        assert!(pool.get_column(void).is_some());
        assert!(pool.get_column(busy).is_some());
        assert!(pool.get_column(guarded).is_some());
        assert!(!pool.contains(0, &[0]));

        // ids are not reused after pruning
        let again = pool.add_pattern(Pattern::new(&inst, 0, [0])).unwrap();
        assert_eq!(again, ColumnId(4));
    }
}
