//! Order in which candidate aisle counts are visited.

use std::collections::VecDeque;

/// `1..=n` in centre, halves, quarters order (pre-order over the midpoints),
/// produced lazily.
pub fn binary_spread(n: usize) -> impl Iterator<Item = usize> {
    let mut stack = vec![(1usize, n)];
    std::iter::from_fn(move || {
        while let Some((lo, hi)) = stack.pop() {
            if lo > hi {
                continue;
            }
            let mid = (lo + hi) / 2;
            stack.push((mid + 1, hi));
            if mid > lo {
                stack.push((lo, mid - 1));
            }
            return Some(mid);
        }
        None
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum KOrder {
    #[default]
    Ascending,
    BinarySpread,
}

impl KOrder {
    pub fn sequence(self, n: usize) -> Vec<usize> {
        match self {
            KOrder::Ascending => (1..=n).collect(),
            KOrder::BinarySpread => binary_spread(n).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum RankingPolicy {
    /// Closest to the incumbent's aisle count first.
    #[default]
    Proximity,
    /// Upper confidence bound over the best density seen per k.
    Ucb { exploration: f64 },
    /// Largest Lagrangian bound first; k that cannot beat the incumbent are dropped.
    DualBound,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KStats {
    pub trials: u32,
    pub revisits: u32,
    /// Best density found at this k.
    pub best: Option<f64>,
    /// Tightest known upper bound on the density at this k.
    pub dual_bound: Option<f64>,
}

pub struct KSearch {
    queue: VecDeque<usize>,
    stats: Vec<KStats>,
    policy: RankingPolicy,
    max_revisits: u32,
    incumbent: Option<(usize, f64)>,
}

impl KSearch {
    pub fn new(num_aisles: usize, order: KOrder, policy: RankingPolicy, max_revisits: u32) -> Self {
        KSearch {
            queue: order.sequence(num_aisles).into(),
            stats: vec![KStats::default(); num_aisles],
            policy,
            max_revisits,
            incumbent: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remaining queue in visiting order (UCB picks dynamically).
    pub fn pending(&self) -> Vec<usize> {
        self.queue.iter().copied().collect()
    }

    pub fn stats(&self, k: usize) -> &KStats {
        &self.stats[k - 1]
    }

    fn total_trials(&self) -> u32 {
        self.stats.iter().map(|s| s.trials).sum()
    }

    fn ucb_score(&self, k: usize, exploration: f64) -> f64 {
        let s = self.stats(k);
        if s.trials == 0 {
            return f64::INFINITY;
        }
        let total = f64::from(self.total_trials() + 1);
        s.best.unwrap_or(0.0) + exploration * (total.ln() / f64::from(s.trials)).sqrt()
    }

    pub fn next(&mut self) -> Option<usize> {
        match self.policy {
            RankingPolicy::Proximity | RankingPolicy::DualBound => self.queue.pop_front(),
            RankingPolicy::Ucb { exploration } => {
                let (pos, _) = self
                    .queue
                    .iter()
                    .enumerate()
                    .map(|(pos, &k)| (pos, self.ucb_score(k, exploration)))
                    .fold(None, |best: Option<(usize, f64)>, (pos, score)| match best {
                        Some((_, b)) if b >= score => best,
                        _ => Some((pos, score)),
                    })?;
                self.queue.remove(pos)
            }
        }
    }

    /// Records the outcome of one visit. `objective` and `dual_bound` are densities.
    pub fn record(&mut self, k: usize, objective: Option<f64>, dual_bound: Option<f64>) {
        let s = &mut self.stats[k - 1];
        s.trials += 1;
        if let Some(obj) = objective {
            s.best = Some(s.best.map_or(obj, |b| b.max(obj)));
        }
        if let Some(bound) = dual_bound {
            s.dual_bound = Some(s.dual_bound.map_or(bound, |b| b.min(bound)));
        }
        self.resort();
    }

    /// Puts a k that was cut short back into the queue. Returns false once
    /// its revisits are used up.
    pub fn requeue(&mut self, k: usize) -> bool {
        let s = &mut self.stats[k - 1];
        if s.revisits >= self.max_revisits || self.queue.contains(&k) {
            return false;
        }
        s.revisits += 1;
        self.queue.push_back(k);
        self.resort();
        true
    }

    pub fn set_incumbent(&mut self, k: usize, objective: f64) {
        self.incumbent = Some((k, objective));
        self.resort();
    }

    fn resort(&mut self) {
        let Some((k_star, objective)) = self.incumbent else {
            return;
        };
        let distance = |k: usize| k.abs_diff(k_star);
        let mut pending: Vec<usize> = self.queue.drain(..).collect();

        match self.policy {
            RankingPolicy::Proximity => {
                pending.sort_by_key(|&k| (distance(k), k));
            }
            RankingPolicy::DualBound => {
                let bound = |k: usize| self.stats[k - 1].dual_bound.unwrap_or(f64::INFINITY);
                pending.retain(|&k| bound(k) > objective + 1e-9);
                pending.sort_by(|&a, &b| {
                    bound(b)
                        .total_cmp(&bound(a))
                        .then(distance(a).cmp(&distance(b)))
                        .then(a.cmp(&b))
                });
            }
            RankingPolicy::Ucb { .. } => {}
        }
        self.queue = pending.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_visits_midpoints_first() {
        assert_eq!(binary_spread(7).collect::<Vec<_>>(), vec![4, 2, 1, 3, 6, 5, 7]);
        assert_eq!(binary_spread(1).collect::<Vec<_>>(), vec![1]);
        assert_eq!(binary_spread(0).next(), None);
        // only the prefix that is consumed gets computed
        assert_eq!(binary_spread(1 << 30).take(3).collect::<Vec<_>>(), vec![1 << 29, 1 << 28, 1 << 27]);

        let mut all: Vec<usize> = binary_spread(20).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn proximity_resorts_around_incumbent() {
        let mut search = KSearch::new(6, KOrder::Ascending, RankingPolicy::Proximity, 0);
        assert_eq!(search.next(), Some(1));
        assert_eq!(search.next(), Some(2));
        search.record(2, Some(3.0), None);
        search.set_incumbent(4, 3.0);
        // ties on distance prefer fewer aisles
        assert_eq!(search.pending(), vec![4, 3, 5, 6]);
    }

    #[test]
    fn ucb_explores_untried_first_then_exploits() {
        let mut search = KSearch::new(3, KOrder::Ascending, RankingPolicy::Ucb { exploration: 0.5 }, 1);
        let first = search.next().unwrap();
        search.record(first, Some(10.0), None);
        assert!(search.requeue(first));
        let second = search.next().unwrap();
        assert_ne!(second, first);
        search.record(second, Some(1.0), None);
        let third = search.next().unwrap();
        assert_ne!(third, first);
        assert_ne!(third, second);
        search.record(third, None, None);
        // only the requeued k remains
        assert_eq!(search.next(), Some(first));
        assert!(search.next().is_none());
        assert!(!search.requeue(first));
    }

    #[test]
    fn dual_bound_drops_hopeless_k() {
        let mut search = KSearch::new(4, KOrder::Ascending, RankingPolicy::DualBound, 1);
        for _ in 0..4 {
            let k = search.next().unwrap();
            let bound = [9.0, 3.0, 7.0, 5.0][k - 1];
            search.record(k, None, Some(bound));
            assert!(search.requeue(k));
        }
        search.set_incumbent(1, 6.0);
        assert_eq!(search.pending(), vec![1, 3]);
    }
}
