//! Turning an optimized master into a wave, checking it and writing it out.

use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::Path;

use itertools::Itertools;

use crate::instance::Instance;
use crate::master_problem::column_pool::PatternPool;
use crate::master_problem::rmp::{MasterSnapshot, RestrictedMasterProblem};
use crate::oracle::SolveStatus;

/// Artificial values above this mean the solution leans on dummy or slack.
pub const ARTIFICIAL_TOL: f64 = 1e-6;

/// Orders served by one aisle of a wave.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AislePick {
    pub aisle: usize,
    pub orders: Vec<usize>,
}

/// A selected set of orders and aisles.
#[derive(Clone, Debug, PartialEq)]
pub struct Wave {
    /// Units per aisle.
    pub objective: f64,
    pub units: u64,
    /// Sorted order ids.
    pub orders: Vec<usize>,
    /// Sorted aisle ids.
    pub aisles: Vec<usize>,
    pub picks: Vec<AislePick>,
}

impl Wave {
    pub fn density(units: u64, aisles: usize) -> f64 {
        units as f64 / aisles.max(1) as f64
    }

    /// Builds a wave from per aisle picks.
    pub fn from_picks(instance: &Instance, mut picks: Vec<AislePick>) -> Wave {
        picks.sort_by_key(|p| p.aisle);
        let orders: Vec<usize> = picks
            .iter()
            .flat_map(|p| p.orders.iter().copied())
            .sorted_unstable()
            .dedup()
            .collect();
        let aisles: Vec<usize> = picks.iter().map(|p| p.aisle).dedup().collect();
        let units = instance.units_of(&orders);
        Wave {
            objective: Wave::density(units, aisles.len()),
            units,
            orders,
            aisles,
            picks,
        }
    }

    /// Higher density wins, ties go to fewer aisles.
    pub fn is_better_than(&self, other: &Wave) -> bool {
        let eps = 1e-9 * (1.0 + other.objective.abs());
        self.objective > other.objective + eps
            || (self.objective >= other.objective - eps && self.aisles.len() < other.aisles.len())
    }

    /// Re-checks every property an accepted wave must satisfy.
    pub fn verify(&self, instance: &Instance) -> Result<(), Rejection> {
        if self.orders.is_empty() || self.units == 0 {
            return Err(Rejection::EmptyWave);
        }
        let (lower, upper) = (instance.lower_bound(), instance.upper_bound());
        if self.units < lower || self.units > upper {
            return Err(Rejection::UnitsOutOfRange {
                units: self.units,
                lower,
                upper,
            });
        }

        let demand = instance.demand_of(&self.orders);
        let supply = instance.supply_of(&self.aisles);
        if let Some((item, (&d, &s))) = demand.iter().zip(&supply).enumerate().find(|(_, (d, s))| d > s) {
            return Err(Rejection::CoverageViolated {
                item,
                demand: d,
                supply: s,
            });
        }

        let served: usize = self.picks.iter().map(|p| p.orders.len()).sum();
        let self_sufficient = self.picks.iter().all(|p| instance.fits_aisle(p.aisle, &p.orders));
        if served != self.orders.len() || !self_sufficient {
            return Err(Rejection::InconsistentPicks);
        }
        Ok(())
    }

    /// Plain text result: order count, order ids, aisle count, aisle ids.
    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "{}", self.orders.len())?;
        for o in &self.orders {
            writeln!(out, "{o}")?;
        }
        writeln!(out, "{}", self.aisles.len())?;
        for a in &self.aisles {
            writeln!(out, "{a}")?;
        }
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_to(std::io::BufWriter::new(file))
    }
}

impl Display for Wave {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.3} units/aisle ({} units, {} orders, aisles {:?})",
            self.objective,
            self.units,
            self.orders.len(),
            self.aisles
        )
    }
}

/// Why an optimized master did not yield a wave.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    NotOptimal(SolveStatus),
    ArtificialActive { dummy: f64, slack: f64 },
    /// Nothing to pick. Orders without units are never packed into
    /// patterns, so a wave made of them alone is rejected even when
    /// `LB = 0` would admit it.
    EmptyWave,
    UnitsOutOfRange { units: u64, lower: u64, upper: u64 },
    CoverageViolated { item: usize, demand: u64, supply: u64 },
    AisleCountMismatch { expected: usize, found: usize },
    InconsistentPicks,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NotOptimal(status) => write!(f, "master not optimal ({status})"),
            Rejection::ArtificialActive { dummy, slack } => {
                write!(f, "artificial columns in use (dummy {dummy:.2e}, slack {slack:.2e})")
            }
            Rejection::EmptyWave => write!(f, "no unit picked"),
            Rejection::UnitsOutOfRange { units, lower, upper } => {
                write!(f, "{units} units outside [{lower}, {upper}]")
            }
            Rejection::CoverageViolated { item, demand, supply } => {
                write!(f, "item {item}: demand {demand} exceeds supply {supply}")
            }
            Rejection::AisleCountMismatch { expected, found } => {
                write!(f, "expected {expected} aisles, found {found}")
            }
            Rejection::InconsistentPicks => write!(f, "picks do not partition the orders"),
        }
    }
}

impl std::error::Error for Rejection {}

pub struct SolutionExtractor;

impl SolutionExtractor {
    /// Wave from the last solve of `rmp`.
    pub fn extract(instance: &Instance, rmp: &RestrictedMasterProblem) -> Result<Wave, Rejection> {
        match rmp.last_snapshot() {
            Some(snap) => Self::extract_snapshot(instance, rmp.pool(), snap, rmp.k()),
            None => Err(Rejection::NotOptimal(SolveStatus::IterationLimit)),
        }
    }

    pub fn extract_snapshot(
        instance: &Instance,
        pool: &PatternPool,
        snapshot: &MasterSnapshot,
        k: usize,
    ) -> Result<Wave, Rejection> {
        if !snapshot.status.is_optimal() {
            return Err(Rejection::NotOptimal(snapshot.status));
        }
        if snapshot.dummy > ARTIFICIAL_TOL || snapshot.slack > ARTIFICIAL_TOL {
            return Err(Rejection::ArtificialActive {
                dummy: snapshot.dummy,
                slack: snapshot.slack,
            });
        }

        let picks: Vec<AislePick> = snapshot
            .selected()
            .into_iter()
            .filter_map(|id| pool.get_column(id))
            .map(|c| AislePick {
                aisle: c.pattern.aisle,
                orders: c.pattern.orders.clone(),
            })
            .collect();

        let wave = Wave::from_picks(instance, picks);
        if wave.aisles.len() != k {
            return Err(Rejection::AisleCountMismatch {
                expected: k,
                found: wave.aisles.len(),
            });
        }
        wave.verify(instance)?;
        Ok(wave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new(vec![vec![2, 0], vec![0, 3]], vec![vec![2, 1], vec![0, 3]], 3, 5).unwrap()
    }

    fn wave(inst: &Instance, picks: &[(usize, &[usize])]) -> Wave {
        Wave::from_picks(
            inst,
            picks
                .iter()
                .map(|&(aisle, orders)| AislePick {
                    aisle,
                    orders: orders.to_vec(),
                })
                .collect(),
        )
    }

    #[test]
    fn verify_accepts_and_rejects() {
        let inst = instance();
        let ok = wave(&inst, &[(0, &[0]), (1, &[1])]);
        assert_eq!(ok.units, 5);
        assert!((ok.objective - 2.5).abs() < 1e-12);
        assert_eq!(ok.verify(&inst), Ok(()));

        let low = wave(&inst, &[(0, &[0])]);
        assert!(matches!(low.verify(&inst), Err(Rejection::UnitsOutOfRange { units: 2, .. })));

        let empty = wave(&inst, &[(0, &[])]);
        assert_eq!(empty.verify(&inst), Err(Rejection::EmptyWave));

        let uncovered = wave(&inst, &[(0, &[0, 1])]);
        assert!(matches!(
            uncovered.verify(&inst),
            Err(Rejection::CoverageViolated { item: 1, demand: 3, supply: 1 })
        ));
    }

    #[test]
    fn zero_unit_orders_alone_make_no_wave() {
        let inst = Instance::new(vec![vec![0, 0], vec![1, 0]], vec![vec![1, 1]], 0, 5).unwrap();
        let idle = wave(&inst, &[(0, &[0])]);
        assert_eq!(idle.units, 0);
        assert_eq!(idle.verify(&inst), Err(Rejection::EmptyWave));

        let mixed = wave(&inst, &[(0, &[0, 1])]);
        assert_eq!(mixed.verify(&inst), Ok(()));
    }

    #[test]
    fn better_means_denser_then_fewer_aisles() {
        let inst = instance();
        let two = wave(&inst, &[(0, &[0]), (1, &[1])]);
        let mut one = wave(&inst, &[(1, &[1])]);
        assert!(one.is_better_than(&two));
        one.objective = two.objective;
        assert!(one.is_better_than(&two));
        assert!(!two.is_better_than(&one));
    }

    #[test]
    fn writes_plain_text() {
        let inst = instance();
        let w = wave(&inst, &[(1, &[1]), (0, &[0])]);
        let mut buf = Vec::new();
        w.write_to(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "2\n0\n1\n2\n0\n1\n");
    }
}
