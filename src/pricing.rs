//! Per aisle pricing: find the order subset with the largest reduced cost.

use crate::instance::Instance;
use crate::master_problem::column_pool::Pattern;
use crate::master_problem::duals::MasterDuals;
use crate::misc::Deadline;
use crate::oracle::{KnapsackProblem, Oracle, OracleError, SolveStatus};

/// Finite cap applied to knapsack profits.
pub const PROFIT_CAP: f64 = 1e9;

/// Minimum reduced cost for a pattern to count as improving.
pub const RC_TOL: f64 = 1e-6;

/// Range of units a single priced pattern may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricingWindow {
    pub min_units: u64,
    pub max_units: u64,
}

impl PricingWindow {
    /// A pattern only has to reach LB itself when it is the whole wave.
    pub fn for_aisle_count(instance: &Instance, aisles: usize) -> Self {
        PricingWindow {
            min_units: if aisles == 1 { instance.lower_bound() } else { 0 },
            max_units: instance.upper_bound(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PricedPattern {
    pub pattern: Pattern,
    pub reduced_cost: f64,
}

/// Outcome of pricing one aisle.
#[derive(Clone, Debug, PartialEq)]
pub struct PricingResult {
    pub aisle: usize,
    pub status: SolveStatus,
    /// Best pattern found, whatever its sign.
    pub best: Option<PricedPattern>,
}

impl PricingResult {
    pub fn improving(&self) -> Option<&PricedPattern> {
        self.best.as_ref().filter(|p| p.reduced_cost > RC_TOL)
    }

    /// Best reduced cost if the subproblem was solved to optimality. An
    /// aisle proven to have no pattern in the window contributes nothing.
    pub fn exact_bound(&self) -> Option<f64> {
        match self.status {
            SolveStatus::Optimal => Some(self.best.as_ref().map_or(f64::NEG_INFINITY, |p| p.reduced_cost)),
            SolveStatus::Infeasible => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }
}

pub trait PatternPricer: Sync {
    fn price(
        &self,
        instance: &Instance,
        aisle: usize,
        duals: &MasterDuals,
        window: PricingWindow,
        deadline: Deadline,
    ) -> Result<PricingResult, OracleError>;

    fn price_pattern_with_duals(&self, instance: &Instance, pattern: &Pattern, duals: &MasterDuals) -> f64 {
        duals.reduced_cost(instance, pattern)
    }
}

/// Solves the pricing problem as a 0/1 knapsack through an [`Oracle`].
pub struct KnapsackPricer<'a> {
    oracle: &'a dyn Oracle,
}

impl<'a> KnapsackPricer<'a> {
    pub fn new(oracle: &'a dyn Oracle) -> Self {
        KnapsackPricer { oracle }
    }
}

impl PatternPricer for KnapsackPricer<'_> {
    fn price(
        &self,
        instance: &Instance,
        aisle: usize,
        duals: &MasterDuals,
        window: PricingWindow,
        deadline: Deadline,
    ) -> Result<PricingResult, OracleError> {
        let prices: Vec<(usize, f64)> = (0..instance.num_orders())
            .filter(|&o| instance.order_fits_aisle(o, aisle))
            .filter(|&o| instance.order_units(o) <= window.max_units)
            .map(|o| (o, duals.order_price(instance, o)))
            .collect();

        // without a minimum, orders that do not pay for themselves never help
        let candidates: Vec<(usize, f64)> = if window.min_units == 0 {
            prices.into_iter().filter(|&(_, p)| p > 0.0).collect()
        } else {
            prices
        };

        let units: Vec<f64> = candidates
            .iter()
            .map(|&(o, _)| instance.order_units(o) as f64)
            .collect();
        let reachable: f64 = units.iter().sum();
        if (window.min_units as f64) > reachable {
            return Ok(PricingResult {
                aisle,
                status: SolveStatus::Infeasible,
                best: None,
            });
        }

        let mut problem = KnapsackProblem {
            profits: candidates
                .iter()
                .map(|&(_, p)| if p.is_nan() { 0.0 } else { p.clamp(-PROFIT_CAP, PROFIT_CAP) })
                .collect(),
            rows: Vec::new(),
        };
        let supply = instance.aisle_supply(aisle);
        for (i, &s) in supply.iter().enumerate() {
            let weights: Vec<f64> = candidates
                .iter()
                .map(|&(o, _)| f64::from(instance.order_demand(o)[i]))
                .collect();
            let total: f64 = weights.iter().sum();
            if total > f64::from(s) {
                problem.add_row(weights, 0.0, f64::from(s));
            }
        }
        problem.add_row(units, window.min_units as f64, window.max_units as f64);

        let out = self.oracle.solve_knapsack01(&problem, deadline)?;
        if out.status == SolveStatus::Infeasible || (out.selected.is_empty() && !out.status.is_optimal()) {
            return Ok(PricingResult {
                aisle,
                status: out.status,
                best: None,
            });
        }

        let pattern = Pattern::new(instance, aisle, out.selected.iter().map(|&j| candidates[j].0));
        let reduced_cost = self.price_pattern_with_duals(instance, &pattern, duals);
        Ok(PricingResult {
            aisle,
            status: out.status,
            best: Some(PricedPattern { pattern, reduced_cost }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::ScipOracle;

    fn instance() -> Instance {
        Instance::new(
            vec![vec![3, 0], vec![2, 1], vec![0, 2]],
            vec![vec![4, 2], vec![1, 1]],
            4,
            6,
        )
        .unwrap()
    }

    fn zero_duals(inst: &Instance) -> MasterDuals {
        MasterDuals {
            coverage: vec![0.0; inst.num_items()],
            orders: vec![0.0; inst.num_orders()],
            aisles: vec![0.0; inst.num_aisles()],
            ..MasterDuals::default()
        }
    }

    #[test]
    fn finds_most_units_within_aisle_and_window() {
        let inst = instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let duals = zero_duals(&inst);
        let res = pricer
            .price(&inst, 0, &duals, PricingWindow::for_aisle_count(&inst, 2), Deadline::never())
            .unwrap();
        let best = res.improving().unwrap();
        // {0, 2}: item0 3 <= 4, item1 2 <= 2, 5 units <= UB 6
        assert_eq!(best.pattern.orders, vec![0, 2]);
        assert!((best.reduced_cost - 5.0).abs() < 1e-6);
        assert!(best.pattern.is_feasible(&inst));
        assert_eq!(res.exact_bound(), Some(best.reduced_cost));
    }

    #[test]
    fn no_improving_pattern_under_expensive_duals() {
        let inst = instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let mut duals = zero_duals(&inst);
        duals.cardinality = 100.0;
        let res = pricer
            .price(&inst, 0, &duals, PricingWindow::for_aisle_count(&inst, 2), Deadline::never())
            .unwrap();
        assert!(res.improving().is_none());
        assert!(res.exact_bound().unwrap() < 0.0);
    }

    #[test]
    fn single_aisle_window_requires_lower_bound() {
        let inst = instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let duals = zero_duals(&inst);
        // aisle 1 only fits nothing that reaches LB = 4
        let res = pricer
            .price(&inst, 1, &duals, PricingWindow::for_aisle_count(&inst, 1), Deadline::never())
            .unwrap();
        assert_eq!(res.status, SolveStatus::Infeasible);
        assert!(res.best.is_none());
        assert_eq!(res.exact_bound(), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn limited_subproblem_gives_no_bound() {
        let inst = instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let duals = zero_duals(&inst);
        let res = pricer
            .price(
                &inst,
                0,
                &duals,
                PricingWindow::for_aisle_count(&inst, 2),
                Deadline::after(std::time::Duration::ZERO),
            )
            .unwrap();
        assert!(res.status.is_limit());
        assert_eq!(res.exact_bound(), None);
    }
}
