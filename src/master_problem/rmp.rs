//! Restricted master problem for a fixed aisle count `k`.
//!
//! ```text
//! max  sum_p units_p x_p - 1e6 dummy - 1e-3 slack
//!      sum_p (demand_p[i] - supply[a_p][i]) x_p          <= 0      (item i)
//!      sum_{p : o in p} x_p                              <= 1      (order o)
//!      sum_{p : a_p = a} x_p                             <= 1      (aisle a, = 1 pinned, <= 0 forbidden)
//!      sum_p units_p x_p + LB dummy + LB slack           >= LB
//!      sum_p units_p x_p + LB dummy + LB slack           <= UB
//!      sum_p x_p + k dummy                                = k
//! ```
//!
//! Pattern upper bounds are implied by the aisle rows and are not stated.

use crate::instance::Instance;
use crate::misc::{Deadline, HashSet};
use crate::oracle::{ConstrSense, KnapsackProblem, LinearProgram, Oracle, OracleError, SolveStatus};

use super::column_pool::{ColumnId, Pattern, PatternPool};
use super::duals::MasterDuals;

pub const DUMMY_COST: f64 = 1e6;
pub const SLACK_COST: f64 = 1e-3;

/// Magnitude cap for duals handed to pricing.
pub const DUAL_CAP: f64 = 1e9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SeedStrategy {
    /// Largest orders first until the aisle or the upper bound is exhausted.
    #[default]
    GreedyUnits,
    /// Orders ranked by units per share of the aisle's capacity they use.
    GreedyDensity,
    /// Up to `patterns_per_aisle` density knapsacks per aisle, each banning
    /// the orders of the previous ones.
    Knapsack { patterns_per_aisle: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AisleFixing {
    Free,
    Forced,
    Forbidden,
}

/// Side table tying LP columns back to master variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MasterVar {
    Dummy,
    Slack,
    Pattern(ColumnId),
}

/// Result of the last solve of an RMP.
#[derive(Clone, Debug, PartialEq)]
pub struct MasterSnapshot {
    pub status: SolveStatus,
    pub integral: bool,
    pub objective: f64,
    pub dummy: f64,
    pub slack: f64,
    /// Pattern values, empty unless a solution exists.
    pub values: Vec<(ColumnId, f64)>,
}

impl MasterSnapshot {
    fn without_solution(status: SolveStatus, integral: bool) -> Self {
        MasterSnapshot {
            status,
            integral,
            objective: f64::NEG_INFINITY,
            dummy: 0.0,
            slack: 0.0,
            values: Vec::new(),
        }
    }

    /// Columns at value > 0.5.
    pub fn selected(&self) -> Vec<ColumnId> {
        self.values
            .iter()
            .filter(|&&(_, v)| v > 0.5)
            .map(|&(id, _)| id)
            .collect()
    }
}

/// Row offsets of a formulated master.
#[derive(Clone, Copy, Debug)]
struct RowLayout {
    items: usize,
    orders: usize,
    aisles: usize,
}

impl RowLayout {
    fn order(&self, o: usize) -> usize {
        self.items + o
    }
    fn aisle(&self, a: usize) -> usize {
        self.items + self.orders + a
    }
    fn lower(&self) -> usize {
        self.items + self.orders + self.aisles
    }
    fn upper(&self) -> usize {
        self.lower() + 1
    }
    fn cardinality(&self) -> usize {
        self.lower() + 2
    }
}

pub struct RestrictedMasterProblem {
    k: usize,
    pool: PatternPool,
    fixing: Vec<AisleFixing>,
    artificials: bool,
    last: Option<MasterSnapshot>,
}

impl RestrictedMasterProblem {
    /// Empty master with one void pattern per aisle.
    pub fn new(instance: &Instance, k: usize) -> Self {
        let mut pool = PatternPool::new();
        for a in 0..instance.num_aisles() {
            pool.add_pattern(Pattern::void(a));
        }
        RestrictedMasterProblem {
            k,
            pool,
            fixing: vec![AisleFixing::Free; instance.num_aisles()],
            artificials: true,
            last: None,
        }
    }

    /// Master seeded with one or more heuristic patterns per aisle.
    pub fn build(
        instance: &Instance,
        k: usize,
        seeding: SeedStrategy,
        oracle: &dyn Oracle,
        deadline: Deadline,
    ) -> Result<Self, OracleError> {
        let mut rmp = RestrictedMasterProblem::new(instance, k);
        for a in 0..instance.num_aisles() {
            for pattern in seed_patterns(instance, a, seeding, oracle, deadline)? {
                rmp.add_pattern(instance, pattern);
            }
        }
        Ok(rmp)
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn pool(&self) -> &PatternPool {
        &self.pool
    }

    pub fn last_snapshot(&self) -> Option<&MasterSnapshot> {
        self.last.as_ref()
    }

    pub fn artificials_enabled(&self) -> bool {
        self.artificials
    }

    pub fn set_artificials(&mut self, enabled: bool) {
        self.artificials = enabled;
    }

    pub fn aisle_fixing(&self, aisle: usize) -> AisleFixing {
        self.fixing[aisle]
    }

    pub fn fix_aisle(&mut self, aisle: usize, fixing: AisleFixing) {
        self.fixing[aisle] = fixing;
    }

    /// Forces exactly `aisles` and forbids every other aisle; `k` follows.
    pub fn pin_aisles(&mut self, aisles: &[usize]) {
        for f in &mut self.fixing {
            *f = AisleFixing::Forbidden;
        }
        for &a in aisles {
            self.fixing[a] = AisleFixing::Forced;
        }
        self.k = self
            .fixing
            .iter()
            .filter(|&&f| f == AisleFixing::Forced)
            .count();
    }

    /// Aisles whose patterns may take a positive value.
    pub fn open_aisles(&self) -> Vec<usize> {
        (0..self.fixing.len())
            .filter(|&a| self.fixing[a] != AisleFixing::Forbidden)
            .collect()
    }

    /// Adds a pattern unless its key is known. Infeasible patterns are ignored.
    pub fn add_pattern(&mut self, instance: &Instance, pattern: Pattern) -> Option<ColumnId> {
        if !pattern.is_feasible(instance) {
            debug_assert!(false, "pattern exceeds aisle {} supply", pattern.aisle);
            return None;
        }
        self.pool.add_pattern(pattern)
    }

    /// Removes columns idle for `window` solves, never the ones currently selected.
    pub fn prune(&mut self, window: u32) -> Vec<ColumnId> {
        let protect = self
            .last
            .as_ref()
            .map(MasterSnapshot::selected)
            .unwrap_or_default();
        self.pool.prune(window, &protect)
    }

    fn formulate(&self, instance: &Instance, integral: bool) -> (LinearProgram, Vec<MasterVar>, RowLayout) {
        let layout = RowLayout {
            items: instance.num_items(),
            orders: instance.num_orders(),
            aisles: instance.num_aisles(),
        };
        let lb = instance.lower_bound() as f64;
        let ub = instance.upper_bound() as f64;
        let k = self.k as f64;

        let mut lp = LinearProgram::new();
        for _ in 0..layout.items {
            lp.add_constr(ConstrSense::Less, 0.0);
        }
        for _ in 0..layout.orders {
            lp.add_constr(ConstrSense::Less, 1.0);
        }
        for f in &self.fixing {
            match f {
                AisleFixing::Free => lp.add_constr(ConstrSense::Less, 1.0),
                AisleFixing::Forced => lp.add_constr(ConstrSense::Equal, 1.0),
                AisleFixing::Forbidden => lp.add_constr(ConstrSense::Less, 0.0),
            };
        }
        lp.add_constr(ConstrSense::Greater, lb);
        lp.add_constr(ConstrSense::Less, ub);
        lp.add_constr(ConstrSense::Equal, k);

        let mut vars = Vec::with_capacity(self.pool.count() + 2);

        if self.artificials {
            let dummy = lp.add_var(-DUMMY_COST, 0.0, f64::INFINITY, false);
            lp.add_coef(layout.lower(), dummy, lb);
            lp.add_coef(layout.upper(), dummy, lb);
            lp.add_coef(layout.cardinality(), dummy, k);
            vars.push(MasterVar::Dummy);

            let slack = lp.add_var(-SLACK_COST, 0.0, f64::INFINITY, false);
            lp.add_coef(layout.lower(), slack, lb);
            lp.add_coef(layout.upper(), slack, lb);
            vars.push(MasterVar::Slack);
        }

        for column in self.pool.iter() {
            let p = &column.pattern;
            let units = p.units as f64;
            let x = lp.add_var(units, 0.0, f64::INFINITY, integral);

            let demand = instance.demand_of(&p.orders);
            for (i, (&d, &s)) in demand.iter().zip(instance.aisle_supply(p.aisle)).enumerate() {
                lp.add_coef(i, x, d as f64 - f64::from(s));
            }
            for &o in &p.orders {
                lp.add_coef(layout.order(o), x, 1.0);
            }
            lp.add_coef(layout.aisle(p.aisle), x, 1.0);
            lp.add_coef(layout.lower(), x, units);
            lp.add_coef(layout.upper(), x, units);
            lp.add_coef(layout.cardinality(), x, 1.0);
            vars.push(MasterVar::Pattern(column.id));
        }

        (lp, vars, layout)
    }

    fn snapshot(status: SolveStatus, integral: bool, objective: f64, x: &[f64], vars: &[MasterVar]) -> MasterSnapshot {
        let mut snap = MasterSnapshot {
            status,
            integral,
            objective,
            dummy: 0.0,
            slack: 0.0,
            values: Vec::with_capacity(vars.len()),
        };
        for (&value, var) in x.iter().zip(vars) {
            match var {
                MasterVar::Dummy => snap.dummy = value,
                MasterVar::Slack => snap.slack = value,
                MasterVar::Pattern(id) => snap.values.push((*id, value)),
            }
        }
        snap
    }

    /// Solves the LP relaxation, records column activity and returns the
    /// duals when the solve was optimal.
    pub fn solve_relaxation(
        &mut self,
        instance: &Instance,
        oracle: &dyn Oracle,
        deadline: Deadline,
    ) -> Result<(MasterSnapshot, Option<MasterDuals>), OracleError> {
        let (lp, vars, layout) = self.formulate(instance, false);
        let out = oracle.solve_lp(&lp, deadline)?;

        if !out.status.is_optimal() {
            let snap = MasterSnapshot::without_solution(out.status, false);
            self.last = Some(snap.clone());
            return Ok((snap, None));
        }

        let snap = Self::snapshot(out.status, false, out.objective, &out.primal, &vars);
        self.pool.record_activity(snap.values.iter().copied());

        let y = &out.duals;
        let duals = MasterDuals {
            coverage: y[..layout.items].to_vec(),
            orders: y[layout.order(0)..layout.order(0) + layout.orders].to_vec(),
            aisles: y[layout.aisle(0)..layout.aisle(0) + layout.aisles].to_vec(),
            lower: y[layout.lower()],
            upper: y[layout.upper()],
            cardinality: y[layout.cardinality()],
        }
        .sanitized(DUAL_CAP);

        self.last = Some(snap.clone());
        Ok((snap, Some(duals)))
    }

    /// Solves with integral pattern variables.
    ///
    /// `warm` lists columns forming a known solution; without it the
    /// all-dummy point is offered when artificials are enabled.
    pub fn solve_integral(
        &mut self,
        instance: &Instance,
        oracle: &dyn Oracle,
        deadline: Deadline,
        warm: Option<&[ColumnId]>,
    ) -> Result<MasterSnapshot, OracleError> {
        let (lp, vars, _) = self.formulate(instance, true);

        let start: Option<Vec<f64>> = match warm {
            Some(ids) if !ids.is_empty() => {
                let ids: HashSet<ColumnId> = ids.iter().copied().collect();
                Some(
                    vars.iter()
                        .map(|v| match v {
                            MasterVar::Pattern(id) if ids.contains(id) => 1.0,
                            _ => 0.0,
                        })
                        .collect(),
                )
            }
            _ if self.artificials => Some(
                vars.iter()
                    .map(|v| if *v == MasterVar::Dummy { 1.0 } else { 0.0 })
                    .collect(),
            ),
            _ => None,
        };

        let out = oracle.solve_mip(&lp, deadline, start.as_deref())?;
        let snap = match &out.primal {
            Some(x) => Self::snapshot(out.status, true, out.objective, x, &vars),
            None => MasterSnapshot::without_solution(out.status, true),
        };
        self.last = Some(snap.clone());
        Ok(snap)
    }
}

/// Heuristic starting patterns for one aisle, all self-feasible and within UB.
pub fn seed_patterns(
    instance: &Instance,
    aisle: usize,
    seeding: SeedStrategy,
    oracle: &dyn Oracle,
    deadline: Deadline,
) -> Result<Vec<Pattern>, OracleError> {
    let mut patterns = Vec::new();
    match seeding {
        SeedStrategy::GreedyUnits => {
            let mut orders: Vec<usize> = (0..instance.num_orders()).collect();
            orders.sort_by_key(|&o| (std::cmp::Reverse(instance.order_units(o)), o));
            patterns.push(greedy_pack(instance, aisle, &orders));
        }
        SeedStrategy::GreedyDensity => {
            let mut ranked: Vec<(usize, f64)> = (0..instance.num_orders())
                .filter(|&o| instance.order_fits_aisle(o, aisle))
                .map(|o| (o, capacity_density(instance, o, aisle)))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            let orders: Vec<usize> = ranked.into_iter().map(|(o, _)| o).collect();
            patterns.push(greedy_pack(instance, aisle, &orders));
        }
        SeedStrategy::Knapsack { patterns_per_aisle } => {
            let mut banned = vec![false; instance.num_orders()];
            for _ in 0..patterns_per_aisle {
                let candidates: Vec<usize> = (0..instance.num_orders())
                    .filter(|&o| !banned[o] && instance.order_fits_aisle(o, aisle))
                    .filter(|&o| instance.order_units(o) > 0)
                    .collect();
                if candidates.is_empty() {
                    break;
                }

                let mut problem = KnapsackProblem {
                    profits: candidates
                        .iter()
                        .map(|&o| capacity_density(instance, o, aisle))
                        .collect(),
                    rows: Vec::new(),
                };
                for (i, &s) in instance.aisle_supply(aisle).iter().enumerate() {
                    let weights: Vec<f64> = candidates
                        .iter()
                        .map(|&o| f64::from(instance.order_demand(o)[i]))
                        .collect();
                    if weights.iter().any(|&w| w > 0.0) {
                        problem.add_row(weights, 0.0, f64::from(s));
                    }
                }
                problem.add_row(
                    candidates.iter().map(|&o| instance.order_units(o) as f64).collect(),
                    0.0,
                    instance.upper_bound() as f64,
                );

                let out = oracle.solve_knapsack01(&problem, deadline)?;
                if out.selected.is_empty() {
                    break;
                }
                let orders: Vec<usize> = out.selected.iter().map(|&j| candidates[j]).collect();
                for &o in &orders {
                    banned[o] = true;
                }
                let pattern = Pattern::new(instance, aisle, orders);
                if pattern.is_feasible(instance) && pattern.units <= instance.upper_bound() {
                    patterns.push(pattern);
                }
                if out.status.is_limit() {
                    break;
                }
            }
        }
    }
    patterns.retain(|p| !p.is_void());
    Ok(patterns)
}

/// Packs orders in the given sequence while supply and UB allow.
fn greedy_pack(instance: &Instance, aisle: usize, orders: &[usize]) -> Pattern {
    let mut cap: Vec<u64> = instance.aisle_supply(aisle).iter().map(|&s| u64::from(s)).collect();
    let ub = instance.upper_bound();
    let mut selected = Vec::new();
    let mut total = 0;

    for &o in orders {
        let units = instance.order_units(o);
        if units == 0 || total + units > ub {
            continue;
        }
        let demand = instance.order_demand(o);
        if demand.iter().zip(&cap).all(|(&d, &c)| u64::from(d) <= c) {
            for (c, &d) in cap.iter_mut().zip(demand) {
                *c -= u64::from(d);
            }
            selected.push(o);
            total += units;
        }
        if total == ub {
            break;
        }
    }
    Pattern::new(instance, aisle, selected)
}

/// Units of an order per fraction of the aisle it occupies.
fn capacity_density(instance: &Instance, order: usize, aisle: usize) -> f64 {
    let share: f64 = instance
        .order_demand(order)
        .iter()
        .zip(instance.aisle_supply(aisle))
        .filter(|(d, _)| **d > 0)
        .map(|(&d, &s)| if s == 0 { f64::INFINITY } else { f64::from(d) / f64::from(s) })
        .sum();
    if share > 0.0 {
        instance.order_units(order) as f64 / share
    } else {
        0.0
    }
}
