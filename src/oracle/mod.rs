//! Solver boundary used by the master problem and the pricing problem.
//!
//! Every model handed to an [`Oracle`] is a maximisation. Duals follow the
//! convention `d_j = c_j - sum_r y_r a_rj`, so `y >= 0` on `<=` rows,
//! `y <= 0` on `>=` rows and free on `=` rows.

use std::fmt::{Display, Formatter};

use crate::misc::Deadline;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstrSense {
    Less,
    Greater,
    Equal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub obj: f64,
    pub lower: f64,
    pub upper: f64,
    pub integer: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub coefficients: Vec<(usize, f64)>,
    pub sense: ConstrSense,
    pub rhs: f64,
}

/// Maximisation model `max c x` over linear rows and variable bounds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearProgram {
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
}

impl LinearProgram {
    pub fn new() -> Self {
        LinearProgram::default()
    }

    /// Adds a variable and returns its column index.
    pub fn add_var(&mut self, obj: f64, lower: f64, upper: f64, integer: bool) -> usize {
        self.variables.push(Variable { obj, lower, upper, integer });
        self.variables.len() - 1
    }

    /// Adds an empty row and returns its index.
    pub fn add_constr(&mut self, sense: ConstrSense, rhs: f64) -> usize {
        self.constraints.push(Constraint {
            coefficients: Vec::new(),
            sense,
            rhs,
        });
        self.constraints.len() - 1
    }

    /// Adds `coef * x_var` to a row. Zero coefficients are skipped.
    #[inline]
    pub fn add_coef(&mut self, row: usize, var: usize, coef: f64) {
        if coef != 0.0 {
            self.constraints[row].coefficients.push((var, coef));
        }
    }

    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constrs(&self) -> usize {
        self.constraints.len()
    }

    pub fn objective_value(&self, x: &[f64]) -> f64 {
        self.variables.iter().zip(x).map(|(v, x)| v.obj * x).sum()
    }

    /// Row activities `a_r x`.
    pub fn activities(&self, x: &[f64]) -> Vec<f64> {
        self.constraints
            .iter()
            .map(|c| c.coefficients.iter().map(|&(j, a)| a * x[j]).sum())
            .collect()
    }

    /// Checks bounds, rows and integrality within `tol`.
    pub fn is_feasible(&self, x: &[f64], tol: f64) -> bool {
        if x.len() != self.variables.len() {
            return false;
        }
        let bounds_ok = self.variables.iter().zip(x).all(|(v, &x)| {
            x >= v.lower - tol
                && x <= v.upper + tol
                && (!v.integer || (x - x.round()).abs() <= tol)
        });
        bounds_ok
            && self
                .constraints
                .iter()
                .zip(self.activities(x))
                .all(|(c, act)| match c.sense {
                    ConstrSense::Less => act <= c.rhs + tol,
                    ConstrSense::Greater => act >= c.rhs - tol,
                    ConstrSense::Equal => (act - c.rhs).abs() <= tol,
                })
    }

    /// Copy with every variable treated as continuous.
    pub fn relaxed(&self) -> LinearProgram {
        let mut lp = self.clone();
        for v in &mut lp.variables {
            v.integer = false;
        }
        lp
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    TimeLimit,
    IterationLimit,
}

impl SolveStatus {
    #[inline]
    pub fn is_optimal(self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }

    /// The call ran out of time or iterations rather than proving anything.
    #[inline]
    pub fn is_limit(self) -> bool {
        matches!(self, SolveStatus::TimeLimit | SolveStatus::IterationLimit)
    }
}

impl Display for SolveStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::Unbounded => "unbounded",
            SolveStatus::TimeLimit => "time limit",
            SolveStatus::IterationLimit => "iteration limit",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LpOutcome {
    pub status: SolveStatus,
    pub objective: f64,
    /// Empty unless optimal.
    pub primal: Vec<f64>,
    /// One entry per constraint, empty unless optimal.
    pub duals: Vec<f64>,
}

impl LpOutcome {
    pub fn without_solution(status: SolveStatus) -> Self {
        LpOutcome {
            status,
            objective: f64::NEG_INFINITY,
            primal: Vec::new(),
            duals: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MipOutcome {
    pub status: SolveStatus,
    pub objective: f64,
    /// Best incumbent found, possibly non-optimal when a limit was hit.
    pub primal: Option<Vec<f64>>,
}

/// One resource row of a 0/1 knapsack: `min <= sum weights_j z_j <= max`.
#[derive(Clone, Debug, PartialEq)]
pub struct KnapsackRow {
    pub weights: Vec<f64>,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KnapsackProblem {
    pub profits: Vec<f64>,
    pub rows: Vec<KnapsackRow>,
}

impl KnapsackProblem {
    pub fn num_items(&self) -> usize {
        self.profits.len()
    }

    /// Adds a resource row; `weights` must be as long as `profits`.
    pub fn add_row(&mut self, weights: Vec<f64>, min: f64, max: f64) {
        debug_assert_eq!(weights.len(), self.profits.len());
        self.rows.push(KnapsackRow { weights, min, max });
    }

    pub fn is_feasible(&self, selected: &[usize]) -> bool {
        self.rows.iter().all(|r| {
            let total: f64 = selected.iter().map(|&j| r.weights[j]).sum();
            total >= r.min - 1e-9 && total <= r.max + 1e-9
        })
    }

    /// Indices of items that can appear in some feasible selection.
    ///
    /// Only rows whose weights are all nonnegative can exclude an item on
    /// its own, any other row may be compensated by further items.
    fn usable_items(&self) -> Vec<usize> {
        (0..self.num_items())
            .filter(|&j| {
                self.rows.iter().all(|row| {
                    let monotone = row.weights.iter().all(|&w| w >= 0.0);
                    !monotone || row.weights[j] <= row.max + 1e-9
                })
            })
            .collect()
    }

    /// Binary program over the usable items, together with the item behind
    /// every column. `None` when some row cannot be met by any selection.
    ///
    /// Window sides that no selection can violate are left out.
    pub fn formulate(&self) -> Option<(LinearProgram, Vec<usize>)> {
        let items = self.usable_items();

        let mut lp = LinearProgram::new();
        for &j in &items {
            lp.add_var(self.profits[j], 0.0, 1.0, true);
        }

        for row in &self.rows {
            let weights: Vec<(usize, f64)> = items
                .iter()
                .enumerate()
                .map(|(var, &j)| (var, row.weights[j]))
                .filter(|&(_, w)| w != 0.0)
                .collect();
            let lowest: f64 = weights.iter().map(|&(_, w)| w.min(0.0)).sum();
            let highest: f64 = weights.iter().map(|&(_, w)| w.max(0.0)).sum();

            if row.min > highest + 1e-9 || row.max < lowest - 1e-9 {
                return None;
            }

            let needs_max = row.max.is_finite() && row.max < highest;
            let needs_min = row.min.is_finite() && row.min > lowest;
            let rows = match (needs_min, needs_max) {
                (true, true) if (row.max - row.min).abs() <= 1e-12 => {
                    vec![(ConstrSense::Equal, row.max)]
                }
                (true, true) => vec![(ConstrSense::Greater, row.min), (ConstrSense::Less, row.max)],
                (true, false) => vec![(ConstrSense::Greater, row.min)],
                (false, true) => vec![(ConstrSense::Less, row.max)],
                (false, false) => Vec::new(),
            };
            for (sense, rhs) in rows {
                let r = lp.add_constr(sense, rhs);
                for &(var, w) in &weights {
                    lp.add_coef(r, var, w);
                }
            }
        }
        Some((lp, items))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KnapsackOutcome {
    pub status: SolveStatus,
    pub objective: f64,
    pub selected: Vec<usize>,
}

/// Unrecoverable solver failures. Limits and infeasibility are statuses, not errors.
#[derive(Clone, Debug, PartialEq)]
pub enum OracleError {
    Unavailable(String),
    Unsupported(String),
}

impl Display for OracleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Unavailable(msg) => write!(f, "oracle unavailable: {msg}"),
            OracleError::Unsupported(msg) => write!(f, "model not supported by oracle: {msg}"),
        }
    }
}

impl std::error::Error for OracleError {}

/// LP / MIP / knapsack backend.
///
/// Implementations must return no later than (best effort) the deadline they
/// are handed and must be callable from several pricing threads at once.
pub trait Oracle: Sync {
    /// Solve the continuous relaxation; duals are reported for optimal solves.
    fn solve_lp(&self, lp: &LinearProgram, deadline: Deadline) -> Result<LpOutcome, OracleError>;

    /// Solve respecting integrality flags. A feasible warm start seeds the incumbent.
    fn solve_mip(
        &self,
        lp: &LinearProgram,
        deadline: Deadline,
        warm_start: Option<&[f64]>,
    ) -> Result<MipOutcome, OracleError>;

    /// 0/1 knapsack over several resource windows, solved as a MIP that
    /// starts from the empty selection whenever that one is feasible.
    fn solve_knapsack01(
        &self,
        problem: &KnapsackProblem,
        deadline: Deadline,
    ) -> Result<KnapsackOutcome, OracleError> {
        let Some((lp, items)) = problem.formulate() else {
            return Ok(KnapsackOutcome {
                status: SolveStatus::Infeasible,
                objective: f64::NEG_INFINITY,
                selected: Vec::new(),
            });
        };

        let empty = vec![0.0; lp.num_vars()];
        let warm = lp.is_feasible(&empty, 1e-9).then_some(empty.as_slice());
        let out = self.solve_mip(&lp, deadline, warm)?;

        let selected = out
            .primal
            .as_ref()
            .map(|x| {
                x.iter()
                    .zip(&items)
                    .filter(|(v, _)| **v > 0.5)
                    .map(|(_, &j)| j)
                    .collect()
            })
            .unwrap_or_default();

        Ok(KnapsackOutcome {
            status: out.status,
            objective: out.objective,
            selected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feasibility_check_respects_all_parts() {
        let mut lp = LinearProgram::new();
        let x = lp.add_var(1.0, 0.0, 1.0, true);
        let y = lp.add_var(1.0, 0.0, 4.0, false);
        let r = lp.add_constr(ConstrSense::Less, 3.0);
        lp.add_coef(r, x, 1.0);
        lp.add_coef(r, y, 1.0);

        assert!(lp.is_feasible(&[1.0, 2.0], 1e-9));
        assert!(!lp.is_feasible(&[1.0, 2.5], 1e-9));
        assert!(!lp.is_feasible(&[0.5, 0.0], 1e-9));
        assert!(lp.relaxed().is_feasible(&[0.5, 0.0], 1e-9));
        assert_eq!(lp.objective_value(&[1.0, 2.0]), 3.0);
    }

    #[test]
    fn knapsack_formulation_drops_oversized_items_and_slack_sides() {
        let mut problem = KnapsackProblem {
            profits: vec![5.0, 4.0, 3.0, 100.0],
            rows: Vec::new(),
        };
        problem.add_row(vec![2.0, 1.0, 1.0, 9.0], 0.0, 3.0);
        problem.add_row(vec![1.0, 1.0, 1.0, 0.0], 0.0, 10.0);

        let (lp, items) = problem.formulate().unwrap();
        assert_eq!(items, vec![0, 1, 2]);
        // the second row can never bind
        assert_eq!(lp.num_constrs(), 1);
        assert_eq!(lp.constraints[0].sense, ConstrSense::Less);
    }

    #[test]
    fn unreachable_window_has_no_formulation() {
        let mut problem = KnapsackProblem {
            profits: vec![1.0, 1.0],
            rows: Vec::new(),
        };
        problem.add_row(vec![1.0, 1.0], 3.0, 5.0);
        assert!(problem.formulate().is_none());
    }

    #[test]
    fn zero_coefficients_are_not_stored() {
        let mut lp = LinearProgram::new();
        let x = lp.add_var(0.0, 0.0, 1.0, false);
        let r = lp.add_constr(ConstrSense::Equal, 0.0);
        lp.add_coef(r, x, 0.0);
        assert!(lp.constraints[r].coefficients.is_empty());
    }
}
