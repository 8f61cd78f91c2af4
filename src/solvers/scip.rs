use russcip::prelude::*;
use russcip::*;

use crate::misc::Deadline;
use crate::oracle::{ConstrSense, LinearProgram, LpOutcome, MipOutcome, Oracle, OracleError, SolveStatus};

fn unavailable(e: impl std::fmt::Debug) -> OracleError {
    OracleError::Unavailable(format!("{e:?}"))
}

#[derive(Clone, Debug, Default)]
pub struct OracleSettings {
    /// Shift of every random seed SCIP uses.
    pub seed: i32,
    /// Branch-and-bound nodes per MIP; hitting it reports an iteration limit.
    pub node_limit: Option<i64>,
}

/// Oracle backed by SCIP, the default backend.
///
/// Every call builds and drops its own SCIP instance, so pricing threads
/// never share solver state.
#[derive(Clone, Debug, Default)]
pub struct ScipOracle {
    pub settings: OracleSettings,
}

impl ScipOracle {
    pub fn new(settings: OracleSettings) -> Self {
        ScipOracle { settings }
    }

    fn model(&self, deadline: Deadline, relaxation: bool) -> Result<Model<ProblemCreated>, OracleError> {
        let mut model = Model::default()
            .hide_output()
            .set_obj_sense(ObjSense::Maximize)
            .set_int_param("randomization/randomseedshift", self.settings.seed)
            .map_err(unavailable)?;

        if relaxation {
            // row duals are read off the root LP of the untouched model
            model = model
                .set_presolving(ParamSetting::Off)
                .set_heuristics(ParamSetting::Off)
                .set_separating(ParamSetting::Off)
                .set_int_param("propagating/maxroundsroot", 0)
                .map_err(unavailable)?
                .set_int_param("propagating/maxrounds", 0)
                .map_err(unavailable)?;
        } else if let Some(nodes) = self.settings.node_limit {
            model = model.set_longint_param("limits/nodes", nodes).map_err(unavailable)?;
        }

        if let Some(rem) = deadline.remaining() {
            model = model.set_real_param("limits/time", rem.as_secs_f64()).map_err(unavailable)?;
        }
        Ok(model)
    }

    fn build(
        model: &mut Model<ProblemCreated>,
        lp: &LinearProgram,
        integral: bool,
    ) -> (Vec<Variable>, Vec<Constraint>) {
        let vars: Vec<Variable> = lp
            .variables
            .iter()
            .enumerate()
            .map(|(j, v)| {
                let vtype = match (integral && v.integer, v.lower == 0.0 && v.upper == 1.0) {
                    (true, true) => VarType::Binary,
                    (true, false) => VarType::Integer,
                    (false, _) => VarType::Continuous,
                };
                model.add_var(v.lower, v.upper, v.obj, &format!("x{j}"), vtype)
            })
            .collect();

        let rows = lp
            .constraints
            .iter()
            .map(|c| {
                let row = match c.sense {
                    ConstrSense::Less => cons().le(c.rhs),
                    ConstrSense::Greater => cons().ge(c.rhs),
                    ConstrSense::Equal => cons().eq(c.rhs),
                };
                let row = c
                    .coefficients
                    .iter()
                    .fold(row, |row, &(j, a)| row.coef(&vars[j], a));
                model.add(row)
            })
            .collect();

        (vars, rows)
    }

    fn status(status: Status) -> SolveStatus {
        match status {
            Status::Optimal => SolveStatus::Optimal,
            Status::Infeasible | Status::Inforunbd => SolveStatus::Infeasible,
            Status::Unbounded => SolveStatus::Unbounded,
            Status::TimeLimit => SolveStatus::TimeLimit,
            _ => SolveStatus::IterationLimit,
        }
    }
}

impl Oracle for ScipOracle {
    fn solve_lp(&self, lp: &LinearProgram, deadline: Deadline) -> Result<LpOutcome, OracleError> {
        if deadline.is_expired() {
            return Ok(LpOutcome::without_solution(SolveStatus::TimeLimit));
        }
        let mut model = self.model(deadline, true)?;
        let (vars, rows) = Self::build(&mut model, lp, false);
        let solved = model.solve();

        let status = Self::status(solved.status());
        if !status.is_optimal() {
            return Ok(LpOutcome::without_solution(status));
        }
        let sol = solved
            .best_sol()
            .ok_or_else(|| OracleError::Unavailable("optimal LP without a solution".to_string()))?;

        // SCIP minimises internally, so its duals of a maximisation carry the opposite sign.
        // Empty rows never reach the LP and keep a zero price.
        let duals = rows
            .iter()
            .map(|c| -c.transformed().and_then(|t| t.dual_sol()).unwrap_or(0.0))
            .collect();

        Ok(LpOutcome {
            status,
            objective: sol.obj_val(),
            primal: vars.iter().map(|v| sol.val(v)).collect(),
            duals,
        })
    }

    fn solve_mip(
        &self,
        lp: &LinearProgram,
        deadline: Deadline,
        warm_start: Option<&[f64]>,
    ) -> Result<MipOutcome, OracleError> {
        let warm_start = warm_start.filter(|x| lp.is_feasible(x, 1e-6));
        if deadline.is_expired() {
            return Ok(MipOutcome {
                status: SolveStatus::TimeLimit,
                objective: warm_start.map_or(f64::NEG_INFINITY, |x| lp.objective_value(x)),
                primal: warm_start.map(<[f64]>::to_vec),
            });
        }

        let mut model = self.model(deadline, false)?;
        let (vars, _) = Self::build(&mut model, lp, true);
        if let Some(start) = warm_start {
            let sol = model.create_orig_sol();
            for (v, &x) in vars.iter().zip(start) {
                sol.set_val(v, x);
            }
            // a rejected start only loses the hint
            let _ = model.add_sol(sol);
        }
        let solved = model.solve();

        let status = Self::status(solved.status());
        let Some(sol) = solved.best_sol() else {
            return Ok(MipOutcome {
                status,
                objective: f64::NEG_INFINITY,
                primal: None,
            });
        };
        Ok(MipOutcome {
            status,
            objective: sol.obj_val(),
            primal: Some(vars.iter().map(|v| sol.val(v)).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::KnapsackProblem;

    fn two_row_lp() -> LinearProgram {
        let mut lp = LinearProgram::new();
        let x = lp.add_var(1.0, 0.0, f64::INFINITY, false);
        let y = lp.add_var(1.0, 0.0, f64::INFINITY, false);
        let r0 = lp.add_constr(ConstrSense::Less, 4.0);
        lp.add_coef(r0, x, 1.0);
        lp.add_coef(r0, y, 2.0);
        let r1 = lp.add_constr(ConstrSense::Less, 6.0);
        lp.add_coef(r1, x, 3.0);
        lp.add_coef(r1, y, 1.0);
        lp
    }

    #[test]
    fn lp_duals_follow_maximisation_sign() {
        let lp = two_row_lp();
        let out = ScipOracle::default().solve_lp(&lp, Deadline::never()).unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        assert!((out.objective - 2.8).abs() < 1e-6);
        assert!((out.primal[0] - 1.6).abs() < 1e-6);
        assert!((out.primal[1] - 1.2).abs() < 1e-6);
        assert!((out.duals[0] - 0.4).abs() < 1e-6);
        assert!((out.duals[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn greater_rows_get_nonpositive_duals() {
        // max -x s.t. x >= 2
        let mut lp = LinearProgram::new();
        let x = lp.add_var(-1.0, 0.0, 10.0, false);
        let r = lp.add_constr(ConstrSense::Greater, 2.0);
        lp.add_coef(r, x, 1.0);

        let out = ScipOracle::default().solve_lp(&lp, Deadline::never()).unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        assert!((out.objective + 2.0).abs() < 1e-6);
        assert!((out.duals[0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn infeasible_lp_has_no_solution() {
        let mut lp = LinearProgram::new();
        let x = lp.add_var(1.0, 0.0, 1.0, false);
        let r = lp.add_constr(ConstrSense::Greater, 2.0);
        lp.add_coef(r, x, 1.0);

        let out = ScipOracle::default().solve_lp(&lp, Deadline::never()).unwrap();
        assert_eq!(out.status, SolveStatus::Infeasible);
        assert!(out.primal.is_empty() && out.duals.is_empty());
    }

    #[test]
    fn mip_respects_integrality() {
        let mut lp = two_row_lp();
        for v in &mut lp.variables {
            v.integer = true;
        }
        let out = ScipOracle::default()
            .solve_mip(&lp, Deadline::never(), Some(&[0.0, 0.0]))
            .unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        let x = out.primal.unwrap();
        assert!(lp.is_feasible(&x, 1e-6));
        assert!((out.objective - 2.0).abs() < 1e-6);
    }

    #[test]
    fn expired_deadline_returns_the_warm_start() {
        let mut lp = two_row_lp();
        for v in &mut lp.variables {
            v.integer = true;
        }
        let out = ScipOracle::default()
            .solve_mip(&lp, Deadline::after(std::time::Duration::ZERO), Some(&[1.0, 1.0]))
            .unwrap();
        assert_eq!(out.status, SolveStatus::TimeLimit);
        assert_eq!(out.primal, Some(vec![1.0, 1.0]));
        assert!((out.objective - 2.0).abs() < 1e-9);
    }

    #[test]
    fn knapsack_with_two_resources() {
        let mut problem = KnapsackProblem {
            profits: vec![5.0, 4.0, 3.0, 100.0],
            rows: Vec::new(),
        };
        // item 3 never fits
        problem.add_row(vec![2.0, 1.0, 1.0, 9.0], 0.0, 3.0);
        problem.add_row(vec![1.0, 2.0, 1.0, 0.0], 0.0, 3.0);

        let out = ScipOracle::default()
            .solve_knapsack01(&problem, Deadline::never())
            .unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        assert_eq!(out.selected, vec![0, 1]);
        assert!((out.objective - 9.0).abs() < 1e-6);
        assert!(problem.is_feasible(&out.selected));
    }

    #[test]
    fn knapsack_lower_window() {
        // must pick at least 4 weight; negative profits everywhere
        let mut problem = KnapsackProblem {
            profits: vec![-1.0, -3.0, -2.0],
            rows: Vec::new(),
        };
        problem.add_row(vec![2.0, 4.0, 3.0], 4.0, 10.0);

        let out = ScipOracle::default()
            .solve_knapsack01(&problem, Deadline::never())
            .unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        assert!((out.objective + 3.0).abs() < 1e-6);
        assert!(problem.is_feasible(&out.selected));
    }

    #[test]
    fn unreachable_minimum_is_infeasible() {
        let mut problem = KnapsackProblem {
            profits: vec![1.0, 1.0],
            rows: Vec::new(),
        };
        problem.add_row(vec![1.0, 1.0], 3.0, 5.0);
        let out = ScipOracle::default()
            .solve_knapsack01(&problem, Deadline::never())
            .unwrap();
        assert_eq!(out.status, SolveStatus::Infeasible);
        assert!(out.selected.is_empty());
    }

    #[test]
    fn empty_selection_is_valid_answer() {
        let problem = KnapsackProblem {
            profits: vec![-1.0, -2.0],
            rows: Vec::new(),
        };
        let out = ScipOracle::default()
            .solve_knapsack01(&problem, Deadline::never())
            .unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        assert!(out.selected.is_empty());
        assert!(out.objective.abs() < 1e-9);
    }
}
