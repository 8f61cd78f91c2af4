use gurobi::{attr, param, LinExpr, Maximize, VarType};

use crate::misc::Deadline;
use crate::oracle::{
    ConstrSense, LinearProgram, LpOutcome, MipOutcome, Oracle, OracleError, SolveStatus,
};

fn unavailable(e: gurobi::Error) -> OracleError {
    OracleError::Unavailable(format!("{e:?}"))
}

/// Oracle backed by a local Gurobi installation.
///
/// A fresh environment is created per call so pricing threads never share
/// solver state.
#[derive(Clone, Debug)]
pub struct GurobiOracle {
    pub seed: i32,
}

impl Default for GurobiOracle {
    fn default() -> Self {
        GurobiOracle { seed: 0 }
    }
}

impl GurobiOracle {
    fn env(&self, deadline: Deadline) -> Result<gurobi::Env, OracleError> {
        let mut env = gurobi::Env::new("").map_err(unavailable)?;
        env.set(param::Threads, 1).map_err(unavailable)?;
        env.set(param::Seed, self.seed).map_err(unavailable)?;
        env.set(param::OutputFlag, 0).map_err(unavailable)?;
        if let Some(rem) = deadline.remaining() {
            env.set(param::TimeLimit, rem.as_secs_f64()).map_err(unavailable)?;
        }
        Ok(env)
    }

    fn build(
        &self,
        lp: &LinearProgram,
        env: &gurobi::Env,
        integral: bool,
    ) -> Result<(gurobi::Model, Vec<gurobi::Var>, Vec<gurobi::Constr>), OracleError> {
        let mut model = gurobi::Model::new("wave", env).map_err(unavailable)?;
        model.set_objective(LinExpr::new(), Maximize).map_err(unavailable)?;

        let mut constrs = Vec::with_capacity(lp.num_constrs());
        for (r, c) in lp.constraints.iter().enumerate() {
            let sense = match c.sense {
                ConstrSense::Less => gurobi::Less,
                ConstrSense::Greater => gurobi::Greater,
                ConstrSense::Equal => gurobi::Equal,
            };
            constrs.push(
                model
                    .add_constr(&format!("r{r}"), LinExpr::new(), sense, c.rhs)
                    .map_err(unavailable)?,
            );
        }

        // column-wise, like the master problem in the pricing tests
        let mut columns: Vec<(Vec<gurobi::Constr>, Vec<f64>)> =
            vec![(Vec::new(), Vec::new()); lp.num_vars()];
        for (r, c) in lp.constraints.iter().enumerate() {
            for &(j, a) in &c.coefficients {
                columns[j].0.push(constrs[r].clone());
                columns[j].1.push(a);
            }
        }

        let mut vars = Vec::with_capacity(lp.num_vars());
        for (j, (v, (cs, vals))) in lp.variables.iter().zip(columns).enumerate() {
            let vtype = if integral && v.integer {
                VarType::Integer
            } else {
                VarType::Continuous
            };
            vars.push(
                model
                    .add_var(&format!("x{j}"), vtype, v.obj, v.lower, v.upper, &cs, &vals)
                    .map_err(unavailable)?,
            );
        }
        model.update().map_err(unavailable)?;
        Ok((model, vars, constrs))
    }

    fn status(model: &gurobi::Model) -> Result<SolveStatus, OracleError> {
        Ok(match model.status().map_err(unavailable)? {
            gurobi::Status::Optimal => SolveStatus::Optimal,
            gurobi::Status::Infeasible | gurobi::Status::InfOrUnbd => SolveStatus::Infeasible,
            gurobi::Status::Unbounded => SolveStatus::Unbounded,
            gurobi::Status::TimeLimit => SolveStatus::TimeLimit,
            _ => SolveStatus::IterationLimit,
        })
    }
}

impl Oracle for GurobiOracle {
    fn solve_lp(&self, lp: &LinearProgram, deadline: Deadline) -> Result<LpOutcome, OracleError> {
        if deadline.is_expired() {
            return Ok(LpOutcome::without_solution(SolveStatus::TimeLimit));
        }
        let env = self.env(deadline)?;
        let (mut model, vars, constrs) = self.build(lp, &env, false)?;
        model.optimize().map_err(unavailable)?;

        let status = Self::status(&model)?;
        if !status.is_optimal() {
            return Ok(LpOutcome::without_solution(status));
        }
        Ok(LpOutcome {
            status,
            objective: model.get(attr::ObjVal).map_err(unavailable)?,
            primal: model.get_values(attr::X, &vars).map_err(unavailable)?,
            duals: model.get_values(attr::Pi, &constrs).map_err(unavailable)?,
        })
    }

    fn solve_mip(
        &self,
        lp: &LinearProgram,
        deadline: Deadline,
        warm_start: Option<&[f64]>,
    ) -> Result<MipOutcome, OracleError> {
        if deadline.is_expired() {
            return Ok(MipOutcome {
                status: SolveStatus::TimeLimit,
                objective: f64::NEG_INFINITY,
                primal: warm_start.filter(|x| lp.is_feasible(x, 1e-6)).map(<[f64]>::to_vec),
            });
        }
        let env = self.env(deadline)?;
        let (mut model, vars, _) = self.build(lp, &env, true)?;
        if let Some(start) = warm_start {
            model.set_values(attr::Start, &vars, start).map_err(unavailable)?;
            model.update().map_err(unavailable)?;
        }
        model.optimize().map_err(unavailable)?;

        let status = Self::status(&model)?;
        let solutions: i32 = model.get(attr::SolCount).map_err(unavailable)?;
        if solutions == 0 {
            return Ok(MipOutcome {
                status,
                objective: f64::NEG_INFINITY,
                primal: None,
            });
        }
        Ok(MipOutcome {
            status,
            objective: model.get(attr::ObjVal).map_err(unavailable)?,
            primal: Some(model.get_values(attr::X, &vars).map_err(unavailable)?),
        })
    }
}
