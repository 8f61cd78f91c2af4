//! Solver backends for [`crate::oracle::Oracle`].

pub mod scip;

#[cfg(feature = "gurobi")]
pub mod gurobi;

pub use scip::{OracleSettings, ScipOracle};
