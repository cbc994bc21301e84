//! Multiple-shooting SQP solver for optimal control problems with linear
//! least-squares costs, box and linear inequality constraints, on uniform
//! or nonuniform time grids.
//!
//! A problem is described by an [`Ocp`] and turned into an [`OcpSolver`],
//! which owns the trajectory and exposes it per stage between solves.

mod common;
mod condensing;
mod constraints;
mod cost;
mod discretization;
mod error;
mod gnsf;
mod integrator;
mod ipm;
mod linsol;
mod math;
mod ocp;
mod pendulum;
mod qp;
mod solver;
mod sqp;
mod stage;
mod stats;
#[cfg(test)]
mod tests;
mod traits;

pub use common::*;
pub use condensing::{condense, expand, CondensedQp};
pub use constraints::{BoundField, StageConstraints};
pub use cost::LinearLsCost;
pub use discretization::Horizon;
pub use error::{OcpError, SolverStatus};
pub use gnsf::{GnsfMatrices, GnsfStructure, JsonStructureProvider};
pub use integrator::{ButcherTableau, Integrator, StepError, StepResult};
pub use ipm::{qp, qp_warm, DenseQp, QpSolution, WarmStart};
pub use linsol::LuSolver;
pub use ocp::{ConstraintSpec, CostSpec, Dims, Ocp};
pub use pendulum::Pendulum;
pub use qp::{OcpQp, OcpQpSolution, StageQp};
pub use solver::{Field, OcpSolver};
pub use stage::Stage;
pub use stats::{IterationStats, SolverStats, Timings};
pub use traits::*;
