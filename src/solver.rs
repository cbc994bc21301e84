use std::fs;
use std::path::Path;

use nalgebra::DVector;
use serde::Serialize;

use crate::common::{IntegratorType, OptionValue, SolverOptions};
use crate::constraints::{BoundField, StageConstraints};
use crate::cost::LinearLsCost;
use crate::discretization::Horizon;
use crate::error::{OcpError, SolverStatus};
use crate::ocp::Ocp;
use crate::qp::Iterate;
use crate::sqp;
use crate::stage::Stage;
use crate::stats::SolverStats;

/// Per-stage quantity addressed by [`OcpSolver::get`] and [`OcpSolver::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// State.
    X,
    /// Control, not available at the terminal node.
    U,
    /// Inequality multipliers `[lower; upper]`.
    Lam,
    /// Slacks `[lower; upper]`.
    T,
    /// Dynamics multiplier linking stage `i` to `i + 1`, not available at the terminal node.
    Pi,
    /// Cost reference.
    Yref,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::X => "x",
            Field::U => "u",
            Field::Lam => "lam",
            Field::T => "t",
            Field::Pi => "pi",
            Field::Yref => "yref",
        }
    }
}

/// Solver context owning the discretized problem, the primal-dual
/// trajectory and the statistics of the last solve.
///
/// `solve` borrows the context mutably, so trajectory access is only
/// possible between solves.
pub struct OcpSolver {
    model_name: String,
    horizon: Horizon,
    stages: Vec<Stage>,
    options: SolverOptions,
    iterate: Iterate,
    stats: SolverStats,
    status: Option<SolverStatus>,
    last_error: Option<OcpError>,
}

impl OcpSolver {
    /// Validates `ocp` and sets up every stage. All configuration errors
    /// surface here.
    pub fn new(ocp: Ocp) -> Result<Self, OcpError> {
        let (horizon, stages) = ocp.build()?;
        let iterate = Iterate::zeros(&stages);
        log::info!(
            "created solver for `{}`: N = {}, nx = {}, nu = {}, tf = {}",
            ocp.model.name(),
            horizon.n(),
            ocp.nx(),
            ocp.nu(),
            horizon.tf()
        );
        Ok(Self {
            model_name: ocp.model.name().to_string(),
            horizon,
            stages,
            options: ocp.solver_options,
            iterate,
            stats: SolverStats::default(),
            status: None,
            last_error: None,
        })
    }

    /// Number of shooting intervals.
    pub fn n(&self) -> usize {
        self.horizon.n()
    }

    pub fn shooting_nodes(&self) -> &[f64] {
        self.horizon.nodes()
    }

    pub fn time_steps(&self) -> &[f64] {
        self.horizon.time_steps()
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Runs the SQP iteration from the current trajectory.
    pub fn solve(&mut self) -> SolverStatus {
        let opts = self.options.clone();
        self.stats.reset();
        self.last_error = None;
        log::info!(
            "solving `{}` with {} / {} / {}",
            self.model_name,
            opts.nlp_solver_type,
            opts.qp_solver,
            opts.globalization
        );

        let status = match sqp::solve(&self.stages, &opts, &mut self.iterate, &mut self.stats) {
            Ok(status) => status,
            Err(err) => {
                log::error!("solve aborted: {err}");
                let status = err.status();
                self.last_error = Some(err);
                status
            }
        };
        log::info!(
            "status {} after {} SQP iterations ({} QP iterations), objective {:.6e}",
            status.code(),
            self.stats.sqp_iter,
            self.stats.qp_iter,
            self.stats.objective
        );
        self.status = Some(status);
        status
    }

    /// Status of the last solve.
    pub fn status(&self) -> Option<SolverStatus> {
        self.status
    }

    /// Error that aborted the last solve, if any.
    pub fn last_error(&self) -> Option<&OcpError> {
        self.last_error.as_ref()
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    pub fn statistics_table(&self) -> String {
        self.stats.table()
    }

    pub fn print_statistics(&self) {
        print!("{}", self.statistics_table());
    }

    fn check_stage(&self, stage: usize) -> Result<(), OcpError> {
        let n = self.n();
        if stage > n {
            return Err(OcpError::InvalidStage { stage, n });
        }
        Ok(())
    }

    fn slot(&self, stage: usize, field: Field) -> Result<&DVector<f64>, OcpError> {
        self.check_stage(stage)?;
        let n = self.n();
        let it = &self.iterate;
        Ok(match field {
            Field::X => &it.x[stage],
            Field::U if stage < n => &it.u[stage],
            Field::Pi if stage < n => &it.pi[stage],
            Field::U | Field::Pi => {
                return Err(OcpError::FieldUnavailable {
                    stage,
                    field: field.name(),
                })
            }
            Field::Lam => &it.lam[stage],
            Field::T => &it.t[stage],
            Field::Yref => &self.stages[stage].cost.yref,
        })
    }

    pub fn get(&self, stage: usize, field: Field) -> Result<DVector<f64>, OcpError> {
        self.slot(stage, field).cloned()
    }

    /// Overwrites a per-stage quantity. Takes effect at the next solve.
    pub fn set(&mut self, stage: usize, field: Field, values: &[f64]) -> Result<(), OcpError> {
        let expected = self.slot(stage, field)?.len();
        if values.len() != expected {
            return Err(OcpError::dims(
                format!("{} at stage {stage}", field.name()),
                expected,
                values.len(),
            ));
        }
        let it = &mut self.iterate;
        match field {
            Field::X => it.x[stage].copy_from_slice(values),
            Field::U => it.u[stage].copy_from_slice(values),
            Field::Pi => it.pi[stage].copy_from_slice(values),
            Field::Lam => it.lam[stage].copy_from_slice(values),
            Field::T => it.t[stage].copy_from_slice(values),
            Field::Yref => self.stages[stage].cost.set_yref(values)?,
        }
        Ok(())
    }

    /// Replaces a bound vector. At stage 0 `lbx`/`ubx` address the
    /// initial-state constraint.
    ///
    /// Lower and upper sides are set independently; a lower bound left
    /// above its upper bound makes the next [`solve`](Self::solve) fail
    /// with [`OcpError::Configuration`].
    pub fn constraints_set(&mut self, stage: usize, field: BoundField, values: &[f64]) -> Result<(), OcpError> {
        self.check_stage(stage)?;
        self.stages[stage]
            .constraints
            .set_bound(field, values, stage)
    }

    /// Changes a runtime option. The options in effect are snapshotted at
    /// the start of each solve.
    pub fn options_set(&mut self, name: &str, value: impl Into<OptionValue>) -> Result<(), OcpError> {
        let mut options = self.options.clone();
        options.set(name, value.into())?;
        log::debug!("option `{name}` updated");
        self.options = options;
        Ok(())
    }

    /// Resolved configuration as pretty-printed JSON.
    pub fn config_json(&self) -> Result<String, OcpError> {
        let dump = ConfigDump {
            model_name: &self.model_name,
            n: self.n(),
            nx: self.stages[0].nx,
            nu: self.stages[0].nu,
            shooting_nodes: self.horizon.nodes(),
            time_steps: self.horizon.time_steps(),
            stages: self
                .stages
                .iter()
                .map(|s| StageDump {
                    index: s.index,
                    dt: s.dt,
                    integrator: s.transition().and_then(|(_, integrator)| integrator.kind()),
                    cost: &s.cost,
                    constraints: &s.constraints,
                })
                .collect(),
            solver_options: &self.options,
        };
        Ok(serde_json::to_string_pretty(&dump)?)
    }

    /// Writes [`config_json`](Self::config_json) to `path`.
    pub fn dump_config(&self, path: impl AsRef<Path>) -> Result<(), OcpError> {
        let json = self.config_json()?;
        fs::write(path.as_ref(), json)?;
        log::info!("configuration written to {}", path.as_ref().display());
        Ok(())
    }
}

#[derive(Serialize)]
struct ConfigDump<'a> {
    model_name: &'a str,
    n: usize,
    nx: usize,
    nu: usize,
    shooting_nodes: &'a [f64],
    time_steps: &'a [f64],
    stages: Vec<StageDump<'a>>,
    solver_options: &'a SolverOptions,
}

#[derive(Serialize)]
struct StageDump<'a> {
    index: usize,
    dt: f64,
    integrator: Option<IntegratorType>,
    cost: &'a LinearLsCost,
    constraints: &'a StageConstraints,
}
