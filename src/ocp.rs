use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::common::{IntegratorType, SolverOptions};
use crate::constraints::StageConstraints;
use crate::cost::LinearLsCost;
use crate::discretization::Horizon;
use crate::error::OcpError;
use crate::gnsf::GnsfMatrices;
use crate::integrator::Integrator;
use crate::stage::Stage;
use crate::traits::{Dynamics, StructureProvider};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Dims {
    /// Number of shooting intervals.
    pub n: usize,
}

/// Linear least-squares cost shared by the intermediate stages, plus the
/// terminal cost. Empty matrices mean no cost on that part.
#[derive(Debug, Clone, Serialize)]
pub struct CostSpec {
    pub vx: DMatrix<f64>,
    pub vu: DMatrix<f64>,
    pub w: DMatrix<f64>,
    pub yref: DVector<f64>,
    pub vx_e: DMatrix<f64>,
    pub w_e: DMatrix<f64>,
    pub yref_e: DVector<f64>,
}

impl Default for CostSpec {
    fn default() -> Self {
        Self {
            vx: DMatrix::zeros(0, 0),
            vu: DMatrix::zeros(0, 0),
            w: DMatrix::zeros(0, 0),
            yref: DVector::zeros(0),
            vx_e: DMatrix::zeros(0, 0),
            w_e: DMatrix::zeros(0, 0),
            yref_e: DVector::zeros(0),
        }
    }
}

/// Constraint data. Path bounds apply to stages `1..N` for states and
/// `0..N` for controls, `x0` fixes the initial state, the `_e` fields
/// apply to the terminal node.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintSpec {
    pub x0: Option<DVector<f64>>,
    pub idxbu: Vec<usize>,
    pub lbu: DVector<f64>,
    pub ubu: DVector<f64>,
    pub idxbx: Vec<usize>,
    pub lbx: DVector<f64>,
    pub ubx: DVector<f64>,
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
    pub lg: DVector<f64>,
    pub ug: DVector<f64>,
    pub idxbx_e: Vec<usize>,
    pub lbx_e: DVector<f64>,
    pub ubx_e: DVector<f64>,
    pub c_e: DMatrix<f64>,
    pub lg_e: DVector<f64>,
    pub ug_e: DVector<f64>,
}

impl Default for ConstraintSpec {
    fn default() -> Self {
        let empty = DVector::zeros(0);
        Self {
            x0: None,
            idxbu: Vec::new(),
            lbu: empty.clone(),
            ubu: empty.clone(),
            idxbx: Vec::new(),
            lbx: empty.clone(),
            ubx: empty.clone(),
            c: DMatrix::zeros(0, 0),
            d: DMatrix::zeros(0, 0),
            lg: empty.clone(),
            ug: empty.clone(),
            idxbx_e: Vec::new(),
            lbx_e: empty.clone(),
            ubx_e: empty.clone(),
            c_e: DMatrix::zeros(0, 0),
            lg_e: empty.clone(),
            ug_e: empty,
        }
    }
}

/// Optimal control problem definition, validated by
/// [`OcpSolver::new`](crate::OcpSolver::new).
pub struct Ocp {
    pub model: Arc<dyn Dynamics>,
    pub dims: Dims,
    pub cost: CostSpec,
    pub constraints: ConstraintSpec,
    pub solver_options: SolverOptions,
    /// Required when any stage uses the GNSF integrator.
    pub structure_provider: Option<Box<dyn StructureProvider>>,
    /// Stage-local dynamics, same dimensions as `model`.
    pub stage_models: BTreeMap<usize, Arc<dyn Dynamics>>,
}

impl Ocp {
    pub fn new(model: Arc<dyn Dynamics>, n: usize) -> Self {
        Self {
            model,
            dims: Dims { n },
            cost: CostSpec::default(),
            constraints: ConstraintSpec::default(),
            solver_options: SolverOptions::default(),
            structure_provider: None,
            stage_models: BTreeMap::new(),
        }
    }

    pub fn nx(&self) -> usize {
        self.model.nx()
    }

    pub fn nu(&self) -> usize {
        self.model.nu()
    }

    fn model_at(&self, stage: usize) -> &Arc<dyn Dynamics> {
        self.stage_models.get(&stage).unwrap_or(&self.model)
    }

    /// Checks the definition and binds models, integrators, costs and
    /// constraints to every stage of the time grid.
    pub(crate) fn build(&self) -> Result<(Horizon, Vec<Stage>), OcpError> {
        let n = self.dims.n;
        let (nx, nu) = (self.nx(), self.nu());
        let opts = &self.solver_options;
        opts.validate()?;

        for (&stage, model) in &self.stage_models {
            if stage >= n {
                return Err(OcpError::InvalidStage { stage, n });
            }
            if model.nx() != nx || model.nu() != nu {
                return Err(OcpError::config(format!(
                    "model `{}` at stage {stage} has nx = {}, nu = {}, expected nx = {nx}, nu = {nu}",
                    model.name(),
                    model.nx(),
                    model.nu()
                )));
            }
        }
        if let Some(&stage) = opts.integrator_overrides.keys().find(|&&s| s >= n) {
            return Err(OcpError::InvalidStage { stage, n });
        }
        if let Some(cond_n) = opts.qp_solver_cond_n {
            if cond_n == 0 || cond_n > n {
                return Err(OcpError::config(format!(
                    "qp_solver_cond_n ({cond_n}) must lie in 1..={n}"
                )));
            }
        }

        let allow_zero_step = (0..n).all(|i| self.model_at(i).allows_zero_step());
        let horizon = Horizon::build(
            opts.tf,
            n,
            opts.shooting_nodes.as_deref(),
            opts.time_steps.as_deref(),
            allow_zero_step,
        )?;

        let cost = self.stage_cost(nx, nu)?;
        let cost_e = self.terminal_cost(nx)?;
        if let Some(scaling) = &opts.cost_scaling {
            if scaling.len() != n + 1 {
                return Err(OcpError::dims("cost_scaling", n + 1, scaling.len()));
            }
        }
        let scaling_at = |i: usize, dt: f64| opts.cost_scaling.as_ref().map_or(dt, |s| s[i]);

        let mut structures: BTreeMap<String, GnsfMatrices> = BTreeMap::new();
        let mut stages = Vec::with_capacity(n + 1);
        for (i, &dt) in horizon.time_steps().iter().enumerate() {
            let model = self.model_at(i);
            let config = opts.integrator_at(i);
            let gnsf = if config.kind == IntegratorType::Gnsf && dt > 0.0 {
                if !structures.contains_key(model.name()) {
                    let gnsf = self.load_structure(model.as_ref())?;
                    structures.insert(model.name().to_string(), gnsf);
                }
                structures.get(model.name())
            } else {
                None
            };
            let integrator = Integrator::new(config, dt, model.as_ref(), gnsf)?;
            log::debug!(
                "stage {i}: dt = {dt}, integrator {}",
                integrator
                    .kind()
                    .map_or_else(|| "none (zero-length)".to_string(), |k| k.to_string())
            );
            stages.push(Stage::interval(
                i,
                dt,
                Arc::clone(model),
                integrator,
                cost.clone().with_scaling(scaling_at(i, dt))?,
                self.path_constraints(i, nx, nu)?,
            ));
        }
        stages.push(Stage::terminal(
            n,
            nx,
            cost_e.with_scaling(scaling_at(n, 1.0))?,
            self.terminal_constraints(nx)?,
        ));

        Ok((horizon, stages))
    }

    fn load_structure(&self, model: &dyn Dynamics) -> Result<GnsfMatrices, OcpError> {
        let provider = self
            .structure_provider
            .as_ref()
            .ok_or_else(|| OcpError::MissingStructuralModel {
                model: model.name().to_string(),
                reason: "no structural model provider configured".to_string(),
            })?;
        let structure =
            provider
                .structure(model.name())
                .map_err(|err| OcpError::MissingStructuralModel {
                    model: model.name().to_string(),
                    reason: format!("{err:#}"),
                })?;
        GnsfMatrices::new(&structure, model)
    }

    fn stage_cost(&self, nx: usize, nu: usize) -> Result<LinearLsCost, OcpError> {
        let c = &self.cost;
        if c.w.nrows() == 0 && c.vx.nrows() == 0 && c.vu.nrows() == 0 {
            return LinearLsCost::new(
                DMatrix::zeros(0, nx),
                DMatrix::zeros(0, nu),
                DMatrix::zeros(0, 0),
                DVector::zeros(0),
            );
        }
        if c.vx.ncols() != nx {
            return Err(OcpError::dims("Vx columns", nx, c.vx.ncols()));
        }
        if c.vu.ncols() != nu {
            return Err(OcpError::dims("Vu columns", nu, c.vu.ncols()));
        }
        LinearLsCost::new(c.vx.clone(), c.vu.clone(), c.w.clone(), c.yref.clone())
    }

    fn terminal_cost(&self, nx: usize) -> Result<LinearLsCost, OcpError> {
        let c = &self.cost;
        if c.w_e.nrows() == 0 && c.vx_e.nrows() == 0 {
            return LinearLsCost::terminal(DMatrix::zeros(0, nx), DMatrix::zeros(0, 0), DVector::zeros(0));
        }
        if c.vx_e.ncols() != nx {
            return Err(OcpError::dims("Vx_e columns", nx, c.vx_e.ncols()));
        }
        LinearLsCost::terminal(c.vx_e.clone(), c.w_e.clone(), c.yref_e.clone())
    }

    fn path_constraints(&self, stage: usize, nx: usize, nu: usize) -> Result<StageConstraints, OcpError> {
        let spec = &self.constraints;
        let mut cons = StageConstraints::unconstrained(nx, nu);
        cons.idxbu = spec.idxbu.clone();
        cons.lbu = spec.lbu.clone();
        cons.ubu = spec.ubu.clone();

        if stage == 0 {
            if let Some(x0) = &spec.x0 {
                if x0.len() != nx {
                    return Err(OcpError::dims("x0", nx, x0.len()));
                }
                cons.idxbx = (0..nx).collect();
                cons.lbx = x0.clone();
                cons.ubx = x0.clone();
            }
        } else {
            cons.idxbx = spec.idxbx.clone();
            cons.lbx = spec.lbx.clone();
            cons.ubx = spec.ubx.clone();
        }

        if spec.lg.len() > 0 || spec.c.nrows() > 0 || spec.d.nrows() > 0 {
            // a missing C or D means no dependence on that part
            let ng = spec.lg.len();
            cons.c = if spec.c.is_empty() { DMatrix::zeros(ng, nx) } else { spec.c.clone() };
            cons.d = if spec.d.is_empty() { DMatrix::zeros(ng, nu) } else { spec.d.clone() };
            cons.lg = spec.lg.clone();
            cons.ug = spec.ug.clone();
        }
        cons.validate(nx, nu, stage)?;
        Ok(cons)
    }

    fn terminal_constraints(&self, nx: usize) -> Result<StageConstraints, OcpError> {
        let spec = &self.constraints;
        let n = self.dims.n;
        let mut cons = StageConstraints::unconstrained(nx, 0);
        cons.idxbx = spec.idxbx_e.clone();
        cons.lbx = spec.lbx_e.clone();
        cons.ubx = spec.ubx_e.clone();
        if spec.lg_e.len() > 0 || spec.c_e.nrows() > 0 {
            cons.c = spec.c_e.clone();
            cons.lg = spec.lg_e.clone();
            cons.ug = spec.ug_e.clone();
            cons.d = DMatrix::zeros(spec.c_e.nrows(), 0);
        }
        cons.validate(nx, 0, n)?;
        Ok(cons)
    }
}
