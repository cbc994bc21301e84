use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::OcpError;

/// QP sub-solver and condensing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QpSolver {
    /// Eliminates states inside `qp_solver_cond_n` blocks of stages.
    PartialCondensingIpm,
    /// Eliminates every state but the initial one.
    FullCondensingIpm,
}

/// Curvature model used in the QP objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HessianApprox {
    GaussNewton,
    /// Gauss-Newton plus the second-order dynamics term, eigenvalue projected.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntegratorType {
    /// Explicit Runge-Kutta.
    Erk,
    /// Implicit (Gauss-Legendre) Runge-Kutta.
    Irk,
    /// Implicit Runge-Kutta over a generalized nonlinear static feedback structure.
    Gnsf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NlpSolverType {
    Sqp,
    /// Real-time iteration: one QP per call.
    SqpRti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Globalization {
    FixedStep,
    MeritBacktracking,
}

macro_rules! option_names {
    ($ty:ident { $($name:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = OcpError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(OcpError::config(format!(
                        "unknown {} `{}`", stringify!($ty), s
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($ty::$variant => $name,)+
                };
                f.write_str(name)
            }
        }
    };
}

option_names!(QpSolver {
    "PARTIAL_CONDENSING_IPM" => PartialCondensingIpm,
    "FULL_CONDENSING_IPM" => FullCondensingIpm,
});
option_names!(HessianApprox {
    "GAUSS_NEWTON" => GaussNewton,
    "EXACT" => Exact,
});
option_names!(IntegratorType {
    "ERK" => Erk,
    "IRK" => Irk,
    "GNSF" => Gnsf,
});
option_names!(NlpSolverType {
    "SQP" => Sqp,
    "SQP_RTI" => SqpRti,
});
option_names!(Globalization {
    "FIXED_STEP" => FixedStep,
    "MERIT_BACKTRACKING" => MeritBacktracking,
});

/// Integrator settings of one shooting interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegratorConfig {
    pub kind: IntegratorType,
    /// Runge-Kutta stages. Defaults to 4 for ERK and 2 for IRK/GNSF.
    pub num_stages: Option<usize>,
    /// Integration steps per shooting interval.
    pub num_steps: usize,
    /// Newton iteration budget of the implicit schemes.
    pub newton_iter: usize,
    /// Relative residual tolerance of the implicit schemes.
    pub newton_tol: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            kind: IntegratorType::Erk,
            num_stages: None,
            num_steps: 1,
            newton_iter: 10,
            newton_tol: 1e-8,
        }
    }
}

impl IntegratorConfig {
    pub fn new(kind: IntegratorType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}

/// Options of the interior point QP sub-solver.
#[derive(Debug, Clone, Serialize)]
pub struct QpOptions {
    /// Termination tolerance for feasibility condition.
    pub feas_tol: f64,
    /// Termination tolerance for gradient condition.
    pub grad_tol: f64,
    /// Termination tolerance for complementarity condition.
    pub comp_tol: f64,
    /// Termination tolerance for cost condition.
    pub cost_tol: f64,

    /// Maximum number of iterations.
    pub max_it: usize,

    /// Constant used in alpha updates.
    pub xi: f64,
    /// Centering parameter.
    pub sigma: f64,
    /// Used to initialize slack variables.
    pub z0: f64,
    /// Initialize slacks from the constraint values at the starting point
    /// instead of the constant `z0`.
    pub init_slacks_from_constraints: bool,
    /// Exits if either alpha parameter becomes smaller than this value.
    pub alpha_min: f64,
    /// KT multipliers smaller than this value for non-binding constraints are forced to zero.
    pub mu_threshold: f64,
    /// Exits if the 2-norm of the reduced Newton step exceeds this value.
    pub max_step_size: f64,
}

impl Default for QpOptions {
    fn default() -> Self {
        Self {
            feas_tol: 1e-8,
            grad_tol: 1e-8,
            comp_tol: 1e-8,
            cost_tol: 1e-8,

            max_it: 50,

            xi: 0.99995,
            sigma: 0.1,
            z0: 1.0,
            init_slacks_from_constraints: true,
            alpha_min: 1e-8,
            mu_threshold: 1e-5,
            max_step_size: 1e10,
        }
    }
}

impl QpOptions {
    pub(crate) fn validate(&self) -> Result<(), OcpError> {
        if self.xi >= 1.0 || self.xi < 0.5 {
            return Err(OcpError::config(format!(
                "xi ({}) must be slightly less than 1",
                self.xi
            )));
        }
        if self.sigma > 1.0 || self.sigma <= 0.0 {
            return Err(OcpError::config(format!(
                "sigma ({}) must be between 0 and 1",
                self.sigma
            )));
        }
        Ok(())
    }
}

/// Solver configuration. A snapshot is taken at the start of every solve.
#[derive(Debug, Clone, Serialize)]
pub struct SolverOptions {
    /// Horizon length.
    pub tf: f64,
    /// Explicit node times `t_0..t_N`. Mutually exclusive with `time_steps`.
    pub shooting_nodes: Option<Vec<f64>>,
    /// Explicit interval lengths. Mutually exclusive with `shooting_nodes`.
    pub time_steps: Option<Vec<f64>>,
    /// Weights `s_0..s_N` of the stage costs, `None` weights every
    /// interval by its length and the terminal cost by one.
    pub cost_scaling: Option<Vec<f64>>,

    pub qp_solver: QpSolver,
    /// Number of condensed blocks for partial condensing, `None` keeps one block per stage.
    pub qp_solver_cond_n: Option<usize>,
    pub hessian_approx: HessianApprox,
    /// Default integrator for every shooting interval.
    pub integrator: IntegratorConfig,
    /// Stage-local integrator settings.
    pub integrator_overrides: BTreeMap<usize, IntegratorConfig>,

    pub nlp_solver_type: NlpSolverType,
    pub globalization: Globalization,
    /// Fixed step length, also the initial step of the line search.
    pub step_length: f64,
    pub max_iter: usize,

    /// Stationarity tolerance. Convergence is declared on the four
    /// residuals alone, the primal step norm is recorded in the statistics
    /// but not tested.
    pub tol_stat: f64,
    /// Dynamics defect tolerance.
    pub tol_eq: f64,
    /// Inequality tolerance.
    pub tol_ineq: f64,
    /// Complementarity tolerance.
    pub tol_comp: f64,

    /// Added to the diagonal of every stage Hessian.
    pub levenberg_marquardt: f64,
    /// Eigenvalue floor applied to exact Hessians.
    pub regularize_epsilon: f64,

    /// Line search: Armijo parameter.
    pub eps_sufficient_descent: f64,
    /// Line search: step reduction factor.
    pub alpha_reduction: f64,
    /// Line search: smallest accepted step.
    pub alpha_min: f64,

    /// Passed to the QP sub-solver as an opaque slack initialization flag.
    pub initialize_t_slacks: bool,
    pub qp: QpOptions,

    pub print_level: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tf: 1.0,
            shooting_nodes: None,
            time_steps: None,
            cost_scaling: None,

            qp_solver: QpSolver::PartialCondensingIpm,
            qp_solver_cond_n: None,
            hessian_approx: HessianApprox::GaussNewton,
            integrator: IntegratorConfig::default(),
            integrator_overrides: BTreeMap::new(),

            nlp_solver_type: NlpSolverType::Sqp,
            globalization: Globalization::FixedStep,
            step_length: 1.0,
            max_iter: 100,

            tol_stat: 1e-6,
            tol_eq: 1e-6,
            tol_ineq: 1e-6,
            tol_comp: 1e-6,

            levenberg_marquardt: 0.0,
            regularize_epsilon: 1e-4,

            eps_sufficient_descent: 1e-4,
            alpha_reduction: 0.7,
            alpha_min: 0.05,

            initialize_t_slacks: true,
            qp: QpOptions::default(),

            print_level: 0,
        }
    }
}

impl SolverOptions {
    /// Integrator settings in effect at `stage`.
    pub fn integrator_at(&self, stage: usize) -> &IntegratorConfig {
        self.integrator_overrides
            .get(&stage)
            .unwrap_or(&self.integrator)
    }

    pub(crate) fn validate(&self) -> Result<(), OcpError> {
        if !(self.step_length > 0.0 && self.step_length <= 1.0) {
            return Err(OcpError::config(format!(
                "step_length ({}) must lie in (0, 1]",
                self.step_length
            )));
        }
        if !(self.alpha_reduction > 0.0 && self.alpha_reduction < 1.0) {
            return Err(OcpError::config(format!(
                "alpha_reduction ({}) must lie in (0, 1)",
                self.alpha_reduction
            )));
        }
        for (name, tol) in [
            ("tol_stat", self.tol_stat),
            ("tol_eq", self.tol_eq),
            ("tol_ineq", self.tol_ineq),
            ("tol_comp", self.tol_comp),
        ] {
            if !(tol > 0.0) {
                return Err(OcpError::config(format!("{name} must be positive")));
            }
        }
        if self.levenberg_marquardt < 0.0 {
            return Err(OcpError::config("levenberg_marquardt must be non-negative"));
        }
        self.qp.validate()
    }

    /// Applies a runtime option by name.
    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<(), OcpError> {
        match name {
            "step_length" => self.step_length = value.as_f64(name)?,
            "globalization" => self.globalization = value.as_str(name)?.parse()?,
            "nlp_solver_type" => self.nlp_solver_type = value.as_str(name)?.parse()?,
            "max_iter" | "nlp_solver_max_iter" => self.max_iter = value.as_usize(name)?,
            "print_level" => self.print_level = value.as_usize(name)?,
            "tol_stat" => self.tol_stat = value.as_f64(name)?,
            "tol_eq" => self.tol_eq = value.as_f64(name)?,
            "tol_ineq" => self.tol_ineq = value.as_f64(name)?,
            "tol_comp" => self.tol_comp = value.as_f64(name)?,
            "levenberg_marquardt" => self.levenberg_marquardt = value.as_f64(name)?,
            "alpha_min" => self.alpha_min = value.as_f64(name)?,
            "alpha_reduction" => self.alpha_reduction = value.as_f64(name)?,
            "eps_sufficient_descent" => self.eps_sufficient_descent = value.as_f64(name)?,
            "initialize_t_slacks" => self.initialize_t_slacks = value.as_bool(name)?,
            "qp_solver_iter_max" => self.qp.max_it = value.as_usize(name)?,
            "qp_tol" => {
                let tol = value.as_f64(name)?;
                self.qp.feas_tol = tol;
                self.qp.grad_tol = tol;
                self.qp.comp_tol = tol;
                self.qp.cost_tol = tol;
            }
            _ => return Err(OcpError::config(format!("unknown runtime option `{name}`"))),
        }
        self.validate()
    }
}

/// Value passed to [`OcpSolver::options_set`](crate::OcpSolver::options_set).
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl OptionValue {
    fn as_f64(&self, name: &str) -> Result<f64, OcpError> {
        match self {
            OptionValue::Float(v) => Ok(*v),
            OptionValue::Int(v) => Ok(*v as f64),
            _ => Err(OcpError::config(format!("option `{name}` expects a number"))),
        }
    }

    fn as_usize(&self, name: &str) -> Result<usize, OcpError> {
        match self {
            OptionValue::Int(v) if *v >= 0 => Ok(*v as usize),
            _ => Err(OcpError::config(format!(
                "option `{name}` expects a non-negative integer"
            ))),
        }
    }

    fn as_bool(&self, name: &str) -> Result<bool, OcpError> {
        match self {
            OptionValue::Bool(v) => Ok(*v),
            OptionValue::Int(v) => Ok(*v != 0),
            _ => Err(OcpError::config(format!("option `{name}` expects a boolean"))),
        }
    }

    fn as_str(&self, name: &str) -> Result<&str, OcpError> {
        match self {
            OptionValue::Str(v) => Ok(v),
            _ => Err(OcpError::config(format!("option `{name}` expects a string"))),
        }
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(v as i64)
    }
}

impl From<usize> for OptionValue {
    fn from(v: usize) -> Self {
        OptionValue::Int(v as i64)
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}
