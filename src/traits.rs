use nalgebra::{DMatrix, DVector};

use crate::gnsf::GnsfStructure;
use crate::math::central_jacobian;

/// Continuous-time dynamics `xdot = f(x, u)` supplied by a model provider.
pub trait Dynamics: Send + Sync {
    /// Model name, also used to locate its structural model file.
    fn name(&self) -> &str;

    fn nx(&self) -> usize;

    fn nu(&self) -> usize;

    fn f(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64>;

    /// Jacobians `(df/dx, df/du)`. Defaults to central differences.
    fn jacobian(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let jx = central_jacobian(x, |xp| self.f(xp, u));
        let ju = central_jacobian(u, |up| self.f(x, up));
        (jx, ju)
    }

    /// Nonlinear term of the structured form
    /// `f = A x + B u + c + C phi(L_x x, L_u u)`.
    fn phi(&self, _y: &DVector<f64>, _uhat: &DVector<f64>) -> Option<DVector<f64>> {
        None
    }

    /// Whether a zero-length shooting interval is meaningful for this model.
    fn allows_zero_step(&self) -> bool {
        false
    }
}

/// Source of precomputed structural decompositions, typically the output of
/// an offline structure detection tool.
pub trait StructureProvider {
    fn structure(&self, model_name: &str) -> anyhow::Result<GnsfStructure>;
}

/// Solves the dense system `a * x = b` in place.
pub trait LinearSolver {
    fn solve(&self, a_mat: DMatrix<f64>, b: &mut DVector<f64>) -> Result<(), String>;
}

/// Per-iteration hook of the interior point QP solver. Receives the four
/// termination measures, the barrier parameter `gamma`, the primal step
/// norm, the objective and the primal/dual step lengths.
pub trait ProgressMonitor {
    fn update(
        &self,
        i: usize,
        feas_cond: f64,
        grad_cond: f64,
        comp_cond: f64,
        cost_cond: f64,
        gamma: f64,
        step_size: f64,
        obj: f64,
        alpha_p: f64,
        alpha_d: f64,
    );
}

/// Forwards QP progress to the `log` facade.
pub struct LogProgress;

impl ProgressMonitor for LogProgress {
    fn update(
        &self,
        i: usize,
        feas_cond: f64,
        grad_cond: f64,
        comp_cond: f64,
        cost_cond: f64,
        gamma: f64,
        step_size: f64,
        obj: f64,
        alpha_p: f64,
        alpha_d: f64,
    ) {
        log::trace!(
            "qp it {:3}: feas {:.2e} grad {:.2e} comp {:.2e} cost {:.2e} gamma {:.2e} step {:.2e} obj {:.6e} ap {:.3} ad {:.3}",
            i, feas_cond, grad_cond, comp_cond, cost_cond, gamma, step_size, obj, alpha_p, alpha_d
        );
    }
}
