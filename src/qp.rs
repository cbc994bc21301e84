//! Structured QP sub-problem of one SQP iteration.
//!
//! In the step `d_k = [dx_k; du_k]` the sub-problem reads
//!
//! ```txt
//!       min  sum_k 0.5 d_k' H_k d_k + g_k' d_k
//!
//! subject to
//!
//!       dx_{k+1} = A_k dx_k + B_k du_k + b_k       (multiplier pi_k)
//!       lb_k <= G_k d_k <= ub_k                     (multipliers lam_k)
//! ```
//!
//! with `b_k = F_k(x_k, u_k) - x_{k+1}` the shooting defect and the bounds
//! shifted by the current constraint values.

use nalgebra::{DMatrix, DVector};

use crate::common::{HessianApprox, SolverOptions};
use crate::constraints::concat;
use crate::error::OcpError;
use crate::integrator::{Integrator, StepResult};
use crate::math::{all_finite, project_eigenvalues, set_block};
use crate::stage::Stage;
use crate::traits::Dynamics;

/// Primal-dual iterate of the multiple-shooting problem.
#[derive(Debug, Clone)]
pub(crate) struct Iterate {
    /// `N + 1` states.
    pub x: Vec<DVector<f64>>,
    /// `N + 1` controls, the terminal one empty.
    pub u: Vec<DVector<f64>>,
    /// `N` dynamics multipliers.
    pub pi: Vec<DVector<f64>>,
    /// Inequality multipliers `[lower; upper]` per stage.
    pub lam: Vec<DVector<f64>>,
    /// Slacks `[G w - lb; ub - G w]` per stage.
    pub t: Vec<DVector<f64>>,
}

impl Iterate {
    pub fn zeros(stages: &[Stage]) -> Self {
        let n = stages.len() - 1;
        Self {
            x: stages.iter().map(|s| DVector::zeros(s.nx)).collect(),
            u: stages.iter().map(|s| DVector::zeros(s.nu)).collect(),
            pi: stages[..n].iter().map(|s| DVector::zeros(s.nx)).collect(),
            lam: stages
                .iter()
                .map(|s| DVector::zeros(2 * s.constraints.nc()))
                .collect(),
            t: stages
                .iter()
                .map(|s| DVector::zeros(2 * s.constraints.nc()))
                .collect(),
        }
    }

    /// `w_k = [x_k; u_k]`.
    pub fn w(&self, k: usize) -> DVector<f64> {
        concat(&[&self.x[k], &self.u[k]])
    }
}

/// QP data of one stage. `a`, `b` and `defect` are empty at the terminal node.
#[derive(Debug, Clone)]
pub struct StageQp {
    pub nx: usize,
    pub nu: usize,
    pub hess: DMatrix<f64>,
    pub grad: DVector<f64>,
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub defect: DVector<f64>,
    pub g_mat: DMatrix<f64>,
    pub lb: DVector<f64>,
    pub ub: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct OcpQp {
    pub stages: Vec<StageQp>,
}

impl OcpQp {
    pub fn n(&self) -> usize {
        self.stages.len() - 1
    }
}

/// Solution of an [`OcpQp`], multipliers in the convention of the
/// module documentation.
#[derive(Debug, Clone)]
pub struct OcpQpSolution {
    pub dx: Vec<DVector<f64>>,
    pub du: Vec<DVector<f64>>,
    pub pi: Vec<DVector<f64>>,
    /// `[lam_lower; lam_upper]` per stage.
    pub lam: Vec<DVector<f64>>,
    /// Slacks of the new point, `[t_lower; t_upper]` per stage.
    pub t: Vec<DVector<f64>>,
    pub iterations: usize,
    pub converged: bool,
}

/// End states and sensitivities of every shooting interval at the iterate.
pub(crate) fn linearize(stages: &[Stage], it: &Iterate) -> Result<Vec<StepResult>, OcpError> {
    let mut lin = Vec::with_capacity(stages.len() - 1);
    for stage in stages {
        let Some((dynamics, integrator)) = stage.transition() else {
            continue;
        };
        let k = stage.index;
        let step = integrator
            .linearize(dynamics, &it.x[k], &it.u[k])
            .map_err(|err| err.at(k))?;
        lin.push(step);
    }
    Ok(lin)
}

/// Assembles the QP at the iterate from its linearization.
pub(crate) fn build(
    stages: &[Stage],
    it: &Iterate,
    lin: &[StepResult],
    opts: &SolverOptions,
) -> Result<OcpQp, OcpError> {
    let n = stages.len() - 1;
    let mut qp_stages = Vec::with_capacity(n + 1);
    for stage in stages {
        let k = stage.index;
        let (nx, nu) = (stage.nx, stage.nu);
        let nw = nx + nu;

        let mut hess = stage.cost.gauss_newton_hessian();
        let grad = stage.cost.gradient(&it.x[k], &it.u[k]);

        let (a, b, defect) = match stage.transition() {
            Some((dynamics, integrator)) => {
                let step = &lin[k];
                if opts.hessian_approx == HessianApprox::Exact {
                    hess += dynamics_curvature(dynamics, integrator, &it.x[k], &it.u[k], &it.pi[k], step)
                        .map_err(|err| err.at(k))?;
                }
                (step.a.clone(), step.b.clone(), &step.x_next - &it.x[k + 1])
            }
            None => (DMatrix::zeros(0, nx), DMatrix::zeros(0, 0), DVector::zeros(0)),
        };
        if opts.hessian_approx == HessianApprox::Exact {
            hess = project_eigenvalues(&hess, opts.regularize_epsilon);
        }
        if opts.levenberg_marquardt > 0.0 {
            for i in 0..nw {
                hess[(i, i)] += opts.levenberg_marquardt;
            }
        }

        let cons = &stage.constraints;
        let g_mat = cons.matrix(nx, nu);
        let gw = &g_mat * it.w(k);
        let lb = cons.lower() - &gw;
        let ub = cons.upper() - &gw;

        if !all_finite(hess.as_slice()) || !all_finite(grad.as_slice()) || !all_finite(defect.as_slice()) {
            return Err(OcpError::NanDetected(format!("QP data at stage {k}")));
        }
        qp_stages.push(StageQp {
            nx,
            nu,
            hess,
            grad,
            a,
            b,
            defect,
            g_mat,
            lb,
            ub,
        });
    }
    Ok(OcpQp { stages: qp_stages })
}

/// `d^2/dw^2 (pi' F(w))` by forward differences of the integrator
/// sensitivities, symmetrized.
fn dynamics_curvature(
    dynamics: &dyn Dynamics,
    integrator: &Integrator,
    x: &DVector<f64>,
    u: &DVector<f64>,
    pi: &DVector<f64>,
    base: &StepResult,
) -> Result<DMatrix<f64>, crate::integrator::StepError> {
    let (nx, nu) = (x.len(), u.len());
    let nw = nx + nu;
    let grad_at = |step: &StepResult| {
        let mut jac = DMatrix::zeros(nx, nw);
        set_block(&mut jac, 0, 0, &step.a);
        set_block(&mut jac, 0, nx, &step.b);
        jac.transpose() * pi
    };
    let g0 = grad_at(base);
    let mut hess = DMatrix::zeros(nw, nw);
    let (mut xp, mut up) = (x.clone(), u.clone());
    for j in 0..nw {
        let value = if j < nx { x[j] } else { u[j - nx] };
        let delta = f64::EPSILON.sqrt() * value.abs().max(1.0);
        if j < nx {
            xp[j] += delta;
        } else {
            up[j - nx] += delta;
        }
        let step = integrator.linearize(dynamics, &xp, &up)?;
        hess.set_column(j, &((grad_at(&step) - &g0) / delta));
        if j < nx {
            xp[j] = x[j];
        } else {
            up[j - nx] = u[j - nx];
        }
    }
    Ok((&hess + hess.transpose()) * 0.5)
}
