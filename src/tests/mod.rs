mod accessor;
mod gnsf;
mod integrator;
mod lqr;
mod pendulum;

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::{Dynamics, Ocp};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        // .filter_level(log::LevelFilter::Trace)
        .format_module_path(false)
        .format_timestamp(None)
        .format_target(false)
        .is_test(true)
        .init();
}

/// `p' = v, v' = u`.
pub(crate) struct DoubleIntegrator;

impl Dynamics for DoubleIntegrator {
    fn name(&self) -> &str {
        "double_integrator"
    }

    fn nx(&self) -> usize {
        2
    }

    fn nu(&self) -> usize {
        1
    }

    fn f(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![x[1], u[0]])
    }

    fn jacobian(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        (
            DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]),
            DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
        )
    }
}

/// Stage weights `diag(q_p, q_v, r)`, terminal weight `diag(10 q_p, 10 q_v)`.
pub(crate) fn double_integrator_ocp(n: usize, x0: [f64; 2]) -> Ocp {
    let mut ocp = Ocp::new(Arc::new(DoubleIntegrator), n);
    ocp.cost.vx = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    ocp.cost.vu = DMatrix::from_row_slice(3, 1, &[0.0, 0.0, 1.0]);
    ocp.cost.w = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 0.1, 0.01]));
    ocp.cost.yref = DVector::zeros(3);
    ocp.cost.vx_e = DMatrix::identity(2, 2);
    ocp.cost.w_e = DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 1.0]));
    ocp.cost.yref_e = DVector::zeros(2);
    ocp.constraints.x0 = Some(DVector::from_row_slice(&x0));
    ocp
}

/// Swing-up of [`Pendulum`](crate::Pendulum) from the hanging position
/// on a grid with finer steps in the first half.
pub(crate) fn pendulum_ocp() -> Ocp {
    let n = 15;
    let mut ocp = Ocp::new(Arc::new(crate::Pendulum::default()), n);

    let q = DVector::from_vec(vec![2e3, 2e3, 2e-2, 2e-2]);
    let w = DMatrix::from_diagonal(&DVector::from_vec(vec![2e3, 2e3, 2e-2, 2e-2, 2e-2]));
    let mut vx = DMatrix::<f64>::zeros(5, 4);
    vx.view_mut((0, 0), (4, 4)).fill_with_identity();
    let mut vu = DMatrix::<f64>::zeros(5, 1);
    vu[(4, 0)] = 1.0;

    ocp.cost.vx = vx;
    ocp.cost.vu = vu;
    ocp.cost.w = w;
    ocp.cost.yref = DVector::zeros(5);
    ocp.cost.vx_e = DMatrix::identity(4, 4);
    ocp.cost.w_e = DMatrix::from_diagonal(&q);
    ocp.cost.yref_e = DVector::zeros(4);

    ocp.constraints.x0 = Some(DVector::from_vec(vec![0.0, std::f64::consts::PI, 0.0, 0.0]));
    ocp.constraints.idxbu = vec![0];
    ocp.constraints.lbu = DVector::from_element(1, -80.0);
    ocp.constraints.ubu = DVector::from_element(1, 80.0);

    let opts = &mut ocp.solver_options;
    opts.tf = 1.0;
    opts.time_steps = Some([vec![0.05; 10], vec![0.1; 5]].concat());
    opts.qp_solver = crate::QpSolver::PartialCondensingIpm;
    opts.hessian_approx = crate::HessianApprox::GaussNewton;
    opts.integrator = crate::IntegratorConfig::new(crate::IntegratorType::Irk);
    opts.initialize_t_slacks = true;
    ocp
}

pub(crate) fn setup_error(ocp: Ocp) -> crate::OcpError {
    match crate::OcpSolver::new(ocp) {
        Ok(_) => panic!("solver setup unexpectedly succeeded"),
        Err(err) => err,
    }
}
