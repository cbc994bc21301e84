use float_cmp::assert_approx_eq;
use nalgebra::{DMatrix, DVector};

use super::double_integrator_ocp;
use crate::{Field, OcpSolver, QpSolver, SolverStatus};

/// Optimal feedback gains and cost-to-go matrices by the backward Riccati
/// recursion, `p[k]` for `k = 0..=n`. Stage weights carry the step length.
fn riccati(n: usize, h: f64) -> (Vec<DMatrix<f64>>, Vec<DMatrix<f64>>) {
    let a = DMatrix::from_row_slice(2, 2, &[1.0, h, 0.0, 1.0]);
    let b = DMatrix::from_row_slice(2, 1, &[0.5 * h * h, h]);
    let q = DMatrix::from_diagonal(&DVector::from_vec(vec![h, 0.1 * h]));
    let r = DMatrix::from_element(1, 1, 0.01 * h);

    let mut p = vec![DMatrix::zeros(2, 2); n + 1];
    let mut k = vec![DMatrix::zeros(1, 2); n];
    p[n] = DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 1.0]));
    for i in (0..n).rev() {
        let pb = &p[i + 1] * &b;
        let s = &r + b.transpose() * &pb;
        let gain = s.try_inverse().unwrap() * pb.transpose() * &a;
        p[i] = &q + a.transpose() * &p[i + 1] * (&a - &b * &gain);
        k[i] = gain;
    }
    (k, p)
}

fn check_against_riccati(solver: &OcpSolver) {
    let n = solver.n();
    let (gains, p) = riccati(n, solver.time_steps()[0]);

    for i in 0..n {
        let x = solver.get(i, Field::X).unwrap();
        let u = solver.get(i, Field::U).unwrap();
        let u_opt = -(&gains[i] * &x);
        assert_approx_eq!(f64, u[0], u_opt[0], epsilon = 1e-5);

        let x_next = solver.get(i + 1, Field::X).unwrap();
        let pi = solver.get(i, Field::Pi).unwrap();
        let costate = &p[i + 1] * &x_next;
        assert_approx_eq!(f64, pi[0], costate[0], epsilon = 1e-5);
        assert_approx_eq!(f64, pi[1], costate[1], epsilon = 1e-5);
    }
}

/// An unconstrained linear-quadratic problem is solved by the first QP.
#[test]
pub fn partial_condensing_matches_riccati() {
    let ocp = double_integrator_ocp(5, [1.0, 0.0]);
    let mut solver = OcpSolver::new(ocp).unwrap();

    let status = solver.solve();

    assert_eq!(status, SolverStatus::Success);
    assert_eq!(solver.stats().sqp_iter, 1);
    // the full step is large, termination only looks at the residuals
    assert!(solver.stats().iterations[0].step_norm > 0.1);
    let x0 = solver.get(0, Field::X).unwrap();
    assert_approx_eq!(f64, x0[0], 1.0, epsilon = 1e-8);
    assert_approx_eq!(f64, x0[1], 0.0, epsilon = 1e-8);
    check_against_riccati(&solver);

    // warm start at the solution
    assert_eq!(solver.solve(), SolverStatus::Success);
    assert_eq!(solver.stats().sqp_iter, 0);
    assert!(solver.stats().iterations.is_empty());
}

#[test]
pub fn full_condensing_matches_riccati() {
    let mut ocp = double_integrator_ocp(5, [1.0, 0.0]);
    ocp.solver_options.qp_solver = QpSolver::FullCondensingIpm;
    let mut solver = OcpSolver::new(ocp).unwrap();

    assert_eq!(solver.solve(), SolverStatus::Success);
    check_against_riccati(&solver);

    let res = solver.stats().final_residuals.unwrap();
    assert!(res.iter().all(|&r| r <= 1e-6), "{res:?}");
}

#[test]
pub fn optimal_cost() {
    let x0 = [1.0, -0.5];
    let mut ocp = double_integrator_ocp(5, x0);
    ocp.solver_options.qp_solver_cond_n = Some(2);
    let mut solver = OcpSolver::new(ocp).unwrap();

    assert_eq!(solver.solve(), SolverStatus::Success);

    let (_, p) = riccati(5, 0.2);
    let x0 = DVector::from_row_slice(&x0);
    let cost_to_go = 0.5 * x0.dot(&(&p[0] * &x0));
    assert_approx_eq!(f64, solver.stats().objective, cost_to_go, epsilon = 1e-6);
}
