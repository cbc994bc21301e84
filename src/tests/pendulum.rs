use float_cmp::assert_approx_eq;
use std::f64::consts::PI;
use std::iter::zip;

use super::pendulum_ocp;
use crate::math::central_jacobian;
use crate::{
    Dynamics, Field, IntegratorConfig, IntegratorType, OcpSolver, Pendulum, QpSolver, SolverStatus,
};

const FMAX: f64 = 80.0;

fn check_trajectory(solver: &OcpSolver) {
    let n = solver.n();
    for i in 0..n {
        let u = solver.get(i, Field::U).unwrap();
        assert!(u[0].abs() <= FMAX + 1e-6, "u[{i}] = {}", u[0]);
    }
    let x0 = solver.get(0, Field::X).unwrap();
    assert_approx_eq!(f64, x0[1], PI, epsilon = 1e-6);

    // swung up
    let x_n = solver.get(n, Field::X).unwrap();
    assert!(x_n[1].abs() < 0.5, "final state {x_n}");
}

/// Swing-up on a two-zone grid with a fixed near-full step.
#[test]
pub fn swing_up_nonuniform_grid() {
    let mut ocp = pendulum_ocp();
    ocp.solver_options.qp_solver_cond_n = Some(5);
    let mut solver = OcpSolver::new(ocp).unwrap();
    solver.options_set("step_length", 0.99999).unwrap();
    solver.options_set("globalization", "fixed_step").unwrap();

    let x0 = [0.0, PI, 0.0, 0.0];
    for i in 0..solver.n() {
        solver.set(i, Field::X, &x0).unwrap();
    }

    let status = solver.solve();

    assert!(matches!(status, SolverStatus::Success | SolverStatus::MaxIterations), "{status:?}");
    check_trajectory(&solver);
    assert!(solver.stats().sqp_iter > 1);
    assert!(solver.stats().qp_iter >= solver.stats().sqp_iter);
    assert_eq!(solver.stats().iterations.len(), solver.stats().sqp_iter);

    let lam = solver.get(1, Field::Lam).unwrap();
    let t = solver.get(1, Field::T).unwrap();
    assert_eq!(lam.len(), 2);
    assert!(lam.iter().all(|&l| l >= 0.0), "{lam}");
    assert!(t.iter().all(|&s| s >= -1e-8), "{t}");
    assert_eq!(solver.get(1, Field::Pi).unwrap().len(), 4);

    let table = solver.statistics_table();
    assert!(table.starts_with("iter"), "{table}");
    let rows = table.lines().skip(1).take_while(|l| !l.trim().is_empty()).count();
    assert_eq!(
        rows,
        solver.stats().sqp_iter + usize::from(solver.stats().final_residuals.is_some())
    );

    // resolving after clearing the inequality duals stays on the solution
    solver.set(1, Field::Lam, &[0.0, 0.0]).unwrap();
    solver.set(1, Field::T, &[0.0, 0.0]).unwrap();
    let status = solver.solve();
    assert!(status.is_usable(), "{status:?}");
    check_trajectory(&solver);
}

#[test]
pub fn swing_up_with_gnsf_and_full_condensing() {
    let mut ocp = pendulum_ocp();
    ocp.solver_options.qp_solver = QpSolver::FullCondensingIpm;
    ocp.solver_options.integrator = IntegratorConfig::new(IntegratorType::Gnsf);
    ocp.structure_provider = Some(Box::new(crate::Pendulum::default().gnsf_structure()));
    let mut solver = OcpSolver::new(ocp).unwrap();

    for i in 0..solver.n() {
        solver.set(i, Field::X, &[0.0, PI, 0.0, 0.0]).unwrap();
    }
    let status = solver.solve();

    assert!(status.is_usable(), "{status:?}");
    check_trajectory(&solver);
}

#[test]
pub fn analytic_jacobian() {
    let model = Pendulum::default();
    for (x, u) in [
        ([0.0, PI, 0.0, 0.0], 0.0),
        ([0.3, 0.4, -1.0, 2.5], 12.0),
        ([-1.0, 2.0, 0.5, -4.0], -80.0),
    ] {
        let x = nalgebra::DVector::from_row_slice(&x);
        let u = nalgebra::DVector::from_element(1, u);
        let (jx, ju) = model.jacobian(&x, &u);
        let fd_x = central_jacobian(&x, |xp| model.f(xp, &u));
        let fd_u = central_jacobian(&u, |up| model.f(&x, up));
        zip(jx.iter(), fd_x.iter()).for_each(|v| assert_approx_eq!(f64, *v.0, *v.1, epsilon = 1e-6));
        zip(ju.iter(), fd_u.iter()).for_each(|v| assert_approx_eq!(f64, *v.0, *v.1, epsilon = 1e-6));
    }
}
