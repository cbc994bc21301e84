use float_cmp::assert_approx_eq;

use super::{double_integrator_ocp, pendulum_ocp};
use crate::{BoundField, Field, Globalization, OcpError, OcpSolver, SolverStatus};

#[test]
pub fn field_lengths() {
    let solver = OcpSolver::new(pendulum_ocp()).unwrap();
    let n = solver.n();

    assert_eq!(n, 15);
    assert_eq!(solver.get(0, Field::X).unwrap().len(), 4);
    assert_eq!(solver.get(0, Field::U).unwrap().len(), 1);
    assert_eq!(solver.get(n, Field::X).unwrap().len(), 4);
    // stage 0: force bound and four initial-state rows
    assert_eq!(solver.get(0, Field::Lam).unwrap().len(), 2 * 5);
    assert_eq!(solver.get(1, Field::Lam).unwrap().len(), 2);
    assert_eq!(solver.get(1, Field::T).unwrap().len(), 2);
    assert_eq!(solver.get(1, Field::Pi).unwrap().len(), 4);
    assert!(solver.get(n, Field::Lam).unwrap().is_empty());
    assert_eq!(solver.get(3, Field::Yref).unwrap().len(), 5);
    assert_eq!(solver.get(n, Field::Yref).unwrap().len(), 4);
}

#[test]
pub fn terminal_node_has_no_control() {
    let solver = OcpSolver::new(pendulum_ocp()).unwrap();
    let n = solver.n();

    for field in [Field::U, Field::Pi] {
        let err = solver.get(n, field).unwrap_err();
        assert!(
            matches!(err, OcpError::FieldUnavailable { stage, .. } if stage == n),
            "{err}"
        );
    }
}

#[test]
pub fn stage_out_of_range() {
    let mut solver = OcpSolver::new(pendulum_ocp()).unwrap();

    let err = solver.get(16, Field::X).unwrap_err();
    assert!(matches!(err, OcpError::InvalidStage { stage: 16, n: 15 }), "{err}");
    let err = solver.set(16, Field::X, &[0.0; 4]).unwrap_err();
    assert!(matches!(err, OcpError::InvalidStage { .. }), "{err}");
    let err = solver.constraints_set(20, BoundField::Lbu, &[0.0]).unwrap_err();
    assert!(matches!(err, OcpError::InvalidStage { .. }), "{err}");
}

#[test]
pub fn set_then_get() {
    let mut solver = OcpSolver::new(pendulum_ocp()).unwrap();

    solver.set(1, Field::Lam, &[0.5, 0.25]).unwrap();
    solver.set(1, Field::T, &[1.0, 2.0]).unwrap();
    solver.set(2, Field::X, &[0.1, 3.0, 0.0, -0.2]).unwrap();
    solver.set(2, Field::Yref, &[0.0, 0.0, 0.0, 0.0, 1.5]).unwrap();

    assert_eq!(solver.get(1, Field::Lam).unwrap().as_slice(), &[0.5, 0.25]);
    assert_eq!(solver.get(1, Field::T).unwrap().as_slice(), &[1.0, 2.0]);
    assert_eq!(solver.get(2, Field::X).unwrap().as_slice(), &[0.1, 3.0, 0.0, -0.2]);
    assert_eq!(solver.get(2, Field::Yref).unwrap()[4], 1.5);
    // other stages keep their own reference
    assert_eq!(solver.get(3, Field::Yref).unwrap()[4], 0.0);
}

#[test]
pub fn wrong_length_is_rejected() {
    let mut solver = OcpSolver::new(pendulum_ocp()).unwrap();
    let before = solver.get(1, Field::Lam).unwrap();

    let err = solver.set(1, Field::Lam, &[0.0; 3]).unwrap_err();

    assert!(
        matches!(err, OcpError::DimensionMismatch { expected: 2, got: 3, .. }),
        "{err}"
    );
    assert_eq!(solver.get(1, Field::Lam).unwrap(), before);
    let err = solver.set(0, Field::U, &[]).unwrap_err();
    assert!(matches!(err, OcpError::DimensionMismatch { .. }), "{err}");
}

#[test]
pub fn initial_state_update() {
    let mut solver = OcpSolver::new(double_integrator_ocp(5, [1.0, 0.0])).unwrap();
    assert_eq!(solver.solve(), SolverStatus::Success);

    // the lower side passes the old upper one in between
    solver.constraints_set(0, BoundField::Lbx, &[-2.0, 0.5]).unwrap();
    solver.constraints_set(0, BoundField::Ubx, &[-2.0, 0.5]).unwrap();
    assert_eq!(solver.solve(), SolverStatus::Success);

    let x0 = solver.get(0, Field::X).unwrap();
    assert_approx_eq!(f64, x0[0], -2.0, epsilon = 1e-8);
    assert_approx_eq!(f64, x0[1], 0.5, epsilon = 1e-8);

    // and the upper side passes the lower one
    solver.constraints_set(0, BoundField::Ubx, &[-4.0, 0.25]).unwrap();
    solver.constraints_set(0, BoundField::Lbx, &[-4.0, 0.25]).unwrap();
    assert_eq!(solver.solve(), SolverStatus::Success);
    let x0 = solver.get(0, Field::X).unwrap();
    assert_approx_eq!(f64, x0[0], -4.0, epsilon = 1e-8);
    assert_approx_eq!(f64, x0[1], 0.25, epsilon = 1e-8);

    let err = solver.constraints_set(0, BoundField::Lbu, &[0.0]).unwrap_err();
    assert!(matches!(err, OcpError::DimensionMismatch { .. }), "{err}");
}

#[test]
pub fn crossed_bounds_fail_the_next_solve() {
    let mut solver = OcpSolver::new(double_integrator_ocp(5, [1.0, 0.0])).unwrap();
    assert_eq!(solver.solve(), SolverStatus::Success);
    let x1 = solver.get(1, Field::X).unwrap();

    solver.constraints_set(0, BoundField::Lbx, &[0.0, 0.6]).unwrap();
    let status = solver.solve();

    assert_eq!(status, SolverStatus::Failure);
    assert!(
        matches!(solver.last_error(), Some(OcpError::Configuration(_))),
        "{:?}",
        solver.last_error()
    );
    // the trajectory is left alone
    assert_eq!(solver.get(1, Field::X).unwrap(), x1);

    solver.constraints_set(0, BoundField::Ubx, &[0.0, 0.6]).unwrap();
    assert_eq!(solver.solve(), SolverStatus::Success);
}

#[test]
pub fn iterate_multipliers_seed_the_qp() {
    let mut ocp = double_integrator_ocp(3, [0.0, 0.0]);
    ocp.cost.yref = nalgebra::DVector::from_vec(vec![1.0, 0.0, 0.0]);
    ocp.constraints.idxbu = vec![0];
    ocp.constraints.lbu = nalgebra::DVector::from_element(1, -5.0);
    ocp.constraints.ubu = nalgebra::DVector::from_element(1, 5.0);
    ocp.solver_options.initialize_t_slacks = false;
    let mut solver = OcpSolver::new(ocp).unwrap();
    solver.options_set("qp_solver_iter_max", 0).unwrap();
    solver.options_set("max_iter", 1).unwrap();

    solver.set(1, Field::Lam, &[0.25, 0.5]).unwrap();
    solver.set(1, Field::T, &[5.0, 5.0]).unwrap();
    assert_eq!(solver.solve(), SolverStatus::MaxIterations);

    // no interior point iterations, the multipliers are where they started
    let lam = solver.get(1, Field::Lam).unwrap();
    assert_approx_eq!(f64, lam[0], 0.25);
    assert_approx_eq!(f64, lam[1], 0.5);
    let t = solver.get(1, Field::T).unwrap();
    assert_approx_eq!(f64, t[0], 5.0);
    // a stage without a usable guess starts from the default
    let lam = solver.get(2, Field::Lam).unwrap();
    assert_approx_eq!(f64, lam[0], 1.0);
    assert_approx_eq!(f64, lam[1], 1.0);
}

#[test]
pub fn runtime_options() {
    let mut solver = OcpSolver::new(pendulum_ocp()).unwrap();

    solver.options_set("step_length", 0.99999).unwrap();
    solver.options_set("globalization", "fixed_step").unwrap();
    solver.options_set("max_iter", 20).unwrap();
    assert_eq!(solver.options().step_length, 0.99999);
    assert_eq!(solver.options().globalization, Globalization::FixedStep);
    assert_eq!(solver.options().max_iter, 20);

    solver.options_set("globalization", "MERIT_BACKTRACKING").unwrap();
    assert_eq!(solver.options().globalization, Globalization::MeritBacktracking);

    let err = solver.options_set("step_length", 1.5).unwrap_err();
    assert!(matches!(err, OcpError::Configuration(_)), "{err}");
    assert_eq!(solver.options().step_length, 0.99999);

    let err = solver.options_set("globalization", "trust_region").unwrap_err();
    assert!(matches!(err, OcpError::Configuration(_)), "{err}");
    let err = solver.options_set("no_such_option", 1.0).unwrap_err();
    assert!(matches!(err, OcpError::Configuration(_)), "{err}");
    let err = solver.options_set("max_iter", -1).unwrap_err();
    assert!(matches!(err, OcpError::Configuration(_)), "{err}");
}

#[test]
pub fn grid_and_configuration_dump() {
    let solver = OcpSolver::new(pendulum_ocp()).unwrap();

    assert_eq!(solver.shooting_nodes().len(), 16);
    assert_approx_eq!(f64, solver.shooting_nodes()[10], 0.5, epsilon = 1e-12);
    assert_eq!(solver.shooting_nodes()[15], 1.0);
    assert_eq!(solver.time_steps()[0], 0.05);
    assert_eq!(solver.time_steps()[14], 0.1);

    let dir = std::env::temp_dir().join(format!("multishoot-dump-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ocp.json");
    solver.dump_config(&path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["model_name"], "pendulum_ode");
    assert_eq!(json["n"], 15);
    assert_eq!(json["stages"].as_array().unwrap().len(), 16);
    assert_eq!(json["time_steps"].as_array().unwrap().len(), 15);
    assert_eq!(json["solver_options"]["qp_solver"], "PartialCondensingIpm");
    // stage costs are weighted by their interval length
    assert_eq!(json["stages"][0]["cost"]["scaling"], 0.05);
    assert_eq!(json["stages"][14]["cost"]["scaling"], 0.1);
    assert_eq!(json["stages"][15]["cost"]["scaling"], 1.0);
    std::fs::remove_dir_all(dir).unwrap();
}
