//! Pendulum swing-up on a grid with short steps over the first half of the
//! horizon and steps twice as long over the second half.

use std::f64::consts::PI;
use std::sync::Arc;

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use multishoot::{
    Field, HessianApprox, IntegratorConfig, IntegratorType, NlpSolverType, Ocp, OcpSolver, Pendulum, QpSolver,
    SolverStatus,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let tf = 1.0;
    let n = 15;
    let n1 = 10;
    let fmax = 80.0;
    let x0 = [0.0, PI, 0.0, 0.0];

    let mut ocp = Ocp::new(Arc::new(Pendulum::default()), n);

    // y = [x; u], weights Q = 2 diag(1e3, 1e3, 1e-2, 1e-2), R = 2e-2
    let q = [2e3, 2e3, 2e-2, 2e-2];
    let mut vx = DMatrix::<f64>::zeros(5, 4);
    vx.view_mut((0, 0), (4, 4)).fill_with_identity();
    let mut vu = DMatrix::<f64>::zeros(5, 1);
    vu[(4, 0)] = 1.0;
    ocp.cost.vx = vx;
    ocp.cost.vu = vu;
    ocp.cost.w = DMatrix::from_diagonal(&DVector::from_vec(vec![q[0], q[1], q[2], q[3], 2e-2]));
    ocp.cost.yref = DVector::zeros(5);
    ocp.cost.vx_e = DMatrix::identity(4, 4);
    ocp.cost.w_e = DMatrix::from_diagonal(&DVector::from_row_slice(&q));
    ocp.cost.yref_e = DVector::zeros(4);

    ocp.constraints.x0 = Some(DVector::from_row_slice(&x0));
    ocp.constraints.idxbu = vec![0];
    ocp.constraints.lbu = DVector::from_element(1, -fmax);
    ocp.constraints.ubu = DVector::from_element(1, fmax);

    // steps of 0.05 for the first N1 intervals, 0.1 afterwards
    let time_steps: Vec<f64> = (0..n)
        .map(|i| (if i < n1 { 0.1 } else { 0.2 }) * tf / 2.0)
        .collect();
    let opts = &mut ocp.solver_options;
    opts.tf = tf;
    opts.time_steps = Some(time_steps);
    opts.qp_solver = QpSolver::PartialCondensingIpm;
    opts.hessian_approx = HessianApprox::GaussNewton;
    opts.integrator = IntegratorConfig::new(IntegratorType::Irk);
    opts.nlp_solver_type = NlpSolverType::Sqp;
    opts.initialize_t_slacks = true;
    opts.print_level = 0;

    let mut solver = OcpSolver::new(ocp)?;
    solver.dump_config("multishoot_ocp.json")?;

    solver.options_set("step_length", 0.99999)?;
    solver.options_set("globalization", "fixed_step")?;

    for i in 0..n {
        solver.set(i, Field::X, &x0)?;
    }

    let status = solver.solve();
    if !matches!(status, SolverStatus::Success | SolverStatus::MaxIterations) {
        if let Some(err) = solver.last_error() {
            log::error!("{err}");
        }
        bail!("solver returned status {}", status.code());
    }

    println!("{:>6} {:>10} {:>10} {:>10} {:>10} {:>10}", "t", "p", "theta", "v", "omega", "F");
    for (i, t) in solver.shooting_nodes().iter().enumerate() {
        let x = solver.get(i, Field::X)?;
        let u = if i < n {
            format!("{:10.4}", solver.get(i, Field::U)?[0])
        } else {
            String::new()
        };
        println!("{t:6.3} {:10.4} {:10.4} {:10.4} {:10.4} {u}", x[0], x[1], x[2], x[3]);
    }

    println!("inequality multipliers at stage 1: {}", solver.get(1, Field::Lam)?.transpose());
    println!("slacks at stage 1: {}", solver.get(1, Field::T)?.transpose());
    println!("dynamics multipliers between stage 1 and 2: {}", solver.get(1, Field::Pi)?.transpose());

    solver.set(1, Field::Lam, &[0.0; 2])?;
    solver.set(1, Field::T, &[0.0; 2])?;

    solver.print_statistics();
    Ok(())
}
