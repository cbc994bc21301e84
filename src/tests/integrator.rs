use float_cmp::assert_approx_eq;
use nalgebra::{DMatrix, DVector};
use std::iter::zip;

use super::DoubleIntegrator;
use crate::math::central_jacobian;
use crate::{
    ButcherTableau, GnsfMatrices, Integrator, IntegratorConfig, IntegratorType, OcpError, Pendulum,
};

fn config(kind: IntegratorType) -> IntegratorConfig {
    IntegratorConfig {
        newton_tol: 1e-12,
        ..IntegratorConfig::new(kind)
    }
}

fn assert_matrix_eq(a: &DMatrix<f64>, b: &DMatrix<f64>, epsilon: f64) {
    assert_eq!(a.shape(), b.shape());
    zip(a.iter(), b.iter()).for_each(|x| assert_approx_eq!(f64, *x.0, *x.1, epsilon = epsilon));
}

fn pendulum_point() -> (DVector<f64>, DVector<f64>) {
    (
        DVector::from_vec(vec![0.1, std::f64::consts::PI - 0.3, 0.2, -0.4]),
        DVector::from_vec(vec![5.0]),
    )
}

#[test]
pub fn tableau_limits() {
    assert_eq!(ButcherTableau::explicit(4).unwrap().stages(), 4);
    assert_eq!(ButcherTableau::gauss_legendre(3).unwrap().stages(), 3);
    assert!(matches!(ButcherTableau::explicit(5), Err(OcpError::Configuration(_))));
    assert!(matches!(ButcherTableau::gauss_legendre(0), Err(OcpError::Configuration(_))));

    for s in 1..=3 {
        let t = ButcherTableau::gauss_legendre(s).unwrap();
        assert_approx_eq!(f64, t.b.sum(), 1.0, epsilon = 1e-14);
    }
}

/// Both schemes are exact for the double integrator under constant control.
#[test]
pub fn linear_dynamics_are_exact() {
    let h = 0.3;
    let x = DVector::from_vec(vec![1.0, -2.0]);
    let u = DVector::from_vec(vec![0.5]);
    let x_exact = [1.0 - 2.0 * h + 0.5 * h * h * 0.5, -2.0 + h * 0.5];
    let a_exact = DMatrix::from_row_slice(2, 2, &[1.0, h, 0.0, 1.0]);
    let b_exact = DMatrix::from_row_slice(2, 1, &[0.5 * h * h, h]);

    for kind in [IntegratorType::Erk, IntegratorType::Irk] {
        let integrator = Integrator::new(&config(kind), h, &DoubleIntegrator, None).unwrap();
        let step = integrator.linearize(&DoubleIntegrator, &x, &u).unwrap();

        zip(step.x_next.iter(), x_exact).for_each(|x| assert_approx_eq!(f64, *x.0, x.1, epsilon = 1e-12));
        assert_matrix_eq(&step.a, &a_exact, 1e-12);
        assert_matrix_eq(&step.b, &b_exact, 1e-12);
    }
}

#[test]
pub fn schemes_agree_on_pendulum() {
    let model = Pendulum::default();
    let gnsf = GnsfMatrices::new(&model.gnsf_structure(), &model).unwrap();
    let (x, u) = pendulum_point();
    let dt = 0.05;

    let erk = IntegratorConfig {
        num_steps: 10,
        ..config(IntegratorType::Erk)
    };
    let erk = Integrator::new(&erk, dt, &model, None).unwrap();
    let irk = Integrator::new(&config(IntegratorType::Irk), dt, &model, None).unwrap();
    let gnsf = Integrator::new(&config(IntegratorType::Gnsf), dt, &model, Some(&gnsf)).unwrap();

    let x_erk = erk.forward(&model, &x, &u).unwrap();
    let x_irk = irk.forward(&model, &x, &u).unwrap();
    let x_gnsf = gnsf.forward(&model, &x, &u).unwrap();

    zip(x_erk.iter(), x_irk.iter()).for_each(|x| assert_approx_eq!(f64, *x.0, *x.1, epsilon = 1e-6));
    // same collocation equations, different unknowns
    zip(x_gnsf.iter(), x_irk.iter()).for_each(|x| assert_approx_eq!(f64, *x.0, *x.1, epsilon = 1e-8));
    assert!((x_irk[1] - x[1]).abs() > 1e-3);
}

#[test]
pub fn sensitivities_match_finite_differences() {
    let model = Pendulum::default();
    let gnsf = GnsfMatrices::new(&model.gnsf_structure(), &model).unwrap();
    let (x, u) = pendulum_point();
    let dt = 0.1;

    let mut irk = config(IntegratorType::Irk);
    irk.num_steps = 2;
    let integrators = [
        Integrator::new(&config(IntegratorType::Erk), dt, &model, None).unwrap(),
        Integrator::new(&irk, dt, &model, None).unwrap(),
        Integrator::new(&config(IntegratorType::Gnsf), dt, &model, Some(&gnsf)).unwrap(),
    ];

    for integrator in &integrators {
        let step = integrator.linearize(&model, &x, &u).unwrap();
        let a_fd = central_jacobian(&x, |x| integrator.forward(&model, x, &u).unwrap());
        let b_fd = central_jacobian(&u, |u| integrator.forward(&model, &x, u).unwrap());

        assert_matrix_eq(&step.a, &a_fd, 1e-4);
        assert_matrix_eq(&step.b, &b_fd, 1e-4);
    }
}

#[test]
pub fn zero_length_interval_holds_state() {
    let model = Pendulum::default();
    let (x, u) = pendulum_point();

    let integrator = Integrator::new(&config(IntegratorType::Irk), 0.0, &model, None).unwrap();
    let step = integrator.linearize(&model, &x, &u).unwrap();

    assert_eq!(integrator.kind(), None);
    assert_eq!(step.x_next, x);
    assert_eq!(step.a, DMatrix::identity(4, 4));
    assert_eq!(step.b, DMatrix::zeros(4, 1));
}

#[test]
pub fn gnsf_needs_structure() {
    let model = Pendulum::default();
    let err = Integrator::new(&config(IntegratorType::Gnsf), 0.1, &model, None).unwrap_err();
    assert!(
        matches!(&err, OcpError::MissingStructuralModel { model, .. } if model == Pendulum::NAME),
        "{err}"
    );
}

#[test]
pub fn invalid_step_count() {
    let cfg = IntegratorConfig {
        num_steps: 0,
        ..config(IntegratorType::Erk)
    };
    let err = Integrator::new(&cfg, 0.1, &DoubleIntegrator, None).unwrap_err();
    assert!(matches!(err, OcpError::Configuration(_)), "{err}");
}

#[test]
pub fn diverging_newton_reports_stage() {
    let model = Pendulum::default();
    let (x, u) = pendulum_point();
    let cfg = IntegratorConfig {
        newton_iter: 1,
        newton_tol: 1e-14,
        ..config(IntegratorType::Irk)
    };

    let integrator = Integrator::new(&cfg, 0.5, &model, None).unwrap();
    let err = integrator.forward(&model, &x, &u).unwrap_err();

    assert!(matches!(err, crate::StepError::Diverged { iterations: 1, .. }), "{err:?}");
    assert!(matches!(
        err.at(7),
        OcpError::IntegratorDivergence { stage: 7, .. }
    ));
}
