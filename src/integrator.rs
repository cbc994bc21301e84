use nalgebra::{DMatrix, DVector};

use crate::common::{IntegratorConfig, IntegratorType};
use crate::error::OcpError;
use crate::gnsf::GnsfMatrices;
use crate::linsol::LuSolver;
use crate::math::{add_block, all_finite, block, central_jacobian, norm_inf, segment, stack};
use crate::traits::{Dynamics, LinearSolver};

/// Runge-Kutta coefficients `a` and weights `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct ButcherTableau {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl ButcherTableau {
    /// Euler, midpoint, Kutta's third order or the classic fourth order method.
    pub fn explicit(stages: usize) -> Result<Self, OcpError> {
        let (a, b): (Vec<f64>, Vec<f64>) = match stages {
            1 => (vec![0.0], vec![1.0]),
            2 => (vec![0.0, 0.0, 0.5, 0.0], vec![0.0, 1.0]),
            3 => (
                vec![0.0, 0.0, 0.0, 0.5, 0.0, 0.0, -1.0, 2.0, 0.0],
                vec![1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0],
            ),
            4 => (
                vec![
                    0.0, 0.0, 0.0, 0.0, //
                    0.5, 0.0, 0.0, 0.0, //
                    0.0, 0.5, 0.0, 0.0, //
                    0.0, 0.0, 1.0, 0.0,
                ],
                vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            ),
            _ => {
                return Err(OcpError::config(format!(
                    "explicit Runge-Kutta supports 1 to 4 stages, got {stages}"
                )))
            }
        };
        Ok(Self {
            a: DMatrix::from_row_slice(stages, stages, &a),
            b: DVector::from_vec(b),
        })
    }

    /// Gauss-Legendre collocation of order `2 * stages`.
    pub fn gauss_legendre(stages: usize) -> Result<Self, OcpError> {
        let (a, b): (Vec<f64>, Vec<f64>) = match stages {
            1 => (vec![0.5], vec![1.0]),
            2 => {
                let r3 = 3f64.sqrt() / 6.0;
                (vec![0.25, 0.25 - r3, 0.25 + r3, 0.25], vec![0.5, 0.5])
            }
            3 => {
                let r15 = 15f64.sqrt();
                (
                    vec![
                        5.0 / 36.0,
                        2.0 / 9.0 - r15 / 15.0,
                        5.0 / 36.0 - r15 / 30.0,
                        5.0 / 36.0 + r15 / 24.0,
                        2.0 / 9.0,
                        5.0 / 36.0 - r15 / 24.0,
                        5.0 / 36.0 + r15 / 30.0,
                        2.0 / 9.0 + r15 / 15.0,
                        5.0 / 36.0,
                    ],
                    vec![5.0 / 18.0, 4.0 / 9.0, 5.0 / 18.0],
                )
            }
            _ => {
                return Err(OcpError::config(format!(
                    "Gauss-Legendre collocation supports 1 to 3 stages, got {stages}"
                )))
            }
        };
        Ok(Self {
            a: DMatrix::from_row_slice(stages, stages, &a),
            b: DVector::from_vec(b),
        })
    }

    pub fn stages(&self) -> usize {
        self.b.len()
    }
}

/// Reasons a single integration step can fail. Mapped to [`OcpError`]
/// together with the stage index by [`StepError::at`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    Diverged { iterations: usize, residual: f64 },
    NonFinite,
}

impl StepError {
    pub fn at(self, stage: usize) -> OcpError {
        match self {
            StepError::Diverged {
                iterations,
                residual,
            } => OcpError::IntegratorDivergence {
                stage,
                iterations,
                residual,
            },
            StepError::NonFinite => OcpError::NanDetected(format!("integrator at stage {stage}")),
        }
    }
}

/// Newton settings of the implicit schemes.
#[derive(Debug, Clone, Copy)]
struct Newton {
    max_iter: usize,
    tol: f64,
}

/// Explicit Runge-Kutta scheme.
#[derive(Debug, Clone)]
pub struct ExplicitRk {
    tableau: ButcherTableau,
    h: f64,
    num_steps: usize,
}

/// Gauss-Legendre collocation with a full Newton iteration on the stage derivatives.
#[derive(Debug, Clone)]
pub struct ImplicitRk {
    tableau: ButcherTableau,
    h: f64,
    num_steps: usize,
    newton: Newton,
}

/// Gauss-Legendre collocation on the structured form. The affine part is
/// eliminated once at configuration time and the Newton iteration runs over
/// the outputs of the nonlinear term only.
#[derive(Debug, Clone)]
pub struct GnsfRk {
    tableau: ButcherTableau,
    num_steps: usize,
    newton: Newton,
    gnsf: GnsfMatrices,
    /// `h (A_rk ⊗ I)`, stage states from stage derivatives.
    ha: DMatrix<f64>,
    /// `(I - h A_rk ⊗ A)^-1 (1 ⊗ I)`, stage derivatives from the affine term.
    k_aff: DMatrix<f64>,
    /// `(I - h A_rk ⊗ A)^-1 (I ⊗ C)`, stage derivatives per nonlinearity output.
    k_v: DMatrix<f64>,
    /// `ha k_v`, stage states per nonlinearity output.
    x_v: DMatrix<f64>,
    /// Stage derivative and stage state sensitivities at fixed `v`.
    k_x: DMatrix<f64>,
    k_u: DMatrix<f64>,
    x_x: DMatrix<f64>,
    x_u: DMatrix<f64>,
    /// `h (b' ⊗ I)`.
    weights: DMatrix<f64>,
}

/// Integration scheme of one shooting interval, fixed at configuration time.
#[derive(Debug, Clone)]
pub enum Integrator {
    Erk(ExplicitRk),
    Irk(ImplicitRk),
    Gnsf(Box<GnsfRk>),
    /// Zero-length interval: `x_next = x`.
    Hold,
}

/// End state of an interval and its sensitivities.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub x_next: DVector<f64>,
    /// `d x_next / d x`.
    pub a: DMatrix<f64>,
    /// `d x_next / d u`.
    pub b: DMatrix<f64>,
}

impl Integrator {
    /// Sets up the scheme for an interval of length `dt`.
    pub fn new(
        config: &IntegratorConfig,
        dt: f64,
        dynamics: &dyn Dynamics,
        gnsf: Option<&GnsfMatrices>,
    ) -> Result<Self, OcpError> {
        if dt == 0.0 {
            return Ok(Integrator::Hold);
        }
        if config.num_steps == 0 {
            return Err(OcpError::config("integrator num_steps must be positive"));
        }
        let h = dt / config.num_steps as f64;
        let newton = Newton {
            max_iter: config.newton_iter,
            tol: config.newton_tol,
        };
        Ok(match config.kind {
            IntegratorType::Erk => Integrator::Erk(ExplicitRk {
                tableau: ButcherTableau::explicit(config.num_stages.unwrap_or(4))?,
                h,
                num_steps: config.num_steps,
            }),
            IntegratorType::Irk => Integrator::Irk(ImplicitRk {
                tableau: ButcherTableau::gauss_legendre(config.num_stages.unwrap_or(2))?,
                h,
                num_steps: config.num_steps,
                newton,
            }),
            IntegratorType::Gnsf => {
                let gnsf = gnsf.ok_or_else(|| OcpError::MissingStructuralModel {
                    model: dynamics.name().to_string(),
                    reason: "GNSF integrator requested without a structural model".to_string(),
                })?;
                let tableau = ButcherTableau::gauss_legendre(config.num_stages.unwrap_or(2))?;
                Integrator::Gnsf(Box::new(GnsfRk::new(
                    tableau,
                    h,
                    config.num_steps,
                    newton,
                    gnsf.clone(),
                )?))
            }
        })
    }

    pub fn kind(&self) -> Option<IntegratorType> {
        match self {
            Integrator::Erk(_) => Some(IntegratorType::Erk),
            Integrator::Irk(_) => Some(IntegratorType::Irk),
            Integrator::Gnsf(_) => Some(IntegratorType::Gnsf),
            Integrator::Hold => None,
        }
    }

    /// End state of the interval starting at `x` under constant control `u`.
    pub fn forward(
        &self,
        dynamics: &dyn Dynamics,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, StepError> {
        self.integrate(dynamics, x, u, false).map(|(x_next, _)| x_next)
    }

    /// End state and its sensitivities with respect to `x` and `u`.
    pub fn linearize(
        &self,
        dynamics: &dyn Dynamics,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<StepResult, StepError> {
        let (x_next, sens) = self.integrate(dynamics, x, u, true)?;
        let (a, b) = sens.unwrap_or_else(|| {
            (
                DMatrix::identity(x.len(), x.len()),
                DMatrix::zeros(x.len(), u.len()),
            )
        });
        Ok(StepResult { x_next, a, b })
    }

    fn integrate(
        &self,
        dynamics: &dyn Dynamics,
        x: &DVector<f64>,
        u: &DVector<f64>,
        sens: bool,
    ) -> Result<(DVector<f64>, Option<(DMatrix<f64>, DMatrix<f64>)>), StepError> {
        let num_steps = match self {
            Integrator::Erk(rk) => rk.num_steps,
            Integrator::Irk(rk) => rk.num_steps,
            Integrator::Gnsf(rk) => rk.num_steps,
            Integrator::Hold => return Ok((x.clone(), None)),
        };

        let (nx, nu) = (x.len(), u.len());
        let mut xk = x.clone();
        let mut a_tot = DMatrix::identity(nx, nx);
        let mut b_tot = DMatrix::zeros(nx, nu);
        for _ in 0..num_steps {
            let (x_next, step_sens) = self.step(dynamics, &xk, u, sens)?;
            if !all_finite(x_next.as_slice()) {
                return Err(StepError::NonFinite);
            }
            if let Some((a, b)) = step_sens {
                b_tot = &a * b_tot + b;
                a_tot = a * a_tot;
            }
            xk = x_next;
        }
        if !sens {
            return Ok((xk, None));
        }
        if !(all_finite(a_tot.as_slice()) && all_finite(b_tot.as_slice())) {
            return Err(StepError::NonFinite);
        }
        Ok((xk, Some((a_tot, b_tot))))
    }

    fn step(
        &self,
        dynamics: &dyn Dynamics,
        x: &DVector<f64>,
        u: &DVector<f64>,
        sens: bool,
    ) -> Result<Step, StepError> {
        match self {
            Integrator::Erk(rk) => Ok(rk.step(dynamics, x, u, sens)),
            Integrator::Irk(rk) => rk.step(dynamics, x, u, sens),
            Integrator::Gnsf(rk) => rk.step(dynamics, x, u, sens),
            Integrator::Hold => Ok((x.clone(), None)),
        }
    }
}

type Step = (DVector<f64>, Option<(DMatrix<f64>, DMatrix<f64>)>);

impl ExplicitRk {
    fn step(&self, dynamics: &dyn Dynamics, x: &DVector<f64>, u: &DVector<f64>, sens: bool) -> Step {
        let (nx, nu) = (x.len(), u.len());
        let (a, b, h) = (&self.tableau.a, &self.tableau.b, self.h);
        let s = self.tableau.stages();

        let mut k: Vec<DVector<f64>> = Vec::with_capacity(s);
        let mut k_x: Vec<DMatrix<f64>> = Vec::with_capacity(s);
        let mut k_u: Vec<DMatrix<f64>> = Vec::with_capacity(s);
        for j in 0..s {
            let mut xj = x.clone();
            for l in 0..j {
                if a[(j, l)] != 0.0 {
                    xj += &k[l] * (h * a[(j, l)]);
                }
            }
            if sens {
                let (jx, ju) = dynamics.jacobian(&xj, u);
                let mut dxj_dx = DMatrix::identity(nx, nx);
                let mut dxj_du = DMatrix::zeros(nx, nu);
                for l in 0..j {
                    if a[(j, l)] != 0.0 {
                        dxj_dx += &k_x[l] * (h * a[(j, l)]);
                        dxj_du += &k_u[l] * (h * a[(j, l)]);
                    }
                }
                k_x.push(&jx * dxj_dx);
                k_u.push(&jx * dxj_du + ju);
            }
            k.push(dynamics.f(&xj, u));
        }

        let mut x_next = x.clone();
        for j in 0..s {
            x_next += &k[j] * (h * b[j]);
        }
        if !sens {
            return (x_next, None);
        }
        let mut a_step = DMatrix::identity(nx, nx);
        let mut b_step = DMatrix::zeros(nx, nu);
        for j in 0..s {
            a_step += &k_x[j] * (h * b[j]);
            b_step += &k_u[j] * (h * b[j]);
        }
        (x_next, Some((a_step, b_step)))
    }
}

impl ImplicitRk {
    /// Stage states `X_j = x + h sum_l a_jl K_l`.
    fn stage_points(&self, x: &DVector<f64>, k: &DVector<f64>) -> Vec<DVector<f64>> {
        let (nx, s) = (x.len(), self.tableau.stages());
        (0..s)
            .map(|j| {
                let mut xj = x.clone();
                for l in 0..s {
                    xj += segment(k, l * nx, nx) * (self.h * self.tableau.a[(j, l)]);
                }
                xj
            })
            .collect()
    }

    /// `dR/dK` with `R_j = K_j - f(X_j, u)`.
    fn residual_jacobian(&self, jx: &[DMatrix<f64>], nx: usize) -> DMatrix<f64> {
        let s = self.tableau.stages();
        let mut jr = DMatrix::identity(s * nx, s * nx);
        for j in 0..s {
            for l in 0..s {
                add_block(&mut jr, j * nx, l * nx, &jx[j], -self.h * self.tableau.a[(j, l)]);
            }
        }
        jr
    }

    fn step(
        &self,
        dynamics: &dyn Dynamics,
        x: &DVector<f64>,
        u: &DVector<f64>,
        sens: bool,
    ) -> Result<Step, StepError> {
        let (nx, nu, s) = (x.len(), u.len(), self.tableau.stages());
        let mut k = stack(&dynamics.f(x, u), s);

        let mut iterations = 0;
        loop {
            let xs = self.stage_points(x, &k);
            let mut r = k.clone();
            for (j, xj) in xs.iter().enumerate() {
                let mut rj = r.rows_mut(j * nx, nx);
                rj -= &dynamics.f(xj, u);
            }
            let residual = norm_inf(r.as_slice());
            if !residual.is_finite() {
                return Err(StepError::NonFinite);
            }
            if residual <= self.newton.tol * (1.0 + norm_inf(k.as_slice())) {
                break;
            }
            if iterations == self.newton.max_iter {
                return Err(StepError::Diverged {
                    iterations,
                    residual,
                });
            }
            let jx: Vec<DMatrix<f64>> = xs.iter().map(|xj| dynamics.jacobian(xj, u).0).collect();
            LuSolver
                .solve(self.residual_jacobian(&jx, nx), &mut r)
                .map_err(|_| StepError::Diverged {
                    iterations,
                    residual,
                })?;
            k -= r;
            iterations += 1;
        }

        let mut x_next = x.clone();
        for j in 0..s {
            x_next += segment(&k, j * nx, nx) * (self.h * self.tableau.b[j]);
        }
        if !sens {
            return Ok((x_next, None));
        }

        let xs = self.stage_points(x, &k);
        let jacs: Vec<_> = xs.iter().map(|xj| dynamics.jacobian(xj, u)).collect();
        let jx: Vec<DMatrix<f64>> = jacs.iter().map(|(jx, _)| jx.clone()).collect();
        let mut rhs = DMatrix::zeros(s * nx, nx + nu);
        for (j, (jxj, juj)) in jacs.iter().enumerate() {
            add_block(&mut rhs, j * nx, 0, jxj, 1.0);
            add_block(&mut rhs, j * nx, nx, juj, 1.0);
        }
        let dk = self
            .residual_jacobian(&jx, nx)
            .lu()
            .solve(&rhs)
            .ok_or(StepError::Diverged {
                iterations,
                residual: f64::NAN,
            })?;

        let mut a_step = DMatrix::identity(nx, nx);
        let mut b_step = DMatrix::zeros(nx, nu);
        for j in 0..s {
            let w = self.h * self.tableau.b[j];
            a_step += block(&dk, j * nx, 0, nx, nx) * w;
            b_step += block(&dk, j * nx, nx, nx, nu) * w;
        }
        Ok((x_next, Some((a_step, b_step))))
    }
}

impl GnsfRk {
    fn new(
        tableau: ButcherTableau,
        h: f64,
        num_steps: usize,
        newton: Newton,
        gnsf: GnsfMatrices,
    ) -> Result<Self, OcpError> {
        let nx = gnsf.a.nrows();
        let s = tableau.stages();
        let ones = DMatrix::from_element(s, 1, 1.0);
        let eye_x = DMatrix::<f64>::identity(nx, nx);
        let b_row = DMatrix::from_row_slice(1, s, tableau.b.as_slice());

        let m = DMatrix::identity(s * nx, s * nx) - tableau.a.kronecker(&gnsf.a) * h;
        let m_inv = m.try_inverse().ok_or_else(|| {
            OcpError::config(format!("GNSF stage matrix singular for step length {h}"))
        })?;
        let ha = tableau.a.kronecker(&eye_x) * h;

        let k_aff = &m_inv * ones.kronecker(&eye_x);
        let k_v = &m_inv * DMatrix::<f64>::identity(s, s).kronecker(&gnsf.c_phi);
        let x_v = &ha * &k_v;
        let k_x = &k_aff * &gnsf.a;
        let k_u = &k_aff * &gnsf.b;
        let x_x = ones.kronecker(&eye_x) + &ha * &k_x;
        let x_u = &ha * &k_u;
        let weights = b_row.kronecker(&eye_x) * h;

        Ok(Self {
            tableau,
            num_steps,
            newton,
            gnsf,
            ha,
            k_aff,
            k_v,
            x_v,
            k_x,
            k_u,
            x_x,
            x_u,
            weights,
        })
    }

    fn phi(&self, dynamics: &dyn Dynamics, y: &DVector<f64>, uhat: &DVector<f64>) -> DVector<f64> {
        dynamics
            .phi(y, uhat)
            .unwrap_or_else(|| DVector::from_element(self.gnsf.n_out(), f64::NAN))
    }

    /// `dR/dv` with `R_j = v_j - phi(L_x X_j(v), L_u u)`.
    fn residual_jacobian(&self, jy: &[DMatrix<f64>]) -> DMatrix<f64> {
        let (nx, n_out) = (self.gnsf.a.nrows(), self.gnsf.n_out());
        let nv = self.x_v.ncols();
        let mut jr = DMatrix::identity(nv, nv);
        for (j, jyj) in jy.iter().enumerate() {
            let dy_dv = &self.gnsf.l_x * block(&self.x_v, j * nx, 0, nx, nv);
            add_block(&mut jr, j * n_out, 0, &(jyj * dy_dv), -1.0);
        }
        jr
    }

    fn step(
        &self,
        dynamics: &dyn Dynamics,
        x: &DVector<f64>,
        u: &DVector<f64>,
        sens: bool,
    ) -> Result<Step, StepError> {
        let g = &self.gnsf;
        let (nx, nu, s, n_out) = (x.len(), u.len(), self.tableau.stages(), g.n_out());

        let k0 = &self.k_aff * (&g.a * x + &g.b * u + &g.c);
        let x_base = stack(x, s) + &self.ha * &k0;
        let uhat = &g.l_u * u;
        let stage_outputs = |v: &DVector<f64>| -> Vec<DVector<f64>> {
            let xs = &x_base + &self.x_v * v;
            (0..s).map(|j| &g.l_x * segment(&xs, j * nx, nx)).collect()
        };
        let phi_jacobians = |ys: &[DVector<f64>]| -> Vec<DMatrix<f64>> {
            ys.iter()
                .map(|yj| central_jacobian(yj, |yp| self.phi(dynamics, yp, &uhat)))
                .collect()
        };

        let mut v = stack(&self.phi(dynamics, &(&g.l_x * x), &uhat), s);
        let mut iterations = 0;
        loop {
            let ys = stage_outputs(&v);
            let mut r = v.clone();
            for (j, yj) in ys.iter().enumerate() {
                let mut rj = r.rows_mut(j * n_out, n_out);
                rj -= &self.phi(dynamics, yj, &uhat);
            }
            let residual = norm_inf(r.as_slice());
            if !residual.is_finite() {
                return Err(StepError::NonFinite);
            }
            if residual <= self.newton.tol * (1.0 + norm_inf(v.as_slice())) {
                break;
            }
            if iterations == self.newton.max_iter {
                return Err(StepError::Diverged {
                    iterations,
                    residual,
                });
            }
            LuSolver
                .solve(self.residual_jacobian(&phi_jacobians(&ys)), &mut r)
                .map_err(|_| StepError::Diverged {
                    iterations,
                    residual,
                })?;
            v -= r;
            iterations += 1;
        }

        let k = &k0 + &self.k_v * &v;
        let x_next = x + &self.weights * &k;
        if !sens {
            return Ok((x_next, None));
        }

        // Implicit function theorem on R(v; x, u) = 0.
        let ys = stage_outputs(&v);
        let jy = phi_jacobians(&ys);
        let mut rhs = DMatrix::zeros(s * n_out, nx + nu);
        for (j, yj) in ys.iter().enumerate() {
            let ju = central_jacobian(&uhat, |up| self.phi(dynamics, yj, up));
            let jy_lx = &jy[j] * &g.l_x;
            let dx = &jy_lx * block(&self.x_x, j * nx, 0, nx, nx);
            let du = &jy_lx * block(&self.x_u, j * nx, 0, nx, nu) + ju * &g.l_u;
            add_block(&mut rhs, j * n_out, 0, &dx, 1.0);
            add_block(&mut rhs, j * n_out, nx, &du, 1.0);
        }
        let dv = self
            .residual_jacobian(&jy)
            .lu()
            .solve(&rhs)
            .ok_or(StepError::Diverged {
                iterations,
                residual: f64::NAN,
            })?;

        let dk_dx = &self.k_x + &self.k_v * block(&dv, 0, 0, s * n_out, nx);
        let dk_du = &self.k_u + &self.k_v * block(&dv, 0, nx, s * n_out, nu);
        let a_step = DMatrix::identity(nx, nx) + &self.weights * dk_dx;
        let b_step = &self.weights * dk_du;
        Ok((x_next, Some((a_step, b_step))))
    }
}
