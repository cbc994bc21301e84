use nalgebra::{DMatrix, DVector};

use crate::common::QpOptions;
use crate::error::OcpError;
use crate::math::{max, norm_inf};
use crate::traits::{LinearSolver, ProgressMonitor};

/// Dense convex quadratic program
///
/// ```txt
///       min 0.5 * z' H z + g' z
///        z
///
/// subject to
///
///       A_eq z = b_eq
///       lc <= C z <= uc
/// ```
///
/// Rows of `C` with `lc == uc` are treated as equalities, infinite
/// bounds are dropped.
#[derive(Debug, Clone)]
pub struct DenseQp {
    pub h: DMatrix<f64>,
    pub g: DVector<f64>,
    pub a_eq: DMatrix<f64>,
    pub b_eq: DVector<f64>,
    pub c: DMatrix<f64>,
    pub lc: DVector<f64>,
    pub uc: DVector<f64>,
}

/// Primal-dual solution. Multipliers follow the Lagrangian
/// `f + lam_eq'(A_eq z - b_eq) + lam_upper'(C z - uc) + lam_lower'(lc - C z)`.
#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub obj: f64,
    pub lam_eq: DVector<f64>,
    pub lam_lower: DVector<f64>,
    pub lam_upper: DVector<f64>,
    /// `C z - lc`, infinite where the lower bound is.
    pub slack_lower: DVector<f64>,
    /// `uc - C z`, infinite where the upper bound is.
    pub slack_upper: DVector<f64>,
    pub iterations: usize,
    /// False when the iteration limit was hit on a primal feasible point.
    pub converged: bool,
}

/// Starting multipliers and slacks per row of `C`, in the layout of
/// [`QpSolution`]. Non-positive or non-finite entries fall back to the
/// cold start.
#[derive(Debug, Clone)]
pub struct WarmStart {
    pub lam_lower: DVector<f64>,
    pub lam_upper: DVector<f64>,
    pub slack_lower: DVector<f64>,
    pub slack_upper: DVector<f64>,
}

/// Where a row of `C` ended up.
#[derive(Debug, Clone, Copy)]
enum RowKind {
    /// Index into the equality rows.
    Equality(usize),
    /// Indices into the inequality rows for the lower and upper side.
    Inequality(Option<usize>, Option<usize>),
}

/// Primal-dual interior point method for convex QPs.
///
/// Internally the problem is brought into the form
///
/// ```txt
///       g(z) = Ae z - be = 0
///       h(z) = Ai z - bi <= 0
/// ```
///
/// and solved by Newton steps on the perturbed KKT conditions with
/// barrier coefficient `gamma`, centering parameter `sigma` and
/// step-to-boundary factor `xi`.
pub fn qp(
    prob: &DenseQp,
    solver: &dyn LinearSolver,
    opt: &QpOptions,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<QpSolution, OcpError> {
    qp_warm(prob, None, solver, opt, progress)
}

/// [`qp`] with the inequality slacks and multipliers initialized from
/// `warm` where it holds usable values.
pub fn qp_warm(
    prob: &DenseQp,
    warm: Option<&WarmStart>,
    solver: &dyn LinearSolver,
    opt: &QpOptions,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<QpSolution, OcpError> {
    let nx = prob.g.len();
    let nc = prob.c.nrows();
    if let Some(warm) = warm {
        for (name, v) in [
            ("warm start lam_lower", &warm.lam_lower),
            ("warm start lam_upper", &warm.lam_upper),
            ("warm start slack_lower", &warm.slack_lower),
            ("warm start slack_upper", &warm.slack_upper),
        ] {
            if v.len() != nc {
                return Err(OcpError::dims(name, nc, v.len()));
            }
        }
    }
    if prob.h.shape() != (nx, nx) {
        return Err(OcpError::dims("QP Hessian", nx, prob.h.nrows()));
    }
    if prob.a_eq.ncols() != nx && prob.a_eq.nrows() > 0 {
        return Err(OcpError::dims("QP equality columns", nx, prob.a_eq.ncols()));
    }
    if prob.c.ncols() != nx && nc > 0 {
        return Err(OcpError::dims("QP constraint columns", nx, prob.c.ncols()));
    }
    opt.validate()?;
    let (xi, sigma, z0, alpha_min, mu_threshold, max_step_size) = (
        opt.xi,
        opt.sigma,
        opt.z0,
        opt.alpha_min,
        opt.mu_threshold,
        opt.max_step_size,
    );

    // Split up linear constraints.
    let mut rows = Vec::with_capacity(nc);
    let mut ieq: Vec<(usize, f64)> = Vec::new();
    let mut iiq: Vec<(usize, f64, f64)> = Vec::new(); // (row, sign, bound)
    let neq0 = prob.a_eq.nrows();
    for i in 0..nc {
        let (li, ui) = (prob.lc[i], prob.uc[i]);
        if (ui - li).abs() <= f64::EPSILON {
            rows.push(RowKind::Equality(neq0 + ieq.len()));
            ieq.push((i, ui));
            continue;
        }
        let lower = if li.is_finite() {
            iiq.push((i, -1.0, -li));
            Some(iiq.len() - 1)
        } else {
            None
        };
        let upper = if ui.is_finite() {
            iiq.push((i, 1.0, ui));
            Some(iiq.len() - 1)
        } else {
            None
        };
        rows.push(RowKind::Inequality(lower, upper));
    }

    let neq = neq0 + ieq.len();
    let niq = iiq.len();
    let mut ae = DMatrix::zeros(neq, nx);
    let mut be = DVector::zeros(neq);
    if neq0 > 0 {
        ae.view_mut((0, 0), (neq0, nx)).copy_from(&prob.a_eq);
        be.rows_mut(0, neq0).copy_from(&prob.b_eq);
    }
    for (k, &(i, b)) in ieq.iter().enumerate() {
        ae.row_mut(neq0 + k).copy_from(&prob.c.row(i));
        be[neq0 + k] = b;
    }
    let mut ai = DMatrix::zeros(niq, nx);
    let mut bi = DVector::zeros(niq);
    for (k, &(i, sign, b)) in iiq.iter().enumerate() {
        ai.row_mut(k).copy_from(&(prob.c.row(i) * sign));
        bi[k] = b;
    }

    let objective = |x: &DVector<f64>| 0.5 * x.dot(&(&prob.h * x)) + prob.g.dot(x);

    // Evaluate cost f(x0) and constraints g(x0), h(x0)
    let mut x = DVector::zeros(nx);
    let mut f = objective(&x);
    let mut h = &ai * &x - &bi;
    let mut g = &ae * &x - &be;

    // Initialize gamma, lam, mu, z, e.
    let mut gamma = 1.0; // barrier coefficient
    let mut lam = DVector::zeros(neq);
    let mut z = if opt.init_slacks_from_constraints {
        h.map(|hk| if hk < -z0 { -hk } else { z0 })
    } else {
        DVector::from_element(niq, z0)
    };
    let mut mu = z.map(|zk| if gamma / zk > z0 { gamma / zk } else { z0 });
    if let Some(warm) = warm {
        // keep clear of the boundary, the first Newton step has to move
        let floor = opt.feas_tol.sqrt();
        for (k, &(i, sign, _)) in iiq.iter().enumerate() {
            let (slack, lam_k) = if sign < 0.0 {
                (warm.slack_lower[i], warm.lam_lower[i])
            } else {
                (warm.slack_upper[i], warm.lam_upper[i])
            };
            if slack.is_finite() && slack > 0.0 {
                z[k] = slack.max(floor);
            }
            if lam_k.is_finite() && lam_k > 0.0 {
                mu[k] = lam_k.max(floor);
            }
        }
        if niq > 0 {
            gamma = opt.sigma * z.dot(&mu) / (niq as f64);
        }
    }

    let kkt_conditions = |x: &DVector<f64>,
                          z: &DVector<f64>,
                          lam: &DVector<f64>,
                          mu: &DVector<f64>,
                          g: &DVector<f64>,
                          h: &DVector<f64>,
                          f: f64,
                          f0: f64|
     -> (DVector<f64>, [f64; 4]) {
        let l_x = &prob.h * x + &prob.g + ae.transpose() * lam + ai.transpose() * mu;
        let feascond = norm_inf(g.as_slice()).max(max(h.as_slice()))
            / (1.0 + norm_inf(x.as_slice()).max(norm_inf(z.as_slice())));
        let gradcond =
            norm_inf(l_x.as_slice()) / (1.0 + norm_inf(lam.as_slice()).max(norm_inf(mu.as_slice())));
        let compcond = z.dot(mu) / (1.0 + norm_inf(x.as_slice()));
        let costcond = (f - f0).abs() / (1.0 + f0.abs());
        (l_x, [feascond, gradcond, compcond, costcond])
    };
    let is_converged = |c: &[f64; 4]| {
        c[0] < opt.feas_tol && c[1] < opt.grad_tol && c[2] < opt.comp_tol && c[3] < opt.cost_tol
    };

    // check tolerance
    let mut f0 = f;
    let (mut l_x, mut cond) = kkt_conditions(&x, &z, &lam, &mu, &g, &h, f, f0);

    let mut iterations = 0;
    if let Some(progress) = progress {
        progress.update(iterations, cond[0], cond[1], cond[2], cond[3], gamma, 0.0, f, 0.0, 0.0);
    }
    let mut failed = false;
    let mut converged = is_converged(&cond);

    // Newton iterations.
    while !converged && iterations < opt.max_it {
        iterations += 1;

        // Compute update step.
        let zinv = z.map(|v| v.recip());
        let ai_t = ai.transpose();

        // M = H + Ai' * diag(mu ./ z) * Ai
        let mut scaled = ai.clone();
        for (k, mut row) in scaled.row_iter_mut().enumerate() {
            row *= mu[k] * zinv[k];
        }
        let m_mat = &prob.h + &ai_t * scaled;

        // N = Lx + Ai' * diag(1 ./ z) * (mu .* h + gamma)
        let n = &l_x + &ai_t * zinv.component_mul(&(mu.component_mul(&h).add_scalar(gamma)));

        let dxdlam = {
            let mut a_mat = DMatrix::zeros(nx + neq, nx + neq);
            a_mat.view_mut((0, 0), (nx, nx)).copy_from(&m_mat);
            a_mat.view_mut((0, nx), (nx, neq)).copy_from(&ae.transpose());
            a_mat.view_mut((nx, 0), (neq, nx)).copy_from(&ae);
            let mut b = DVector::zeros(nx + neq);
            b.rows_mut(0, nx).copy_from(&(-&n));
            b.rows_mut(nx, neq).copy_from(&(-&g));
            if solver.solve(a_mat, &mut b).is_err() {
                failed = true;
                break;
            }
            b
        };
        if dxdlam.iter().any(|v| v.is_nan()) || dxdlam.norm() > max_step_size {
            failed = true;
            break;
        }
        let dx = dxdlam.rows(0, nx).into_owned();
        let dlam = dxdlam.rows(nx, neq).into_owned();
        let dz = -&h - &z - &ai * &dx;
        let dmu = -&mu + zinv.component_mul(&(mu.component_mul(&dz).map(|v| gamma - v)));

        // do the update
        let alphap = (0..niq)
            .filter(|&k| dz[k] < 0.0)
            .map(|k| z[k] / -dz[k])
            .fold(f64::INFINITY, f64::min);
        let alphap = (xi * alphap).min(1.0);
        let alphad = (0..niq)
            .filter(|&k| dmu[k] < 0.0)
            .map(|k| mu[k] / -dmu[k])
            .fold(f64::INFINITY, f64::min);
        let alphad = (xi * alphad).min(1.0);

        x += &dx * alphap;
        z += &dz * alphap;
        lam += &dlam * alphad;
        mu += &dmu * alphad;
        if niq > 0 {
            gamma = sigma * z.dot(&mu) / (niq as f64);
        }

        // evaluate cost, constraints
        f = objective(&x);
        h = &ai * &x - &bi;
        g = &ae * &x - &be;

        (l_x, cond) = kkt_conditions(&x, &z, &lam, &mu, &g, &h, f, f0);
        log::trace!(
            "qp {iterations:3}: feas {:.2e} grad {:.2e} comp {:.2e} cost {:.2e} gamma {gamma:.2e}",
            cond[0],
            cond[1],
            cond[2],
            cond[3]
        );

        if let Some(progress) = progress {
            progress.update(
                iterations,
                cond[0],
                cond[1],
                cond[2],
                cond[3],
                gamma,
                dx.norm(),
                f,
                alphap,
                alphad,
            );
        }
        if is_converged(&cond) {
            converged = true;
            log::trace!("qp converged in {iterations} iterations");
        } else {
            if x.iter().any(|v| v.is_nan())
                || alphap < alpha_min
                || alphad < alpha_min
                || (niq > 0 && (gamma < f64::EPSILON || gamma > 1.0 / f64::EPSILON))
            {
                failed = true;
                break;
            }
            f0 = f;
        }
    }

    if !converged {
        if failed {
            return Err(OcpError::QpInfeasible(format!(
                "numerically failed after {iterations} iterations (feascond {:.2e})",
                cond[0]
            )));
        }
        if cond[0] > opt.feas_tol.sqrt() {
            return Err(OcpError::QpInfeasible(format!(
                "not converged in {iterations} iterations, feascond {:.2e}",
                cond[0]
            )));
        }
        log::warn!(
            "qp: iteration limit {} reached, accepting primal feasible point (gradcond {:.2e}, compcond {:.2e})",
            opt.max_it,
            cond[1],
            cond[2]
        );
    }

    // zero out multipliers on non-binding constraints
    for k in 0..niq {
        if h[k] < -opt.feas_tol && mu[k] < mu_threshold {
            mu[k] = 0.0;
        }
    }

    // re-package multipliers per row of C
    let cz = &prob.c * &x;
    let mut lam_lower = DVector::zeros(nc);
    let mut lam_upper = DVector::zeros(nc);
    let mut slack_lower = DVector::from_element(nc, f64::INFINITY);
    let mut slack_upper = DVector::from_element(nc, f64::INFINITY);
    for (i, row) in rows.iter().enumerate() {
        match *row {
            RowKind::Equality(k) => {
                lam_upper[i] = lam[k].max(0.0);
                lam_lower[i] = (-lam[k]).max(0.0);
                slack_lower[i] = 0.0;
                slack_upper[i] = 0.0;
            }
            RowKind::Inequality(lower, upper) => {
                if let Some(k) = lower {
                    lam_lower[i] = mu[k];
                    slack_lower[i] = cz[i] - prob.lc[i];
                }
                if let Some(k) = upper {
                    lam_upper[i] = mu[k];
                    slack_upper[i] = prob.uc[i] - cz[i];
                }
            }
        }
    }

    Ok(QpSolution {
        obj: f,
        lam_eq: lam.rows(0, neq0).into_owned(),
        lam_lower,
        lam_upper,
        slack_lower,
        slack_upper,
        x,
        iterations,
        converged,
    })
}
