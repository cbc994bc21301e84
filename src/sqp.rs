use std::time::Instant;

use nalgebra::DVector;

use crate::common::{Globalization, NlpSolverType, QpOptions, QpSolver, SolverOptions};
use crate::condensing::{condense, expand};
use crate::error::{OcpError, SolverStatus};
use crate::integrator::StepResult;
use crate::ipm;
use crate::linsol::LuSolver;
use crate::math::{all_finite, norm_1, norm_inf};
use crate::qp::{self, Iterate, OcpQpSolution};
use crate::stage::Stage;
use crate::stats::{IterationStats, SolverStats};
use crate::traits::{LogProgress, ProgressMonitor};

/// KKT residuals of the multiple-shooting problem, infinity norms.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Residuals {
    pub stat: f64,
    pub eq: f64,
    pub ineq: f64,
    pub comp: f64,
}

impl Residuals {
    /// No step size test: a linear-quadratic problem stops right after
    /// its single full Newton step.
    fn converged(&self, opts: &SolverOptions) -> bool {
        self.stat <= opts.tol_stat
            && self.eq <= opts.tol_eq
            && self.ineq <= opts.tol_ineq
            && self.comp <= opts.tol_comp
    }

    fn as_array(&self) -> [f64; 4] {
        [self.stat, self.eq, self.ineq, self.comp]
    }
}

/// Residuals at `it`, given the linearization at the same point.
pub(crate) fn residuals(stages: &[Stage], it: &Iterate, lin: &[StepResult]) -> Residuals {
    let mut res = Residuals::default();
    for stage in stages {
        let k = stage.index;
        let (nx, nu) = (stage.nx, stage.nu);

        let mut stat = stage.cost.gradient(&it.x[k], &it.u[k]);
        if !stage.is_terminal() {
            let step = &lin[k];
            let mut sx = stat.rows_mut(0, nx);
            sx += step.a.transpose() * &it.pi[k];
            let mut su = stat.rows_mut(nx, nu);
            su += step.b.transpose() * &it.pi[k];
            res.eq = res.eq.max(norm_inf((&step.x_next - &it.x[k + 1]).as_slice()));
        }
        if k > 0 {
            let mut sx = stat.rows_mut(0, nx);
            sx -= &it.pi[k - 1];
        }

        let cons = &stage.constraints;
        let nc = cons.nc();
        if nc > 0 {
            let g_mat = cons.matrix(nx, nu);
            let lam_l = it.lam[k].rows(0, nc);
            let lam_u = it.lam[k].rows(nc, nc);
            stat += g_mat.transpose() * (lam_u - lam_l);

            let gw = &g_mat * it.w(k);
            let (lower, upper) = (cons.lower(), cons.upper());
            for i in 0..nc {
                let (sl, su) = (gw[i] - lower[i], upper[i] - gw[i]);
                if sl.is_finite() {
                    res.ineq = res.ineq.max(-sl);
                    res.comp = res.comp.max((it.lam[k][i] * sl).abs());
                }
                if su.is_finite() {
                    res.ineq = res.ineq.max(-su);
                    res.comp = res.comp.max((it.lam[k][nc + i] * su).abs());
                }
            }
        }
        res.stat = res.stat.max(norm_inf(stat.as_slice()));
    }
    res
}

/// Objective plus L1 penalty on shooting defects and bound violations.
/// `None` when the trial point cannot be simulated.
fn merit(stages: &[Stage], x: &[DVector<f64>], u: &[DVector<f64>], nu: f64) -> Option<f64> {
    let mut objective = 0.0;
    let mut infeasibility = 0.0;
    for stage in stages {
        let k = stage.index;
        objective += stage.cost.value(&x[k], &u[k]);
        if let Some((dynamics, integrator)) = stage.transition() {
            let x_next = integrator.forward(dynamics, &x[k], &u[k]).ok()?;
            infeasibility += norm_1((x_next - &x[k + 1]).as_slice());
        }
        infeasibility += violation(stage, &x[k], &u[k]);
    }
    let value = objective + nu * infeasibility;
    value.is_finite().then_some(value)
}

/// L1 norm of the constraint violation.
fn violation(stage: &Stage, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
    let cons = &stage.constraints;
    if cons.nc() == 0 {
        return 0.0;
    }
    let w = crate::constraints::concat(&[x, u]);
    let gw = cons.matrix(stage.nx, stage.nu) * w;
    let (lower, upper) = (cons.lower(), cons.upper());
    (0..cons.nc())
        .map(|i| (lower[i] - gw[i]).max(gw[i] - upper[i]).max(0.0))
        .sum()
}

fn objective(stages: &[Stage], it: &Iterate) -> f64 {
    stages
        .iter()
        .map(|s| s.cost.value(&it.x[s.index], &it.u[s.index]))
        .sum()
}

/// Convex combination `(1 - alpha) old + alpha new`, taking `new` where
/// either side is infinite.
fn blend(old: &mut DVector<f64>, new: &DVector<f64>, alpha: f64) {
    for (o, &n) in old.iter_mut().zip(new.iter()) {
        *o = if o.is_finite() && n.is_finite() {
            (1.0 - alpha) * *o + alpha * n
        } else {
            n
        };
    }
}

/// SQP driver state across iterations of one solve.
struct Sqp<'a> {
    stages: &'a [Stage],
    opts: &'a SolverOptions,
    qp_opts: QpOptions,
    num_blocks: usize,
    /// Current L1 penalty weight of the merit function.
    penalty: f64,
}

/// Runs the SQP iteration from `it`, updating it in place.
///
/// Returns the terminal status for converged, iteration-limited and
/// line-search-stalled solves, errors for aborted ones.
pub(crate) fn solve(
    stages: &[Stage],
    opts: &SolverOptions,
    it: &mut Iterate,
    stats: &mut SolverStats,
) -> Result<SolverStatus, OcpError> {
    for stage in stages {
        stage.constraints.check_order(stage.index)?;
    }
    let n = stages.len() - 1;
    let num_blocks = match opts.qp_solver {
        QpSolver::FullCondensingIpm => 1,
        QpSolver::PartialCondensingIpm => opts.qp_solver_cond_n.unwrap_or(n),
    };
    let qp_opts = QpOptions {
        init_slacks_from_constraints: opts.initialize_t_slacks,
        ..opts.qp.clone()
    };
    let mut sqp = Sqp {
        stages,
        opts,
        qp_opts,
        num_blocks,
        penalty: 0.0,
    };
    let start = Instant::now();
    let result = sqp.iterate(it, stats);
    stats.objective = objective(stages, it);
    stats.timings.total = start.elapsed();
    result
}

impl Sqp<'_> {
    fn iterate(&mut self, it: &mut Iterate, stats: &mut SolverStats) -> Result<SolverStatus, OcpError> {
        let opts = self.opts;
        let rti = opts.nlp_solver_type == NlpSolverType::SqpRti;
        let progress: Option<&dyn ProgressMonitor> = if opts.print_level >= 2 {
            Some(&LogProgress)
        } else {
            None
        };

        loop {
            let t0 = Instant::now();
            let lin = qp::linearize(self.stages, it)?;
            let res = residuals(self.stages, it, &lin);
            stats.timings.linearization += t0.elapsed();
            if !all_finite(&res.as_array()) {
                return Err(OcpError::NanDetected(format!(
                    "residuals at SQP iteration {}",
                    stats.sqp_iter
                )));
            }

            if !rti {
                if res.converged(opts) {
                    stats.final_residuals = Some(res.as_array());
                    log::debug!("sqp converged after {} iterations", stats.sqp_iter);
                    return Ok(SolverStatus::Success);
                }
                if stats.sqp_iter >= opts.max_iter {
                    stats.final_residuals = Some(res.as_array());
                    log::warn!(
                        "sqp: maximum number of iterations ({}) reached, res_stat {:.2e} res_eq {:.2e}",
                        opts.max_iter,
                        res.stat,
                        res.eq
                    );
                    return Ok(SolverStatus::MaxIterations);
                }
            }

            let t0 = Instant::now();
            let ocp_qp = qp::build(self.stages, it, &lin, opts)?;
            stats.timings.linearization += t0.elapsed();

            let t0 = Instant::now();
            let condensed = condense(&ocp_qp, self.num_blocks);
            stats.timings.condensing += t0.elapsed();

            let t0 = Instant::now();
            let warm = (!opts.initialize_t_slacks).then(|| warm_start(it, &ocp_qp));
            let dense_sol = ipm::qp_warm(
                &condensed.dense,
                warm.as_ref(),
                &LuSolver,
                &self.qp_opts,
                progress,
            );
            stats.timings.qp += t0.elapsed();
            let dense_sol = dense_sol?;

            let t0 = Instant::now();
            let sol = expand(&condensed, &ocp_qp, &dense_sol);
            stats.timings.condensing += t0.elapsed();
            stats.qp_iter += sol.iterations;
            check_finite(&sol, stats.sqp_iter)?;

            let t0 = Instant::now();
            let (alpha, merit) = match opts.globalization {
                Globalization::FixedStep => (Some(opts.step_length), 0.0),
                Globalization::MeritBacktracking => self.line_search(it, &sol, &ocp_qp),
            };
            stats.timings.globalization += t0.elapsed();

            let step_norm = sol
                .dx
                .iter()
                .chain(sol.du.iter())
                .map(|d| norm_inf(d.as_slice()))
                .fold(0.0, f64::max);
            let record = IterationStats {
                res_stat: res.stat,
                res_eq: res.eq,
                res_ineq: res.ineq,
                res_comp: res.comp,
                qp_status: if sol.converged { 0 } else { 1 },
                qp_iter: sol.iterations,
                alpha: alpha.unwrap_or(0.0),
                merit,
                step_norm: alpha.unwrap_or(0.0) * step_norm,
            };
            log::debug!(
                "sqp it {:3}: res_stat {:.3e} res_eq {:.3e} res_ineq {:.3e} res_comp {:.3e} qp_iter {:3} alpha {:.3}",
                stats.sqp_iter,
                record.res_stat,
                record.res_eq,
                record.res_ineq,
                record.res_comp,
                record.qp_iter,
                record.alpha
            );
            if opts.print_level >= 1 {
                log::info!(
                    "{:4} {:11.4e} {:11.4e} {:11.4e} {:11.4e} {:7} {:7} {:9.3e}",
                    stats.sqp_iter,
                    record.res_stat,
                    record.res_eq,
                    record.res_ineq,
                    record.res_comp,
                    record.qp_status,
                    record.qp_iter,
                    record.alpha
                );
            }
            stats.iterations.push(record);
            stats.sqp_iter += 1;

            let Some(alpha) = alpha else {
                log::warn!("sqp: no trial point of the line search could be evaluated");
                return Ok(SolverStatus::MinStep);
            };
            apply_step(it, &sol, alpha);

            if rti {
                return Ok(SolverStatus::Success);
            }
        }
    }

    /// Backtracking on the L1 merit function. Returns the accepted step
    /// and the merit at the current iterate. Without sufficient descent
    /// down to `alpha_min` the smallest step with a finite merit is taken,
    /// `None` when no trial point could be evaluated.
    fn line_search(
        &mut self,
        it: &Iterate,
        sol: &OcpQpSolution,
        ocp_qp: &qp::OcpQp,
    ) -> (Option<f64>, f64) {
        let opts = self.opts;
        let multipliers = sol
            .pi
            .iter()
            .chain(sol.lam.iter())
            .map(|v| norm_inf(v.as_slice()))
            .fold(0.0, f64::max);
        if self.penalty < 1.1 * multipliers {
            self.penalty = 1.1 * multipliers;
        }
        let nu = self.penalty;

        let stages = self.stages;
        let infeasibility: f64 = stages
            .iter()
            .map(|s| {
                let k = s.index;
                let defect = ocp_qp.stages[k].defect.as_slice();
                norm_1(defect) + violation(s, &it.x[k], &it.u[k])
            })
            .sum();
        let slope: f64 = ocp_qp
            .stages
            .iter()
            .enumerate()
            .map(|(k, st)| st.grad.dot(&crate::constraints::concat(&[&sol.dx[k], &sol.du[k]])))
            .sum::<f64>()
            - nu * infeasibility;
        let slope = slope.min(0.0);

        let merit0 = objective(stages, it) + nu * infeasibility;
        let mut alpha = opts.step_length;
        let mut fallback = None;
        while alpha >= opts.alpha_min {
            let x: Vec<DVector<f64>> = it.x.iter().zip(&sol.dx).map(|(x, d)| x + d * alpha).collect();
            let u: Vec<DVector<f64>> = it.u.iter().zip(&sol.du).map(|(u, d)| u + d * alpha).collect();
            if let Some(trial) = merit(stages, &x, &u, nu) {
                if trial <= merit0 + opts.eps_sufficient_descent * alpha * slope {
                    log::trace!("line search: alpha {alpha:.4} merit {trial:.6e} (from {merit0:.6e})");
                    return (Some(alpha), merit0);
                }
                fallback = Some(alpha);
            }
            alpha *= opts.alpha_reduction;
        }
        if let Some(alpha) = fallback {
            log::debug!("line search: no sufficient descent, taking alpha {alpha:.4}");
        }
        (fallback, merit0)
    }
}

fn check_finite(sol: &OcpQpSolution, iteration: usize) -> Result<(), OcpError> {
    let finite = sol
        .dx
        .iter()
        .chain(&sol.du)
        .chain(&sol.pi)
        .chain(&sol.lam)
        .all(|v| all_finite(v.as_slice()));
    if finite {
        Ok(())
    } else {
        Err(OcpError::NanDetected(format!(
            "QP solution at SQP iteration {iteration}"
        )))
    }
}

fn apply_step(it: &mut Iterate, sol: &OcpQpSolution, alpha: f64) {
    for (x, d) in it.x.iter_mut().zip(&sol.dx) {
        *x += d * alpha;
    }
    for (u, d) in it.u.iter_mut().zip(&sol.du) {
        *u += d * alpha;
    }
    for (pi, new) in it.pi.iter_mut().zip(&sol.pi) {
        blend(pi, new, alpha);
    }
    for (lam, new) in it.lam.iter_mut().zip(&sol.lam) {
        blend(lam, new, alpha);
    }
    for (t, new) in it.t.iter_mut().zip(&sol.t) {
        blend(t, new, alpha);
    }
}
