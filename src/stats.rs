use std::fmt::Write;
use std::time::Duration;

use serde::Serialize;

/// Diagnostics of one SQP iteration. The residuals are measured at the
/// iterate the QP was built on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationStats {
    pub res_stat: f64,
    pub res_eq: f64,
    pub res_ineq: f64,
    pub res_comp: f64,
    /// 0 converged, 1 iteration limit on a feasible point.
    pub qp_status: i32,
    pub qp_iter: usize,
    pub alpha: f64,
    /// L1 merit at the start of the line search, zero for fixed steps.
    pub merit: f64,
    /// Infinity norm of the primal step.
    pub step_norm: f64,
}

/// Wall time spent per phase of the last solve.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Timings {
    pub total: Duration,
    pub linearization: Duration,
    pub condensing: Duration,
    pub qp: Duration,
    pub globalization: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SolverStats {
    /// QP solves performed.
    pub sqp_iter: usize,
    /// Interior point iterations summed over all QP solves.
    pub qp_iter: usize,
    pub iterations: Vec<IterationStats>,
    /// Residuals at the returned iterate, when they were evaluated.
    pub final_residuals: Option<[f64; 4]>,
    pub timings: Timings,
    pub objective: f64,
}

impl SolverStats {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Formatted per-iteration table followed by timings.
    pub fn table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>4} {:>11} {:>11} {:>11} {:>11} {:>7} {:>7} {:>9}",
            "iter", "res_stat", "res_eq", "res_ineq", "res_comp", "qp_stat", "qp_iter", "alpha"
        );
        for (i, it) in self.iterations.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>4} {:>11.4e} {:>11.4e} {:>11.4e} {:>11.4e} {:>7} {:>7} {:>9.3e}",
                i, it.res_stat, it.res_eq, it.res_ineq, it.res_comp, it.qp_status, it.qp_iter, it.alpha
            );
        }
        if let Some([stat, eq, ineq, comp]) = self.final_residuals {
            let _ = writeln!(
                out,
                "{:>4} {:>11.4e} {:>11.4e} {:>11.4e} {:>11.4e}",
                self.iterations.len(),
                stat,
                eq,
                ineq,
                comp
            );
        }
        let t = &self.timings;
        let _ = writeln!(
            out,
            "\ntime total {:.3} ms: linearization {:.3} ms, condensing {:.3} ms, qp {:.3} ms, globalization {:.3} ms",
            ms(t.total),
            ms(t.linearization),
            ms(t.condensing),
            ms(t.qp),
            ms(t.globalization)
        );
        let _ = writeln!(
            out,
            "sqp iterations {}, qp iterations {}, objective {:.6e}",
            self.sqp_iter, self.qp_iter, self.objective
        );
        out
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}
