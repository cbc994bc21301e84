use std::sync::Arc;

use crate::constraints::StageConstraints;
use crate::cost::LinearLsCost;
use crate::integrator::Integrator;
use crate::traits::Dynamics;

/// Shooting interval `i` of the horizon, or the terminal node when `i = N`.
pub struct Stage {
    pub index: usize,
    /// Interval length `t_{i+1} - t_i`, zero at the terminal node.
    pub dt: f64,
    pub nx: usize,
    /// Zero at the terminal node.
    pub nu: usize,
    pub cost: LinearLsCost,
    pub constraints: StageConstraints,
    transition: Option<(Arc<dyn Dynamics>, Integrator)>,
}

impl Stage {
    pub(crate) fn interval(
        index: usize,
        dt: f64,
        dynamics: Arc<dyn Dynamics>,
        integrator: Integrator,
        cost: LinearLsCost,
        constraints: StageConstraints,
    ) -> Self {
        Self {
            index,
            dt,
            nx: dynamics.nx(),
            nu: dynamics.nu(),
            cost,
            constraints,
            transition: Some((dynamics, integrator)),
        }
    }

    pub(crate) fn terminal(
        index: usize,
        nx: usize,
        cost: LinearLsCost,
        constraints: StageConstraints,
    ) -> Self {
        Self {
            index,
            dt: 0.0,
            nx,
            nu: 0,
            cost,
            constraints,
            transition: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.transition.is_none()
    }

    /// Dynamics and integration scheme, absent at the terminal node.
    pub fn transition(&self) -> Option<(&dyn Dynamics, &Integrator)> {
        self.transition
            .as_ref()
            .map(|(dynamics, integrator)| (dynamics.as_ref(), integrator))
    }
}
