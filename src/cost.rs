use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::OcpError;
use crate::math::is_symmetric_psd;

const PSD_TOL: f64 = 1e-10;

/// Linear least-squares stage cost
///
/// ```txt
///     l(x, u) = 0.5 * s * r' W r,    r = Vx x + Vu u - yref
/// ```
///
/// with the scaling `s` the interval length on the shooting intervals and
/// one at the terminal node, unless configured otherwise. The terminal
/// cost has no control columns.
#[derive(Debug, Clone, Serialize)]
pub struct LinearLsCost {
    pub vx: DMatrix<f64>,
    pub vu: DMatrix<f64>,
    pub w: DMatrix<f64>,
    pub yref: DVector<f64>,
    pub scaling: f64,
}

impl LinearLsCost {
    pub fn new(
        vx: DMatrix<f64>,
        vu: DMatrix<f64>,
        w: DMatrix<f64>,
        yref: DVector<f64>,
    ) -> Result<Self, OcpError> {
        let cost = Self {
            vx,
            vu,
            w,
            yref,
            scaling: 1.0,
        };
        cost.validate()?;
        Ok(cost)
    }

    pub fn terminal(vx: DMatrix<f64>, w: DMatrix<f64>, yref: DVector<f64>) -> Result<Self, OcpError> {
        let vu = DMatrix::zeros(vx.nrows(), 0);
        Self::new(vx, vu, w, yref)
    }

    /// Weights the whole term by `scaling`.
    pub fn with_scaling(mut self, scaling: f64) -> Result<Self, OcpError> {
        if !(scaling.is_finite() && scaling >= 0.0) {
            return Err(OcpError::config(format!(
                "cost scaling ({scaling}) must be finite and non-negative"
            )));
        }
        self.scaling = scaling;
        Ok(self)
    }

    pub fn ny(&self) -> usize {
        self.w.nrows()
    }

    pub fn nx(&self) -> usize {
        self.vx.ncols()
    }

    pub fn nu(&self) -> usize {
        self.vu.ncols()
    }

    fn validate(&self) -> Result<(), OcpError> {
        let ny = self.ny();
        if self.w.ncols() != ny {
            return Err(OcpError::config(format!(
                "cost weight must be square, got {}x{}",
                ny,
                self.w.ncols()
            )));
        }
        if self.vx.nrows() != ny {
            return Err(OcpError::dims("Vx rows", ny, self.vx.nrows()));
        }
        if self.vu.nrows() != ny {
            return Err(OcpError::dims("Vu rows", ny, self.vu.nrows()));
        }
        if self.yref.len() != ny {
            return Err(OcpError::dims("yref", ny, self.yref.len()));
        }
        if !is_symmetric_psd(&self.w, PSD_TOL) {
            return Err(OcpError::config(
                "cost weight must be symmetric positive semi-definite",
            ));
        }
        Ok(())
    }

    pub fn set_yref(&mut self, yref: &[f64]) -> Result<(), OcpError> {
        if yref.len() != self.ny() {
            return Err(OcpError::dims("yref", self.ny(), yref.len()));
        }
        self.yref.copy_from_slice(yref);
        Ok(())
    }

    /// `[Vx Vu]`.
    pub fn jacobian(&self) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.ny(), self.nx() + self.nu());
        jac.view_mut((0, 0), self.vx.shape()).copy_from(&self.vx);
        jac.view_mut((0, self.nx()), self.vu.shape()).copy_from(&self.vu);
        jac
    }

    pub fn residual(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.vx * x + &self.vu * u - &self.yref
    }

    pub fn value(&self, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        let r = self.residual(x, u);
        0.5 * self.scaling * r.dot(&(&self.w * &r))
    }

    /// Gradient with respect to `[x; u]`.
    pub fn gradient(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        self.jacobian().transpose() * (&self.w * self.residual(x, u)) * self.scaling
    }

    /// `J' W J`, exact for this cost.
    pub fn gauss_newton_hessian(&self) -> DMatrix<f64> {
        let jac = self.jacobian();
        jac.transpose() * &self.w * jac * self.scaling
    }
}
