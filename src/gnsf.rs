//! Structural decomposition of the dynamics used by the GNSF integrator:
//!
//! ```txt
//!     f(x, u) = A x + B u + c + C phi(L_x x, L_u u)
//! ```
//!
//! The decomposition is produced offline and read back from
//! `<model_name>_gnsf_functions.json`. The nonlinear term `phi` itself is
//! evaluated through [`Dynamics::phi`].

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::OcpError;
use crate::math::norm_inf;
use crate::traits::{Dynamics, StructureProvider};

/// Serialized form of the decomposition. Matrices are stored row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GnsfStructure {
    pub model_name: String,
    pub nx: usize,
    pub nu: usize,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
    pub c: Vec<f64>,
    /// Maps the outputs of `phi` into the state derivative.
    pub c_phi: Vec<Vec<f64>>,
    /// Selects the state arguments of `phi`.
    pub l_x: Vec<Vec<f64>>,
    /// Selects the control arguments of `phi`.
    pub l_u: Vec<Vec<f64>>,
}

impl GnsfStructure {
    pub fn file_name(model_name: &str) -> String {
        format!("{model_name}_gnsf_functions.json")
    }

    pub fn from_json(json: &str) -> Result<Self, OcpError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, OcpError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl StructureProvider for GnsfStructure {
    fn structure(&self, model_name: &str) -> anyhow::Result<GnsfStructure> {
        anyhow::ensure!(
            self.model_name == model_name,
            "structure describes model `{}`",
            self.model_name
        );
        Ok(self.clone())
    }
}

/// Reads `<dir>/<model_name>_gnsf_functions.json`.
pub struct JsonStructureProvider {
    pub dir: PathBuf,
}

impl JsonStructureProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl StructureProvider for JsonStructureProvider {
    fn structure(&self, model_name: &str) -> anyhow::Result<GnsfStructure> {
        let path = self.dir.join(GnsfStructure::file_name(model_name));
        let json = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        GnsfStructure::from_json(&json).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Dense, validated form of [`GnsfStructure`].
#[derive(Debug, Clone)]
pub struct GnsfMatrices {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DVector<f64>,
    pub c_phi: DMatrix<f64>,
    pub l_x: DMatrix<f64>,
    pub l_u: DMatrix<f64>,
}

fn dense(rows: &[Vec<f64>], nrows: usize, ncols: usize, name: &str) -> Result<DMatrix<f64>, OcpError> {
    if rows.len() != nrows {
        return Err(OcpError::dims(format!("gnsf.{name} rows"), nrows, rows.len()));
    }
    let mut m = DMatrix::zeros(nrows, ncols);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != ncols {
            return Err(OcpError::dims(format!("gnsf.{name} columns"), ncols, row.len()));
        }
        for (j, &v) in row.iter().enumerate() {
            m[(i, j)] = v;
        }
    }
    Ok(m)
}

impl GnsfMatrices {
    /// Checks the decomposition against `dynamics` and converts it.
    ///
    /// The decomposition is evaluated at a few fixed sample points and must
    /// reproduce `f`; a mismatch means the structure file is stale.
    pub fn new(structure: &GnsfStructure, dynamics: &dyn Dynamics) -> Result<Self, OcpError> {
        let (nx, nu) = (dynamics.nx(), dynamics.nu());
        if structure.nx != nx || structure.nu != nu {
            return Err(OcpError::config(format!(
                "structural model for `{}` has nx = {}, nu = {}, model has nx = {nx}, nu = {nu}",
                structure.model_name, structure.nx, structure.nu
            )));
        }
        let n_out = structure.c_phi.first().map_or(0, |r| r.len());
        let ny = structure.l_x.len();
        let nuhat = structure.l_u.len();

        let gnsf = Self {
            a: dense(&structure.a, nx, nx, "a")?,
            b: dense(&structure.b, nx, nu, "b")?,
            c: {
                if structure.c.len() != nx {
                    return Err(OcpError::dims("gnsf.c", nx, structure.c.len()));
                }
                DVector::from_column_slice(&structure.c)
            },
            c_phi: dense(&structure.c_phi, nx, n_out, "c_phi")?,
            l_x: dense(&structure.l_x, ny, nx, "l_x")?,
            l_u: dense(&structure.l_u, nuhat, nu, "l_u")?,
        };

        for (k, (x, u)) in sample_points(nx, nu).into_iter().enumerate() {
            let phi = gnsf.phi(dynamics, &x, &u).ok_or_else(|| {
                OcpError::config(format!(
                    "model `{}` provides no nonlinear term for its structural decomposition",
                    dynamics.name()
                ))
            })?;
            if phi.len() != n_out {
                return Err(OcpError::dims("phi output", n_out, phi.len()));
            }
            let f = dynamics.f(&x, &u);
            let rebuilt = &gnsf.a * &x + &gnsf.b * &u + &gnsf.c + &gnsf.c_phi * phi;
            let err = norm_inf((f.clone() - rebuilt).as_slice());
            if !(err <= 1e-8 * (1.0 + norm_inf(f.as_slice()))) {
                return Err(OcpError::config(format!(
                    "structural model for `{}` is stale: mismatch {err:e} at sample point {k}",
                    dynamics.name()
                )));
            }
        }

        Ok(gnsf)
    }

    pub fn n_out(&self) -> usize {
        self.c_phi.ncols()
    }

    /// Evaluates `phi(L_x x, L_u u)`.
    pub(crate) fn phi(
        &self,
        dynamics: &dyn Dynamics,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Option<DVector<f64>> {
        dynamics.phi(&(&self.l_x * x), &(&self.l_u * u))
    }
}

/// Deterministic, non-degenerate evaluation points.
fn sample_points(nx: usize, nu: usize) -> Vec<(DVector<f64>, DVector<f64>)> {
    let ramp = |n: usize, scale: f64| DVector::from_fn(n, |i, _| scale * (0.3 + 0.17 * i as f64));
    let alternating =
        |n: usize| DVector::from_fn(n, |i, _| if i % 2 == 0 { 0.9 } else { -0.45 });
    vec![
        (DVector::zeros(nx), DVector::zeros(nu)),
        (ramp(nx, 1.0), ramp(nu, 2.0)),
        (alternating(nx), -ramp(nu, 1.0)),
    ]
}
