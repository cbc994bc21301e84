use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::OcpError;

/// Bound vector addressed by [`OcpSolver::constraints_set`](crate::OcpSolver::constraints_set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundField {
    Lbx,
    Ubx,
    Lbu,
    Ubu,
    Lg,
    Ug,
}

impl BoundField {
    pub fn name(self) -> &'static str {
        match self {
            BoundField::Lbx => "lbx",
            BoundField::Ubx => "ubx",
            BoundField::Lbu => "lbu",
            BoundField::Ubu => "ubu",
            BoundField::Lg => "lg",
            BoundField::Ug => "ug",
        }
    }
}

/// Inequalities of one stage over `w = [x; u]`.
///
/// Rows are ordered control bounds, state bounds, general rows
/// `lg <= C x + D u <= ug`. Equal lower and upper values make a row an
/// equality, infinite values drop that side.
#[derive(Debug, Clone, Serialize)]
pub struct StageConstraints {
    pub idxbu: Vec<usize>,
    pub lbu: DVector<f64>,
    pub ubu: DVector<f64>,
    pub idxbx: Vec<usize>,
    pub lbx: DVector<f64>,
    pub ubx: DVector<f64>,
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
    pub lg: DVector<f64>,
    pub ug: DVector<f64>,
}

impl StageConstraints {
    /// A stage without inequalities.
    pub fn unconstrained(nx: usize, nu: usize) -> Self {
        Self {
            idxbu: Vec::new(),
            lbu: DVector::zeros(0),
            ubu: DVector::zeros(0),
            idxbx: Vec::new(),
            lbx: DVector::zeros(0),
            ubx: DVector::zeros(0),
            c: DMatrix::zeros(0, nx),
            d: DMatrix::zeros(0, nu),
            lg: DVector::zeros(0),
            ug: DVector::zeros(0),
        }
    }

    pub fn nbu(&self) -> usize {
        self.idxbu.len()
    }

    pub fn nbx(&self) -> usize {
        self.idxbx.len()
    }

    pub fn ng(&self) -> usize {
        self.lg.len()
    }

    /// Number of constraint rows.
    pub fn nc(&self) -> usize {
        self.nbu() + self.nbx() + self.ng()
    }

    pub(crate) fn validate(&self, nx: usize, nu: usize, stage: usize) -> Result<(), OcpError> {
        check_index_set(&self.idxbu, nu, "idxbu", stage)?;
        check_index_set(&self.idxbx, nx, "idxbx", stage)?;

        let nbu = self.nbu();
        let nbx = self.nbx();
        let ng = self.ng();
        for (name, len, expected) in [
            ("lbu", self.lbu.len(), nbu),
            ("ubu", self.ubu.len(), nbu),
            ("lbx", self.lbx.len(), nbx),
            ("ubx", self.ubx.len(), nbx),
            ("ug", self.ug.len(), ng),
            ("C rows", self.c.nrows(), ng),
            ("D rows", self.d.nrows(), ng),
            ("C columns", self.c.ncols(), nx),
            ("D columns", self.d.ncols(), nu),
        ] {
            if len != expected {
                return Err(OcpError::dims(format!("{name} at stage {stage}"), expected, len));
            }
        }

        self.check_order(stage)
    }

    /// Every lower bound at most its upper bound.
    pub(crate) fn check_order(&self, stage: usize) -> Result<(), OcpError> {
        let (lower, upper) = (self.lower(), self.upper());
        for (i, (l, u)) in lower.iter().zip(upper.iter()).enumerate() {
            if l.is_nan() || u.is_nan() || l > u {
                return Err(OcpError::config(format!(
                    "constraint row {i} at stage {stage} has lower bound {l} above upper bound {u}"
                )));
            }
        }
        Ok(())
    }

    /// Constraint matrix `G` with `G w` the constrained quantities.
    pub fn matrix(&self, nx: usize, nu: usize) -> DMatrix<f64> {
        let nbu = self.nbu();
        let nbx = self.nbx();
        let mut g = DMatrix::zeros(self.nc(), nx + nu);
        for (row, &j) in self.idxbu.iter().enumerate() {
            g[(row, nx + j)] = 1.0;
        }
        for (row, &j) in self.idxbx.iter().enumerate() {
            g[(nbu + row, j)] = 1.0;
        }
        let r0 = nbu + nbx;
        g.view_mut((r0, 0), self.c.shape()).copy_from(&self.c);
        g.view_mut((r0, nx), self.d.shape()).copy_from(&self.d);
        g
    }

    pub fn lower(&self) -> DVector<f64> {
        concat(&[&self.lbu, &self.lbx, &self.lg])
    }

    pub fn upper(&self) -> DVector<f64> {
        concat(&[&self.ubu, &self.ubx, &self.ug])
    }

    /// Replaces one bound vector, keeping the row structure.
    ///
    /// The two sides of a row may cross in between updates, so that an
    /// equality such as the initial state can be moved one side at a time.
    /// Their order is checked when the next solve starts.
    pub fn set_bound(&mut self, field: BoundField, values: &[f64], stage: usize) -> Result<(), OcpError> {
        let target = match field {
            BoundField::Lbx => &mut self.lbx,
            BoundField::Ubx => &mut self.ubx,
            BoundField::Lbu => &mut self.lbu,
            BoundField::Ubu => &mut self.ubu,
            BoundField::Lg => &mut self.lg,
            BoundField::Ug => &mut self.ug,
        };
        if target.len() != values.len() {
            return Err(OcpError::dims(
                format!("{} at stage {stage}", field.name()),
                target.len(),
                values.len(),
            ));
        }
        if let Some(i) = values.iter().position(|v| v.is_nan()) {
            return Err(OcpError::config(format!(
                "{}[{i}] at stage {stage} is NaN",
                field.name()
            )));
        }
        target.copy_from_slice(values);
        Ok(())
    }
}

fn check_index_set(idx: &[usize], n: usize, name: &str, stage: usize) -> Result<(), OcpError> {
    let mut seen = vec![false; n];
    for &i in idx {
        if i >= n {
            return Err(OcpError::config(format!(
                "{name} at stage {stage} references component {i}, dimension is {n}"
            )));
        }
        if seen[i] {
            return Err(OcpError::config(format!(
                "{name} at stage {stage} lists component {i} twice"
            )));
        }
        seen[i] = true;
    }
    Ok(())
}

pub(crate) fn concat(parts: &[&DVector<f64>]) -> DVector<f64> {
    let n = parts.iter().map(|p| p.len()).sum();
    let mut v = DVector::zeros(n);
    let mut offset = 0;
    for p in parts {
        v.rows_mut(offset, p.len()).copy_from(*p);
        offset += p.len();
    }
    v
}
