use crate::LinearSolver;
use nalgebra::{DMatrix, DVector};

/// Dense LU factorization with partial pivoting.
#[derive(Default)]
pub struct LuSolver;

impl LinearSolver for LuSolver {
    fn solve(&self, a_mat: DMatrix<f64>, b: &mut DVector<f64>) -> Result<(), String> {
        if !a_mat.is_square() || a_mat.nrows() != b.len() {
            return Err(format!(
                "lu: {}x{} system with rhs of length {}",
                a_mat.nrows(),
                a_mat.ncols(),
                b.len()
            ));
        }
        let lu = a_mat.lu();
        if lu.solve_mut(b) {
            Ok(())
        } else {
            Err("lu: singular matrix".to_string())
        }
    }
}
