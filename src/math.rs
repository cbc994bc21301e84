use nalgebra::{DMatrix, DVector};

/// Computes the infinity norm: `max(abs(a))`. Zero for an empty slice.
pub fn norm_inf(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |max, v| if v.abs() > max { v.abs() } else { max })
}

/// Returns the largest value of `a`, or `f64::NEG_INFINITY` when empty.
pub fn max(a: &[f64]) -> f64 {
    a.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Returns the 1-norm of `a`.
pub fn norm_1(a: &[f64]) -> f64 {
    a.iter().map(|v| v.abs()).sum()
}

pub fn all_finite(a: &[f64]) -> bool {
    a.iter().all(|v| v.is_finite())
}

/// Jacobian of `f` at `x` by central differences.
pub fn central_jacobian<F>(x: &DVector<f64>, f: F) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let n = x.len();
    let m = f(x).len();
    let mut jac = DMatrix::zeros(m, n);
    let mut xp = x.clone();
    for k in 0..n {
        let h = f64::EPSILON.cbrt() * x[k].abs().max(1.0);
        xp[k] = x[k] + h;
        let fp = f(&xp);
        xp[k] = x[k] - h;
        let fm = f(&xp);
        xp[k] = x[k];
        jac.set_column(k, &((fp - fm) / (2.0 * h)));
    }
    jac
}

/// Checks that `w` is symmetric and positive semi-definite up to `tol`.
pub fn is_symmetric_psd(w: &DMatrix<f64>, tol: f64) -> bool {
    if !w.is_square() {
        return false;
    }
    if w.nrows() == 0 {
        return true;
    }
    let scale = norm_inf(w.as_slice()).max(1.0);
    if (w - w.transpose()).iter().any(|v| v.abs() > tol * scale) {
        return false;
    }
    let eig = w.clone().symmetric_eigen();
    eig.eigenvalues.iter().all(|&l| l >= -tol * scale)
}

/// Symmetrizes `h` and lifts its eigenvalues to at least `eps`.
pub fn project_eigenvalues(h: &DMatrix<f64>, eps: f64) -> DMatrix<f64> {
    if h.nrows() == 0 {
        return h.clone();
    }
    let sym = (h + h.transpose()) * 0.5;
    let mut eig = sym.symmetric_eigen();
    eig.eigenvalues.iter_mut().for_each(|l| {
        if *l < eps {
            *l = eps
        }
    });
    eig.recompose()
}

/// Splits `n` items into `blocks` contiguous ranges of nearly equal size,
/// returning the start index of every block followed by `n`.
pub fn block_bounds(n: usize, blocks: usize) -> Vec<usize> {
    let blocks = blocks.clamp(1, n.max(1));
    let (base, rem) = (n / blocks, n % blocks);
    let mut bounds = Vec::with_capacity(blocks + 1);
    let mut start = 0;
    bounds.push(start);
    for b in 0..blocks {
        start += base + usize::from(b < rem);
        bounds.push(start);
    }
    bounds
}

/// Copy of `v[start..start + n]`.
pub fn segment(v: &DVector<f64>, start: usize, n: usize) -> DVector<f64> {
    v.rows(start, n).into_owned()
}

/// Copy of the `nrows x ncols` block of `m` at `(r0, c0)`.
pub fn block(m: &DMatrix<f64>, r0: usize, c0: usize, nrows: usize, ncols: usize) -> DMatrix<f64> {
    m.view((r0, c0), (nrows, ncols)).into_owned()
}

/// Adds `scale * blk` to `m` at `(r0, c0)`.
pub fn add_block(m: &mut DMatrix<f64>, r0: usize, c0: usize, blk: &DMatrix<f64>, scale: f64) {
    for j in 0..blk.ncols() {
        for i in 0..blk.nrows() {
            m[(r0 + i, c0 + j)] += scale * blk[(i, j)];
        }
    }
}

/// Writes `blk` into `m` at `(r0, c0)`.
pub fn set_block(m: &mut DMatrix<f64>, r0: usize, c0: usize, blk: &DMatrix<f64>) {
    m.view_mut((r0, c0), (blk.nrows(), blk.ncols())).copy_from(blk);
}

/// `s` copies of `v` stacked vertically.
pub fn stack(v: &DVector<f64>, s: usize) -> DVector<f64> {
    let n = v.len();
    DVector::from_fn(n * s, |i, _| v[i % n.max(1)])
}
