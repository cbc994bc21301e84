//! Condensing of the structured QP into a dense one.
//!
//! The stages are split into contiguous blocks. Inside a block only the
//! first state and the controls stay optimization variables, all other
//! states are eliminated through the linearized dynamics
//!
//! ```txt
//!       dx_k = M_k z + m_k
//! ```
//!
//! with `z` the block variables. Consecutive blocks are coupled by one
//! equality per state. The last block also absorbs the terminal node.
//! With one block per stage nothing is eliminated but the terminal state,
//! with a single block every state but the initial one is.

use nalgebra::{DMatrix, DVector};

use crate::constraints::concat;
use crate::ipm::{DenseQp, QpSolution};
use crate::math::{add_block, block_bounds, segment, set_block};
use crate::qp::{OcpQp, OcpQpSolution};

/// Affine map from the block variables to one stage's states.
#[derive(Debug, Clone)]
struct StateMap {
    m: DMatrix<f64>,
    m0: DVector<f64>,
}

#[derive(Debug, Clone)]
struct Block {
    /// First stage.
    start: usize,
    /// One past the last stage with free controls.
    end: usize,
    /// Column offset of the block variables in the dense QP.
    offset: usize,
    dim: usize,
    /// Offsets of each stage's controls within the block variables.
    u_offsets: Vec<usize>,
    /// State maps for stages `start..=end`.
    maps: Vec<StateMap>,
}

impl Block {
    /// Map from the block variables to `d_k = [dx_k; du_k]`, plus constant.
    fn stage_map(&self, k: usize, nu: usize) -> (DMatrix<f64>, DVector<f64>) {
        let sm = &self.maps[k - self.start];
        let nx = sm.m.nrows();
        let mut w = DMatrix::zeros(nx + nu, self.dim);
        set_block(&mut w, 0, 0, &sm.m);
        if nu > 0 {
            let off = self.u_offsets[k - self.start];
            for i in 0..nu {
                w[(nx + i, off + i)] = 1.0;
            }
        }
        let mut w0 = DVector::zeros(nx + nu);
        w0.rows_mut(0, nx).copy_from(&sm.m0);
        (w, w0)
    }

    /// Stages whose cost and constraints live in this block.
    fn stages(&self, n: usize) -> std::ops::Range<usize> {
        if self.end == n {
            self.start..n + 1
        } else {
            self.start..self.end
        }
    }
}

/// Dense QP together with the bookkeeping to map its solution back.
#[derive(Debug, Clone)]
pub struct CondensedQp {
    pub dense: DenseQp,
    blocks: Vec<Block>,
    /// First constraint row of every stage.
    row_offsets: Vec<usize>,
}

impl CondensedQp {
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Condenses `qp` into `num_blocks` blocks.
pub fn condense(qp: &OcpQp, num_blocks: usize) -> CondensedQp {
    let n = qp.n();
    let bounds = block_bounds(n, num_blocks);

    let mut blocks = Vec::with_capacity(bounds.len() - 1);
    let mut offset = 0;
    for w in bounds.windows(2) {
        let (start, end) = (w[0], w[1]);
        let nx0 = qp.stages[start].nx;
        let mut dim = nx0;
        let mut u_offsets = Vec::with_capacity(end - start + 1);
        for k in start..end {
            u_offsets.push(dim);
            dim += qp.stages[k].nu;
        }
        u_offsets.push(dim);

        let mut maps = Vec::with_capacity(end - start + 1);
        let mut m = DMatrix::zeros(nx0, dim);
        set_block(&mut m, 0, 0, &DMatrix::identity(nx0, nx0));
        maps.push(StateMap {
            m,
            m0: DVector::zeros(nx0),
        });
        for k in start..end {
            let st = &qp.stages[k];
            let prev = &maps[k - start];
            let mut m = &st.a * &prev.m;
            add_block(&mut m, 0, u_offsets[k - start], &st.b, 1.0);
            let m0 = &st.a * &prev.m0 + &st.defect;
            maps.push(StateMap { m, m0 });
        }

        blocks.push(Block {
            start,
            end,
            offset,
            dim,
            u_offsets,
            maps,
        });
        offset += dim;
    }
    let nz = offset;

    let mut row_offsets = Vec::with_capacity(n + 1);
    let mut nc = 0;
    for st in &qp.stages {
        row_offsets.push(nc);
        nc += st.lb.len();
    }

    let mut h = DMatrix::zeros(nz, nz);
    let mut g = DVector::zeros(nz);
    let mut c = DMatrix::zeros(nc, nz);
    let mut lc = DVector::zeros(nc);
    let mut uc = DVector::zeros(nc);
    for blk in &blocks {
        for k in blk.stages(n) {
            let st = &qp.stages[k];
            let (w, w0) = blk.stage_map(k, st.nu);
            let hw = &st.hess * &w;
            add_block(&mut h, blk.offset, blk.offset, &(w.transpose() * hw), 1.0);
            let gk = w.transpose() * (&st.hess * &w0 + &st.grad);
            let mut gb = g.rows_mut(blk.offset, blk.dim);
            gb += gk;

            let nck = st.lb.len();
            if nck > 0 {
                let r0 = row_offsets[k];
                set_block(&mut c, r0, blk.offset, &(&st.g_mat * &w));
                let shift = &st.g_mat * &w0;
                lc.rows_mut(r0, nck).copy_from(&(&st.lb - &shift));
                uc.rows_mut(r0, nck).copy_from(&(&st.ub - &shift));
            }
        }
    }

    // Continuity between consecutive blocks.
    let neq: usize = blocks[..blocks.len() - 1]
        .iter()
        .map(|b| qp.stages[b.end].nx)
        .sum();
    let mut a_eq = DMatrix::zeros(neq, nz);
    let mut b_eq = DVector::zeros(neq);
    let mut r0 = 0;
    for pair in blocks.windows(2) {
        let (blk, next) = (&pair[0], &pair[1]);
        let last = &blk.maps[blk.end - blk.start];
        let nx = last.m.nrows();
        set_block(&mut a_eq, r0, blk.offset, &last.m);
        add_block(&mut a_eq, r0, next.offset, &DMatrix::identity(nx, nx), -1.0);
        b_eq.rows_mut(r0, nx).copy_from(&(-&last.m0));
        r0 += nx;
    }

    CondensedQp {
        dense: DenseQp {
            h,
            g,
            a_eq,
            b_eq,
            c,
            lc,
            uc,
        },
        blocks,
        row_offsets,
    }
}

/// Recovers the stage-wise primal-dual solution.
///
/// Dynamics multipliers of eliminated states follow from stationarity
/// with respect to those states, backwards through each block:
///
/// ```txt
///       pi_{k-1} = (H_k d_k + g_k)_x + A_k' pi_k + G_kx' (lam_upper_k - lam_lower_k)
/// ```
pub fn expand(cond: &CondensedQp, qp: &OcpQp, sol: &QpSolution) -> OcpQpSolution {
    let n = qp.n();
    let mut dx = vec![DVector::zeros(0); n + 1];
    let mut du = vec![DVector::zeros(0); n + 1];
    let mut pi: Vec<DVector<f64>> = qp.stages[..n].iter().map(|s| DVector::zeros(s.nx)).collect();
    let mut lam = Vec::with_capacity(n + 1);
    let mut t = Vec::with_capacity(n + 1);

    for (k, st) in qp.stages.iter().enumerate() {
        let (r0, nc) = (cond.row_offsets[k], st.lb.len());
        lam.push(concat(&[
            &segment(&sol.lam_lower, r0, nc),
            &segment(&sol.lam_upper, r0, nc),
        ]));
        t.push(concat(&[
            &segment(&sol.slack_lower, r0, nc),
            &segment(&sol.slack_upper, r0, nc),
        ]));
    }

    let mut eq_row = 0;
    for blk in &cond.blocks {
        let z = segment(&sol.x, blk.offset, blk.dim);
        for k in blk.start..=blk.end {
            let sm = &blk.maps[k - blk.start];
            if k < blk.end || blk.end == n {
                dx[k] = &sm.m * &z + &sm.m0;
            }
            if k < blk.end {
                du[k] = segment(&z, blk.u_offsets[k - blk.start], qp.stages[k].nu);
            }
        }

        // Multiplier of the last interval of the block.
        let top = if blk.end == n {
            n
        } else {
            let nx = qp.stages[blk.end].nx;
            pi[blk.end - 1] = segment(&sol.lam_eq, eq_row, nx);
            eq_row += nx;
            blk.end - 1
        };
        for k in (blk.start + 1..=top).rev() {
            let st = &qp.stages[k];
            let d = concat(&[&dx[k], &du[k]]);
            let nc = st.lb.len();
            let lam_net = segment(&lam[k], nc, nc) - segment(&lam[k], 0, nc);
            let g_x = st.g_mat.columns(0, st.nx);
            let mut prev = (&st.hess * d + &st.grad).rows(0, st.nx).into_owned() + g_x.transpose() * lam_net;
            if k < n {
                prev += st.a.transpose() * &pi[k];
            }
            pi[k - 1] = prev;
        }
    }
    OcpQpSolution {
        dx,
        du,
        pi,
        lam,
        t,
        iterations: sol.iterations,
        converged: sol.converged,
    }
}
