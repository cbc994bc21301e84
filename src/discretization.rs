use serde::Serialize;

use crate::error::OcpError;

/// Relative tolerance on the agreement between the step lengths and `tf`.
const SUM_TOL: f64 = 1e-10;

/// Shooting node times `t_0 = 0 < t_1 < ... < t_N = tf`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Horizon {
    nodes: Vec<f64>,
    steps: Vec<f64>,
}

impl Horizon {
    /// Builds the grid from either explicit node times or explicit step
    /// lengths; with neither, `n` uniform steps over `[0, tf]`.
    ///
    /// A single zero-length step is accepted when `allow_zero_step` is set.
    pub fn build(
        tf: f64,
        n: usize,
        shooting_nodes: Option<&[f64]>,
        time_steps: Option<&[f64]>,
        allow_zero_step: bool,
    ) -> Result<Self, OcpError> {
        if n == 0 {
            return Err(OcpError::InvalidDiscretization(
                "number of shooting intervals must be positive".to_string(),
            ));
        }
        if !(tf.is_finite() && tf > 0.0) {
            return Err(OcpError::InvalidDiscretization(format!(
                "horizon length {tf} must be positive"
            )));
        }

        let steps = match (shooting_nodes, time_steps) {
            (Some(_), Some(_)) => {
                return Err(OcpError::config(
                    "either shooting_nodes or time_steps may be given, not both",
                ))
            }
            (Some(nodes), None) => {
                if nodes.len() != n + 1 {
                    return Err(OcpError::InvalidDiscretization(format!(
                        "expected {} shooting nodes, got {}",
                        n + 1,
                        nodes.len()
                    )));
                }
                nodes.windows(2).map(|w| w[1] - w[0]).collect()
            }
            (None, Some(steps)) => {
                if steps.len() != n {
                    return Err(OcpError::InvalidDiscretization(format!(
                        "expected {} time steps, got {}",
                        n,
                        steps.len()
                    )));
                }
                steps.to_vec()
            }
            (None, None) => vec![tf / n as f64; n],
        };

        Self::from_steps(tf, steps, allow_zero_step)
    }

    /// Uniform grid of `n` steps over `[0, tf]`.
    pub fn uniform(tf: f64, n: usize) -> Result<Self, OcpError> {
        Self::build(tf, n, None, None, false)
    }

    fn from_steps(tf: f64, steps: Vec<f64>, allow_zero_step: bool) -> Result<Self, OcpError> {
        let mut zero_steps = 0;
        for (i, &dt) in steps.iter().enumerate() {
            if !dt.is_finite() || dt < 0.0 {
                return Err(OcpError::InvalidDiscretization(format!(
                    "shooting nodes not strictly increasing at interval {i} (step {dt})"
                )));
            }
            if dt == 0.0 {
                zero_steps += 1;
                if !allow_zero_step || zero_steps > 1 {
                    return Err(OcpError::InvalidDiscretization(format!(
                        "zero-length interval {i} not allowed by the dynamics"
                    )));
                }
            }
        }

        let sum: f64 = steps.iter().sum();
        if (sum - tf).abs() > SUM_TOL * tf.max(1.0) {
            return Err(OcpError::InvalidDiscretization(format!(
                "time steps sum to {sum}, horizon length is {tf}"
            )));
        }

        let mut nodes = Vec::with_capacity(steps.len() + 1);
        nodes.push(0.0);
        let mut t = 0.0;
        for dt in &steps[..steps.len() - 1] {
            t += dt;
            nodes.push(t);
        }
        nodes.push(tf);

        Ok(Self { nodes, steps })
    }

    /// Number of shooting intervals.
    pub fn n(&self) -> usize {
        self.steps.len()
    }

    pub fn tf(&self) -> f64 {
        self.nodes[self.nodes.len() - 1]
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn time_steps(&self) -> &[f64] {
        &self.steps
    }
}
