//! Cart-pole pendulum, `x = [p, theta, v, omega]`, `u = [F]`.
//!
//! `theta = 0` is the upright position, `theta = pi` hangs down.

use nalgebra::{DMatrix, DVector};

use crate::gnsf::GnsfStructure;
use crate::traits::Dynamics;

#[derive(Debug, Clone)]
pub struct Pendulum {
    /// Cart mass [kg].
    pub cart_mass: f64,
    /// Pole tip mass [kg].
    pub mass: f64,
    /// Gravity [m/s^2].
    pub g: f64,
    /// Pole length [m].
    pub length: f64,
}

impl Default for Pendulum {
    fn default() -> Self {
        Self {
            cart_mass: 1.0,
            mass: 0.1,
            g: 9.81,
            length: 0.8,
        }
    }
}

impl Pendulum {
    pub const NAME: &'static str = "pendulum_ode";

    /// Cart and pole accelerations.
    fn accelerations(&self, theta: f64, omega: f64, force: f64) -> (f64, f64) {
        let (m, big_m, g, l) = (self.mass, self.cart_mass, self.g, self.length);
        let (sin, cos) = theta.sin_cos();
        let denominator = big_m + m - m * cos * cos;
        let v_dot = (-m * l * sin * omega * omega + m * g * cos * sin + force) / denominator;
        let omega_dot = (-m * l * cos * sin * omega * omega
            + force * cos
            + (big_m + m) * g * sin)
            / (l * denominator);
        (v_dot, omega_dot)
    }

    /// Partial derivatives of the accelerations with respect to
    /// `[theta, omega, F]`.
    fn acceleration_jacobian(&self, theta: f64, omega: f64, force: f64) -> ([f64; 3], [f64; 3]) {
        let (m, big_m, g, l) = (self.mass, self.cart_mass, self.g, self.length);
        let (sin, cos) = theta.sin_cos();
        let cos2 = cos * cos - sin * sin;
        let den = big_m + m - m * cos * cos;
        let den_theta = 2.0 * m * cos * sin;

        let n1 = -m * l * sin * omega * omega + m * g * cos * sin + force;
        let n1_theta = -m * l * cos * omega * omega + m * g * cos2;
        let v_dot = [
            (n1_theta * den - n1 * den_theta) / (den * den),
            -2.0 * m * l * sin * omega / den,
            1.0 / den,
        ];

        let n2 = -m * l * cos * sin * omega * omega + force * cos + (big_m + m) * g * sin;
        let n2_theta = -m * l * cos2 * omega * omega - force * sin + (big_m + m) * g * cos;
        let omega_dot = [
            (n2_theta * den - n2 * den_theta) / (l * den * den),
            -2.0 * m * cos * sin * omega / den,
            cos / (l * den),
        ];
        (v_dot, omega_dot)
    }

    /// Decomposition with the kinematic rows linear and the accelerations
    /// as the nonlinear term `phi([theta, omega], [F])`.
    pub fn gnsf_structure(&self) -> GnsfStructure {
        GnsfStructure {
            model_name: Self::NAME.to_string(),
            nx: 4,
            nu: 1,
            a: vec![
                vec![0.0, 0.0, 1.0, 0.0],
                vec![0.0, 0.0, 0.0, 1.0],
                vec![0.0; 4],
                vec![0.0; 4],
            ],
            b: vec![vec![0.0]; 4],
            c: vec![0.0; 4],
            c_phi: vec![
                vec![0.0, 0.0],
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![0.0, 1.0],
            ],
            l_x: vec![vec![0.0, 1.0, 0.0, 0.0], vec![0.0, 0.0, 0.0, 1.0]],
            l_u: vec![vec![1.0]],
        }
    }
}

impl Dynamics for Pendulum {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn nx(&self) -> usize {
        4
    }

    fn nu(&self) -> usize {
        1
    }

    fn f(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let (v_dot, omega_dot) = self.accelerations(x[1], x[3], u[0]);
        DVector::from_vec(vec![x[2], x[3], v_dot, omega_dot])
    }

    fn jacobian(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let (v_dot, omega_dot) = self.acceleration_jacobian(x[1], x[3], u[0]);
        #[rustfmt::skip]
        let jx = DMatrix::from_row_slice(4, 4, &[
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
            0.0, v_dot[0], 0.0, v_dot[1],
            0.0, omega_dot[0], 0.0, omega_dot[1],
        ]);
        let ju = DMatrix::from_column_slice(4, 1, &[0.0, 0.0, v_dot[2], omega_dot[2]]);
        (jx, ju)
    }

    fn phi(&self, y: &DVector<f64>, uhat: &DVector<f64>) -> Option<DVector<f64>> {
        let (v_dot, omega_dot) = self.accelerations(y[0], y[1], uhat[0]);
        Some(DVector::from_vec(vec![v_dot, omega_dot]))
    }
}
