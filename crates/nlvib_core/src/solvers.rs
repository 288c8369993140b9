//! Time integration of the forced equations of motion, used to cross-check
//! harmonic-balance solutions against a direct simulation.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, Dyn, LU};
use num_traits::Float;
use std::fmt::Debug;

use crate::nlforce::NonlinearForce;
use crate::system::{Excitation, LinearSystem};

/// Floating-point types the integrators run on.
pub trait Scalar: Float + Debug + 'static {}

impl<T: Float + Debug + 'static> Scalar for T {}

/// First-order ODE `dx/dt = f(t, x)`.
pub trait FirstOrderSystem<T: Scalar> {
    fn state_len(&self) -> usize;

    /// Writes `f(t, x)` into `dxdt`.
    fn derivative(&self, t: T, x: &[T], dxdt: &mut [T]);
}

/// Fixed-step integrator that advances `state` from `t` to `t + dt`.
pub trait FixedStep<T: Scalar> {
    fn advance(&mut self, system: &impl FirstOrderSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// Classic Runge-Kutta 4th order scheme with preallocated stages.
pub struct RK4<T: Scalar> {
    stages: [Vec<T>; 4],
    probe: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(len: usize) -> Self {
        Self {
            stages: std::array::from_fn(|_| vec![T::zero(); len]),
            probe: vec![T::zero(); len],
        }
    }
}

impl<T: Scalar> FixedStep<T> for RK4<T> {
    fn advance(&mut self, system: &impl FirstOrderSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let two = T::one() + T::one();
        let half_dt = dt / two;
        let t0 = *t;
        let [k1, k2, k3, k4] = &mut self.stages;

        system.derivative(t0, state, k1);
        for ((p, &x), &k) in self.probe.iter_mut().zip(state.iter()).zip(k1.iter()) {
            *p = x + half_dt * k;
        }
        system.derivative(t0 + half_dt, &self.probe, k2);
        for ((p, &x), &k) in self.probe.iter_mut().zip(state.iter()).zip(k2.iter()) {
            *p = x + half_dt * k;
        }
        system.derivative(t0 + half_dt, &self.probe, k3);
        for ((p, &x), &k) in self.probe.iter_mut().zip(state.iter()).zip(k3.iter()) {
            *p = x + dt * k;
        }
        system.derivative(t0 + dt, &self.probe, k4);

        let sixth = dt / (two + two + two);
        for (i, x) in state.iter_mut().enumerate() {
            *x = *x + sixth * (k1[i] + two * k2[i] + two * k3[i] + k4[i]);
        }
        *t = t0 + dt;
    }
}

/// `M xdd + C xd + K x + f_nl(x, xd) = F cos(omega t + phase)` in first-order
/// form with state `[x, xd]`.
pub struct ForcedResponse<'a> {
    system: &'a LinearSystem,
    force: &'a NonlinearForce,
    excitation: &'a Excitation,
    omega: f64,
    mass_lu: LU<f64, Dyn, Dyn>,
}

impl<'a> ForcedResponse<'a> {
    pub fn new(
        system: &'a LinearSystem,
        force: &'a NonlinearForce,
        excitation: &'a Excitation,
        omega: f64,
    ) -> Result<Self> {
        let mass_lu = system.mass.clone().lu();
        if !mass_lu.is_invertible() {
            bail!("mass matrix is singular; the equations of motion cannot be integrated");
        }
        Ok(Self {
            system,
            force,
            excitation,
            omega,
            mass_lu,
        })
    }
}

impl FirstOrderSystem<f64> for ForcedResponse<'_> {
    fn state_len(&self) -> usize {
        2 * self.system.ndof()
    }

    fn derivative(&self, t: f64, x: &[f64], dxdt: &mut [f64]) {
        let n = self.system.ndof();
        let q = DMatrix::from_column_slice(n, 1, &x[..n]);
        let qd = DMatrix::from_column_slice(n, 1, &x[n..]);
        let nonlinear = self.force.evaluate(&q, &qd).force;

        let drive = (self.omega * t + self.excitation.phase).cos();
        let mut rhs = DVector::from_fn(n, |i, _| self.excitation.amplitude[i] * drive);
        rhs -= &self.system.damping * qd.column(0);
        rhs -= &self.system.stiffness * q.column(0);
        rhs -= nonlinear.column(0);
        let accel = self
            .mass_lu
            .solve(&rhs)
            .unwrap_or_else(|| DVector::from_element(n, f64::NAN));

        dxdt[..n].copy_from_slice(&x[n..]);
        dxdt[n..].copy_from_slice(accel.as_slice());
    }
}

/// Integrates `system` with RK4 from `t0` over `steps` steps of size `dt`,
/// calling `visit(t, state)` after every step. Returns the final state.
pub fn integrate<S, F>(
    system: &S,
    t0: f64,
    initial: &[f64],
    dt: f64,
    steps: usize,
    mut visit: F,
) -> Vec<f64>
where
    S: FirstOrderSystem<f64>,
    F: FnMut(f64, &[f64]),
{
    let mut scheme = RK4::new(system.state_len());
    let mut state = initial.to_vec();
    let mut t = t0;
    for _ in 0..steps {
        scheme.advance(system, &mut t, &mut state, dt);
        visit(t, &state);
    }
    state
}
