//! Rigid-body dynamics of the modeled chain.
//!
//! Implements the recursive Newton-Euler algorithm over the link inertials
//! parsed from the robot description: full inverse dynamics, the
//! Coriolis/centrifugal + gravity bias, and the joint-space inertia (mass)
//! matrix. The mass matrix is assembled column by column from
//! unit-acceleration sweeps, computed in parallel.

extern crate nalgebra as na;

use std::sync::Arc;
use na::{DMatrix, Vector3};
use rayon::prelude::*;
use crate::errors::CycleError;
use crate::kinematic_traits::JointVector;
use crate::model::RobotModel;

pub struct Dynamics {
    model: Arc<RobotModel>,
    /// Gravitational acceleration in the base frame, m/s^2.
    gravity: Vector3<f64>,
}

impl Dynamics {
    pub fn new(model: Arc<RobotModel>) -> Self {
        Dynamics {
            model,
            gravity: Vector3::new(0.0, 0.0, -9.81),
        }
    }

    pub fn with_gravity(model: Arc<RobotModel>, gravity: Vector3<f64>) -> Self {
        Dynamics { model, gravity }
    }

    /// Joint torques that produce the given accelerations at the given state:
    /// `tau = M(q) ddq + C(q, dq) dq + G(q)`.
    pub fn inverse_dynamics(
        &self,
        q: &JointVector,
        dq: &JointVector,
        ddq: &JointVector,
    ) -> Result<JointVector, CycleError> {
        self.model.check_dof(q)?;
        self.model.check_dof(dq)?;
        self.model.check_dof(ddq)?;
        Ok(self.newton_euler(q, dq, ddq, true))
    }

    /// Coriolis/centrifugal and gravity torques (`ddq = 0`).
    pub fn bias(&self, q: &JointVector, dq: &JointVector) -> Result<JointVector, CycleError> {
        self.inverse_dynamics(q, dq, &self.model.zero_joints())
    }

    /// Joint-space inertia matrix. Column `j` is the torque produced by a
    /// unit acceleration of joint `j` with zero velocity and zero gravity;
    /// columns are independent and computed in parallel.
    pub fn mass_matrix(&self, q: &JointVector) -> Result<DMatrix<f64>, CycleError> {
        self.model.check_dof(q)?;
        let n = self.model.dof();
        let zero = self.model.zero_joints();

        let columns: Vec<JointVector> = (0..n)
            .into_par_iter()
            .map(|j| {
                let mut ddq = JointVector::zeros(n);
                ddq[j] = 1.0;
                self.newton_euler(q, &zero, &ddq, false)
            })
            .collect();

        Ok(DMatrix::from_fn(n, n, |row, col| columns[col][row]))
    }

    /// Accelerations resulting from applying `tau` at the given state:
    /// `ddq = M(q)^-1 (tau - bias(q, dq))`. Used by the simulated plant.
    pub fn forward_dynamics(
        &self,
        q: &JointVector,
        dq: &JointVector,
        tau: &JointVector,
    ) -> Result<JointVector, CycleError> {
        self.model.check_dof(tau)?;
        let mass = self.mass_matrix(q)?;
        let rhs = tau - self.bias(q, dq)?;
        // The inertia matrix is symmetric positive definite for any chain
        // with nonzero inertia, so Cholesky is the natural factorization;
        // LU covers numerically borderline parameter sets.
        if let Some(cholesky) = mass.clone().cholesky() {
            return Ok(cholesky.solve(&rhs));
        }
        mass.lu().solve(&rhs).ok_or(CycleError::SingularInertia)
    }

    /// Recursive Newton-Euler sweep. Quantities are kept in each link's own
    /// frame; gravity enters as a fictitious base acceleration.
    fn newton_euler(
        &self,
        q: &JointVector,
        dq: &JointVector,
        ddq: &JointVector,
        with_gravity: bool,
    ) -> JointVector {
        let joints = self.model.joints();
        let n = joints.len();

        // Rotation of link i relative to its parent (origin rotation plus
        // the joint rotation) and the joint origin in the parent frame.
        let rotations: Vec<na::UnitQuaternion<f64>> = joints
            .iter()
            .enumerate()
            .map(|(i, joint)| {
                joint.origin.rotation * na::UnitQuaternion::from_axis_angle(&joint.axis, q[i])
            })
            .collect();
        let offsets: Vec<Vector3<f64>> =
            joints.iter().map(|joint| joint.origin.translation.vector).collect();

        let mut omega = vec![Vector3::zeros(); n];
        let mut alpha = vec![Vector3::zeros(); n];
        let mut accel = vec![Vector3::zeros(); n];

        let mut omega_parent = Vector3::zeros();
        let mut alpha_parent = Vector3::zeros();
        let mut accel_parent = if with_gravity { -self.gravity } else { Vector3::zeros() };

        for i in 0..n {
            let axis = joints[i].axis.into_inner();
            let to_local = rotations[i].inverse();

            let omega_prop = to_local * omega_parent;
            omega[i] = omega_prop + axis * dq[i];
            alpha[i] = to_local * alpha_parent
                + axis * ddq[i]
                + omega_prop.cross(&(axis * dq[i]));
            accel[i] = to_local
                * (accel_parent
                    + alpha_parent.cross(&offsets[i])
                    + omega_parent.cross(&omega_parent.cross(&offsets[i])));

            omega_parent = omega[i];
            alpha_parent = alpha[i];
            accel_parent = accel[i];
        }

        let mut tau = JointVector::zeros(n);
        let mut force_child = Vector3::zeros();
        let mut moment_child = Vector3::zeros();

        for i in (0..n).rev() {
            let inertial = &joints[i].inertia;
            let accel_com = accel[i]
                + alpha[i].cross(&inertial.com)
                + omega[i].cross(&omega[i].cross(&inertial.com));
            let force_link = inertial.mass * accel_com;
            let moment_link =
                inertial.inertia * alpha[i] + omega[i].cross(&(inertial.inertia * omega[i]));

            let (force_down, moment_down) = if i + 1 < n {
                let from_child = rotations[i + 1];
                let force = from_child * force_child;
                let moment = from_child * moment_child + offsets[i + 1].cross(&force);
                (force, moment)
            } else {
                (Vector3::zeros(), Vector3::zeros())
            };

            let force_total = force_link + force_down;
            let moment_total = moment_link + inertial.com.cross(&force_link) + moment_down;

            tau[i] = joints[i].axis.dot(&moment_total);

            force_child = force_total;
            moment_child = moment_total;
        }

        tau
    }
}
