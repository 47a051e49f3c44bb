//! Inverse-dynamics tracking control.
//!
//! The default law works in joint space on the trajectory point produced by
//! the inverse kinematics. The Cartesian-space variant closes the loop on the
//! tool pose directly and resolves the commanded acceleration through the
//! Jacobian; it is selected with [`ControlMode`] instead of being a separate
//! code path at the call site.

extern crate nalgebra as na;

use std::sync::Arc;
use na::Vector3;
use crate::dynamics::Dynamics;
use crate::errors::CycleError;
use crate::kinematic_traits::{JointTrajectoryPoint, JointVector, Pose, Twist, twist};
use crate::model::RobotModel;
use crate::robot::Robot;

/// Which control law the loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(rename_all = "snake_case"))]
pub enum ControlMode {
    #[default]
    JointSpace,
    CartesianSpace,
}

/// Proportional/derivative gain pair.
#[derive(Debug, Clone, Copy)]
pub struct Gains {
    pub kp: f64,
    pub kd: f64,
}

impl Gains {
    /// Critically damped pair: `kd = 2 sqrt(kp)`.
    pub fn critically_damped(kp: f64) -> Self {
        Gains { kp, kd: 2.0 * kp.sqrt() }
    }
}

pub struct Controller {
    dynamics: Dynamics,
}

impl Controller {
    pub fn new(model: Arc<RobotModel>) -> Self {
        Controller { dynamics: Dynamics::new(model) }
    }

    pub fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    /// Joint-space inverse-dynamics tracking control.
    ///
    /// Computes `tau = M(q)(ddq_d + kd (dq_d - dq) + kp (q_d - q)) + n(q, dq)`
    /// where `n` collects Coriolis/centrifugal and gravity terms, so the
    /// closed loop behaves as a decoupled second-order error dynamics with
    /// the given gains. Returns the torques together with the scalar
    /// tracking-error metric `|q_d - q|`.
    pub fn id_cntr(
        &self,
        robot: &Robot,
        desired: &JointTrajectoryPoint,
        gains: &Gains,
    ) -> Result<(JointVector, f64), CycleError> {
        let e = &desired.q - robot.joint_positions();
        let de = &desired.dq - robot.joint_velocities();
        let command = &desired.ddq + &de * gains.kd + &e * gains.kp;

        let mass = self.dynamics.mass_matrix(robot.joint_positions())?;
        let bias = self.dynamics.bias(robot.joint_positions(), robot.joint_velocities())?;
        let tau = mass * command + bias;

        Ok((tau, e.norm()))
    }

    /// Cartesian-space inverse-dynamics tracking control.
    ///
    /// Closes the loop on the tool pose: the position and orientation errors
    /// (quaternion-derived, sign-corrected so the shorter rotation is taken)
    /// are combined with the velocity error into a commanded Cartesian
    /// acceleration, resolved into joint space through the Jacobian
    /// pseudoinverse, and passed through the same inverse-dynamics law.
    /// Position and orientation carry separate gain pairs.
    pub fn id_cntr_cart(
        &self,
        robot: &Robot,
        desired_pose: &Pose,
        desired_vel: &Twist,
        desired_acc: &Twist,
        position: &Gains,
        orientation: &Gains,
    ) -> Result<(JointVector, f64), CycleError> {
        let pose = robot.ee_frame();

        let e_pos = desired_pose.translation.vector - pose.translation.vector;

        let mut actual = pose.rotation;
        if desired_pose.rotation.coords.dot(&actual.coords) < 0.0 {
            actual = na::UnitQuaternion::new_normalize(-actual.into_inner());
        }
        let error_quaternion = actual.inverse() * desired_pose.rotation;
        let e_ort = pose.rotation
            * Vector3::new(error_quaternion.i, error_quaternion.j, error_quaternion.k);

        let error = twist(e_pos, e_ort);
        let velocity = robot.ee_jacobian().spatial_velocity(robot.joint_velocities());
        let velocity_error = desired_vel - velocity;

        let mut command = *desired_acc;
        for row in 0..3 {
            command[row] += position.kp * error[row] + position.kd * velocity_error[row];
        }
        for row in 3..6 {
            command[row] += orientation.kp * error[row] + orientation.kd * velocity_error[row];
        }
        command -= robot.jacobian_dot_qdot()?;

        let resolved = robot.ee_jacobian().velocities(&command)?;
        let mass = self.dynamics.mass_matrix(robot.joint_positions())?;
        let bias = self.dynamics.bias(robot.joint_positions(), robot.joint_velocities())?;
        let tau = mass * resolved + bias;

        Ok((tau, error.norm()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::{Matrix3, Translation3, Unit, UnitQuaternion};
    use crate::model::{ChainJoint, JointLimits, LinkInertia};

    fn pendulum() -> Arc<RobotModel> {
        let joint = ChainJoint {
            name: "hinge".to_string(),
            origin: Pose::identity(),
            axis: Unit::new_normalize(Vector3::y()),
            limits: JointLimits::full_circle(),
            inertia: LinkInertia {
                mass: 1.5,
                com: Vector3::new(0.3, 0.0, 0.0),
                inertia: Matrix3::from_diagonal(&Vector3::new(0.0, 0.02, 0.0)),
            },
        };
        let flange = Pose::from_parts(Translation3::new(0.6, 0.0, 0.0), UnitQuaternion::identity());
        Arc::new(RobotModel::from_parts(vec![joint], flange).expect("model"))
    }

    #[test]
    fn critically_damped_gains() {
        let gains = Gains::critically_damped(50.0);
        assert!((gains.kd - 2.0 * 50.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn perfect_tracking_reduces_to_gravity_compensation() {
        let model = pendulum();
        let mut robot = Robot::new(model.clone());
        let q = JointVector::from_vec(vec![0.4]);
        let dq = JointVector::zeros(1);
        robot.update(&q, &dq).expect("update");

        let controller = Controller::new(model);
        let desired = JointTrajectoryPoint {
            q: q.clone(),
            dq: dq.clone(),
            ddq: JointVector::zeros(1),
        };
        let (tau, error) = controller
            .id_cntr(&robot, &desired, &Gains::critically_damped(50.0))
            .expect("control");

        let expected = controller.dynamics().bias(&q, &dq).expect("bias");
        assert!((tau[0] - expected[0]).abs() < 1e-9);
        assert!(error.abs() < 1e-12);
    }

    #[test]
    fn position_error_pulls_toward_the_desired_angle() {
        let model = pendulum();
        let mut robot = Robot::new(model.clone());
        let q = JointVector::zeros(1);
        let dq = JointVector::zeros(1);
        robot.update(&q, &dq).expect("update");

        let controller = Controller::new(model);
        let gains = Gains::critically_damped(50.0);
        let desired = JointTrajectoryPoint {
            q: JointVector::from_vec(vec![0.2]),
            dq: JointVector::zeros(1),
            ddq: JointVector::zeros(1),
        };
        let (tau, error) = controller.id_cntr(&robot, &desired, &gains).expect("control");

        let bias = controller.dynamics().bias(&q, &dq).expect("bias");
        assert!(tau[0] > bias[0], "torque must exceed gravity holding torque");
        assert!((error - 0.2).abs() < 1e-12);
    }

    #[test]
    fn cartesian_law_at_equilibrium_is_gravity_compensation() {
        let model = pendulum();
        let mut robot = Robot::new(model.clone());
        let q = JointVector::from_vec(vec![0.3]);
        let dq = JointVector::zeros(1);
        robot.update(&q, &dq).expect("update");

        let controller = Controller::new(model);
        let desired_pose = robot.ee_frame();
        let (tau, error) = controller
            .id_cntr_cart(
                &robot,
                &desired_pose,
                &Twist::zeros(),
                &Twist::zeros(),
                &Gains::critically_damped(100.0),
                &Gains::critically_damped(100.0),
            )
            .expect("control");

        let expected = controller.dynamics().bias(&q, &dq).expect("bias");
        assert!((tau[0] - expected[0]).abs() < 1e-6);
        assert!(error.abs() < 1e-9);
    }
}
