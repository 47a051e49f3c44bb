//! Robot state and kinematics facade.
//!
//! [`Robot`] owns the parsed model plus the latest joint state and exposes
//! everything the control loop queries each cycle: end-effector pose,
//! Jacobian, and the inverse kinematics that turns a desired Cartesian
//! motion into a joint-space trajectory point. Cached quantities (frames,
//! Jacobian) are only valid for the state passed to the most recent
//! [`Robot::update`] call.

extern crate nalgebra as na;

use std::sync::Arc;
use na::Vector3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use crate::errors::CycleError;
use crate::jacobian::{Jacobian, jacobian_dot_qdot};
use crate::kinematic_traits::{JointTrajectoryPoint, JointVector, Pose, Twist, twist};
use crate::model::RobotModel;

const IK_MAX_ITERATIONS: usize = 200;
const IK_POSITION_TOLERANCE: f64 = 1e-5;
const IK_ROTATION_TOLERANCE: f64 = 1e-5;
/// Additional attempts from perturbed seeds before giving up.
const IK_RESEED_ATTEMPTS: usize = 4;
/// Largest joint-space Newton step per iteration, radians.
const IK_MAX_STEP: f64 = 0.5;

pub struct Robot {
    model: Arc<RobotModel>,
    tool: Option<Pose>,
    q: JointVector,
    dq: JointVector,
    flange: Pose,
    ee: Pose,
    jacobian: Jacobian,
}

impl Robot {
    /// Creates the facade at the zero configuration. Call [`Robot::update`]
    /// with real sensor data before querying poses.
    pub fn new(model: Arc<RobotModel>) -> Self {
        let q = model.zero_joints();
        let dq = model.zero_joints();
        // The zero vector always matches the model DOF, so these cannot fail.
        let flange = model.flange(&q).expect("zero configuration");
        let jacobian = Jacobian::new(&model, &q, None).expect("zero configuration");
        Robot {
            model,
            tool: None,
            ee: flange,
            q,
            dq,
            flange,
            jacobian,
        }
    }

    pub fn model(&self) -> &Arc<RobotModel> {
        &self.model
    }

    pub fn dof(&self) -> usize {
        self.model.dof()
    }

    /// Appends a fixed flange-to-tool transform (for example the camera
    /// mount). Intended to be called once at startup, before the control
    /// loop runs; the cached pose and Jacobian are recomputed for the
    /// current joint state.
    pub fn add_tool(&mut self, tool: Pose) {
        self.tool = match self.tool {
            Some(existing) => Some(existing * tool),
            None => Some(tool),
        };
        self.recompute();
    }

    pub fn tool(&self) -> Option<&Pose> {
        self.tool.as_ref()
    }

    /// Replaces the joint state and recomputes forward kinematics and the
    /// Jacobian. Must be called once per cycle before querying poses.
    pub fn update(&mut self, q: &JointVector, dq: &JointVector) -> Result<(), CycleError> {
        self.model.check_dof(q)?;
        self.model.check_dof(dq)?;
        self.q = q.clone();
        self.dq = dq.clone();
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.flange = self.model.flange(&self.q).expect("validated joint state");
        self.ee = match &self.tool {
            Some(tool) => self.flange * tool,
            None => self.flange,
        };
        self.jacobian =
            Jacobian::new(&self.model, &self.q, self.tool.as_ref()).expect("validated joint state");
    }

    pub fn joint_positions(&self) -> &JointVector {
        &self.q
    }

    pub fn joint_velocities(&self) -> &JointVector {
        &self.dq
    }

    /// Tool-frame pose in base coordinates, for the most recent update.
    pub fn ee_frame(&self) -> Pose {
        self.ee
    }

    /// Flange pose (before the tool transform), for the most recent update.
    pub fn flange_frame(&self) -> Pose {
        self.flange
    }

    /// End-effector Jacobian for the most recent update.
    pub fn ee_jacobian(&self) -> &Jacobian {
        &self.jacobian
    }

    /// The `dJ/dt * dq` term for the most recent update.
    pub fn jacobian_dot_qdot(&self) -> Result<Twist, CycleError> {
        jacobian_dot_qdot(&self.model, &self.q, &self.dq, self.tool.as_ref())
    }

    /// Tool-frame forward kinematics for an arbitrary configuration.
    pub fn forward(&self, q: &JointVector) -> Result<Pose, CycleError> {
        let flange = self.model.flange(q)?;
        Ok(match &self.tool {
            Some(tool) => flange * tool,
            None => flange,
        })
    }

    /// Solves for the joint-space trajectory point achieving the desired
    /// Cartesian pose, velocity and acceleration of the flange frame (the
    /// caller folds any tool offset into the desired pose; the control loop
    /// composes the look-at orientation with the inverse tool rotation for
    /// exactly this reason).
    ///
    /// The position problem is solved by damped Newton iteration on the pose
    /// error; velocities and accelerations are then resolved through the
    /// Jacobian pseudoinverse (`ddq = J⁺(ẍ - dJ/dt q̇)`). If the iteration
    /// does not converge from `seed`, a fixed number of deterministic
    /// re-seeded attempts is made (the perturbations come from a
    /// constant-seeded generator, so identical inputs always produce
    /// identical outputs). The final failure is reported as
    /// [`CycleError::NotConverged`] with the best residuals observed.
    pub fn inverse_kinematics(
        &self,
        desired_pose: &Pose,
        desired_vel: &Twist,
        desired_acc: &Twist,
        seed: &JointVector,
    ) -> Result<JointTrajectoryPoint, CycleError> {
        self.model.check_dof(seed)?;

        let mut rng = SmallRng::seed_from_u64(0x5eed_cafe);
        let mut best_residual: Option<(Vector3<f64>, Vector3<f64>)> = None;
        let attempts = 1 + IK_RESEED_ATTEMPTS;

        for attempt in 0..attempts {
            let start = if attempt == 0 {
                seed.clone()
            } else {
                self.random_configuration(&mut rng)
            };

            match self.solve_position(desired_pose, &start) {
                Ok(qd) => {
                    let jacobian = Jacobian::new(&self.model, &qd, None)?;
                    let dqd = jacobian.velocities(desired_vel)?;
                    let jdot_qdot = jacobian_dot_qdot(&self.model, &qd, &dqd, None)?;
                    let ddqd = jacobian.velocities(&(desired_acc - jdot_qdot))?;
                    return Ok(JointTrajectoryPoint { q: qd, dq: dqd, ddq: ddqd });
                }
                Err(residual) => {
                    let keep = match &best_residual {
                        Some((p, _)) => residual.0.norm() < p.norm(),
                        None => true,
                    };
                    if keep {
                        best_residual = Some(residual);
                    }
                }
            }
        }

        let (position_diff, rotation_diff) =
            best_residual.unwrap_or((Vector3::zeros(), Vector3::zeros()));
        Err(CycleError::NotConverged {
            num_tried: attempts,
            position_diff,
            rotation_diff,
        })
    }

    fn solve_position(
        &self,
        desired: &Pose,
        start: &JointVector,
    ) -> Result<JointVector, (Vector3<f64>, Vector3<f64>)> {
        let mut q = start.clone();
        let mut residual = (Vector3::zeros(), Vector3::zeros());

        for _ in 0..IK_MAX_ITERATIONS {
            let pose = self.model.flange(&q).map_err(|_| residual.clone())?;
            let e_pos = desired.translation.vector - pose.translation.vector;
            let e_rot = (desired.rotation * pose.rotation.inverse()).scaled_axis();
            residual = (e_pos, e_rot);

            if e_pos.norm() < IK_POSITION_TOLERANCE && e_rot.norm() < IK_ROTATION_TOLERANCE {
                return Ok(q);
            }

            let jacobian = match Jacobian::new(&self.model, &q, None) {
                Ok(j) => j,
                Err(_) => return Err(residual),
            };
            let step = match jacobian.velocities(&twist(e_pos, e_rot)) {
                Ok(s) => s,
                Err(_) => return Err(residual),
            };

            let largest = step.amax();
            let scale = if largest > IK_MAX_STEP { IK_MAX_STEP / largest } else { 1.0 };
            q += step * scale;

            for (i, joint) in self.model.joints().iter().enumerate() {
                q[i] = joint.limits.clamp(q[i]);
            }
        }

        Err(residual)
    }

    fn random_configuration(&self, rng: &mut SmallRng) -> JointVector {
        JointVector::from_iterator(
            self.dof(),
            self.model.joints().iter().map(|joint| {
                if joint.limits.upper > joint.limits.lower {
                    rng.random_range(joint.limits.lower..joint.limits.upper)
                } else {
                    0.0
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::{Matrix3, Translation3, Unit, UnitQuaternion};
    use crate::model::{ChainJoint, JointLimits, LinkInertia};

    /// A three joint spatial arm: waist about z, shoulder and elbow about y.
    fn three_joint_arm() -> Arc<RobotModel> {
        let inertia = LinkInertia {
            mass: 1.0,
            com: Vector3::new(0.2, 0.0, 0.0),
            inertia: Matrix3::identity() * 0.01,
        };
        let joints = vec![
            ChainJoint {
                name: "waist".to_string(),
                origin: Pose::from_parts(Translation3::new(0.0, 0.0, 0.3), UnitQuaternion::identity()),
                axis: Unit::new_normalize(Vector3::z()),
                limits: JointLimits { lower: -3.0, upper: 3.0 },
                inertia: inertia.clone(),
            },
            ChainJoint {
                name: "shoulder".to_string(),
                origin: Pose::identity(),
                axis: Unit::new_normalize(Vector3::y()),
                limits: JointLimits { lower: -2.0, upper: 2.0 },
                inertia: inertia.clone(),
            },
            ChainJoint {
                name: "elbow".to_string(),
                origin: Pose::from_parts(Translation3::new(0.4, 0.0, 0.0), UnitQuaternion::identity()),
                axis: Unit::new_normalize(Vector3::y()),
                limits: JointLimits { lower: -2.5, upper: 2.5 },
                inertia,
            },
        ];
        let flange = Pose::from_parts(Translation3::new(0.3, 0.0, 0.0), UnitQuaternion::identity());
        Arc::new(RobotModel::from_parts(joints, flange).expect("valid model"))
    }

    #[test]
    fn update_is_deterministic() {
        let mut robot = Robot::new(three_joint_arm());
        let q = JointVector::from_vec(vec![0.3, -0.5, 0.8]);
        let dq = JointVector::zeros(3);

        robot.update(&q, &dq).expect("update");
        let first = robot.ee_frame();
        robot.update(&q, &dq).expect("update");
        let second = robot.ee_frame();

        assert_eq!(first, second);
    }

    #[test]
    fn tool_is_composed_onto_the_flange() {
        let mut robot = Robot::new(three_joint_arm());
        let tool = Pose::from_parts(Translation3::new(0.0, 0.0, 0.1), UnitQuaternion::identity());
        robot.add_tool(tool);

        let expected = robot.flange_frame() * tool;
        let actual = robot.ee_frame();
        assert!((expected.translation.vector - actual.translation.vector).norm() < 1e-12);
    }

    #[test]
    fn update_rejects_wrong_joint_count() {
        let mut robot = Robot::new(three_joint_arm());
        let q = JointVector::zeros(5);
        let dq = JointVector::zeros(5);
        assert!(matches!(
            robot.update(&q, &dq),
            Err(CycleError::DofMismatch { expected: 3, found: 5 })
        ));
    }

    #[test]
    fn inverse_kinematics_reaches_a_forward_pose() {
        let robot = Robot::new(three_joint_arm());
        let q_known = JointVector::from_vec(vec![0.4, -0.6, 1.0]);
        let target = robot.forward(&q_known).expect("fk");

        let seed = JointVector::from_vec(vec![0.3, -0.4, 0.8]);
        let point = robot
            .inverse_kinematics(&target, &Twist::zeros(), &Twist::zeros(), &seed)
            .expect("ik");

        let reached = robot.forward(&point.q).expect("fk");
        assert!((reached.translation.vector - target.translation.vector).norm() < 1e-4);
        assert!(reached.rotation.angle_to(&target.rotation) < 1e-3);
        assert!(point.dq.norm() < 1e-9);
        assert!(point.ddq.norm() < 1e-9);
    }

    #[test]
    fn inverse_kinematics_is_deterministic() {
        let robot = Robot::new(three_joint_arm());
        let q_known = JointVector::from_vec(vec![0.4, -0.6, 1.0]);
        let target = robot.forward(&q_known).expect("fk");
        let seed = JointVector::from_vec(vec![0.3, -0.4, 0.8]);

        let first = robot
            .inverse_kinematics(&target, &Twist::zeros(), &Twist::zeros(), &seed)
            .expect("ik");
        let second = robot
            .inverse_kinematics(&target, &Twist::zeros(), &Twist::zeros(), &seed)
            .expect("ik");

        assert_eq!(first.q, second.q);
        assert_eq!(first.dq, second.dq);
    }

    #[test]
    fn inverse_kinematics_targets_the_flange_even_with_a_tool() {
        let mut robot = Robot::new(three_joint_arm());
        robot.add_tool(Pose::from_parts(
            Translation3::new(0.0, 0.0, 0.2),
            UnitQuaternion::identity(),
        ));

        let q_known = JointVector::from_vec(vec![0.4, -0.6, 1.0]);
        let flange_target = robot.model().flange(&q_known).expect("fk");
        let seed = JointVector::from_vec(vec![0.3, -0.4, 0.8]);

        let point = robot
            .inverse_kinematics(&flange_target, &Twist::zeros(), &Twist::zeros(), &seed)
            .expect("ik");
        let reached = robot.model().flange(&point.q).expect("fk");
        assert!((reached.translation.vector - flange_target.translation.vector).norm() < 1e-4);
    }

    #[test]
    fn unreachable_pose_reports_not_converged() {
        let robot = Robot::new(three_joint_arm());
        // Two meters away: outside the arm's reach.
        let target = Pose::from_parts(Translation3::new(2.0, 0.0, 0.0), UnitQuaternion::identity());
        let seed = robot.model().zero_joints();

        let result = robot.inverse_kinematics(&target, &Twist::zeros(), &Twist::zeros(), &seed);
        match result {
            Err(CycleError::NotConverged { num_tried, position_diff, .. }) => {
                assert_eq!(num_tried, 1 + IK_RESEED_ATTEMPTS);
                assert!(position_diff.norm() > 0.1);
            }
            other => panic!("expected NotConverged, got {:?}", other.map(|p| p.q)),
        }
    }
}
