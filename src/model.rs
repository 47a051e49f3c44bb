//! Immutable kinematic model of a serial manipulator.
//!
//! The model is the ordered chain of actuated (revolute) joints from the base
//! link to the flange, with the fixed transforms between them folded in. It is
//! built once at startup (normally from a URDF file, see [`crate::urdf`]) and
//! never mutated afterwards; everything downstream (the kinematics facade, the
//! dynamics, the simulated plant) shares it behind an `Arc`.

extern crate nalgebra as na;

use na::{Matrix3, Unit, UnitQuaternion, Vector3};
use crate::errors::{CycleError, ModelError};
use crate::kinematic_traits::{JointVector, Pose};

/// Inertial properties of the link a joint moves, expressed in that link's
/// own frame: mass, center of mass, and the rotational inertia tensor about
/// the center of mass.
#[derive(Debug, Clone)]
pub struct LinkInertia {
    pub mass: f64,
    pub com: Vector3<f64>,
    pub inertia: Matrix3<f64>,
}

impl LinkInertia {
    /// A massless link (virtual links and flanges commonly have no inertial
    /// element in the description file).
    pub fn zero() -> Self {
        LinkInertia {
            mass: 0.0,
            com: Vector3::zeros(),
            inertia: Matrix3::zeros(),
        }
    }
}

/// Rotation range of a joint, radians. Joints declared `continuous` in the
/// description get a full turn in both directions.
#[derive(Debug, Clone, Copy)]
pub struct JointLimits {
    pub lower: f64,
    pub upper: f64,
}

impl JointLimits {
    pub fn full_circle() -> Self {
        JointLimits {
            lower: -2.0 * std::f64::consts::PI,
            upper: 2.0 * std::f64::consts::PI,
        }
    }

    pub fn clamp(&self, angle: f64) -> f64 {
        angle.clamp(self.lower, self.upper)
    }
}

/// One actuated joint of the chain together with the link it moves.
///
/// `origin` is the fixed transform from the previous link frame to this
/// joint's frame; any fixed joints between the two actuated ones are already
/// folded into it. The moving-link frame is `origin` followed by the rotation
/// of `q` about `axis`.
#[derive(Debug, Clone)]
pub struct ChainJoint {
    pub name: String,
    pub origin: Pose,
    pub axis: Unit<Vector3<f64>>,
    pub limits: JointLimits,
    pub inertia: LinkInertia,
}

/// The parsed robot: actuated chain plus the fixed transform from the last
/// moving link to the flange.
#[derive(Debug, Clone)]
pub struct RobotModel {
    joints: Vec<ChainJoint>,
    flange_offset: Pose,
}

impl RobotModel {
    /// Assembles a model from an explicit joint chain. Fails if the chain is
    /// empty or carries no inertia at all (a zero mass matrix cannot be used
    /// for torque control).
    pub fn from_parts(joints: Vec<ChainJoint>, flange_offset: Pose) -> Result<Self, ModelError> {
        if joints.is_empty() {
            return Err(ModelError::TreeConstructionError(
                "the kinematic chain contains no actuated joints".to_string(),
            ));
        }
        if joints.iter().all(|j| j.inertia.mass == 0.0) {
            return Err(ModelError::TreeConstructionError(
                "the kinematic chain carries no inertia".to_string(),
            ));
        }
        Ok(RobotModel { joints, flange_offset })
    }

    /// Number of actuated joints (the DOF count all joint-indexed containers
    /// must match).
    pub fn dof(&self) -> usize {
        self.joints.len()
    }

    pub fn joints(&self) -> &[ChainJoint] {
        &self.joints
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|j| j.name.clone()).collect()
    }

    pub fn flange_offset(&self) -> &Pose {
        &self.flange_offset
    }

    pub fn zero_joints(&self) -> JointVector {
        JointVector::zeros(self.dof())
    }

    /// Validates that a joint-indexed container has exactly DOF elements.
    pub fn check_dof(&self, v: &JointVector) -> Result<(), CycleError> {
        if v.len() != self.dof() {
            return Err(CycleError::DofMismatch {
                expected: self.dof(),
                found: v.len(),
            });
        }
        Ok(())
    }

    /// World pose of every moving-link frame for the given joint positions,
    /// base to flange order.
    pub fn link_frames(&self, q: &JointVector) -> Result<Vec<Pose>, CycleError> {
        self.check_dof(q)?;
        let mut frames = Vec::with_capacity(self.dof());
        let mut current = Pose::identity();
        for (i, joint) in self.joints.iter().enumerate() {
            let spin = UnitQuaternion::from_axis_angle(&joint.axis, q[i]);
            current = current * joint.origin * Pose::from_parts(na::Translation3::identity(), spin);
            frames.push(current);
        }
        Ok(frames)
    }

    /// World pose of the flange (the mechanical mounting face, before any
    /// tool transform) for the given joint positions.
    pub fn flange(&self, q: &JointVector) -> Result<Pose, CycleError> {
        let frames = self.link_frames(q)?;
        // from_parts above guarantees at least one frame
        Ok(frames[frames.len() - 1] * self.flange_offset)
    }
}
