extern crate nalgebra as na;

use na::{DVector, Isometry3, Vector6};

/// Pose of a robot frame. It contains both Cartesian position and rotation quaternion
/// ```
/// extern crate nalgebra as na;
/// use na::{Isometry3, Translation3, UnitQuaternion};
///
/// type Pose = Isometry3<f64>;
///
/// let translation = Translation3::new(1.0, 0.0, 0.0);
/// // The quaternion should be normalized to represent a valid rotation.
/// let rotation = UnitQuaternion::from_quaternion(na::Quaternion::new(1.0, 0.0, 0.0, 1.0).normalize());
/// let transform = Pose::from_parts(translation, rotation);
/// ```
pub type Pose = Isometry3<f64>;

/// Joint-indexed quantity (positions, velocities, accelerations or torques).
/// The length always equals the degree-of-freedom count of the model that
/// produced it; this is validated when the model consumes the vector, not
/// assumed.
pub type JointVector = DVector<f64>;

/// Spatial velocity or acceleration of a frame: linear part in rows 0..3,
/// angular part in rows 3..6.
pub type Twist = Vector6<f64>;

/// One desired point of a joint-space trajectory, as produced by the inverse
/// kinematics from a desired Cartesian pose, velocity and acceleration.
#[derive(Debug, Clone)]
pub struct JointTrajectoryPoint {
    pub q: JointVector,
    pub dq: JointVector,
    pub ddq: JointVector,
}

impl JointTrajectoryPoint {
    pub fn zero(dof: usize) -> Self {
        JointTrajectoryPoint {
            q: JointVector::zeros(dof),
            dq: JointVector::zeros(dof),
            ddq: JointVector::zeros(dof),
        }
    }
}

/// Builds a twist from separate linear and angular components.
pub fn twist(linear: na::Vector3<f64>, angular: na::Vector3<f64>) -> Twist {
    Twist::new(linear.x, linear.y, linear.z, angular.x, angular.y, angular.z)
}
