extern crate nalgebra as na;

use na::{Matrix6xX, Vector3};
use na::linalg::SVD;
use crate::errors::CycleError;
use crate::kinematic_traits::{JointVector, Pose, Twist, twist};
use crate::model::RobotModel;

/// Struct representing the Jacobian matrix of the end-effector
///
/// The Jacobian matrix maps the joint velocities to the end-effector
/// velocities. Each column corresponds to a joint, and each row corresponds
/// to a degree of freedom of the end-effector (linear and angular
/// velocities).
pub struct Jacobian {
    /// A 6 x DOF matrix; linear rows first, angular rows below.
    matrix: Matrix6xX<f64>,

    /// Singular values below this threshold are dropped when the
    /// pseudoinverse has to be taken.
    epsilon: f64,
}

const DEFAULT_EPSILON: f64 = 1e-6;

impl Jacobian {
    /// Computes the geometric Jacobian of the tool point for the given joint
    /// configuration. For a revolute joint `i` with world axis `z_i` at world
    /// position `p_i`, the column is `[z_i x (p_e - p_i); z_i]` where `p_e`
    /// is the tool position.
    ///
    /// # Arguments
    ///
    /// * `model` - the kinematic chain
    /// * `q` - joint configuration the Jacobian is taken at
    /// * `tool` - optional flange-to-tool transform; when present the tool
    ///   center point is used as the reference point
    pub fn new(model: &RobotModel, q: &JointVector, tool: Option<&Pose>) -> Result<Self, CycleError> {
        let frames = model.link_frames(q)?;
        let mut tip = frames[frames.len() - 1] * model.flange_offset();
        if let Some(tool) = tool {
            tip *= *tool;
        }
        let p_e = tip.translation.vector;

        let mut matrix = Matrix6xX::zeros(model.dof());
        for (i, joint) in model.joints().iter().enumerate() {
            let frame = &frames[i];
            // The joint axis is invariant under its own rotation, so the
            // moving-link frame gives the same world axis as the joint frame.
            let z_i: Vector3<f64> = frame.rotation * joint.axis.into_inner();
            let p_i = frame.translation.vector;
            let linear = z_i.cross(&(p_e - p_i));
            matrix.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
            matrix.fixed_view_mut::<3, 1>(3, i).copy_from(&z_i);
        }

        Ok(Jacobian { matrix, epsilon: DEFAULT_EPSILON })
    }

    pub fn matrix(&self) -> &Matrix6xX<f64> {
        &self.matrix
    }

    /// Spatial velocity of the tool point for the given joint velocities
    /// (`J * dq`).
    pub fn spatial_velocity(&self, dq: &JointVector) -> Twist {
        let v = &self.matrix * dq;
        twist(
            Vector3::new(v[0], v[1], v[2]),
            Vector3::new(v[3], v[4], v[5]),
        )
    }

    /// Computes the joint velocities required to achieve a desired
    /// end-effector velocity.
    ///
    /// This method tries the exact inverse when the Jacobian is square
    /// (6-DOF arms). For redundant arms, or when the exact inverse does not
    /// exist, it falls back to the SVD pseudoinverse, which also gives the
    /// minimum-norm solution across the null space.
    pub fn velocities(&self, desired: &Twist) -> Result<JointVector, CycleError> {
        if self.matrix.ncols() == 6 {
            let square = na::Matrix6::from_iterator(self.matrix.iter().copied());
            if let Some(inverse) = square.try_inverse() {
                let dq = inverse * desired;
                return Ok(JointVector::from_iterator(6, dq.iter().copied()));
            }
        }
        let svd = SVD::new(self.matrix.clone_owned(), true, true);
        match svd.pseudo_inverse(self.epsilon) {
            Ok(pseudoinverse) => Ok(pseudoinverse * desired),
            Err(_) => Err(CycleError::SingularJacobian),
        }
    }

    /// Computes the joint torques balancing a desired end-effector
    /// force/torque (`J^T * wrench`).
    pub fn torques(&self, desired_force_torque: &Twist) -> JointVector {
        self.matrix.transpose() * desired_force_torque
    }
}

/// The `dJ/dt * dq` term needed to resolve Cartesian accelerations into joint
/// accelerations. Differentiated numerically: the Jacobian is re-evaluated at
/// the configuration advanced by `dq * h` for a small `h`.
pub fn jacobian_dot_qdot(
    model: &RobotModel,
    q: &JointVector,
    dq: &JointVector,
    tool: Option<&Pose>,
) -> Result<Twist, CycleError> {
    const H: f64 = 1e-6;
    model.check_dof(dq)?;
    let j_now = Jacobian::new(model, q, tool)?;
    let advanced = q + dq * H;
    let j_next = Jacobian::new(model, &advanced, tool)?;
    let derivative = (j_next.matrix - &j_now.matrix) / H;
    let v = derivative * dq;
    Ok(twist(
        Vector3::new(v[0], v[1], v[2]),
        Vector3::new(v[3], v[4], v[5]),
    ))
}
