//! Error handling for model construction and the per-cycle control path

use std::io;
use nalgebra::Vector3;

/// Unified error to report failures while building the robot model from its
/// description file. Any of these is fatal: the control loop must not start
/// on a model that did not parse.
#[derive(Debug)]
pub enum ModelError {
    IoError(io::Error),
    ParseError(String),
    TreeConstructionError(String),
    MissingField(String),
    InvalidLength { expected: usize, found: usize },
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ModelError::IoError(ref err) =>
                write!(f, "IO Error: {}", err),
            ModelError::ParseError(ref msg) =>
                write!(f, "Parse Error: {}", msg),
            ModelError::TreeConstructionError(ref msg) =>
                write!(f, "Tree Construction Error: {}", msg),
            ModelError::MissingField(ref field) =>
                write!(f, "Missing Field: {}", field),
            ModelError::InvalidLength { expected, found } =>
                write!(f, "Invalid Length: expected {}, found {}", expected, found),
        }
    }
}

impl std::error::Error for ModelError {}

impl From<io::Error> for ModelError {
    fn from(err: io::Error) -> Self {
        ModelError::IoError(err)
    }
}

/// Errors that can occur on an individual control cycle. None of these stop
/// the loop; the caller falls back to a safe torque command and reports the
/// condition on the diagnostic channel.
#[derive(Debug, Clone)]
pub enum CycleError {
    /// The iterative inverse kinematics did not reach the tolerance within
    /// the retry budget. Residuals of the best attempt are included.
    NotConverged {
        num_tried: usize,
        position_diff: Vector3<f64>,
        rotation_diff: Vector3<f64>,
    },
    /// The perceived target direction has (near) zero length, so no look-at
    /// rotation can be derived from it.
    DegenerateTarget,
    /// A joint-indexed container does not match the model's degree-of-freedom
    /// count.
    DofMismatch { expected: usize, found: usize },
    /// The Jacobian pseudoinverse could not be computed.
    SingularJacobian,
    /// The joint-space inertia matrix could not be inverted (degenerate
    /// inertial parameters).
    SingularInertia,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            CycleError::NotConverged { num_tried, ref position_diff, ref rotation_diff } =>
                write!(f, "Inverse kinematics did not converge after {} attempts \
                       (position residual {:.2e}, rotation residual {:.2e})",
                       num_tried, position_diff.norm(), rotation_diff.norm()),
            CycleError::DegenerateTarget =>
                write!(f, "Target direction has zero length"),
            CycleError::DofMismatch { expected, found } =>
                write!(f, "Joint vector length mismatch: expected {}, found {}", expected, found),
            CycleError::SingularJacobian =>
                write!(f, "Unable to compute the pseudoinverse of the Jacobian matrix"),
            CycleError::SingularInertia =>
                write!(f, "Unable to invert the joint-space inertia matrix"),
        }
    }
}

impl std::error::Error for CycleError {}
