//! Look-at geometry: the minimal rotation that aligns the camera's forward
//! axis (local +z) with the direction to a perceived target.
//!
//! This is the orientation half of the servoing task: the trajectory planner
//! prescribes where the tool goes, this rotation prescribes where it points.

extern crate nalgebra as na;

use na::{Unit, UnitQuaternion, Vector3};
use crate::errors::CycleError;

/// Targets closer than this to the optical axis (or to its opposite) are
/// treated as the degenerate aligned/antipodal cases.
const ALIGNMENT_TOLERANCE: f64 = 1e-9;

/// Computes the minimal rotation taking the camera forward axis `(0, 0, 1)`
/// onto the direction of `target` (given in the camera frame).
///
/// The rotation is built from the angle/axis pair `θ = acos(ẑ · v̂)`,
/// `a = ẑ × v̂`. Two configurations need special handling:
///
/// * target on the optical axis: the axis vanishes and the rotation is the
///   identity;
/// * target exactly behind the camera: the axis also vanishes but `θ = π`;
///   any axis orthogonal to `ẑ` is geometrically valid, and the camera
///   x-axis is used so the result is deterministic.
///
/// A zero-length target vector carries no direction at all and is reported
/// as [`CycleError::DegenerateTarget`].
pub fn look_at_rotation(target: &Vector3<f64>) -> Result<UnitQuaternion<f64>, CycleError> {
    if !(target.norm() > ALIGNMENT_TOLERANCE) {
        return Err(CycleError::DegenerateTarget);
    }
    let direction = target.normalize();
    let forward = Vector3::z();

    // Floating point drift can push the dot product marginally out of the
    // acos domain.
    let cosine = forward.dot(&direction).clamp(-1.0, 1.0);
    let angle = cosine.acos();

    if angle < ALIGNMENT_TOLERANCE {
        return Ok(UnitQuaternion::identity());
    }
    if std::f64::consts::PI - angle < ALIGNMENT_TOLERANCE {
        return Ok(UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(Vector3::x()),
            std::f64::consts::PI,
        ));
    }

    let axis = forward.cross(&direction);
    Ok(UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), angle))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn target_on_the_optical_axis_needs_no_rotation() {
        let rotation = look_at_rotation(&Vector3::new(0.0, 0.0, 1.0)).expect("rotation");
        assert!(rotation.angle() < TOLERANCE);

        // Distance along the axis must not matter.
        let far = look_at_rotation(&Vector3::new(0.0, 0.0, 17.3)).expect("rotation");
        assert!(far.angle() < TOLERANCE);
    }

    #[test]
    fn target_behind_the_camera_rotates_half_a_turn() {
        let rotation = look_at_rotation(&Vector3::new(0.0, 0.0, -2.0)).expect("rotation");
        assert!((rotation.angle() - std::f64::consts::PI).abs() < 1e-9);
        // The fallback axis is the camera x-axis.
        let axis = rotation.axis().expect("axis");
        assert!((axis.into_inner() - Vector3::x()).norm() < 1e-9);
        // And the result is still a proper rotation, not NaN.
        assert!(rotation.quaternion().coords.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn rotation_takes_the_forward_axis_onto_the_target_direction() {
        let target = Vector3::new(0.3, -0.2, 0.9);
        let rotation = look_at_rotation(&target).expect("rotation");
        let pointed = rotation * Vector3::z();
        assert!((pointed - target.normalize()).norm() < 1e-12);
    }

    #[test]
    fn composing_with_the_inverse_gives_identity() {
        let target = Vector3::new(0.5, 0.1, 0.4);
        let rotation = look_at_rotation(&target).expect("rotation");
        let composed = rotation * rotation.inverse();
        assert!(composed.angle() < TOLERANCE);
    }

    #[test]
    fn zero_direction_is_degenerate() {
        let result = look_at_rotation(&Vector3::zeros());
        assert!(matches!(result, Err(CycleError::DegenerateTarget)));
    }

    #[test]
    fn oblique_target_angle_matches_the_dot_product() {
        let target = Vector3::new(1.0, 0.0, 1.0);
        let rotation = look_at_rotation(&target).expect("rotation");
        assert!((rotation.angle() - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    }
}
