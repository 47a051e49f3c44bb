//! Pre-planned Cartesian trajectory evaluation.
//!
//! The planner is constructed once with the overall motion parameters and is
//! then a pure function of time: every call with the same `(time, shape)`
//! pair returns the same point, which the control loop relies on to hold the
//! initial position during the settle window.
//!
//! The time law is a trapezoidal velocity profile on the normalized abscissa
//! `s ∈ [0, 1]`: constant-acceleration blends of `acc_duration` at both ends
//! and constant velocity in between, so position is continuous and velocity
//! is zero at `t = 0` and `t = duration`.

extern crate nalgebra as na;

use na::Vector3;
use crate::errors::ModelError;

/// Geometric primitive the abscissa is mapped through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(rename_all = "snake_case"))]
pub enum PathShape {
    /// Straight segment from the start to the end position.
    Rectilinear,
    /// Circle of the configured radius through the start position, traversed
    /// once; the path is closed, so the motion ends where it began.
    #[default]
    Circular,
}

/// Position, velocity and acceleration of the planned point at a given time.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryPoint {
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub acc: Vector3<f64>,
}

pub struct Planner {
    duration: f64,
    radius: f64,
    acc_duration: f64,
    start: Vector3<f64>,
    end: Vector3<f64>,
}

impl Planner {
    /// # Arguments
    ///
    /// * `duration` - total motion time, seconds
    /// * `radius` - circle radius for the circular primitive, meters
    /// * `acc_duration` - length of each constant-acceleration blend; must
    ///   satisfy `0 < acc_duration <= duration / 2` or the boundary
    ///   velocities cannot be zero
    /// * `start`, `end` - Cartesian endpoints (the end applies to the
    ///   rectilinear primitive)
    pub fn new(
        duration: f64,
        radius: f64,
        acc_duration: f64,
        start: Vector3<f64>,
        end: Vector3<f64>,
    ) -> Result<Self, ModelError> {
        if !(duration > 0.0) {
            return Err(ModelError::ParseError(format!(
                "trajectory duration must be positive (got {})", duration)));
        }
        if !(acc_duration > 0.0) || acc_duration > duration / 2.0 {
            return Err(ModelError::ParseError(format!(
                "acceleration duration must lie in (0, {}] (got {})",
                duration / 2.0, acc_duration)));
        }
        Ok(Planner { duration, radius, acc_duration, start, end })
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Evaluates the plan at `time` (clamped to `[0, duration]`) along the
    /// selected primitive.
    pub fn compute_trajectory(&self, time: f64, shape: PathShape) -> TrajectoryPoint {
        let (s, ds, dds) = self.abscissa(time.clamp(0.0, self.duration));
        match shape {
            PathShape::Rectilinear => self.rectilinear(s, ds, dds),
            PathShape::Circular => self.circular(s, ds, dds),
        }
    }

    /// Trapezoidal time law: returns `(s, ds/dt, d2s/dt2)`.
    fn abscissa(&self, t: f64) -> (f64, f64, f64) {
        let ta = self.acc_duration;
        let total = self.duration;
        // Cruise velocity that makes the profile integrate to exactly 1.
        let cruise = 1.0 / (total - ta);
        let accel = cruise / ta;

        if t < ta {
            (0.5 * accel * t * t, accel * t, accel)
        } else if t <= total - ta {
            (cruise * (t - 0.5 * ta), cruise, 0.0)
        } else {
            let remaining = total - t;
            (1.0 - 0.5 * accel * remaining * remaining, accel * remaining, -accel)
        }
    }

    fn rectilinear(&self, s: f64, ds: f64, dds: f64) -> TrajectoryPoint {
        let span = self.end - self.start;
        TrajectoryPoint {
            pos: self.start + span * s,
            vel: span * ds,
            acc: span * dds,
        }
    }

    fn circular(&self, s: f64, ds: f64, dds: f64) -> TrajectoryPoint {
        let r = self.radius;
        let angle = 2.0 * std::f64::consts::PI * s;
        let rate = 2.0 * std::f64::consts::PI * ds;
        let rate_dot = 2.0 * std::f64::consts::PI * dds;

        // Circle in the y-z plane, centered one radius above the start, so
        // the path passes through the start at s = 0 and s = 1.
        let pos = self.start
            + Vector3::new(0.0, r * angle.sin(), r * (1.0 - angle.cos()));
        let d_angle = Vector3::new(0.0, r * angle.cos(), r * angle.sin());
        let dd_angle = Vector3::new(0.0, -r * angle.sin(), r * angle.cos());

        TrajectoryPoint {
            pos,
            vel: d_angle * rate,
            acc: d_angle * rate_dot + dd_angle * rate * rate,
        }
    }
}
