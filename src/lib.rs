//! Visual servoing torque control for serial manipulators.
//!
//! The crate drives a fixed-rate control loop that tracks a fiducial marker
//! with a flange-mounted camera while following a pre-planned Cartesian
//! trajectory: the perceived target direction is fused into a desired
//! end-effector orientation (the "look-at" rotation), the combined desired
//! motion is resolved into joint space by damped-least-squares inverse
//! kinematics, and an inverse-dynamics law turns the joint-space error into
//! torques. The robot is described by a URDF file; kinematics and rigid-body
//! dynamics are computed over the parsed chain, so no external solver is
//! involved.
//!
//! # Features
//!
//! - Serial-chain model from URDF: joint origins, axes, limits and link
//!   inertials, with fixed joints folded away.
//! - Geometric Jacobian with exact-inverse / SVD-pseudoinverse velocity
//!   resolution, usable for redundant (7-DOF) arms.
//! - Recursive Newton-Euler inverse dynamics: bias torques and the
//!   joint-space inertia matrix (columns computed in parallel).
//! - Trapezoidal-profile trajectory planner with rectilinear and circular
//!   primitives and zero boundary velocities.
//! - Joint-space (default) and Cartesian-space inverse-dynamics tracking
//!   control, critically damped by convention.
//! - A control loop with explicit `AwaitingRobotState -> Running ->
//!   Terminated` states, zero-torque fallbacks on missing data or per-cycle
//!   failures, and an injectable clock for deterministic tests.
//! - An in-process simulated plant (forward dynamics integration plus marker
//!   publication) so the binary runs end to end without external middleware.
//!
//! The `visual-servo` binary ties all of this together:
//!
//! ```text
//! visual-servo robot.urdf --config controller.toml
//! ```

pub mod errors;
pub mod kinematic_traits;

pub mod model;

#[cfg(feature = "allow_filesystem")]
pub mod urdf;

pub mod jacobian;
pub mod robot;

pub mod dynamics;
pub mod controller;

pub mod planner;
pub mod look_at;

pub mod state;
pub mod transport;
pub mod control_loop;

pub mod config;

pub mod sim;

#[cfg(test)]
mod tests;
