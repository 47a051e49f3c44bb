//! Control loop configuration.
//!
//! Defaults reproduce the reference deployment: 500 Hz loop, one second
//! settle window, a 1.5 s circular trajectory of 0.15 m radius with 0.5 s
//! acceleration blends, critically damped joint-space gains with `kp = 50`,
//! and the camera tool mounted 2.5 cm off the flange looking along the
//! flange x-axis. Every field can be overridden from a TOML file:
//!
//! ```toml
//! rate_hz = 500.0
//! settle_window = 1.0
//! mode = "joint_space"
//! initial_joint_positions = [0.0, 1.57, -1.57, -1.2, 1.57, -1.57, 1.57]
//!
//! [gains]
//! kp = 50.0
//!
//! [trajectory]
//! duration = 1.5
//! radius = 0.15
//! acc_duration = 0.5
//! shape = "circular"
//! end_offset = [0.0, 0.5, 0.0]
//!
//! [tool]
//! xyz = [0.0, 0.0, 0.025]
//! rpy = [-1.5707963, 0.0, -1.5707963]
//! ```

extern crate nalgebra as na;

use std::f64::consts::FRAC_PI_2;
use na::{Translation3, UnitQuaternion, Vector3};
use crate::controller::{ControlMode, Gains};
use crate::errors::ModelError;
use crate::kinematic_traits::Pose;
use crate::planner::PathShape;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default, deny_unknown_fields))]
pub struct ControlConfig {
    /// Control loop frequency, Hz.
    pub rate_hz: f64,
    /// Time the loop holds the trajectory start before motion begins, s.
    pub settle_window: f64,
    pub mode: ControlMode,
    pub gains: GainsConfig,
    pub trajectory: TrajectoryConfig,
    pub tool: ToolConfig,
    /// Configuration pushed to the environment at startup, model joint order.
    pub initial_joint_positions: Vec<f64>,
    /// Bound on startup polling cycles while waiting for the first joint
    /// state; unbounded when absent.
    pub init_retry_limit: Option<usize>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            rate_hz: 500.0,
            settle_window: 1.0,
            mode: ControlMode::JointSpace,
            gains: GainsConfig::default(),
            trajectory: TrajectoryConfig::default(),
            tool: ToolConfig::default(),
            initial_joint_positions: vec![0.0, 1.57, -1.57, -1.2, 1.57, -1.57, 1.57],
            init_retry_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default, deny_unknown_fields))]
pub struct GainsConfig {
    /// Joint-space proportional gain.
    pub kp: f64,
    /// Joint-space derivative gain; `2 sqrt(kp)` (critical damping) when
    /// absent.
    pub kd: Option<f64>,
    /// Cartesian-mode position gain.
    pub kp_position: f64,
    /// Cartesian-mode orientation gain.
    pub kp_orientation: f64,
}

impl Default for GainsConfig {
    fn default() -> Self {
        GainsConfig {
            kp: 50.0,
            kd: None,
            kp_position: 100.0,
            kp_orientation: 100.0,
        }
    }
}

impl GainsConfig {
    pub fn joint_space(&self) -> Gains {
        match self.kd {
            Some(kd) => Gains { kp: self.kp, kd },
            None => Gains::critically_damped(self.kp),
        }
    }

    pub fn cartesian_position(&self) -> Gains {
        Gains::critically_damped(self.kp_position)
    }

    pub fn cartesian_orientation(&self) -> Gains {
        Gains::critically_damped(self.kp_orientation)
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default, deny_unknown_fields))]
pub struct TrajectoryConfig {
    pub duration: f64,
    pub radius: f64,
    pub acc_duration: f64,
    pub shape: PathShape,
    /// Displacement from the initial tool position to the rectilinear end
    /// position, base frame.
    pub end_offset: [f64; 3],
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        TrajectoryConfig {
            duration: 1.5,
            radius: 0.15,
            acc_duration: 0.5,
            shape: PathShape::Circular,
            end_offset: [0.0, 0.5, 0.0],
        }
    }
}

impl TrajectoryConfig {
    pub fn end_offset_vector(&self) -> Vector3<f64> {
        Vector3::new(self.end_offset[0], self.end_offset[1], self.end_offset[2])
    }
}

/// Fixed flange-to-camera transform.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default, deny_unknown_fields))]
pub struct ToolConfig {
    pub xyz: [f64; 3],
    /// Fixed-axis roll/pitch/yaw, radians.
    pub rpy: [f64; 3],
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            xyz: [0.0, 0.0, 0.025],
            rpy: [-FRAC_PI_2, 0.0, -FRAC_PI_2],
        }
    }
}

impl ToolConfig {
    pub fn pose(&self) -> Pose {
        Pose::from_parts(
            Translation3::new(self.xyz[0], self.xyz[1], self.xyz[2]),
            UnitQuaternion::from_euler_angles(self.rpy[0], self.rpy[1], self.rpy[2]),
        )
    }
}

impl ControlConfig {
    /// Checks the configuration against the parsed model before the loop
    /// starts; any violation is fatal.
    pub fn validate(&self, dof: usize) -> Result<(), ModelError> {
        if !(self.rate_hz > 0.0) {
            return Err(ModelError::ParseError(format!(
                "rate_hz must be positive (got {})", self.rate_hz)));
        }
        if self.settle_window < 0.0 {
            return Err(ModelError::ParseError(format!(
                "settle_window must not be negative (got {})", self.settle_window)));
        }
        if !(self.gains.kp > 0.0) {
            return Err(ModelError::ParseError(format!(
                "gains.kp must be positive (got {})", self.gains.kp)));
        }
        if self.initial_joint_positions.len() != dof {
            return Err(ModelError::InvalidLength {
                expected: dof,
                found: self.initial_joint_positions.len(),
            });
        }
        Ok(())
    }

    /// Reads the configuration from a TOML file. Missing fields keep their
    /// defaults; unknown fields are rejected to catch typos early.
    #[cfg(feature = "allow_filesystem")]
    pub fn from_toml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ModelError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| ModelError::ParseError(format!("{}", e)))
    }
}
