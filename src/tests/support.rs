//! Shared fixtures for the cross-module tests: a seven joint arm assembled
//! in code (no filesystem involved) and recording implementations of the
//! transport seams.

extern crate nalgebra as na;

use std::sync::{Arc, Mutex};
use na::{Matrix3, Translation3, Unit, UnitQuaternion, Vector3};
use crate::kinematic_traits::{JointVector, Pose};
use crate::model::{ChainJoint, JointLimits, LinkInertia, RobotModel};
use crate::transport::{Disconnected, SimEnvironment, TorqueSink};

/// Seven revolute joints with alternating axes, in the proportions of a
/// typical collaborative arm.
pub(crate) fn seven_dof_arm() -> Arc<RobotModel> {
    let masses = [4.0, 4.0, 3.0, 2.7, 1.7, 1.8, 0.3];
    let lifts = [0.34, 0.0, 0.4, 0.0, 0.4, 0.0, 0.126];
    let axes = [
        Vector3::z(),
        Vector3::y(),
        Vector3::z(),
        -Vector3::y(),
        Vector3::z(),
        Vector3::y(),
        Vector3::z(),
    ];
    let limits = [2.96, 2.09, 2.96, 2.09, 2.96, 2.09, 3.05];

    let joints = (0..7)
        .map(|i| ChainJoint {
            name: format!("joint_{}", i + 1),
            origin: Pose::from_parts(
                Translation3::new(0.0, 0.0, lifts[i]),
                UnitQuaternion::identity(),
            ),
            axis: Unit::new_normalize(axes[i]),
            limits: JointLimits { lower: -limits[i], upper: limits[i] },
            inertia: LinkInertia {
                mass: masses[i],
                com: Vector3::new(0.0, 0.03, 0.08),
                inertia: Matrix3::from_diagonal(&Vector3::new(0.02, 0.02, 0.01)),
            },
        })
        .collect();

    let flange = Pose::from_parts(Translation3::new(0.0, 0.0, 0.045), UnitQuaternion::identity());
    Arc::new(RobotModel::from_parts(joints, flange).expect("valid fixture"))
}

/// Torque sink that records every published command.
pub(crate) struct RecordingSink {
    published: Arc<Mutex<Vec<(Vec<f64>, f64)>>>,
}

impl RecordingSink {
    pub(crate) fn new(published: Arc<Mutex<Vec<(Vec<f64>, f64)>>>) -> Self {
        RecordingSink { published }
    }
}

impl TorqueSink for RecordingSink {
    fn publish(&mut self, torques: &JointVector, tracking_error: f64) -> Result<(), Disconnected> {
        self.published
            .lock()
            .expect("sink lock")
            .push((torques.iter().copied().collect(), tracking_error));
        Ok(())
    }
}

/// Environment that counts service calls.
#[derive(Clone)]
pub(crate) struct RecordingEnvironment {
    set_configuration_calls: Arc<Mutex<usize>>,
    pause_calls: Arc<Mutex<usize>>,
}

impl RecordingEnvironment {
    pub(crate) fn new() -> Self {
        RecordingEnvironment {
            set_configuration_calls: Arc::new(Mutex::new(0)),
            pause_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub(crate) fn set_configuration_calls(&self) -> usize {
        *self.set_configuration_calls.lock().expect("env lock")
    }

    pub(crate) fn pause_calls(&self) -> usize {
        *self.pause_calls.lock().expect("env lock")
    }
}

impl SimEnvironment for RecordingEnvironment {
    fn set_configuration(
        &mut self,
        _joint_names: &[String],
        _positions: &JointVector,
    ) -> Result<(), Disconnected> {
        *self.set_configuration_calls.lock().expect("env lock") += 1;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), Disconnected> {
        *self.pause_calls.lock().expect("env lock") += 1;
        Ok(())
    }
}
