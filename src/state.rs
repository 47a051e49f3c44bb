//! Shared sensor state between the ingest handlers and the control loop.
//!
//! The handlers run in the delivery context of the transport (separate
//! threads); the loop reads on its own fixed-rate thread. Each snapshot is
//! replaced whole under its mutex, so the loop always observes the latest
//! fully formed message — never a position array from one message paired
//! with velocities from another. Intermediate updates may be skipped;
//! coalescing is expected.

extern crate nalgebra as na;

use std::sync::{Arc, Mutex};
use std::thread;
use na::{Quaternion, UnitQuaternion, Vector3};
use tracing::{debug, warn};
use crate::kinematic_traits::JointVector;
use crate::transport::{JointStateMsg, TargetPoseMsg};

/// Latest joint sensor snapshot: positions and velocities in model order,
/// both of DOF length.
#[derive(Debug, Clone)]
pub struct JointState {
    pub positions: JointVector,
    pub velocities: JointVector,
}

/// Latest perceived target pose in the camera frame.
#[derive(Debug, Clone)]
pub struct TargetPose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

/// Snapshot holder injected into both the ingest side and the control loop.
/// "Available" simply means the first valid message has arrived.
#[derive(Default)]
pub struct SharedState {
    joint: Mutex<Option<JointState>>,
    target: Mutex<Option<TargetPose>>,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(SharedState::default())
    }

    pub fn joint_state(&self) -> Option<JointState> {
        self.joint.lock().expect("joint state lock").clone()
    }

    pub fn target_pose(&self) -> Option<TargetPose> {
        self.target.lock().expect("target pose lock").clone()
    }

    fn replace_joint(&self, state: JointState) {
        *self.joint.lock().expect("joint state lock") = Some(state);
    }

    fn replace_target(&self, pose: TargetPose) {
        *self.target.lock().expect("target pose lock") = Some(pose);
    }
}

/// Validates and stores incoming joint sensor messages. A message is one
/// full snapshot; malformed messages are dropped without touching the stored
/// state.
pub struct JointStateHandler {
    state: Arc<SharedState>,
    dof: usize,
}

impl JointStateHandler {
    pub fn new(state: Arc<SharedState>, dof: usize) -> Self {
        JointStateHandler { state, dof }
    }

    pub fn handle(&self, msg: JointStateMsg) {
        if msg.positions.len() != self.dof || msg.velocities.len() != self.dof {
            warn!(
                "joint state message with {} positions / {} velocities ignored (expected {})",
                msg.positions.len(),
                msg.velocities.len(),
                self.dof
            );
            return;
        }
        self.state.replace_joint(JointState {
            positions: JointVector::from_vec(msg.positions),
            velocities: JointVector::from_vec(msg.velocities),
        });
    }
}

/// Validates and stores incoming target pose messages.
pub struct TargetPoseHandler {
    state: Arc<SharedState>,
}

impl TargetPoseHandler {
    pub fn new(state: Arc<SharedState>) -> Self {
        TargetPoseHandler { state }
    }

    pub fn handle(&self, msg: TargetPoseMsg) {
        let [x, y, z, w] = msg.orientation;
        let quaternion = Quaternion::new(w, x, y, z);
        if quaternion.norm() < 1e-9 {
            warn!("target pose message with zero quaternion ignored");
            return;
        }
        self.state.replace_target(TargetPose {
            position: Vector3::new(msg.position[0], msg.position[1], msg.position[2]),
            orientation: UnitQuaternion::new_normalize(quaternion),
        });
    }
}

/// Spawns the two ingest threads draining the transport receivers into the
/// shared state. The threads end when their channel disconnects.
pub fn spawn_ingest(
    state: Arc<SharedState>,
    dof: usize,
    joint_rx: flume::Receiver<JointStateMsg>,
    target_rx: flume::Receiver<TargetPoseMsg>,
) -> Vec<thread::JoinHandle<()>> {
    let joint_handler = JointStateHandler::new(state.clone(), dof);
    let target_handler = TargetPoseHandler::new(state);

    let joints = thread::Builder::new()
        .name("joint-state-ingest".to_string())
        .spawn(move || {
            for msg in joint_rx.iter() {
                joint_handler.handle(msg);
            }
            debug!("joint state channel closed");
        })
        .expect("spawn joint state ingest");

    let targets = thread::Builder::new()
        .name("target-pose-ingest".to_string())
        .spawn(move || {
            for msg in target_rx.iter() {
                target_handler.handle(msg);
            }
            debug!("target pose channel closed");
        })
        .expect("spawn target pose ingest");

    vec![joints, targets]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_unavailable_until_the_first_message() {
        let state = SharedState::new();
        assert!(state.joint_state().is_none());
        assert!(state.target_pose().is_none());
    }

    #[test]
    fn last_message_wins() {
        let state = SharedState::new();
        let handler = JointStateHandler::new(state.clone(), 2);

        handler.handle(JointStateMsg {
            positions: vec![1.0, 2.0],
            velocities: vec![0.0, 0.0],
        });
        handler.handle(JointStateMsg {
            positions: vec![3.0, 4.0],
            velocities: vec![0.5, 0.5],
        });

        let snapshot = state.joint_state().expect("available");
        assert_eq!(snapshot.positions[0], 3.0);
        assert_eq!(snapshot.velocities[1], 0.5);
    }

    #[test]
    fn mismatched_lengths_are_dropped() {
        let state = SharedState::new();
        let handler = JointStateHandler::new(state.clone(), 3);

        handler.handle(JointStateMsg {
            positions: vec![1.0, 2.0],
            velocities: vec![0.0, 0.0, 0.0],
        });
        assert!(state.joint_state().is_none());

        handler.handle(JointStateMsg {
            positions: vec![1.0, 2.0, 3.0],
            velocities: vec![0.0],
        });
        assert!(state.joint_state().is_none());
    }

    #[test]
    fn target_quaternion_is_normalized_on_ingest() {
        let state = SharedState::new();
        let handler = TargetPoseHandler::new(state.clone());

        handler.handle(TargetPoseMsg {
            position: [0.1, 0.2, 0.3],
            orientation: [0.0, 0.0, 0.0, 2.0],
        });

        let pose = state.target_pose().expect("available");
        assert!((pose.orientation.norm() - 1.0).abs() < 1e-12);
        assert!((pose.position - Vector3::new(0.1, 0.2, 0.3)).norm() < 1e-12);
    }

    #[test]
    fn zero_quaternion_is_dropped() {
        let state = SharedState::new();
        let handler = TargetPoseHandler::new(state.clone());

        handler.handle(TargetPoseMsg {
            position: [0.1, 0.2, 0.3],
            orientation: [0.0, 0.0, 0.0, 0.0],
        });
        assert!(state.target_pose().is_none());
    }

    #[test]
    fn snapshots_are_never_torn_across_messages() {
        let state = SharedState::new();
        let handler = JointStateHandler::new(state.clone(), 4);
        let writer_state = state.clone();

        let writer = thread::spawn(move || {
            let handler = JointStateHandler::new(writer_state, 4);
            for i in 0..1000 {
                let fill = i as f64;
                handler.handle(JointStateMsg {
                    positions: vec![fill; 4],
                    velocities: vec![fill; 4],
                });
            }
        });

        handler.handle(JointStateMsg {
            positions: vec![-1.0; 4],
            velocities: vec![-1.0; 4],
        });

        for _ in 0..1000 {
            let snapshot = state.joint_state().expect("available");
            // Every observed snapshot is internally consistent: all values
            // stem from the same message.
            let first = snapshot.positions[0];
            assert!(snapshot.positions.iter().all(|&p| p == first));
            assert!(snapshot.velocities.iter().all(|&v| v == first));
        }

        writer.join().expect("writer thread");
    }
}
