//! In-process simulated environment.
//!
//! Stands in for the external simulator the original deployment talked to:
//! integrates the plant forward from the published torque commands
//! (`M(q) ddq = tau - n(q, dq) - d dq`, semi-implicit Euler), publishes joint
//! sensor snapshots, re-expresses a world-fixed marker in the moving camera
//! frame, and honors the configuration/pause service requests. It runs on
//! its own thread and is only reachable through the transport channels, so
//! the control loop cannot tell it from a remote environment.

extern crate nalgebra as na;

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use na::{Point3, Vector3};
use tracing::{debug, info, warn};
use crate::dynamics::Dynamics;
use crate::kinematic_traits::{JointVector, Pose};
use crate::model::RobotModel;
use crate::transport::{JointStateMsg, SimRequest, TargetPoseMsg, TorqueCommandMsg};

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Integration rate, Hz.
    pub step_rate_hz: f64,
    /// World-frame position of the fiducial marker the camera tracks.
    pub marker_position: Vector3<f64>,
    /// Viscous joint friction, N m s/rad. Keeps the uncontrolled plant from
    /// winding up numerically.
    pub joint_damping: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            step_rate_hz: 500.0,
            marker_position: Vector3::new(0.6, 0.3, 0.8),
            joint_damping: 0.5,
        }
    }
}

/// Channel endpoints the plant serves.
pub struct SimPorts {
    pub torque_rx: flume::Receiver<TorqueCommandMsg>,
    pub request_rx: flume::Receiver<SimRequest>,
    pub joint_tx: flume::Sender<JointStateMsg>,
    pub target_tx: flume::Sender<TargetPoseMsg>,
}

/// Spawns the plant thread. `tool` is the flange-to-camera transform used to
/// report the marker in the camera frame. The thread ends on a pause request
/// or when the control side drops its channels.
pub fn spawn(
    model: Arc<RobotModel>,
    config: SimConfig,
    tool: Pose,
    ports: SimPorts,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("simulated-environment".to_string())
        .spawn(move || Plant::new(model, config, tool, ports).run())
        .expect("spawn simulated environment")
}

struct Plant {
    model: Arc<RobotModel>,
    dynamics: Dynamics,
    config: SimConfig,
    tool: Pose,
    ports: SimPorts,
    q: JointVector,
    dq: JointVector,
    tau: JointVector,
}

impl Plant {
    fn new(model: Arc<RobotModel>, config: SimConfig, tool: Pose, ports: SimPorts) -> Self {
        let dynamics = Dynamics::new(model.clone());
        let q = model.zero_joints();
        let dq = model.zero_joints();
        let tau = model.zero_joints();
        Plant { model, dynamics, config, tool, ports, q, dq, tau }
    }

    fn run(mut self) {
        let dt = 1.0 / self.config.step_rate_hz;
        info!("simulated environment running at {} Hz", self.config.step_rate_hz);

        loop {
            if self.serve_requests() {
                info!("simulation paused");
                break;
            }
            self.receive_torques();
            self.step(dt);
            self.publish();

            if self.ports.torque_rx.is_disconnected() && self.ports.request_rx.is_disconnected() {
                debug!("control side disconnected, stopping the plant");
                break;
            }
            thread::sleep(Duration::from_secs_f64(dt));
        }
    }

    /// Drains pending service requests; returns true on a pause request.
    fn serve_requests(&mut self) -> bool {
        let requests: Vec<SimRequest> = self.ports.request_rx.try_iter().collect();
        for request in requests {
            match request {
                SimRequest::SetConfiguration { joint_names, positions } => {
                    self.apply_configuration(&joint_names, &positions);
                }
                SimRequest::Pause => return true,
            }
        }
        false
    }

    fn apply_configuration(&mut self, joint_names: &[String], positions: &[f64]) {
        if joint_names.len() != positions.len() {
            warn!(
                "configuration request with {} names but {} positions ignored",
                joint_names.len(),
                positions.len()
            );
            return;
        }
        let model_names = self.model.joint_names();
        for (name, &position) in joint_names.iter().zip(positions.iter()) {
            match model_names.iter().position(|n| n == name) {
                Some(index) => self.q[index] = self.model.joints()[index].limits.clamp(position),
                None => warn!("configuration request names unknown joint '{}'", name),
            }
        }
        // A teleport, not a motion: velocities and held torques reset.
        self.dq.fill(0.0);
        self.tau.fill(0.0);
        debug!("robot configuration set");
    }

    /// Keeps only the newest torque command; the loop publishes faster than
    /// it matters here and coalescing is the expected behavior.
    fn receive_torques(&mut self) {
        for msg in self.ports.torque_rx.try_iter() {
            if msg.torques.len() == self.model.dof() {
                self.tau = JointVector::from_vec(msg.torques);
            } else {
                warn!(
                    "torque command with {} values ignored (expected {})",
                    msg.torques.len(),
                    self.model.dof()
                );
            }
        }
    }

    fn step(&mut self, dt: f64) {
        let applied = &self.tau - &self.dq * self.config.joint_damping;
        match self.dynamics.forward_dynamics(&self.q, &self.dq, &applied) {
            Ok(ddq) => {
                self.dq += ddq * dt;
                self.q += &self.dq * dt;
                for (i, joint) in self.model.joints().iter().enumerate() {
                    let clamped = joint.limits.clamp(self.q[i]);
                    if clamped != self.q[i] {
                        self.q[i] = clamped;
                        self.dq[i] = 0.0;
                    }
                }
            }
            Err(e) => warn!("plant integration failed: {}", e),
        }
    }

    fn publish(&self) {
        let joint_msg = JointStateMsg {
            positions: self.q.iter().copied().collect(),
            velocities: self.dq.iter().copied().collect(),
        };
        let _ = self.ports.joint_tx.try_send(joint_msg);

        // The marker is fixed in the world with identity orientation; the
        // camera sees it relative to its own moving frame.
        if let Ok(flange) = self.model.flange(&self.q) {
            let camera = flange * self.tool;
            let in_camera = camera.inverse_transform_point(&Point3::from(self.config.marker_position));
            let orientation = camera.rotation.inverse();
            let msg = TargetPoseMsg {
                position: [in_camera.x, in_camera.y, in_camera.z],
                orientation: [orientation.i, orientation.j, orientation.k, orientation.w],
            };
            let _ = self.ports.target_tx.try_send(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::seven_dof_arm;
    use crate::transport::{ChannelSimClient, SimEnvironment};

    fn spawn_plant() -> (
        flume::Sender<TorqueCommandMsg>,
        ChannelSimClient,
        flume::Receiver<JointStateMsg>,
        flume::Receiver<TargetPoseMsg>,
        thread::JoinHandle<()>,
    ) {
        let model = seven_dof_arm();
        let (torque_tx, torque_rx) = flume::bounded(8);
        let (request_tx, request_rx) = flume::bounded(8);
        let (joint_tx, joint_rx) = flume::bounded(8);
        let (target_tx, target_rx) = flume::bounded(8);

        let handle = spawn(
            model,
            SimConfig { step_rate_hz: 1000.0, ..SimConfig::default() },
            Pose::identity(),
            SimPorts { torque_rx, request_rx, joint_tx, target_tx },
        );

        (torque_tx, ChannelSimClient::new(request_tx), joint_rx, target_rx, handle)
    }

    #[test]
    fn plant_publishes_joint_states_and_marker_poses() {
        let (_torque_tx, mut client, joint_rx, target_rx, handle) = spawn_plant();

        let joints = joint_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("joint state");
        assert_eq!(joints.positions.len(), 7);
        assert_eq!(joints.velocities.len(), 7);

        let target = target_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("target pose");
        assert!(target.position.iter().all(|v| v.is_finite()));

        client.pause().expect("pause");
        handle.join().expect("plant thread");
    }

    #[test]
    fn set_configuration_teleports_the_joints() {
        let (_torque_tx, mut client, joint_rx, _target_rx, handle) = spawn_plant();

        let names = seven_dof_arm().joint_names();
        let positions =
            JointVector::from_vec(vec![0.0, 0.5, -0.5, -0.8, 0.6, -0.4, 0.3]);
        client.set_configuration(&names, &positions).expect("service");

        // The request is served asynchronously; wait for a snapshot that
        // reflects it.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut matched = false;
        while std::time::Instant::now() < deadline {
            let msg = joint_rx
                .recv_timeout(Duration::from_secs(2))
                .expect("joint state");
            if (msg.positions[1] - 0.5).abs() < 0.05 {
                matched = true;
                break;
            }
        }
        assert!(matched, "the configured positions never showed up");

        client.pause().expect("pause");
        handle.join().expect("plant thread");
    }
}
