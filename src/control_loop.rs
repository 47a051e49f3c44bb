//! Fixed-rate visual servoing control loop.
//!
//! The loop moves through three states. In `AwaitingRobotState` it pushes the
//! initial joint configuration to the environment and polls for the first
//! sensor snapshot at the loop rate. In `Running` it fuses, once per tick,
//! the planned Cartesian trajectory with the look-at orientation derived
//! from the latest perceived target, solves the inverse kinematics and
//! publishes inverse-dynamics torques. When the trajectory time is spent it
//! enters `Terminated`, asks the environment to pause once, and returns.
//!
//! Whenever sensor data is missing or a per-cycle computation fails, the
//! tick publishes exactly zero torque for every joint and carries on; the
//! loop itself never dies from a cycle-level condition.

extern crate nalgebra as na;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::config::ControlConfig;
use crate::controller::{ControlMode, Controller};
use crate::errors::ModelError;
use crate::kinematic_traits::{JointVector, Pose, Twist, twist};
use crate::look_at::look_at_rotation;
use crate::model::RobotModel;
use crate::planner::{Planner, TrajectoryPoint};
use crate::robot::Robot;
use crate::state::SharedState;
use crate::transport::{Clock, Rate, SimEnvironment, TorqueSink};

/// Diagnostic value published when the cycle falls back to zero torque
/// because a computation failed (as opposed to data being merely absent).
const FAULT_FLAG: f64 = f64::INFINITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingRobotState,
    Running,
    Terminated,
}

/// Where the loop stands relative to the planned motion at elapsed time `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TrajectoryPhase {
    /// Inside the settle window: hold the plan's starting point.
    Hold,
    /// Following the plan, evaluated at `plan_time`.
    Track { plan_time: f64 },
    /// Past the settle window plus the plan duration.
    Finished,
}

fn trajectory_phase(t: f64, settle_window: f64, duration: f64) -> TrajectoryPhase {
    if t <= settle_window {
        TrajectoryPhase::Hold
    } else if t <= settle_window + duration {
        TrajectoryPhase::Track { plan_time: t - settle_window }
    } else {
        TrajectoryPhase::Finished
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Total ticks spent in the `Running` state.
    pub ticks: u64,
    /// Ticks that computed and published a control command.
    pub control_cycles: u64,
    /// Ticks that fell back to the zero-torque safe command.
    pub safe_cycles: u64,
    /// Tracking error of the last computed command.
    pub final_tracking_error: f64,
    /// Virtual time spent in the `Running` state.
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// The trajectory ran to completion and the environment was asked to
    /// pause.
    Completed(RunSummary),
    /// The first joint state never arrived within the configured retry
    /// budget.
    AwaitTimedOut { attempts: usize },
    /// The command channel went away mid-run.
    Disconnected,
}

enum TickResult {
    Continue,
    Finished,
    Disconnected,
}

pub struct ControlLoop<S: TorqueSink, E: SimEnvironment> {
    robot: Robot,
    controller: Controller,
    state: Arc<SharedState>,
    sink: S,
    environment: E,
    clock: Arc<dyn Clock>,
    config: ControlConfig,
    loop_state: LoopState,
    ticks: u64,
    control_cycles: u64,
    safe_cycles: u64,
    last_tracking_error: f64,
}

impl<S: TorqueSink, E: SimEnvironment> ControlLoop<S, E> {
    pub fn new(
        model: Arc<RobotModel>,
        state: Arc<SharedState>,
        sink: S,
        environment: E,
        clock: Arc<dyn Clock>,
        config: ControlConfig,
    ) -> Result<Self, ModelError> {
        config.validate(model.dof())?;
        // Probe the trajectory parameters now so a bad blend duration is a
        // startup error, not a surprise after the settle window.
        Planner::new(
            config.trajectory.duration,
            config.trajectory.radius,
            config.trajectory.acc_duration,
            na::Vector3::zeros(),
            na::Vector3::zeros(),
        )?;

        let mut robot = Robot::new(model.clone());
        robot.add_tool(config.tool.pose());
        let controller = Controller::new(model);

        Ok(ControlLoop {
            robot,
            controller,
            state,
            sink,
            environment,
            clock,
            config,
            loop_state: LoopState::AwaitingRobotState,
            ticks: 0,
            control_cycles: 0,
            safe_cycles: 0,
            last_tracking_error: 0.0,
        })
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    /// Runs the loop to completion. Blocks the calling thread; time and
    /// pacing come entirely from the injected clock.
    pub fn run(&mut self) -> RunOutcome {
        let mut rate = Rate::new(self.config.rate_hz, self.clock.clone());

        let first = {
            let names = self.robot.model().joint_names();
            let initial = JointVector::from_vec(self.config.initial_joint_positions.clone());
            let mut attempts = 0usize;
            let mut announced = false;
            loop {
                if self.environment.set_configuration(&names, &initial).is_err() {
                    warn!("failed to set the initial robot configuration");
                }
                if let Some(snapshot) = self.state.joint_state() {
                    break snapshot;
                }
                if !announced {
                    info!("robot state not available yet, waiting for the environment");
                    announced = true;
                }
                attempts += 1;
                if let Some(limit) = self.config.init_retry_limit {
                    if attempts >= limit {
                        return RunOutcome::AwaitTimedOut { attempts };
                    }
                }
                rate.tick();
            }
        };

        self.loop_state = LoopState::Running;
        if let Err(e) = self.robot.update(&first.positions, &first.velocities) {
            // The ingest handler validates joint counts, so this indicates a
            // model/config mismatch that polling will not fix.
            warn!("initial joint state rejected: {}", e);
            return RunOutcome::AwaitTimedOut { attempts: 0 };
        }

        let start = self.robot.ee_frame().translation.vector;
        let end = start + self.config.trajectory.end_offset_vector();
        let planner = Planner::new(
            self.config.trajectory.duration,
            self.config.trajectory.radius,
            self.config.trajectory.acc_duration,
            start,
            end,
        )
        .expect("trajectory parameters were validated at construction");

        info!("starting control loop");
        let started_at = self.clock.now();

        loop {
            let t = (self.clock.now() - started_at).as_secs_f64();
            match self.tick(t, &planner) {
                TickResult::Continue => {}
                TickResult::Finished => break,
                TickResult::Disconnected => {
                    warn!("command channel disconnected, stopping the loop");
                    self.loop_state = LoopState::Terminated;
                    let _ = self.environment.pause();
                    return RunOutcome::Disconnected;
                }
            }
            rate.tick();
        }

        self.loop_state = LoopState::Terminated;
        match self.environment.pause() {
            Ok(()) => info!("simulation paused"),
            Err(_) => warn!("failed to pause the simulation"),
        }

        RunOutcome::Completed(RunSummary {
            ticks: self.ticks,
            control_cycles: self.control_cycles,
            safe_cycles: self.safe_cycles,
            final_tracking_error: self.last_tracking_error,
            elapsed: self.clock.now() - started_at,
        })
    }

    /// One control cycle at elapsed time `t`.
    fn tick(&mut self, t: f64, planner: &Planner) -> TickResult {
        let (Some(joints), Some(target)) = (self.state.joint_state(), self.state.target_pose())
        else {
            return self.publish_safe(0.0);
        };

        let phase = trajectory_phase(t, self.config.settle_window, planner.duration());
        if phase == TrajectoryPhase::Finished {
            info!("trajectory terminated after {:.2} s", t);
            return TickResult::Finished;
        }

        if let Err(e) = self.robot.update(&joints.positions, &joints.velocities) {
            warn!("joint state rejected: {}", e);
            return self.publish_safe(FAULT_FLAG);
        }

        let shape = self.config.trajectory.shape;
        let (point, desired_vel, desired_acc): (TrajectoryPoint, Twist, Twist) = match phase {
            TrajectoryPhase::Hold => {
                (planner.compute_trajectory(0.0, shape), Twist::zeros(), Twist::zeros())
            }
            TrajectoryPhase::Track { plan_time } => {
                let p = planner.compute_trajectory(plan_time, shape);
                (
                    p,
                    twist(p.vel, na::Vector3::zeros()),
                    twist(p.acc, na::Vector3::zeros()),
                )
            }
            TrajectoryPhase::Finished => unreachable!("handled above"),
        };

        // Orientation: rotate the camera axis onto the perceived target
        // direction.
        let alignment = match look_at_rotation(&target.position) {
            Ok(rotation) => rotation,
            Err(e) => {
                warn!("look-at geometry failed: {}", e);
                return self.publish_safe(FAULT_FLAG);
            }
        };
        let tool_rotation = self
            .robot
            .tool()
            .map(|tool| tool.rotation)
            .unwrap_or_else(na::UnitQuaternion::identity);

        let command = match self.config.mode {
            ControlMode::JointSpace => {
                // The inverse kinematics works on the flange, so the desired
                // camera orientation is taken back through the tool offset.
                let desired_rotation =
                    self.robot.ee_frame().rotation * alignment * tool_rotation.inverse();
                let desired_pose = Pose::from_parts(point.pos.into(), desired_rotation);
                let seed = joints.positions.clone();
                match self
                    .robot
                    .inverse_kinematics(&desired_pose, &desired_vel, &desired_acc, &seed)
                {
                    Ok(trajectory_point) => self.controller.id_cntr(
                        &self.robot,
                        &trajectory_point,
                        &self.config.gains.joint_space(),
                    ),
                    Err(e) => {
                        warn!("inverse kinematics failed: {}", e);
                        return self.publish_safe(FAULT_FLAG);
                    }
                }
            }
            ControlMode::CartesianSpace => {
                // The Cartesian law closes the loop on the tool frame
                // directly; no tool correction is needed.
                let desired_rotation = self.robot.ee_frame().rotation * alignment;
                let desired_pose = Pose::from_parts(point.pos.into(), desired_rotation);
                self.controller.id_cntr_cart(
                    &self.robot,
                    &desired_pose,
                    &desired_vel,
                    &desired_acc,
                    &self.config.gains.cartesian_position(),
                    &self.config.gains.cartesian_orientation(),
                )
            }
        };

        match command {
            Ok((tau, tracking_error)) => {
                self.ticks += 1;
                self.control_cycles += 1;
                self.last_tracking_error = tracking_error;
                debug!(time = t, tracking_error, "control cycle");
                match self.sink.publish(&tau, tracking_error) {
                    Ok(()) => TickResult::Continue,
                    Err(_) => TickResult::Disconnected,
                }
            }
            Err(e) => {
                warn!("torque computation failed: {}", e);
                self.publish_safe(FAULT_FLAG)
            }
        }
    }

    /// Publishes the all-zero safe command. `diagnostic` is `0.0` when data
    /// is simply not available yet and [`FAULT_FLAG`] when a computation
    /// failed.
    fn publish_safe(&mut self, diagnostic: f64) -> TickResult {
        self.ticks += 1;
        self.safe_cycles += 1;
        let zeros = self.robot.model().zero_joints();
        match self.sink.publish(&zeros, diagnostic) {
            Ok(()) => TickResult::Continue,
            Err(_) => TickResult::Disconnected,
        }
    }
}
