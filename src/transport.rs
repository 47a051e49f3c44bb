//! Boundary seams between the control loop and its environment.
//!
//! The loop never talks to a concrete middleware: it publishes through
//! [`TorqueSink`], calls best-effort services through [`SimEnvironment`] and
//! keeps time through [`Clock`]. Production wiring backs these with `flume`
//! channels into the in-process simulated plant; the loop tests back them
//! with recording mocks and a manually advanced clock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;
use crate::kinematic_traits::JointVector;

/// Joint sensor snapshot as it arrives from the environment: parallel
/// position/velocity arrays in model joint order.
#[derive(Debug, Clone)]
pub struct JointStateMsg {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
}

/// Perceived target pose in the camera frame: position plus orientation
/// quaternion in `[x, y, z, w]` order.
#[derive(Debug, Clone)]
pub struct TargetPoseMsg {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

/// Torque command published once per control cycle, together with the scalar
/// tracking-error diagnostic.
#[derive(Debug, Clone)]
pub struct TorqueCommandMsg {
    pub torques: Vec<f64>,
    pub tracking_error: f64,
}

/// The peer of a channel went away; for the control loop this means the
/// environment is gone and the run cannot continue.
#[derive(Debug)]
pub struct Disconnected;

impl std::fmt::Display for Disconnected {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "the environment endpoint disconnected")
    }
}

impl std::error::Error for Disconnected {}

/// Outbound per-cycle command channel.
pub trait TorqueSink {
    fn publish(&mut self, torques: &JointVector, tracking_error: f64) -> Result<(), Disconnected>;
}

/// Best-effort services of the simulated environment. Failures are reported
/// to the caller but are not correctness-critical to the control law.
pub trait SimEnvironment {
    fn set_configuration(
        &mut self,
        joint_names: &[String],
        positions: &JointVector,
    ) -> Result<(), Disconnected>;

    fn pause(&mut self) -> Result<(), Disconnected>;
}

/// Monotonic time source. Injected so the loop scenarios can run on a
/// manually advanced clock instead of wall time.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed epoch.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation of [`Clock`].
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { started: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Test clock: `sleep` advances the reported time instead of blocking, so a
/// fixed-rate loop progresses through virtual time deterministically.
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock { now: Mutex::new(Duration::ZERO) }
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().expect("clock lock") += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().expect("clock lock")
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Fixed-rate ticker: `tick` sleeps away whatever remains of the current
/// period. When a cycle overruns, the schedule restarts from the current
/// time instead of trying to catch up with a burst of late ticks.
pub struct Rate {
    period: Duration,
    deadline: Duration,
    clock: Arc<dyn Clock>,
}

impl Rate {
    pub fn new(frequency_hz: f64, clock: Arc<dyn Clock>) -> Self {
        let period = Duration::from_secs_f64(1.0 / frequency_hz);
        let deadline = clock.now() + period;
        Rate { period, deadline, clock }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn tick(&mut self) {
        let now = self.clock.now();
        if now < self.deadline {
            self.clock.sleep(self.deadline - now);
            self.deadline += self.period;
        } else {
            trace!("cycle overran its period by {:?}", now - self.deadline);
            self.deadline = now + self.period;
        }
    }
}

/// [`TorqueSink`] over a bounded flume channel. A full channel means the
/// consumer is lagging; the command is dropped (the next cycle supersedes it
/// anyway), only disconnection is an error.
pub struct ChannelTorqueSink {
    sender: flume::Sender<TorqueCommandMsg>,
}

impl ChannelTorqueSink {
    pub fn new(sender: flume::Sender<TorqueCommandMsg>) -> Self {
        ChannelTorqueSink { sender }
    }
}

impl TorqueSink for ChannelTorqueSink {
    fn publish(&mut self, torques: &JointVector, tracking_error: f64) -> Result<(), Disconnected> {
        let msg = TorqueCommandMsg {
            torques: torques.iter().copied().collect(),
            tracking_error,
        };
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => {
                trace!("torque channel full, command coalesced");
                Ok(())
            }
            Err(flume::TrySendError::Disconnected(_)) => Err(Disconnected),
        }
    }
}

/// Service request understood by the simulated environment.
#[derive(Debug, Clone)]
pub enum SimRequest {
    SetConfiguration {
        joint_names: Vec<String>,
        positions: Vec<f64>,
    },
    Pause,
}

/// [`SimEnvironment`] over a flume request channel.
pub struct ChannelSimClient {
    sender: flume::Sender<SimRequest>,
}

impl ChannelSimClient {
    pub fn new(sender: flume::Sender<SimRequest>) -> Self {
        ChannelSimClient { sender }
    }
}

impl SimEnvironment for ChannelSimClient {
    fn set_configuration(
        &mut self,
        joint_names: &[String],
        positions: &JointVector,
    ) -> Result<(), Disconnected> {
        self.sender
            .send(SimRequest::SetConfiguration {
                joint_names: joint_names.to_vec(),
                positions: positions.iter().copied().collect(),
            })
            .map_err(|_| Disconnected)
    }

    fn pause(&mut self) -> Result<(), Disconnected> {
        self.sender.send(SimRequest::Pause).map_err(|_| Disconnected)
    }
}
