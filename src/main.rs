//! Control binary: wires the parsed robot model, the in-process simulated
//! environment and the visual servoing loop together and runs the trajectory
//! to completion.

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rs_visual_servo::config::ControlConfig;
use rs_visual_servo::control_loop::{ControlLoop, RunOutcome};
use rs_visual_servo::sim::{self, SimConfig, SimPorts};
use rs_visual_servo::state::{SharedState, spawn_ingest};
use rs_visual_servo::transport::{ChannelSimClient, ChannelTorqueSink, SystemClock};
use rs_visual_servo::urdf;

#[derive(Parser, Debug)]
#[command(
    name = "visual-servo",
    about = "Visual servoing torque control of a serial manipulator against an in-process simulated plant"
)]
struct Args {
    /// Path to the URDF robot description.
    urdf: Option<PathBuf>,

    /// Optional TOML file overriding the controller configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    // Missing description path is a usage message, not a failure.
    let Some(urdf_path) = args.urdf else {
        println!("Please provide a path to a URDF file.");
        println!("Usage: visual-servo <URDF> [--config <TOML>]");
        return Ok(());
    };

    let config = match &args.config {
        Some(path) => ControlConfig::from_toml_file(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?,
        None => ControlConfig::default(),
    };

    let model = Arc::new(
        urdf::from_urdf_file(&urdf_path)
            .with_context(|| format!("building the robot model from {}", urdf_path.display()))?,
    );
    info!(
        "robot model '{}' parsed: {} actuated joints",
        urdf_path.display(),
        model.dof()
    );

    // Transport between the control thread and the simulated plant.
    let (torque_tx, torque_rx) = flume::bounded(8);
    let (request_tx, request_rx) = flume::bounded(8);
    let (joint_tx, joint_rx) = flume::bounded(8);
    let (target_tx, target_rx) = flume::bounded(8);

    let plant = sim::spawn(
        model.clone(),
        SimConfig::default(),
        config.tool.pose(),
        SimPorts { torque_rx, request_rx, joint_tx, target_tx },
    );

    let state = SharedState::new();
    let ingest = spawn_ingest(state.clone(), model.dof(), joint_rx, target_rx);

    let mut control_loop = ControlLoop::new(
        model,
        state,
        ChannelTorqueSink::new(torque_tx),
        ChannelSimClient::new(request_tx),
        Arc::new(SystemClock::new()),
        config,
    )?;

    match control_loop.run() {
        RunOutcome::Completed(summary) => {
            info!(
                "trajectory completed: {} ticks ({} control, {} safe), final tracking error {:.3e}, {:.2} s",
                summary.ticks,
                summary.control_cycles,
                summary.safe_cycles,
                summary.final_tracking_error,
                summary.elapsed.as_secs_f64()
            );
        }
        RunOutcome::AwaitTimedOut { attempts } => {
            warn!("gave up waiting for the robot state after {} attempts", attempts);
        }
        RunOutcome::Disconnected => {
            warn!("the environment disconnected mid-run");
        }
    }

    drop(control_loop);
    let _ = plant.join();
    for handle in ingest {
        let _ = handle.join();
    }

    Ok(())
}
