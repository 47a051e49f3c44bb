//! Cross-module scenarios on the seven joint fixture: the pieces the control
//! loop chains together each cycle, exercised against each other.

extern crate nalgebra as na;

use na::Vector3;
use crate::controller::{Controller, Gains};
use crate::kinematic_traits::{JointVector, Pose, Twist, twist};
use crate::look_at::look_at_rotation;
use crate::planner::{PathShape, Planner};
use crate::robot::Robot;
use crate::tests::support::seven_dof_arm;

fn home() -> JointVector {
    JointVector::from_vec(vec![0.0, 0.5, -0.5, -0.8, 0.6, -0.4, 0.3])
}

#[test]
fn forward_kinematics_is_repeatable_at_the_home_configuration() {
    let model = seven_dof_arm();
    let mut robot = Robot::new(model);
    let zero = robot.model().zero_joints();

    robot.update(&home(), &zero).expect("update");
    let golden = robot.flange_frame();
    for _ in 0..3 {
        robot.update(&home(), &zero).expect("update");
        assert_eq!(robot.flange_frame(), golden);
    }
    // The fully stretched chain stands at the summed link heights.
    robot.update(&zero, &zero).expect("update");
    let stretched = robot.flange_frame().translation.vector;
    assert!((stretched.z - (0.34 + 0.4 + 0.4 + 0.126 + 0.045)).abs() < 1e-9);
    assert!(stretched.x.abs() < 1e-9 && stretched.y.abs() < 1e-9);
}

#[test]
fn redundant_arm_inverse_kinematics_tracks_a_planned_step() {
    let model = seven_dof_arm();
    let mut robot = Robot::new(model);
    let zero = robot.model().zero_joints();
    robot.update(&home(), &zero).expect("update");

    let start = robot.flange_frame().translation.vector;
    let planner = Planner::new(1.5, 0.15, 0.5, start, start + Vector3::new(0.0, 0.1, 0.0))
        .expect("planner");
    let sample = planner.compute_trajectory(0.75, PathShape::Rectilinear);

    let desired = Pose::from_parts(sample.pos.into(), robot.flange_frame().rotation);
    let desired_vel = twist(sample.vel, Vector3::zeros());
    let desired_acc = twist(sample.acc, Vector3::zeros());

    let point = robot
        .inverse_kinematics(&desired, &desired_vel, &desired_acc, &home())
        .expect("ik");

    let reached = robot.model().flange(&point.q).expect("fk");
    assert!((reached.translation.vector - sample.pos).norm() < 1e-4);

    // The resolved joint velocities must reproduce the desired Cartesian
    // velocity through the Jacobian.
    let jacobian =
        crate::jacobian::Jacobian::new(robot.model(), &point.q, None).expect("jacobian");
    let cartesian = jacobian.spatial_velocity(&point.dq);
    assert!((cartesian - desired_vel).norm() < 1e-6);
}

#[test]
fn look_at_composition_preserves_the_orientation_when_the_target_is_ahead() {
    let model = seven_dof_arm();
    let mut robot = Robot::new(model);
    let tool = crate::config::ToolConfig::default().pose();
    robot.add_tool(tool);
    let zero = robot.model().zero_joints();
    robot.update(&home(), &zero).expect("update");

    // Target straight ahead on the camera axis: the alignment rotation is
    // the identity and the composed desired orientation collapses to the
    // current orientation times the inverse tool rotation.
    let alignment = look_at_rotation(&Vector3::new(0.0, 0.0, 1.0)).expect("rotation");
    let composed = robot.ee_frame().rotation * alignment * tool.rotation.inverse();
    let expected = robot.ee_frame().rotation * tool.rotation.inverse();
    assert!(composed.angle_to(&expected) < 1e-12);
    // Which is exactly the flange orientation.
    assert!(composed.angle_to(&robot.flange_frame().rotation) < 1e-12);
}

#[test]
fn torque_command_on_the_fixture_is_finite_and_dof_sized() {
    let model = seven_dof_arm();
    let mut robot = Robot::new(model.clone());
    let zero = robot.model().zero_joints();
    robot.update(&home(), &zero).expect("update");

    let controller = Controller::new(model);
    let desired = crate::kinematic_traits::JointTrajectoryPoint {
        q: &home() + JointVector::from_element(7, 0.05),
        dq: JointVector::zeros(7),
        ddq: JointVector::zeros(7),
    };
    let (tau, error) = controller
        .id_cntr(&robot, &desired, &Gains::critically_damped(50.0))
        .expect("control");

    assert_eq!(tau.len(), 7);
    assert!(tau.iter().all(|t| t.is_finite()));
    assert!(error > 0.0);

    let (tau_cart, _) = controller
        .id_cntr_cart(
            &robot,
            &robot.ee_frame(),
            &Twist::zeros(),
            &Twist::zeros(),
            &Gains::critically_damped(100.0),
            &Gains::critically_damped(100.0),
        )
        .expect("cartesian control");
    assert_eq!(tau_cart.len(), 7);
    assert!(tau_cart.iter().all(|t| t.is_finite()));
}
