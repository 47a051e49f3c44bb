//! Builds the chain model from a URDF robot description (optional).
//!
//! Only what the control loop needs is read: the actuated revolute chain from
//! the root link to the flange, joint origins/axes/limits, and the link
//! inertials that feed the dynamics. Meshes, collision geometry, transmissions
//! and simulator plugins present in the file are ignored.

extern crate sxd_document;

use std::collections::HashMap;
use std::fs::read_to_string;
use std::path::Path;
use sxd_document::{dom, parser, QName};
use nalgebra::{Matrix3, Translation3, Unit, UnitQuaternion, Vector3};
use crate::errors::ModelError;
use crate::kinematic_traits::Pose;
use crate::model::{ChainJoint, JointLimits, LinkInertia, RobotModel};

/// Reads the robot model from a URDF file.
///
/// # Parameters
/// - `path`: the location of the URDF file to load from.
///
/// # Returns
/// - The assembled [`RobotModel`], or a [`ModelError`] describing why the
///   file could not be read (`IoError`), understood (`ParseError` /
///   `MissingField`) or turned into a serial chain
///   (`TreeConstructionError`).
pub fn from_urdf_file<P: AsRef<Path>>(path: P) -> Result<RobotModel, ModelError> {
    let xml_content = read_to_string(path)?;
    from_urdf(&xml_content)
}

/// Parses URDF XML content into the chain model. See [`from_urdf_file`] for
/// the error taxonomy; this entry point exists so embedded descriptions and
/// tests do not need the filesystem.
pub fn from_urdf(xml_content: &str) -> Result<RobotModel, ModelError> {
    let package = parser::parse(xml_content)
        .map_err(|e| ModelError::ParseError(format!("failed to parse XML: {}", e)))?;
    let document = package.as_document();

    let root_element = document.root().children().into_iter()
        .find_map(|e| e.element())
        .ok_or_else(|| ModelError::ParseError("no root element found".to_string()))?;

    let mut links = HashMap::new();
    let mut joints = Vec::new();
    collect_elements(root_element, &mut links, &mut joints)?;

    build_chain(links, joints)
}

#[derive(Debug)]
struct UrdfJoint {
    name: String,
    kind: String,
    parent: String,
    child: String,
    origin: Pose,
    axis: Vector3<f64>,
    limits: Option<JointLimits>,
}

// Recursive walk over the document. URDF keeps links and joints directly
// under <robot>, but xacro-expanded files may nest them, so every element is
// visited.
fn collect_elements(
    element: dom::Element,
    links: &mut HashMap<String, LinkInertia>,
    joints: &mut Vec<UrdfJoint>,
) -> Result<(), ModelError> {
    let joint_tag = QName::new("joint");
    let link_tag = QName::new("link");

    for child in element.children().into_iter().filter_map(|e| e.element()) {
        if child.name() == joint_tag {
            // <joint> elements also appear inside <transmission> blocks where
            // they carry no parent/child links; those are not kinematic.
            if let Some(joint) = parse_joint(child)? {
                joints.push(joint);
            }
        } else if child.name() == link_tag {
            let name = required_attribute(child, "name")?;
            links.insert(name, parse_inertial(child)?);
        }

        collect_elements(child, links, joints)?;
    }

    Ok(())
}

fn parse_joint(element: dom::Element) -> Result<Option<UrdfJoint>, ModelError> {
    let parent = child_element(element, "parent")
        .map(|e| required_attribute(e, "link"))
        .transpose()?;
    let child = child_element(element, "child")
        .map(|e| required_attribute(e, "link"))
        .transpose()?;
    let (Some(parent), Some(child)) = (parent, child) else {
        return Ok(None);
    };

    let name = required_attribute(element, "name")?;
    let kind = element.attribute("type")
        .map(|attr| attr.value().to_string())
        .ok_or_else(|| ModelError::MissingField(format!("type of joint '{}'", name)))?;

    let origin = child_element(element, "origin")
        .map(parse_origin)
        .transpose()?
        .unwrap_or_else(Pose::identity);

    // URDF default axis is +x.
    let axis = child_element(element, "axis")
        .map(|e| parse_vector(e, "xyz"))
        .transpose()?
        .unwrap_or_else(Vector3::x);

    let limits = child_element(element, "limit")
        .map(|e| -> Result<JointLimits, ModelError> {
            Ok(JointLimits {
                lower: optional_number(e, "lower")?.unwrap_or(0.0),
                upper: optional_number(e, "upper")?.unwrap_or(0.0),
            })
        })
        .transpose()?;

    Ok(Some(UrdfJoint { name, kind, parent, child, origin, axis, limits }))
}

fn parse_inertial(link: dom::Element) -> Result<LinkInertia, ModelError> {
    let Some(inertial) = child_element(link, "inertial") else {
        return Ok(LinkInertia::zero());
    };

    let mass = child_element(inertial, "mass")
        .and_then(|e| e.attribute("value"))
        .map(|attr| parse_number(attr.value(), "mass value"))
        .transpose()?
        .ok_or_else(|| ModelError::MissingField(format!(
            "mass of link '{}'",
            link.attribute("name").map(|a| a.value()).unwrap_or("unnamed")
        )))?;

    let (com, rotation) = match child_element(inertial, "origin") {
        Some(origin) => {
            let pose = parse_origin(origin)?;
            (pose.translation.vector, pose.rotation)
        }
        None => (Vector3::zeros(), UnitQuaternion::identity()),
    };

    let inertia = match child_element(inertial, "inertia") {
        Some(tensor) => {
            let ixx = required_number(tensor, "ixx")?;
            let ixy = required_number(tensor, "ixy")?;
            let ixz = required_number(tensor, "ixz")?;
            let iyy = required_number(tensor, "iyy")?;
            let iyz = required_number(tensor, "iyz")?;
            let izz = required_number(tensor, "izz")?;
            let local = Matrix3::new(
                ixx, ixy, ixz,
                ixy, iyy, iyz,
                ixz, iyz, izz,
            );
            // The tensor is given in the inertial frame; rotate it into the
            // link frame.
            let r = rotation.to_rotation_matrix();
            r.matrix() * local * r.matrix().transpose()
        }
        None => Matrix3::zeros(),
    };

    Ok(LinkInertia { mass, com, inertia })
}

fn build_chain(
    links: HashMap<String, LinkInertia>,
    joints: Vec<UrdfJoint>,
) -> Result<RobotModel, ModelError> {
    if joints.is_empty() {
        return Err(ModelError::TreeConstructionError(
            "the description contains no joints".to_string(),
        ));
    }

    // The root link is a parent that never appears as a child.
    let mut roots: Vec<&str> = joints.iter()
        .map(|j| j.parent.as_str())
        .filter(|p| !joints.iter().any(|j| j.child == *p))
        .collect();
    roots.sort_unstable();
    roots.dedup();
    let root = match roots.as_slice() {
        [] => return Err(ModelError::TreeConstructionError(
            "no root link: the joint graph is cyclic".to_string())),
        [single] => single.to_string(),
        multiple => return Err(ModelError::TreeConstructionError(
            format!("multiple root links: {}", multiple.join(", ")))),
    };

    let mut chain = Vec::new();
    let mut pending = Pose::identity();
    let mut current = root;

    loop {
        let outgoing: Vec<&UrdfJoint> = joints.iter()
            .filter(|j| j.parent == current)
            .collect();
        let joint = match outgoing.as_slice() {
            [] => break,
            [single] => *single,
            _ => return Err(ModelError::TreeConstructionError(format!(
                "the kinematic tree branches at link '{}'", current))),
        };

        match joint.kind.as_str() {
            "fixed" => {
                pending *= joint.origin;
            }
            "revolute" | "continuous" => {
                if joint.axis.norm() == 0.0 {
                    return Err(ModelError::ParseError(format!(
                        "joint '{}' has a zero-length axis", joint.name)));
                }
                let limits = match joint.kind.as_str() {
                    "continuous" => JointLimits::full_circle(),
                    _ => joint.limits.clone().ok_or_else(|| ModelError::MissingField(
                        format!("limit of revolute joint '{}'", joint.name)))?,
                };
                chain.push(ChainJoint {
                    name: joint.name.clone(),
                    origin: pending * joint.origin,
                    axis: Unit::new_normalize(joint.axis),
                    limits,
                    inertia: links.get(&joint.child).cloned()
                        .unwrap_or_else(LinkInertia::zero),
                });
                pending = Pose::identity();
            }
            other => {
                return Err(ModelError::TreeConstructionError(format!(
                    "unsupported joint type '{}' of joint '{}'", other, joint.name)));
            }
        }

        current = joint.child.clone();
    }

    RobotModel::from_parts(chain, pending)
}

fn child_element<'d>(element: dom::Element<'d>, name: &str) -> Option<dom::Element<'d>> {
    let tag = QName::new(name);
    element.children().into_iter()
        .find_map(|e| e.element().filter(|el| el.name() == tag))
}

fn required_attribute(element: dom::Element, name: &str) -> Result<String, ModelError> {
    element.attribute(name)
        .map(|attr| attr.value().to_string())
        .ok_or_else(|| ModelError::MissingField(format!(
            "attribute '{}' of <{}>", name, element.name().local_part())))
}

fn parse_origin(element: dom::Element) -> Result<Pose, ModelError> {
    let xyz = match element.attribute("xyz") {
        Some(_) => parse_vector(element, "xyz")?,
        None => Vector3::zeros(),
    };
    let rpy = match element.attribute("rpy") {
        Some(_) => parse_vector(element, "rpy")?,
        None => Vector3::zeros(),
    };
    Ok(Pose::from_parts(
        Translation3::from(xyz),
        UnitQuaternion::from_euler_angles(rpy.x, rpy.y, rpy.z),
    ))
}

fn parse_vector(element: dom::Element, attribute: &str) -> Result<Vector3<f64>, ModelError> {
    let raw = element.attribute(attribute)
        .ok_or_else(|| ModelError::MissingField(format!(
            "attribute '{}' of <{}>", attribute, element.name().local_part())))?;
    let coords: Vec<f64> = raw.value().split_whitespace()
        .map(|token| parse_number(token, attribute))
        .collect::<Result<_, _>>()?;
    if coords.len() != 3 {
        return Err(ModelError::ParseError(format!(
            "attribute '{}' does not contain exactly three values", attribute)));
    }
    Ok(Vector3::new(coords[0], coords[1], coords[2]))
}

fn required_number(element: dom::Element, attribute: &str) -> Result<f64, ModelError> {
    optional_number(element, attribute)?
        .ok_or_else(|| ModelError::MissingField(format!(
            "attribute '{}' of <{}>", attribute, element.name().local_part())))
}

fn optional_number(element: dom::Element, attribute: &str) -> Result<Option<f64>, ModelError> {
    element.attribute(attribute)
        .map(|attr| parse_number(attr.value(), attribute))
        .transpose()
}

fn parse_number(token: &str, context: &str) -> Result<f64, ModelError> {
    token.trim().parse::<f64>()
        .map_err(|_| ModelError::ParseError(format!(
            "'{}' is not a number (in '{}')", token, context)))
}
