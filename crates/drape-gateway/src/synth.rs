//! Placeholder geometry for analysis-only providers
//!
//! Vision-model providers return measurements, not geometry. These helpers
//! build a deterministic lathe surface from those parameters so callers get a
//! well-formed mesh of roughly the right size. The result is a stand-in, not a
//! reconstruction; models built from it carry
//! [`GeometrySource::Synthesized`](drape_core::GeometrySource::Synthesized).

use crate::analysis::{GarmentDimensions, Keypoint};
use drape_core::{BodyMeasurements, Bone, ClothingCategory, Joint, Mesh, Skeleton};
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};

const SEGMENTS: usize = 24;
/// Depth-to-width ratio of a torso cross-section
const TORSO_DEPTH: f32 = 0.7;

/// One elliptical cross-section of a lathe surface (metres)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ring {
    pub y: f32,
    pub rx: f32,
    pub rz: f32,
}

impl Ring {
    fn new(y: f32, rx: f32, rz: f32) -> Self {
        Self {
            y,
            rx: rx.max(0.001),
            rz: rz.max(0.001),
        }
    }
}

/// Sweep `profile` (bottom to top) around the Y axis and close both ends.
pub fn lathe(profile: &[Ring], segments: usize) -> Mesh {
    let mut mesh = Mesh::default();
    if profile.len() < 2 || segments < 3 {
        return mesh;
    }
    let segments = segments as u32;
    let ring_count = profile.len() as u32;
    let (y_min, y_max) = (profile[0].y, profile[profile.len() - 1].y);
    let span = (y_max - y_min).max(f32::EPSILON);

    for ring in profile {
        let v = (ring.y - y_min) / span;
        for j in 0..segments {
            let theta = TAU * j as f32 / segments as f32;
            let (s, c) = theta.sin_cos();
            mesh.vertices.extend_from_slice(&[ring.rx * c, ring.y, ring.rz * s]);

            let n = [c / ring.rx, 0.0, s / ring.rz];
            let len = (n[0] * n[0] + n[2] * n[2]).sqrt();
            mesh.normals.extend_from_slice(&[n[0] / len, 0.0, n[2] / len]);
            mesh.uv_coordinates
                .extend_from_slice(&[j as f32 / segments as f32, v]);
        }
    }

    for r in 0..ring_count - 1 {
        let lower = r * segments;
        let upper = (r + 1) * segments;
        for j in 0..segments {
            let next = (j + 1) % segments;
            mesh.faces
                .extend_from_slice(&[lower + j, upper + j, lower + next]);
            mesh.faces
                .extend_from_slice(&[lower + next, upper + j, upper + next]);
        }
    }

    let bottom = ring_count * segments;
    mesh.vertices.extend_from_slice(&[0.0, y_min, 0.0]);
    mesh.normals.extend_from_slice(&[0.0, -1.0, 0.0]);
    mesh.uv_coordinates.extend_from_slice(&[0.5, 0.0]);
    let top = bottom + 1;
    mesh.vertices.extend_from_slice(&[0.0, y_max, 0.0]);
    mesh.normals.extend_from_slice(&[0.0, 1.0, 0.0]);
    mesh.uv_coordinates.extend_from_slice(&[0.5, 1.0]);

    let last = (ring_count - 1) * segments;
    for j in 0..segments {
        let next = (j + 1) % segments;
        mesh.faces.extend_from_slice(&[bottom, j, next]);
        mesh.faces
            .extend_from_slice(&[top, last + next, last + j]);
    }

    mesh
}

/// Semi-axis `a` of an ellipse with `b = ratio * a` and the given perimeter
/// (Ramanujan's first approximation, solved for `a`).
fn semi_axis_for_perimeter(perimeter: f32, ratio: f32) -> f32 {
    let k = PI * (3.0 * (1.0 + ratio) - ((3.0 + ratio) * (1.0 + 3.0 * ratio)).sqrt());
    perimeter / k
}

/// Standing figure sized from measurements (centimetres in, metres out)
pub fn body_mesh(m: &BodyMeasurements) -> Mesh {
    let h = m.height / 100.0;
    let hips = semi_axis_for_perimeter(m.hips / 100.0, TORSO_DEPTH);
    let waist = semi_axis_for_perimeter(m.waist / 100.0, TORSO_DEPTH);
    let chest = semi_axis_for_perimeter(m.chest / 100.0, TORSO_DEPTH);
    let shoulder = m.shoulder_width / 200.0;
    let head = 0.09 * h / 1.75;

    let profile = [
        Ring::new(0.0, hips * 0.3, hips * 0.4),
        Ring::new(0.25 * h, hips * 0.45, hips * 0.45),
        Ring::new(0.5 * h, hips, hips * TORSO_DEPTH),
        Ring::new(0.6 * h, waist, waist * TORSO_DEPTH),
        Ring::new(0.72 * h, chest, chest * TORSO_DEPTH),
        Ring::new(0.82 * h, shoulder, chest * TORSO_DEPTH * 0.8),
        Ring::new(0.86 * h, head * 0.55, head * 0.55),
        Ring::new(0.93 * h, head, head * 1.1),
        Ring::new(h, head * 0.2, head * 0.2),
    ];
    lathe(&profile, SEGMENTS)
}

/// Typical garment size when the analysis gave none (centimetres)
pub fn default_dimensions(category: ClothingCategory) -> GarmentDimensions {
    let (width, length) = match category {
        ClothingCategory::Top => (50.0, 65.0),
        ClothingCategory::Bottom => (40.0, 100.0),
        ClothingCategory::Dress => (45.0, 110.0),
        ClothingCategory::Outerwear => (58.0, 75.0),
        ClothingCategory::Shoes => (10.0, 27.0),
        ClothingCategory::Accessory => (20.0, 20.0),
    };
    GarmentDimensions { width, length }
}

/// Category silhouette as `(height fraction, width scale)` pairs
fn silhouette(category: ClothingCategory) -> &'static [(f32, f32)] {
    match category {
        ClothingCategory::Top => &[(0.0, 0.95), (0.5, 1.0), (0.9, 1.0), (1.0, 0.45)],
        ClothingCategory::Outerwear => &[(0.0, 1.0), (0.5, 1.0), (0.88, 1.05), (1.0, 0.5)],
        ClothingCategory::Bottom => &[(0.0, 0.45), (0.55, 0.6), (0.85, 0.95), (1.0, 0.85)],
        ClothingCategory::Dress => {
            &[(0.0, 1.35), (0.5, 0.9), (0.75, 0.75), (0.95, 0.95), (1.0, 0.5)]
        }
        ClothingCategory::Shoes => &[(0.0, 1.0), (0.6, 0.95), (1.0, 0.6)],
        ClothingCategory::Accessory => {
            &[(0.0, 0.2), (0.2, 0.85), (0.5, 1.0), (0.8, 0.85), (1.0, 0.2)]
        }
    }
}

pub fn clothing_mesh(category: ClothingCategory, dims: &GarmentDimensions) -> Mesh {
    let width = dims.width / 100.0;
    let length = dims.length / 100.0;
    // shoes lie along Z; everything else hangs along Y
    let (height, rx, rz) = match category {
        ClothingCategory::Shoes => (length * 0.4, width / 2.0, length / 2.0),
        _ => (length, width / 2.0, width / 2.0 * TORSO_DEPTH),
    };
    let profile: Vec<Ring> = silhouette(category)
        .iter()
        .map(|&(t, s)| Ring::new(t * height, rx * s, rz * s))
        .collect();
    lathe(&profile, SEGMENTS)
}

/// Joint names in hierarchy order. Derived joints (pelvis, neck, spine) are
/// filled in from their neighbours when the analysis omits them.
const JOINT_NAMES: [&str; 16] = [
    "pelvis",
    "spine",
    "neck",
    "head",
    "left_shoulder",
    "left_elbow",
    "left_wrist",
    "right_shoulder",
    "right_elbow",
    "right_wrist",
    "left_hip",
    "left_knee",
    "left_ankle",
    "right_hip",
    "right_knee",
    "right_ankle",
];

/// `(bone, parent bone, head joint, tail joint)`; parents precede children
const BONES: [(&str, Option<usize>, &str, &str); 10] = [
    ("spine", None, "pelvis", "neck"),
    ("head", Some(0), "neck", "head"),
    ("upper_arm.L", Some(0), "left_shoulder", "left_elbow"),
    ("forearm.L", Some(2), "left_elbow", "left_wrist"),
    ("upper_arm.R", Some(0), "right_shoulder", "right_elbow"),
    ("forearm.R", Some(4), "right_elbow", "right_wrist"),
    ("thigh.L", Some(0), "left_hip", "left_knee"),
    ("shin.L", Some(6), "left_knee", "left_ankle"),
    ("thigh.R", Some(0), "right_hip", "right_knee"),
    ("shin.R", Some(8), "right_knee", "right_ankle"),
];

fn canonical_joint_name(name: &str) -> String {
    let name = name.trim().to_lowercase().replace([' ', '-'], "_");
    if let Some(rest) = name.strip_prefix("l_") {
        format!("left_{}", rest)
    } else if let Some(rest) = name.strip_prefix("r_") {
        format!("right_{}", rest)
    } else {
        name
    }
}

fn midpoint(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0, (a[2] + b[2]) / 2.0]
}

/// Build a skeleton from normalized image keypoints, scaled to `height_m`.
///
/// Bones whose joints are missing are skipped along with their children.
/// Returns `None` when not even the spine can be placed.
pub fn skeleton_from_keypoints(keypoints: &[Keypoint], height_m: f32) -> Option<Skeleton> {
    let mut positions: HashMap<String, [f32; 3]> = keypoints
        .iter()
        .map(|kp| {
            let pos = [
                (kp.x - 0.5) * height_m,
                (1.0 - kp.y) * height_m,
                kp.z * height_m,
            ];
            (canonical_joint_name(&kp.name), pos)
        })
        .collect();

    if !positions.contains_key("pelvis") {
        if let (Some(&l), Some(&r)) = (positions.get("left_hip"), positions.get("right_hip")) {
            positions.insert("pelvis".to_string(), midpoint(l, r));
        }
    }
    if !positions.contains_key("neck") {
        if let (Some(&l), Some(&r)) = (
            positions.get("left_shoulder"),
            positions.get("right_shoulder"),
        ) {
            positions.insert("neck".to_string(), midpoint(l, r));
        }
    }
    if !positions.contains_key("spine") {
        if let (Some(&p), Some(&n)) = (positions.get("pelvis"), positions.get("neck")) {
            positions.insert("spine".to_string(), midpoint(p, n));
        }
    }

    let mut joints = Vec::new();
    let mut joint_index = HashMap::new();
    for name in JOINT_NAMES {
        if let Some(&position) = positions.get(name) {
            joint_index.insert(name, joints.len());
            joints.push(Joint {
                name: name.to_string(),
                position,
            });
        }
    }

    let mut bones = Vec::new();
    let mut placed: [Option<usize>; BONES.len()] = [None; BONES.len()];
    for (i, (name, parent, head, tail)) in BONES.iter().enumerate() {
        let (Some(&head), Some(&tail)) = (joint_index.get(head), joint_index.get(tail)) else {
            continue;
        };
        let parent = match parent {
            Some(p) => match placed[*p] {
                Some(out) => Some(out),
                None => continue,
            },
            None => None,
        };
        placed[i] = Some(bones.len());
        bones.push(Bone {
            name: name.to_string(),
            parent,
            head,
            tail,
        });
    }

    if bones.is_empty() {
        None
    } else {
        Some(Skeleton { bones, joints })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurements() -> BodyMeasurements {
        BodyMeasurements {
            height: 175.0,
            chest: 96.0,
            waist: 82.0,
            hips: 98.0,
            shoulder_width: 45.0,
        }
    }

    fn kp(name: &str, x: f32, y: f32) -> Keypoint {
        Keypoint {
            name: name.to_string(),
            x,
            y,
            z: 0.0,
        }
    }

    #[test]
    fn test_lathe_topology() {
        let profile = [Ring::new(0.0, 1.0, 1.0), Ring::new(1.0, 1.0, 1.0)];
        let mesh = lathe(&profile, 8);
        assert_eq!(mesh.vertex_count(), 2 * 8 + 2);
        // one band of quads plus two cap fans
        assert_eq!(mesh.face_count(), 8 * 2 + 8 * 2);
        mesh.validate().unwrap();
    }

    #[test]
    fn test_degenerate_profile_is_empty() {
        assert!(lathe(&[Ring::new(0.0, 1.0, 1.0)], 8).is_empty());
    }

    #[test]
    fn test_body_mesh_is_valid_and_sized() {
        let mesh = body_mesh(&measurements());
        mesh.validate().unwrap();
        let size = mesh.bounds().unwrap().size();
        assert!((size[1] - 1.75).abs() < 1e-4);
        assert!(size[0] < 0.6);
    }

    #[test]
    fn test_body_mesh_is_deterministic() {
        assert_eq!(body_mesh(&measurements()), body_mesh(&measurements()));
    }

    #[test]
    fn test_ellipse_inverse() {
        // circle: perimeter 2*pi*r
        let r = semi_axis_for_perimeter(TAU * 0.15, 1.0);
        assert!((r - 0.15).abs() < 1e-5);
    }

    #[test]
    fn test_every_category_produces_valid_mesh() {
        for category in [
            ClothingCategory::Top,
            ClothingCategory::Bottom,
            ClothingCategory::Dress,
            ClothingCategory::Outerwear,
            ClothingCategory::Shoes,
            ClothingCategory::Accessory,
        ] {
            let mesh = clothing_mesh(category, &default_dimensions(category));
            mesh.validate().unwrap();
            assert!(mesh.face_count() > 0, "{} produced no faces", category);
        }
    }

    #[test]
    fn test_skeleton_derives_missing_joints() {
        let keypoints = vec![
            kp("left_shoulder", 0.4, 0.2),
            kp("right_shoulder", 0.6, 0.2),
            kp("L-Hip", 0.45, 0.5),
            kp("r_hip", 0.55, 0.5),
            kp("left_knee", 0.45, 0.75),
            kp("head", 0.5, 0.05),
        ];
        let skeleton = skeleton_from_keypoints(&keypoints, 1.75).unwrap();
        skeleton.validate().unwrap();

        let names: Vec<_> = skeleton.bones.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["spine", "head", "thigh.L"]);
        let pelvis = skeleton.joints.iter().find(|j| j.name == "pelvis").unwrap();
        assert!((pelvis.position[1] - 0.875).abs() < 1e-4);
    }

    #[test]
    fn test_orphaned_bones_skipped() {
        // forearm without upper arm, and no spine
        let keypoints = vec![kp("left_elbow", 0.3, 0.3), kp("left_wrist", 0.25, 0.45)];
        assert!(skeleton_from_keypoints(&keypoints, 1.7).is_none());
    }
}
