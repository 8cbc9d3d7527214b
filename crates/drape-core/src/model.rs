//! Canonical 3D model types
//!
//! Every provider's output is normalized into [`Model3D`]. Geometry is stored
//! as flat arrays (`[x, y, z, x, y, z, ...]`) so results can be handed to a
//! renderer or serialized without reshaping.

use crate::error::{DrapeError, Result};
use crate::kind::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a model's geometry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometrySource {
    /// Mesh reconstructed by the provider
    Reconstructed,
    /// Points only (splatting output); `faces` is empty
    PointCloud,
    /// Placeholder surface generated locally from analysis parameters.
    /// Not geometrically accurate.
    Synthesized,
}

/// Flat triangle mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<f32>,
    pub faces: Vec<u32>,
    #[serde(default)]
    pub normals: Vec<f32>,
    #[serde(default)]
    pub uv_coordinates: Vec<f32>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn face_count(&self) -> usize {
        self.faces.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Append another mesh, offsetting its face indices.
    ///
    /// Normals/UVs are kept only while both sides carry them, so a merged
    /// mesh never ends up with partial attribute arrays.
    pub fn append(&mut self, other: &Mesh) {
        let had_vertices = !self.vertices.is_empty();
        let offset = self.vertex_count() as u32;

        let keep_normals = (!had_vertices || !self.normals.is_empty()) && !other.normals.is_empty();
        let keep_uvs =
            (!had_vertices || !self.uv_coordinates.is_empty()) && !other.uv_coordinates.is_empty();

        self.vertices.extend_from_slice(&other.vertices);
        self.faces.extend(other.faces.iter().map(|i| i + offset));

        if keep_normals {
            self.normals.extend_from_slice(&other.normals);
        } else {
            self.normals.clear();
        }
        if keep_uvs {
            self.uv_coordinates.extend_from_slice(&other.uv_coordinates);
        } else {
            self.uv_coordinates.clear();
        }
    }

    /// Check the canonical invariants.
    ///
    /// - vertices are xyz triples and finite
    /// - faces are index triples, every index `< vertex_count`
    /// - normals are empty or one xyz per vertex
    /// - uv coordinates are empty or one uv pair per vertex
    pub fn validate(&self) -> Result<()> {
        if self.vertices.len() % 3 != 0 {
            return Err(DrapeError::InvalidModel(format!(
                "vertex array length {} is not a multiple of 3",
                self.vertices.len()
            )));
        }
        if self.vertices.iter().any(|v| !v.is_finite()) {
            return Err(DrapeError::InvalidModel(
                "vertex array contains non-finite values".to_string(),
            ));
        }
        if self.faces.len() % 3 != 0 {
            return Err(DrapeError::InvalidModel(format!(
                "face array length {} is not a multiple of 3",
                self.faces.len()
            )));
        }
        let count = self.vertex_count() as u32;
        if let Some(bad) = self.faces.iter().find(|&&i| i >= count) {
            return Err(DrapeError::InvalidModel(format!(
                "face index {} out of range for {} vertices",
                bad, count
            )));
        }
        if !self.normals.is_empty() && self.normals.len() != self.vertices.len() {
            return Err(DrapeError::InvalidModel(format!(
                "{} normal components for {} vertex components",
                self.normals.len(),
                self.vertices.len()
            )));
        }
        if !self.uv_coordinates.is_empty()
            && self.uv_coordinates.len() != self.vertex_count() * 2
        {
            return Err(DrapeError::InvalidModel(format!(
                "{} uv components for {} vertices",
                self.uv_coordinates.len(),
                self.vertex_count()
            )));
        }
        Ok(())
    }

    pub fn bounds(&self) -> Option<MeshBounds> {
        MeshBounds::from_flat(&self.vertices)
    }

    /// Iterate positions as `[x, y, z]`
    pub fn positions(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.vertices.chunks_exact(3).map(|c| [c[0], c[1], c[2]])
    }
}

/// Axis-aligned bounding box computed from vertex positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl MeshBounds {
    /// Compute bounds from a flat xyz array
    pub fn from_flat(vertices: &[f32]) -> Option<Self> {
        let mut chunks = vertices.chunks_exact(3);
        let first = chunks.next()?;
        let mut min = [first[0], first[1], first[2]];
        let mut max = min;
        for p in chunks {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        Some(Self { min, max })
    }

    /// Size along each axis
    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

impl fmt::Display for MeshBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.size();
        write!(f, "{:.2} x {:.2} x {:.2}", s[0], s[1], s[2])
    }
}

/// Body measurements in centimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyMeasurements {
    pub height: f32,
    pub chest: f32,
    pub waist: f32,
    pub hips: f32,
    pub shoulder_width: f32,
}

/// A bone in a body skeleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    /// Index into [`Skeleton::bones`]
    pub parent: Option<usize>,
    /// Index into [`Skeleton::joints`] where the bone starts
    pub head: usize,
    /// Index into [`Skeleton::joints`] where the bone ends
    pub tail: usize,
}

/// A named joint position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub name: String,
    pub position: [f32; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
    pub joints: Vec<Joint>,
}

impl Skeleton {
    /// Parent links must point at earlier bones and joint references must exist
    pub fn validate(&self) -> Result<()> {
        for (i, bone) in self.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= i {
                    return Err(DrapeError::InvalidModel(format!(
                        "bone '{}' has parent {} which does not precede it",
                        bone.name, parent
                    )));
                }
            }
            if bone.head >= self.joints.len() || bone.tail >= self.joints.len() {
                return Err(DrapeError::InvalidModel(format!(
                    "bone '{}' references a missing joint",
                    bone.name
                )));
            }
        }
        Ok(())
    }
}

/// Garment category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClothingCategory {
    Top,
    Bottom,
    Dress,
    Outerwear,
    Shoes,
    Accessory,
}

impl ClothingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClothingCategory::Top => "top",
            ClothingCategory::Bottom => "bottom",
            ClothingCategory::Dress => "dress",
            ClothingCategory::Outerwear => "outerwear",
            ClothingCategory::Shoes => "shoes",
            ClothingCategory::Accessory => "accessory",
        }
    }
}

impl fmt::Display for ClothingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A PBR material description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    #[serde(default)]
    pub diffuse_map: Option<String>,
    #[serde(default)]
    pub normal_map: Option<String>,
    pub roughness: f32,
    pub metallic: f32,
    #[serde(default = "default_base_color")]
    pub base_color: [f32; 4],
}

fn default_base_color() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}

impl Material {
    pub fn new(name: impl Into<String>, roughness: f32, metallic: f32) -> Self {
        Self {
            name: name.into(),
            diffuse_map: None,
            normal_map: None,
            roughness,
            metallic,
            base_color: default_base_color(),
        }
    }
}

/// Cloth simulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsProperties {
    /// Kilograms
    pub mass: f32,
    pub elasticity: f32,
    pub friction: f32,
    pub damping: f32,
}

impl PhysicsProperties {
    /// Typical parameters for a garment category
    pub fn for_category(category: ClothingCategory) -> Self {
        let (mass, elasticity, friction, damping) = match category {
            ClothingCategory::Top => (0.2, 0.35, 0.5, 0.1),
            ClothingCategory::Bottom => (0.45, 0.25, 0.55, 0.12),
            ClothingCategory::Dress => (0.35, 0.3, 0.45, 0.08),
            ClothingCategory::Outerwear => (1.1, 0.15, 0.6, 0.2),
            ClothingCategory::Shoes => (0.8, 0.05, 0.8, 0.4),
            ClothingCategory::Accessory => (0.1, 0.2, 0.5, 0.15),
        };
        Self {
            mass,
            elasticity,
            friction,
            damping,
        }
    }
}

/// Fields shared by body and clothing models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBase {
    pub id: String,
    pub provider: ProviderKind,
    pub mesh: Mesh,
    pub geometry: GeometrySource,
    /// Download reference of the provider's binary, if it produced one
    #[serde(default)]
    pub source_url: Option<String>,
    /// `sha256:` digest of the downloaded binary
    #[serde(default)]
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ModelBase {
    /// New base with a fresh unique id
    pub fn new(provider: ProviderKind, mesh: Mesh, geometry: GeometrySource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider,
            mesh,
            geometry,
            source_url: None,
            content_hash: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyModel {
    #[serde(flatten)]
    pub base: ModelBase,
    #[serde(default)]
    pub measurements: Option<BodyMeasurements>,
    #[serde(default)]
    pub skeleton: Option<Skeleton>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClothingModel {
    #[serde(flatten)]
    pub base: ModelBase,
    pub category: ClothingCategory,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub physics_properties: Option<PhysicsProperties>,
}

/// The gateway's normalized result, independent of provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Model3D {
    Body(BodyModel),
    Clothing(ClothingModel),
}

impl Model3D {
    pub fn base(&self) -> &ModelBase {
        match self {
            Model3D::Body(m) => &m.base,
            Model3D::Clothing(m) => &m.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut ModelBase {
        match self {
            Model3D::Body(m) => &mut m.base,
            Model3D::Clothing(m) => &mut m.base,
        }
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn provider(&self) -> ProviderKind {
        self.base().provider
    }

    pub fn mesh(&self) -> &Mesh {
        &self.base().mesh
    }

    /// Validate mesh and skeleton invariants
    pub fn validate(&self) -> Result<()> {
        self.mesh().validate()?;
        if let Model3D::Body(BodyModel {
            skeleton: Some(skeleton),
            ..
        }) = self
        {
            skeleton.validate()?;
        }
        Ok(())
    }

    /// Compact description for API responses
    pub fn summary(&self) -> ModelSummary {
        let base = self.base();
        let (kind, measurements, category, materials) = match self {
            Model3D::Body(m) => ("body", m.measurements, None, Vec::new()),
            Model3D::Clothing(m) => (
                "clothing",
                None,
                Some(m.category),
                m.materials.iter().map(|mat| mat.name.clone()).collect(),
            ),
        };
        ModelSummary {
            id: base.id.clone(),
            provider: base.provider,
            kind: kind.to_string(),
            vertex_count: base.mesh.vertex_count(),
            face_count: base.mesh.face_count(),
            geometry: base.geometry,
            measurements,
            category,
            materials,
            download_url: base.source_url.clone(),
        }
    }
}

/// What the HTTP layer returns to its callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub provider: ProviderKind,
    pub kind: String,
    pub vertex_count: usize,
    pub face_count: usize,
    pub geometry: GeometrySource,
    #[serde(default)]
    pub measurements: Option<BodyMeasurements>,
    #[serde(default)]
    pub category: Option<ClothingCategory>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}
