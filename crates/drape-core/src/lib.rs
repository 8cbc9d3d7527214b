//! Drape Core - Foundational types for the Drape generation gateway
//!
//! This crate provides the types every other Drape crate depends on:
//! - `Model3D` and friends - the canonical body/clothing model shape
//! - `ProviderKind` - identifiers of the external generation services
//! - `ContentHash` - SHA-256 digests of provider binaries
//! - Error types and Result alias

mod error;
mod hash;
mod kind;
mod model;

pub use error::{DrapeError, Result};
pub use hash::ContentHash;
pub use kind::ProviderKind;
pub use model::{
    BodyMeasurements, BodyModel, Bone, ClothingCategory, ClothingModel, GeometrySource, Joint,
    Material, Mesh, MeshBounds, Model3D, ModelBase, ModelSummary, PhysicsProperties, Skeleton,
};
