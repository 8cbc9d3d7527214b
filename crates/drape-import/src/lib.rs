//! Drape Import - Provider binary decoders
//!
//! Reconstructing providers hand back either a GLB mesh or, for splatting
//! pipelines, a PLY point cloud. Both are decoded into a single merged
//! canonical [`drape_core::Mesh`].

mod gltf_import;
mod ply_import;
mod types;

pub use gltf_import::{export_glb, import_glb};
pub use ply_import::import_ply;
pub use types::{ImportResult, ModelFormat};
