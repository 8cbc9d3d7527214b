//! Import result types

use drape_core::{ContentHash, Material, Mesh, Skeleton};

/// Binary formats providers return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Glb,
    Ply,
}

impl ModelFormat {
    /// Sniff the format from the first bytes of a payload
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"glTF") {
            Some(ModelFormat::Glb)
        } else if bytes.starts_with(b"ply") {
            Some(ModelFormat::Ply)
        } else {
            None
        }
    }
}

/// Result of decoding a provider binary
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub format: ModelFormat,
    /// All primitives merged into one mesh
    pub mesh: Mesh,
    pub materials: Vec<Material>,
    /// First skin found in the file, if any
    pub skeleton: Option<Skeleton>,
    /// Number of source primitives that were merged
    pub primitive_count: usize,
    pub content_hash: ContentHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(ModelFormat::detect(b"glTF\x02\0\0\0"), Some(ModelFormat::Glb));
        assert_eq!(ModelFormat::detect(b"ply\nformat ascii 1.0\n"), Some(ModelFormat::Ply));
        assert_eq!(ModelFormat::detect(b"{\"error\":1}"), None);
    }
}
