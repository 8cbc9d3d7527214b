//! Generation request types

use base64::Engine;
use drape_core::{ClothingCategory, ContentHash, DrapeError, ProviderKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// An image or video buffer. Cloning shares the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl MediaPayload {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            mime_type: mime_type.into(),
        }
    }

    pub fn jpeg(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, "image/jpeg")
    }

    pub fn mp4(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, "video/mp4")
    }

    /// `data:<mime>;base64,<payload>` URI for JSON request bodies
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    pub fn digest(&self) -> ContentHash {
        ContentHash::from_bytes(&self.bytes)
    }
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Draft => "draft",
            Quality::Standard => "standard",
            Quality::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Glb,
    Obj,
    Ply,
    Usdz,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Glb => "glb",
            OutputFormat::Obj => "obj",
            OutputFormat::Ply => "ply",
            OutputFormat::Usdz => "usdz",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for body-scan generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyOptions {
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default = "default_true")]
    pub generate_measurements: bool,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            output_format: OutputFormat::default(),
            generate_measurements: true,
        }
    }
}

impl BodyOptions {
    /// Fail with [`DrapeError::Unsupported`] unless `supported` contains the
    /// requested output format. Providers call this before any request.
    pub fn require_format(&self, provider: ProviderKind, supported: &[OutputFormat]) -> Result<()> {
        if supported.contains(&self.output_format) {
            return Ok(());
        }
        Err(DrapeError::unsupported(
            provider.as_str(),
            format!("cannot produce {} output", self.output_format),
        ))
    }
}

fn default_true() -> bool {
    true
}

/// Options for clothing generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClothingOptions {
    pub category: ClothingCategory,
    #[serde(default = "default_true")]
    pub extract_material: bool,
    #[serde(default)]
    pub generate_physics: bool,
}

impl ClothingOptions {
    pub fn new(category: ClothingCategory) -> Self {
        Self {
            category,
            extract_material: true,
            generate_physics: false,
        }
    }
}

/// Photos (and optionally a turnaround video) of a person
#[derive(Debug, Clone)]
pub struct BodyRequest {
    pub images: Vec<MediaPayload>,
    pub video: Option<MediaPayload>,
    pub options: BodyOptions,
}

impl BodyRequest {
    pub fn from_images(images: Vec<MediaPayload>) -> Self {
        Self {
            images,
            video: None,
            options: BodyOptions::default(),
        }
    }

    pub fn from_video(video: MediaPayload) -> Self {
        Self {
            images: Vec::new(),
            video: Some(video),
            options: BodyOptions::default(),
        }
    }
}

/// A photo (and optionally a video) of one garment
#[derive(Debug, Clone)]
pub struct ClothingRequest {
    pub image: MediaPayload,
    pub video: Option<MediaPayload>,
    pub options: ClothingOptions,
}

impl ClothingRequest {
    pub fn new(image: MediaPayload, category: ClothingCategory) -> Self {
        Self {
            image,
            video: None,
            options: ClothingOptions::new(category),
        }
    }
}

/// Either kind of generation request, borrowed from the caller
#[derive(Debug, Clone, Copy)]
pub enum GenerationRequest<'a> {
    Body(&'a BodyRequest),
    Clothing(&'a ClothingRequest),
}

impl<'a> From<&'a BodyRequest> for GenerationRequest<'a> {
    fn from(request: &'a BodyRequest) -> Self {
        GenerationRequest::Body(request)
    }
}

impl<'a> From<&'a ClothingRequest> for GenerationRequest<'a> {
    fn from(request: &'a ClothingRequest) -> Self {
        GenerationRequest::Clothing(request)
    }
}

impl GenerationRequest<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationRequest::Body(_) => "body",
            GenerationRequest::Clothing(_) => "clothing",
        }
    }

    /// Digest over every payload, for log correlation
    pub fn digest(&self) -> ContentHash {
        match self {
            GenerationRequest::Body(req) => ContentHash::from_parts(
                req.images
                    .iter()
                    .chain(req.video.iter())
                    .map(|p| &p.bytes[..]),
            ),
            GenerationRequest::Clothing(req) => ContentHash::from_parts(
                std::iter::once(&req.image)
                    .chain(req.video.iter())
                    .map(|p| &p.bytes[..]),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri() {
        let payload = MediaPayload::new(b"hi".to_vec(), "image/png");
        assert_eq!(payload.to_data_uri(), "data:image/png;base64,aGk=");
        assert!(!payload.is_video());
        assert!(MediaPayload::mp4(vec![0u8; 4]).is_video());
    }

    #[test]
    fn test_clone_shares_bytes() {
        let payload = MediaPayload::mp4(vec![0u8; 1024]);
        let copy = payload.clone();
        assert!(Arc::ptr_eq(&payload.bytes, &copy.bytes));
    }

    #[test]
    fn test_debug_hides_bytes() {
        let payload = MediaPayload::jpeg(vec![1u8, 2, 3]);
        let dbg = format!("{:?}", payload);
        assert!(dbg.contains("len: 3"));
        assert!(!dbg.contains("[1, 2, 3]"));
    }

    #[test]
    fn test_require_format() {
        let mut opts = BodyOptions::default();
        opts.require_format(ProviderKind::Luma, &[OutputFormat::Glb]).unwrap();

        opts.output_format = OutputFormat::Usdz;
        let err = opts
            .require_format(ProviderKind::Luma, &[OutputFormat::Glb, OutputFormat::Ply])
            .unwrap_err();
        assert!(matches!(err, DrapeError::Unsupported { ref provider, .. } if provider == "luma"));
        assert!(err.to_string().contains("usdz"));
    }

    #[test]
    fn test_option_defaults() {
        let opts: BodyOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.quality, Quality::Standard);
        assert_eq!(opts.output_format, OutputFormat::Glb);
        assert!(opts.generate_measurements);

        let opts: ClothingOptions = serde_json::from_str(r#"{"category":"dress"}"#).unwrap();
        assert_eq!(opts.category, ClothingCategory::Dress);
        assert!(opts.extract_material);
        assert!(!opts.generate_physics);
    }

    #[test]
    fn test_request_digest_covers_video() {
        let images_only = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1u8])]);
        let mut with_video = images_only.clone();
        with_video.video = Some(MediaPayload::mp4(vec![2u8]));
        let a = GenerationRequest::from(&images_only);
        let b = GenerationRequest::from(&with_video);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.kind(), "body");
    }
}
