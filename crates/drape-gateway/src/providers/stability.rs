//! Stability single-image 3D provider
//!
//! Synchronous: one multipart upload returns the GLB in the response body,
//! so there is no job to poll.

use crate::cancel::CancelHandle;
use crate::config::ProviderConfig;
use crate::http::{join, AuthScheme, ProviderHttp};
use crate::normalize;
use crate::provider::ModelProvider;
use crate::request::{BodyRequest, ClothingRequest, MediaPayload, OutputFormat, Quality};
use drape_core::{DrapeError, GeometrySource, Model3D, ProviderKind, Result};
use reqwest::blocking::multipart::{Form, Part};
use std::io::Cursor;
use std::time::Duration;
use tracing::info;

const KIND: ProviderKind = ProviderKind::Stability;
const FOREGROUND_RATIO: &str = "0.85";

pub struct StabilityProvider {
    http: ProviderHttp,
    endpoint: String,
    model: String,
}

impl StabilityProvider {
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Self {
        Self {
            http: ProviderHttp::new(KIND, AuthScheme::Bearer, &config.api_key, timeout),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        }
    }

    fn run(
        &self,
        image: &MediaPayload,
        quality: Quality,
        cancel: &CancelHandle,
    ) -> Result<Vec<u8>> {
        let form = upload_form(image, quality)?;
        let url = join(&self.endpoint, &format!("v2beta/3d/{}", self.model));
        let started = std::time::Instant::now();
        let bytes = self
            .http
            .post_multipart(&url, "model/gltf-binary", form, cancel)?;
        info!(
            provider = %KIND,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model received"
        );
        Ok(bytes)
    }
}

fn texture_resolution(quality: Quality) -> &'static str {
    match quality {
        Quality::Draft => "512",
        Quality::Standard => "1024",
        Quality::High => "2048",
    }
}

/// Multipart body for one generation: the image plus generation settings
fn upload_form(image: &MediaPayload, quality: Quality) -> Result<Form> {
    let len = image.bytes.len() as u64;
    let part = Part::reader_with_length(Cursor::new(image.bytes.clone()), len)
        .file_name("image")
        .mime_str(&image.mime_type)
        .map_err(|e| {
            DrapeError::unsupported(KIND.as_str(), format!("bad image mime type: {}", e))
        })?;
    Ok(Form::new()
        .part("image", part)
        .text("texture_resolution", texture_resolution(quality))
        .text("foreground_ratio", FOREGROUND_RATIO))
}

impl ModelProvider for StabilityProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn generate_body_model(&self, request: &BodyRequest, cancel: &CancelHandle) -> Result<Model3D> {
        request.options.require_format(KIND, &[OutputFormat::Glb])?;
        let image = request
            .images
            .first()
            .ok_or_else(|| DrapeError::unsupported(KIND.as_str(), "needs a front-facing image"))?;
        let bytes = self.run(image, request.options.quality, cancel)?;
        let import = normalize::decode(KIND, &bytes)?;
        let geometry = GeometrySource::Reconstructed;
        normalize::body_from_import(KIND, import, geometry, None, &request.options)
    }

    fn generate_clothing_model(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        let bytes = self.run(&request.image, Quality::Standard, cancel)?;
        let import = normalize::decode(KIND, &bytes)?;
        let geometry = GeometrySource::Reconstructed;
        normalize::clothing_from_import(KIND, import, geometry, None, &request.options)
    }

    fn health_check(&self) -> Result<()> {
        self.http.check_reachable(&join(&self.endpoint, "v1/engines/list"))
    }
}
