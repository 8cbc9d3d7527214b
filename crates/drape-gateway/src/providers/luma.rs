//! Luma capture provider
//!
//! Reconstructs from a turnaround video. A capture is created, the video is
//! uploaded to the pre-signed URL Luma hands back, processing is triggered,
//! and the capture is polled until its latest run settles.
//!
//! `latestRun.status`: `finished` (succeeded), `failed` (failed); anything
//! else (`uploading`, `processing`, ...) is pending. A capture with no run
//! yet is pending too.

use crate::cancel::CancelHandle;
use crate::config::ProviderConfig;
use crate::http::{join, AuthScheme, ProviderHttp};
use crate::normalize;
use crate::poll::{poll_until, JobState, PollPolicy};
use crate::provider::ModelProvider;
use crate::request::{BodyRequest, ClothingRequest, MediaPayload, OutputFormat};
use drape_core::{DrapeError, GeometrySource, Model3D, ProviderKind, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

const KIND: ProviderKind = ProviderKind::Luma;
const MESH_ARTIFACTS: [&str; 2] = ["textured_mesh_glb", "mesh_glb"];

pub struct LumaProvider {
    http: ProviderHttp,
    endpoint: String,
    policy: PollPolicy,
}

impl LumaProvider {
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Self {
        Self {
            http: ProviderHttp::new(KIND, AuthScheme::LumaKey, &config.api_key, timeout),
            endpoint: config.endpoint.clone(),
            policy: PollPolicy::LONG_RUNNING,
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn run(&self, video: &MediaPayload, cancel: &CancelHandle) -> Result<(Vec<u8>, String)> {
        let title = format!("drape-{}", uuid::Uuid::new_v4().simple());
        let created =
            self.http
                .post_json(&join(&self.endpoint, "capture"), json!({"title": title}), cancel)?;
        let (slug, upload_url) = parse_capture(&created)?;
        info!(provider = %KIND, job_id = %slug, "capture created");

        self.http.put_signed(&upload_url, video, cancel)?;
        let capture_url = join(&self.endpoint, &format!("capture/{}", slug));
        self.http.post_empty(&capture_url, cancel)?;

        let url = poll_until(KIND, &slug, self.policy, cancel, |_| {
            parse_capture_status(&self.http.get_json(&capture_url, cancel)?)
        })?;
        let bytes = self.http.download(&url, cancel)?;
        Ok((bytes, url))
    }
}

fn require_video<'a>(video: Option<&'a MediaPayload>) -> Result<&'a MediaPayload> {
    video
        .filter(|v| v.is_video())
        .ok_or_else(|| DrapeError::unsupported(KIND.as_str(), "captures require a video payload"))
}

fn invalid(message: &str) -> DrapeError {
    DrapeError::invalid_response(KIND.as_str(), message)
}

/// `(slug, signed upload URL)` from a capture-creation response
pub fn parse_capture(body: &Value) -> Result<(String, String)> {
    let slug = body
        .pointer("/capture/slug")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("capture response has no slug"))?;
    let upload = body
        .pointer("/signedUrls/source")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("capture response has no upload URL"))?;
    Ok((slug.to_string(), upload.to_string()))
}

/// Map one capture status body to a job state
pub fn parse_capture_status(body: &Value) -> Result<JobState<String>> {
    let Some(run) = body.get("latestRun").filter(|r| !r.is_null()) else {
        return Ok(JobState::Pending("queued".to_string()));
    };
    let status = run
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("run has no status"))?;

    match status {
        "finished" => mesh_artifact(run)
            .map(JobState::Succeeded)
            .ok_or_else(|| invalid("finished capture has no mesh artifact")),
        "failed" => Ok(JobState::Failed(
            run.get("error")
                .and_then(Value::as_str)
                .unwrap_or("capture processing failed")
                .to_string(),
        )),
        other => Ok(JobState::Pending(other.to_string())),
    }
}

fn mesh_artifact(run: &Value) -> Option<String> {
    let artifacts = run.get("artifacts")?.as_array()?;
    MESH_ARTIFACTS.iter().find_map(|wanted| {
        artifacts
            .iter()
            .find(|a| a.get("type").and_then(Value::as_str) == Some(*wanted))
            .and_then(|a| a.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

impl ModelProvider for LumaProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn generate_body_model(&self, request: &BodyRequest, cancel: &CancelHandle) -> Result<Model3D> {
        request.options.require_format(KIND, &[OutputFormat::Glb])?;
        let video = require_video(request.video.as_ref())?;
        let (bytes, url) = self.run(video, cancel)?;
        let import = normalize::decode(KIND, &bytes)?;
        let geometry = GeometrySource::Reconstructed;
        normalize::body_from_import(KIND, import, geometry, Some(&url), &request.options)
    }

    fn generate_clothing_model(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        let video = require_video(request.video.as_ref())?;
        let (bytes, url) = self.run(video, cancel)?;
        let import = normalize::decode(KIND, &bytes)?;
        let geometry = GeometrySource::Reconstructed;
        normalize::clothing_from_import(KIND, import, geometry, Some(&url), &request.options)
    }

    fn health_check(&self) -> Result<()> {
        self.http.check_reachable(&join(&self.endpoint, "capture"))
    }
}
