//! Gaussian splatting pipeline provider
//!
//! Submits a video (preferred) or a set of photos to a splat-training job
//! service and polls it. The trained splats come back as a PLY point cloud,
//! so models from this provider usually have no faces.
//!
//! Status literals: `queued`, `running` (pending); `completed`; `failed`,
//! `error` (failed).

use crate::cancel::CancelHandle;
use crate::config::ProviderConfig;
use crate::http::{join, AuthScheme, ProviderHttp};
use crate::normalize;
use crate::poll::{poll_until, JobState, PollPolicy};
use crate::provider::ModelProvider;
use crate::request::{BodyRequest, ClothingRequest, MediaPayload, OutputFormat, Quality};
use drape_core::{DrapeError, GeometrySource, Model3D, ProviderKind, Result};
use drape_import::ImportResult;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

const KIND: ProviderKind = ProviderKind::GaussianSplatting;

const FORMATS: [OutputFormat; 2] = [OutputFormat::Ply, OutputFormat::Glb];

pub struct GaussianSplattingProvider {
    http: ProviderHttp,
    endpoint: String,
    model: String,
    policy: PollPolicy,
}

impl GaussianSplattingProvider {
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Self {
        Self {
            http: ProviderHttp::new(KIND, AuthScheme::Bearer, &config.api_key, timeout),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            policy: PollPolicy::LONG_RUNNING,
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn run(
        &self,
        video: Option<&MediaPayload>,
        images: &[&MediaPayload],
        quality: Quality,
        format: OutputFormat,
        cancel: &CancelHandle,
    ) -> Result<(ImportResult, String)> {
        let mut payload = json!({
            "model": self.model,
            "quality": quality.as_str(),
            "output_format": format.as_str(),
        });
        match video {
            Some(video) => payload["video"] = json!(video.to_data_uri()),
            None if !images.is_empty() => {
                let uris: Vec<String> = images.iter().map(|i| i.to_data_uri()).collect();
                payload["images"] = json!(uris);
            }
            None => {
                return Err(DrapeError::unsupported(
                    KIND.as_str(),
                    "needs a video or at least one image",
                ))
            }
        }

        let created = self.http.post_json(&join(&self.endpoint, "jobs"), payload, cancel)?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| DrapeError::invalid_response(KIND.as_str(), "job response has no id"))?
            .to_string();
        info!(provider = %KIND, job_id = %id, "splat job submitted");

        let status_url = join(&self.endpoint, &format!("jobs/{}", id));
        let url = poll_until(KIND, &id, self.policy, cancel, |_| {
            parse_job(&self.http.get_json(&status_url, cancel)?)
        })?;
        let bytes = self.http.download(&url, cancel)?;
        Ok((normalize::decode(KIND, &bytes)?, url))
    }
}

/// Map one job status body to a job state
pub fn parse_job(body: &Value) -> Result<JobState<String>> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| DrapeError::invalid_response(KIND.as_str(), "job has no status"))?;

    match status {
        "queued" | "running" => Ok(JobState::Pending(status.to_string())),
        "completed" => body
            .pointer("/output/ply_url")
            .or_else(|| body.get("ply_url"))
            .and_then(Value::as_str)
            .map(|url| JobState::Succeeded(url.to_string()))
            .ok_or_else(|| {
                DrapeError::invalid_response(KIND.as_str(), "completed job has no ply_url")
            }),
        "failed" | "error" => Ok(JobState::Failed(
            body.get("error")
                .and_then(Value::as_str)
                .unwrap_or(status)
                .to_string(),
        )),
        other => Err(DrapeError::invalid_response(
            KIND.as_str(),
            format!("unknown job status '{}'", other),
        )),
    }
}

fn geometry_of(import: &ImportResult) -> GeometrySource {
    if import.mesh.faces.is_empty() {
        GeometrySource::PointCloud
    } else {
        GeometrySource::Reconstructed
    }
}

impl ModelProvider for GaussianSplattingProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn generate_body_model(&self, request: &BodyRequest, cancel: &CancelHandle) -> Result<Model3D> {
        let options = &request.options;
        options.require_format(KIND, &FORMATS)?;
        let images: Vec<&MediaPayload> = request.images.iter().collect();
        let (import, url) = self.run(
            request.video.as_ref(),
            &images,
            options.quality,
            options.output_format,
            cancel,
        )?;
        let geometry = geometry_of(&import);
        normalize::body_from_import(KIND, import, geometry, Some(&url), &request.options)
    }

    fn generate_clothing_model(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        let (import, url) = self.run(
            request.video.as_ref(),
            &[&request.image],
            Quality::Standard,
            OutputFormat::Ply,
            cancel,
        )?;
        let geometry = geometry_of(&import);
        normalize::clothing_from_import(KIND, import, geometry, Some(&url), &request.options)
    }

    fn health_check(&self) -> Result<()> {
        self.http.check_reachable(&join(&self.endpoint, "jobs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drape_core::ClothingCategory;

    const SPLATS: &str = "ply\nformat ascii 1.0\nelement vertex 3\n\
        property float x\nproperty float y\nproperty float z\nproperty float opacity\n\
        end_header\n0 0 0 1\n0 1 0 1\n1 0 0 0.5\n";

    fn provider(server: &mockito::Server, max_attempts: u32) -> GaussianSplattingProvider {
        let config = ProviderConfig::new(KIND, "splat-key").with_endpoint(server.url());
        GaussianSplattingProvider::from_config(&config, Duration::from_secs(5))
            .with_poll_policy(PollPolicy::new(Duration::from_millis(1), max_attempts))
    }

    #[test]
    fn test_parse_job_states() {
        assert_eq!(
            parse_job(&json!({"status": "queued"})).unwrap(),
            JobState::Pending("queued".to_string())
        );
        assert_eq!(
            parse_job(&json!({"status": "completed", "output": {"ply_url": "https://s/x.ply"}}))
                .unwrap(),
            JobState::Succeeded("https://s/x.ply".to_string())
        );
        assert_eq!(
            parse_job(&json!({"status": "completed", "ply_url": "https://s/y.ply"})).unwrap(),
            JobState::Succeeded("https://s/y.ply".to_string())
        );
        assert_eq!(
            parse_job(&json!({"status": "error", "error": "COLMAP failed"})).unwrap(),
            JobState::Failed("COLMAP failed".to_string())
        );
        assert!(parse_job(&json!({"status": "completed"})).is_err());
        assert!(parse_job(&json!({})).is_err());
    }

    #[test]
    fn test_job_carries_output_format() {
        let mut server = mockito::Server::new();
        let create = server
            .mock("POST", "/jobs")
            .match_body(mockito::Matcher::PartialJson(
                json!({"output_format": "glb", "quality": "draft"}),
            ))
            .with_status(400)
            .expect(1)
            .create();

        let mut request = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1])]);
        request.options.output_format = OutputFormat::Glb;
        request.options.quality = Quality::Draft;
        let err = provider(&server, 1)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap_err();

        create.assert();
        assert!(matches!(err, DrapeError::Http { status: 400, .. }));
    }

    #[test]
    fn test_obj_output_is_unsupported() {
        let mut server = mockito::Server::new();
        let create = server.mock("POST", "/jobs").expect(0).create();

        let mut request = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1])]);
        request.options.output_format = OutputFormat::Obj;
        let err = provider(&server, 1)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap_err();

        create.assert();
        assert!(matches!(err, DrapeError::Unsupported { .. }));
    }

    #[test]
    fn test_video_job_yields_point_cloud() {
        let mut server = mockito::Server::new();
        let ply_url = format!("{}/out/splats.ply", server.url());
        let create = server
            .mock("POST", "/jobs")
            .match_header("authorization", "Bearer splat-key")
            .match_body(mockito::Matcher::Regex("\"video\":\"data:video/mp4;base64,".to_string()))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "j1", "status": "queued"}"#)
            .create();
        let _status = server
            .mock("GET", "/jobs/j1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"status": "completed", "output": {"ply_url": ply_url}}).to_string())
            .create();
        let _ply = server
            .mock("GET", "/out/splats.ply")
            .with_status(200)
            .with_body(SPLATS)
            .create();

        let request = BodyRequest::from_video(MediaPayload::mp4(vec![0u8; 16]));
        let model = provider(&server, 5)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap();

        create.assert();
        assert_eq!(model.base().geometry, GeometrySource::PointCloud);
        assert_eq!(model.mesh().vertex_count(), 3);
        assert!(model.mesh().faces.is_empty());
    }

    #[test]
    fn test_cancel_before_submit_sends_nothing() {
        let mut server = mockito::Server::new();
        let create = server.mock("POST", "/jobs").expect(0).create();

        let cancel = CancelHandle::new();
        cancel.cancel();
        let request =
            ClothingRequest::new(MediaPayload::jpeg(vec![1]), ClothingCategory::Accessory);
        let err = provider(&server, 5)
            .generate_clothing_model(&request, &cancel)
            .unwrap_err();
        assert!(matches!(err, DrapeError::Cancelled));
        create.assert();
    }
}
