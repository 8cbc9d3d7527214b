//! Replicate prediction provider
//!
//! Submits an image-to-3D prediction and polls it until it settles.
//!
//! Status literals: `starting`, `processing` (pending); `succeeded`;
//! `failed`, `canceled` (failed). The output is a URL string, an array of
//! URLs, or an object keyed by `mesh`, `glb` or `model_file`.

use crate::cancel::CancelHandle;
use crate::config::ProviderConfig;
use crate::http::{join, AuthScheme, ProviderHttp};
use crate::normalize;
use crate::poll::{poll_until, JobState, PollPolicy};
use crate::provider::ModelProvider;
use crate::request::{BodyRequest, ClothingRequest, MediaPayload, OutputFormat, Quality};
use drape_core::{DrapeError, GeometrySource, Model3D, ProviderKind, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

const KIND: ProviderKind = ProviderKind::Replicate;

/// Formats the prediction can emit that decode back into a mesh
const FORMATS: [OutputFormat; 2] = [OutputFormat::Glb, OutputFormat::Ply];

pub struct ReplicateProvider {
    http: ProviderHttp,
    endpoint: String,
    model: String,
    policy: PollPolicy,
}

impl ReplicateProvider {
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Self {
        Self {
            http: ProviderHttp::new(KIND, AuthScheme::Token, &config.api_key, timeout),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            policy: PollPolicy::FAST,
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Submit, poll, and download; returns the model bytes and their URL
    fn run(
        &self,
        images: &[&MediaPayload],
        quality: Quality,
        format: OutputFormat,
        cancel: &CancelHandle,
    ) -> Result<(Vec<u8>, String)> {
        let payload = json!({
            "version": self.model,
            "input": {
                "images": images.iter().map(|i| i.to_data_uri()).collect::<Vec<_>>(),
                "texture_size": texture_size(quality),
                "output_format": format.as_str(),
                "generate_model": true,
            }
        });
        let created = self
            .http
            .post_json(&join(&self.endpoint, "predictions"), payload, cancel)?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DrapeError::invalid_response(KIND.as_str(), "prediction response has no id")
            })?
            .to_string();
        info!(provider = %KIND, job_id = %id, "prediction submitted");

        let status_url = join(&self.endpoint, &format!("predictions/{}", id));
        let url = poll_until(KIND, &id, self.policy, cancel, |_| {
            parse_prediction(&self.http.get_json(&status_url, cancel)?)
        })?;

        let bytes = self.http.download(&url, cancel)?;
        Ok((bytes, url))
    }
}

fn texture_size(quality: Quality) -> u32 {
    match quality {
        Quality::Draft => 512,
        Quality::Standard => 1024,
        Quality::High => 2048,
    }
}

/// Map one prediction status body to a job state
pub fn parse_prediction(body: &Value) -> Result<JobState<String>> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| DrapeError::invalid_response(KIND.as_str(), "prediction has no status"))?;

    match status {
        "starting" | "processing" => Ok(JobState::Pending(status.to_string())),
        "succeeded" => body
            .get("output")
            .and_then(output_url)
            .map(JobState::Succeeded)
            .ok_or_else(|| {
                DrapeError::invalid_response(KIND.as_str(), "succeeded prediction has no model URL")
            }),
        "failed" | "canceled" => {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or(status)
                .to_string();
            Ok(JobState::Failed(message))
        }
        other => Err(DrapeError::invalid_response(
            KIND.as_str(),
            format!("unknown prediction status '{}'", other),
        )),
    }
}

/// Pick the model URL out of a prediction's `output`, preferring GLB links
pub fn output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => {
            let urls: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            urls.iter()
                .find(|u| u.ends_with(".glb"))
                .or_else(|| urls.first())
                .map(|u| u.to_string())
        }
        Value::Object(map) => ["mesh", "glb", "model_file"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

impl ModelProvider for ReplicateProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn generate_body_model(&self, request: &BodyRequest, cancel: &CancelHandle) -> Result<Model3D> {
        if request.images.is_empty() {
            return Err(DrapeError::unsupported(
                KIND.as_str(),
                "predictions need at least one image",
            ));
        }
        request.options.require_format(KIND, &FORMATS)?;
        let images: Vec<&MediaPayload> = request.images.iter().collect();
        let options = &request.options;
        let (bytes, url) = self.run(&images, options.quality, options.output_format, cancel)?;
        let import = normalize::decode(KIND, &bytes)?;
        let geometry = GeometrySource::Reconstructed;
        normalize::body_from_import(KIND, import, geometry, Some(&url), &request.options)
    }

    fn generate_clothing_model(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        let (bytes, url) =
            self.run(&[&request.image], Quality::Standard, OutputFormat::Glb, cancel)?;
        let import = normalize::decode(KIND, &bytes)?;
        let geometry = GeometrySource::Reconstructed;
        normalize::clothing_from_import(KIND, import, geometry, Some(&url), &request.options)
    }

    fn health_check(&self) -> Result<()> {
        self.http.check_reachable(&join(&self.endpoint, "models"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth;
    use drape_core::{BodyMeasurements, ClothingCategory};
    use drape_import::export_glb;

    fn provider(server: &mockito::Server, max_attempts: u32) -> ReplicateProvider {
        let config = ProviderConfig::new(KIND, "r8_test").with_endpoint(server.url());
        ReplicateProvider::from_config(&config, Duration::from_secs(5))
            .with_poll_policy(PollPolicy::new(Duration::from_millis(1), max_attempts))
    }

    fn glb() -> Vec<u8> {
        export_glb(&synth::body_mesh(&BodyMeasurements {
            height: 172.0,
            chest: 94.0,
            waist: 80.0,
            hips: 97.0,
            shoulder_width: 44.0,
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_prediction_states() {
        assert_eq!(
            parse_prediction(&json!({"status": "starting"})).unwrap(),
            JobState::Pending("starting".to_string())
        );
        assert_eq!(
            parse_prediction(&json!({"status": "succeeded", "output": "https://x/model.glb"}))
                .unwrap(),
            JobState::Succeeded("https://x/model.glb".to_string())
        );
        assert_eq!(
            parse_prediction(&json!({"status": "failed", "error": "CUDA out of memory"})).unwrap(),
            JobState::Failed("CUDA out of memory".to_string())
        );
        assert_eq!(
            parse_prediction(&json!({"status": "canceled"})).unwrap(),
            JobState::Failed("canceled".to_string())
        );
        assert!(parse_prediction(&json!({"status": "exploded"})).is_err());
        assert!(parse_prediction(&json!({"status": "succeeded", "output": null})).is_err());
    }

    #[test]
    fn test_output_url_shapes() {
        assert_eq!(
            output_url(&json!(["https://x/preview.mp4", "https://x/model.glb"])).as_deref(),
            Some("https://x/model.glb")
        );
        assert_eq!(
            output_url(&json!({"model_file": "https://x/m.glb", "color_video": "https://x/v.mp4"}))
                .as_deref(),
            Some("https://x/m.glb")
        );
        assert_eq!(output_url(&json!(42)), None);
    }

    #[test]
    fn test_generate_body_end_to_end() {
        let mut server = mockito::Server::new();
        let model_url = format!("{}/files/model.glb", server.url());
        let create = server
            .mock("POST", "/predictions")
            .match_header("authorization", "Token r8_test")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "p1", "status": "starting"}"#)
            .expect(1)
            .create();
        let status = server
            .mock("GET", "/predictions/p1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"status": "succeeded", "output": {"mesh": model_url}}).to_string())
            .create();
        let download = server
            .mock("GET", "/files/model.glb")
            .with_status(200)
            .with_body(glb())
            .create();

        let request = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1, 2, 3])]);
        let model = provider(&server, 5)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap();

        create.assert();
        status.assert();
        download.assert();
        assert_eq!(model.base().source_url.as_deref(), Some(model_url.as_str()));
        assert_eq!(model.base().geometry, GeometrySource::Reconstructed);
        model.validate().unwrap();
    }

    #[test]
    fn test_output_format_reaches_prediction_input() {
        let mut server = mockito::Server::new();
        let create = server
            .mock("POST", "/predictions")
            .match_body(mockito::Matcher::PartialJson(
                json!({"input": {"output_format": "ply", "texture_size": 2048}}),
            ))
            .with_status(422)
            .expect(1)
            .create();

        let mut request = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1])]);
        request.options.output_format = OutputFormat::Ply;
        request.options.quality = Quality::High;
        let err = provider(&server, 1)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap_err();

        create.assert();
        assert!(matches!(err, DrapeError::Http { status: 422, .. }));
    }

    #[test]
    fn test_undecodable_format_is_refused_before_submission() {
        let mut server = mockito::Server::new();
        let create = server.mock("POST", "/predictions").expect(0).create();

        let mut request = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1])]);
        request.options.output_format = OutputFormat::Usdz;
        let err = provider(&server, 1)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap_err();

        create.assert();
        assert!(matches!(err, DrapeError::Unsupported { .. }));
    }

    #[test]
    fn test_polling_exhaustion_is_timeout() {
        let mut server = mockito::Server::new();
        let _create = server
            .mock("POST", "/predictions")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "p2", "status": "starting"}"#)
            .create();
        let status = server
            .mock("GET", "/predictions/p2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "processing"}"#)
            .expect(3)
            .create();

        let request = ClothingRequest::new(MediaPayload::jpeg(vec![9]), ClothingCategory::Top);
        let err = provider(&server, 3)
            .generate_clothing_model(&request, &CancelHandle::new())
            .unwrap_err();
        assert!(err.is_timeout());
        status.assert();
    }

    #[test]
    fn test_reported_failure_stops_polling() {
        let mut server = mockito::Server::new();
        let _create = server
            .mock("POST", "/predictions")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "p3", "status": "starting"}"#)
            .create();
        let status = server
            .mock("GET", "/predictions/p3")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "failed", "error": "bad input"}"#)
            .expect(1)
            .create();

        let request = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1])]);
        let err = provider(&server, 10)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap_err();
        assert!(
            matches!(err, DrapeError::ProviderFailed { ref message, .. } if message == "bad input")
        );
        status.assert();
    }

    #[test]
    fn test_submission_not_retried() {
        let mut server = mockito::Server::new();
        let create = server
            .mock("POST", "/predictions")
            .with_status(503)
            .expect(1)
            .create();

        let request = BodyRequest::from_images(vec![MediaPayload::jpeg(vec![1])]);
        let err = provider(&server, 3)
            .generate_body_model(&request, &CancelHandle::new())
            .unwrap_err();
        assert!(matches!(err, DrapeError::Http { status: 503, .. }));
        create.assert();
    }
}
