//! OpenAI vision analysis provider
//!
//! Sends the photos to a chat-completions model with a structured-extraction
//! prompt, parses the returned JSON strictly, and builds placeholder geometry
//! from the extracted parameters. No reconstruction happens here; models
//! from this provider are marked as synthesized.

use crate::analysis::{
    completion_content, BodyAnalysis, ClothingAnalysis, BODY_PROMPT, CLOTHING_PROMPT,
};
use crate::cancel::CancelHandle;
use crate::config::ProviderConfig;
use crate::http::{join, AuthScheme, ProviderHttp};
use crate::normalize;
use crate::provider::ModelProvider;
use crate::request::{BodyRequest, ClothingRequest, MediaPayload, OutputFormat};
use drape_core::{DrapeError, Model3D, ProviderKind, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const MAX_TOKENS: u32 = 1000;

pub struct OpenAiProvider {
    http: ProviderHttp,
    endpoint: String,
    model: String,
}

impl OpenAiProvider {
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Self {
        Self {
            http: ProviderHttp::new(
                ProviderKind::OpenAi,
                AuthScheme::Bearer,
                &config.api_key,
                timeout,
            ),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        }
    }

    fn analyze(
        &self,
        prompt: &str,
        images: &[&MediaPayload],
        cancel: &CancelHandle,
    ) -> Result<String> {
        let payload = build_chat_payload(&self.model, prompt, images);
        debug!(images = images.len(), model = %self.model, "requesting analysis");
        let response = self
            .http
            .post_json(&join(&self.endpoint, "chat/completions"), payload, cancel)?;
        completion_content(ProviderKind::OpenAi, &response).map(str::to_string)
    }
}

/// Chat-completions body with one text part and one `image_url` part per image
pub fn build_chat_payload(model: &str, prompt: &str, images: &[&MediaPayload]) -> Value {
    let mut content = vec![json!({"type": "text", "text": prompt})];
    content.extend(images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": {"url": image.to_data_uri()}
        })
    }));
    json!({
        "model": model,
        "response_format": {"type": "json_object"},
        "max_tokens": MAX_TOKENS,
        "messages": [{"role": "user", "content": content}]
    })
}

impl ModelProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn generate_body_model(&self, request: &BodyRequest, cancel: &CancelHandle) -> Result<Model3D> {
        if request.images.is_empty() {
            return Err(DrapeError::unsupported(
                ProviderKind::OpenAi.as_str(),
                "body analysis needs at least one image",
            ));
        }
        request.options.require_format(ProviderKind::OpenAi, &[OutputFormat::Glb])?;
        let images: Vec<&MediaPayload> = request.images.iter().collect();
        let content = self.analyze(BODY_PROMPT, &images, cancel)?;
        let analysis = BodyAnalysis::parse(ProviderKind::OpenAi, &content)?;
        normalize::synthesized_body(ProviderKind::OpenAi, &analysis, &request.options)
    }

    fn generate_clothing_model(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        let content = self.analyze(CLOTHING_PROMPT, &[&request.image], cancel)?;
        let analysis = ClothingAnalysis::parse(ProviderKind::OpenAi, &content)?;
        normalize::synthesized_clothing(ProviderKind::OpenAi, &analysis, &request.options)
    }

    fn health_check(&self) -> Result<()> {
        self.http.check_reachable(&join(&self.endpoint, "models"))
    }
}
