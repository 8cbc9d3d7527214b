//! Blocking HTTP plumbing shared by the provider clients
//!
//! Job-creation requests are sent exactly once: providers bill per call, so a
//! failed submission is reported to the orchestrator instead of retried.
//! Idempotent GETs (status polls, downloads) retry transient failures with
//! exponential backoff. Every exchange runs through
//! [`CancelHandle::run_blocking`], so a cancelled generation does not wait for
//! an in-flight request to finish.

use crate::cancel::CancelHandle;
use crate::request::MediaPayload;
use drape_core::{DrapeError, ProviderKind, Result};
use reqwest::blocking::multipart::Form;
use serde_json::Value;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: usize = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// How a provider expects its API key in the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: Token <key>`
    Token,
    /// `Authorization: luma-api-key=<key>`
    LumaKey,
}

impl AuthScheme {
    pub fn header_value(&self, api_key: &str) -> String {
        match self {
            AuthScheme::Bearer => format!("Bearer {}", api_key),
            AuthScheme::Token => format!("Token {}", api_key),
            AuthScheme::LumaKey => format!("luma-api-key={}", api_key),
        }
    }
}

/// HTTP client bound to one provider's credentials
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    provider: ProviderKind,
    auth: String,
    timeout: Duration,
}

impl ProviderHttp {
    pub fn new(
        provider: ProviderKind,
        scheme: AuthScheme,
        api_key: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            auth: scheme.header_value(api_key),
            timeout,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// POST a JSON body once and parse the JSON reply
    pub fn post_json(&self, url: &str, payload: Value, cancel: &CancelHandle) -> Result<Value> {
        debug!(provider = %self.provider, url, "POST");
        let (agent, url, auth) = self.prepare(url, cancel);
        let outcome = cancel.run_blocking(move || -> std::result::Result<_, ureq::Error> {
            let mut response = agent
                .post(&url)
                .header("Authorization", &auth)
                .header("Content-Type", "application/json")
                .send_json(&payload)?;
            Ok(response.body_mut().read_json::<Value>())
        })?;
        self.finish(outcome, cancel)?
            .map_err(|e| self.invalid(format!("response is not JSON: {}", e)))
    }

    /// POST with an empty body once, ignoring the reply body
    pub fn post_empty(&self, url: &str, cancel: &CancelHandle) -> Result<()> {
        debug!(provider = %self.provider, url, "POST (empty)");
        let (agent, url, auth) = self.prepare(url, cancel);
        let outcome = cancel.run_blocking(move || {
            agent
                .post(&url)
                .header("Authorization", &auth)
                .send_empty()
                .map(drop)
        })?;
        self.finish(outcome, cancel)
    }

    /// POST a multipart form once and return the raw reply body
    pub fn post_multipart(
        &self,
        url: &str,
        accept: &str,
        form: Form,
        cancel: &CancelHandle,
    ) -> Result<Vec<u8>> {
        debug!(provider = %self.provider, url, "POST (multipart)");
        let provider = self.provider;
        let timeout = cancel.clamp(self.timeout);
        let (url, auth, accept) = (url.to_string(), self.auth.clone(), accept.to_string());
        let outcome = cancel.run_blocking(move || -> Result<Vec<u8>> {
            let transport = |e: reqwest::Error| DrapeError::Transport {
                provider: provider.to_string(),
                message: e.to_string(),
            };
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(transport)?;
            let response = client
                .post(&url)
                .header(reqwest::header::AUTHORIZATION, &auth)
                .header(reqwest::header::ACCEPT, &accept)
                .multipart(form)
                .send()
                .map_err(transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(DrapeError::Http {
                    provider: provider.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(response.bytes().map_err(transport)?.to_vec())
        })?;
        outcome.map_err(|e| {
            if cancel.is_cancelled() {
                DrapeError::Cancelled
            } else {
                e
            }
        })
    }

    /// PUT a payload to a pre-signed URL (no provider credentials)
    pub fn put_signed(
        &self,
        url: &str,
        payload: &MediaPayload,
        cancel: &CancelHandle,
    ) -> Result<()> {
        debug!(provider = %self.provider, len = payload.bytes.len(), "PUT signed upload");
        let (agent, url, _) = self.prepare(url, cancel);
        let payload = payload.clone();
        let outcome = cancel.run_blocking(move || {
            agent
                .put(&url)
                .header("Content-Type", &payload.mime_type)
                .send(&payload.bytes[..])
                .map(drop)
        })?;
        self.finish(outcome, cancel)
    }

    /// GET JSON with transient-failure retries
    pub fn get_json(&self, url: &str, cancel: &CancelHandle) -> Result<Value> {
        self.with_retry(url, cancel, |agent, url, auth| {
            let mut response = agent.get(url).header("Authorization", auth).call()?;
            Ok(response.body_mut().read_json::<Value>())
        })?
        .map_err(|e| self.invalid(format!("status response is not JSON: {}", e)))
    }

    /// Download a binary (model file) with transient-failure retries.
    /// Result URLs are pre-signed, so no credentials are sent.
    pub fn download(&self, url: &str, cancel: &CancelHandle) -> Result<Vec<u8>> {
        self.with_retry(url, cancel, |agent, url, _| {
            let response = agent.get(url).call()?;
            let mut bytes = Vec::new();
            response
                .into_body()
                .into_reader()
                .read_to_end(&mut bytes)
                .map_err(ureq::Error::Io)?;
            Ok(bytes)
        })
    }

    /// Single authenticated GET; any non-success status is an error
    pub fn check_reachable(&self, url: &str) -> Result<()> {
        let agent = build_agent(self.timeout);
        agent
            .get(url)
            .header("Authorization", &self.auth)
            .call()
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    fn with_retry<T, F>(&self, url: &str, cancel: &CancelHandle, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&ureq::Agent, &str, &str) -> std::result::Result<T, ureq::Error>
            + Clone
            + Send
            + 'static,
    {
        let mut attempt = 0usize;
        loop {
            let (agent, url, auth) = self.prepare(url, cancel);
            let op = op.clone();
            let outcome = cancel.run_blocking(move || op(&agent, &url, &auth))?;
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < MAX_RETRIES && is_retryable_error(&e) => {
                    debug!(provider = %self.provider, attempt, error = %e, "retrying");
                    cancel.sleep(backoff_delay(attempt))?;
                    attempt += 1;
                }
                Err(e) => return self.finish(Err(e), cancel),
            }
        }
    }

    /// Agent, owned URL and auth header for one exchange on a helper thread
    fn prepare(&self, url: &str, cancel: &CancelHandle) -> (ureq::Agent, String, String) {
        (self.agent(cancel), url.to_string(), self.auth.clone())
    }

    /// A request that fails after cancellation reports `Cancelled`
    fn finish<T>(
        &self,
        outcome: std::result::Result<T, ureq::Error>,
        cancel: &CancelHandle,
    ) -> Result<T> {
        outcome.map_err(|e| {
            if cancel.is_cancelled() {
                DrapeError::Cancelled
            } else {
                self.map_error(e)
            }
        })
    }

    fn agent(&self, cancel: &CancelHandle) -> ureq::Agent {
        build_agent(cancel.clamp(self.timeout))
    }

    fn map_error(&self, e: ureq::Error) -> DrapeError {
        match e {
            ureq::Error::StatusCode(status) => DrapeError::Http {
                provider: self.provider.to_string(),
                status,
            },
            other => DrapeError::Transport {
                provider: self.provider.to_string(),
                message: other.to_string(),
            },
        }
    }

    fn invalid(&self, message: String) -> DrapeError {
        DrapeError::invalid_response(self.provider.as_str(), message)
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    config.into()
}

fn is_retryable_error(e: &ureq::Error) -> bool {
    match e {
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => true,
        ureq::Error::StatusCode(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
        _ => false,
    }
}

fn backoff_delay(attempt: usize) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt))
}

/// Trim a trailing slash so endpoint joins stay predictable
pub fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_key: &str) -> ProviderHttp {
        ProviderHttp::new(
            ProviderKind::Replicate,
            AuthScheme::Token,
            api_key,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_auth_header_values() {
        assert_eq!(AuthScheme::Bearer.header_value("k"), "Bearer k");
        assert_eq!(AuthScheme::Token.header_value("k"), "Token k");
        assert_eq!(AuthScheme::LumaKey.header_value("k"), "luma-api-key=k");
    }

    #[test]
    fn test_join() {
        assert_eq!(
            join("https://api.example.com/v1/", "/models"),
            "https://api.example.com/v1/models"
        );
        assert_eq!(join("https://api.example.com", "jobs"), "https://api.example.com/jobs");
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_error(&ureq::Error::StatusCode(503)));
        assert!(is_retryable_error(&ureq::Error::StatusCode(429)));
        assert!(!is_retryable_error(&ureq::Error::StatusCode(401)));
    }

    #[test]
    fn test_post_json_sends_auth_once() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/predictions")
            .match_header("authorization", "Token secret")
            .with_status(500)
            .expect(1)
            .create();

        let err = client("secret")
            .post_json(
                &join(&server.url(), "predictions"),
                serde_json::json!({}),
                &CancelHandle::new(),
            )
            .unwrap_err();
        assert!(matches!(err, DrapeError::Http { status: 500, .. }));
        mock.assert();
    }

    #[test]
    fn test_get_json_parses_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/predictions/abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"processing"}"#)
            .create();

        let value = client("secret")
            .get_json(&join(&server.url(), "predictions/abc"), &CancelHandle::new())
            .unwrap();
        assert_eq!(value["status"], "processing");
        mock.assert();
    }

    #[test]
    fn test_get_json_rejects_non_json() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create();

        let err = client("secret")
            .get_json(&join(&server.url(), "status"), &CancelHandle::new())
            .unwrap_err();
        assert!(matches!(err, DrapeError::InvalidResponse { .. }));
    }

    #[test]
    fn test_cancelled_handle_sends_nothing() {
        let mut server = mockito::Server::new();
        let mock = server.mock("POST", "/jobs").expect(0).create();

        let cancel = CancelHandle::new();
        cancel.cancel();
        let err = client("secret")
            .post_json(&join(&server.url(), "jobs"), serde_json::json!({}), &cancel)
            .unwrap_err();
        assert!(matches!(err, DrapeError::Cancelled));
        mock.assert();
    }

    #[test]
    fn test_cancel_interrupts_unanswered_request() {
        // accepts connections into the backlog but never replies
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/chat/completions", listener.local_addr().unwrap());
        let http = ProviderHttp::new(
            ProviderKind::OpenAi,
            AuthScheme::Bearer,
            "sk-test",
            Duration::from_secs(30),
        );

        let cancel = CancelHandle::new();
        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });

        let started = std::time::Instant::now();
        let err = http
            .post_json(&url, serde_json::json!({"model": "gpt-4o"}), &cancel)
            .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, DrapeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn test_deadline_interrupts_unanswered_download() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/out/model.glb", listener.local_addr().unwrap());

        let started = std::time::Instant::now();
        let err = client("secret")
            .download(&url, &CancelHandle::with_timeout(Duration::from_millis(150)))
            .unwrap_err();
        assert!(matches!(err, DrapeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn test_reachability_fails_on_401() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/models").with_status(401).create();
        assert!(client("bad").check_reachable(&join(&server.url(), "models")).is_err());
    }
}
