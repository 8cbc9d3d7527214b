//! Generation orchestrator
//!
//! Providers are tried one at a time in ascending priority. A provider whose
//! rate-limit window is exhausted is skipped outright. When an admitted
//! provider fails, its declared fallback (if any, and if admitted) gets one
//! attempt with the same request before the walk continues. The first
//! success wins; if nothing succeeds the caller gets
//! [`DrapeError::AllProvidersUnavailable`].

use crate::cancel::CancelHandle;
use crate::config::{GatewayConfig, ProviderConfig};
use crate::provider::ModelProvider;
use crate::providers::create_provider;
use crate::rate_limit::RateLimiter;
use crate::request::{BodyRequest, ClothingRequest, GenerationRequest};
use crate::status::ServiceStatus;
use drape_core::{DrapeError, Model3D, ProviderKind, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A successful generation and where it came from
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub model: Model3D,
    pub provider: ProviderKind,
    /// True when the model came from a fallback after its primary failed
    pub via_fallback: bool,
}

pub struct Gateway {
    /// Active providers, ascending priority
    providers: Vec<ProviderConfig>,
    clients: HashMap<ProviderKind, Arc<dyn ModelProvider>>,
    limiter: RateLimiter,
}

impl Gateway {
    /// Build HTTP clients for every active provider
    pub fn new(configs: Vec<ProviderConfig>, request_timeout: Duration) -> Self {
        let clients = configs
            .iter()
            .filter(|c| c.is_active())
            .map(|c| (c.provider, create_provider(c, request_timeout)))
            .collect();
        Self::build(configs, clients)
    }

    /// Build from layered configuration (see [`GatewayConfig::load`])
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Ok(Self::new(config.active_providers()?, config.request_timeout()))
    }

    /// Use caller-supplied clients. Every active config needs a client.
    pub fn with_clients(
        configs: Vec<ProviderConfig>,
        clients: HashMap<ProviderKind, Arc<dyn ModelProvider>>,
    ) -> Result<Self> {
        if let Some(missing) = configs
            .iter()
            .find(|c| c.is_active() && !clients.contains_key(&c.provider))
        {
            return Err(DrapeError::Config(format!(
                "no client supplied for provider '{}'",
                missing.provider
            )));
        }
        Ok(Self::build(configs, clients))
    }

    fn build(
        configs: Vec<ProviderConfig>,
        clients: HashMap<ProviderKind, Arc<dyn ModelProvider>>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut providers: Vec<ProviderConfig> = Vec::new();
        for config in configs {
            if !config.is_active() {
                debug!(provider = %config.provider, "skipping inactive provider");
                continue;
            }
            if !seen.insert(config.provider) {
                warn!(provider = %config.provider, "duplicate provider config ignored");
                continue;
            }
            providers.push(config);
        }
        // stable: equal priorities keep config order
        providers.sort_by_key(|c| c.priority);

        for config in &mut providers {
            if let Some(fallback) = config.fallback {
                if fallback == config.provider {
                    warn!(provider = %config.provider, "provider lists itself as fallback; ignoring");
                    config.fallback = None;
                } else if !seen.contains(&fallback) {
                    warn!(provider = %config.provider, %fallback, "fallback is not an active provider; ignoring");
                    config.fallback = None;
                }
            }
        }

        let mut limiter = RateLimiter::new();
        for config in &providers {
            if let Some(limit) = config.rate_limit {
                limiter = limiter.with_limit(config.provider.as_str(), limit);
            }
        }

        info!(
            providers = ?providers.iter().map(|c| c.provider.as_str()).collect::<Vec<_>>(),
            "gateway ready"
        );
        Self {
            providers,
            clients,
            limiter,
        }
    }

    /// Active provider configs in the order they will be tried
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn generate_body(
        &self,
        request: &BodyRequest,
        cancel: &CancelHandle,
    ) -> Result<GenerationOutcome> {
        self.generate(GenerationRequest::Body(request), cancel)
    }

    pub fn generate_clothing(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<GenerationOutcome> {
        self.generate(GenerationRequest::Clothing(request), cancel)
    }

    /// Walk the providers until one produces a model.
    ///
    /// Makes at most two attempts per provider (its own turn plus one as
    /// someone's fallback). Stops with [`DrapeError::Cancelled`] as soon as
    /// cancellation is observed.
    pub fn generate(
        &self,
        request: GenerationRequest<'_>,
        cancel: &CancelHandle,
    ) -> Result<GenerationOutcome> {
        let digest = request.digest();
        debug!(kind = request.kind(), request = %digest.short(), "generation started");
        let mut attempts = 0usize;

        for config in &self.providers {
            cancel.check()?;
            let primary = config.provider;
            let Some(permit) = self.limiter.try_acquire(primary.as_str()) else {
                info!(provider = %primary, "rate limited; skipping");
                continue;
            };

            attempts += 1;
            match self.attempt(primary, request, cancel) {
                Ok(model) => {
                    permit.commit();
                    return Ok(GenerationOutcome {
                        model,
                        provider: primary,
                        via_fallback: false,
                    });
                }
                Err(DrapeError::Cancelled) => return Err(DrapeError::Cancelled),
                Err(e) => {
                    drop(permit);
                    warn!(provider = %primary, error = %e, "provider failed");
                }
            }

            let Some(fallback) = config.fallback else {
                continue;
            };
            cancel.check()?;
            let Some(permit) = self.limiter.try_acquire(fallback.as_str()) else {
                info!(provider = %primary, %fallback, "fallback rate limited");
                continue;
            };

            attempts += 1;
            match self.attempt(fallback, request, cancel) {
                Ok(model) => {
                    permit.commit();
                    info!(provider = %fallback, failed = %primary, "served by fallback");
                    return Ok(GenerationOutcome {
                        model,
                        provider: fallback,
                        via_fallback: true,
                    });
                }
                Err(DrapeError::Cancelled) => return Err(DrapeError::Cancelled),
                Err(e) => {
                    warn!(provider = %fallback, failed = %primary, error = %e, "fallback failed");
                }
            }
        }

        warn!(attempts, request = %digest.short(), "all providers unavailable");
        Err(DrapeError::AllProvidersUnavailable { attempts })
    }

    fn attempt(
        &self,
        kind: ProviderKind,
        request: GenerationRequest<'_>,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        let client = self
            .clients
            .get(&kind)
            .ok_or_else(|| DrapeError::Config(format!("no client for provider '{}'", kind)))?;
        let started = Instant::now();
        let model = client.generate(request, cancel)?;
        model.validate()?;
        info!(
            provider = %kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            vertices = model.mesh().vertex_count(),
            faces = model.mesh().face_count(),
            "generation succeeded"
        );
        Ok(model)
    }

    /// Health-check every active provider concurrently
    pub fn service_status(&self) -> Vec<ServiceStatus> {
        std::thread::scope(|s| {
            let handles: Vec<_> = self
                .providers
                .iter()
                .filter_map(|c| self.clients.get(&c.provider).map(|client| (c.provider, client)))
                .map(|(kind, client)| {
                    (kind, s.spawn(move || ServiceStatus::check(client.as_ref())))
                })
                .collect();
            handles
                .into_iter()
                .map(|(kind, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| ServiceStatus::offline(kind))
                })
                .collect()
        })
    }
}
