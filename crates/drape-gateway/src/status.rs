//! Provider service status

use crate::provider::ModelProvider;
use chrono::{DateTime, Utc};
use drape_core::ProviderKind;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// A health check slower than this still counts as reachable, but degraded
pub const DEGRADED_LATENCY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Online,
    Offline,
    Degraded,
}

/// Point-in-time health of one provider. Computed on demand, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub provider: ProviderKind,
    pub status: ServiceState,
    /// Wall-clock latency of the health check; -1 when unreachable
    pub response_time_ms: i64,
    /// 0 after a successful check, 1 after a failed one. No history is kept.
    pub error_rate: f32,
    pub last_check: DateTime<Utc>,
}

impl ServiceStatus {
    /// Run `client`'s health check and time it
    pub fn check(client: &dyn ModelProvider) -> Self {
        let started = Instant::now();
        let result = client.health_check();
        let elapsed = started.elapsed();
        match result {
            Ok(()) => Self {
                provider: client.kind(),
                status: if elapsed > DEGRADED_LATENCY {
                    ServiceState::Degraded
                } else {
                    ServiceState::Online
                },
                response_time_ms: elapsed.as_millis() as i64,
                error_rate: 0.0,
                last_check: Utc::now(),
            },
            Err(e) => {
                debug!(provider = %client.kind(), error = %e, "health check failed");
                Self::offline(client.kind())
            }
        }
    }

    pub fn offline(provider: ProviderKind) -> Self {
        Self {
            provider,
            status: ServiceState::Offline,
            response_time_ms: -1,
            error_rate: 1.0,
            last_check: Utc::now(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ServiceState::Online
    }
}
