//! Provider identifiers

use crate::error::{DrapeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The external generation services the gateway knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Replicate,
    Stability,
    Luma,
    GaussianSplatting,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::OpenAi,
        ProviderKind::Replicate,
        ProviderKind::Stability,
        ProviderKind::Luma,
        ProviderKind::GaussianSplatting,
    ];

    /// Config/log name, e.g. `gaussian-splatting`
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Replicate => "replicate",
            ProviderKind::Stability => "stability",
            ProviderKind::Luma => "luma",
            ProviderKind::GaussianSplatting => "gaussian-splatting",
        }
    }

    /// Environment variable stem, e.g. `GAUSSIAN_SPLATTING`
    pub fn env_stem(&self) -> String {
        self.as_str().to_uppercase().replace('-', "_")
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = DrapeError;

    fn from_str(s: &str) -> Result<Self> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                DrapeError::Config(format!(
                    "Unknown provider '{}'. Available: openai, replicate, stability, luma, gaussian-splatting",
                    s
                ))
            })
    }
}
