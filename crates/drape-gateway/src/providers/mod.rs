//! Provider registry
//!
//! Maps provider kinds to concrete client implementations.

pub mod gaussian_splatting;
pub mod luma;
pub mod mock;
pub mod openai;
pub mod replicate;
pub mod stability;

use crate::config::ProviderConfig;
use crate::provider::ModelProvider;
use drape_core::ProviderKind;
use std::sync::Arc;
use std::time::Duration;

/// Create the client for `config.provider`
pub fn create_provider(config: &ProviderConfig, timeout: Duration) -> Arc<dyn ModelProvider> {
    match config.provider {
        ProviderKind::OpenAi => Arc::new(openai::OpenAiProvider::from_config(config, timeout)),
        ProviderKind::Replicate => {
            Arc::new(replicate::ReplicateProvider::from_config(config, timeout))
        }
        ProviderKind::Stability => {
            Arc::new(stability::StabilityProvider::from_config(config, timeout))
        }
        ProviderKind::Luma => Arc::new(luma::LumaProvider::from_config(config, timeout)),
        ProviderKind::GaussianSplatting => Arc::new(
            gaussian_splatting::GaussianSplattingProvider::from_config(config, timeout),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_covers_every_kind() {
        for kind in ProviderKind::ALL {
            let provider =
                create_provider(&ProviderConfig::new(kind, "key"), Duration::from_secs(5));
            assert_eq!(provider.kind(), kind);
        }
    }
}
