//! Drape Gateway - multi-provider 3D generation
//!
//! Turns photos or video of a person or a garment into a canonical
//! [`Model3D`](drape_core::Model3D) by calling external generation services
//! (OpenAI vision analysis, Replicate, Stability, Luma captures, a Gaussian
//! splatting pipeline). The [`Gateway`] tries providers in priority order,
//! respects per-provider rate limits, follows a single declared fallback on
//! failure, and normalizes every provider's output into one shape.

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod gateway;
pub mod http;
pub mod normalize;
pub mod poll;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod request;
pub mod status;
pub mod synth;

pub use cancel::CancelHandle;
pub use config::{GatewayConfig, ProviderConfig};
pub use gateway::{Gateway, GenerationOutcome};
pub use poll::PollPolicy;
pub use provider::ModelProvider;
pub use rate_limit::{RateLimit, RateLimiter, RatePermit};
pub use request::{
    BodyOptions, BodyRequest, ClothingOptions, ClothingRequest, GenerationRequest, MediaPayload,
    OutputFormat, Quality,
};
pub use status::{ServiceState, ServiceStatus};
