//! Provider client trait

use crate::cancel::CancelHandle;
use crate::request::{BodyRequest, ClothingRequest, GenerationRequest};
use drape_core::{Model3D, ProviderKind, Result};

/// Trait implemented by each generation provider client.
///
/// Implementations validate every model against the canonical mesh invariants
/// before returning it. They must check `cancel` before each outbound request
/// and between poll iterations.
pub trait ModelProvider: Send + Sync {
    /// Which service this client talks to
    fn kind(&self) -> ProviderKind;

    /// Produce a body model from photos and/or a turnaround video
    fn generate_body_model(&self, request: &BodyRequest, cancel: &CancelHandle) -> Result<Model3D>;

    /// Produce a clothing model from a garment photo
    fn generate_clothing_model(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D>;

    /// Lightweight reachability/credential check. Any non-success status is
    /// an error; the body is not inspected.
    fn health_check(&self) -> Result<()>;

    /// Dispatch on the request shape
    fn generate(&self, request: GenerationRequest<'_>, cancel: &CancelHandle) -> Result<Model3D> {
        match request {
            GenerationRequest::Body(req) => self.generate_body_model(req, cancel),
            GenerationRequest::Clothing(req) => self.generate_clothing_model(req, cancel),
        }
    }
}
