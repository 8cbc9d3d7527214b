//! Mock provider for testing
//!
//! Answers from a script instead of the network and counts its calls, so
//! orchestration behaviour can be asserted without any HTTP traffic. It can
//! impersonate any [`ProviderKind`].

use crate::cancel::CancelHandle;
use crate::provider::ModelProvider;
use crate::request::{BodyRequest, ClothingRequest};
use drape_core::{
    BodyModel, ClothingModel, DrapeError, GeometrySource, Mesh, Model3D, ModelBase, ProviderKind,
    Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the mock does on one generate call
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Return a valid single-triangle model
    Succeed,
    /// Fail as if the provider reported a failed job
    Fail(String),
    /// Fail as if polling ran out of attempts
    Timeout,
    /// Block until the cancel handle fires (or the duration elapses, then succeed)
    Hang(Duration),
}

pub struct MockProvider {
    kind: ProviderKind,
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: MockOutcome,
    calls: AtomicUsize,
    healthy: bool,
}

impl MockProvider {
    /// Every call produces `outcome`
    pub fn new(kind: ProviderKind, outcome: MockOutcome) -> Self {
        Self {
            kind,
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            calls: AtomicUsize::new(0),
            healthy: true,
        }
    }

    pub fn succeeding(kind: ProviderKind) -> Self {
        Self::new(kind, MockOutcome::Succeed)
    }

    pub fn failing(kind: ProviderKind) -> Self {
        Self::new(kind, MockOutcome::Fail("mock failure".to_string()))
    }

    /// Play `script` in order, then repeat `then` for every later call
    pub fn scripted(kind: ProviderKind, script: Vec<MockOutcome>, then: MockOutcome) -> Self {
        let mock = Self::new(kind, then);
        *mock.lock() = script.into();
        mock
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Generate calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn play(
        &self,
        cancel: &CancelHandle,
        build: impl FnOnce(ModelBase) -> Model3D,
    ) -> Result<Model3D> {
        cancel.check()?;
        match self.next_outcome() {
            MockOutcome::Succeed => {}
            MockOutcome::Fail(message) => {
                return Err(DrapeError::ProviderFailed {
                    provider: self.kind.to_string(),
                    message,
                })
            }
            MockOutcome::Timeout => {
                return Err(DrapeError::Timeout {
                    provider: self.kind.to_string(),
                    attempts: 1,
                })
            }
            MockOutcome::Hang(duration) => cancel.sleep(duration)?,
        }
        let model = build(ModelBase::new(self.kind, triangle(), GeometrySource::Reconstructed));
        model.validate()?;
        Ok(model)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<MockOutcome>> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn triangle() -> Mesh {
    Mesh {
        vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        faces: vec![0, 1, 2],
        normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        uv_coordinates: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
    }
}

impl ModelProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn generate_body_model(
        &self,
        _request: &BodyRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        self.play(cancel, |base| {
            Model3D::Body(BodyModel {
                base,
                measurements: None,
                skeleton: None,
            })
        })
    }

    fn generate_clothing_model(
        &self,
        request: &ClothingRequest,
        cancel: &CancelHandle,
    ) -> Result<Model3D> {
        let category = request.options.category;
        self.play(cancel, |base| {
            Model3D::Clothing(ClothingModel {
                base,
                category,
                materials: Vec::new(),
                physics_properties: None,
            })
        })
    }

    fn health_check(&self) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(DrapeError::Http {
                provider: self.kind.to_string(),
                status: 503,
            })
        }
    }
}
