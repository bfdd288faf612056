//! Boundary between the HTTP layer and whatever actually runs the model.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::{
    error::ServiceError,
    oai::{EngineResult, GenerationRequest},
};

/// Ordered engine steps for one streamed generation. The last item is the
/// finished result.
pub type ResultStream = Pin<Box<dyn Stream<Item = Result<EngineResult, ServiceError>> + Send>>;

#[async_trait]
pub trait CompletionEngine: Send + Sync + 'static {
    /// Runs a generation to completion and returns the final result.
    async fn complete(&self, request: &GenerationRequest) -> Result<EngineResult, ServiceError>;

    async fn stream(&self, request: &GenerationRequest) -> Result<ResultStream, ServiceError>;

    /// Computes the embedding of the request input. Engines without an
    /// embedding model answer with `NotSupported`.
    async fn embed(&self, request: &GenerationRequest) -> Result<EngineResult, ServiceError> {
        let _ = request;
        Err(ServiceError::NotSupported(
            "embeddings are not supported by this engine".into(),
        ))
    }
}
