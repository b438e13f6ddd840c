pub mod anthropic;
pub mod gemini;
pub mod mock;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An image already fetched and base64-encoded for transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    pub data: String,
    pub media_type: String,
}

/// Everything a provider gets for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub text: String,
    pub images: Vec<InlineImage>,
}

/// The model behind the pipeline. Given text and images, produce text or fail.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Bounds every call of the wrapped generator.
pub struct WithTimeout<G> {
    inner: G,
    limit: Duration,
}

impl<G> WithTimeout<G> {
    pub fn new(inner: G, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<G: Generator> Generator for WithTimeout<G> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        tokio::time::timeout(self.limit, self.inner.generate(request))
            .await
            .with_context(|| format!("generation timed out after {:?}", self.limit))?
    }
}

#[async_trait]
impl Generator for Box<dyn Generator> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request).await
    }
}
