//! Turns a job payload into one generation call.
//!
//! Never fails: every failure is reduced to one of the placeholder texts
//! in [`crate::consts`] so that each processed job ends with a result.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::consts::{DEFAULT_IMAGE_MEDIA_TYPE, GENERATION_FAILED, NO_USABLE_CONTENT};
use crate::fetch::ImageSource;
use crate::generator::{GenerationRequest, Generator, InlineImage};
use crate::job::{JobId, JobPayload};

pub struct Dispatcher {
    generator: Arc<dyn Generator>,
    images: Arc<dyn ImageSource>,
    media_type: String,
}

impl Dispatcher {
    pub fn new(generator: Arc<dyn Generator>, images: Arc<dyn ImageSource>) -> Self {
        Self {
            generator,
            images,
            media_type: DEFAULT_IMAGE_MEDIA_TYPE.to_string(),
        }
    }

    /// Media type attached to every fetched image. The bytes are not sniffed.
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    pub async fn dispatch(&self, job_id: &JobId, payload: &JobPayload) -> String {
        let images = self.encode_images(job_id, &payload.image_refs).await;

        if payload.text.is_empty() && images.is_empty() {
            tracing::info!(%job_id, "no text and no usable images, skipping generation");
            return NO_USABLE_CONTENT.to_string();
        }

        let request = GenerationRequest {
            text: payload.text.clone(),
            images,
        };
        tracing::debug!(%job_id, images = request.images.len(), "calling generator");

        match self.generator.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(%job_id, error = %format!("{e:#}"), "generation failed");
                GENERATION_FAILED.to_string()
            }
        }
    }

    /// Fetches in order; an image that cannot be fetched is left out.
    async fn encode_images(&self, job_id: &JobId, refs: &[String]) -> Vec<InlineImage> {
        let mut images = Vec::with_capacity(refs.len());
        for url in refs {
            match self.images.fetch(url).await {
                Ok(bytes) => images.push(InlineImage {
                    data: STANDARD.encode(&bytes),
                    media_type: self.media_type.clone(),
                }),
                Err(e) => {
                    tracing::warn!(%job_id, %url, error = %format!("{e:#}"), "image fetch failed");
                }
            }
        }
        images
    }
}
