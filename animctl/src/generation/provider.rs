//! Video provider abstraction.
//!
//! The provider exposes a long-running operation API: submit returns an operation handle, the
//! handle is polled until `done`, and the finished operation carries a URI that is downloaded with
//! the same key. [`super::VeoClient`] talks to the hosted model; tests use a scripted double.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use super::{AspectRatio, Resolution};

/// Encoded generation request as sent to the provider.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub prompt: String,
    /// Base64-encoded image bytes
    pub image_base64: String,
    pub mime_type: String,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("prompt", &self.prompt)
            .field("image_len", &self.image_base64.len())
            .field("mime_type", &self.mime_type)
            .field("aspect_ratio", &self.aspect_ratio)
            .field("resolution", &self.resolution)
            .finish()
    }
}

/// State of a long-running operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
    /// Opaque handle used for polling
    pub name: String,
    pub done: bool,
    /// Location of the first generated video, once done
    pub video_uri: Option<String>,
    /// Error reported by the provider for a finished operation
    pub error: Option<String>,
}

impl Operation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn finished(name: impl Into<String>, video_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: true,
            video_uri: Some(video_uri.into()),
            error: None,
        }
    }
}

/// Downloaded video payload
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// 404 or "Requested entity was not found": the key no longer grants access
    #[error("requested entity was not found")]
    NotFound,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Start a generation and return its operation handle
    async fn submit(&self, api_key: &str, submission: &Submission) -> Result<Operation, ProviderError>;

    /// Re-query an operation
    async fn poll(&self, api_key: &str, operation: &str) -> Result<Operation, ProviderError>;

    /// Fetch a finished video, passing the key as a query credential
    async fn download(&self, api_key: &str, uri: &str) -> Result<Download, ProviderError>;
}
