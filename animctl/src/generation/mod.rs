//! Image-to-video generation.
//!
//! One invocation of [`GenerationWorkflow::run`] drives a single request through the external
//! provider:
//!
//! ```text
//! KeySelection -> Uploading -> Submitted -> Polling -> Downloading -> Complete
//!                    \___________\______________\____________\______-> Error
//! ```
//!
//! The workflow is idle between runs and holds no state; every run starts at
//! [`Stage::KeySelection`]. Progress is reported as [`Progress`] events on an unbounded channel.
//! The poll loop is bounded by a maximum attempt count and a time budget measured from
//! submission, and stops as soon as the caller's [`tokio_util::sync::CancellationToken`] is
//! cancelled.
//!
//! The workflow never touches credits. The session checks the balance before calling it and
//! deducts exactly one credit after it returns a [`GeneratedVideo`].
//!
//! # Modules
//!
//! - [`provider`]: the [`VideoProvider`] seam and its wire-level types
//! - [`veo`]: the HTTP client for the hosted Veo model
//! - [`keys`]: provider key resolution and the interactive key-selection hook
//! - [`workflow`]: the state machine

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::VideoId;

pub mod keys;
pub mod provider;
pub mod veo;
pub mod workflow;

pub use keys::{KeySelector, KeySource, ResolvedKey};
pub use provider::{ProviderError, VideoProvider};
pub use veo::VeoClient;
pub use workflow::GenerationWorkflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            other => Err(format!("unsupported aspect ratio '{other}', expected 16:9 or 9:16")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    FullHd,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hd => "720p",
            Resolution::FullHd => "1080p",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "720p" => Ok(Resolution::Hd),
            "1080p" => Ok(Resolution::FullHd),
            other => Err(format!("unsupported resolution '{other}', expected 720p or 1080p")),
        }
    }
}

/// Source image for a generation.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl SourceImage {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Result<Self, GenerationError> {
        let image = Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        };
        if !image.mime_type.starts_with("image/") {
            return Err(GenerationError::InvalidImage(format!(
                "expected an image, got {}",
                image.mime_type
            )));
        }
        if image.bytes.is_empty() {
            return Err(GenerationError::InvalidImage("image is empty".to_string()));
        }
        Ok(image)
    }

    /// Read an image from disk, guessing the MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, GenerationError> {
        let path = path.as_ref();
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string())
            .ok_or_else(|| GenerationError::InvalidImage(format!("cannot tell the type of {}", path.display())))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| GenerationError::InvalidImage(format!("cannot read {}: {e}", path.display())))?;
        Self::new(bytes, mime_type)
    }
}

/// Ephemeral generation request, lives for one workflow invocation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub image: SourceImage,
    pub prompt: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
}

/// Handle to a downloaded video.
#[derive(Clone)]
pub struct GeneratedVideo {
    pub id: VideoId,
    pub bytes: Bytes,
    pub mime_type: String,
}

impl fmt::Debug for GeneratedVideo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedVideo")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl GeneratedVideo {
    /// Default file name, `<id>.<ext>` with the extension taken from the MIME type
    pub fn file_name(&self) -> String {
        let extension = mime_guess::get_mime_extensions_str(&self.mime_type)
            .and_then(|extensions| extensions.first())
            .copied()
            .unwrap_or("mp4");
        format!("{}.{}", self.id, extension)
    }

    pub async fn save_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        tokio::fs::write(path, &self.bytes).await
    }
}

/// Workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    KeySelection,
    Uploading,
    Submitted,
    Polling,
    Downloading,
    Complete,
    Error,
}

/// Progress event: the stage just entered and a human-readable status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("no provider key available: {0}")]
    KeyUnavailable(String),

    #[error("invalid source image: {0}")]
    InvalidImage(String),

    #[error("no video URI returned from the model")]
    NoResult,

    #[error("session expired or invalid key")]
    SessionExpired,

    /// The provider finished the operation with an error
    #[error("generation failed: {0}")]
    ProviderFailed(String),

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("generation cancelled")]
    Cancelled,

    #[error("generation did not finish after {attempts} polls in {elapsed:?}")]
    TimedOut { attempts: u32, elapsed: std::time::Duration },

    #[error("transport error: {0}")]
    Transport(String),
}

impl GenerationError {
    /// The single human-readable message shown to the user
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::InsufficientCredits => {
                "Insufficient credits. Please upgrade your plan.".to_string()
            }
            GenerationError::KeyUnavailable(_) => "API Key selection failed or cancelled.".to_string(),
            GenerationError::InvalidImage(reason) => format!("Please upload a valid image: {reason}"),
            GenerationError::NoResult => "No video URI returned from the model.".to_string(),
            GenerationError::SessionExpired => "Session expired or invalid key. Please try again.".to_string(),
            GenerationError::ProviderFailed(message) => format!("Video generation failed: {message}"),
            GenerationError::Http { status, message } => format!("Video service request failed ({status}): {message}"),
            GenerationError::Cancelled => "Generation was cancelled.".to_string(),
            GenerationError::TimedOut { .. } => {
                "Video generation is taking too long. Please try again later.".to_string()
            }
            GenerationError::Transport(_) => "Could not reach the video generation service.".to_string(),
        }
    }
}
