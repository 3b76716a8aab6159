//! Generation state machine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bon::Builder;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::keys::{KeySelector, ResolvedKey, resolve_key};
use super::provider::{Operation, ProviderError, Submission, VideoProvider};
use super::{GeneratedVideo, GenerationError, GenerationRequest, Progress, Stage};
use crate::config::GenerationConfig;
use crate::models::Configuration;

/// Drives one request/poll/download cycle against a [`VideoProvider`].
///
/// # Example
///
/// ```ignore
/// let workflow = GenerationWorkflow::builder()
///     .provider(Arc::new(client))
///     .environment_key("...")
///     .poll_interval(Duration::from_secs(5))
///     .build();
/// let video = workflow.run(credits, &configuration, &request, &progress_tx, &cancel).await?;
/// ```
#[derive(Clone, Builder)]
pub struct GenerationWorkflow {
    provider: Arc<dyn VideoProvider>,
    key_selector: Option<Arc<dyn KeySelector>>,
    #[builder(into)]
    environment_key: Option<String>,
    #[builder(default = Duration::from_secs(5))]
    poll_interval: Duration,
    #[builder(default = 120)]
    max_poll_attempts: u32,
    #[builder(default = Duration::from_secs(15 * 60))]
    poll_timeout: Duration,
    #[builder(into, default = "Animate this image naturally".to_string())]
    default_prompt: String,
}

impl GenerationWorkflow {
    pub fn from_config(
        config: &GenerationConfig,
        provider: Arc<dyn VideoProvider>,
        key_selector: Option<Arc<dyn KeySelector>>,
    ) -> Self {
        Self::builder()
            .provider(provider)
            .maybe_key_selector(key_selector)
            .maybe_environment_key(config.api_key.clone())
            .poll_interval(config.poll_interval)
            .max_poll_attempts(config.max_poll_attempts)
            .poll_timeout(config.poll_timeout)
            .default_prompt(config.default_prompt.clone())
            .build()
    }

    /// Run one generation.
    ///
    /// Refuses to start when `credits` is zero, before any provider call. Every failure is also
    /// reported as a final [`Stage::Error`] progress event carrying the user-facing message.
    #[instrument(skip_all, fields(aspect_ratio = %request.aspect_ratio, resolution = %request.resolution))]
    pub async fn run(
        &self,
        credits: u32,
        configuration: &Configuration,
        request: &GenerationRequest,
        progress: &UnboundedSender<Progress>,
        cancel: &CancellationToken,
    ) -> Result<GeneratedVideo, GenerationError> {
        let result = if credits == 0 {
            Err(GenerationError::InsufficientCredits)
        } else {
            self.drive(configuration, request, progress, cancel).await
        };

        match &result {
            Ok(video) => {
                info!(video_id = %video.id, len = video.bytes.len(), "Generation complete");
                emit(progress, Stage::Complete, "Generation complete!");
            }
            Err(e) => {
                warn!(error = %e, "Generation failed");
                emit(progress, Stage::Error, e.user_message());
            }
        }
        result
    }

    async fn drive(
        &self,
        configuration: &Configuration,
        request: &GenerationRequest,
        progress: &UnboundedSender<Progress>,
        cancel: &CancellationToken,
    ) -> Result<GeneratedVideo, GenerationError> {
        emit(progress, Stage::KeySelection, "Checking API key...");
        let key = cancellable(
            cancel,
            resolve_key(
                &configuration.api_keys.veo,
                self.environment_key.as_deref(),
                self.key_selector.as_deref(),
            ),
        )
        .await??;

        emit(progress, Stage::Uploading, "Processing image...");
        let submission = Submission {
            prompt: request
                .prompt
                .as_deref()
                .map(str::trim)
                .filter(|prompt| !prompt.is_empty())
                .unwrap_or(&self.default_prompt)
                .to_string(),
            image_base64: STANDARD.encode(&request.image.bytes),
            mime_type: request.image.mime_type.clone(),
            aspect_ratio: request.aspect_ratio,
            resolution: request.resolution,
        };

        emit(progress, Stage::Submitted, "Initializing video generation model...");
        let started = Instant::now();
        let mut operation = self
            .call(&key, cancel, self.provider.submit(&key.key, &submission))
            .await?;
        debug!(operation = %operation.name, "Operation started");

        emit(
            progress,
            Stage::Polling,
            "Video generation in progress. This may take a minute...",
        );
        let mut attempts = 0;
        while !operation.done {
            if attempts >= self.max_poll_attempts || started.elapsed() >= self.poll_timeout {
                return Err(GenerationError::TimedOut {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
            cancellable(cancel, tokio::time::sleep(self.poll_interval)).await?;
            operation = self
                .call(&key, cancel, self.provider.poll(&key.key, &operation.name))
                .await?;
            attempts += 1;
            debug!(attempts, done = operation.done, "Polled operation");
            emit(progress, Stage::Polling, "Still dreaming up pixels...");
        }

        emit(progress, Stage::Downloading, "Finalizing video...");
        let uri = finished_uri(operation)?;

        emit(progress, Stage::Downloading, "Downloading video...");
        let download = self.call(&key, cancel, self.provider.download(&key.key, &uri)).await?;

        Ok(GeneratedVideo {
            id: Uuid::new_v4(),
            bytes: download.bytes,
            mime_type: download.mime_type,
        })
    }

    /// Await a provider call, honouring cancellation and mapping provider failures.
    async fn call<T>(
        &self,
        key: &ResolvedKey,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, GenerationError> {
        match cancellable(cancel, call).await? {
            Ok(value) => Ok(value),
            Err(e) => Err(self.provider_failure(key, e).await),
        }
    }

    async fn provider_failure(&self, key: &ResolvedKey, error: ProviderError) -> GenerationError {
        match error {
            ProviderError::NotFound => {
                // An administrator key is managed in settings, never through the selection hook
                if let (false, Some(selector)) = (key.is_admin(), &self.key_selector) {
                    info!("Provider key rejected, reopening key selection");
                    selector.open_select_key().await;
                }
                GenerationError::SessionExpired
            }
            ProviderError::Http { status, message } => GenerationError::Http { status, message },
            ProviderError::InvalidResponse(message) => GenerationError::ProviderFailed(message),
            ProviderError::Transport(message) => GenerationError::Transport(message),
        }
    }
}

fn finished_uri(operation: Operation) -> Result<String, GenerationError> {
    if let Some(error) = operation.error {
        return Err(GenerationError::ProviderFailed(error));
    }
    operation
        .video_uri
        .filter(|uri| !uri.trim().is_empty())
        .ok_or(GenerationError::NoResult)
}

fn emit(progress: &UnboundedSender<Progress>, stage: Stage, message: impl Into<String>) {
    // The receiver may have gone away; progress is advisory
    let _ = progress.send(Progress {
        stage,
        message: message.into(),
    });
}

async fn cancellable<T>(cancel: &CancellationToken, future: impl Future<Output = T>) -> Result<T, GenerationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenerationError::Cancelled),
        output = future => Ok(output),
    }
}
