//! Test doubles and fixtures (available with the `test-utils` feature).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::auth::{AuthError, Authenticator, ExternalIdentity};
use crate::generation::KeySelector;
use crate::generation::provider::{Download, Operation, ProviderError, Submission, VideoProvider};
use crate::models::{AccountStatus, Identity, Plan, Role};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Install the process-wide rustls provider once, for tests that build an HTTP client.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// An active identity with no usage
pub fn identity_fixture(id: &str, role: Role, credits: u32) -> Identity {
    Identity {
        id: id.to_string(),
        name: format!("Test {id}"),
        email: format!("{id}@example.com"),
        role,
        plan: if role == Role::Admin { Plan::Enterprise } else { Plan::Free },
        credits,
        used_credits: 0,
        status: AccountStatus::Active,
        avatar: format!("https://api.dicebear.com/7.x/avataaars/svg?seed={id}"),
    }
}

pub fn external_identity(uid: &str) -> ExternalIdentity {
    ExternalIdentity {
        uid: uid.to_string(),
        display_name: Some(format!("Test {uid}")),
        email: Some(format!("{uid}@example.com")),
        photo_url: None,
    }
}

// ============================================================================
// Video provider
// ============================================================================

/// Record of a call made to [`MockVideoProvider`].
#[derive(Debug, Clone)]
pub enum ProviderCall {
    Submit { api_key: String, submission: Submission },
    Poll { api_key: String, operation: String },
    Download { api_key: String, uri: String },
}

impl ProviderCall {
    pub fn api_key(&self) -> &str {
        match self {
            ProviderCall::Submit { api_key, .. }
            | ProviderCall::Poll { api_key, .. }
            | ProviderCall::Download { api_key, .. } => api_key,
        }
    }
}

#[derive(Default)]
struct ProviderScript {
    submits: VecDeque<Result<Operation, ProviderError>>,
    polls: VecDeque<Result<Operation, ProviderError>>,
    downloads: VecDeque<Result<Download, ProviderError>>,
    calls: Vec<ProviderCall>,
}

/// Scripted video provider.
///
/// Responses are returned in FIFO order per call type. Once the poll script runs out, polls keep
/// reporting the operation as not done; submit and download fail with a transport error.
#[derive(Clone, Default)]
pub struct MockVideoProvider {
    script: Arc<Mutex<ProviderScript>>,
}

impl MockVideoProvider {
    pub const OPERATION: &'static str = "models/veo-test/operations/op-1";
    pub const VIDEO_URI: &'static str = "https://files.example.com/v1beta/files/video-1:download?alt=media";
    pub const VIDEO_BYTES: &'static [u8] = b"\x00\x00\x00\x18ftypmp42";

    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that reports `pending_polls` "not done" polls, then a finished operation whose
    /// video downloads successfully.
    pub fn succeeding(pending_polls: usize) -> Self {
        let provider = Self::new();
        provider.push_submit(Ok(Operation::pending(Self::OPERATION)));
        for _ in 0..pending_polls {
            provider.push_poll(Ok(Operation::pending(Self::OPERATION)));
        }
        provider.push_poll(Ok(Operation::finished(Self::OPERATION, Self::VIDEO_URI)));
        provider.push_download(Ok(Download {
            bytes: Bytes::from_static(Self::VIDEO_BYTES),
            mime_type: "video/mp4".to_string(),
        }));
        provider
    }

    pub fn push_submit(&self, response: Result<Operation, ProviderError>) {
        lock(&self.script).submits.push_back(response);
    }

    pub fn push_poll(&self, response: Result<Operation, ProviderError>) {
        lock(&self.script).polls.push_back(response);
    }

    pub fn push_download(&self, response: Result<Download, ProviderError>) {
        lock(&self.script).downloads.push_back(response);
    }

    pub fn replace_downloads(&self, responses: Vec<Result<Download, ProviderError>>) {
        lock(&self.script).downloads = responses.into();
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.script).calls.clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.script).calls.len()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Submit { submission, .. } => Some(submission),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl VideoProvider for MockVideoProvider {
    async fn submit(&self, api_key: &str, submission: &Submission) -> Result<Operation, ProviderError> {
        let mut script = lock(&self.script);
        script.calls.push(ProviderCall::Submit {
            api_key: api_key.to_string(),
            submission: submission.clone(),
        });
        script
            .submits
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("no scripted submit response".to_string())))
    }

    async fn poll(&self, api_key: &str, operation: &str) -> Result<Operation, ProviderError> {
        let mut script = lock(&self.script);
        script.calls.push(ProviderCall::Poll {
            api_key: api_key.to_string(),
            operation: operation.to_string(),
        });
        script
            .polls
            .pop_front()
            .unwrap_or_else(|| Ok(Operation::pending(operation)))
    }

    async fn download(&self, api_key: &str, uri: &str) -> Result<Download, ProviderError> {
        let mut script = lock(&self.script);
        script.calls.push(ProviderCall::Download {
            api_key: api_key.to_string(),
            uri: uri.to_string(),
        });
        script
            .downloads
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("no scripted download response".to_string())))
    }
}

// ============================================================================
// Key selection
// ============================================================================

#[derive(Clone, Default)]
pub struct MockKeySelector {
    key: Option<String>,
    selected: Arc<Mutex<bool>>,
    opens: Arc<AtomicUsize>,
}

impl MockKeySelector {
    /// Nothing selected yet; opening the dialog makes `key` available.
    pub fn new(key: Option<String>) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    /// A key has already been chosen.
    pub fn selected(key: &str) -> Self {
        let selector = Self::new(Some(key.to_string()));
        *lock(&selector.selected) = true;
        selector
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySelector for MockKeySelector {
    async fn has_selected_key(&self) -> bool {
        *lock(&self.selected)
    }

    async fn open_select_key(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *lock(&self.selected) = true;
    }

    async fn selected_key(&self) -> Option<String> {
        if *lock(&self.selected) { self.key.clone() } else { None }
    }
}

// ============================================================================
// Authenticator
// ============================================================================

/// Authenticator double: sign-in returns the scripted outcome and publishes it as an auth event.
#[derive(Clone)]
pub struct MockAuthenticator {
    state: watch::Sender<Option<ExternalIdentity>>,
    outcomes: Arc<Mutex<VecDeque<Result<ExternalIdentity, AuthError>>>>,
    sign_outs: Arc<AtomicUsize>,
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MockAuthenticator {
    /// `current` is the auth state observed by the first subscriber.
    pub fn new(current: Option<ExternalIdentity>) -> Self {
        let (state, _) = watch::channel(current);
        Self {
            state,
            outcomes: Arc::default(),
            sign_outs: Arc::default(),
        }
    }

    pub fn push_sign_in(&self, outcome: Result<ExternalIdentity, AuthError>) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// Publish an auth-state change as the hosted provider would.
    pub fn emit(&self, identity: Option<ExternalIdentity>) {
        self.state.send_replace(identity);
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    fn subscribe(&self) -> watch::Receiver<Option<ExternalIdentity>> {
        self.state.subscribe()
    }

    async fn sign_in_popup(&self) -> Result<ExternalIdentity, AuthError> {
        let outcome = lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Provider("no scripted sign-in".to_string())));
        if let Ok(identity) = &outcome {
            self.state.send_replace(Some(identity.clone()));
        }
        outcome
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(None);
        Ok(())
    }
}
