//! Session and profile cache.
//!
//! [`SessionService`] is the single context object holding the signed-in identity, the roster of
//! identities visible to it, the application configuration and the visible transactions. It is
//! built from an injected [`DocumentStore`] and [`Authenticator`] and has an explicit lifecycle:
//!
//! 1. [`SessionService::initialize`] loads the configuration (defaults on timeout, error or
//!    absence) while processing the authenticator's current state, then keeps listening for
//!    auth-state changes in a background task
//! 2. the session is used: sign-in/out, administrative updates, generation
//! 3. [`SessionService::shutdown`] stops the listener
//!
//! ## Visibility
//!
//! Elevated roles (see [`Role::is_elevated`]) load the full roster and every transaction. Base
//! identities only ever hold themselves and their own transactions. When the signed-in account
//! changes, everything held for the previous one is dropped before the new identity is looked up.
//! An identity read in the background is discarded if the session changed while it was loading.
//!
//! ## Writes
//!
//! Mutations are applied to the in-memory state first and then written through to the store. A
//! failed write is not swallowed: it stays queued, the caller gets [`Error::WriteDiverged`], and
//! [`SessionService::flush_pending_writes`] replays the queue in order. See [`ledger`].
//!
//! Credit deductions are not serialised across clients. Two sessions for the same identity can both
//! pass the balance check before either write lands; the store keeps whichever write came last.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, RwLock, mpsc::UnboundedSender, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::permissions::{self, Action, NavigationItem};
use crate::auth::{AuthError, Authenticator, ExternalIdentity};
use crate::config::{Config, CreditsConfig};
use crate::errors::{Error, Result};
use crate::generation::{GeneratedVideo, GenerationRequest, GenerationWorkflow, Progress};
use crate::models::{AccountStatus, Configuration, Identity, Plan, Role, Transaction};
use crate::store::{self, DocumentStore, StoreError};
use crate::types::abbrev_id;

pub mod ledger;
pub mod reports;

pub use ledger::PendingWrite;
pub use reports::{Analytics, DashboardStats};

/// Snapshot of the session cache.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub current: Option<Identity>,
    pub roster: Vec<Identity>,
    pub configuration: Configuration,
    pub transactions: Vec<Transaction>,
    pub initialized: bool,
    /// Bumped whenever the signed-in identity or roster changes locally
    pub revision: u64,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn DocumentStore>,
    authenticator: Arc<dyn Authenticator>,
    workflow: Option<GenerationWorkflow>,
    credits: CreditsConfig,
    load_timeout: Duration,
    state: Arc<RwLock<SessionState>>,
    pending: Arc<Mutex<VecDeque<PendingWrite>>>,
    initialized: Arc<OnceCell<()>>,
    shutdown: CancellationToken,
    listener: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl SessionService {
    pub fn new(store: Arc<dyn DocumentStore>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            store,
            authenticator,
            workflow: None,
            credits: CreditsConfig::default(),
            load_timeout: Duration::from_secs(5),
            state: Arc::default(),
            pending: Arc::default(),
            initialized: Arc::default(),
            shutdown: CancellationToken::new(),
            listener: Arc::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        authenticator: Arc<dyn Authenticator>,
        workflow: Option<GenerationWorkflow>,
    ) -> Self {
        let session = Self::new(store, authenticator)
            .with_credits(config.credits.clone())
            .with_load_timeout(config.store.load_timeout);
        match workflow {
            Some(workflow) => session.with_workflow(workflow),
            None => session,
        }
    }

    pub fn with_credits(mut self, credits: CreditsConfig) -> Self {
        self.credits = credits;
        self
    }

    pub fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    pub fn with_workflow(mut self, workflow: GenerationWorkflow) -> Self {
        self.workflow = Some(workflow);
        self
    }

    // ------------------------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------------------------

    /// Load configuration and process the current auth state. Idempotent.
    ///
    /// Returns once both the configuration load and the first auth-state event have been handled.
    /// Store failures are absorbed: the session always finishes initializing.
    #[instrument(skip_all)]
    pub async fn initialize(&self) {
        self.initialized
            .get_or_init(|| async {
                let mut events = self.authenticator.subscribe();
                let first = events.borrow_and_update().clone();

                tokio::join!(self.load_configuration(), self.handle_auth_event(first));

                let listener = self.clone();
                let handle = tokio::spawn(async move { listener.listen(events).await });
                if let Ok(mut slot) = self.listener.lock() {
                    *slot = Some(handle);
                }

                self.state.write().await.initialized = true;
                info!("Session initialized");
            })
            .await;
    }

    /// Stop listening for auth-state changes.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.listener.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Auth listener ended abnormally");
            }
        }
        debug!("Session shut down");
    }

    async fn listen(&self, mut events: watch::Receiver<Option<ExternalIdentity>>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = events.changed() => {
                    if changed.is_err() {
                        debug!("Authenticator dropped, auth listener stopping");
                        break;
                    }
                    let event = events.borrow_and_update().clone();
                    self.handle_auth_event(event).await;
                }
            }
        }
    }

    async fn load_configuration(&self) {
        let configuration = match self.bounded(self.store.get_configuration()).await {
            Ok(stored) => Configuration::from_stored(stored.as_ref()),
            Err(e) => {
                warn!(error = %e, "Failed to load configuration, using defaults");
                Configuration::default()
            }
        };
        self.state.write().await.configuration = configuration;
    }

    async fn handle_auth_event(&self, event: Option<ExternalIdentity>) {
        let Some(external) = event else {
            self.clear_identity().await;
            return;
        };
        let Some(revision) = self.switch_account(&external.uid).await else {
            debug!(user_id = %abbrev_id(&external.uid), "Identity already current");
            return;
        };
        match self.bounded(self.store.get_identity(&external.uid)).await {
            Ok(Some(identity)) => self.adopt(identity, Some(revision)).await,
            Ok(None) => debug!(user_id = %abbrev_id(&external.uid), "No identity document yet"),
            Err(e) => warn!(user_id = %abbrev_id(&external.uid), error = %e, "Failed to load identity"),
        }
    }

    /// Prepare the cache for an auth event naming `uid`.
    ///
    /// Returns `None` when `uid` is already the current identity. Otherwise everything held for
    /// the previous account is dropped, whatever its role, and the revision the lookup starts
    /// from is returned.
    async fn switch_account(&self, uid: &str) -> Option<u64> {
        let mut state = self.state.write().await;
        if state.current.as_ref().is_some_and(|current| current.id == uid) {
            return None;
        }
        if let Some(previous) = state.current.take() {
            info!(user_id = %abbrev_id(&previous.id), "Signed-in account changed, dropping previous identity");
        }
        state.roster.clear();
        state.transactions.clear();
        state.revision += 1;
        Some(state.revision)
    }

    /// Make `identity` current and load what it may see.
    ///
    /// With `observed`, the identity is a background snapshot read at that revision. It is
    /// discarded if the session changed while it was being read.
    async fn adopt(&self, identity: Identity, observed: Option<u64>) {
        let elevated = identity.role.is_elevated();

        let roster = if elevated {
            match self.bounded(self.store.list_identities()).await {
                Ok(roster) if roster.iter().any(|i| i.id == identity.id) => roster,
                Ok(mut roster) => {
                    roster.push(identity.clone());
                    roster
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load roster");
                    vec![identity.clone()]
                }
            }
        } else {
            vec![identity.clone()]
        };

        let transactions = match self.bounded(self.store.list_transactions()).await {
            Ok(transactions) if elevated => transactions,
            Ok(transactions) => transactions.into_iter().filter(|t| t.user_id == identity.id).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to load transactions");
                Vec::new()
            }
        };

        debug!(
            user_id = %abbrev_id(&identity.id),
            role = %identity.role,
            roster = roster.len(),
            "Adopted identity"
        );
        let mut state = self.state.write().await;
        if observed.is_some_and(|revision| revision != state.revision) {
            debug!(user_id = %abbrev_id(&identity.id), "Session changed while loading, snapshot discarded");
            return;
        }
        state.current = Some(identity);
        state.roster = roster;
        state.transactions = transactions;
        state.revision += 1;
    }

    /// Forget the current identity. Base identities also lose their roster and transactions.
    async fn clear_identity(&self) {
        let mut state = self.state.write().await;
        let previous = state.current.take();
        if previous.is_some_and(|identity| !identity.role.is_elevated()) {
            state.roster.clear();
            state.transactions.clear();
        }
        state.revision += 1;
    }

    /// Bound a background store read by the load timeout.
    async fn bounded<T>(&self, read: impl Future<Output = store::Result<T>>) -> store::Result<T> {
        tokio::time::timeout(self.load_timeout, read)
            .await
            .unwrap_or_else(|_| Err(StoreError::Unavailable(format!("no response within {:?}", self.load_timeout))))
    }

    // ------------------------------------------------------------------------------------------
    // Sign-in
    // ------------------------------------------------------------------------------------------

    /// Run the interactive sign-in and look up or create the matching identity.
    ///
    /// Returns `Ok(None)` when the user dismissed the popup. Other authenticator failures are
    /// returned. Store failures never fail the sign-in: a local base-role identity is used instead.
    #[instrument(skip_all)]
    pub async fn sign_in_interactively(&self) -> Result<Option<Identity>> {
        let external = match self.authenticator.sign_in_popup().await {
            Ok(external) => external,
            Err(AuthError::PopupDismissed) => {
                info!("Sign-in popup dismissed");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let identity = match self.find_or_create(&external).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    user_id = %abbrev_id(&external.uid),
                    error = %e,
                    "Identity store unavailable during sign-in, using a local identity"
                );
                self.new_identity(&external, Role::User)
            }
        };

        self.adopt(identity.clone(), None).await;
        info!(user_id = %abbrev_id(&identity.id), role = %identity.role, "Signed in");
        Ok(Some(identity))
    }

    async fn find_or_create(&self, external: &ExternalIdentity) -> store::Result<Identity> {
        if let Some(identity) = self.store.get_identity(&external.uid).await? {
            return Ok(identity);
        }

        let bootstrap = self.credits.bootstrap_admin && !self.store.has_any_identity().await?;
        let identity = self.new_identity(external, if bootstrap { Role::Admin } else { Role::User });
        self.store.put_identity(&identity).await?;

        if bootstrap {
            info!(user_id = %abbrev_id(&identity.id), "First identity recorded, promoted to admin");
            if let Err(e) = self.seed_configuration().await {
                warn!(error = %e, "Failed to seed default configuration");
            }
        }
        Ok(identity)
    }

    async fn seed_configuration(&self) -> store::Result<()> {
        if self.store.get_configuration().await?.is_none() {
            let configuration = Configuration::default();
            self.store.put_configuration(&configuration).await?;
            self.state.write().await.configuration = configuration;
            info!("Seeded default configuration");
        }
        Ok(())
    }

    fn new_identity(&self, external: &ExternalIdentity, role: Role) -> Identity {
        let (plan, credits) = match role {
            Role::Admin => (Plan::Enterprise, self.credits.admin_starting_grant),
            _ => (Plan::Free, self.credits.starting_grant),
        };
        Identity {
            id: external.uid.clone(),
            name: external.display_name.clone().unwrap_or_else(|| "New User".to_string()),
            email: external.email.clone().unwrap_or_default(),
            role,
            plan,
            credits,
            used_credits: 0,
            status: AccountStatus::Active,
            avatar: external
                .photo_url
                .clone()
                .unwrap_or_else(|| format!("https://api.dicebear.com/7.x/avataaars/svg?seed={}", external.uid)),
        }
    }

    pub async fn sign_out(&self) -> Result<()> {
        let result = self.authenticator.sign_out().await;
        self.clear_identity().await;
        info!("Signed out");
        result.map_err(Error::from)
    }

    // ------------------------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------------------------

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    pub async fn current_identity(&self) -> Option<Identity> {
        self.state.read().await.current.clone()
    }

    pub async fn roster(&self) -> Vec<Identity> {
        self.state.read().await.roster.clone()
    }

    pub async fn configuration(&self) -> Configuration {
        self.state.read().await.configuration.clone()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.read().await.transactions.clone()
    }

    /// Whether the current identity may perform `action`
    pub async fn can(&self, action: Action) -> bool {
        self.state
            .read()
            .await
            .current
            .as_ref()
            .is_some_and(|identity| permissions::check(identity.role, action).is_allowed())
    }

    /// Views reachable by the current identity
    pub async fn navigation(&self) -> Vec<NavigationItem> {
        match &self.state.read().await.current {
            Some(identity) => permissions::navigation(identity.role),
            None => Vec::new(),
        }
    }

    /// The current identity, if it may perform `action`.
    pub(crate) async fn require(&self, action: Action) -> Result<Identity> {
        let identity = self.current_identity().await.ok_or(Error::Unauthenticated)?;
        if !permissions::check(identity.role, action).is_allowed() {
            return Err(Error::InsufficientPermissions {
                action,
                role: identity.role,
            });
        }
        Ok(identity)
    }

    // ------------------------------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------------------------------

    /// Generate a video for the current identity and deduct one credit on success.
    ///
    /// The balance check happens before any provider call. If the credit write fails after a
    /// successful generation, the deduction stays applied locally and queued, and the video is
    /// still returned.
    #[instrument(skip_all)]
    pub async fn generate_video(
        &self,
        request: &GenerationRequest,
        progress: &UnboundedSender<Progress>,
        cancel: &CancellationToken,
    ) -> Result<GeneratedVideo> {
        let identity = self.require(Action::GenerateVideos).await?;
        let workflow = self
            .workflow
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("video generation is not configured"))?;
        let configuration = self.configuration().await;

        let video = workflow
            .run(identity.credits, &configuration, request, progress, cancel)
            .await?;

        match self.deduct_one_credit(&identity.id).await {
            Ok(_) => {}
            Err(e) if e.is_write_diverged() => {
                warn!(user_id = %abbrev_id(&identity.id), error = %e, "Credit deduction not yet persisted");
            }
            Err(e) => return Err(e),
        }
        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::generation::{AspectRatio, GenerationError, Resolution, SourceImage, Stage};
    use crate::models::{ConfigurationPatch, IdentityUpdate};
    use crate::store::InMemoryStore;
    use crate::test_utils::{MockAuthenticator, MockVideoProvider, external_identity, identity_fixture};

    fn session(store: &InMemoryStore, auth: &MockAuthenticator) -> SessionService {
        SessionService::new(Arc::new(store.clone()), Arc::new(auth.clone()))
            .with_load_timeout(Duration::from_millis(200))
    }

    async fn eventually(session: &SessionService, check: impl Fn(&SessionState) -> bool) -> bool {
        for _ in 0..100 {
            if check(&session.snapshot().await) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// An [`InMemoryStore`] whose identity lookups can be held back after reading and whose
    /// configuration writes can be refused.
    #[derive(Clone, Default)]
    struct UnevenStore {
        inner: InMemoryStore,
        lookup_delay_ms: Arc<AtomicU64>,
        refuse_configuration_writes: Arc<AtomicBool>,
    }

    impl UnevenStore {
        fn new(inner: &InMemoryStore) -> Self {
            Self {
                inner: inner.clone(),
                ..Default::default()
            }
        }

        fn delay_lookups(&self, delay: Duration) {
            self.lookup_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        fn session(&self, auth: &MockAuthenticator) -> SessionService {
            SessionService::new(Arc::new(self.clone()), Arc::new(auth.clone()))
                .with_load_timeout(Duration::from_millis(500))
        }
    }

    #[async_trait]
    impl DocumentStore for UnevenStore {
        async fn get_identity(&self, id: &str) -> store::Result<Option<Identity>> {
            let found = self.inner.get_identity(id).await;
            let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            found
        }

        async fn list_identities(&self) -> store::Result<Vec<Identity>> {
            self.inner.list_identities().await
        }

        async fn has_any_identity(&self) -> store::Result<bool> {
            self.inner.has_any_identity().await
        }

        async fn put_identity(&self, identity: &Identity) -> store::Result<()> {
            self.inner.put_identity(identity).await
        }

        async fn update_identity(&self, id: &str, update: &IdentityUpdate) -> store::Result<()> {
            self.inner.update_identity(id, update).await
        }

        async fn get_configuration(&self) -> store::Result<Option<ConfigurationPatch>> {
            self.inner.get_configuration().await
        }

        async fn put_configuration(&self, configuration: &Configuration) -> store::Result<()> {
            if self.refuse_configuration_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("configuration writes refused".to_string()));
            }
            self.inner.put_configuration(configuration).await
        }

        async fn list_transactions(&self) -> store::Result<Vec<Transaction>> {
            self.inner.list_transactions().await
        }
    }

    #[tokio::test]
    async fn test_first_sign_in_bootstraps_admin_and_seeds_configuration() {
        let store = InMemoryStore::new();
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("founder")));
        let session = session(&store, &auth);
        session.initialize().await;

        let identity = session.sign_in_interactively().await.unwrap().unwrap();

        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.plan, Plan::Enterprise);
        assert!(store.snapshot_identity("founder").await.is_some());
        let seeded = store.snapshot_configuration().await.unwrap();
        assert_eq!(Configuration::from_stored(Some(&seeded)), Configuration::default());
        assert_eq!(session.roster().await.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_bootstrap_admin_kept_when_configuration_seed_fails() {
        let inner = InMemoryStore::new();
        let store = UnevenStore::new(&inner);
        store.refuse_configuration_writes.store(true, Ordering::SeqCst);
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("founder")));
        let session = store.session(&auth);

        let identity = session.sign_in_interactively().await.unwrap().unwrap();

        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.plan, Plan::Enterprise);
        assert_eq!(identity.credits, 9999);
        assert_eq!(session.current_identity().await.unwrap().role, Role::Admin);
        assert_eq!(inner.snapshot_identity("founder").await.unwrap().role, Role::Admin);
        assert!(inner.snapshot_configuration().await.is_none());
    }

    #[tokio::test]
    async fn test_later_sign_in_creates_user_with_starting_grant() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 100)])
            .await;
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("newcomer")));
        let session = session(&store, &auth);
        session.initialize().await;

        let identity = session.sign_in_interactively().await.unwrap().unwrap();

        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.plan, Plan::Free);
        assert_eq!(identity.credits, 5);
        assert_eq!(identity.used_credits, 0);
        assert!(store.snapshot_configuration().await.is_none());

        // Base identities only see themselves
        let roster = session.roster().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, "newcomer");
    }

    #[tokio::test]
    async fn test_bootstrap_can_be_disabled() {
        let store = InMemoryStore::new();
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("first")));
        let session = session(&store, &auth).with_credits(CreditsConfig {
            bootstrap_admin: false,
            ..Default::default()
        });

        let identity = session.sign_in_interactively().await.unwrap().unwrap();

        assert_eq!(identity.role, Role::User);
        assert!(store.snapshot_configuration().await.is_none());
    }

    #[tokio::test]
    async fn test_existing_identity_is_adopted_with_full_roster() {
        let store = InMemoryStore::new()
            .with_identities([
                identity_fixture("ed", Role::Editor, 50),
                identity_fixture("u1", Role::User, 2),
                identity_fixture("u2", Role::User, 0),
            ])
            .await;
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("ed")));
        let session = session(&store, &auth);

        let identity = session.sign_in_interactively().await.unwrap().unwrap();

        assert_eq!(identity.role, Role::Editor);
        assert_eq!(identity.credits, 50);
        assert_eq!(session.roster().await.len(), 3);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_dismissed_popup_is_not_an_error() {
        let store = InMemoryStore::new();
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Err(AuthError::PopupDismissed));
        let session = session(&store, &auth);

        assert!(session.sign_in_interactively().await.unwrap().is_none());
        assert!(session.current_identity().await.is_none());
    }

    #[tokio::test]
    async fn test_other_auth_failures_propagate() {
        let store = InMemoryStore::new();
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Err(AuthError::PopupBlocked));
        let session = session(&store, &auth);

        let err = session.sign_in_interactively().await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::PopupBlocked)));
    }

    #[test_log::test(tokio::test)]
    async fn test_unreachable_store_yields_local_identity() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("offline")));
        let session = session(&store, &auth);
        session.initialize().await;

        let identity = session.sign_in_interactively().await.unwrap().unwrap();

        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.credits, 5);
        assert_eq!(session.current_identity().await.unwrap().id, "offline");
        assert!(session.is_initialized().await);
        assert_eq!(session.configuration().await, Configuration::default());
    }

    #[tokio::test]
    async fn test_initialize_merges_stored_configuration_and_is_idempotent() {
        let patch: ConfigurationPatch =
            serde_json::from_str(r#"{"appName": "Stored", "apiKeys": {"veo": {"enabled": true}}}"#).unwrap();
        let store = InMemoryStore::new().with_configuration(patch).await;
        let auth = MockAuthenticator::default();
        let session = session(&store, &auth);

        session.initialize().await;
        session.initialize().await;

        let configuration = session.configuration().await;
        assert_eq!(configuration.app_name, "Stored");
        assert!(configuration.api_keys.veo.enabled);
        assert!(configuration.payment_methods.stripe.enabled);
        assert!(session.is_initialized().await);
        session.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_slow_store_falls_back_to_defaults() {
        let patch = ConfigurationPatch {
            app_name: Some("Slow".to_string()),
            ..Default::default()
        };
        let store = InMemoryStore::new().with_configuration(patch).await;
        store.set_latency(Some(Duration::from_secs(5))).await;
        let auth = MockAuthenticator::default();
        let session = SessionService::new(Arc::new(store.clone()), Arc::new(auth.clone()))
            .with_load_timeout(Duration::from_millis(20));

        session.initialize().await;

        assert_eq!(session.configuration().await.app_name, "Veo Animator SaaS");
        assert!(session.is_initialized().await);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_adopts_already_signed_in_identity() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("u1", Role::User, 3), identity_fixture("u2", Role::User, 1)])
            .await;
        let auth = MockAuthenticator::new(Some(external_identity("u1")));
        let session = session(&store, &auth);

        session.initialize().await;

        assert_eq!(session.current_identity().await.unwrap().id, "u1");
        assert_eq!(session.roster().await.len(), 1);
        session.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_listener_follows_auth_events_until_shutdown() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 10), identity_fixture("u1", Role::User, 3)])
            .await;
        let auth = MockAuthenticator::default();
        let session = session(&store, &auth);
        session.initialize().await;
        assert!(session.current_identity().await.is_none());

        auth.emit(Some(external_identity("admin")));
        assert!(eventually(&session, |state| state.current.is_some()).await);
        assert_eq!(session.roster().await.len(), 2);

        auth.emit(None);
        assert!(eventually(&session, |state| state.current.is_none()).await);
        // Staff sign-out keeps the roster
        assert_eq!(session.roster().await.len(), 2);

        session.shutdown().await;
        auth.emit(Some(external_identity("u1")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.current_identity().await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_switch_to_unknown_account_drops_previous_identity() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 10), identity_fixture("u1", Role::User, 3)])
            .await;
        let auth = MockAuthenticator::default();
        let session = session(&store, &auth);
        session.initialize().await;

        auth.emit(Some(external_identity("admin")));
        assert!(eventually(&session, |state| state.current.is_some()).await);
        assert!(session.can(Action::ManageUsers).await);

        auth.emit(Some(external_identity("stranger")));
        assert!(eventually(&session, |state| state.current.is_none()).await);
        assert!(session.roster().await.is_empty());
        assert!(session.transactions().await.is_empty());
        assert!(!session.can(Action::ManageUsers).await);
        session.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_same_account_event_does_not_reload_identity() {
        let inner = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 100), identity_fixture("u1", Role::User, 3)])
            .await;
        let store = UnevenStore::new(&inner);
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("u1")));
        let session = store.session(&auth);
        session.initialize().await;
        session.sign_in_interactively().await.unwrap();
        store.delay_lookups(Duration::from_millis(150));

        session.deduct_one_credit("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(session.current_identity().await.unwrap().credits, 2);
        session.deduct_one_credit("u1").await.unwrap();

        let current = session.current_identity().await.unwrap();
        assert_eq!((current.credits, current.used_credits), (1, 2));
        let stored = inner.snapshot_identity("u1").await.unwrap();
        assert_eq!((stored.credits, stored.used_credits), (1, 2));
        session.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_stale_listener_snapshot_is_discarded() {
        let inner = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 100), identity_fixture("u1", Role::User, 3)])
            .await;
        let store = UnevenStore::new(&inner);
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("u1")));
        let session = store.session(&auth);
        session.initialize().await;

        // The listener starts a slow lookup before the interactive sign-in completes
        store.delay_lookups(Duration::from_millis(150));
        auth.emit(Some(external_identity("u1")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.delay_lookups(Duration::ZERO);
        session.sign_in_interactively().await.unwrap();
        session.deduct_one_credit("u1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(session.current_identity().await.unwrap().credits, 2);
        session.deduct_one_credit("u1").await.unwrap();

        let stored = inner.snapshot_identity("u1").await.unwrap();
        assert_eq!((stored.credits, stored.used_credits), (1, 2));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_base_sign_out_clears_roster() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("u1", Role::User, 3)])
            .await;
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("u1")));
        let session = session(&store, &auth);
        session.sign_in_interactively().await.unwrap();

        session.sign_out().await.unwrap();

        assert!(session.current_identity().await.is_none());
        assert!(session.roster().await.is_empty());
        assert_eq!(auth.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn test_navigation_and_capabilities_follow_role() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("v", Role::Viewer, 0)])
            .await;
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("v")));
        let session = session(&store, &auth);
        assert!(session.navigation().await.is_empty());

        session.sign_in_interactively().await.unwrap();

        assert!(session.can(Action::ViewUsers).await);
        assert!(!session.can(Action::ManageUsers).await);
        assert!(!session.can(Action::GenerateVideos).await);
        assert_eq!(session.navigation().await.len(), 2);
    }

    fn generation_request() -> GenerationRequest {
        GenerationRequest {
            image: SourceImage::new(vec![0x89, 0x50, 0x4e, 0x47], "image/png").unwrap(),
            prompt: Some("the cat waves".to_string()),
            aspect_ratio: AspectRatio::Landscape,
            resolution: Resolution::Hd,
        }
    }

    async fn generating_session(store: &InMemoryStore, provider: &MockVideoProvider, id: &str) -> SessionService {
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity(id)));
        let workflow = GenerationWorkflow::builder()
            .provider(Arc::new(provider.clone()))
            .environment_key("env-key")
            .poll_interval(Duration::from_millis(1))
            .build();
        let session = session(store, &auth).with_workflow(workflow);
        session.initialize().await;
        session.sign_in_interactively().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_generation_deducts_exactly_one_credit() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 100), identity_fixture("u1", Role::User, 3)])
            .await;
        let provider = MockVideoProvider::succeeding(2);
        let session = generating_session(&store, &provider, "u1").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let video = session
            .generate_video(&generation_request(), &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(&video.bytes[..], MockVideoProvider::VIDEO_BYTES);
        let current = session.current_identity().await.unwrap();
        assert_eq!(current.credits, 2);
        assert_eq!(current.used_credits, 1);
        let stored = store.snapshot_identity("u1").await.unwrap();
        assert_eq!(stored.credits, 2);
        assert_eq!(stored.used_credits, 1);

        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.len() >= 3);
        assert_eq!(events.last().map(|e| e.stage), Some(Stage::Complete));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_generation_refused_without_credits() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 100), identity_fixture("u0", Role::User, 0)])
            .await;
        let provider = MockVideoProvider::succeeding(0);
        let session = generating_session(&store, &provider, "u0").await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let err = session
            .generate_video(&generation_request(), &tx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Generation(GenerationError::InsufficientCredits)));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(store.snapshot_identity("u0").await.unwrap().used_credits, 0);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_generation_requires_permission() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("viewer", Role::Viewer, 10)])
            .await;
        let provider = MockVideoProvider::succeeding(0);
        let session = generating_session(&store, &provider, "viewer").await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let err = session
            .generate_video(&generation_request(), &tx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::InsufficientPermissions {
                action: Action::GenerateVideos,
                ..
            }
        ));
        assert_eq!(provider.call_count(), 0);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_credits() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 100), identity_fixture("u1", Role::User, 3)])
            .await;
        let provider = MockVideoProvider::new();
        provider.push_submit(Err(crate::generation::ProviderError::Http {
            status: 500,
            message: "internal".to_string(),
        }));
        let session = generating_session(&store, &provider, "u1").await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let result = session
            .generate_video(&generation_request(), &tx, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Generation(_))));
        assert_eq!(session.current_identity().await.unwrap().credits, 3);
        assert_eq!(store.snapshot_identity("u1").await.unwrap().credits, 3);
        session.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_generation_returns_video_when_credit_write_fails() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("admin", Role::Admin, 100), identity_fixture("u1", Role::User, 3)])
            .await;
        let provider = MockVideoProvider::succeeding(0);
        let session = generating_session(&store, &provider, "u1").await;
        store.set_available(false);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let video = session
            .generate_video(&generation_request(), &tx, &CancellationToken::new())
            .await;

        assert!(video.is_ok());
        assert_eq!(session.current_identity().await.unwrap().credits, 2);
        assert_eq!(session.pending_writes().await.len(), 1);

        store.set_available(true);
        assert_eq!(session.flush_pending_writes().await.unwrap(), 1);
        assert_eq!(store.snapshot_identity("u1").await.unwrap().credits, 2);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_generation_without_workflow() {
        let store = InMemoryStore::new()
            .with_identities([identity_fixture("u1", Role::User, 3)])
            .await;
        let auth = MockAuthenticator::default();
        auth.push_sign_in(Ok(external_identity("u1")));
        let session = session(&store, &auth);
        session.sign_in_interactively().await.unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let err = session
            .generate_video(&generation_request(), &tx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
