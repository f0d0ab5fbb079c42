use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xorlist_config::Config;
use xorlist_contracts::{CurrentUser, Identifier};
use xorlist_kernel::is_fresher;

use crate::error::SyncError;
use crate::fetcher::RemoteFetcher;
use crate::identity::{ClientError, IdentityResolver, MessagingClient, StaticIdentityClient};
use crate::listener::{Dispatcher, ThreadDispatcher, UpdateListener};
use crate::store::PersistentStore;

pub struct ManagerParts {
    pub store: PersistentStore,
    pub fetcher: RemoteFetcher,
    pub resolver: IdentityResolver,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub fetch_on_resolve: bool,
}

impl ManagerParts {
    /// Builds every collaborator from configuration. A store that cannot be
    /// opened degrades to an in-memory one; only a missing notification
    /// thread is fatal.
    pub fn from_config<F>(cfg: &Config, client_factory: F) -> Result<Self, String>
    where
        F: FnOnce() -> Result<Arc<dyn MessagingClient>, ClientError>,
    {
        let store = match PersistentStore::from_config(&cfg.store) {
            Ok(store) => store,
            Err(e) => {
                error!(
                    target: "xorlist::store",
                    error = %e,
                    "whitelist store unavailable, falling back to memory"
                );
                PersistentStore::memory(xorlist_contracts::SnapshotLocation {
                    namespace: cfg.store.namespace.clone(),
                    key: cfg.store.key.clone(),
                })
            }
        };
        let dispatcher = ThreadDispatcher::spawn()
            .map_err(|e| format!("spawn notification context failed: {e}"))?;
        Ok(Self {
            store,
            fetcher: RemoteFetcher::new(&cfg.endpoint),
            resolver: IdentityResolver::new(
                client_factory,
                Duration::from_millis(cfg.identity.timeout_ms),
            ),
            dispatcher: Arc::new(dispatcher),
            fetch_on_resolve: cfg.identity.fetch_on_resolve,
        })
    }

    pub fn from_config_static(cfg: &Config) -> Result<Self, String> {
        let client = StaticIdentityClient::new(cfg.identity.user_id.map(CurrentUser::new));
        Self::from_config(cfg, move || Ok(Arc::new(client) as Arc<dyn MessagingClient>))
    }
}

/// Keeps the last known whitelist and drives resolve -> fetch -> persist ->
/// notify. Clones share state.
#[derive(Clone)]
pub struct WhitelistManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    identity: watch::Sender<Option<Identifier>>,
    store: PersistentStore,
    fetcher: RemoteFetcher,
    resolver: IdentityResolver,
    dispatcher: Arc<dyn Dispatcher>,
    fetch_on_resolve: bool,
    runtime: Handle,
    issued: AtomicU64,
    persisted: tokio::sync::Mutex<u64>,
}

struct State {
    whitelist: Vec<Identifier>,
    listener: Option<Arc<dyn UpdateListener>>,
    last_applied: u64,
    cancel: CancellationToken,
}

impl WhitelistManager {
    pub fn new(parts: ManagerParts, runtime: Handle) -> Self {
        let whitelist = parts.store.load();
        info!(
            target: "xorlist::manager",
            cached = whitelist.len(),
            endpoint = parts.fetcher.endpoint(),
            "whitelist manager starting"
        );
        let (identity, _) = watch::channel(None);
        let manager = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    whitelist,
                    listener: None,
                    last_applied: 0,
                    cancel: CancellationToken::new(),
                }),
                identity,
                store: parts.store,
                fetcher: parts.fetcher,
                resolver: parts.resolver,
                dispatcher: parts.dispatcher,
                fetch_on_resolve: parts.fetch_on_resolve,
                runtime,
                issued: AtomicU64::new(0),
                persisted: tokio::sync::Mutex::new(0),
            }),
        };
        manager.inner.start_resolution();
        manager
    }

    pub fn instance<F>(init: F) -> &'static WhitelistManager
    where
        F: FnOnce() -> WhitelistManager,
    {
        GLOBAL.get_or_init(init)
    }

    pub fn get_instance() -> Option<&'static WhitelistManager> {
        GLOBAL.get()
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn UpdateListener>>) {
        self.inner.lock().listener = listener;
    }

    pub fn whitelist(&self) -> Vec<Identifier> {
        self.inner.lock().whitelist.clone()
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.inner.lock().whitelist.contains(&id)
    }

    pub fn current_user_id(&self) -> Option<Identifier> {
        *self.inner.identity.borrow()
    }

    pub fn subscribe_identity(&self) -> watch::Receiver<Option<Identifier>> {
        self.inner.identity.subscribe()
    }

    pub fn fetch_whitelist(&self, user_id: &str) -> u64 {
        self.inner.start_fetch(user_id.to_string())
    }

    pub fn refresh(&self) -> Option<u64> {
        match self.current_user_id() {
            Some(id) => Some(self.fetch_whitelist(&id.to_string())),
            None => {
                self.inner.notify_failure(SyncError::Resolution(
                    "current user is not resolved yet".to_string(),
                ));
                None
            }
        }
    }

    /// In-flight resolutions and fetches finish without touching state or
    /// notifying anyone.
    pub fn cancel_pending(&self) {
        let mut state = self.inner.lock();
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        debug!(target: "xorlist::manager", "pending operations cancelled");
    }

    pub fn ptr_eq(&self, other: &WhitelistManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_token(&self) -> CancellationToken {
        self.lock().cancel.child_token()
    }

    fn start_resolution(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let cancel = self.cancel_token();
        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target: "xorlist::identity", "identity resolution cancelled");
                    return;
                }
                outcome = inner.resolver.resolve_current_user_id() => outcome,
            };
            match outcome {
                Ok(user_id) => {
                    {
                        // cancel_pending swaps the token under this lock.
                        let _state = inner.lock();
                        if cancel.is_cancelled() {
                            debug!(target: "xorlist::identity", user_id, "identity resolved after cancel, ignored");
                            return;
                        }
                        inner.identity.send_replace(Some(user_id));
                    }
                    info!(target: "xorlist::identity", user_id, "current user resolved");
                    if inner.fetch_on_resolve {
                        inner.start_fetch(user_id.to_string());
                    }
                }
                Err(e) => {
                    warn!(target: "xorlist::identity", error = %e, "identity resolution failed");
                    inner.notify_failure_unless(&cancel, e);
                }
            }
        });
    }

    fn start_fetch(self: &Arc<Self>, user_id: String) -> u64 {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(self);
        let cancel = self.cancel_token();
        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target: "xorlist::fetch", generation, "fetch cancelled");
                    return;
                }
                outcome = inner.fetcher.fetch(&user_id) => outcome,
            };
            match outcome {
                Ok(ids) => inner.reconcile(generation, &cancel, ids).await,
                Err(e) => {
                    warn!(target: "xorlist::fetch", generation, user_id, error = %e, "whitelist fetch failed");
                    inner.notify_failure_unless(&cancel, e);
                }
            }
        });
        generation
    }

    async fn reconcile(
        self: &Arc<Self>,
        generation: u64,
        cancel: &CancellationToken,
        ids: Vec<Identifier>,
    ) {
        {
            let mut state = self.lock();
            if cancel.is_cancelled() {
                debug!(target: "xorlist::fetch", generation, "fetch completed after cancel, ignored");
                return;
            }
            if !is_fresher(generation, state.last_applied) {
                debug!(
                    target: "xorlist::fetch",
                    generation,
                    applied = state.last_applied,
                    "discarding stale fetch result"
                );
                return;
            }
            state.last_applied = generation;
            state.whitelist = ids.clone();
        }

        let mut persisted = self.persisted.lock().await;
        if !is_fresher(generation, *persisted) {
            return;
        }
        let store = self.store.clone();
        let snapshot = ids.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {
                debug!(target: "xorlist::store", generation, count = ids.len(), "whitelist persisted")
            }
            Ok(Err(e)) => {
                warn!(target: "xorlist::store", generation, error = %e, "whitelist persist failed")
            }
            Err(e) => {
                warn!(target: "xorlist::store", generation, error = %e, "whitelist persist task failed")
            }
        }
        *persisted = generation;
        info!(target: "xorlist::manager", generation, count = ids.len(), "whitelist updated");
        self.notify_updated(ids);
    }

    fn notify_failure_unless(self: &Arc<Self>, cancel: &CancellationToken, error: SyncError) {
        if cancel.is_cancelled() {
            debug!(target: "xorlist::manager", error = %error, "failure after cancel, not reported");
            return;
        }
        self.notify_failure(error);
    }

    fn notify_updated(self: &Arc<Self>, whitelist: Vec<Identifier>) {
        let inner = Arc::clone(self);
        self.dispatcher.post(Box::new(move || match inner.current_listener() {
            Some(listener) => listener.on_updated(&whitelist),
            None => debug!(target: "xorlist::manager", "no listener, update dropped"),
        }));
    }

    fn notify_failure(self: &Arc<Self>, error: SyncError) {
        let inner = Arc::clone(self);
        self.dispatcher.post(Box::new(move || match inner.current_listener() {
            Some(listener) => listener.on_update_failed(&error),
            None => debug!(target: "xorlist::manager", error = %error, "no listener, failure dropped"),
        }));
    }

    fn current_listener(&self) -> Option<Arc<dyn UpdateListener>> {
        self.lock().listener.clone()
    }
}

pub struct ManagerCell {
    cell: OnceLock<WhitelistManager>,
}

impl ManagerCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_init<F>(&self, init: F) -> &WhitelistManager
    where
        F: FnOnce() -> WhitelistManager,
    {
        self.cell.get_or_init(init)
    }

    pub fn get(&self) -> Option<&WhitelistManager> {
        self.cell.get()
    }
}

impl Default for ManagerCell {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: ManagerCell = ManagerCell::new();
