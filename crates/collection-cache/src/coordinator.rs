use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::config::CacheConfig;
use crate::error::FetchResult;
use crate::guard::Guard;
use crate::params::{ParamsSnapshot, ParamsSource};
use crate::status::{Status, with_status};
use crate::store::{EntryStore, Identifiable};
use crate::time::Instant;
use crate::utils::CallOnDrop;

/// Produces the entries for one parameter snapshot.
///
/// The request receives the plain snapshot it should fetch for, together with the
/// [`Guard`] bound to this invocation. It should check [`Guard::is_valid`] before any side
/// effect with irreversible consequences; the coordinator independently enforces the
/// invariant at merge time regardless, so a request that ignores its guard can at worst
/// waste work, never corrupt the store.
pub trait CollectionRequest: Send + Sync + 'static {
    /// The identity-bearing item this request fetches.
    type Entry: Identifiable + Send + Sync + 'static;

    /// Fetches the entries for `params`.
    fn fetch<'a>(
        &'a self,
        params: &'a ParamsSnapshot,
        guard: Guard,
    ) -> BoxFuture<'a, FetchResult<Vec<Self::Entry>>>;
}

/// Keeps an identity-keyed collection of entries in sync with a parameter source.
///
/// The coordinator owns the entry store and the fetch [`Status`] exclusively; readers only
/// ever get owned views. It cycles through *generations*: every distinct parameter
/// snapshot supersedes the previous generation, clears the store, and runs a fresh guarded
/// fetch. Independently, [`refresh_if_stale`](Self::refresh_if_stale) re-fetches the
/// current parameters in the background once the last result has outlived
/// [`CacheConfig::stale_after`].
///
/// See the crate-level documentation for the full design.
pub struct CollectionCache<R: CollectionRequest> {
    config: CacheConfig,
    source: Arc<dyn ParamsSource>,
    request: R,

    store: Mutex<EntryStore<R::Entry>>,
    status: Mutex<Status>,

    /// The snapshot of the most recently observed parameter change.
    last_params: Mutex<Option<ParamsSnapshot>>,
    /// Live generation counter. Bumping it permanently invalidates every generation guard
    /// handed out before.
    generation: Arc<AtomicU64>,
    /// In-flight flag for background refreshes, which do not set `Status::pending`.
    refreshing: Arc<AtomicBool>,
}

impl<R: CollectionRequest> CollectionCache<R> {
    /// Creates a new collection cache.
    ///
    /// The coordinator does not observe the parameter source by itself. The surrounding
    /// wiring must invoke [`params_changed`](Self::params_changed) once immediately after
    /// construction to establish the initial generation, and again whenever the resolved
    /// parameters may have changed; and should invoke
    /// [`refresh_if_stale`](Self::refresh_if_stale) whenever the collection becomes active
    /// again (there is no internal timer).
    pub fn new(source: Arc<dyn ParamsSource>, request: R, config: CacheConfig) -> Self {
        Self {
            config,
            source,
            request,
            store: Mutex::new(EntryStore::new()),
            status: Mutex::new(Status::default()),
            last_params: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configuration this cache was created with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// All cached entries, in no guaranteed order.
    pub fn entries(&self) -> Vec<Arc<R::Entry>> {
        self.store.lock().unwrap().all()
    }

    /// Returns the cached entry with the given identity, if present.
    pub fn get(&self, id: &<R::Entry as Identifiable>::Id) -> Option<Arc<R::Entry>> {
        self.store.lock().unwrap().get(id)
    }

    /// Whether an entry with the given identity is cached.
    pub fn contains(&self, id: &<R::Entry as Identifiable>::Id) -> bool {
        self.store.lock().unwrap().contains(id)
    }

    /// An owned view of the current fetch status.
    pub fn status(&self) -> Status {
        self.status.lock().unwrap().clone()
    }

    /// Merges externally produced items into the store.
    ///
    /// Merging is additive: existing entries not present in `items` are preserved, and an
    /// empty batch is a no-op.
    pub fn update(&self, items: impl IntoIterator<Item = R::Entry>) {
        self.store.lock().unwrap().merge(items);
    }

    /// Clears all entries and restores the status to its never-fetched state.
    ///
    /// This does not supersede an in-flight fetch; only a parameter change does.
    pub fn reset(&self) {
        self.store.lock().unwrap().clear();
        *self.status.lock().unwrap() = Status::default();
    }

    /// Notifies the coordinator that the resolved parameters may have changed.
    ///
    /// Resolves a fresh snapshot and compares it to the last observed one by deep
    /// structural equality; if they are equal this is a no-op. Otherwise the current
    /// generation is superseded: its guard turns permanently invalid, the store is
    /// cleared, the status is reset, and a new guarded fetch runs for the fresh snapshot.
    ///
    /// The fetch outcome is returned to the caller unchanged and, for the error case, also
    /// recorded in [`Status::error`], unless this fetch was itself superseded while in
    /// flight, in which case its result is discarded and the status is left to the newer
    /// generation.
    pub async fn params_changed(&self) -> FetchResult<()> {
        let params = self.source.resolve();

        {
            let mut last_params = self.last_params.lock().unwrap();
            if last_params.as_ref() == Some(&params) {
                tracing::trace!("parameters unchanged, keeping current generation");
                return Ok(());
            }
            *last_params = Some(params.clone());
        }

        // Supersede the previous generation before touching any state it could still see.
        let token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = Guard::generation(token, Arc::clone(&self.generation));
        tracing::debug!(generation = token, "parameters changed, fetching");

        self.store.lock().unwrap().clear();
        *self.status.lock().unwrap() = Status::default();

        let result = with_status(
            &self.status,
            &guard,
            self.request.fetch(&params, guard.clone()),
        )
        .await;

        match result {
            Ok(items) => {
                let mut store = self.store.lock().unwrap();
                if guard.is_valid() {
                    store.merge(items);
                } else {
                    tracing::debug!(generation = token, "discarding superseded fetch result");
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Re-fetches the current parameters in the background if the last result is stale.
    ///
    /// Meant to be wired to an external activation signal. Acts only when a fetch has
    /// finished before, no primary fetch is pending, the result has outlived
    /// [`CacheConfig::stale_after`], and no other background refresh is in flight.
    ///
    /// On success the results are merged additively and `finished_at` moves forward, both
    /// gated on the parameters still resolving to the captured snapshot at completion
    /// time. This path never sets `pending` and never clears the store. Failures are
    /// logged and swallowed; they do not touch [`Status::error`] and do not propagate.
    pub async fn refresh_if_stale(&self) {
        {
            let status = self.status.lock().unwrap();
            if !status.is_stale(self.config.stale_after, Instant::now()) {
                return;
            }
        }

        if self.refreshing.swap(true, Ordering::SeqCst) {
            tracing::trace!("a background refresh is already running");
            return;
        }
        // Released on drop, so a refresh future that is dropped mid-await cannot leak
        // the flag.
        let _done_token = {
            let refreshing = Arc::clone(&self.refreshing);
            CallOnDrop::new(move || refreshing.store(false, Ordering::SeqCst))
        };

        let params = self.source.resolve();
        let guard = Guard::snapshot(params.clone(), Arc::clone(&self.source));
        tracing::debug!("entries are stale, refreshing in the background");

        match self.request.fetch(&params, guard.clone()).await {
            Ok(items) => {
                let mut store = self.store.lock().unwrap();
                if guard.is_valid() {
                    store.merge(items);
                    self.status.lock().unwrap().finished_at = Some(Instant::now());
                } else {
                    tracing::debug!("discarding background refresh for outdated parameters");
                }
            }
            Err(err) => {
                let dynerr: &dyn std::error::Error = &err;
                tracing::warn!(error = dynerr, "background refresh failed");
            }
        }
    }
}

impl<R: CollectionRequest> fmt::Debug for CollectionCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .store
            .try_lock()
            .map(|store| store.len())
            .unwrap_or_default();
        f.debug_struct("CollectionCache")
            .field("config", &self.config)
            .field("entries", &entries)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("refreshing", &self.refreshing.load(Ordering::SeqCst))
            .finish()
    }
}
