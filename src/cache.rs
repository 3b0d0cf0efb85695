//! Geometry cache: dependency-keyed memoization of remote kernel builds.
//!
//! DESIGN
//! ======
//! One `GeometryCache` serves one consumer (for example one rendered part).
//! `cache(builder, key)` either hands back the resolved value immediately or
//! a `Suspended` future that completes when the build does. A build is started
//! at most once per distinct key while it is pending: equal keys attach to the
//! same shared future. Each build is also driven by a spawned task, so it runs
//! to completion whether or not anyone is awaiting it.
//!
//! The most recent key passed to `cache` is the current key. Asking for a
//! different key supersedes the pending build of the previous one: its entry
//! leaves the visible cache, the remote work is left to finish, and its result
//! is dropped on arrival. Until then the build is parked as an orphan, and a
//! `cache` call that returns to its key re-adopts it instead of starting a
//! second remote build for the same key. Resolved entries for other keys are
//! kept, up to `capacity`, least recently used first out.
//!
//! Builders run outside the lock, so a builder may read the cache. Driver
//! tasks are detached; a build reports through `settle`, not its `JoinHandle`.
//!
//! ERROR HANDLING
//! ==============
//! A rejected build is delivered to every waiter and then forgotten, so the
//! next call with the same key invokes the builder again. Failures never touch
//! other entries. Keeping the last good value on screen is the consumer's call.

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, Either, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::kernel::{KernelError, KernelHandle};
use crate::key::DependencyKey;

/// Resolved entries retained when no capacity is given.
pub const DEFAULT_CACHE_CAPACITY: usize = 8;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("remote build failed: {0}")]
    Remote(#[from] KernelError),
    #[error("build for {key} superseded")]
    Superseded { key: DependencyKey },
}

impl ErrorCode for BuildError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Remote(_) => "E_REMOTE_BUILD_FAILURE",
            Self::Superseded { .. } => "E_BUILD_SUPERSEDED",
        }
    }
}

// =============================================================================
// ENTRIES
// =============================================================================

type SharedBuild<V> = Shared<BoxFuture<'static, Result<V, BuildError>>>;

enum EntryState<V> {
    Pending(SharedBuild<V>),
    Resolved(V),
}

struct Entry<V> {
    key: DependencyKey,
    generation: u64,
    state: EntryState<V>,
    /// Started by `preload` and not yet claimed by `cache`; immune to supersession.
    preloaded: bool,
    last_used: u64,
}

/// A superseded or cleared build whose remote work is still running.
struct Orphan<V> {
    key: DependencyKey,
    generation: u64,
    shared: SharedBuild<V>,
}

struct CacheInner<V> {
    entries: Vec<Entry<V>>,
    orphans: Vec<Orphan<V>>,
    current: Option<DependencyKey>,
    next_generation: u64,
    clock: u64,
    capacity: usize,
}

impl<V: Clone> CacheInner<V> {
    fn find_mut(&mut self, key: &DependencyKey) -> Option<&mut Entry<V>> {
        self.entries.iter_mut().find(|e| e.key == *key)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Park the pending build of the current key before `next` takes over.
    fn supersede(&mut self, next: &DependencyKey) {
        if let Some(previous) = self.current.take() {
            let index = self
                .entries
                .iter()
                .position(|e| e.key == previous && !e.preloaded && matches!(e.state, EntryState::Pending(_)));
            if let Some(index) = index {
                let entry = self.entries.remove(index);
                self.orphan(entry);
                debug!(superseded = %previous, next = %next, "pending build superseded");
            }
        }
        self.current = Some(next.clone());
    }

    /// Hide `entry` from lookups. A pending build keeps its generation so its
    /// driver can still find it if the key is wanted again.
    fn orphan(&mut self, entry: Entry<V>) {
        if let EntryState::Pending(shared) = entry.state {
            self.orphans.push(Orphan { key: entry.key, generation: entry.generation, shared });
        }
    }

    /// Bring a still-running orphaned build for `key` back into the cache.
    fn adopt(&mut self, key: &DependencyKey) -> Option<(u64, SharedBuild<V>)> {
        self.orphans.retain(|o| o.shared.peek().is_none());
        let index = self.orphans.iter().position(|o| o.key == *key)?;
        let orphan = self.orphans.remove(index);
        let last_used = self.tick();
        self.entries.push(Entry {
            key: orphan.key,
            generation: orphan.generation,
            state: EntryState::Pending(orphan.shared.clone()),
            preloaded: false,
            last_used,
        });
        Some((orphan.generation, orphan.shared))
    }

    /// True if `key` has an entry or a running orphaned build. An orphan found
    /// here comes back as a preload.
    fn claim_for_preload(&mut self, key: &DependencyKey) -> bool {
        if self.find_mut(key).is_some() {
            return true;
        }
        if self.adopt(key).is_none() {
            return false;
        }
        if let Some(entry) = self.find_mut(key) {
            entry.preloaded = true;
        }
        true
    }

    fn insert_pending(&mut self, key: DependencyKey, shared: SharedBuild<V>, preloaded: bool) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let last_used = self.tick();
        self.entries.push(Entry { key, generation, state: EntryState::Pending(shared), preloaded, last_used });
        generation
    }

    fn evict(&mut self) {
        loop {
            let resolved = self
                .entries
                .iter()
                .filter(|e| matches!(e.state, EntryState::Resolved(_)))
                .count();
            if resolved <= self.capacity {
                return;
            }
            let victim = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| matches!(e.state, EntryState::Resolved(_)) && self.current.as_ref() != Some(&e.key))
                .min_by_key(|(_, e)| e.last_used)
                .map(|(i, _)| i);
            let Some(victim) = victim else {
                return;
            };
            let entry = self.entries.remove(victim);
            debug!(key = %entry.key, "evicted resolved entry");
        }
    }
}

/// Record a finished build. Returns false if its entry is gone (superseded or
/// cleared), meaning the result must be discarded.
fn settle<V: Clone>(inner: &Mutex<CacheInner<V>>, generation: u64, result: &Result<V, BuildError>) -> bool {
    let mut inner = inner.lock();
    let Some(index) = inner.entries.iter().position(|e| e.generation == generation) else {
        inner.orphans.retain(|o| o.generation != generation);
        return false;
    };
    match result {
        Ok(value) => {
            let entry = &mut inner.entries[index];
            if matches!(entry.state, EntryState::Pending(_)) {
                entry.state = EntryState::Resolved(value.clone());
                debug!(key = %entry.key, "build resolved");
                inner.evict();
            }
        }
        Err(e) => {
            let entry = inner.entries.remove(index);
            warn!(key = %entry.key, error = %e, code = e.error_code(), "build rejected; entry dropped");
        }
    }
    true
}

// =============================================================================
// CACHE
// =============================================================================

/// Memoizes asynchronous kernel builds by dependency key.
pub struct GeometryCache<V> {
    kernel: KernelHandle,
    inner: Arc<Mutex<CacheInner<V>>>,
}

impl<V> Clone for GeometryCache<V> {
    fn clone(&self) -> Self {
        Self { kernel: Arc::clone(&self.kernel), inner: Arc::clone(&self.inner) }
    }
}

impl<V> GeometryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(kernel: KernelHandle) -> Self {
        Self::with_capacity(kernel, DEFAULT_CACHE_CAPACITY)
    }

    /// `capacity` bounds the resolved entries kept besides the current one.
    #[must_use]
    pub fn with_capacity(kernel: KernelHandle, capacity: usize) -> Self {
        let inner =
            CacheInner { entries: Vec::new(), orphans: Vec::new(), current: None, next_generation: 0, clock: 0, capacity };
        Self { kernel, inner: Arc::new(Mutex::new(inner)) }
    }

    /// Resolve `key`, invoking `builder` only when no build for it exists,
    /// visible or orphaned.
    pub fn cache<F, Fut>(&self, builder: F, key: impl Into<DependencyKey>) -> Fetch<V>
    where
        F: FnOnce(KernelHandle) -> Fut,
        Fut: Future<Output = Result<V, KernelError>> + Send + 'static,
    {
        let key = key.into();
        if let Some(fetch) = self.lookup(&mut self.inner.lock(), &key) {
            return fetch;
        }

        debug!(%key, "cache miss; starting build");
        let shared = start(builder, Arc::clone(&self.kernel));

        let mut inner = self.inner.lock();
        if let Some(fetch) = self.lookup(&mut inner, &key) {
            debug!(%key, "concurrent build won; dropping ours unpolled");
            return fetch;
        }
        let generation = inner.insert_pending(key.clone(), shared.clone(), false);
        drop(inner);

        self.drive(generation, &shared);
        Fetch::Suspended(Suspended { key, generation, shared, inner: Arc::clone(&self.inner) })
    }

    /// Make `key` current and answer it from an entry or an orphan, if either
    /// exists.
    fn lookup(&self, inner: &mut CacheInner<V>, key: &DependencyKey) -> Option<Fetch<V>> {
        if inner.current.as_ref() != Some(key) {
            inner.supersede(key);
        }

        let now = inner.tick();
        if let Some(entry) = inner.find_mut(key) {
            entry.last_used = now;
            entry.preloaded = false;
            return Some(match &entry.state {
                EntryState::Resolved(value) => {
                    debug!(%key, "cache hit");
                    Fetch::Ready(value.clone())
                }
                EntryState::Pending(shared) => {
                    debug!(%key, "attached to pending build");
                    Fetch::Suspended(self.suspended(key, entry.generation, shared.clone()))
                }
            });
        }

        let (generation, shared) = inner.adopt(key)?;
        debug!(%key, "re-adopted superseded build");
        Some(Fetch::Suspended(self.suspended(key, generation, shared)))
    }

    fn suspended(&self, key: &DependencyKey, generation: u64, shared: SharedBuild<V>) -> Suspended<V> {
        Suspended { key: key.clone(), generation, shared, inner: Arc::clone(&self.inner) }
    }

    /// Start building `key` now, without waiting, so a later `cache` call hits.
    pub fn preload<F, Fut>(&self, builder: F, key: impl Into<DependencyKey>)
    where
        F: FnOnce(KernelHandle) -> Fut,
        Fut: Future<Output = Result<V, KernelError>> + Send + 'static,
    {
        let key = key.into();
        if self.inner.lock().claim_for_preload(&key) {
            return;
        }

        debug!(%key, "preloading");
        let shared = start(builder, Arc::clone(&self.kernel));

        let mut inner = self.inner.lock();
        if inner.claim_for_preload(&key) {
            return;
        }
        let generation = inner.insert_pending(key, shared.clone(), true);
        drop(inner);

        self.drive(generation, &shared);
    }

    /// The resolved value for `key`, if any. Never starts or waits on a build.
    #[must_use]
    pub fn peek(&self, key: impl Into<DependencyKey>) -> Option<V> {
        let key = key.into();
        self.inner
            .lock()
            .entries
            .iter()
            .find(|e| e.key == key)
            .and_then(|e| match &e.state {
                EntryState::Resolved(value) => Some(value.clone()),
                EntryState::Pending(_) => None,
            })
    }

    /// True while a build for `key` is in flight and still wanted.
    #[must_use]
    pub fn is_pending(&self, key: impl Into<DependencyKey>) -> bool {
        let key = key.into();
        self.inner
            .lock()
            .entries
            .iter()
            .any(|e| e.key == key && matches!(e.state, EntryState::Pending(_)))
    }

    /// Forget `key`. A pending build for it is discarded when it lands unless
    /// the key is asked for again first.
    pub fn clear(&self, key: impl Into<DependencyKey>) -> bool {
        let key = key.into();
        let mut inner = self.inner.lock();
        let Some(index) = inner.entries.iter().position(|e| e.key == key) else {
            return false;
        };
        let entry = inner.entries.remove(index);
        inner.orphan(entry);
        true
    }

    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        let entries = std::mem::take(&mut inner.entries);
        for entry in entries {
            inner.orphan(entry);
        }
        inner.current = None;
    }

    /// Number of visible entries, pending or resolved.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the build to completion on the ambient runtime. Without one, the
    /// build only advances while a `Suspended` is being polled.
    fn drive(&self, generation: u64, shared: &SharedBuild<V>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime; build advances only while awaited");
            return;
        };
        let inner = Arc::clone(&self.inner);
        let shared = shared.clone();
        drop(runtime.spawn(async move {
            let result = shared.await;
            if !settle(&inner, generation, &result) && result.is_ok() {
                debug!(generation, "stale build result discarded");
            }
        }));
    }
}

fn start<V, F, Fut>(builder: F, kernel: KernelHandle) -> SharedBuild<V>
where
    V: Clone + Send + Sync + 'static,
    F: FnOnce(KernelHandle) -> Fut,
    Fut: Future<Output = Result<V, KernelError>> + Send + 'static,
{
    let build = builder(kernel);
    async move { build.await.map_err(BuildError::from) }
        .boxed()
        .shared()
}

// =============================================================================
// FETCH
// =============================================================================

/// Outcome of `GeometryCache::cache`: a value now, or a build to wait on.
pub enum Fetch<V> {
    Ready(V),
    Suspended(Suspended<V>),
}

impl<V> Fetch<V> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The value if it was available without suspending.
    #[must_use]
    pub fn ready(self) -> Option<V> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Suspended(_) => None,
        }
    }
}

impl<V> IntoFuture for Fetch<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = Result<V, BuildError>;
    type IntoFuture = Either<std::future::Ready<Result<V, BuildError>>, Suspended<V>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Ready(value) => Either::Left(std::future::ready(Ok(value))),
            Self::Suspended(suspended) => Either::Right(suspended),
        }
    }
}

/// A caller's pending claim on a build.
///
/// Resolves to the built value, the build's error, or `Superseded` if the key
/// was replaced or cleared before the result landed.
pub struct Suspended<V> {
    key: DependencyKey,
    generation: u64,
    shared: SharedBuild<V>,
    inner: Arc<Mutex<CacheInner<V>>>,
}

impl<V> Suspended<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    /// The outcome if the build has already finished; never waits.
    #[must_use]
    pub fn try_resolve(&self) -> Option<Result<V, BuildError>> {
        let result = self.shared.peek()?.clone();
        Some(self.finish(result))
    }

    fn finish(&self, result: Result<V, BuildError>) -> Result<V, BuildError> {
        let live = settle(&self.inner, self.generation, &result);
        match result {
            Ok(value) if live => Ok(value),
            Ok(_) => Err(BuildError::Superseded { key: self.key.clone() }),
            Err(e) => Err(e),
        }
    }
}

impl<V> Future for Suspended<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = Result<V, BuildError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.shared.poll_unpin(cx) {
            Poll::Ready(result) => Poll::Ready(this.finish(result)),
            Poll::Pending => Poll::Pending,
        }
    }
}
