use crate::comparator::ByValue;
use crate::comparator::Comparator;
use crate::invocation::Invocation;
use crate::invocation::LoaderFuture;
use crate::invocation::PendingOperation;
use crate::policy::default_policy;
use crate::policy::Expiry;
use crate::policy::Outcome;
use crate::policy::StalePolicy;
use crate::policy::DEFAULT_TIMEOUT;
use std::marker::PhantomData;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Notification hook, called with the settled value or error of the most
/// recent pending operation.
pub type SettleHook<V, E> = Arc<dyn Fn(Result<&V, &E>) + Send + Sync>;

type AbortFn = Box<dyn FnOnce() + Send>;

/// Loader errors.
#[derive(Debug, Error)]
pub enum LoaderError<E> {
    /// The wrapped function raised this error, now or from its pending operation.
    #[error("{0}")]
    Exception(E),
    /// Notification is required but no hook has been bound.
    #[error(
        "no notification mechanism available, loader invoked outside any observable call context"
    )]
    NoNotifier,
    /// A pending operation was returned, but there is no runtime to await it on.
    #[error("no tokio runtime available to await a pending operation")]
    NoRuntime,
}

/// Loader configuration.
pub struct LoaderOptions<V, E> {
    timeout: Duration,
    expiry: Expiry,
    loading: Option<StalePolicy<V, E>>,
    on_settled: Option<SettleHook<V, E>>,
    require_notifier: bool,
    runtime: Option<Handle>,
}

impl<V, E> Default for LoaderOptions<V, E> {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            expiry: Expiry::default(),
            loading: None,
            on_settled: None,
            require_notifier: false,
            runtime: None,
        }
    }
}

impl<V, E> LoaderOptions<V, E> {
    /// How long a stale value is shown while a newer operation is pending.
    /// Zero shows no stale value at all.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How a stale value expires.
    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    /// Replace the built-in stale value policy.
    pub fn loading<P>(mut self, policy: P) -> Self
    where
        P: Fn(&Outcome<V, E>, Duration) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        self.loading = Some(Arc::new(policy));
        self
    }

    /// Call `hook` whenever the current pending operation settles.
    pub fn on_settled<H>(mut self, hook: H) -> Self
    where
        H: Fn(Result<&V, &E>) + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(hook));
        self
    }

    /// Refuse calls until a notification hook is bound.
    pub fn require_notifier(mut self) -> Self {
        self.require_notifier = true;
        self
    }

    /// Spawn settle continuations on this runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }
}

struct Pending {
    id: u64,
    since: Instant,
    abort: Option<AbortFn>,
}

/// Everything a loader remembers between calls.
struct Slot<K, V, E> {
    outcome: Outcome<V, E>,
    pending: Option<Pending>,
    last_key: Option<K>,
    call_id: u64,
    notifier: Option<SettleHook<V, E>>,
    expiry_timer: Option<AbortHandle>,
}

impl<K, V, E> Slot<K, V, E> {
    fn is_current(&self, id: u64) -> bool {
        self.call_id == id
    }

    fn cancel_expiry(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
    }

    /// Give up on the current invocation: forget its key, so the next call
    /// retries, and stop tracking any operation it superseded.
    fn abandon(&mut self, id: u64) {
        if !self.is_current(id) {
            return;
        }
        self.last_key = None;
        if let Some(previous) = self.pending.take() {
            tracing::debug!(call_id = previous.id, "no longer tracking superseded operation");
        }
        self.cancel_expiry();
    }

    /// Drop a stale value, if `id` is still pending.
    fn expire(&mut self, id: u64) {
        let pending = self.pending.as_ref().is_some_and(|p| p.id == id);
        if pending && matches!(self.outcome, Outcome::Value(_)) {
            tracing::debug!(call_id = id, "stale value expired");
            self.outcome = Outcome::Absent;
        }
    }
}

/// Memoizing loader.
///
/// Every call returns at once: the freshest value, a stale value while a newer
/// operation is pending, no value, or the stored error. The wrapped function is
/// only invoked when the arguments differ from the last invocation, and only
/// the most recently started pending operation is ever allowed to settle.
pub struct Loader<F, A, V, E, C = ByValue>
where
    C: Comparator<A>,
{
    function: F,
    comparator: C,
    timeout: Duration,
    expiry: Expiry,
    loading: Option<StalePolicy<V, E>>,
    require_notifier: bool,
    runtime: Option<Handle>,
    slot: Arc<Mutex<Slot<C::Key, V, E>>>,
    request_deduplicated_counter: AtomicU64,
    request_total_counter: AtomicU64,
    _args: PhantomData<fn(A)>,
}

impl<F, A, V, E> Loader<F, A, V, E, ByValue>
where
    F: Fn(A) -> Invocation<V, E>,
    A: PartialEq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a loader comparing arguments by value, with default options.
    pub fn new(function: F) -> Self {
        Self::with_options(function, LoaderOptions::default())
    }

    /// Create a loader comparing arguments by value.
    pub fn with_options(function: F, options: LoaderOptions<V, E>) -> Self {
        Self::with_comparator(function, ByValue, options)
    }
}

impl<F, A, V, E, C> Loader<F, A, V, E, C>
where
    F: Fn(A) -> Invocation<V, E>,
    C: Comparator<A>,
    C::Key: Send + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a loader with the provided argument comparator.
    pub fn with_comparator(function: F, comparator: C, options: LoaderOptions<V, E>) -> Self {
        let slot = Slot {
            outcome: Outcome::Absent,
            pending: None,
            last_key: None,
            call_id: 0,
            notifier: options.on_settled,
            expiry_timer: None,
        };
        Self {
            function,
            comparator,
            timeout: options.timeout,
            expiry: options.expiry,
            loading: options.loading,
            require_notifier: options.require_notifier,
            runtime: options.runtime,
            slot: Arc::new(Mutex::new(slot)),
            request_deduplicated_counter: AtomicU64::new(0),
            request_total_counter: AtomicU64::new(0),
            _args: PhantomData,
        }
    }

    /// Call the loader.
    ///
    /// Invokes the wrapped function if `args` differ from the last invocation,
    /// then returns what should be shown now. `Ok(None)` means there is no
    /// value to show.
    pub fn call(&self, args: A) -> Result<Option<V>, LoaderError<E>> {
        if self.require_notifier && self.slot.lock().notifier.is_none() {
            return Err(LoaderError::NoNotifier);
        }
        self.request_total_counter.fetch_add(1, Ordering::SeqCst);
        self.attempt(args)?;
        self.present()
    }

    /// Call the loader from a context which can be notified.
    ///
    /// If no hook is bound yet, `notifier` becomes the hook for this loader.
    /// Later contexts do not replace it.
    pub fn call_in(
        &self,
        notifier: &SettleHook<V, E>,
        args: A,
    ) -> Result<Option<V>, LoaderError<E>> {
        {
            let mut slot = self.slot.lock();
            if slot.notifier.is_none() {
                tracing::debug!("binding notifier from call context");
                slot.notifier = Some(Arc::clone(notifier));
            }
        }
        self.call(args)
    }

    /// Forget the last arguments, so the next call invokes the wrapped function.
    /// The stored outcome is kept.
    pub fn reset(&self) {
        self.slot.lock().last_key = None;
    }

    /// Is an operation pending?
    pub fn is_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }

    /// Return the count of calls which reused the previous outcome.
    pub fn request_deduplicated_count(&self) -> u64 {
        self.request_deduplicated_counter.load(Ordering::SeqCst)
    }

    /// Return the total call count.
    pub fn request_count(&self) -> u64 {
        self.request_total_counter.load(Ordering::SeqCst)
    }

    fn attempt(&self, args: A) -> Result<(), LoaderError<E>> {
        let key = self.comparator.compute(&args);
        let id = {
            let mut slot = self.slot.lock();
            if let Some(last) = &slot.last_key {
                if self.comparator.equal(last, &key) {
                    self.request_deduplicated_counter
                        .fetch_add(1, Ordering::SeqCst);
                    tracing::trace!(call_id = slot.call_id, "arguments unchanged");
                    return Ok(());
                }
            }
            slot.last_key = Some(key);
            slot.call_id += 1;
            slot.call_id
        };
        // Never hold the lock while user code runs. It may call us back.
        tracing::debug!(call_id = id, "invoking");
        let invocation = match panic::catch_unwind(AssertUnwindSafe(|| (self.function)(args))) {
            Ok(invocation) => invocation,
            Err(payload) => {
                tracing::error!(call_id = id, "wrapped function panicked");
                self.slot.lock().abandon(id);
                panic::resume_unwind(payload);
            }
        };
        self.route(id, invocation)
    }

    fn route(&self, id: u64, invocation: Invocation<V, E>) -> Result<(), LoaderError<E>> {
        let operation = match invocation {
            Invocation::Ready(v) => {
                self.store(id, Outcome::Value(v));
                return Ok(());
            }
            Invocation::Failed(e) => {
                self.store(id, Outcome::Exception(e));
                return Ok(());
            }
            Invocation::Pending(operation) => operation,
        };
        let PendingOperation { future, abort } = operation;

        let Some(runtime) = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            self.slot.lock().abandon(id);
            return Err(LoaderError::NoRuntime);
        };

        let previous = {
            let mut slot = self.slot.lock();
            if !slot.is_current(id) {
                drop(slot);
                tracing::debug!(call_id = id, "superseded before it was tracked");
                if let Some(abort) = abort {
                    abort();
                }
                return Ok(());
            }
            let previous = slot.pending.replace(Pending {
                id,
                since: Instant::now(),
                abort,
            });
            self.arm_expiry(&mut slot, id, &runtime);
            previous
        };

        runtime.spawn(settle(Arc::clone(&self.slot), id, future));

        if let Some(Pending {
            id: previous_id,
            abort: Some(abort),
            ..
        }) = previous
        {
            tracing::debug!(call_id = previous_id, "aborting superseded operation");
            abort();
        }
        Ok(())
    }

    /// Store an immediate outcome. Anything still pending is forgotten
    /// without being aborted.
    fn store(&self, id: u64, outcome: Outcome<V, E>) {
        let mut slot = self.slot.lock();
        if !slot.is_current(id) {
            tracing::debug!(call_id = id, "discarding superseded outcome");
            return;
        }
        slot.outcome = outcome;
        slot.pending = None;
        slot.cancel_expiry();
    }

    fn arm_expiry(&self, slot: &mut Slot<C::Key, V, E>, id: u64, runtime: &Handle) {
        slot.cancel_expiry();
        if self.expiry != Expiry::Timer {
            return;
        }
        if self.timeout.is_zero() {
            slot.expire(id);
            return;
        }
        let weak = Arc::downgrade(&self.slot);
        let timeout = self.timeout;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(slot) = weak.upgrade() {
                slot.lock().expire(id);
            }
        });
        slot.expiry_timer = Some(timer.abort_handle());
    }

    fn present(&self) -> Result<Option<V>, LoaderError<E>> {
        let slot = self.slot.lock();
        let Some(pending) = &slot.pending else {
            return slot.outcome.settled().map_err(LoaderError::Exception);
        };
        let elapsed = pending.since.elapsed();
        let shown = match &self.loading {
            None => default_policy(&slot.outcome, elapsed, self.timeout, self.expiry),
            Some(policy) => {
                let outcome = slot.outcome.clone();
                drop(slot);
                policy(&outcome, elapsed)
            }
        };
        shown.map_err(LoaderError::Exception)
    }
}

/// Await a pending operation and, if it is still the latest, store its outcome.
async fn settle<K, V, E>(slot: Arc<Mutex<Slot<K, V, E>>>, id: u64, future: LoaderFuture<V, E>)
where
    V: Clone,
    E: Clone,
{
    let result = AssertUnwindSafe(future).catch_unwind().await;
    let notice = {
        let mut state = slot.lock();
        if !state.is_current(id) {
            tracing::debug!(call_id = id, latest = state.call_id, "discarding superseded outcome");
            return;
        }
        state.pending = None;
        state.cancel_expiry();
        let outcome = match result {
            Ok(Ok(v)) => Outcome::Value(v),
            Ok(Err(e)) => Outcome::Exception(e),
            Err(_) => {
                tracing::error!(call_id = id, "pending operation panicked");
                return;
            }
        };
        tracing::debug!(call_id = id, exception = outcome.is_exception(), "settled");
        let notice = state
            .notifier
            .clone()
            .map(|notifier| (notifier, outcome.clone()));
        state.outcome = outcome;
        notice
    };
    match notice {
        Some((notifier, Outcome::Value(v))) => notifier(Ok(&v)),
        Some((notifier, Outcome::Exception(e))) => notifier(Err(&e)),
        _ => (),
    }
}
