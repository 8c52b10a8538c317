use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::task::AbortHandle;

/// Boxed Future yielding the result of a pending operation.
pub type LoaderFuture<V, E> = Pin<Box<dyn Future<Output = Result<V, E>> + Send>>;

type AbortFn = Box<dyn FnOnce() + Send>;

/// What the wrapped function returns for one invocation.
pub enum Invocation<V, E> {
    /// A value, available now.
    Ready(V),
    /// An error, raised now.
    Failed(E),
    /// An operation that settles later.
    Pending(PendingOperation<V, E>),
}

impl<V, E> Invocation<V, E> {
    /// Wrap a future which settles later.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        Invocation::Pending(PendingOperation::new(future))
    }
}

impl<V, E> From<Result<V, E>> for Invocation<V, E> {
    fn from(result: Result<V, E>) -> Self {
        match result {
            Ok(v) => Invocation::Ready(v),
            Err(e) => Invocation::Failed(e),
        }
    }
}

impl<V, E> From<PendingOperation<V, E>> for Invocation<V, E> {
    fn from(operation: PendingOperation<V, E>) -> Self {
        Invocation::Pending(operation)
    }
}

impl<V, E> fmt::Debug for Invocation<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Ready(_) => f.write_str("Ready(..)"),
            Invocation::Failed(_) => f.write_str("Failed(..)"),
            Invocation::Pending(op) => op.fmt(f),
        }
    }
}

/// An asynchronous operation, optionally abortable.
///
/// When a newer invocation starts while this one is still pending, the loader
/// calls the abort capability (if any) once and ignores whatever this
/// operation settles to. Aborting is a request: the future itself is left to
/// run to completion.
pub struct PendingOperation<V, E> {
    pub(crate) future: LoaderFuture<V, E>,
    pub(crate) abort: Option<AbortFn>,
}

impl<V, E> PendingOperation<V, E> {
    /// Create an operation with no abort capability.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
            abort: None,
        }
    }

    /// Call `abort` when this operation is superseded.
    pub fn with_abort<A>(mut self, abort: A) -> Self
    where
        A: FnOnce() + Send + 'static,
    {
        self.abort = Some(Box::new(abort));
        self
    }

    /// Abort a tokio task when this operation is superseded.
    pub fn with_abort_handle(self, handle: AbortHandle) -> Self {
        self.with_abort(move || handle.abort())
    }

    /// Does this operation expose an abort capability?
    pub fn is_abortable(&self) -> bool {
        self.abort.is_some()
    }
}

impl<V, E> fmt::Debug for PendingOperation<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("abortable", &self.is_abortable())
            .finish()
    }
}
