use std::sync::Arc;
use std::time::Duration;

/// How long a stale value is shown while a newer operation is pending.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(140);

/// The last settled result of the wrapped function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Outcome<V, E> {
    /// The function returned, or its operation resolved to, a value.
    Value(V),
    /// The function failed, or its operation was rejected, with an error.
    Exception(E),
    /// Nothing has settled yet.
    #[default]
    Absent,
}

impl<V, E> Outcome<V, E> {
    /// Is this an error?
    pub fn is_exception(&self) -> bool {
        matches!(self, Outcome::Exception(_))
    }

    /// Is there nothing to show?
    pub fn is_absent(&self) -> bool {
        matches!(self, Outcome::Absent)
    }
}

impl<V: Clone, E: Clone> Outcome<V, E> {
    /// What a call returns when nothing is pending.
    pub(crate) fn settled(&self) -> Result<Option<V>, E> {
        match self {
            Outcome::Value(v) => Ok(Some(v.clone())),
            Outcome::Exception(e) => Err(e.clone()),
            Outcome::Absent => Ok(None),
        }
    }
}

/// Custom stale value policy.
///
/// Called while an operation is pending with the last outcome and how long the
/// operation has been pending. Whatever it returns is returned to the caller.
pub type StalePolicy<V, E> =
    Arc<dyn Fn(&Outcome<V, E>, Duration) -> Result<Option<V>, E> + Send + Sync>;

/// How a stale value expires once the timeout passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Expiry {
    /// Compare the elapsed pending time against the timeout on every call.
    #[default]
    Elapsed,
    /// Clear the stale value from a timer started with each pending operation.
    Timer,
}

/// The built-in policy.
///
/// Errors are raised even while pending. A value is shown until the pending
/// operation is older than `timeout`. Under [`Expiry::Timer`] the timer has
/// already cleared an expired value, so elapsed time is not consulted.
pub(crate) fn default_policy<V: Clone, E: Clone>(
    outcome: &Outcome<V, E>,
    elapsed: Duration,
    timeout: Duration,
    expiry: Expiry,
) -> Result<Option<V>, E> {
    match outcome {
        Outcome::Exception(e) => Err(e.clone()),
        Outcome::Value(v) => {
            if expiry == Expiry::Elapsed && elapsed >= timeout {
                Ok(None)
            } else {
                Ok(Some(v.clone()))
            }
        }
        Outcome::Absent => Ok(None),
    }
}
