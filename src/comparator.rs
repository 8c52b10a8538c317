use serde::Serialize;
use serde_json::Value;

/// Decides whether a call repeats the previous one.
///
/// A loader computes a key for every outer call and compares it with the key
/// remembered from the last actual invocation. Equal keys mean the wrapped
/// function is not called again.
pub trait Comparator<A> {
    /// The remembered form of a call's arguments.
    type Key;

    /// Compute the key for `args`.
    fn compute(&self, args: &A) -> Self::Key;

    /// Compare two keys.
    fn equal(&self, previous: &Self::Key, current: &Self::Key) -> bool;
}

/// Compare arguments by value. This is the default.
///
/// The arguments themselves are remembered, so they must be `Clone`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ByValue;

impl<A> Comparator<A> for ByValue
where
    A: PartialEq + Clone,
{
    type Key = A;

    fn compute(&self, args: &A) -> A {
        args.clone()
    }

    fn equal(&self, previous: &A, current: &A) -> bool {
        previous == current
    }
}

/// Compare arguments by their JSON serialization.
///
/// Each argument is serialized on every call, so changes behind a shared
/// reference (a `RefCell`, for example) are noticed. When the arguments are a
/// tuple or sequence, every element becomes one token of the key.
#[derive(Clone, Copy, Debug, Default)]
pub struct Json;

impl<A> Comparator<A> for Json
where
    A: Serialize,
{
    /// `None` when serialization failed. Such a key never matches.
    type Key = Option<Vec<String>>;

    fn compute(&self, args: &A) -> Self::Key {
        match serde_json::to_value(args) {
            Ok(Value::Array(items)) => Some(items.iter().map(Value::to_string).collect()),
            Ok(value) => Some(vec![value.to_string()]),
            Err(err) => {
                tracing::warn!(error = %err, "could not serialize loader arguments");
                None
            }
        }
    }

    fn equal(&self, previous: &Self::Key, current: &Self::Key) -> bool {
        matches!((previous, current), (Some(p), Some(c)) if p == c)
    }
}

/// Compare arguments through a caller supplied key function.
#[derive(Clone, Copy, Debug)]
pub struct ByKey<F>(pub F);

impl<A, F, K> Comparator<A> for ByKey<F>
where
    F: Fn(&A) -> K,
    K: PartialEq,
{
    type Key = K;

    fn compute(&self, args: &A) -> K {
        (self.0)(args)
    }

    fn equal(&self, previous: &K, current: &K) -> bool {
        previous == current
    }
}
