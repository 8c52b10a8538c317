//! Provides a synchronous-looking, memoizing loader for asynchronous operations.
//!
//! If you have a slow data retrieving operation and a caller which can't wait for it, such as a
//! render loop redrawing every frame, [`Loader`] lets you call the operation as often as you like.
//! Every call returns at once with the best thing to show right now.
//!
//! The wrapped function is only invoked when the arguments change. It may return a value or an
//! error straight away, or an operation which settles later. While an operation is pending, the
//! previous value is still shown for a short while (see [`DEFAULT_TIMEOUT`]), so a refresh doesn't
//! blank the display. When a newer operation starts, the older one is asked to abort and its
//! eventual result is ignored.
//!
//! An example will probably make usage clear.
//!
//! Example 1
//! ```
//! use std::time::Duration;
//! use stale_loader::Invocation;
//! use stale_loader::Loader;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let loader = Loader::new(|id: u32| {
//!     Invocation::pending(async move {
//!         tokio::time::sleep(Duration::from_millis(20)).await;
//!         Ok::<_, String>(format!("user {id}"))
//!     })
//! });
//!
//! // Nothing has settled yet.
//! assert_eq!(loader.call(1).unwrap(), None);
//!
//! tokio::time::sleep(Duration::from_millis(50)).await;
//! assert_eq!(loader.call(1).unwrap(), Some("user 1".to_string()));
//!
//! // New arguments start a new operation, the old value is shown meanwhile.
//! assert_eq!(loader.call(2).unwrap(), Some("user 1".to_string()));
//! # }
//! ```
//!
//! Use [`LoaderOptions::on_settled`] to hear about results which arrive between calls, so you know
//! when to call again.
//!
mod comparator;
mod invocation;
mod loader;
mod policy;

pub use crate::comparator::ByKey;
pub use crate::comparator::ByValue;
pub use crate::comparator::Comparator;
pub use crate::comparator::Json;
pub use crate::invocation::Invocation;
pub use crate::invocation::LoaderFuture;
pub use crate::invocation::PendingOperation;
pub use crate::loader::Loader;
pub use crate::loader::LoaderError;
pub use crate::loader::LoaderOptions;
pub use crate::loader::SettleHook;
pub use crate::policy::Expiry;
pub use crate::policy::Outcome;
pub use crate::policy::StalePolicy;
pub use crate::policy::DEFAULT_TIMEOUT;
