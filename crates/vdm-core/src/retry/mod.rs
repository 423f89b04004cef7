//! Retry policy and error taxonomy.
//!
//! Pipeline errors map into an [`ErrorKind`]; the fixed-delay [`RetryPolicy`]
//! decides from the kind and attempt number whether another attempt is made.

mod policy;

pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
