//! Fault isolation for calls into transport handles
//!
//! Every touchpoint on an external handle goes through here so that one
//! misbehaving connection (error or panic) never escapes to the caller.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::error::SinkError;

/// Run a fallible handle operation, logging instead of propagating failure.
///
/// Returns `true` if the operation completed successfully.
pub(crate) fn best_effort<F>(op: &'static str, connection_id: &str, f: F) -> bool
where
    F: FnOnce() -> Result<(), SinkError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(connection_id, op, error = %e, "Connection operation failed");
            false
        }
        Err(payload) => {
            warn!(
                connection_id,
                op,
                panic = panic_message(payload.as_ref()),
                "Connection operation panicked"
            );
            false
        }
    }
}

/// Evaluate a read-only handle query; `None` if it panicked.
pub(crate) fn probe<T, F>(f: F) -> Option<T>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).ok()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
