use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{FetchError, FetchResult};
use crate::guard::Guard;
use crate::time::Instant;

/// The lifecycle of the current primary fetch.
///
/// At most one primary fetch holds `pending == true` at a time. Background refreshes do
/// not go through this bookkeeping at all, except that a successful refresh moves
/// `finished_at` forward.
///
/// The default value is the never-fetched state, which the status is reset to whenever
/// the parameters change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    /// Whether a primary fetch is currently in flight.
    pub pending: bool,
    /// When the current primary fetch started.
    pub started_at: Option<Instant>,
    /// When the last fetch finished, successfully or not.
    pub finished_at: Option<Instant>,
    /// The error of the last finished primary fetch, if any.
    pub error: Option<FetchError>,
}

impl Status {
    pub(crate) fn start(&mut self, now: Instant) {
        self.pending = true;
        self.started_at = Some(now);
    }

    pub(crate) fn finish(&mut self, now: Instant, error: Option<FetchError>) {
        self.pending = false;
        self.finished_at = Some(now);
        self.error = error;
    }

    /// Whether the last finished fetch is older than `stale_after`.
    ///
    /// Never true while a fetch is pending, or before the first fetch has finished.
    pub fn is_stale(&self, stale_after: Duration, now: Instant) -> bool {
        if self.pending {
            return false;
        }
        match self.finished_at {
            Some(finished_at) => now.saturating_duration_since(finished_at) > stale_after,
            None => false,
        }
    }
}

/// Runs `operation` while tracking its lifecycle in `status`.
///
/// Marks the status pending before the operation suspends and records the completion
/// afterwards, propagating the operation's outcome to the caller unchanged. Completion is
/// only recorded while `guard` is still valid: a fetch that was superseded mid-flight must
/// not touch the status of the generation that replaced it.
pub(crate) async fn with_status<T, F>(
    status: &Mutex<Status>,
    guard: &Guard,
    operation: F,
) -> FetchResult<T>
where
    F: Future<Output = FetchResult<T>>,
{
    status.lock().unwrap().start(Instant::now());

    let result = operation.await;

    let mut status = status.lock().unwrap();
    if guard.is_valid() {
        status.finish(Instant::now(), result.as_ref().err().cloned());
    }

    result
}
