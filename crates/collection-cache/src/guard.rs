use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::params::{ParamsSnapshot, ParamsSource};

/// A capability bound to one fetch invocation, answering a single question: is this fetch
/// still the authoritative one?
///
/// Many guards may exist over a coordinator's lifetime, but only the most recently created
/// generation guard can ever be valid at a given moment. Fetchers receive their guard
/// alongside the parameter snapshot and should check it before side effects with
/// irreversible consequences; the coordinator independently checks it immediately before
/// applying results, so a fetcher that ignores its guard can still not corrupt the store.
#[derive(Clone)]
pub struct Guard(Inner);

#[derive(Clone)]
enum Inner {
    /// Valid while the captured token matches the live generation counter. Flipped
    /// permanently the instant a newer generation starts.
    Generation { token: u64, live: Arc<AtomicU64> },
    /// Valid while the parameter source still resolves to the captured snapshot.
    /// Re-evaluated lazily at every query, so parameters that change and change back
    /// restore validity.
    Snapshot {
        captured: ParamsSnapshot,
        source: Arc<dyn ParamsSource>,
    },
}

impl Guard {
    pub(crate) fn generation(token: u64, live: Arc<AtomicU64>) -> Self {
        Self(Inner::Generation { token, live })
    }

    pub(crate) fn snapshot(captured: ParamsSnapshot, source: Arc<dyn ParamsSource>) -> Self {
        Self(Inner::Snapshot { captured, source })
    }

    /// Whether the fetch this guard is bound to is still authoritative.
    pub fn is_valid(&self) -> bool {
        match &self.0 {
            Inner::Generation { token, live } => *token == live.load(Ordering::SeqCst),
            Inner::Snapshot { captured, source } => source.resolve() == *captured,
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut guard = f.debug_struct("Guard");
        match &self.0 {
            Inner::Generation { token, .. } => guard.field("generation", token),
            Inner::Snapshot { captured, .. } => guard.field("snapshot", captured),
        };
        guard.field("valid", &self.is_valid()).finish()
    }
}
