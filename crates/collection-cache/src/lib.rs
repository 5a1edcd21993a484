//! # Parameter-driven collection caching
//!
//! This crate keeps an in-memory, identity-keyed collection of entries in sync with a set
//! of input parameters. The caller supplies a parameter source and a request that fetches
//! entries for a parameter snapshot; the [`CollectionCache`] coordinates everything in
//! between: it detects parameter changes, supersedes in-flight fetches, tracks the fetch
//! lifecycle, and opportunistically refreshes stale results in the background, without
//! ever letting a slow or outdated fetch overwrite data belonging to a newer parameter set.
//!
//! ## Generations and the [`Guard`]
//!
//! Every distinct parameter snapshot starts a new *generation*. Starting a generation
//! permanently invalidates the previous one, clears the store, resets the [`Status`], and
//! runs a fresh fetch. Because the fetch is the only suspension point, a parameter change
//! can land between its start and its completion; the [`Guard`] handed to the fetch
//! resolves that race. The coordinator checks [`Guard::is_valid`] immediately before
//! applying results (not before the call), so a fetch that was superseded mid-flight is
//! silently discarded: no error, no store mutation, no status mutation.
//!
//! There is no hard cancellation. The guard is advisory: a superseded fetch runs to
//! completion, and fetchers are encouraged to check their guard before side effects of
//! their own.
//!
//! ## Staleness and background refresh
//!
//! [`CollectionCache::refresh_if_stale`] is meant to be wired to an external activation
//! signal (for example "this view became visible again"). If the last successful fetch is
//! older than [`CacheConfig::stale_after`], it re-runs the request for the current
//! parameters in the background. Background refreshes never set `pending`, never clear the
//! store, and merge their results additively, gated by a snapshot-equality guard that is
//! re-evaluated at completion time: parameters that change and change back mid-refresh
//! keep the result usable. Refresh failures are logged and swallowed; they never touch
//! [`Status::error`].
//!
//! Overlapping activation signals coalesce: a dedicated in-flight flag ensures at most one
//! background refresh runs at a time.
//!
//! ## [`FetchResult`] / [`FetchError`]
//!
//! Fetches resolve to a [`FetchResult`], a [`Result`] around the [`FetchError`] taxonomy.
//! Primary-lifecycle errors are recorded into [`Status::error`] *and* returned to whoever
//! triggered the fetch; background-refresh errors are observed and dropped. No failure
//! crashes the coordinator.
//!
//! ## Configuration
//!
//! [`CacheConfig`] holds the single tunable, the staleness threshold (default 10 seconds).
//! It deserializes with humantime durations, so `stale_after: 30s` works in config files.

#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod guard;
mod params;
mod status;
mod store;
mod utils;

#[cfg(test)]
mod tests;

pub use config::CacheConfig;
pub use coordinator::{CollectionCache, CollectionRequest};
pub use error::{FetchError, FetchResult};
pub use guard::Guard;
pub use params::{Params, ParamsSnapshot, ParamsSource};
pub use status::Status;
pub use store::{EntryStore, Identifiable, index_by_id};

#[cfg(any(test, feature = "test"))]
pub(crate) use tokio::time;

#[cfg(not(any(test, feature = "test")))]
pub(crate) use std::time;
