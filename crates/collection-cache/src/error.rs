use std::time::Duration;

use thiserror::Error;

/// An error that happens when fetching entries from a collection's backing source.
///
/// Errors from the primary fetch lifecycle are recorded in [`Status`](crate::Status) and
/// returned to the caller that triggered the fetch. Errors from background refreshes are
/// observed and dropped. A result that arrives after its generation was superseded is not
/// an error at all; it is silently discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The backing source has no data for the requested parameters.
    #[error("not found")]
    NotFound,
    /// The backing source rejected the request due to missing permissions.
    ///
    /// The attached string contains the source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The fetch did not complete within the fetcher's own deadline.
    ///
    /// The coordinator imposes no timeouts; the request is responsible for its own.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The fetch failed for another reason, like connection loss or a 5xx response.
    ///
    /// The attached string contains the source's response.
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    /// The fetch succeeded, but the payload is invalid in some way.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in the coordinator or the request plumbing itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for FetchError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for FetchError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl FetchError {
    /// Collapses an arbitrary error into [`InternalError`](Self::InternalError), logging it.
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The outcome of a fetch, either a value or the reason it could not be produced.
pub type FetchResult<T = ()> = Result<T, FetchError>;
