use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use crate::test::{self, TestEntry, TestRequest};
use crate::time;
use crate::{CacheConfig, CollectionCache, FetchError, Params, Status};

type TestCache = CollectionCache<TestRequest>;

/// A cache over a live `"id"` parameter that tests can flip at will.
fn live_cache(initial: u64) -> (Arc<TestCache>, TestRequest, Arc<AtomicU64>) {
    let current = Arc::new(AtomicU64::new(initial));
    let params = {
        let current = Arc::clone(&current);
        Params::new().with_live("id", move || json!(current.load(Ordering::SeqCst)))
    };
    let request = TestRequest::new();
    let cache = Arc::new(CollectionCache::new(
        Arc::new(params),
        request.clone(),
        CacheConfig::default(),
    ));
    (cache, request, current)
}

fn sorted_ids(cache: &TestCache) -> Vec<String> {
    let mut ids: Vec<_> = cache
        .entries()
        .into_iter()
        .map(|entry| entry.id.clone())
        .collect();
    ids.sort();
    ids
}

async fn wait_for_calls(request: &TestRequest, calls: usize) {
    while request.calls() < calls {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_initial_fetch_populates_entries() {
    test::setup();
    let (cache, request, _) = live_cache(1);

    cache.params_changed().await.unwrap();

    assert_eq!(sorted_ids(&cache), vec!["entry-1"]);
    assert!(cache.contains(&"entry-1".to_string()));
    assert_eq!(cache.get(&"entry-1".to_string()).unwrap().revision, 0);
    assert_eq!(request.calls(), 1);

    let status = cache.status();
    assert!(!status.pending);
    assert!(status.started_at.is_some());
    assert!(status.finished_at.is_some());
    assert_eq!(status.error, None);
}

#[tokio::test]
async fn test_unchanged_params_keep_generation() {
    test::setup();
    let (cache, request, current) = live_cache(1);

    cache.params_changed().await.unwrap();
    cache.params_changed().await.unwrap();
    assert_eq!(request.calls(), 1);

    current.store(2, Ordering::SeqCst);
    cache.params_changed().await.unwrap();
    assert_eq!(request.calls(), 2);

    // the previous generation's entries are gone, not merged over
    assert_eq!(sorted_ids(&cache), vec!["entry-2"]);
}

#[tokio::test]
async fn test_status_pending_during_primary_fetch() {
    test::setup();
    time::pause();
    let (cache, request, _) = live_cache(1);

    request.delay_next(Duration::from_secs(5));
    let pending = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.params_changed().await }
    });
    wait_for_calls(&request, 1).await;

    let status = cache.status();
    assert!(status.pending);
    assert!(status.started_at.is_some());
    assert!(status.finished_at.is_none());

    pending.await.unwrap().unwrap();

    let status = cache.status();
    assert!(!status.pending);
    assert!(status.finished_at.is_some());
}

#[tokio::test]
async fn test_superseded_fetch_is_discarded() {
    test::setup();
    time::pause();
    let (cache, request, current) = live_cache(1);

    request.delay_next(Duration::from_secs(10));
    let slow = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.params_changed().await }
    });
    wait_for_calls(&request, 1).await;
    assert!(cache.status().pending);

    // params change before the first fetch resolves
    current.store(2, Ordering::SeqCst);
    cache.params_changed().await.unwrap();
    assert_eq!(sorted_ids(&cache), vec!["entry-2"]);

    slow.await.unwrap().unwrap();

    // the stale result resolved after the change and must not be visible
    assert_eq!(sorted_ids(&cache), vec!["entry-2"]);
    let status = cache.status();
    assert!(!status.pending);
    assert_eq!(status.error, None);
    assert_eq!(request.calls(), 2);
}

#[tokio::test]
async fn test_second_of_two_changes_wins() {
    test::setup();
    time::pause();
    let (cache, request, current) = live_cache(1);

    request.delay_next(Duration::from_secs(10));
    request.delay_next(Duration::from_secs(2));

    let first = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.params_changed().await }
    });
    wait_for_calls(&request, 1).await;

    current.store(2, Ordering::SeqCst);
    let second = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.params_changed().await }
    });
    wait_for_calls(&request, 2).await;

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // exactly one result was merged: the second's
    let entries = cache.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "entry-2");
    assert_eq!(entries[0].revision, 1);
}

#[tokio::test]
async fn test_primary_fetch_error_is_recorded_and_returned() {
    test::setup();
    let (cache, request, _) = live_cache(1);
    request.respond_next(Err(FetchError::FetchFailed("500".into())));

    let result = cache.params_changed().await;
    assert_eq!(result, Err(FetchError::FetchFailed("500".into())));

    let status = cache.status();
    assert!(!status.pending);
    assert_eq!(status.error, Some(FetchError::FetchFailed("500".into())));
    assert!(cache.entries().is_empty());
}

#[tokio::test]
async fn test_superseded_fetch_error_is_not_recorded() {
    test::setup();
    time::pause();
    let (cache, request, current) = live_cache(1);

    request.delay_next(Duration::from_secs(10));
    request.respond_next(Err(FetchError::Timeout(Duration::from_secs(10))));
    let slow = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.params_changed().await }
    });
    wait_for_calls(&request, 1).await;

    current.store(2, Ordering::SeqCst);
    cache.params_changed().await.unwrap();

    // the failure is still returned to the caller that started the fetch,
    // but the status belongs to the newer generation
    let result = slow.await.unwrap();
    assert_eq!(result, Err(FetchError::Timeout(Duration::from_secs(10))));
    assert_eq!(cache.status().error, None);
    assert_eq!(sorted_ids(&cache), vec!["entry-2"]);
}

#[tokio::test]
async fn test_update_merges_without_clearing() -> Result<()> {
    test::setup();
    let (cache, _request, _) = live_cache(1);
    cache.params_changed().await?;

    cache.update(vec![]);
    assert_eq!(sorted_ids(&cache), vec!["entry-1"]);

    cache.update(vec![TestEntry {
        id: "manual".into(),
        revision: 99,
    }]);
    assert_eq!(sorted_ids(&cache), vec!["entry-1", "manual"]);

    cache.update(vec![TestEntry {
        id: "entry-1".into(),
        revision: 7,
    }]);
    assert_eq!(cache.get(&"entry-1".to_string()).unwrap().revision, 7);
    assert_eq!(cache.entries().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_reset_clears_entries_and_status() {
    test::setup();
    let (cache, _request, _) = live_cache(1);
    cache.params_changed().await.unwrap();

    cache.reset();

    assert!(cache.entries().is_empty());
    assert_eq!(cache.status(), Status::default());
}

#[tokio::test]
async fn test_refresh_skipped_before_first_fetch() {
    test::setup();
    let (cache, request, _) = live_cache(1);

    cache.refresh_if_stale().await;

    assert_eq!(request.calls(), 0);
}

#[tokio::test]
async fn test_refresh_skipped_while_fresh() {
    test::setup();
    time::pause();
    let (cache, request, _) = live_cache(1);
    cache.params_changed().await.unwrap();

    // age == stale_after is not stale yet, the threshold is strict
    time::advance(Duration::from_secs(10)).await;
    cache.refresh_if_stale().await;

    assert_eq!(request.calls(), 1);
}

#[tokio::test]
async fn test_stale_refresh_merges_into_store() {
    test::setup();
    time::pause();
    let (cache, request, _) = live_cache(1);
    request.respond_next(Ok(vec![TestEntry {
        id: "a".into(),
        revision: 0,
    }]));
    cache.params_changed().await.unwrap();

    time::advance(Duration::from_secs(11)).await;
    request.delay_next(Duration::from_secs(1));
    request.respond_next(Ok(vec![TestEntry {
        id: "b".into(),
        revision: 1,
    }]));

    let refresh = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.refresh_if_stale().await }
    });
    wait_for_calls(&request, 2).await;
    // background refreshes never set `pending`
    assert!(!cache.status().pending);
    refresh.await.unwrap();

    // merged, not replaced
    assert_eq!(sorted_ids(&cache), vec!["a", "b"]);
    assert_eq!(request.calls(), 2);

    // `finished_at` moved forward: an immediate second signal is a no-op
    cache.refresh_if_stale().await;
    assert_eq!(request.calls(), 2);
}

#[tokio::test]
async fn test_refresh_never_fires_while_primary_pending() {
    test::setup();
    time::pause();
    let (cache, request, current) = live_cache(1);
    cache.params_changed().await.unwrap();

    time::advance(Duration::from_secs(11)).await;

    current.store(2, Ordering::SeqCst);
    request.delay_next(Duration::from_secs(5));
    let pending = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.params_changed().await }
    });
    wait_for_calls(&request, 2).await;

    cache.refresh_if_stale().await;
    assert_eq!(request.calls(), 2);

    pending.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_refresh_failure_is_swallowed() {
    test::setup();
    time::pause();
    let (cache, request, _) = live_cache(1);
    cache.params_changed().await.unwrap();
    let fetched_at = cache.status().finished_at;

    time::advance(Duration::from_secs(11)).await;
    request.respond_next(Err(FetchError::Timeout(Duration::from_secs(3))));
    cache.refresh_if_stale().await;

    assert_eq!(sorted_ids(&cache), vec!["entry-1"]);
    let status = cache.status();
    assert_eq!(status.error, None);
    // a failed refresh does not move `finished_at`
    assert_eq!(status.finished_at, fetched_at);

    // still stale, so the next signal tries again
    request.respond_next(Ok(vec![]));
    cache.refresh_if_stale().await;
    assert_eq!(request.calls(), 3);
}

#[tokio::test]
async fn test_refresh_discards_result_for_changed_params() {
    test::setup();
    time::pause();
    let (cache, request, current) = live_cache(1);
    cache.params_changed().await.unwrap();
    let fetched_at = cache.status().finished_at;

    time::advance(Duration::from_secs(11)).await;
    request.delay_next(Duration::from_secs(1));
    let refresh = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.refresh_if_stale().await }
    });
    wait_for_calls(&request, 2).await;

    // params change while the refresh is in flight and stay changed
    current.store(2, Ordering::SeqCst);
    refresh.await.unwrap();

    assert_eq!(sorted_ids(&cache), vec!["entry-1"]);
    assert_eq!(cache.get(&"entry-1".to_string()).unwrap().revision, 0);
    assert_eq!(cache.status().finished_at, fetched_at);
}

#[tokio::test]
async fn test_refresh_applies_when_params_change_and_change_back() {
    test::setup();
    time::pause();
    let (cache, request, current) = live_cache(1);
    cache.params_changed().await.unwrap();
    let fetched_at = cache.status().finished_at.unwrap();

    time::advance(Duration::from_secs(11)).await;
    request.delay_next(Duration::from_secs(1));
    let refresh = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.refresh_if_stale().await }
    });
    wait_for_calls(&request, 2).await;

    // validity is re-evaluated at completion, not latched at the first change
    current.store(2, Ordering::SeqCst);
    current.store(1, Ordering::SeqCst);
    refresh.await.unwrap();

    assert_eq!(cache.get(&"entry-1".to_string()).unwrap().revision, 1);
    assert!(cache.status().finished_at.unwrap() > fetched_at);
}

#[tokio::test]
async fn test_overlapping_refreshes_coalesce() {
    test::setup();
    time::pause();
    let (cache, request, _) = live_cache(1);
    cache.params_changed().await.unwrap();

    time::advance(Duration::from_secs(11)).await;
    request.delay_next(Duration::from_secs(1));

    futures::join!(cache.refresh_if_stale(), cache.refresh_if_stale());
    assert_eq!(request.calls(), 2);

    // the in-flight flag is released once the refresh completes
    time::advance(Duration::from_secs(11)).await;
    cache.refresh_if_stale().await;
    assert_eq!(request.calls(), 3);
}
