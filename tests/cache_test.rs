//! Query cache behaviour against the in-memory store

mod fixtures;
mod helpers;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use datacube_query_cache::db::memory::MemoryJobStore;
use datacube_query_cache::models::job::{JobIdentity, JobStatus};
use datacube_query_cache::models::metadata::SceneStatistics;
use datacube_query_cache::models::submission::Submitter;
use datacube_query_cache::services::cache::{
    CacheError, JobFingerprintCache, ABANDONED_REASON, CANCELLED_REASON,
};
use datacube_query_cache::services::extensions::FieldSchema;
use fixtures::*;
use helpers::*;

fn memory_cache() -> (JobFingerprintCache, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    (JobFingerprintCache::new(store.clone()), store)
}

fn statistics(acquisitions: usize, counts: usize, percentages: usize) -> SceneStatistics {
    SceneStatistics {
        scene_count: acquisitions as i64,
        pixel_count: 3000,
        clean_pixel_count: 1500,
        acquisitions: (1..=acquisitions as u32)
            .map(|m| Utc.with_ymd_and_hms(2015, m, 1, 0, 0, 0).unwrap())
            .collect(),
        clean_pixel_counts: vec![500; counts],
        clean_pixel_percentages: vec![50.0; percentages],
    }
}

#[tokio::test]
async fn test_end_to_end_lifecycle() {
    let (cache, _) = memory_cache();
    let dispatcher = CountingDispatcher::default();
    let params = landsat_query();

    // 1. First submit creates a pending record and dispatches once
    let record = cache.submit(&params, &dispatcher).await.unwrap();
    assert_eq!(record.query_id.as_str(), LANDSAT_QUERY_ID);
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.bounds, params.bounds());
    assert_eq!(dispatcher.count(), 1);
    assert_eq!(dispatcher.dispatched(), vec![JobIdentity::new(LANDSAT_QUERY_ID)]);

    // 2. Second submit returns the same record unchanged
    let again = cache.submit(&params, &dispatcher).await.unwrap();
    assert_eq!(again, record);
    assert_eq!(dispatcher.count(), 1);

    // 3. Progress is only accepted once running
    let query_id = record.query_id.clone();
    assert!(matches!(
        cache.update_progress(&query_id, 3, 10).await,
        Err(CacheError::InvalidTransition { from: JobStatus::Pending, .. })
    ));

    cache.start(&query_id).await.unwrap();
    cache.update_progress(&query_id, 3, 10).await.unwrap();

    let running = cache.lookup(&query_id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!((running.scenes_processed, running.total_scenes), (3, 10));

    // 4. Completion is terminal
    let done = cache.complete(&query_id, "/results/foo.png").await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.result_location.as_deref(), Some("/results/foo.png"));

    // 5. Resubmitting returns the DONE record without another dispatch
    let cached = cache.submit(&params, &dispatcher).await.unwrap();
    assert_eq!(cached.status, JobStatus::Done);
    assert_eq!(cached.result_location.as_deref(), Some("/results/foo.png"));
    assert_eq!(dispatcher.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_submits_dispatch_once() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = Arc::new(JobFingerprintCache::new(store));
    let dispatcher = Arc::new(CountingDispatcher::default());

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let cache = cache.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { cache.submit(&landsat_query(), dispatcher.as_ref()).await })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    for result in results {
        let record = result.expect("task panicked").expect("submit failed");
        assert_eq!(record.query_id.as_str(), LANDSAT_QUERY_ID);
    }
    assert_eq!(dispatcher.count(), 1);
}

#[tokio::test]
async fn test_distinct_queries_dispatch_separately() {
    let (cache, _) = memory_cache();
    let dispatcher = CountingDispatcher::default();

    let a = cache.submit(&landsat_query(), &dispatcher).await.unwrap();
    let b = cache.submit(&later_landsat_query(), &dispatcher).await.unwrap();

    assert_ne!(a.query_id, b.query_id);
    assert_eq!(dispatcher.count(), 2);
}

#[tokio::test]
async fn test_lookup_miss_and_store_unavailable() {
    let (cache, store) = memory_cache();
    let query_id = JobIdentity::new(LANDSAT_QUERY_ID);

    assert!(cache.lookup(&query_id).await.unwrap().is_none());

    store.set_offline(true);
    assert!(matches!(
        cache.lookup(&query_id).await,
        Err(CacheError::StoreUnavailable(_))
    ));
    assert!(matches!(
        cache.submit(&landsat_query(), &CountingDispatcher::default()).await,
        Err(CacheError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn test_invalid_transitions_rejected() {
    let (cache, _) = memory_cache();
    let record = cache
        .submit(&landsat_query(), &CountingDispatcher::default())
        .await
        .unwrap();
    let query_id = record.query_id;

    // PENDING cannot skip RUNNING
    assert!(matches!(
        cache.complete(&query_id, "/results/x.png").await,
        Err(CacheError::InvalidTransition { from: JobStatus::Pending, to: JobStatus::Done, .. })
    ));
    assert!(matches!(
        cache.fail(&query_id, "boom").await,
        Err(CacheError::InvalidTransition { from: JobStatus::Pending, .. })
    ));

    cache.start(&query_id).await.unwrap();
    assert!(matches!(
        cache.start(&query_id).await,
        Err(CacheError::InvalidTransition { from: JobStatus::Running, .. })
    ));

    let failed = cache.fail(&query_id, "boom").await.unwrap();
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("boom"));

    // Nothing leaves ERROR
    assert!(cache.complete(&query_id, "/results/x.png").await.is_err());
    assert!(cache.fail(&query_id, "again").await.is_err());
    assert!(cache.start(&query_id).await.is_err());
    assert!(cache.update_progress(&query_id, 1, 2).await.is_err());

    let still = cache.lookup(&query_id).await.unwrap().unwrap();
    assert_eq!(still.status, JobStatus::Error);
    assert_eq!(still.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_operations_on_unknown_identity() {
    let (cache, _) = memory_cache();
    let query_id = JobIdentity::new("nope");

    assert!(matches!(
        cache.start(&query_id).await,
        Err(CacheError::UnknownIdentity(_))
    ));
    assert!(matches!(
        cache.update_progress(&query_id, 1, 2).await,
        Err(CacheError::UnknownIdentity(_))
    ));
    assert!(matches!(
        cache.complete(&query_id, "/x").await,
        Err(CacheError::UnknownIdentity(_))
    ));
    assert!(matches!(
        cache.record_metadata(&query_id, statistics(1, 1, 1)).await,
        Err(CacheError::UnknownIdentity(_))
    ));
}

#[tokio::test]
async fn test_progress_out_of_range_rejected() {
    let (cache, _) = memory_cache();
    let record = cache
        .submit(&landsat_query(), &CountingDispatcher::default())
        .await
        .unwrap();
    cache.start(&record.query_id).await.unwrap();

    assert!(matches!(
        cache.update_progress(&record.query_id, 11, 10).await,
        Err(CacheError::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn test_cancel_records_reason() {
    let (cache, _) = memory_cache();
    let record = cache
        .submit(&landsat_query(), &CountingDispatcher::default())
        .await
        .unwrap();
    cache.start(&record.query_id).await.unwrap();

    let cancelled = cache.cancel(&record.query_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Error);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_REASON));
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let (cache, _) = memory_cache();
    let record = cache
        .submit(&landsat_query(), &CountingDispatcher::default())
        .await
        .unwrap();

    let cancelled = cache.cancel(&record.query_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Error);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_REASON));

    // The queued delivery can no longer claim it
    assert!(matches!(
        cache.start(&record.query_id).await,
        Err(CacheError::InvalidTransition { from: JobStatus::Error, .. })
    ));
}

#[tokio::test]
async fn test_cancel_terminal_or_unknown_rejected() {
    let (cache, _) = memory_cache();
    let record = cache
        .submit(&landsat_query(), &CountingDispatcher::default())
        .await
        .unwrap();
    cache.start(&record.query_id).await.unwrap();
    cache.complete(&record.query_id, "/results/x.png").await.unwrap();

    assert!(matches!(
        cache.cancel(&record.query_id).await,
        Err(CacheError::InvalidTransition { from: JobStatus::Done, .. })
    ));
    assert!(matches!(
        cache.cancel(&JobIdentity::new("nope")).await,
        Err(CacheError::UnknownIdentity(_))
    ));
}

#[tokio::test]
async fn test_reclaim_fails_abandoned_running_jobs() {
    let (cache, store) = memory_cache();
    let dispatcher = CountingDispatcher::default();

    let abandoned = cache.submit(&landsat_query(), &dispatcher).await.unwrap();
    let active = cache.submit(&later_landsat_query(), &dispatcher).await.unwrap();
    cache.start(&abandoned.query_id).await.unwrap();
    cache.start(&active.query_id).await.unwrap();
    store.set_updated_at(&abandoned.query_id, Utc::now() - chrono::Duration::hours(2));

    let reclaimed = cache.reclaim_stale(chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].query_id, abandoned.query_id);
    assert_eq!(reclaimed[0].error.as_deref(), Some(ABANDONED_REASON));

    // The failed record is what later submitters get
    let again = cache.submit(&landsat_query(), &dispatcher).await.unwrap();
    assert_eq!(again.status, JobStatus::Error);
    assert_eq!(dispatcher.count(), 2);

    let still_running = cache.lookup(&active.query_id).await.unwrap().unwrap();
    assert_eq!(still_running.status, JobStatus::Running);
}

#[tokio::test]
async fn test_submissions_are_per_user() {
    let (cache, _) = memory_cache();
    let dispatcher = CountingDispatcher::default();
    let analyst = Submitter {
        user_id: "analyst".to_string(),
        title: "Dry season".to_string(),
        description: "Cloud cover check".to_string(),
        area_id: Some("colombia".to_string()),
    };
    let reviewer = Submitter {
        user_id: "reviewer".to_string(),
        title: "Same area".to_string(),
        description: String::new(),
        area_id: None,
    };

    let (record, first) = cache
        .submit_for(&landsat_query(), &analyst, &dispatcher)
        .await
        .unwrap();
    assert_eq!(first.user_id, "analyst");
    assert!(!first.is_complete());

    // A cache hit still records the second user's submission
    let (hit, second) = cache
        .submit_for(&landsat_query(), &reviewer, &dispatcher)
        .await
        .unwrap();
    assert_eq!(hit.query_id, record.query_id);
    assert_eq!(dispatcher.count(), 1);
    assert_eq!(second.title, "Same area");

    cache.start(&record.query_id).await.unwrap();
    cache.complete(&record.query_id, "/results/x.png").await.unwrap();

    let mine = cache
        .submission(&record.query_id, "analyst")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mine.title, "Dry season");
    assert_eq!(mine.area_id.as_deref(), Some("colombia"));
    let finished = mine.finished_at.expect("finished");
    assert!(finished >= mine.submitted_at);

    assert!(cache
        .submission(&record.query_id, "stranger")
        .await
        .unwrap()
        .is_none());

    cache
        .submit_for(&later_landsat_query(), &analyst, &dispatcher)
        .await
        .unwrap();
    let history = cache.history("analyst").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].submitted_at >= history[1].submitted_at);
}

#[tokio::test]
async fn test_invalid_submitter_rejected_before_dispatch() {
    let (cache, _) = memory_cache();
    let dispatcher = CountingDispatcher::default();
    let nobody = Submitter {
        user_id: String::new(),
        title: String::new(),
        description: String::new(),
        area_id: None,
    };

    assert!(matches!(
        cache.submit_for(&landsat_query(), &nobody, &dispatcher).await,
        Err(CacheError::InvalidParameter(_))
    ));
    assert_eq!(dispatcher.count(), 0);
}

#[tokio::test]
async fn test_metadata_keeps_query_bounds() {
    let (cache, _) = memory_cache();
    let params = landsat_query();
    let record = cache
        .submit(&params, &CountingDispatcher::default())
        .await
        .unwrap();

    cache
        .record_metadata(&record.query_id, statistics(2, 2, 2))
        .await
        .unwrap();
    let metadata = cache.metadata(&record.query_id).await.unwrap().unwrap();
    assert_eq!(metadata.bounds, params.bounds());
}

#[tokio::test]
async fn test_metadata_shape_mismatch_stores_nothing() {
    let (cache, _) = memory_cache();
    let record = cache
        .submit(&landsat_query(), &CountingDispatcher::default())
        .await
        .unwrap();

    let result = cache.record_metadata(&record.query_id, statistics(3, 2, 3)).await;
    assert!(matches!(
        result,
        Err(CacheError::MetadataShape {
            acquisitions: 3,
            clean_pixel_counts: 2,
            clean_pixel_percentages: 3
        })
    ));
    assert!(cache.metadata(&record.query_id).await.unwrap().is_none());

    // A well-shaped write still goes through afterwards
    cache
        .record_metadata(&record.query_id, statistics(3, 3, 3))
        .await
        .unwrap();
    let stored = cache.metadata(&record.query_id).await.unwrap().unwrap();
    assert_eq!(stored.acquisitions.len(), 3);
    assert!((stored.percentage_clean_pixels() - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_metadata_written_once() {
    let (cache, _) = memory_cache();
    let record = cache
        .submit(&landsat_query(), &CountingDispatcher::default())
        .await
        .unwrap();

    cache
        .record_metadata(&record.query_id, statistics(2, 2, 2))
        .await
        .unwrap();
    assert!(matches!(
        cache.record_metadata(&record.query_id, statistics(4, 4, 4)).await,
        Err(CacheError::DuplicateMetadata(_))
    ));

    let stored = cache.metadata(&record.query_id).await.unwrap().unwrap();
    assert_eq!(stored.scene_count, 2);
}

#[tokio::test]
async fn test_dispatch_failure_rolls_back() {
    let (cache, _) = memory_cache();

    let result = cache.submit(&landsat_query(), &FailingDispatcher).await;
    assert!(matches!(result, Err(CacheError::DispatchFailed(_))));

    let query_id = JobIdentity::new(LANDSAT_QUERY_ID);
    assert!(cache.lookup(&query_id).await.unwrap().is_none());

    // A later submit can dispatch again
    let dispatcher = CountingDispatcher::default();
    let record = cache.submit(&landsat_query(), &dispatcher).await.unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(dispatcher.count(), 1);
}

#[tokio::test]
async fn test_invalid_parameters_rejected_before_store() {
    let (cache, _) = memory_cache();
    let dispatcher = CountingDispatcher::default();

    let mut delimiter = landsat_query();
    delimiter.platform = "LANDSAT-7".to_string();

    let mut inverted_dates = landsat_query();
    std::mem::swap(&mut inverted_dates.time_start, &mut inverted_dates.time_end);

    let mut inverted_lat = landsat_query();
    inverted_lat.latitude_min = 30.0;

    let mut out_of_range = landsat_query();
    out_of_range.longitude_max = 181.0;

    let mut path_like = landsat_query();
    path_like.product = "ls7/ledaps?x#y".to_string();

    for params in [delimiter, inverted_dates, inverted_lat, out_of_range, path_like] {
        assert!(matches!(
            cache.submit(&params, &dispatcher).await,
            Err(CacheError::InvalidParameter(_))
        ));
    }
    assert_eq!(dispatcher.count(), 0);
}

#[tokio::test]
async fn test_extension_schema_and_record_extensions() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = JobFingerprintCache::new(store).with_schema(Arc::new(
        FieldSchema::new()
            .required("compositor")
            .one_of("compositor", &["most_recent", "median_pixel"]),
    ));
    let dispatcher = CountingDispatcher::default();

    assert!(matches!(
        cache.submit(&landsat_query(), &dispatcher).await,
        Err(CacheError::InvalidParameter(_))
    ));

    let mut params = landsat_query();
    params
        .extra
        .insert("compositor".to_string(), "median_pixel".to_string());
    let record = cache.submit(&params, &dispatcher).await.unwrap();

    assert_eq!(
        record.query_id.as_str(),
        format!("{LANDSAT_QUERY_ID}-compositor=median_pixel")
    );
    assert_eq!(
        record.extensions.get("compositor").map(String::as_str),
        Some("median_pixel")
    );
}
