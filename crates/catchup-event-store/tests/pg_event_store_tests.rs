//! Integration tests for `PgEventStore`.

use std::sync::{Arc, Mutex};

use catchup_core::error::{BoxError, EventStoreError};
use catchup_core::event::{Event, StreamKey};
use catchup_core::store::{EventStore, ReplayHandler, ReplayOptions};
use catchup_core::stream::{NewStreamEvent, StreamEvent};
use catchup_event_store::PgEventStore;
use catchup_test_support::{MOCK_EVENT_TYPE, mock_event, mock_event_at, mock_stream_key};
use chrono::{Duration, Utc};
use sqlx::PgPool;

/// Helper to build a `NewStreamEvent` on a fresh stream.
fn make_new_event(stream_key: &StreamKey) -> NewStreamEvent {
    NewStreamEvent::new(
        stream_key.clone(),
        "user-created",
        serde_json::json!({"key": "value"}),
    )
}

fn unique_stream() -> StreamKey {
    StreamKey::new("user", uuid::Uuid::new_v4().to_string())
}

type Collected = Arc<Mutex<Vec<Vec<StreamEvent>>>>;

fn collector() -> (Collected, impl ReplayHandler) {
    let pages: Collected = Arc::default();
    let sink = Arc::clone(&pages);
    let handler = move |events: Vec<StreamEvent>| {
        sink.lock().unwrap().push(events);
        std::future::ready(Ok::<(), BoxError>(()))
    };
    (pages, handler)
}

// --- load ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_load_returns_empty_vec_for_nonexistent_stream(pool: PgPool) {
    let store = PgEventStore::new(pool);

    let events = store.load(&unique_stream()).await.unwrap();

    assert!(events.is_empty());
}

// --- save + load round-trip ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_save_and_load_single_event(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();

    let saved = store
        .save(&stream_key, 0, vec![make_new_event(&stream_key)])
        .await
        .unwrap();

    let loaded = store.load(&stream_key).await.unwrap();
    assert_eq!(loaded, saved);

    let e = &loaded[0];
    assert_eq!(e.stream_key(), stream_key);
    assert_eq!(e.sequence_no, 0);
    assert_eq!(e.event_type, "user-created");
    assert_eq!(e.event_version, 1);
    assert!(!e.event_id.is_empty());
    assert!(!e.correlation_id.is_empty());
    assert_eq!(e.payload["key"], "value");
    assert_eq!(e.payload["event_id"], serde_json::json!(e.event_id));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_batch_shares_correlation_id_and_gets_distinct_event_ids(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();

    let saved = store
        .save(
            &stream_key,
            0,
            vec![make_new_event(&stream_key), make_new_event(&stream_key)],
        )
        .await
        .unwrap();

    assert_eq!(saved[0].correlation_id, saved[1].correlation_id);
    assert_ne!(saved[0].event_id, saved[1].event_id);
    assert_eq!(saved[0].event_time, saved[1].event_time);
}

// --- ordering ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_sequential_saves_produce_contiguous_sequence_numbers(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();

    store
        .save(
            &stream_key,
            0,
            vec![make_new_event(&stream_key), make_new_event(&stream_key)],
        )
        .await
        .unwrap();
    store
        .save(&stream_key, 2, vec![make_new_event(&stream_key)])
        .await
        .unwrap();
    store
        .save(
            &stream_key,
            3,
            vec![make_new_event(&stream_key), make_new_event(&stream_key)],
        )
        .await
        .unwrap();

    let loaded = store.load(&stream_key).await.unwrap();
    assert_eq!(loaded.len(), 5);
    for (i, event) in loaded.iter().enumerate() {
        assert_eq!(event.sequence_no, i64::try_from(i).unwrap());
    }
}

// --- stream isolation ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_stream_isolation(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let user = StreamKey::new("user", "1");
    let group = StreamKey::new("group", "1");

    store.save(&user, 0, vec![make_new_event(&user)]).await.unwrap();
    store.save(&group, 0, vec![make_new_event(&group)]).await.unwrap();

    let loaded_user = store.load(&user).await.unwrap();
    let loaded_group = store.load(&group).await.unwrap();

    assert_eq!(loaded_user.len(), 1);
    assert_eq!(loaded_group.len(), 1);
    assert_eq!(loaded_user[0].stream_type, "user");
    assert_eq!(loaded_group[0].stream_type, "group");
}

// --- concurrency ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_stale_expected_revision_is_rejected(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();
    store
        .save(
            &stream_key,
            0,
            vec![make_new_event(&stream_key), make_new_event(&stream_key)],
        )
        .await
        .unwrap();

    let result = store
        .save(&stream_key, 0, vec![make_new_event(&stream_key)])
        .await;

    match result {
        Err(EventStoreError::ConcurrencyConflict {
            stream_key: conflicted,
            expected,
            actual,
        }) => {
            assert_eq!(conflicted, stream_key);
            assert_eq!(expected, 0);
            assert_eq!(actual, 2);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(store.load(&stream_key).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_first_save_with_nonzero_revision_is_rejected(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();

    let result = store
        .save(&stream_key, 1, vec![make_new_event(&stream_key)])
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { actual: 0, .. })
    ));
    assert!(store.load(&stream_key).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_saves_on_one_stream_admit_one_writer(pool: PgPool) {
    let store = Arc::new(PgEventStore::new(pool));
    let stream_key = unique_stream();
    store
        .save(&stream_key, 0, vec![make_new_event(&stream_key)])
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let store = Arc::clone(&store);
        let stream_key = stream_key.clone();
        handles.push(tokio::spawn(async move {
            store
                .save(&stream_key, 1, vec![make_new_event(&stream_key)])
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(e.is_concurrency_conflict(), "unexpected error: {e:?}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(store.load(&stream_key).await.unwrap().len(), 2);
}

// --- batch validation ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_event_id_in_batch_persists_nothing(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();

    let result = store
        .save(
            &stream_key,
            0,
            vec![
                make_new_event(&stream_key).with_event_id("dup"),
                make_new_event(&stream_key).with_event_id("dup"),
            ],
        )
        .await;

    assert!(matches!(result, Err(EventStoreError::DuplicateEventId(id)) if id == "dup"));
    assert!(store.load(&stream_key).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_event_id_reused_across_streams_is_rejected(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let first = unique_stream();
    let second = unique_stream();
    store
        .save(&first, 0, vec![make_new_event(&first).with_event_id("taken")])
        .await
        .unwrap();

    let result = store
        .save(&second, 0, vec![make_new_event(&second).with_event_id("taken")])
        .await;

    assert!(matches!(result, Err(EventStoreError::DuplicateEventId(id)) if id == "taken"));
    assert!(store.load(&second).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_event_for_another_stream_is_rejected(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();
    let other = unique_stream();

    let result = store
        .save(
            &stream_key,
            0,
            vec![make_new_event(&stream_key), make_new_event(&other)],
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::StreamKeyMismatch { .. })
    ));
    assert!(store.load(&stream_key).await.unwrap().is_empty());
}

// --- edge cases ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_save_empty_batch_is_noop(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();

    let saved = store.save(&stream_key, 0, vec![]).await.unwrap();
    let next = store
        .save(&stream_key, 0, vec![make_new_event(&stream_key)])
        .await
        .unwrap();

    assert!(saved.is_empty());
    assert_eq!(next[0].sequence_no, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_empty_save_at_stale_revision_is_rejected(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();
    store
        .save(&stream_key, 0, vec![make_new_event(&stream_key)])
        .await
        .unwrap();

    let result = store.save(&stream_key, 7, vec![]).await;

    match result {
        Err(EventStoreError::ConcurrencyConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 7);
            assert_eq!(actual, 1);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(store.load(&stream_key).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_complex_json_payload_round_trip(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let stream_key = unique_stream();
    let payload = serde_json::json!({
        "nested": {"key": "value", "number": 42},
        "array": [1, "two", null, true, false],
        "null_field": null,
        "empty_object": {},
    });

    store
        .save(
            &stream_key,
            0,
            vec![NewStreamEvent::new(stream_key.clone(), "user-created", payload.clone())],
        )
        .await
        .unwrap();

    let loaded = store.load(&stream_key).await.unwrap();
    assert_eq!(loaded[0].payload["nested"], payload["nested"]);
    assert_eq!(loaded[0].payload["array"], payload["array"]);
    assert_eq!(loaded[0].payload["null_field"], payload["null_field"]);
    assert_eq!(loaded[0].payload["empty_object"], payload["empty_object"]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_explicit_event_time_is_kept_at_microsecond_precision(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let time = Utc::now() - Duration::days(3);

    store
        .save(
            &mock_stream_key(),
            0,
            vec![mock_event_at("1", time).to_new_stream_event().unwrap()],
        )
        .await
        .unwrap();

    let loaded = store.load(&mock_stream_key()).await.unwrap();
    assert_eq!(
        loaded[0].event_time.timestamp_micros(),
        time.timestamp_micros()
    );
}

// --- replay ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_replay_delivers_events_after_watermark_in_time_order(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let now = Utc::now();
    let events = vec![
        mock_event_at("evt1", now - Duration::hours(4)),
        mock_event_at("evt3", now - Duration::hours(1)),
        mock_event_at("evt2", now - Duration::hours(2)),
    ]
    .iter()
    .map(|e| e.to_new_stream_event().unwrap())
    .collect();
    store.save(&mock_stream_key(), 0, events).await.unwrap();
    let (pages, handler) = collector();

    store
        .replay_events_by_type(
            &[MOCK_EVENT_TYPE.to_owned()],
            now - Duration::hours(3),
            &handler,
            ReplayOptions::default(),
        )
        .await
        .unwrap();

    let ids: Vec<String> = pages
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|e| e.event_id.clone())
        .collect();
    assert_eq!(ids, vec!["evt2", "evt3"]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_replay_pages_by_batch_size_and_filters_types(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let since = Utc::now() - Duration::hours(1);
    let events: Vec<NewStreamEvent> = (0..5)
        .map(|i| mock_event(&format!("m{i}")).to_new_stream_event().unwrap())
        .collect();
    store.save(&mock_stream_key(), 0, events).await.unwrap();
    let other = unique_stream();
    store.save(&other, 0, vec![make_new_event(&other)]).await.unwrap();
    let (pages, handler) = collector();

    store
        .replay_events_by_type(
            &[MOCK_EVENT_TYPE.to_owned()],
            since,
            &handler,
            ReplayOptions::with_batch_size(2),
        )
        .await
        .unwrap();

    let sizes: Vec<usize> = pages.lock().unwrap().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    let seqs: Vec<i64> = pages
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|e| e.sequence_no)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_replay_handler_error_stops_replay(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let events: Vec<NewStreamEvent> = (0..3)
        .map(|i| mock_event(&format!("m{i}")).to_new_stream_event().unwrap())
        .collect();
    store.save(&mock_stream_key(), 0, events).await.unwrap();
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let handler = move |_events: Vec<StreamEvent>| {
        *counter.lock().unwrap() += 1;
        std::future::ready(Err::<(), BoxError>("projection failed".into()))
    };

    let result = store
        .replay_events_by_type(
            &[MOCK_EVENT_TYPE.to_owned()],
            Utc::now() - Duration::hours(1),
            &handler,
            ReplayOptions::with_batch_size(1),
        )
        .await;

    assert!(matches!(result, Err(EventStoreError::Replay(_))));
    assert_eq!(*calls.lock().unwrap(), 1);
}
