//! Runs the worker's listener against in-memory collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use catchup_cluster_lock::{InMemoryLocker, LockOptions};
use catchup_core::error::BoxError;
use catchup_core::event::{Event, RawEvent, StreamKey};
use catchup_core::store::EventStore;
use catchup_core::stream::{NewStreamEvent, StreamEvent};
use catchup_event_bus::{
    BrokerEventPublisher, CatchUpDependencies, CatchUpListenerFactory, EventDeduplicator,
    InMemoryBroker, MemoryDeduplicator,
};
use catchup_event_store::InMemoryEventStore;
use catchup_worker::config::Config;
use catchup_worker::worker::{raw_event_mapper, replay_watermark, run_listener};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn config() -> Config {
    Config::from_lookup(|key| {
        let value = match key {
            "DATABASE_URL" => "postgres://unused",
            "REDIS_URL" => "redis://unused",
            "AMQP_URL" => "amqp://unused",
            "LISTENER_NAME" => "user-directory",
            "LISTENER_EVENT_TYPES" => "UserCreated",
            _ => return None,
        };
        Some(value.to_owned())
    })
    .unwrap()
}

async fn save(store: &InMemoryEventStore, revision: i64, event_type: &str) -> Vec<StreamEvent> {
    let key = StreamKey::new("user", "u-1");
    let event = NewStreamEvent::new(key.clone(), event_type, json!({ "name": "Ada" }));
    store.save(&key, revision, vec![event]).await.unwrap()
}

fn factory(store: Arc<InMemoryEventStore>, broker: &InMemoryBroker) -> CatchUpListenerFactory<RawEvent> {
    let config = config();
    let deps = CatchUpDependencies {
        store: store as Arc<dyn EventStore>,
        broker: Arc::new(broker.clone()),
        mapper: Arc::new(raw_event_mapper(&config.event_types).unwrap()),
        watermark: replay_watermark(None).unwrap(),
        locker: Arc::new(InMemoryLocker::new()),
        lock_options: LockOptions::default(),
    };
    CatchUpListenerFactory::new(
        deps,
        Arc::new(|_name: &str| {
            Arc::new(MemoryDeduplicator::new(10)) as Arc<dyn EventDeduplicator<RawEvent>>
        }),
    )
}

#[tokio::test]
async fn test_run_listener_replays_history_and_stops_on_cancel() {
    let store = Arc::new(InMemoryEventStore::new());
    let saved = save(&store, 0, "UserCreated").await;
    let broker = InMemoryBroker::new();
    let factory = factory(Arc::clone(&store), &broker);
    let config = config();
    let cancel = CancellationToken::new();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let stop = cancel.clone();
    let handler = move |events: Vec<RawEvent>| {
        let sink = Arc::clone(&sink);
        let stop = stop.clone();
        async move {
            sink.lock().unwrap().extend(events);
            stop.cancel();
            Ok::<(), BoxError>(())
        }
    };

    tokio::time::timeout(
        Duration::from_secs(5),
        run_listener(&factory, &config, &cancel, &handler),
    )
    .await
    .unwrap()
    .unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event_id(), saved[0].event_id);
    assert_eq!(received[0].event_type(), "UserCreated");
    assert_eq!(received[0].data.get("name"), Some(&json!("Ada")));
}

#[tokio::test]
async fn test_run_listener_binds_the_configured_types() {
    let store = Arc::new(InMemoryEventStore::new());
    let broker = InMemoryBroker::new();
    let factory = factory(Arc::clone(&store), &broker);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let ignore = |_events: Vec<RawEvent>| async { Ok::<(), BoxError>(()) };
    run_listener(&factory, &config(), &cancel, &ignore)
        .await
        .unwrap();

    let publisher = BrokerEventPublisher::new(broker.clone());
    publisher.publish(&save(&store, 0, "UserCreated").await).await.unwrap();
    publisher.publish(&save(&store, 1, "UserDeleted").await).await.unwrap();

    assert_eq!(broker.ready_count("user-directory"), 1);
}
