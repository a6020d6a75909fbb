//! Observing single entities through the client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use obcache::{FetchError, ObjectPayload, ObserveOptions, Status};
use serde_json::json;

use crate::common::{client, employee, past_grace, recorder, settle, MockBackend};

// ============================================================================
// Loading
// ============================================================================

#[tokio::test(start_paused = true)]
async fn emits_loading_then_loaded() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);

    let (log, observer) = recorder::<ObjectPayload>();
    let sub = client
        .observe_object("Employee", 1, ObserveOptions::new(), observer)
        .expect("observe");

    {
        let log = log.lock();
        assert_eq!(log.len(), 1, "current payload delivered on subscribe");
        assert_eq!(log[0].status, Status::Loading);
        assert!(log[0].object.is_none());
    }

    settle().await;
    let log = log.lock();
    let last = log.last().expect("payload");
    assert_eq!(last.status, Status::Loaded);
    assert!(!last.is_optimistic);
    assert_eq!(
        last.object.as_ref().and_then(|o| o.get("name")).cloned(),
        Some(json!("Ada"))
    );
    assert_eq!(backend.object_fetches(), 1);
    drop(log);
    sub.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn concurrent_observers_share_one_fetch() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);

    let subs: Vec<_> = (0..3)
        .map(|_| {
            client
                .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
                .expect("observe")
        })
        .collect();
    settle().await;

    assert_eq!(backend.object_fetches(), 1);
    let key = client.store().object_key("Employee", 1, &[]);
    assert_eq!(client.store().ref_count(&key), 3);
    assert_eq!(client.observer_count(&key), 3);
    assert!(subs.iter().all(|s| Arc::ptr_eq(s.query(), subs[0].query())));
}

#[tokio::test(start_paused = true)]
async fn missing_entity_loads_as_none() {
    let backend = MockBackend::new();
    let client = client(&backend);

    let (log, observer) = recorder::<ObjectPayload>();
    let _sub = client
        .observe_object("Employee", 404, ObserveOptions::new(), observer)
        .expect("observe");
    settle().await;

    let log = log.lock();
    let last = log.last().expect("payload");
    assert_eq!(last.status, Status::Loaded);
    assert!(last.object.is_none());
    assert!(last.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_is_delivered_as_status() {
    let backend = MockBackend::new();
    backend.fail_objects(Some(FetchError::Transport("offline".to_string())));
    let client = client(&backend);

    let (log, observer) = recorder::<ObjectPayload>();
    let _sub = client
        .observe_object("Employee", 1, ObserveOptions::new(), observer)
        .expect("errors never surface from observe");
    settle().await;

    let log = log.lock();
    let last = log.last().expect("payload");
    assert_eq!(last.status, Status::Error);
    assert_eq!(last.error, Some(FetchError::Transport("offline".to_string())));
}

#[tokio::test(start_paused = true)]
async fn selected_fields_are_requested_and_observed() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);

    let (log, observer) = recorder::<ObjectPayload>();
    let _sub = client
        .observe_object(
            "Employee",
            1,
            ObserveOptions::new().select(["title", "name"]),
            observer,
        )
        .expect("observe");
    settle().await;

    let requests = backend.object_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].select, vec!["name".to_string(), "title".to_string()]);

    let log = log.lock();
    let object = log.last().and_then(|p| p.object.clone()).expect("loaded");
    assert_eq!(object.get("title"), Some(&json!("Engineer")));
    assert!(object.get("department").is_none());
}

// ============================================================================
// Distinct emissions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn identical_data_is_not_rebroadcast() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);

    let (log, observer) = recorder::<ObjectPayload>();
    let _sub = client
        .observe_object("Employee", 1, ObserveOptions::new(), observer)
        .expect("observe");
    settle().await;
    let before = log.lock().len();

    client.store().batch(None, |b| {
        b.store_entity(employee(1, "Ada", "Engineer", "Engineering"), Status::Loaded)
    });
    assert_eq!(log.lock().len(), before);

    client.store().batch(None, |b| {
        b.store_entity(employee(1, "Ada", "Manager", "Engineering"), Status::Loaded)
    });
    assert_eq!(log.lock().len(), before + 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_observer_does_not_starve_others() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);

    let _bad = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| panic!("observer bug"))
        .expect("observe");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _good = client
        .observe_object("Employee", 1, ObserveOptions::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("observe");
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2, "loading, then loaded");
}

// ============================================================================
// Retain / release through subscriptions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn immediate_resubscribe_keeps_the_reference() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);
    let store = client.store();
    let key = store.object_key("Employee", 1, &[]);

    let sub = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
        .expect("observe");
    settle().await;
    assert_eq!(store.ref_count(&key), 1);

    sub.unsubscribe();
    let (log, observer) = recorder::<ObjectPayload>();
    let _again = client
        .observe_object("Employee", 1, ObserveOptions::new(), observer)
        .expect("observe");
    assert_eq!(store.ref_count(&key), 1);

    settle().await;
    assert_eq!(store.ref_count(&key), 1);
    assert_eq!(store.stats().releases, 0);
    assert_eq!(store.stats().retains, 1);
    assert!(!store.is_pending_cleanup(&key));
    assert_eq!(backend.object_fetches(), 1);
    assert_eq!(log.lock()[0].status, Status::Loaded, "cached value reused");
}

#[tokio::test(start_paused = true)]
async fn last_unsubscribe_releases_once_then_evicts() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);
    let store = client.store();
    let key = store.object_key("Employee", 1, &[]);

    let first = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
        .expect("observe");
    let second = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
        .expect("observe");
    settle().await;

    first.unsubscribe();
    second.unsubscribe();
    assert_eq!(store.stats().releases, 0, "release is deferred");

    settle().await;
    assert_eq!(store.stats().releases, 2);
    assert_eq!(store.ref_count(&key), 0);
    assert!(store.is_pending_cleanup(&key));
    assert!(store.get(&key).is_some());

    past_grace().await;
    assert!(store.get(&key).is_none());
    assert_eq!(store.stats().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn resubscribe_during_grace_reuses_the_entry() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);
    let store = client.store();
    let key = store.object_key("Employee", 1, &[]);

    let sub = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
        .expect("observe");
    settle().await;
    sub.unsubscribe();
    settle().await;
    assert!(store.is_pending_cleanup(&key));

    let (log, observer) = recorder::<ObjectPayload>();
    let _again = client
        .observe_object("Employee", 1, ObserveOptions::new(), observer)
        .expect("observe");
    assert!(!store.is_pending_cleanup(&key));
    assert!(log.lock()[0].object.is_some(), "cached entity shown right away");

    past_grace().await;
    assert!(store.get(&key).is_some());
    assert_eq!(store.stats().evictions, 0);
}

// ============================================================================
// Invalidation and dedupe
// ============================================================================

#[tokio::test(start_paused = true)]
async fn invalidate_object_forces_a_refetch() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);

    let (log, observer) = recorder::<ObjectPayload>();
    let _sub = client
        .observe_object("Employee", 1, ObserveOptions::new(), observer)
        .expect("observe");
    settle().await;

    backend.put_object(employee(1, "Ada", "Director", "Engineering"));
    assert_eq!(client.invalidate_object("Employee", 1), 1);
    settle().await;

    assert_eq!(backend.object_fetches(), 2);
    let log = log.lock();
    let last = log.last().and_then(|p| p.object.clone()).expect("loaded");
    assert_eq!(last.get("title"), Some(&json!("Director")));
}

#[tokio::test(start_paused = true)]
async fn retains_within_the_dedupe_interval_do_not_refetch() {
    let backend = MockBackend::new();
    backend.put_object(employee(1, "Ada", "Engineer", "Engineering"));
    let client = client(&backend);

    let first = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
        .expect("observe");
    settle().await;
    let second = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
        .expect("observe");
    settle().await;
    assert_eq!(backend.object_fetches(), 1);

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    let _third = client
        .observe_object("Employee", 1, ObserveOptions::new(), |_| {})
        .expect("observe");
    settle().await;
    assert_eq!(backend.object_fetches(), 2, "dedupe window elapsed");

    first.unsubscribe();
    second.unsubscribe();
}
