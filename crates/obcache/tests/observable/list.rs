//! Observing lists: composition, local maintenance, paging, invalidation.

use std::sync::Arc;

use obcache::{
    FetchError, InvalidationMode, ListPayload, ObserveListOptions, ObserveOptions,
    OptimisticOutcome, PrimaryKey, Status,
};
use serde_json::json;

use crate::common::{client, employee, names, page, past_grace, recorder, settle, MockBackend};

fn engineering() -> ObserveListOptions {
    ObserveListOptions::new("Employee")
        .where_clause(json!({ "department": "Engineering" }))
        .order_by("name")
        .page_size(2)
}

fn seeded() -> Arc<MockBackend> {
    let backend = MockBackend::new();
    backend.set_page(
        "Employee",
        None,
        page(
            vec![
                employee(1, "Alice", "Engineer", "Engineering"),
                employee(2, "Carol", "Engineer", "Engineering"),
            ],
            None,
            Some(2),
        ),
    );
    backend
}

fn last(log: &parking_lot::Mutex<Vec<ListPayload>>) -> ListPayload {
    log.lock().last().cloned().expect("at least one payload")
}

// ============================================================================
// Loading and composition
// ============================================================================

#[tokio::test(start_paused = true)]
async fn emits_loading_then_resolved_members() {
    let backend = seeded();
    let client = client(&backend);

    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    {
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, Status::Loading);
        assert!(log[0].resolved_data.is_empty());
    }

    settle().await;
    let payload = last(&log);
    assert_eq!(payload.status, Status::Loaded);
    assert_eq!(names(&payload.resolved_data), ["Alice", "Carol"]);
    assert_eq!(payload.total_count, Some(2));
    assert!(!payload.has_more);
    assert!(!payload.is_optimistic);
    assert_eq!(log.lock().len(), 2, "members are composed in a single emission");

    let requests = backend.page_requests();
    assert_eq!(requests[0].where_clause, json!({ "department": "Engineering" }));
    assert_eq!(requests[0].page_size, 2);
    assert_eq!(requests[0].page_token, None);
}

#[tokio::test(start_paused = true)]
async fn concurrent_list_observers_share_one_fetch() {
    let backend = seeded();
    let client = client(&backend);

    let subs: Vec<_> = (0..4)
        .map(|_| client.observe_list(engineering(), |_| {}).expect("observe"))
        .collect();
    settle().await;

    assert_eq!(backend.page_fetches(), 1);
    let key = client.store().list_key(&engineering());
    assert_eq!(client.store().ref_count(&key), 4);
    for sub in subs {
        sub.unsubscribe();
    }
}

#[tokio::test(start_paused = true)]
async fn empty_result_emits_an_empty_list() {
    let backend = MockBackend::new();
    let client = client(&backend);

    let (log, observer) = recorder::<ListPayload>();
    let _sub = client
        .observe_list(ObserveListOptions::new("Employee"), observer)
        .expect("observe");
    settle().await;

    let payload = last(&log);
    assert_eq!(payload.status, Status::Loaded);
    assert!(payload.resolved_data.is_empty());
}

#[tokio::test(start_paused = true)]
async fn member_changes_keep_untouched_references() {
    let backend = seeded();
    let client = client(&backend);
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;
    let before = last(&log);

    client.store().batch(None, |b| {
        b.store_entity(employee(1, "Alice", "Lead", "Engineering"), Status::Loaded)
    });

    let after = last(&log);
    assert_eq!(
        after.resolved_data[0].get("title"),
        Some(&json!("Lead"))
    );
    assert!(!Arc::ptr_eq(&before.resolved_data[0], &after.resolved_data[0]));
    assert!(Arc::ptr_eq(&before.resolved_data[1], &after.resolved_data[1]));
}

#[tokio::test(start_paused = true)]
async fn members_are_retained_while_listed() {
    let backend = seeded();
    let client = client(&backend);
    let store = client.store();
    let _sub = client.observe_list(engineering(), |_| {}).expect("observe");
    settle().await;

    let alice = store.object_key("Employee", 1, &[]);
    let carol = store.object_key("Employee", 2, &[]);
    assert_eq!(store.ref_count(&alice), 1);
    assert_eq!(store.ref_count(&carol), 1);

    backend.set_page(
        "Employee",
        None,
        page(vec![employee(2, "Carol", "Engineer", "Engineering")], None, Some(1)),
    );
    client.invalidate_object_type("Employee");
    settle().await;

    assert_eq!(store.ref_count(&alice), 0);
    assert!(store.is_pending_cleanup(&alice));
    assert_eq!(store.ref_count(&carol), 1);
}

#[tokio::test(start_paused = true)]
async fn evicted_list_releases_its_members() {
    let backend = seeded();
    let client = client(&backend);
    let store = client.store();
    let sub = client.observe_list(engineering(), |_| {}).expect("observe");
    settle().await;

    sub.unsubscribe();
    settle().await;
    past_grace().await;
    let alice = store.object_key("Employee", 1, &[]);
    assert_eq!(store.ref_count(&alice), 0);
    assert!(store.is_pending_cleanup(&alice));

    past_grace().await;
    assert_eq!(store.live_key_count(), 0);
}

// ============================================================================
// Local maintenance
// ============================================================================

#[tokio::test(start_paused = true)]
async fn new_matching_entities_are_inserted_in_order() {
    let backend = seeded();
    let client = client(&backend);
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;

    client.store().batch(None, |b| {
        b.store_entity(employee(3, "Bob", "Engineer", "Engineering"), Status::Loaded);
        b.store_entity(employee(4, "Dave", "Seller", "Sales"), Status::Loaded);
    });

    assert_eq!(names(&last(&log).resolved_data), ["Alice", "Bob", "Carol"]);
    let bob = client.store().object_key("Employee", 3, &[]);
    assert_eq!(client.store().ref_count(&bob), 1);
}

#[tokio::test(start_paused = true)]
async fn committed_writes_drop_members_that_stop_matching() {
    let backend = seeded();
    let client = client(&backend);
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;

    client.store().batch(None, |b| {
        b.store_entity(employee(1, "Alice", "Engineer", "Sales"), Status::Loaded)
    });
    assert_eq!(names(&last(&log).resolved_data), ["Carol"]);
}

#[tokio::test(start_paused = true)]
async fn optimistic_writes_never_drop_members() {
    let backend = seeded();
    let client = client(&backend);
    let store = client.store();
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;

    let layer = store.begin_optimistic(|o| {
        o.update_object("Employee", 1, json!({ "department": "Sales" }));
    });
    let payload = last(&log);
    assert!(payload.is_optimistic);
    assert_eq!(names(&payload.resolved_data), ["Alice", "Carol"]);
    assert_eq!(payload.resolved_data[0].get("department"), Some(&json!("Sales")));

    store.resolve_optimistic(layer, OptimisticOutcome::RolledBack);
    let payload = last(&log);
    assert!(!payload.is_optimistic);
    assert_eq!(
        payload.resolved_data[0].get("department"),
        Some(&json!("Engineering"))
    );
}

#[tokio::test(start_paused = true)]
async fn optimistic_inserts_roll_back_with_their_layer() {
    let backend = seeded();
    let client = client(&backend);
    let store = client.store();
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;

    let layer = store.begin_optimistic(|o| {
        o.create_object(employee(3, "Bob", "Engineer", "Engineering"));
    });
    let payload = last(&log);
    assert!(payload.is_optimistic);
    assert_eq!(names(&payload.resolved_data), ["Alice", "Bob", "Carol"]);

    store.resolve_optimistic(layer, OptimisticOutcome::RolledBack);
    let payload = last(&log);
    assert!(!payload.is_optimistic);
    assert_eq!(names(&payload.resolved_data), ["Alice", "Carol"]);
}

#[tokio::test(start_paused = true)]
async fn deleted_members_are_removed() {
    let backend = seeded();
    let client = client(&backend);
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;

    client
        .store()
        .batch(None, |b| b.delete("Employee", &PrimaryKey::from(1)));
    assert_eq!(names(&last(&log).resolved_data), ["Carol"]);
}

// ============================================================================
// Paging
// ============================================================================

fn paged() -> Arc<MockBackend> {
    let backend = MockBackend::new();
    backend.set_page(
        "Employee",
        None,
        page(
            vec![
                employee(1, "Alice", "Engineer", "Engineering"),
                employee(2, "Carol", "Engineer", "Engineering"),
            ],
            Some("p2"),
            Some(3),
        ),
    );
    backend.set_page(
        "Employee",
        Some("p2"),
        page(vec![employee(5, "Eve", "Engineer", "Engineering")], None, Some(3)),
    );
    backend
}

#[tokio::test(start_paused = true)]
async fn fetch_more_appends_the_next_page() {
    let backend = paged();
    let client = client(&backend);
    let (log, observer) = recorder::<ListPayload>();
    let sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;

    let payload = last(&log);
    assert!(payload.has_more);
    assert_eq!(payload.total_count, Some(3));

    sub.fetch_more().await.expect("next page");
    let payload = last(&log);
    assert_eq!(names(&payload.resolved_data), ["Alice", "Carol", "Eve"]);
    assert!(!payload.has_more);
    assert_eq!(backend.page_requests()[1].page_token.as_deref(), Some("p2"));

    sub.fetch_more().await.expect("nothing left");
    assert_eq!(backend.page_fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetch_more_shares_one_request() {
    let backend = paged();
    let client = client(&backend);
    let sub = client.observe_list(engineering(), |_| {}).expect("observe");
    settle().await;

    let (a, b) = tokio::join!(sub.fetch_more(), sub.fetch_more());
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(backend.page_fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn fetch_more_while_loading_is_a_no_op() {
    let backend = paged();
    let client = client(&backend);
    let sub = client.observe_list(engineering(), |_| {}).expect("observe");

    sub.fetch_more().await.expect("skipped");
    settle().await;
    assert_eq!(backend.page_fetches(), 1);
    assert!(backend.page_requests().iter().all(|r| r.page_token.is_none()));
}

// ============================================================================
// Errors and invalidation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn page_failure_is_delivered_as_status() {
    let backend = seeded();
    backend.fail_pages(Some(FetchError::Rejected("bad filter".to_string())));
    let client = client(&backend);
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client.observe_list(engineering(), observer).expect("observe");
    settle().await;

    let payload = last(&log);
    assert_eq!(payload.status, Status::Error);
    assert_eq!(payload.error, Some(FetchError::Rejected("bad filter".to_string())));
    assert!(payload.resolved_data.is_empty());
}

async fn invalidated(mode: InvalidationMode) -> (ListPayload, ListPayload, usize) {
    let backend = seeded();
    let client = client(&backend);
    let (log, observer) = recorder::<ListPayload>();
    let _sub = client
        .observe_list(engineering().invalidation_mode(mode), observer)
        .expect("observe");
    settle().await;

    assert_eq!(client.invalidate_object_type("Employee"), 1);
    let during = last(&log);
    settle().await;
    (during, last(&log), backend.page_fetches())
}

#[tokio::test(start_paused = true)]
async fn invalidate_all_refetches_objects_and_lists() {
    let backend = seeded();
    backend.put_object(employee(3, "Dana", "Designer", "Design"));
    let client = client(&backend);
    let _object = client
        .observe_object("Employee", 3, ObserveOptions::new(), |_| {})
        .expect("observe object");
    let _list = client.observe_list(engineering(), |_| {}).expect("observe list");
    settle().await;
    assert_eq!(backend.object_fetches(), 1);
    assert_eq!(backend.page_fetches(), 1);

    assert_eq!(client.invalidate_all(), 2);
    settle().await;
    assert_eq!(backend.object_fetches(), 2);
    assert_eq!(backend.page_fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn in_place_invalidation_keeps_members_while_loading() {
    let (during, after, fetches) = invalidated(InvalidationMode::InPlace).await;
    assert_eq!(during.status, Status::Loading);
    assert_eq!(during.resolved_data.len(), 2);
    assert_eq!(after.status, Status::Loaded);
    assert_eq!(fetches, 2);
}

#[tokio::test(start_paused = true)]
async fn wait_invalidation_changes_nothing_until_the_result_lands() {
    let (during, after, fetches) = invalidated(InvalidationMode::Wait).await;
    assert_eq!(during.status, Status::Loaded);
    assert_eq!(during.resolved_data.len(), 2);
    assert_eq!(after.status, Status::Loaded);
    assert_eq!(fetches, 2);
}

#[tokio::test(start_paused = true)]
async fn reset_invalidation_clears_members() {
    let (during, after, fetches) = invalidated(InvalidationMode::Reset).await;
    assert_eq!(during.status, Status::Loading);
    assert!(during.resolved_data.is_empty());
    assert_eq!(names(&after.resolved_data), ["Alice", "Carol"]);
    assert_eq!(fetches, 2);
}
