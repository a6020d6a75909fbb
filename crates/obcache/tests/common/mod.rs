//! Shared fixtures: an in-memory backend that records every call.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use obcache::{
    ActionError, ActionOutcome, Backend, CacheOptions, Entity, FetchError, ObjectRequest,
    ObservableClient, Page, PageRequest, PrimaryKey,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const FETCH_DELAY: Duration = Duration::from_millis(10);
pub const ACTION_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// MockBackend
// ============================================================================

#[derive(Default)]
pub struct MockBackend {
    objects: Mutex<HashMap<(String, PrimaryKey), Entity>>,
    pages: Mutex<HashMap<(String, Option<String>), Page>>,
    object_error: Mutex<Option<FetchError>>,
    page_error: Mutex<Option<FetchError>>,
    actions: Mutex<HashMap<String, Result<ActionOutcome, ActionError>>>,
    object_fetches: AtomicUsize,
    page_fetches: AtomicUsize,
    action_calls: AtomicUsize,
    object_requests: Mutex<Vec<ObjectRequest>>,
    page_requests: Mutex<Vec<PageRequest>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_object(&self, entity: Entity) {
        self.objects
            .lock()
            .insert((entity.entity_type.clone(), entity.primary_key.clone()), entity);
    }

    pub fn set_page(&self, entity_type: &str, token: Option<&str>, page: Page) {
        self.pages
            .lock()
            .insert((entity_type.to_string(), token.map(str::to_string)), page);
    }

    pub fn fail_objects(&self, error: Option<FetchError>) {
        *self.object_error.lock() = error;
    }

    pub fn fail_pages(&self, error: Option<FetchError>) {
        *self.page_error.lock() = error;
    }

    pub fn set_action(&self, action: &str, result: Result<ActionOutcome, ActionError>) {
        self.actions.lock().insert(action.to_string(), result);
    }

    pub fn object_fetches(&self) -> usize {
        self.object_fetches.load(Ordering::SeqCst)
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn action_calls(&self) -> usize {
        self.action_calls.load(Ordering::SeqCst)
    }

    pub fn object_requests(&self) -> Vec<ObjectRequest> {
        self.object_requests.lock().clone()
    }

    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.page_requests.lock().clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_object(&self, request: &ObjectRequest) -> Result<Option<Entity>, FetchError> {
        self.object_fetches.fetch_add(1, Ordering::SeqCst);
        self.object_requests.lock().push(request.clone());
        tokio::time::sleep(FETCH_DELAY).await;

        if let Some(e) = self.object_error.lock().clone() {
            return Err(e);
        }
        let found = self
            .objects
            .lock()
            .get(&(request.entity_type.clone(), request.primary_key.clone()))
            .cloned();
        Ok(found.map(|entity| {
            if request.select.is_empty() {
                entity
            } else {
                entity.project(&request.select)
            }
        }))
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        self.page_requests.lock().push(request.clone());
        tokio::time::sleep(FETCH_DELAY).await;

        if let Some(e) = self.page_error.lock().clone() {
            return Err(e);
        }
        let page = self
            .pages
            .lock()
            .get(&(request.entity_type.clone(), request.page_token.clone()))
            .cloned();
        Ok(page.unwrap_or_default())
    }

    async fn apply_action(&self, action: &str, _args: &Value) -> Result<ActionOutcome, ActionError> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(ACTION_DELAY).await;

        let result = self.actions.lock().get(action).cloned();
        result.unwrap_or_else(|| {
            Err(ActionError::Failed {
                action: action.to_string(),
                message: "unknown action".to_string(),
            })
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn employee(pk: i64, name: &str, title: &str, department: &str) -> Entity {
    Entity::new(
        "Employee",
        pk,
        json!({ "name": name, "title": title, "department": department }),
    )
}

pub fn page(data: Vec<Entity>, next_page_token: Option<&str>, total_count: Option<u64>) -> Page {
    Page {
        data,
        next_page_token: next_page_token.map(str::to_string),
        total_count,
    }
}

/// Route cache logs to the test harness. Filter with `RUST_LOG=obcache=trace`.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn client(backend: &Arc<MockBackend>) -> ObservableClient {
    init_tracing();
    ObservableClient::new(Arc::clone(backend) as Arc<dyn Backend>, CacheOptions::default())
}

pub fn client_with(backend: &Arc<MockBackend>, options: CacheOptions) -> ObservableClient {
    init_tracing();
    ObservableClient::new(Arc::clone(backend) as Arc<dyn Backend>, options)
}

/// A shared call-log plus an observer that appends to it.
pub fn recorder<T: Clone + Send + Sync + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |payload: &T| sink.lock().push(payload.clone()))
}

/// Let every in-flight fetch land. Time is paused in these tests, so this
/// only advances the virtual clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Advance past the default cleanup grace period.
pub async fn past_grace() {
    tokio::time::sleep(Duration::from_secs(61)).await;
}

pub fn names(data: &[Arc<Entity>]) -> Vec<String> {
    data.iter()
        .map(|e| e.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
        .collect()
}
