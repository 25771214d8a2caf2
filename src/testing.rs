//! In-memory doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::backend::{Backend, BackendError, BackendProvider, EmailMessage, EntityKind, LlmRequest, User};
use crate::media::video::VideoProbe;
use crate::media::{MediaError, MediaFile};
use crate::store::{KeyValueStore, MemoryStore, StoreError, UpdateFn};

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn test_user() -> User {
    User {
        id: "u1".into(),
        email: "owner@example.com".into(),
        full_name: Some("Sam Owner".into()),
        ..Default::default()
    }
}

/// Entity tables, scripted model answers and call counters.
#[derive(Default)]
pub struct MockBackend {
    tables: Mutex<HashMap<&'static str, Vec<Value>>>,
    next_id: AtomicUsize,
    user: Mutex<Option<User>>,
    llm_script: Mutex<VecDeque<Result<Value, BackendError>>>,
    prompts: Mutex<Vec<String>>,
    emails: Mutex<Vec<EmailMessage>>,
    failing_recipients: Mutex<Vec<String>>,
    upload_failures: Mutex<VecDeque<BackendError>>,
    update_failures: Mutex<VecDeque<BackendError>>,
    uploads: AtomicUsize,
    llm_calls: AtomicUsize,
    creates: AtomicUsize,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in() -> Self {
        let backend = Self::new();
        *backend.user.lock().unwrap() = Some(test_user());
        backend
    }

    /// Model answers, consumed in order.
    pub fn script_llm(&self, responses: impl IntoIterator<Item = Value>) {
        self.llm_script
            .lock()
            .unwrap()
            .extend(responses.into_iter().map(Ok));
    }

    pub fn script_llm_error(&self, err: BackendError) {
        self.llm_script.lock().unwrap().push_back(Err(err));
    }

    pub fn fail_next_uploads(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.upload_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_next_updates(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.update_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_emails_to(&self, address: &str) {
        self.failing_recipients.lock().unwrap().push(address.to_string());
    }

    /// Inserts a raw row, filling in `id` and `created_date`.
    pub fn seed(&self, entity: EntityKind, row: Value) -> String {
        let row = self.stamp(row);
        let id = row["id"].as_str().unwrap_or_default().to_string();
        self.tables
            .lock()
            .unwrap()
            .entry(entity.name())
            .or_default()
            .push(row);
        id
    }

    pub fn rows(&self, entity: EntityKind) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(entity.name())
            .cloned()
            .unwrap_or_default()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn llm_count(&self) -> usize {
        self.llm_calls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Every trait call, reads included.
    pub fn network_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn find(&self, entity: EntityKind, id: &str) -> Result<Value, BackendError> {
        self.rows(entity)
            .into_iter()
            .find(|row| row["id"] == id)
            .ok_or_else(|| Self::not_found(entity, id))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn emails(&self) -> Vec<EmailMessage> {
        self.emails.lock().unwrap().clone()
    }

    fn stamp(&self, row: Value) -> Value {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut obj = match row {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        obj.entry("id").or_insert_with(|| json!(format!("id{n}")));
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n as i64);
        obj.entry("created_date")
            .or_insert_with(|| json!(created.to_rfc3339()));
        Value::Object(obj)
    }

    fn not_found(entity: EntityKind, id: &str) -> BackendError {
        BackendError::Http {
            status: 404,
            message: format!("{} {id} not found", entity.name()),
        }
    }
}

fn matches(row: &Value, query: &Value) -> bool {
    match query.as_object() {
        Some(q) => q.iter().all(|(k, v)| &row[k] == v),
        None => true,
    }
}

fn sorted(mut rows: Vec<Value>, sort: Option<&str>) -> Vec<Value> {
    if let Some(sort) = sort {
        let (field, desc) = match sort.strip_prefix('-') {
            Some(field) => (field, true),
            None => (sort, false),
        };
        rows.sort_by(|a, b| {
            let a = a[field].as_str().unwrap_or_default();
            let b = b[field].as_str().unwrap_or_default();
            if desc {
                b.cmp(a)
            } else {
                a.cmp(b)
            }
        });
    }
    rows
}

#[async_trait]
impl Backend for MockBackend {
    async fn list(&self, entity: EntityKind, sort: Option<&str>, limit: Option<u32>) -> Result<Vec<Value>, BackendError> {
        self.hit();
        let mut rows = sorted(self.rows(entity), sort);
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn filter(&self, entity: EntityKind, query: Value, sort: Option<&str>) -> Result<Vec<Value>, BackendError> {
        self.hit();
        let rows = self
            .rows(entity)
            .into_iter()
            .filter(|row| matches(row, &query))
            .collect();
        Ok(sorted(rows, sort))
    }

    async fn get(&self, entity: EntityKind, id: &str) -> Result<Value, BackendError> {
        self.hit();
        self.find(entity, id)
    }

    async fn create(&self, entity: EntityKind, data: Value) -> Result<Value, BackendError> {
        self.hit();
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = self.seed(entity, data);
        self.find(entity, &id)
    }

    async fn update(&self, entity: EntityKind, id: &str, data: Value) -> Result<Value, BackendError> {
        self.hit();
        if let Some(err) = self.update_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .get_mut(entity.name())
            .and_then(|rows| rows.iter_mut().find(|row| row["id"] == id))
            .ok_or_else(|| Self::not_found(entity, id))?;
        if let (Some(target), Some(patch)) = (row.as_object_mut(), data.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, entity: EntityKind, id: &str) -> Result<(), BackendError> {
        self.hit();
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(entity.name()).or_default();
        let before = rows.len();
        rows.retain(|row| row["id"] != id);
        if rows.len() == before {
            return Err(Self::not_found(entity, id));
        }
        Ok(())
    }

    async fn me(&self) -> Result<User, BackendError> {
        self.hit();
        self.user.lock().unwrap().clone().ok_or(BackendError::Http {
            status: 401,
            message: "Unauthorized".into(),
        })
    }

    async fn update_me(&self, data: Value) -> Result<User, BackendError> {
        self.hit();
        let mut guard = self.user.lock().unwrap();
        let user = guard.as_mut().ok_or(BackendError::Http {
            status: 401,
            message: "Unauthorized".into(),
        })?;
        let mut json = serde_json::to_value(&*user).unwrap();
        if let (Some(target), Some(patch)) = (json.as_object_mut(), data.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        *user = serde_json::from_value(json).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(user.clone())
    }

    async fn upload_file(&self, file: &MediaFile) -> Result<String, BackendError> {
        self.hit();
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.upload_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(format!("https://files.test/{n}/{}", file.file_name))
    }

    async fn invoke_llm(&self, request: &LlmRequest) -> Result<Value, BackendError> {
        self.hit();
        self.llm_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        self.llm_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Decode("no scripted response".into())))
    }

    async fn send_email(&self, email: &EmailMessage) -> Result<(), BackendError> {
        self.hit();
        if self.failing_recipients.lock().unwrap().contains(&email.to) {
            return Err(BackendError::Http {
                status: 500,
                message: "mail relay down".into(),
            });
        }
        self.emails.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// A token the platform does not recognise.
pub const REJECTED_TOKEN: &str = "expired";

/// Signed-in callers share one backend, anonymous callers (and
/// [`REJECTED_TOKEN`]) another.
pub struct MockProvider {
    pub signed_in: Arc<MockBackend>,
    pub anonymous: Arc<MockBackend>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            signed_in: Arc::new(MockBackend::signed_in()),
            anonymous: Arc::new(MockBackend::new()),
        }
    }
}

impl BackendProvider for MockProvider {
    fn session(&self, token: Option<&str>) -> Arc<dyn Backend> {
        match token {
            Some(token) if token != REJECTED_TOKEN => self.signed_in.clone(),
            _ => self.anonymous.clone(),
        }
    }

    fn login_url(&self, return_to: &str) -> String {
        format!("https://login.test/?from_url={return_to}")
    }

    fn logout_url(&self, return_to: &str) -> String {
        format!("https://login.test/logout?from_url={return_to}")
    }
}

/// Fixed-duration probe; `broken()` behaves like an undecodable container.
pub struct StubProbe {
    duration: Option<f64>,
}

impl StubProbe {
    pub fn with_duration(seconds: f64) -> Self {
        Self {
            duration: Some(seconds),
        }
    }

    pub fn broken() -> Self {
        Self { duration: None }
    }
}

#[async_trait]
impl VideoProbe for StubProbe {
    async fn duration_seconds(&self, _file: &MediaFile) -> Result<f64, MediaError> {
        self.duration
            .ok_or_else(|| MediaError::Metadata("unsupported codec".into()))
    }

    async fn frames_at(&self, _file: &MediaFile, timestamps: &[f64]) -> Result<Vec<Vec<u8>>, MediaError> {
        if self.duration.is_none() {
            return Err(MediaError::Decode("unsupported codec".into()));
        }
        Ok(timestamps
            .iter()
            .map(|t| format!("frame@{t:.2}").into_bytes())
            .collect())
    }
}

/// `MemoryStore` that suspends before every operation, so concurrent callers
/// interleave the way they would against Redis.
#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.remove(key).await
    }

    async fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.update(key, apply).await
    }
}
