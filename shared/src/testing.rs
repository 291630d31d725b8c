//! In-memory collaborators for handler and router tests.

use async_trait::async_trait;
use lambda_http::Body;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::IdentityProvider;
use crate::blobs::{object_url, BlobStore, ListPage, ObjectMetadata};
use crate::config::Config;
use crate::email::Mailer;
use crate::error::{BlobError, IdentityError, MailError, ModelError, StoreError};
use crate::llm::{Completion, LanguageModel};
use crate::records::{RecordStore, Row, ScanPage};
use crate::token::Claims;
use crate::types::RequestContext;
use crate::AppState;

pub const TEST_SECRET: &str = "test-secret";

/// Build a row of string attributes
pub fn row(fields: &[(&str, &str)]) -> Row {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

/// Build a handler context the way the router does
pub fn context(method: &str, path: &str, body: &str, claims: Option<Claims>) -> RequestContext {
    let body = if body.is_empty() {
        Body::Empty
    } else {
        Body::Text(body.to_string())
    };
    let request = lambda_http::http::Request::builder()
        .method(method)
        .uri(path)
        .body(body)
        .expect("valid test request");
    RequestContext::new(request, claims)
}

pub fn metadata(fields: &[(&str, &str)]) -> ObjectMetadata {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const OFFSET_KEY: &str = "__offset";

#[derive(Default)]
pub struct MemoryRecordStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    failing: Mutex<HashSet<String>>,
    scan_calls: Mutex<HashMap<String, usize>>,
    page_size: usize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn insert(&self, table: &str, row: Row) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn fail_table(&self, table: &str) {
        self.failing.lock().unwrap().insert(table.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn scan_calls(&self, table: &str) -> usize {
        self.scan_calls
            .lock()
            .unwrap()
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    fn check(&self, table: &str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(table) {
            return Err(StoreError::backend(table, "simulated failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn query(&self, table: &str, key_name: &str, key_value: &str) -> Result<Vec<Row>, StoreError> {
        self.check(table)?;
        Ok(self
            .rows(table)
            .into_iter()
            .filter(|r| r.get(key_name).and_then(|v| v.as_str()) == Some(key_value))
            .collect())
    }

    async fn scan_page(&self, table: &str, start_key: Option<Row>) -> Result<ScanPage, StoreError> {
        self.check(table)?;
        *self
            .scan_calls
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default() += 1;

        let rows = self.rows(table);
        let start = start_key
            .and_then(|k| k.get(OFFSET_KEY).and_then(|v| v.as_u64()))
            .unwrap_or(0) as usize;
        let end = (start + self.page_size).min(rows.len());
        let items = rows.get(start..end).map(<[Row]>::to_vec).unwrap_or_default();

        let last_evaluated_key = if end < rows.len() {
            let mut key = Row::new();
            key.insert(OFFSET_KEY.to_string(), Value::from(end as u64));
            Some(key)
        } else {
            None
        };
        Ok(ScanPage {
            items,
            last_evaluated_key,
        })
    }

    async fn put(&self, table: &str, row: Row, unique_key: Option<&str>) -> Result<(), StoreError> {
        self.check(table)?;
        if let Some(key) = unique_key {
            let exists = self
                .rows(table)
                .iter()
                .any(|r| r.get(key).is_some() && r.get(key) == row.get(key));
            if exists {
                return Err(StoreError::AlreadyExists(table.to_string()));
            }
        }
        self.insert(table, row);
        Ok(())
    }

    async fn set_attribute(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        match rows
            .iter_mut()
            .find(|r| r.get(key_name).and_then(|v| v.as_str()) == Some(key_value))
        {
            Some(existing) => {
                existing.insert(attribute.to_string(), value);
            }
            None => {
                let mut fresh = Row::new();
                fresh.insert(key_name.to_string(), Value::String(key_value.to_string()));
                fresh.insert(attribute.to_string(), value);
                rows.push(fresh);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub metadata: ObjectMetadata,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    failing_lists: Mutex<HashSet<String>>,
    failing_presigns: Mutex<HashSet<String>>,
    failing_heads: Mutex<HashSet<String>>,
    head_calls: Mutex<usize>,
    page_size: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            page_size: 1000,
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, metadata: ObjectMetadata) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    bytes: Vec::new(),
                    content_type: "application/octet-stream".to_string(),
                    metadata,
                },
            );
    }

    pub fn fail_listing(&self, bucket: &str) {
        self.failing_lists.lock().unwrap().insert(bucket.to_string());
    }

    pub fn fail_presign(&self, key: &str) {
        self.failing_presigns.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_metadata(&self, key: &str) {
        self.failing_heads.lock().unwrap().insert(key.to_string());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn head_calls(&self) -> usize {
        *self.head_calls.lock().unwrap()
    }

    /// The URL `presign_get` hands out for an object
    pub fn presigned_url(bucket: &str, key: &str) -> String {
        format!("https://{}.presigned.test/{}?expires=3600", bucket, key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list_page(&self, bucket: &str, continuation: Option<String>) -> Result<ListPage, BlobError> {
        if self.failing_lists.lock().unwrap().contains(bucket) {
            return Err(BlobError::List {
                bucket: bucket.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        let keys = self.keys(bucket);
        let start = continuation.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(keys.len());
        let page = keys.get(start..end).map(<[String]>::to_vec).unwrap_or_default();
        let next_token = (end < keys.len()).then(|| end.to_string());
        Ok(ListPage {
            keys: page,
            next_token,
        })
    }

    async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, BlobError> {
        *self.head_calls.lock().unwrap() += 1;
        if self.failing_heads.lock().unwrap().contains(key) {
            return Err(BlobError::Head {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        self.object(bucket, key)
            .map(|o| o.metadata)
            .ok_or_else(|| BlobError::Head {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "NotFound".to_string(),
            })
    }

    async fn presign_get(&self, bucket: &str, key: &str, _expires_in: Duration) -> Result<String, BlobError> {
        if self.failing_presigns.lock().unwrap().contains(key) {
            return Err(BlobError::Presign {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        Ok(Self::presigned_url(bucket, key))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<String, BlobError> {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    bytes,
                    content_type: content_type.to_string(),
                    metadata,
                },
            );
        Ok(object_url(bucket, key))
    }
}

/// Language model that replays queued answers in order
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Completion>>,
}

impl ScriptedModel {
    pub fn push(&self, response: &str) {
        self.responses.lock().unwrap().push_back(response.to_string());
    }

    pub fn calls(&self) -> Vec<Completion> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &Completion) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ModelError::EmptyResponse)
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: Mutex<bool>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, from: &str, to: &[String], subject: &str, text: &str) -> Result<(), MailError> {
        if *self.failing.lock().unwrap() {
            return Err(MailError::Send("simulated failure".to_string()));
        }
        self.sent.lock().unwrap().push(SentMail {
            from: from.to_string(),
            to: to.to_vec(),
            subject: subject.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Identity provider with a fixed set of accepted credentials
#[derive(Default)]
pub struct StaticIdentity {
    accounts: Mutex<HashMap<String, String>>,
    registered: Mutex<HashSet<String>>,
}

impl StaticIdentity {
    pub fn allow(&self, email: &str, password: &str) {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), password.to_string());
    }

    pub fn is_registered(&self, email: &str) -> bool {
        self.registered.lock().unwrap().contains(email)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        match self.accounts.lock().unwrap().get(email) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(IdentityError::Rejected(
                "Incorrect email or password".to_string(),
            )),
        }
    }

    async fn register(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        if !self.registered.lock().unwrap().insert(email.to_string()) {
            return Err(IdentityError::Rejected(
                "An account with this email already exists".to_string(),
            ));
        }
        self.allow(email, password);
        Ok(())
    }
}

/// All in-memory collaborators plus the state that wires them together
pub struct TestHarness {
    pub config: Config,
    pub records: Arc<MemoryRecordStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub model: Arc<ScriptedModel>,
    pub mailer: Arc<RecordingMailer>,
    pub identity: Arc<StaticIdentity>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            config: Config::with_secret(TEST_SECRET),
            records: Arc::new(MemoryRecordStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            model: Arc::new(ScriptedModel::default()),
            mailer: Arc::new(RecordingMailer::default()),
            identity: Arc::new(StaticIdentity::default()),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        AppState::new(
            self.config.clone(),
            self.records.clone(),
            self.blobs.clone(),
            self.model.clone(),
            self.mailer.clone(),
            self.identity.clone(),
            reqwest::Client::new(),
        )
    }
}
