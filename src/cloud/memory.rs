use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};

use super::DocumentStore;

/// In-process document store.
///
/// Serves guest/offline builds and tests. Timestamps are strictly
/// increasing, and the `offline`/`fail_writes` switches simulate an
/// unreachable or rejecting backend.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<String, Value>>,
    last_time: Mutex<Option<DateTime<Utc>>>,
    offline: AtomicBool,
    fail_writes: AtomicBool,
    rejected_paths: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Rejects writes to any path containing `fragment`; other writes go
    /// through.
    pub fn reject_writes_to(&self, fragment: &str) {
        self.rejected_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fragment.to_string());
    }

    /// Number of operations attempted against the store.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw document insert, bypassing the failure switches.
    pub fn insert_raw(&self, path: &str, doc: Value) {
        self.lock().insert(path.to_string(), doc);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        match self.docs.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    fn begin(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::RemoteStore("document store unavailable".to_string()));
        }
        Ok(())
    }

    fn check_write(&self, path: &str) -> Result<()> {
        let rejected = self
            .rejected_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|fragment| path.contains(fragment.as_str()));
        if rejected || self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::RemoteStore(format!("write rejected: {path}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.begin()?;
        Ok(self.lock().get(path).cloned())
    }

    async fn set(&self, path: &str, doc: Value) -> Result<()> {
        self.begin()?;
        self.check_write(path)?;
        self.lock().insert(path.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.begin()?;
        self.check_write(path)?;
        self.lock().remove(path);
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        self.begin()?;
        let prefix = format!("{collection}/");
        let docs = self.lock();
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, doc)| {
                let id = &key[prefix.len()..];
                (!id.contains('/')).then(|| (id.to_string(), doc.clone()))
            })
            .collect())
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        self.begin()?;
        let mut last = match self.last_time.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        let now = Utc::now();
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(next);
        Ok(next)
    }

    async fn get_or_create(&self, path: &str, default: Value) -> Result<Value> {
        self.begin()?;
        let mut docs = self.lock();
        if let Some(existing) = docs.get(path) {
            return Ok(existing.clone());
        }
        self.check_write(path)?;
        docs.insert(path.to_string(), default.clone());
        Ok(default)
    }
}
