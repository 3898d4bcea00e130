//! Process-local `ProductStore` with the same merge semantics as the Postgres
//! store. Backs `mp run --dry-run` and the pipeline tests.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use super::store::{ProductStore, ProductWrite};

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, Map<String, Value>>,
    batch_sizes: Vec<usize>,
    commits_attempted: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Fail the commit with this 0-based index.
    fail_commit_at: Option<usize>,
    fail_reads: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose `existing_ids` always errors.
    pub fn with_failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Store whose `n`-th commit (0-based) errors.
    pub fn with_failing_commit(mut self, n: usize) -> Self {
        self.fail_commit_at = Some(n);
        self
    }

    /// Seed a raw document, e.g. one written by another writer.
    pub fn seed(&self, id: &str, doc: Value) -> Result<()> {
        let Value::Object(map) = doc else {
            return Err(anyhow!("seed document for {id} must be an object"));
        };
        self.lock()?.docs.insert(id.to_string(), map);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.lock()
            .ok()?
            .docs
            .get(id)
            .map(|m| Value::Object(m.clone()))
    }

    /// Sizes of every successfully committed batch, in commit order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().map(|g| g.batch_sizes.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

fn updated_at(doc: &Map<String, Value>) -> Option<DateTime<Utc>> {
    doc.get("updatedAt")?
        .as_str()?
        .parse::<DateTime<Utc>>()
        .ok()
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn existing_ids(&self) -> Result<HashSet<String>> {
        if self.fail_reads {
            return Err(anyhow!("existing id scan unavailable"));
        }
        Ok(self.lock()?.docs.keys().cloned().collect())
    }

    async fn commit_batch(&self, batch: &[ProductWrite]) -> Result<()> {
        // Serialize first so a bad document leaves the store untouched.
        let mut staged = Vec::with_capacity(batch.len());
        for w in batch {
            match serde_json::to_value(&w.doc)? {
                Value::Object(fields) => staged.push((w.id.clone(), fields)),
                _ => return Err(anyhow!("document for {} is not an object", w.id)),
            }
        }

        let mut inner = self.lock()?;
        let attempt = inner.commits_attempted;
        inner.commits_attempted += 1;
        if self.fail_commit_at == Some(attempt) {
            return Err(anyhow!("simulated commit failure on batch {attempt}"));
        }
        for (id, fields) in staged {
            inner.docs.entry(id).or_default().extend(fields);
        }
        inner.batch_sizes.push(batch.len());
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.lock()?.docs.len() as i64)
    }

    async fn delete_updated_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64> {
        let mut inner = self.lock()?;
        let stale: Vec<String> = inner
            .docs
            .iter()
            .filter(|(_, doc)| updated_at(doc).is_some_and(|t| t <= cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        for chunk in stale.chunks(batch_size.max(1)) {
            for id in chunk {
                inner.docs.remove(id);
            }
        }
        Ok(stale.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}
