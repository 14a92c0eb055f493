// src/source/memory.rs
//! In-memory source for tests and dry runs, with failure injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};

use super::{Item, SourceWatcher};

#[derive(Debug, Default)]
pub struct MemorySource {
    items: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
    fail_polls: AtomicBool,
    writes: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: &str, body: &str) {
        self.items().insert(id.to_string(), body.to_string());
    }

    pub fn remove(&self, id: &str) {
        self.items().remove(id);
    }

    pub fn body(&self, id: &str) -> Option<String> {
        self.items().get(id).cloned()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn container(id: &str) -> String {
        id.split_once('/')
            .map(|(c, _)| c.to_string())
            .unwrap_or_else(|| "memory".to_string())
    }
}

#[async_trait::async_trait]
impl SourceWatcher for MemorySource {
    async fn poll_changes(&self) -> Result<Vec<Item>> {
        if self.fail_polls.load(Ordering::SeqCst) {
            bail!("poll failure injected");
        }
        Ok(self
            .items()
            .iter()
            .map(|(id, body)| Item::new(id.clone(), body.clone(), Self::container(id), None))
            .collect())
    }

    async fn fetch_item(&self, id: &str) -> Result<Option<Item>> {
        if self.fail_polls.load(Ordering::SeqCst) {
            bail!("fetch failure injected");
        }
        Ok(self
            .items()
            .get(id)
            .map(|body| Item::new(id, body.clone(), Self::container(id), None)))
    }

    async fn write_result(&self, id: &str, text: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("write failure injected for {id}");
        }
        let mut items = self.items();
        match items.get_mut(id) {
            Some(body) => {
                *body = text.to_string();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => bail!("no such item: {id}"),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
