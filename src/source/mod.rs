// src/source/mod.rs
//! Where notes come from and where researched notes go back to.

pub mod folder;
pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

pub use folder::FolderSource;
pub use memory::MemorySource;

/// Snapshot of one note as seen by a single poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub body: String,
    pub container: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub fingerprint: Fingerprint,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        body: impl Into<String>,
        container: impl Into<String>,
        modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        let body = body.into();
        let fingerprint = Fingerprint::of(&body);
        Self {
            id: id.into(),
            body,
            container: container.into(),
            modified_at,
            fingerprint,
        }
    }
}

#[async_trait::async_trait]
pub trait SourceWatcher: Send + Sync {
    /// Current snapshot of every item; change detection happens downstream.
    async fn poll_changes(&self) -> Result<Vec<Item>>;
    /// `Ok(None)` when the item no longer exists.
    async fn fetch_item(&self, id: &str) -> Result<Option<Item>>;
    /// Replace the item's content. A failure must leave the original untouched.
    async fn write_result(&self, id: &str, text: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}
