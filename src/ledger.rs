//! # Durable State Ledger
//! Crash-safe record of per-item processing status, stored as one JSON file.
//!
//! Every mutation rewrites the whole file via temp file + fsync + rename, after
//! copying the previous generation to `<file>.bak`. Loading never fails: a
//! corrupt primary is quarantined and the backup is tried before falling back to
//! an empty ledger.
//!
//! Pruning a completed entry keeps its last-seen fingerprint in a compact
//! `seen` map, so a restart never mistakes an old, unchanged note for a new one.
//!
//! Per-item state machine: `(none) -> in_progress -> {completed, failed}`.
//! Only the live holder of an item's claim (see [`Ledger::mark_in_progress`])
//! may move it to a terminal state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;

const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    InProgress,
    Completed,
    Failed,
}

impl LedgerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LedgerStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub item_id: String,
    pub status: LedgerStatus,
    pub last_attempt: DateTime<Utc>,
    /// Fingerprint of the body that was claimed.
    pub fingerprint: Fingerprint,
    /// Number of claims made for this item.
    #[serde(default)]
    pub attempts: u32,
    /// Fingerprint of the text written back on completion, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, LedgerEntry>,
    /// Last-seen fingerprint of completed items whose entries were pruned.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    seen: BTreeMap<String, Fingerprint>,
}

/// Outcome of trying to claim an item for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Entry is durably `in_progress`; the caller owns the item until it marks a terminal state.
    Claimed,
    /// Another live pipeline run holds this item.
    AlreadyClaimed,
    /// The checkpoint could not be persisted; nothing changed.
    NotDurable,
}

/// Bounds ledger growth: terminal entries older than `max_age` are dropped, then
/// the oldest terminal entries beyond `max_entries`.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::days(90),
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress_ids: Vec<String>,
}

pub struct Ledger {
    path: PathBuf,
    backup_path: PathBuf,
    tmp_path: PathBuf,
    clock: SharedClock,
    retention: RetentionPolicy,
    entries: Mutex<HashMap<String, LedgerEntry>>,
    seen: Mutex<BTreeMap<String, Fingerprint>>,
    claims: Mutex<HashSet<String>>,
    // Serializes file rewrites; the snapshot is taken while holding it.
    write_lock: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger.json".into());
    name.push(suffix);
    path.with_file_name(name)
}

impl Ledger {
    /// Open (or start) the ledger at `path`. Never fails; see module docs.
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Self {
        let path = path.into();
        let backup_path = sibling(&path, ".bak");
        let tmp_path = sibling(&path, ".tmp");
        let file = load_file(&path, &backup_path);
        let seen = file.seen.clone();
        let entries = into_map(file);
        info!(
            target: "ledger",
            path = %path.display(),
            entries = entries.len(),
            seen = seen.len(),
            "ledger loaded"
        );
        Self {
            path,
            backup_path,
            tmp_path,
            clock,
            retention: RetentionPolicy::default(),
            entries: Mutex::new(entries),
            seen: Mutex::new(seen),
            claims: Mutex::new(HashSet::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim `item_id` and durably record it as `in_progress`.
    ///
    /// At most one live claim per item exists in this process. Entries left
    /// `in_progress` by a previous process are not live claims and may be re-claimed.
    pub fn mark_in_progress(&self, item_id: &str, fp: &Fingerprint) -> Claim {
        if !lock(&self.claims).insert(item_id.to_string()) {
            debug!(target: "ledger", item_id, "item already claimed");
            return Claim::AlreadyClaimed;
        }

        let previous = {
            let mut entries = lock(&self.entries);
            let attempts = entries.get(item_id).map(|e| e.attempts).unwrap_or(0);
            entries.insert(
                item_id.to_string(),
                LedgerEntry {
                    item_id: item_id.to_string(),
                    status: LedgerStatus::InProgress,
                    last_attempt: self.clock.now(),
                    fingerprint: fp.clone(),
                    attempts: attempts.saturating_add(1),
                    output_fingerprint: None,
                    last_error: None,
                },
            )
        };

        match self.persist() {
            Ok(()) => {
                debug!(target: "ledger", item_id, fp = fp.short(), "claimed");
                Claim::Claimed
            }
            Err(e) => {
                error!(target: "ledger", item_id, error = %e, "in-progress checkpoint not durable");
                {
                    let mut entries = lock(&self.entries);
                    match previous {
                        Some(prev) => entries.insert(item_id.to_string(), prev),
                        None => entries.remove(item_id),
                    };
                }
                lock(&self.claims).remove(item_id);
                Claim::NotDurable
            }
        }
    }

    pub fn mark_completed(&self, item_id: &str) -> bool {
        self.finish(item_id, LedgerStatus::Completed, None, None)
    }

    /// Completed, remembering what was written back so the output itself is not
    /// mistaken for a fresh change.
    pub fn mark_completed_with_output(&self, item_id: &str, output: Fingerprint) -> bool {
        self.finish(item_id, LedgerStatus::Completed, Some(output), None)
    }

    pub fn mark_failed(&self, item_id: &str, reason: &str) -> bool {
        self.finish(
            item_id,
            LedgerStatus::Failed,
            None,
            Some(reason.to_string()),
        )
    }

    /// Drop the live claim without a terminal mark. The entry stays
    /// `in_progress` (with its timestamp) for recovery on the next start.
    pub fn release(&self, item_id: &str) {
        lock(&self.claims).remove(item_id);
    }

    fn finish(
        &self,
        item_id: &str,
        status: LedgerStatus,
        output: Option<Fingerprint>,
        error: Option<String>,
    ) -> bool {
        let applied = {
            let mut entries = lock(&self.entries);
            match entries.get_mut(item_id) {
                Some(e) if e.status == LedgerStatus::InProgress => {
                    e.status = status;
                    e.last_attempt = self.clock.now();
                    e.output_fingerprint = output;
                    e.last_error = error;
                    true
                }
                Some(e) => {
                    warn!(
                        target: "ledger",
                        item_id,
                        current = ?e.status,
                        requested = ?status,
                        "ignoring transition from a terminal state"
                    );
                    false
                }
                None => {
                    warn!(target: "ledger", item_id, requested = ?status, "no ledger entry to transition");
                    false
                }
            }
        };
        lock(&self.claims).remove(item_id);

        if applied {
            if let Err(e) = self.persist() {
                error!(target: "ledger", item_id, error = %e, "terminal state not persisted");
            }
        }
        applied
    }

    /// True iff this exact content was completed less than `window` ago.
    /// Failed entries never count.
    pub fn is_duplicate(&self, item_id: &str, fp: &Fingerprint, window: Duration) -> bool {
        let now = self.clock.now();
        let entries = lock(&self.entries);
        entries.get(item_id).is_some_and(|e| {
            e.status == LedgerStatus::Completed
                && e.fingerprint == *fp
                && now.signed_duration_since(e.last_attempt) < window
        })
    }

    /// Ids still `in_progress` and not held by a live run (crash-recovery candidates).
    pub fn recover_in_progress(&self) -> Vec<String> {
        let claims = lock(&self.claims);
        let entries = lock(&self.entries);
        let mut ids: Vec<String> = entries
            .values()
            .filter(|e| e.status == LedgerStatus::InProgress && !claims.contains(&e.item_id))
            .map(|e| e.item_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, item_id: &str) -> Option<LedgerEntry> {
        lock(&self.entries).get(item_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        let mut v: Vec<LedgerEntry> = lock(&self.entries).values().cloned().collect();
        v.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        v
    }

    /// Last processed fingerprint per item: the written output for researched
    /// items, the input otherwise. Includes items whose entries were pruned.
    pub fn known_fingerprints(&self) -> Vec<(String, Fingerprint)> {
        let mut known = lock(&self.seen).clone();
        for e in lock(&self.entries).values() {
            if e.status == LedgerStatus::Completed {
                known.insert(e.item_id.clone(), last_seen(e));
            }
        }
        known.into_iter().collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let entries = lock(&self.entries);
        let mut s = LedgerSummary {
            total: entries.len(),
            ..Default::default()
        };
        for e in entries.values() {
            match e.status {
                LedgerStatus::InProgress => {
                    s.in_progress += 1;
                    s.in_progress_ids.push(e.item_id.clone());
                }
                LedgerStatus::Completed => s.completed += 1,
                LedgerStatus::Failed => s.failed += 1,
            }
        }
        s.in_progress_ids.sort();
        s
    }

    /// Apply the retention policy. Returns the number of pruned entries.
    pub fn prune(&self) -> usize {
        let cutoff = self.clock.now() - self.retention.max_age;
        let pruned = {
            let mut entries = lock(&self.entries);
            let mut pruned = Vec::new();
            entries.retain(|_, e| {
                let keep = !e.status.is_terminal() || e.last_attempt >= cutoff;
                if !keep {
                    pruned.push(e.clone());
                }
                keep
            });

            if entries.len() > self.retention.max_entries {
                let excess = entries.len() - self.retention.max_entries;
                let mut terminal: Vec<(DateTime<Utc>, String)> = entries
                    .values()
                    .filter(|e| e.status.is_terminal())
                    .map(|e| (e.last_attempt, e.item_id.clone()))
                    .collect();
                terminal.sort();
                for (_, id) in terminal.into_iter().take(excess) {
                    pruned.extend(entries.remove(&id));
                }
            }
            pruned
        };

        let removed = pruned.len();
        if removed > 0 {
            let mut seen = lock(&self.seen);
            for e in pruned.iter().filter(|e| e.status == LedgerStatus::Completed) {
                seen.insert(e.item_id.clone(), last_seen(e));
            }
            drop(seen);
            info!(target: "ledger", removed, "pruned ledger entries");
            if let Err(e) = self.persist() {
                error!(target: "ledger", error = %e, "pruned ledger not persisted");
            }
        }
        removed
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let _guard = lock(&self.write_lock);
        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: lock(&self.entries)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            seen: lock(&self.seen).clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let res = self.write_atomically(&json);
        if res.is_err() {
            counter!("research_ledger_persist_errors_total").increment(1);
        }
        res
    }

    fn write_atomically(&self, bytes: &[u8]) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
            }
        }

        // One-generation backup of the current primary.
        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, &self.backup_path) {
                warn!(target: "ledger", error = %e, "could not refresh ledger backup");
            }
        }

        {
            let mut f = fs::File::create(&self.tmp_path)
                .map_err(|e| LedgerError::io(&self.tmp_path, e))?;
            f.write_all(bytes)
                .map_err(|e| LedgerError::io(&self.tmp_path, e))?;
            f.sync_all()
                .map_err(|e| LedgerError::io(&self.tmp_path, e))?;
        }
        fs::rename(&self.tmp_path, &self.path).map_err(|e| LedgerError::io(&self.path, e))?;
        sync_parent_dir(&self.path);
        Ok(())
    }
}

fn last_seen(e: &LedgerEntry) -> Fingerprint {
    e.output_fingerprint.clone().unwrap_or_else(|| e.fingerprint.clone())
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

fn read_ledger_file(path: &Path) -> Result<Option<LedgerFile>, LedgerError> {
    let s = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LedgerError::io(path, e)),
    };
    let file: LedgerFile = serde_json::from_str(&s)?;
    Ok(Some(file))
}

fn into_map(file: LedgerFile) -> HashMap<String, LedgerEntry> {
    file.entries
        .into_iter()
        .map(|(id, mut e)| {
            // The key is authoritative.
            e.item_id = id.clone();
            (id, e)
        })
        .collect()
}

fn load_file(path: &Path, backup: &Path) -> LedgerFile {
    match read_ledger_file(path) {
        Ok(Some(file)) => return file,
        Ok(None) => {}
        Err(e) => {
            warn!(target: "ledger", path = %path.display(), error = %e, "primary ledger unreadable; trying backup");
            let quarantine = sibling(path, ".corrupt");
            if let Err(e) = fs::rename(path, &quarantine) {
                warn!(target: "ledger", error = %e, "could not quarantine corrupt ledger");
            }
        }
    }

    match read_ledger_file(backup) {
        Ok(Some(file)) => {
            warn!(target: "ledger", path = %backup.display(), "ledger restored from backup");
            file
        }
        Ok(None) => LedgerFile::default(),
        Err(e) => {
            error!(target: "ledger", error = %e, "backup ledger unreadable; starting empty");
            LedgerFile::default()
        }
    }
}
