//! # Orchestrator Loop
//! Drives poll -> fingerprint diff -> ledger dedup/claim -> analysis + gate ->
//! fan-out -> synthesis -> write-back -> ledger commit.
//!
//! Items reported by one poll run concurrently (bounded by a semaphore). The
//! ledger claim, not the loop, guarantees a single pipeline run per item.
//! On startup `in_progress` leftovers are re-run or marked failed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::analyze::{normalize_text, ContentAnalyzer};
use crate::clock::{system_clock, SharedClock};
use crate::config::BotConfig;
use crate::fanout::{FanoutExecutor, FanoutResults};
use crate::fingerprint::{self, Fingerprint, FingerprintCache};
use crate::format::{format_researched_note, user_text};
use crate::gate::AdmissionGate;
use crate::ledger::{Claim, Ledger};
use crate::shutdown::Shutdown;
use crate::source::{Item, SourceWatcher};
use crate::synth::{is_placeholder, synthesize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyBody,
    Unchanged,
    Duplicate,
    AlreadyClaimed,
    LedgerUnavailable,
    SourceUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Skipped { reason: SkipReason },
    /// `researched == false` means the gate declined it.
    Done { researched: bool },
    Failed { reason: String },
    /// Shutdown interrupted the run; the ledger entry stays `in_progress`.
    Cancelled,
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Skipped { .. } => "skipped",
            ItemOutcome::Done { researched: true } => "researched",
            ItemOutcome::Done { researched: false } => "not_admitted",
            ItemOutcome::Failed { .. } => "failed",
            ItemOutcome::Cancelled => "cancelled",
        }
    }
}

/// Counts for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub polled: usize,
    pub researched: usize,
    pub not_admitted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub poll_failed: bool,
}

impl CycleReport {
    fn add(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped { .. } => self.skipped += 1,
            ItemOutcome::Done { researched: true } => self.researched += 1,
            ItemOutcome::Done { researched: false } => self.not_admitted += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
            ItemOutcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn done(&self) -> usize {
        self.researched + self.not_admitted
    }
}

/// Running totals since start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub cycles: u64,
    pub recovered: u64,
    pub researched: u64,
    pub not_admitted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Failed provider calls by error class.
    pub provider_errors: BTreeMap<String, u64>,
}

impl RunStats {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped { .. } => self.skipped += 1,
            ItemOutcome::Done { researched: true } => self.researched += 1,
            ItemOutcome::Done { researched: false } => self.not_admitted += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
            ItemOutcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn processed(&self) -> u64 {
        self.researched + self.not_admitted + self.failed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub dedup_window: chrono::Duration,
    pub max_concurrent_items: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            dedup_window: chrono::Duration::hours(1),
            max_concurrent_items: 4,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &BotConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            dedup_window: cfg.dedup_window(),
            max_concurrent_items: cfg.max_concurrent_items.max(1),
        }
    }
}

pub struct Orchestrator {
    source: Arc<dyn SourceWatcher>,
    analyzer: Arc<dyn ContentAnalyzer>,
    gate: AdmissionGate,
    fanout: FanoutExecutor,
    ledger: Arc<Ledger>,
    clock: SharedClock,
    settings: OrchestratorSettings,
    limiter: Arc<Semaphore>,
    known: Mutex<FingerprintCache>,
    stats: Mutex<RunStats>,
    shutdown: Shutdown,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Seeded from the ledger, which also remembers items whose entries were pruned.
fn seed_known(ledger: &Ledger) -> FingerprintCache {
    ledger.known_fingerprints().into_iter().collect()
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceWatcher>,
        analyzer: Arc<dyn ContentAnalyzer>,
        gate: AdmissionGate,
        fanout: FanoutExecutor,
        ledger: Arc<Ledger>,
        settings: OrchestratorSettings,
    ) -> Self {
        let known = seed_known(&ledger);
        Self {
            source,
            analyzer,
            gate,
            fanout,
            ledger,
            clock: system_clock(),
            limiter: Arc::new(Semaphore::new(settings.max_concurrent_items.max(1))),
            settings,
            known: Mutex::new(known),
            stats: Mutex::new(RunStats::default()),
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn stats(&self) -> RunStats {
        lock(&self.stats).clone()
    }

    fn known_fp(&self, id: &str) -> Option<Fingerprint> {
        lock(&self.known).get(id).cloned()
    }

    fn remember(&self, id: &str, fp: Fingerprint) {
        lock(&self.known).record(id, fp);
    }

    fn finish(&self, id: &str, outcome: ItemOutcome) -> ItemOutcome {
        counter!("research_items_total", "outcome" => outcome.label()).increment(1);
        lock(&self.stats).record(&outcome);
        match &outcome {
            ItemOutcome::Skipped { reason } => {
                debug!(target: "orchestrator", item_id = id, ?reason, "skipped")
            }
            ItemOutcome::Failed { reason } => {
                warn!(target: "orchestrator", item_id = id, %reason, "item failed")
            }
            other => info!(target: "orchestrator", item_id = id, outcome = other.label(), "item finished"),
        }
        outcome
    }

    fn count_provider_errors(&self, results: &FanoutResults) {
        let mut stats = lock(&self.stats);
        for r in results.values().filter(|r| !r.success) {
            if let Some(class) = r.error_class {
                *stats
                    .provider_errors
                    .entry(class.as_str().to_string())
                    .or_default() += 1;
            }
        }
    }

    /// The write-back replaces the whole note, so an edit made while providers
    /// were running must not be overwritten. Failing leaves the item unremembered:
    /// the next poll sees the new content as a change.
    async fn check_unchanged_since_poll(&self, item: &Item) -> Result<(), String> {
        match self.source.fetch_item(&item.id).await {
            Ok(Some(current)) if current.fingerprint == item.fingerprint => Ok(()),
            Ok(Some(_)) => Err("item changed during research".to_string()),
            Ok(None) => Err("item no longer exists".to_string()),
            Err(e) => Err(format!("cannot re-read item before write-back: {e:#}")),
        }
    }

    /// One pipeline run for one item snapshot.
    pub async fn process_item(&self, item: &Item) -> ItemOutcome {
        let id = item.id.as_str();
        let text = user_text(&item.body);
        if text.trim().is_empty() {
            return self.finish(id, ItemOutcome::Skipped { reason: SkipReason::EmptyBody });
        }
        if !fingerprint::changed(&item.body, self.known_fp(id).as_ref()) {
            return self.finish(id, ItemOutcome::Skipped { reason: SkipReason::Unchanged });
        }
        if self.ledger.is_duplicate(id, &item.fingerprint, self.settings.dedup_window) {
            self.remember(id, item.fingerprint.clone());
            return self.finish(id, ItemOutcome::Skipped { reason: SkipReason::Duplicate });
        }
        if self.shutdown.is_triggered() {
            return self.finish(id, ItemOutcome::Cancelled);
        }

        match self.ledger.mark_in_progress(id, &item.fingerprint) {
            Claim::Claimed => {}
            Claim::AlreadyClaimed => {
                return self.finish(id, ItemOutcome::Skipped { reason: SkipReason::AlreadyClaimed })
            }
            Claim::NotDurable => {
                return self.finish(id, ItemOutcome::Skipped { reason: SkipReason::LedgerUnavailable })
            }
        }

        let mut shutdown = self.shutdown.clone();
        let analysis = tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            a = self.analyzer.analyze(text) => Some(a),
        };
        let Some(analysis) = analysis else {
            self.ledger.release(id);
            return self.finish(id, ItemOutcome::Cancelled);
        };

        let decision = self.gate.decide(&analysis);
        counter!("research_admissions_total", "admitted" => if decision.admit { "true" } else { "false" })
            .increment(1);
        info!(
            target: "orchestrator",
            item_id = id,
            fp = item.fingerprint.short(),
            admit = decision.admit,
            confidence = decision.confidence,
            category = %decision.category,
            source = ?decision.source,
            "admission"
        );

        if !decision.admit {
            self.ledger.mark_completed(id);
            self.remember(id, item.fingerprint.clone());
            return self.finish(id, ItemOutcome::Done { researched: false });
        }

        let content = normalize_text(text);
        let results = match self
            .fanout
            .research(&content, &decision.category, &self.shutdown)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let reason = e.to_string();
                self.ledger.mark_failed(id, &reason);
                return self.finish(id, ItemOutcome::Failed { reason });
            }
        };
        self.count_provider_errors(&results);

        if self.shutdown.is_triggered() || results.values().any(|r| r.was_cancelled()) {
            self.ledger.release(id);
            return self.finish(id, ItemOutcome::Cancelled);
        }

        let synthesized = synthesize(&results);
        if is_placeholder(&synthesized) {
            warn!(target: "orchestrator", item_id = id, "every provider failed; writing placeholder");
        }
        let final_text = format_researched_note(item, &decision, &synthesized, self.clock.now());

        if let Err(reason) = self.check_unchanged_since_poll(item).await {
            self.ledger.mark_failed(id, &reason);
            return self.finish(id, ItemOutcome::Failed { reason });
        }

        match self.source.write_result(id, &final_text).await {
            Ok(()) => {
                let out_fp = Fingerprint::of(&final_text);
                self.ledger.mark_completed_with_output(id, out_fp.clone());
                self.remember(id, out_fp);
                self.finish(id, ItemOutcome::Done { researched: true })
            }
            Err(e) => {
                let reason = format!("write-back failed: {e:#}");
                self.ledger.mark_failed(id, &reason);
                self.finish(id, ItemOutcome::Failed { reason })
            }
        }
    }

    /// Re-run (or fail) every item left `in_progress` by a previous process.
    pub async fn recover(&self) -> Vec<(String, ItemOutcome)> {
        let ids = self.ledger.recover_in_progress();
        if ids.is_empty() {
            return Vec::new();
        }
        info!(target: "orchestrator", count = ids.len(), "recovering in-progress items");

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match self.source.fetch_item(&id).await {
                // Nothing left to research; a skip would leave the entry in_progress forever.
                Ok(Some(item)) if user_text(&item.body).trim().is_empty() => {
                    let reason = "item body empty".to_string();
                    self.ledger.mark_failed(&id, &reason);
                    self.finish(&id, ItemOutcome::Failed { reason })
                }
                Ok(Some(item)) => self.process_item(&item).await,
                Ok(None) => {
                    let reason = "item no longer exists".to_string();
                    self.ledger.mark_failed(&id, &reason);
                    self.finish(&id, ItemOutcome::Failed { reason })
                }
                Err(e) => {
                    warn!(target: "orchestrator", item_id = %id, error = %e, "cannot fetch item for recovery");
                    self.finish(&id, ItemOutcome::Skipped { reason: SkipReason::SourceUnavailable })
                }
            };
            lock(&self.stats).recovered += 1;
            out.push((id, outcome));
        }
        out
    }

    /// One poll: diff, then run changed items concurrently.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleReport {
        let mut report = CycleReport::default();
        let items = match self.source.poll_changes().await {
            Ok(items) => items,
            Err(e) => {
                error!(target: "orchestrator", source = self.source.name(), error = %e, "poll failed");
                report.poll_failed = true;
                return report;
            }
        };
        report.polled = items.len();

        let mut set = JoinSet::new();
        for item in items {
            // Cheap pre-filter so unchanged notes never take a concurrency slot.
            if !fingerprint::changed(&item.body, self.known_fp(&item.id).as_ref()) {
                report.skipped += 1;
                continue;
            }
            let this = Arc::clone(self);
            let limiter = Arc::clone(&self.limiter);
            set.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                this.process_item(&item).await
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => report.add(&outcome),
                Err(e) => {
                    error!(target: "orchestrator", error = %e, "pipeline task panicked");
                    report.failed += 1;
                }
            }
        }

        lock(&self.stats).cycles += 1;
        gauge!("research_last_cycle_ts").set(self.clock.now().timestamp() as f64);
        if report.done() + report.failed + report.cancelled > 0 {
            info!(
                target: "orchestrator",
                polled = report.polled,
                researched = report.researched,
                not_admitted = report.not_admitted,
                skipped = report.skipped,
                failed = report.failed,
                cancelled = report.cancelled,
                "cycle finished"
            );
        }
        self.ledger.prune();
        report
    }

    /// Prune, recover, then poll every `poll_interval` until shutdown.
    pub async fn run(self: &Arc<Self>) -> RunStats {
        self.ledger.prune();
        self.recover().await;

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        let stats = self.stats();
        info!(
            target: "orchestrator",
            cycles = stats.cycles,
            processed = stats.processed(),
            researched = stats.researched,
            not_admitted = stats.not_admitted,
            failed = stats.failed,
            recovered = stats.recovered,
            provider_errors = ?stats.provider_errors,
            "orchestrator stopped"
        );
        stats
    }
}
