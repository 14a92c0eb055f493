// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod ledger;

// Admission: analyzers produce a score, the gate applies the threshold
pub mod analyze;
pub mod gate;

// Provider fan-out
pub mod breaker;
pub mod fanout;
pub mod providers;
pub mod retry;
pub mod synth;

// Source integration & driving loop
pub mod format;
pub mod orchestrator;
pub mod shutdown;
pub mod source;

pub mod api;
pub mod config;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{AiAnalyzer, Analysis, ContentAnalyzer, HeuristicAnalyzer};
pub use crate::breaker::{BreakerConfig, BreakerRegistry};
pub use crate::config::BotConfig;
pub use crate::error::{ErrorClass, FanoutError, ProviderError};
pub use crate::fanout::{FanoutExecutor, ProviderResult};
pub use crate::gate::{AdmissionDecision, AdmissionGate};
pub use crate::ledger::{Claim, Ledger, LedgerStatus};
pub use crate::orchestrator::{ItemOutcome, Orchestrator, OrchestratorSettings, RunStats};
pub use crate::providers::{DynProvider, ResearchProvider};
pub use crate::source::{FolderSource, Item, MemorySource, SourceWatcher};
