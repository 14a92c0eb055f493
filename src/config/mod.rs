// src/config/mod.rs
//! Bot configuration: TOML file + environment overrides, every field defaulted.

pub mod providers;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::breaker::BreakerConfig;
use crate::ledger::RetentionPolicy;
use crate::providers::ProviderKind;
use crate::retry::RetryPolicy;

pub use providers::ProviderConfig;

pub const ENV_CONFIG_PATH: &str = "RESEARCH_BOT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/bot.toml";
const LEDGER_FILE: &str = "ledger.json";
/// Upper bound for second-valued windows (100 years); keeps chrono durations in range.
const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub confidence_threshold: f64,
    pub dedup_window_seconds: u64,
    pub max_retries: u32,
    pub provider_timeout_seconds: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_seconds: u64,
    pub poll_interval_seconds: u64,

    pub notes_dirs: Vec<PathBuf>,
    pub state_dir: PathBuf,
    pub ledger_retention_days: u32,
    pub ledger_max_entries: usize,
    pub max_concurrent_items: usize,

    pub retry_base_delay_ms: u64,
    pub rate_limit_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    pub use_ai_analyzer: bool,
    /// Provider name used for analysis; first configured provider if unset.
    pub analyzer_provider: Option<String>,
    pub analysis_timeout_seconds: u64,

    /// e.g. "127.0.0.1:9464"; the status server is off when unset.
    pub status_addr: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,

    pub providers: Vec<ProviderConfig>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            dedup_window_seconds: 3600,
            max_retries: 3,
            provider_timeout_seconds: 60,
            circuit_failure_threshold: 5,
            circuit_recovery_seconds: 60,
            poll_interval_seconds: 30,
            notes_dirs: vec![PathBuf::from("notes")],
            state_dir: PathBuf::from("state"),
            ledger_retention_days: 90,
            ledger_max_entries: 10_000,
            max_concurrent_items: 4,
            retry_base_delay_ms: 2_000,
            rate_limit_base_delay_ms: 10_000,
            retry_max_delay_ms: 60_000,
            use_ai_analyzer: true,
            analyzer_provider: None,
            analysis_timeout_seconds: 20,
            status_addr: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            providers: vec![
                ProviderConfig::new(ProviderKind::OpenAi),
                ProviderConfig::new(ProviderKind::Claude),
            ],
        }
    }
}

impl BotConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Resolution order:
    /// 1) $RESEARCH_BOT_CONFIG (must exist)
    /// 2) config/bot.toml
    /// 3) built-in defaults
    ///
    /// then `RESEARCH_BOT_*` environment overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from_file(DEFAULT_CONFIG_PATH)?
        } else {
            Self::default()
        };
        cfg.apply_env_from(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Apply `RESEARCH_BOT_*` overrides. Unparseable values are logged and ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring invalid env override");
                    None
                }
            }
        }

        const POLL: &str = "RESEARCH_BOT_POLL_INTERVAL_SECS";
        const THRESHOLD: &str = "RESEARCH_BOT_CONFIDENCE_THRESHOLD";
        const TIMEOUT: &str = "RESEARCH_BOT_PROVIDER_TIMEOUT_SECS";
        const LOG_LEVEL: &str = "RESEARCH_BOT_LOG_LEVEL";

        if let Some(v) = parsed::<u64>(POLL, lookup(POLL)) {
            self.poll_interval_seconds = v;
        }
        if let Some(v) = parsed::<f64>(THRESHOLD, lookup(THRESHOLD)).filter(|t| t.is_finite()) {
            self.confidence_threshold = v;
        }
        if let Some(v) = parsed::<u64>(TIMEOUT, lookup(TIMEOUT)) {
            self.provider_timeout_seconds = v;
        }
        if let Some(v) = lookup(LOG_LEVEL).filter(|s| !s.trim().is_empty()) {
            self.log_level = v.trim().to_string();
        }
    }

    /// Every problem that should stop the bot from starting.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.providers.is_empty() {
            issues.push("no research providers configured".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            issues.push(format!(
                "confidence_threshold must be within 0..=1 (got {})",
                self.confidence_threshold
            ));
        }
        if self.poll_interval_seconds < 1 {
            issues.push("poll_interval_seconds must be at least 1".to_string());
        }
        if self.max_retries == 0 {
            issues.push("max_retries must be at least 1".to_string());
        }
        if self.provider_timeout_seconds == 0 {
            issues.push("provider_timeout_seconds must be at least 1".to_string());
        }
        if self.max_concurrent_items == 0 {
            issues.push("max_concurrent_items must be at least 1".to_string());
        }
        for (key, v) in [
            ("dedup_window_seconds", self.dedup_window_seconds),
            ("circuit_recovery_seconds", self.circuit_recovery_seconds),
        ] {
            if v > MAX_WINDOW_SECS {
                issues.push(format!("{key} must be at most {MAX_WINDOW_SECS} (got {v})"));
            }
        }
        if self.notes_dirs.is_empty() {
            issues.push("notes_dirs is empty".to_string());
        }
        let mut names: Vec<String> = self.providers.iter().map(|p| p.display_name()).collect();
        names.sort();
        names.dedup();
        if names.len() != self.providers.len() {
            issues.push("provider names must be unique".to_string());
        }
        if let Some(a) = &self.analyzer_provider {
            if !names.iter().any(|n| n == a) {
                issues.push(format!("analyzer_provider '{a}' is not a configured provider"));
            }
        }
        issues
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            rate_limit_base_delay: Duration::from_millis(self.rate_limit_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.circuit_failure_threshold.max(1),
            recovery_timeout: window(self.circuit_recovery_seconds),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: chrono::Duration::days(i64::from(self.ledger_retention_days)),
            max_entries: self.ledger_max_entries,
        }
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        window(self.dedup_window_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_seconds.max(1))
    }
}

fn window(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = BotConfig::default();
        assert_eq!(c.confidence_threshold, 0.7);
        assert_eq!(c.dedup_window_seconds, 3600);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.provider_timeout_seconds, 60);
        assert_eq!(c.circuit_failure_threshold, 5);
        assert_eq!(c.circuit_recovery_seconds, 60);
        assert_eq!(c.poll_interval_seconds, 30);
        assert!(c.validate().is_empty(), "{:?}", c.validate());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c: BotConfig = toml::from_str(
            r#"
            confidence_threshold = 0.8
            notes_dirs = ["/tmp/notes"]

            [[providers]]
            kind = "claude"
            model = "claude-3-5-haiku-latest"
            "#,
        )
        .unwrap();
        assert_eq!(c.confidence_threshold, 0.8);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.providers.len(), 1);
        assert_eq!(c.providers[0].api_key, "ENV");
        assert_eq!(c.ledger_path(), PathBuf::from("state/ledger.json"));
    }

    #[test]
    fn validate_reports_every_issue() {
        let c = BotConfig {
            providers: vec![],
            confidence_threshold: 1.5,
            poll_interval_seconds: 0,
            max_retries: 0,
            ..BotConfig::default()
        };
        let issues = c.validate();
        assert_eq!(issues.len(), 4, "{issues:?}");
    }

    #[test]
    fn env_overrides_ignore_garbage() {
        let mut c = BotConfig::default();
        c.apply_env_from(|k| match k {
            "RESEARCH_BOT_POLL_INTERVAL_SECS" => Some("5".into()),
            "RESEARCH_BOT_CONFIDENCE_THRESHOLD" => Some("high".into()),
            "RESEARCH_BOT_LOG_LEVEL" => Some("debug".into()),
            _ => None,
        });
        assert_eq!(c.poll_interval_seconds, 5);
        assert_eq!(c.confidence_threshold, 0.7);
        assert_eq!(c.log_level, "debug");
    }

    #[test]
    fn oversized_windows_are_rejected_and_clamped() {
        let c = BotConfig {
            dedup_window_seconds: u64::MAX,
            circuit_recovery_seconds: 1 << 62,
            ..BotConfig::default()
        };
        let issues = c.validate();
        assert_eq!(issues.len(), 2, "{issues:?}");
        assert!(issues[0].starts_with("dedup_window_seconds"));
        assert_eq!(c.dedup_window(), chrono::Duration::days(100 * 365));
        assert_eq!(c.breaker_config().recovery_timeout, chrono::Duration::days(100 * 365));
    }

    #[test]
    fn derived_policies() {
        let c = BotConfig::default();
        let r = c.retry_policy();
        assert_eq!(r.max_attempts, 3);
        assert_eq!(r.rate_limit_base_delay, Duration::from_secs(10));
        assert_eq!(c.breaker_config().failure_threshold, 5);
        assert_eq!(c.retention().max_entries, 10_000);
        assert_eq!(c.dedup_window(), chrono::Duration::hours(1));
    }
}
