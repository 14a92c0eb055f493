// tests/ledger_recovery.rs
//
// Crash-safety of the durable ledger across process "restarts" (re-open of the
// same file), corrupt-file fallback, and the dedup window.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use notes_research_bot::clock::ManualClock;
use notes_research_bot::fingerprint::fingerprint;
use notes_research_bot::ledger::{Claim, Ledger, LedgerStatus};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
}

fn open(dir: &Path, clock: &Arc<ManualClock>) -> Ledger {
    Ledger::open(dir.join("ledger.json"), clock.clone())
}

#[test]
fn crash_after_claim_is_recovered_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared(t0());
    {
        let l = open(dir.path(), &clock);
        assert_eq!(l.mark_in_progress("notes/a.md", &fingerprint("A")), Claim::Claimed);
        // Process dies here: no terminal mark.
    }
    let l = open(dir.path(), &clock);
    assert_eq!(l.recover_in_progress(), vec!["notes/a.md".to_string()]);
    let e = l.get("notes/a.md").unwrap();
    assert_eq!(e.status, LedgerStatus::InProgress);
    assert_eq!(e.last_attempt, t0());

    // Re-running completes it exactly once.
    assert_eq!(l.mark_in_progress("notes/a.md", &fingerprint("A")), Claim::Claimed);
    assert!(l.mark_completed("notes/a.md"));
    assert!(!l.mark_completed("notes/a.md"));
    assert!(l.recover_in_progress().is_empty());
    assert_eq!(l.get("notes/a.md").unwrap().attempts, 2);
}

#[test]
fn claim_then_recover_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared(t0());
    let l = open(dir.path(), &clock);
    l.mark_in_progress("x", &fingerprint("body"));
    l.release("x");
    assert_eq!(l.recover_in_progress(), vec!["x".to_string()]);
    l.mark_completed("x");
    assert!(l.recover_in_progress().is_empty());
}

#[test]
fn corrupt_primary_falls_back_to_backup() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared(t0());
    {
        let l = open(dir.path(), &clock);
        l.mark_in_progress("a", &fingerprint("1"));
        l.mark_completed("a");
        // Second write copies the first state into the backup.
        l.mark_in_progress("b", &fingerprint("2"));
        l.mark_completed("b");
    }
    fs::write(dir.path().join("ledger.json"), b"{ not json").unwrap();

    let l = open(dir.path(), &clock);
    assert_eq!(l.get("a").map(|e| e.status), Some(LedgerStatus::Completed));
    assert!(dir.path().join("ledger.json.corrupt").exists());
}

#[test]
fn unreadable_state_resets_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ledger.json"), b"garbage").unwrap();
    fs::write(dir.path().join("ledger.json.bak"), b"also garbage").unwrap();
    let clock = ManualClock::shared(t0());
    let l = open(dir.path(), &clock);
    assert!(l.snapshot().is_empty());
    // Still usable afterwards.
    assert_eq!(l.mark_in_progress("a", &fingerprint("1")), Claim::Claimed);
}

#[test]
fn dedup_survives_restart_within_window() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared(t0());
    let fp = fingerprint("How do I test async APIs?");
    {
        let l = open(dir.path(), &clock);
        l.mark_in_progress("a", &fp);
        l.mark_completed("a");
    }
    clock.advance(Duration::minutes(30));
    let l = open(dir.path(), &clock);
    assert!(l.is_duplicate("a", &fp, Duration::hours(1)));
    clock.advance(Duration::minutes(31));
    assert!(!l.is_duplicate("a", &fp, Duration::hours(1)));
}

#[test]
fn failed_entries_stay_queryable_but_not_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared(t0());
    let l = open(dir.path(), &clock);
    let fp = fingerprint("q");
    l.mark_in_progress("a", &fp);
    l.mark_failed("a", "write-back failed");
    assert!(!l.is_duplicate("a", &fp, Duration::hours(1)));
    let s = l.summary();
    assert_eq!((s.failed, s.completed, s.in_progress), (1, 0, 0));
}

#[test]
fn concurrent_claims_for_one_item_have_a_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared(t0());
    let l = Arc::new(open(dir.path(), &clock));
    let fp = fingerprint("same");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let l = l.clone();
            let fp = fp.clone();
            std::thread::spawn(move || l.mark_in_progress("hot", &fp))
        })
        .collect();
    let claims: Vec<Claim> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(claims.iter().filter(|c| **c == Claim::Claimed).count(), 1);
    assert_eq!(
        claims.iter().filter(|c| **c == Claim::AlreadyClaimed).count(),
        7
    );
}

#[test]
fn file_on_disk_is_versioned_json() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared(t0());
    let l = open(dir.path(), &clock);
    l.mark_in_progress("a", &fingerprint("1"));
    let raw = fs::read_to_string(dir.path().join("ledger.json")).unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v["version"], 1);
    assert_eq!(v["entries"]["a"]["status"], "in_progress");
    assert!(!dir.path().join("ledger.json.tmp").exists());
}
