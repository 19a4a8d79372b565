// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory telemetry accumulator.
//!
//! Counters with dirty tracking, flushed to the session row. `flush` is
//! single-flighted with one queued rerun: a call during an in-progress flush
//! coalesces into a single follow-up pass. After a successful flush only the
//! snapshotted values are subtracted, so additions racing the flush survive
//! into the next one. The active-time clock is re-anchored at flush so no
//! second is double-counted.

use harbor_core::Clock;
use harbor_store::StoreError;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

/// Deltas handed to the flush function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Distinct tool calls over the session lifetime (absolute, not a delta).
    pub tool_calls: u64,
    pub messages_exchanged: u64,
    pub active_ms: u64,
    pub pr_urls: BTreeSet<String>,
    pub latest_task: Option<String>,
    /// Clock reading at snapshot time; anchors the post-flush reset.
    snap_now_ms: u64,
    /// The banked (non-running) portion of `active_ms`.
    banked_ms: u64,
}

#[derive(Default)]
struct Counters {
    tool_call_ids: BTreeSet<String>,
    messages_exchanged: u64,
    active_ms: u64,
    running_started_at_ms: Option<u64>,
    pr_urls: BTreeSet<String>,
    /// Lifetime dedup set; survives flushes.
    all_pr_urls: BTreeSet<String>,
    latest_task: Option<String>,
    dirty: bool,
}

#[derive(Default)]
struct FlushState {
    in_progress: bool,
    queued: bool,
}

/// Per-session telemetry accumulator.
pub struct TelemetryAccumulator {
    clock: Arc<dyn Clock>,
    counters: Mutex<Counters>,
    flush_state: Mutex<FlushState>,
}

impl TelemetryAccumulator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: Mutex::new(Counters::default()),
            flush_state: Mutex::new(FlushState::default()),
        }
    }

    pub fn record_tool_call(&self, tool_call_id: impl Into<String>) {
        let mut c = self.counters.lock();
        if c.tool_call_ids.insert(tool_call_id.into()) {
            c.dirty = true;
        }
    }

    pub fn record_message_exchanged(&self) {
        let mut c = self.counters.lock();
        c.messages_exchanged += 1;
        c.dirty = true;
    }

    pub fn record_latest_task(&self, task: impl Into<String>) {
        let mut c = self.counters.lock();
        c.latest_task = Some(task.into());
        c.dirty = true;
    }

    /// Idempotent across the session lifetime: re-recording a URL already
    /// seen (even if flushed) changes nothing.
    pub fn record_pr_url(&self, url: impl Into<String>) {
        let url = url.into();
        let mut c = self.counters.lock();
        if c.all_pr_urls.insert(url.clone()) {
            c.pr_urls.insert(url);
            c.dirty = true;
        }
    }

    /// Extract and record PR URLs from assistant text.
    pub fn record_pr_urls_from_text(&self, text: &str) {
        for url in extract_pr_urls(text) {
            self.record_pr_url(url);
        }
    }

    /// Start the active-time clock (runtime became ready).
    pub fn mark_running(&self) {
        let now = self.clock.epoch_ms();
        let mut c = self.counters.lock();
        if c.running_started_at_ms.is_none() {
            c.running_started_at_ms = Some(now);
        }
    }

    /// Stop the active-time clock and bank the elapsed time.
    pub fn mark_stopped(&self) {
        let now = self.clock.epoch_ms();
        let mut c = self.counters.lock();
        if let Some(started) = c.running_started_at_ms.take() {
            c.active_ms += now.saturating_sub(started);
            c.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        let c = self.counters.lock();
        c.dirty || c.running_started_at_ms.is_some()
    }

    pub fn all_pr_urls(&self) -> BTreeSet<String> {
        self.counters.lock().all_pr_urls.clone()
    }

    fn take_snapshot(&self) -> TelemetrySnapshot {
        let now = self.clock.epoch_ms();
        let c = self.counters.lock();
        let running_ms =
            c.running_started_at_ms.map(|started| now.saturating_sub(started)).unwrap_or(0);
        TelemetrySnapshot {
            tool_calls: c.tool_call_ids.len() as u64,
            messages_exchanged: c.messages_exchanged,
            active_ms: c.active_ms + running_ms,
            pr_urls: c.pr_urls.clone(),
            latest_task: c.latest_task.clone(),
            snap_now_ms: now,
            banked_ms: c.active_ms,
        }
    }

    /// Subtract exactly what the snapshot carried; in-flight additions stay.
    fn commit_snapshot(&self, snapshot: &TelemetrySnapshot) {
        let mut c = self.counters.lock();
        c.messages_exchanged = c.messages_exchanged.saturating_sub(snapshot.messages_exchanged);
        for url in &snapshot.pr_urls {
            c.pr_urls.remove(url);
        }
        match c.running_started_at_ms {
            Some(started) => {
                // Still running: drop the banked part, re-anchor the clock at
                // the snapshot moment so the in-flight segment is counted once.
                c.active_ms = c.active_ms.saturating_sub(snapshot.banked_ms);
                c.running_started_at_ms = Some(started.max(snapshot.snap_now_ms));
            }
            None => {
                // Stopped (possibly mid-flush): everything up to the snapshot
                // moment was flushed; only the tail after it remains banked.
                c.active_ms = c.active_ms.saturating_sub(snapshot.active_ms);
            }
        }
        c.dirty = c.messages_exchanged > 0 || !c.pr_urls.is_empty() || c.active_ms > 0;
    }

    /// Single-flight flush with one queued rerun.
    pub async fn flush<F, Fut>(&self, flush_fn: F) -> Result<(), StoreError>
    where
        F: Fn(TelemetrySnapshot) -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        {
            let mut state = self.flush_state.lock();
            if state.in_progress {
                state.queued = true;
                return Ok(());
            }
            state.in_progress = true;
        }

        let result = loop {
            let snapshot = self.take_snapshot();
            match flush_fn(snapshot.clone()).await {
                Ok(()) => {
                    self.commit_snapshot(&snapshot);
                    let mut state = self.flush_state.lock();
                    if state.queued {
                        state.queued = false;
                        continue;
                    }
                    state.in_progress = false;
                    break Ok(());
                }
                Err(e) => {
                    let mut state = self.flush_state.lock();
                    state.in_progress = false;
                    state.queued = false;
                    break Err(e);
                }
            }
        };
        result
    }
}

/// Pure, deduplicated extraction of PR URLs from text.
pub fn extract_pr_urls(text: &str) -> BTreeSet<String> {
    static PR_URL: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PR_URL.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        regex::Regex::new(r"https://[\w.-]+/[\w.-]+/[\w.-]+/pull/\d+").unwrap()
    });
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
