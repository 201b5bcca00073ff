//! Per-analyzer scheduler: fires each analyzer at its own interval, with an
//! at-most-one-run-per-analyzer overlap guard.
//!
//! CrowdSieve is single-process, so the overlap guard is an in-process flag
//! rather than the `SELECT FOR UPDATE SKIP LOCKED` claim the hub scheduler
//! uses against a shared database — same "skip, don't queue" policy, just
//! local instead of cross-instance.

use super::AnalyzerEngine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

struct AnalyzerSlot {
    running: Arc<AtomicBool>,
}

/// Runs every configured analyzer's timer loop as a spawned Tokio task and
/// exposes a manual-trigger entry point for the operator API's run-now
/// endpoint, obeying the same overlap guard.
pub struct Scheduler {
    engine: Arc<AnalyzerEngine>,
    slots: HashMap<String, AnalyzerSlot>,
}

impl Scheduler {
    pub fn new(engine: Arc<AnalyzerEngine>) -> Self {
        let slots = engine
            .analyzer_ids()
            .into_iter()
            .map(|id| {
                (
                    id,
                    AnalyzerSlot {
                        running: Arc::new(AtomicBool::new(false)),
                    },
                )
            })
            .collect();
        Self { engine, slots }
    }

    /// Spawn one background task per analyzer. Each fires immediately, then
    /// every `schedule.interval`.
    pub fn spawn_all(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.slots
            .iter()
            .filter_map(|(id, slot)| {
                let interval_secs = self.engine.interval_secs(id)?;
                let engine = self.engine.clone();
                let running = slot.running.clone();
                let analyzer_id = id.clone();
                Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        run_guarded(&engine, &analyzer_id, &running).await;
                    }
                }))
            })
            .collect()
    }

    /// Manual trigger for `POST /api/analyzers/:id/run`.
    pub async fn run_now(&self, analyzer_id: &str) -> RunNowOutcome {
        let Some(slot) = self.slots.get(analyzer_id) else {
            return RunNowOutcome::UnknownAnalyzer;
        };
        if slot.running.swap(true, Ordering::SeqCst) {
            return RunNowOutcome::AlreadyRunning;
        }
        let engine = self.engine.clone();
        let running = slot.running.clone();
        let id = analyzer_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.run_once(&id).await {
                warn!(analyzer_id = %id, error = %e, "analyzer run failed");
            }
            running.store(false, Ordering::SeqCst);
        });
        RunNowOutcome::Started
    }
}

/// Result of a manual run-now trigger, distinguishing an unknown analyzer id
/// from one that's already mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunNowOutcome {
    Started,
    AlreadyRunning,
    UnknownAnalyzer,
}

async fn run_guarded(engine: &Arc<AnalyzerEngine>, analyzer_id: &str, running: &Arc<AtomicBool>) {
    if running.swap(true, Ordering::SeqCst) {
        info!(analyzer_id = %analyzer_id, "skipping tick, previous run still in flight");
        return;
    }
    if let Err(e) = engine.run_once(analyzer_id).await {
        warn!(analyzer_id = %analyzer_id, error = %e, "analyzer run failed");
    }
    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn overlap_guard_flag_round_trips() {
        let running = Arc::new(AtomicBool::new(false));
        assert!(!running.swap(true, Ordering::SeqCst));
        assert!(running.swap(true, Ordering::SeqCst));
        running.store(false, Ordering::SeqCst);
        assert!(!running.load(Ordering::SeqCst));
    }
}
