// Reconciliation scheduler - runs watch + consolidate cycles on a fixed
// interval, stretched by exponential backoff while cycles keep failing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::consolidator::Consolidator;
use crate::error::EngineError;
use crate::intent::models::IntentStatus;
use crate::intent::store::IntentStore;
use crate::watcher::LedgerWatcher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub matched: usize,
    pub unmatched: usize,
    pub consolidated: usize,
    /// Intents that exhausted their attempt budget this cycle
    pub failed: usize,
    /// Transient errors; any of these marks the cycle as failed
    pub errors: usize,
}

impl CycleSummary {
    fn successes(&self) -> usize {
        self.matched + self.consolidated
    }

    fn failures(&self) -> usize {
        self.failed + self.errors
    }
}

/// Sleep before the next cycle: the base interval times `min(2^n, cap)`
/// where n counts consecutive failed cycles. The first failure already
/// doubles the interval.
pub fn backoff_interval(base: Duration, consecutive_failures: u32, cap: u32) -> Duration {
    let exponent = consecutive_failures.min(31);
    let multiplier = 2u64
        .saturating_pow(exponent)
        .min(u64::from(cap.max(1)));
    base * u32::try_from(multiplier).unwrap_or(cap.max(1))
}

pub struct ReconcileScheduler {
    watcher: Arc<LedgerWatcher>,
    consolidator: Arc<Consolidator>,
    store: Arc<dyn IntentStore>,
    base_interval: Duration,
    backoff_cap: u32,
    consecutive_failures: AtomicU32,
}

impl ReconcileScheduler {
    pub fn new(
        watcher: Arc<LedgerWatcher>,
        consolidator: Arc<Consolidator>,
        store: Arc<dyn IntentStore>,
        base_interval: Duration,
        backoff_cap: u32,
    ) -> Self {
        Self {
            watcher,
            consolidator,
            store,
            base_interval,
            backoff_cap,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// One full reconciliation cycle: pull and match inbound transfers,
    /// then attempt consolidation for every intent holding matched funds.
    /// Per-intent errors are contained so one bad intent cannot starve
    /// the rest of the cycle.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        match self.watcher.run().await {
            Ok(report) => {
                summary.matched = report.matched;
                summary.unmatched = report.unmatched;
            }
            Err(e) => {
                error!("❌ watch pass failed: {e}");
                summary.errors += 1;
                // Matching state is stale; consolidation still proceeds
                // on what the store already holds
            }
        }

        let open = match self.store.find_open().await {
            Ok(open) => open,
            Err(e) => {
                error!("❌ could not load open intents: {e}");
                summary.errors += 1;
                return summary;
            }
        };

        for intent in open {
            if intent.status != IntentStatus::FundsReceived || !intent.needs_consolidation() {
                continue;
            }
            match self.consolidator.consolidate(intent.id).await {
                Ok(true) => summary.consolidated += 1,
                Ok(false) => {}
                Err(EngineError::ConsolidationExhausted { intent_id, attempts }) => {
                    warn!(intent = %intent_id, attempts, "intent failed after exhausting attempts");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(intent = %intent.id, "consolidation errored: {e}");
                    summary.errors += 1;
                }
            }
        }

        summary
    }

    /// Advance the failure counter from a finished cycle. Any success
    /// resets; zero successes with at least one failure stacks; a quiet
    /// cycle changes nothing.
    fn note_cycle(&self, summary: &CycleSummary) -> u32 {
        if summary.successes() > 0 {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            0
        } else if summary.failures() > 0 {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.consecutive_failures.load(Ordering::Relaxed)
        }
    }

    #[cfg(test)]
    fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Spawn the periodic loop. An in-flight cycle always completes; the
    /// shutdown signal is honored between cycles.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            info!(
                interval_secs = scheduler.base_interval.as_secs(),
                "🔄 reconciliation scheduler started"
            );
            loop {
                let summary = scheduler.run_cycle().await;
                let failures = scheduler.note_cycle(&summary);
                info!(
                    matched = summary.matched,
                    unmatched = summary.unmatched,
                    consolidated = summary.consolidated,
                    failed = summary.failed,
                    errors = summary.errors,
                    consecutive_failures = failures,
                    "📊 cycle finished"
                );

                let delay =
                    backoff_interval(scheduler.base_interval, failures, scheduler.backoff_cap);
                if failures > 0 {
                    warn!(delay_secs = delay.as_secs(), "⚠️ backing off after failed cycle");
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("✅ reconciliation scheduler stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
