use std::future::Future;
use std::time::Duration;

/// Outcome of a bounded confirmation wait. `TimedOut` means "not observed
/// yet", never "failed"; the caller defers to a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Confirmed,
    TimedOut,
}

/// The one confirmation-wait primitive in the system. Every wait (account
/// activation, fee top-up, asset transfer) is an instance of this: fixed
/// interval, fixed attempt budget, definite outcome.
///
/// The check is expected to swallow its own transient errors and report
/// `false`; an errored check attempt is just "not confirmed yet".
pub async fn poll_until<F, Fut>(mut check: F, interval: Duration, max_attempts: u32) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..max_attempts {
        tokio::time::sleep(interval).await;
        if check().await {
            return PollOutcome::Confirmed;
        }
    }
    PollOutcome::TimedOut
}
