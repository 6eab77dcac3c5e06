//! Deadline-bounded status polling
//!
//! [`poll_until`] waits one interval, fetches, evaluates, and repeats until the
//! evaluation is satisfied, the deadline elapses or the shutdown token fires.
//! The deadline and the shutdown token race both the interval wait and the
//! in-flight fetch, so a slow API call cannot stretch a phase past its deadline.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing of one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Wait between fetches
    pub interval: Duration,
    /// Hard bound on the whole loop
    pub deadline: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// What a single evaluation of fetched status concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation<T> {
    /// Success predicate holds; loop ends with this value
    Satisfied(T),
    /// Not there yet
    Pending,
    /// Status reports an explicit failure; logged and polled again
    Failed(String),
}

/// Terminal state of a poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Succeeded(T),
    TimedOut,
    Cancelled,
}

/// Poll `fetch` every `settings.interval` until `evaluate` is satisfied
///
/// Fetch errors are logged and count as "not yet satisfied"; only the deadline
/// or the shutdown token end the loop unsuccessfully. When the deadline and a
/// tick (or a fetch completion) are ready together, the deadline wins.
///
/// # Arguments
/// * `settings` - Poll interval and deadline
/// * `shutdown` - External cancellation; aborts the loop promptly
/// * `object` - Name of the polled object (for logging)
/// * `fetch` - Reads the current status; may fail transiently
/// * `evaluate` - Success predicate over the fetched status
pub async fn poll_until<S, T, E, F, Fut, P>(
    settings: &PollSettings,
    shutdown: &CancellationToken,
    object: &str,
    mut fetch: F,
    mut evaluate: P,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
    E: Display,
    P: FnMut(&S) -> Evaluation<T>,
{
    let start = Instant::now();
    // sleep() saturates a deadline too far out to represent
    let deadline = tokio::time::sleep(settings.deadline);
    tokio::pin!(deadline);

    // tokio intervals reject a zero period
    let period = settings.interval.max(Duration::from_millis(1));
    // An interval too far out to schedule never ticks
    let mut ticker = start.checked_add(period).map(|first| {
        let mut ticker = interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    let mut attempt = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(object = %object, attempt, "Polling cancelled");
                return PollOutcome::Cancelled;
            }
            _ = &mut deadline => {
                info!(object = %object, attempt, "Polling deadline reached");
                return PollOutcome::TimedOut;
            }
            _ = next_tick(&mut ticker) => {}
        }

        attempt += 1;

        let fetched = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(object = %object, attempt, "Polling cancelled during fetch");
                return PollOutcome::Cancelled;
            }
            _ = &mut deadline => {
                info!(object = %object, attempt, "Polling deadline reached during fetch");
                return PollOutcome::TimedOut;
            }
            result = fetch() => result,
        };

        let status = match fetched {
            Ok(status) => status,
            Err(e) => {
                warn!(object = %object, attempt, error = %e, "Failed to fetch status, retrying");
                continue;
            }
        };

        match evaluate(&status) {
            Evaluation::Satisfied(value) => {
                debug!(
                    object = %object,
                    attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Poll condition satisfied"
                );
                return PollOutcome::Succeeded(value);
            }
            Evaluation::Failed(reason) => {
                info!(object = %object, attempt, reason = %reason, "Status reports failure, trying again");
            }
            Evaluation::Pending => {
                debug!(object = %object, attempt, "Status pending");
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn settings(interval_ms: u64, deadline_ms: u64) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(deadline_ms),
        )
    }

    #[tokio::test]
    async fn test_succeeds_on_first_fetch_without_extra_wait() {
        let shutdown = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let start = std::time::Instant::now();

        let outcome = poll_until(
            &settings(50, 5_000),
            &shutdown,
            "first",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(7)
            },
            |v| Evaluation::Satisfied(*v),
        )
        .await;

        assert_eq!(outcome, PollOutcome::Succeeded(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // One interval before the first fetch, none after it
        assert!(start.elapsed() < Duration::from_millis(100 + 50));
    }

    #[tokio::test]
    async fn test_succeeds_after_several_ticks() {
        let shutdown = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let outcome = poll_until(
            &settings(10, 5_000),
            &shutdown,
            "ticks",
            || async { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst) + 1) },
            |n| {
                if *n >= 3 {
                    Evaluation::Satisfied(*n)
                } else {
                    Evaluation::Pending
                }
            },
        )
        .await;

        assert_eq!(outcome, PollOutcome::Succeeded(3));
    }

    #[tokio::test]
    async fn test_times_out_within_deadline_plus_interval() {
        let shutdown = CancellationToken::new();
        let interval = Duration::from_millis(20);
        let deadline = Duration::from_millis(150);
        let start = std::time::Instant::now();

        let outcome: PollOutcome<()> = poll_until(
            &PollSettings::new(interval, deadline),
            &shutdown,
            "never",
            || async { Ok::<_, String>(()) },
            |_| Evaluation::Pending,
        )
        .await;

        let elapsed = start.elapsed();
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(elapsed >= deadline);
        // Scheduler slack on busy CI machines
        assert!(elapsed < deadline + interval + Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_fetch_errors_are_retried_not_fatal() {
        let shutdown = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let outcome = poll_until(
            &settings(10, 5_000),
            &shutdown,
            "flaky",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("transient failure {}", n))
                } else {
                    Ok(n)
                }
            },
            |n| Evaluation::Satisfied(*n),
        )
        .await;

        assert_eq!(outcome, PollOutcome::Succeeded(2));
    }

    #[tokio::test]
    async fn test_failed_evaluation_keeps_polling() {
        let shutdown = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let outcome = poll_until(
            &settings(10, 5_000),
            &shutdown,
            "failing-then-ok",
            || async { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst)) },
            |n| {
                if *n < 2 {
                    Evaluation::Failed("applied is false".to_string())
                } else {
                    Evaluation::Satisfied(())
                }
            },
        )
        .await;

        assert_eq!(outcome, PollOutcome::Succeeded(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_is_prompt_and_distinct() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let start = std::time::Instant::now();

        let outcome: PollOutcome<()> = poll_until(
            &settings(10, 60_000),
            &shutdown,
            "cancelled",
            || async { Ok::<_, String>(()) },
            |_| Evaluation::Pending,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_hung_fetch_cannot_outlive_deadline() {
        let shutdown = CancellationToken::new();
        let start = std::time::Instant::now();

        let outcome: PollOutcome<()> = poll_until(
            &settings(10, 100),
            &shutdown,
            "hung",
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(())
            },
            |_| Evaluation::Satisfied(()),
        )
        .await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_wins_over_ready_tick() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = poll_until(
            &settings(1, 1_000),
            &shutdown,
            "pre-cancelled",
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            },
            |_| Evaluation::Satisfied(()),
        )
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_still_polls() {
        let shutdown = CancellationToken::new();

        let outcome = poll_until(
            &PollSettings::new(Duration::from_millis(1), Duration::from_secs(u64::MAX)),
            &shutdown,
            "far-deadline",
            || async { Ok::<_, String>(7) },
            |v| Evaluation::Satisfied(*v),
        )
        .await;

        assert_eq!(outcome, PollOutcome::Succeeded(7));
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_ends_at_deadline() {
        let shutdown = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let outcome: PollOutcome<()> = poll_until(
            &PollSettings::new(Duration::from_secs(u64::MAX), Duration::from_millis(30)),
            &shutdown,
            "far-interval",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            },
            |_| Evaluation::Satisfied(()),
        )
        .await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_timing_still_honours_shutdown() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome: PollOutcome<()> = poll_until(
            &PollSettings::new(Duration::from_secs(u64::MAX), Duration::from_secs(u64::MAX)),
            &shutdown,
            "far-everything",
            || async { Ok::<_, String>(()) },
            |_| Evaluation::Pending,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
    }
}
