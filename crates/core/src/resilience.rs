//! Retry policy for connection attempts and the bus watchdog.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::audio::BusState;
use crate::bus_pool::BusLease;
use crate::error::VoiceError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    /// `2^attempt * base`, attempts counted from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Decides what follows a failed attempt when `retries` have already been made.
    pub fn decide(&self, error: &VoiceError, retries: u32) -> RetryDecision {
        if error.is_fatal() || retries >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        let attempt = retries + 1;
        RetryDecision::Retry {
            attempt,
            delay: self.delay_for(attempt),
        }
    }
}

/// Periodically resumes buses the platform has suspended, until cancelled.
pub fn spawn_watchdog(
    buses: Vec<BusLease>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for bus in &buses {
                        if bus.state() != BusState::Suspended {
                            continue;
                        }
                        match bus.resume() {
                            Ok(()) => tracing::info!("resumed suspended {:?} bus", bus.role()),
                            Err(e) => tracing::warn!("failed to resume {:?} bus: {}", bus.role(), e),
                        }
                    }
                }
            }
        }
        tracing::debug!("watchdog stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBus, BusRole};
    use crate::testing::TestBuses;

    #[test]
    fn delays_double_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let policy = RetryPolicy::default();
        let transient = VoiceError::Transport("reset".into());

        let delays: Vec<Duration> = (0..5)
            .map_while(|retries| match policy.decide(&transient, retries) {
                RetryDecision::Retry { delay, .. } => Some(delay),
                RetryDecision::GiveUp => None,
            })
            .collect();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn fatal_errors_are_never_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&VoiceError::PermissionDenied, 0),
            RetryDecision::GiveUp
        );
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_resumes_suspended_buses() {
        let buses = TestBuses::default();
        let pool = buses.pool();
        let leases = vec![
            pool.acquire(BusRole::Input).unwrap(),
            pool.acquire(BusRole::Output).unwrap(),
        ];
        let cancel = CancellationToken::new();
        let handle = spawn_watchdog(leases, Duration::from_secs(2), cancel.clone());

        buses.output().suspend();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(buses.output().state(), BusState::Running);

        cancel.cancel();
        handle.await.unwrap();

        buses.input().suspend();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(buses.input().state(), BusState::Suspended);
    }
}
