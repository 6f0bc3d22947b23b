//! Poll state machine.
//!
//! [`PollSession`] holds everything that survives between polls and decides,
//! from the outcome of one poll, what the user sees and when the next poll
//! happens. It does no I/O and never sleeps; the worker drives it.

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::time::Duration;

use crate::config::PollConfig;
use crate::error::PollError;
use crate::monitor::{self, AggregateStatus, RawMonitor};
use crate::notifier::{self, Notification};
use crate::sink::StatusUpdate;

/// When the next poll should run, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPoll {
    Steady(Duration),
    /// Short re-check of a down event; `attempt` counts from 1.
    Retry { attempt: u32, delay: Duration },
    /// Wait dictated by the API's rate limit reply.
    RateLimit(Duration),
}

impl NextPoll {
    #[must_use]
    pub fn delay(&self) -> Duration {
        match *self {
            Self::Steady(delay) | Self::Retry { delay, .. } | Self::RateLimit(delay) => delay,
        }
    }
}

/// Result of one finished poll.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub update: StatusUpdate,
    pub notification: Option<Notification>,
    pub next: NextPoll,
}

#[derive(Debug, Default, Clone)]
pub struct PollSession {
    in_flight: bool,
    retry_count: u32,
    previous: Option<AggregateStatus>,
    last_success: Option<DateTime<Local>>,
}

impl PollSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a poll as started. Returns `false`, and changes nothing, if one
    /// is already in flight.
    pub fn try_begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Forgets the poll in flight without observing its result.
    pub fn abandon(&mut self) {
        self.in_flight = false;
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Last aggregate observed from real monitor data, if any.
    #[must_use]
    pub fn previous(&self) -> Option<AggregateStatus> {
        self.previous
    }

    #[must_use]
    pub fn last_success(&self) -> Option<DateTime<Local>> {
        self.last_success
    }

    /// Applies the outcome of the poll in flight.
    pub fn complete(
        &mut self,
        outcome: Result<Vec<RawMonitor>, PollError>,
        config: &PollConfig,
        now: DateTime<Local>,
    ) -> CycleReport {
        self.in_flight = false;

        match outcome {
            Ok(raw) => self.observe(raw, config, now),
            Err(err) => {
                let next = match err {
                    PollError::RateLimited { wait_secs } => {
                        info!("Rate limited, next poll in {wait_secs} seconds");
                        NextPoll::RateLimit(Duration::from_secs(wait_secs))
                    }
                    PollError::CredentialInvalid => {
                        warn!("Invalid or missing API key, skipping request");
                        NextPoll::Steady(config.steady_interval)
                    }
                    PollError::Transport(_) | PollError::Malformed(_) => {
                        warn!("Poll failed: {err}");
                        self.retry_count = 0;
                        NextPoll::Steady(config.steady_interval)
                    }
                };

                CycleReport {
                    update: StatusUpdate {
                        aggregate: AggregateStatus::Error,
                        monitors: Vec::new(),
                        timestamp: now,
                        last_success: self.last_success,
                        error: Some(err),
                    },
                    notification: None,
                    next,
                }
            }
        }
    }

    fn observe(
        &mut self,
        raw: Vec<RawMonitor>,
        config: &PollConfig,
        now: DateTime<Local>,
    ) -> CycleReport {
        let monitors = monitor::normalize(raw);
        let aggregate = monitor::compute_aggregate(&monitors);
        let transition = notifier::evaluate(aggregate, &monitors, self.previous);

        debug!(
            "Observed {aggregate} (previous {:?}, retry {}/{})",
            self.previous, self.retry_count, config.max_retries
        );

        let ongoing_down = self.retry_count > 0 && aggregate == AggregateStatus::Down;
        let next = if transition.arm_retry || ongoing_down {
            self.next_retry(config)
        } else {
            self.retry_count = 0;
            NextPoll::Steady(config.steady_interval)
        };

        self.previous = Some(aggregate);
        self.last_success = Some(now);

        CycleReport {
            update: StatusUpdate {
                aggregate,
                monitors,
                timestamp: now,
                last_success: self.last_success,
                error: None,
            },
            notification: transition.notification,
            next,
        }
    }

    fn next_retry(&mut self, config: &PollConfig) -> NextPoll {
        if self.retry_count < config.max_retries {
            self.retry_count += 1;
            info!(
                "Re-checking in {}s (attempt {} of {})",
                config.retry_interval.as_secs(),
                self.retry_count,
                config.max_retries
            );
            NextPoll::Retry {
                attempt: self.retry_count,
                delay: config.retry_interval,
            }
        } else {
            info!(
                "Reached maximum retries ({}), resuming normal check interval",
                config.max_retries
            );
            self.retry_count = 0;
            NextPoll::Steady(config.steady_interval)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotificationKind;

    fn raw(name: &str, status: i64) -> RawMonitor {
        RawMonitor {
            id: 1,
            friendly_name: name.to_string(),
            status: Some(status),
            url: format!("https://{name}.example.com"),
        }
    }

    fn up() -> Result<Vec<RawMonitor>, PollError> {
        Ok(vec![raw("shop", 2), raw("blog", 2)])
    }

    fn down() -> Result<Vec<RawMonitor>, PollError> {
        Ok(vec![raw("shop", 9), raw("blog", 2)])
    }

    fn run(session: &mut PollSession, outcome: Result<Vec<RawMonitor>, PollError>) -> CycleReport {
        assert!(session.try_begin());
        session.complete(outcome, &PollConfig::default(), Local::now())
    }

    #[test]
    fn test_second_begin_is_refused_while_in_flight() {
        let mut session = PollSession::new();
        assert!(session.try_begin());
        assert!(!session.try_begin());
        assert!(session.is_in_flight());

        session.complete(up(), &PollConfig::default(), Local::now());
        assert!(!session.is_in_flight());
        assert!(session.try_begin());
    }

    #[test]
    fn test_abandon_clears_in_flight_without_observation() {
        let mut session = PollSession::new();
        assert!(session.try_begin());
        session.abandon();
        assert!(!session.is_in_flight());
        assert_eq!(session.previous(), None);
    }

    #[test]
    fn test_healthy_first_poll_is_silent_and_steady() {
        let mut session = PollSession::new();
        let report = run(&mut session, up());

        assert_eq!(report.update.aggregate, AggregateStatus::Up);
        assert_eq!(report.update.monitors.len(), 2);
        assert_eq!(report.notification, None);
        assert_eq!(report.next, NextPoll::Steady(Duration::from_secs(60)));
        assert_eq!(session.previous(), Some(AggregateStatus::Up));
        assert!(session.last_success().is_some());
    }

    #[test]
    fn test_first_poll_down_raises_alarm_and_retries() {
        let mut session = PollSession::new();
        let report = run(&mut session, down());

        let n = report.notification.expect("first alarm expected");
        assert_eq!(n.kind, NotificationKind::FirstAlarm);
        assert_eq!(
            report.next,
            NextPoll::Retry {
                attempt: 1,
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(session.retry_count(), 1);
    }

    #[test]
    fn test_retries_are_capped_then_revert_to_steady() {
        let mut session = PollSession::new();
        run(&mut session, up());

        let delays: Vec<NextPoll> = (0..5).map(|_| run(&mut session, down()).next).collect();
        let retry = |attempt| NextPoll::Retry {
            attempt,
            delay: Duration::from_secs(5),
        };
        let steady = NextPoll::Steady(Duration::from_secs(60));

        assert_eq!(delays, [retry(1), retry(2), retry(3), steady, steady]);
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_only_the_edge_poll_notifies_during_retries() {
        let mut session = PollSession::new();
        run(&mut session, up());

        let notified: Vec<bool> = (0..4)
            .map(|_| run(&mut session, down()).notification.is_some())
            .collect();
        assert_eq!(notified, [true, false, false, false]);
    }

    #[test]
    fn test_recovery_during_retries_resets_count() {
        let mut session = PollSession::new();
        run(&mut session, up());
        run(&mut session, down());
        assert_eq!(session.retry_count(), 1);

        let report = run(&mut session, up());
        assert_eq!(
            report.notification.map(|n| n.kind),
            Some(NotificationKind::Recovered)
        );
        assert_eq!(report.next, NextPoll::Steady(Duration::from_secs(60)));
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_rate_limit_defers_without_touching_state() {
        let mut session = PollSession::new();
        run(&mut session, up());
        run(&mut session, down());
        let retries_before = session.retry_count();

        let report = run(&mut session, Err(PollError::RateLimited { wait_secs: 42 }));

        assert_eq!(report.next, NextPoll::RateLimit(Duration::from_secs(42)));
        assert_eq!(report.next.delay(), Duration::from_secs(42));
        assert_eq!(report.update.aggregate, AggregateStatus::Error);
        assert!(report.update.monitors.is_empty());
        assert_eq!(report.notification, None);
        assert_eq!(session.retry_count(), retries_before);
        assert_eq!(session.previous(), Some(AggregateStatus::Down));
    }

    #[test]
    fn test_definitive_errors_reset_retries_and_use_steady_interval() {
        for err in [
            PollError::Transport("HTTP 503".to_string()),
            PollError::Malformed("invalid JSON".to_string()),
        ] {
            let mut session = PollSession::new();
            run(&mut session, down());
            assert_eq!(session.retry_count(), 1);

            let report = run(&mut session, Err(err.clone()));
            assert_eq!(report.update.aggregate, AggregateStatus::Error);
            assert_eq!(report.update.error, Some(err));
            assert_eq!(report.next, NextPoll::Steady(Duration::from_secs(60)));
            assert_eq!(session.retry_count(), 0);
            assert_eq!(session.previous(), Some(AggregateStatus::Down));
        }
    }

    #[test]
    fn test_invalid_credential_uses_steady_interval() {
        let mut session = PollSession::new();
        let report = run(&mut session, Err(PollError::CredentialInvalid));

        assert_eq!(report.update.aggregate, AggregateStatus::Error);
        assert_eq!(report.update.error, Some(PollError::CredentialInvalid));
        assert_eq!(report.next, NextPoll::Steady(Duration::from_secs(60)));
        assert_eq!(session.previous(), None);
    }

    #[test]
    fn test_error_between_same_statuses_does_not_notify() {
        let mut session = PollSession::new();
        run(&mut session, up());
        run(&mut session, Err(PollError::Transport("timeout".to_string())));
        let report = run(&mut session, up());
        assert_eq!(report.notification, None);
    }

    #[test]
    fn test_failed_poll_reports_last_success() {
        let mut session = PollSession::new();
        run(&mut session, up());
        let seen = session.last_success();

        let report = run(&mut session, Err(PollError::Malformed("x".to_string())));
        assert_eq!(report.update.last_success, seen);
    }

    #[test]
    fn test_intervals_are_configurable() {
        let config = PollConfig {
            steady_interval: Duration::from_secs(1),
            retry_interval: Duration::from_millis(10),
            max_retries: 1,
        };
        let mut session = PollSession::new();

        assert!(session.try_begin());
        let first = session.complete(down(), &config, Local::now());
        assert_eq!(
            first.next,
            NextPoll::Retry {
                attempt: 1,
                delay: Duration::from_millis(10)
            }
        );

        assert!(session.try_begin());
        let second = session.complete(down(), &config, Local::now());
        assert_eq!(second.next, NextPoll::Steady(Duration::from_secs(1)));
    }
}
