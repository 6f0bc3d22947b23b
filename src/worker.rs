use chrono::Local;
use log::{debug, error, info, warn};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    select,
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;

use crate::api::MonitorApi;
use crate::config::PollConfig;
use crate::credential;
use crate::error::PollError;
use crate::monitor::RawMonitor;
use crate::notifier::{Notification, Notifier};
use crate::scheduler::{NextPoll, PollSession};
use crate::sink::StatusSink;

/// Upper bound on any wait; longer rate-limit waits are cut to it.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Completion of a dispatched poll, tagged with the generation it ran under.
struct Completion {
    generation: u64,
    outcome: Result<Vec<RawMonitor>, PollError>,
}

/// Drives a [`PollSession`] against the API until cancelled.
pub struct Worker {
    api: Arc<dyn MonitorApi>,
    notifier: Arc<dyn Notifier>,
    sink: Arc<dyn StatusSink>,
    config: PollConfig,
    credentials: watch::Receiver<String>,
    session: PollSession,
    generation: u64,
    deliveries: JoinSet<()>,
}

impl Worker {
    #[must_use]
    pub fn new(
        api: Arc<dyn MonitorApi>,
        notifier: Arc<dyn Notifier>,
        sink: Arc<dyn StatusSink>,
        config: PollConfig,
        credentials: watch::Receiver<String>,
    ) -> Self {
        Self {
            api,
            notifier,
            sink,
            config,
            credentials,
            session: PollSession::new(),
            generation: 0,
            deliveries: JoinSet::new(),
        }
    }

    /// Polls immediately, then keeps polling on the schedule the session
    /// decides. A credential change cancels the pending wait and polls now.
    ///
    /// On cancellation the pending wait is dropped and the request in
    /// flight is aborted; a late completion is discarded by its generation.
    pub async fn run(mut self, token: CancellationToken) {
        info!("Starting monitor polling...");
        info!(
            "Check interval: {} seconds, retry interval: {} seconds, max retries: {}",
            self.config.steady_interval.as_secs(),
            self.config.retry_interval.as_secs(),
            self.config.max_retries
        );

        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(1);
        let mut in_flight: Option<JoinHandle<()>> = None;
        let mut next_poll = Some(Instant::now());
        let mut credentials_open = true;

        loop {
            let deadline = next_poll;
            let wait = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => pending().await,
                }
            };

            select! {
                () = token.cancelled() => {
                    info!("Shutdown requested, stopping monitor");
                    break;
                }
                changed = self.credentials.changed(), if credentials_open => {
                    if changed.is_err() {
                        debug!("Credential source closed, keeping the last API key");
                        credentials_open = false;
                        continue;
                    }
                    if self.session.is_in_flight() {
                        info!("API key changed while a poll is in flight, ignoring");
                        continue;
                    }
                    info!("API key changed, polling now");
                    next_poll = None;
                    in_flight = self.start_poll(&done_tx, &mut next_poll);
                }
                Some(done) = done_rx.recv() => {
                    if let Some(at) = self.on_completion(done) {
                        in_flight = None;
                        next_poll = Some(at);
                    }
                }
                () = wait => {
                    next_poll = None;
                    in_flight = self.start_poll(&done_tx, &mut next_poll);
                }
            }
        }

        // Cleanup and shutdown
        if let Some(handle) = in_flight.take() {
            handle.abort();
        }
        self.generation += 1;
        self.session.abandon();
        self.deliveries.abort_all();
        info!("Monitor polling stopped gracefully");
    }

    /// Starts a poll unless one is in flight. An invalid key is settled on
    /// the spot without touching the network, arming `next_poll` directly.
    fn start_poll(
        &mut self,
        done_tx: &mpsc::Sender<Completion>,
        next_poll: &mut Option<Instant>,
    ) -> Option<JoinHandle<()>> {
        if !self.session.try_begin() {
            debug!("Poll already in flight, skipping trigger");
            return None;
        }

        let api_key = self.credentials.borrow_and_update().clone();
        if !credential::validate(Some(&api_key)) {
            *next_poll = Some(self.settle(Err(PollError::CredentialInvalid)));
            return None;
        }

        self.generation += 1;
        let generation = self.generation;
        let api = Arc::clone(&self.api);
        let done_tx = done_tx.clone();
        debug!("Dispatching poll #{generation}");

        Some(tokio::spawn(async move {
            let outcome = api.fetch(&api_key).await;
            // the receiver is gone only after shutdown
            let _ = done_tx.send(Completion { generation, outcome }).await;
        }))
    }

    /// Applies a poll completion. Returns the next deadline, or `None` when
    /// the completion belongs to a superseded poll and was discarded.
    fn on_completion(&mut self, done: Completion) -> Option<Instant> {
        if done.generation != self.generation || !self.session.is_in_flight() {
            debug!("Discarding stale completion from poll #{}", done.generation);
            return None;
        }
        Some(self.settle(done.outcome))
    }

    fn settle(&mut self, outcome: Result<Vec<RawMonitor>, PollError>) -> Instant {
        let report = self
            .session
            .complete(outcome, &self.config, Local::now());

        self.sink.on_status_updated(&report.update);
        if let Some(notification) = report.notification {
            self.deliver(notification);
        }

        schedule(report.next)
    }

    /// Sends a notification off the poll loop so a slow surface never
    /// delays polling or shutdown.
    fn deliver(&mut self, notification: Notification) {
        while self.deliveries.try_join_next().is_some() {}

        let notifier = Arc::clone(&self.notifier);
        self.deliveries.spawn(async move {
            if let Err(e) = notifier
                .emit(&notification.title, &notification.body)
                .await
            {
                error!("Failed to deliver notification: {e}");
            }
        });
    }
}

fn schedule(next: NextPoll) -> Instant {
    match next {
        NextPoll::Steady(delay) => debug!("Next poll in {}s", delay.as_secs()),
        NextPoll::Retry { attempt, delay } => {
            debug!("Retry #{attempt} in {}s", delay.as_secs());
        }
        NextPoll::RateLimit(delay) => warn!("Backing off {}s for rate limit", delay.as_secs()),
    }
    deadline_after(Instant::now(), next.delay())
}

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now + delay.min(FAR_FUTURE)
}
