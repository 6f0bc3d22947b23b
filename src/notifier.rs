use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::error::Error;
use crate::monitor::{self, AggregateStatus, MonitorRecord};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Down on the very first observation, with no baseline to compare to.
    FirstAlarm,
    WentDown,
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

/// Outcome of comparing a freshly computed aggregate to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub notification: Option<Notification>,
    /// Set when a down event was just raised and should be re-confirmed
    /// on the short retry interval.
    pub arm_retry: bool,
}

/// Decides whether a new aggregate status is worth telling the user about.
///
/// Only edges notify: the first observation notifies only when it is
/// already down, and a repeated status never notifies.
#[must_use]
pub fn evaluate(
    new: AggregateStatus,
    monitors: &[MonitorRecord],
    previous: Option<AggregateStatus>,
) -> Transition {
    let changed = previous.is_some_and(|p| p != new);

    let notification = match (previous, new) {
        (None, AggregateStatus::Down) => {
            Some(down_notification(NotificationKind::FirstAlarm, monitors))
        }
        (Some(_), AggregateStatus::Down) if changed => {
            Some(down_notification(NotificationKind::WentDown, monitors))
        }
        (Some(_), AggregateStatus::Up) if changed => Some(Notification {
            kind: NotificationKind::Recovered,
            title: "All sites are online!".to_string(),
            body: "All your monitored sites are now online.".to_string(),
        }),
        _ => None,
    };

    let arm_retry = notification
        .as_ref()
        .is_some_and(|n| n.kind != NotificationKind::Recovered);

    Transition {
        notification,
        arm_retry,
    }
}

fn down_notification(kind: NotificationKind, monitors: &[MonitorRecord]) -> Notification {
    let names: Vec<&str> = monitor::down_monitors(monitors)
        .map(|m| m.display_name.as_str())
        .collect();
    let count = names.len();
    let names = names.join(", ");

    let (title, body) = if kind == NotificationKind::FirstAlarm {
        (
            "Sites down detected!",
            format!("Found {count} site(s) currently offline: {names}"),
        )
    } else {
        (
            "Sites are down!",
            format!("{count} site(s) are currently offline: {names}"),
        )
    };

    Notification {
        kind,
        title: title.to_string(),
        body,
    }
}

/// A surface that can show a notification to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, title: &str, body: &str) -> Result<(), Error>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn emit(&self, title: &str, body: &str) -> Result<(), Error> {
        warn!("{title} {body}");
        Ok(())
    }
}

#[derive(Serialize)]
struct DiscordMessage {
    content: String,
}

/// Posts notifications to a Discord webhook, optionally mentioning a user.
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    webhook_url: Url,
    discord_id: Option<u64>,
}

impl DiscordNotifier {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(webhook_url: Url, discord_id: Option<u64>) -> Result<Self, Error> {
        let client = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;

        Ok(Self {
            client,
            webhook_url,
            discord_id,
        })
    }

    fn message(&self, title: &str, body: &str) -> DiscordMessage {
        // If discord_id is None, we don't want to mention anyone
        let tag = self.discord_id.map_or(String::new(), |id| format!("<@{id}> "));

        DiscordMessage {
            content: format!("{tag}**{title}** {body}"),
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn emit(&self, title: &str, body: &str) -> Result<(), Error> {
        info!("Sending Discord notification: {title}");

        self.client
            .post(self.webhook_url.clone())
            .json(&self.message(title, body))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
