use chrono::{DateTime, Local};
use log::{info, warn};

use crate::error::PollError;
use crate::monitor::{self, AggregateStatus, MonitorRecord, MonitorSummary};

/// Everything a presentation layer needs after one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub aggregate: AggregateStatus,
    /// Empty unless the poll succeeded.
    pub monitors: Vec<MonitorRecord>,
    pub timestamp: DateTime<Local>,
    pub last_success: Option<DateTime<Local>>,
    pub error: Option<PollError>,
}

/// Receives the result of every completed poll cycle.
pub trait StatusSink: Send + Sync {
    fn on_status_updated(&self, update: &StatusUpdate);
}

/// Renders status updates into the log.
#[derive(Debug, Clone)]
pub struct LogSink {
    config_hint: String,
}

impl LogSink {
    /// `config_hint` tells the user where the API key is configured.
    #[must_use]
    pub fn new(config_hint: impl Into<String>) -> Self {
        Self {
            config_hint: config_hint.into(),
        }
    }

    /// Lines shown for an update, the first one being the headline.
    #[must_use]
    pub fn render(&self, update: &StatusUpdate) -> Vec<String> {
        let mut lines = vec![format!("Status: {}", update.aggregate)];

        match &update.error {
            Some(PollError::CredentialInvalid) => {
                lines.push("Configuration required: API key not configured or invalid".to_string());
                lines.push(format!("Configure your API key in {}", self.config_hint));
                return lines;
            }
            Some(err) => lines.push(format!("Last poll failed: {err}")),
            None => {}
        }

        if let Some(at) = update.last_success {
            lines.push(format!("Last update: {}", at.format("%H:%M:%S %Y-%m-%d")));
        }

        if update.error.is_some() {
            return lines;
        }

        if update.monitors.is_empty() {
            lines.push("No monitors found".to_string());
            return lines;
        }

        lines.push(MonitorSummary::from_records(&update.monitors).to_string());
        lines.extend(
            monitor::down_monitors(&update.monitors)
                .map(|m| format!("DOWN: {} ({})", m.display_name, m.url)),
        );
        lines
    }
}

impl StatusSink for LogSink {
    fn on_status_updated(&self, update: &StatusUpdate) {
        for line in self.render(update) {
            match update.aggregate {
                AggregateStatus::Up | AggregateStatus::Unknown => info!("{line}"),
                AggregateStatus::Down | AggregateStatus::Error => warn!("{line}"),
            }
        }
    }
}
