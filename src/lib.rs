pub mod api;
pub mod config;
pub mod credential;
pub mod error;
pub mod monitor;
pub mod notifier;
pub mod scheduler;
pub mod sink;
pub mod worker;

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub use api::{ApiClient, MonitorApi};
pub use config::{Config, PollConfig};
pub use error::{Error, PollError};
pub use monitor::{AggregateStatus, MonitorRecord, MonitorStatus};
pub use notifier::{DiscordNotifier, LogNotifier, Notifier};
pub use sink::{LogSink, StatusSink, StatusUpdate};
pub use worker::Worker;

/// Loads the configuration and polls UptimeRobot until `token` is cancelled.
///
/// # Errors
///
/// Fails if the configuration cannot be loaded or the HTTP client cannot be
/// built. Poll failures never end the run.
pub async fn run(token: CancellationToken) -> Result<(), Error> {
    let path = Config::default_path()?;
    let config = Config::load_from(&path)?;
    info!("Using configuration from {}", path.display());

    let notifier: Arc<dyn Notifier> = match config.webhook_url()? {
        Some(url) => {
            info!("Webhook is set, notifications will be sent to Discord");
            if config.config.discord_id.is_none() {
                warn!("Discord ID is not set, notifications will not tag any user");
            }
            Arc::new(DiscordNotifier::new(url, config.config.discord_id)?)
        }
        None => {
            warn!("Webhook is not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let sink = Arc::new(LogSink::new(format!(
        "{} or UPTIMEROBOT_API_KEY",
        path.display()
    )));
    let api = Arc::new(ApiClient::new()?);

    let (key_tx, key_rx) = watch::channel(config.api_key());
    let watcher = tokio::spawn(config::watch_api_key(path, key_tx, token.clone()));

    Worker::new(api, notifier, sink, PollConfig::default(), key_rx)
        .run(token)
        .await;

    if let Err(e) = watcher.await {
        warn!("Config watcher ended abnormally: {e}");
    }
    Ok(())
}
