use log::{info, warn};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{select, sync::watch, time::sleep};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

const APP_DIR: &str = "uptime-notifier";
const CONFIG_FILE: &str = "config.toml";
const RELOAD_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub config: ConfigOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigOptions {
    pub api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub discord_id: Option<u64>,
}

impl Config {
    /// Location of the config file, `UPTIME_NOTIFIER_CONFIG` taking precedence
    /// over the user config directory.
    ///
    /// # Errors
    ///
    /// Fails when no config directory can be determined for this user.
    pub fn default_path() -> Result<PathBuf, Error> {
        if let Ok(path) = dotenvy::var("UPTIME_NOTIFIER_CONFIG") {
            return Ok(PathBuf::from(path));
        }

        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| Error::Config("could not determine config directory".to_string()))
    }

    /// Loads the config file and applies environment overrides.
    ///
    /// A missing file is not an error: the daemon then runs without an API
    /// key and reports the configuration problem on every poll.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed, or when an
    /// override has an invalid value.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_overrides(|name| dotenvy::var(name).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(api_key) = var("UPTIMEROBOT_API_KEY") {
            self.config.api_key = Some(api_key);
        }

        if let Some(webhook_url) = var("DISCORD_WEBHOOK_URL") {
            self.config.webhook_url = Some(webhook_url);
        }

        if let Some(discord_id) = var("DISCORD_ID") {
            let id = discord_id
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("DISCORD_ID is not a number: {discord_id}")))?;
            self.config.discord_id = Some(id);
        }

        Ok(())
    }

    /// The configured API key, empty when none is set.
    #[must_use]
    pub fn api_key(&self) -> String {
        self.config.api_key.clone().unwrap_or_default()
    }

    /// # Errors
    ///
    /// Fails when a webhook is configured but is not a valid URL.
    pub fn webhook_url(&self) -> Result<Option<Url>, Error> {
        self.config
            .webhook_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(Error::from)
    }
}

/// Fixed timing of the poll scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub steady_interval: Duration,
    pub retry_interval: Duration,
    /// Short retries allowed in a row before falling back to the steady interval.
    pub max_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            steady_interval: Duration::from_secs(60),
            retry_interval: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

/// Re-reads the config file periodically and publishes the API key when it
/// changes, until `token` is cancelled.
pub async fn watch_api_key(path: PathBuf, tx: watch::Sender<String>, token: CancellationToken) {
    loop {
        select! {
            () = sleep(RELOAD_INTERVAL) => {},
            () = token.cancelled() => break,
        }

        let api_key = match Config::load_from(&path) {
            Ok(config) => config.api_key(),
            Err(e) => {
                warn!("Failed to reload {}: {e}", path.display());
                continue;
            }
        };

        let changed = tx.send_if_modified(|current| {
            if *current == api_key {
                false
            } else {
                *current = api_key;
                true
            }
        });
        if changed {
            info!("API key changed in {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        write!(temp_file, "{content}").expect("Failed to write to temp file");
        temp_file
    }

    fn parse(content: &str) -> Config {
        toml::from_str(content).expect("Failed to parse config")
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
            [config]
            api_key = "u1234567-abcdefghijklmnop"
            webhook_url = "https://discord.com/api/webhooks/1234567890/abcdefg"
            discord_id = 1234567890
        "#,
        );

        assert_eq!(config.api_key(), "u1234567-abcdefghijklmnop");
        assert_eq!(config.config.discord_id, Some(1_234_567_890));
        assert_eq!(
            config.webhook_url().unwrap().map(String::from),
            Some("https://discord.com/api/webhooks/1234567890/abcdefg".to_string())
        );
    }

    #[test]
    fn test_empty_file_means_no_key() {
        let config = parse("");
        assert_eq!(config.api_key(), "");
        assert!(config.webhook_url().unwrap().is_none());
    }

    #[test]
    fn test_invalid_webhook_url_is_error() {
        let config = parse("[config]\nwebhook_url = \"not a url\"\n");
        assert!(matches!(config.webhook_url(), Err(Error::UrlParse(_))));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let file = write_config("[config\napi_key = ");
        assert!(matches!(
            Config::load_from(file.path()),
            Err(Error::TomlParse(_))
        ));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = parse("[config]\napi_key = \"from-file-12345\"\n");
        config
            .apply_overrides(|name| match name {
                "UPTIMEROBOT_API_KEY" => Some("from-env-123456".to_string()),
                "DISCORD_ID" => Some(" 42 ".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.api_key(), "from-env-123456");
        assert_eq!(config.config.discord_id, Some(42));
        assert!(config.config.webhook_url.is_none());
    }

    #[test]
    fn test_non_numeric_discord_id_override_is_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "DISCORD_ID").then(|| "someone".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_poll_config_defaults() {
        let poll = PollConfig::default();
        assert_eq!(poll.steady_interval, Duration::from_secs(60));
        assert_eq!(poll.retry_interval, Duration::from_secs(5));
        assert_eq!(poll.max_retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_publishes_changed_key() {
        // real environment overrides would mask the file contents
        if dotenvy::var("UPTIMEROBOT_API_KEY").is_ok() {
            return;
        }

        let file = write_config("[config]\napi_key = \"first-key-123456\"\n");
        let (tx, mut rx) = watch::channel("first-key-123456".to_string());
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_api_key(
            file.path().to_path_buf(),
            tx,
            token.clone(),
        ));

        sleep(Duration::from_secs(6)).await;
        assert!(!rx.has_changed().unwrap(), "unchanged file must not notify");

        fs::write(file.path(), "[config]\napi_key = \"second-key-123456\"\n").unwrap();
        sleep(Duration::from_secs(5)).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "second-key-123456");

        token.cancel();
        watcher.await.unwrap();
    }
}
