use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Why a poll cycle did not produce a fresh set of monitors.
///
/// Every variant is handled inside the scheduler and maps to the `error`
/// aggregate status; none of them stops the daemon.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("API key not configured or invalid")]
    CredentialInvalid,
    #[error("rate limit exceeded, retry in {wait_secs} seconds")]
    RateLimited { wait_secs: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}
