/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound for every remote call (create/update/delete/read/list/subscribe)
    pub request_timeout: Duration,

    /// Capacity of the store's change broadcast
    pub store_event_capacity: usize,

    /// Buffered raw events per feed subscription
    pub feed_buffer: usize,

    /// Data directory for the embedded backend (defaults to `.convo/data`)
    pub data_dir: Option<PathBuf>,

    /// Authenticated viewer; `None` means nobody is signed in
    pub viewer_id: Option<String>,

    /// Conversation to open on start (CLI)
    pub conversation_id: Option<String>,

    /// Other participant of that conversation (CLI)
    pub counterparty_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            store_event_capacity: DEFAULT_CHANNEL_CAPACITY,
            feed_buffer: DEFAULT_CHANNEL_CAPACITY,
            data_dir: None,
            viewer_id: None,
            conversation_id: None,
            counterparty_id: None,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 4 {
            return Err(ChatError::Config(format!(
                "Usage: {} <viewer_id> <conversation_id> <counterparty_id> [--data-dir <path>] [--timeout-ms <ms>] [--feed-buffer <n>]",
                args.first().map(String::as_str).unwrap_or("convo")
            )));
        }

        let mut config = Self {
            viewer_id: Some(non_empty(&args[1], "viewer_id")?),
            conversation_id: Some(non_empty(&args[2], "conversation_id")?),
            counterparty_id: Some(non_empty(&args[3], "counterparty_id")?),
            ..Default::default()
        };

        let mut i = 4;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--timeout-ms" => {
                    let ms = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--timeout-ms requires a value".to_string())
                    })?;
                    config.request_timeout = Duration::from_millis(parse_positive(ms, "--timeout-ms")?);
                    i += 2;
                }
                "--feed-buffer" => {
                    let n = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--feed-buffer requires a value".to_string())
                    })?;
                    config.feed_buffer = parse_positive(n, "--feed-buffer")? as usize;
                    i += 2;
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Env overrides (nice for scripts)
    pub fn apply_env(&mut self) {
        if let Some(ms) = std::env::var("CONVO_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Ok(dir) = std::env::var("CONVO_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    pub fn data_dir_or_default(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".convo/data"))
    }
}

fn non_empty(value: &str, name: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ChatError::Config(format!("{} must not be empty", name)));
    }
    Ok(value.to_string())
}

fn parse_positive(value: &str, flag: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ChatError::Config(format!("{} must be a positive number", flag))),
    }
}
