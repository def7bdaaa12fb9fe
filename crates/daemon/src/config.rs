//! Environment-level configuration for the dispatcher daemon

use std::time::Duration;
use taskrelay_core::application::DispatcherConfig;

const DEFAULT_DB_PATH: &str = "~/.taskrelay/outbox.db";
const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:9630";

/// Daemon configuration, read from TASKRELAY_* environment variables
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    pub engine_url: String,
    pub dispatcher: DispatcherConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("TASKRELAY_DB_PATH")
            .map(|p| shellexpand::tilde(&p).into_owned())
            .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

        let engine_url =
            std::env::var("TASKRELAY_ENGINE_URL").unwrap_or_else(|_| DEFAULT_ENGINE_URL.to_string());

        let mut dispatcher = DispatcherConfig::default();

        // Zero/negative values would wedge the loop (a zero-permit semaphore
        // never resolves) or unbound the claim (LIMIT <= 0 is unlimited in
        // SQLite), so clamp everything to at least 1
        if let Some(poll_ms) = env_parse::<u64>("TASKRELAY_POLL_INTERVAL_MS") {
            dispatcher.poll_interval = Duration::from_millis(poll_ms.max(1));
        }
        if let Some(batch_size) = env_parse::<i64>("TASKRELAY_BATCH_SIZE") {
            dispatcher.batch_size = batch_size.max(1);
        }
        if let Some(concurrency) = env_parse::<usize>("TASKRELAY_DISPATCH_CONCURRENCY") {
            dispatcher.dispatch_concurrency = concurrency.max(1);
        }
        if let Some(lock_timeout_ms) = env_parse::<i64>("TASKRELAY_LOCK_TIMEOUT_MS") {
            dispatcher.lock_timeout_ms = lock_timeout_ms.max(1);
        }
        if let Ok(enabled) = std::env::var("TASKRELAY_ENABLED") {
            dispatcher.enabled = matches!(enabled.as_str(), "1" | "true" | "TRUE" | "yes");
        }

        Self {
            db_path,
            engine_url,
            dispatcher,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
