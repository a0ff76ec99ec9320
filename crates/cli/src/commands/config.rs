use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use shelfsync_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let sync = &config.sync;
    let unset = || "<unset>".to_string();
    let rows: Vec<(&str, String, Option<&str>)> = vec![
        ("database.url", config.database.url.clone(), Some("SHELFSYNC_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("SHELFSYNC_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("SHELFSYNC_DATABASE_TIMEOUT_SECS"),
        ),
        ("worker.task_queue", config.worker.task_queue.clone(), Some("SHELFSYNC_WORKER_TASK_QUEUE")),
        ("worker.identity", config.worker.identity.clone(), Some("SHELFSYNC_WORKER_IDENTITY")),
        (
            "worker.max_concurrent_tasks",
            config.worker.max_concurrent_tasks.to_string(),
            Some("SHELFSYNC_WORKER_MAX_CONCURRENT_TASKS"),
        ),
        (
            "worker.queue_lease_secs",
            config.worker.queue_lease_secs.to_string(),
            Some("SHELFSYNC_WORKER_QUEUE_LEASE_SECS"),
        ),
        (
            "worker.history_lease_secs",
            config.worker.history_lease_secs.to_string(),
            Some("SHELFSYNC_WORKER_HISTORY_LEASE_SECS"),
        ),
        (
            "worker.poll_interval_ms",
            config.worker.poll_interval_ms.to_string(),
            Some("SHELFSYNC_WORKER_POLL_INTERVAL_MS"),
        ),
        ("sync.source", format!("{:?}", sync.source), Some("SHELFSYNC_SYNC_SOURCE")),
        ("sync.sheet_path", sync.sheet_path.display().to_string(), Some("SHELFSYNC_SYNC_SHEET_PATH")),
        ("sync.sheets_base_url", sync.sheets_base_url.clone(), Some("SHELFSYNC_SYNC_SHEETS_BASE_URL")),
        (
            "sync.spreadsheet_id",
            sync.spreadsheet_id.clone().unwrap_or_else(unset),
            Some("SHELFSYNC_SYNC_SPREADSHEET_ID"),
        ),
        ("sync.sheet_range", sync.sheet_range.clone(), Some("SHELFSYNC_SYNC_SHEET_RANGE")),
        (
            "sync.sheets_api_key",
            redact_secret(sync.sheets_api_key.as_ref()),
            Some("SHELFSYNC_SYNC_SHEETS_API_KEY"),
        ),
        ("sync.storefront", format!("{:?}", sync.storefront), Some("SHELFSYNC_SYNC_STOREFRONT")),
        (
            "sync.storefront_base_url",
            sync.storefront_base_url.clone().unwrap_or_else(unset),
            Some("SHELFSYNC_SYNC_STOREFRONT_BASE_URL"),
        ),
        (
            "sync.storefront_access_token",
            redact_secret(sync.storefront_access_token.as_ref()),
            Some("SHELFSYNC_SYNC_STOREFRONT_ACCESS_TOKEN"),
        ),
        (
            "sync.storefront_api_version",
            sync.storefront_api_version.clone(),
            Some("SHELFSYNC_SYNC_STOREFRONT_API_VERSION"),
        ),
        (
            "sync.memory_latency_ms",
            sync.memory_latency_ms.to_string(),
            Some("SHELFSYNC_SYNC_MEMORY_LATENCY_MS"),
        ),
        (
            "sync.outage_keyword",
            sync.outage_keyword.clone().unwrap_or_else(unset),
            Some("SHELFSYNC_SYNC_OUTAGE_KEYWORD"),
        ),
        ("sync.fetch_timeout_secs", sync.fetch_timeout_secs.to_string(), None),
        ("sync.map_timeout_secs", sync.map_timeout_secs.to_string(), None),
        ("sync.push_timeout_secs", sync.push_timeout_secs.to_string(), None),
        ("sync.push_retry_initial_secs", sync.push_retry_initial_secs.to_string(), None),
        (
            "sync.push_retry_max_attempts",
            sync.push_retry_max_attempts.to_string(),
            Some("SHELFSYNC_SYNC_PUSH_RETRY_MAX_ATTEMPTS"),
        ),
        (
            "sync.workflow_timeout_secs",
            sync.workflow_timeout_secs.map(|secs| secs.to_string()).unwrap_or_else(unset),
            Some("SHELFSYNC_SYNC_WORKFLOW_TIMEOUT_SECS"),
        ),
        ("logging.level", config.logging.level.clone(), Some("SHELFSYNC_LOGGING_LEVEL")),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("SHELFSYNC_LOGGING_FORMAT"),
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        rows.into_iter()
            .map(|(key_path, value, env_key)| render_line(key_path, &value, source(key_path, env_key))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("shelfsync.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/shelfsync.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(secret) => redact_token(secret.expose_secret()),
    }
}

/// Keeps a vendor prefix such as `shpat_` so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('_') {
        return format!("{prefix}_***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret, redact_token};

    #[test]
    fn tokens_keep_only_their_prefix() {
        assert_eq!(redact_token("shpat_abcdef"), "shpat_***");
        assert_eq!(redact_token("AIzaSyExample"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some(&SecretString::from("shpat_x".to_string()))), "shpat_***");
    }

    #[test]
    fn nested_keys_are_found_in_file_doc() {
        let doc: Value = "[sync]\nstorefront = \"shopify\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "sync.storefront"));
        assert!(!contains_path(&doc, "sync.sheet_path"));
        assert!(!contains_path(&doc, "logging.level"));
    }
}
