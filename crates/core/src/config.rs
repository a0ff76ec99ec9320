use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TASK_QUEUE: &str = "sheets-to-shopify-queue";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerSettings,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub task_queue: String,
    pub identity: String,
    pub max_concurrent_tasks: usize,
    /// Visibility window of a claimed queue entry.
    pub queue_lease_secs: u64,
    /// Single-writer lease on an execution's history.
    pub history_lease_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub source: SheetSourceKind,
    pub sheet_path: PathBuf,
    pub sheets_base_url: String,
    pub spreadsheet_id: Option<String>,
    pub sheet_range: String,
    pub sheets_api_key: Option<SecretString>,
    pub storefront: StorefrontKind,
    pub storefront_base_url: Option<String>,
    pub storefront_access_token: Option<SecretString>,
    pub storefront_api_version: String,
    /// Latency of each push to the in-memory storefront.
    pub memory_latency_ms: u64,
    /// Titles containing this keyword fail their first push attempt.
    pub outage_keyword: Option<String>,
    pub fetch_timeout_secs: u64,
    pub map_timeout_secs: u64,
    pub push_timeout_secs: u64,
    pub push_retry_initial_secs: u64,
    pub push_retry_max_attempts: u32,
    pub workflow_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetSourceKind {
    File,
    SheetsApi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorefrontKind {
    Memory,
    Shopify,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub task_queue: Option<String>,
    pub worker_identity: Option<String>,
    pub sheet_path: Option<PathBuf>,
    pub storefront: Option<StorefrontKind>,
    pub outage_keyword: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://shelfsync.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            worker: WorkerSettings {
                task_queue: DEFAULT_TASK_QUEUE.to_string(),
                identity: "shelfsync-worker".to_string(),
                max_concurrent_tasks: 16,
                queue_lease_secs: 300,
                history_lease_secs: 30,
                poll_interval_ms: 200,
            },
            sync: SyncConfig {
                source: SheetSourceKind::File,
                sheet_path: PathBuf::from("data/sheet.json"),
                sheets_base_url: "https://sheets.googleapis.com".to_string(),
                spreadsheet_id: None,
                sheet_range: "Sheet1!A2:C".to_string(),
                sheets_api_key: None,
                storefront: StorefrontKind::Memory,
                storefront_base_url: None,
                storefront_access_token: None,
                storefront_api_version: "2024-01".to_string(),
                memory_latency_ms: 1_000,
                outage_keyword: Some("crash".to_string()),
                fetch_timeout_secs: 120,
                map_timeout_secs: 30,
                push_timeout_secs: 60,
                push_retry_initial_secs: 3,
                push_retry_max_attempts: 3,
                workflow_timeout_secs: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for SheetSourceKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sheets_api" => Ok(Self::SheetsApi),
            other => Err(ConfigError::Validation(format!(
                "unsupported sheet source `{other}` (expected file|sheets_api)"
            ))),
        }
    }
}

impl std::str::FromStr for StorefrontKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "shopify" => Ok(Self::Shopify),
            other => Err(ConfigError::Validation(format!(
                "unsupported storefront `{other}` (expected memory|shopify)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("shelfsync.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(worker) = patch.worker {
            if let Some(task_queue) = worker.task_queue {
                self.worker.task_queue = task_queue;
            }
            if let Some(identity) = worker.identity {
                self.worker.identity = identity;
            }
            if let Some(max_concurrent_tasks) = worker.max_concurrent_tasks {
                self.worker.max_concurrent_tasks = max_concurrent_tasks;
            }
            if let Some(queue_lease_secs) = worker.queue_lease_secs {
                self.worker.queue_lease_secs = queue_lease_secs;
            }
            if let Some(history_lease_secs) = worker.history_lease_secs {
                self.worker.history_lease_secs = history_lease_secs;
            }
            if let Some(poll_interval_ms) = worker.poll_interval_ms {
                self.worker.poll_interval_ms = poll_interval_ms;
            }
        }

        if let Some(sync) = patch.sync {
            if let Some(source) = sync.source {
                self.sync.source = source;
            }
            if let Some(sheet_path) = sync.sheet_path {
                self.sync.sheet_path = sheet_path;
            }
            if let Some(sheets_base_url) = sync.sheets_base_url {
                self.sync.sheets_base_url = sheets_base_url;
            }
            if let Some(spreadsheet_id) = sync.spreadsheet_id {
                self.sync.spreadsheet_id = Some(spreadsheet_id);
            }
            if let Some(sheet_range) = sync.sheet_range {
                self.sync.sheet_range = sheet_range;
            }
            if let Some(sheets_api_key_value) = sync.sheets_api_key {
                self.sync.sheets_api_key = Some(secret_value(sheets_api_key_value));
            }
            if let Some(storefront) = sync.storefront {
                self.sync.storefront = storefront;
            }
            if let Some(storefront_base_url) = sync.storefront_base_url {
                self.sync.storefront_base_url = Some(storefront_base_url);
            }
            if let Some(access_token_value) = sync.storefront_access_token {
                self.sync.storefront_access_token = Some(secret_value(access_token_value));
            }
            if let Some(storefront_api_version) = sync.storefront_api_version {
                self.sync.storefront_api_version = storefront_api_version;
            }
            if let Some(memory_latency_ms) = sync.memory_latency_ms {
                self.sync.memory_latency_ms = memory_latency_ms;
            }
            if let Some(outage_keyword) = sync.outage_keyword {
                self.sync.outage_keyword = non_empty(outage_keyword);
            }
            if let Some(fetch_timeout_secs) = sync.fetch_timeout_secs {
                self.sync.fetch_timeout_secs = fetch_timeout_secs;
            }
            if let Some(map_timeout_secs) = sync.map_timeout_secs {
                self.sync.map_timeout_secs = map_timeout_secs;
            }
            if let Some(push_timeout_secs) = sync.push_timeout_secs {
                self.sync.push_timeout_secs = push_timeout_secs;
            }
            if let Some(push_retry_initial_secs) = sync.push_retry_initial_secs {
                self.sync.push_retry_initial_secs = push_retry_initial_secs;
            }
            if let Some(push_retry_max_attempts) = sync.push_retry_max_attempts {
                self.sync.push_retry_max_attempts = push_retry_max_attempts;
            }
            if let Some(workflow_timeout_secs) = sync.workflow_timeout_secs {
                self.sync.workflow_timeout_secs = Some(workflow_timeout_secs);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SHELFSYNC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SHELFSYNC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SHELFSYNC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SHELFSYNC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SHELFSYNC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SHELFSYNC_WORKER_TASK_QUEUE") {
            self.worker.task_queue = value;
        }
        if let Some(value) = read_env("SHELFSYNC_WORKER_IDENTITY") {
            self.worker.identity = value;
        }
        if let Some(value) = read_env("SHELFSYNC_WORKER_MAX_CONCURRENT_TASKS") {
            self.worker.max_concurrent_tasks =
                parse_u32("SHELFSYNC_WORKER_MAX_CONCURRENT_TASKS", &value)? as usize;
        }
        if let Some(value) = read_env("SHELFSYNC_WORKER_QUEUE_LEASE_SECS") {
            self.worker.queue_lease_secs = parse_u64("SHELFSYNC_WORKER_QUEUE_LEASE_SECS", &value)?;
        }
        if let Some(value) = read_env("SHELFSYNC_WORKER_HISTORY_LEASE_SECS") {
            self.worker.history_lease_secs =
                parse_u64("SHELFSYNC_WORKER_HISTORY_LEASE_SECS", &value)?;
        }
        if let Some(value) = read_env("SHELFSYNC_WORKER_POLL_INTERVAL_MS") {
            self.worker.poll_interval_ms = parse_u64("SHELFSYNC_WORKER_POLL_INTERVAL_MS", &value)?;
        }

        if let Some(value) = read_env("SHELFSYNC_SYNC_SOURCE") {
            self.sync.source = value.parse()?;
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_SHEET_PATH") {
            self.sync.sheet_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_SHEETS_BASE_URL") {
            self.sync.sheets_base_url = value;
        }
        let spreadsheet_id =
            read_env("SHELFSYNC_SYNC_SPREADSHEET_ID").or_else(|| read_env("SPREADSHEET_ID"));
        if let Some(value) = spreadsheet_id {
            self.sync.spreadsheet_id = Some(value);
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_SHEET_RANGE") {
            self.sync.sheet_range = value;
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_SHEETS_API_KEY") {
            self.sync.sheets_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_STOREFRONT") {
            self.sync.storefront = value.parse()?;
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_STOREFRONT_BASE_URL") {
            self.sync.storefront_base_url = Some(value);
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_STOREFRONT_ACCESS_TOKEN") {
            self.sync.storefront_access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_STOREFRONT_API_VERSION") {
            self.sync.storefront_api_version = value;
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_MEMORY_LATENCY_MS") {
            self.sync.memory_latency_ms = parse_u64("SHELFSYNC_SYNC_MEMORY_LATENCY_MS", &value)?;
        }
        if let Ok(value) = env::var("SHELFSYNC_SYNC_OUTAGE_KEYWORD") {
            // Set but empty disables the simulation.
            self.sync.outage_keyword = non_empty(value);
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_PUSH_RETRY_MAX_ATTEMPTS") {
            self.sync.push_retry_max_attempts =
                parse_u32("SHELFSYNC_SYNC_PUSH_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SHELFSYNC_SYNC_WORKFLOW_TIMEOUT_SECS") {
            self.sync.workflow_timeout_secs =
                Some(parse_u64("SHELFSYNC_SYNC_WORKFLOW_TIMEOUT_SECS", &value)?);
        }

        let log_level =
            read_env("SHELFSYNC_LOGGING_LEVEL").or_else(|| read_env("SHELFSYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SHELFSYNC_LOGGING_FORMAT").or_else(|| read_env("SHELFSYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(task_queue) = overrides.task_queue {
            self.worker.task_queue = task_queue;
        }
        if let Some(identity) = overrides.worker_identity {
            self.worker.identity = identity;
        }
        if let Some(sheet_path) = overrides.sheet_path {
            self.sync.source = SheetSourceKind::File;
            self.sync.sheet_path = sheet_path;
        }
        if let Some(storefront) = overrides.storefront {
            self.sync.storefront = storefront;
        }
        if let Some(outage_keyword) = overrides.outage_keyword {
            self.sync.outage_keyword = non_empty(outage_keyword);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_worker(&self.worker)?;
        validate_sync(&self.sync)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("shelfsync.toml"), PathBuf::from("config/shelfsync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_worker(worker: &WorkerSettings) -> Result<(), ConfigError> {
    if worker.task_queue.trim().is_empty() {
        return Err(ConfigError::Validation("worker.task_queue must not be empty".to_string()));
    }
    if worker.identity.trim().is_empty() {
        return Err(ConfigError::Validation("worker.identity must not be empty".to_string()));
    }
    if worker.max_concurrent_tasks == 0 {
        return Err(ConfigError::Validation(
            "worker.max_concurrent_tasks must be greater than zero".to_string(),
        ));
    }
    if worker.queue_lease_secs == 0 || worker.history_lease_secs == 0 {
        return Err(ConfigError::Validation(
            "worker.queue_lease_secs and worker.history_lease_secs must be greater than zero"
                .to_string(),
        ));
    }
    if worker.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "worker.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_sync(sync: &SyncConfig) -> Result<(), ConfigError> {
    match sync.source {
        SheetSourceKind::File => {
            if sync.sheet_path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "sync.sheet_path is required for the file source".to_string(),
                ));
            }
        }
        SheetSourceKind::SheetsApi => {
            let missing_id =
                sync.spreadsheet_id.as_ref().map(|id| id.trim().is_empty()).unwrap_or(true);
            if missing_id {
                return Err(ConfigError::Validation(
                    "sync.spreadsheet_id is required for the sheets_api source".to_string(),
                ));
            }
            let missing_key = sync
                .sheets_api_key
                .as_ref()
                .map(|key| key.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_key {
                return Err(ConfigError::Validation(
                    "sync.sheets_api_key is required for the sheets_api source".to_string(),
                ));
            }
            validate_http_url("sync.sheets_base_url", &sync.sheets_base_url)?;
        }
    }

    if sync.storefront == StorefrontKind::Shopify {
        let Some(base_url) = sync.storefront_base_url.as_deref() else {
            return Err(ConfigError::Validation(
                "sync.storefront_base_url is required for the shopify storefront".to_string(),
            ));
        };
        validate_http_url("sync.storefront_base_url", base_url)?;

        let missing_token = sync
            .storefront_access_token
            .as_ref()
            .map(|token| token.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "sync.storefront_access_token is required for the shopify storefront. Create an Admin API access token under Settings > Apps and sales channels > Develop apps".to_string(),
            ));
        }
    }

    let timeouts = [
        ("sync.fetch_timeout_secs", sync.fetch_timeout_secs),
        ("sync.map_timeout_secs", sync.map_timeout_secs),
        ("sync.push_timeout_secs", sync.push_timeout_secs),
        ("sync.push_retry_initial_secs", sync.push_retry_initial_secs),
    ];
    for (key, value) in timeouts {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{key} must be greater than zero")));
        }
    }
    if sync.workflow_timeout_secs == Some(0) {
        return Err(ConfigError::Validation(
            "sync.workflow_timeout_secs must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    worker: Option<WorkerPatch>,
    sync: Option<SyncPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    task_queue: Option<String>,
    identity: Option<String>,
    max_concurrent_tasks: Option<usize>,
    queue_lease_secs: Option<u64>,
    history_lease_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncPatch {
    source: Option<SheetSourceKind>,
    sheet_path: Option<PathBuf>,
    sheets_base_url: Option<String>,
    spreadsheet_id: Option<String>,
    sheet_range: Option<String>,
    sheets_api_key: Option<String>,
    storefront: Option<StorefrontKind>,
    storefront_base_url: Option<String>,
    storefront_access_token: Option<String>,
    storefront_api_version: Option<String>,
    memory_latency_ms: Option<u64>,
    outage_keyword: Option<String>,
    fetch_timeout_secs: Option<u64>,
    map_timeout_secs: Option<u64>,
    push_timeout_secs: Option<u64>,
    push_retry_initial_secs: Option<u64>,
    push_retry_max_attempts: Option<u32>,
    workflow_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
