use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use shelfsync_cli::commands::start::StartArgs;
use shelfsync_cli::commands::{cancel, config, history, list, migrate, resume, run, start};
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_file_database() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = database_url(dir.path());
    with_env(&[("SHELFSYNC_DATABASE_URL", database_url.as_str())], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_env() {
    with_env(&[("SHELFSYNC_DATABASE_MAX_CONNECTIONS", "many")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn run_syncs_every_valid_row_from_the_sheet_file() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = database_url(dir.path());
    let sheet = write_sheet(
        dir.path(),
        r#"{"values": [["Blue Mug", "12.50"], ["Tea Towel", "4"], ["No price"]]}"#,
    );
    with_env(
        &[
            ("SHELFSYNC_DATABASE_URL", database_url.as_str()),
            ("SHELFSYNC_SYNC_SHEET_PATH", sheet.as_str()),
            ("SHELFSYNC_SYNC_MEMORY_LATENCY_MS", "5"),
            ("SHELFSYNC_SYNC_OUTAGE_KEYWORD", ""),
            ("SHELFSYNC_WORKER_POLL_INTERVAL_MS", "20"),
        ],
        || {
            let result = run::run(Some("cli-run-sync".to_string()));
            assert_eq!(result.exit_code, 0, "expected successful sync: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "run");
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.contains("Started workflow with ID: cli-run-sync"));
            assert!(message.contains("Sync complete. Synced 2 products."));

            let history = history::run("cli-run-sync");
            assert_eq!(history.exit_code, 0);
            let message = parse_payload(&history.output)["message"].as_str().unwrap_or_default().to_string();
            assert!(message.contains("is completed"));
            assert!(message.contains("workflow_completed"));

            let rerun = run::run(Some("cli-run-sync".to_string()));
            assert_eq!(rerun.exit_code, 6, "closed ids are never re-executed");
            assert_eq!(parse_payload(&rerun.output)["error_class"], "conflict");
        },
    );
}

#[test]
fn run_reports_skipped_for_an_empty_sheet() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = database_url(dir.path());
    let sheet = write_sheet(dir.path(), r#"{"range": "Sheet1!A2:C", "majorDimension": "ROWS"}"#);
    with_env(
        &[
            ("SHELFSYNC_DATABASE_URL", database_url.as_str()),
            ("SHELFSYNC_SYNC_SHEET_PATH", sheet.as_str()),
            ("SHELFSYNC_WORKER_POLL_INTERVAL_MS", "20"),
        ],
        || {
            let result = run::run(None);
            assert_eq!(result.exit_code, 0, "expected skipped sync: {}", result.output);

            let message = parse_payload(&result.output)["message"].as_str().unwrap_or_default().to_string();
            assert!(message.contains("Started workflow with ID: sheets-to-shopify-demo-"));
            assert!(message.contains("Sync skipped: No data found."));
        },
    );
}

#[test]
fn start_cancel_resume_and_list_without_a_worker() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = database_url(dir.path());
    with_env(&[("SHELFSYNC_DATABASE_URL", database_url.as_str())], || {
        let started =
            start::run(StartArgs { workflow_id: Some("cli-pending".to_string()), wait: false });
        assert_eq!(started.exit_code, 0, "expected start to enqueue: {}", started.output);
        assert_eq!(
            parse_payload(&started.output)["message"],
            "Started workflow with ID: cli-pending"
        );

        let again =
            start::run(StartArgs { workflow_id: Some("cli-pending".to_string()), wait: false });
        assert_eq!(again.exit_code, 6);
        assert_eq!(parse_payload(&again.output)["error_class"], "conflict");

        let resumed = resume::run("cli-pending");
        assert_eq!(resumed.exit_code, 0, "{}", resumed.output);

        // No worker runs, so the request is recorded but the execution stays open.
        let canceled = cancel::run("cli-pending", "operator test");
        assert_eq!(canceled.exit_code, 0, "{}", canceled.output);
        let message = parse_payload(&canceled.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(message.contains("status: running"));

        let history = history::run("cli-pending");
        let message = parse_payload(&history.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(message.contains("workflow_started"));
        assert!(message.contains("cancel_requested reason=operator test"));

        let listed = list::run(Some("running"), 10);
        assert_eq!(listed.exit_code, 0, "{}", listed.output);
        let message = parse_payload(&listed.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(message.starts_with("1 executions:"));
        assert!(message.contains("cli-pending sheets_to_storefront running"));
    });
}

#[test]
fn unknown_ids_and_statuses_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = database_url(dir.path());
    with_env(&[("SHELFSYNC_DATABASE_URL", database_url.as_str())], || {
        let history = history::run("missing");
        assert_eq!(history.exit_code, 7);
        assert_eq!(parse_payload(&history.output)["error_class"], "not_found");

        let resumed = resume::run("missing");
        assert_eq!(resumed.exit_code, 7);

        let listed = list::run(Some("paused"), 10);
        assert_eq!(listed.exit_code, 2);
        assert_eq!(parse_payload(&listed.output)["error_class"], "invalid_argument");
    });
}

#[test]
fn config_attributes_sources_and_redacts_tokens() {
    with_env(
        &[
            ("SHELFSYNC_SYNC_STOREFRONT", "shopify"),
            ("SHELFSYNC_SYNC_STOREFRONT_BASE_URL", "https://shop.example.com"),
            ("SHELFSYNC_SYNC_STOREFRONT_ACCESS_TOKEN", "shpat_supersecret"),
        ],
        || {
            let output = config::run();
            assert!(output.starts_with("effective config"));
            assert!(output.contains(
                "- sync.storefront_access_token = shpat_*** (source: env (SHELFSYNC_SYNC_STOREFRONT_ACCESS_TOKEN))"
            ));
            assert!(output.contains("- sync.sheets_api_key = <unset> (source: default)"));
            assert!(output.contains("- worker.task_queue = sheets-to-shopify-queue (source: default)"));
            assert!(!output.contains("supersecret"));
        },
    );
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("shelfsync.db").display())
}

fn write_sheet(dir: &Path, contents: &str) -> String {
    let path = dir.join("sheet.json");
    fs::write(&path, contents).expect("write sheet");
    path.display().to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SHELFSYNC_DATABASE_URL",
        "SHELFSYNC_DATABASE_MAX_CONNECTIONS",
        "SHELFSYNC_DATABASE_TIMEOUT_SECS",
        "SHELFSYNC_WORKER_TASK_QUEUE",
        "SHELFSYNC_WORKER_IDENTITY",
        "SHELFSYNC_WORKER_MAX_CONCURRENT_TASKS",
        "SHELFSYNC_WORKER_QUEUE_LEASE_SECS",
        "SHELFSYNC_WORKER_HISTORY_LEASE_SECS",
        "SHELFSYNC_WORKER_POLL_INTERVAL_MS",
        "SHELFSYNC_SYNC_SOURCE",
        "SHELFSYNC_SYNC_SHEET_PATH",
        "SHELFSYNC_SYNC_SHEETS_BASE_URL",
        "SHELFSYNC_SYNC_SPREADSHEET_ID",
        "SPREADSHEET_ID",
        "SHELFSYNC_SYNC_SHEET_RANGE",
        "SHELFSYNC_SYNC_SHEETS_API_KEY",
        "SHELFSYNC_SYNC_STOREFRONT",
        "SHELFSYNC_SYNC_STOREFRONT_BASE_URL",
        "SHELFSYNC_SYNC_STOREFRONT_ACCESS_TOKEN",
        "SHELFSYNC_SYNC_STOREFRONT_API_VERSION",
        "SHELFSYNC_SYNC_MEMORY_LATENCY_MS",
        "SHELFSYNC_SYNC_OUTAGE_KEYWORD",
        "SHELFSYNC_SYNC_PUSH_RETRY_MAX_ATTEMPTS",
        "SHELFSYNC_SYNC_WORKFLOW_TIMEOUT_SECS",
        "SHELFSYNC_LOGGING_LEVEL",
        "SHELFSYNC_LOGGING_FORMAT",
        "SHELFSYNC_LOG_LEVEL",
        "SHELFSYNC_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
