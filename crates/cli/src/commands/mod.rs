pub mod cancel;
pub mod config;
pub mod history;
pub mod list;
pub mod migrate;
pub mod resume;
pub mod run;
pub mod start;
pub mod support;
pub mod worker;

use serde::Serialize;
use shelfsync_core::{ClientError, ErrorClass};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

/// `(error_class, message, exit_code)` carried out of a command's async block.
pub(crate) type CommandError = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub(crate) fn from_outcome(command: &str, outcome: Result<String, CommandError>) -> Self {
        match outcome {
            Ok(message) => Self::success(command, message),
            Err((error_class, message, exit_code)) => {
                Self::failure(command, error_class, message, exit_code)
            }
        }
    }
}

/// Exit code for each failure class a client call can surface.
pub fn exit_code_for(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::Conflict => 6,
        ErrorClass::NotFound => 7,
        ErrorClass::QueueUnavailable | ErrorClass::LogUnavailable => 8,
        ErrorClass::ActivityRetryableFailure
        | ErrorClass::ActivityTerminalFailure
        | ErrorClass::ActivityTimeout => 9,
        ErrorClass::DeterminismViolation => 10,
        ErrorClass::Canceled => 11,
        ErrorClass::TimedOut => 12,
        ErrorClass::InvalidPayload | ErrorClass::Configuration => 13,
    }
}

pub(crate) fn client_failure(error: ClientError) -> CommandError {
    let class = error.class();
    (class.as_str(), format!("{error} ({})", class.user_message()), exit_code_for(class))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
