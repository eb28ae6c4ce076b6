pub mod config;
pub mod doctor;
pub mod verify;

use serde::Serialize;
use serde_json::{json, Value};

/// Process exit codes. Scripts branch on these, so they never change meaning.
pub mod exit {
    pub const OK: u8 = 0;
    pub const CHECKS_FAILED: u8 = 1;
    pub const INVALID_INPUT: u8 = 2;
    pub const REDIS_UNAVAILABLE: u8 = 3;
    pub const PROVIDER_NOT_CONFIGURED: u8 = 4;
    pub const PROVIDER_CALL_FAILED: u8 = 5;
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Ok,
    Error,
}

/// One-line JSON envelope printed by machine-facing commands.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<&'a str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

impl CommandResult {
    /// Human-readable output that is not wrapped in the envelope.
    pub fn text(output: impl Into<String>) -> Self {
        Self { exit_code: exit::OK, output: output.into() }
    }

    /// A provider call went through; `result` is what the provider returned.
    pub fn success(command: &str, provider: &str, message: impl Into<String>, result: Value) -> Self {
        Envelope {
            command,
            status: Status::Ok,
            provider: Some(provider),
            error_class: None,
            message: message.into(),
            result: Some(result),
        }
        .into_result(exit::OK)
    }

    /// `error_class` matches the classes used in logs (`auth`, `rate_limited`, ...) so
    /// CLI failures and server logs can be correlated.
    pub fn failure(
        command: &str,
        provider: Option<&str>,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Envelope {
            command,
            status: Status::Error,
            provider,
            error_class: Some(error_class),
            message: message.into(),
            result: None,
        }
        .into_result(exit_code)
    }
}

impl Envelope<'_> {
    fn into_result(self, exit_code: u8) -> CommandResult {
        let output = serde_json::to_string(&self).unwrap_or_else(|error| {
            json!({
                "command": self.command,
                "status": "error",
                "error_class": "serialization",
                "message": error.to_string(),
            })
            .to_string()
        });
        CommandResult { exit_code, output }
    }
}
