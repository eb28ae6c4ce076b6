use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use treejar_cli::commands::verify::{self, VerifyArgs, VerifyTarget};
use treejar_cli::commands::{config, doctor, CommandResult};

// Nothing listens on port 1, so connection attempts fail fast.
const UNREACHABLE_REDIS: &str = "redis://127.0.0.1:1/0";

#[test]
fn doctor_reports_config_failure_and_skips_dependent_checks() {
    with_env(&[("TREEJAR_REDIS_URL", "http://not-redis")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[0]["details"].as_str().unwrap_or_default().contains("redis.url"));
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_flags_unreachable_redis_and_skips_unconfigured_providers() {
    with_env(
        &[("TREEJAR_REDIS_URL", UNREACHABLE_REDIS), ("TREEJAR_WAZZUP_API_KEY", "wz-key")],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 1);

            let report = parse_payload(&result.output);
            let status_of = |name: &str| {
                report["checks"]
                    .as_array()
                    .and_then(|checks| checks.iter().find(|check| check["name"] == name))
                    .map(|check| check["status"].clone())
                    .unwrap_or(Value::Null)
            };
            assert_eq!(status_of("config_validation"), "pass");
            assert_eq!(status_of("redis_connectivity"), "fail");
            assert_eq!(status_of("zoho_crm_credentials"), "skipped");
            assert_eq!(status_of("zoho_inventory_credentials"), "skipped");
            assert_eq!(status_of("wazzup_credentials"), "pass");
        },
    );
}

#[test]
fn doctor_human_output_lists_every_check() {
    with_env(&[("TREEJAR_REDIS_URL", UNREACHABLE_REDIS)], || {
        let result = doctor::run(false);

        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] redis_connectivity"));
        assert!(result.output.contains("- [skip] zoho_crm_credentials"));
    });
}

#[test]
fn config_output_redacts_secrets_and_attributes_sources() {
    with_env(
        &[
            ("TREEJAR_ZOHO_CRM_CLIENT_ID", "1000.client"),
            ("TREEJAR_ZOHO_CRM_CLIENT_SECRET", "1000.super-secret-value"),
            ("TREEJAR_ZOHO_CRM_REFRESH_TOKEN", "1000.refresh-value"),
            ("TREEJAR_WAZZUP_API_KEY", "wazzup-live-key"),
        ],
        || {
            let output = config::run();

            assert!(output.contains(
                "- zoho_crm.client_secret = 1000.*** (source: env (TREEJAR_ZOHO_CRM_CLIENT_SECRET))"
            ));
            assert!(output
                .contains("- wazzup.api_key = <redacted> (source: env (TREEJAR_WAZZUP_API_KEY))"));
            assert!(output.contains("- redis.key_prefix = treejar (source: default)"));
            assert!(!output.contains("super-secret-value"));
            assert!(!output.contains("wazzup-live-key"));
        },
    );
}

#[test]
fn verify_fails_when_provider_is_not_configured() {
    with_env(&[], || {
        let result = verify::run(VerifyArgs {
            target: VerifyTarget::Inventory,
            phone: None,
            chat_id: None,
            text: "ping".to_string(),
        });
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "verify");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "provider_not_configured");
        assert_eq!(payload["provider"], "zoho_inventory");
        assert_eq!(payload["message"], "zoho_inventory credentials are not configured");
        assert!(payload.get("result").is_none());
    });
}

#[test]
fn verify_requires_chat_id_for_wazzup() {
    with_env(&[("TREEJAR_WAZZUP_API_KEY", "wz-key")], || {
        let result = verify::run(VerifyArgs {
            target: VerifyTarget::Wazzup,
            phone: None,
            chat_id: None,
            text: "ping".to_string(),
        });
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_arguments");
        assert_eq!(payload["message"], "verify wazzup requires --chat-id");
    });
}

#[test]
fn verify_reports_unreachable_redis() {
    with_env(
        &[("TREEJAR_REDIS_URL", UNREACHABLE_REDIS), ("TREEJAR_WAZZUP_API_KEY", "wz-key")],
        || {
            let result = verify::run(VerifyArgs {
                target: VerifyTarget::Wazzup,
                phone: None,
                chat_id: Some("79990000000".to_string()),
                text: "ping".to_string(),
            });
            assert_eq!(result.exit_code, 3);
            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["provider"], "wazzup");
            assert_eq!(payload["error_class"], "redis_unavailable");
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "REDIS_URL",
        "TREEJAR_REDIS_URL",
        "TREEJAR_REDIS_KEY_PREFIX",
        "TREEJAR_SERVER_BIND_ADDRESS",
        "TREEJAR_SERVER_PORT",
        "TREEJAR_ZOHO_CRM_CLIENT_ID",
        "TREEJAR_ZOHO_CRM_CLIENT_SECRET",
        "TREEJAR_ZOHO_CRM_REFRESH_TOKEN",
        "TREEJAR_ZOHO_INVENTORY_CLIENT_ID",
        "TREEJAR_ZOHO_INVENTORY_CLIENT_SECRET",
        "TREEJAR_ZOHO_INVENTORY_REFRESH_TOKEN",
        "TREEJAR_ZOHO_INVENTORY_ORGANIZATION_ID",
        "TREEJAR_WAZZUP_API_KEY",
        "TREEJAR_WAZZUP_WEBHOOK_SECRET",
        "TREEJAR_WAZZUP_CHANNEL_ID",
        "TREEJAR_LOGGING_LEVEL",
        "TREEJAR_LOGGING_FORMAT",
        "TREEJAR_LOG_LEVEL",
        "TREEJAR_LOG_FORMAT",
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

#[test]
fn success_envelope_carries_provider_result() {
    let result = CommandResult::success(
        "verify",
        "zoho_inventory",
        "zoho_inventory call succeeded",
        serde_json::json!({ "page": 1, "items": [] }),
    );
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["provider"], "zoho_inventory");
    assert_eq!(payload["result"]["page"], 1);
    assert!(payload.get("error_class").is_none());
}
