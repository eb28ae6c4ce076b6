use serde::Serialize;
use treejar_cache::{RedisSharedCache, SharedCache};
use treejar_core::config::{AppConfig, LoadOptions, OAuthCredentials};

use crate::commands::{exit, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code =
        if report.overall_status == CheckStatus::Pass { exit::OK } else { exit::CHECKS_FAILED };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_redis_connectivity(&config));
            checks.push(check_oauth_credentials("zoho_crm_credentials", &config.zoho_crm.credentials));
            checks.push(check_oauth_credentials(
                "zoho_inventory_credentials",
                &config.zoho_inventory.credentials,
            ));
            checks.push(check_wazzup_credentials(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in [
                "redis_connectivity",
                "zoho_crm_credentials",
                "zoho_inventory_credentials",
                "wazzup_credentials",
            ] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    // Unconfigured providers are skipped, not failed; only hard failures fail the run.
    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_oauth_credentials(name: &'static str, credentials: &OAuthCredentials) -> DoctorCheck {
    if credentials.is_configured() {
        DoctorCheck {
            name,
            status: CheckStatus::Pass,
            details: "client id, client secret and refresh token present".to_string(),
        }
    } else {
        DoctorCheck {
            name,
            status: CheckStatus::Skipped,
            details: "no credentials configured; provider client disabled".to_string(),
        }
    }
}

fn check_wazzup_credentials(config: &AppConfig) -> DoctorCheck {
    if !config.wazzup.is_configured() {
        return DoctorCheck {
            name: "wazzup_credentials",
            status: CheckStatus::Skipped,
            details: "no api key configured; messaging client disabled".to_string(),
        };
    }

    let webhook = if config.wazzup.webhook_secret.is_some() {
        "webhook secret enforced"
    } else {
        "webhook secret not set; inbound webhooks are unauthenticated"
    };
    DoctorCheck {
        name: "wazzup_credentials",
        status: CheckStatus::Pass,
        details: format!("api key present; {webhook}"),
    }
}

fn check_redis_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "redis_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let cache = RedisSharedCache::connect(&config.redis.url, config.redis.key_prefix.clone())
            .await
            .map_err(|error| format!("failed to connect to redis: {error}"))?;
        cache.ping().await.map_err(|error| format!("redis ping failed: {error}"))
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "redis_connectivity",
            status: CheckStatus::Pass,
            details: format!("ping succeeded (key prefix `{}`)", config.redis.key_prefix),
        },
        Err(error) => {
            DoctorCheck { name: "redis_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
