use std::time::{Duration, Instant};

use futures::SinkExt;
use serde::Serialize;
use steamguard_core::config::{AppConfig, LoadOptions};
use steamguard_dashboard::{LinkTransport, WebSocketTransport};

use super::{escape_json, CommandResult};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const READINESS_FAILURE: u8 = 3;

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

pub fn run(options: &LoadOptions, json_output: bool) -> CommandResult {
    let transport = WebSocketTransport::new().with_handshake_timeout(PROBE_TIMEOUT);
    run_with_transport(options, json_output, &transport)
}

/// Same as [`run`], probing through the given transport.
pub fn run_with_transport(
    options: &LoadOptions,
    json_output: bool,
    transport: &dyn LinkTransport,
) -> CommandResult {
    let report = build_report(options, transport);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { READINESS_FAILURE };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::output(exit_code, output);
    }

    CommandResult::output(exit_code, render_human(&report))
}

fn build_report(options: &LoadOptions, transport: &dyn LinkTransport) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(probe_dashboard(&config.dashboard.url, transport));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "dashboard_handshake",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// One handshake against the collector. Nothing is registered or sent.
fn probe_dashboard(url: &str, transport: &dyn LinkTransport) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "dashboard_handshake",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let started = Instant::now();
    let result = runtime.block_on(async {
        let mut channel = transport.connect(url).await?;
        // The collector may already be gone again; the handshake is what counts.
        let _ = channel.outbound.close().await;
        Ok::<(), steamguard_dashboard::TransportError>(())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "dashboard_handshake",
            status: CheckStatus::Pass,
            details: format!("handshake with `{url}` completed in {}ms", started.elapsed().as_millis()),
        },
        Err(error) => DoctorCheck {
            name: "dashboard_handshake",
            status: CheckStatus::Fail,
            details: format!("`{url}`: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

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
