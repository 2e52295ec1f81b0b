//! `GET /metrics?action=metrics|stats&fname=` (SPEC_FULL.md §6), grounded on
//! `original_source/pkg/provider/handlers/metrics.go`'s `MakeMetricsHandler`.
//! The HTML report covers the stats/policy tables only — the original's
//! per-replica idle/active listing needs no counterpart in the core
//! scheduler's own API surface, so it is dropped here (see DESIGN.md).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use serde::Deserialize;

use crate::error::ApiError;
use crate::ApiState;

#[derive(Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    action: String,
    #[serde(default)]
    fname: String,
}

pub async fn metrics(State(state): State<ApiState>, Query(q): Query<MetricsQuery>) -> impl IntoResponse {
    match q.action.as_str() {
        "metrics" => match state.store.stats_snapshot(&q.fname).await {
            Ok(stats) => axum::Json(stats.entries).into_response(),
            Err(e) => ApiError(e).into_response(),
        },
        "stats" => match state.store.stats_snapshot(&q.fname).await {
            Ok(stats) => {
                let policy = state.store.get_policy(&q.fname).await.unwrap_or(
                    fecore_types::Function::default_policy(),
                );
                Html(render_report(&q.fname, &stats, &policy)).into_response()
            }
            Err(e) => ApiError(e).into_response(),
        },
        other => (
            StatusCode::BAD_REQUEST,
            format!("unknown action '{other}', expected 'metrics' or 'stats'"),
        )
            .into_response(),
    }
}

fn render_report(fname: &str, stats: &fecore_types::FunctionStats, policy: &fecore_types::Policy) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{fname}</title></head><body>\
<h1>{fname}</h1><hr><h2>Stats</h2>\
<table border=0 class=\"stats\">\
<tr><td>Num Stats:</td><td>{entry_pos}</td></tr>\
<tr><td>Avg. Exec Time:</td><td>{avg_exec}</td></tr>\
<tr><td>Avg. Startup Time:</td><td>{avg_startup}</td></tr>\
<tr><td>Avg. Service Time:</td><td>{avg_svc}</td></tr>\
<tr><td>P50 Service Time:</td><td>{p50}</td></tr>\
<tr><td>P99 Service Time:</td><td>{p99}</td></tr>\
<tr><td>Total Invocations:</td><td>{total_invocations}</td></tr>\
<tr><td>Sandbox Utilization:</td><td>{sandbox_util:.2}</td></tr>\
<tr><td>Avg. Svc. Cold:</td><td>{avg_svc_cold}</td></tr>\
<tr><td>Avg. Svc. Warm:</td><td>{avg_svc_warm}</td></tr>\
</table><hr><h2>Policy</h2>\
<table border=0 class=\"stats\">\
<tr><td>Cold Start Sandbox:</td><td>{cold_kind}</td></tr>\
<tr><td>Warm Start Sandbox:</td><td>{warm_kind}</td></tr>\
<tr><td>Spawn Addl Sandbox:</td><td>{spawn_extra}</td></tr>\
</table></body></html>",
        entry_pos = stats.entry_pos,
        avg_exec = stats.avg_exec_time,
        avg_startup = stats.avg_startup_time,
        avg_svc = stats.avg_svc_time,
        p50 = stats.p50_svc_time,
        p99 = stats.p99_svc_time,
        total_invocations = stats.total_invocations,
        sandbox_util = stats.sandbox_util,
        avg_svc_cold = stats.avg_svc_cold,
        avg_svc_warm = stats.avg_svc_warm,
        cold_kind = policy.cold_start_kind,
        warm_kind = policy.warm_start_kind,
        spawn_extra = policy.spawn_extra,
    )
}
