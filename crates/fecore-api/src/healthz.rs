//! `GET /healthz` — liveness probe (SPEC_FULL.md §10.4). No teacher
//! counterpart; a narrow ambient addition.

use axum::http::StatusCode;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
