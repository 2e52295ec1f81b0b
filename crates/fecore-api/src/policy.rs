//! `GET /policy?action=view|update&fname=...` (SPEC_FULL.md §6) — a view of
//! the live per-function `Policy` and a hand-rolled update of its knobs,
//! grounded on the teacher's own policy-controller split between read-only
//! inspection and mutation (`fecore_policy::PolicyController` evaluates the
//! policy; this handler only edits it).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use fecore_types::{BackendKind, Error, MAX_EXTRA, MAX_KEEPALIVE_TIME};

use crate::error::{ApiError, ApiResponse};
use crate::ApiState;

#[derive(Deserialize)]
pub struct PolicyQuery {
    #[serde(default)]
    action: String,
    #[serde(default)]
    fname: String,
    #[serde(default)]
    cold_start_ctr_type: Option<String>,
    #[serde(default)]
    warm_start_ctr_type: Option<String>,
    #[serde(default)]
    spawn_addl_ctrs: Option<u32>,
    #[serde(default)]
    keepalive_cold_start_ctr: Option<u32>,
}

fn parse_kind(s: &str) -> Result<BackendKind, Error> {
    match s {
        "native" => Ok(BackendKind::Native),
        "wasm" => Ok(BackendKind::Wasm),
        other => Err(Error::InvalidInput(format!("unknown sandbox kind '{other}'"))),
    }
}

pub async fn policy(State(state): State<ApiState>, Query(q): Query<PolicyQuery>) -> impl IntoResponse {
    match q.action.as_str() {
        "view" => match state.store.get_policy(&q.fname).await {
            Ok(p) => ApiResponse::ok(p).into_response(),
            Err(e) => ApiError(e).into_response(),
        },
        "update" => match apply_update(&state, &q).await {
            Ok(p) => ApiResponse::ok(p).into_response(),
            Err(e) => ApiError(e).into_response(),
        },
        other => (
            StatusCode::BAD_REQUEST,
            format!("unknown action '{other}', expected 'view' or 'update'"),
        )
            .into_response(),
    }
}

async fn apply_update(
    state: &ApiState,
    q: &PolicyQuery,
) -> Result<fecore_types::Policy, Error> {
    if let Some(n) = q.spawn_addl_ctrs {
        if n >= MAX_EXTRA {
            return Err(Error::InvalidInput(format!(
                "spawnAddlCtrs must be < {MAX_EXTRA}"
            )));
        }
    }
    if let Some(t) = q.keepalive_cold_start_ctr {
        if t >= MAX_KEEPALIVE_TIME {
            return Err(Error::InvalidInput(format!(
                "keepaliveColdStartCtr must be < {MAX_KEEPALIVE_TIME}"
            )));
        }
    }
    let cold = q.cold_start_ctr_type.as_deref().map(parse_kind).transpose()?;
    let warm = q.warm_start_ctr_type.as_deref().map(parse_kind).transpose()?;

    state
        .store
        .with_policy_mut(&q.fname, |p| {
            if let Some(cold) = cold {
                p.cold_start_kind = cold;
            }
            if let Some(warm) = warm {
                p.warm_start_kind = warm;
            }
            if let Some(n) = q.spawn_addl_ctrs {
                p.spawn_extra = n;
            }
            if let Some(t) = q.keepalive_cold_start_ctr {
                p.keep_cold_starter = t;
            }
            *p
        })
        .await
}
