//! `/system/functions` and `/system/function/{name}` (SPEC_FULL.md §6).
//! Backend-kind derivation from `labels["ctrType"]`/`labels["sandboxes"]`
//! follows `original_source/pkg/provider/handlers/deploy.go`'s `deploy()`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use fecore_types::{Error, Function, FunctionKind};

use crate::error::{ApiError, ApiResponse};
use crate::ApiState;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_SECRETS_PATH: &str = "/secrets";

#[derive(Deserialize)]
pub struct Limits {
    /// Bytes. The original parses a Kubernetes-style quantity string
    /// (e.g. `"50Mi"`); this crate takes a plain byte count instead, since
    /// no quantity-parsing crate is otherwise part of this stack.
    #[serde(default)]
    pub memory: Option<u64>,
}

#[derive(Deserialize)]
pub struct DeployRequest {
    pub service: String,
    pub image: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub annotations: Option<HashMap<String, String>>,
    #[serde(default)]
    pub secrets: Option<Vec<String>>,
    #[serde(default)]
    pub env_vars: Option<HashMap<String, String>>,
    #[serde(default)]
    pub env_process: Option<String>,
    #[serde(default)]
    pub limits: Option<Limits>,
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub function_name: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Serialize)]
pub struct FunctionStatus {
    pub name: String,
    pub namespace: String,
    pub image: String,
    /// Hard-coded to 99 to bypass an external scaler's gating — kept
    /// literally per SPEC_FULL.md §9 (no such scaler exists in this
    /// single-node crate, so the constant is inert here, not a lie told to
    /// anything real).
    pub available_replicas: u32,
    pub invocation_count: u64,
}

fn valid_namespace(ns: &str) -> bool {
    !ns.is_empty()
        && ns
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Mirrors `validateSecrets`/`getNamespaceSecretMountPath` in
/// `original_source/pkg/provider/handlers/deploy.go`: every declared secret
/// must exist as a file under `<secrets_path>/<namespace>/<secret>`.
fn validate_secrets(secrets_path: &str, namespace: &str, secrets: &[String]) -> Result<(), Error> {
    for secret in secrets {
        if secret.trim().is_empty() {
            return Err(Error::InvalidInput("empty secret name".to_string()));
        }
        let path = std::path::Path::new(secrets_path).join(namespace).join(secret);
        if !path.exists() {
            return Err(Error::InvalidInput(format!("unable to find secret: {secret}")));
        }
    }
    Ok(())
}

/// Derives `FunctionKind` from `labels["ctrType"]`/`labels["sandboxes"]`,
/// mirroring the original's `wasm`/`hybrid`/else-native branching.
fn derive_kind(labels: &HashMap<String, String>) -> Result<FunctionKind, Error> {
    match labels.get("ctrType").map(String::as_str) {
        Some("wasm") => Ok(FunctionKind::Wasm),
        Some("hybrid") => {
            let sandboxes = labels
                .get("sandboxes")
                .ok_or_else(|| Error::InvalidInput("sandboxes unspecified for hybrid".into()))?;
            let mut native = None;
            let mut wasm = None;
            for tok in sandboxes.split(',') {
                let tok = tok.trim();
                if tok.ends_with("-n") {
                    native = Some(tok.to_string());
                } else if tok.ends_with("-w") {
                    wasm = Some(tok.to_string());
                }
            }
            match (native, wasm) {
                (Some(native), Some(wasm)) => Ok(FunctionKind::Hybrid { native, wasm }),
                _ => Err(Error::InvalidInput(
                    "hybrid sandboxes must name one -n and one -w function".into(),
                )),
            }
        }
        _ => Ok(FunctionKind::Native),
    }
}

fn build_function(req: DeployRequest) -> Result<Function, Error> {
    let namespace = req.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    if !valid_namespace(&namespace) {
        return Err(Error::InvalidInput(format!("invalid namespace '{namespace}'")));
    }
    let secrets = req.secrets.unwrap_or_default();
    validate_secrets(DEFAULT_SECRETS_PATH, &namespace, &secrets)?;
    let labels = req.labels.unwrap_or_default();
    let kind = derive_kind(&labels)?;

    Ok(Function {
        name: req.service,
        namespace,
        image: req.image,
        image_files: Vec::new(),
        kind,
        labels,
        annotations: req.annotations.unwrap_or_default(),
        secrets,
        secrets_path: DEFAULT_SECRETS_PATH.to_string(),
        env_vars: req.env_vars.unwrap_or_default(),
        env_process: req.env_process,
        memory_limit: req.limits.and_then(|l| l.memory).unwrap_or(0),
        policy: Function::default_policy(),
    })
}

/// POST /system/functions
pub async fn deploy_function(
    State(state): State<ApiState>,
    Json(req): Json<DeployRequest>,
) -> impl IntoResponse {
    match build_function(req) {
        Ok(f) => match state.store.add_deployed_function(f).await {
            Ok(()) => (axum::http::StatusCode::CREATED, ApiResponse::ok("deployed")).into_response(),
            Err(e) => ApiError(e).into_response(),
        },
        Err(e) => ApiError(e).into_response(),
    }
}

/// PUT /system/functions — pre-pull (no-op here: no real image puller in
/// this crate's scope), destroy existing replicas, re-deploy.
pub async fn update_function(
    State(state): State<ApiState>,
    Json(req): Json<DeployRequest>,
) -> impl IntoResponse {
    let name = req.service.clone();
    let f = match build_function(req) {
        Ok(f) => f,
        Err(e) => return ApiError(e).into_response(),
    };

    if state.store.get_deployed_function(&name).await.is_ok() {
        for r in state.store.drain_idle_replicas(&name).await {
            state.factory.destroy(&r).await;
        }
        if let Err(e) = state.store.remove_deployed_function(&name).await {
            return ApiError(e).into_response();
        }
    }

    match state.store.add_deployed_function(f).await {
        Ok(()) => ApiResponse::ok("updated").into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// DELETE /system/functions — removes the function and destroys every
/// idle replica it owns (active replicas finish in place, per
/// `FunctionStore::drain_idle_replicas`).
pub async fn delete_function(
    State(state): State<ApiState>,
    Json(req): Json<DeleteRequest>,
) -> impl IntoResponse {
    for r in state.store.drain_idle_replicas(&req.function_name).await {
        state.factory.destroy(&r).await;
    }
    match state.store.remove_deployed_function(&req.function_name).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// GET /system/function/{name}
pub async fn function_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_deployed_function(&name).await {
        Ok(f) => {
            let stats = state.store.stats_snapshot(&name).await.unwrap_or_default();
            ApiResponse::ok(FunctionStatus {
                name: f.name,
                namespace: f.namespace,
                image: f.image,
                available_replicas: 99,
                invocation_count: stats.total_invocations,
            })
            .into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

/// GET /system/functions?namespace=
pub async fn list_functions(
    State(state): State<ApiState>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let functions = state
        .store
        .list_deployed_functions(q.namespace.as_deref())
        .await;
    ApiResponse::ok(functions).into_response()
}
