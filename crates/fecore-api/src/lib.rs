//! The HTTP surface (SPEC_FULL.md §6): deploy/update/delete/status/list,
//! invoke, metrics, policy, ipam, healthz. Grounded on the teacher's
//! `warpgrid-api` crate — an `ApiState` held by `Clone`, routes composed via
//! `Router::new().route(...).with_state(...)`, and a `handlers.rs` module
//! returning an `ApiResponse<T>` JSON envelope.

mod deploy;
mod error;
mod healthz;
mod invoke;
mod ipam;
mod metrics;
mod policy;

use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;

use fecore_policy::PolicyController;
use fecore_proxy::InvocationProxy;
use fecore_scheduler::{FunctionStore, ReplicaFactory, Resolver};

pub use error::ApiError;
pub use ipam::IpamIndex;

/// Shared handler state. Cheap to clone — every field is already an `Arc`.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<FunctionStore>,
    pub factory: Arc<ReplicaFactory>,
    pub resolver: Arc<Resolver>,
    pub proxy: Arc<InvocationProxy>,
    pub policy: Arc<PolicyController>,
    pub ipam: Arc<IpamIndex>,
}

/// Composes the full route table of SPEC_FULL.md §6.
///
/// | Method | Path | Handler |
/// |---|---|---|
/// | POST/PUT/DELETE | `/system/functions` | deploy / update / delete |
/// | GET | `/system/function/{name}` | status |
/// | GET | `/system/functions` | list |
/// | ANY | `/function/{name}` and `/function/{name}/{*params}` | invoke |
/// | GET | `/metrics` | ring-buffer JSON or HTML report, by `?action=` |
/// | GET | `/policy` | view or update, by `?action=` |
/// | GET | `/ipam` | CNI sidechannel |
/// | GET | `/healthz` | liveness |
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/system/functions",
            get(deploy::list_functions)
                .post(deploy::deploy_function)
                .put(deploy::update_function)
                .delete(deploy::delete_function),
        )
        .route("/system/function/{name}", get(deploy::function_status))
        .route("/function/{name}", any(invoke::invoke))
        .route("/function/{name}/{*params}", any(invoke::invoke))
        .route("/metrics", get(metrics::metrics))
        .route("/policy", get(policy::policy))
        .route("/ipam", get(ipam::ipam))
        .route("/healthz", get(healthz::healthz))
        .with_state(state)
}
