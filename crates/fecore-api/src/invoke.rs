//! `ANY /function/{name}[/{params}]` (SPEC_FULL.md §6). Only the wildcard
//! tail is forwarded as the upstream path, matching the original's
//! `buildProxyRequest(originalReq, functionAddr, pathVars["params"])`.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use fecore_proxy::ProxyRequest;

use crate::error::ApiError;
use crate::ApiState;

/// Splits `/function/{name}/{params...}` into the function name and the
/// wildcard tail, the only part the original forwards upstream.
fn split_function_path(path: &str) -> (&str, &str) {
    let rest = path.strip_prefix("/function/").unwrap_or("");
    match rest.split_once('/') {
        Some((name, params)) => (name, params),
        None => (rest, ""),
    }
}

pub async fn invoke(State(state): State<ApiState>, req: Request) -> impl IntoResponse {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();

    let (name, params) = split_function_path(uri.path());
    if name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Provide function name in the request path",
        )
            .into_response();
    }
    let path_and_query = match uri.query() {
        Some(q) => format!("/{params}?{q}"),
        None => format!("/{params}"),
    };

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let proxy_req = ProxyRequest {
        method,
        path_and_query,
        headers,
        body,
    };

    match state.proxy.invoke(name, proxy_req).await {
        Ok(resp) => {
            let mut builder = Response::builder().status(resp.status);
            for (name, value) in resp.headers.iter() {
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from(resp.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => ApiError(e).into_response(),
    }
}
