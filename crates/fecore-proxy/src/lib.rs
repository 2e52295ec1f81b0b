//! Forwards an invocation to the resolved replica and records its timings
//! (SPEC_FULL.md §4.7). The raw hyper client-connection pattern is grounded
//! on the teacher's own HTTP probe in its health checker; request/response
//! bodies are buffered rather than streamed end-to-end, a simplification
//! noted in DESIGN.md.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

use fecore_scheduler::{FunctionStore, Resolver};
use fecore_stats::StatsAggregator;
use fecore_types::{BackendKind, Error, FunctionKind, StartupType};

const RETRY_BACKOFF: Duration = Duration::from_millis(5);
const MAX_RETRIES: u32 = 632;
/// The port every sandbox's HTTP server listens on.
const REPLICA_PORT: u16 = 8080;

pub struct ProxyRequest {
    pub method: Method,
    /// Path plus query string, e.g. `/my/subpath?x=1`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct InvocationProxy {
    store: Arc<FunctionStore>,
    resolver: Arc<Resolver>,
    stats: StatsAggregator,
}

impl InvocationProxy {
    pub fn new(store: Arc<FunctionStore>, resolver: Arc<Resolver>, stats: StatsAggregator) -> Self {
        InvocationProxy {
            store,
            resolver,
            stats,
        }
    }

    pub async fn invoke(&self, fname: &str, req: ProxyRequest) -> Result<ProxyResponse, Error> {
        let request_id = format!("{fname}_{}", Uuid::new_v4().simple());

        let requested_startup = req
            .headers
            .get("startupType")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| match s {
                "cold" => Some(StartupType::Cold),
                "warm" => Some(StartupType::Warm),
                _ => None,
            });
        let requested_backend = req
            .headers
            .get("containerType")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| match s {
                "native" => Some(BackendKind::Native),
                "wasm" => Some(BackendKind::Wasm),
                _ => None,
            });

        let f = self.store.get_deployed_function(fname).await?;
        let is_hybrid = matches!(f.kind, FunctionKind::Hybrid { .. });

        let resolve_start = Instant::now();
        let resolved = self
            .resolver
            .resolve(fname, requested_startup, requested_backend)
            .await?;
        let startup_ms = resolve_start.elapsed().as_millis() as i64;

        let exec_start = Instant::now();
        let forward_result = forward_once_with_retry(
            &resolved.replica.ip,
            REPLICA_PORT,
            &req.method,
            &req.path_and_query,
            &req.headers,
            req.body.clone(),
        )
        .await;
        let exec_ms = exec_start.elapsed().as_millis() as i64;

        let outcome = match forward_result {
            Ok(mut resp) => {
                resp.headers.insert(
                    "Request-ID",
                    HeaderValue::from_str(&request_id).unwrap_or_else(|_| HeaderValue::from_static("-")),
                );
                resp.headers.insert(
                    "Startup-Type",
                    HeaderValue::from_static(match resolved.startup_type {
                        StartupType::Cold => "cold",
                        StartupType::Warm => "warm",
                    }),
                );
                resp.headers.insert(
                    "Container-Type",
                    HeaderValue::from_static(resolved.backend_kind.as_str()),
                );
                resp.headers.insert(
                    "Setup-Time",
                    HeaderValue::from_str(&startup_ms.to_string())
                        .unwrap_or_else(|_| HeaderValue::from_static("0")),
                );
                resp.headers.insert(
                    "Container-Name",
                    HeaderValue::from_str(&resolved.replica.uuid)
                        .unwrap_or_else(|_| HeaderValue::from_static("-")),
                );
                Ok(resp)
            }
            Err(e) => {
                warn!(function = %fname, replica = %resolved.replica.uuid, error = %e, "invocation upstream unreachable");
                Err(e)
            }
        };

        self.stats.submit(
            fname,
            &resolved.served_by,
            resolved.backend_kind,
            startup_ms,
            exec_ms,
            resolved.startup_type,
            is_hybrid,
        );

        if let Err(e) = self
            .store
            .return_replica_to_idle(&resolved.served_by, &resolved.replica.uuid)
            .await
        {
            warn!(replica = %resolved.replica.uuid, error = %e, "failed to return replica to idle pool");
        }

        outcome
    }
}

async fn forward_once_with_retry(
    replica_ip: &str,
    port: u16,
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<ProxyResponse, Error> {
    let address = format!("{replica_ip}:{port}");
    for attempt in 0..=MAX_RETRIES {
        match try_forward(&address, method, path_and_query, headers, body.clone()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if attempt == MAX_RETRIES {
                    return Err(Error::UpstreamUnreachable(e));
                }
                debug!(%address, attempt, error = %e, "retrying upstream connection");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
    unreachable!("loop always returns by the last iteration")
}

async fn try_forward(
    address: &str,
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<ProxyResponse, String> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| e.to_string())?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| e.to_string())?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = http::Request::builder().method(method.clone()).uri(path_and_query);
    {
        let req_headers = builder.headers_mut().expect("builder not yet built");
        for (name, value) in headers.iter() {
            req_headers.insert(name, value.clone());
        }
        if !req_headers.contains_key("x-forwarded-host") {
            if let Some(host) = headers.get(http::header::HOST) {
                req_headers.insert("x-forwarded-host", host.clone());
            }
        }
        if !req_headers.contains_key("x-forwarded-for") {
            req_headers.insert(
                "x-forwarded-for",
                HeaderValue::from_str(address).unwrap_or_else(|_| HeaderValue::from_static("-")),
            );
        }
    }
    let request = builder
        .body(Full::new(body))
        .map_err(|e| e.to_string())?;

    let resp = sender.send_request(request).await.map_err(|e| e.to_string())?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let collected = resp.into_body().collect().await.map_err(|e| e.to_string())?;
    Ok(ProxyResponse {
        status,
        headers,
        body: collected.to_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fecore_pool::{CapacityGuard, NetNsPool};
    use fecore_policy::PolicyController;
    use fecore_scheduler::{NativeDriver, ReplicaFactory, SpawnedContainer, WasmDriver};
    use fecore_state::StateStore;
    use fecore_types::Function;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct NoopNative;
    #[async_trait]
    impl NativeDriver for NoopNative {
        async fn create_container(&self, _name: &str, _f: &Function) -> Result<SpawnedContainer, Error> {
            Ok(SpawnedContainer {
                pid: 1,
                ip: "127.0.0.1".to_string(),
            })
        }
        async fn remove_container(&self, _name: &str, _pid: u32) -> Result<(), Error> {
            Ok(())
        }
    }
    struct NoopWasm;
    #[async_trait]
    impl WasmDriver for NoopWasm {
        async fn spawn(&self, _name: &str, _f: &Function, _ns_num: u32, _ip: &str) -> Result<u32, Error> {
            Ok(2)
        }
        async fn kill(&self, _pid: u32) -> Result<(), Error> {
            Ok(())
        }
    }

    fn make_function(name: &str) -> Function {
        Function {
            name: name.to_string(),
            namespace: "default".to_string(),
            image: "test/echo:1".to_string(),
            image_files: vec![],
            kind: FunctionKind::Native,
            labels: HashMap::new(),
            annotations: HashMap::new(),
            secrets: vec![],
            secrets_path: "/secrets".to_string(),
            env_vars: HashMap::new(),
            env_process: None,
            memory_limit: 0,
            policy: Function::default_policy(),
        }
    }

    /// A minimal echo server standing in for a sandboxed function's HTTP port.
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let body = b"ok";
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(resp.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn try_forward_relays_status_and_body() {
        let addr = spawn_echo_server().await;
        let resp = try_forward(&addr.to_string(), &Method::GET, "/", &HeaderMap::new(), Bytes::new())
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"ok");
    }

    /// Binds the echo server to the fixed port every replica is dialed on,
    /// so `invoke()` can be exercised end to end without stubbing the dial.
    async fn spawn_echo_server_on_replica_port() {
        let listener = TcpListener::bind(("127.0.0.1", REPLICA_PORT)).await.unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let body = b"ok";
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(resp.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                });
            }
        });
    }

    #[tokio::test]
    async fn invoke_end_to_end_sets_response_headers_and_returns_replica_to_idle() {
        spawn_echo_server_on_replica_port().await;

        let store = Arc::new(FunctionStore::new(
            StateStore::open_in_memory().unwrap(),
            CapacityGuard::new(4, 4),
            NetNsPool::new(4),
        ));
        store.add_deployed_function(make_function("echo")).await.unwrap();
        let factory = Arc::new(ReplicaFactory::new(
            store.clone(),
            Arc::new(NoopNative),
            Arc::new(NoopWasm),
        ));
        let resolver = Arc::new(Resolver::new(store.clone(), factory.clone()));
        let policy = Arc::new(PolicyController::new(store.clone()));
        let stats = StatsAggregator::spawn(store.clone(), policy, 100);
        let proxy = InvocationProxy::new(store.clone(), resolver, stats);

        let replica = fecore_types::Replica {
            uuid: "echo_test_n".to_string(),
            fname: "echo".to_string(),
            backend: BackendKind::Native,
            pid: 1,
            ip: "127.0.0.1".to_string(),
            netns: None,
            last_access: 0,
        };
        store.add_idle_replica("echo", replica).await;

        let req = ProxyRequest {
            method: Method::GET,
            path_and_query: "/".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        let resp = proxy.invoke("echo", req).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"ok");
        assert_eq!(resp.headers.get("Startup-Type").unwrap(), "warm");
        assert_eq!(resp.headers.get("Container-Type").unwrap(), "native");
        assert_eq!(resp.headers.get("Container-Name").unwrap(), "echo_test_n");
        assert!(resp.headers.contains_key("Request-ID"));
        assert!(resp.headers.contains_key("Setup-Time"));

        // The replica was idle (warm reuse), invoked, and handed back.
        assert_eq!(store.pop_idle_replica("echo").await.unwrap().uuid, "echo_test_n");
    }

    #[test]
    fn retry_budget_is_about_ten_seconds() {
        let total = RETRY_BACKOFF.as_millis() as u64 * MAX_RETRIES as u64;
        assert!((9000..=11000).contains(&total));
    }
}
