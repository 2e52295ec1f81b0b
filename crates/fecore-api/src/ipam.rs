//! `GET /ipam?action=...` (SPEC_FULL.md §6) — the CNI sidechannel, grounded
//! on `original_source/pkg/provider/handlers/ipam.go`'s `MakeIPAMHandler`.
//! `FindByKey`/`FindByID` and `ReleaseByKey`/`ReleaseByID` are literal
//! aliases of the same lookup/release in the original — kept as aliases
//! here rather than two code paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tokio::sync::Mutex;

use crate::ApiState;

/// In-memory `container id -> ip` reservation table, plus an independent
/// monotonically-incrementing counter for `LastReservedIP` — the original
/// keeps these as two unrelated pieces of state, not one derived from the
/// other.
pub struct IpamIndex {
    reservations: Mutex<HashMap<String, String>>,
    next_ip_octet: AtomicU32,
}

impl Default for IpamIndex {
    fn default() -> Self {
        Self {
            reservations: Mutex::new(HashMap::new()),
            next_ip_octet: AtomicU32::new(2),
        }
    }
}

impl IpamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn reserve(&self, id: &str, ip: &str) -> bool {
        let mut r = self.reservations.lock().await;
        if r.contains_key(id) {
            return false;
        }
        r.insert(id.to_string(), ip.to_string());
        true
    }

    fn last_reserved_ip(&self) -> String {
        let octet = self.next_ip_octet.fetch_add(1, Ordering::SeqCst);
        format!("10.63.100.{octet}")
    }

    async fn find_by(&self, id: &str) -> bool {
        self.reservations.lock().await.contains_key(id)
    }

    async fn release_by(&self, id: &str) -> bool {
        self.reservations.lock().await.remove(id).is_some()
    }

    async fn get_by(&self, id: &str) -> String {
        self.reservations
            .lock()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

pub async fn ipam(State(state): State<ApiState>, headers: HeaderMap) -> impl IntoResponse {
    let action = header(&headers, "action");
    let id = header(&headers, "id");
    let ip = header(&headers, "ip");

    let body = match action {
        "Reserve" => state.ipam.reserve(id, ip).await.to_string(),
        "LastReservedIP" => state.ipam.last_reserved_ip(),
        "FindByKey" | "FindByID" => state.ipam.find_by(id).await.to_string(),
        "ReleaseByKey" | "ReleaseByID" => state.ipam.release_by(id).await.to_string(),
        "GetByID" => state.ipam.get_by(id).await,
        other => {
            return (StatusCode::BAD_REQUEST, format!("unknown ipam action '{other}'")).into_response()
        }
    };
    ([("content-type", "text/plain")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_is_idempotent_false_on_second_call() {
        let idx = IpamIndex::new();
        assert!(idx.reserve("c1", "10.63.100.5").await);
        assert!(!idx.reserve("c1", "10.63.100.6").await);
        assert_eq!(idx.get_by("c1").await, "10.63.100.5");
    }

    #[tokio::test]
    async fn find_by_key_and_find_by_id_are_aliases() {
        let idx = IpamIndex::new();
        assert!(!idx.find_by("c1").await);
        idx.reserve("c1", "10.63.100.5").await;
        assert!(idx.find_by("c1").await);
    }

    #[tokio::test]
    async fn release_by_removes_reservation() {
        let idx = IpamIndex::new();
        idx.reserve("c1", "10.63.100.5").await;
        assert!(idx.release_by("c1").await);
        assert!(!idx.release_by("c1").await);
        assert_eq!(idx.get_by("c1").await, "");
    }

    #[test]
    fn last_reserved_ip_increments() {
        let idx = IpamIndex::new();
        let a = idx.last_reserved_ip();
        let b = idx.last_reserved_ip();
        assert_ne!(a, b);
    }
}
