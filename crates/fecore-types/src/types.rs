use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The two physical sandbox backends a replica can run under.
///
/// A `Function` itself is `Native`, `Wasm`, or `Hybrid{native, wasm}` (see
/// [`Function::kind`]) — only a concrete `Replica` or a `Policy` slot is ever
/// just one of these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Native,
    Wasm,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Wasm => "wasm",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an invocation was served by a freshly created replica or a reused one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupType {
    Cold,
    Warm,
}

impl std::fmt::Display for StartupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupType::Cold => f.write_str("cold"),
            StartupType::Warm => f.write_str("warm"),
        }
    }
}

/// A tagged variant replacing the source's two-functions-behind-one-hybrid
/// pointer shape (see SPEC_FULL.md §9, "Two Functions backing one hybrid").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FunctionKind {
    Native,
    Wasm,
    Hybrid { native: String, wasm: String },
}

/// A deployed function: identity, backend selection, and the mutable Policy
/// a hybrid function is steered by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub image_files: Vec<String>,
    pub kind: FunctionKind,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<String>,
    pub secrets_path: String,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub env_process: Option<String>,
    /// Bytes; 0 = unlimited. The parsed value, honored as-is — see
    /// SPEC_FULL.md §9 on the source's memory-limit override bug.
    #[serde(default)]
    pub memory_limit: u64,
    pub policy: Policy,
}

impl Function {
    /// Seed a fresh Policy at deploy time per SPEC_FULL.md §3.
    pub fn default_policy() -> Policy {
        Policy {
            cold_start_kind: BackendKind::Wasm,
            warm_start_kind: BackendKind::Native,
            spawn_extra: 1,
            keep_cold_starter: 0,
        }
    }
}

pub const MAX_EXTRA: u32 = 10;
pub const MAX_KEEPALIVE_TIME: u32 = 3600;

/// Per-function hybrid steering state. Meaningful only when the owning
/// function's kind is `Hybrid`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Policy {
    pub cold_start_kind: BackendKind,
    pub warm_start_kind: BackendKind,
    pub spawn_extra: u32,
    pub keep_cold_starter: u32,
}

/// One live sandbox. Holds only `fname` — never a back-pointer to `Function`
/// (SPEC_FULL.md §9, "Cyclic reference between Function and FunctionStore").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    pub uuid: String,
    pub fname: String,
    pub backend: BackendKind,
    pub pid: u32,
    pub ip: String,
    pub netns: Option<u32>,
    /// Milliseconds since the Unix epoch.
    pub last_access: u64,
}

impl Replica {
    pub fn touch(&mut self, now_ms: u64) {
        self.last_access = now_ms;
    }
}

/// One entry in a FunctionStats ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStat {
    pub fname: String,
    pub ctr_type: BackendKind,
    pub startup_ms: i64,
    pub exec_ms: i64,
    pub startup_type: StartupType,
}

/// Rolling statistics for one function: a 100-entry ring buffer plus the
/// derived metrics recomputed on each insert (SPEC_FULL.md §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStats {
    pub entries: Vec<Option<FunctionStat>>,
    pub entry_pos: usize,
    pub cold_pos: usize,
    pub warm_pos: usize,
    pub cold_starts: u32,
    pub warm_starts: u32,
    pub curr_rps: u32,
    pub last_rps: u32,
    pub curr_invocations: u32,
    pub active_count: u32,
    pub idle_count: u32,
    pub total_invocations: u64,
    pub total_exec_time: i64,
    pub total_startup_time: i64,
    pub total_svc_time: i64,
    pub total_svc_cold: i64,
    pub total_svc_warm: i64,
    pub avg_exec_time: i64,
    pub avg_startup_time: i64,
    pub p99_svc_time: i64,
    pub p50_svc_time: i64,
    pub avg_svc_time: i64,
    pub avg_svc_cold: i64,
    pub avg_svc_warm: i64,
    pub sandbox_util: f32,
    pub cold_ratio: f32,
    pub warm_ratio: f32,
    pub exec_times: Vec<i64>,
    pub startup_times: Vec<i64>,
    pub service_times: Vec<i64>,
}

pub const STATS_WINDOW: usize = 100;

impl Default for FunctionStats {
    fn default() -> Self {
        FunctionStats {
            entries: vec![None; STATS_WINDOW],
            entry_pos: 0,
            cold_pos: 0,
            warm_pos: 0,
            cold_starts: 0,
            warm_starts: 0,
            curr_rps: 0,
            last_rps: 0,
            curr_invocations: 0,
            active_count: 0,
            idle_count: 0,
            total_invocations: 0,
            total_exec_time: 0,
            total_startup_time: 0,
            total_svc_time: 0,
            total_svc_cold: 0,
            total_svc_warm: 0,
            avg_exec_time: 0,
            avg_startup_time: 0,
            p99_svc_time: 0,
            p50_svc_time: 0,
            avg_svc_time: 0,
            avg_svc_cold: 0,
            avg_svc_warm: 0,
            sandbox_util: 0.0,
            cold_ratio: 0.0,
            warm_ratio: 0.0,
            exec_times: vec![0; STATS_WINDOW],
            startup_times: vec![0; STATS_WINDOW],
            service_times: vec![0; STATS_WINDOW],
        }
    }
}
