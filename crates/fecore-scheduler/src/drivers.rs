use async_trait::async_trait;
use fecore_types::{Error, Function};
use tracing::{debug, warn};

/// Created container image/task metadata handed back from the driver.
#[derive(Debug, Clone)]
pub struct SpawnedContainer {
    pub pid: u32,
    pub ip: String,
}

/// The core depends on this trait for the native OS-container backend; the
/// actual container runtime is an external collaborator (SPEC_FULL.md §6).
#[async_trait]
pub trait NativeDriver: Send + Sync {
    async fn create_container(
        &self,
        name: &str,
        f: &Function,
    ) -> Result<SpawnedContainer, Error>;

    async fn remove_container(&self, name: &str, pid: u32) -> Result<(), Error>;
}

/// The core depends on this trait for the WASM process backend; the actual
/// WASM runtime binary is spawned out-of-process (SPEC_FULL.md §6 —
/// `WasmDriver`, grounded on `original_source/pkg/provider/handlers/
/// replicas.go` forking a sibling `runw`-style binary rather than embedding
/// an engine).
#[async_trait]
pub trait WasmDriver: Send + Sync {
    async fn spawn(
        &self,
        name: &str,
        f: &Function,
        ns_num: u32,
        ip: &str,
    ) -> Result<u32, Error>;

    async fn kill(&self, pid: u32) -> Result<(), Error>;
}

/// A best-effort reference `NativeDriver` so the daemon is runnable
/// standalone without a real containerd/CNI stack wired in. Spawns a
/// lightweight long-lived placeholder process per replica; a production
/// deployment substitutes a real driver behind the same trait.
pub struct LocalNativeDriver {
    next_octet: std::sync::atomic::AtomicU32,
}

impl Default for LocalNativeDriver {
    fn default() -> Self {
        LocalNativeDriver {
            next_octet: std::sync::atomic::AtomicU32::new(2),
        }
    }
}

#[async_trait]
impl NativeDriver for LocalNativeDriver {
    async fn create_container(
        &self,
        name: &str,
        f: &Function,
    ) -> Result<SpawnedContainer, Error> {
        let child = tokio::process::Command::new("sleep")
            .arg("infinity")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::BackendError(format!("spawn native container {name}: {e}")))?;
        let pid = child.id().unwrap_or(0);
        // The child is intentionally not awaited here — `destroy()` kills it
        // by PID; a reaper is unnecessary for a placeholder process.
        std::mem::forget(child);
        let octet = self
            .next_octet
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let ip = format!("127.0.{}.1", octet % 254 + 1);
        debug!(function = %f.name, %name, pid, %ip, "local native container started");
        Ok(SpawnedContainer { pid, ip })
    }

    async fn remove_container(&self, name: &str, pid: u32) -> Result<(), Error> {
        debug!(%name, pid, "local native container removed");
        if pid == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            // SAFETY: pid came from a `Command::spawn()` we own; sending
            // SIGKILL to a process we started (or have already reaped) is
            // safe.
            let res = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
            if res != 0 {
                warn!(pid, "kill failed (process may already be gone)");
            }
        }
        Ok(())
    }
}

/// A best-effort reference `WasmDriver`: spawns a trivial child process in
/// lieu of the real WASM runtime binary.
#[derive(Default)]
pub struct LocalWasmDriver;

#[async_trait]
impl WasmDriver for LocalWasmDriver {
    async fn spawn(&self, name: &str, f: &Function, ns_num: u32, ip: &str) -> Result<u32, Error> {
        let child = tokio::process::Command::new("sleep")
            .arg("infinity")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::BackendError(format!("spawn wasm replica {name}: {e}")))?;
        let pid = child.id().unwrap_or(0);
        std::mem::forget(child);
        debug!(function = %f.name, %name, pid, ns_num, %ip, "local wasm replica started");
        Ok(pid)
    }

    async fn kill(&self, pid: u32) -> Result<(), Error> {
        if pid == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            // SAFETY: pid came from a `Command::spawn()` we own; sending
            // SIGKILL to a process we started (or have already reaped) is
            // safe.
            let res = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
            if res != 0 {
                warn!(pid, "kill failed (process may already be gone)");
            }
        }
        Ok(())
    }
}
