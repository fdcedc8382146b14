//! Status Control Plane: the PID file + stream-socket pair that lets
//! out-of-process callers (the `status`/`stop` CLI commands) probe whether
//! the host is alive and, if so, read its live `StatusInfo`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::error::Result;
use crate::paths::UserDirectories;
use crate::plugin::registry::PluginRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HostStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub uptime_secs: i64,
    pub version: String,
    pub status: HostStatus,
    pub host: String,
    pub port: u16,
    pub models_count: usize,
    pub agents_count: usize,
}

/// Write the PID file, bind the status socket, and serve `StatusInfo` once
/// per accepted connection until `stop()` is called.
pub struct StatusControlPlane {
    dirs: UserDirectories,
    start_time: DateTime<Utc>,
    host: String,
    port: u16,
    registry: PluginRegistry,
    status: Arc<tokio::sync::RwLock<HostStatus>>,
}

impl StatusControlPlane {
    pub fn new(dirs: UserDirectories, host: String, port: u16, registry: PluginRegistry) -> Self {
        Self {
            dirs,
            start_time: Utc::now(),
            host,
            port,
            registry,
            status: Arc::new(tokio::sync::RwLock::new(HostStatus::Starting)),
        }
    }

    pub async fn set_status(&self, status: HostStatus) {
        *self.status.write().await = status;
    }

    fn snapshot(&self, status: HostStatus) -> StatusInfo {
        StatusInfo {
            pid: std::process::id(),
            start_time: self.start_time,
            uptime_secs: (Utc::now() - self.start_time).num_seconds(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status,
            host: self.host.clone(),
            port: self.port,
            models_count: self.registry.provider_count(),
            agents_count: self.registry.agent_count(),
        }
    }

    pub async fn current_status(&self) -> StatusInfo {
        self.snapshot(*self.status.read().await)
    }

    /// Write the PID file and bind the Unix socket, removing any stale
    /// artifacts from a prior crash first. Spawns the accept loop in the
    /// background.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let pid_file = self.dirs.pid_file();
        let socket_file = self.dirs.socket_file();

        cleanup_stale(&pid_file, &socket_file);

        std::fs::write(&pid_file, std::process::id().to_string())?;

        if socket_file.exists() {
            std::fs::remove_file(&socket_file)?;
        }
        let listener = UnixListener::bind(&socket_file)?;
        self.set_status(HostStatus::Running).await;

        info!("status control plane listening on {}", socket_file.display());

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((mut stream, _)) => {
                        let status = this.current_status().await;
                        let payload = match serde_json::to_vec(&status) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!("failed to serialize status payload: {e}");
                                continue;
                            }
                        };
                        tokio::spawn(async move {
                            if let Err(e) = stream.write_all(&payload).await {
                                warn!("status socket write failed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("status socket accept failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Orderly shutdown: remove the socket, then the PID file.
    pub async fn stop(&self) {
        self.set_status(HostStatus::Stopping).await;
        std::fs::remove_file(self.dirs.socket_file()).ok();
        std::fs::remove_file(self.dirs.pid_file()).ok();
        self.set_status(HostStatus::Stopped).await;
    }
}

fn cleanup_stale(pid_file: &PathBuf, socket_file: &PathBuf) {
    if pid_file.exists() {
        std::fs::remove_file(pid_file).ok();
    }
    if socket_file.exists() {
        std::fs::remove_file(socket_file).ok();
    }
}

/// Read the PID file and probe whether that process is resident via a
/// null signal. A stale file (process gone) is cleaned up and treated as
/// "not running".
pub fn is_running(dirs: &UserDirectories) -> bool {
    let pid_file = dirs.pid_file();
    let Ok(contents) = std::fs::read_to_string(&pid_file) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        std::fs::remove_file(&pid_file).ok();
        return false;
    };

    let resident = unsafe { libc::kill(pid, 0) == 0 };
    if !resident {
        std::fs::remove_file(&pid_file).ok();
        std::fs::remove_file(dirs.socket_file()).ok();
    }
    resident
}

fn read_pid(dirs: &UserDirectories) -> Option<i32> {
    std::fs::read_to_string(dirs.pid_file()).ok()?.trim().parse().ok()
}

/// Graceful stop as described by the external `stop` command: send
/// `SIGTERM`, poll for up to `grace` for the process to exit, then escalate
/// to `SIGKILL`, then remove the PID and socket files.
pub async fn graceful_stop(dirs: &UserDirectories, grace: Duration) -> Result<()> {
    let Some(pid) = read_pid(dirs) else {
        info!("no PID file present, nothing to stop");
        return Ok(());
    };

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_running(dirs) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    if is_running(dirs) {
        warn!("pid {pid} still alive after grace window, sending SIGKILL");
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }

    std::fs::remove_file(dirs.pid_file()).ok();
    std::fs::remove_file(dirs.socket_file()).ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial(afe_home)]
    fn is_running_is_false_with_no_pid_file() {
        std::env::set_var("AFE_HOME", std::env::temp_dir().join(format!("afe-status-test-{}", uuid::Uuid::new_v4())));
        let dirs = UserDirectories::new().unwrap();
        dirs.ensure().unwrap();
        assert!(!is_running(&dirs));
        std::fs::remove_dir_all(dirs.root()).ok();
    }

    #[test]
    #[serial_test::serial(afe_home)]
    fn is_running_is_true_for_this_process() {
        std::env::set_var("AFE_HOME", std::env::temp_dir().join(format!("afe-status-test-{}", uuid::Uuid::new_v4())));
        let dirs = UserDirectories::new().unwrap();
        dirs.ensure().unwrap();
        std::fs::write(dirs.pid_file(), std::process::id().to_string()).unwrap();
        assert!(is_running(&dirs));
        std::fs::remove_dir_all(dirs.root()).ok();
    }

    #[test]
    #[serial_test::serial(afe_home)]
    fn stale_pid_is_cleaned_up() {
        std::env::set_var("AFE_HOME", std::env::temp_dir().join(format!("afe-status-test-{}", uuid::Uuid::new_v4())));
        let dirs = UserDirectories::new().unwrap();
        dirs.ensure().unwrap();
        // A pid that almost certainly does not exist.
        std::fs::write(dirs.pid_file(), "999999").unwrap();
        assert!(!is_running(&dirs));
        assert!(!dirs.pid_file().exists());
        std::fs::remove_dir_all(dirs.root()).ok();
    }
}
