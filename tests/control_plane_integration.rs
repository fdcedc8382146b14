//! Seed scenarios 5 and 6: the status socket reports a live snapshot, and
//! a graceful stop removes the PID file and socket within the grace window.

use std::sync::Arc;
use std::time::Duration;

use agentforge_engine::paths::UserDirectories;
use agentforge_engine::plugin::registry::PluginRegistry;
use agentforge_engine::status::{self, HostStatus, StatusControlPlane};
use tokio::io::AsyncReadExt;

fn isolated_dirs(label: &str) -> UserDirectories {
    let root = std::env::temp_dir().join(format!("afe-control-it-{label}-{}", uuid::Uuid::new_v4()));
    std::env::set_var("AFE_HOME", &root);
    let dirs = UserDirectories::new().unwrap();
    dirs.ensure().unwrap();
    dirs
}

#[tokio::test]
#[serial_test::serial(afe_home)]
async fn status_socket_reports_a_live_running_snapshot() {
    let dirs = isolated_dirs("status");
    let plane = Arc::new(StatusControlPlane::new(dirs.clone(), "localhost".to_string(), 8080, PluginRegistry::new()));
    plane.clone().start().await.unwrap();

    // Give the accept loop a moment to bind and start listening.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut stream = tokio::net::UnixStream::connect(dirs.socket_file()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let info: serde_json::Value = serde_json::from_slice(&buf).unwrap();

    assert_eq!(info["status"], "RUNNING");
    assert_eq!(info["pid"], std::process::id());
    assert!(info["uptime_secs"].as_i64().unwrap() >= 0);

    plane.stop().await;
    std::fs::remove_dir_all(dirs.root()).ok();
}

#[tokio::test]
#[serial_test::serial(afe_home)]
async fn stop_removes_pid_and_socket_and_status_reports_stopped() {
    let dirs = isolated_dirs("stop");
    let plane = Arc::new(StatusControlPlane::new(dirs.clone(), "localhost".to_string(), 8080, PluginRegistry::new()));
    plane.clone().start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(dirs.pid_file().exists());
    assert!(dirs.socket_file().exists());

    plane.stop().await;

    assert!(!dirs.pid_file().exists());
    assert!(!dirs.socket_file().exists());
    assert_eq!(plane.current_status().await.status, HostStatus::Stopped);

    std::fs::remove_dir_all(dirs.root()).ok();
}

#[tokio::test]
#[serial_test::serial(afe_home)]
async fn graceful_stop_of_a_real_process_clears_pid_file_within_the_grace_window() {
    let dirs = isolated_dirs("graceful");

    let mut child = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id().unwrap();
    std::fs::write(dirs.pid_file(), pid.to_string()).unwrap();

    status::graceful_stop(&dirs, Duration::from_secs(5)).await.unwrap();

    assert!(!dirs.pid_file().exists());
    assert!(!status::is_running(&dirs));

    let _ = child.kill().await;
    std::fs::remove_dir_all(dirs.root()).ok();
}
