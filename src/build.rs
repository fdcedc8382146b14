//! The Build Planner: decides what needs building, invokes the native
//! build tool in a child process, and updates the build cache.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::cache::BuildCache;
use crate::config::BuildConfig;
use crate::error::{AfeError, Result};
use crate::paths::UserDirectories;

#[cfg(target_os = "macos")]
const DYLIB_EXT: &str = "dylib";
#[cfg(target_os = "windows")]
const DYLIB_EXT: &str = "dll";
#[cfg(all(unix, not(target_os = "macos")))]
const DYLIB_EXT: &str = "so";

pub struct BuildOutcome {
    pub built: Vec<String>,
    pub cached: Vec<String>,
    pub total_ms: u64,
}

pub struct BuildPlanner {
    dirs: UserDirectories,
    config: BuildConfig,
}

impl BuildPlanner {
    pub fn new(dirs: UserDirectories, config: BuildConfig) -> Self {
        Self { dirs, config }
    }

    pub fn artifact_path(&self, kind: &str, name: &str) -> PathBuf {
        let base = if kind == "provider" { self.dirs.providers_dir() } else { self.dirs.agents_dir() };
        base.join(format!("{name}.{DYLIB_EXT}"))
    }

    /// Build (or reuse the cache for) one plugin. Returns `true` if a real
    /// build ran, `false` if the cache was reused.
    pub async fn build_one(&self, cache: &mut BuildCache, kind: &str, name: &str, source_dir: &Path, force: bool) -> Result<bool> {
        let (needs_rebuild, reason) = cache.should_rebuild(kind, name, source_dir);
        if !needs_rebuild && !force {
            info!("{kind}/{name}: reusing cached artifact ({reason})");
            return Ok(false);
        }
        if force {
            info!("{kind}/{name}: forced rebuild");
        } else {
            info!("{kind}/{name}: rebuilding ({reason})");
        }

        let started = Instant::now();
        let output_path = self.artifact_path(kind, name);
        self.invoke_cargo_build(source_dir, &output_path).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        cache.update_plugin(kind, name, source_dir, output_path, duration_ms)?;
        Ok(true)
    }

    /// Invoke `cargo build --release` for a plugin's source directory with
    /// a fixed, minimal environment, capturing combined stdout+stderr. A
    /// non-zero exit surfaces an `AfeError::Build` carrying that output.
    async fn invoke_cargo_build(&self, source_dir: &Path, output_path: &Path) -> Result<()> {
        // Inherit the parent environment so a rustup-managed toolchain can
        // still find itself (HOME, CARGO_HOME, RUSTUP_HOME); only pin
        // CARGO_TARGET_DIR so each plugin builds into its own target dir.
        let mut command = Command::new("cargo");
        command
            .arg("build")
            .arg("--release")
            .args(&self.config.build_flags)
            .current_dir(source_dir)
            .env("CARGO_TARGET_DIR", source_dir.join("target"))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let name = source_dir.display().to_string();
        let child = command.spawn().map_err(AfeError::Io)?;

        let output = timeout(Duration::from_secs(self.config.timeout), child.wait_with_output())
            .await
            .map_err(|_| AfeError::Build { name: name.clone(), output: "build timed out".to_string() })?
            .map_err(AfeError::Io)?;

        if !output.status.success() {
            let combined = format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(AfeError::Build { name, output: combined });
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let built_artifact = find_built_cdylib(source_dir)?;
        std::fs::copy(&built_artifact, output_path)?;

        Ok(())
    }

    /// Clone a remote agent's source at a given revision into a temporary
    /// directory. Bounded-time; a failed clone prevents build.
    pub async fn clone_remote(&self, repo: &str, version: Option<&str>) -> Result<PathBuf> {
        let tmp_dir = std::env::temp_dir().join(format!("afe-remote-{}", uuid::Uuid::new_v4()));

        let mut command = Command::new("git");
        command.arg("clone").arg("--depth").arg("1");
        if let Some(version) = version {
            command.arg("--branch").arg(version);
        }
        command.arg(repo).arg(&tmp_dir);

        let child = command.spawn().map_err(AfeError::Io)?;
        let status = timeout(Duration::from_secs(60), child.wait_with_output())
            .await
            .map_err(|_| AfeError::Build { name: repo.to_string(), output: "clone timed out".to_string() })?
            .map_err(AfeError::Io)?;

        if !status.status.success() {
            warn!("failed to clone {repo}: {}", String::from_utf8_lossy(&status.stderr));
            return Err(AfeError::Build {
                name: repo.to_string(),
                output: String::from_utf8_lossy(&status.stderr).to_string(),
            });
        }

        Ok(tmp_dir)
    }
}

fn find_built_cdylib(source_dir: &Path) -> Result<PathBuf> {
    let release_dir = source_dir.join("target").join("release");
    if !release_dir.is_dir() {
        return Err(AfeError::Build {
            name: source_dir.display().to_string(),
            output: "no release directory produced by build".to_string(),
        });
    }
    for entry in std::fs::read_dir(&release_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(DYLIB_EXT) {
            return Ok(path);
        }
    }
    Err(AfeError::Build {
        name: source_dir.display().to_string(),
        output: format!("no .{DYLIB_EXT} artifact found in {}", release_dir.display()),
    })
}
