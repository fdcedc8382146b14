//! Stable on-disk layout for the host process: `~/.afe` and the first-run
//! migration of a legacy `./plugins` directory into it.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;

const LEGACY_PLUGIN_DIR: &str = "./plugins";

/// Resolved, ensured-to-exist directory layout rooted at `~/.afe`.
#[derive(Debug, Clone)]
pub struct UserDirectories {
    root: PathBuf,
}

impl UserDirectories {
    /// Resolve (without creating) the directory layout for the current user.
    pub fn new() -> Result<Self> {
        let home = dirs_home()?;
        Ok(Self { root: home.join(".afe") })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn providers_dir(&self) -> PathBuf {
        self.root.join("providers")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn accounts_dir(&self) -> PathBuf {
        self.root.join("accounts")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("afe.pid")
    }

    pub fn socket_file(&self) -> PathBuf {
        self.root.join("afe.sock")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir().join("build_cache.yaml")
    }

    pub fn user_config_file(&self) -> PathBuf {
        self.config_dir().join("build_config.yaml")
    }

    fn dirs(&self) -> [PathBuf; 6] {
        [
            self.providers_dir(),
            self.agents_dir(),
            self.cache_dir(),
            self.config_dir(),
            self.logs_dir(),
            self.accounts_dir(),
        ]
    }

    /// Create the full directory tree if missing, then migrate any legacy
    /// `./plugins` artifacts into it. Idempotent: re-running never
    /// overwrites an existing target.
    pub fn ensure(&self) -> Result<()> {
        for dir in self.dirs() {
            std::fs::create_dir_all(&dir)?;
        }
        self.migrate_legacy_plugins()?;
        Ok(())
    }

    /// Scan the legacy `./plugins` directory (if any) and copy each
    /// artifact into `providers/` or `agents/` by filename heuristic.
    /// A target that already exists is left untouched.
    fn migrate_legacy_plugins(&self) -> Result<()> {
        let legacy = Path::new(LEGACY_PLUGIN_DIR);
        if !legacy.is_dir() {
            return Ok(());
        }

        for entry in std::fs::read_dir(legacy)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let dest_dir = if classify_as_provider(file_name) {
                self.providers_dir()
            } else {
                self.agents_dir()
            };
            let dest = dest_dir.join(file_name);

            if dest.exists() {
                continue;
            }

            std::fs::copy(&path, &dest)?;
            info!("migrated legacy plugin {} -> {}", path.display(), dest.display());
        }

        Ok(())
    }
}

/// Filename heuristic from SPEC_FULL.md §4.7 / §9: names containing
/// "provider", "bridge", or "qwen3" (case-insensitive) are providers.
fn classify_as_provider(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    ["provider", "bridge", "qwen3"].iter().any(|needle| lower.contains(needle))
}

fn dirs_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("AFE_HOME") {
        return Ok(PathBuf::from(home));
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .or_else(|_| {
            warn!("HOME is not set, falling back to current directory for ~/.afe");
            std::env::current_dir().map_err(Into::into)
        })
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_providers_by_substring() {
        assert!(classify_as_provider("qwen3_bridge.so"));
        assert!(classify_as_provider("ProviderMain.dylib"));
        assert!(!classify_as_provider("ls_agent.so"));
    }

    #[test]
    #[serial_test::serial(afe_home)]
    fn ensure_is_idempotent() {
        std::env::set_var("AFE_HOME", std::env::temp_dir().join(format!("afe-test-{}", uuid::Uuid::new_v4())));
        let dirs = UserDirectories::new().unwrap();
        dirs.ensure().unwrap();
        dirs.ensure().unwrap();
        assert!(dirs.providers_dir().is_dir());
        assert!(dirs.agents_dir().is_dir());
        std::fs::remove_dir_all(dirs.root()).ok();
    }
}
