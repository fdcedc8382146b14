//! Content-addressed build cache: decides whether a plugin needs rebuilding
//! and records build history.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFileHash {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_hash: String,
    pub manifest_hash: String,
    pub output_path: PathBuf,
    pub output_hash: String,
    pub built_at: DateTime<Utc>,
    pub build_duration_ms: u64,
    pub output_size: u64,
    pub build_count: u32,
    pub cache_valid: bool,
    pub source_files: Vec<SourceFileHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildHistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub built: Vec<String>,
    pub cached: Vec<String>,
    pub total_ms: u64,
    pub success: bool,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildCacheDocument {
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
    #[serde(default)]
    history: Vec<BuildHistoryEntry>,
}

/// A plugin's source is identified by `kind/name`, e.g. `agent/ls`.
fn cache_key(kind: &str, name: &str) -> String {
    format!("{kind}/{name}")
}

pub struct BuildCache {
    path: PathBuf,
    document: BuildCacheDocument,
}

impl BuildCache {
    /// Load the cache document from `path`. A missing or unreadable file is
    /// recoverable: the cache reinitializes empty with a logged warning.
    pub fn load(path: PathBuf) -> Self {
        let document = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_yaml::from_str(&contents).unwrap_or_else(|e| {
                warn!("build cache at {} is unreadable ({}), reinitializing empty", path.display(), e);
                BuildCacheDocument::default()
            }),
            Err(_) => BuildCacheDocument::default(),
        };
        Self { path, document }
    }

    /// Persist the whole document atomically: write to a temp path in the
    /// same directory, then rename over the target.
    pub fn save(&self) -> Result<()> {
        let serialized = serde_yaml::to_string(&self.document)?;
        let tmp_path = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Decide whether `kind/name` sourced from `source_dir` needs a rebuild.
    pub fn should_rebuild(&self, kind: &str, name: &str, source_dir: &Path) -> (bool, String) {
        let key = cache_key(kind, name);
        let Some(entry) = self.document.entries.get(&key) else {
            return (true, "no cache entry".to_string());
        };

        if !entry.cache_valid {
            return (true, "cache entry invalid".to_string());
        }
        if !entry.output_path.exists() {
            return (true, "output missing".to_string());
        }

        match fingerprint_source_dir(source_dir) {
            Ok((source_hash, manifest_hash)) => {
                if source_hash != entry.source_hash {
                    return (true, "source modified".to_string());
                }
                if manifest_hash != entry.manifest_hash {
                    return (true, "manifest modified".to_string());
                }
                (false, "up to date".to_string())
            }
            Err(e) => (true, format!("unable to fingerprint source: {e}")),
        }
    }

    /// After a successful build, recompute hashes and mark the cache entry
    /// valid.
    pub fn update_plugin(
        &mut self,
        kind: &str,
        name: &str,
        source_dir: &Path,
        output_path: PathBuf,
        build_duration_ms: u64,
    ) -> Result<()> {
        let (source_hash, manifest_hash) = fingerprint_source_dir(source_dir)?;
        let output_hash = hash_file(&output_path)?;
        let output_size = std::fs::metadata(&output_path)?.len();
        let source_files = list_source_hashes(source_dir)?;

        let key = cache_key(kind, name);
        let build_count = self.document.entries.get(&key).map(|e| e.build_count).unwrap_or(0) + 1;

        self.document.entries.insert(
            key,
            CacheEntry {
                source_hash,
                manifest_hash,
                output_path,
                output_hash,
                built_at: Utc::now(),
                build_duration_ms,
                output_size,
                build_count,
                cache_valid: true,
                source_files,
            },
        );
        Ok(())
    }

    pub fn entry(&self, kind: &str, name: &str) -> Option<&CacheEntry> {
        self.document.entries.get(&cache_key(kind, name))
    }

    /// Append a build-history entry, evicting the oldest beyond the cap.
    pub fn record_history(&mut self, command: &str, built: Vec<String>, cached: Vec<String>, total_ms: u64, success: bool) {
        let total = (built.len() + cached.len()) as f64;
        let hit_rate = if total > 0.0 { cached.len() as f64 / total } else { 0.0 };

        self.document.history.push(BuildHistoryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            command: command.to_string(),
            built,
            cached,
            total_ms,
            success,
            hit_rate,
        });

        while self.document.history.len() > MAX_HISTORY {
            self.document.history.remove(0);
        }
    }

    pub fn history(&self) -> &[BuildHistoryEntry] {
        &self.document.history
    }

    pub fn entries(&self) -> &HashMap<String, CacheEntry> {
        &self.document.entries
    }
}

/// Order-insensitive SHA-256 over a plugin's `.rs` sources plus a plain
/// hash of its `Cargo.toml` manifest. Filenames are sorted before hashing
/// so the fingerprint is deterministic across filesystem enumeration order.
fn fingerprint_source_dir(source_dir: &Path) -> Result<(String, String)> {
    let mut rs_files: Vec<PathBuf> = Vec::new();
    collect_rs_files(source_dir, &mut rs_files)?;
    rs_files.sort();

    let mut combined = Sha256::new();
    for file in &rs_files {
        let hash = hash_file(file)?;
        combined.update(hash.as_bytes());
    }
    let source_hash = format!("{:x}", combined.finalize());

    let manifest_path = source_dir.join("Cargo.toml");
    let manifest_hash = if manifest_path.is_file() {
        hash_file(&manifest_path)?
    } else {
        String::new()
    };

    Ok((source_hash, manifest_hash))
}

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
            out.push(path);
        }
    }
    Ok(())
}

fn list_source_hashes(source_dir: &Path) -> Result<Vec<SourceFileHash>> {
    let mut files = Vec::new();
    let mut rs_files = Vec::new();
    collect_rs_files(source_dir, &mut rs_files)?;
    rs_files.sort();

    for path in rs_files {
        let metadata = std::fs::metadata(&path)?;
        files.push(SourceFileHash {
            path: path.to_string_lossy().to_string(),
            hash: hash_file(&path)?,
            size: metadata.len(),
            modified_at: metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
        });
    }
    Ok(files)
}

fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn no_entry_means_rebuild() {
        let tmp = std::env::temp_dir().join(format!("afe-cache-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        let cache = BuildCache::load(tmp.join("cache.yaml"));
        let (rebuild, reason) = cache.should_rebuild("agent", "ls", &tmp);
        assert!(rebuild);
        assert_eq!(reason, "no cache entry");
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn update_then_unchanged_source_does_not_rebuild() {
        let tmp = std::env::temp_dir().join(format!("afe-cache-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        write_source(&tmp, "lib.rs", "fn main() {}");
        write_source(&tmp, "Cargo.toml", "[package]\nname=\"x\"");

        let output = tmp.join("out.so");
        std::fs::write(&output, b"binary").unwrap();

        let mut cache = BuildCache::load(tmp.join("cache.yaml"));
        cache.update_plugin("agent", "ls", &tmp, output, 10).unwrap();

        let (rebuild, _) = cache.should_rebuild("agent", "ls", &tmp);
        assert!(!rebuild);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn edited_source_triggers_rebuild_with_reason() {
        let tmp = std::env::temp_dir().join(format!("afe-cache-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        write_source(&tmp, "lib.rs", "fn main() {}");
        write_source(&tmp, "Cargo.toml", "[package]\nname=\"x\"");

        let output = tmp.join("out.so");
        std::fs::write(&output, b"binary").unwrap();

        let mut cache = BuildCache::load(tmp.join("cache.yaml"));
        cache.update_plugin("agent", "ls", &tmp, output, 10).unwrap();

        write_source(&tmp, "lib.rs", "fn main() { /* changed */ }");

        let (rebuild, reason) = cache.should_rebuild("agent", "ls", &tmp);
        assert!(rebuild);
        assert_eq!(reason, "source modified");

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn history_ring_is_capped_at_100() {
        let tmp = std::env::temp_dir().join(format!("afe-cache-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        let mut cache = BuildCache::load(tmp.join("cache.yaml"));

        for i in 0..150 {
            cache.record_history("build", vec![format!("p{i}")], vec![], 1, true);
        }

        assert_eq!(cache.history().len(), MAX_HISTORY);
        std::fs::remove_dir_all(&tmp).ok();
    }
}
