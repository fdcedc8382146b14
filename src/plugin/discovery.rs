//! Discover plugin source directories from configuration: local paths
//! as-is, remote repositories via a bounded-time clone.

use std::path::PathBuf;

use crate::build::BuildPlanner;
use crate::config::{LocalAgentConfig, RemoteAgentConfig};
use crate::error::Result;

/// One discovered plugin ready for the build step.
pub struct DiscoveredSource {
    pub kind: &'static str,
    pub name: String,
    pub source_dir: PathBuf,
}

/// Resolve every configured local agent into a discovered source. Local
/// sources need no network access: the path is used directly.
pub fn discover_local(agents: &[LocalAgentConfig]) -> Vec<DiscoveredSource> {
    agents
        .iter()
        .map(|a| DiscoveredSource { kind: "agent", name: a.name.clone(), source_dir: PathBuf::from(&a.path) })
        .collect()
}

/// Clone every configured remote agent into a temporary directory and
/// return it as a discovered source. A failed clone is dropped with a
/// warning rather than aborting the whole discovery pass.
pub async fn discover_remote(planner: &BuildPlanner, agents: &[RemoteAgentConfig]) -> Vec<DiscoveredSource> {
    let mut out = Vec::new();
    for agent in agents {
        match planner.clone_remote(&agent.repo, agent.version.as_deref()).await {
            Ok(dir) => out.push(DiscoveredSource { kind: "agent", name: agent.name.clone(), source_dir: dir }),
            Err(e) => tracing::warn!("skipping remote agent {}: {}", agent.name, e),
        }
    }
    out
}

/// Scan a directory of plugin source subdirectories (one per plugin),
/// used by `build providers`/`build agents` to enumerate what's on disk
/// without relying solely on configuration.
pub fn scan_source_tree(root: &std::path::Path, kind: &'static str) -> Result<Vec<DiscoveredSource>> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                out.push(DiscoveredSource { kind, name: name.to_string(), source_dir: path.clone() });
            }
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}
