//! Periodic health checker with per-plugin exponential backoff and
//! automatic reload on failure.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::plugin::hotreload::HotReloadPool;
use crate::plugin::registry::PluginRegistry;

const BACKOFF_CAP_SECS: u64 = 300;
const HEALTH_CHECK_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Pure integer backoff: `min(base * 2^(k-1), cap)` seconds for the k-th
/// consecutive failure. Never sleeps unbounded.
pub fn backoff_seconds(base: u64, consecutive_failures: u32) -> u64 {
    let shift = consecutive_failures.saturating_sub(1).min(63);
    let scaled = base.saturating_mul(1u64 << shift);
    scaled.min(BACKOFF_CAP_SECS)
}

pub struct Supervisor {
    registry: PluginRegistry,
    pool: Arc<HotReloadPool>,
    config: RecoveryConfig,
    retries: RwLock<HashMap<String, RetryState>>,
    /// `(source_dir, artifact_path)` per plugin name, populated by the
    /// engine at startup so a scheduled reload knows what to rebuild from.
    sources: RwLock<HashMap<String, (PathBuf, PathBuf)>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(registry: PluginRegistry, pool: Arc<HotReloadPool>, config: RecoveryConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            registry,
            pool,
            config,
            retries: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
            stop_tx,
            stop_rx,
        }
    }

    /// Record where a loaded plugin's source and artifact live, so a
    /// future supervisor-triggered reload can find them.
    pub async fn register_source(&self, name: String, source_dir: PathBuf, artifact_path: PathBuf) {
        self.sources.write().await.insert(name, (source_dir, artifact_path));
    }

    /// Signal the loop to stop; it returns within one tick.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn retry_state(&self, name: &str) -> RetryState {
        self.retries.read().await.get(name).cloned().unwrap_or_default()
    }

    /// Run the supervisor loop until `stop()` is called. Intended to be
    /// spawned as a background task.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.health_check));
        let mut stop_rx = self.stop_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        info!("supervisor loop stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        for name in self.registry.list_agents() {
            let Some(agent) = self.registry.get_agent(&name) else { continue };
            let healthy = timeout(HEALTH_CHECK_DEADLINE, agent.health_check()).await.map(|r| r.is_ok()).unwrap_or(false);
            self.observe(&name, "agent", healthy).await;
        }

        for name in self.registry.list_providers() {
            let Some(provider) = self.registry.get_provider(&name) else { continue };
            let healthy = timeout(HEALTH_CHECK_DEADLINE, provider.health_check()).await.map(|r| r.is_ok()).unwrap_or(false);
            self.observe(&name, "provider", healthy).await;
        }
    }

    async fn observe(&self, name: &str, kind: &'static str, healthy: bool) {
        let mut retries = self.retries.write().await;

        if healthy {
            if retries.remove(name).is_some() {
                info!("{kind}/{name} recovered, retry state reset");
            }
            return;
        }

        let state = retries.entry(name.to_string()).or_default();
        // Capped at max_retries + 1: once the bound is reached, further
        // consecutive failures are observed (lastFailureAt still stamped)
        // but no longer counted, per the retry-counter invariant.
        if state.consecutive_failures <= self.config.max_retries {
            state.consecutive_failures += 1;
        }
        state.last_failure_at = Some(Utc::now());

        if state.consecutive_failures > self.config.max_retries {
            warn!("{kind}/{name} exceeded max retries ({}), giving up", self.config.max_retries);
            return;
        }

        let delay = backoff_seconds(self.config.backoff_sec, state.consecutive_failures);
        warn!("{kind}/{name} unhealthy (failure #{}), scheduling reload in {delay}s", state.consecutive_failures);

        if self.config.hot_reload {
            self.schedule_reload(kind, name.to_string(), delay).await;
        }
    }

    async fn schedule_reload(&self, kind: &'static str, name: String, delay_secs: u64) {
        let Some((source_dir, artifact_path)) = self.sources.read().await.get(&name).cloned() else {
            warn!("no known source for {kind}/{name}, cannot schedule reload");
            return;
        };
        let pool = self.pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            if let Err(e) = pool.reload(kind, name.clone(), source_dir, artifact_path, false).await {
                warn!("failed to enqueue reload for {kind}/{name}: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_the_spec_table() {
        assert_eq!(backoff_seconds(5, 1), 5);
        assert_eq!(backoff_seconds(5, 2), 10);
        assert_eq!(backoff_seconds(5, 3), 20);
        assert_eq!(backoff_seconds(5, 10), 300);
    }

    #[test]
    fn backoff_never_exceeds_cap_even_for_huge_k() {
        assert_eq!(backoff_seconds(5, 1000), 300);
    }
}
