//! Engine wiring: assembles every subsystem in the data-flow order from
//! the system overview, then drives the main run loop until a shutdown
//! signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use crate::build::BuildPlanner;
use crate::cache::BuildCache;
use crate::config::AfeConfig;
use crate::error::Result;
use crate::model_adapter::HttpModelAdapter;
use crate::orchestrator::ChatOrchestrator;
use crate::paths::UserDirectories;
use crate::plugin::discovery;
use crate::plugin::hotreload::HotReloadPool;
use crate::plugin::loader::PluginLoader;
use crate::plugin::registry::PluginRegistry;
use crate::server::AfeServer;
use crate::status::{HostStatus, StatusControlPlane};
use crate::supervisor::Supervisor;

pub struct Engine {
    config: AfeConfig,
    dirs: UserDirectories,
    registry: PluginRegistry,
    loader: Arc<PluginLoader>,
    pool: Arc<HotReloadPool>,
    supervisor: Arc<Supervisor>,
    orchestrator: Arc<ChatOrchestrator>,
    status_plane: Arc<StatusControlPlane>,
}

impl Engine {
    pub async fn new(config: AfeConfig) -> Result<Self> {
        let dirs = UserDirectories::new()?;
        dirs.ensure()?;

        info!("AgentForgeEngine initializing");
        info!("  server: {}:{}", config.server.host, config.server.port);
        info!("  models configured: {}", config.models.len());
        info!("  local agents configured: {}", config.agents.local.len());
        info!("  remote agents configured: {}", config.agents.remote.len());

        let registry = PluginRegistry::new();
        for model in &config.models {
            registry.insert_provider(model.name.clone(), Arc::new(HttpModelAdapter::from_config(model)))?;
        }
        let loader = Arc::new(PluginLoader::new());
        let pool = Arc::new(HotReloadPool::new(registry.clone(), loader.clone()));
        let supervisor = Arc::new(Supervisor::new(registry.clone(), pool.clone(), config.recovery.clone()));

        // SPEC_FULL.md §4.5 step 1: the chat orchestrator's default model is
        // the fixed string "llamacpp", independent of `models[]` ordering.
        let orchestrator = Arc::new(ChatOrchestrator::new(registry.clone(), "llamacpp"));

        let status_plane = Arc::new(StatusControlPlane::new(dirs.clone(), config.server.host.clone(), config.server.port, registry.clone()));

        Ok(Self { config, dirs, registry, loader, pool, supervisor, orchestrator, status_plane })
    }

    /// Build every configured local/remote agent, loading each into the
    /// registry and registering its source with the supervisor so future
    /// reloads know where to rebuild from.
    pub async fn load_all_plugins(&self) -> Result<()> {
        let cache_path = self.dirs.cache_file();
        let mut cache = BuildCache::load(cache_path);
        let planner = BuildPlanner::new(self.dirs.clone(), self.config.build.clone());

        let mut sources = discovery::discover_local(&self.config.agents.local);
        sources.extend(discovery::discover_remote(&planner, &self.config.agents.remote).await);

        for source in sources {
            if let Err(e) = planner.build_one(&mut cache, source.kind, &source.name, &source.source_dir, false).await {
                error!("failed to build {}/{}: {e}", source.kind, source.name);
                continue;
            }
            let artifact_path = planner.artifact_path(source.kind, &source.name);
            if let Err(e) = self.loader.load(&self.registry, source.kind, &source.name, &artifact_path) {
                error!("failed to load {}/{}: {e}", source.kind, source.name);
                continue;
            }
            self.supervisor.register_source(source.name.clone(), source.source_dir.clone(), artifact_path).await;
        }

        cache.save()?;
        Ok(())
    }

    /// Start every background worker (hot-reload pool, supervisor loop,
    /// status control plane) and the HTTP server, then block until a
    /// shutdown signal arrives.
    pub async fn start(self) -> Result<()> {
        self.print_startup_banner();

        self.pool.start().await?;
        self.status_plane.clone().start().await?;

        let supervisor = self.supervisor.clone();
        let supervisor_handle = tokio::spawn(async move {
            supervisor.run().await;
        });

        let server = AfeServer::new(self.config.clone(), self.registry.clone(), self.orchestrator.clone(), self.status_plane.clone());
        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("HTTP server error: {e}");
            }
        });

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
            }
            _ = server_handle => {
                error!("HTTP server task unexpectedly stopped");
            }
        }

        info!("shutting down");
        self.status_plane.set_status(HostStatus::Stopping).await;

        self.supervisor.stop();
        supervisor_handle.abort();

        self.pool.stop().await;
        self.status_plane.stop().await;

        info!("shutdown complete");
        Ok(())
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn dirs(&self) -> &UserDirectories {
        &self.dirs
    }

    fn print_startup_banner(&self) {
        println!("\nAgentForgeEngine is running!");
        println!("────────────────────────────────────────────");
        println!("  Server: http://{}:{}", self.config.server.host, self.config.server.port);
        println!("  Agents: {}", self.registry.agent_count());
        println!("  Providers: {}", self.registry.provider_count());
        println!("────────────────────────────────────────────");
        println!("Press Ctrl+C to stop\n");
    }
}

/// The bounded grace window the `stop` CLI path waits for before
/// escalating to a forced termination signal.
pub const STOP_GRACE: Duration = Duration::from_secs(10);
