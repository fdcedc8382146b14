use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use agentforge_engine::accounts::AccountStore;
use agentforge_engine::build::BuildPlanner;
use agentforge_engine::cache::BuildCache;
use agentforge_engine::config::AfeConfig;
use agentforge_engine::engine::{Engine, STOP_GRACE};
use agentforge_engine::model_adapter::HttpModelAdapter;
use agentforge_engine::orchestrator::{ChatOrchestrator, ChatRequest};
use agentforge_engine::paths::UserDirectories;
use agentforge_engine::plugin::discovery;
use agentforge_engine::plugin::hotreload::HotReloadPool;
use agentforge_engine::plugin::loader::PluginLoader;
use agentforge_engine::plugin::registry::PluginRegistry;
use agentforge_engine::status::{self};
use agentforge_engine::{AfeError, Result};

#[derive(Parser)]
#[command(name = "agentforge")]
#[command(about = "Host process for dynamically loaded agent/provider plugins")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity; repeat for more (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ~/.afe directory layout and migrate legacy plugins
    Init {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        migrate: bool,
    },

    /// Build provider and/or agent plugins
    Build {
        #[command(subcommand)]
        target: BuildTarget,
    },

    /// Inspect or clear the build cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the host process (HTTP server + background workers)
    Start {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Gracefully stop a running host process
    Stop,

    /// Print the running host's status
    Status,

    /// Trigger a hot reload of one or all plugins
    Reload {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Manage user accounts and API keys
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Send one chat message to the running (or embedded) orchestrator
    Chat {
        #[arg(short, long)]
        message: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum BuildTarget {
    Providers {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        clean: bool,
    },
    Agents {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        clean: bool,
    },
    All {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        clean: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Status,
    Clean {
        #[arg(long)]
        force: bool,
    },
    Validate,
}

#[derive(Subcommand)]
enum UserAction {
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    ApiKey {
        #[command(subcommand)]
        action: ApiKeyAction,
    },
}

#[derive(Subcommand)]
enum ApiKeyAction {
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        label: String,
    },
    List {
        #[arg(long)]
        username: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command).await {
        eprintln!("{} {e}", "[error]".red().bold());
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "agentforge_engine=info,agentforge=info",
        1 => "agentforge_engine=debug,agentforge=debug",
        _ => "agentforge_engine=trace,agentforge=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Init { force, migrate } => cmd_init(force, migrate).await,
        Commands::Build { target } => cmd_build(target).await,
        Commands::Cache { action } => cmd_cache(action).await,
        Commands::Start { config } => cmd_start(config).await,
        Commands::Stop => cmd_stop().await,
        Commands::Status => cmd_status().await,
        Commands::Reload { agent, all } => cmd_reload(agent, all).await,
        Commands::User { action } => cmd_user(action).await,
        Commands::Chat { message, model, output, timeout } => cmd_chat(message, model, output, timeout).await,
    }
}

async fn cmd_init(force: bool, migrate: bool) -> Result<()> {
    println!("🚀 initializing AgentForgeEngine directories");
    let dirs = UserDirectories::new()?;

    if force && dirs.root().exists() {
        println!("⚠️  --force given, removing existing {}", dirs.root().display());
        std::fs::remove_dir_all(dirs.root())?;
    }

    dirs.ensure()?;
    println!("✅ directory layout ready at {}", dirs.root().display());

    if migrate {
        println!("🔄 legacy ./plugins migration runs automatically on ensure()");
    }

    Ok(())
}

async fn cmd_build(target: BuildTarget) -> Result<()> {
    let dirs = UserDirectories::new()?;
    dirs.ensure()?;
    let config = AfeConfig::load(&dirs)?;

    let (kind_label, force, clean, name_filter): (&str, bool, bool, Option<String>) = match &target {
        BuildTarget::Providers { name, force, clean } => ("providers", *force, *clean, name.clone()),
        BuildTarget::Agents { name, force, clean } => ("agents", *force, *clean, name.clone()),
        BuildTarget::All { force, clean } => ("all", *force, *clean, None),
    };

    let cache_path = dirs.cache_file();
    if clean && cache_path.exists() {
        println!("🧹 clean requested, discarding cache entries before build");
        std::fs::remove_file(&cache_path)?;
    }
    let mut cache = BuildCache::load(cache_path);
    let planner = BuildPlanner::new(dirs.clone(), config.build.clone());

    let mut sources = Vec::new();
    if kind_label == "providers" || kind_label == "all" {
        sources.extend(discovery::scan_source_tree(&dirs.providers_dir(), "provider")?);
    }
    if kind_label == "agents" || kind_label == "all" {
        sources.extend(discovery::scan_source_tree(&dirs.agents_dir(), "agent")?);
    }

    if let Some(name) = &name_filter {
        sources.retain(|s| &s.name == name);
        if sources.is_empty() {
            return Err(AfeError::PluginNotFound(name.clone()));
        }
    }

    let started = std::time::Instant::now();
    let mut built = Vec::new();
    let mut cached = Vec::new();
    let mut any_failed = false;

    for source in &sources {
        match planner.build_one(&mut cache, source.kind, &source.name, &source.source_dir, force).await {
            Ok(true) => {
                println!("🔨 {}/{} built", source.kind, source.name);
                built.push(source.name.clone());
            }
            Ok(false) => {
                println!("📦 {}/{} up to date, reused cache", source.kind, source.name);
                cached.push(source.name.clone());
            }
            Err(e) => {
                eprintln!("❌ {}/{} failed: {e}", source.kind, source.name);
                any_failed = true;
            }
        }
    }

    let total_ms = started.elapsed().as_millis() as u64;
    cache.record_history(kind_label, built.clone(), cached.clone(), total_ms, !any_failed);
    cache.save()?;

    println!("✅ build complete in {total_ms}ms ({} built, {} cached)", built.len(), cached.len());
    if any_failed {
        return Err(AfeError::config("one or more plugins failed to build"));
    }
    Ok(())
}

async fn cmd_cache(action: CacheAction) -> Result<()> {
    let dirs = UserDirectories::new()?;
    dirs.ensure()?;

    match action {
        CacheAction::Status => {
            let cache = BuildCache::load(dirs.cache_file());
            println!("📊 build cache: {} entries, {} history records", cache.entries().len(), cache.history().len());
            for (key, entry) in cache.entries() {
                println!(
                    "   {key}: built_at={}, build_count={}, valid={}",
                    entry.built_at, entry.build_count, entry.cache_valid
                );
            }
        }
        CacheAction::Clean { force } => {
            if !force {
                println!("⚠️  pass --force to actually delete the cache file");
                return Ok(());
            }
            let path = dirs.cache_file();
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            println!("🧹 cache cleared at {}", path.display());
        }
        CacheAction::Validate => {
            let cache = BuildCache::load(dirs.cache_file());
            let mut invalid = 0;
            for (key, entry) in cache.entries() {
                if !entry.cache_valid || !entry.output_path.exists() {
                    println!("   ⚠️  {key}: stale or missing artifact");
                    invalid += 1;
                }
            }
            if invalid == 0 {
                println!("✅ cache is fully valid");
            } else {
                println!("⚠️  {invalid} stale entr{}", if invalid == 1 { "y" } else { "ies" });
            }
        }
    }
    Ok(())
}

async fn cmd_start(config_path: Option<PathBuf>) -> Result<()> {
    println!("🚀 Starting AgentForgeEngine...");

    let dirs = UserDirectories::new()?;
    dirs.ensure()?;

    if status::is_running(&dirs) {
        return Err(AfeError::config("a host process is already running; use `stop` first"));
    }

    let config = if let Some(path) = config_path {
        let contents = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(&contents)?
    } else {
        AfeConfig::load(&dirs)?
    };

    println!("✅ configuration loaded");

    let engine = Engine::new(config).await?;
    println!("✅ engine initialized, loading plugins...");
    engine.load_all_plugins().await?;
    println!(
        "✅ plugins loaded: {} agent(s), {} provider(s)",
        engine.registry().agent_count(),
        engine.registry().provider_count()
    );

    engine.start().await
}

async fn cmd_stop() -> Result<()> {
    let dirs = UserDirectories::new()?;
    if !status::is_running(&dirs) {
        println!("ℹ️  no running host process found");
        return Ok(());
    }

    println!("🛑 sending shutdown signal...");
    status::graceful_stop(&dirs, STOP_GRACE).await?;
    println!("✅ host process stopped");
    Ok(())
}

async fn cmd_status() -> Result<()> {
    use tokio::io::AsyncReadExt;

    let dirs = UserDirectories::new()?;
    if !status::is_running(&dirs) {
        println!("⚫ AgentForgeEngine is not running");
        return Ok(());
    }

    let socket_path = dirs.socket_file();
    let mut stream = tokio::net::UnixStream::connect(&socket_path).await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;

    let info: serde_json::Value = serde_json::from_slice(&buf)?;
    println!("🟢 AgentForgeEngine status:");
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn cmd_reload(agent: Option<String>, all: bool) -> Result<()> {
    let dirs = UserDirectories::new()?;
    dirs.ensure()?;
    let config = AfeConfig::load(&dirs)?;

    let registry = PluginRegistry::new();
    let loader = std::sync::Arc::new(PluginLoader::new());
    let pool = std::sync::Arc::new(HotReloadPool::new(registry.clone(), loader.clone()));
    pool.start().await?;

    let planner = BuildPlanner::new(dirs.clone(), config.build.clone());
    let mut sources = discovery::discover_local(&config.agents.local);
    sources.extend(discovery::discover_remote(&planner, &config.agents.remote).await);

    if let Some(name) = &agent {
        sources.retain(|s| &s.name == name);
        if sources.is_empty() {
            return Err(AfeError::PluginNotFound(name.clone()));
        }
    } else if !all {
        return Err(AfeError::config("pass --agent NAME or --all"));
    }

    for source in &sources {
        let artifact_path = planner.artifact_path(source.kind, &source.name);
        pool.reload(source.kind, source.name.clone(), source.source_dir.clone(), artifact_path, true).await?;
        println!("🔄 reload enqueued for {}/{}", source.kind, source.name);
    }

    // Give workers a moment to drain before the process exits.
    tokio::time::sleep(Duration::from_millis(500)).await;
    pool.stop().await;
    println!("✅ reload request(s) submitted");
    Ok(())
}

async fn cmd_user(action: UserAction) -> Result<()> {
    let dirs = UserDirectories::new()?;
    dirs.ensure()?;
    let store = AccountStore::new(&dirs);

    match action {
        UserAction::Create { username, password } => {
            store.create(&username, &password)?;
            println!("✅ account '{username}' created");
        }
        UserAction::Login { username, password } => {
            if store.login(&username, &password)? {
                println!("✅ login succeeded for '{username}'");
            } else {
                println!("❌ login failed for '{username}'");
                return Err(AfeError::config("invalid credentials"));
            }
        }
        UserAction::ApiKey { action } => match action {
            ApiKeyAction::Create { username, label } => {
                let token = store.api_key_create(&username, &label)?;
                println!("✅ API key created for '{username}' (label: {label})");
                println!("🔑 {token}");
                println!("   this token is shown only once, store it now");
            }
            ApiKeyAction::List { username } => {
                let keys = store.api_key_list(&username)?;
                if keys.is_empty() {
                    println!("ℹ️  no API keys for '{username}'");
                } else {
                    for key in keys {
                        println!("   {} [{}] created {}", key.label, key.id, key.created_at);
                    }
                }
            }
        },
    }
    Ok(())
}

async fn cmd_chat(message: String, model: Option<String>, output: Option<PathBuf>, timeout: u64) -> Result<()> {
    let dirs = UserDirectories::new()?;
    dirs.ensure()?;
    let config = AfeConfig::load(&dirs)?;

    let registry = PluginRegistry::new();
    for model in &config.models {
        registry.insert_provider(model.name.clone(), std::sync::Arc::new(HttpModelAdapter::from_config(model)))?;
    }
    let loader = PluginLoader::new();

    let planner = BuildPlanner::new(dirs.clone(), config.build.clone());
    let mut sources = discovery::discover_local(&config.agents.local);
    sources.extend(discovery::discover_remote(&planner, &config.agents.remote).await);

    let mut cache = BuildCache::load(dirs.cache_file());
    for source in &sources {
        match planner.build_one(&mut cache, source.kind, &source.name, &source.source_dir, false).await {
            Ok(_) => {
                let artifact_path = planner.artifact_path(source.kind, &source.name);
                if let Err(e) = loader.load(&registry, source.kind, &source.name, &artifact_path) {
                    eprintln!("❌ {}/{} failed to load: {e}", source.kind, source.name);
                }
            }
            Err(e) => eprintln!("❌ {}/{} failed to build: {e}", source.kind, source.name),
        }
    }
    cache.save()?;

    // SPEC_FULL.md §4.5 step 1: the chat orchestrator's default model is the
    // fixed string "llamacpp"; `--model` overrides it per request instead.
    let orchestrator = ChatOrchestrator::new(registry, "llamacpp");

    let request = ChatRequest { message, model, verbosity: 0, timeout_sec: timeout };
    let response = tokio::time::timeout(Duration::from_secs(timeout), orchestrator.chat(request))
        .await
        .map_err(|_| AfeError::Cancellation)??;

    let rendered = serde_json::to_string_pretty(&response)?;
    if let Some(path) = output {
        std::fs::write(&path, &rendered)?;
        println!("📝 response written to {}", path.display());
    } else {
        println!("{}", response.message);
        if !response.function_calls.is_empty() {
            println!("\n🔧 tool calls:");
            for call in &response.function_calls {
                let ok = call.response.as_ref().map(|r| r.success).unwrap_or(false);
                let icon = if ok { "✅" } else { "❌" };
                println!("   {icon} {} ({}ms)", call.name, call.duration_ms);
            }
        }
    }

    std::io::stdout().flush().ok();
    Ok(())
}
