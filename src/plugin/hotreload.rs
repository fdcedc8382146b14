//! Hot-reload worker pool: serializes unload+load pairs across a bounded
//! number of workers so the registry is never observed half-reloaded.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{AfeError, Result};
use crate::plugin::loader::PluginLoader;
use crate::plugin::registry::PluginRegistry;

const QUEUE_CAPACITY: usize = 100;
const WORKER_COUNT: usize = 4;

pub struct ReloadJob {
    pub kind: &'static str,
    pub name: String,
    pub source_dir: PathBuf,
    pub artifact_path: PathBuf,
    pub force: bool,
}

type Callback = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

pub struct HotReloadPool {
    registry: PluginRegistry,
    loader: Arc<PluginLoader>,
    sender: Arc<tokio::sync::RwLock<Option<mpsc::Sender<ReloadJob>>>>,
    running: AtomicBool,
    callbacks: DashMap<String, Callback>,
}

impl HotReloadPool {
    pub fn new(registry: PluginRegistry, loader: Arc<PluginLoader>) -> Self {
        Self {
            registry,
            loader,
            sender: Arc::new(tokio::sync::RwLock::new(None)),
            running: AtomicBool::new(false),
            callbacks: DashMap::new(),
        }
    }

    /// Transition from inactive to active: allocate the bounded queue and
    /// spawn `WORKER_COUNT` workers. Idempotent: a second call errors.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AfeError::config("hot-reload pool already running"));
        }

        let (tx, rx) = mpsc::channel::<ReloadJob>(QUEUE_CAPACITY);
        *self.sender.write().await = Some(tx);

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..WORKER_COUNT {
            let rx = rx.clone();
            let registry = self.registry.clone();
            let loader = self.loader.clone();
            let callbacks = self.callbacks.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = job else {
                        info!("hot-reload worker {worker_id} exiting: queue closed");
                        break;
                    };
                    run_job(&registry, &loader, &callbacks, job).await;
                }
            });
        }

        info!("hot-reload pool started with {WORKER_COUNT} workers");
        Ok(())
    }

    /// Enqueue a reload job. Returns immediately; never blocks for the
    /// duration of the reload itself.
    pub async fn reload(&self, kind: &'static str, name: String, source_dir: PathBuf, artifact_path: PathBuf, force: bool) -> Result<()> {
        let guard = self.sender.read().await;
        let Some(sender) = guard.as_ref() else {
            return Err(AfeError::config("pool stopping"));
        };

        sender
            .try_send(ReloadJob { kind, name, source_dir, artifact_path, force })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AfeError::config("queue full"),
                mpsc::error::TrySendError::Closed(_) => AfeError::config("pool stopping"),
            })
    }

    /// Close the queue; workers drain their remaining jobs and exit. A
    /// second call is a no-op.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.sender.write().await.take();
        info!("hot-reload pool stopping, workers will drain remaining jobs");
    }

    pub fn register_callback(&self, id: impl Into<String>, callback: Callback) {
        self.callbacks.insert(id.into(), callback);
    }

    pub fn unregister_callback(&self, id: &str) {
        self.callbacks.remove(id);
    }
}

async fn run_job(registry: &PluginRegistry, loader: &PluginLoader, callbacks: &DashMap<String, Callback>, job: ReloadJob) {
    let started = Instant::now();
    info!("reloading {}/{}", job.kind, job.name);

    if let Err(e) = loader.unload(registry, job.kind, &job.name).await {
        warn!("unload step failed for {}/{}: {e}", job.kind, job.name);
    }

    if let Err(e) = loader.load(registry, job.kind, &job.name, &job.artifact_path) {
        warn!("load step failed for {}/{}: {e}", job.kind, job.name);
        notify(callbacks, &job.name, Some(&e.to_string()));
        return;
    }

    let elapsed = started.elapsed();
    info!("reloaded {}/{} in {:?}", job.kind, job.name, elapsed);
    notify(callbacks, &job.name, None);
}

fn notify(callbacks: &DashMap<String, Callback>, name: &str, error: Option<&str>) {
    for entry in callbacks.iter() {
        (entry.value())(name, error);
    }
}
