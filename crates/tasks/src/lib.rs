//! Task management with coordinated shutdown.
//!
//! Critical tasks are spawned with a [`ShutdownGuard`]; a task returning an
//! error (or a termination signal) triggers process-wide shutdown, after
//! which the remaining tasks get a bounded window to drain in-flight work
//! before being abandoned.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::{mpsc, watch, Mutex},
};
use tracing::{error, info, warn};

/// Receiver side of the shutdown signal, handed to every task.
#[derive(Clone, Debug)]
pub struct ShutdownGuard {
    rx: watch::Receiver<bool>,
}

impl ShutdownGuard {
    /// Whether shutdown has been requested; workers poll this between units
    /// of work.
    pub fn should_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Sender side; triggering is idempotent.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

struct TaskEvent {
    name: String,
    error: Option<anyhow::Error>,
}

/// Spawns critical tasks onto the runtime.
#[derive(Clone)]
pub struct TaskExecutor {
    handle: Handle,
    shutdown_tx: Arc<watch::Sender<bool>>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    spawned: Arc<AtomicUsize>,
}

impl TaskExecutor {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Spawns a named critical async task.  The task owns its guard; when it
    /// exits — cleanly or not — shutdown is triggered for everyone else.
    pub fn spawn_critical_async<F, Fut>(&self, name: &str, f: F)
    where
        F: FnOnce(ShutdownGuard) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let guard = self.shutdown_guard();
        let events_tx = self.events_tx.clone();
        let name = name.to_owned();
        self.spawned.fetch_add(1, Ordering::SeqCst);

        self.handle.spawn(async move {
            let result = f(guard).await;
            let error = result.err();
            if let Some(e) = &error {
                error!(task = %name, err = %e, "critical task failed");
            } else {
                info!(task = %name, "task finished");
            }
            let _ = events_tx.send(TaskEvent { name, error });
        });
    }
}

/// Owns the shutdown signal and the lifecycle of all critical tasks.
pub struct TaskManager {
    handle: Handle,
    shutdown_tx: Arc<watch::Sender<bool>>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<TaskEvent>>,
    spawned: Arc<AtomicUsize>,
}

impl TaskManager {
    pub fn new(handle: Handle) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            handle,
            shutdown_tx: Arc::new(shutdown_tx),
            events_tx,
            events_rx: Mutex::new(events_rx),
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            handle: self.handle.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            events_tx: self.events_tx.clone(),
            spawned: self.spawned.clone(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Listens for SIGINT/SIGTERM and triggers shutdown.
    pub fn start_signal_listeners(&self) {
        let signal = self.shutdown_signal();
        self.handle.spawn(async move {
            let sigterm = async {
                #[cfg(unix)]
                {
                    let mut term = tokio::signal::unix::signal(
                        tokio::signal::unix::SignalKind::terminate(),
                    )
                    .expect("install SIGTERM handler");
                    term.recv().await;
                }
                #[cfg(not(unix))]
                std::future::pending::<()>().await;
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm => info!("received SIGTERM"),
            }
            signal.trigger();
        });
    }

    /// Blocks until shutdown, then gives remaining tasks up to
    /// `drain_timeout` to finish.  Returns the first task error, if any.
    pub fn monitor(&self, drain_timeout: Option<Duration>) -> anyhow::Result<()> {
        self.handle.block_on(self.monitor_async(drain_timeout))
    }

    async fn monitor_async(&self, drain_timeout: Option<Duration>) -> anyhow::Result<()> {
        let mut events_rx = self.events_rx.lock().await;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut remaining = self.spawned.load(Ordering::SeqCst);
        let mut first_error: Option<anyhow::Error> = None;

        // Wait for the first exit or an external shutdown trigger.
        if !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                ev = events_rx.recv() => {
                    if let Some(ev) = ev {
                        remaining = remaining.saturating_sub(1);
                        if let Some(e) = ev.error {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
        }
        let _ = self.shutdown_tx.send(true);
        info!("shutting down, draining tasks");

        let drain_timeout = drain_timeout.unwrap_or(Duration::from_secs(10));
        let deadline = tokio::time::Instant::now() + drain_timeout;
        while remaining > 0 {
            match tokio::time::timeout_at(deadline, events_rx.recv()).await {
                Ok(Some(ev)) => {
                    remaining -= 1;
                    if let Some(e) = ev.error {
                        warn!(task = %ev.name, "task failed during drain");
                        first_error.get_or_insert(e);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(%remaining, "drain timeout reached, abandoning tasks");
                    break;
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
