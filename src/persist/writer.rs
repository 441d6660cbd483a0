//! Background task that commits engine state after every mutation.

use crate::engine::Engine;

use super::Persistence;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Commits engine state to a backend off the request path.
///
/// Mutations only signal the engine's dirty flag; bursts of ingests collapse
/// into a single commit. A failed commit is logged and recorded as the
/// engine's persistence warning, then the writer waits for the next signal.
pub struct PersistWriter {
    engine: Arc<Engine>,
    backend: Arc<dyn Persistence>,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PersistWriter {
    pub fn new(engine: Arc<Engine>, backend: Arc<dyn Persistence>) -> Self {
        Self {
            engine,
            backend,
            stop: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Start the writer background task.
    pub async fn start(&self) {
        let mut stop_guard = self.stop.lock().await;
        if stop_guard.is_some() {
            return; // Already running
        }

        let (tx, mut rx) = broadcast::channel(1);
        *stop_guard = Some(tx);

        let engine = self.engine.clone();
        let backend = self.backend.clone();
        let dirty = engine.dirty_signal();

        tracing::info!("PersistWriter: Starting with {} backend", backend.name());

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = dirty.notified() => {
                        commit_state(&engine, &backend).await;
                    }
                }
            }

            // Final flush so nothing accepted before shutdown is lost.
            commit_state(&engine, &backend).await;
            tracing::info!("PersistWriter: Stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop the writer and wait for its final flush.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("PersistWriter: Task failed: {}", e);
            }
        }
    }
}

async fn commit_state(engine: &Arc<Engine>, backend: &Arc<dyn Persistence>) {
    let engine = engine.clone();
    let backend = backend.clone();

    let result = tokio::task::spawn_blocking(move || engine.flush(backend.as_ref())).await;
    if let Err(e) = result {
        tracing::error!("PersistWriter: Commit task failed: {}", e);
    }
}
