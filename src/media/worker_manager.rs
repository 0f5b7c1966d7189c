#![forbid(unsafe_code)]

// Worker pool management for mediasoup

use crate::media::config::{MediaConfig, WorkerConfig};
use crate::media::types::{MediaError, MediaResult};
use mediasoup::prelude::*;
use mediasoup::worker::WorkerId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Manages a pool of mediasoup Workers
pub struct WorkerManager {
    workers: RwLock<Vec<Worker>>,
    /// Routers currently hosted per worker
    worker_load: RwLock<HashMap<WorkerId, usize>>,
    _mediasoup_worker_manager: mediasoup::worker_manager::WorkerManager,
}

impl WorkerManager {
    /// Creates a new `WorkerManager` with the specified configuration
    ///
    /// # Errors
    /// Returns an error if worker creation fails
    pub async fn new(config: Arc<MediaConfig>) -> MediaResult<Self> {
        let num_workers = config.worker_config.num_workers.max(1);
        info!("Creating WorkerManager with {} workers", num_workers);

        let mediasoup_worker_manager = mediasoup::worker_manager::WorkerManager::new();
        let mut workers = Vec::with_capacity(num_workers);
        let mut worker_load = HashMap::new();

        for i in 0..num_workers {
            let worker = Self::create_worker(&config.worker_config, &mediasoup_worker_manager).await?;
            let worker_id = worker.id();
            info!("Created worker {} with id: {}", i, worker_id);

            Self::setup_worker_handlers(&worker, i);

            worker_load.insert(worker_id, 0);
            workers.push(worker);
        }

        Ok(Self {
            workers: RwLock::new(workers),
            worker_load: RwLock::new(worker_load),
            _mediasoup_worker_manager: mediasoup_worker_manager,
        })
    }

    async fn create_worker(
        config: &WorkerConfig,
        manager: &mediasoup::worker_manager::WorkerManager,
    ) -> MediaResult<Worker> {
        manager
            .create_worker(config.to_worker_settings())
            .await
            .map_err(|e| MediaError::Worker(format!("Failed to create worker: {e}")))
    }

    fn setup_worker_handlers(worker: &Worker, worker_index: usize) {
        let worker_id = worker.id();

        worker
            .on_dead(move |_reason| {
                error!("mediasoup worker {} (index {}) died", worker_id, worker_index);
            })
            .detach();
    }

    /// Picks the worker hosting the fewest routers and charges one router to it.
    ///
    /// # Errors
    /// Returns `MediaError::Worker` if no workers are available
    pub async fn get_least_loaded_worker(&self) -> MediaResult<(Worker, WorkerId)> {
        let workers = self.workers.read().await;
        let mut load = self.worker_load.write().await;

        let worker = workers
            .iter()
            .filter(|w| !w.closed())
            .min_by_key(|w| load.get(&w.id()).copied().unwrap_or(0))
            .cloned()
            .ok_or_else(|| MediaError::Worker("No workers available".to_string()))?;

        let worker_id = worker.id();
        let count = load.entry(worker_id).or_insert(0);
        *count += 1;

        debug!("Selected worker {} ({} routers)", worker_id, count);
        Ok((worker, worker_id))
    }

    /// Releases one router from a worker's load (called when a router is closed)
    pub async fn decrement_worker_load(&self, worker_id: WorkerId) {
        let mut load = self.worker_load.write().await;
        if let Some(count) = load.get_mut(&worker_id) {
            *count = count.saturating_sub(1);
            debug!("Decremented load for worker {} to {}", worker_id, *count);
        }
    }

    /// Gets the current load distribution across workers
    pub async fn get_load_distribution(&self) -> HashMap<WorkerId, usize> {
        self.worker_load.read().await.clone()
    }

    /// Gracefully shuts down all workers
    pub async fn shutdown(&self) {
        info!("Shutting down all workers");

        // Workers are closed when dropped
        self.workers.write().await.clear();
        self.worker_load.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_selection_balances_load() {
        let mut config = MediaConfig::default();
        config.worker_config.num_workers = 2;
        let manager = WorkerManager::new(Arc::new(config)).await.unwrap();

        let (_, first) = manager.get_least_loaded_worker().await.unwrap();
        let (_, second) = manager.get_least_loaded_worker().await.unwrap();
        assert_ne!(first, second);

        manager.decrement_worker_load(first).await;
        let load = manager.get_load_distribution().await;
        assert_eq!(load.get(&first), Some(&0));
        assert_eq!(load.get(&second), Some(&1));
    }
}
