//! # Pipeline Bootstrap
//!
//! Composition root for a tracker process. Builds, in order:
//!
//! 1. Workflow registry from `workflow.nominal_durations`
//! 2. Database pool (bounded connect retry) and migrations
//! 3. Broker connection manager
//! 4. Task tracker, started before `bootstrap` returns
//!
//! [`PipelineSystem::bootstrap_with`] accepts a ready store and broker
//! provider, which is how tests run the whole system in memory.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::status::TaskStatusReport;
use super::task_tracker::TaskTracker;
use crate::config::PipelineConfig;
use crate::database::{run_migrations, DatabaseConnection};
use crate::error::PipelineResult;
use crate::messaging::service::RabbitMqConnector;
use crate::messaging::{BrokerProvider, ConnectionManager, EventPublisher};
use crate::store::{PgTaskStore, TaskStateStore};
use crate::workflow::WorkflowRegistry;

/// Running tracker process and the handles it was built from
pub struct PipelineSystem {
    config: PipelineConfig,
    registry: Arc<WorkflowRegistry>,
    connections: Arc<ConnectionManager>,
    store: Arc<dyn TaskStateStore>,
    tracker: Arc<TaskTracker>,
    database: Option<DatabaseConnection>,
}

/// Point-in-time view of a running system
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub broker: String,
    pub store: &'static str,
    pub tracker_queue: String,
    pub events_received: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub database_pool_size: Option<u32>,
}

impl std::fmt::Debug for PipelineSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSystem")
            .field("tracker", &self.tracker)
            .field("broker", &self.connections.provider().endpoint())
            .finish()
    }
}

impl PipelineSystem {
    /// Production wiring: PostgreSQL store and RabbitMQ
    pub async fn bootstrap(config: PipelineConfig) -> PipelineResult<Self> {
        info!("🚀 BOOTSTRAP: Starting pipeline system");
        config.validate()?;

        let database = DatabaseConnection::connect(&config.database).await?;
        if config.database.run_migrations {
            run_migrations(database.pool()).await?;
        }
        info!("✅ BOOTSTRAP: Database ready");

        let store: Arc<dyn TaskStateStore> = Arc::new(PgTaskStore::new(database.pool().clone()));
        let provider = BrokerProvider::RabbitMq(RabbitMqConnector::new(&config.broker));
        let mut system = Self::assemble(config, store, provider)?;
        system.database = Some(database);
        system.start();
        Ok(system)
    }

    /// Wiring with a caller-supplied store and broker
    pub fn bootstrap_with(
        config: PipelineConfig,
        store: Arc<dyn TaskStateStore>,
        provider: BrokerProvider,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let system = Self::assemble(config, store, provider)?;
        system.start();
        Ok(system)
    }

    fn assemble(
        config: PipelineConfig,
        store: Arc<dyn TaskStateStore>,
        provider: BrokerProvider,
    ) -> PipelineResult<Self> {
        let registry = Arc::new(config.workflow.registry()?);
        let connections = Arc::new(ConnectionManager::new(
            provider,
            config.broker.retry_policy(),
        ));
        info!(
            broker = %connections.provider().endpoint(),
            provider = connections.provider().provider_name(),
            "✅ BOOTSTRAP: Broker configured"
        );

        let tracker = Arc::new(TaskTracker::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&connections),
            &config,
        )?);

        Ok(Self {
            config,
            registry,
            connections,
            store,
            tracker,
            database: None,
        })
    }

    fn start(&self) {
        self.tracker.start();
        info!(
            queue = %self.tracker.queue_name(),
            store = self.store.store_name(),
            "✅ BOOTSTRAP: Pipeline system running"
        );
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<WorkflowRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connections)
    }

    pub fn tracker(&self) -> Arc<TaskTracker> {
        Arc::clone(&self.tracker)
    }

    /// Publisher on the configured exchange
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher::new(self.connections(), &self.config.broker.exchange)
    }

    pub async fn task_status(&self, task_id: &str) -> PipelineResult<Option<TaskStatusReport>> {
        self.tracker.get_status(task_id).await
    }

    pub fn status(&self) -> SystemStatus {
        let stats = self.tracker.consumer_stats();
        SystemStatus {
            running: self.tracker.is_running(),
            broker: self.connections.provider().endpoint().to_string(),
            store: self.store.store_name(),
            tracker_queue: self.tracker.queue_name().to_string(),
            events_received: stats.received(),
            events_processed: stats.processed(),
            events_failed: stats.failed(),
            database_pool_size: self.database.as_ref().map(|db| db.pool().size()),
        }
    }

    /// Stop the tracker and close the pool
    pub async fn shutdown(self) {
        info!("🛑 Shutting down pipeline system");
        self.tracker.stop().await;
        if let Some(database) = self.database {
            database.close().await;
        }
    }
}
