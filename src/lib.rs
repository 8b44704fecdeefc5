#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Media Pipeline Core
//!
//! Orchestration core for a multi-stage media processing pipeline
//! (video download → frame extraction → labeling → model training →
//! deployment → inference) whose stages run as independent services that
//! talk only through events on a topic exchange.
//!
//! ## Architecture
//!
//! Producers and stage workers publish JSON envelopes to the durable
//! `events` exchange with the event type as routing key. Every consumer
//! declares its own durable queue and binds the event types it cares
//! about. The task tracker binds all workflow events and reconstructs
//! per-task progress from that unordered, replayable stream.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Envelope, broker providers, publisher and consumer loop
//! - [`workflow`] - Static mapping of event types to ordered steps
//! - [`models`] - Task and step state with their pure transitions
//! - [`store`] - Task state persistence (PostgreSQL and in-memory)
//! - [`database`] - Connection pool and migrations
//! - [`orchestration`] - Task tracker, status/ETA and the composition root
//! - [`stages`] - Stage worker harness and the workflow chain worker
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipeline_core::config::ConfigLoader;
//! use pipeline_core::orchestration::PipelineSystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let system = PipelineSystem::bootstrap(config).await?;
//!
//! if let Some(status) = system.task_status("t1").await? {
//!     println!("{} is {:.0}% done", status.task_id, status.progress * 100.0);
//! }
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit and integration tests run against the in-memory broker and store.
//! Tests that need RabbitMQ or PostgreSQL are `#[ignore]`d:
//!
//! ```bash
//! cargo test                      # in-memory suite
//! cargo test -- --ignored         # needs RabbitMQ and DATABASE_URL
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod stages;
pub mod store;
pub mod workflow;

pub use config::{ConfigLoader, PipelineConfig};
pub use constants::events;
pub use error::{PipelineError, PipelineResult};
pub use messaging::{
    BrokerProvider, ConnectionManager, EventConsumer, EventData, EventEnvelope, EventPublisher,
    FailurePolicy, InMemoryBroker, MessagingError, RetryPolicy,
};
pub use models::{StepStatus, Task, TaskStatus, TaskStep};
pub use orchestration::{PipelineSystem, TaskStatusReport, TaskTracker};
pub use stages::{PassthroughProcessor, StageProcessor, StageWorker, WorkflowAdvancer};
pub use store::{InMemoryTaskStore, PgTaskStore, TaskStateStore};
pub use workflow::{WorkflowRegistry, WorkflowStep};
