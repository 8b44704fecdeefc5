//! # Orchestration
//!
//! Task progress tracking driven entirely by the event stream.
//!
//! ## Core Components
//!
//! - **TaskEventProcessor**: maps one envelope to one step observation and
//!   persists it through the [`TaskStateStore`](crate::store::TaskStateStore)
//! - **TaskTracker**: supervised consumer on the shared tracker queue plus
//!   the synchronous status query surface
//! - **ProgressEstimate / TaskStatusReport**: progress and ETA over nominal
//!   step durations, with the current step derived from completed steps
//! - **PipelineSystem**: composition root that wires config, database,
//!   broker and tracker together
//!
//! The tracker tolerates duplicate and out-of-order events: rows are
//! created lazily, step completion is monotonic, and a completed task
//! stays completed.

pub mod bootstrap;
pub mod event_processor;
pub mod status;
pub mod task_tracker;

pub use bootstrap::{PipelineSystem, SystemStatus};
pub use event_processor::TaskEventProcessor;
pub use status::{build_status_report, ProgressEstimate, StepReport, TaskStatusReport};
pub use task_tracker::TaskTracker;
