//! # Stage Workers
//!
//! Harness for the services that perform the actual work of a pipeline
//! step. A stage only has to implement [`StageProcessor`]; the
//! [`StageWorker`] binds it to its step's request event, runs it for each
//! delivery and publishes the step's completion event on success.
//!
//! [`WorkflowAdvancer`] closes the loop: it listens for completion events
//! and requests the next step, ending with `task.completed`.

mod advancer;
mod processor;
mod worker;

pub use advancer::WorkflowAdvancer;
pub use processor::{FnProcessor, PassthroughProcessor, StageProcessor};
pub use worker::{stage_queue_name, StageWorker};
