//! # Event Catalog and System Constants
//!
//! The fixed namespace of event types that travel on the bus, plus the
//! human-readable descriptions used when logging them. Routing keys are
//! dot-separated and hierarchical so topic bindings can address families of
//! events.

/// Name of the durable topic exchange every service publishes to
pub const EVENTS_EXCHANGE: &str = "events";

/// Durable queue shared by every task tracker instance in a deployment
pub const TASK_TRACKER_QUEUE: &str = "task_tracker";

/// Durable queue of the workflow chain worker
pub const WORKFLOW_WORKER_QUEUE: &str = "workflow_worker";

/// AMQP header carrying the number of times a message was redelivered by us
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Event types published on the bus
pub mod events {
    // Request facade
    pub const TASK_CREATED: &str = "task.created";
    pub const VIDEO_DOWNLOAD_REQUESTED: &str = "video.download.requested";
    pub const VIDEO_FRAMES_EXTRACTION_REQUESTED: &str = "video.frames.extraction.requested";
    pub const VIDEO_UPLOAD_REQUESTED: &str = "video.upload.requested";
    pub const TRAINING_REQUESTED: &str = "training.requested";
    pub const DEPLOYMENT_REQUESTED: &str = "deployment.requested";
    pub const INFERENCE_REQUESTED: &str = "inference.requested";

    // Video processor
    pub const VIDEO_DOWNLOADED: &str = "video.downloaded";
    pub const VIDEO_FRAMES_EXTRACTED: &str = "video.frames.extracted";

    // Labeling manager / monitor
    pub const LABELING_CREATED: &str = "labeling.created";
    pub const LABELING_COMPLETED: &str = "labeling.completed";

    // Model trainer
    pub const MODEL_TRAINING_REQUESTED: &str = "model.training.requested";
    pub const MODEL_TRAINING_COMPLETED: &str = "model.training.completed";

    // Model deployer
    pub const MODEL_DEPLOYMENT_REQUESTED: &str = "model.deployment.requested";
    pub const MODEL_DEPLOYMENT_COMPLETED: &str = "model.deployment.completed";

    // Model inference
    pub const MODEL_INFERENCE_REQUESTED: &str = "model.inference.requested";
    pub const MODEL_INFERENCE_COMPLETED: &str = "model.inference.completed";

    // Task lifecycle
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
}

/// Every cataloged event type with its description, in pipeline order
pub const EVENT_CATALOG: &[(&str, &str)] = &[
    (events::TASK_CREATED, "New task created"),
    (events::VIDEO_DOWNLOAD_REQUESTED, "Video download requested"),
    (events::VIDEO_DOWNLOADED, "Video download completed"),
    (
        events::VIDEO_FRAMES_EXTRACTION_REQUESTED,
        "Frame extraction requested",
    ),
    (events::VIDEO_FRAMES_EXTRACTED, "Frame extraction completed"),
    (events::VIDEO_UPLOAD_REQUESTED, "Video upload requested"),
    (events::LABELING_CREATED, "Labeling job requested"),
    (events::LABELING_COMPLETED, "Labeling job completed"),
    (events::TRAINING_REQUESTED, "Model training requested"),
    (events::MODEL_TRAINING_REQUESTED, "Model training requested"),
    (events::MODEL_TRAINING_COMPLETED, "Model training completed"),
    (events::DEPLOYMENT_REQUESTED, "Model deployment requested"),
    (events::MODEL_DEPLOYMENT_REQUESTED, "Model deployment requested"),
    (events::MODEL_DEPLOYMENT_COMPLETED, "Model deployment completed"),
    (events::INFERENCE_REQUESTED, "Model inference requested"),
    (events::MODEL_INFERENCE_REQUESTED, "Model inference requested"),
    (events::MODEL_INFERENCE_COMPLETED, "Model inference completed"),
    (events::TASK_COMPLETED, "Task completed"),
    (events::TASK_FAILED, "Task failed"),
];

/// Look up the description of a cataloged event type
pub fn event_description(event_type: &str) -> Option<&'static str> {
    EVENT_CATALOG
        .iter()
        .find(|(name, _)| *name == event_type)
        .map(|(_, description)| *description)
}

/// Description for log lines; unknown types are labelled as such
pub fn describe_event(event_type: &str) -> String {
    event_description(event_type)
        .map(str::to_string)
        .unwrap_or_else(|| format!("unknown event: {event_type}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_has_no_duplicates() {
        let names: HashSet<_> = EVENT_CATALOG.iter().map(|(name, _)| *name).collect();
        assert_eq!(names.len(), EVENT_CATALOG.len());
    }

    #[test]
    fn test_describe_known_and_unknown() {
        assert_eq!(
            describe_event(events::VIDEO_DOWNLOADED),
            "Video download completed"
        );
        assert_eq!(describe_event("video.exploded"), "unknown event: video.exploded");
    }
}
