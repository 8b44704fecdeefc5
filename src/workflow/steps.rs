use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline steps in their fixed execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Fetch the source video
    VideoDownload,
    /// Extract and curate frames from the downloaded video
    FrameExtraction,
    /// External labeling of the extracted frames
    Labeling,
    /// Train the pose model on the labeled data
    ModelTraining,
    /// Export and load the trained model into the inference server
    ModelDeployment,
    /// Run inference with the deployed model
    Inference,
}

impl WorkflowStep {
    /// All steps, in workflow order
    pub const ALL: [WorkflowStep; 6] = [
        Self::VideoDownload,
        Self::FrameExtraction,
        Self::Labeling,
        Self::ModelTraining,
        Self::ModelDeployment,
        Self::Inference,
    ];

    /// Persisted/wire name of the step
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VideoDownload => "video_download",
            Self::FrameExtraction => "frame_extraction",
            Self::Labeling => "labeling",
            Self::ModelTraining => "model_training",
            Self::ModelDeployment => "model_deployment",
            Self::Inference => "inference",
        }
    }

    /// Label shown to users of the status surface
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::VideoDownload => "Video download",
            Self::FrameExtraction => "Frame extraction",
            Self::Labeling => "Labeling",
            Self::ModelTraining => "Model training",
            Self::ModelDeployment => "Model deployment",
            Self::Inference => "Model inference",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("Invalid workflow step: {s}"))
    }
}
