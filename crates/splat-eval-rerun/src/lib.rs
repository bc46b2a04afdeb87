use serde::{Deserialize, Serialize};
use thiserror::Error;

mod guard;
mod recording;

pub use guard::TrackingGuard;
pub use recording::RerunTracking;

/// How a recording leaves the process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerunSink {
    /// Start a viewer and stream to it.
    #[default]
    Spawn,
    /// Stream to an already running viewer.
    Connect,
    /// Write an `.rrd` file next to the results.
    Save,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WandbConfig {
    pub project: String,
    pub entity: String,
    pub group: String,
    pub name: String,
    /// Also log the qualitative results of an evaluation.
    #[serde(default)]
    pub eval_save_qual: bool,
    #[serde(default)]
    pub sink: Option<RerunSink>,
}

/// Everything needed to start a tracked run.
#[derive(Clone, Debug)]
pub struct TrackingInit {
    pub project: String,
    pub entity: String,
    pub group: String,
    pub name: String,
    /// The full configuration of the run, recorded once at the start.
    pub config: serde_json::Value,
}

impl TrackingInit {
    pub fn new(wandb: &WandbConfig, name: String, config: serde_json::Value) -> Self {
        Self {
            project: wandb.project.clone(),
            entity: wandb.entity.clone(),
            group: wandb.group.clone(),
            name,
            config,
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Failed to create recording")]
    Recording(#[from] rerun::RecordingStreamError),

    #[error("Failed to serialize config")]
    Config(#[from] serde_json::Error),

    #[error("Run '{0}' is already finished")]
    Finished(String),
}

/// An open experiment run.
pub trait TrackingRun {
    fn name(&self) -> &str;

    fn log_scalar(&mut self, key: &str, step: u64, value: f64) -> Result<(), TrackingError>;

    fn log_text(&mut self, key: &str, text: &str) -> Result<(), TrackingError>;

    /// Flush and close the run. Logging afterwards fails.
    fn finish(&mut self) -> Result<(), TrackingError>;
}

/// Starts experiment runs.
pub trait TrackingService {
    fn open(&self, init: TrackingInit) -> Result<Box<dyn TrackingRun>, TrackingError>;
}
