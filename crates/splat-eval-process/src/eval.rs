use std::{collections::BTreeMap, fmt, path::PathBuf};

use burn::prelude::Backend;
use serde::Serialize;
use splat_eval_dataset::DatasetAdapter;
use splat_eval_rerun::TrackingRun;
use splat_eval_scene::SceneParams;

/// Which views of a dataset an evaluation covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// The views the scene was mapped from.
    Train,
    /// Held-out novel views.
    Nvs,
}

impl Split {
    pub fn from_train_flag(use_train_split: bool) -> Self {
        if use_train_split { Self::Train } else { Self::Nvs }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Train => "eval_train",
            Self::Nvs => "eval_nvs",
        }
    }

    pub fn run_suffix(self) -> &'static str {
        match self {
            Self::Train => "_Train_Split",
            Self::Nvs => "_NVS_Split",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => f.write_str("train"),
            Self::Nvs => f.write_str("nvs"),
        }
    }
}

/// Settings shared by both evaluation routines.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvalArgs {
    pub num_frames: usize,
    pub eval_dir: PathBuf,
    pub sil_thres: f32,
    /// Also send qualitative results to the tracked run.
    pub save_qualitative: bool,
    pub mapping_iters: u32,
    pub add_new_gaussians: bool,
    pub load_semantics: bool,
    pub eval_every: u32,
    /// Write the evaluated frames to `eval_dir`.
    pub save_frames: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EvalReport {
    pub frames_evaluated: usize,
    pub num_gaussians: usize,
    pub metrics: BTreeMap<String, f64>,
}

/// Scores a scene against the frames of a dataset.
///
/// Both routines run on parameters that don't track gradients, and only log to `tracking`
/// when it is given.
pub trait EvalRoutine<B: Backend> {
    fn eval_train(
        &mut self,
        dataset: &dyn DatasetAdapter<B>,
        params: &SceneParams<B>,
        args: &EvalArgs,
        tracking: Option<&mut dyn TrackingRun>,
    ) -> anyhow::Result<EvalReport>;

    fn eval_nvs(
        &mut self,
        dataset: &dyn DatasetAdapter<B>,
        params: &SceneParams<B>,
        args: &EvalArgs,
        tracking: Option<&mut dyn TrackingRun>,
    ) -> anyhow::Result<EvalReport>;
}
