use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::Context;
use burn::{backend::Autodiff, prelude::Backend};
use splat_eval_dataset::{DataConfig, DatasetArgs, DatasetKind, load_dataset};
use splat_eval_rerun::{TrackingGuard, TrackingInit, TrackingService};
use splat_eval_scene::SEMANTIC_IDS_KEY;
use splat_eval_serde::load_scene_params;
use tracing::trace_span;

use crate::{
    config::{ConfigError, RunConfig},
    eval::{EvalArgs, EvalReport, EvalRoutine, Split},
    paths::{RunPaths, tracking_name},
};

/// A config document together with where it was read from.
#[derive(Clone, Debug)]
pub struct Experiment {
    pub path: PathBuf,
    pub config: RunConfig,
}

impl Experiment {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = RunConfig::from_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }
}

#[derive(Clone, Debug)]
pub struct EvalOutcome {
    pub split: Split,
    pub eval_dir: PathBuf,
    pub report: EvalReport,
}

/// Resolve how many frames to evaluate. Negative counts mean all frames.
fn resolve_num_frames(requested: i64, available: usize) -> usize {
    match usize::try_from(requested) {
        Err(_) => available,
        Ok(n) if n > available => {
            log::warn!("Requested {n} frames but the dataset only has {available}");
            available
        }
        Ok(n) => n,
    }
}

/// Copying a file onto itself truncates it.
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Evaluate the scene of a finished mapping run.
///
/// The scene parameters are loaded as optimizable tensors, but evaluation only ever sees
/// their gradient free view.
pub fn run_evaluation<B: Backend>(
    experiment: &Experiment,
    device: &B::Device,
    routine: &mut dyn EvalRoutine<B>,
    tracking: &dyn TrackingService,
) -> anyhow::Result<EvalOutcome> {
    let config = &experiment.config;

    log::info!("Using seed {}", config.seed);
    <B as Backend>::seed(device, config.seed);

    let paths = RunPaths::new(config);
    if config.load_checkpoint {
        if !paths.results_dir.exists() {
            log::warn!(
                "Resuming run, but {} does not exist",
                paths.results_dir.display()
            );
        }
    } else {
        std::fs::create_dir_all(&paths.results_dir).with_context(|| {
            format!("Failed to create {}", paths.results_dir.display())
        })?;
        let copy = paths.config_copy(&experiment.path);
        if is_same_file(&experiment.path, &copy) {
            log::info!("Evaluating from the saved config {}", copy.display());
        } else {
            std::fs::copy(&experiment.path, &copy)
                .with_context(|| format!("Failed to copy config to {}", copy.display()))?;
        }
    }

    let data = &config.data;
    let kind = DatasetKind::from_name(&data.dataset_name)?;
    let data_config = if kind.uses_data_config() {
        data.data_config()?
    } else {
        DataConfig::new(data.dataset_name.clone())
    };

    let dataset = {
        let _span = trace_span!("Load dataset").entered();
        load_dataset(kind, &data_config, DatasetArgs::from_config(data, device.clone()))
            .context("Failed to load dataset")?
    };
    let num_frames = resolve_num_frames(data.num_frames, dataset.len());

    let exclude: HashSet<String> = if data.has_semantics_key() {
        HashSet::from([SEMANTIC_IDS_KEY.to_owned()])
    } else {
        HashSet::new()
    };
    log::info!("Loading scene from {}", paths.scene_path.display());
    let params = load_scene_params::<Autodiff<B>>(&paths.scene_path, &exclude, device)
        .with_context(|| format!("Failed to load {}", paths.scene_path.display()))?;
    log::info!(
        "Loaded {} parameters, {} gaussians",
        params.len(),
        params.num_gaussians()
    );

    let split = Split::from_train_flag(data.use_train_split);
    let eval_dir = paths.eval_dir(split);

    let args = EvalArgs {
        num_frames,
        eval_dir: eval_dir.clone(),
        sil_thres: config.mapping.sil_thres,
        save_qualitative: config.use_wandb
            && config.wandb.as_ref().is_some_and(|w| w.eval_save_qual),
        mapping_iters: config.mapping.num_iters,
        add_new_gaussians: config.mapping.add_new_gaussians,
        load_semantics: data.load_semantics(),
        eval_every: config.eval_every,
        save_frames: true,
    };

    let mut guard = if config.use_wandb {
        let wandb = config
            .wandb
            .as_ref()
            .ok_or(ConfigError::MissingTracking)?;
        let init = TrackingInit::new(
            wandb,
            tracking_name(&wandb.name, split),
            serde_json::to_value(config)?,
        );
        Some(TrackingGuard::new(
            tracking.open(init).context("Failed to start tracking run")?,
        ))
    } else {
        None
    };

    log::info!("Evaluating {split} split into {}", eval_dir.display());
    let report = {
        let _span = trace_span!("Evaluate").entered();
        let valid = params.valid();
        let run = guard.as_mut().and_then(TrackingGuard::run_mut);
        match split {
            Split::Train => routine.eval_train(dataset.as_ref(), &valid, &args, run),
            Split::Nvs => routine.eval_nvs(dataset.as_ref(), &valid, &args, run),
        }
    }
    .with_context(|| format!("Failed to evaluate {split} split"))?;

    if let Some(guard) = guard {
        guard.finish().context("Failed to finish tracking run")?;
    }

    Ok(EvalOutcome {
        split,
        eval_dir,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_frame_count_means_all() {
        assert_eq!(resolve_num_frames(-1, 12), 12);
        assert_eq!(resolve_num_frames(-7, 12), 12);
    }

    #[test]
    fn frame_count_is_clamped() {
        assert_eq!(resolve_num_frames(5, 12), 5);
        assert_eq!(resolve_num_frames(12, 12), 12);
        assert_eq!(resolve_num_frames(40, 12), 12);
        assert_eq!(resolve_num_frames(0, 12), 0);
    }
}
