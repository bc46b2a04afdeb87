use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use burn::{prelude::Backend, tensor::Tensor};
use glam::Mat4;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use splat_eval_dataset::DatasetAdapter;
use splat_eval_rerun::TrackingRun;
use splat_eval_scene::{SceneParams, validation::ValueStats};
use tracing::trace_span;

use crate::eval::{EvalArgs, EvalReport, EvalRoutine, Split};

pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseSource {
    /// Camera pose estimated while mapping.
    Params,
    Dataset,
}

#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub index: usize,
    pub pose_source: PoseSource,
    /// Camera to world, column major.
    pub pose: [f32; 16],
    pub gt_color: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub split: Split,
    pub args: EvalArgs,
    pub num_gaussians: usize,
    pub frames: Vec<FrameRecord>,
    pub param_stats: BTreeMap<String, ValueStats>,
}

/// Walks the frames an evaluation covers and records what would be scored, without rendering.
///
/// Writes `manifest.json` into the eval directory, along with the ground truth frames when
/// `save_frames` is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifestEval;

impl ManifestEval {
    fn evaluate<B: Backend>(
        split: Split,
        dataset: &dyn DatasetAdapter<B>,
        params: &SceneParams<B>,
        args: &EvalArgs,
        tracking: Option<&mut dyn TrackingRun>,
    ) -> anyhow::Result<EvalReport> {
        let _span = trace_span!("Evaluate", %split).entered();

        std::fs::create_dir_all(&args.eval_dir)
            .with_context(|| format!("Failed to create {}", args.eval_dir.display()))?;

        let gt_dir = args.eval_dir.join("gt_rgb");
        if args.save_frames {
            std::fs::create_dir_all(&gt_dir)
                .with_context(|| format!("Failed to create {}", gt_dir.display()))?;
        }

        let indices: Vec<usize> = (0..args.num_frames.min(dataset.len()))
            .step_by(args.eval_every.max(1) as usize)
            .collect();

        // Estimated poses only exist for the frames the scene was mapped from.
        let estimated_poses = if split == Split::Train {
            params.camera_poses().unwrap_or_else(|e| {
                log::warn!("Failed to read estimated poses, using dataset poses: {e}");
                None
            })
        } else {
            None
        };

        let progress = ProgressBar::new(indices.len() as u64)
            .with_style(
                ProgressStyle::with_template(
                    "[{elapsed}] {bar:40.cyan/blue} {pos:>5}/{len:5} {msg} ({eta} remaining)",
                )
                .expect("Invalid indicatif config")
                .progress_chars("◍○○"),
            )
            .with_message(format!("Evaluating {split} frames"));

        let mut frames = Vec::with_capacity(indices.len());
        for &index in &indices {
            let frame = dataset
                .get(index)
                .with_context(|| format!("Failed to load frame {index}"))?;

            let estimated = estimated_poses.as_ref().and_then(|poses| {
                let pose = poses.get(index).copied();
                if pose.is_none() {
                    log::warn!("No estimated pose for frame {index}, using dataset pose");
                }
                pose
            });
            let (pose_source, pose) = match estimated {
                Some(pose) => (PoseSource::Params, pose),
                None => (PoseSource::Dataset, frame.pose),
            };

            let gt_color = if args.save_frames {
                let path = gt_dir.join(format!("gt_{index:04}.png"));
                save_color(frame.color, &path)?;
                Some(path)
            } else {
                None
            };

            frames.push(FrameRecord {
                index,
                pose_source,
                pose: pose_array(pose),
                gt_color,
            });
            progress.inc(1);
        }
        progress.finish_and_clear();

        let param_stats = params.validate_values();
        let invalid = param_stats.values().filter(|s| !s.is_finite()).count();
        if invalid > 0 {
            log::warn!("{invalid} parameters contain non-finite values");
        }

        let num_gaussians = params.num_gaussians();
        let manifest = Manifest {
            split,
            args: args.clone(),
            num_gaussians,
            frames,
            param_stats,
        };
        let manifest_path = args.eval_dir.join(MANIFEST_NAME);
        let file = std::fs::File::create(&manifest_path)
            .with_context(|| format!("Failed to create {}", manifest_path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &manifest)?;

        let report = EvalReport {
            frames_evaluated: manifest.frames.len(),
            num_gaussians,
            metrics: BTreeMap::from([("invalid_params".to_owned(), invalid as f64)]),
        };

        if let Some(run) = tracking {
            run.log_scalar(&format!("{split}/frames_evaluated"), 0, report.frames_evaluated as f64)?;
            run.log_scalar(&format!("{split}/num_gaussians"), 0, num_gaussians as f64)?;
            if args.save_qualitative {
                let summary = serde_json::to_string_pretty(&manifest)?;
                run.log_text(&format!("{split}/manifest"), &summary)?;
            }
        }

        log::info!(
            "Evaluated {} {split} frames of a scene with {num_gaussians} gaussians",
            report.frames_evaluated
        );
        Ok(report)
    }
}

impl<B: Backend> EvalRoutine<B> for ManifestEval {
    fn eval_train(
        &mut self,
        dataset: &dyn DatasetAdapter<B>,
        params: &SceneParams<B>,
        args: &EvalArgs,
        tracking: Option<&mut dyn TrackingRun>,
    ) -> anyhow::Result<EvalReport> {
        Self::evaluate(Split::Train, dataset, params, args, tracking)
    }

    fn eval_nvs(
        &mut self,
        dataset: &dyn DatasetAdapter<B>,
        params: &SceneParams<B>,
        args: &EvalArgs,
        tracking: Option<&mut dyn TrackingRun>,
    ) -> anyhow::Result<EvalReport> {
        Self::evaluate(Split::Nvs, dataset, params, args, tracking)
    }
}

fn pose_array(pose: Mat4) -> [f32; 16] {
    pose.to_cols_array()
}

fn save_color<B: Backend>(color: Tensor<B, 3>, path: &Path) -> anyhow::Result<()> {
    let [height, width, _] = color.dims();
    let values = color
        .clamp(0.0, 1.0)
        .into_data()
        .convert::<f32>()
        .into_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read frame data: {e:?}"))?;
    let bytes = values.into_iter().map(|v| (v * 255.0).round() as u8).collect();

    let image = image::RgbImage::from_raw(width as u32, height as u32, bytes)
        .context("Frame data doesn't match its size")?;
    image
        .save(path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    Ok(())
}
