use std::path::PathBuf;

use anyhow::Context;
use burn::backend::{NdArray, Wgpu, ndarray::NdArrayDevice, wgpu::WgpuDevice};
use clap::Parser;
use splat_eval_process::{
    EvalOutcome, Experiment, device::ComputeDevice, manifest::ManifestEval, paths::RunPaths,
    run_evaluation,
};
use splat_eval_rerun::RerunTracking;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Evaluate a mapped gaussian splat scene against its dataset"
)]
pub struct Cli {
    /// Path to the config document of the run to evaluate.
    #[arg(value_name = "EXPERIMENT")]
    pub experiment: PathBuf,
}

/// Load the experiment described by `cli` and evaluate it on the configured device.
pub fn run(cli: &Cli) -> anyhow::Result<EvalOutcome> {
    let experiment = Experiment::load(&cli.experiment)
        .with_context(|| format!("Failed to load {}", cli.experiment.display()))?;
    let config = &experiment.config;

    let device: ComputeDevice = config.primary_device.parse()?;
    log::info!("Evaluating {} on {device}", config.run_name);

    let sink = config
        .wandb
        .as_ref()
        .and_then(|w| w.sink)
        .unwrap_or_default();
    let tracking = RerunTracking::new(sink, RunPaths::new(config).results_dir);

    let mut routine = ManifestEval;
    match device {
        ComputeDevice::Cpu => run_evaluation::<NdArray>(
            &experiment,
            &NdArrayDevice::Cpu,
            &mut routine,
            &tracking,
        ),
        ComputeDevice::Gpu(index) => run_evaluation::<Wgpu>(
            &experiment,
            &WgpuDevice::DiscreteGpu(index),
            &mut routine,
            &tracking,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn takes_one_positional_path() {
        let cli = Cli::try_parse_from(["splat_eval", "configs/replica/splatam.json"])
            .expect("Failed to parse");
        assert_eq!(cli.experiment, PathBuf::from("configs/replica/splatam.json"));

        assert!(Cli::try_parse_from(["splat_eval"]).is_err());
        assert!(Cli::try_parse_from(["splat_eval", "a.json", "b.json"]).is_err());
    }

    #[test]
    fn missing_config_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cli = Cli {
            experiment: dir.path().join("missing.json"),
        };
        assert!(run(&cli).is_err());
    }
}
