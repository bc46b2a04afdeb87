use std::path::{Path, PathBuf};

use burn::config::Config;
use splat_eval_dataset::DatasetConfig;
use splat_eval_rerun::WandbConfig;
use thiserror::Error;

#[derive(Config, Debug)]
pub struct MappingConfig {
    /// Silhouette threshold used when the scene was mapped.
    pub sil_thres: f32,
    /// Optimization iterations per mapped frame.
    pub num_iters: u32,
    /// Whether mapping densified the scene with new gaussians.
    pub add_new_gaussians: bool,
}

/// Description of a finished mapping run.
#[derive(Config, Debug)]
pub struct RunConfig {
    /// Random seed.
    pub seed: u64,
    /// Device to evaluate on, eg. `cuda:0` or `cpu`.
    pub primary_device: String,
    pub workdir: String,
    pub run_name: String,
    /// Resume from an existing run instead of starting a new results directory.
    pub load_checkpoint: bool,
    /// Scene parameters to evaluate. Defaults to `params.npz` in the results directory.
    pub scene_path: Option<String>,
    pub data: DatasetConfig,
    pub mapping: MappingConfig,
    /// Evaluate every nth frame.
    pub eval_every: u32,
    pub use_wandb: bool,
    pub wandb: Option<WandbConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Tracking is enabled but the config has no 'wandb' section")]
    MissingTracking,

    #[error("Semantics are enabled but 'num_semantic_classes' is not set")]
    MissingSemanticClasses,

    #[error("'eval_every' must be at least 1")]
    InvalidEvalEvery,
}

impl RunConfig {
    /// Load and validate a config document.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.use_wandb && self.wandb.is_none() {
            return Err(ConfigError::MissingTracking);
        }
        if self.data.load_semantics() && self.data.num_semantic_classes == 0 {
            return Err(ConfigError::MissingSemanticClasses);
        }
        if self.eval_every == 0 {
            return Err(ConfigError::InvalidEvalEvery);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn config_json(workdir: &str, dataset: &str, basedir: &str) -> String {
        format!(
            r#"{{
                "seed": 0,
                "primary_device": "cpu",
                "workdir": "{workdir}",
                "run_name": "room0_seed0",
                "load_checkpoint": false,
                "data": {{
                    "dataset_name": "{dataset}",
                    "basedir": "{basedir}",
                    "sequence": "room0",
                    "start": 0,
                    "end": -1,
                    "stride": 1,
                    "desired_image_height": 4,
                    "desired_image_width": 6,
                    "num_frames": -1
                }},
                "mapping": {{ "sil_thres": 0.5, "num_iters": 60, "add_new_gaussians": true }},
                "eval_every": 1,
                "use_wandb": false
            }}"#
        )
    }

    fn write(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, contents).expect("write config");
        (dir, path)
    }

    #[test]
    fn parses_with_defaults() {
        let (_dir, path) = write(&config_json("experiments", "replica", "data"));
        let config = RunConfig::from_file(&path).expect("Failed to load config");

        assert_eq!(config.run_name, "room0_seed0");
        assert!(config.scene_path.is_none());
        assert!(config.data.use_train_split);
        assert!(!config.data.ignore_bad);
        assert_eq!(config.mapping.num_iters, 60);
        assert!(config.wandb.is_none());
    }

    #[test]
    fn missing_key_is_a_parse_error() {
        let json = config_json("experiments", "replica", "data").replace(r#""seed": 0,"#, "");
        let (_dir, path) = write(&json);
        let error = RunConfig::from_file(&path).expect_err("seed is required");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn tracking_requires_wandb_section() {
        let json = config_json("experiments", "replica", "data")
            .replace(r#""use_wandb": false"#, r#""use_wandb": true"#);
        let (_dir, path) = write(&json);
        assert!(matches!(
            RunConfig::from_file(&path),
            Err(ConfigError::MissingTracking)
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            RunConfig::from_file(&dir.path().join("nope.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
