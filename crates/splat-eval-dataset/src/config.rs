use std::path::{Path, PathBuf};

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::DatasetError;

fn default_num_frames() -> i64 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_depth_scale() -> f32 {
    1.0
}

// Optional keys are plain serde defaults: the `Config` derive does not apply its defaults when
// deserializing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Name of the dataset family, eg. `replica` or `tum`.
    pub dataset_name: String,
    /// Directory holding the sequences.
    pub basedir: String,
    /// Sequence to load. Only the final path component is used.
    pub sequence: String,
    /// First frame to load.
    pub start: usize,
    /// Frame to stop at (exclusive), -1 loads until the end.
    pub end: i64,
    /// Load only every nth frame.
    pub stride: usize,
    pub desired_image_height: u32,
    pub desired_image_width: u32,
    /// Number of frames to evaluate, -1 evaluates all loaded frames.
    #[serde(default = "default_num_frames")]
    pub num_frames: i64,
    /// Path to a JSON file describing the camera.
    #[serde(default)]
    pub gradslam_data_cfg: Option<String>,
    /// Drop frames with non-finite poses.
    #[serde(default)]
    pub ignore_bad: bool,
    /// Evaluate the views used for mapping rather than the held-out views.
    #[serde(default = "default_true")]
    pub use_train_split: bool,
    /// Load per-frame labels. Naming the key at all, even as `false`, marks the scene as
    /// carrying semantic ids.
    #[serde(default)]
    pub load_semantics: Option<bool>,
    #[serde(default)]
    pub num_semantic_classes: u32,
}

impl DatasetConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dataset_name: String,
        basedir: String,
        sequence: String,
        start: usize,
        end: i64,
        stride: usize,
        desired_image_height: u32,
        desired_image_width: u32,
    ) -> Self {
        Self {
            dataset_name,
            basedir,
            sequence,
            start,
            end,
            stride,
            desired_image_height,
            desired_image_width,
            num_frames: default_num_frames(),
            gradslam_data_cfg: None,
            ignore_bad: false,
            use_train_split: true,
            load_semantics: None,
            num_semantic_classes: 0,
        }
    }

    pub fn with_gradslam_data_cfg(mut self, path: Option<String>) -> Self {
        self.gradslam_data_cfg = path;
        self
    }

    pub fn load_semantics(&self) -> bool {
        self.load_semantics.unwrap_or(false)
    }

    /// Whether the run was configured with semantics, whatever their value.
    pub fn has_semantics_key(&self) -> bool {
        self.load_semantics.is_some()
    }

    /// The sequence name, stripped of any leading directories.
    pub fn sequence_name(&self) -> &str {
        Path::new(&self.sequence)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.sequence)
    }

    pub fn sequence_dir(&self) -> PathBuf {
        Path::new(&self.basedir).join(self.sequence_name())
    }

    /// Read the camera description this config points to. Without one, only the dataset
    /// name is known.
    pub fn data_config(&self) -> Result<DataConfig, DatasetError> {
        let Some(path) = &self.gradslam_data_cfg else {
            return Ok(DataConfig::new(self.dataset_name.clone()));
        };

        let contents = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: PathBuf::from(path),
            source,
        })?;
        let config: DataConfig = serde_json::from_str(&contents)?;
        log::info!("Loaded camera config from {path}");
        Ok(config)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub image_height: u32,
    pub image_width: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    /// Depth image values per meter.
    #[serde(default = "default_depth_scale")]
    pub png_depth_scale: f32,
    /// Pixels to remove from every image border.
    #[serde(default)]
    pub crop_edge: u32,
}

impl CameraParams {
    pub fn new(image_height: u32, image_width: u32, fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self {
            image_height,
            image_width,
            fx,
            fy,
            cx,
            cy,
            png_depth_scale: default_depth_scale(),
            crop_edge: 0,
        }
    }

    pub fn with_png_depth_scale(mut self, scale: f32) -> Self {
        self.png_depth_scale = scale;
        self
    }
}

#[derive(Config, Debug)]
pub struct DataConfig {
    pub dataset_name: String,
    pub camera_params: Option<CameraParams>,
}
