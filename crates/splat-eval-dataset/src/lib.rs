use std::{fmt, path::PathBuf};

use burn::{
    prelude::{Backend, Int},
    tensor::Tensor,
};
use glam::{Mat3, Mat4};
use thiserror::Error;
use tracing::trace_span;

pub mod config;
pub mod formats;

pub use config::{CameraParams, DataConfig, DatasetConfig};
pub use formats::SequenceDataset;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Unsupported dataset '{0}'")]
    UnsupportedDataset(String),

    #[error("IO error while reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error decoding JSON file.")]
    Json(#[from] serde_json::Error),

    #[error("Failed to load image {path}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to read array")]
    Array(#[from] splat_eval_serde::ArchiveError),

    #[error("Error decoding {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Found {colors} color images but {other} {what}")]
    LengthMismatch {
        colors: usize,
        other: usize,
        what: &'static str,
    },

    #[error("{kind} has no semantic labels")]
    NoSemantics { kind: DatasetKind },

    #[error("Frame {index} out of range, dataset has {len} frames")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("No frames selected from {0}")]
    Empty(PathBuf),
}

/// The dataset families a mapping run can be built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Icl,
    Replica,
    ReplicaV2,
    AzureKinect,
    Scannet,
    Ai2thor,
    Record3D,
    Realsense,
    Tum,
    ScannetPP,
}

impl DatasetKind {
    pub const ALL: [Self; 10] = [
        Self::Icl,
        Self::Replica,
        Self::ReplicaV2,
        Self::AzureKinect,
        Self::Scannet,
        Self::Ai2thor,
        Self::Record3D,
        Self::Realsense,
        Self::Tum,
        Self::ScannetPP,
    ];

    /// Resolve a dataset name, ignoring case.
    pub fn from_name(name: &str) -> Result<Self, DatasetError> {
        let kind = match name.to_lowercase().as_str() {
            "icl" => Self::Icl,
            "replica" => Self::Replica,
            "replicav2" => Self::ReplicaV2,
            "azure" | "azurekinect" => Self::AzureKinect,
            "scannet" => Self::Scannet,
            "ai2thor" => Self::Ai2thor,
            "record3d" => Self::Record3D,
            "realsense" => Self::Realsense,
            "tum" => Self::Tum,
            "scannetpp" => Self::ScannetPP,
            _ => return Err(DatasetError::UnsupportedDataset(name.to_owned())),
        };
        Ok(kind)
    }

    /// Whether the dataset is described by a separate camera config.
    pub fn uses_data_config(self) -> bool {
        !matches!(self, Self::ScannetPP)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Icl => "ICL",
            Self::Replica => "Replica",
            Self::ReplicaV2 => "ReplicaV2",
            Self::AzureKinect => "AzureKinect",
            Self::Scannet => "Scannet",
            Self::Ai2thor => "Ai2thor",
            Self::Record3D => "Record3D",
            Self::Realsense => "Realsense",
            Self::Tum => "TUM",
            Self::ScannetPP => "ScannetPP",
        };
        f.write_str(name)
    }
}

/// Pinhole intrinsics in pixels, for an image of `width` x `height`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl Intrinsics {
    /// Rescale to a different image size.
    pub fn scaled_to(&self, width: u32, height: u32) -> Self {
        let sx = width as f32 / self.width as f32;
        let sy = height as f32 / self.height as f32;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
            width,
            height,
        }
    }

    /// Remove `edge` pixels from each border.
    pub fn cropped(&self, edge: u32) -> Self {
        Self {
            cx: self.cx - edge as f32,
            cy: self.cy - edge as f32,
            width: self.width.saturating_sub(2 * edge),
            height: self.height.saturating_sub(2 * edge),
            ..*self
        }
    }

    pub fn matrix(&self) -> Mat3 {
        Mat3::from_cols_array(&[self.fx, 0.0, 0.0, 0.0, self.fy, 0.0, self.cx, self.cy, 1.0])
    }
}

/// A single loaded frame.
#[derive(Clone, Debug)]
pub struct Frame<B: Backend> {
    /// Color in `[0, 1]`, shaped `[H, W, 3]`.
    pub color: Tensor<B, 3>,
    /// Depth in meters, shaped `[H, W, 1]`.
    pub depth: Tensor<B, 3>,
    pub intrinsics: Option<Intrinsics>,
    /// Camera to world.
    pub pose: Mat4,
    /// Per pixel label, shaped `[H, W]`.
    pub semantics: Option<Tensor<B, 2, Int>>,
}

/// Arguments shared by every dataset family.
#[derive(Clone, Debug)]
pub struct DatasetArgs<B: Backend> {
    pub basedir: PathBuf,
    pub sequence: String,
    pub start: usize,
    pub end: Option<usize>,
    pub stride: usize,
    pub desired_height: u32,
    pub desired_width: u32,
    pub device: B::Device,
    /// Express every pose relative to the first selected frame.
    pub relative_pose: bool,
    pub ignore_bad: bool,
    pub use_train_split: bool,
    pub load_semantics: bool,
    pub num_semantic_classes: u32,
}

impl<B: Backend> DatasetArgs<B> {
    pub fn from_config(config: &DatasetConfig, device: B::Device) -> Self {
        Self {
            basedir: PathBuf::from(&config.basedir),
            sequence: config.sequence_name().to_owned(),
            start: config.start,
            end: usize::try_from(config.end).ok(),
            stride: config.stride.max(1),
            desired_height: config.desired_image_height,
            desired_width: config.desired_image_width,
            device,
            relative_pose: true,
            ignore_bad: config.ignore_bad,
            use_train_split: config.use_train_split,
            load_semantics: config.load_semantics(),
            num_semantic_classes: config.num_semantic_classes,
        }
    }

    pub fn sequence_dir(&self) -> PathBuf {
        self.basedir.join(&self.sequence)
    }
}

/// Indexed access to the frames of a dataset sequence.
pub trait DatasetAdapter<B: Backend> {
    fn kind(&self) -> DatasetKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intrinsics of the frames as returned by `get`, if known.
    fn intrinsics(&self) -> Option<Intrinsics>;

    /// Camera to world pose of frame `index`.
    fn pose(&self, index: usize) -> Result<Mat4, DatasetError>;

    fn get(&self, index: usize) -> Result<Frame<B>, DatasetError>;
}

/// Construct the adapter for `kind`.
pub fn load_dataset<B: Backend>(
    kind: DatasetKind,
    data_config: &DataConfig,
    args: DatasetArgs<B>,
) -> Result<Box<dyn DatasetAdapter<B>>, DatasetError> {
    let _span = trace_span!("load_dataset").entered();

    log::info!(
        "Loading {kind} sequence {:?} from {}",
        args.sequence,
        args.basedir.display()
    );

    let dataset: Box<dyn DatasetAdapter<B>> = match kind {
        DatasetKind::ScannetPP => Box::new(formats::scannetpp::load(args)?),
        DatasetKind::Icl
        | DatasetKind::Replica
        | DatasetKind::ReplicaV2
        | DatasetKind::AzureKinect
        | DatasetKind::Scannet
        | DatasetKind::Ai2thor
        | DatasetKind::Record3D
        | DatasetKind::Realsense
        | DatasetKind::Tum => Box::new(formats::layout::load(kind, data_config, args)?),
    };

    log::info!("Loaded {} frames", dataset.len());
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_dataset_name() {
        let names = [
            ("icl", DatasetKind::Icl),
            ("replica", DatasetKind::Replica),
            ("replicav2", DatasetKind::ReplicaV2),
            ("azure", DatasetKind::AzureKinect),
            ("azurekinect", DatasetKind::AzureKinect),
            ("scannet", DatasetKind::Scannet),
            ("ai2thor", DatasetKind::Ai2thor),
            ("record3d", DatasetKind::Record3D),
            ("realsense", DatasetKind::Realsense),
            ("tum", DatasetKind::Tum),
            ("scannetpp", DatasetKind::ScannetPP),
        ];
        for (name, kind) in names {
            assert_eq!(DatasetKind::from_name(name).expect(name), kind);
        }
        assert_eq!(
            DatasetKind::from_name("Replica").expect("mixed case"),
            DatasetKind::Replica
        );
        assert_eq!(
            DatasetKind::from_name("AzureKinect").expect("mixed case"),
            DatasetKind::AzureKinect
        );
    }

    #[test]
    fn rejects_unknown_names() {
        for name in ["kitti", "", "replica ", "scannet++"] {
            assert!(matches!(
                DatasetKind::from_name(name),
                Err(DatasetError::UnsupportedDataset(_))
            ));
        }
    }

    #[test]
    fn only_scannetpp_skips_data_config() {
        let without: Vec<_> = DatasetKind::ALL
            .into_iter()
            .filter(|k| !k.uses_data_config())
            .collect();
        assert_eq!(without, vec![DatasetKind::ScannetPP]);
    }

    #[test]
    fn intrinsics_follow_resize_and_crop() {
        let intrinsics = Intrinsics {
            fx: 600.0,
            fy: 600.0,
            cx: 599.5,
            cy: 339.5,
            width: 1200,
            height: 680,
        };
        let half = intrinsics.scaled_to(600, 340);
        assert_eq!(half.fx, 300.0);
        assert_eq!(half.cy, 169.75);

        let cropped = intrinsics.cropped(10);
        assert_eq!(cropped.width, 1180);
        assert_eq!(cropped.cx, 589.5);
        assert_eq!(cropped.matrix().z_axis.x, 589.5);
    }
}
