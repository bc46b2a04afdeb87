use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use glam::Mat4;

use super::{
    CameraSetup, FrameSource, SequenceDataset, list_files,
    poses::{
        nearest_pose, read_matrix_file, read_matrix_npy, read_matrix_rows, read_tum_trajectory,
    },
};
use crate::{DataConfig, DatasetArgs, DatasetError, DatasetKind, Intrinsics};

/// A set of per-frame files inside a sequence.
#[derive(Clone, Copy, Debug)]
struct FileSet {
    dir: &'static str,
    prefix: &'static str,
    extensions: &'static [&'static str],
}

impl FileSet {
    const fn new(dir: &'static str, prefix: &'static str, extensions: &'static [&'static str]) -> Self {
        Self {
            dir,
            prefix,
            extensions,
        }
    }

    fn list(&self, root: &Path) -> Result<Vec<PathBuf>, DatasetError> {
        list_files(&root.join(self.dir), self.prefix, self.extensions)
    }
}

#[derive(Clone, Copy, Debug)]
enum PoseSource {
    /// A text file with one row-major matrix per line.
    MatrixRows(&'static str),
    /// Like `MatrixRows`, but the sequence might not have been tracked.
    OptionalMatrixRows(&'static str),
    /// A TUM style trajectory file ending in `.gt.freiburg`, one line per frame.
    Freiburg,
    /// A TUM ground truth trajectory, matched to frames by timestamp.
    TumGroundTruth,
    /// One text matrix per frame.
    TextPerFrame(FileSet),
    /// One numpy matrix per frame.
    NpyPerFrame(FileSet),
}

/// Where the frames of a sequence live on disk.
#[derive(Clone, Copy, Debug)]
struct Layout {
    /// Directory of the split inside the sequence.
    root: &'static str,
    color: FileSet,
    depth: FileSet,
    poses: PoseSource,
    semantics: Option<FileSet>,
}

const PNG: &[&str] = &["png"];
const JPG: &[&str] = &["jpg", "jpeg"];

impl Layout {
    fn of(kind: DatasetKind, use_train_split: bool) -> Option<Self> {
        let layout = match kind {
            DatasetKind::Icl => Self {
                root: "",
                color: FileSet::new("rgb", "", PNG),
                depth: FileSet::new("depth", "", PNG),
                poses: PoseSource::Freiburg,
                semantics: None,
            },
            DatasetKind::Replica => Self {
                root: "",
                color: FileSet::new("results", "frame", JPG),
                depth: FileSet::new("results", "depth", PNG),
                poses: PoseSource::MatrixRows("traj.txt"),
                semantics: Some(FileSet::new("results", "semantic", PNG)),
            },
            DatasetKind::ReplicaV2 => Self {
                root: if use_train_split { "imap/00" } else { "imap/01" },
                color: FileSet::new("rgb", "rgb_", PNG),
                depth: FileSet::new("depth", "depth_", PNG),
                poses: PoseSource::MatrixRows("traj_w_c.txt"),
                semantics: Some(FileSet::new("semantic_class", "semantic_class_", PNG)),
            },
            DatasetKind::AzureKinect => Self {
                root: "",
                color: FileSet::new("color", "", JPG),
                depth: FileSet::new("depth", "", PNG),
                poses: PoseSource::OptionalMatrixRows("poses_global_dvo.txt"),
                semantics: None,
            },
            DatasetKind::Scannet => Self {
                root: "",
                color: FileSet::new("color", "", JPG),
                depth: FileSet::new("depth", "", PNG),
                poses: PoseSource::TextPerFrame(FileSet::new("pose", "", &["txt"])),
                semantics: None,
            },
            DatasetKind::Ai2thor => Self {
                root: "",
                color: FileSet::new("color", "", PNG),
                depth: FileSet::new("depth", "", PNG),
                poses: PoseSource::TextPerFrame(FileSet::new("pose", "", &["txt"])),
                semantics: Some(FileSet::new("instance", "", PNG)),
            },
            DatasetKind::Record3D => Self {
                root: "",
                color: FileSet::new("rgb", "", PNG),
                depth: FileSet::new("depth", "", &["npy"]),
                poses: PoseSource::NpyPerFrame(FileSet::new("poses", "", &["npy"])),
                semantics: None,
            },
            DatasetKind::Realsense => Self {
                root: "",
                color: FileSet::new("rgb", "", JPG),
                depth: FileSet::new("depth", "", PNG),
                poses: PoseSource::NpyPerFrame(FileSet::new("poses", "", &["npy"])),
                semantics: None,
            },
            DatasetKind::Tum => Self {
                root: "",
                color: FileSet::new("rgb", "", PNG),
                depth: FileSet::new("depth", "", PNG),
                poses: PoseSource::TumGroundTruth,
                semantics: None,
            },
            DatasetKind::ScannetPP => return None,
        };
        Some(layout)
    }
}

fn check_len(colors: usize, other: usize, what: &'static str) -> Result<(), DatasetError> {
    if colors != other {
        return Err(DatasetError::LengthMismatch {
            colors,
            other,
            what,
        });
    }
    Ok(())
}

fn read_poses(
    poses: PoseSource,
    root: &Path,
    colors: &[PathBuf],
) -> Result<Vec<Mat4>, DatasetError> {
    let poses = match poses {
        PoseSource::MatrixRows(file) => read_matrix_rows(&root.join(file))?,
        PoseSource::OptionalMatrixRows(file) => {
            let path = root.join(file);
            if path.exists() {
                read_matrix_rows(&path)?
            } else {
                log::warn!("No poses at {}, using identity poses", path.display());
                vec![Mat4::IDENTITY; colors.len()]
            }
        }
        PoseSource::Freiburg => {
            let candidates = list_files(root, "", &["freiburg"])?;
            let path = candidates
                .iter()
                .find(|p| p.to_string_lossy().ends_with(".gt.freiburg"))
                .ok_or_else(|| DatasetError::InvalidFormat {
                    path: root.to_path_buf(),
                    reason: "no .gt.freiburg trajectory found".to_owned(),
                })?;
            read_tum_trajectory(path)?
                .into_iter()
                .map(|(_, pose)| pose)
                .collect()
        }
        PoseSource::TumGroundTruth => {
            let path = root.join("groundtruth.txt");
            let trajectory = read_tum_trajectory(&path)?;
            colors
                .iter()
                .map(|color| {
                    let timestamp = color
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| s.parse::<f64>().ok())
                        .ok_or_else(|| DatasetError::InvalidFormat {
                            path: color.clone(),
                            reason: "file name is not a timestamp".to_owned(),
                        })?;
                    nearest_pose(&trajectory, timestamp).ok_or_else(|| {
                        DatasetError::InvalidFormat {
                            path: path.clone(),
                            reason: "trajectory is empty".to_owned(),
                        }
                    })
                })
                .collect::<Result<_, _>>()?
        }
        PoseSource::TextPerFrame(files) => files
            .list(root)?
            .iter()
            .map(|p| read_matrix_file(p))
            .collect::<Result<_, _>>()?,
        PoseSource::NpyPerFrame(files) => files
            .list(root)?
            .iter()
            .map(|p| read_matrix_npy(p))
            .collect::<Result<_, _>>()?,
    };
    Ok(poses)
}

/// Load a dataset whose frames are stored as separate color, depth and pose files.
pub fn load<B: Backend>(
    kind: DatasetKind,
    data_config: &DataConfig,
    args: DatasetArgs<B>,
) -> Result<SequenceDataset<B>, DatasetError> {
    let Some(layout) = Layout::of(kind, args.use_train_split) else {
        return Err(DatasetError::UnsupportedDataset(kind.to_string()));
    };
    if args.load_semantics && layout.semantics.is_none() {
        return Err(DatasetError::NoSemantics { kind });
    }

    let root = args.sequence_dir().join(layout.root);
    let colors = layout.color.list(&root)?;
    let depths = layout.depth.list(&root)?;
    check_len(colors.len(), depths.len(), "depth images")?;

    let poses = read_poses(layout.poses, &root, &colors)?;
    // Trajectories can hold more poses than there are frames, the first ones line up.
    if poses.len() < colors.len() {
        check_len(colors.len(), poses.len(), "poses")?;
    }

    let semantics = if let Some(files) = layout.semantics.filter(|_| args.load_semantics) {
        let semantics = files.list(&root)?;
        check_len(colors.len(), semantics.len(), "semantic images")?;
        semantics.into_iter().map(Some).collect()
    } else {
        vec![None; colors.len()]
    };

    let sources = colors
        .into_iter()
        .zip(depths)
        .zip(poses)
        .zip(semantics)
        .map(|(((color, depth), pose), semantics)| FrameSource {
            color,
            depth,
            semantics,
            pose,
        })
        .collect();

    let camera = match &data_config.camera_params {
        Some(params) => CameraSetup {
            intrinsics: Some(Intrinsics {
                fx: params.fx,
                fy: params.fy,
                cx: params.cx,
                cy: params.cy,
                width: params.image_width,
                height: params.image_height,
            }),
            depth_scale: params.png_depth_scale,
            crop_edge: params.crop_edge,
        },
        None => {
            log::warn!("No camera parameters for {kind}, intrinsics are unknown");
            CameraSetup::default()
        }
    };

    SequenceDataset::new(kind, sources, camera, args)
}
