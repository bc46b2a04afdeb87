use std::path::Path;

use burn::prelude::Backend;
use glam::Mat4;
use serde::Deserialize;

use super::{CameraSetup, FrameSource, SequenceDataset};
use crate::{DatasetArgs, DatasetError, DatasetKind, Intrinsics};

const TRANSFORMS_PATH: &str = "dslr/nerfstudio/transforms_undistorted.json";
const IMAGE_DIR: &str = "dslr/undistorted_images";
const DEPTH_DIR: &str = "dslr/undistorted_depths";
// Depth images are stored in millimeters.
const DEPTH_SCALE: f32 = 1000.0;

#[derive(Deserialize, Clone)]
struct JsonScene {
    /// Focal length x
    fl_x: f32,
    /// Focal length y
    fl_y: f32,
    /// Principal point x
    cx: f32,
    /// Principal point y
    cy: f32,
    /// Image width. Should be an integer but read as float, fine to truncate.
    w: f64,
    /// Image height. Should be an integer but read as float, fine to truncate.
    h: f64,

    frames: Vec<FrameData>,
    #[serde(default)]
    test_frames: Vec<FrameData>,
}

#[derive(Deserialize, Clone)]
struct FrameData {
    file_path: String,
    transform_matrix: Vec<Vec<f32>>,
    #[serde(default)]
    is_bad: bool,
}

fn frame_pose(frame: &FrameData, transforms_path: &Path) -> Result<Mat4, DatasetError> {
    let values: Vec<f32> = frame.transform_matrix.iter().flatten().copied().collect();
    if values.len() != 16 {
        return Err(DatasetError::InvalidFormat {
            path: transforms_path.to_path_buf(),
            reason: format!("transform of {} is not 4x4", frame.file_path),
        });
    }

    // Camera to world, in the OpenGL convention.
    let mut transform = Mat4::from_cols_slice(&values).transpose();
    // Swap basis to a camera looking down +z.
    transform.y_axis *= -1.0;
    transform.z_axis *= -1.0;
    Ok(transform)
}

/// Load a ScanNet++ DSLR sequence, described by its nerfstudio transforms file.
pub fn load<B: Backend>(args: DatasetArgs<B>) -> Result<SequenceDataset<B>, DatasetError> {
    if args.load_semantics {
        return Err(DatasetError::NoSemantics {
            kind: DatasetKind::ScannetPP,
        });
    }

    let root = args.sequence_dir();
    let transforms_path = root.join(TRANSFORMS_PATH);
    let contents = std::fs::read_to_string(&transforms_path).map_err(|source| DatasetError::Io {
        path: transforms_path.clone(),
        source,
    })?;
    let scene: JsonScene = serde_json::from_str(&contents)?;

    let mut frames = if args.use_train_split {
        scene.frames
    } else {
        scene.test_frames
    };
    frames.sort_by(|a, b| alphanumeric_sort::compare_str(&a.file_path, &b.file_path));

    let bad = frames.iter().filter(|f| f.is_bad).count();
    if bad > 0 && args.ignore_bad {
        log::info!("Dropping {bad} frames marked as bad");
        frames.retain(|f| !f.is_bad);
    } else if bad > 0 {
        log::info!("{bad} frames are marked as bad, keeping them");
    }

    let sources = frames
        .iter()
        .map(|frame| {
            let color = root.join(IMAGE_DIR).join(&frame.file_path);
            let depth = root.join(DEPTH_DIR).join(&frame.file_path).with_extension("png");
            Ok(FrameSource {
                color,
                depth,
                semantics: None,
                pose: frame_pose(frame, &transforms_path)?,
            })
        })
        .collect::<Result<Vec<_>, DatasetError>>()?;

    let camera = CameraSetup {
        intrinsics: Some(Intrinsics {
            fx: scene.fl_x,
            fy: scene.fl_y,
            cx: scene.cx,
            cy: scene.cy,
            width: scene.w as u32,
            height: scene.h as u32,
        }),
        depth_scale: DEPTH_SCALE,
        crop_edge: 0,
    };

    SequenceDataset::new(DatasetKind::ScannetPP, sources, camera, args)
}
