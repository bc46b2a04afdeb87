use std::path::{Path, PathBuf};

use burn::{
    prelude::{Backend, Int},
    tensor::{Tensor, TensorData},
};
use glam::Mat4;
use image::{ImageBuffer, Luma, imageops::FilterType};

use crate::{DatasetAdapter, DatasetArgs, DatasetError, DatasetKind, Frame, Intrinsics};

pub mod layout;
pub mod poses;
pub mod scannetpp;

type DepthMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Files making up a single frame of a sequence.
#[derive(Clone, Debug)]
pub struct FrameSource {
    pub color: PathBuf,
    pub depth: PathBuf,
    pub semantics: Option<PathBuf>,
    pub pose: Mat4,
}

/// How the images on disk are turned into frames.
#[derive(Clone, Copy, Debug)]
pub struct CameraSetup {
    /// Intrinsics of the images on disk.
    pub intrinsics: Option<Intrinsics>,
    /// Depth values per meter.
    pub depth_scale: f32,
    pub crop_edge: u32,
}

impl Default for CameraSetup {
    fn default() -> Self {
        Self {
            intrinsics: None,
            depth_scale: 1.0,
            crop_edge: 0,
        }
    }
}

/// A sequence of frames read lazily from disk.
pub struct SequenceDataset<B: Backend> {
    kind: DatasetKind,
    frames: Vec<FrameSource>,
    camera: CameraSetup,
    width: u32,
    height: u32,
    num_semantic_classes: u32,
    device: B::Device,
}

impl<B: Backend> SequenceDataset<B> {
    /// Select the requested frames out of all `sources` of a sequence.
    pub(crate) fn new(
        kind: DatasetKind,
        sources: Vec<FrameSource>,
        camera: CameraSetup,
        args: DatasetArgs<B>,
    ) -> Result<Self, DatasetError> {
        let total = sources.len();
        let end = args.end.unwrap_or(total).min(total);

        let mut frames: Vec<_> = sources
            .into_iter()
            .take(end)
            .skip(args.start)
            .step_by(args.stride.max(1))
            .collect();

        if args.ignore_bad {
            let before = frames.len();
            frames.retain(|f| f.pose.is_finite());
            if frames.len() != before {
                log::warn!("Dropped {} frames with invalid poses", before - frames.len());
            }
        }

        if frames.is_empty() {
            return Err(DatasetError::Empty(args.sequence_dir()));
        }

        if args.relative_pose {
            let first_inv = frames[0].pose.inverse();
            for frame in &mut frames {
                frame.pose = first_inv * frame.pose;
            }
        }

        log::info!(
            "Selected {} of {total} frames (start {}, end {end}, stride {})",
            frames.len(),
            args.start,
            args.stride
        );

        Ok(Self {
            kind,
            frames,
            camera,
            width: args.desired_width,
            height: args.desired_height,
            num_semantic_classes: args.num_semantic_classes,
            device: args.device,
        })
    }

    fn source(&self, index: usize) -> Result<&FrameSource, DatasetError> {
        self.frames.get(index).ok_or(DatasetError::IndexOutOfRange {
            index,
            len: self.frames.len(),
        })
    }

    fn crop_rect(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let edge = self.camera.crop_edge.min(width / 2).min(height / 2);
        (edge, edge, width - 2 * edge, height - 2 * edge)
    }

    fn load_color(&self, path: &Path) -> Result<Tensor<B, 3>, DatasetError> {
        let image = open_image(path)?;
        let (x, y, w, h) = self.crop_rect(image.width(), image.height());
        let image = image
            .crop_imm(x, y, w, h)
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .into_rgb32f();

        let data = TensorData::new(
            image.into_raw(),
            [self.height as usize, self.width as usize, 3],
        );
        Ok(Tensor::from_data(data, &self.device))
    }

    fn load_depth(&self, path: &Path) -> Result<Tensor<B, 3>, DatasetError> {
        let depth = read_depth_map(path)?;
        let (x, y, w, h) = self.crop_rect(depth.width(), depth.height());
        let depth = image::imageops::crop_imm(&depth, x, y, w, h).to_image();
        let depth = resize_nearest(&depth, self.width, self.height);

        let scale = self.camera.depth_scale;
        let values: Vec<f32> = depth.into_iter().map(|d| d / scale).collect();
        let data = TensorData::new(values, [self.height as usize, self.width as usize, 1]);
        Ok(Tensor::from_data(data, &self.device))
    }

    fn load_semantics(&self, path: &Path) -> Result<Tensor<B, 2, Int>, DatasetError> {
        let labels = open_image(path)?.into_luma16();
        let (x, y, w, h) = self.crop_rect(labels.width(), labels.height());
        let labels = image::imageops::crop_imm(&labels, x, y, w, h).to_image();
        let labels = image::imageops::resize(&labels, self.width, self.height, FilterType::Nearest);

        let classes = self.num_semantic_classes;
        let values: Vec<i64> = labels
            .into_raw()
            .into_iter()
            .map(|label| {
                // Labels outside the known classes count as background.
                if classes > 0 && u32::from(label) >= classes {
                    0
                } else {
                    i64::from(label)
                }
            })
            .collect();

        let data = TensorData::new(values, [self.height as usize, self.width as usize]);
        Ok(Tensor::from_data(data.convert::<B::IntElem>(), &self.device))
    }
}

impl<B: Backend> DatasetAdapter<B> for SequenceDataset<B> {
    fn kind(&self) -> DatasetKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn intrinsics(&self) -> Option<Intrinsics> {
        self.camera
            .intrinsics
            .map(|k| k.cropped(self.camera.crop_edge).scaled_to(self.width, self.height))
    }

    fn pose(&self, index: usize) -> Result<Mat4, DatasetError> {
        Ok(self.source(index)?.pose)
    }

    fn get(&self, index: usize) -> Result<Frame<B>, DatasetError> {
        let _span = tracing::trace_span!("load frame", index).entered();

        let source = self.source(index)?;
        let semantics = source
            .semantics
            .as_deref()
            .map(|path| self.load_semantics(path))
            .transpose()?;

        Ok(Frame {
            color: self.load_color(&source.color)?,
            depth: self.load_depth(&source.depth)?,
            intrinsics: self.intrinsics(),
            pose: source.pose,
            semantics,
        })
    }
}

fn open_image(path: &Path) -> Result<image::DynamicImage, DatasetError> {
    image::open(path).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Nearest neighbour resize that keeps raw values. `imageops::resize` clamps float pixels to
/// `[0, 1]`, which would flatten depth.
fn resize_nearest(depth: &DepthMap, width: u32, height: u32) -> Vec<f32> {
    let (src_width, src_height) = depth.dimensions();
    let mut values = Vec::with_capacity(width as usize * height as usize);
    if src_width == 0 || src_height == 0 {
        values.resize(width as usize * height as usize, 0.0);
        return values;
    }

    let sample = |dst: u32, dst_len: u32, src_len: u32| {
        let pos = (f64::from(dst) + 0.5) * f64::from(src_len) / f64::from(dst_len);
        (pos as u32).min(src_len - 1)
    };
    for y in 0..height {
        let sy = sample(y, height, src_height);
        for x in 0..width {
            let sx = sample(x, width, src_width);
            values.push(depth.get_pixel(sx, sy).0[0]);
        }
    }
    values
}

/// Read raw depth values, either from a 16 bit image or an `.npy` array.
fn read_depth_map(path: &Path) -> Result<DepthMap, DatasetError> {
    let is_npy = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("npy"));

    if !is_npy {
        let depth = open_image(path)?.into_luma16();
        let (width, height) = depth.dimensions();
        let values = depth.into_raw().into_iter().map(f32::from).collect();
        return DepthMap::from_raw(width, height, values).ok_or_else(|| {
            DatasetError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "depth buffer size mismatch".to_owned(),
            }
        });
    }

    let data = splat_eval_serde::read_npy_file(path)?;
    let invalid = |reason: String| DatasetError::InvalidFormat {
        path: path.to_path_buf(),
        reason,
    };

    let (height, width) = match data.shape.as_slice() {
        [h, w] | [h, w, 1] => (*h, *w),
        shape => return Err(invalid(format!("unexpected depth shape {shape:?}"))),
    };
    let values = data
        .convert::<f32>()
        .into_vec::<f32>()
        .map_err(|e| invalid(format!("{e:?}")))?;
    DepthMap::from_raw(width as u32, height as u32, values)
        .ok_or_else(|| invalid("depth buffer size mismatch".to_owned()))
}

/// List the files in `dir` whose name starts with `prefix` and has one of `extensions`, in
/// natural order.
pub(crate) fn list_files(
    dir: &Path,
    prefix: &str,
    extensions: &[&str],
) -> Result<Vec<PathBuf>, DatasetError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = vec![];
    for entry in entries {
        let entry = entry.map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let matches_ext = extensions.is_empty()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));

        if name.starts_with(prefix) && matches_ext {
            files.push(path);
        }
    }

    alphanumeric_sort::sort_path_slice(&mut files);
    Ok(files)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_files_in_natural_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["frame10.jpg", "frame2.jpg", "frame1.jpg", "depth1.png", "frame3.txt"] {
            std::fs::write(dir.path().join(name), b"").expect("write");
        }

        let files = list_files(dir.path(), "frame", &["jpg"]).expect("list");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().and_then(|n| n.to_str()).expect("name"))
            .collect();
        assert_eq!(names, vec!["frame1.jpg", "frame2.jpg", "frame10.jpg"]);
    }

    #[test]
    fn depth_resize_keeps_raw_values() {
        let mut depth = DepthMap::from_pixel(12, 8, Luma([2000.0]));
        depth.put_pixel(11, 7, Luma([4500.0]));

        let resized = resize_nearest(&depth, 6, 4);
        assert_eq!(resized.len(), 24);
        assert_eq!(resized[0], 2000.0);
        assert_eq!(resized[23], 4500.0);

        let same = resize_nearest(&depth, 12, 8);
        assert_eq!(same, depth.into_raw());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = list_files(&dir.path().join("nope"), "", &[]);
        assert!(matches!(result, Err(DatasetError::Io { .. })));
    }
}
