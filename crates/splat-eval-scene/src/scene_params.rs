use std::collections::{BTreeMap, HashSet};

use burn::{
    module::{Param, ParamId},
    prelude::{Backend, Int},
    tensor::{DType, Tensor, TensorData, backend::AutodiffBackend},
};
use glam::{Mat4, Quat, Vec3};
use thiserror::Error;
use tracing::trace_span;

use crate::validation::{ValueStats, value_stats};

/// Per-frame camera rotations, stored as `[1, 4, T]` unnormalized `wxyz` quaternions.
pub const CAM_ROTS_KEY: &str = "cam_unnorm_rots";
/// Per-frame camera translations, stored as `[1, 3, T]`.
pub const CAM_TRANS_KEY: &str = "cam_trans";
/// Per-gaussian semantic labels.
pub const SEMANTIC_IDS_KEY: &str = "semantic_ids";
/// Gaussian centers, used to count the splats in a scene.
pub const MEANS_KEY: &str = "means3D";

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Parameter '{name}' has unsupported data: {reason}")]
    InvalidData { name: String, reason: String },

    #[error("Parameter '{name}' has {found} rows, expected {expected} to match semantic_ids")]
    RowMismatch {
        name: String,
        found: usize,
        expected: usize,
    },

    #[error("Camera parameters do not contain frame {frame} (only {count} frames)")]
    FrameOutOfRange { frame: usize, count: usize },
}

/// Tensor that is never optimized. Keeps the numeric kind it was stored with.
#[derive(Clone, Debug)]
pub enum FixedTensor<B: Backend> {
    Float(Tensor<B, 2>),
    Int(Tensor<B, 2, Int>),
}

/// A single named scene parameter.
///
/// All tensors are stored as `[rows, cols]`, where `rows` is the leading dimension of the
/// original array and `cols` the product of the remaining ones. The original shape is kept
/// around in `shape`.
#[derive(Clone)]
pub enum SceneParam<B: Backend> {
    Optimizable {
        shape: Vec<usize>,
        value: Param<Tensor<B, 2>>,
    },
    Fixed {
        shape: Vec<usize>,
        value: FixedTensor<B>,
    },
}

impl<B: Backend> SceneParam<B> {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Optimizable { shape, .. } | Self::Fixed { shape, .. } => shape,
        }
    }

    pub fn is_optimizable(&self) -> bool {
        matches!(self, Self::Optimizable { .. })
    }

    pub fn rows(&self) -> usize {
        match self {
            Self::Optimizable { value, .. } => value.dims()[0],
            Self::Fixed {
                value: FixedTensor::Float(t),
                ..
            } => t.dims()[0],
            Self::Fixed {
                value: FixedTensor::Int(t),
                ..
            } => t.dims()[0],
        }
    }

    /// The value as a float tensor, converting integer data if needed.
    pub fn float(&self) -> Tensor<B, 2> {
        match self {
            Self::Optimizable { value, .. } => value.val(),
            Self::Fixed {
                value: FixedTensor::Float(t),
                ..
            } => t.clone(),
            Self::Fixed {
                value: FixedTensor::Int(t),
                ..
            } => t.clone().float(),
        }
    }

    /// Whether the underlying tensor records gradients.
    pub fn is_require_grad(&self) -> bool {
        match self {
            Self::Optimizable { value, .. } => value.val().is_require_grad(),
            Self::Fixed {
                value: FixedTensor::Float(t),
                ..
            } => t.is_require_grad(),
            Self::Fixed {
                value: FixedTensor::Int(_),
                ..
            } => false,
        }
    }

    fn keep_rows(self, indices: Tensor<B, 1, Int>) -> Self {
        let count = indices.dims()[0];
        let with_rows = |shape: Vec<usize>| {
            let mut shape = shape;
            if let Some(first) = shape.first_mut() {
                *first = count;
            }
            shape
        };

        match self {
            Self::Optimizable { shape, value } => {
                let (id, tensor, _) = value.consume();
                Self::Optimizable {
                    shape: with_rows(shape),
                    value: Param::initialized(id, tensor.select(0, indices).detach().require_grad()),
                }
            }
            Self::Fixed { shape, value } => Self::Fixed {
                shape: with_rows(shape),
                value: match value {
                    FixedTensor::Float(t) => FixedTensor::Float(t.select(0, indices)),
                    FixedTensor::Int(t) => FixedTensor::Int(t.select(0, indices)),
                },
            },
        }
    }
}

/// The learned representation of a scene: named tensors deserialized from a parameter archive.
#[derive(Clone)]
pub struct SceneParams<B: Backend> {
    params: BTreeMap<String, SceneParam<B>>,
}

fn matrix_dims(shape: &[usize]) -> [usize; 2] {
    match shape {
        [] => [1, 1],
        [rows, rest @ ..] => [*rows, rest.iter().product()],
    }
}

fn is_float_dtype(dtype: DType) -> bool {
    matches!(dtype, DType::F64 | DType::F32 | DType::F16 | DType::BF16)
}

impl<B: Backend> SceneParams<B> {
    /// Wrap raw arrays into scene parameters.
    ///
    /// Every array whose name is not in `exclude` becomes an optimizable float tensor that
    /// requires gradients. Excluded arrays keep their numeric kind and never track gradients.
    pub fn from_data(
        arrays: BTreeMap<String, TensorData>,
        exclude: &HashSet<String>,
        device: &B::Device,
    ) -> Result<Self, SceneError> {
        let _span = trace_span!("SceneParams::from_data").entered();

        let mut params = BTreeMap::new();
        for (name, data) in arrays {
            let shape = data.shape.clone();
            let dims = matrix_dims(&shape);
            let invalid = |e| invalid_data(&name, e);

            let param = if !exclude.contains(&name) {
                let values = data.convert::<f32>().into_vec::<f32>().map_err(invalid)?;
                let tensor = Tensor::<B, 2>::from_data(TensorData::new(values, dims), device);
                SceneParam::Optimizable {
                    shape,
                    value: Param::initialized(ParamId::new(), tensor.require_grad()),
                }
            } else if is_float_dtype(data.dtype) {
                let values = data.convert::<f32>().into_vec::<f32>().map_err(invalid)?;
                SceneParam::Fixed {
                    shape,
                    value: FixedTensor::Float(Tensor::from_data(
                        TensorData::new(values, dims),
                        device,
                    )),
                }
            } else {
                let values = data.convert::<i64>().into_vec::<i64>().map_err(invalid)?;
                SceneParam::Fixed {
                    shape,
                    value: FixedTensor::Int(Tensor::from_data(
                        TensorData::new(values, dims).convert::<B::IntElem>(),
                        device,
                    )),
                }
            };
            params.insert(name, param);
        }

        Ok(Self { params })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SceneParam<B>> {
        self.params.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SceneParam<B>)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Number of gaussians, taken from the means if present, otherwise from the first
    /// per-gaussian parameter.
    pub fn num_gaussians(&self) -> usize {
        if let Some(means) = self.params.get(MEANS_KEY) {
            return means.rows();
        }
        self.params
            .iter()
            .find(|(name, _)| !is_camera_key(name))
            .map_or(0, |(_, p)| p.rows())
    }

    /// Number of frames that have an optimized camera pose.
    pub fn num_camera_frames(&self) -> usize {
        self.params
            .get(CAM_TRANS_KEY)
            .and_then(|p| p.shape().last().copied())
            .unwrap_or(0)
    }

    pub fn has_camera_params(&self) -> bool {
        self.contains(CAM_ROTS_KEY) && self.contains(CAM_TRANS_KEY)
    }

    /// Camera to world transform of frame `frame`, as estimated during mapping.
    ///
    /// The stored parameters describe the world to camera transform. Returns `None` if the
    /// scene has no camera parameters.
    pub fn camera_pose(&self, frame: usize) -> Result<Option<Mat4>, SceneError> {
        let Some((rot_values, trans_values)) = self.camera_values()? else {
            return Ok(None);
        };

        let count = self.num_camera_frames();
        if frame >= count {
            return Err(SceneError::FrameOutOfRange { frame, count });
        }
        pose_at(&rot_values, &trans_values, count, frame).map(Some)
    }

    /// Camera to world transforms of every mapped frame, reading the camera tensors once.
    pub fn camera_poses(&self) -> Result<Option<Vec<Mat4>>, SceneError> {
        let _span = trace_span!("SceneParams::camera_poses").entered();

        let Some((rot_values, trans_values)) = self.camera_values()? else {
            return Ok(None);
        };

        let count = self.num_camera_frames();
        (0..count)
            .map(|frame| pose_at(&rot_values, &trans_values, count, frame))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn camera_values(&self) -> Result<Option<(Vec<f32>, Vec<f32>)>, SceneError> {
        let (Some(rots), Some(trans)) = (self.params.get(CAM_ROTS_KEY), self.params.get(CAM_TRANS_KEY))
        else {
            return Ok(None);
        };
        Ok(Some((
            read_floats(CAM_ROTS_KEY, rots)?,
            read_floats(CAM_TRANS_KEY, trans)?,
        )))
    }

    /// Count non-finite values of every float parameter, logging any problems.
    pub fn validate_values(&self) -> BTreeMap<String, ValueStats> {
        self.params
            .iter()
            .map(|(name, param)| (name.clone(), value_stats(&param.float(), name)))
            .collect()
    }
}

impl<B: AutodiffBackend> SceneParams<B> {
    /// View of the parameters that doesn't record any gradient history.
    pub fn valid(&self) -> SceneParams<B::InnerBackend> {
        let params = self
            .params
            .iter()
            .map(|(name, param)| {
                let inner = match param {
                    SceneParam::Optimizable { shape, value } => SceneParam::Optimizable {
                        shape: shape.clone(),
                        value: Param::initialized(value.id, value.val().inner()),
                    },
                    SceneParam::Fixed { shape, value } => SceneParam::Fixed {
                        shape: shape.clone(),
                        value: match value {
                            FixedTensor::Float(t) => FixedTensor::Float(t.clone().inner()),
                            FixedTensor::Int(t) => FixedTensor::Int(t.clone().inner()),
                        },
                    },
                };
                (name.clone(), inner)
            })
            .collect();
        SceneParams { params }
    }
}

fn invalid_data(name: &str, error: impl std::fmt::Debug) -> SceneError {
    SceneError::InvalidData {
        name: name.to_owned(),
        reason: format!("{error:?}"),
    }
}

fn is_camera_key(name: &str) -> bool {
    name == CAM_ROTS_KEY || name == CAM_TRANS_KEY
}

/// World to camera of `frame` inverted, from `[1, C, T]` rows flattened row-major.
fn pose_at(
    rot_values: &[f32],
    trans_values: &[f32],
    count: usize,
    frame: usize,
) -> Result<Mat4, SceneError> {
    // Component c of frame t is at c * T + t.
    let component = |name: &str, values: &[f32], c: usize| {
        values
            .get(c * count + frame)
            .copied()
            .ok_or_else(|| SceneError::InvalidData {
                name: name.to_owned(),
                reason: format!("missing component {c} for frame {frame}"),
            })
    };

    let w = component(CAM_ROTS_KEY, rot_values, 0)?;
    let x = component(CAM_ROTS_KEY, rot_values, 1)?;
    let y = component(CAM_ROTS_KEY, rot_values, 2)?;
    let z = component(CAM_ROTS_KEY, rot_values, 3)?;
    let translation = Vec3::new(
        component(CAM_TRANS_KEY, trans_values, 0)?,
        component(CAM_TRANS_KEY, trans_values, 1)?,
        component(CAM_TRANS_KEY, trans_values, 2)?,
    );

    let rotation = Quat::from_xyzw(x, y, z, w).normalize();
    let world_to_cam = Mat4::from_rotation_translation(rotation, translation);
    Ok(world_to_cam.inverse())
}

fn read_floats<B: Backend>(name: &str, param: &SceneParam<B>) -> Result<Vec<f32>, SceneError> {
    param
        .float()
        .into_data()
        .convert::<f32>()
        .into_vec::<f32>()
        .map_err(|e| invalid_data(name, e))
}

/// Remove every gaussian whose semantic id is one of `to_remove_ids`.
///
/// The same row mask is applied to every parameter except the camera poses, which are
/// indexed by frame. Scenes without `semantic_ids` are returned as is.
pub fn filter_semantic_params<B: Backend>(
    params: SceneParams<B>,
    to_remove_ids: &[i64],
) -> Result<SceneParams<B>, SceneError> {
    let Some(semantic_ids) = params.params.get(SEMANTIC_IDS_KEY) else {
        return Ok(params);
    };

    let [rows, cols] = matrix_dims(semantic_ids.shape());
    let ids = match semantic_ids {
        SceneParam::Fixed {
            value: FixedTensor::Int(t),
            ..
        } => t.clone().into_data(),
        other => other.float().into_data(),
    }
    .convert::<i64>()
    .into_vec::<i64>()
    .map_err(|e| invalid_data(SEMANTIC_IDS_KEY, e))?;

    let keep: Vec<i64> = ids
        .chunks(cols.max(1))
        .take(rows)
        .enumerate()
        .filter(|(_, row)| {
            !row.iter()
                .any(|id| to_remove_ids.contains(id))
        })
        .map(|(i, _)| i as i64)
        .collect();

    log::info!(
        "Filtering semantic ids {to_remove_ids:?}: keeping {} of {rows} gaussians",
        keep.len()
    );

    for (name, param) in &params.params {
        if !is_camera_key(name) && param.rows() != rows {
            return Err(SceneError::RowMismatch {
                name: name.clone(),
                found: param.rows(),
                expected: rows,
            });
        }
    }

    let device = semantic_ids.float().device();
    let num_kept = keep.len();
    let indices = Tensor::<B, 1, Int>::from_data(
        TensorData::new(keep, [num_kept]).convert::<B::IntElem>(),
        &device,
    );

    let params = params
        .params
        .into_iter()
        .map(|(name, param)| {
            let param = if is_camera_key(&name) {
                param
            } else {
                param.keep_rows(indices.clone())
            };
            (name, param)
        })
        .collect();

    Ok(SceneParams { params })
}
