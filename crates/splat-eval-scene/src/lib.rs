pub mod scene_params;
pub mod validation;

pub use scene_params::{
    CAM_ROTS_KEY, CAM_TRANS_KEY, FixedTensor, MEANS_KEY, SEMANTIC_IDS_KEY, SceneError, SceneParam,
    SceneParams, filter_semantic_params,
};
