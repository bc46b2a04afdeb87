use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use burn::prelude::Backend;
use splat_eval_scene::{SceneError, SceneParams};
use thiserror::Error;

pub mod npy;
mod npz;

pub use npz::{read_npy_file, read_npz, write_npz};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error while reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid archive")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid npy header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported array dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Object arrays can't be loaded without executing pickled code")]
    ObjectArray,

    #[error("Array data is truncated")]
    Truncated,

    #[error("Failed to read array '{name}'")]
    Entry {
        name: String,
        #[source]
        source: Box<ArchiveError>,
    },

    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Load a scene parameter archive onto `device`.
///
/// Arrays are first read into host memory and then uploaded in a second pass, so a corrupt
/// archive never leaves partially uploaded tensors around. Arrays named in `exclude` are kept
/// fixed, everything else becomes an optimizable parameter.
pub fn load_scene_params<B: Backend>(
    path: &Path,
    exclude: &HashSet<String>,
    device: &B::Device,
) -> Result<SceneParams<B>, ArchiveError> {
    let arrays = read_npz(path)?;
    log::info!("Loaded {} arrays from {}", arrays.len(), path.display());
    Ok(SceneParams::from_data(arrays, exclude, device)?)
}
