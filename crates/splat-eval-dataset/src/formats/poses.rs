//! Parsers for the trajectory formats found in RGB-D datasets.
use std::path::Path;

use glam::{Mat4, Quat, Vec3};

use crate::DatasetError;

fn read_text(path: &Path) -> Result<String, DatasetError> {
    std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path, reason: impl Into<String>) -> DatasetError {
    DatasetError::InvalidFormat {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn parse_floats(path: &Path, text: &str) -> Result<Vec<f32>, DatasetError> {
    text.split_whitespace()
        .map(|v| {
            v.parse::<f32>()
                .map_err(|_| invalid(path, format!("'{v}' is not a number")))
        })
        .collect()
}

fn row_major(values: &[f32]) -> Mat4 {
    let mut cols = [0.0; 16];
    cols.copy_from_slice(&values[..16]);
    Mat4::from_cols_array(&cols).transpose()
}

/// One camera to world matrix per line, 16 values in row-major order.
pub fn read_matrix_rows(path: &Path) -> Result<Vec<Mat4>, DatasetError> {
    read_text(path)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let values = parse_floats(path, line)?;
            if values.len() != 16 {
                return Err(invalid(
                    path,
                    format!("expected 16 values per row, found {}", values.len()),
                ));
            }
            Ok(row_major(&values))
        })
        .collect()
}

/// A single 4x4 matrix written as text, one row per line.
pub fn read_matrix_file(path: &Path) -> Result<Mat4, DatasetError> {
    let values = parse_floats(path, &read_text(path)?)?;
    if values.len() != 16 {
        return Err(invalid(
            path,
            format!("expected a 4x4 matrix, found {} values", values.len()),
        ));
    }
    Ok(row_major(&values))
}

/// A single 4x4 matrix stored as a numpy array.
pub fn read_matrix_npy(path: &Path) -> Result<Mat4, DatasetError> {
    let data = splat_eval_serde::read_npy_file(path)?;
    let values = data
        .convert::<f32>()
        .into_vec::<f32>()
        .map_err(|e| invalid(path, format!("{e:?}")))?;
    if values.len() != 16 {
        return Err(invalid(
            path,
            format!("expected a 4x4 matrix, found {} values", values.len()),
        ));
    }
    Ok(row_major(&values))
}

/// Lines of `timestamp tx ty tz qx qy qz qw`, as written by the TUM benchmark tools. Lines
/// starting with `#` are comments.
pub fn read_tum_trajectory(path: &Path) -> Result<Vec<(f64, Mat4)>, DatasetError> {
    let text = read_text(path)?;
    let mut poses = vec![];

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let timestamp = fields
            .next()
            .and_then(|t| t.parse::<f64>().ok())
            .ok_or_else(|| invalid(path, format!("invalid timestamp in '{line}'")))?;
        let values = parse_floats(path, &fields.collect::<Vec<_>>().join(" "))?;
        let [tx, ty, tz, qx, qy, qz, qw] = values[..] else {
            return Err(invalid(path, format!("expected 8 fields in '{line}'")));
        };

        let rotation = Quat::from_xyzw(qx, qy, qz, qw).normalize();
        let pose = Mat4::from_rotation_translation(rotation, Vec3::new(tx, ty, tz));
        poses.push((timestamp, pose));
    }

    Ok(poses)
}

/// The pose recorded closest in time to `timestamp`.
pub fn nearest_pose(trajectory: &[(f64, Mat4)], timestamp: f64) -> Option<Mat4> {
    trajectory
        .iter()
        .min_by(|(a, _), (b, _)| (a - timestamp).abs().total_cmp(&(b - timestamp).abs()))
        .map(|(_, pose)| *pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn reads_row_major_trajectory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("traj.txt");
        std::fs::write(
            &path,
            "1 0 0 0.5 0 1 0 1.5 0 0 1 2.5 0 0 0 1\n1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1\n\n",
        )
        .expect("write");

        let poses = read_matrix_rows(&path).expect("Failed to read trajectory");
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0].w_axis.truncate(), Vec3::new(0.5, 1.5, 2.5));
        assert_eq!(poses[1], Mat4::IDENTITY);
    }

    #[test]
    fn short_rows_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("traj.txt");
        std::fs::write(&path, "1 0 0 0\n").expect("write");
        assert!(matches!(
            read_matrix_rows(&path),
            Err(DatasetError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn reads_infinite_matrix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("0.txt");
        std::fs::write(
            &path,
            "-inf -inf -inf -inf\n-inf -inf -inf -inf\n-inf -inf -inf -inf\n-inf -inf -inf -inf\n",
        )
        .expect("write");
        let pose = read_matrix_file(&path).expect("Failed to read pose");
        assert!(!pose.is_finite());
    }

    #[test]
    fn matches_nearest_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("groundtruth.txt");
        std::fs::write(
            &path,
            "# ground truth trajectory\n# timestamp tx ty tz qx qy qz qw\n\
             100.00 1 0 0 0 0 0 1\n\
             100.10 2 0 0 0 0 0 1\n\
             100.20 3 0 0 0 0 0 1\n",
        )
        .expect("write");

        let trajectory = read_tum_trajectory(&path).expect("Failed to read trajectory");
        assert_eq!(trajectory.len(), 3);

        let pose = nearest_pose(&trajectory, 100.13).expect("pose");
        assert_approx_eq!(pose.w_axis.x, 2.0, 1e-6);
        assert!(nearest_pose(&[], 1.0).is_none());
    }
}
