use burn::{prelude::Backend, tensor::Tensor};
use serde::Serialize;

/// Counts of non-finite values in a tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValueStats {
    pub total: usize,
    pub nan_count: usize,
    pub inf_count: usize,
}

impl ValueStats {
    pub fn is_finite(&self) -> bool {
        self.nan_count == 0 && self.inf_count == 0
    }
}

pub fn value_stats<B: Backend, const D: usize>(tensor: &Tensor<B, D>, name: &str) -> ValueStats {
    let values = match tensor.clone().into_data().convert::<f32>().into_vec::<f32>() {
        Ok(values) => values,
        Err(e) => {
            log::error!("Failed to read tensor '{name}' for validation: {e:?}");
            return ValueStats::default();
        }
    };

    let mut stats = ValueStats {
        total: values.len(),
        ..Default::default()
    };

    for &value in &values {
        if value.is_nan() {
            stats.nan_count += 1;
        } else if value.is_infinite() {
            stats.inf_count += 1;
        }
    }

    if !stats.is_finite() {
        log::error!(
            "Tensor '{}' contains invalid values: {} NaN, {} infinite (out of {} total).\nSample: {:?}",
            name,
            stats.nan_count,
            stats.inf_count,
            values.len(),
            &values[0..values.len().min(16)]
        );
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn counts_non_finite_values() {
        let device = Default::default();
        let tensor = Tensor::<NdArray, 1>::from_floats(
            [1.0, f32::NAN, f32::INFINITY, -f32::INFINITY, 0.0],
            &device,
        );
        let stats = value_stats(&tensor, "test");
        assert_eq!(
            stats,
            ValueStats {
                total: 5,
                nan_count: 1,
                inf_count: 2,
            }
        );
        assert!(!stats.is_finite());
    }
}
