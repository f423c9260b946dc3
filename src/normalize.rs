use crate::error::{TileError, TileResult};
use ndarray::{ArrayViewMutD, Axis};

/// Pixel normalization applied to each batch, channel by channel
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Normalization {
    /// Leave pixel values untouched
    #[default]
    Off,
    /// Map the 1st..99th percentile of the batch to 0..1
    Local,
    /// Subtract the batch mean, divide by its standard deviation
    LocalZScore,
    /// Map a fixed `min..max` range to 0..1
    Global { min: f32, max: f32 },
}

impl Normalization {
    /// Parse a mode name; `global` needs `bounds`.
    pub fn from_mode(mode: &str, bounds: Option<(f32, f32)>) -> TileResult<Self> {
        match mode.to_lowercase().as_str() {
            "off" => Ok(Normalization::Off),
            "local" => Ok(Normalization::Local),
            "local_z_score" => Ok(Normalization::LocalZScore),
            "global" => match bounds {
                Some((min, max)) if max > min => Ok(Normalization::Global { min, max }),
                Some((min, max)) => Err(TileError::UnsupportedNormalizationMode(format!(
                    "global range {min}..{max} is empty"
                ))),
                None => Err(TileError::UnsupportedNormalizationMode(
                    "global needs a (min, max) range".to_string(),
                )),
            },
            other => Err(TileError::UnsupportedNormalizationMode(other.to_string())),
        }
    }

    /// Normalize `pixels` in place, each index along `channel_axis` separately.
    pub fn apply(&self, mut pixels: ArrayViewMutD<'_, f32>, channel_axis: Axis) {
        if *self == Normalization::Off {
            return;
        }
        for mut channel in pixels.axis_iter_mut(channel_axis) {
            let (offset, scale) = match *self {
                Normalization::Off => return,
                Normalization::Global { min, max } => (min, max - min),
                Normalization::Local => {
                    let mut values: Vec<f32> = channel.iter().copied().collect();
                    values.sort_unstable_by(f32::total_cmp);
                    let low = percentile(&values, 1.0);
                    (low, percentile(&values, 99.0) - low)
                }
                Normalization::LocalZScore => {
                    let n = channel.len().max(1) as f64;
                    let mean = channel.iter().map(|&v| v as f64).sum::<f64>() / n;
                    let var = channel
                        .iter()
                        .map(|&v| (v as f64 - mean).powi(2))
                        .sum::<f64>()
                        / n;
                    (mean as f32, var.sqrt() as f32)
                }
            };
            let scale = if scale > f32::EPSILON { scale } else { 1.0 };
            channel.mapv_inplace(|v| (v - offset) / scale);
        }
    }
}

/// Percentile `q` (0..=100) of sorted `values` with linear interpolation.
fn percentile(values: &[f32], q: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    values[lo] + (values[hi] - values[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array2, IxDyn};

    #[test]
    fn test_from_mode() {
        assert_eq!(Normalization::from_mode("off", None).unwrap(), Normalization::Off);
        assert_eq!(Normalization::from_mode("LOCAL", None).unwrap(), Normalization::Local);
        assert_eq!(
            Normalization::from_mode("local_z_score", None).unwrap(),
            Normalization::LocalZScore
        );
        assert_eq!(
            Normalization::from_mode("global", Some((0.0, 255.0))).unwrap(),
            Normalization::Global {
                min: 0.0,
                max: 255.0
            }
        );
    }

    #[test]
    fn test_from_mode_errors() {
        for (mode, bounds) in [
            ("minmax", None),
            ("global", None),
            ("global", Some((3.0, 3.0))),
        ] {
            assert!(matches!(
                Normalization::from_mode(mode, bounds),
                Err(TileError::UnsupportedNormalizationMode(_))
            ));
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f32> = (0..101).map(|v| v as f32).collect();
        assert!((percentile(&values, 1.0) - 1.0).abs() < 1e-5);
        assert!((percentile(&values, 99.0) - 99.0).abs() < 1e-5);
        assert!((percentile(&[0.0, 10.0], 25.0) - 2.5).abs() < 1e-5);
    }

    #[test]
    fn test_global_normalization() {
        let mut pixels = Array::from_shape_vec(IxDyn(&[2, 2]), vec![0.0, 255.0, 51.0, 102.0]).unwrap();
        Normalization::Global {
            min: 0.0,
            max: 255.0,
        }
        .apply(pixels.view_mut(), Axis(0));
        assert!((pixels[[0, 1]] - 1.0).abs() < 1e-6);
        assert!((pixels[[1, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_local_normalization_per_channel() {
        // channel 0 spans 0..100, channel 1 spans 1000..1100
        let mut pixels = Array2::from_shape_fn((2, 101), |(c, i)| (c * 1000 + i) as f32).into_dyn();
        Normalization::Local.apply(pixels.view_mut(), Axis(0));
        for c in 0..2 {
            assert!((pixels[[c, 1]]).abs() < 1e-5);
            assert!((pixels[[c, 99]] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_z_score_normalization() {
        let mut pixels = Array2::from_shape_vec((1, 4), vec![1.0, 3.0, 1.0, 3.0]).unwrap().into_dyn();
        Normalization::LocalZScore.apply(pixels.view_mut(), Axis(0));
        let expected = [-1.0f32, 1.0, -1.0, 1.0];
        for (v, e) in pixels.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_constant_channel_is_shifted_only() {
        let mut pixels = Array2::from_elem((1, 5), 7.0f32).into_dyn();
        Normalization::LocalZScore.apply(pixels.view_mut(), Axis(0));
        assert!(pixels.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_off_leaves_pixels() {
        let mut pixels = Array2::from_elem((1, 3), 7.0f32).into_dyn();
        Normalization::Off.apply(pixels.view_mut(), Axis(0));
        assert!(pixels.iter().all(|&v| v == 7.0));
    }
}
