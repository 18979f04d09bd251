use crate::core::products::PhaseFold;
use crate::types::{SpectraError, SpectraResult};
use ndarray::{ArrayView2, ArrayViewMut2};
use serde::{Deserialize, Serialize};

/// Lower bound applied to every kernel variance
const MIN_VARIANCE: f64 = 0.001;

/// Texture kernel size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    /// Kernel extent in range (must be odd)
    pub n_gates: usize,
    /// Kernel extent in Doppler (must be odd)
    pub n_bins: usize,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            n_gates: 3,
            n_bins: 5,
        }
    }
}

impl KernelParams {
    pub fn validate(&self) -> SpectraResult<()> {
        for (name, size) in [("gates", self.n_gates), ("bins", self.n_bins)] {
            if size == 0 || size % 2 == 0 {
                return Err(SpectraError::InvalidConfig(format!(
                    "Texture kernel {} must be odd and positive, got {}",
                    name, size
                )));
            }
        }
        Ok(())
    }
}

/// Half-open index range of a kernel centered on `center`.
///
/// Near the edges the kernel is shifted inward so it keeps its full size;
/// only when the dimension is smaller than the kernel is it truncated.
pub fn kernel_bounds(center: usize, kernel: usize, dim: usize) -> (usize, usize) {
    if dim <= kernel {
        return (0, dim);
    }
    let start = center.saturating_sub(kernel / 2).min(dim - kernel);
    (start, start + kernel)
}

/// Population variance of the values, clamped at the floor
fn clamped_variance(sum: f64, sum_sq: f64, count: usize) -> f64 {
    if count == 0 {
        return MIN_VARIANCE;
    }
    let mean = sum / count as f64;
    let var = sum_sq / count as f64 - mean * mean;
    if var.is_finite() {
        var.max(MIN_VARIANCE)
    } else {
        MIN_VARIANCE
    }
}

fn kernel_sdev<F>(field: &ArrayView2<f64>, gate: usize, bin: usize, kernel: &KernelParams, f: F) -> f64
where
    F: Fn(f64) -> f64,
{
    let (n_gates, n_bins) = field.dim();
    let (g0, g1) = kernel_bounds(gate, kernel.n_gates, n_gates);
    let (b0, b1) = kernel_bounds(bin, kernel.n_bins, n_bins);

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0;
    for g in g0..g1 {
        for b in b0..b1 {
            let v = f(field[[g, b]]);
            sum += v;
            sum_sq += v * v;
            count += 1;
        }
    }
    clamped_variance(sum, sum_sq, count).sqrt()
}

/// Reflectivity texture at one bin.
///
/// dBZ is clipped at 0 and squared before taking the kernel standard
/// deviation; TDBZ is the square root of that.
pub fn tdbz_at(dbz: &ArrayView2<f64>, gate: usize, bin: usize, kernel: &KernelParams) -> f64 {
    kernel_sdev(dbz, gate, bin, kernel, |v| {
        let clipped = v.max(0.0);
        clipped * clipped
    })
    .sqrt()
}

pub fn zdr_sdev_at(zdr: &ArrayView2<f64>, gate: usize, bin: usize, kernel: &KernelParams) -> f64 {
    kernel_sdev(zdr, gate, bin, kernel, |v| v)
}

/// Circular standard deviation of PHIDP at one bin, in degrees.
///
/// The kernel mean is taken from unit vectors (angles doubled and the result
/// halved when the dwell folds at 90), then the wrapped differences from that
/// mean give the deviation.
pub fn phidp_sdev_at(
    phidp: &ArrayView2<f64>,
    gate: usize,
    bin: usize,
    kernel: &KernelParams,
    fold: &PhaseFold,
) -> f64 {
    let (n_gates, n_bins) = phidp.dim();
    let (g0, g1) = kernel_bounds(gate, kernel.n_gates, n_gates);
    let (b0, b1) = kernel_bounds(bin, kernel.n_bins, n_bins);
    let factor = if fold.folds_at_90 { 2.0 } else { 1.0 };

    let mut sum_sin = 0.0;
    let mut sum_cos = 0.0;
    for g in g0..g1 {
        for b in b0..b1 {
            let angle = (phidp[[g, b]] * factor).to_radians();
            sum_sin += angle.sin();
            sum_cos += angle.cos();
        }
    }
    let mean = sum_sin.atan2(sum_cos).to_degrees() / factor;

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0;
    for g in g0..g1 {
        for b in b0..b1 {
            let diff = fold.wrap(phidp[[g, b]] - mean);
            sum += diff;
            sum_sq += diff * diff;
            count += 1;
        }
    }
    clamped_variance(sum, sum_sq, count).sqrt()
}

/// Fill a whole texture grid from a source field
pub fn fill_texture<F>(source: &ArrayView2<f64>, out: &mut ArrayViewMut2<f64>, f: F)
where
    F: Fn(&ArrayView2<f64>, usize, usize) -> f64,
{
    let (n_gates, n_bins) = source.dim();
    assert_eq!(out.dim(), (n_gates, n_bins), "texture grid dimensions");
    for gate in 0..n_gates {
        for bin in 0..n_bins {
            out[[gate, bin]] = f(source, gate, bin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn test_kernel_bounds_shift_inward() {
        assert_eq!(kernel_bounds(0, 5, 64), (0, 5));
        assert_eq!(kernel_bounds(1, 5, 64), (0, 5));
        assert_eq!(kernel_bounds(10, 5, 64), (8, 13));
        assert_eq!(kernel_bounds(63, 5, 64), (59, 64));
        assert_eq!(kernel_bounds(1, 5, 3), (0, 3));
    }

    #[test]
    fn test_uniform_field_hits_variance_floor() {
        let field = Array2::from_elem((10, 16), 12.0);
        let kernel = KernelParams::default();
        let floor = MIN_VARIANCE.sqrt();
        assert_abs_diff_eq!(zdr_sdev_at(&field.view(), 5, 5, &kernel), floor, epsilon = 1e-12);
        assert_abs_diff_eq!(tdbz_at(&field.view(), 0, 0, &kernel), floor.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_zdr_sdev_population() {
        // alternating 0 / 2 across bins in a 1 x 2 layout
        let field = Array2::from_shape_vec((1, 2), vec![0.0, 2.0]).unwrap();
        let kernel = KernelParams { n_gates: 1, n_bins: 3 };
        assert_abs_diff_eq!(zdr_sdev_at(&field.view(), 0, 0, &kernel), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tdbz_clips_negative_reflectivity() {
        let negative = Array2::from_shape_fn((3, 5), |(g, b)| -10.0 * (g + b) as f64);
        let kernel = KernelParams::default();
        let floor = MIN_VARIANCE.sqrt().sqrt();
        assert_abs_diff_eq!(tdbz_at(&negative.view(), 1, 2, &kernel), floor, epsilon = 1e-12);
    }

    #[test]
    fn test_phidp_sdev_across_the_wrap() {
        // values straddling +-180 are close together on the circle
        let values = vec![175.0, -175.0, 178.0, -178.0, 180.0];
        let field = Array2::from_shape_vec((1, 5), values).unwrap();
        let kernel = KernelParams { n_gates: 1, n_bins: 5 };
        let sdev = phidp_sdev_at(&field.view(), 0, 2, &kernel, &PhaseFold::at_180());
        assert!(sdev < 5.0, "sdev {}", sdev);

        let linear = zdr_sdev_at(&field.view(), 0, 2, &kernel);
        assert!(linear > 100.0);
    }

    #[test]
    fn test_phidp_sdev_with_90_fold() {
        let values = vec![88.0, -88.0, 89.0, -89.0, 87.0];
        let field = Array2::from_shape_vec((1, 5), values).unwrap();
        let kernel = KernelParams { n_gates: 1, n_bins: 5 };
        let sdev = phidp_sdev_at(&field.view(), 0, 2, &kernel, &PhaseFold::at_90());
        assert!(sdev < 5.0, "sdev {}", sdev);
    }

    #[test]
    fn test_never_nan() {
        let field = Array2::from_shape_vec((1, 3), vec![f64::MAX, -f64::MAX, 0.0]).unwrap();
        let kernel = KernelParams::default();
        assert!(zdr_sdev_at(&field.view(), 0, 1, &kernel).is_finite());
    }

    #[test]
    fn test_kernel_validation() {
        assert!(KernelParams::default().validate().is_ok());
        assert!(KernelParams { n_gates: 2, n_bins: 5 }.validate().is_err());
        assert!(KernelParams { n_gates: 3, n_bins: 0 }.validate().is_err());
    }
}
