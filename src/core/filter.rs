use crate::core::fft::{load_power, mean_power, SpectralFft};
use crate::core::noise::estimate_noise;
use crate::core::regression::ForsytheBasis;
use crate::core::window::apply_window;
use crate::types::{power_to_db, IqSample, SpectraError, SpectraResult};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Clutter filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClutterFilterParams {
    /// Pass the windowed series through unchanged
    None,
    /// Fixed-width notch around zero Doppler
    Notch { width_mps: f64 },
    /// Notch that widens while the clutter peak keeps falling off
    Adaptive {
        init_width_mps: f64,
        max_width_mps: f64,
    },
    /// Polynomial regression fit subtracted from the time series
    Regression {
        /// Fixed polynomial order, or `None` to pick it from the clutter-to-noise ratio
        order: Option<usize>,
        interp_across_notch: bool,
        cnr_exponent: f64,
        max_order: usize,
        clutter_width_mps: f64,
    },
}

impl Default for ClutterFilterParams {
    fn default() -> Self {
        ClutterFilterParams::None
    }
}

impl ClutterFilterParams {
    /// Regression filter with automatic order selection
    pub fn regression() -> Self {
        ClutterFilterParams::Regression {
            order: None,
            interp_across_notch: true,
            cnr_exponent: 0.67,
            max_order: 20,
            clutter_width_mps: 0.75,
        }
    }

    pub fn validate(&self) -> SpectraResult<()> {
        let check_width = |name: &str, width: f64| {
            if width.is_finite() && width >= 0.0 {
                Ok(())
            } else {
                Err(SpectraError::InvalidConfig(format!(
                    "Clutter filter {} must be finite and non-negative, got {}",
                    name, width
                )))
            }
        };

        match *self {
            ClutterFilterParams::None => Ok(()),
            ClutterFilterParams::Notch { width_mps } => check_width("width", width_mps),
            ClutterFilterParams::Adaptive {
                init_width_mps,
                max_width_mps,
            } => {
                check_width("initial width", init_width_mps)?;
                check_width("maximum width", max_width_mps)?;
                if max_width_mps < init_width_mps {
                    return Err(SpectraError::InvalidConfig(format!(
                        "Adaptive filter maximum width {} is below initial width {}",
                        max_width_mps, init_width_mps
                    )));
                }
                Ok(())
            }
            ClutterFilterParams::Regression {
                cnr_exponent,
                clutter_width_mps,
                ..
            } => {
                check_width("clutter width", clutter_width_mps)?;
                if !cnr_exponent.is_finite() {
                    return Err(SpectraError::InvalidConfig(
                        "Regression CNR exponent must be finite".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Per-dwell inputs a filter needs beyond the time series itself
#[derive(Debug, Clone, Copy)]
pub struct FilterContext {
    /// Noise power from calibration (per sample, linear)
    pub prior_noise: f64,
    pub nyquist_mps: f64,
    /// Spectrum width from antenna motion
    pub scan_width_mps: f64,
}

/// Statistics reported for one filtered gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOutcome {
    /// Raw power over filtered power
    pub filter_ratio: f64,
    pub spectral_noise: f64,
    /// Spectral noise relative to the prior noise
    pub spectral_snr: f64,
    /// Bins notched or attenuated on each side of zero Doppler
    pub notch_half_width: usize,
    pub regression_order: Option<usize>,
}

impl FilterOutcome {
    fn passthrough(prior_noise: f64) -> Self {
        Self {
            filter_ratio: 1.0,
            spectral_noise: prior_noise,
            spectral_snr: 1.0,
            notch_half_width: 0,
            regression_order: None,
        }
    }
}

/// Clutter filter bound to one transform length.
///
/// Holds the window, the FFT handle and scratch space so filtering a gate
/// never allocates.
#[derive(Debug)]
pub struct ClutterFilter {
    params: ClutterFilterParams,
    n_samples: usize,
    window: Vec<f64>,
    fft: SpectralFft,
    basis: Option<ForsytheBasis>,
    windowed: Vec<IqSample>,
    spectrum: Vec<IqSample>,
    residual: Vec<IqSample>,
    power: Vec<f64>,
    residual_power: Vec<f64>,
}

impl ClutterFilter {
    pub fn new(params: ClutterFilterParams, window: Vec<f64>, fft: SpectralFft) -> Self {
        let n_samples = window.len();
        assert_eq!(fft.size(), n_samples, "filter FFT length");

        let basis = match params {
            ClutterFilterParams::Regression { max_order, .. } => {
                Some(ForsytheBasis::new(n_samples, max_order))
            }
            _ => None,
        };

        Self {
            params,
            n_samples,
            window,
            fft,
            basis,
            windowed: vec![IqSample::zero(); n_samples],
            spectrum: vec![IqSample::zero(); n_samples],
            residual: vec![IqSample::zero(); n_samples],
            power: vec![0.0; n_samples],
            residual_power: vec![0.0; n_samples],
        }
    }

    pub fn params(&self) -> &ClutterFilterParams {
        &self.params
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn window(&self) -> &[f64] {
        &self.window
    }

    /// Filter one gate's raw time series.
    ///
    /// `out` receives the filtered series with the analysis window applied.
    /// When filtering leaves no usable power the windowed input is written
    /// instead and the ratio is reported as 1.
    pub fn filter(
        &mut self,
        raw: &[IqSample],
        ctx: &FilterContext,
        out: &mut [IqSample],
    ) -> FilterOutcome {
        assert_eq!(raw.len(), self.n_samples, "filter input length");
        assert_eq!(out.len(), self.n_samples, "filter output length");

        apply_window(raw, &self.window, &mut self.windowed);
        if self.n_samples == 0 {
            return FilterOutcome::passthrough(ctx.prior_noise);
        }

        let outcome = match self.params.clone() {
            ClutterFilterParams::None => {
                out.copy_from_slice(&self.windowed);
                return FilterOutcome::passthrough(ctx.prior_noise);
            }
            ClutterFilterParams::Notch { width_mps } => self.notch(width_mps, ctx, out),
            ClutterFilterParams::Adaptive {
                init_width_mps,
                max_width_mps,
            } => self.adaptive(init_width_mps, max_width_mps, ctx, out),
            ClutterFilterParams::Regression {
                order,
                interp_across_notch,
                cnr_exponent,
                clutter_width_mps,
                ..
            } => self.regression(
                raw,
                order,
                interp_across_notch,
                cnr_exponent,
                clutter_width_mps,
                ctx,
                out,
            ),
        };

        let raw_power = mean_power(&self.windowed);
        let filtered_power = mean_power(out);
        let finite = out.iter().all(|v| v.re.is_finite() && v.im.is_finite());
        if !finite || !filtered_power.is_finite() || filtered_power <= 0.0 {
            log::debug!(
                "Clutter filter left no usable power (raw {:.3e}), passing input through",
                raw_power
            );
            out.copy_from_slice(&self.windowed);
            return FilterOutcome::passthrough(ctx.prior_noise);
        }

        FilterOutcome {
            filter_ratio: raw_power / filtered_power,
            ..outcome
        }
    }

    fn half_width_bins(&self, width_mps: f64, nyquist: f64) -> usize {
        let n = self.n_samples;
        if nyquist <= 0.0 || n == 0 {
            return 0;
        }
        let bin_width = 2.0 * nyquist / n as f64;
        let half = (width_mps / 2.0 / bin_width).round().max(0.0) as usize;
        // leave at least one bin outside the notch
        half.min(n.saturating_sub(1) / 2)
    }

    fn notch(&mut self, width_mps: f64, ctx: &FilterContext, out: &mut [IqSample]) -> FilterOutcome {
        let n = self.n_samples;
        let half = self.half_width_bins(width_mps, ctx.nyquist_mps);

        self.fft.forward(&self.windowed, &mut self.spectrum);
        for k in notch_bins(half, n) {
            self.spectrum[k] = IqSample::zero();
        }

        load_power(&self.spectrum, &mut self.power);
        let spectral_noise = noise_outside_notch(&self.power, half);
        self.fft.inverse(&self.spectrum, out);

        FilterOutcome {
            filter_ratio: 1.0,
            spectral_noise,
            spectral_snr: noise_ratio(spectral_noise, ctx.prior_noise),
            notch_half_width: half,
            regression_order: None,
        }
    }

    fn adaptive(
        &mut self,
        init_width_mps: f64,
        max_width_mps: f64,
        ctx: &FilterContext,
        out: &mut [IqSample],
    ) -> FilterOutcome {
        let n = self.n_samples;
        self.fft.forward(&self.windowed, &mut self.spectrum);
        load_power(&self.spectrum, &mut self.power);

        let threshold = ctx.prior_noise.max(estimate_noise(&self.power));
        if self.power[0] <= threshold {
            // no clutter peak at zero Doppler
            out.copy_from_slice(&self.windowed);
            return FilterOutcome {
                filter_ratio: 1.0,
                spectral_noise: threshold,
                spectral_snr: noise_ratio(threshold, ctx.prior_noise),
                notch_half_width: 0,
                regression_order: None,
            };
        }

        let max_half = self.half_width_bins(max_width_mps, ctx.nyquist_mps);
        let mut half = self
            .half_width_bins(init_width_mps, ctx.nyquist_mps)
            .min(max_half);

        let p = &self.power;
        while half < max_half {
            let next = half + 1;
            let right = p[next];
            let left = p[n - next];
            let grow_right = right > threshold && right < p[half];
            let grow_left = left > threshold && left < p[(n - half) % n];
            if !(grow_right || grow_left) {
                break;
            }
            half = next;
        }

        let spectral_noise = noise_outside_notch(&self.power, half);
        for k in notch_bins(half, n) {
            let pk = self.power[k];
            if pk > spectral_noise && pk > 0.0 {
                self.spectrum[k] *= (spectral_noise / pk).sqrt();
            }
        }
        self.fft.inverse(&self.spectrum, out);

        FilterOutcome {
            filter_ratio: 1.0,
            spectral_noise,
            spectral_snr: noise_ratio(spectral_noise, ctx.prior_noise),
            notch_half_width: half,
            regression_order: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn regression(
        &mut self,
        raw: &[IqSample],
        order: Option<usize>,
        interp_across_notch: bool,
        cnr_exponent: f64,
        clutter_width_mps: f64,
        ctx: &FilterContext,
        out: &mut [IqSample],
    ) -> FilterOutcome {
        let n = self.n_samples;
        let basis = match &self.basis {
            Some(basis) => basis,
            None => {
                out.copy_from_slice(&self.windowed);
                return FilterOutcome::passthrough(ctx.prior_noise);
            }
        };

        let order = order.unwrap_or_else(|| {
            auto_regression_order(
                n,
                mean_power(raw),
                ctx.prior_noise,
                clutter_width_mps,
                ctx.scan_width_mps,
                ctx.nyquist_mps,
                cnr_exponent,
                basis.max_order(),
            )
        });
        let order_used = basis.subtract_fit(raw, order, &mut self.residual);

        // spectrum of the windowed residual
        let mut residual_windowed = std::mem::take(&mut self.spectrum);
        apply_window(&self.residual, &self.window, &mut residual_windowed);
        self.fft.forward_inplace(&mut residual_windowed);
        load_power(&residual_windowed, &mut self.residual_power);
        self.spectrum = residual_windowed;

        let half = if interp_across_notch {
            let half = ((n as f64 / 32.0).round() as usize).max((order_used + 1) / 2);
            interp_across_zero(&mut self.residual_power, half)
        } else {
            0
        };

        let spectral_noise = estimate_noise(&self.residual_power);

        if interp_across_notch && half > 0 {
            // attenuate the raw spectrum towards the infilled residual
            self.fft.forward(&self.windowed, &mut self.spectrum);
            load_power(&self.spectrum, &mut self.power);
            for k in 0..n {
                let pk = self.power[k];
                let ratio = if pk > 0.0 {
                    (self.residual_power[k] / pk).sqrt().min(1.0)
                } else {
                    0.0
                };
                self.spectrum[k] *= ratio;
            }
            self.fft.inverse(&self.spectrum, out);
        } else {
            apply_window(&self.residual, &self.window, out);
        }

        FilterOutcome {
            filter_ratio: 1.0,
            spectral_noise,
            spectral_snr: noise_ratio(spectral_noise, ctx.prior_noise),
            notch_half_width: half,
            regression_order: Some(order_used),
        }
    }
}

/// Polynomial order from the clutter-to-noise ratio and normalised clutter width
#[allow(clippy::too_many_arguments)]
pub fn auto_regression_order(
    n_samples: usize,
    raw_power: f64,
    prior_noise: f64,
    clutter_width_mps: f64,
    scan_width_mps: f64,
    nyquist_mps: f64,
    cnr_exponent: f64,
    max_order: usize,
) -> usize {
    let upper = max_order.min(n_samples.saturating_sub(2)).max(1);
    if nyquist_mps <= 0.0 || prior_noise <= 0.0 {
        return 1;
    }

    let cnr_db = (power_to_db(raw_power) - power_to_db(prior_noise)).max(0.0);
    let width = (clutter_width_mps.powi(2) + (2.0 * scan_width_mps).powi(2)).sqrt();
    let w_norm = width / (2.0 * nyquist_mps);
    let order = (1.0 + w_norm * n_samples as f64 * (cnr_db / 10.0).powf(cnr_exponent)).ceil();

    if order.is_finite() {
        (order.max(1.0) as usize).clamp(1, upper)
    } else {
        upper
    }
}

/// Uncentered bin indices within `half` bins of zero Doppler
fn notch_bins(half: usize, n: usize) -> impl Iterator<Item = usize> {
    (0..=half).flat_map(move |k| {
        let lower = (n - k) % n;
        std::iter::once(k).chain((k != 0 && lower != k).then_some(lower))
    })
}

/// Noise of the uncentered bins outside the notch, whole spectrum if none are left
fn noise_outside_notch(power: &[f64], half: usize) -> f64 {
    let end = power.len().saturating_sub(half);
    match power.get(half + 1..end) {
        Some(outside) if !outside.is_empty() => estimate_noise(outside),
        _ => estimate_noise(power),
    }
}

/// Linearly interpolate an uncentered power spectrum across `half` bins each
/// side of zero Doppler. Returns the number of bins actually bridged per side.
fn interp_across_zero(power: &mut [f64], half: usize) -> usize {
    let n = power.len();
    if n < 3 {
        return 0;
    }
    let half = half.min((n - 3) / 2);
    if half == 0 {
        return 0;
    }

    let start = power[n - half - 1];
    let end = power[half + 1];
    let span = (2 * half + 2) as f64;
    for step in 1..=(2 * half + 1) {
        let k = (n - half - 1 + step) % n;
        power[k] = start + (end - start) * step as f64 / span;
    }
    half
}

fn noise_ratio(noise: f64, prior: f64) -> f64 {
    if prior > 0.0 {
        noise / prior
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fft::FftPlanCache;
    use crate::core::window::WindowType;
    use approx::assert_abs_diff_eq;

    const N: usize = 64;

    fn ctx() -> FilterContext {
        FilterContext {
            prior_noise: 1.0e-4,
            nyquist_mps: 25.0,
            scan_width_mps: 0.0,
        }
    }

    fn make_filter(params: ClutterFilterParams, window: WindowType) -> ClutterFilter {
        let cache = FftPlanCache::new();
        ClutterFilter::new(params, window.coefficients(N), cache.spectral_fft(N))
    }

    /// Strong DC clutter plus a weak tone well away from zero Doppler
    fn clutter_plus_tone() -> Vec<IqSample> {
        (0..N)
            .map(|i| {
                IqSample::new(10.0, 0.0)
                    + IqSample::from_polar(0.1, 2.0 * std::f64::consts::PI * 16.0 * i as f64 / N as f64)
            })
            .collect()
    }

    fn bin_power(series: &[IqSample], bin: usize) -> f64 {
        let cache = FftPlanCache::new();
        let mut fft = cache.spectral_fft(series.len());
        let mut spec = vec![IqSample::zero(); series.len()];
        fft.forward(series, &mut spec);
        spec[bin].norm_sqr()
    }

    #[test]
    fn test_none_is_windowed_copy() {
        let window = WindowType::VonHann;
        let mut filter = make_filter(ClutterFilterParams::None, window);
        let raw = clutter_plus_tone();
        let mut out = vec![IqSample::zero(); N];
        let outcome = filter.filter(&raw, &ctx(), &mut out);

        let mut expected = vec![IqSample::zero(); N];
        apply_window(&raw, &window.coefficients(N), &mut expected);
        assert_eq!(out, expected);
        assert_eq!(outcome.filter_ratio, 1.0);
        assert_eq!(outcome.spectral_noise, ctx().prior_noise);
        assert_eq!(outcome.spectral_snr, 1.0);
    }

    #[test]
    fn test_filters_remove_dc_clutter() {
        let raw = clutter_plus_tone();
        for params in [
            ClutterFilterParams::Notch { width_mps: 1.0 },
            ClutterFilterParams::Adaptive {
                init_width_mps: 0.5,
                max_width_mps: 3.0,
            },
            ClutterFilterParams::Regression {
                order: Some(2),
                interp_across_notch: false,
                cnr_exponent: 0.67,
                max_order: 10,
                clutter_width_mps: 0.75,
            },
        ] {
            let mut filter = make_filter(params.clone(), WindowType::Rectangular);
            let mut out = vec![IqSample::zero(); N];
            let outcome = filter.filter(&raw, &ctx(), &mut out);

            assert!(bin_power(&raw, 0) > 1.0e3);
            assert!(
                bin_power(&out, 0) < 1.0e-3,
                "{:?} left {} at zero Doppler",
                params,
                bin_power(&out, 0)
            );
            // the tone survives
            assert!(bin_power(&out, 16) > 0.5 * bin_power(&raw, 16), "{:?}", params);
            assert!(outcome.filter_ratio > 100.0, "{:?}", params);
        }
    }

    #[test]
    fn test_regression_with_notch_infill() {
        let raw = clutter_plus_tone();
        let mut filter = make_filter(ClutterFilterParams::regression(), WindowType::Rectangular);
        let mut out = vec![IqSample::zero(); N];
        let outcome = filter.filter(&raw, &ctx(), &mut out);
        assert!(outcome.regression_order.is_some());
        assert!(outcome.notch_half_width >= 2);
        assert!(bin_power(&out, 0) < 1.0e-2 * bin_power(&raw, 0));
        assert!(out.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
    }

    #[test]
    fn test_all_zero_input_stays_finite() {
        let raw = vec![IqSample::zero(); N];
        for params in [
            ClutterFilterParams::None,
            ClutterFilterParams::Notch { width_mps: 1.0 },
            ClutterFilterParams::Adaptive {
                init_width_mps: 0.5,
                max_width_mps: 3.0,
            },
            ClutterFilterParams::regression(),
        ] {
            let mut filter = make_filter(params, WindowType::Hamming);
            let mut out = vec![IqSample::new(1.0, 1.0); N];
            let outcome = filter.filter(&raw, &ctx(), &mut out);
            assert_eq!(outcome.filter_ratio, 1.0);
            assert!(outcome.spectral_noise.is_finite());
            assert!(out.iter().all(|v| *v == IqSample::zero()));
        }
    }

    #[test]
    fn test_adaptive_passes_clean_signal() {
        // weather-like tone away from zero Doppler, no clutter
        let raw: Vec<IqSample> = (0..N)
            .map(|i| IqSample::from_polar(1.0, 2.0 * std::f64::consts::PI * 10.0 * i as f64 / N as f64))
            .collect();
        let mut filter = make_filter(
            ClutterFilterParams::Adaptive {
                init_width_mps: 0.5,
                max_width_mps: 3.0,
            },
            WindowType::Rectangular,
        );
        let mut out = vec![IqSample::zero(); N];
        let outcome = filter.filter(&raw, &ctx(), &mut out);
        assert_eq!(outcome.notch_half_width, 0);
        assert_abs_diff_eq!(outcome.filter_ratio, 1.0, epsilon = 1e-12);
        assert_eq!(out, raw);
    }

    #[test]
    fn test_auto_order_increases_with_cnr() {
        let low = auto_regression_order(64, 1.0e-3, 1.0e-4, 0.75, 0.0, 25.0, 0.67, 20);
        let high = auto_regression_order(64, 1.0e3, 1.0e-4, 0.75, 0.0, 25.0, 0.67, 20);
        assert!(low >= 1);
        assert!(high > low);
        assert!(high <= 20);
        // weak signal gives the minimum order
        assert_eq!(auto_regression_order(64, 1.0e-5, 1.0e-4, 0.75, 0.0, 25.0, 0.67, 20), 1);
    }

    #[test]
    fn test_notch_bins_are_symmetric() {
        let mut bins: Vec<usize> = notch_bins(2, 16).collect();
        bins.sort_unstable();
        assert_eq!(bins, vec![0, 1, 2, 14, 15]);
        assert_eq!(notch_bins(0, 16).collect::<Vec<_>>(), vec![0]);

        // the Nyquist bin of an even spectrum is only visited once
        let mut bins: Vec<usize> = notch_bins(2, 4).collect();
        bins.sort_unstable();
        assert_eq!(bins, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_noise_outside_notch() {
        let mut power = vec![2.0; 16];
        for k in [0, 1, 2, 14, 15] {
            power[k] = 1.0e4;
        }
        power[8] = 0.5;
        assert_abs_diff_eq!(noise_outside_notch(&power, 2), 0.5, epsilon = 1e-12);

        // a notch over the whole spectrum falls back to every bin
        let flat = vec![4.0; 16];
        assert_abs_diff_eq!(noise_outside_notch(&flat, 8), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_interp_across_zero() {
        let mut power = vec![1.0; 16];
        power[0] = 100.0;
        power[1] = 50.0;
        power[15] = 50.0;
        power[2] = 3.0;
        power[14] = 3.0;
        assert_eq!(interp_across_zero(&mut power, 1), 1);
        assert_abs_diff_eq!(power[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(power[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(power[15], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(ClutterFilterParams::Notch { width_mps: -1.0 }.validate().is_err());
        assert!(ClutterFilterParams::Adaptive {
            init_width_mps: 2.0,
            max_width_mps: 1.0
        }
        .validate()
        .is_err());
        assert!(ClutterFilterParams::regression().validate().is_ok());
    }
}
