//! Per-bin polarimetric quantities computed from the copolar spectra.

use crate::types::{power_to_db, IqSample, SNR_SENTINEL_DB};
use num_traits::Zero;

/// Phase wrapping state detected from a dwell's PHIDP values.
///
/// Radars that transmit simultaneously on H and V see PHIDP confined to half
/// the circle, so the wrap point is at 90 degrees instead of 180.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseFold {
    pub folds_at_90: bool,
    pub fold_value: f64,
    pub fold_range: f64,
}

impl Default for PhaseFold {
    fn default() -> Self {
        Self::at_180()
    }
}

impl PhaseFold {
    pub fn at_90() -> Self {
        Self {
            folds_at_90: true,
            fold_value: 90.0,
            fold_range: 180.0,
        }
    }

    pub fn at_180() -> Self {
        Self {
            folds_at_90: false,
            fold_value: 180.0,
            fold_range: 360.0,
        }
    }

    /// Folds at 90 only when every value lies strictly inside (-90, 90)
    pub fn detect<I>(phidp_deg: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut any = false;
        for phidp in phidp_deg {
            any = true;
            if !(phidp > -90.0 && phidp < 90.0) {
                return Self::at_180();
            }
        }
        if any {
            Self::at_90()
        } else {
            Self::at_180()
        }
    }

    /// Wrap a phase difference into (-fold_value, fold_value]
    pub fn wrap(&self, diff_deg: f64) -> f64 {
        let fold = self.fold_value;
        fold - (fold - diff_deg).rem_euclid(2.0 * fold)
    }
}

/// Signal-to-noise ratio (dB) and reflectivity (dBZ) of one Hc bin.
///
/// Bins at or below the noise floor get the sentinel for both.
pub fn snr_and_dbz(power_hc: f64, noise: f64, base_dbz_1km: f64, range_km: f64) -> (f64, f64) {
    if noise <= 0.0 {
        return (SNR_SENTINEL_DB, SNR_SENTINEL_DB);
    }
    let snr = (power_hc - noise) / noise;
    if snr <= 0.0 || !snr.is_finite() {
        return (SNR_SENTINEL_DB, SNR_SENTINEL_DB);
    }
    let snr_db = 10.0 * snr.log10();
    let range_correction = 20.0 * range_km.max(0.001).log10();
    (snr_db, snr_db + base_dbz_1km + range_correction)
}

/// Differential reflectivity (dB) from copolar bin powers
pub fn zdr(power_hc: f64, power_vc: f64, correction_db: f64) -> f64 {
    power_to_db(power_hc) - power_to_db(power_vc) + correction_db
}

/// Differential phase (deg) of one bin
pub fn phidp(spec_hc: IqSample, spec_vc: IqSample) -> f64 {
    (spec_hc * spec_vc.conj()).arg().to_degrees()
}

/// Copolar correlation at `bin` over the bin and its two neighbours, circular.
///
/// Spectra shorter than three bins use every bin once.
pub fn rhohv(spec_hc: &[IqSample], spec_vc: &[IqSample], bin: usize) -> f64 {
    let n = spec_hc.len();
    assert_eq!(n, spec_vc.len(), "copolar spectrum length");
    if n == 0 {
        return 0.0;
    }

    let mut cross = IqSample::zero();
    let mut power_h = 0.0;
    let mut power_v = 0.0;
    let (first, count) = if n < 3 { (0, n) } else { (bin + n - 1, 3) };
    for step in 0..count {
        let k = (first + step) % n;
        cross += spec_hc[k] * spec_vc[k].conj();
        power_h += spec_hc[k].norm_sqr();
        power_v += spec_vc[k].norm_sqr();
    }

    let denom = (power_h * power_v).sqrt();
    if denom > 0.0 && denom.is_finite() {
        (cross.norm() / denom).clamp(0.0, 1.0)
    } else {
        0.0
    }
}
