use chrono::{DateTime, Utc};
use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Complex baseband sample (I + jQ), scaled so that |iq|^2 is power in mW
pub type IqSample = Complex<f64>;

/// 2D complex grid (gates x samples)
pub type IqGrid = Array2<IqSample>;

/// 2D real grid (gates x spectral bins)
pub type FieldGrid = Array2<f64>;

/// Sentinel written into SNR and reflectivity bins at or below the noise floor
pub const SNR_SENTINEL_DB: f64 = -50.0;

/// Smallest power converted to dB, keeps log10 away from zero
pub const MIN_POWER: f64 = 1.0e-20;

/// Receiver channels of a dual-polarization radar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Co-polar horizontal
    Hc,
    /// Co-polar vertical
    Vc,
    /// Cross-polar horizontal
    Hx,
    /// Cross-polar vertical
    Vx,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Hc, Channel::Vc, Channel::Hx, Channel::Vx];

    /// Position of the channel in per-channel storage
    pub fn index(self) -> usize {
        match self {
            Channel::Hc => 0,
            Channel::Vc => 1,
            Channel::Hx => 2,
            Channel::Vx => 3,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Hc => write!(f, "HC"),
            Channel::Vc => write!(f, "VC"),
            Channel::Hx => write!(f, "HX"),
            Channel::Vx => write!(f, "VX"),
        }
    }
}

/// Dwell geometry and timing, supplied once per dwell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DwellGeometry {
    pub time: DateTime<Utc>,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub prt_sec: f64,
    pub wavelength_m: f64,
    /// Overrides the value derived from PRT and wavelength
    pub nyquist_mps: Option<f64>,
    pub antenna_rate_deg_per_sec: f64,
    pub beam_width_deg: f64,
}

impl Default for DwellGeometry {
    fn default() -> Self {
        Self {
            time: DateTime::<Utc>::default(),
            start_range_km: 0.15,
            gate_spacing_km: 0.15,
            prt_sec: 0.001,
            wavelength_m: 0.1068, // S-band
            nyquist_mps: None,
            antenna_rate_deg_per_sec: 0.0,
            beam_width_deg: 1.0,
        }
    }
}

impl DwellGeometry {
    /// Nyquist velocity in m/s
    pub fn nyquist(&self) -> f64 {
        match self.nyquist_mps {
            Some(nyquist) => nyquist,
            None if self.prt_sec > 0.0 => self.wavelength_m / (4.0 * self.prt_sec),
            None => 0.0,
        }
    }

    /// Range to the center of a gate in km
    pub fn gate_range_km(&self, gate: usize) -> f64 {
        self.start_range_km + gate as f64 * self.gate_spacing_km
    }

    /// Doppler spectrum width caused by antenna motion (Doviak & Zrnic), m/s
    pub fn scan_width_mps(&self) -> f64 {
        if self.beam_width_deg <= 0.0 {
            return 0.0;
        }
        let omega = self.antenna_rate_deg_per_sec.abs().to_radians();
        let theta = self.beam_width_deg.to_radians();
        self.wavelength_m * omega * std::f64::consts::LN_2.sqrt()
            / (2.0 * std::f64::consts::PI * theta)
    }
}

/// Receiver calibration, resolved into engineering units by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarCalibration {
    pub noise_dbm_hc: f64,
    pub noise_dbm_vc: f64,
    pub noise_dbm_hx: f64,
    pub noise_dbm_vx: f64,
    /// Reflectivity at 1 km for an SNR of 0 dB
    pub base_dbz_1km_hc: f64,
    pub base_dbz_1km_vc: f64,
    pub zdr_correction_db: f64,
}

impl Default for RadarCalibration {
    fn default() -> Self {
        Self {
            noise_dbm_hc: -77.0,
            noise_dbm_vc: -77.0,
            noise_dbm_hx: -77.0,
            noise_dbm_vx: -77.0,
            base_dbz_1km_hc: -45.0,
            base_dbz_1km_vc: -45.0,
            zdr_correction_db: 0.0,
        }
    }
}

impl RadarCalibration {
    pub fn noise_dbm(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Hc => self.noise_dbm_hc,
            Channel::Vc => self.noise_dbm_vc,
            Channel::Hx => self.noise_dbm_hx,
            Channel::Vx => self.noise_dbm_vx,
        }
    }

    /// Noise power in mW
    pub fn noise_power(&self, channel: Channel) -> f64 {
        db_to_power(self.noise_dbm(channel))
    }
}

/// Power to dB, floored at `MIN_POWER`
pub fn power_to_db(power: f64) -> f64 {
    if power.is_finite() && power > MIN_POWER {
        10.0 * power.log10()
    } else {
        10.0 * MIN_POWER.log10()
    }
}

pub fn db_to_power(db: f64) -> f64 {
    10.0_f64.powf(db / 10.0)
}

/// Error types for dwell spectral processing
#[derive(Debug, thiserror::Error)]
pub enum SpectraError {
    #[error("{channel} I/Q grid is {actual:?}, dwell is configured for {expected:?} (gates, samples)")]
    DimensionMismatch {
        channel: Channel,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Gate {gate} is outside the dwell ({n_gates} gates)")]
    GateOutOfRange { gate: usize, n_gates: usize },

    #[error("Diagnostics output error: {0}")]
    Diagnostics(#[from] std::io::Error),
}

/// Result type for dwell spectral operations
pub type SpectraResult<T> = Result<T, SpectraError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_nyquist_from_prt() {
        let geom = DwellGeometry {
            prt_sec: 0.001,
            wavelength_m: 0.1,
            ..Default::default()
        };
        assert_abs_diff_eq!(geom.nyquist(), 25.0, epsilon = 1e-12);

        let fixed = DwellGeometry {
            nyquist_mps: Some(12.5),
            ..geom
        };
        assert_abs_diff_eq!(fixed.nyquist(), 12.5);
    }

    #[test]
    fn test_power_db_conversion() {
        assert_abs_diff_eq!(power_to_db(100.0), 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(power_to_db(0.0), -200.0, epsilon = 1e-12);
        assert_abs_diff_eq!(db_to_power(-60.0), 1.0e-6, epsilon = 1e-18);
    }

    #[test]
    fn test_scan_width_is_zero_for_fixed_antenna() {
        let geom = DwellGeometry::default();
        assert_eq!(geom.scan_width_mps(), 0.0);
    }
}
