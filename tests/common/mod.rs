#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use dwell_spectra::{DwellGeometry, IqGrid, IqSample, RadarCalibration};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub const N_GATES: usize = 10;
pub const N_SAMPLES: usize = 64;

/// Receiver noise per sample, -60 dBm
pub const NOISE_POWER: f64 = 1.0e-6;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn calibration() -> RadarCalibration {
    RadarCalibration {
        noise_dbm_hc: -60.0,
        noise_dbm_vc: -60.0,
        noise_dbm_hx: -60.0,
        noise_dbm_vx: -60.0,
        base_dbz_1km_hc: -20.0,
        base_dbz_1km_vc: -20.0,
        zdr_correction_db: 0.0,
    }
}

pub fn geometry() -> DwellGeometry {
    DwellGeometry {
        time: Utc.with_ymd_and_hms(2024, 5, 17, 18, 30, 0).unwrap(),
        start_range_km: 1.0,
        gate_spacing_km: 0.25,
        prt_sec: 0.001,
        wavelength_m: 0.1,
        nyquist_mps: None,
        antenna_rate_deg_per_sec: 0.0,
        beam_width_deg: 1.0,
    }
}

/// Complex white noise with the calibrated power per sample
pub fn noise_grid(rng: &mut StdRng, n_gates: usize, n_samples: usize) -> IqGrid {
    let normal = Normal::new(0.0, (NOISE_POWER / 2.0).sqrt()).unwrap();
    Array2::from_shape_fn((n_gates, n_samples), |_| {
        IqSample::new(normal.sample(rng), normal.sample(rng))
    })
}

/// Add a stationary (zero Doppler) echo of the given amplitude to every gate
pub fn add_ground_clutter(grid: &mut IqGrid, amplitude: impl Fn(usize) -> f64) {
    for (gate, mut row) in grid.outer_iter_mut().enumerate() {
        let a = amplitude(gate);
        row.iter_mut().for_each(|v| *v += IqSample::new(a, 0.0));
    }
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}
