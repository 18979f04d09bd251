use crate::types::{db_to_power, power_to_db};
use ndarray::Array1;

/// Minimum number of runs the spectrum is divided into
const MIN_NOISE_RUNS: usize = 8;

/// Spread below which all gates are treated as equally quiet (dB)
const FLAT_NOISE_SDEV_DB: f64 = 1.0e-6;

/// Estimate the noise power of one power spectrum.
///
/// The spectrum is treated as circular and divided into runs of n/8 bins (the
/// whole spectrum when n < 8). The run is slid one bin at a time and the
/// lowest run mean is returned, since the quietest run is the least likely to
/// contain signal.
pub fn estimate_noise(power: &[f64]) -> f64 {
    let n = power.len();
    if n == 0 {
        return 0.0;
    }

    let run_len = if n < MIN_NOISE_RUNS { n } else { n / MIN_NOISE_RUNS };

    let min_sum = (0..n)
        .map(|start| (0..run_len).map(|k| power[(start + k) % n]).sum::<f64>())
        .fold(f64::INFINITY, f64::min);

    (min_sum / run_len as f64).max(0.0)
}

/// Dwell-wide noise floor derived from the per-gate estimates
#[derive(Debug, Clone)]
pub struct DwellNoise {
    /// Noise floor in linear power
    pub floor: f64,
    pub mean_db: f64,
    pub sdev_db: f64,
    /// Number of gates that contributed to the floor
    pub n_quiet_gates: usize,
}

/// Two-stage dwell noise floor.
///
/// Per-gate noise estimates are converted to dB; gates below the dwell mean
/// are kept and the median of that quiet subset becomes the floor, so gates
/// contaminated by clutter or weather never raise it.
pub fn dwell_noise_floor(per_gate_noise: &Array1<f64>) -> DwellNoise {
    let n_gates = per_gate_noise.len();
    if n_gates == 0 {
        return DwellNoise {
            floor: 0.0,
            mean_db: power_to_db(0.0),
            sdev_db: 0.0,
            n_quiet_gates: 0,
        };
    }

    let noise_db: Vec<f64> = per_gate_noise.iter().map(|&p| power_to_db(p)).collect();
    let mean_db = noise_db.iter().sum::<f64>() / n_gates as f64;
    let variance = noise_db
        .iter()
        .map(|v| (v - mean_db) * (v - mean_db))
        .sum::<f64>()
        / n_gates as f64;
    let sdev_db = variance.max(0.0).sqrt();

    let mut quiet: Vec<f64> = if sdev_db < FLAT_NOISE_SDEV_DB {
        noise_db.clone()
    } else {
        noise_db.iter().copied().filter(|&v| v < mean_db).collect()
    };
    if quiet.is_empty() {
        quiet = noise_db;
    }

    quiet.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_db = median_of_sorted(&quiet);

    log::debug!(
        "Dwell noise: mean {:.2} dB, sdev {:.2} dB, floor {:.2} dB from {} of {} gates",
        mean_db,
        sdev_db,
        median_db,
        quiet.len(),
        n_gates
    );

    DwellNoise {
        floor: db_to_power(median_db),
        mean_db,
        sdev_db,
        n_quiet_gates: quiet.len(),
    }
}

fn median_of_sorted(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}
