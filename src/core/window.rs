use crate::types::IqSample;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Analysis windows applied to each gate's time series before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowType {
    /// No tapering
    Rectangular,
    VonHann,
    Hamming,
    Blackman,
    BlackmanNuttall,
    /// Cosine-tapered, `alpha` is the tapered fraction of the window
    Tukey { alpha: f64 },
}

impl Default for WindowType {
    fn default() -> Self {
        WindowType::Rectangular
    }
}

impl WindowType {
    /// Compute window coefficients of length `n`.
    ///
    /// Coefficients are scaled so that the mean of w^2 is 1, which keeps the
    /// windowed power equal to the raw power for white noise.
    pub fn coefficients(&self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![1.0];
        }

        let nm1 = (n - 1) as f64;
        let mut window: Vec<f64> = (0..n)
            .map(|i| {
                let x = i as f64 / nm1;
                match *self {
                    WindowType::Rectangular => 1.0,
                    WindowType::VonHann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
                    WindowType::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
                    WindowType::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                    }
                    WindowType::BlackmanNuttall => {
                        0.3635819 - 0.4891775 * (2.0 * PI * x).cos()
                            + 0.1365995 * (4.0 * PI * x).cos()
                            - 0.0106411 * (6.0 * PI * x).cos()
                    }
                    WindowType::Tukey { alpha } => tukey_value(x, alpha),
                }
            })
            .collect();

        let mean_sq = window.iter().map(|w| w * w).sum::<f64>() / n as f64;
        if mean_sq > 0.0 {
            let scale = 1.0 / mean_sq.sqrt();
            window.iter_mut().for_each(|w| *w *= scale);
        } else {
            // a window of all zeros cannot be normalised, fall back to rectangular
            window.iter_mut().for_each(|w| *w = 1.0);
        }

        window
    }
}

fn tukey_value(x: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return 1.0;
    }
    let half = alpha / 2.0;
    if x < half {
        0.5 * (1.0 + (PI * (x / half - 1.0)).cos())
    } else if x > 1.0 - half {
        0.5 * (1.0 + (PI * ((x - 1.0) / half + 1.0)).cos())
    } else {
        1.0
    }
}

/// Multiply a time series by the window coefficients
pub fn apply_window(iq: &[IqSample], window: &[f64], out: &mut [IqSample]) {
    assert_eq!(iq.len(), window.len(), "window length");
    assert_eq!(iq.len(), out.len(), "windowed output length");
    for ((dst, &src), &w) in out.iter_mut().zip(iq.iter()).zip(window.iter()) {
        *dst = src * w;
    }
}
