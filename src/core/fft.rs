//! Forward/inverse transforms and spectral centering.
//!
//! Plans are built through a process-wide [`FftPlanCache`]; the cache mutex is
//! only held while a plan is looked up or a new transform length is planned.
//! Each worker owns its [`SpectralFft`] handle, so transforms themselves never
//! take a lock.

use crate::types::IqSample;
use rustfft::{Fft, FftPlanner};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

type PlanPair = (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>);

/// Shared cache of FFT plans keyed by transform length
pub struct FftPlanCache {
    // finished plans only, FftPlanner is not Send
    plans: Mutex<HashMap<usize, PlanPair>>,
}

impl fmt::Debug for FftPlanCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftPlanCache")
            .field("cached_lengths", &self.cached_lengths())
            .finish()
    }
}

impl FftPlanCache {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Build (or fetch) the transform pair for length `n`
    pub fn spectral_fft(&self, n: usize) -> SpectralFft {
        if n == 0 {
            return SpectralFft::empty();
        }

        let (forward, inverse) = {
            // a poisoned lock only means another worker panicked mid-plan;
            // the cached plans remain usable
            let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
            let pair = plans.entry(n).or_insert_with(|| {
                log::debug!("Planning FFT of length {}", n);
                let mut planner = FftPlanner::<f64>::new();
                (planner.plan_fft_forward(n), planner.plan_fft_inverse(n))
            });
            (Arc::clone(&pair.0), Arc::clone(&pair.1))
        };

        SpectralFft::from_plans(n, forward, inverse)
    }

    pub fn cached_lengths(&self) -> Vec<usize> {
        let plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        let mut lengths: Vec<usize> = plans.keys().copied().collect();
        lengths.sort_unstable();
        lengths
    }
}

impl Default for FftPlanCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Unitary forward/inverse FFT of one fixed length, with its own scratch space
pub struct SpectralFft {
    size: usize,
    plans: Option<PlanPair>,
    scratch: Vec<IqSample>,
    scale: f64,
}

impl fmt::Debug for SpectralFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralFft")
            .field("size", &self.size)
            .finish()
    }
}

impl SpectralFft {
    fn empty() -> Self {
        Self {
            size: 0,
            plans: None,
            scratch: Vec::new(),
            scale: 1.0,
        }
    }

    fn from_plans(size: usize, forward: Arc<dyn Fft<f64>>, inverse: Arc<dyn Fft<f64>>) -> Self {
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Self {
            size,
            plans: Some((forward, inverse)),
            scratch: vec![IqSample::new(0.0, 0.0); scratch_len],
            scale: 1.0 / (size as f64).sqrt(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform in place, scaled by 1/sqrt(n)
    pub fn forward_inplace(&mut self, buffer: &mut [IqSample]) {
        assert_eq!(buffer.len(), self.size, "forward FFT buffer length");
        if let Some((forward, _)) = &self.plans {
            forward.process_with_scratch(buffer, &mut self.scratch);
            let scale = self.scale;
            buffer.iter_mut().for_each(|v| *v *= scale);
        }
    }

    /// Inverse transform in place, scaled by 1/sqrt(n)
    pub fn inverse_inplace(&mut self, buffer: &mut [IqSample]) {
        assert_eq!(buffer.len(), self.size, "inverse FFT buffer length");
        if let Some((_, inverse)) = &self.plans {
            inverse.process_with_scratch(buffer, &mut self.scratch);
            let scale = self.scale;
            buffer.iter_mut().for_each(|v| *v *= scale);
        }
    }

    pub fn forward(&mut self, iq: &[IqSample], spectrum: &mut [IqSample]) {
        assert_eq!(iq.len(), spectrum.len(), "forward FFT output length");
        spectrum.copy_from_slice(iq);
        self.forward_inplace(spectrum);
    }

    pub fn inverse(&mut self, spectrum: &[IqSample], iq: &mut [IqSample]) {
        assert_eq!(iq.len(), spectrum.len(), "inverse FFT output length");
        iq.copy_from_slice(spectrum);
        self.inverse_inplace(iq);
    }
}

/// Move zero Doppler from index 0 to index n/2
pub fn center_spectrum<T>(spectrum: &mut [T]) {
    let half = spectrum.len() / 2;
    spectrum.rotate_right(half);
}

/// Undo [`center_spectrum`], moving zero Doppler back to index 0
pub fn uncenter_spectrum<T>(spectrum: &mut [T]) {
    let half = spectrum.len() / 2;
    spectrum.rotate_left(half);
}

/// Index of zero Doppler in a centered spectrum
pub fn zero_doppler_bin(n: usize) -> usize {
    n / 2
}

/// Radial velocity of a centered spectral bin
pub fn bin_velocity(bin: usize, n: usize, nyquist: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (bin as f64 - zero_doppler_bin(n) as f64) * 2.0 * nyquist / n as f64
}

/// Power of each spectral bin
pub fn load_power(spectrum: &[IqSample], power: &mut [f64]) {
    assert_eq!(spectrum.len(), power.len(), "power buffer length");
    for (p, s) in power.iter_mut().zip(spectrum.iter()) {
        *p = s.norm_sqr();
    }
}

/// Mean power of a time series
pub fn mean_power(iq: &[IqSample]) -> f64 {
    if iq.is_empty() {
        return 0.0;
    }
    iq.iter().map(|v| v.norm_sqr()).sum::<f64>() / iq.len() as f64
}
