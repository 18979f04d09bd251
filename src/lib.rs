//! dwell-spectra: per-dwell spectral clutter identification and filtering
//!
//! Turns the I/Q time series of one radar dwell into Doppler power spectra,
//! derives polarimetric spectral products and texture features, fuses them
//! into a per-bin Clutter Mitigation Decision (CMD), and uses it to remove
//! ground clutter from the copolar time series before moments are estimated.
//!
//! One [`DwellSpectra`] is owned by each worker and reused across dwells. The
//! FFT plan cache and the diagnostics sink are the only shared resources.

pub mod core;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::types::{
    Channel, DwellGeometry, FieldGrid, IqGrid, IqSample, RadarCalibration, SpectraError,
    SpectraResult, SNR_SENTINEL_DB,
};

pub use crate::core::{
    ClutterFilterParams, CmdParams, ComputeReport, DiagnosticSink, DwellSpectra, FftPlanCache,
    InterestMapParams, InterestPoint, KernelParams, NoiseSource, PhaseFold, SkipReason,
    SpectraParams, Stage, StageStatus, WindowType,
};
