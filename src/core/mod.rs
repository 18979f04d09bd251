//! Core dwell spectral processing modules

pub mod cmd;
pub mod diagnostics;
pub mod dwell;
pub mod fft;
pub mod filter;
pub mod grid;
pub mod interest;
pub mod noise;
pub mod products;
pub mod regression;
pub mod texture;
pub mod window;

// Re-export main types
pub use cmd::{CmdFeatures, CmdFusion, CmdParams, CmdScore, GateCmdSummary};
pub use diagnostics::DiagnosticSink;
pub use dwell::{
    ChannelData, ComputeReport, DwellSpectra, NoiseSource, SkipReason, SpectraParams, Stage,
    StageStatus,
};
pub use fft::{center_spectrum, uncenter_spectrum, FftPlanCache, SpectralFft};
pub use filter::{ClutterFilter, ClutterFilterParams, FilterContext, FilterOutcome};
pub use grid::DwellGrid;
pub use interest::{InterestMap, InterestMapParams, InterestPoint};
pub use noise::{dwell_noise_floor, estimate_noise, DwellNoise};
pub use products::PhaseFold;
pub use regression::ForsytheBasis;
pub use texture::KernelParams;
pub use window::WindowType;
