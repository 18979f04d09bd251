//! Per-dwell spectral processing.
//!
//! [`DwellSpectra`] owns every grid computed for one dwell and is reused from
//! dwell to dwell by a single worker. Storage is only reallocated when the
//! number of gates or samples changes.

use crate::core::cmd::{CmdFeatures, CmdFusion, CmdParams};
use crate::core::diagnostics::DiagnosticSink;
use crate::core::fft::{
    bin_velocity, center_spectrum, load_power, uncenter_spectrum, FftPlanCache, SpectralFft,
};
use crate::core::filter::{ClutterFilter, ClutterFilterParams, FilterContext};
use crate::core::grid::{resize_gate_array, DwellGrid};
use crate::core::noise::{dwell_noise_floor, estimate_noise};
use crate::core::products::{phidp, rhohv, snr_and_dbz, zdr, PhaseFold};
use crate::core::texture::{fill_texture, phidp_sdev_at, tdbz_at, zdr_sdev_at, KernelParams};
use crate::core::window::WindowType;
use crate::types::{
    power_to_db, Channel, DwellGeometry, IqSample, RadarCalibration, SpectraError, SpectraResult,
};
use ndarray::{Array1, ArrayView1, ArrayView2};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Where the noise level used for SNR comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseSource {
    /// Receiver calibration noise for the Hc channel
    Calibration,
    /// Dwell-wide spectral noise floor
    Spectral,
}

impl Default for NoiseSource {
    fn default() -> Self {
        NoiseSource::Calibration
    }
}

/// Processing parameters for [`DwellSpectra`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SpectraParams {
    pub window: WindowType,
    pub clutter_filter: ClutterFilterParams,
    pub kernel: KernelParams,
    pub cmd: CmdParams,
    pub noise_source: NoiseSource,
}

impl SpectraParams {
    pub fn validate(&self) -> SpectraResult<()> {
        if let WindowType::Tukey { alpha } = self.window {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(SpectraError::InvalidConfig(format!(
                    "Tukey window alpha must be within [0, 1], got {}",
                    alpha
                )));
            }
        }
        self.clutter_filter.validate()?;
        self.kernel.validate()?;
        self.cmd.validate()
    }
}

/// Processing stages, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PowerSpectra,
    Noise,
    Products,
    Texture,
    Cmd,
    IqFilter,
}

impl Stage {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PowerSpectra => "power spectra",
            Stage::Noise => "noise",
            Stage::Products => "polarimetric products",
            Stage::Texture => "texture",
            Stage::Cmd => "CMD",
            Stage::IqFilter => "IQ filtering",
        };
        f.write_str(name)
    }
}

/// Why a stage did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A channel the stage needs was not loaded for this dwell
    MissingChannel(Channel),
    /// A prerequisite stage has not run for this dwell
    StageNotRun(Stage),
}

/// Result of running one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Computed,
    Skipped(SkipReason),
}

impl StageStatus {
    pub fn is_computed(&self) -> bool {
        matches!(self, StageStatus::Computed)
    }
}

/// Status of every stage run by [`DwellSpectra::compute_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeReport {
    pub power_spectra: StageStatus,
    pub noise: StageStatus,
    pub products: StageStatus,
    pub texture: StageStatus,
    pub cmd: StageStatus,
    pub iq_filter: StageStatus,
}

/// Grids and per-gate filter statistics of one receiver channel
#[derive(Debug, Clone, Default)]
pub struct ChannelData {
    available: bool,
    iq: DwellGrid<IqSample>,
    iq_windowed: DwellGrid<IqSample>,
    spectrum: DwellGrid<IqSample>,
    power: DwellGrid<f64>,
    power_db: DwellGrid<f64>,
    filter_ratio: Array1<f64>,
    spectral_noise: Array1<f64>,
    spectral_snr: Array1<f64>,
}

impl ChannelData {
    fn resize(&mut self, n_gates: usize, n_samples: usize) -> bool {
        let mut reallocated = self.iq.resize(n_gates, n_samples);
        reallocated |= self.iq_windowed.resize(n_gates, n_samples);
        reallocated |= self.spectrum.resize(n_gates, n_samples);
        reallocated |= self.power.resize(n_gates, n_samples);
        reallocated |= self.power_db.resize(n_gates, n_samples);
        reallocated |= resize_gate_array(&mut self.filter_ratio, n_gates);
        reallocated |= resize_gate_array(&mut self.spectral_noise, n_gates);
        reallocated |= resize_gate_array(&mut self.spectral_snr, n_gates);
        reallocated
    }

    fn reset(&mut self) {
        self.available = false;
        self.iq.reset();
        self.iq_windowed.reset();
        self.spectrum.reset();
        self.power.reset();
        self.power_db.reset();
        self.filter_ratio.fill(0.0);
        self.spectral_noise.fill(0.0);
        self.spectral_snr.fill(0.0);
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Raw I/Q as loaded
    pub fn iq(&self) -> ArrayView2<'_, IqSample> {
        self.iq.view()
    }

    /// Windowed (and clutter-filtered) I/Q
    pub fn iq_windowed(&self) -> ArrayView2<'_, IqSample> {
        self.iq_windowed.view()
    }

    /// Complex spectrum with zero Doppler at the center bin
    pub fn spectrum(&self) -> ArrayView2<'_, IqSample> {
        self.spectrum.view()
    }

    pub fn power(&self) -> ArrayView2<'_, f64> {
        self.power.view()
    }

    pub fn power_db(&self) -> ArrayView2<'_, f64> {
        self.power_db.view()
    }

    pub fn filter_ratio(&self) -> ArrayView1<'_, f64> {
        self.filter_ratio.view()
    }

    pub fn spectral_noise(&self) -> ArrayView1<'_, f64> {
        self.spectral_noise.view()
    }

    pub fn spectral_snr(&self) -> ArrayView1<'_, f64> {
        self.spectral_snr.view()
    }
}

/// Spectral processing state for one dwell, reused across dwells
#[derive(Debug)]
pub struct DwellSpectra {
    params: SpectraParams,
    fusion: CmdFusion,
    calibration: Arc<RadarCalibration>,
    plan_cache: Arc<FftPlanCache>,
    diagnostics: Option<DiagnosticSink>,
    geometry: DwellGeometry,

    n_gates: usize,
    n_samples: usize,
    window: Vec<f64>,
    fft: SpectralFft,
    filter: ClutterFilter,

    channels: [ChannelData; 4],
    filtered_spec_hc: DwellGrid<IqSample>,
    filtered_spec_vc: DwellGrid<IqSample>,
    filtered_iq_hc: DwellGrid<IqSample>,
    filtered_iq_vc: DwellGrid<IqSample>,

    snr_db: DwellGrid<f64>,
    dbz: DwellGrid<f64>,
    zdr: DwellGrid<f64>,
    phidp: DwellGrid<f64>,
    rhohv: DwellGrid<f64>,
    tdbz: DwellGrid<f64>,
    zdr_sdev: DwellGrid<f64>,
    phidp_sdev: DwellGrid<f64>,
    snr_interest: DwellGrid<f64>,
    tdbz_interest: DwellGrid<f64>,
    zdr_sdev_interest: DwellGrid<f64>,
    phidp_sdev_interest: DwellGrid<f64>,
    cmd: DwellGrid<f64>,

    gate_noise_hc: Array1<f64>,
    gate_mean_cmd: Array1<f64>,
    gate_cmd_fraction: Array1<f64>,
    gate_is_clutter: Vec<bool>,
    noise_floor_hc: f64,
    fold: PhaseFold,
    status: [Option<StageStatus>; Stage::COUNT],

    raw_row: Vec<IqSample>,
    work_row: Vec<IqSample>,
    vc_row: Vec<IqSample>,
    power_row: Vec<f64>,
}

impl DwellSpectra {
    /// Create a dwell processor with default parameters
    pub fn new(
        calibration: Arc<RadarCalibration>,
        plan_cache: Arc<FftPlanCache>,
    ) -> SpectraResult<Self> {
        Self::with_params(SpectraParams::default(), calibration, plan_cache)
    }

    pub fn with_params(
        params: SpectraParams,
        calibration: Arc<RadarCalibration>,
        plan_cache: Arc<FftPlanCache>,
    ) -> SpectraResult<Self> {
        params.validate()?;
        let fusion = CmdFusion::new(&params.cmd)?;
        let fft = plan_cache.spectral_fft(0);
        let filter = ClutterFilter::new(
            params.clutter_filter.clone(),
            Vec::new(),
            plan_cache.spectral_fft(0),
        );

        Ok(Self {
            params,
            fusion,
            calibration,
            plan_cache,
            diagnostics: None,
            geometry: DwellGeometry::default(),
            n_gates: 0,
            n_samples: 0,
            window: Vec::new(),
            fft,
            filter,
            channels: Default::default(),
            filtered_spec_hc: DwellGrid::new(),
            filtered_spec_vc: DwellGrid::new(),
            filtered_iq_hc: DwellGrid::new(),
            filtered_iq_vc: DwellGrid::new(),
            snr_db: DwellGrid::new(),
            dbz: DwellGrid::new(),
            zdr: DwellGrid::new(),
            phidp: DwellGrid::new(),
            rhohv: DwellGrid::new(),
            tdbz: DwellGrid::new(),
            zdr_sdev: DwellGrid::new(),
            phidp_sdev: DwellGrid::new(),
            snr_interest: DwellGrid::new(),
            tdbz_interest: DwellGrid::new(),
            zdr_sdev_interest: DwellGrid::new(),
            phidp_sdev_interest: DwellGrid::new(),
            cmd: DwellGrid::new(),
            gate_noise_hc: Array1::zeros(0),
            gate_mean_cmd: Array1::zeros(0),
            gate_cmd_fraction: Array1::zeros(0),
            gate_is_clutter: Vec::new(),
            noise_floor_hc: 0.0,
            fold: PhaseFold::default(),
            status: [None; Stage::COUNT],
            raw_row: Vec::new(),
            work_row: Vec::new(),
            vc_row: Vec::new(),
            power_row: Vec::new(),
        })
    }

    /// Attach a shared sink for per-gate diagnostic dumps
    pub fn set_diagnostics(&mut self, sink: Option<DiagnosticSink>) {
        self.diagnostics = sink;
    }

    pub fn set_geometry(&mut self, geometry: DwellGeometry) {
        self.geometry = geometry;
    }

    pub fn set_calibration(&mut self, calibration: Arc<RadarCalibration>) {
        self.calibration = calibration;
    }

    /// Prepare for a new dwell.
    ///
    /// Buffers are reallocated only when the dimensions differ from the
    /// previous dwell. Every channel is marked unavailable and all grids are
    /// zeroed either way.
    pub fn set_dimensions(&mut self, n_gates: usize, n_samples: usize) {
        if (n_gates, n_samples) != (self.n_gates, self.n_samples) {
            log::info!(
                "Dwell dimensions changed to {} gates x {} samples",
                n_gates,
                n_samples
            );
            self.n_gates = n_gates;
            self.n_samples = n_samples;

            if self.window.len() != n_samples {
                self.window = self.params.window.coefficients(n_samples);
                self.fft = self.plan_cache.spectral_fft(n_samples);
                self.filter = ClutterFilter::new(
                    self.params.clutter_filter.clone(),
                    self.window.clone(),
                    self.plan_cache.spectral_fft(n_samples),
                );
                self.raw_row = vec![IqSample::zero(); n_samples];
                self.work_row = vec![IqSample::zero(); n_samples];
                self.vc_row = vec![IqSample::zero(); n_samples];
                self.power_row = vec![0.0; n_samples];
            }
        }

        let mut reallocated = false;
        for channel in self.channels.iter_mut() {
            reallocated |= channel.resize(n_gates, n_samples);
        }
        for grid in self.complex_grids_mut() {
            reallocated |= grid.resize(n_gates, n_samples);
        }
        for grid in self.field_grids_mut() {
            reallocated |= grid.resize(n_gates, n_samples);
        }
        reallocated |= resize_gate_array(&mut self.gate_noise_hc, n_gates);
        reallocated |= resize_gate_array(&mut self.gate_mean_cmd, n_gates);
        reallocated |= resize_gate_array(&mut self.gate_cmd_fraction, n_gates);
        if reallocated {
            log::debug!("Reallocated dwell grids");
        }

        for channel in self.channels.iter_mut() {
            channel.reset();
        }
        for grid in self.complex_grids_mut() {
            grid.reset();
        }
        for grid in self.field_grids_mut() {
            grid.reset();
        }
        self.gate_noise_hc.fill(0.0);
        self.gate_mean_cmd.fill(0.0);
        self.gate_cmd_fraction.fill(0.0);
        self.gate_is_clutter.clear();
        self.gate_is_clutter.resize(n_gates, false);
        self.noise_floor_hc = 0.0;
        self.fold = PhaseFold::default();
        self.status = [None; Stage::COUNT];
    }

    fn complex_grids_mut(&mut self) -> [&mut DwellGrid<IqSample>; 4] {
        [
            &mut self.filtered_spec_hc,
            &mut self.filtered_spec_vc,
            &mut self.filtered_iq_hc,
            &mut self.filtered_iq_vc,
        ]
    }

    fn field_grids_mut(&mut self) -> [&mut DwellGrid<f64>; 13] {
        [
            &mut self.snr_db,
            &mut self.dbz,
            &mut self.zdr,
            &mut self.phidp,
            &mut self.rhohv,
            &mut self.tdbz,
            &mut self.zdr_sdev,
            &mut self.phidp_sdev,
            &mut self.snr_interest,
            &mut self.tdbz_interest,
            &mut self.zdr_sdev_interest,
            &mut self.phidp_sdev_interest,
            &mut self.cmd,
        ]
    }

    /// Load one channel's I/Q for the current dwell (gates x samples)
    pub fn load_channel(
        &mut self,
        channel: Channel,
        iq: ArrayView2<'_, IqSample>,
    ) -> SpectraResult<()> {
        let expected = (self.n_gates, self.n_samples);
        if iq.dim() != expected {
            return Err(SpectraError::DimensionMismatch {
                channel,
                expected,
                actual: iq.dim(),
            });
        }

        let data = &mut self.channels[channel.index()];
        data.iq.view_mut().assign(&iq);
        data.available = true;
        // anything derived earlier no longer matches the loaded data
        self.status = [None; Stage::COUNT];
        log::debug!("Loaded {} channel", channel);
        Ok(())
    }

    /// Run every stage in dependency order
    pub fn compute_all(&mut self) -> ComputeReport {
        log::info!(
            "Processing dwell at {}: {} gates x {} samples",
            self.geometry.time,
            self.n_gates,
            self.n_samples
        );

        let power_spectra = self.compute_power_spectra();
        let noise = self.compute_noise();
        let products = self.compute_products();
        let texture = self.compute_texture();
        let cmd = self.compute_cmd();
        let iq_filter = self.filter_iq_with_cmd();

        ComputeReport {
            power_spectra,
            noise,
            products,
            texture,
            cmd,
            iq_filter,
        }
    }

    /// Status of a stage for the current dwell, `None` if it has not been attempted
    pub fn stage_status(&self, stage: Stage) -> Option<StageStatus> {
        self.status[stage.index()]
    }

    fn record(&mut self, stage: Stage, status: StageStatus) -> StageStatus {
        self.status[stage.index()] = Some(status);
        status
    }

    fn require_stage(&mut self, stage: Stage, needs: Stage) -> Option<StageStatus> {
        match self.status[needs.index()] {
            Some(StageStatus::Computed) => None,
            Some(StageStatus::Skipped(SkipReason::MissingChannel(channel))) => {
                log::debug!("Skipping {} stage: {} channel not loaded", stage, channel);
                Some(self.record(stage, StageStatus::Skipped(SkipReason::MissingChannel(channel))))
            }
            _ => {
                log::warn!("Skipping {} stage: {} has not run for this dwell", stage, needs);
                Some(self.record(stage, StageStatus::Skipped(SkipReason::StageNotRun(needs))))
            }
        }
    }

    fn require_channels(&mut self, stage: Stage, channels: &[Channel]) -> Option<StageStatus> {
        let missing = channels
            .iter()
            .copied()
            .find(|ch| !self.channels[ch.index()].available)?;
        log::debug!("Skipping {} stage: {} channel not loaded", stage, missing);
        Some(self.record(stage, StageStatus::Skipped(SkipReason::MissingChannel(missing))))
    }

    /// Window, clutter-filter and transform every loaded channel
    pub fn compute_power_spectra(&mut self) -> StageStatus {
        let ctx_base = FilterContext {
            prior_noise: 0.0,
            nyquist_mps: self.geometry.nyquist(),
            scan_width_mps: self.geometry.scan_width_mps(),
        };

        let mut n_loaded = 0;
        for channel in Channel::ALL {
            if !self.channels[channel.index()].available {
                continue;
            }
            n_loaded += 1;
            let ctx = FilterContext {
                prior_noise: self.calibration.noise_power(channel),
                ..ctx_base
            };

            let data = &mut self.channels[channel.index()];
            for gate in 0..self.n_gates {
                data.iq.copy_row_into(gate, &mut self.raw_row);
                let outcome = self.filter.filter(&self.raw_row, &ctx, &mut self.work_row);
                data.filter_ratio[gate] = outcome.filter_ratio;
                data.spectral_noise[gate] = outcome.spectral_noise;
                data.spectral_snr[gate] = outcome.spectral_snr;
                data.iq_windowed.set_row(gate, &self.work_row);

                self.fft.forward_inplace(&mut self.work_row);
                center_spectrum(&mut self.work_row);
                load_power(&self.work_row, &mut self.power_row);
                data.spectrum.set_row(gate, &self.work_row);
                data.power.set_row(gate, &self.power_row);
                for (dst, &p) in data.power_db.row_mut(gate).iter_mut().zip(self.power_row.iter()) {
                    *dst = power_to_db(p);
                }
            }
        }

        if n_loaded == 0 {
            log::debug!("Skipping {} stage: no channels loaded", Stage::PowerSpectra);
            return self.record(
                Stage::PowerSpectra,
                StageStatus::Skipped(SkipReason::MissingChannel(Channel::Hc)),
            );
        }
        log::debug!("Computed power spectra for {} channels", n_loaded);
        self.record(Stage::PowerSpectra, StageStatus::Computed)
    }

    /// Per-gate and dwell-wide noise of the Hc channel
    pub fn compute_noise(&mut self) -> StageStatus {
        if let Some(status) = self.require_stage(Stage::Noise, Stage::PowerSpectra) {
            return status;
        }
        if let Some(status) = self.require_channels(Stage::Noise, &[Channel::Hc]) {
            return status;
        }

        let hc = &self.channels[Channel::Hc.index()];
        for gate in 0..self.n_gates {
            hc.power.copy_row_into(gate, &mut self.power_row);
            self.gate_noise_hc[gate] = estimate_noise(&self.power_row);
        }
        let noise = dwell_noise_floor(&self.gate_noise_hc);
        self.noise_floor_hc = noise.floor;
        self.record(Stage::Noise, StageStatus::Computed)
    }

    fn snr_noise(&self) -> f64 {
        match self.params.noise_source {
            NoiseSource::Calibration => self.calibration.noise_power(Channel::Hc),
            NoiseSource::Spectral => self.noise_floor_hc,
        }
    }

    /// SNR, dBZ, ZDR, PHIDP and RHOHV for every bin, then the dwell fold range
    pub fn compute_products(&mut self) -> StageStatus {
        if let Some(status) = self.require_stage(Stage::Products, Stage::PowerSpectra) {
            return status;
        }
        if let Some(status) = self.require_channels(Stage::Products, &[Channel::Hc, Channel::Vc]) {
            return status;
        }
        if self.params.noise_source == NoiseSource::Spectral {
            if let Some(status) = self.require_stage(Stage::Products, Stage::Noise) {
                return status;
            }
        }

        let noise = self.snr_noise();
        let base_dbz = self.calibration.base_dbz_1km_hc;
        let zdr_correction = self.calibration.zdr_correction_db;

        for gate in 0..self.n_gates {
            let range_km = self.geometry.gate_range_km(gate);
            self.channels[Channel::Hc.index()]
                .spectrum
                .copy_row_into(gate, &mut self.work_row);
            self.channels[Channel::Vc.index()]
                .spectrum
                .copy_row_into(gate, &mut self.vc_row);

            for bin in 0..self.n_samples {
                let power_hc = self.work_row[bin].norm_sqr();
                let power_vc = self.vc_row[bin].norm_sqr();
                let (snr_db, dbz) = snr_and_dbz(power_hc, noise, base_dbz, range_km);
                self.snr_db[[gate, bin]] = snr_db;
                self.dbz[[gate, bin]] = dbz;
                self.zdr[[gate, bin]] = zdr(power_hc, power_vc, zdr_correction);
                self.phidp[[gate, bin]] = phidp(self.work_row[bin], self.vc_row[bin]);
                self.rhohv[[gate, bin]] = rhohv(&self.work_row, &self.vc_row, bin);
            }
        }

        self.fold = PhaseFold::detect(self.phidp.as_array().iter().copied());
        log::debug!(
            "Polarimetric products computed, PHIDP folds at {}",
            self.fold.fold_value
        );
        self.record(Stage::Products, StageStatus::Computed)
    }

    /// TDBZ, SDEV(ZDR) and SDEV(PHIDP) over the texture kernel
    pub fn compute_texture(&mut self) -> StageStatus {
        if let Some(status) = self.require_stage(Stage::Texture, Stage::Products) {
            return status;
        }

        let kernel = self.params.kernel;
        let fold = self.fold;
        fill_texture(&self.dbz.view(), &mut self.tdbz.view_mut(), |f, g, b| {
            tdbz_at(f, g, b, &kernel)
        });
        fill_texture(&self.zdr.view(), &mut self.zdr_sdev.view_mut(), |f, g, b| {
            zdr_sdev_at(f, g, b, &kernel)
        });
        fill_texture(&self.phidp.view(), &mut self.phidp_sdev.view_mut(), |f, g, b| {
            phidp_sdev_at(f, g, b, &kernel, &fold)
        });
        log::debug!(
            "Texture computed with a {} x {} kernel",
            kernel.n_gates,
            kernel.n_bins
        );
        self.record(Stage::Texture, StageStatus::Computed)
    }

    /// Fuse the features into CMD and summarise each gate
    pub fn compute_cmd(&mut self) -> StageStatus {
        if let Some(status) = self.require_stage(Stage::Cmd, Stage::Texture) {
            return status;
        }

        let mut n_clutter_gates = 0;
        for gate in 0..self.n_gates {
            for bin in 0..self.n_samples {
                let score = self.fusion.score(&CmdFeatures {
                    snr_db: self.snr_db[[gate, bin]],
                    tdbz: self.tdbz[[gate, bin]],
                    zdr_sdev: self.zdr_sdev[[gate, bin]],
                    phidp_sdev: self.phidp_sdev[[gate, bin]],
                });
                self.snr_interest[[gate, bin]] = score.snr_interest;
                self.tdbz_interest[[gate, bin]] = score.tdbz_interest;
                self.zdr_sdev_interest[[gate, bin]] = score.zdr_sdev_interest;
                self.phidp_sdev_interest[[gate, bin]] = score.phidp_sdev_interest;
                self.cmd[[gate, bin]] = score.cmd;
            }

            let summary = self.fusion.summarize_gate(self.cmd.row(gate).iter());
            self.gate_mean_cmd[gate] = summary.mean_cmd;
            self.gate_cmd_fraction[gate] = summary.fraction_detected;
            self.gate_is_clutter[gate] = summary.is_clutter;
            if summary.is_clutter {
                n_clutter_gates += 1;
            }
        }

        log::debug!(
            "CMD computed, {} of {} gates flagged as clutter",
            n_clutter_gates,
            self.n_gates
        );
        self.record(Stage::Cmd, StageStatus::Computed)
    }

    /// Remove CMD-flagged bins from the copolar spectra and rebuild their I/Q
    pub fn filter_iq_with_cmd(&mut self) -> StageStatus {
        if let Some(status) = self.require_stage(Stage::IqFilter, Stage::Cmd) {
            return status;
        }

        let threshold = self.fusion.moments_threshold();
        let mut n_removed = 0usize;
        for channel in [Channel::Hc, Channel::Vc] {
            for gate in 0..self.n_gates {
                self.channels[channel.index()]
                    .spectrum
                    .copy_row_into(gate, &mut self.work_row);
                for bin in 0..self.n_samples {
                    if self.cmd[[gate, bin]] > threshold {
                        self.work_row[bin] = IqSample::zero();
                        n_removed += 1;
                    }
                }

                let (filtered_spec, filtered_iq) = match channel {
                    Channel::Hc => (&mut self.filtered_spec_hc, &mut self.filtered_iq_hc),
                    _ => (&mut self.filtered_spec_vc, &mut self.filtered_iq_vc),
                };
                filtered_spec.set_row(gate, &self.work_row);
                uncenter_spectrum(&mut self.work_row);
                self.fft.inverse_inplace(&mut self.work_row);
                filtered_iq.set_row(gate, &self.work_row);
            }
        }

        log::debug!("IQ filtering removed {} copolar bins", n_removed);
        self.record(Stage::IqFilter, StageStatus::Computed)
    }

    pub fn params(&self) -> &SpectraParams {
        &self.params
    }

    pub fn geometry(&self) -> &DwellGeometry {
        &self.geometry
    }

    pub fn calibration(&self) -> &RadarCalibration {
        &self.calibration
    }

    pub fn n_gates(&self) -> usize {
        self.n_gates
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn window(&self) -> &[f64] {
        &self.window
    }

    pub fn channel(&self, channel: Channel) -> &ChannelData {
        &self.channels[channel.index()]
    }

    pub fn is_available(&self, channel: Channel) -> bool {
        self.channels[channel.index()].available
    }

    pub fn snr_db(&self) -> ArrayView2<'_, f64> {
        self.snr_db.view()
    }

    pub fn dbz(&self) -> ArrayView2<'_, f64> {
        self.dbz.view()
    }

    pub fn zdr(&self) -> ArrayView2<'_, f64> {
        self.zdr.view()
    }

    pub fn phidp(&self) -> ArrayView2<'_, f64> {
        self.phidp.view()
    }

    pub fn rhohv(&self) -> ArrayView2<'_, f64> {
        self.rhohv.view()
    }

    pub fn tdbz(&self) -> ArrayView2<'_, f64> {
        self.tdbz.view()
    }

    pub fn zdr_sdev(&self) -> ArrayView2<'_, f64> {
        self.zdr_sdev.view()
    }

    pub fn phidp_sdev(&self) -> ArrayView2<'_, f64> {
        self.phidp_sdev.view()
    }

    pub fn snr_interest(&self) -> ArrayView2<'_, f64> {
        self.snr_interest.view()
    }

    pub fn tdbz_interest(&self) -> ArrayView2<'_, f64> {
        self.tdbz_interest.view()
    }

    pub fn zdr_sdev_interest(&self) -> ArrayView2<'_, f64> {
        self.zdr_sdev_interest.view()
    }

    pub fn phidp_sdev_interest(&self) -> ArrayView2<'_, f64> {
        self.phidp_sdev_interest.view()
    }

    pub fn cmd(&self) -> ArrayView2<'_, f64> {
        self.cmd.view()
    }

    /// CMD-filtered centered spectrum, copolar channels only
    pub fn filtered_spectrum(&self, channel: Channel) -> Option<ArrayView2<'_, IqSample>> {
        match channel {
            Channel::Hc => Some(self.filtered_spec_hc.view()),
            Channel::Vc => Some(self.filtered_spec_vc.view()),
            _ => None,
        }
    }

    /// CMD-filtered I/Q, copolar channels only
    pub fn filtered_iq(&self, channel: Channel) -> Option<ArrayView2<'_, IqSample>> {
        match channel {
            Channel::Hc => Some(self.filtered_iq_hc.view()),
            Channel::Vc => Some(self.filtered_iq_vc.view()),
            _ => None,
        }
    }

    pub fn gate_noise_hc(&self) -> ArrayView1<'_, f64> {
        self.gate_noise_hc.view()
    }

    /// Dwell-wide Hc noise floor (linear power)
    pub fn noise_floor_hc(&self) -> f64 {
        self.noise_floor_hc
    }

    pub fn gate_mean_cmd(&self) -> ArrayView1<'_, f64> {
        self.gate_mean_cmd.view()
    }

    pub fn gate_cmd_fraction(&self) -> ArrayView1<'_, f64> {
        self.gate_cmd_fraction.view()
    }

    pub fn gate_is_clutter(&self) -> &[bool] {
        &self.gate_is_clutter
    }

    pub fn phase_fold(&self) -> PhaseFold {
        self.fold
    }

    fn check_gate(&self, gate: usize) -> SpectraResult<()> {
        if gate < self.n_gates {
            Ok(())
        } else {
            Err(SpectraError::GateOutOfRange {
                gate,
                n_gates: self.n_gates,
            })
        }
    }

    /// Write a one-line summary of a gate to the diagnostics sink, if any
    pub fn write_gate_summary(&self, gate: usize) -> SpectraResult<()> {
        self.check_gate(gate)?;
        let sink = match &self.diagnostics {
            Some(sink) => sink,
            None => return Ok(()),
        };

        let hc = &self.channels[Channel::Hc.index()];
        let block = format!(
            "{} gate {:4} range {:8.3} km noise {:8.2} dB filter_ratio {:10.3} mean_cmd {:.3} frac {:.3} clutter {}\n",
            self.geometry.time.format("%Y-%m-%dT%H:%M:%S%.3f"),
            gate,
            self.geometry.gate_range_km(gate),
            power_to_db(self.gate_noise_hc[gate]),
            hc.filter_ratio[gate],
            self.gate_mean_cmd[gate],
            self.gate_cmd_fraction[gate],
            self.gate_is_clutter[gate],
        );
        sink.write_block(&block)
    }

    /// Dump every spectral bin of a gate to the diagnostics sink, if any
    pub fn write_gate_spectra(&self, gate: usize) -> SpectraResult<()> {
        self.check_gate(gate)?;
        let sink = match &self.diagnostics {
            Some(sink) => sink,
            None => return Ok(()),
        };

        let nyquist = self.geometry.nyquist();
        let hc = &self.channels[Channel::Hc.index()];
        let mut block = format!(
            "# gate {} range {:.3} km\n# bin vel power_hc snr dbz zdr phidp rhohv tdbz sdzdr sdphidp cmd\n",
            gate,
            self.geometry.gate_range_km(gate)
        );
        for bin in 0..self.n_samples {
            // writing into a String cannot fail
            let _ = writeln!(
                block,
                "{} {:.3} {:.2} {:.2} {:.2} {:.2} {:.2} {:.3} {:.2} {:.2} {:.2} {:.3}",
                bin,
                bin_velocity(bin, self.n_samples, nyquist),
                hc.power_db[[gate, bin]],
                self.snr_db[[gate, bin]],
                self.dbz[[gate, bin]],
                self.zdr[[gate, bin]],
                self.phidp[[gate, bin]],
                self.rhohv[[gate, bin]],
                self.tdbz[[gate, bin]],
                self.zdr_sdev[[gate, bin]],
                self.phidp_sdev[[gate, bin]],
                self.cmd[[gate, bin]],
            );
        }
        sink.write_block(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn processor() -> DwellSpectra {
        DwellSpectra::new(
            Arc::new(RadarCalibration::default()),
            Arc::new(FftPlanCache::new()),
        )
        .unwrap()
    }

    fn tone_grid(n_gates: usize, n_samples: usize, amplitude: f64) -> Array2<IqSample> {
        Array2::from_shape_fn((n_gates, n_samples), |(g, i)| {
            IqSample::from_polar(amplitude, 0.3 * i as f64 + g as f64)
        })
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut dwell = processor();
        dwell.set_dimensions(4, 16);
        let err = dwell
            .load_channel(Channel::Hc, tone_grid(4, 8, 1.0).view())
            .unwrap_err();
        match err {
            SpectraError::DimensionMismatch {
                channel,
                expected,
                actual,
            } => {
                assert_eq!(channel, Channel::Hc);
                assert_eq!(expected, (4, 16));
                assert_eq!(actual, (4, 8));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!dwell.is_available(Channel::Hc));
    }

    #[test]
    fn test_grids_are_reused_between_dwells() {
        let mut dwell = processor();
        dwell.set_dimensions(4, 16);
        let ptr = dwell.cmd().as_ptr();
        dwell.load_channel(Channel::Hc, tone_grid(4, 16, 1.0).view()).unwrap();
        assert!(dwell.is_available(Channel::Hc));

        dwell.set_dimensions(4, 16);
        assert_eq!(dwell.cmd().as_ptr(), ptr);
        assert!(!dwell.is_available(Channel::Hc));
        assert!(dwell.channel(Channel::Hc).iq().iter().all(|v| *v == IqSample::zero()));
    }

    #[test]
    fn test_power_spectrum_is_centered() {
        let mut dwell = processor();
        dwell.set_dimensions(2, 16);
        let dc = Array2::from_elem((2, 16), IqSample::new(1.0, 0.0));
        dwell.load_channel(Channel::Hc, dc.view()).unwrap();
        assert!(dwell.compute_power_spectra().is_computed());

        let power = dwell.channel(Channel::Hc).power();
        assert_abs_diff_eq!(power[[0, 8]], 16.0, epsilon = 1e-9);
        assert_abs_diff_eq!(power[[1, 0]], 0.0, epsilon = 1e-12);
        assert_eq!(dwell.channel(Channel::Hc).filter_ratio()[0], 1.0);
    }

    #[test]
    fn test_stage_out_of_order_is_skipped() {
        let mut dwell = processor();
        dwell.set_dimensions(2, 16);
        dwell.load_channel(Channel::Hc, tone_grid(2, 16, 1.0).view()).unwrap();
        dwell.load_channel(Channel::Vc, tone_grid(2, 16, 1.0).view()).unwrap();

        assert_eq!(
            dwell.compute_cmd(),
            StageStatus::Skipped(SkipReason::StageNotRun(Stage::Texture))
        );
        assert_eq!(
            dwell.compute_products(),
            StageStatus::Skipped(SkipReason::StageNotRun(Stage::PowerSpectra))
        );
        assert!(dwell.cmd().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_empty_dwell_is_noop() {
        let mut dwell = processor();
        dwell.set_dimensions(0, 0);
        let empty = Array2::<IqSample>::zeros((0, 0));
        dwell.load_channel(Channel::Hc, empty.view()).unwrap();
        dwell.load_channel(Channel::Vc, empty.view()).unwrap();
        let report = dwell.compute_all();
        assert!(report.iq_filter.is_computed());
        assert!(dwell.cmd().is_empty());
    }

    #[test]
    fn test_spectral_noise_source() {
        let params = SpectraParams {
            noise_source: NoiseSource::Spectral,
            ..Default::default()
        };
        let mut dwell = DwellSpectra::with_params(
            params,
            Arc::new(RadarCalibration::default()),
            Arc::new(FftPlanCache::new()),
        )
        .unwrap();
        dwell.set_dimensions(3, 16);
        dwell.load_channel(Channel::Hc, tone_grid(3, 16, 1.0).view()).unwrap();
        dwell.load_channel(Channel::Vc, tone_grid(3, 16, 1.0).view()).unwrap();
        dwell.compute_power_spectra();

        assert_eq!(
            dwell.compute_products(),
            StageStatus::Skipped(SkipReason::StageNotRun(Stage::Noise))
        );
        assert!(dwell.compute_noise().is_computed());
        assert!(dwell.compute_products().is_computed());
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let params = SpectraParams {
            kernel: KernelParams {
                n_gates: 4,
                n_bins: 5,
            },
            ..Default::default()
        };
        assert!(DwellSpectra::with_params(
            params,
            Arc::new(RadarCalibration::default()),
            Arc::new(FftPlanCache::new()),
        )
        .is_err());
    }

    #[test]
    fn test_gate_summary_without_sink() {
        let mut dwell = processor();
        dwell.set_dimensions(2, 8);
        assert!(dwell.write_gate_summary(1).is_ok());
        assert!(matches!(
            dwell.write_gate_summary(2),
            Err(SpectraError::GateOutOfRange { gate: 2, n_gates: 2 })
        ));
    }
}
