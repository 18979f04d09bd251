use crate::core::interest::{InterestMap, InterestMapParams};
use crate::types::{SpectraError, SpectraResult};
use serde::{Deserialize, Serialize};

/// Clutter Mitigation Decision parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdParams {
    pub snr_map: InterestMapParams,
    pub tdbz_map: InterestMapParams,
    pub zdr_sdev_map: InterestMapParams,
    pub phidp_sdev_map: InterestMapParams,
    /// Bins below this SNR are not scored (dB)
    pub snr_threshold_db: f64,
    /// CMD above which a bin counts as a clutter detection
    pub detection_threshold: f64,
    /// CMD above which a bin is removed before moments are computed
    pub moments_threshold: f64,
    /// Fraction of detected bins that flags the whole gate
    pub clutter_fraction_threshold: f64,
}

impl Default for CmdParams {
    fn default() -> Self {
        Self {
            snr_map: InterestMapParams::ramp(0.0, 20.0, 1.0),
            tdbz_map: InterestMapParams::ramp(30.0, 40.0, 1.0),
            zdr_sdev_map: InterestMapParams::ramp(3.0, 4.0, 1.0),
            phidp_sdev_map: InterestMapParams::ramp(28.0, 32.0, 1.0),
            snr_threshold_db: 5.0,
            detection_threshold: 0.9,
            moments_threshold: 0.7,
            clutter_fraction_threshold: 0.5,
        }
    }
}

impl CmdParams {
    pub fn validate(&self) -> SpectraResult<()> {
        CmdFusion::new(self).map(|_| ())
    }
}

/// Feature values of one spectral bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmdFeatures {
    pub snr_db: f64,
    pub tdbz: f64,
    pub zdr_sdev: f64,
    pub phidp_sdev: f64,
}

/// Interest values and fused score of one spectral bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmdScore {
    pub snr_interest: f64,
    pub tdbz_interest: f64,
    pub zdr_sdev_interest: f64,
    pub phidp_sdev_interest: f64,
    pub cmd: f64,
}

/// Per-gate summary of the CMD field
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GateCmdSummary {
    pub mean_cmd: f64,
    /// Fraction of bins with CMD above the detection threshold
    pub fraction_detected: f64,
    pub is_clutter: bool,
}

/// Weighted fuzzy-logic fusion of the four clutter features
#[derive(Debug, Clone)]
pub struct CmdFusion {
    snr: InterestMap,
    tdbz: InterestMap,
    zdr_sdev: InterestMap,
    phidp_sdev: InterestMap,
    total_weight: f64,
    snr_threshold_db: f64,
    detection_threshold: f64,
    moments_threshold: f64,
    clutter_fraction_threshold: f64,
}

impl CmdFusion {
    pub fn new(params: &CmdParams) -> SpectraResult<Self> {
        let snr = InterestMap::from_params("snr", &params.snr_map)?;
        let tdbz = InterestMap::from_params("tdbz", &params.tdbz_map)?;
        let zdr_sdev = InterestMap::from_params("zdr_sdev", &params.zdr_sdev_map)?;
        let phidp_sdev = InterestMap::from_params("phidp_sdev", &params.phidp_sdev_map)?;

        let total_weight = snr.weight() + tdbz.weight() + zdr_sdev.weight() + phidp_sdev.weight();
        if total_weight <= 0.0 {
            return Err(SpectraError::InvalidConfig(
                "CMD interest map weights sum to zero".to_string(),
            ));
        }

        for (name, value) in [
            ("detection threshold", params.detection_threshold),
            ("moments threshold", params.moments_threshold),
            ("clutter fraction threshold", params.clutter_fraction_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SpectraError::InvalidConfig(format!(
                    "CMD {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !params.snr_threshold_db.is_finite() {
            return Err(SpectraError::InvalidConfig(
                "CMD SNR threshold must be finite".to_string(),
            ));
        }

        Ok(Self {
            snr,
            tdbz,
            zdr_sdev,
            phidp_sdev,
            total_weight,
            snr_threshold_db: params.snr_threshold_db,
            detection_threshold: params.detection_threshold,
            moments_threshold: params.moments_threshold,
            clutter_fraction_threshold: params.clutter_fraction_threshold,
        })
    }

    pub fn moments_threshold(&self) -> f64 {
        self.moments_threshold
    }

    /// Score one bin. Bins below the SNR threshold keep their interests but
    /// get a CMD of 0.
    pub fn score(&self, features: &CmdFeatures) -> CmdScore {
        let snr_interest = self.snr.interest(features.snr_db);
        let tdbz_interest = self.tdbz.interest(features.tdbz);
        let zdr_sdev_interest = self.zdr_sdev.interest(features.zdr_sdev);
        let phidp_sdev_interest = self.phidp_sdev.interest(features.phidp_sdev);

        let cmd = if features.snr_db < self.snr_threshold_db {
            0.0
        } else {
            let weighted = snr_interest * self.snr.weight()
                + tdbz_interest * self.tdbz.weight()
                + zdr_sdev_interest * self.zdr_sdev.weight()
                + phidp_sdev_interest * self.phidp_sdev.weight();
            (weighted / self.total_weight).clamp(0.0, 1.0)
        };

        CmdScore {
            snr_interest,
            tdbz_interest,
            zdr_sdev_interest,
            phidp_sdev_interest,
            cmd,
        }
    }

    pub fn summarize_gate<'a, I>(&self, cmd: I) -> GateCmdSummary
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let mut sum = 0.0;
        let mut detected = 0usize;
        let mut count = 0usize;
        for &value in cmd {
            sum += value;
            if value > self.detection_threshold {
                detected += 1;
            }
            count += 1;
        }
        if count == 0 {
            return GateCmdSummary::default();
        }

        let fraction_detected = detected as f64 / count as f64;
        GateCmdSummary {
            mean_cmd: sum / count as f64,
            fraction_detected,
            is_clutter: fraction_detected >= self.clutter_fraction_threshold,
        }
    }
}
