use crate::types::{SpectraError, SpectraResult};
use serde::{Deserialize, Serialize};

/// One control point of an interest map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterestPoint {
    pub value: f64,
    pub interest: f64,
}

impl InterestPoint {
    pub fn new(value: f64, interest: f64) -> Self {
        Self { value, interest }
    }
}

/// Serializable description of an interest map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestMapParams {
    pub points: Vec<InterestPoint>,
    pub weight: f64,
}

impl InterestMapParams {
    /// Ramp from 0 interest at `low` to 1 at `high`
    pub fn ramp(low: f64, high: f64, weight: f64) -> Self {
        Self {
            points: vec![InterestPoint::new(low, 0.0), InterestPoint::new(high, 1.0)],
            weight,
        }
    }
}

/// Piecewise-linear fuzzy membership function.
///
/// Values below the first point or above the last take the end-point
/// interest.
#[derive(Debug, Clone)]
pub struct InterestMap {
    points: Vec<InterestPoint>,
    weight: f64,
}

impl InterestMap {
    pub fn new(label: &str, points: Vec<InterestPoint>, weight: f64) -> SpectraResult<Self> {
        if points.is_empty() {
            return Err(SpectraError::InvalidConfig(format!(
                "Interest map '{}' has no points",
                label
            )));
        }

        for (i, pt) in points.iter().enumerate() {
            if !pt.value.is_finite() || !pt.interest.is_finite() {
                return Err(SpectraError::InvalidConfig(format!(
                    "Interest map '{}' point {} is not finite",
                    label, i
                )));
            }
            if !(0.0..=1.0).contains(&pt.interest) {
                return Err(SpectraError::InvalidConfig(format!(
                    "Interest map '{}' point {} has interest {} outside [0, 1]",
                    label, i, pt.interest
                )));
            }
            if i > 0 && pt.value <= points[i - 1].value {
                return Err(SpectraError::InvalidConfig(format!(
                    "Interest map '{}' values must be strictly increasing (point {})",
                    label, i
                )));
            }
        }

        if !weight.is_finite() || weight < 0.0 {
            return Err(SpectraError::InvalidConfig(format!(
                "Interest map '{}' weight {} must be finite and non-negative",
                label, weight
            )));
        }

        Ok(Self {
            points,
            weight,
        })
    }

    pub fn from_params(label: &str, params: &InterestMapParams) -> SpectraResult<Self> {
        Self::new(label, params.points.clone(), params.weight)
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Interest for a feature value, always within [0, 1].
    ///
    /// Non-finite values carry no evidence and map to 0.
    pub fn interest(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }

        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if value <= first.value {
            return first.interest;
        }
        if value >= last.value {
            return last.interest;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if value <= hi.value {
                let slope = (hi.interest - lo.interest) / (hi.value - lo.value);
                return (lo.interest + slope * (value - lo.value)).clamp(0.0, 1.0);
            }
        }

        last.interest
    }
}
