//! Charge response of a cathode plane to a point-like avalanche.
//!
//! The same evaluator serves the forward direction (spreading a deposit over
//! pads) and the reverse direction (scoring candidate hit positions against
//! measured pad charges).

use std::f64::consts::FRAC_PI_2;

use crate::error::{Error, Result};
use crate::pad::{PadGeometry, Rect};
use crate::segmentation::Segmentation;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Response-model parameters.
///
/// Defaults are calibration values for a chamber with a 0.25 anode-cathode
/// gap; every field is meant to be overridden per detector.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResponseConfig {
    /// Half-width of the integration window in units of the charge spread.
    pub sigma_integration: f64,
    /// Anode-cathode distance, the length unit of the response function.
    pub pitch: f64,
    /// Mean avalanche charge per primary electron.
    pub charge_slope: f64,
    /// Charge spread along x (integration window sizing).
    pub charge_spread_x: f64,
    /// Charge spread along y (integration window sizing).
    pub charge_spread_y: f64,
    /// Square root of the K3 shape parameter along x.
    pub sqrt_kx3: f64,
    /// Square root of the K3 shape parameter along y.
    pub sqrt_ky3: f64,
    /// Saturation ceiling of the electronics.
    pub max_adc: f64,
    /// Digits below this level are suppressed.
    pub zero_suppression: f64,
    /// Width of the log-normal cathode charge correlation.
    pub charge_correlation: f64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            sigma_integration: 10.0,
            pitch: 0.25,
            charge_slope: 10.0,
            charge_spread_x: 0.18,
            charge_spread_y: 0.18,
            sqrt_kx3: 0.7131,
            sqrt_ky3: 0.7642,
            max_adc: 4095.0,
            zero_suppression: 6.0,
            charge_correlation: 0.11,
        }
    }
}

impl ResponseConfig {
    #[must_use]
    pub fn with_pitch(mut self, pitch: f64) -> Self {
        self.pitch = pitch;
        self
    }

    #[must_use]
    pub fn with_sqrt_k3(mut self, sqrt_kx3: f64, sqrt_ky3: f64) -> Self {
        self.sqrt_kx3 = sqrt_kx3;
        self.sqrt_ky3 = sqrt_ky3;
        self
    }

    #[must_use]
    pub fn with_charge_spread(mut self, x: f64, y: f64) -> Self {
        self.charge_spread_x = x;
        self.charge_spread_y = y;
        self
    }

    #[must_use]
    pub fn with_sigma_integration(mut self, sigmas: f64) -> Self {
        self.sigma_integration = sigmas;
        self
    }

    #[must_use]
    pub fn with_max_adc(mut self, max_adc: f64) -> Self {
        self.max_adc = max_adc;
        self
    }

    #[must_use]
    pub fn with_zero_suppression(mut self, level: f64) -> Self {
        self.zero_suppression = level;
        self
    }

    #[must_use]
    pub fn with_charge_correlation(mut self, sigma: f64) -> Self {
        self.charge_correlation = sigma;
        self
    }

    #[must_use]
    pub fn with_charge_slope(mut self, slope: f64) -> Self {
        self.charge_slope = slope;
        self
    }

    /// Checks that every parameter is finite and in range.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("sigma_integration", self.sigma_integration),
            ("pitch", self.pitch),
            ("charge_slope", self.charge_slope),
            ("charge_spread_x", self.charge_spread_x),
            ("charge_spread_y", self.charge_spread_y),
            ("sqrt_kx3", self.sqrt_kx3),
            ("sqrt_ky3", self.sqrt_ky3),
            ("max_adc", self.max_adc),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidConfig(format!("{name} must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("zero_suppression", self.zero_suppression),
            ("charge_correlation", self.charge_correlation),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// A parameterized charge-spread function.
pub trait ResponseModel: Send + Sync {
    /// Returns the configuration the model was built from.
    fn config(&self) -> &ResponseConfig;

    /// Fraction of a unit charge at the origin collected on `rect`.
    fn integrate(&self, rect: &Rect) -> f64;

    /// Fraction of a charge deposited at `(x, y)` collected on `pad`.
    fn pad_fraction(&self, pad: &PadGeometry, x: f64, y: f64) -> f64 {
        self.integrate(&pad.rect().relative_to(x, y))
    }

    /// Area around a deposit outside which the induced charge is ignored.
    fn integration_window(&self, x: f64, y: f64) -> Rect {
        let c = self.config();
        Rect::from_center(
            x,
            y,
            c.sigma_integration * c.charge_spread_x,
            c.sigma_integration * c.charge_spread_y,
        )
    }

    /// Distributes `charge` deposited at `(x, y)` over the pads of `segmentation`.
    ///
    /// Pads are returned in the segmentation's index order; pads receiving no
    /// charge are omitted.
    fn disintegrate(
        &self,
        segmentation: &dyn Segmentation,
        x: f64,
        y: f64,
        charge: f64,
    ) -> Vec<(PadGeometry, f64)> {
        segmentation
            .pads_in_area(&self.integration_window(x, y))
            .into_iter()
            .map(|pad| (pad, charge * self.pad_fraction(&pad, x, y)))
            .filter(|(_, q)| *q > 0.0)
            .collect()
    }
}

/// One-dimensional Mathieson factor with K2 and K4 derived from √K3.
#[derive(Debug, Clone, Copy)]
struct MathiesonAxis {
    sqrt_k3: f64,
    k2: f64,
    k4: f64,
}

impl MathiesonAxis {
    fn new(sqrt_k3: f64) -> Self {
        let k2 = FRAC_PI_2 * (1.0 - 0.5 * sqrt_k3);
        let k4 = 1.0 / (4.0 * sqrt_k3.atan());
        Self { sqrt_k3, k2, k4 }
    }

    #[inline]
    fn primitive(&self, u: f64) -> f64 {
        (self.sqrt_k3 * (self.k2 * u).tanh()).atan()
    }

    /// Integral between `lo` and `hi`, both in units of the anode-cathode pitch.
    #[inline]
    fn integral(&self, lo: f64, hi: f64) -> f64 {
        2.0 * self.k4 * (self.primitive(hi) - self.primitive(lo))
    }
}

/// Mathieson response, integrated analytically over rectangles.
#[derive(Debug, Clone)]
pub struct MathiesonResponse {
    config: ResponseConfig,
    x_axis: MathiesonAxis,
    y_axis: MathiesonAxis,
    inverse_pitch: f64,
}

impl MathiesonResponse {
    /// Builds the model.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the configuration is out of range.
    pub fn new(config: ResponseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            x_axis: MathiesonAxis::new(config.sqrt_kx3),
            y_axis: MathiesonAxis::new(config.sqrt_ky3),
            inverse_pitch: 1.0 / config.pitch,
            config,
        })
    }
}

impl ResponseModel for MathiesonResponse {
    fn config(&self) -> &ResponseConfig {
        &self.config
    }

    fn integrate(&self, rect: &Rect) -> f64 {
        let s = self.inverse_pitch;
        self.x_axis.integral(rect.x_min * s, rect.x_max * s)
            * self.y_axis.integral(rect.y_min * s, rect.y_max * s)
    }
}
