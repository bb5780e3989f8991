//! Declustering configuration and statistics.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Thresholds and policies for preclustering, pixelization and extraction.
///
/// The charge cuts and the agreement bonus are empirically tuned detector
/// constants; they are configuration, not derived quantities.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeclusterConfig {
    /// Slack for rectangle overlap tests (floating-point boundary effects).
    pub geometric_tolerance: f64,
    /// Preclusters with less total charge are discarded.
    pub min_precluster_charge: f64,
    /// Preclusters of one or two pads with less total charge are discarded.
    pub small_precluster_charge: f64,
    /// Largest unmatched subset of a two-cathode precluster that may be released.
    pub max_unmatched_released: usize,
    /// Unmatched pads must be below this charge to be released.
    pub low_charge_release: f64,
    /// Cathode charge asymmetry above which low-charge pads are pruned.
    pub max_charge_asymmetry: f64,
    /// Pruning candidates must be below this fraction of their cathode's maximum.
    pub asymmetry_release_fraction: f64,
    /// How many times a pad can be offered in a precluster before it is dropped.
    pub max_pad_offers: u8,
    /// Pixels below this charge are discarded.
    pub pixel_noise_floor: f64,
    /// Bonus fraction of the larger cathode charge added to agreeing pixels.
    pub agreement_bonus: f64,
    /// Upper bound on the pixel grid of one precluster.
    pub max_pixels: usize,
    /// Upper bound on one plateau during local-maxima search.
    pub max_plateau_pixels: usize,
    /// Pads farther than this many pad sizes from every maximum stay unused.
    pub association_radius: f64,
    /// Hits below this charge are discarded.
    pub min_hit_charge: f64,
    /// Refine centroids against the response model.
    pub refine_with_response: bool,
    /// Pattern-search steps of the refinement.
    pub refine_iterations: usize,
    /// Allowed |ln| of the ratio of the cathodes' normalized charges.
    pub max_cathode_log_ratio: f64,
}

impl Default for DeclusterConfig {
    fn default() -> Self {
        Self {
            geometric_tolerance: 1e-4,
            min_precluster_charge: 10.0,
            small_precluster_charge: 30.0,
            max_unmatched_released: 1,
            low_charge_release: 10.0,
            max_charge_asymmetry: 0.4,
            asymmetry_release_fraction: 0.1,
            max_pad_offers: 2,
            pixel_noise_floor: 1.0,
            agreement_bonus: 0.1,
            max_pixels: 1 << 20,
            max_plateau_pixels: 1 << 16,
            association_radius: 3.0,
            min_hit_charge: 10.0,
            refine_with_response: true,
            refine_iterations: 24,
            max_cathode_log_ratio: 1.0,
        }
    }
}

impl DeclusterConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_min_precluster_charge(mut self, charge: f64) -> Self {
        self.min_precluster_charge = charge;
        self
    }

    #[must_use]
    pub fn with_small_precluster_charge(mut self, charge: f64) -> Self {
        self.small_precluster_charge = charge;
        self
    }

    #[must_use]
    pub fn with_low_charge_release(mut self, charge: f64) -> Self {
        self.low_charge_release = charge;
        self
    }

    #[must_use]
    pub fn with_max_charge_asymmetry(mut self, asymmetry: f64) -> Self {
        self.max_charge_asymmetry = asymmetry;
        self
    }

    #[must_use]
    pub fn with_pixel_noise_floor(mut self, floor: f64) -> Self {
        self.pixel_noise_floor = floor;
        self
    }

    #[must_use]
    pub fn with_agreement_bonus(mut self, fraction: f64) -> Self {
        self.agreement_bonus = fraction;
        self
    }

    #[must_use]
    pub fn with_max_plateau_pixels(mut self, budget: usize) -> Self {
        self.max_plateau_pixels = budget;
        self
    }

    #[must_use]
    pub fn with_min_hit_charge(mut self, charge: f64) -> Self {
        self.min_hit_charge = charge;
        self
    }

    #[must_use]
    pub fn with_refinement(mut self, enabled: bool) -> Self {
        self.refine_with_response = enabled;
        self
    }

    #[must_use]
    pub fn with_association_radius(mut self, radius: f64) -> Self {
        self.association_radius = radius;
        self
    }

    /// Checks that thresholds are finite and budgets non-zero.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("geometric_tolerance", self.geometric_tolerance),
            ("min_precluster_charge", self.min_precluster_charge),
            ("small_precluster_charge", self.small_precluster_charge),
            ("low_charge_release", self.low_charge_release),
            ("max_charge_asymmetry", self.max_charge_asymmetry),
            ("asymmetry_release_fraction", self.asymmetry_release_fraction),
            ("pixel_noise_floor", self.pixel_noise_floor),
            ("agreement_bonus", self.agreement_bonus),
            ("min_hit_charge", self.min_hit_charge),
            ("max_cathode_log_ratio", self.max_cathode_log_ratio),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if !(self.association_radius.is_finite() && self.association_radius > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "association_radius must be positive, got {}",
                self.association_radius
            )));
        }
        if self.max_pad_offers == 0 || self.max_pixels == 0 || self.max_plateau_pixels == 0 {
            return Err(Error::InvalidConfig(
                "max_pad_offers, max_pixels and max_plateau_pixels must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Counters collected while declustering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeclusterStatistics {
    /// Digits turned into pads.
    pub pads_accepted: usize,
    /// Digits dropped by zero suppression.
    pub pads_suppressed: usize,
    /// Digits whose indices had no pad.
    pub lookups_failed: usize,
    /// Preclusters handed to the extractor.
    pub preclusters_built: usize,
    /// Preclusters dropped as degenerate.
    pub preclusters_discarded: usize,
    /// Pads given back to the pool (ambiguity, asymmetry or leftovers).
    pub pads_released: usize,
    /// Local maxima found over all pixel maps.
    pub maxima_found: usize,
    /// Hits appended to the output store.
    pub hits_emitted: usize,
    /// Hits below the charge threshold.
    pub hits_discarded: usize,
    /// Zero denominators that were clamped.
    pub degeneracies_clamped: usize,
}

impl DeclusterStatistics {
    /// Adds the counters of `other` to this one.
    pub fn merge(&mut self, other: &DeclusterStatistics) {
        self.pads_accepted += other.pads_accepted;
        self.pads_suppressed += other.pads_suppressed;
        self.lookups_failed += other.lookups_failed;
        self.preclusters_built += other.preclusters_built;
        self.preclusters_discarded += other.preclusters_discarded;
        self.pads_released += other.pads_released;
        self.maxima_found += other.maxima_found;
        self.hits_emitted += other.hits_emitted;
        self.hits_discarded += other.hits_discarded;
        self.degeneracies_clamped += other.degeneracies_clamped;
    }
}
