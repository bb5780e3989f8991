//! Forward simulation of pad digits from point deposits.
//!
//! Produces the same kind of input the reconstruction consumes: avalanche
//! charge, a correlated split between the two cathodes, disintegration onto
//! pads through the response model and digitization.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc
)]

use std::collections::BTreeMap;

use log::trace;
use rand::distributions::Distribution;
use rand::Rng;
use rustpad_core::{
    Cathode, DetectionElement, Digit, Error, PadId, ResponseModel, Result, Segmentation,
};
use statrs::distribution::{Exp, LogNormal};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mean energy needed to free one electron in the chamber gas, in eV.
pub const IONIZATION_ENERGY_EV: f64 = 27.4;

/// A point-like avalanche.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Deposit {
    pub x: f64,
    pub y: f64,
    pub charge: f64,
}

impl Deposit {
    #[must_use]
    pub fn new(x: f64, y: f64, charge: f64) -> Self {
        Self { x, y, charge }
    }
}

/// Charge induced on each pad, keyed by pad.
pub type InducedCharge = BTreeMap<PadId, f64>;

/// Generates digits for one detection element.
pub struct ChargeSimulator<'a, S, R: ?Sized> {
    element: &'a DetectionElement<S>,
    response: &'a R,
}

impl<'a, S: Segmentation, R: ResponseModel + ?Sized> ChargeSimulator<'a, S, R> {
    #[must_use]
    pub fn new(element: &'a DetectionElement<S>, response: &'a R) -> Self {
        Self { element, response }
    }

    /// Total avalanche charge for an energy loss in eV.
    ///
    /// Each primary electron is amplified by an exponentially distributed
    /// gain with mean `charge_slope`.
    pub fn avalanche_charge<G: Rng + ?Sized>(&self, energy_loss_ev: f64, rng: &mut G) -> Result<f64> {
        let slope = self.response.config().charge_slope;
        let gain = Exp::new(1.0 / slope)
            .map_err(|e| Error::InvalidConfig(format!("charge_slope {slope}: {e}")))?;
        let electrons = (energy_loss_ev / IONIZATION_ENERGY_EV).round().max(1.0) as usize;
        Ok((0..electrons).map(|_| gain.sample(rng)).sum())
    }

    /// Splits a deposit between the cathodes with a log-normal ratio.
    ///
    /// The product of both shares is always `charge²`.
    pub fn split_cathodes<G: Rng + ?Sized>(&self, charge: f64, rng: &mut G) -> Result<[f64; 2]> {
        let sigma = self.response.config().charge_correlation;
        if sigma <= 0.0 {
            return Ok([charge, charge]);
        }
        let ratio = LogNormal::new(0.0, sigma)
            .map_err(|e| Error::InvalidConfig(format!("charge_correlation {sigma}: {e}")))?
            .sample(rng);
        let root = ratio.sqrt();
        Ok([charge * root, charge / root])
    }

    /// Induced charge with the full deposit on both cathodes.
    #[must_use]
    pub fn induce_exact(&self, deposits: &[Deposit]) -> InducedCharge {
        let mut induced = InducedCharge::new();
        for deposit in deposits {
            for cathode in Cathode::ALL {
                self.spread(&mut induced, cathode, deposit, deposit.charge);
            }
        }
        induced
    }

    /// Induced charge with correlated cathode fluctuations.
    pub fn induce<G: Rng + ?Sized>(&self, deposits: &[Deposit], rng: &mut G) -> Result<InducedCharge> {
        let mut induced = InducedCharge::new();
        for deposit in deposits {
            let shares = self.split_cathodes(deposit.charge, rng)?;
            for cathode in Cathode::ALL {
                self.spread(&mut induced, cathode, deposit, shares[cathode.index()]);
            }
        }
        Ok(induced)
    }

    fn spread(&self, induced: &mut InducedCharge, cathode: Cathode, deposit: &Deposit, charge: f64) {
        let shares = self.response.disintegrate(
            self.element.segmentation(cathode),
            deposit.x,
            deposit.y,
            charge,
        );
        trace!(
            "deposit ({:.4}, {:.4}) spread over {} pads of cathode {}",
            deposit.x,
            deposit.y,
            shares.len(),
            cathode.index()
        );
        for (pad, q) in shares {
            *induced.entry(PadId::new(cathode, pad.ix, pad.iy)).or_insert(0.0) += q;
        }
    }

    /// Applies saturation and zero suppression.
    #[must_use]
    pub fn digitize(&self, induced: &InducedCharge) -> Vec<Digit> {
        let config = self.response.config();
        induced
            .iter()
            .filter(|(_, &q)| q >= config.zero_suppression)
            .map(|(id, &q)| Digit {
                cathode: id.cathode,
                ix: id.ix,
                iy: id.iy,
                charge: q.min(config.max_adc),
                is_saturated: q >= config.max_adc,
            })
            .collect()
    }

    /// Induces and digitizes in one go.
    pub fn simulate<G: Rng + ?Sized>(&self, deposits: &[Deposit], rng: &mut G) -> Result<Vec<Digit>> {
        Ok(self.digitize(&self.induce(deposits, rng)?))
    }
}
