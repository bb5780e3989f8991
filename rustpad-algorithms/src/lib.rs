//! rustpad-algorithms: Declustering stages for cathode-pad detectors.
//!
//! Stages, in the order a precluster flows through them:
//! - **Precluster builder** - pads grouped by adjacency and cross-cathode overlap
//! - **Pixelization** - pad charges resampled onto a uniform virtual grid
//! - **Local maxima** - hit seeds with plateau resolution
//! - **Extraction** - centroids refined against the response model
//!
//! [`decluster_element`] and [`decluster_event`] chain them; [`ChargeSimulator`]
//! produces digits from point deposits.
//!

mod extraction;
mod graph;
mod maxima;
mod pixel;
mod precluster;
mod processing;
pub mod simulation;

pub use extraction::{ClusterExtractor, Extraction};
pub use maxima::{LocalMaximaFinder, LocalMaximum};
pub use pixel::{AgreementBonus, ChargeCombiner, Pixel, PixelMap, Pixelizer, DUAL_CATHODE};
pub use precluster::{PoolSlot, Precluster, PreclusterBuilder};
pub use processing::{decluster_element, decluster_event, ElementDigits, ElementOutput, EventOutput};
pub use simulation::{ChargeSimulator, Deposit, InducedCharge, IONIZATION_ENERGY_EV};

// Re-export the configuration and output types every caller needs.
pub use rustpad_core::{DeclusterConfig, DeclusterStatistics, HitStore, ReconstructedHit};
