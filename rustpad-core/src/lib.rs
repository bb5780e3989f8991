//! rustpad-core: Core types for cathode-pad hit reconstruction.
//!
//! This crate provides the data model (pads, digits, hits), the pad
//! segmentation service, the charge response model and the declustering
//! configuration shared by every reconstruction stage.
//!

pub mod declustering;
pub mod element;
pub mod error;
pub mod hit;
pub mod pad;
pub mod response;
pub mod segmentation;

pub use declustering::{DeclusterConfig, DeclusterStatistics};
pub use element::DetectionElement;
pub use error::{Degeneracy, Error, GeometryLookupFailure, Result};
pub use hit::{HitStore, ReconstructedHit};
pub use pad::{Axis, Cathode, Digit, HitIndex, Pad, PadGeometry, PadId, Rect};
pub use response::{MathiesonResponse, ResponseConfig, ResponseModel};
pub use segmentation::{Segmentation, Zone, ZonedSegmentation, MAX_NEIGHBORS};
