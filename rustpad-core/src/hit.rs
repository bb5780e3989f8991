//! Reconstructed hits and the per-event output store.

use crate::pad::{Cathode, HitIndex, PadId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A hit position reconstructed from one local maximum of a precluster.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReconstructedHit {
    /// Detection element the hit was found on.
    pub detection_element: u32,
    /// Position (sub-pad precision).
    pub x: f64,
    pub y: f64,
    /// Aggregated charge, averaged over the cathodes that saw the hit.
    pub charge: f64,
    /// Summed charge of the contributing pads, per cathode.
    pub cathode_charges: [f64; 2],
    /// Response-model chi-square at the final position.
    pub quality: f64,
    /// False when the two cathodes disagree on the deposited charge.
    pub cathode_consistent: bool,
    /// Contributing pads, in precluster order.
    pub pads: Vec<PadId>,
}

impl ReconstructedHit {
    /// Charge seen by one cathode.
    #[inline]
    #[must_use]
    pub fn cathode_charge(&self, cathode: Cathode) -> f64 {
        self.cathode_charges[cathode.index()]
    }

    /// Number of contributing pads.
    #[inline]
    #[must_use]
    pub fn multiplicity(&self) -> usize {
        self.pads.len()
    }

    /// Euclidean distance to a point.
    #[inline]
    #[must_use]
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Ordered collection of the hits of one event.
///
/// Hits are appended once and never mutated; their position in the store is
/// the [`HitIndex`] pads refer back to.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitStore {
    hits: Vec<ReconstructedHit>,
}

impl HitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { hits: Vec::new() }
    }

    /// Creates a store with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            hits: Vec::with_capacity(capacity),
        }
    }

    /// Appends a hit and returns its index.
    pub fn append(&mut self, hit: ReconstructedHit) -> HitIndex {
        self.hits.push(hit);
        self.hits.len() - 1
    }

    /// Moves every hit of `other` to the end of this store.
    pub fn extend_from(&mut self, other: HitStore) {
        self.hits.extend(other.hits);
    }

    /// Returns the number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the store holds no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: HitIndex) -> Option<&ReconstructedHit> {
        self.hits.get(index)
    }

    /// Returns an iterator over the hits in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ReconstructedHit> {
        self.hits.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ReconstructedHit] {
        &self.hits
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<ReconstructedHit> {
        self.hits
    }
}

impl FromIterator<ReconstructedHit> for HitStore {
    fn from_iter<I: IntoIterator<Item = ReconstructedHit>>(iter: I) -> Self {
        Self {
            hits: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HitStore {
    type Item = &'a ReconstructedHit;
    type IntoIter = std::slice::Iter<'a, ReconstructedHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(x: f64, charge: f64) -> ReconstructedHit {
        ReconstructedHit {
            detection_element: 100,
            x,
            y: 0.0,
            charge,
            cathode_charges: [charge, charge],
            quality: 0.0,
            cathode_consistent: true,
            pads: vec![PadId::new(Cathode::Bending, 1, 2)],
        }
    }

    #[test]
    fn test_store_append_returns_index() {
        let mut store = HitStore::with_capacity(2);
        assert!(store.is_empty());
        assert_eq!(store.append(hit(1.0, 10.0)), 0);
        assert_eq!(store.append(hit(2.0, 20.0)), 1);
        assert_eq!(store.len(), 2);
        assert!((store.get(1).unwrap().x - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_store_extend_preserves_order() {
        let mut a: HitStore = vec![hit(1.0, 1.0)].into_iter().collect();
        let b: HitStore = vec![hit(2.0, 2.0), hit(3.0, 3.0)].into_iter().collect();
        a.extend_from(b);
        let xs: Vec<f64> = a.iter().map(|h| h.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_hit_accessors() {
        let h = hit(3.0, 40.0);
        assert_eq!(h.multiplicity(), 1);
        assert!((h.cathode_charge(Cathode::NonBending) - 40.0).abs() < f64::EPSILON);
        assert!((h.distance_to(0.0, 4.0) - 5.0).abs() < 1e-12);
    }
}
