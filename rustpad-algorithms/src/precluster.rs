//! Precluster builder.
//!
//! Turns zero-suppressed digits into a pool of pads and hands out connected,
//! charge-bearing groups of them one at a time. Pads that end up unused can be
//! given back to the pool and are offered again in a later pass, a bounded
//! number of times.
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, trace};
use rustpad_core::{
    Cathode, DeclusterConfig, DeclusterStatistics, Degeneracy, DetectionElement, Digit, HitIndex,
    Pad, PadId, Rect, Segmentation,
};

use crate::graph::UnionFind;

/// Position of a pad in the builder's pool.
pub type PoolSlot = usize;

/// A connected group of pads on one or two cathodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Precluster {
    pads: Vec<Pad>,
    slots: Vec<Option<PoolSlot>>,
}

impl Precluster {
    /// Creates an empty precluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a precluster that is not backed by a pool.
    #[must_use]
    pub fn from_pads(pads: Vec<Pad>) -> Self {
        let slots = vec![None; pads.len()];
        Self { pads, slots }
    }

    fn push(&mut self, pad: Pad, slot: Option<PoolSlot>) {
        self.pads.push(pad);
        self.slots.push(slot);
    }

    fn remove(&mut self, index: usize) -> (Pad, Option<PoolSlot>) {
        (self.pads.remove(index), self.slots.remove(index))
    }

    #[must_use]
    pub fn pads(&self) -> &[Pad] {
        &self.pads
    }

    /// Pool slot of the pad at `index`; `None` for virtual pads.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<PoolSlot> {
        self.slots.get(index).copied().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pads.is_empty()
    }

    /// Real pads with their precluster index.
    pub fn real_pads(&self) -> impl Iterator<Item = (usize, &Pad)> {
        self.pads.iter().enumerate().filter(|(_, p)| p.is_real)
    }

    /// Number of real pads.
    #[must_use]
    pub fn multiplicity(&self) -> usize {
        self.real_pads().count()
    }

    /// Summed charge of the real pads of one cathode.
    #[must_use]
    pub fn charge(&self, cathode: Cathode) -> f64 {
        self.real_pads()
            .filter(|(_, p)| p.cathode() == cathode)
            .map(|(_, p)| p.charge)
            .sum()
    }

    /// Summed charge of all real pads.
    #[must_use]
    pub fn total_charge(&self) -> f64 {
        self.real_pads().map(|(_, p)| p.charge).sum()
    }

    /// True if any pad, real or virtual, lies on `cathode`.
    #[must_use]
    pub fn has_cathode(&self, cathode: Cathode) -> bool {
        self.pads.iter().any(|p| p.cathode() == cathode)
    }

    #[must_use]
    pub fn is_two_cathode(&self) -> bool {
        self.has_cathode(Cathode::Bending) && self.has_cathode(Cathode::NonBending)
    }

    /// Union bounding box of the pads of one cathode.
    #[must_use]
    pub fn area(&self, cathode: Cathode) -> Option<Rect> {
        self.pads
            .iter()
            .filter(|p| p.cathode() == cathode)
            .map(Pad::rect)
            .reduce(|a, b| a.union(&b))
    }

    /// Index of the real pad of `cathode` covering `(x, y)`.
    #[must_use]
    pub fn real_pad_at(&self, cathode: Cathode, x: f64, y: f64, tolerance: f64) -> Option<usize> {
        self.real_pads()
            .find(|(_, p)| p.cathode() == cathode && p.rect().contains(x, y, tolerance))
            .map(|(i, _)| i)
    }
}

#[derive(Debug, Clone)]
struct PoolEntry {
    pad: Pad,
    in_use: bool,
    dropped: bool,
    offers: u8,
    released_once: bool,
    neighbors: Vec<PoolSlot>,
}

/// Pool of pads of one detection element and provider of preclusters.
pub struct PreclusterBuilder<'a, S> {
    element: &'a DetectionElement<S>,
    config: &'a DeclusterConfig,
    entries: Vec<PoolEntry>,
    pending: VecDeque<Vec<PoolSlot>>,
    statistics: DeclusterStatistics,
}

impl<'a, S: Segmentation> PreclusterBuilder<'a, S> {
    /// Fills the pool from raw digits.
    ///
    /// Digits below `zero_suppression` are dropped; digits whose indices have
    /// no pad are logged and skipped. Repeated digits of one pad are summed.
    pub fn new(
        element: &'a DetectionElement<S>,
        digits: &[Digit],
        zero_suppression: f64,
        config: &'a DeclusterConfig,
    ) -> Self {
        let mut statistics = DeclusterStatistics::default();
        let mut pads: BTreeMap<PadId, Pad> = BTreeMap::new();

        for digit in digits {
            if digit.charge < zero_suppression {
                statistics.pads_suppressed += 1;
                continue;
            }
            let cathode = digit.cathode;
            match element
                .segmentation(cathode)
                .pad_at_indices(digit.ix, digit.iy)
            {
                Ok(geometry) => {
                    statistics.pads_accepted += 1;
                    let pad = pads
                        .entry(PadId::new(cathode, digit.ix, digit.iy))
                        .or_insert_with(|| Pad::new(cathode, geometry, 0.0));
                    pad.charge += digit.charge;
                    pad.is_saturated |= digit.is_saturated;
                }
                Err(err) => {
                    debug!(
                        "DE {}: skipping digit on cathode {}: {err}",
                        element.id(),
                        cathode.index()
                    );
                    statistics.lookups_failed += 1;
                }
            }
        }

        let mut entries: Vec<PoolEntry> = pads
            .into_values()
            .map(|pad| PoolEntry {
                pad,
                in_use: false,
                dropped: false,
                offers: 0,
                released_once: false,
                neighbors: Vec::new(),
            })
            .collect();

        let slot_of: HashMap<PadId, PoolSlot> = entries
            .iter()
            .enumerate()
            .map(|(slot, e)| (e.pad.id, slot))
            .collect();
        for entry in &mut entries {
            let cathode = entry.pad.cathode();
            entry.neighbors = element
                .segmentation(cathode)
                .neighbors(&entry.pad.geometry)
                .iter()
                .filter_map(|g| slot_of.get(&PadId::new(cathode, g.ix, g.iy)).copied())
                .collect();
        }

        Self {
            element,
            config,
            entries,
            pending: VecDeque::new(),
            statistics,
        }
    }

    /// Returns the next ungrouped precluster, or `None` when the pool is exhausted.
    pub fn next_precluster(&mut self) -> Option<Precluster> {
        loop {
            let component = if let Some(c) = self.pending.pop_front() {
                c
            } else {
                self.compute_components();
                self.pending.pop_front()?
            };

            let mut precluster = Precluster::new();
            for slot in component {
                if !self.is_free(slot) {
                    continue;
                }
                let entry = &mut self.entries[slot];
                entry.in_use = true;
                entry.offers = entry.offers.saturating_add(1);
                precluster.push(entry.pad, Some(slot));
            }
            if precluster.is_empty() {
                continue;
            }

            if precluster.is_two_cathode() {
                self.resolve_unmatched(&mut precluster);
                self.balance_cathodes(&mut precluster);
            }

            let charge = precluster.total_charge();
            let multiplicity = precluster.multiplicity();
            if multiplicity == 0
                || charge < self.config.min_precluster_charge
                || (multiplicity <= 2 && charge < self.config.small_precluster_charge)
            {
                debug!(
                    "DE {}: {}",
                    self.element.id(),
                    Degeneracy::DegenerateCluster {
                        multiplicity,
                        charge
                    }
                );
                self.statistics.preclusters_discarded += 1;
                continue;
            }

            self.statistics.preclusters_built += 1;
            return Some(precluster);
        }
    }

    /// Gives an unused pad back to the pool.
    ///
    /// A pad that has already been offered `max_pad_offers` times is dropped
    /// instead. Pads with an owner are never released.
    pub fn release(&mut self, slot: PoolSlot) {
        let max_offers = self.config.max_pad_offers;
        let Some(entry) = self.entries.get_mut(slot) else {
            return;
        };
        if !entry.in_use || entry.dropped || entry.pad.owner.is_some() {
            return;
        }
        if entry.offers >= max_offers {
            trace!("dropping pad {:?} after {} offers", entry.pad.id, entry.offers);
            entry.dropped = true;
        } else {
            entry.in_use = false;
            self.statistics.pads_released += 1;
        }
    }

    /// Records the hit that consumed the pad in `slot`.
    pub fn assign_owner(&mut self, slot: PoolSlot, hit: HitIndex) {
        if let Some(entry) = self.entries.get_mut(slot) {
            entry.pad.owner = Some(hit);
        }
    }

    /// Pads that were consumed by a hit, with the hit's index, in pool order.
    pub fn owners(&self) -> impl Iterator<Item = (PadId, HitIndex)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.pad.owner.map(|hit| (e.pad.id, hit)))
    }

    /// Returns the pool's copy of a pad.
    #[must_use]
    pub fn pad(&self, slot: PoolSlot) -> Option<&Pad> {
        self.entries.get(slot).map(|e| &e.pad)
    }

    /// Number of pads in the pool.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.entries.len()
    }

    /// Number of pads waiting to be grouped.
    #[must_use]
    pub fn free_pads(&self) -> usize {
        (0..self.entries.len()).filter(|&s| self.is_free(s)).count()
    }

    #[must_use]
    pub fn statistics(&self) -> &DeclusterStatistics {
        &self.statistics
    }

    #[must_use]
    pub fn into_statistics(self) -> DeclusterStatistics {
        self.statistics
    }

    fn is_free(&self, slot: PoolSlot) -> bool {
        let e = &self.entries[slot];
        !e.in_use && !e.dropped
    }

    /// Groups every free pad: neighbours on one cathode, overlaps across cathodes.
    fn compute_components(&mut self) {
        let free: Vec<PoolSlot> = (0..self.entries.len())
            .filter(|&s| self.is_free(s))
            .collect();
        if free.is_empty() {
            return;
        }

        let tolerance = self.config.geometric_tolerance;
        let mut uf = UnionFind::new(self.entries.len());
        for &slot in &free {
            for &other in &self.entries[slot].neighbors {
                if self.is_free(other) {
                    uf.union(slot, other);
                }
            }
        }

        let (bending, non_bending): (Vec<PoolSlot>, Vec<PoolSlot>) = free
            .iter()
            .partition(|&&s| self.entries[s].pad.cathode() == Cathode::Bending);
        for &a in &bending {
            let rect = self.entries[a].pad.rect();
            for &b in &non_bending {
                if rect.overlaps(&self.entries[b].pad.rect(), tolerance) {
                    uf.union(a, b);
                }
            }
        }

        self.pending = uf.components(&free).into();
    }

    fn release_ambiguous(&mut self, slot: PoolSlot) {
        let entry = &mut self.entries[slot];
        entry.in_use = false;
        entry.released_once = true;
        self.statistics.pads_released += 1;
    }

    /// Handles pads without an overlapping partner on the other cathode.
    fn resolve_unmatched(&mut self, precluster: &mut Precluster) {
        let tolerance = self.config.geometric_tolerance;
        let mut unmatched = Vec::new();
        let mut mirrors = Vec::new();

        for (i, pad) in precluster.pads().iter().enumerate() {
            let other = pad.cathode().other();
            let rect = pad.rect();
            let matched = precluster
                .pads()
                .iter()
                .any(|q| q.cathode() == other && q.rect().overlaps(&rect, tolerance));
            if matched {
                continue;
            }
            let (x, y) = (pad.geometry.x, pad.geometry.y);
            if let Err(err) = self.element.segmentation(other).pad_at_position(x, y) {
                trace!("edge pad {:?}: {err}", pad.id);
                mirrors.push(Pad::virtual_mirror(other, pad.geometry));
            } else {
                unmatched.push(i);
            }
        }

        let releasable = !unmatched.is_empty()
            && unmatched.len() <= self.config.max_unmatched_released
            && unmatched.iter().all(|&i| {
                precluster.pads()[i].charge < self.config.low_charge_release
                    && precluster
                        .slot(i)
                        .is_some_and(|s| !self.entries[s].released_once)
            });
        if releasable {
            for &i in unmatched.iter().rev() {
                let (pad, slot) = precluster.remove(i);
                debug!("releasing unmatched pad {:?} ({:.2})", pad.id, pad.charge);
                if let Some(slot) = slot {
                    self.release_ambiguous(slot);
                }
            }
        }

        for mirror in mirrors {
            precluster.push(mirror, None);
        }
    }

    /// Prunes far, low-charge pads from the heavier cathode while the
    /// cathode charges disagree by more than `max_charge_asymmetry`.
    fn balance_cathodes(&mut self, precluster: &mut Precluster) {
        loop {
            let q0 = precluster.charge(Cathode::Bending);
            let q1 = precluster.charge(Cathode::NonBending);
            let total = q0 + q1;
            if total <= 0.0 || (q0 - q1).abs() / total <= self.config.max_charge_asymmetry {
                return;
            }
            let heavy = if q0 >= q1 {
                Cathode::Bending
            } else {
                Cathode::NonBending
            };

            let Some((max_index, reference)) = precluster
                .real_pads()
                .filter(|(_, p)| p.cathode() == heavy)
                .fold(None, |best: Option<(usize, &Pad)>, (i, p)| match best {
                    Some((_, b)) if b.charge >= p.charge => best,
                    _ => Some((i, p)),
                })
                .map(|(i, p)| (i, p.geometry))
            else {
                return;
            };
            let cut = self.config.asymmetry_release_fraction * precluster.pads()[max_index].charge;

            let mut candidate: Option<(usize, f64)> = None;
            for (i, pad) in precluster.real_pads() {
                if i == max_index || pad.cathode() != heavy || pad.charge >= cut {
                    continue;
                }
                let Some(slot) = precluster.slot(i) else {
                    continue;
                };
                if self.entries[slot].released_once {
                    continue;
                }
                let d = reference.normalized_distance(pad.geometry.x, pad.geometry.y);
                if candidate.is_none_or(|(_, best)| d > best) {
                    candidate = Some((i, d));
                }
            }

            let Some((i, _)) = candidate else {
                return;
            };
            let (pad, slot) = precluster.remove(i);
            debug!(
                "cathode asymmetry {:.3}: releasing pad {:?} ({:.2})",
                (q0 - q1).abs() / total,
                pad.id,
                pad.charge
            );
            if let Some(slot) = slot {
                self.release_ambiguous(slot);
            }
        }
    }
}

impl<S: Segmentation> Iterator for PreclusterBuilder<'_, S> {
    type Item = Precluster;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_precluster()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpad_core::{Zone, ZonedSegmentation};

    fn uniform_element() -> DetectionElement<ZonedSegmentation> {
        let plane = || ZonedSegmentation::uniform(4.0, 4.0, 0.25, 0.25).unwrap();
        DetectionElement::new(1, plane(), plane())
    }

    fn permissive() -> DeclusterConfig {
        DeclusterConfig::default()
            .with_min_precluster_charge(1.0)
            .with_small_precluster_charge(1.0)
    }

    fn b(ix: i32, iy: i32, q: f64) -> Digit {
        Digit::new(Cathode::Bending, ix, iy, q)
    }

    fn nb(ix: i32, iy: i32, q: f64) -> Digit {
        Digit::new(Cathode::NonBending, ix, iy, q)
    }

    #[test]
    fn test_groups_touching_pads() {
        let de = uniform_element();
        let config = permissive();
        let digits = [b(8, 8, 20.0), b(9, 9, 20.0), b(2, 2, 20.0)];
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let first = builder.next_precluster().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.pads()[0].id, PadId::new(Cathode::Bending, 2, 2));

        // Diagonal neighbours are connected.
        let second = builder.next_precluster().unwrap();
        assert_eq!(second.len(), 2);
        assert!(!second.is_two_cathode());
        assert!(builder.next_precluster().is_none());
    }

    #[test]
    fn test_merges_across_cathodes() {
        let de = uniform_element();
        let config = permissive();
        let digits = [b(8, 8, 30.0), nb(8, 8, 25.0), nb(8, 9, 10.0)];
        let preclusters: Vec<Precluster> =
            PreclusterBuilder::new(&de, &digits, 0.5, &config).collect();

        assert_eq!(preclusters.len(), 1);
        let pc = &preclusters[0];
        assert!(pc.is_two_cathode());
        assert!((pc.charge(Cathode::Bending) - 30.0).abs() < 1e-12);
        assert!((pc.charge(Cathode::NonBending) - 35.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_suppression_and_bad_indices() {
        let de = uniform_element();
        let config = permissive();
        let digits = [b(8, 8, 30.0), b(9, 8, 3.0), b(99, 0, 30.0)];
        let mut builder = PreclusterBuilder::new(&de, &digits, 6.0, &config);

        assert_eq!(builder.pool_size(), 1);
        assert_eq!(builder.statistics().pads_suppressed, 1);
        assert_eq!(builder.statistics().lookups_failed, 1);
        let pc = builder.next_precluster().unwrap();
        assert!(pc.pads().iter().all(|p| p.charge >= 6.0));
    }

    #[test]
    fn test_repeated_digits_are_summed() {
        let de = uniform_element();
        let config = permissive();
        let mut saturated = b(8, 8, 10.0);
        saturated.is_saturated = true;
        let digits = [b(8, 8, 15.0), saturated];
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);
        let pc = builder.next_precluster().unwrap();
        assert_eq!(pc.len(), 1);
        assert!((pc.pads()[0].charge - 25.0).abs() < 1e-12);
        assert!(pc.pads()[0].is_saturated);
    }

    #[test]
    fn test_edge_pad_gets_virtual_mirror() {
        let bending = ZonedSegmentation::uniform(4.0, 4.0, 0.25, 0.25).unwrap();
        let non_bending =
            ZonedSegmentation::new(-4.0, 4.0, vec![Zone::new(-4.0, 0.0, 0.25, 0.25)]).unwrap();
        let de = DetectionElement::new(2, bending, non_bending);
        let config = permissive();
        let digits = [b(7, 8, 50.0), b(8, 8, 40.0), nb(7, 8, 50.0)];
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let pc = builder.next_precluster().unwrap();
        assert_eq!(pc.multiplicity(), 3);
        assert_eq!(pc.len(), 4);
        let mirror = pc.pads().iter().find(|p| !p.is_real).unwrap();
        assert_eq!(mirror.cathode(), Cathode::NonBending);
        assert!(mirror.id.is_mirror);
        assert_ne!(mirror.id, PadId::new(Cathode::NonBending, 8, 8));
        assert!((mirror.geometry.x - 0.25).abs() < 1e-12);
        assert!(mirror.charge.abs() < f64::EPSILON);
        assert_eq!(builder.statistics().pads_released, 0);
    }

    #[test]
    fn test_low_charge_unmatched_pad_released() {
        let de = uniform_element();
        let config = DeclusterConfig::default();
        let digits = [b(8, 8, 50.0), b(9, 8, 5.0), nb(8, 8, 50.0)];
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let pc = builder.next_precluster().unwrap();
        assert_eq!(pc.len(), 2);
        assert!(pc.pads().iter().all(|p| p.charge >= 50.0));
        assert_eq!(builder.statistics().pads_released, 1);

        // The released pad comes back alone and is too small to keep.
        assert!(builder.next_precluster().is_none());
        assert_eq!(builder.statistics().preclusters_discarded, 1);
    }

    #[test]
    fn test_unmatched_pads_kept_when_too_many() {
        let de = uniform_element();
        let config = DeclusterConfig::default();
        let digits = [b(8, 8, 50.0), b(9, 8, 5.0), b(10, 8, 4.0), nb(8, 8, 50.0)];
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let pc = builder.next_precluster().unwrap();
        assert_eq!(pc.len(), 4);
        assert_eq!(builder.statistics().pads_released, 0);
    }

    fn asymmetric_digits() -> Vec<Digit> {
        vec![
            b(7, 8, 5.0),
            b(8, 8, 100.0),
            b(9, 8, 5.0),
            b(10, 8, 4.0),
            nb(7, 8, 1.0),
            nb(8, 8, 40.0),
            nb(9, 8, 1.0),
            nb(10, 8, 1.0),
        ]
    }

    #[test]
    fn test_asymmetry_prunes_until_no_candidate() {
        let de = uniform_element();
        let config = DeclusterConfig::default().with_max_charge_asymmetry(0.3);
        let digits = asymmetric_digits();
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let pc = builder.next_precluster().unwrap();
        let bending: Vec<&Pad> = pc
            .pads()
            .iter()
            .filter(|p| p.cathode() == Cathode::Bending)
            .collect();
        assert_eq!(bending.len(), 1);
        assert!((bending[0].charge - 100.0).abs() < 1e-12);
        assert_eq!(pc.pads().len(), 5);
        assert_eq!(builder.statistics().pads_released, 3);
    }

    #[test]
    fn test_asymmetry_prunes_farthest_first() {
        let de = uniform_element();
        let config = DeclusterConfig::default().with_max_charge_asymmetry(0.42);
        let digits = asymmetric_digits();
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let pc = builder.next_precluster().unwrap();
        let bending: Vec<i32> = pc
            .pads()
            .iter()
            .filter(|p| p.cathode() == Cathode::Bending)
            .map(|p| p.id.ix)
            .collect();
        // (10, 8) is farthest; (7, 8) wins the tie with (9, 8) by pool order.
        assert_eq!(bending, vec![8, 9]);
        assert_eq!(builder.statistics().pads_released, 2);
    }

    #[test]
    fn test_release_bounded_by_offers() {
        let de = uniform_element();
        let config = DeclusterConfig::default();
        let digits = [b(8, 8, 100.0)];
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let pc = builder.next_precluster().unwrap();
        let slot = pc.slot(0).unwrap();
        builder.release(slot);
        assert_eq!(builder.free_pads(), 1);

        let again = builder.next_precluster().unwrap();
        assert_eq!(again.slot(0), Some(slot));
        builder.release(slot);
        assert_eq!(builder.free_pads(), 0);
        assert!(builder.next_precluster().is_none());
    }

    #[test]
    fn test_owned_pads_are_not_released() {
        let de = uniform_element();
        let config = DeclusterConfig::default();
        let digits = [b(8, 8, 100.0)];
        let mut builder = PreclusterBuilder::new(&de, &digits, 0.5, &config);

        let pc = builder.next_precluster().unwrap();
        let slot = pc.slot(0).unwrap();
        builder.assign_owner(slot, 7);
        builder.release(slot);
        assert_eq!(builder.pad(slot).unwrap().owner, Some(7));
        assert!(builder.next_precluster().is_none());
        assert_eq!(
            builder.owners().collect::<Vec<_>>(),
            vec![(PadId::new(Cathode::Bending, 8, 8), 7)]
        );
    }
}
