//! Hit extraction from a precluster.
//!
//! Each precluster goes through pixelization and a local-maxima search; every
//! maximum then claims the pads nearest to it and yields at most one hit.
//! Positions start from a three-pad centroid per axis and are optionally
//! refined against the charge response model.
#![allow(clippy::module_name_repetitions)]

use log::{debug, trace};
use rustpad_core::{
    Axis, Cathode, DeclusterConfig, Degeneracy, DetectionElement, Pad, ReconstructedHit, Result,
    ResponseModel, Segmentation,
};

use crate::maxima::{LocalMaximum, LocalMaximaFinder};
use crate::pixel::Pixelizer;
use crate::precluster::Precluster;

const DIRECTIONS: [(f64, f64); 8] = [
    (1.0, 0.0),
    (-1.0, 0.0),
    (0.0, 1.0),
    (0.0, -1.0),
    (1.0, 1.0),
    (1.0, -1.0),
    (-1.0, 1.0),
    (-1.0, -1.0),
];

/// Pads of `members` on one cathode.
fn cathode_pads<'p>(
    precluster: &'p Precluster,
    members: &'p [usize],
    cathode: Cathode,
) -> impl Iterator<Item = &'p Pad> + 'p {
    members
        .iter()
        .map(|&i| &precluster.pads()[i])
        .filter(move |p| p.cathode() == cathode)
}

/// Result of extracting one precluster.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Hits in the order their maxima were processed.
    pub hits: Vec<ReconstructedHit>,
    /// For every precluster pad, the position in `hits` of the hit using it.
    pub assignment: Vec<Option<usize>>,
    pub maxima_found: usize,
    pub hits_discarded: usize,
    pub degeneracies: usize,
}

impl Extraction {
    /// Precluster indices of the pads no emitted hit consumed.
    pub fn leftovers(&self) -> impl Iterator<Item = usize> + '_ {
        self.assignment
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_none())
            .map(|(i, _)| i)
    }
}

/// Turns preclusters into reconstructed hits.
pub struct ClusterExtractor<'a, S, R: ?Sized> {
    element: &'a DetectionElement<S>,
    response: &'a R,
    config: &'a DeclusterConfig,
    pixelizer: Pixelizer<'a, S>,
    finder: LocalMaximaFinder,
}

impl<'a, S: Segmentation, R: ResponseModel + ?Sized> ClusterExtractor<'a, S, R> {
    pub fn new(
        element: &'a DetectionElement<S>,
        response: &'a R,
        config: &'a DeclusterConfig,
    ) -> Self {
        Self {
            element,
            response,
            config,
            pixelizer: Pixelizer::new(element, config),
            finder: LocalMaximaFinder::from_config(config),
        }
    }

    /// Extracts the hits of one precluster.
    ///
    /// # Errors
    /// Propagates pixel-grid and plateau-budget failures.
    pub fn extract(&self, precluster: &Precluster) -> Result<Extraction> {
        let map = self.pixelizer.pixelize(precluster)?;
        let maxima = self.finder.find(&map)?;
        let mut out = Extraction {
            assignment: vec![None; precluster.len()],
            maxima_found: maxima.len(),
            ..Extraction::default()
        };
        if maxima.is_empty() {
            debug!(
                "DE {}: no maxima in precluster of {} pads",
                self.element.id(),
                precluster.len()
            );
            return Ok(out);
        }

        let half_size = map.half_size();
        for (maximum, members) in maxima.iter().zip(self.associate(precluster, &maxima)) {
            match self.build_hit(precluster, maximum, &members, half_size, &mut out.degeneracies) {
                Some(hit) => {
                    let ordinal = out.hits.len();
                    for &i in &members {
                        out.assignment[i] = Some(ordinal);
                    }
                    out.hits.push(hit);
                }
                None => out.hits_discarded += 1,
            }
        }
        Ok(out)
    }

    /// Assigns every real pad to its nearest maximum within the association radius.
    fn associate(&self, precluster: &Precluster, maxima: &[LocalMaximum]) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); maxima.len()];
        for (i, pad) in precluster.real_pads() {
            let mut nearest: Option<(usize, f64)> = None;
            for (k, m) in maxima.iter().enumerate() {
                let d = pad.geometry.normalized_distance(m.x, m.y);
                if nearest.is_none_or(|(_, best)| d < best) {
                    nearest = Some((k, d));
                }
            }
            if let Some((k, d)) = nearest {
                if d <= self.config.association_radius {
                    groups[k].push(i);
                }
            }
        }
        groups
    }

    fn build_hit(
        &self,
        precluster: &Precluster,
        maximum: &LocalMaximum,
        members: &[usize],
        half_size: (f64, f64),
        degeneracies: &mut usize,
    ) -> Option<ReconstructedHit> {
        let pads = precluster.pads();
        let mut cathode_charges = [0.0; 2];
        let mut seen = [false; 2];
        for &i in members {
            let c = pads[i].cathode().index();
            cathode_charges[c] += pads[i].charge;
            seen[c] = true;
        }
        let charge = match seen {
            [true, true] => 0.5 * (cathode_charges[0] + cathode_charges[1]),
            [true, false] => cathode_charges[0],
            [false, true] => cathode_charges[1],
            [false, false] => 0.0,
        };
        if charge < self.config.min_hit_charge {
            debug!(
                "DE {}: discarding maximum at ({:.4}, {:.4}), charge {charge:.2}",
                self.element.id(),
                maximum.x,
                maximum.y
            );
            return None;
        }

        let mut x = self.centroid(
            precluster,
            members,
            maximum,
            Axis::X,
            &cathode_charges,
            half_size.0,
            degeneracies,
        );
        let mut y = self.centroid(
            precluster,
            members,
            maximum,
            Axis::Y,
            &cathode_charges,
            half_size.1,
            degeneracies,
        );
        let mut quality = self.chi_square(precluster, members, x, y);
        if self.config.refine_with_response {
            (x, y, quality) = self.refine(precluster, members, (x, y), quality, half_size);
        }
        let cathode_consistent = self.cathodes_agree(precluster, members, x, y, degeneracies);
        if !cathode_consistent {
            debug!(
                "DE {}: cathode charges {:.2} / {:.2} disagree for hit at ({x:.4}, {y:.4})",
                self.element.id(),
                cathode_charges[0],
                cathode_charges[1]
            );
        }
        trace!(
            "DE {}: hit at ({x:.4}, {y:.4}) charge {charge:.2} chi2 {quality:.3} from {} pads",
            self.element.id(),
            members.len()
        );

        Some(ReconstructedHit {
            detection_element: self.element.id(),
            x,
            y,
            charge,
            cathode_charges,
            quality,
            cathode_consistent,
            pads: members.iter().map(|&i| pads[i].id).collect(),
        })
    }

    fn member_at(
        &self,
        precluster: &Precluster,
        members: &[usize],
        cathode: Cathode,
        x: f64,
        y: f64,
    ) -> Option<usize> {
        let tolerance = self.config.geometric_tolerance;
        members.iter().copied().find(|&i| {
            let pad = &precluster.pads()[i];
            pad.cathode() == cathode && pad.rect().contains(x, y, tolerance)
        })
    }

    /// Charge-weighted position along `axis` from the central pad and its two
    /// neighbours on the first cathode that has a pad under the maximum.
    #[allow(clippy::too_many_arguments)]
    fn centroid(
        &self,
        precluster: &Precluster,
        members: &[usize],
        maximum: &LocalMaximum,
        axis: Axis,
        cathode_charges: &[f64; 2],
        pixel_half: f64,
        degeneracies: &mut usize,
    ) -> f64 {
        let center = match axis {
            Axis::X => maximum.x,
            Axis::Y => maximum.y,
        };
        let preferred = axis.precise_cathode();

        for cathode in [preferred, preferred.other()] {
            let Some(central) = self.member_at(precluster, members, cathode, maximum.x, maximum.y)
            else {
                continue;
            };
            let pad = &precluster.pads()[central];
            let g = pad.geometry;
            let mut weighted = pad.charge * g.coordinate(axis);
            let mut total = pad.charge;

            for side in [-1.0, 1.0] {
                let edge = g.coordinate(axis) + side * g.half_size(axis);
                let probe = edge + side * pixel_half;
                let (px, py) = match axis {
                    Axis::X => (probe, maximum.y),
                    Axis::Y => (maximum.x, probe),
                };
                if let Some(i) = self.member_at(precluster, members, cathode, px, py) {
                    let p = &precluster.pads()[i];
                    weighted += p.charge * p.geometry.coordinate(axis);
                    total += p.charge;
                    continue;
                }
                if self.element.segmentation(cathode).pad_at_position(px, py).is_ok() {
                    // The neighbour exists but did not fire.
                    continue;
                }
                let other = cathode.other();
                let other_charge = cathode_charges[other.index()];
                if other_charge <= 0.0 {
                    continue;
                }
                if let Some(i) = self.member_at(precluster, members, other, px, py) {
                    let p = &precluster.pads()[i];
                    let q = p.charge * cathode_charges[cathode.index()] / other_charge;
                    weighted += q * p.geometry.coordinate(axis);
                    total += q;
                }
            }

            if total > 0.0 {
                return weighted / total;
            }
            *degeneracies += 1;
            debug!(
                "DE {}: {}",
                self.element.id(),
                Degeneracy::NumericalDegeneracy { context: "centroid" }
            );
            return center;
        }
        center
    }

    /// Shape chi-square of the pads against the response at `(x, y)`.
    ///
    /// Each cathode is normalized to its own measured charge; saturated pads
    /// are left out.
    fn chi_square(&self, precluster: &Precluster, members: &[usize], x: f64, y: f64) -> f64 {
        let mut chi2 = 0.0;
        for cathode in Cathode::ALL {
            let fitted = || {
                cathode_pads(precluster, members, cathode).filter(|p| !p.is_saturated)
            };
            let measured: f64 = fitted().map(|p| p.charge).sum();
            let predicted: f64 = fitted()
                .map(|p| self.response.pad_fraction(&p.geometry, x, y))
                .sum();
            if predicted <= 0.0 || measured <= 0.0 {
                continue;
            }
            let norm = measured / predicted;
            for p in fitted() {
                let expected = norm * self.response.pad_fraction(&p.geometry, x, y);
                chi2 += (p.charge - expected).powi(2) / expected.max(1.0);
            }
        }
        chi2
    }

    /// Pattern search around `start`, bounded by one pixel half-size per axis.
    fn refine(
        &self,
        precluster: &Precluster,
        members: &[usize],
        start: (f64, f64),
        start_chi2: f64,
        half_size: (f64, f64),
    ) -> (f64, f64, f64) {
        let (mut x, mut y) = start;
        let mut best = start_chi2;
        let (mut step_x, mut step_y) = (0.5 * half_size.0, 0.5 * half_size.1);

        for _ in 0..self.config.refine_iterations {
            let mut candidate: Option<(f64, f64, f64)> = None;
            for (dx, dy) in DIRECTIONS {
                let (cx, cy) = (x + dx * step_x, y + dy * step_y);
                if (cx - start.0).abs() > half_size.0 || (cy - start.1).abs() > half_size.1 {
                    continue;
                }
                let chi2 = self.chi_square(precluster, members, cx, cy);
                let threshold = candidate.map_or(best, |(_, _, c)| c);
                if chi2 < threshold {
                    candidate = Some((cx, cy, chi2));
                }
            }
            match candidate {
                Some((cx, cy, chi2)) => {
                    x = cx;
                    y = cy;
                    best = chi2;
                }
                None => {
                    step_x *= 0.5;
                    step_y *= 0.5;
                }
            }
        }
        (x, y, best)
    }

    /// Compares the charge each cathode implies once divided by the fraction
    /// the response model predicts it collects.
    fn cathodes_agree(
        &self,
        precluster: &Precluster,
        members: &[usize],
        x: f64,
        y: f64,
        degeneracies: &mut usize,
    ) -> bool {
        let mut implied = [None; 2];
        for cathode in Cathode::ALL {
            let (measured, predicted) = cathode_pads(precluster, members, cathode)
                .fold((0.0, 0.0), |(q, f), p| {
                    (q + p.charge, f + self.response.pad_fraction(&p.geometry, x, y))
                });
            if measured <= 0.0 {
                continue;
            }
            if predicted <= 0.0 {
                *degeneracies += 1;
                debug!(
                    "DE {}: {}",
                    self.element.id(),
                    Degeneracy::NumericalDegeneracy {
                        context: "cathode consistency"
                    }
                );
                continue;
            }
            implied[cathode.index()] = Some(measured / predicted);
        }
        match implied {
            [Some(a), Some(b)] => (a / b).ln().abs() <= self.config.max_cathode_log_ratio,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rustpad_core::{MathiesonResponse, PadGeometry, ResponseConfig, Zone, ZonedSegmentation};
    use std::collections::BTreeMap;

    fn element() -> DetectionElement<ZonedSegmentation> {
        let plane = || ZonedSegmentation::uniform(4.0, 4.0, 0.25, 0.25).unwrap();
        DetectionElement::new(7, plane(), plane())
    }

    /// Exact response of both cathodes to point deposits.
    fn precluster(
        de: &DetectionElement<ZonedSegmentation>,
        response: &MathiesonResponse,
        deposits: &[(f64, f64, f64)],
    ) -> Precluster {
        let mut pads = Vec::new();
        for cathode in Cathode::ALL {
            let seg = de.segmentation(cathode);
            let mut charges: BTreeMap<(i32, i32), (PadGeometry, f64)> = BTreeMap::new();
            for &(x, y, q) in deposits {
                for (g, share) in response.disintegrate(seg, x, y, q) {
                    charges.entry((g.ix, g.iy)).or_insert((g, 0.0)).1 += share;
                }
            }
            pads.extend(
                charges
                    .into_values()
                    .filter(|(_, q)| *q >= 0.5)
                    .map(|(g, q)| Pad::new(cathode, g, q)),
            );
        }
        Precluster::from_pads(pads)
    }

    #[test]
    fn test_single_deposit() {
        let de = element();
        let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
        let config = DeclusterConfig::default();
        let pc = precluster(&de, &response, &[(0.03, -0.02, 100.0)]);

        let extraction = ClusterExtractor::new(&de, &response, &config)
            .extract(&pc)
            .unwrap();
        assert_eq!(extraction.hits.len(), 1);
        let hit = &extraction.hits[0];
        assert_eq!(hit.detection_element, 7);
        assert!(hit.distance_to(0.03, -0.02) < 0.1, "hit at ({}, {})", hit.x, hit.y);
        assert!((hit.charge - 100.0).abs() < 5.0);
        assert!(hit.cathode_consistent);
        assert!(hit.quality.is_finite());
    }

    #[test]
    fn test_refinement_does_not_worsen_chi_square() {
        let de = element();
        let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
        let refined = DeclusterConfig::default();
        let plain = DeclusterConfig::default().with_refinement(false);
        let pc = precluster(&de, &response, &[(0.1, 0.33, 200.0)]);

        let a = ClusterExtractor::new(&de, &response, &refined).extract(&pc).unwrap();
        let b = ClusterExtractor::new(&de, &response, &plain).extract(&pc).unwrap();
        assert_eq!(a.hits.len(), 1);
        assert_eq!(b.hits.len(), 1);
        assert!(a.hits[0].quality <= b.hits[0].quality);
        assert!(a.hits[0].distance_to(0.1, 0.33) < 0.05);
    }

    #[test]
    fn test_two_separated_deposits() {
        let de = element();
        let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
        let config = DeclusterConfig::default();
        let pc = precluster(&de, &response, &[(-0.72, -0.02, 100.0), (0.78, -0.02, 100.0)]);

        let extraction = ClusterExtractor::new(&de, &response, &config)
            .extract(&pc)
            .unwrap();
        assert_eq!(extraction.hits.len(), 2);
        let mut xs: Vec<f64> = extraction.hits.iter().map(|h| h.x).collect();
        xs.sort_by(f64::total_cmp);
        assert!((xs[0] + 0.72).abs() < 0.25);
        assert!((xs[1] - 0.78).abs() < 0.25);
        // Every used pad has exactly one owner.
        let used = extraction.assignment.iter().filter(|a| a.is_some()).count();
        let claimed: usize = extraction.hits.iter().map(ReconstructedHit::multiplicity).sum();
        assert_eq!(used, claimed);
    }

    #[test]
    fn test_low_charge_maximum_discarded() {
        let de = element();
        let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
        let config = DeclusterConfig::default().with_min_hit_charge(1000.0);
        let pc = precluster(&de, &response, &[(0.03, -0.02, 100.0)]);

        let extraction = ClusterExtractor::new(&de, &response, &config)
            .extract(&pc)
            .unwrap();
        assert!(extraction.hits.is_empty());
        assert_eq!(extraction.hits_discarded, 1);
        assert_eq!(extraction.leftovers().count(), pc.len());
    }

    #[test]
    fn test_inconsistent_cathodes_flagged() {
        let de = element();
        let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
        let config = DeclusterConfig::default();
        let mut pads = precluster(&de, &response, &[(0.03, -0.02, 100.0)])
            .pads()
            .to_vec();
        for pad in &mut pads {
            if pad.cathode() == Cathode::NonBending {
                pad.charge *= 5.0;
            }
        }
        let pc = Precluster::from_pads(pads);

        let extraction = ClusterExtractor::new(&de, &response, &config)
            .extract(&pc)
            .unwrap();
        assert_eq!(extraction.hits.len(), 1);
        assert!(!extraction.hits[0].cathode_consistent);
    }

    #[test]
    fn test_centroid_without_neighbours_is_pad_center() {
        let de = element();
        let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
        let config = DeclusterConfig::default().with_refinement(false);
        let g = de.segmentation(Cathode::Bending).pad_at_indices(8, 8).unwrap();
        let pc = Precluster::from_pads(vec![
            Pad::new(Cathode::Bending, g, 50.0),
            Pad::new(Cathode::NonBending, g, 50.0),
        ]);

        let extraction = ClusterExtractor::new(&de, &response, &config)
            .extract(&pc)
            .unwrap();
        let hit = &extraction.hits[0];
        assert_abs_diff_eq!(hit.x, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(hit.y, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(hit.charge, 50.0, epsilon = 1e-12);
        assert_eq!(hit.multiplicity(), 2);
    }

    #[test]
    fn test_centroid_beyond_cathode_edge_uses_other_cathode_pad() {
        // Non-bending plane stops at x = 0, bending pads are 1.0 wide in x.
        let bending = ZonedSegmentation::uniform(4.0, 4.0, 0.5, 0.25).unwrap();
        let non_bending =
            ZonedSegmentation::new(-4.0, 4.0, vec![Zone::new(-4.0, 0.0, 0.25, 0.25)]).unwrap();
        let de = DetectionElement::new(8, bending, non_bending);
        let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
        let config = DeclusterConfig::default().with_refinement(false);

        let at = |cathode: Cathode, x: f64, q: f64| {
            let g = de.segmentation(cathode).pad_at_position(x, 0.25).unwrap();
            Pad::new(cathode, g, q)
        };
        let pc = Precluster::from_pads(vec![
            at(Cathode::Bending, -0.5, 50.0),
            at(Cathode::Bending, 0.5, 20.0),
            at(Cathode::NonBending, -0.75, 10.0),
            at(Cathode::NonBending, -0.25, 40.0),
        ]);

        let extraction = ClusterExtractor::new(&de, &response, &config)
            .extract(&pc)
            .unwrap();
        assert_eq!(extraction.hits.len(), 1);
        let hit = &extraction.hits[0];
        // The bending pad right of the edge stands in at its own center (0.5)
        // with charge 20 * 50 / 70.
        let q = 20.0 * 50.0 / 70.0;
        let expected = (40.0 * -0.25 + 10.0 * -0.75 + q * 0.5) / (50.0 + q);
        assert_abs_diff_eq!(hit.x, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(hit.y, 0.25, epsilon = 1e-12);
        assert_eq!(hit.multiplicity(), 4);
    }
}
