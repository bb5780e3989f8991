//! Pad segmentation of one cathode plane.
//!
//! A segmentation is immutable geometry built once per detection element and
//! shared read-only by every stage of the reconstruction.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::missing_errors_doc
)]

use crate::error::{Error, GeometryLookupFailure, Result};
use crate::pad::{PadGeometry, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Upper bound on the number of neighbours reported for one pad.
pub const MAX_NEIGHBORS: usize = 10;

/// Relative slack used when snapping coordinates onto pad boundaries.
const EDGE_EPSILON: f64 = 1e-9;

/// Geometric lookup service over one cathode plane.
pub trait Segmentation: Send + Sync {
    /// Returns the pad containing a continuous position.
    fn pad_at_position(&self, x: f64, y: f64) -> std::result::Result<PadGeometry, GeometryLookupFailure>;

    /// Returns the pad with the given indices.
    fn pad_at_indices(&self, ix: i32, iy: i32) -> std::result::Result<PadGeometry, GeometryLookupFailure>;

    /// Returns up to [`MAX_NEIGHBORS`] pads touching `pad`, corners included.
    fn neighbors(&self, pad: &PadGeometry) -> Vec<PadGeometry>;

    /// Returns every pad intersecting `area`, in index order.
    fn pads_in_area(&self, area: &Rect) -> Vec<PadGeometry>;

    /// Smallest pad half-dimensions over all zones.
    fn minimum_pad_half_size(&self) -> (f64, f64);

    /// Extent of the plane.
    fn area(&self) -> Rect;
}

/// A vertical band of the sensor with a single pad size.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Zone {
    pub x_min: f64,
    pub x_max: f64,
    /// Pad half-width.
    pub dx: f64,
    /// Pad half-height.
    pub dy: f64,
}

impl Zone {
    #[must_use]
    pub fn new(x_min: f64, x_max: f64, dx: f64, dy: f64) -> Self {
        Self {
            x_min,
            x_max,
            dx,
            dy,
        }
    }
}

#[derive(Debug, Clone)]
struct ZoneLayout {
    zone: Zone,
    first_ix: i32,
    columns: i32,
    rows: i32,
}

impl ZoneLayout {
    fn contains_column(&self, ix: i32) -> bool {
        ix >= self.first_ix && ix < self.first_ix + self.columns
    }

    fn geometry(&self, column: i32, row: i32, y_min: f64) -> PadGeometry {
        let z = &self.zone;
        PadGeometry {
            ix: self.first_ix + column,
            iy: row,
            x: z.x_min + f64::from(2 * column + 1) * z.dx,
            y: y_min + f64::from(2 * row + 1) * z.dy,
            dx: z.dx,
            dy: z.dy,
        }
    }
}

/// Rectangular plane split along x into zones of different pad sizes.
///
/// Column indices run across all zones from left to right; row indices count
/// rows inside the zone owning the column.
#[derive(Debug, Clone)]
pub struct ZonedSegmentation {
    y_min: f64,
    y_max: f64,
    layouts: Vec<ZoneLayout>,
}

fn whole_count(length: f64, pitch: f64) -> Option<i32> {
    let n = length / pitch;
    let rounded = n.round();
    ((n - rounded).abs() < 1e-6 && rounded >= 1.0).then_some(rounded as i32)
}

impl ZonedSegmentation {
    /// Builds a segmentation from contiguous zones ordered by x.
    pub fn new(y_min: f64, y_max: f64, zones: Vec<Zone>) -> Result<Self> {
        if zones.is_empty() {
            return Err(Error::MalformedGeometry("segmentation has no zones".into()));
        }
        if !(y_max > y_min) {
            return Err(Error::MalformedGeometry(format!(
                "empty y extent [{y_min}, {y_max}]"
            )));
        }

        let mut layouts = Vec::with_capacity(zones.len());
        let mut first_ix = 0;
        for (i, zone) in zones.iter().enumerate() {
            if !(zone.dx > 0.0 && zone.dy > 0.0 && zone.dx.is_finite() && zone.dy.is_finite()) {
                return Err(Error::MalformedGeometry(format!(
                    "zone {i} has invalid pad size ({}, {})",
                    zone.dx, zone.dy
                )));
            }
            if i > 0 && (zones[i - 1].x_max - zone.x_min).abs() > EDGE_EPSILON {
                return Err(Error::MalformedGeometry(format!(
                    "zone {i} starts at {} but zone {} ends at {}",
                    zone.x_min,
                    i - 1,
                    zones[i - 1].x_max
                )));
            }
            let columns = whole_count(zone.x_max - zone.x_min, 2.0 * zone.dx).ok_or_else(|| {
                Error::MalformedGeometry(format!("zone {i} width is not a whole number of pads"))
            })?;
            let rows = whole_count(y_max - y_min, 2.0 * zone.dy).ok_or_else(|| {
                Error::MalformedGeometry(format!("zone {i} height is not a whole number of pads"))
            })?;
            layouts.push(ZoneLayout {
                zone: *zone,
                first_ix,
                columns,
                rows,
            });
            first_ix += columns;
        }

        Ok(Self {
            y_min,
            y_max,
            layouts,
        })
    }

    /// Single-zone plane centered on the origin.
    pub fn uniform(half_width: f64, half_height: f64, dx: f64, dy: f64) -> Result<Self> {
        Self::new(
            -half_height,
            half_height,
            vec![Zone::new(-half_width, half_width, dx, dy)],
        )
    }

    /// Number of zones.
    #[must_use]
    pub fn zone_count(&self) -> usize {
        self.layouts.len()
    }

    /// Total number of pads.
    #[must_use]
    pub fn pad_count(&self) -> usize {
        self.layouts
            .iter()
            .map(|l| (l.columns * l.rows) as usize)
            .sum()
    }

    fn cell_range(lo: f64, hi: f64, origin: f64, pitch: f64, count: i32) -> Option<(i32, i32)> {
        let first = (((lo - origin) / pitch) + EDGE_EPSILON).floor().max(0.0) as i32;
        let last = ((((hi - origin) / pitch) - EDGE_EPSILON).ceil() as i32 - 1).min(count - 1);
        (first <= last).then_some((first, last))
    }
}

impl Segmentation for ZonedSegmentation {
    fn pad_at_position(&self, x: f64, y: f64) -> std::result::Result<PadGeometry, GeometryLookupFailure> {
        let outside = GeometryLookupFailure::OutsideSegmentation { x, y };
        if !(y >= self.y_min && y < self.y_max) {
            return Err(outside);
        }
        let layout = self
            .layouts
            .iter()
            .find(|l| x >= l.zone.x_min && x < l.zone.x_max)
            .ok_or(outside)?;
        let column = (((x - layout.zone.x_min) / (2.0 * layout.zone.dx)).floor() as i32)
            .clamp(0, layout.columns - 1);
        let row =
            (((y - self.y_min) / (2.0 * layout.zone.dy)).floor() as i32).clamp(0, layout.rows - 1);
        Ok(layout.geometry(column, row, self.y_min))
    }

    fn pad_at_indices(&self, ix: i32, iy: i32) -> std::result::Result<PadGeometry, GeometryLookupFailure> {
        self.layouts
            .iter()
            .find(|l| l.contains_column(ix))
            .filter(|l| iy >= 0 && iy < l.rows)
            .map(|l| l.geometry(ix - l.first_ix, iy, self.y_min))
            .ok_or(GeometryLookupFailure::InvalidIndices { ix, iy })
    }

    fn neighbors(&self, pad: &PadGeometry) -> Vec<PadGeometry> {
        let (min_dx, min_dy) = self.minimum_pad_half_size();
        let slack = 1e-3 * min_dx.min(min_dy);
        let probe = Rect::from_center(pad.x, pad.y, pad.dx + slack, pad.dy + slack);

        let mut found: Vec<PadGeometry> = self
            .pads_in_area(&probe)
            .into_iter()
            .filter(|g| !(g.ix == pad.ix && g.iy == pad.iy))
            .collect();

        if found.len() > MAX_NEIGHBORS {
            found.sort_by(|a, b| {
                let da = (a.x - pad.x).hypot(a.y - pad.y);
                let db = (b.x - pad.x).hypot(b.y - pad.y);
                da.total_cmp(&db)
                    .then(a.ix.cmp(&b.ix))
                    .then(a.iy.cmp(&b.iy))
            });
            found.truncate(MAX_NEIGHBORS);
            found.sort_by_key(|g| (g.ix, g.iy));
        }
        found
    }

    fn pads_in_area(&self, area: &Rect) -> Vec<PadGeometry> {
        let mut pads = Vec::new();
        for layout in &self.layouts {
            let z = &layout.zone;
            if area.x_max <= z.x_min || area.x_min >= z.x_max {
                continue;
            }
            let Some((c0, c1)) = Self::cell_range(
                area.x_min.max(z.x_min),
                area.x_max.min(z.x_max),
                z.x_min,
                2.0 * z.dx,
                layout.columns,
            ) else {
                continue;
            };
            let Some((r0, r1)) = Self::cell_range(
                area.y_min.max(self.y_min),
                area.y_max.min(self.y_max),
                self.y_min,
                2.0 * z.dy,
                layout.rows,
            ) else {
                continue;
            };
            for column in c0..=c1 {
                for row in r0..=r1 {
                    pads.push(layout.geometry(column, row, self.y_min));
                }
            }
        }
        pads
    }

    fn minimum_pad_half_size(&self) -> (f64, f64) {
        self.layouts.iter().fold((f64::MAX, f64::MAX), |(dx, dy), l| {
            (dx.min(l.zone.dx), dy.min(l.zone.dy))
        })
    }

    fn area(&self) -> Rect {
        let first = &self.layouts[0].zone;
        let last = &self.layouts[self.layouts.len() - 1].zone;
        Rect::new(first.x_min, self.y_min, last.x_max, self.y_max)
    }
}
