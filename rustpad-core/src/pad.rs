//! Pad, rectangle and digit types for cathode-plane readout.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One of the two readout planes of a sensor.
///
/// The bending plane measures y precisely, the non-bending plane x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Cathode {
    /// Cathode 0.
    Bending,
    /// Cathode 1.
    NonBending,
}

impl Cathode {
    /// Both cathodes in index order.
    pub const ALL: [Cathode; 2] = [Cathode::Bending, Cathode::NonBending];

    /// Returns the cathode number (0 or 1).
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Cathode::Bending => 0,
            Cathode::NonBending => 1,
        }
    }

    /// Returns the cathode for a number, if valid.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Cathode::Bending),
            1 => Some(Cathode::NonBending),
            _ => None,
        }
    }

    /// Returns the opposite plane.
    #[inline]
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Cathode::Bending => Cathode::NonBending,
            Cathode::NonBending => Cathode::Bending,
        }
    }

    /// Coordinate this cathode measures with sub-pad precision.
    #[inline]
    #[must_use]
    pub fn precision_axis(self) -> Axis {
        match self {
            Cathode::Bending => Axis::Y,
            Cathode::NonBending => Axis::X,
        }
    }

    /// Bit used in pixel coverage masks.
    #[inline]
    #[must_use]
    pub fn mask(self) -> u8 {
        1 << self.index()
    }
}

/// A coordinate axis of the cathode plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Horizontal.
    X,
    /// Vertical.
    Y,
}

impl Axis {
    /// Cathode whose precision coordinate is this axis.
    #[must_use]
    pub fn precise_cathode(self) -> Cathode {
        match self {
            Axis::X => Cathode::NonBending,
            Axis::Y => Cathode::Bending,
        }
    }
}

/// Axis-aligned rectangle in continuous detector coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rect {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Rect {
    /// Creates a rectangle from its corners.
    #[must_use]
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Creates a rectangle from a center and half-dimensions.
    #[must_use]
    pub fn from_center(x: f64, y: f64, dx: f64, dy: f64) -> Self {
        Self::new(x - dx, y - dy, x + dx, y + dy)
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    #[inline]
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Returns the center point.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            0.5 * (self.x_min + self.x_max),
            0.5 * (self.y_min + self.y_max),
        )
    }

    /// True if the point lies inside, boundaries widened by `tolerance`.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: f64, y: f64, tolerance: f64) -> bool {
        x >= self.x_min - tolerance
            && x <= self.x_max + tolerance
            && y >= self.y_min - tolerance
            && y <= self.y_max + tolerance
    }

    /// True if both rectangles share an area wider than `tolerance` on each axis.
    ///
    /// Rectangles that merely touch along an edge do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Rect, tolerance: f64) -> bool {
        self.x_min.max(other.x_min) < self.x_max.min(other.x_max) - tolerance
            && self.y_min.max(other.y_min) < self.y_max.min(other.y_max) - tolerance
    }

    /// True if the rectangles overlap or touch (edges or corners) within `tolerance`.
    #[must_use]
    pub fn touches(&self, other: &Rect, tolerance: f64) -> bool {
        self.x_min.max(other.x_min) <= self.x_max.min(other.x_max) + tolerance
            && self.y_min.max(other.y_min) <= self.y_max.min(other.y_max) + tolerance
    }

    /// Returns the common area, if any.
    #[must_use]
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.x_min.max(other.x_min),
            self.y_min.max(other.y_min),
            self.x_max.min(other.x_max),
            self.y_max.min(other.y_max),
        );
        (r.width() > 0.0 && r.height() > 0.0).then_some(r)
    }

    /// Returns the bounding box of both rectangles.
    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.x_min.min(other.x_min),
            self.y_min.min(other.y_min),
            self.x_max.max(other.x_max),
            self.y_max.max(other.y_max),
        )
    }

    /// Returns the rectangle shifted by `(-x, -y)`.
    #[must_use]
    pub fn relative_to(&self, x: f64, y: f64) -> Rect {
        Rect::new(self.x_min - x, self.y_min - y, self.x_max - x, self.y_max - y)
    }
}

/// Identifier of a pad: cathode plus indices unique within that cathode.
///
/// Virtual mirror pads carry the indices of the real pad they shadow, which
/// are not valid on their own cathode; `is_mirror` keeps them apart from real
/// pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PadId {
    pub cathode: Cathode,
    pub ix: i32,
    pub iy: i32,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "std::ops::Not::not")
    )]
    pub is_mirror: bool,
}

impl PadId {
    #[inline]
    #[must_use]
    pub fn new(cathode: Cathode, ix: i32, iy: i32) -> Self {
        Self {
            cathode,
            ix,
            iy,
            is_mirror: false,
        }
    }

    /// Id of the placeholder shadowing pad `(ix, iy)` of the other cathode.
    #[inline]
    #[must_use]
    pub fn mirror(cathode: Cathode, ix: i32, iy: i32) -> Self {
        Self {
            is_mirror: true,
            ..Self::new(cathode, ix, iy)
        }
    }
}

/// Immutable tile geometry of a pad as known to the segmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PadGeometry {
    pub ix: i32,
    pub iy: i32,
    /// Center position.
    pub x: f64,
    pub y: f64,
    /// Half-dimensions.
    pub dx: f64,
    pub dy: f64,
}

impl PadGeometry {
    /// Returns the pad tile.
    #[inline]
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::from_center(self.x, self.y, self.dx, self.dy)
    }

    /// Returns the half-dimension along `axis`.
    #[inline]
    #[must_use]
    pub fn half_size(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.dx,
            Axis::Y => self.dy,
        }
    }

    /// Returns the center coordinate along `axis`.
    #[inline]
    #[must_use]
    pub fn coordinate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// Distance to a point, each axis measured in units of the pad's full size.
    #[must_use]
    pub fn normalized_distance(&self, x: f64, y: f64) -> f64 {
        let ux = (x - self.x) / (2.0 * self.dx);
        let uy = (y - self.y) / (2.0 * self.dy);
        (ux * ux + uy * uy).sqrt()
    }
}

/// Index into the output store of the hit that consumed a pad.
pub type HitIndex = usize;

/// A charged pad inside a precluster.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pad {
    pub id: PadId,
    pub geometry: PadGeometry,
    /// Integrated charge (ADC units). Zero for virtual pads.
    pub charge: f64,
    /// False for geometric placeholders with no electronics behind them.
    pub is_real: bool,
    pub is_saturated: bool,
    /// Hit that consumed this pad, if any.
    pub owner: Option<HitIndex>,
}

impl Pad {
    /// Creates a real, unsaturated, unowned pad.
    #[must_use]
    pub fn new(cathode: Cathode, geometry: PadGeometry, charge: f64) -> Self {
        Self {
            id: PadId::new(cathode, geometry.ix, geometry.iy),
            geometry,
            charge,
            is_real: true,
            is_saturated: false,
            owner: None,
        }
    }

    /// Creates a zero-charge placeholder covering `geometry` on `cathode`.
    #[must_use]
    pub fn virtual_mirror(cathode: Cathode, geometry: PadGeometry) -> Self {
        Self {
            id: PadId::mirror(cathode, geometry.ix, geometry.iy),
            is_real: false,
            ..Self::new(cathode, geometry, 0.0)
        }
    }

    #[inline]
    #[must_use]
    pub fn cathode(&self) -> Cathode {
        self.id.cathode
    }

    #[inline]
    #[must_use]
    pub fn rect(&self) -> Rect {
        self.geometry.rect()
    }

    #[inline]
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.owner.is_some()
    }
}

/// A raw pad reading before geometry lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Digit {
    pub cathode: Cathode,
    pub ix: i32,
    pub iy: i32,
    pub charge: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_saturated: bool,
}

impl Digit {
    #[must_use]
    pub fn new(cathode: Cathode, ix: i32, iy: i32, charge: f64) -> Self {
        Self {
            cathode,
            ix,
            iy,
            charge,
            is_saturated: false,
        }
    }
}
