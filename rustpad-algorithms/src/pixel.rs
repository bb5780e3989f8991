//! Pixelization: resampling pad charges onto a uniform virtual grid.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::module_name_repetitions
)]

use std::ops::Range;

use rustpad_core::{
    Cathode, DeclusterConfig, DetectionElement, Error, Rect, Result, Segmentation,
};

use crate::precluster::Precluster;

/// Coverage mask of a pixel seen by both cathodes.
pub const DUAL_CATHODE: u8 = 0b11;

const BIN_EPSILON: f64 = 1e-9;

/// Merges the charges two cathodes project onto one pixel.
pub trait ChargeCombiner: Send + Sync {
    fn combine(&self, a: f64, b: f64) -> f64;
}

/// Smaller charge plus a bounded bonus proportional to the larger one.
///
/// Agreeing cathodes are rewarded, a single strong cathode is not.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgreementBonus {
    pub fraction: f64,
}

impl AgreementBonus {
    #[must_use]
    pub fn new(fraction: f64) -> Self {
        Self { fraction }
    }
}

impl Default for AgreementBonus {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl ChargeCombiner for AgreementBonus {
    fn combine(&self, a: f64, b: f64) -> f64 {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        lo + (self.fraction * hi).min(lo)
    }
}

/// One retained bin of the pixel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel {
    /// Grid column.
    pub ix: i32,
    /// Grid row.
    pub iy: i32,
    pub x: f64,
    pub y: f64,
    pub charge: f64,
    /// Cathodes covering the pixel, one bit per [`Cathode::mask`].
    pub mask: u8,
}

/// Pixels retained for one precluster, in row-major scan order.
#[derive(Debug, Clone, Default)]
pub struct PixelMap {
    origin: (f64, f64),
    half_size: (f64, f64),
    nx: usize,
    ny: usize,
    pixels: Vec<Pixel>,
    grid: Vec<Option<usize>>,
}

impl PixelMap {
    fn with_grid(origin: (f64, f64), half_size: (f64, f64), nx: usize, ny: usize) -> Self {
        Self {
            origin,
            half_size,
            nx,
            ny,
            pixels: Vec::new(),
            grid: vec![None; nx * ny],
        }
    }

    fn push(&mut self, pixel: Pixel) {
        let cell = pixel.iy as usize * self.nx + pixel.ix as usize;
        self.grid[cell] = Some(self.pixels.len());
        self.pixels.push(pixel);
    }

    /// Builds a fully populated map from row-major charges, origin at `(0, 0)`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedGeometry`] if `charges` does not hold
    /// `nx * ny` values.
    pub fn from_grid(nx: usize, ny: usize, half_size: (f64, f64), charges: &[f64]) -> Result<Self> {
        if charges.len() != nx * ny {
            return Err(Error::MalformedGeometry(format!(
                "{} charges for a {nx}x{ny} grid",
                charges.len()
            )));
        }
        let mut map = Self::with_grid((0.0, 0.0), half_size, nx, ny);
        for (cell, &charge) in charges.iter().enumerate() {
            let (ix, iy) = (cell % nx, cell / nx);
            map.push(Pixel {
                ix: ix as i32,
                iy: iy as i32,
                x: (2 * ix + 1) as f64 * half_size.0,
                y: (2 * iy + 1) as f64 * half_size.1,
                charge,
                mask: DUAL_CATHODE,
            });
        }
        Ok(map)
    }

    #[must_use]
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[must_use]
    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    /// Pixel half-dimensions.
    #[must_use]
    pub fn half_size(&self) -> (f64, f64) {
        self.half_size
    }

    /// Grid dimensions (columns, rows).
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    /// Index of the retained pixel in grid cell `(ix, iy)`.
    #[must_use]
    pub fn index_at(&self, ix: i32, iy: i32) -> Option<usize> {
        if ix < 0 || iy < 0 || ix as usize >= self.nx || iy as usize >= self.ny {
            return None;
        }
        self.grid[iy as usize * self.nx + ix as usize]
    }

    /// Retained 8-connected neighbours of the pixel at `index`.
    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let Pixel { ix, iy, .. } = self.pixels[index];
        (-1..=1)
            .flat_map(|dy| (-1..=1).map(move |dx| (dx, dy)))
            .filter(|&(dx, dy)| dx != 0 || dy != 0)
            .filter_map(move |(dx, dy)| self.index_at(ix + dx, iy + dy))
    }

    /// Rectangle covered by the pixel at `index`.
    #[must_use]
    pub fn rect(&self, index: usize) -> Rect {
        let p = &self.pixels[index];
        Rect::from_center(p.x, p.y, self.half_size.0, self.half_size.1)
    }
}

/// Bins of a grid axis intersecting `[lo, hi]`, touching bins excluded.
fn bin_span(lo: f64, hi: f64, origin: f64, pitch: f64, count: usize) -> Range<usize> {
    let first = ((lo - origin) / pitch + BIN_EPSILON).floor().max(0.0) as usize;
    let last = (((hi - origin) / pitch - BIN_EPSILON).ceil().max(0.0) as usize).min(count);
    first..last.max(first)
}

/// Snaps `value` down onto the lattice `origin + k * pitch`.
fn snap_down(value: f64, origin: f64, pitch: f64) -> f64 {
    origin + ((value - origin) / pitch + BIN_EPSILON).floor() * pitch
}

/// Projects a precluster's pads onto a uniform pixel grid.
pub struct Pixelizer<'a, S, C = AgreementBonus> {
    element: &'a DetectionElement<S>,
    config: &'a DeclusterConfig,
    combiner: C,
}

impl<'a, S: Segmentation> Pixelizer<'a, S> {
    /// Creates a pixelizer with the agreement-bonus combiner.
    #[must_use]
    pub fn new(element: &'a DetectionElement<S>, config: &'a DeclusterConfig) -> Self {
        Self {
            element,
            config,
            combiner: AgreementBonus::new(config.agreement_bonus),
        }
    }
}

impl<'a, S: Segmentation, C: ChargeCombiner> Pixelizer<'a, S, C> {
    /// Replaces the cathode combiner.
    #[must_use]
    pub fn with_combiner<D: ChargeCombiner>(self, combiner: D) -> Pixelizer<'a, S, D> {
        Pixelizer {
            element: self.element,
            config: self.config,
            combiner,
        }
    }

    /// Builds the pixel map of `precluster`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedGeometry`] if the grid would exceed
    /// `max_pixels` or its extent is not finite.
    pub fn pixelize(&self, precluster: &Precluster) -> Result<PixelMap> {
        let pads = precluster.pads();
        let Some(first) = pads.first() else {
            return Ok(PixelMap::default());
        };

        let (hx, hy) = pads.iter().fold((f64::MAX, f64::MAX), |(hx, hy), p| {
            (hx.min(p.geometry.dx), hy.min(p.geometry.dy))
        });
        let (px, py) = (2.0 * hx, 2.0 * hy);

        let Some(bounds) = Cathode::ALL
            .iter()
            .filter_map(|&c| precluster.area(c))
            .reduce(|a, b| a.union(&b))
        else {
            return Ok(PixelMap::default());
        };
        let anchor = self.element.area_of(first.cathode());
        let x0 = snap_down(bounds.x_min, anchor.x_min, px);
        let y0 = snap_down(bounds.y_min, anchor.y_min, py);
        let nx = ((bounds.x_max - x0) / px - BIN_EPSILON).ceil();
        let ny = ((bounds.y_max - y0) / py - BIN_EPSILON).ceil();
        if !(nx.is_finite() && ny.is_finite() && nx >= 1.0 && ny >= 1.0) {
            return Err(Error::MalformedGeometry(format!(
                "pixel grid extent {bounds:?} with pitch ({px}, {py})"
            )));
        }
        let (nx, ny) = (nx as usize, ny as usize);
        if nx.saturating_mul(ny) > self.config.max_pixels {
            return Err(Error::MalformedGeometry(format!(
                "pixel grid {nx}x{ny} exceeds {} pixels",
                self.config.max_pixels
            )));
        }

        let cells = nx * ny;
        let mut charge = [vec![0.0; cells], vec![0.0; cells]];
        let mut real = vec![0u8; cells];
        let mut covered = vec![0u8; cells];

        for pad in pads {
            let rect = pad.rect();
            let c = pad.cathode();
            let pad_area = rect.area();
            for iy in bin_span(rect.y_min, rect.y_max, y0, py, ny) {
                for ix in bin_span(rect.x_min, rect.x_max, x0, px, nx) {
                    let bin = Rect::new(
                        x0 + ix as f64 * px,
                        y0 + iy as f64 * py,
                        x0 + (ix + 1) as f64 * px,
                        y0 + (iy + 1) as f64 * py,
                    );
                    let Some(overlap) = bin.intersection(&rect) else {
                        continue;
                    };
                    let cell = iy * nx + ix;
                    covered[cell] |= c.mask();
                    if pad.is_real && pad_area > 0.0 {
                        charge[c.index()][cell] += pad.charge * overlap.area() / pad_area;
                        real[cell] |= c.mask();
                    }
                }
            }
        }

        let two_cathode = precluster.is_two_cathode();
        let mut map = PixelMap::with_grid((x0, y0), (hx, hy), nx, ny);
        for iy in 0..ny {
            for ix in 0..nx {
                let cell = iy * nx + ix;
                let (a, b) = (charge[0][cell], charge[1][cell]);
                let value = match real[cell] {
                    DUAL_CATHODE => self.combiner.combine(a, b),
                    0 => 0.0,
                    _ => a + b,
                };
                if value < self.config.pixel_noise_floor
                    || (two_cathode && covered[cell] != DUAL_CATHODE)
                {
                    continue;
                }
                map.push(Pixel {
                    ix: ix as i32,
                    iy: iy as i32,
                    x: x0 + (2 * ix + 1) as f64 * hx,
                    y: y0 + (2 * iy + 1) as f64 * hy,
                    charge: value,
                    mask: covered[cell],
                });
            }
        }
        Ok(map)
    }
}
