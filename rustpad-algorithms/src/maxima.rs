//! Local-maxima search over a pixel map.
//!
//! Plateaus of equal charge are flooded iteratively with an explicit stack, so
//! large flat regions neither recurse nor revisit pixels.

use std::cmp::Ordering;

use log::trace;
use rustpad_core::{DeclusterConfig, Error, Result};

use crate::pixel::PixelMap;

/// A candidate hit seed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalMaximum {
    /// Index into [`PixelMap::pixels`] of the plateau's first pixel in scan order.
    pub pixel: usize,
    pub x: f64,
    pub y: f64,
    pub charge: f64,
    /// Number of equal-charge pixels the maximum stands for.
    pub plateau_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unvisited,
    NotMaximum,
    Done,
}

/// Finds 8-connected local maxima with plateau resolution.
#[derive(Debug, Clone, Copy)]
pub struct LocalMaximaFinder {
    max_plateau_pixels: usize,
}

impl LocalMaximaFinder {
    #[must_use]
    pub fn new(max_plateau_pixels: usize) -> Self {
        Self { max_plateau_pixels }
    }

    #[must_use]
    pub fn from_config(config: &DeclusterConfig) -> Self {
        Self::new(config.max_plateau_pixels)
    }

    /// Returns the maxima of `map`, strongest first, ties in scan order.
    ///
    /// # Errors
    /// Returns [`Error::RecursionBudgetExceeded`] if one plateau holds more
    /// than `max_plateau_pixels` pixels.
    pub fn find(&self, map: &PixelMap) -> Result<Vec<LocalMaximum>> {
        let pixels = map.pixels();
        let mut state = vec![State::Unvisited; pixels.len()];
        let mut flooded = vec![false; pixels.len()];
        let mut stack = Vec::new();
        let mut plateau = Vec::new();
        let mut maxima = Vec::new();

        for start in 0..pixels.len() {
            if state[start] != State::Unvisited {
                continue;
            }
            let level = pixels[start].charge;
            let mut is_maximum = true;
            plateau.clear();
            stack.push(start);
            flooded[start] = true;

            while let Some(i) = stack.pop() {
                plateau.push(i);
                if plateau.len() > self.max_plateau_pixels {
                    return Err(Error::RecursionBudgetExceeded {
                        visited: plateau.len(),
                        budget: self.max_plateau_pixels,
                    });
                }
                for j in map.neighbors(i) {
                    match pixels[j].charge.total_cmp(&level) {
                        Ordering::Equal => {
                            if !flooded[j] {
                                flooded[j] = true;
                                stack.push(j);
                            }
                        }
                        Ordering::Greater => is_maximum = false,
                        Ordering::Less => {
                            if state[j] == State::Unvisited {
                                state[j] = State::NotMaximum;
                            }
                        }
                    }
                }
            }

            for &i in &plateau {
                state[i] = State::Done;
            }
            if is_maximum {
                let first = plateau.iter().copied().min().unwrap_or(start);
                let p = pixels[first];
                trace!(
                    "maximum at ({:.4}, {:.4}) charge {:.2}, plateau {}",
                    p.x,
                    p.y,
                    p.charge,
                    plateau.len()
                );
                maxima.push(LocalMaximum {
                    pixel: first,
                    x: p.x,
                    y: p.y,
                    charge: p.charge,
                    plateau_size: plateau.len(),
                });
            }
        }

        maxima.sort_by(|a, b| {
            b.charge
                .total_cmp(&a.charge)
                .then_with(|| a.pixel.cmp(&b.pixel))
        });
        Ok(maxima)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(nx: usize, ny: usize, charges: &[f64]) -> Result<Vec<LocalMaximum>> {
        let map = PixelMap::from_grid(nx, ny, (0.5, 0.5), charges).unwrap();
        LocalMaximaFinder::new(1 << 16).find(&map)
    }

    #[test]
    fn test_single_peak() {
        let maxima = find(3, 3, &[1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].pixel, 4);
        assert_eq!(maxima[0].plateau_size, 1);
        assert!((maxima[0].x - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_two_peaks_sorted_by_charge() {
        let charges = [4.0, 1.0, 1.0, 1.0, 9.0];
        let maxima = find(5, 1, &charges).unwrap();
        let seeds: Vec<usize> = maxima.iter().map(|m| m.pixel).collect();
        assert_eq!(seeds, vec![4, 0]);
    }

    #[test]
    fn test_equal_peaks_in_scan_order() {
        let charges = [7.0, 1.0, 1.0, 7.0];
        let maxima = find(4, 1, &charges).unwrap();
        let seeds: Vec<usize> = maxima.iter().map(|m| m.pixel).collect();
        assert_eq!(seeds, vec![0, 3]);
    }

    #[test]
    fn test_uniform_plateau_is_one_maximum() {
        let charges = vec![3.0; 100];
        let maxima = find(10, 10, &charges).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].pixel, 0);
        assert_eq!(maxima[0].plateau_size, 100);
    }

    #[test]
    fn test_plateau_next_to_higher_pixel() {
        let maxima = find(4, 1, &[2.0, 2.0, 2.0, 3.0]).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].pixel, 3);
    }

    #[test]
    fn test_diagonal_neighbors_count() {
        // The corners touch the center only diagonally.
        let maxima = find(2, 2, &[1.0, 0.5, 0.5, 2.0]).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].pixel, 3);
    }

    #[test]
    fn test_plateau_budget() {
        let map = PixelMap::from_grid(10, 10, (0.5, 0.5), &[1.0; 100]).unwrap();
        let result = LocalMaximaFinder::new(50).find(&map);
        assert!(matches!(
            result,
            Err(Error::RecursionBudgetExceeded { budget: 50, .. })
        ));
    }

    #[test]
    fn test_empty_map() {
        let maxima = LocalMaximaFinder::new(8).find(&PixelMap::default()).unwrap();
        assert!(maxima.is_empty());
    }
}
