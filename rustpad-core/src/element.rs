//! Detection elements: one sensor with its two cathode segmentations.

use crate::pad::{Cathode, Rect};
use crate::segmentation::Segmentation;

/// Read-only geometry context of one sensor.
///
/// Built once at initialization and passed by reference into every stage.
#[derive(Debug, Clone)]
pub struct DetectionElement<S> {
    id: u32,
    planes: [S; 2],
}

impl<S: Segmentation> DetectionElement<S> {
    /// Creates an element from its bending and non-bending segmentations.
    pub fn new(id: u32, bending: S, non_bending: S) -> Self {
        Self {
            id,
            planes: [bending, non_bending],
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Segmentation of one cathode.
    #[inline]
    pub fn segmentation(&self, cathode: Cathode) -> &S {
        &self.planes[cathode.index()]
    }

    /// Extent of one cathode.
    pub fn area_of(&self, cathode: Cathode) -> Rect {
        self.segmentation(cathode).area()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::{Zone, ZonedSegmentation};

    #[test]
    fn test_element_planes() {
        let bending = ZonedSegmentation::uniform(2.0, 2.0, 0.25, 0.5).unwrap();
        let non_bending = ZonedSegmentation::new(
            -2.0,
            2.0,
            vec![Zone::new(-2.0, 0.0, 0.125, 0.5), Zone::new(0.0, 2.0, 0.5, 0.5)],
        )
        .unwrap();
        let de = DetectionElement::new(501, bending, non_bending);

        assert_eq!(de.id(), 501);
        assert_eq!(de.segmentation(Cathode::NonBending).zone_count(), 2);
        assert_eq!(
            de.segmentation(Cathode::NonBending).minimum_pad_half_size(),
            (0.125, 0.5)
        );
        assert_eq!(de.area_of(Cathode::Bending), Rect::new(-2.0, -2.0, 2.0, 2.0));
    }
}
