use serde::{Deserialize, Serialize};

/// Raw detector output in image pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Snap to integer pixel edges and clamp into a `width` x `height` image.
    ///
    /// Returns `None` when nothing of the box remains inside the image.
    pub fn to_region(&self, width: u32, height: u32) -> Option<FaceRegion> {
        let left = self.x.floor().clamp(0.0, width as f32) as u32;
        let top = self.y.floor().clamp(0.0, height as f32) as u32;
        let right = (self.x + self.width).ceil().clamp(0.0, width as f32) as u32;
        let bottom = (self.y + self.height).ceil().clamp(0.0, height as f32) as u32;

        let region = FaceRegion { top, right, bottom, left };
        (!region.is_empty()).then_some(region)
    }
}

/// A detected face, as `(top, right, bottom, left)` pixel edges.
///
/// `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Map a region found on a `from`-sized frame onto a `to`-sized frame.
    ///
    /// Each axis uses the ratio of the actual image sizes, so rounding done by
    /// the downscale is undone exactly. The result is clamped to `to`.
    pub fn rescale(&self, from: (u32, u32), to: (u32, u32)) -> FaceRegion {
        let ratio = |to: u32, from: u32| if from > 0 { to as f32 / from as f32 } else { 1.0 };
        let (sx, sy) = (ratio(to.0, from.0), ratio(to.1, from.1));
        let x = |v: u32| ((v as f32 * sx).round() as u32).min(to.0);
        let y = |v: u32| ((v as f32 * sy).round() as u32).min(to.1);
        FaceRegion {
            top: y(self.top),
            right: x(self.right),
            bottom: y(self.bottom),
            left: x(self.left),
        }
    }
}

/// Fixed-length appearance vector for one face (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another descriptor. Lower = more similar.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Descriptor::new(vec![0.3, -0.2, 0.9]);
        assert_eq!(a.distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_region_dimensions() {
        let r = FaceRegion { top: 10, right: 50, bottom: 70, left: 20 };
        assert_eq!(r.width(), 30);
        assert_eq!(r.height(), 60);
        assert!(!r.is_empty());
    }

    #[test]
    fn test_region_rescale() {
        let r = FaceRegion { top: 10, right: 40, bottom: 30, left: 5 };
        let up = r.rescale((160, 120), (640, 480));
        assert_eq!(up, FaceRegion { top: 40, right: 160, bottom: 120, left: 20 });
    }

    #[test]
    fn test_region_rescale_same_size_is_identity() {
        let r = FaceRegion { top: 1, right: 9, bottom: 7, left: 3 };
        assert_eq!(r.rescale((10, 10), (10, 10)), r);
    }

    #[test]
    fn test_region_rescale_odd_size_reaches_far_edge() {
        // 5x5 downscaled by 0.5 rounds to 3x3; 1/0.5 would overshoot to 6.
        let r = FaceRegion { top: 0, right: 3, bottom: 3, left: 0 };
        assert_eq!(
            r.rescale((3, 3), (5, 5)),
            FaceRegion { top: 0, right: 5, bottom: 5, left: 0 }
        );
    }

    #[test]
    fn test_bbox_to_region_clamps() {
        let b = BoundingBox { x: -5.2, y: 10.4, width: 30.0, height: 500.0, confidence: 0.9 };
        let r = b.to_region(100, 100).unwrap();
        assert_eq!(r, FaceRegion { top: 10, right: 25, bottom: 100, left: 0 });
    }

    #[test]
    fn test_bbox_outside_image_is_dropped() {
        let b = BoundingBox { x: 200.0, y: 200.0, width: 20.0, height: 20.0, confidence: 0.9 };
        assert!(b.to_region(100, 100).is_none());
    }
}
