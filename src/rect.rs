//! Bounding box geometry shared by the detector, tracker and annotation stage.

use ndarray::Array2;

/// Bounding box stored as top-left corner plus size.
///
/// Supports the formats the pipeline moves between:
/// - TLBR: x1, y1, x2, y2 (what detectors emit and what gets drawn)
/// - TLWH: x, y, width, height (storage)
/// - XYAH: center x, center y, aspect ratio (w/h), height (Kalman measurement space)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Integer pixel region of a frame, guaranteed non-empty and inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from corner coordinates (x1, y1, x2, y2).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Create a Rect from XYAH format (center x, center y, aspect ratio, height).
    #[inline]
    pub fn from_xyah(cx: f32, cy: f32, aspect_ratio: f32, height: f32) -> Self {
        let width = aspect_ratio * height;
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    #[inline]
    pub fn to_xyah(&self) -> [f32; 4] {
        let (cx, cy) = self.center();
        let aspect_ratio = if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        };
        [cx, cy, aspect_ratio, self.height]
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over Union with another box. Zero when the union is empty.
    pub fn iou(&self, other: &Rect) -> f32 {
        let [ax1, ay1, ax2, ay2] = self.to_tlbr();
        let [bx1, by1, bx2, by2] = other.to_tlbr();

        let inter_width = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let inter_height = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let inter_area = inter_width * inter_height;
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Clamp the box to a `frame_width` x `frame_height` frame and snap it to whole pixels.
    ///
    /// Returns `None` when nothing of the box survives: inverted, zero-area, non-finite,
    /// or entirely outside the frame.
    pub fn crop_region(&self, frame_width: u32, frame_height: u32) -> Option<CropRegion> {
        let [x1, y1, x2, y2] = self.to_tlbr();
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }

        let clamp = |v: f32, max: u32| v.max(0.0).min(max as f32) as u32;
        let left = clamp(x1.floor(), frame_width);
        let top = clamp(y1.floor(), frame_height);
        let right = clamp(x2.floor(), frame_width);
        let bottom = clamp(y2.floor(), frame_height);

        if right <= left || bottom <= top {
            return None;
        }

        Some(CropRegion {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        })
    }
}

/// IoU matrix of shape (M, N) between `boxes_a` (M) and `boxes_b` (N).
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
    Array2::from_shape_fn((boxes_a.len(), boxes_b.len()), |(i, j)| {
        boxes_a[i].iou(&boxes_b[j])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_conversions() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(rect.to_tlbr(), [10.0, 20.0, 40.0, 60.0]);

        let xyah = rect.to_xyah();
        assert_eq!(xyah[0], 25.0);
        assert_eq!(xyah[1], 40.0);
        assert!((xyah[2] - 0.75).abs() < 1e-6);
        assert_eq!(xyah[3], 40.0);
    }

    #[test]
    fn test_from_xyah_inverts_to_xyah() {
        let rect = Rect::from_xyah(25.0, 40.0, 0.75, 40.0);
        assert!((rect.x - 10.0).abs() < 1e-6);
        assert!((rect.y - 20.0).abs() < 1e-6);
        assert!((rect.width - 30.0).abs() < 1e-6);
        assert!((rect.height - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-6);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&Rect::new(20.0, 20.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_crop_region_clamps_to_frame() {
        let rect = Rect::from_tlbr(-5.0, 10.5, 50.0, 500.0);
        let region = rect.crop_region(40, 100).unwrap();
        assert_eq!(
            region,
            CropRegion {
                x: 0,
                y: 10,
                width: 40,
                height: 90
            }
        );
    }

    #[test]
    fn test_crop_region_degenerate() {
        // inverted
        assert!(Rect::from_tlbr(30.0, 30.0, 10.0, 10.0).crop_region(100, 100).is_none());
        // zero area
        assert!(Rect::from_tlbr(10.0, 10.0, 10.0, 40.0).crop_region(100, 100).is_none());
        // fully outside
        assert!(Rect::from_tlbr(120.0, 10.0, 150.0, 40.0).crop_region(100, 100).is_none());
        assert!(Rect::from_tlbr(-50.0, -50.0, -1.0, -1.0).crop_region(100, 100).is_none());
        assert!(Rect::new(f32::NAN, 0.0, 10.0, 10.0).crop_region(100, 100).is_none());
    }
}
