//! Axis-aligned rectangles.

/// An axis-aligned rectangle, stored as top-left corner and size.
///
/// Depending on context, coordinates are either normalized (`0.0..=1.0`, relative to the longer
/// side of the detector input) or in frame pixels.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not produced by
/// anything in this crate after frame clamping, but decoded rectangles are not validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl Rect {
    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            w: width,
            h: height,
        }
    }

    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self::from_top_left(
            x_center - width / 2.0,
            y_center - height / 2.0,
            width,
            height,
        )
    }

    /// Creates a rectangle spanning the corners `(x0, y0)` and `(x1, y1)`.
    ///
    /// `x1` and `y1` must not be smaller than `x0` and `y0`, respectively.
    #[inline]
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        debug_assert!(x1 >= x0 && y1 >= y0, "inverted corners");
        Self::from_top_left(x0, y0, x1 - x0, y1 - y0)
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.w
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.h
    }

    #[inline]
    pub fn x_center(&self) -> f32 {
        self.x + self.w / 2.0
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.y + self.h / 2.0
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x_center(), self.y_center())
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Multiplies all coordinates and dimensions with `factor`.
    #[must_use]
    pub fn scale(&self, factor: f32) -> Self {
        Self::from_top_left(
            self.x * factor,
            self.y * factor,
            self.w * factor,
            self.h * factor,
        )
    }

    /// Clamps both corners of `self` into `0.0..=max_x` and `0.0..=max_y`.
    ///
    /// The result may have zero width or height, but never negative ones.
    #[must_use]
    pub fn clamp_to(&self, max_x: f32, max_y: f32) -> Self {
        let clamp = |v: f32, max: f32| v.min(max).max(0.0);
        let x0 = clamp(self.x, max_x);
        let x1 = clamp(self.x + self.w, max_x);
        let y0 = clamp(self.y, max_y);
        let y1 = clamp(self.y + self.h, max_y);
        Self::from_corners(x0, y0, x1.max(x0), y1.max(y0))
    }

    /// Computes the area of the intersection of `self` and `other`.
    ///
    /// Returns 0.0 if the rectangles don't overlap.
    pub fn intersection_area(&self, other: &Self) -> f32 {
        let w = overlap(self.x_center(), self.w, other.x_center(), other.w);
        let h = overlap(self.y_center(), self.h, other.y_center(), other.h);
        if w < 0.0 || h < 0.0 {
            return 0.0;
        }
        w * h
    }

    fn union_area(&self, other: &Self) -> f32 {
        self.area() + other.area() - self.intersection_area(other)
    }

    /// Computes the Intersection over Union (IOU) of `self` and `other`.
    ///
    /// Identical rectangles with a positive area have an IOU of exactly 1.0. If both rectangles
    /// have zero area, the union is empty and 0.0 is returned. Detections with zero area should not
    /// be fed into suppression in the first place.
    pub fn iou(&self, other: &Self) -> f32 {
        // The overlap is computed from re-derived interval edges, which loses a few ULPs.
        if self == other && self.area() > 0.0 {
            return 1.0;
        }
        let union = self.union_area(other);
        if union == 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / union
    }
}

/// Computes the length of the overlap of two 1-D intervals given as center and extent.
///
/// The result is negative if the intervals are disjoint.
fn overlap(c1: f32, w1: f32, c2: f32, w2: f32) -> f32 {
    let right = (c1 + w1 / 2.0).min(c2 + w2 / 2.0);
    let left = (c1 - w1 / 2.0).max(c2 - w2 / 2.0);
    right - left
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn overlap_of_intervals() {
        assert_eq!(overlap(0.0, 2.0, 1.0, 2.0), 1.0);
        assert_eq!(overlap(0.0, 2.0, 0.0, 1.0), 1.0);
        assert_eq!(overlap(0.0, 2.0, 5.0, 2.0), -3.0);
    }

    #[test]
    fn iou_identical() {
        let r = Rect::from_top_left(3.0, 4.0, 10.0, 20.0);
        assert_eq!(r.iou(&r), 1.0);
    }

    #[test]
    fn iou_disjoint() {
        let a = Rect::from_top_left(0.0, 0.0, 1.0, 1.0);
        let b = Rect::from_top_left(2.0, 0.0, 1.0, 1.0);
        assert_eq!(a.iou(&b), 0.0);

        // Touching edges.
        let c = Rect::from_top_left(1.0, 0.0, 1.0, 1.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn iou_half_shift() {
        let a = Rect::from_top_left(0.0, 0.0, 2.0, 2.0);
        let b = Rect::from_top_left(1.0, 0.0, 2.0, 2.0);
        // intersection 2, union 6
        assert_relative_eq!(a.iou(&b), 1.0 / 3.0);
        assert_relative_eq!(b.iou(&a), 1.0 / 3.0);
    }

    #[test]
    fn iou_contained() {
        let outer = Rect::from_center(0.0, 0.0, 4.0, 4.0);
        let inner = Rect::from_center(0.0, 0.0, 2.0, 2.0);
        assert_relative_eq!(outer.iou(&inner), 0.25);
    }

    #[test]
    fn iou_degenerate() {
        let a = Rect::from_top_left(1.0, 1.0, 0.0, 0.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn iou_symmetric() {
        let mut rng = fastrand::Rng::with_seed(0x5eed_0001);
        for _ in 0..1000 {
            let a = Rect::from_top_left(rng.f32(), rng.f32(), rng.f32() + 0.01, rng.f32() + 0.01);
            let b = Rect::from_top_left(rng.f32(), rng.f32(), rng.f32() + 0.01, rng.f32() + 0.01);
            assert_eq!(a.iou(&b), b.iou(&a), "{a:?} {b:?}");
            assert_eq!(a.iou(&a), 1.0, "{a:?}");
            assert_eq!(a.iou(&a.clone()), 1.0, "{a:?}");
        }
    }

    #[test]
    fn iou_self_is_exactly_one() {
        // These lose precision when the edges are rebuilt from the center.
        let a = Rect::from_top_left(0.1, 0.7, 0.3, 0.9);
        assert_eq!(a.iou(&a), 1.0);
        let b = Rect::from_center(312.7, 91.3, 17.1, 0.33);
        assert_eq!(b.iou(&b), 1.0);
        // Nearly identical rectangles still go through the regular computation.
        let shifted = Rect::from_top_left(0.1 + 1e-3, 0.7, 0.3, 0.9);
        assert!(a.iou(&shifted) < 1.0);
        assert!(a.iou(&shifted) > 0.99);
    }

    #[test]
    fn clamp() {
        let r = Rect::from_top_left(-10.0, 5.0, 30.0, 200.0).clamp_to(15.0, 100.0);
        assert_eq!(r, Rect::from_top_left(0.0, 5.0, 15.0, 95.0));

        let outside = Rect::from_top_left(50.0, 50.0, 10.0, 10.0).clamp_to(20.0, 20.0);
        assert_eq!(outside.x(), 20.0);
        assert_eq!(outside.width(), 0.0);
        assert_eq!(outside.height(), 0.0);
    }
}
