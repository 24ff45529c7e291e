//! Utilities for numerics.

use std::cmp::Ordering;

/// An `f32` that implements [`Ord`] according to the IEEE 754 totalOrder predicate.
///
/// Used as a sort key for detection confidences, which are not guaranteed to be free of NaNs.
#[derive(Debug, Clone, Copy)]
pub struct TotalF32(pub f32);

impl PartialEq for TotalF32 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF32 {}

impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Reverse;

    use super::*;

    #[test]
    fn sorts_descending_with_nan() {
        let mut v = vec![0.3, f32::NAN, 0.9, -1.0, 0.5];
        v.sort_by_key(|&f| Reverse(TotalF32(f)));
        assert!(v[0].is_nan());
        assert_eq!(&v[1..], &[0.9, 0.5, 0.3, -1.0]);
    }

    #[test]
    fn negative_zero_orders_below_zero() {
        assert!(TotalF32(-0.0) < TotalF32(0.0));
        assert_eq!(TotalF32(1.5), TotalF32(1.5));
    }
}
