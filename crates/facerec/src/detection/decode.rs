//! Candidate extraction and anchor-relative decoding of raw detector outputs.

use std::cmp::Reverse;

use anyhow::ensure;
use itertools::Itertools;

use crate::{num::TotalF32, rect::Rect};

use super::{
    ssd::{Anchor, Anchors},
    Landmarks, LANDMARK_COUNT,
};

/// Number of class scores per anchor (background, face).
pub const SCORE_STRIDE: usize = 2;
/// Number of box regression values per anchor (`cx`, `cy`, `w`, `h`).
pub const BOX_STRIDE: usize = 4;
/// Number of landmark regression values per anchor (`x`, `y` for each of the 5 landmarks).
pub const LANDMARK_STRIDE: usize = 2 * LANDMARK_COUNT;

/// Variance applied to center offsets (boxes and landmarks).
const CENTER_VARIANCE: f32 = 0.1;
/// Variance applied to the log-space size regression.
const SIZE_VARIANCE: f32 = 0.2;

/// Typed, bounds-checked view of the three raw output buffers of the detector.
#[derive(Clone, Copy)]
pub struct Outputs<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    landmarks: &'a [f32],
    anchor_count: usize,
}

impl<'a> Outputs<'a> {
    /// Wraps the detector's output buffers.
    ///
    /// `scores`, `boxes` and `landmarks` are the dense `[N][2]`, `[N][4]` and `[N][10]` outputs
    /// for `anchor_count = N` anchors. An error is returned if any buffer has the wrong length.
    pub fn new(
        scores: &'a [f32],
        boxes: &'a [f32],
        landmarks: &'a [f32],
        anchor_count: usize,
    ) -> anyhow::Result<Self> {
        for (name, buf, stride) in [
            ("score", scores, SCORE_STRIDE),
            ("box", boxes, BOX_STRIDE),
            ("landmark", landmarks, LANDMARK_STRIDE),
        ] {
            ensure!(
                buf.len() == anchor_count * stride,
                "{name} output has {} elements, expected {} ({anchor_count} anchors x {stride})",
                buf.len(),
                anchor_count * stride,
            );
        }

        Ok(Self {
            scores,
            boxes,
            landmarks,
            anchor_count,
        })
    }

    #[inline]
    pub fn anchor_count(&self) -> usize {
        self.anchor_count
    }

    /// Returns the face (foreground) score of the anchor at `index`.
    #[inline]
    pub fn score(&self, index: usize) -> f32 {
        self.scores[index * SCORE_STRIDE + 1]
    }

    /// Returns the box regression values of the anchor at `index`.
    #[inline]
    pub fn box_deltas(&self, index: usize) -> [f32; BOX_STRIDE] {
        stride_at(self.boxes, index)
    }

    /// Returns the landmark regression values of the anchor at `index`.
    #[inline]
    pub fn landmark_deltas(&self, index: usize) -> [f32; LANDMARK_STRIDE] {
        stride_at(self.landmarks, index)
    }
}

fn stride_at<const N: usize>(buf: &[f32], index: usize) -> [f32; N] {
    let mut out = [0.0; N];
    out.copy_from_slice(&buf[index * N..][..N]);
    out
}

/// A detector output that passed the confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Index into the anchor table (and the raw output buffers).
    pub anchor_index: usize,
    /// Position in the filtered delta arrays of [`Candidates`], which stays stable when the
    /// candidates are reordered.
    pub presort_index: usize,
    pub confidence: f32,
}

/// The candidates of a single frame, along with their gathered regression values.
#[derive(Debug, Default)]
pub struct Candidates {
    list: Vec<Candidate>,
    boxes: Vec<[f32; BOX_STRIDE]>,
    landmarks: Vec<[f32; LANDMARK_STRIDE]>,
}

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents of `self` with all anchors whose face score is strictly greater than
    /// `threshold`.
    ///
    /// Candidates are stored in anchor order. `threshold` is not validated.
    pub fn filter(&mut self, outputs: &Outputs<'_>, threshold: f32) {
        self.clear();

        for anchor_index in 0..outputs.anchor_count() {
            let confidence = outputs.score(anchor_index);
            if confidence > threshold {
                self.list.push(Candidate {
                    anchor_index,
                    presort_index: self.list.len(),
                    confidence,
                });
            }
        }

        for cand in &self.list {
            self.boxes.push(outputs.box_deltas(cand.anchor_index));
            self.landmarks.push(outputs.landmark_deltas(cand.anchor_index));
        }

        log::trace!(
            "{} of {} anchors above threshold {threshold}",
            self.list.len(),
            outputs.anchor_count()
        );
    }

    /// Sorts the candidates by descending confidence.
    ///
    /// The sort is stable, so candidates of equal confidence stay in anchor order.
    pub fn sort_by_confidence(&mut self) {
        self.list.sort_by_key(|cand| Reverse(TotalF32(cand.confidence)));
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.boxes.clear();
        self.landmarks.clear();
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.list
    }

    /// Decodes the normalized bounding box of `cand`.
    pub fn decode_box(&self, cand: &Candidate, anchors: &Anchors) -> Rect {
        decode_box(&anchors[cand.anchor_index], &self.boxes[cand.presort_index])
    }

    /// Decodes the normalized landmarks of `cand`.
    pub fn decode_landmarks(&self, cand: &Candidate, anchors: &Anchors) -> Landmarks {
        decode_landmarks(
            &anchors[cand.anchor_index],
            &self.landmarks[cand.presort_index],
        )
    }
}

/// Decodes a box regression relative to `anchor`.
pub fn decode_box(anchor: &Anchor, deltas: &[f32; BOX_STRIDE]) -> Rect {
    let [dx, dy, dw, dh] = *deltas;
    let xc = anchor.x_center() + dx * CENTER_VARIANCE * anchor.width();
    let yc = anchor.y_center() + dy * CENTER_VARIANCE * anchor.height();
    let w = anchor.width() * (dw * SIZE_VARIANCE).exp();
    let h = anchor.height() * (dh * SIZE_VARIANCE).exp();
    Rect::from_center(xc, yc, w, h)
}

/// Decodes the 5 landmark regressions relative to `anchor`.
pub fn decode_landmarks(anchor: &Anchor, deltas: &[f32; LANDMARK_STRIDE]) -> Landmarks {
    let mut points = [(0.0, 0.0); LANDMARK_COUNT];
    for (point, delta) in points.iter_mut().zip_eq(deltas.chunks_exact(2)) {
        *point = (
            anchor.x_center() + delta[0] * CENTER_VARIANCE * anchor.width(),
            anchor.y_center() + delta[1] * CENTER_VARIANCE * anchor.height(),
        );
    }
    Landmarks::new(points)
}
