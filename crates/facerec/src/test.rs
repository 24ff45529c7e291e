//! Shared test fixtures.

use crate::detection::{
    decode::{Outputs, BOX_STRIDE, LANDMARK_STRIDE, SCORE_STRIDE},
    ssd::{AnchorSet, Anchors},
};

/// Owned detector output buffers that tests can fill in anchor by anchor.
///
/// All anchors start out as confident background with zero regressions.
pub struct RawOutputs {
    anchor_count: usize,
    scores: Vec<f32>,
    boxes: Vec<f32>,
    landmarks: Vec<f32>,
}

impl RawOutputs {
    pub fn new(anchor_set: AnchorSet) -> Self {
        let anchor_count = anchor_set.anchor_count();
        let mut scores = vec![0.0; anchor_count * SCORE_STRIDE];
        for pair in scores.chunks_exact_mut(SCORE_STRIDE) {
            pair[0] = 1.0;
        }

        Self {
            anchor_count,
            scores,
            boxes: vec![0.0; anchor_count * BOX_STRIDE],
            landmarks: vec![0.0; anchor_count * LANDMARK_STRIDE],
        }
    }

    pub fn set_score(&mut self, index: usize, face: f32) {
        self.scores[index * SCORE_STRIDE] = 1.0 - face;
        self.scores[index * SCORE_STRIDE + 1] = face;
    }

    pub fn set_box(&mut self, index: usize, deltas: [f32; BOX_STRIDE]) {
        self.boxes[index * BOX_STRIDE..][..BOX_STRIDE].copy_from_slice(&deltas);
    }

    /// Sets the box regression of anchor `index` so that it decodes to the normalized box
    /// `(x_center, y_center, width, height)`.
    pub fn point_box_at(&mut self, index: usize, anchors: &Anchors, target: (f32, f32, f32, f32)) {
        let anchor = &anchors[index];
        let (xc, yc, w, h) = target;
        self.set_box(
            index,
            [
                (xc - anchor.x_center()) / (0.1 * anchor.width()),
                (yc - anchor.y_center()) / (0.1 * anchor.height()),
                (w / anchor.width()).ln() / 0.2,
                (h / anchor.height()).ln() / 0.2,
            ],
        );
    }

    /// Sets the landmark regression of anchor `index` so that it decodes to the normalized
    /// `points`.
    pub fn point_landmarks_at(&mut self, index: usize, anchors: &Anchors, points: [(f32, f32); 5]) {
        let anchor = &anchors[index];
        let deltas = &mut self.landmarks[index * LANDMARK_STRIDE..][..LANDMARK_STRIDE];
        for ((x, y), delta) in points.into_iter().zip(deltas.chunks_exact_mut(2)) {
            delta[0] = (x - anchor.x_center()) / (0.1 * anchor.width());
            delta[1] = (y - anchor.y_center()) / (0.1 * anchor.height());
        }
    }

    pub fn outputs(&self) -> Outputs<'_> {
        Outputs::new(
            &self.scores,
            &self.boxes,
            &self.landmarks,
            self.anchor_count,
        )
        .unwrap()
    }
}
