//! Non-Maximum Suppression.
//!
//! Single Shot MultiBox Detectors produce many overlapping detections for every face. Non-Maximum
//! Suppression (NMS) filters these duplicates out, leaving only the detection with the highest
//! confidence for each face.
//!
//! The greedy algorithm used here walks the candidates in order of descending confidence, keeps
//! every candidate that hasn't been suppressed yet, and suppresses all later candidates whose
//! bounding box overlaps the kept one by at least the IOU threshold. Overlaps exactly at the
//! threshold are suppressed.

use std::cmp::Reverse;

use crate::{num::TotalF32, rect::Rect};

use super::{decode::Candidates, ssd::Anchors, Detection};

/// Whether a candidate can still be emitted by [`NonMaxSuppression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    Active,
    Suppressed,
}

/// A non-maximum suppression algorithm.
#[derive(Debug, Clone)]
pub struct NonMaxSuppression {
    iou_thresh: f32,
    states: Vec<CandidateState>,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.2;

    /// Creates a new non-maximum suppressor using [`Self::DEFAULT_IOU_THRESH`].
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            states: Vec::new(),
        }
    }

    /// Sets the intersection-over-union threshold to consider two detections as overlapping.
    ///
    /// The value is not validated; a threshold of 0.0 or below suppresses every candidate after the
    /// first one, while a threshold above 1.0 disables suppression.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    pub fn iou_thresh(&self) -> f32 {
        self.iou_thresh
    }

    /// Performs non-maximum suppression on `candidates`, appending the surviving detections to
    /// `out`.
    ///
    /// `candidates` must already be sorted by descending confidence (see
    /// [`Candidates::sort_by_confidence`]). Boxes and landmarks are decoded lazily against
    /// `anchors`, so suppressed candidates never have their landmarks decoded.
    pub fn process(
        &mut self,
        candidates: &Candidates,
        anchors: &Anchors,
        out: &mut Vec<Detection>,
    ) {
        let list = candidates.as_slice();
        self.suppress(
            list.len(),
            |i| candidates.decode_box(&list[i], anchors),
            |i, rect| {
                let cand = &list[i];
                out.push(Detection::new(
                    cand.confidence,
                    rect,
                    candidates.decode_landmarks(cand, anchors),
                ));
            },
        );
    }

    /// Performs non-maximum suppression on already decoded detections.
    ///
    /// Unlike [`NonMaxSuppression::process`], the detections may be in any order; they are sorted
    /// by descending confidence first (ties keep their relative order). The filtered detections
    /// are returned in that order.
    pub fn process_detections(&mut self, mut detections: Vec<Detection>) -> Vec<Detection> {
        detections.sort_by_key(|det| Reverse(TotalF32(det.confidence())));

        let mut keep = Vec::with_capacity(detections.len());
        self.suppress(
            detections.len(),
            |i| detections[i].bounding_rect(),
            |i, _| keep.push(i),
        );

        keep.into_iter().map(|i| detections[i].clone()).collect()
    }

    fn suppress(
        &mut self,
        len: usize,
        rect_at: impl Fn(usize) -> Rect,
        mut emit: impl FnMut(usize, Rect),
    ) {
        self.states.clear();
        self.states.resize(len, CandidateState::Active);

        for i in 0..len {
            if self.states[i] == CandidateState::Suppressed {
                continue;
            }

            let kept = rect_at(i);
            emit(i, kept);

            for j in i + 1..len {
                if self.states[j] == CandidateState::Suppressed {
                    continue;
                }
                if kept.iou(&rect_at(j)) >= self.iou_thresh {
                    self.states[j] = CandidateState::Suppressed;
                }
            }
        }

        let kept = self
            .states
            .iter()
            .filter(|s| **s == CandidateState::Active)
            .count();
        log::trace!("nms: kept {kept} of {len} candidates");
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Landmarks;

    fn det(confidence: f32, rect: Rect) -> Detection {
        Detection::new(confidence, rect, Landmarks::default())
    }

    #[test]
    fn nms_suppresses_non_maximum() {
        let mut nms = NonMaxSuppression::new();

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        let a = det(0.6, rect);
        let b = det(0.55, Rect::from_center(0.0, 0.0, 1.5, 1.5));
        let detections = nms.process_detections(vec![b, a]);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.confidence(), 0.6);
        assert_eq!(d.bounding_rect(), rect);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let mut nms = NonMaxSuppression::new();

        let a = det(1.0, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = det(1.0, Rect::from_center(5.0, 0.0, 1.0, 1.0));

        let detections = nms.process_detections(vec![a, b]);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bounding_rect().x_center(), 0.0);
    }

    #[test]
    fn suppresses_on_tie() {
        // IOU of these is exactly 1/3.
        let a = det(0.9, Rect::from_top_left(0.0, 0.0, 2.0, 2.0));
        let b = det(0.8, Rect::from_top_left(1.0, 0.0, 2.0, 2.0));
        let iou = a.bounding_rect().iou(&b.bounding_rect());

        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(iou);
        assert_eq!(nms.process_detections(vec![a.clone(), b.clone()]).len(), 1);

        nms.set_iou_thresh(iou + 1e-6);
        assert_eq!(nms.process_detections(vec![a, b]).len(), 2);
    }

    #[test]
    fn three_candidates() {
        // 0 and 1 overlap with an IOU of 0.6, 2 is far away.
        let a = det(0.9, Rect::from_top_left(0.0, 0.0, 1.0, 1.0));
        let b = det(0.8, Rect::from_top_left(0.25, 0.0, 1.0, 1.0));
        let c = det(0.7, Rect::from_top_left(5.0, 5.0, 1.0, 1.0));
        approx::assert_relative_eq!(a.bounding_rect().iou(&b.bounding_rect()), 0.6);

        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.5);
        let kept = nms.process_detections(vec![c, b, a]);
        let confs = kept.iter().map(|d| d.confidence()).collect::<Vec<_>>();
        assert_eq!(confs, [0.9, 0.7]);
    }

    #[test]
    fn suppressed_candidates_do_not_suppress() {
        // b overlaps both a and c above the threshold, a and c stay below it. Once b is suppressed
        // by a, c survives.
        let a = det(0.9, Rect::from_top_left(0.0, 0.0, 2.0, 1.0));
        let b = det(0.8, Rect::from_top_left(0.5, 0.0, 2.0, 1.0));
        let c = det(0.7, Rect::from_top_left(1.2, 0.0, 2.0, 1.0));

        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.3);
        let kept = nms.process_detections(vec![a, b, c]);
        let confs = kept.iter().map(|d| d.confidence()).collect::<Vec<_>>();
        assert_eq!(confs, [0.9, 0.7]);
    }

    #[test]
    fn idempotent() {
        let mut rng = fastrand::Rng::with_seed(0x2b1d_77e0);
        let mut nms = NonMaxSuppression::new();
        for _ in 0..50 {
            let dets = (0..40)
                .map(|_| {
                    let (w, h) = (0.05 + rng.f32() * 0.3, 0.05 + rng.f32() * 0.3);
                    det(rng.f32(), Rect::from_center(rng.f32(), rng.f32(), w, h))
                })
                .collect::<Vec<_>>();
            let thresh = rng.f32();
            nms.set_iou_thresh(thresh);

            let once = nms.process_detections(dets);
            let twice = nms.process_detections(once.clone());
            assert_eq!(once, twice);
        }
    }
}
