//! Face detection post-processing.
//!
//! The detector network outputs, for every anchor of its [`ssd::Anchors`] table, a pair of class
//! scores, a box regression and 5 landmark regressions. [`Detector`] turns these into a list of
//! [`Detection`]s in frame coordinates:
//!
//! 1. anchors whose face score exceeds the confidence threshold are collected as
//!    [`decode::Candidates`],
//! 2. candidates are sorted by confidence and de-duplicated with [`nms::NonMaxSuppression`], which
//!    decodes the surviving boxes and landmarks,
//! 3. all coordinates are mapped into the original frame ([`map_to_frame`]).

pub mod decode;
pub mod nms;
pub mod ssd;

use std::ops::Index;

use crate::rect::Rect;
use crate::resolution::Resolution;
use crate::timer::Timer;

use self::decode::{Candidates, Outputs};
use self::nms::NonMaxSuppression;
use self::ssd::{AnchorSet, Anchors};

/// Number of facial landmarks output per detection.
pub const LANDMARK_COUNT: usize = 5;

/// The facial landmarks of a [`Detection`], in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    LeftEye = 0,
    RightEye = 1,
    Nose = 2,
    LeftMouth = 3,
    RightMouth = 4,
}

impl Keypoint {
    pub const ALL: [Self; LANDMARK_COUNT] = [
        Self::LeftEye,
        Self::RightEye,
        Self::Nose,
        Self::LeftMouth,
        Self::RightMouth,
    ];
}

/// The 5 facial landmarks of a detected face.
///
/// Like the bounding box of a [`Detection`], these are either normalized or in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmarks {
    points: [(f32, f32); LANDMARK_COUNT],
}

impl Landmarks {
    pub fn new(points: [(f32, f32); LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(f32, f32); LANDMARK_COUNT] {
        &self.points
    }

    /// Multiplies all coordinates with `factor`.
    #[must_use]
    pub fn scale(&self, factor: f32) -> Self {
        Self::new(self.points.map(|(x, y)| (x * factor, y * factor)))
    }
}

impl Index<Keypoint> for Landmarks {
    type Output = (f32, f32);

    fn index(&self, index: Keypoint) -> &(f32, f32) {
        &self.points[index as usize]
    }
}

/// A detected face.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the face, the confidence of the detector, and
/// the 5 facial [`Landmarks`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    confidence: f32,
    rect: Rect,
    landmarks: Landmarks,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect, landmarks: Landmarks) -> Self {
        Self {
            confidence,
            rect,
            landmarks,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the axis-aligned bounding rectangle containing the detected face.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn set_bounding_rect(&mut self, rect: Rect) {
        self.rect = rect;
    }

    pub fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    pub fn set_landmarks(&mut self, landmarks: Landmarks) {
        self.landmarks = landmarks;
    }

    /// Returns the detection with the largest bounding box area.
    ///
    /// If several detections share the largest area, the first one is returned. This is the face
    /// that gets picked for enrollment when more than one face is in view.
    pub fn largest(detections: &[Detection]) -> Option<&Detection> {
        detections.iter().fold(None, |best, det| match best {
            Some(best) if best.rect.area() >= det.rect.area() => Some(best),
            _ => Some(det),
        })
    }
}

/// Maps normalized detections into the pixel coordinates of a `frame`.
///
/// Detector coordinates are relative to the longer side of the frame, since the frame is padded to
/// a square before being resized to the network input. Both bounding boxes and landmarks are
/// scaled by that length. Box corners are then clamped into the frame, so every box satisfies
/// `0 <= x <= x + w <= width` and `0 <= y <= y + h <= height` afterwards. Landmarks are not
/// clamped.
pub fn map_to_frame(detections: &mut [Detection], frame: Resolution) {
    let scale = frame.longer_side() as f32;
    let (max_x, max_y) = (frame.width() as f32, frame.height() as f32);
    for det in detections {
        det.rect = det.rect.scale(scale).clamp_to(max_x, max_y);
        det.landmarks = det.landmarks.scale(scale);
    }
}

/// Face detector post-processing pipeline.
///
/// A [`Detector`] is bound to one [`AnchorSet`] at construction time, so it can only interpret the
/// outputs of the matching network variant.
pub struct Detector {
    anchor_set: AnchorSet,
    anchors: &'static Anchors,
    thresh: f32,
    nms: NonMaxSuppression,
    candidates: Candidates,
    detections: Vec<Detection>,
    t_filter: Timer,
    t_nms: Timer,
    t_map: Timer,
}

impl Detector {
    /// The default confidence threshold.
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new(anchor_set: AnchorSet) -> Self {
        Self {
            anchor_set,
            anchors: anchor_set.anchors(),
            thresh: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
            candidates: Candidates::new(),
            detections: Vec::new(),
            t_filter: Timer::new("filter"),
            t_nms: Timer::new("nms"),
            t_map: Timer::new("map"),
        }
    }

    pub fn anchor_set(&self) -> AnchorSet {
        self.anchor_set
    }

    pub fn input_resolution(&self) -> Resolution {
        self.anchor_set.input_resolution()
    }

    /// Sets the confidence threshold. Only anchors with a face score strictly above it are
    /// considered.
    #[inline]
    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.thresh
    }

    pub fn nms_mut(&mut self) -> &mut NonMaxSuppression {
        &mut self.nms
    }

    /// Wraps raw output buffers in an [`Outputs`] view sized for this detector's anchor table.
    pub fn outputs<'a>(
        &self,
        scores: &'a [f32],
        boxes: &'a [f32],
        landmarks: &'a [f32],
    ) -> anyhow::Result<Outputs<'a>> {
        Outputs::new(scores, boxes, landmarks, self.anchors.anchor_count())
    }

    /// Runs the post-processing pipeline on one set of network outputs, returning the detected
    /// faces in pixel coordinates of `frame`, ordered by descending confidence.
    ///
    /// # Panics
    ///
    /// This panics if `outputs` was created for a different number of anchors than this
    /// detector's [`AnchorSet`] has (use [`Detector::outputs`] to create a matching view).
    pub fn detect(&mut self, outputs: &Outputs<'_>, frame: Resolution) -> &[Detection] {
        assert_eq!(
            outputs.anchor_count(),
            self.anchors.anchor_count(),
            "network outputs don't match the {:?} anchor set",
            self.anchor_set,
        );

        self.detections.clear();

        self.t_filter.time(|| {
            self.candidates.filter(outputs, self.thresh);
            self.candidates.sort_by_confidence();
        });

        self.t_nms.time(|| {
            self.nms
                .process(&self.candidates, self.anchors, &mut self.detections)
        });

        self.t_map.time(|| map_to_frame(&mut self.detections, frame));

        log::debug!(
            "{} candidates -> {} faces in {frame} frame",
            self.candidates.len(),
            self.detections.len()
        );

        &self.detections
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_filter, &self.t_nms, &self.t_map].into_iter()
    }
}
