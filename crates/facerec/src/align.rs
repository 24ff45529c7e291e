//! Face alignment via a closed-form similarity transform.
//!
//! Before a face can be passed to the embedding network, it has to be warped so that its 5
//! landmarks end up close to the canonical positions the network was trained with. The transform
//! used for this is a similarity transform (rotation, uniform scale and translation) estimated with
//! the least-squares method by [Umeyama], using an analytic 2x2 singular value decomposition.
//!
//! [Umeyama]: https://doi.org/10.1109/34.88573

use nalgebra::{Matrix2, Matrix2x3, Vector2};

use crate::detection::{Landmarks, LANDMARK_COUNT};

/// Crop size the reference landmark coordinates are specified for.
pub const REFERENCE_CROP_SIZE: u32 = 112;

/// Canonical ArcFace landmark positions in a 112x112 crop, in [`Keypoint`] order.
///
/// [`Keypoint`]: crate::detection::Keypoint
const ARCFACE_112: [(f32, f32); LANDMARK_COUNT] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// The landmark positions faces are aligned to.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentTemplate {
    points: [Vector2<f32>; LANDMARK_COUNT],
    crop_size: u32,
}

impl AlignmentTemplate {
    /// Returns the ArcFace template for a square crop of `crop_size` pixels.
    ///
    /// The reference coordinates are given for a 112 pixel crop and scaled linearly.
    pub fn arcface(crop_size: u32) -> Self {
        let factor = crop_size as f32 / REFERENCE_CROP_SIZE as f32;
        Self {
            points: ARCFACE_112.map(|(x, y)| Vector2::new(x * factor, y * factor)),
            crop_size,
        }
    }

    /// Returns the size of the (square) crop the template is meant for.
    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    pub fn points(&self) -> &[Vector2<f32>; LANDMARK_COUNT] {
        &self.points
    }
}

impl Default for AlignmentTemplate {
    fn default() -> Self {
        Self::arcface(REFERENCE_CROP_SIZE)
    }
}

/// A 2x3 affine transform `[[a, b, tx], [c, d, ty]]` mapping frame coordinates into the aligned
/// crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix2x3<f32>,
}

impl AffineTransform {
    pub fn from_matrix(matrix: Matrix2x3<f32>) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self::from_matrix(Matrix2x3::identity())
    }

    /// Maps the point `(x, y)` through this transform.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.matrix;
        (
            m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)],
            m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)],
        )
    }

    /// Returns the rows of the matrix, which is the layout expected by the warp engine.
    pub fn rows(&self) -> [[f32; 3]; 2] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        ]
    }

    /// Returns the uniform scale factor of the linear part.
    ///
    /// This is only meaningful for similarity transforms like the ones [`Aligner`] produces.
    pub fn scale(&self) -> f32 {
        self.matrix.fixed_view::<2, 2>(0, 0).determinant().abs().sqrt()
    }

    pub fn to_matrix(&self) -> Matrix2x3<f32> {
        self.matrix
    }
}

/// Singular value decomposition `A = U * diag(s) * V^T` of a 2x2 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Svd2 {
    pub u: Matrix2<f32>,
    /// Singular values, `s[0] >= s[1] >= 0`.
    pub s: [f32; 2],
    /// The right singular vectors. This is always a reflection matrix, which makes it symmetric,
    /// so it is equal to its transpose.
    pub v: Matrix2<f32>,
}

/// Computes the SVD of `a` in closed form.
///
/// The decomposition is fully analytic (no iteration). Rank-deficient inputs are handled by
/// falling back to columns of the identity for the undetermined singular vectors, which avoids
/// divisions by zero.
pub fn svd2(a: &Matrix2<f32>) -> Svd2 {
    let [a0, a1, a2, a3] = [a[(0, 0)], a[(0, 1)], a[(1, 0)], a[(1, 1)]];

    let diff = ((a0 - a3).powi(2) + (a1 + a2).powi(2)).sqrt();
    let sum = ((a0 + a3).powi(2) + (a1 - a2).powi(2)).sqrt();
    let s0 = (diff + sum) / 2.0;
    let s1 = (s0 - diff).abs();

    let sin = if s0 > s1 {
        let angle = (2.0 * (a0 * a1 + a2 * a3)).atan2(a0 * a0 - a1 * a1 + a2 * a2 - a3 * a3) / 2.0;
        angle.sin()
    } else {
        0.0
    };
    let cos = (1.0 - sin * sin).sqrt();
    // `v` as a rotation, before it's turned into the reflection that's returned.
    let [v0, v1, v2, v3] = [cos, -sin, sin, cos];

    let u0 = if s0 != 0.0 { -(a0 * v0 + a1 * v2) / s0 } else { 1.0 };
    let u2 = if s0 != 0.0 { -(a2 * v0 + a3 * v2) / s0 } else { 0.0 };
    let u1 = if s1 != 0.0 { (a0 * v1 + a1 * v3) / s1 } else { -u2 };
    let u3 = if s1 != 0.0 { (a2 * v1 + a3 * v3) / s1 } else { u0 };

    Svd2 {
        u: Matrix2::new(u0, u1, u2, u3),
        s: [s0, s1],
        v: Matrix2::new(-v0, v1, -v2, v3),
    }
}

/// Estimates similarity transforms that align detected landmarks to an [`AlignmentTemplate`].
#[derive(Debug, Clone)]
pub struct Aligner {
    template: AlignmentTemplate,
    template_centroid: Vector2<f32>,
    /// Template points with `template_centroid` subtracted.
    template_demeaned: [Vector2<f32>; LANDMARK_COUNT],
}

impl Aligner {
    pub fn new(template: AlignmentTemplate) -> Self {
        let (template_centroid, template_demeaned) = demean(template.points());
        Self {
            template,
            template_centroid,
            template_demeaned,
        }
    }

    pub fn template(&self) -> &AlignmentTemplate {
        &self.template
    }

    /// Computes the transform that maps `landmarks` (in frame pixels) onto the template.
    ///
    /// The returned transform is meant to be handed to the external warp that produces the input
    /// crop of the embedding network.
    ///
    /// # Limitations
    ///
    /// No reflection correction is applied: the rotation part is used exactly as it comes out of
    /// the SVD. Landmarks of real faces are never mirror images of the template, so this doesn't
    /// matter in practice, but mirrored inputs produce a transform that is not a proper
    /// least-squares fit.
    ///
    /// Landmarks that all coincide have no defined scale; the result contains NaNs in that case.
    pub fn estimate(&self, landmarks: &Landmarks) -> AffineTransform {
        let points = landmarks.points().map(|(x, y)| Vector2::new(x, y));
        let (centroid, demeaned) = demean(&points);
        let n = LANDMARK_COUNT as f32;

        let mut covariance = Matrix2::zeros();
        for (dst, src) in self.template_demeaned.iter().zip(&demeaned) {
            covariance += dst * src.transpose();
        }
        covariance /= n;

        let svd = svd2(&covariance);
        let rotation = svd.u * svd.v;

        // The demeaned points already have a mean of (almost) zero, but the variance is computed
        // around their actual mean.
        let mean = demeaned.iter().sum::<Vector2<f32>>() / n;
        let variance = demeaned
            .iter()
            .map(|p| (mean - p).component_mul(&(mean - p)))
            .sum::<Vector2<f32>>()
            / n;
        let scale = 1.0 / (variance.x + variance.y) * (svd.s[0] + svd.s[1]);

        let translation = self.template_centroid - scale * (rotation * centroid);

        log::trace!(
            "alignment: singular values {:?}, scale {scale}, translation {:?}",
            svd.s,
            translation
        );

        let linear = rotation * scale;
        AffineTransform::from_matrix(Matrix2x3::new(
            linear[(0, 0)],
            linear[(0, 1)],
            translation.x,
            linear[(1, 0)],
            linear[(1, 1)],
            translation.y,
        ))
    }
}

impl Default for Aligner {
    fn default() -> Self {
        Self::new(AlignmentTemplate::default())
    }
}

/// Returns the centroid of `points` and the points with the centroid subtracted.
fn demean(
    points: &[Vector2<f32>; LANDMARK_COUNT],
) -> (Vector2<f32>, [Vector2<f32>; LANDMARK_COUNT]) {
    let centroid = points.iter().sum::<Vector2<f32>>() / LANDMARK_COUNT as f32;
    (centroid, points.map(|p| p - centroid))
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use nalgebra::Rotation2;

    use super::*;

    const MAX_DELTA: f32 = 0.001;

    /// Creates landmarks that the similarity transform `scale * R(angle) * p + offset` maps onto
    /// the template.
    fn landmarks_for(
        template: &AlignmentTemplate,
        angle: f32,
        scale: f32,
        offset: Vector2<f32>,
    ) -> Landmarks {
        let inverse = Rotation2::new(-angle);
        Landmarks::new(template.points().map(|p| {
            let src = inverse * ((p - offset) / scale);
            (src.x, src.y)
        }))
    }

    fn mean_squared_error(
        transform: &AffineTransform,
        landmarks: &Landmarks,
        template: &AlignmentTemplate,
    ) -> f32 {
        landmarks
            .points()
            .iter()
            .zip(template.points())
            .map(|(&(x, y), t)| {
                let (ax, ay) = transform.apply(x, y);
                (ax - t.x).powi(2) + (ay - t.y).powi(2)
            })
            .sum::<f32>()
            / LANDMARK_COUNT as f32
    }

    #[test]
    fn template_scales_with_crop() {
        let t = AlignmentTemplate::arcface(224);
        assert_eq!(t.crop_size(), 224);
        assert_relative_eq!(t.points()[0].x, 38.2946 * 2.0);
        assert_relative_eq!(t.points()[4].y, 92.2041 * 2.0);
        assert_eq!(AlignmentTemplate::default(), AlignmentTemplate::arcface(112));
    }

    #[test]
    fn svd_reconstructs() {
        let mut rng = fastrand::Rng::with_seed(0x0005_7d22);
        for _ in 0..200 {
            let a = Matrix2::from_fn(|_, _| rng.f32() * 10.0 - 5.0);
            let svd = svd2(&a);
            assert!(svd.s[0] >= svd.s[1] && svd.s[1] >= 0.0, "{svd:?}");
            assert_relative_eq!(svd.v, svd.v.transpose());

            let s = Matrix2::from_diagonal(&Vector2::new(svd.s[0], svd.s[1]));
            let reconstructed = svd.u * s * svd.v.transpose();
            assert_abs_diff_eq!(reconstructed, a, epsilon = 1e-3);
        }
    }

    #[test]
    fn svd_zero_matrix() {
        let svd = svd2(&Matrix2::zeros());
        assert_eq!(svd.s, [0.0, 0.0]);
        assert_eq!(svd.u, Matrix2::identity());
        assert_eq!(svd.v, Matrix2::new(-1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn svd_rank_one() {
        let svd = svd2(&Matrix2::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(svd.s, [1.0, 0.0]);
        assert_eq!(svd.u, Matrix2::new(-1.0, 0.0, 0.0, -1.0));
        assert_eq!(svd.v, Matrix2::new(-1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn identity_for_template() {
        let template = AlignmentTemplate::default();
        let aligner = Aligner::new(template.clone());
        let landmarks = Landmarks::new(template.points().map(|p| (p.x, p.y)));

        let transform = aligner.estimate(&landmarks);
        assert_abs_diff_eq!(
            transform.to_matrix(),
            Matrix2x3::identity(),
            epsilon = MAX_DELTA
        );
        assert_relative_eq!(transform.scale(), 1.0, epsilon = MAX_DELTA);
    }

    #[test]
    fn recovers_similarity_transforms() {
        let template = AlignmentTemplate::default();
        let aligner = Aligner::new(template.clone());

        for degrees in (-180..=180).step_by(15) {
            for (scale, offset) in [
                (1.0, Vector2::zeros()),
                (0.25, Vector2::new(-30.0, 12.0)),
                (2.5, Vector2::new(100.0, -40.0)),
            ] {
                let angle = (degrees as f32).to_radians();
                let landmarks = landmarks_for(&template, angle, scale, offset);
                let transform = aligner.estimate(&landmarks);

                let expected = Rotation2::new(angle).into_inner() * scale;
                let m = transform.to_matrix();
                let linear = m.fixed_view::<2, 2>(0, 0).into_owned();
                assert_abs_diff_eq!(linear, expected, epsilon = MAX_DELTA);
                assert_abs_diff_eq!(m[(0, 2)], offset.x, epsilon = 0.05);
                assert_abs_diff_eq!(m[(1, 2)], offset.y, epsilon = 0.05);
                assert_relative_eq!(transform.scale(), scale, max_relative = MAX_DELTA);

                let mse = mean_squared_error(&transform, &landmarks, &template);
                assert!(mse < 1e-3, "{degrees}° x{scale}: mse {mse}");
            }
        }
    }

    #[test]
    fn jitter() {
        let template = AlignmentTemplate::default();
        let aligner = Aligner::new(template.clone());
        let mut rng = fastrand::Rng::with_seed(0x3024b6663d843ca2);

        for _ in 0..100 {
            let angle = (rng.f32() - 0.5) * 1.2;
            let scale = 0.1 + rng.f32() * 0.9;
            let offset = Vector2::new(rng.f32() * 40.0 - 20.0, rng.f32() * 40.0 - 20.0);
            let clean = landmarks_for(&template, angle, scale, offset);
            let noisy = Landmarks::new(
                clean
                    .points()
                    .map(|(x, y)| (x + rng.f32() - 0.5, y + rng.f32() - 0.5)),
            );

            let transform = aligner.estimate(&noisy);
            let mse = mean_squared_error(&transform, &noisy, &template);
            assert!(mse < 1.0, "mse {mse}");
        }
    }

    #[test]
    fn scales_to_larger_crop() {
        let aligner = Aligner::new(AlignmentTemplate::arcface(224));
        let small = AlignmentTemplate::default();
        let landmarks = Landmarks::new(small.points().map(|p| (p.x, p.y)));

        let transform = aligner.estimate(&landmarks);
        assert_relative_eq!(transform.scale(), 2.0, max_relative = MAX_DELTA);
        let (x, y) = transform.apply(56.0, 56.0);
        assert_abs_diff_eq!(x, 112.0, epsilon = 0.01);
        assert_abs_diff_eq!(y, 112.0, epsilon = 0.01);
    }

    #[test]
    fn rows_layout() {
        let t = AffineTransform::from_matrix(Matrix2x3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0));
        assert_eq!(t.rows(), [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(t.apply(1.0, 1.0), (6.0, 15.0));
        assert_eq!(AffineTransform::identity().apply(3.0, -2.0), (3.0, -2.0));
    }
}
