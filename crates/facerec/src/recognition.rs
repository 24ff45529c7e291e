//! Face embeddings and identity matching.
//!
//! The embedding network maps an aligned face crop to a fixed-length feature vector. Two faces are
//! compared via the cosine similarity of their embeddings, which is remapped to a score between 0
//! and 100.

pub mod store;

use std::fmt;

use itertools::Itertools;

/// A face embedding as produced by the recognition network.
///
/// Embeddings are stored as they come out of the network; they are normalized to unit length
/// whenever they are compared.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    raw: Vec<f32>,
}

impl Embedding {
    pub fn new(raw: Vec<f32>) -> Self {
        Self { raw }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.raw
    }

    /// Returns the Euclidean norm of the embedding.
    pub fn norm(&self) -> f32 {
        self.raw.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Scales the embedding to unit length.
    ///
    /// An all-zero embedding has no direction; normalizing it fills it with NaNs.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        for v in &mut self.raw {
            *v /= norm;
        }
    }

    /// Returns a unit-length copy of `self`.
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.normalize();
        copy
    }

    /// Computes the dot product of two embeddings.
    ///
    /// # Panics
    ///
    /// This will panic if the embeddings have different lengths.
    pub fn dot(&self, other: &Self) -> f32 {
        self.raw
            .iter()
            .zip_eq(&other.raw)
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Computes the match score between `self` and `other`.
    ///
    /// The cosine similarity of both embeddings is mapped from `[-1, 1]` to `[0, 100]`, so
    /// identical directions score 100 and orthogonal ones score 50.
    pub fn score(&self, other: &Self) -> f32 {
        score_normalized(&self.normalized(), &other.normalized())
    }
}

/// Computes the match score of two embeddings that are already unit length.
pub(crate) fn score_normalized(a: &Embedding, b: &Embedding) -> f32 {
    (0.5 + 0.5 * a.dot(b)) * 100.0
}

/// The outcome of searching an [`EnrollmentStore`] for a face.
///
/// [`EnrollmentStore`]: store::EnrollmentStore
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Slot of the best matching entry, or `None` if nothing matched at all.
    pub id: Option<usize>,
    pub name: String,
    pub score: f32,
}

impl MatchResult {
    /// Name reported when no enrolled face matches.
    pub const UNKNOWN_NAME: &'static str = "unknown";

    /// Returns the result reported when no entry matched.
    pub fn unknown() -> Self {
        Self {
            id: None,
            name: Self::UNKNOWN_NAME.to_string(),
            score: 0.0,
        }
    }

    /// Returns the slot as a signed index, with `-1` standing for "no match".
    pub fn raw_id(&self) -> isize {
        self.id.map_or(-1, |id| id as isize)
    }

    /// Returns whether the score is high enough to consider the face recognized.
    ///
    /// The comparison is strict, so a score equal to `threshold` is not a match.
    pub fn is_match(&self, threshold: f32) -> bool {
        self.id.is_some() && self.score > threshold
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} (#{id}): {:.2}", self.name, self.score),
            None => f.write_str(Self::UNKNOWN_NAME),
        }
    }
}
