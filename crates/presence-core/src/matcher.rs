//! Nearest-neighbour identity matching against the reference gallery.

use crate::gallery::Gallery;
use crate::types::Descriptor;
use std::fmt;

/// Label shown for faces that match nobody in the gallery.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Outcome of classifying one observed face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    /// The recognized label, or `None` for an unknown face.
    pub fn label(&self) -> Option<&str> {
        match self {
            Identity::Known(label) => Some(label),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().unwrap_or(UNKNOWN_LABEL))
    }
}

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity: Identity,
    /// Distance to the nearest gallery entry, whether or not it was accepted.
    pub distance: Option<f32>,
    /// Gallery index of the nearest entry.
    pub index: Option<usize>,
}

/// Strategy for comparing a probe descriptor against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &Gallery, tolerance: f32) -> MatchResult;

    fn identify(&self, probe: &Descriptor, gallery: &Gallery, tolerance: f32) -> Identity {
        self.compare(probe, gallery, tolerance).identity
    }
}

/// Euclidean nearest-neighbour matcher.
///
/// Picks the gallery entry with the smallest distance and accepts it when that
/// distance is at or below `tolerance`. Equal distances keep the earliest
/// gallery index.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &Gallery, tolerance: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, descriptor) in gallery.descriptors().iter().enumerate() {
            let distance = probe.distance(descriptor);
            // NaN never compares less, so it can never become the best entry.
            let is_better = match best {
                None => !distance.is_nan(),
                Some((_, best_distance)) => distance < best_distance,
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance <= tolerance => MatchResult {
                identity: Identity::Known(gallery.labels()[idx].clone()),
                distance: Some(distance),
                index: Some(idx),
            },
            _ => MatchResult {
                identity: Identity::Unknown,
                distance: best.map(|(_, d)| d),
                index: best.map(|(i, _)| i),
            },
        }
    }
}
