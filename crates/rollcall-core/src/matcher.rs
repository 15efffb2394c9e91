//! Nearest-neighbour identity matching over registered descriptors.

use crate::types::{Descriptor, Identity};

/// Maximum Euclidean distance for a positive match.
///
/// Calibrated for the 128-dim descriptor model; not a tunable.
pub const MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a live descriptor against the roster.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Known { identity_id: String, distance: f32 },
    /// No stored descriptor within threshold. `distance` is the best one
    /// seen, or infinity for an empty roster.
    Unknown { distance: f32 },
}

impl MatchOutcome {
    pub fn identity_id(&self) -> Option<&str> {
        match self {
            MatchOutcome::Known { identity_id, .. } => Some(identity_id),
            MatchOutcome::Unknown { .. } => None,
        }
    }

    pub fn distance(&self) -> f32 {
        match self {
            MatchOutcome::Known { distance, .. } | MatchOutcome::Unknown { distance } => *distance,
        }
    }
}

/// Strategy for resolving a live descriptor to a registered identity.
pub trait IdentityMatcher {
    fn best_match(&self, descriptor: &Descriptor) -> MatchOutcome;
}

/// Euclidean nearest-neighbour matcher over a roster snapshot.
///
/// Built from the roster once; rebuild it whenever the roster changes.
#[derive(Debug, Clone, Default)]
pub struct EuclideanMatcher {
    labeled: Vec<(String, Descriptor)>,
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn from_roster(roster: &[Identity]) -> Self {
        Self {
            labeled: roster
                .iter()
                .map(|identity| (identity.id.clone(), identity.descriptor.clone()))
                .collect(),
            threshold: MATCH_THRESHOLD,
        }
    }

    pub fn len(&self) -> usize {
        self.labeled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labeled.is_empty()
    }
}

impl IdentityMatcher for EuclideanMatcher {
    fn best_match(&self, descriptor: &Descriptor) -> MatchOutcome {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, (_, stored)) in self.labeled.iter().enumerate() {
            let distance = descriptor.euclidean_distance(stored);
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_distance < self.threshold => MatchOutcome::Known {
                identity_id: self.labeled[idx].0.clone(),
                distance: best_distance,
            },
            _ => MatchOutcome::Unknown {
                distance: best_distance,
            },
        }
    }
}
