//! Combines overlapping session predictions into one contact frame.
//!
//! Each session votes for `start + class` with the weight of its predicted
//! class, so offsets near the middle of a session count more than offsets at
//! its edges. The frame with the largest total wins.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView1};

use crate::types::*;

/// Weight per predicted contact offset for 10-frame sessions.
pub const DEFAULT_PROB_DISTRIBUTION: [f64; 10] =
    [0.5, 0.707, 0.867, 0.966, 1.0, 1.0, 0.966, 0.867, 0.707, 0.5];

/// Class probabilities per session, keyed by session start frame.
pub type Predictions = BTreeMap<usize, Array1<f32>>;

/// Accumulated weight per absolute frame for one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreMap {
    scores: BTreeMap<usize, f64>,
    // frames in the order they received their first vote
    first_voted: Vec<usize>,
}

impl ScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, frame: usize, weight: f64) {
        match self.scores.entry(frame) {
            Entry::Occupied(mut entry) => *entry.get_mut() += weight,
            Entry::Vacant(entry) => {
                entry.insert(weight);
                self.first_voted.push(frame);
            }
        }
    }

    pub fn get(&self, frame: usize) -> Option<f64> {
        self.scores.get(&frame).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.scores.iter().map(|(&frame, &score)| (frame, score))
    }

    /// Frame with the highest score.
    ///
    /// Ties go to the frame that was voted for first, so with sessions
    /// accumulated in start order the earliest session's vote wins.
    pub fn best(&self) -> Option<ContactAnswer> {
        let mut best: Option<ContactAnswer> = None;
        let voted = self
            .first_voted
            .iter()
            .filter_map(|frame| self.scores.get(frame).map(|&score| (*frame, score)));
        for (frame, score) in voted {
            match best {
                Some(current) if score <= current.confidence => {}
                _ => {
                    best = Some(ContactAnswer {
                        framenum: frame,
                        confidence: score,
                    })
                }
            }
        }
        best
    }
}

/// Index of the first maximum, or `None` for an empty distribution.
pub fn argmax(distribution: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in distribution.iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// Adds every session's vote to a fresh score map.
///
/// Sessions predicting class `timesteps` (no contact) add nothing.
pub fn accumulate<'a, I>(predictions: I, timesteps: usize, weights: &[f64]) -> Result<ScoreMap>
where
    I: IntoIterator<Item = (usize, ArrayView1<'a, f32>)>,
{
    let mut scores = ScoreMap::new();
    for (start, distribution) in predictions {
        if distribution.len() != timesteps + 1 {
            return Err(AnalysisError::ShapeMismatch(format!(
                "session {} has {} classes, expected {}",
                start,
                distribution.len(),
                timesteps + 1
            )));
        }
        let class = match argmax(distribution) {
            Some(class) => class,
            None => continue,
        };
        if class == timesteps {
            continue;
        }
        let weight = *weights.get(class).ok_or_else(|| {
            AnalysisError::InvalidData(format!("no weight for contact offset {}", class))
        })?;
        scores.add(start + class, weight);
    }
    Ok(scores)
}

/// Scores a full set of predictions and picks the contact frame.
pub fn estimate_contact(
    predictions: &Predictions,
    timesteps: usize,
    weights: &[f64],
) -> Result<Option<ContactAnswer>> {
    let scores = accumulate(
        predictions
            .iter()
            .map(|(&start, distribution)| (start, distribution.view())),
        timesteps,
        weights,
    )?;
    Ok(scores.best())
}
