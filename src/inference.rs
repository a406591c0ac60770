use std::collections::{HashMap, HashSet};

use log::debug;
use ndarray::{Array1, Array2, Axis};

use crate::aggregate::Predictions;
use crate::model::{stack_sessions, ContactModel, Normalization};
use crate::types::*;
use crate::video::VideoSource;
use crate::window::Session;

/// Frame embeddings for one obstacle event, keyed by absolute frame.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingCache {
    embeddings: HashMap<usize, Array1<f32>>,
    width: Option<usize>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that only accepts embeddings of `width` features.
    pub fn with_width(width: usize) -> Self {
        Self {
            embeddings: HashMap::new(),
            width: Some(width),
        }
    }

    pub fn width(&self) -> Option<usize> {
        self.width
    }

    pub fn insert(&mut self, frame: usize, embedding: Array1<f32>) {
        self.embeddings.insert(frame, embedding);
    }

    pub fn get(&self, frame: usize) -> Option<&Array1<f32>> {
        self.embeddings.get(&frame)
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.embeddings.contains_key(&frame)
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// `(timesteps, features)` embedding matrix for one session.
    pub fn session_matrix(&self, session: &Session) -> Result<Array2<f32>> {
        let rows = session
            .frames()
            .map(|frame| {
                self.get(frame)
                    .map(|embedding| embedding.view())
                    .ok_or(AnalysisError::MissingEmbedding(frame))
            })
            .collect::<Result<Vec<_>>>()?;
        ndarray::stack(Axis(0), &rows).map_err(|e| AnalysisError::ShapeMismatch(e.to_string()))
    }
}

/// Embeds every frame in `frames` that is not already cached.
///
/// Frames are decoded and passed to the model in batches of `batch_size`.
pub fn embed_frames<V, M>(
    model: &mut M,
    video: &mut V,
    normalization: &Normalization,
    frames: &[usize],
    batch_size: usize,
    cache: &mut EmbeddingCache,
) -> Result<()>
where
    V: VideoSource + ?Sized,
    M: ContactModel + ?Sized,
{
    let mut seen = HashSet::with_capacity(frames.len());
    let pending: Vec<usize> = frames
        .iter()
        .copied()
        .filter(|&frame| !cache.contains(frame) && seen.insert(frame))
        .collect();

    for batch in pending.chunks(batch_size.max(1)) {
        let decoded = video.frames(batch)?;
        let input = normalization.batch(&decoded)?;
        let embeddings = model.embed(&input)?;
        if embeddings.nrows() != batch.len() {
            return Err(AnalysisError::ShapeMismatch(format!(
                "model returned {} embeddings for {} frames",
                embeddings.nrows(),
                batch.len()
            )));
        }
        if let Some(width) = cache.width() {
            if embeddings.ncols() != width {
                return Err(AnalysisError::ShapeMismatch(format!(
                    "model returned {} features per frame, expected {}",
                    embeddings.ncols(),
                    width
                )));
            }
        }
        for (&frame, embedding) in batch.iter().zip(embeddings.outer_iter()) {
            cache.insert(frame, embedding.to_owned());
        }
        debug!("Embedded {} frames starting at {}", batch.len(), batch[0]);
    }

    Ok(())
}

/// Classifies each session from cached embeddings.
pub fn classify_sessions<M>(
    model: &mut M,
    cache: &EmbeddingCache,
    sessions: &[Session],
    batch_size: usize,
) -> Result<Predictions>
where
    M: ContactModel + ?Sized,
{
    let mut predictions = Predictions::new();

    for batch in sessions.chunks(batch_size.max(1)) {
        let rows = batch
            .iter()
            .map(|session| cache.session_matrix(session))
            .collect::<Result<Vec<_>>>()?;
        let input = stack_sessions(&rows)?;
        let output = model.classify(&input)?;
        if output.nrows() != batch.len() {
            return Err(AnalysisError::ShapeMismatch(format!(
                "model returned {} predictions for {} sessions",
                output.nrows(),
                batch.len()
            )));
        }
        for (session, distribution) in batch.iter().zip(output.outer_iter()) {
            predictions.insert(session.start, distribution.to_owned());
        }
    }

    Ok(predictions)
}
