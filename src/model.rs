//! Pretrained model boundary.
//!
//! The contact network is used in two stages: `embed` turns normalized
//! frames into feature vectors and `classify` turns stacks of `timesteps`
//! vectors into a distribution over the contact offset, where the last class
//! means no contact. Implementations must be deterministic: the result for
//! one item may not depend on what else is in the batch.

use ndarray::{s, Array2, Array3, Array4, ArrayView2, Axis};

use crate::config::{CropConfig, ModelConfig};
use crate::types::*;

/// Two-stage whisker contact model.
pub trait ContactModel {
    /// `(N, H, W, 1)` normalized frames to `(N, F)` embeddings.
    fn embed(&mut self, frames: &Array4<f32>) -> Result<Array2<f32>>;

    /// `(N, T, F)` embedding sequences to `(N, T + 1)` class probabilities.
    fn classify(&mut self, sessions: &Array3<f32>) -> Result<Array2<f32>>;
}

/// Predicts a whisker-pad heatmap for each frame, `(N, h, w, 1)`.
pub trait KeypointModel {
    fn heatmaps(&mut self, frames: &Array4<f32>) -> Result<Array4<f32>>;
}

/// Feature backbone run on pooled crops, `(N, h, w, 1)` to `(N, F)`.
pub trait EmbeddingBackbone {
    fn features(&mut self, crops: &Array4<f32>) -> Result<Array2<f32>>;
}

/// Temporal classifier over embedding sequences.
pub trait SequenceClassifier {
    fn classify(&mut self, sessions: &Array3<f32>) -> Result<Array2<f32>>;
}

/// Frame pixel normalization applied before the keypoint model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
    pub height: usize,
    pub width: usize,
}

impl Normalization {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            mean: config.mean,
            std: config.std,
            height: config.input_height,
            width: config.input_width,
        }
    }

    /// Inverted, standardized first channel of each frame as `(N, H, W, 1)`.
    pub fn batch(&self, frames: &[Array3<u8>]) -> Result<Array4<f32>> {
        let mut batch = Array4::<f32>::zeros((frames.len(), self.height, self.width, 1));
        for (n, frame) in frames.iter().enumerate() {
            let shape = frame.shape();
            if shape[0] != self.height || shape[1] != self.width {
                return Err(AnalysisError::ShapeMismatch(format!(
                    "frame is {}x{}, model expects {}x{}",
                    shape[1], shape[0], self.width, self.height
                )));
            }
            let channel = frame.slice(s![.., .., 0]);
            batch
                .slice_mut(s![n, .., .., 0])
                .zip_mut_with(&channel, |out, &pixel| {
                    *out = ((1.0 - pixel as f32 / 255.0) - self.mean) / self.std;
                });
        }
        Ok(batch)
    }
}

/// Contact model built from a keypoint stage, a crop, and a backbone.
///
/// Each frame is cropped around the heatmap maximum, offset by the configured
/// amounts and kept inside the frame, then max-pooled before the backbone.
pub struct CroppedContactModel<K, B, S> {
    keypoints: K,
    backbone: B,
    classifier: S,
    crop: CropConfig,
}

impl<K, B, S> CroppedContactModel<K, B, S>
where
    K: KeypointModel,
    B: EmbeddingBackbone,
    S: SequenceClassifier,
{
    pub fn new(keypoints: K, backbone: B, classifier: S, crop: CropConfig) -> Self {
        Self {
            keypoints,
            backbone,
            classifier,
            crop,
        }
    }

    /// Cropped and pooled inputs for the backbone, `(N, h, w, 1)`.
    pub fn crops(&mut self, frames: &Array4<f32>) -> Result<Array4<f32>> {
        let (n, height, width, _) = frames.dim();
        let size = self.crop.size;
        if height < size || width < size {
            return Err(AnalysisError::ShapeMismatch(format!(
                "crop of {} does not fit a {}x{} frame",
                size, width, height
            )));
        }

        let heatmaps = self.keypoints.heatmaps(frames)?;
        if heatmaps.dim().0 != n {
            return Err(AnalysisError::ShapeMismatch(format!(
                "keypoint model returned {} heatmaps for {} frames",
                heatmaps.dim().0,
                n
            )));
        }

        let pool = self.crop.pool;
        let pooled = size.div_ceil(pool);
        let mut crops = Array4::<f32>::zeros((n, pooled, pooled, 1));
        for i in 0..n {
            let heatmap = heatmaps.slice(s![i, .., .., 0]);
            let (row, col) = heatmap_peak(heatmap, height, width);
            let top = clamp_origin(row as i64 - (size / 2) as i64 + self.crop.h_offset, height - size);
            let left = clamp_origin(col as i64 - (size / 2) as i64 + self.crop.w_offset, width - size);
            let window = frames.slice(s![i, top..top + size, left..left + size, 0]);
            crops
                .slice_mut(s![i, .., .., 0])
                .assign(&max_pool(window, pool));
        }
        Ok(crops)
    }
}

impl<K, B, S> ContactModel for CroppedContactModel<K, B, S>
where
    K: KeypointModel,
    B: EmbeddingBackbone,
    S: SequenceClassifier,
{
    fn embed(&mut self, frames: &Array4<f32>) -> Result<Array2<f32>> {
        let crops = self.crops(frames)?;
        self.backbone.features(&crops)
    }

    fn classify(&mut self, sessions: &Array3<f32>) -> Result<Array2<f32>> {
        self.classifier.classify(sessions)
    }
}

/// Location of the first heatmap maximum, scaled to frame coordinates.
fn heatmap_peak(heatmap: ArrayView2<f32>, height: usize, width: usize) -> (usize, usize) {
    let (rows, cols) = heatmap.dim();
    let mut best = (0, 0);
    let mut best_value = f32::NEG_INFINITY;
    for ((row, col), &value) in heatmap.indexed_iter() {
        if value > best_value {
            best_value = value;
            best = (row, col);
        }
    }
    if rows == 0 || cols == 0 {
        return (0, 0);
    }
    (best.0 * height / rows, best.1 * width / cols)
}

fn clamp_origin(origin: i64, max: usize) -> usize {
    origin.clamp(0, max as i64) as usize
}

/// `pool x pool` max pooling with partial windows kept at the edges.
fn max_pool(input: ArrayView2<f32>, pool: usize) -> Array2<f32> {
    let (rows, cols) = input.dim();
    let out_rows = rows.div_ceil(pool);
    let out_cols = cols.div_ceil(pool);
    Array2::from_shape_fn((out_rows, out_cols), |(r, c)| {
        let block = input.slice(s![
            r * pool..((r + 1) * pool).min(rows),
            c * pool..((c + 1) * pool).min(cols)
        ]);
        block.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))
    })
}

/// Stacks per-session embedding rows into a `(N, T, F)` batch.
pub(crate) fn stack_sessions(rows: &[Array2<f32>]) -> Result<Array3<f32>> {
    let views: Vec<_> = rows.iter().map(|row| row.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| AnalysisError::ShapeMismatch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    /// Heatmap with a single peak at a fixed position.
    struct FixedPeak(usize, usize);

    impl KeypointModel for FixedPeak {
        fn heatmaps(&mut self, frames: &Array4<f32>) -> Result<Array4<f32>> {
            let (n, h, w, _) = frames.dim();
            let mut maps = Array4::zeros((n, h, w, 1));
            for i in 0..n {
                maps[[i, self.0, self.1, 0]] = 1.0;
            }
            Ok(maps)
        }
    }

    /// Mean of the crop as a one-element embedding.
    struct MeanBackbone;

    impl EmbeddingBackbone for MeanBackbone {
        fn features(&mut self, crops: &Array4<f32>) -> Result<Array2<f32>> {
            let n = crops.dim().0;
            let means: Array1<f32> = (0..n)
                .map(|i| crops.slice(s![i, .., .., 0]).mean().unwrap_or(0.0))
                .collect();
            Ok(means.insert_axis(Axis(1)))
        }
    }

    struct Uniform;

    impl SequenceClassifier for Uniform {
        fn classify(&mut self, sessions: &Array3<f32>) -> Result<Array2<f32>> {
            let (n, t, _) = sessions.dim();
            Ok(Array2::from_elem((n, t + 1), 1.0 / (t + 1) as f32))
        }
    }

    fn small_crop() -> CropConfig {
        CropConfig {
            size: 4,
            w_offset: 0,
            h_offset: 0,
            pool: 2,
        }
    }

    #[test]
    fn normalization_inverts_and_standardizes() {
        let norm = Normalization {
            mean: 0.257,
            std: 0.288,
            height: 2,
            width: 2,
        };
        let mut frame = Array3::<u8>::zeros((2, 2, 3));
        frame[[0, 0, 0]] = 255;
        frame[[1, 1, 1]] = 255;
        let batch = norm.batch(&[frame]).unwrap();
        assert_eq!(batch.dim(), (1, 2, 2, 1));
        assert!((batch[[0, 0, 0, 0]] - (-0.257 / 0.288)).abs() < 1e-6);
        assert!((batch[[0, 1, 1, 0]] - ((1.0 - 0.257) / 0.288)).abs() < 1e-6);
    }

    #[test]
    fn normalization_rejects_wrong_size() {
        let norm = Normalization {
            mean: 0.0,
            std: 1.0,
            height: 4,
            width: 4,
        };
        assert!(norm.batch(&[Array3::zeros((4, 5, 3))]).is_err());
    }

    #[test]
    fn max_pool_keeps_partial_edges() {
        let input = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let pooled = max_pool(input.view(), 2);
        assert_eq!(pooled, array![[5.0, 6.0], [8.0, 9.0]]);
    }

    #[test]
    fn crop_follows_peak_and_stays_inside() {
        let frames = Array4::from_shape_fn((1, 8, 8, 1), |(_, r, c, _)| (r * 8 + c) as f32);
        let mut model = CroppedContactModel::new(FixedPeak(4, 4), MeanBackbone, Uniform, small_crop());
        let crops = model.crops(&frames).unwrap();
        // crop rows/cols 2..6, pooled maxima at odd offsets
        assert_eq!(crops.dim(), (1, 2, 2, 1));
        assert_eq!(crops[[0, 0, 0, 0]], 27.0);
        assert_eq!(crops[[0, 1, 1, 0]], 45.0);

        let mut model = CroppedContactModel::new(FixedPeak(7, 0), MeanBackbone, Uniform, small_crop());
        let crops = model.crops(&frames).unwrap();
        // clamped to rows 4..8, cols 0..4
        assert_eq!(crops[[0, 0, 0, 0]], 41.0);
        assert_eq!(crops[[0, 1, 1, 0]], 59.0);
    }

    #[test]
    fn embed_and_classify_shapes() {
        let frames = Array4::zeros((3, 8, 8, 1));
        let mut model = CroppedContactModel::new(FixedPeak(0, 0), MeanBackbone, Uniform, small_crop());
        assert_eq!(model.embed(&frames).unwrap().dim(), (3, 1));
        let sessions = Array3::zeros((2, 10, 1));
        assert_eq!(model.classify(&sessions).unwrap().dim(), (2, 11));
    }
}
