use log::{debug, warn};
use ndarray::{s, Array3};

use crate::config::LocatorConfig;
use crate::features::FeatureTable;
use crate::types::*;
use crate::video::VideoSource;

/// Decides whether the obstacle is in view in a decoded frame.
pub trait ObstacleDetector {
    fn is_obstacle_visible(&self, frame: &Array3<u8>) -> bool;
}

/// Looks for the dark obstacle entering at the right edge of the frame.
///
/// Counts pixels in the rightmost `strip_width` columns of the first color
/// channel that are darker than `dark_threshold`.
#[derive(Debug, Clone, Copy)]
pub struct DarkStripDetector {
    strip_width: usize,
    dark_threshold: u8,
    min_dark_pixels: usize,
}

impl DarkStripDetector {
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            strip_width: config.strip_width,
            dark_threshold: config.dark_threshold,
            min_dark_pixels: config.min_dark_pixels,
        }
    }

    pub fn dark_pixels(&self, frame: &Array3<u8>) -> usize {
        let width = frame.shape()[1];
        let first_column = width.saturating_sub(self.strip_width);
        frame
            .slice(s![.., first_column.., 0])
            .iter()
            .filter(|&&value| value < self.dark_threshold)
            .count()
    }
}

impl Default for DarkStripDetector {
    fn default() -> Self {
        Self::new(&LocatorConfig::default())
    }
}

impl ObstacleDetector for DarkStripDetector {
    fn is_obstacle_visible(&self, frame: &Array3<u8>) -> bool {
        self.dark_pixels(frame) >= self.min_dark_pixels
    }
}

/// Advances from `onset` to the first frame where the obstacle is visible.
///
/// Returns `None` if the search runs off the end of the feature table or the
/// video before the obstacle appears.
pub fn locate_obstacle_frame<V, D>(
    video: &mut V,
    detector: &D,
    features: &FeatureTable,
    onset: usize,
) -> Result<Option<usize>>
where
    V: VideoSource + ?Sized,
    D: ObstacleDetector + ?Sized,
{
    let limit = features.len().min(video.frame_count());
    let mut frame = onset;

    while frame < limit {
        let image = video.frame(frame)?;
        if detector.is_obstacle_visible(&image) {
            debug!("Obstacle visible at frame {} (onset {})", frame, onset);
            return Ok(Some(frame));
        }
        frame += 1;
    }

    warn!(
        "Obstacle never became visible after onset frame {} ({} frames available)",
        onset, limit
    );
    Ok(None)
}
