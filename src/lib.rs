pub mod aggregate;
pub mod config;
pub mod ephys;
pub mod events;
pub mod features;
pub mod inference;
pub mod locator;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod types;
pub mod video;
pub mod window;

// Re-export types
pub use config::{load_config, save_config, AnalysisConfig, PackConfig, ReferenceScheme};
pub use ephys::{pack, PackSummary};
pub use model::ContactModel;
pub use pipeline::{write_answers, ContactPipeline};
pub use types::*;

use events::EventTimes;
use features::FeatureTable;
use locator::DarkStripDetector;
use video::FfmpegVideo;

/// Detects whisker contacts for one session and writes `whiskerAnalyzed.csv`.
///
/// Loads the session video, tracked features and event timestamps named in
/// `config`, runs `model` over every obstacle event, and returns the answers
/// that were written.
///
/// # Examples
///
/// ```no_run
/// use obstacle_analysis::{analyze_session, AnalysisConfig, ContactModel, Result};
/// use ndarray::{Array2, Array3, Array4};
///
/// struct NoContact;
///
/// impl ContactModel for NoContact {
///     fn embed(&mut self, frames: &Array4<f32>) -> Result<Array2<f32>> {
///         Ok(Array2::zeros((frames.dim().0, 1)))
///     }
///     fn classify(&mut self, sessions: &Array3<f32>) -> Result<Array2<f32>> {
///         let (n, t, _) = sessions.dim();
///         let mut out = Array2::zeros((n, t + 1));
///         out.column_mut(t).fill(1.0);
///         Ok(out)
///     }
/// }
///
/// let config = AnalysisConfig::new("/data/obstacleData/sessions", "200202_000");
/// let answers = analyze_session(&config, &mut NoContact).unwrap();
/// assert!(answers.is_empty());
/// ```
pub fn analyze_session<M: ContactModel + ?Sized>(
    config: &AnalysisConfig,
    model: &mut M,
) -> Result<Vec<ContactAnswer>> {
    config.validate()?;

    let mut video = FfmpegVideo::open(config.video_path())?;
    let features = FeatureTable::load(config.features_path())?;
    let onsets = EventTimes::load(config.events_path())?.onsets()?;
    let detector = DarkStripDetector::new(&config.locator);

    let answers =
        ContactPipeline::new(&mut video, model, &detector, &features, config).run(&onsets)?;
    write_answers(config.output_path(), &answers)?;
    Ok(answers)
}
