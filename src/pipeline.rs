use std::fs::File;
use std::path::Path;
use std::time::Instant;

use log::{debug, info};

use crate::aggregate::{accumulate, ScoreMap};
use crate::config::AnalysisConfig;
use crate::events::ObstacleOnsets;
use crate::features::FeatureTable;
use crate::inference::{classify_sessions, embed_frames, EmbeddingCache};
use crate::locator::{locate_obstacle_frame, ObstacleDetector};
use crate::model::{ContactModel, Normalization};
use crate::types::*;
use crate::video::VideoSource;
use crate::window::{build_window, CandidateWindow, Session, WindowParams};

const PRINT_PROGRESS_STEP: usize = 10;

/// What happened while processing one obstacle event.
#[derive(Debug, Clone)]
pub struct EventReport {
    /// Frame of the obstacle-on timestamp
    pub onset: usize,
    /// Frame where the obstacle was first visible
    pub located: Option<usize>,
    pub window: Option<CandidateWindow>,
    pub scores: ScoreMap,
    pub answer: Option<ContactAnswer>,
}

/// Runs contact detection over the obstacle events of one session.
///
/// All per-event state (embeddings, predictions, scores) is created inside
/// `process_event` and dropped before the next event starts.
pub struct ContactPipeline<'a, V: ?Sized, M: ?Sized, D: ?Sized> {
    video: &'a mut V,
    model: &'a mut M,
    detector: &'a D,
    features: &'a FeatureTable,
    config: &'a AnalysisConfig,
    normalization: Normalization,
}

impl<'a, V, M, D> ContactPipeline<'a, V, M, D>
where
    V: VideoSource + ?Sized,
    M: ContactModel + ?Sized,
    D: ObstacleDetector + ?Sized,
{
    pub fn new(
        video: &'a mut V,
        model: &'a mut M,
        detector: &'a D,
        features: &'a FeatureTable,
        config: &'a AnalysisConfig,
    ) -> Self {
        Self {
            normalization: Normalization::new(&config.model),
            video,
            model,
            detector,
            features,
            config,
        }
    }

    fn window_params(&self) -> WindowParams {
        WindowParams::new(
            self.config.model.timesteps,
            self.config.window.nose_clearance,
            self.video.duration(),
            self.video.fps(),
            self.config.window.end_margin,
            self.features.len().min(self.video.frame_count()),
        )
    }

    /// Locates, embeds, classifies and scores one obstacle event.
    pub fn process_event(&mut self, onset: usize) -> Result<EventReport> {
        let mut report = EventReport {
            onset,
            located: None,
            window: None,
            scores: ScoreMap::new(),
            answer: None,
        };

        let located = match locate_obstacle_frame(self.video, self.detector, self.features, onset)? {
            Some(frame) => frame,
            None => return Ok(report),
        };
        report.located = Some(located);

        let window = match build_window(self.features, located, &self.window_params()) {
            Some(window) => window,
            None => return Ok(report),
        };

        let model_config = &self.config.model;
        let mut cache = EmbeddingCache::with_width(model_config.num_features);
        embed_frames(
            self.model,
            self.video,
            &self.normalization,
            &window.need_frames,
            model_config.batch_size,
            &mut cache,
        )?;

        let sessions: Vec<Session> = window.sessions().collect();
        let predictions = classify_sessions(self.model, &cache, &sessions, model_config.batch_size)?;

        let scores = accumulate(
            predictions
                .iter()
                .map(|(&start, distribution)| (start, distribution.view())),
            model_config.timesteps,
            &model_config.prob_distribution,
        )?;

        report.answer = scores.best();
        report.scores = scores;
        report.window = Some(window);

        debug!(
            "Event at frame {}: obstacle visible at {}, answer {:?}",
            onset, located, report.answer
        );

        Ok(report)
    }

    /// Processes every event in `onsets` and returns answers by frame number.
    pub fn run(&mut self, onsets: &ObstacleOnsets) -> Result<Vec<ContactAnswer>> {
        let tic = Instant::now();
        let events = onsets.event_frames();
        info!("Processing {} obstacle events...", events.len());

        let mut answers = Vec::new();
        let mut percent_done = PRINT_PROGRESS_STEP;
        for (i, &onset) in events.iter().enumerate() {
            let report = self.process_event(onset)?;
            if let Some(answer) = report.answer {
                answers.push(answer);
            }

            let progress = ((i + 1) as f64 / events.len() as f64) * 100.0;
            while progress >= percent_done as f64 && percent_done <= 100 {
                info!("{}% done...", percent_done);
                percent_done += PRINT_PROGRESS_STEP;
            }
        }

        answers.sort_by_key(|answer| answer.framenum);

        info!(
            "Found {} contacts in {} events. Elapsed time: {:.1} seconds",
            answers.len(),
            events.len(),
            tic.elapsed().as_secs_f64()
        );

        Ok(answers)
    }
}

/// Writes answers as `framenum,confidence` rows with a header.
pub fn write_answers<P: AsRef<Path>>(path: P, answers: &[ContactAnswer]) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = csv::Writer::from_writer(file);
    for answer in answers {
        writer.serialize(answer)?;
    }
    // Header is only written with the first row
    if answers.is_empty() {
        writer.write_record(["framenum", "confidence"])?;
    }
    writer.flush()?;
    info!("Wrote {} answers to {}", answers.len(), path.as_ref().display());
    Ok(())
}

/// Reads back a `whiskerAnalyzed.csv` file.
pub fn read_answers<P: AsRef<Path>>(path: P) -> Result<Vec<ContactAnswer>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut answers = Vec::new();
    for answer in reader.deserialize() {
        answers.push(answer?);
    }
    Ok(answers)
}
