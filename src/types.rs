use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Tracked pose values for a single video frame.
///
/// Positions are in video pixel coordinates as written by the tracking
/// stage. Only the columns used by contact detection are kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    /// Nose x position (px)
    pub nose_x: f64,
    /// Nose y position (px)
    pub nose_y: f64,
    /// Obstacle x position (px)
    pub obstacle_x: f64,
    /// Obstacle y position (px)
    pub obstacle_y: f64,
    /// Obstacle detector confidence
    /// - 1: confident detection
    /// - anything else: not trusted
    pub obstacle_confidence: f64,
}

impl FeatureRow {
    /// Nose position truncated to whole pixels.
    pub fn nose_px(&self) -> (i64, i64) {
        (self.nose_x.trunc() as i64, self.nose_y.trunc() as i64)
    }

    /// Obstacle position truncated to whole pixels.
    pub fn obstacle_px(&self) -> (i64, i64) {
        (self.obstacle_x.trunc() as i64, self.obstacle_y.trunc() as i64)
    }

    /// Returns true while the mouse may still be approaching the obstacle.
    ///
    /// The approach is over once the nose is at least `clearance` pixels
    /// past the obstacle and the obstacle detection is confident.
    pub fn is_approaching(&self, clearance: i64) -> bool {
        self.nose_px().0 - self.obstacle_px().0 < clearance || self.obstacle_confidence != 1.0
    }
}

/// One detected whisker contact.
///
/// This is the row type of the `whiskerAnalyzed.csv` output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactAnswer {
    /// Absolute video frame of the estimated first contact
    pub framenum: usize,
    /// Accumulated weight at the winning frame
    pub confidence: f64,
}

/// Error types for the analysis pipelines.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A file did not have the expected format
    #[error("Unrecognized file format: {0}")]
    UnrecognizedFileFormat(String),
    /// A binary file ended in the middle of a record
    #[error("File size error: {0}")]
    FileSizeError(String),
    /// A required variable was missing from a MATLAB file
    #[error("Variable '{0}' not found")]
    MissingVariable(String),
    /// A requested channel file was not found
    #[error("Channel not found: {0}")]
    ChannelNotFound(PathBuf),
    /// A frame index fell outside the loaded data
    #[error("Frame {frame} out of range (only {available} available)")]
    FrameOutOfRange { frame: usize, available: usize },
    /// An embedding needed by a session was never computed
    #[error("No embedding cached for frame {0}")]
    MissingEmbedding(usize),
    /// Array dimensions did not line up
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Malformed values in an input file or configuration
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// The video decoder failed
    #[error("Video error: {0}")]
    Video(String),
    /// The pretrained model failed to load or run
    #[error("Model error: {0}")]
    Model(String),
    /// Error from the MATLAB file parser
    #[error("MAT file error: {0}")]
    MatFile(String),
    /// An I/O error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A general error with a custom message
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
