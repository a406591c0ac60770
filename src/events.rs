//! Obstacle-on events aligned to video frames.
//!
//! The behavioral rig records a timestamp for every video frame and for every
//! obstacle presentation. Each obstacle presentation is mapped to the first
//! frame recorded at or after it.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::info;
use matfile::{MatFile, NumericData};

use crate::types::*;

const FRAME_TIMESTAMPS_VARIABLE: &str = "frameTimeStamps";
const OBSTACLE_ON_VARIABLE: &str = "obsOnTimes";

/// Frame and obstacle-on timestamps for one session.
#[derive(Debug, Clone, Default)]
pub struct EventTimes {
    /// Capture time of every video frame (s), ascending
    pub frame_timestamps: Vec<f64>,
    /// Time of each obstacle presentation (s)
    pub obstacle_on_times: Vec<f64>,
}

impl EventTimes {
    /// Reads `frameTimeStamps` and `obsOnTimes` from a MATLAB file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mat = MatFile::parse(BufReader::new(file))
            .map_err(|e| AnalysisError::MatFile(format!("{:?}", e)))?;

        let times = Self {
            frame_timestamps: read_vector(&mat, FRAME_TIMESTAMPS_VARIABLE)?,
            obstacle_on_times: read_vector(&mat, OBSTACLE_ON_VARIABLE)?,
        };

        info!(
            "Loaded {} frame timestamps and {} obstacle events from {}",
            times.frame_timestamps.len(),
            times.obstacle_on_times.len(),
            path.as_ref().display()
        );

        Ok(times)
    }

    /// Marks the frame of every obstacle presentation.
    ///
    /// Presentations after the last frame are an error.
    pub fn onsets(&self) -> Result<ObstacleOnsets> {
        let num_frames = self.frame_timestamps.len();
        let mut indicator = vec![false; num_frames];

        for &time in &self.obstacle_on_times {
            let frame = self.frame_timestamps.partition_point(|&t| t < time);
            if frame >= num_frames {
                return Err(AnalysisError::FrameOutOfRange {
                    frame,
                    available: num_frames,
                });
            }
            indicator[frame] = true;
        }

        Ok(ObstacleOnsets::from_indicator(indicator))
    }
}

/// One-hot obstacle-on indicator per frame with its running count.
#[derive(Debug, Clone, Default)]
pub struct ObstacleOnsets {
    indicator: Vec<bool>,
    cumulative: Vec<usize>,
}

impl ObstacleOnsets {
    pub fn from_indicator(indicator: Vec<bool>) -> Self {
        let cumulative = indicator
            .iter()
            .scan(0usize, |count, &on| {
                if on {
                    *count += 1;
                }
                Some(*count)
            })
            .collect();
        Self {
            indicator,
            cumulative,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.indicator.len()
    }

    pub fn total(&self) -> usize {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Frames at which event processing starts.
    ///
    /// Scanning stops at the frame where the running count reaches the
    /// total, so the final presentation never yields an event.
    pub fn event_frames(&self) -> Vec<usize> {
        let total = self.total();
        let mut frames = Vec::new();
        for (frame, &on) in self.indicator.iter().enumerate() {
            if !on {
                continue;
            }
            if self.cumulative[frame] == total {
                break;
            }
            frames.push(frame);
        }
        frames
    }
}

fn read_vector(mat: &MatFile, name: &str) -> Result<Vec<f64>> {
    let array = mat
        .find_by_name(name)
        .ok_or_else(|| AnalysisError::MissingVariable(name.to_string()))?;

    let values = match array.data() {
        NumericData::Double { real, .. } => real.clone(),
        NumericData::Single { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::Int32 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::UInt32 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::Int64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::UInt64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        _ => {
            return Err(AnalysisError::MatFile(format!(
                "variable '{}' has an unsupported numeric type",
                name
            )))
        }
    };

    Ok(values)
}
