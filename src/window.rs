//! Candidate frames around one obstacle approach.
//!
//! From the frame where the obstacle appears, the approach continues while
//! the nose has not cleared the obstacle (or the obstacle tracking is not
//! confident). Every frame of the approach plus `timesteps` look-ahead frames
//! need an embedding; every approach frame away from the video edges starts
//! one classified session.

use std::ops::Range;

use log::{debug, warn};

use crate::features::FeatureTable;

/// Bounds and thresholds for building candidate windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
    /// Frames per session
    pub timesteps: usize,
    /// Nose-past-obstacle distance (px) that ends the approach
    pub nose_clearance: i64,
    /// Latest frame allowed to start a session
    pub last_session_start: i64,
    /// Number of frames that exist in both the video and the feature table
    pub frame_limit: usize,
}

impl WindowParams {
    /// Derives the session bounds from the video timing.
    ///
    /// Sessions may not start within `end_margin` frames of the video end.
    pub fn new(
        timesteps: usize,
        nose_clearance: i64,
        duration: f64,
        fps: f64,
        end_margin: usize,
        frame_limit: usize,
    ) -> Self {
        Self {
            timesteps,
            nose_clearance,
            last_session_start: (duration * fps - end_margin as f64).trunc() as i64,
            frame_limit,
        }
    }
}

/// One classification unit: `len` consecutive frames from `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Session {
    pub start: usize,
    pub len: usize,
}

impl Session {
    pub fn frames(&self) -> Range<usize> {
        self.start..self.start + self.len
    }
}

/// Frames to embed and sessions to classify for one obstacle event.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateWindow {
    /// Frame where the obstacle was first visible
    pub start: usize,
    /// First frame after the approach
    pub exit: usize,
    /// Frames needing an embedding, ascending
    pub need_frames: Vec<usize>,
    /// Start frame of every session to classify, ascending
    pub session_starts: Vec<usize>,
    pub timesteps: usize,
}

impl CandidateWindow {
    pub fn sessions(&self) -> impl Iterator<Item = Session> + '_ {
        self.session_starts.iter().map(move |&start| Session {
            start,
            len: self.timesteps,
        })
    }

    /// Range of frames that any session of this window can reference.
    pub fn span(&self) -> Range<usize> {
        self.start..self.exit + self.timesteps
    }
}

/// Builds the candidate window for an approach starting at `start`.
///
/// Returns `None` when the approach or its look-ahead would run past
/// `frame_limit`.
pub fn build_window(
    features: &FeatureTable,
    start: usize,
    params: &WindowParams,
) -> Option<CandidateWindow> {
    let limit = params.frame_limit.min(features.len());

    let mut need_frames = Vec::new();
    let mut session_starts = Vec::new();
    let mut frame = start;

    loop {
        let row = match features.get(frame) {
            Some(row) if frame < limit => row,
            _ => {
                warn!(
                    "Approach from frame {} still unfinished at frame {}, skipping event",
                    start, frame
                );
                return None;
            }
        };
        if !row.is_approaching(params.nose_clearance) {
            break;
        }

        need_frames.push(frame);
        // Sessions too close to either end of the video are never proposed,
        // but the approach continues past them
        let too_early = frame < params.timesteps;
        let too_late = frame as i64 > params.last_session_start;
        if !too_early && !too_late {
            session_starts.push(frame);
        }
        frame += 1;
    }

    let exit = frame;
    if exit + params.timesteps > limit {
        warn!(
            "Look-ahead after frame {} passes the last frame ({}), skipping event",
            exit, limit
        );
        return None;
    }
    need_frames.extend(exit..exit + params.timesteps);

    debug!(
        "Window {}..{}: {} frames to embed, {} sessions",
        start,
        exit,
        need_frames.len(),
        session_starts.len()
    );

    Some(CandidateWindow {
        start,
        exit,
        need_frames,
        session_starts,
        timesteps: params.timesteps,
    })
}
