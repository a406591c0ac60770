//! Video frame access.
//!
//! Frames are `height x width x 3` RGB arrays. The `ffmpeg` implementation
//! shells out to `ffprobe`/`ffmpeg`; `MemoryVideo` holds decoded frames
//! in memory.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use ndarray::Array3;
use serde::Deserialize;

use crate::types::*;

/// Random-access source of decoded video frames.
pub trait VideoSource {
    /// Decodes the frame shown at `seconds`.
    fn frame_at_time(&mut self, seconds: f64) -> Result<Array3<u8>>;

    /// Duration in seconds
    fn duration(&self) -> f64;

    /// Frames per second
    fn fps(&self) -> f64;

    /// Frame size as `(width, height)`
    fn size(&self) -> (usize, usize);

    /// Number of whole frames in the video.
    fn frame_count(&self) -> usize {
        (self.duration() * self.fps()).floor().max(0.0) as usize
    }

    /// Decodes a frame by index.
    fn frame(&mut self, index: usize) -> Result<Array3<u8>> {
        let available = self.frame_count();
        if index >= available {
            return Err(AnalysisError::FrameOutOfRange {
                frame: index,
                available,
            });
        }
        let fps = self.fps();
        self.frame_at_time(index as f64 * (1.0 / fps))
    }

    /// Decodes several frames in order.
    fn frames(&mut self, indices: &[usize]) -> Result<Vec<Array3<u8>>> {
        indices.iter().map(|&index| self.frame(index)).collect()
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: usize,
    height: usize,
    r_frame_rate: String,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Video decoded through the `ffmpeg` command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegVideo {
    path: PathBuf,
    width: usize,
    height: usize,
    fps: f64,
    duration: f64,
}

impl FfmpegVideo {
    /// Probes the first video stream of `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(AnalysisError::Video(format!(
                "video not found: {}",
                path.display()
            )));
        }

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(&path)
            .output()
            .map_err(|e| AnalysisError::Video(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(AnalysisError::Video(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)?;
        let video = Self::from_probe(path, probe)?;

        info!(
            "Duration of video (s): {:.2}, FPS: {:.3}, Dimensions: {}x{}",
            video.duration, video.fps, video.width, video.height
        );

        Ok(video)
    }

    fn from_probe(path: PathBuf, probe: ProbeOutput) -> Result<Self> {
        let stream = probe
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::Video(format!("no video stream in {}", path.display())))?;

        let fps = parse_frame_rate(&stream.r_frame_rate)?;
        let duration = stream
            .duration
            .or_else(|| probe.format.and_then(|format| format.duration))
            .ok_or_else(|| AnalysisError::Video("video duration unknown".into()))?;
        let duration = duration
            .trim()
            .parse::<f64>()
            .map_err(|_| AnalysisError::Video(format!("bad duration '{}'", duration)))?;

        Ok(Self {
            path,
            width: stream.width,
            height: stream.height,
            fps,
            duration,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.width * self.height * 3
    }

    /// Decodes `count` consecutive frames starting at `start` with one process.
    fn decode_run(&self, start: usize, count: usize) -> Result<Vec<Array3<u8>>> {
        let seconds = start as f64 / self.fps;
        debug!("Decoding {} frames from frame {}", count, start);

        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-ss"])
            .arg(format!("{:.6}", seconds))
            .arg("-i")
            .arg(&self.path)
            .args(["-frames:v"])
            .arg(count.to_string())
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .output()
            .map_err(|e| AnalysisError::Video(format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(AnalysisError::Video(format!(
                "ffmpeg failed at {:.3}s: {}",
                seconds,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let frame_bytes = self.frame_bytes();
        if output.stdout.len() < frame_bytes * count {
            return Err(AnalysisError::Video(format!(
                "expected {} frames from {:.3}s, decoded {} bytes",
                count,
                seconds,
                output.stdout.len()
            )));
        }

        output
            .stdout
            .chunks_exact(frame_bytes)
            .take(count)
            .map(|chunk| {
                Array3::from_shape_vec((self.height, self.width, 3), chunk.to_vec())
                    .map_err(|e| AnalysisError::ShapeMismatch(e.to_string()))
            })
            .collect()
    }
}

impl VideoSource for FfmpegVideo {
    fn frame_at_time(&mut self, seconds: f64) -> Result<Array3<u8>> {
        let index = (seconds * self.fps + 1e-5).floor() as usize;
        let mut frames = self.decode_run(index, 1)?;
        frames
            .pop()
            .ok_or_else(|| AnalysisError::Video(format!("no frame at {:.3}s", seconds)))
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn frames(&mut self, indices: &[usize]) -> Result<Vec<Array3<u8>>> {
        let available = self.frame_count();
        if let Some(&bad) = indices.iter().find(|&&index| index >= available) {
            return Err(AnalysisError::FrameOutOfRange {
                frame: bad,
                available,
            });
        }

        // Batches are mostly consecutive frames; decode each run in one pass
        let mut decoded = Vec::with_capacity(indices.len());
        let mut run_start = 0;
        while run_start < indices.len() {
            let mut run_end = run_start + 1;
            while run_end < indices.len() && indices[run_end] == indices[run_end - 1] + 1 {
                run_end += 1;
            }
            decoded.extend(self.decode_run(indices[run_start], run_end - run_start)?);
            run_start = run_end;
        }
        Ok(decoded)
    }
}

/// Parses an ffprobe rate such as `30000/1001` or `30`.
fn parse_frame_rate(rate: &str) -> Result<f64> {
    let bad_rate = || AnalysisError::Video(format!("bad frame rate '{}'", rate));
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| bad_rate())?;
            let den: f64 = den.trim().parse().map_err(|_| bad_rate())?;
            if den == 0.0 {
                return Err(bad_rate());
            }
            num / den
        }
        None => rate.trim().parse().map_err(|_| bad_rate())?,
    };
    if fps <= 0.0 {
        return Err(bad_rate());
    }
    Ok(fps)
}

/// Frames held in memory, for pre-decoded clips and tests.
#[derive(Debug, Clone)]
pub struct MemoryVideo {
    frames: Vec<Array3<u8>>,
    fps: f64,
    decoded: usize,
}

impl MemoryVideo {
    pub fn new(frames: Vec<Array3<u8>>, fps: f64) -> Self {
        Self {
            frames,
            fps,
            decoded: 0,
        }
    }

    /// Number of frames handed out so far.
    pub fn decoded(&self) -> usize {
        self.decoded
    }
}

impl VideoSource for MemoryVideo {
    fn frame_at_time(&mut self, seconds: f64) -> Result<Array3<u8>> {
        let index = (seconds * self.fps + 1e-5).floor() as usize;
        let frame = self
            .frames
            .get(index)
            .cloned()
            .ok_or(AnalysisError::FrameOutOfRange {
                frame: index,
                available: self.frames.len(),
            })?;
        self.decoded += 1;
        Ok(frame)
    }

    fn duration(&self) -> f64 {
        self.frames.len() as f64 / self.fps
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn size(&self) -> (usize, usize) {
        self.frames
            .first()
            .map(|frame| (frame.shape()[1], frame.shape()[0]))
            .unwrap_or((0, 0))
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rates() {
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 1e-3);
        assert_eq!(parse_frame_rate("250/1").unwrap(), 250.0);
        assert_eq!(parse_frame_rate("60").unwrap(), 60.0);
        assert!(parse_frame_rate("0/0").is_err());
        assert!(parse_frame_rate("abc").is_err());
    }

    #[test]
    fn probe_json() {
        let json = r#"{
            "programs": [],
            "streams": [{"width": 336, "height": 280, "r_frame_rate": "250/1"}],
            "format": {"duration": "12.000000"}
        }"#;
        let probe: ProbeOutput = serde_json::from_str(json).unwrap();
        let video = FfmpegVideo::from_probe(PathBuf::from("runWisk.mp4"), probe).unwrap();
        assert_eq!(video.size(), (336, 280));
        assert_eq!(video.fps(), 250.0);
        assert_eq!(video.frame_count(), 3000);
    }

    #[test]
    fn memory_video_indexing() {
        let frames = (0..5u8)
            .map(|i| Array3::from_elem((2, 3, 3), i))
            .collect::<Vec<_>>();
        let mut video = MemoryVideo::new(frames, 250.0);
        assert_eq!(video.frame_count(), 5);
        assert_eq!(video.size(), (3, 2));
        assert_eq!(video.frame(3).unwrap()[[0, 0, 0]], 3);
        assert_eq!(video.frames(&[0, 4]).unwrap()[1][[1, 2, 2]], 4);
        assert!(matches!(
            video.frame(5),
            Err(AnalysisError::FrameOutOfRange { frame: 5, available: 5 })
        ));
        assert_eq!(video.decoded(), 3);
    }
}
