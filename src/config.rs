use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::aggregate::DEFAULT_PROB_DISTRIBUTION;
use crate::types::{AnalysisError, Result};

/// Configuration for one whisker-contact analysis run.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    pub base_dir: PathBuf,
    pub session: String,
    pub files: SessionFiles,
    pub model: ModelConfig,
    pub locator: LocatorConfig,
    pub window: WindowConfig,
}

/// File names inside `<base_dir>/<session>/`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionFiles {
    pub video: String,
    pub features: String,
    pub events: String,
    pub output: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub keypoint_model: String,
    pub backbone_model: String,
    pub sequence_model: String,
    /// Frames per classified session
    pub timesteps: usize,
    /// Frames or sessions per model call
    pub batch_size: usize,
    /// Embedding width produced by the backbone
    pub num_features: usize,
    pub input_height: usize,
    pub input_width: usize,
    pub mean: f32,
    pub std: f32,
    pub crop: CropConfig,
    /// Weight added per predicted contact offset
    pub prob_distribution: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CropConfig {
    pub size: usize,
    pub w_offset: i64,
    pub h_offset: i64,
    pub pool: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct LocatorConfig {
    /// Rightmost columns inspected for the obstacle
    pub strip_width: usize,
    /// Pixel values below this count as dark
    pub dark_threshold: u8,
    pub min_dark_pixels: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Nose must be this many pixels past the obstacle to end the approach
    pub nose_clearance: i64,
    /// Sessions may not start within this many frames of the video end
    pub end_margin: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            session: String::new(),
            files: SessionFiles::default(),
            model: ModelConfig::default(),
            locator: LocatorConfig::default(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for SessionFiles {
    fn default() -> Self {
        Self {
            video: "runWisk.mp4".to_string(),
            features: "trackedFeaturesRaw.csv".to_string(),
            events: "runAnalyzed.mat".to_string(),
            output: "whiskerAnalyzed.csv".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            keypoint_model: "cropWhiskers.onnx".to_string(),
            backbone_model: "largecrop.20-1.40.backbone.onnx".to_string(),
            sequence_model: "largecrop.20-1.40.sequence.onnx".to_string(),
            timesteps: 10,
            batch_size: 64,
            num_features: 5408,
            input_height: 280,
            input_width: 336,
            mean: 0.257,
            std: 0.288,
            crop: CropConfig::default(),
            prob_distribution: DEFAULT_PROB_DISTRIBUTION.to_vec(),
        }
    }
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            size: 200,
            w_offset: -50,
            h_offset: -75,
            pool: 2,
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            strip_width: 2,
            dark_threshold: 10,
            min_dark_pixels: 40,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            nose_clearance: 50,
            end_margin: 50,
        }
    }
}

impl AnalysisConfig {
    pub fn new<P: AsRef<Path>>(base_dir: P, session: &str) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            session: session.to_string(),
            ..Self::default()
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.base_dir.join(&self.session)
    }

    pub fn video_path(&self) -> PathBuf {
        self.session_dir().join(&self.files.video)
    }

    pub fn features_path(&self) -> PathBuf {
        self.session_dir().join(&self.files.features)
    }

    pub fn events_path(&self) -> PathBuf {
        self.session_dir().join(&self.files.events)
    }

    pub fn output_path(&self) -> PathBuf {
        self.session_dir().join(&self.files.output)
    }

    /// Checks the settings that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        if model.timesteps == 0 {
            return Err(AnalysisError::InvalidData("timesteps must be positive".into()));
        }
        if model.batch_size == 0 {
            return Err(AnalysisError::InvalidData("batch_size must be positive".into()));
        }
        if model.prob_distribution.len() != model.timesteps {
            return Err(AnalysisError::InvalidData(format!(
                "prob_distribution has {} entries, expected {} (one per timestep)",
                model.prob_distribution.len(),
                model.timesteps
            )));
        }
        if model.std == 0.0 {
            return Err(AnalysisError::InvalidData("std must be non-zero".into()));
        }
        if model.crop.pool == 0 {
            return Err(AnalysisError::InvalidData("crop pool must be positive".into()));
        }
        if self.locator.strip_width == 0 {
            return Err(AnalysisError::InvalidData("strip_width must be positive".into()));
        }
        Ok(())
    }
}

impl ModelConfig {
    pub fn keypoint_path(&self) -> PathBuf {
        self.model_dir.join(&self.keypoint_model)
    }

    pub fn backbone_path(&self) -> PathBuf {
        self.model_dir.join(&self.backbone_model)
    }

    pub fn sequence_path(&self) -> PathBuf {
        self.model_dir.join(&self.sequence_model)
    }
}

/// Digital reference applied before packing.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceScheme {
    None,
    /// Per-sample mean of all channels
    #[default]
    #[serde(rename = "ave")]
    Average,
    /// Per-sample median of all channels
    #[serde(rename = "med")]
    Median,
    /// A single channel, by column index in the packed array
    Channel(usize),
}

impl FromStr for ReferenceScheme {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "None" => Ok(ReferenceScheme::None),
            "ave" => Ok(ReferenceScheme::Average),
            "med" => Ok(ReferenceScheme::Median),
            other => other.parse::<usize>().map(ReferenceScheme::Channel).map_err(|_| {
                AnalysisError::InvalidData(format!(
                    "unknown reference '{}', expected none, ave, med or a channel index",
                    other
                ))
            }),
        }
    }
}

impl fmt::Display for ReferenceScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReferenceScheme::None => write!(f, "none"),
            ReferenceScheme::Average => write!(f, "ave"),
            ReferenceScheme::Median => write!(f, "med"),
            ReferenceScheme::Channel(index) => write!(f, "{}", index),
        }
    }
}

/// Configuration for repacking Open Ephys `.continuous` files.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PackConfig {
    pub folder: PathBuf,
    /// Processor id prefixed to every channel file name
    pub source: String,
    pub channel_prefix: String,
    /// Channel numbers to pack; `None` packs every channel found
    pub channels: Option<Vec<u32>>,
    pub reference: ReferenceScheme,
    /// Recording session; "0" means the files carry no session suffix
    pub session: String,
    pub sample_rate: f32,
    /// Output file name; derived from source, prefix and session if unset
    pub filename: Option<String>,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("."),
            source: "107".to_string(),
            channel_prefix: "CH".to_string(),
            channels: None,
            reference: ReferenceScheme::Average,
            session: "0".to_string(),
            sample_rate: 30000.0,
            filename: None,
        }
    }
}

impl PackConfig {
    pub fn session_suffix(&self) -> String {
        if self.session == "0" {
            String::new()
        } else {
            format!("_{}", self.session)
        }
    }

    pub fn output_path(&self) -> PathBuf {
        let name = match &self.filename {
            Some(name) => name.clone(),
            None => format!(
                "{}_{}s{}.dat",
                self.source,
                self.channel_prefix,
                self.session_suffix()
            ),
        };
        self.folder.join(name)
    }
}

pub fn load_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let config_str = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&config_str)?)
}

pub fn save_config<T: Serialize, P: AsRef<Path>>(config: &T, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}
