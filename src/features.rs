use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::info;

use crate::types::*;

// Column layout of trackedFeaturesRaw.csv
const NOSE_X_COLUMN: usize = 19;
const NOSE_Y_COLUMN: usize = 20;
const OBSTACLE_X_COLUMN: usize = 22;
const OBSTACLE_Y_COLUMN: usize = 23;
const OBSTACLE_CONFIDENCE_COLUMN: usize = 24;

/// Per-frame tracked features, indexed by video frame number.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn from_rows(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    /// Loads the tracked features CSV, skipping its header row.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let table = Self::from_reader(file)?;
        info!(
            "Loaded {} feature rows from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (frame, record) in csv_reader.records().enumerate() {
            let record = record?;
            let column = |index: usize| -> Result<f64> {
                let field = record.get(index).ok_or_else(|| {
                    AnalysisError::InvalidData(format!(
                        "feature row {} has {} columns, need at least {}",
                        frame,
                        record.len(),
                        OBSTACLE_CONFIDENCE_COLUMN + 1
                    ))
                })?;
                field.trim().parse::<f64>().map_err(|_| {
                    AnalysisError::InvalidData(format!(
                        "feature row {} column {}: '{}' is not a number",
                        frame, index, field
                    ))
                })
            };
            // positions are truncated to pixels, so they must be finite
            let position = |index: usize| -> Result<f64> {
                let value = column(index)?;
                if !value.is_finite() {
                    return Err(AnalysisError::InvalidData(format!(
                        "feature row {} column {}: position {} is not finite",
                        frame, index, value
                    )));
                }
                Ok(value)
            };

            rows.push(FeatureRow {
                nose_x: position(NOSE_X_COLUMN)?,
                nose_y: position(NOSE_Y_COLUMN)?,
                obstacle_x: position(OBSTACLE_X_COLUMN)?,
                obstacle_y: position(OBSTACLE_Y_COLUMN)?,
                obstacle_confidence: column(OBSTACLE_CONFIDENCE_COLUMN)?,
            });
        }

        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<&FeatureRow> {
        self.rows.get(frame)
    }
}
