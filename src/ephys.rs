//! Repacking of Open Ephys `.continuous` recordings.
//!
//! Each channel is recorded to its own file. Packing loads the selected
//! channels into one samples x channels array, optionally subtracts a digital
//! reference, and writes the result as interleaved little-endian `i16`.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{PackConfig, ReferenceScheme};
use crate::types::*;

// Constants from the Open Ephys data format
const HEADER_BYTES: usize = 1024;
const FORMAT_MARKER: &str = "Open Ephys Data Format";
const RECORD_MARKER: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 255];
const PRINT_PROGRESS_STEP: usize = 10;

/// Header fields of a `.continuous` file.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousHeader {
    /// Sample rate (Hz)
    pub sample_rate: f32,
    /// Microvolts per bit
    pub bit_volts: f32,
    /// Channel name as recorded (e.g. "CH1")
    pub channel: String,
    /// Every `header.<key> = <value>;` entry, quotes stripped
    pub fields: HashMap<String, String>,
}

/// One channel loaded from a `.continuous` file.
#[derive(Debug, Clone)]
pub struct ContinuousFile {
    pub header: ContinuousHeader,
    /// Timestamp of the first sample of each record
    pub timestamps: Array1<i64>,
    /// Recording number of each record
    pub recording_numbers: Array1<u16>,
    /// Raw samples (multiply by `bit_volts` for μV)
    pub samples: Array1<i16>,
}

/// Result of a packing run.
#[derive(Debug, Clone, PartialEq)]
pub struct PackSummary {
    pub output: PathBuf,
    pub channels: Vec<u32>,
    pub num_samples: usize,
}

/// Loads a single `.continuous` file.
pub fn load_continuous<P: AsRef<Path>>(path: P) -> Result<ContinuousFile> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::with_capacity(65536, file);

    let header = read_header(&mut reader)?;

    let mut timestamps = Vec::new();
    let mut recording_numbers = Vec::new();
    let mut samples = Vec::new();
    while read_record(
        &mut reader,
        &mut timestamps,
        &mut recording_numbers,
        &mut samples,
    )?
    .is_some()
    {}

    debug!(
        "Read {} records ({} samples) of {} from {}",
        timestamps.len(),
        samples.len(),
        header.channel,
        path.as_ref().display()
    );

    Ok(ContinuousFile {
        header,
        timestamps: Array1::from(timestamps),
        recording_numbers: Array1::from(recording_numbers),
        samples: Array1::from(samples),
    })
}

/// Helper function to read and parse the 1024-byte text header
fn read_header<R: Read>(reader: &mut R) -> Result<ContinuousHeader> {
    let mut bytes = [0u8; HEADER_BYTES];
    reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            AnalysisError::FileSizeError("file is shorter than the header".into())
        }
        _ => AnalysisError::Io(e),
    })?;

    let text = String::from_utf8_lossy(&bytes);
    if !text.contains(FORMAT_MARKER) {
        return Err(AnalysisError::UnrecognizedFileFormat(
            "missing Open Ephys header".into(),
        ));
    }

    let fields = parse_header_fields(&text);
    let number = |key: &str| -> Result<f32> {
        let value = fields
            .get(key)
            .ok_or_else(|| AnalysisError::InvalidData(format!("header.{} missing", key)))?;
        value
            .parse::<f32>()
            .map_err(|_| AnalysisError::InvalidData(format!("header.{} = '{}'", key, value)))
    };

    Ok(ContinuousHeader {
        sample_rate: number("sampleRate")?,
        bit_volts: number("bitVolts")?,
        channel: fields.get("channel").cloned().unwrap_or_default(),
        fields: fields.clone(),
    })
}

/// Helper function to split `header.key = value;` statements
fn parse_header_fields(text: &str) -> HashMap<String, String> {
    text.split(';')
        .filter_map(|statement| {
            let statement = statement.trim().trim_end_matches('\0').trim();
            let rest = statement.strip_prefix("header.")?;
            let (key, value) = rest.split_once('=')?;
            let value = value.trim().trim_matches('\'').to_string();
            Some((key.trim().to_string(), value))
        })
        .collect()
}

/// Helper function to read one record
///
/// Returns the number of samples read, or `None` at a clean end of file.
fn read_record<R: Read>(
    reader: &mut R,
    timestamps: &mut Vec<i64>,
    recording_numbers: &mut Vec<u16>,
    samples: &mut Vec<i16>,
) -> Result<Option<usize>> {
    let timestamp = match reader.read_i64::<LittleEndian>() {
        Ok(timestamp) => timestamp,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let truncated = |e: std::io::Error| match e.kind() {
        ErrorKind::UnexpectedEof => {
            AnalysisError::FileSizeError("file ends inside a record".into())
        }
        _ => AnalysisError::Io(e),
    };

    let count = reader.read_u16::<LittleEndian>().map_err(truncated)? as usize;
    let recording_number = reader.read_u16::<LittleEndian>().map_err(truncated)?;

    samples.reserve(count);
    for _ in 0..count {
        samples.push(reader.read_i16::<BigEndian>().map_err(truncated)?);
    }

    let mut marker = [0u8; 10];
    reader.read_exact(&mut marker).map_err(truncated)?;
    if marker != RECORD_MARKER {
        return Err(AnalysisError::UnrecognizedFileFormat(format!(
            "bad record marker after timestamp {}",
            timestamp
        )));
    }

    timestamps.push(timestamp);
    recording_numbers.push(recording_number);
    Ok(Some(count))
}

/// File name of one channel, e.g. `107_CH3.continuous` or `107_CH3_2.continuous`.
pub fn channel_file_name(config: &PackConfig, channel: u32) -> String {
    format!(
        "{}_{}{}{}.continuous",
        config.source,
        config.channel_prefix,
        channel,
        config.session_suffix()
    )
}

/// Finds every channel number with a file in the folder, ascending.
pub fn discover_channels(config: &PackConfig) -> Result<Vec<u32>> {
    let prefix = format!("{}_{}", config.source, config.channel_prefix);
    let suffix = format!("{}.continuous", config.session_suffix());

    let mut channels = Vec::new();
    for entry in fs::read_dir(&config.folder)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let number = name
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
            .and_then(|digits| digits.parse::<u32>().ok());
        if let Some(number) = number {
            channels.push(number);
        }
    }
    channels.sort_unstable();
    Ok(channels)
}

/// Loads the selected channels into a samples x channels array.
pub fn load_channels(config: &PackConfig, channels: &[u32]) -> Result<Array2<i16>> {
    if channels.is_empty() {
        return Err(AnalysisError::Other(format!(
            "no channels to pack in {}",
            config.folder.display()
        )));
    }

    info!("Loading {} channels...", channels.len());

    let mut columns: Vec<Array1<i16>> = Vec::with_capacity(channels.len());
    let mut percent_done = PRINT_PROGRESS_STEP;
    for (i, &channel) in channels.iter().enumerate() {
        let path = config.folder.join(channel_file_name(config, channel));
        if !path.exists() {
            return Err(AnalysisError::ChannelNotFound(path));
        }
        let file = load_continuous(&path)?;

        if (file.header.sample_rate - config.sample_rate).abs() > 0.01 {
            warn!(
                "{} was sampled at {} Hz, expected {} Hz",
                path.display(),
                file.header.sample_rate,
                config.sample_rate
            );
        }
        if let Some(first) = columns.first() {
            if first.len() != file.samples.len() {
                return Err(AnalysisError::ShapeMismatch(format!(
                    "channel {} has {} samples, channel {} has {}",
                    channel,
                    file.samples.len(),
                    channels[0],
                    first.len()
                )));
            }
        }
        columns.push(file.samples);

        // Print progress
        let progress = ((i + 1) as f64 / channels.len() as f64) * 100.0;
        while progress >= percent_done as f64 && percent_done <= 100 {
            info!("{}% done...", percent_done);
            percent_done += PRINT_PROGRESS_STEP;
        }
    }

    let views: Vec<_> = columns.iter().map(|column| column.view()).collect();
    ndarray::stack(Axis(1), &views).map_err(|e| AnalysisError::ShapeMismatch(e.to_string()))
}

/// Subtracts a per-sample reference from every channel.
///
/// Results are truncated toward zero and saturated to the `i16` range.
pub fn apply_reference(data: &mut Array2<i16>, reference: ReferenceScheme) -> Result<()> {
    let num_channels = data.ncols();
    let reference_signal: Array1<f64> = match reference {
        ReferenceScheme::None => return Ok(()),
        ReferenceScheme::Average => {
            info!("Digital referencing to average of all channels.");
            data.rows()
                .into_iter()
                .map(|row| row.iter().map(|&v| v as f64).sum::<f64>() / num_channels as f64)
                .collect()
        }
        ReferenceScheme::Median => {
            info!("Digital referencing to median of all channels.");
            data.rows().into_iter().map(|row| median(row.iter().copied())).collect()
        }
        ReferenceScheme::Channel(index) => {
            if index >= num_channels {
                return Err(AnalysisError::InvalidData(format!(
                    "reference channel {} out of range ({} channels)",
                    index, num_channels
                )));
            }
            info!("Digital referencing to channel index {}.", index);
            data.column(index).iter().map(|&v| v as f64).collect()
        }
    };

    for (mut row, &offset) in data.rows_mut().into_iter().zip(reference_signal.iter()) {
        row.mapv_inplace(|v| {
            let referenced = (v as f64 - offset).trunc();
            referenced.clamp(i16::MIN as f64, i16::MAX as f64) as i16
        });
    }
    Ok(())
}

fn median<I: Iterator<Item = i16>>(values: I) -> f64 {
    let mut values: Vec<i16> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] as f64 + values[mid] as f64) / 2.0
    } else {
        values[mid] as f64
    }
}

/// Writes samples x channels data as interleaved little-endian `i16`.
pub fn write_dat<P: AsRef<Path>>(path: P, data: &Array2<i16>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::with_capacity(65536, file);
    for &sample in data.iter() {
        writer.write_i16::<LittleEndian>(sample)?;
    }
    writer.flush()?;
    Ok(())
}

/// Loads, references and packs the channels described by `config`.
pub fn pack(config: &PackConfig) -> Result<PackSummary> {
    let tic = Instant::now();

    let channels = match &config.channels {
        Some(channels) => channels.clone(),
        None => discover_channels(config)?,
    };

    let mut data = load_channels(config, &channels)?;
    apply_reference(&mut data, config.reference)?;

    let output = config.output_path();
    info!("Packing data to file: {}", output.display());
    write_dat(&output, &data)?;

    info!(
        "Done! Packed {} channels x {} samples. Elapsed time: {:.1} seconds",
        channels.len(),
        data.nrows(),
        tic.elapsed().as_secs_f64()
    );

    Ok(PackSummary {
        output,
        channels,
        num_samples: data.nrows(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn header_fields() {
        let text = "header.format = 'Open Ephys Data Format'; \nheader.version = 0.4;\n\
                    header.channel = 'CH7';\nheader.sampleRate = 30000;\nheader.bitVolts = 0.195;\n";
        let fields = parse_header_fields(text);
        assert_eq!(fields["format"], "Open Ephys Data Format");
        assert_eq!(fields["channel"], "CH7");
        assert_eq!(fields["sampleRate"], "30000");
        assert_eq!(fields["bitVolts"], "0.195");
    }

    #[test]
    fn rejects_foreign_header() {
        let bytes = vec![b' '; HEADER_BYTES];
        assert!(matches!(
            read_header(&mut bytes.as_slice()),
            Err(AnalysisError::UnrecognizedFileFormat(_))
        ));
    }

    #[test]
    fn average_reference_truncates() {
        let mut data = array![[10i16, 20, 31], [-5, 0, 6]];
        apply_reference(&mut data, ReferenceScheme::Average).unwrap();
        // row means: 20.333.., 0.333..
        assert_eq!(data, array![[-10i16, 0, 10], [-5, 0, 5]]);
    }

    #[test]
    fn median_reference() {
        let mut data = array![[1i16, 9, 4, 100], [3, 3, 3, 3]];
        apply_reference(&mut data, ReferenceScheme::Median).unwrap();
        // row medians: 6.5, 3
        assert_eq!(data, array![[-5i16, 2, -2, 93], [0, 0, 0, 0]]);
    }

    #[test]
    fn channel_reference_saturates() {
        let mut data = array![[i16::MAX, i16::MIN], [100, 50]];
        apply_reference(&mut data, ReferenceScheme::Channel(1)).unwrap();
        assert_eq!(data, array![[i16::MAX, 0], [50, 0]]);
        assert!(apply_reference(&mut data, ReferenceScheme::Channel(2)).is_err());
    }

    #[test]
    fn file_names() {
        let mut config = PackConfig::default();
        assert_eq!(channel_file_name(&config, 3), "107_CH3.continuous");
        config.session = "2".to_string();
        assert_eq!(channel_file_name(&config, 3), "107_CH3_2.continuous");
    }
}
