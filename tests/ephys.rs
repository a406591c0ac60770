use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use obstacle_analysis::config::{PackConfig, ReferenceScheme};
use obstacle_analysis::ephys::{discover_channels, load_continuous};
use obstacle_analysis::{pack, AnalysisError};

const SAMPLES_PER_RECORD: usize = 1024;

/// Writes a minimal Open Ephys `.continuous` file.
fn write_continuous(path: &Path, channel: &str, sample_rate: u32, samples: &[i16]) {
    let mut header = format!(
        "header.format = 'Open Ephys Data Format'; \n\
         header.version = 0.4;\n\
         header.header_bytes = 1024;\n\
         header.channel = '{}';\n\
         header.channelType = 'Continuous';\n\
         header.sampleRate = {};\n\
         header.blockLength = 1024;\n\
         header.bufferSize = 1024;\n\
         header.bitVolts = 0.195;\n",
        channel, sample_rate
    )
    .into_bytes();
    header.resize(1024, b' ');

    let mut writer = BufWriter::new(File::create(path).unwrap());
    writer.write_all(&header).unwrap();
    for (record, chunk) in samples.chunks(SAMPLES_PER_RECORD).enumerate() {
        writer
            .write_i64::<LittleEndian>((record * SAMPLES_PER_RECORD) as i64)
            .unwrap();
        writer.write_u16::<LittleEndian>(chunk.len() as u16).unwrap();
        writer.write_u16::<LittleEndian>(0).unwrap();
        for &sample in chunk {
            writer.write_i16::<BigEndian>(sample).unwrap();
        }
        writer.write_all(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 255]).unwrap();
    }
    writer.flush().unwrap();
}

fn read_dat(path: &Path) -> Vec<i16> {
    let bytes = fs::read(path).unwrap();
    let mut reader = bytes.as_slice();
    let mut values = Vec::new();
    while let Ok(value) = reader.read_i16::<LittleEndian>() {
        values.push(value);
    }
    values
}

fn channel_samples(channel: i16) -> Vec<i16> {
    (0..2 * SAMPLES_PER_RECORD as i16)
        .map(|i| channel * 100 + (i % 7))
        .collect()
}

#[test]
fn loads_records_and_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("107_CH1.continuous");
    let samples = channel_samples(1);
    write_continuous(&path, "CH1", 30000, &samples);

    let file = load_continuous(&path).unwrap();
    assert_eq!(file.header.sample_rate, 30000.0);
    assert!((file.header.bit_volts - 0.195).abs() < 1e-6);
    assert_eq!(file.header.channel, "CH1");
    assert_eq!(file.timestamps.to_vec(), vec![0, 1024]);
    assert_eq!(file.samples.to_vec(), samples);
}

#[test]
fn truncated_record_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("107_CH1.continuous");
    write_continuous(&path, "CH1", 30000, &channel_samples(1));

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 20]).unwrap();
    assert!(matches!(
        load_continuous(&path),
        Err(AnalysisError::FileSizeError(_))
    ));
}

#[test]
fn discovers_channels_numerically() {
    let dir = tempfile::tempdir().unwrap();
    for channel in [10, 2, 1] {
        let name = format!("107_CH{}.continuous", channel);
        write_continuous(&dir.path().join(name), "CH", 30000, &[0; 4]);
    }
    // other processors and sessions are ignored
    write_continuous(&dir.path().join("100_CH3.continuous"), "CH3", 30000, &[0; 4]);
    write_continuous(&dir.path().join("107_CH4_2.continuous"), "CH4", 30000, &[0; 4]);
    File::create(dir.path().join("107_CHs.dat")).unwrap();

    let mut config = PackConfig::default();
    config.folder = dir.path().to_path_buf();
    assert_eq!(discover_channels(&config).unwrap(), vec![1, 2, 10]);

    config.session = "2".to_string();
    assert_eq!(discover_channels(&config).unwrap(), vec![4]);
}

#[test]
fn packs_interleaved_with_average_reference() {
    let dir = tempfile::tempdir().unwrap();
    for channel in 1..=3 {
        let name = format!("107_CH{}.continuous", channel);
        write_continuous(
            &dir.path().join(name),
            &format!("CH{}", channel),
            30000,
            &channel_samples(channel),
        );
    }

    let mut config = PackConfig::default();
    config.folder = dir.path().to_path_buf();
    let summary = pack(&config).unwrap();

    assert_eq!(summary.output, dir.path().join("107_CHs.dat"));
    assert_eq!(summary.channels, vec![1, 2, 3]);
    assert_eq!(summary.num_samples, 2 * SAMPLES_PER_RECORD);

    // channels differ by exactly 100, so the average is channel 2
    let packed = read_dat(&summary.output);
    assert_eq!(packed.len(), 3 * 2 * SAMPLES_PER_RECORD);
    assert_eq!(&packed[..6], &[-100, 0, 100, -100, 0, 100]);
}

#[test]
fn packs_selected_channels_without_reference() {
    let dir = tempfile::tempdir().unwrap();
    for channel in 1..=3 {
        let name = format!("107_CH{}.continuous", channel);
        write_continuous(&dir.path().join(name), "CH", 30000, &channel_samples(channel));
    }

    let mut config = PackConfig::default();
    config.folder = dir.path().to_path_buf();
    config.channels = Some(vec![3, 1]);
    config.reference = ReferenceScheme::None;
    config.filename = Some("subset.dat".to_string());
    let summary = pack(&config).unwrap();

    let packed = read_dat(&summary.output);
    assert_eq!(&packed[..4], &[300, 100, 301, 101]);
}

#[test]
fn missing_or_mismatched_channels_fail() {
    let dir = tempfile::tempdir().unwrap();
    write_continuous(&dir.path().join("107_CH1.continuous"), "CH1", 30000, &[1; 2048]);
    write_continuous(&dir.path().join("107_CH2.continuous"), "CH2", 30000, &[1; 1024]);

    let mut config = PackConfig::default();
    config.folder = dir.path().to_path_buf();
    assert!(matches!(pack(&config), Err(AnalysisError::ShapeMismatch(_))));

    config.channels = Some(vec![1, 5]);
    assert!(matches!(pack(&config), Err(AnalysisError::ChannelNotFound(_))));

    let empty = tempfile::tempdir().unwrap();
    config.folder = empty.path().to_path_buf();
    config.channels = None;
    assert!(pack(&config).is_err());
}
