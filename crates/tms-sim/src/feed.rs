//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Cyclic dataset playback for synthetic values and tank measurements."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, Trim};
use tms_common::config::{DatasetConfig, SyntheticConfig};
use tracing::{debug, info};

use crate::error::{Result, SimError};

/// One `(tank id, level)` sample from the measurement stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub tank_id: u32,
    pub value: f64,
}

/// Read one float per line from `path`, skipping lines that do not parse.
pub fn load_sequence(path: &Path) -> Result<Vec<f64>> {
    let file = File::open(path).map_err(|source| SimError::ResourceLoad {
        path: path.to_path_buf(),
        source,
    })?;
    let values = parse_sequence(BufReader::new(file)).map_err(|source| SimError::ResourceLoad {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), samples = values.len(), "dataset loaded");
    Ok(values)
}

/// Parse one float per line. Lines that are not UTF-8 or not a number are
/// skipped; only read failures are returned.
pub fn parse_sequence<R: BufRead>(reader: R) -> std::io::Result<Vec<f64>> {
    let mut values = Vec::new();
    for line in reader.split(b'\n') {
        let line = line?;
        let parsed = std::str::from_utf8(&line)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok());
        if let Some(value) = parsed {
            values.push(value);
        }
    }
    Ok(values)
}

/// Build a measurement from the fields of one CSV record.
///
/// The first field is the tank id. The level is `digits[,digits]` with a
/// comma as decimal separator, either quoted as one field or spread over two
/// unquoted fields. Every field must match in full: trailing text such as
/// `12.5` or `12kg` makes the record malformed rather than being cut off.
pub fn parse_fields(fields: &[&str]) -> Option<Measurement> {
    let (id, level) = fields.split_first()?;
    if !is_digits(id) {
        return None;
    }
    let (whole, fraction) = match level {
        [whole] => whole.split_once(',').unwrap_or((whole, "")),
        [whole, fraction] => (*whole, *fraction),
        _ => return None,
    };
    if !is_digits(whole) || !(fraction.is_empty() || is_digits(fraction)) {
        return None;
    }
    let number = if fraction.is_empty() {
        whole.to_owned()
    } else {
        format!("{whole}.{fraction}")
    };
    Some(Measurement {
        tank_id: id.parse().ok()?,
        value: number.parse().ok()?,
    })
}

fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

/// Measurement records replayed from the start whenever the end is reached.
///
/// The underlying reader is released when the stream is dropped or closed.
#[derive(Debug)]
pub struct MeasurementStream<R> {
    name: PathBuf,
    reader: csv::Reader<R>,
    record: ByteRecord,
    records: u64,
}

impl MeasurementStream<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| SimError::ResourceLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_reader(path, BufReader::new(file)))
    }
}

impl<R: BufRead + Seek> MeasurementStream<R> {
    pub fn from_reader(name: impl Into<PathBuf>, reader: R) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);
        Self {
            name: name.into(),
            reader,
            record: ByteRecord::new(),
            records: 0,
        }
    }

    /// Read the next record, rewinding at end of data.
    ///
    /// Blank lines are skipped. A stream holding no records at all is
    /// reported as [`SimError::EmptyDataset`] instead of spinning.
    pub fn next_record(&mut self) -> Result<Measurement> {
        let mut rewound_without_record = false;
        loop {
            let more = self
                .reader
                .read_byte_record(&mut self.record)
                .map_err(|err| self.read_error(err))?;
            if !more {
                if rewound_without_record {
                    return Err(SimError::EmptyDataset(self.name.display().to_string()));
                }
                self.rewind()?;
                rewound_without_record = true;
                continue;
            }
            if self.record.len() == 1 && self.record[0].is_empty() {
                continue;
            }
            self.records += 1;
            return self.decode().ok_or_else(|| self.malformed());
        }
    }

    fn decode(&self) -> Option<Measurement> {
        let fields = self
            .record
            .iter()
            .map(std::str::from_utf8)
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()?;
        parse_fields(&fields)
    }

    fn line(&self) -> usize {
        self.record
            .position()
            .map_or(0, |position| position.line() as usize)
    }

    fn malformed(&self) -> SimError {
        let record = self
            .record
            .iter()
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(",");
        SimError::DataFormat {
            path: self.name.clone(),
            line: self.line(),
            record,
        }
    }

    fn read_error(&self, err: csv::Error) -> SimError {
        let line = err
            .position()
            .map_or_else(|| self.line(), |position| position.line() as usize);
        match err.into_kind() {
            csv::ErrorKind::Io(source) => SimError::Io(source),
            other => SimError::DataFormat {
                path: self.name.clone(),
                line,
                record: format!("{other:?}"),
            },
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(csv::Position::new())
            .map_err(|err| self.read_error(err))?;
        debug!(stream = %self.name.display(), records = self.records, "measurement stream rewound");
        self.records = 0;
        Ok(())
    }

    /// Release the underlying reader.
    pub fn close(self) {
        debug!(stream = %self.name.display(), "measurement stream closed");
    }
}

/// Deterministic replay of the synthetic driver and the measurement stream.
#[derive(Debug)]
pub struct MeasurementFeed<R> {
    driver: Vec<f64>,
    usage: Vec<f64>,
    stream: MeasurementStream<R>,
    params: SyntheticConfig,
    current_index: usize,
    last_value: f64,
}

impl MeasurementFeed<BufReader<File>> {
    /// Load the driver and usage datasets, normalise usage, and open the
    /// measurement stream.
    pub fn open(datasets: &DatasetConfig, params: SyntheticConfig) -> Result<Self> {
        let driver = load_sequence(&datasets.driver)?;
        let usage = normalize_usage(&load_sequence(&datasets.usage)?)?;
        let stream = MeasurementStream::open(&datasets.measurements)?;
        info!(
            driver_samples = driver.len(),
            usage_samples = usage.len(),
            measurements = %datasets.measurements.display(),
            "measurement feed ready"
        );
        Self::from_parts(driver, usage, stream, params)
    }
}

impl<R: BufRead + Seek> MeasurementFeed<R> {
    /// Build a feed from prepared sequences. `usage` is used as given.
    pub fn from_parts(
        driver: Vec<f64>,
        usage: Vec<f64>,
        stream: MeasurementStream<R>,
        params: SyntheticConfig,
    ) -> Result<Self> {
        if driver.is_empty() {
            return Err(SimError::EmptyDataset("driver".into()));
        }
        if usage.is_empty() {
            return Err(SimError::EmptyDataset("usage".into()));
        }
        Ok(Self {
            driver,
            usage,
            stream,
            params,
            current_index: 0,
            last_value: 0.0,
        })
    }

    /// Next synthetic perturbation derived from both datasets.
    pub fn next_synthetic_value(&mut self) -> f64 {
        let index = self.current_index;
        let usage = self.usage[index % self.usage.len()];
        let mut result =
            usage * (self.params.driver_modifier * self.driver[index]) * self.params.scale_modifier;
        if result < self.params.min_modifier {
            result += self.params.min_modifier;
        } else if result > self.params.max_modifier {
            result = self.params.max_modifier;
        }
        self.current_index = (index + 1) % self.driver.len();
        self.last_value = result;
        result
    }

    pub fn next_measurement(&mut self) -> Result<Measurement> {
        self.stream.next_record()
    }

    /// Most recent synthetic value, `0.0` before the first pull.
    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Release the measurement stream.
    pub fn close(self) {
        self.stream.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn params() -> SyntheticConfig {
        SyntheticConfig {
            driver_modifier: 0.05,
            scale_modifier: 3.0,
            min_modifier: 0.1,
            max_modifier: 0.3,
        }
    }

    fn stream(text: &str) -> MeasurementStream<Cursor<Vec<u8>>> {
        MeasurementStream::from_reader("memory.csv", Cursor::new(text.as_bytes().to_vec()))
    }

    fn first(text: &str) -> Option<Measurement> {
        stream(text).next_record().ok()
    }

    #[test]
    fn parses_quoted_comma_decimal() {
        assert_eq!(
            first("3,\"1234,56\"\n"),
            Some(Measurement {
                tank_id: 3,
                value: 1234.56
            })
        );
    }

    #[test]
    fn parses_unquoted_and_integral_records() {
        assert_eq!(first("1,250").map(|m| m.value), Some(250.0));
        assert_eq!(first("2,7,5\r\n").map(|m| m.value), Some(7.5));
        assert_eq!(first("4,\"12,\"").map(|m| m.value), Some(12.0));
        assert_eq!(first(" 5 , 80 ").map(|m| m.tank_id), Some(5));
    }

    #[test]
    fn rejects_malformed_records() {
        for line in ["abc", "1;2", "x,12", "1,", "1,\"\"", "1,-4", "3,\"1,2,3\""] {
            assert!(first(line).is_none(), "accepted {line:?}");
        }
    }

    #[test]
    fn trailing_text_after_the_level_is_not_cut_off() {
        for line in ["1,12.5", "1,\"12kg\"", "1,12,5x"] {
            assert!(first(line).is_none(), "accepted {line:?}");
        }
        assert_eq!(parse_fields(&["1", "12"]).map(|m| m.value), Some(12.0));
        assert!(parse_fields(&["1", "12", "5", "0"]).is_none());
    }

    #[test]
    fn unterminated_quote_swallows_following_records() {
        let mut records = stream("1,\"12\n2,5\n");
        match records.next_record() {
            Err(SimError::DataFormat { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_utf8_record_is_a_format_error() {
        let mut records = MeasurementStream::from_reader(
            "memory.csv",
            Cursor::new(b"1,5\n2,\xff\xfe\n3,7\n".to_vec()),
        );
        assert_eq!(records.next_record().unwrap().value, 5.0);
        match records.next_record() {
            Err(SimError::DataFormat { line, record, .. }) => {
                assert_eq!(line, 2);
                assert!(record.starts_with("2,"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let next = records.next_record().unwrap();
        assert_eq!((next.tank_id, next.value), (3, 7.0));
    }

    #[test]
    fn sequence_skips_unparsable_lines() {
        let values = parse_sequence(Cursor::new("1.5\nheader\n\n-2\n3e1\n")).unwrap();
        assert_eq!(values, vec![1.5, -2.0, 30.0]);
    }

    #[test]
    fn sequence_skips_lines_that_are_not_utf8() {
        let values = parse_sequence(Cursor::new(b"1.5\n\xff\xfe\n2.5\n".to_vec())).unwrap();
        assert_eq!(values, vec![1.5, 2.5]);
    }

    #[test]
    fn missing_dataset_is_a_resource_error() {
        let err = load_sequence(Path::new("does/not/exist.txt")).unwrap_err();
        assert!(matches!(err, SimError::ResourceLoad { .. }));
    }

    #[test]
    fn normalisation_maps_peak_to_one() {
        let normalised = normalize_usage(&[2.0, 8.0, 0.0, 4.0]).unwrap();
        assert_eq!(normalised, vec![0.25, 1.0, 0.0, 0.5]);
        assert!(normalised.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn normalisation_rejects_empty_and_degenerate_input() {
        assert!(matches!(
            normalize_usage(&[]),
            Err(SimError::EmptyDataset(_))
        ));
        assert!(matches!(
            normalize_usage(&[0.0, 0.0]),
            Err(SimError::DegenerateDataset { .. })
        ));
    }

    #[test]
    fn synthetic_value_matches_reference_example() {
        let mut feed =
            MeasurementFeed::from_parts(vec![0.10, 0.20], vec![1.0, 0.5], stream("1,1"), params())
                .unwrap();
        let first = feed.next_synthetic_value();
        assert!((first - 0.115).abs() < 1e-12);
        assert_eq!(feed.last_value(), first);
        assert_eq!(feed.current_index(), 1);
        feed.next_synthetic_value();
        assert_eq!(feed.current_index(), 0);
    }

    #[test]
    fn synthetic_value_is_capped_at_max_modifier() {
        let mut feed =
            MeasurementFeed::from_parts(vec![10.0], vec![1.0], stream("1,1"), params()).unwrap();
        assert_eq!(feed.next_synthetic_value(), 0.3);
    }

    #[test]
    fn index_wraps_on_driver_length_not_usage_length() {
        let mut feed = MeasurementFeed::from_parts(
            vec![1.0, 1.0, 1.0],
            vec![1.0, 0.5],
            stream("1,1"),
            params(),
        )
        .unwrap();
        let values: Vec<f64> = (0..4).map(|_| feed.next_synthetic_value()).collect();
        // usage index: 0, 1, 0 (2 % 2), then driver wraps to 0
        let expected = [0.15, 0.175, 0.15, 0.15];
        for (value, expected) in values.iter().zip(expected) {
            assert!((value - expected).abs() < 1e-12, "{value} != {expected}");
        }
        assert_eq!(feed.current_index(), 1);
    }

    #[test]
    fn stream_replays_from_start_after_last_record() {
        let mut records = stream("1,\"10,5\"\n2,\"20\"\n\n3,30\n");
        let first = records.next_record().unwrap();
        records.next_record().unwrap();
        records.next_record().unwrap();
        let fourth = records.next_record().unwrap();
        assert_eq!(first, fourth);
        assert_eq!(fourth.value, 10.5);
    }

    #[test]
    fn malformed_record_reports_line() {
        let mut records = stream("1,5\n\nbroken\n");
        records.next_record().unwrap();
        match records.next_record() {
            Err(SimError::DataFormat { line, record, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(record, "broken");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_stream_does_not_spin() {
        let mut records = stream("\n\n");
        assert!(matches!(
            records.next_record(),
            Err(SimError::EmptyDataset(_))
        ));
    }

    #[test]
    fn open_loads_all_datasets() -> Result<()> {
        let mut driver = NamedTempFile::new()?;
        writeln!(driver, "0.10\n0.20")?;
        let mut usage = NamedTempFile::new()?;
        writeln!(usage, "4\n2")?;
        let mut measurements = NamedTempFile::new()?;
        writeln!(measurements, "2,\"150,25\"")?;
        let datasets = DatasetConfig {
            driver: driver.path().to_path_buf(),
            usage: usage.path().to_path_buf(),
            measurements: measurements.path().to_path_buf(),
        };
        let mut feed = MeasurementFeed::open(&datasets, params())?;
        assert!((feed.next_synthetic_value() - 0.115).abs() < 1e-12);
        let sample = feed.next_measurement()?;
        assert_eq!(sample.tank_id, 2);
        assert_eq!(sample.value, 150.25);
        assert_eq!(feed.next_measurement()?, sample);
        feed.close();
        Ok(())
    }
}
