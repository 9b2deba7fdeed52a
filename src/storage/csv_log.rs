use std::{
    fs::{self, File, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{info, warn};

use crate::{
    reading::{Reading, TransmissionStatus, format_timestamp},
    storage::StorageError,
};

pub const FIELDS: [&str; 8] = [
    "timestamp",
    "station_id",
    "raw_distance_mm",
    "snow_depth_mm",
    "sensor_temp_c",
    "battery_voltage",
    "signal_quality",
    "transmission_status",
];

const TIMESTAMP_INDEX: usize = 0;
const STATION_ID_INDEX: usize = 1;
const RAW_DISTANCE_MM_INDEX: usize = 2;
const SNOW_DEPTH_MM_INDEX: usize = 3;
const SENSOR_TEMP_C_INDEX: usize = 4;
const BATTERY_VOLTAGE_INDEX: usize = 5;
const SIGNAL_QUALITY_INDEX: usize = 6;
const TRANSMISSION_STATUS_INDEX: usize = 7;

const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    /// The stored row already carried the requested values; nothing was written.
    Unchanged,
}

/// Size of a log on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageStats {
    pub files: usize,
    /// Distinct readings, a superseded row counted once.
    pub rows: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub bytes: u64,
}

/// Append-only CSV log split into one file per UTC day:
/// `<station_id>_<YYYY-MM-DD>.csv`, each starting with a header row.
#[derive(Debug, Clone)]
pub struct CsvLog {
    dir: PathBuf,
    station_id: String,
    max_files: usize,
}

impl CsvLog {
    pub fn new(dir: impl Into<PathBuf>, station_id: impl Into<String>, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            station_id: station_id.into(),
            max_files,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.csv",
            self.station_id,
            date.format(DAY_FORMAT)
        ))
    }

    /// Appends one row and syncs it to the medium before returning.
    pub fn append(&self, reading: &Reading) -> Result<PathBuf, StorageError> {
        let path = self.day_file(reading.timestamp.date_naive());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(StorageError::io(&path))?;
        let is_new = file.metadata().map_err(StorageError::io(&path))?.len() == 0;

        // Rendered up front so the row reaches the file in a single write.
        let mut buf = Vec::new();
        {
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buf);
            if is_new {
                writer
                    .write_record(FIELDS)
                    .map_err(StorageError::csv(&path))?;
            }
            writer
                .write_record(encode(reading))
                .map_err(StorageError::csv(&path))?;
            writer.flush().map_err(StorageError::io(&path))?;
        }

        file.write_all(&buf).map_err(StorageError::io(&path))?;
        file.sync_data().map_err(StorageError::io(&path))?;

        if is_new && let Err(e) = self.enforce_retention() {
            warn!(dir = ?self.dir, error = %e, "failed to prune old log files");
        }

        Ok(path)
    }

    /// Sets the transmission outcome of the latest row stamped `timestamp`.
    ///
    /// The day file is rewritten through a temporary file and renamed into
    /// place, so readers never observe a half-written file.
    pub fn patch(
        &self,
        timestamp: &DateTime<Utc>,
        status: TransmissionStatus,
        signal_quality: Option<u8>,
    ) -> Result<PatchOutcome, StorageError> {
        let path = self.day_file(timestamp.date_naive());
        let key = format_timestamp(timestamp);
        let mut records = read_records(&path)?;

        let Some(record) = records
            .iter_mut()
            .rev()
            .find(|r| r.get(TIMESTAMP_INDEX) == Some(key.as_str()))
        else {
            return Err(StorageError::RowNotFound {
                path,
                timestamp: key,
            });
        };

        let signal_quality = optional_field(signal_quality);
        if record.get(SIGNAL_QUALITY_INDEX) == Some(signal_quality.as_str())
            && record.get(TRANSMISSION_STATUS_INDEX) == Some(status.as_str())
        {
            return Ok(PatchOutcome::Unchanged);
        }

        let patched: StringRecord = record
            .iter()
            .enumerate()
            .map(|(i, field)| match i {
                SIGNAL_QUALITY_INDEX => signal_quality.as_str(),
                TRANSMISSION_STATUS_INDEX => status.as_str(),
                _ => field,
            })
            .collect();
        *record = patched;

        rewrite(&path, &records)?;

        Ok(PatchOutcome::Patched)
    }

    /// Writes `reading` unless a row with its timestamp exists, in which case
    /// that row's transmission outcome is brought up to date instead.
    pub fn upsert(&self, reading: &Reading) -> Result<PathBuf, StorageError> {
        let path = self.day_file(reading.timestamp.date_naive());
        if path.exists() {
            match self.patch(
                &reading.timestamp,
                reading.transmission_status,
                reading.signal_quality,
            ) {
                Ok(_) => return Ok(path),
                Err(StorageError::RowNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.append(reading)
    }

    /// Rows of one day in file order. A later row with the same timestamp
    /// supersedes an earlier one.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<Reading>, StorageError> {
        let path = self.day_file(date);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut readings: Vec<Reading> = Vec::new();
        for (i, record) in read_records(&path)?.iter().enumerate() {
            let reading = decode(record).map_err(|e| StorageError::Malformed {
                path: path.clone(),
                // 1-based, after the header.
                row: i + 2,
                reason: format!("{e:#}"),
            })?;

            match readings
                .iter_mut()
                .rev()
                .find(|r| r.timestamp == reading.timestamp)
            {
                Some(existing) => *existing = reading,
                None => readings.push(reading),
            }
        }

        Ok(readings)
    }

    /// Every retained row, oldest day first.
    pub fn read_all(&self) -> Result<Vec<Reading>, StorageError> {
        let mut readings = Vec::new();
        for (date, _) in self.day_files()? {
            readings.extend(self.read_day(date)?);
        }
        Ok(readings)
    }

    /// Readings the base station never acknowledged, oldest first.
    pub fn unsent(&self) -> Result<Vec<Reading>, StorageError> {
        let mut readings = self.read_all()?;
        readings.retain(|r| r.transmission_status == TransmissionStatus::LocalOnly);
        Ok(readings)
    }

    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let files = self.day_files()?;

        let mut stats = StorageStats {
            files: files.len(),
            first_day: files.first().map(|(date, _)| *date),
            last_day: files.last().map(|(date, _)| *date),
            ..StorageStats::default()
        };
        for (date, path) in &files {
            stats.bytes += fs::metadata(path).map_err(StorageError::io(path))?.len();
            stats.rows += self.read_day(*date)?.len();
        }

        Ok(stats)
    }

    /// This station's day files, oldest first.
    pub fn day_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>, StorageError> {
        let prefix = format!("{}_", self.station_id);

        let mut files: Vec<(NaiveDate, PathBuf)> = fs::read_dir(&self.dir)
            .map_err(StorageError::io(&self.dir))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let date = name
                    .to_str()?
                    .strip_prefix(&prefix)?
                    .strip_suffix(".csv")?;
                let date = NaiveDate::parse_from_str(date, DAY_FORMAT).ok()?;
                Some((date, entry.path()))
            })
            .collect();
        files.sort();

        Ok(files)
    }

    fn enforce_retention(&self) -> Result<(), StorageError> {
        let files = self.day_files()?;
        let excess = files.len().saturating_sub(self.max_files);

        for (_, path) in files.into_iter().take(excess) {
            fs::remove_file(&path).map_err(StorageError::io(&path))?;
            info!(?path, "removed old log file");
        }

        Ok(())
    }
}

fn read_records(path: &Path) -> Result<Vec<StringRecord>, StorageError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(StorageError::csv(path))?;

    reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::csv(path))
}

fn rewrite(path: &Path, records: &[StringRecord]) -> Result<(), StorageError> {
    let mut buf = Vec::new();
    {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut buf);
        writer
            .write_record(FIELDS)
            .map_err(StorageError::csv(path))?;
        for record in records {
            writer
                .write_record(record)
                .map_err(StorageError::csv(path))?;
        }
        writer.flush().map_err(StorageError::io(path))?;
    }

    let tmp = path.with_extension("csv.tmp");
    let mut file = File::create(&tmp).map_err(StorageError::io(&tmp))?;
    file.write_all(&buf).map_err(StorageError::io(&tmp))?;
    file.sync_all().map_err(StorageError::io(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(StorageError::io(path))
}

fn encode(reading: &Reading) -> [String; 8] {
    [
        reading.formatted_timestamp(),
        reading.station_id.clone(),
        reading.raw_distance_mm.to_string(),
        reading.snow_depth_mm.to_string(),
        optional_field(reading.sensor_temp_c),
        optional_field(reading.battery_voltage),
        optional_field(reading.signal_quality),
        reading.transmission_status.as_str().to_string(),
    ]
}

/// The row exactly as it is stored, without a trailing newline.
pub fn format_row(reading: &Reading) -> String {
    encode(reading).join(",")
}

fn optional_field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn field(row: &StringRecord, index: usize) -> Result<&str> {
    row.get(index)
        .with_context(|| format!("missing field: {}", FIELDS[index]))
}

fn decode(row: &StringRecord) -> Result<Reading> {
    let timestamp = DateTime::parse_from_rfc3339(field(row, TIMESTAMP_INDEX)?)
        .with_context(|| format!("failed to parse timestamp: {}", &row[TIMESTAMP_INDEX]))?
        .with_timezone(&Utc);
    let raw_distance_mm = field(row, RAW_DISTANCE_MM_INDEX)?.parse().with_context(|| {
        format!(
            "failed to parse raw distance: {}",
            &row[RAW_DISTANCE_MM_INDEX]
        )
    })?;
    let snow_depth_mm = field(row, SNOW_DEPTH_MM_INDEX)?.parse().with_context(|| {
        format!("failed to parse snow depth: {}", &row[SNOW_DEPTH_MM_INDEX])
    })?;
    let sensor_temp_c = parse_optional(field(row, SENSOR_TEMP_C_INDEX)?).with_context(|| {
        format!(
            "failed to parse temperature: {}",
            &row[SENSOR_TEMP_C_INDEX]
        )
    })?;
    let battery_voltage = parse_optional(field(row, BATTERY_VOLTAGE_INDEX)?).with_context(|| {
        format!(
            "failed to parse battery voltage: {}",
            &row[BATTERY_VOLTAGE_INDEX]
        )
    })?;
    let signal_quality = parse_optional(field(row, SIGNAL_QUALITY_INDEX)?).with_context(|| {
        format!(
            "failed to parse signal quality: {}",
            &row[SIGNAL_QUALITY_INDEX]
        )
    })?;
    let transmission_status = field(row, TRANSMISSION_STATUS_INDEX)?.parse()?;

    Ok(Reading {
        timestamp,
        station_id: field(row, STATION_ID_INDEX)?.to_string(),
        raw_distance_mm,
        snow_depth_mm,
        sensor_temp_c,
        battery_voltage,
        signal_quality,
        transmission_status,
    })
}

fn parse_optional<T>(s: &str) -> Result<Option<T>, T::Err>
where
    T: FromStr,
{
    if s.is_empty() {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}
