use crate::errors::{Result, SpotifyToMp3Error};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

const FIELD_COUNT: usize = 4;

/// One exported playlist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub title: String,
    pub artist: String,
    pub canonical_url: String,
    pub artwork_url: String,
}

impl TrackRecord {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        canonical_url: impl Into<String>,
        artwork_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            canonical_url: canonical_url.into(),
            artwork_url: artwork_url.into(),
        }
    }

    /// Free-text query handed to the search backend
    pub fn search_query(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Line-oriented track store.
///
/// Four comma-separated fields per line in the order
/// `title, artist, canonical_url, artwork_url`. Fields containing a comma,
/// quote or line break are quoted, so titles like `Hello, Goodbye` survive a
/// round trip. Files written without quoting read back unchanged, including
/// titles such as `"Heroes"` whose quotes were never escaped.
pub struct TrackStore;

impl TrackStore {
    /// Read every well-formed record from the file at `path`
    pub fn read(path: &Path) -> Result<Vec<TrackRecord>> {
        let file = std::fs::File::open(path)?;
        let records = Self::read_from(file)?;
        debug!("Read {} records from {}", records.len(), path.display());
        Ok(records)
    }

    /// Read records from any reader, skipping malformed lines with a warning
    pub fn read_from<R: Read>(mut reader: R) -> Result<Vec<TrackRecord>> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        for (index, raw) in bytes.split(|&b| b == b'\n').enumerate() {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = match std::str::from_utf8(raw) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => line,
                Err(e) => {
                    warn!("Skipping line {}: {}", index + 1, e);
                    continue;
                }
            };

            let fields = match parse_line(line) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!("Skipping line {}: {}", index + 1, e);
                    continue;
                }
            };

            if fields.len() != FIELD_COUNT {
                warn!(
                    "Skipping line {}: expected {} fields, found {}",
                    index + 1,
                    FIELD_COUNT,
                    fields.len()
                );
                continue;
            }

            records.push(TrackRecord::new(
                &fields[0],
                &fields[1],
                fields[2].trim(),
                fields[3].trim(),
            ));
        }

        Ok(records)
    }

    /// Write `records` to `path`, replacing any existing file
    pub fn write(path: &Path, records: &[TrackRecord]) -> Result<usize> {
        let file = std::fs::File::create(path)?;
        let written = Self::write_to(file, records)?;
        debug!("Wrote {} records to {}", written, path.display());
        Ok(written)
    }

    /// Write records to any writer; records that cannot be encoded are skipped
    pub fn write_to<W: Write>(writer: W, records: &[TrackRecord]) -> Result<usize> {
        let mut writer = line_writer(writer);

        let mut written = 0;
        for record in records {
            let fields = [
                single_line(&record.title),
                single_line(&record.artist),
                record.canonical_url.trim().to_string(),
                record.artwork_url.trim().to_string(),
            ];

            match writer.write_record(&fields) {
                Ok(()) => written += 1,
                Err(e) if e.is_io_error() => return Err(SpotifyToMp3Error::Csv(e)),
                Err(e) => warn!(
                    "Track named {} failed due to an encoding error: {}",
                    record.title, e
                ),
            }
        }

        writer.flush()?;
        Ok(written)
    }
}

fn line_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer)
}

/// Fields of one line. A line containing quotes that this store would not
/// have written that way is a legacy line and is split on commas verbatim.
fn parse_line(line: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let row = match reader.records().next() {
        Some(row) => row?,
        None => return Ok(Vec::new()),
    };
    let fields: Vec<String> = row.iter().map(str::to_string).collect();

    if line.contains('"') && encode_line(&fields)? != line {
        debug!("Reading unquoted legacy line: {}", line);
        return Ok(line.split(',').map(str::to_string).collect());
    }
    Ok(fields)
}

fn encode_line(fields: &[String]) -> Result<String> {
    let mut writer = line_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| SpotifyToMp3Error::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).trim_end_matches('\n').to_string())
}

/// Keeps one record per line
fn single_line(value: &str) -> String {
    value.split(['\r', '\n']).collect::<Vec<_>>().join(" ")
}
