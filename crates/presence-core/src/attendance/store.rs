use super::{AttendanceRecord, DaySnapshot, Presence, DATE_FORMAT, HEADER};
use chrono::NaiveDate;
use csv::{ByteRecord, ReaderBuilder, Terminator, WriterBuilder};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("attendance file I/O: {0}")]
    Io(#[from] io::Error),
    #[error("attendance CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// The attendance CSV file: header `date,name,first_seen,last_seen`, one row
/// per (date, name).
///
/// Every write rebuilds the whole file in a temporary sibling and renames it
/// over the original, so readers see either the old or the new file. Not safe
/// for more than one writing process.
#[derive(Debug, Clone)]
pub struct AttendanceStore {
    path: PathBuf,
}

impl AttendanceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with just a header row if it does not exist yet.
    ///
    /// An existing file is left alone, whatever its header says.
    pub fn ensure_header(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            return Ok(());
        }
        self.replace_rows(&[], &[])
    }

    /// Rows dated `today`, keyed by name. A missing file is an empty day.
    ///
    /// Rows whose timestamps cannot be read are kept verbatim in the snapshot
    /// and written back unchanged. Duplicate rows for one name are merged.
    pub fn load_today(&self, today: NaiveDate) -> Result<DaySnapshot, StoreError> {
        let today_field = today.format(DATE_FORMAT).to_string();
        let mut snapshot = DaySnapshot::new(today);
        let mut unreadable = Vec::new();

        for raw in self.read_raw()? {
            if field(&raw, 0) != today_field.as_bytes() {
                continue;
            }
            let record = to_record(&raw);
            let Some(loaded) = record.presence() else {
                tracing::warn!(name = %record.name, "attendance row has unreadable timestamps, keeping it as is");
                unreadable.push((record.name, raw.iter().map(<[u8]>::to_vec).collect()));
                continue;
            };
            let merged = match snapshot.get(&record.name) {
                Some(existing) => Presence {
                    first_seen: existing.first_seen.min(loaded.first_seen),
                    last_seen: existing.last_seen.max(loaded.last_seen),
                },
                None => loaded,
            };
            snapshot.insert(record.name, merged);
        }

        for (name, fields) in unreadable {
            if !snapshot.keep_unreadable(name.clone(), fields) {
                tracing::warn!(name = %name, "dropping unreadable duplicate of an attendance row");
            }
        }

        Ok(snapshot)
    }

    /// All rows in file order, fields decoded lossily. A missing file has none.
    pub fn read_records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self.read_raw()?.iter().map(to_record).collect())
    }

    /// Replace every row dated `snapshot.date()` with the snapshot's rows.
    ///
    /// Rows for other dates are copied through byte for byte. Writing the same
    /// snapshot twice produces the same file.
    pub fn write_snapshot(&self, snapshot: &DaySnapshot) -> Result<(), StoreError> {
        let date_field = snapshot.date().format(DATE_FORMAT).to_string();
        let kept: Vec<ByteRecord> = self
            .read_raw()?
            .into_iter()
            .filter(|raw| field(raw, 0) != date_field.as_bytes())
            .collect();

        let mut fresh: Vec<ByteRecord> = snapshot
            .records()
            .iter()
            .map(|r| {
                ByteRecord::from(vec![
                    r.date.as_str(),
                    r.name.as_str(),
                    r.first_seen.as_str(),
                    r.last_seen.as_str(),
                ])
            })
            .collect();
        fresh.extend(snapshot.unreadable_rows().map(ByteRecord::from));
        fresh.sort_by(|a, b| field(a, 1).cmp(field(b, 1)));

        self.replace_rows(&kept, &fresh)
    }

    fn read_raw(&self) -> Result<Vec<ByteRecord>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let mut rows = Vec::new();
        for row in reader.byte_records() {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Atomically rewrite the file as header + `kept` + `fresh`.
    fn replace_rows(&self, kept: &[ByteRecord], fresh: &[ByteRecord]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = WriterBuilder::new()
                .flexible(true)
                .terminator(Terminator::Any(b'\n'))
                .from_writer(tmp.as_file_mut());
            writer.write_record(HEADER)?;
            for raw in kept.iter().chain(fresh) {
                writer.write_byte_record(raw)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        tracing::trace!(path = %self.path.display(), rows = kept.len() + fresh.len(), "attendance written");
        Ok(())
    }
}

fn field(raw: &ByteRecord, idx: usize) -> &[u8] {
    raw.get(idx).unwrap_or_default()
}

fn to_record(raw: &ByteRecord) -> AttendanceRecord {
    let text = |idx| String::from_utf8_lossy(field(raw, idx)).into_owned();
    AttendanceRecord {
        date: text(0),
        name: text(1),
        first_seen: text(2),
        last_seen: text(3),
    }
}
