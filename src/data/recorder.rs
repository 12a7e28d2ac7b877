//! Row accumulation and durable persistence.
//!
//! The [`RowRecorder`] is the single writer for one run's data: the engine
//! forwards every row the experiment yields, the recorder augments it with
//! the derived columns (`t`, `time`, `sync_t`), appends it to the CSV sink,
//! and publishes it to the in-memory snapshot the presentation layer polls.
//!
//! The sink is append-only and flushed after every row, so an abrupt
//! interruption loses at most the row currently being written. In debug mode
//! no file is created at all; snapshot accumulation still happens so live
//! plots remain meaningful during dry runs.

use crate::config::StorageSettings;
use crate::data::manifest::RunManifest;
use crate::data::row::{DataSnapshot, Row, RowValues};
use crate::error::{RunError, RunResult};
use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};
use std::time::Instant;
use tracing::{debug, info};

/// Output file locations for one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// The append-only CSV data file.
    pub csv: PathBuf,
    /// The JSON manifest sidecar.
    pub manifest: PathBuf,
}

enum SinkState {
    /// No sink yet (before `open`, or forever in debug mode).
    Pending,
    /// Sink open and accepting rows.
    Open(csv::Writer<File>),
    /// Sink flushed and released.
    Closed,
}

/// Accumulates measurement rows for one run and owns its durable sink.
///
/// One writer (the run's worker task) and any number of snapshot readers.
/// Readers only ever copy `Arc` pointers, so the writer is never blocked for
/// longer than the publication of a single row.
pub struct RowRecorder {
    columns: Vec<String>,
    started: Instant,
    debug: bool,
    sync_mark: Mutex<Option<Instant>>,
    rows: RwLock<Vec<Arc<Row>>>,
    sink: Mutex<SinkState>,
    paths: OnceLock<RunPaths>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RowRecorder {
    /// Create a recorder for the given declared columns.
    ///
    /// `started` is the run's monotonic start instant, shared with the run
    /// context so `t` values agree everywhere.
    pub fn new(columns: Vec<String>, started: Instant, debug: bool) -> Self {
        Self {
            columns,
            started,
            debug,
            sync_mark: Mutex::new(None),
            rows: RwLock::new(Vec::new()),
            sink: Mutex::new(SinkState::Pending),
            paths: OnceLock::new(),
        }
    }

    /// The full CSV header: derived columns followed by declared columns.
    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["t".to_string(), "time".to_string(), "sync_t".to_string()];
        header.extend(self.columns.iter().cloned());
        header
    }

    /// Open the durable sink and write the manifest sidecar.
    ///
    /// Creates `<data_dir>[/<date>]/<name>-<timestamp>.csv` with a comment
    /// banner and the header row, plus `<name>-<timestamp>.json`. Fills
    /// `manifest.data_file`. A no-op in debug mode.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Persistence`] if the directory or either file
    /// cannot be created.
    pub fn open(&self, storage: &StorageSettings, manifest: &mut RunManifest) -> RunResult<()> {
        if self.debug {
            debug!("debug run: durable sink disabled");
            return Ok(());
        }

        let mut dir = storage.data_dir.clone();
        if storage.use_date_subfolder {
            dir = dir.join(
                manifest
                    .started_at
                    .format(&storage.date_folder_format)
                    .to_string(),
            );
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))
            .map_err(RunError::Persistence)?;

        let stem = format!(
            "{}-{}",
            manifest.experiment,
            manifest.started_at.format(&storage.timestamp_format)
        );
        let csv_path = dir.join(format!("{stem}.csv"));
        let manifest_path = dir.join(format!("{stem}.json"));
        manifest.data_file = Some(format!("{stem}.csv"));

        let mut file = File::create(&csv_path)
            .with_context(|| format!("failed to create data file {}", csv_path.display()))
            .map_err(RunError::Persistence)?;

        writeln!(
            file,
            "# {} experiment: ran at {} on {}",
            manifest.experiment,
            manifest.started_at.format("%Y/%m/%d %H:%M:%S"),
            manifest.hostname
        )
        .and_then(|()| writeln!(file, "# {}", manifest.parameters_line()))
        .and_then(|()| writeln!(file, "#"))
        .context("failed to write CSV banner")
        .map_err(RunError::Persistence)?;

        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(self.header())
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .context("failed to write CSV header")
            .map_err(RunError::Persistence)?;

        let json = serde_json::to_string_pretty(manifest)
            .context("failed to serialize run manifest")
            .map_err(RunError::Persistence)?;
        std::fs::write(&manifest_path, json)
            .with_context(|| format!("failed to write manifest {}", manifest_path.display()))
            .map_err(RunError::Persistence)?;

        info!(csv = %csv_path.display(), "run data sink opened");
        let _ = self.paths.set(RunPaths {
            csv: csv_path,
            manifest: manifest_path,
        });
        *lock(&self.sink) = SinkState::Open(writer);
        Ok(())
    }

    /// Record one emitted row.
    ///
    /// Computes the derived columns, publishes the row to the snapshot, and
    /// appends it to the sink (flushing immediately). Cells for declared
    /// columns the emission did not supply are written empty.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Schema`] if the emission contains an undeclared
    /// column (the row is not recorded at all), or [`RunError::Persistence`]
    /// if the sink write fails (the row remains visible in the snapshot; the
    /// run is expected to end in `Errored`).
    pub fn append(&self, values: RowValues) -> RunResult<()> {
        for column in values.keys() {
            if !self.columns.iter().any(|c| c == column) {
                return Err(RunError::Schema {
                    column: column.clone(),
                });
            }
        }

        let t = self.started.elapsed().as_secs_f64();
        let now = Utc::now();
        let sync_t = match *lock(&self.sync_mark) {
            Some(mark) => mark.elapsed().as_secs_f64(),
            None => t,
        };

        let row = Arc::new(Row {
            t,
            time: now,
            sync_t,
            values,
        });

        {
            let mut rows = self
                .rows
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            rows.push(row.clone());
        }

        let mut sink = lock(&self.sink);
        if let SinkState::Open(writer) = &mut *sink {
            let mut record = vec![
                row.t.to_string(),
                row.time.to_rfc3339(),
                row.sync_t.to_string(),
            ];
            for column in &self.columns {
                record.push(render_cell(row.values.get(column)));
            }
            writer
                .write_record(&record)
                .and_then(|()| writer.flush().map_err(csv::Error::from))
                .context("failed to append row to CSV sink")
                .map_err(RunError::Persistence)?;
        }

        Ok(())
    }

    /// A consistent view of all rows recorded so far.
    pub fn snapshot(&self) -> DataSnapshot {
        let rows = self
            .rows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        DataSnapshot::new(rows.clone())
    }

    /// Overwrite the sync mark with "now". Last call wins; rows already
    /// recorded are unaffected.
    pub fn mark_sync(&self) {
        *lock(&self.sync_mark) = Some(Instant::now());
    }

    /// Flush and release the sink. Idempotent; called on every terminal
    /// transition so no file handle outlives the run.
    pub fn close(&self) -> RunResult<()> {
        let mut sink = lock(&self.sink);
        if let SinkState::Open(writer) = &mut *sink {
            writer
                .flush()
                .context("failed to flush CSV sink")
                .map_err(RunError::Persistence)?;
            debug!("run data sink released");
        }
        *sink = SinkState::Closed;
        Ok(())
    }

    /// Output file locations, once the sink has been opened.
    pub fn paths(&self) -> Option<&RunPaths> {
        self.paths.get()
    }

    /// Whether rows are currently being written to a durable sink.
    pub fn is_persisting(&self) -> bool {
        matches!(*lock(&self.sink), SinkState::Open(_))
    }
}

fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ResolvedParams;
    use serde_json::json;
    use uuid::Uuid;

    fn storage(dir: &std::path::Path) -> StorageSettings {
        StorageSettings {
            data_dir: dir.to_path_buf(),
            use_date_subfolder: false,
            ..StorageSettings::default()
        }
    }

    fn manifest(name: &str, debug: bool) -> RunManifest {
        RunManifest::new(
            Uuid::new_v4(),
            name,
            &ResolvedParams::default(),
            vec!["v".to_string()],
            Utc::now(),
            debug,
        )
    }

    fn recorder(debug: bool) -> RowRecorder {
        RowRecorder::new(vec!["v".to_string()], Instant::now(), debug)
    }

    fn emit(v: impl Into<Value>) -> RowValues {
        let mut values = RowValues::new();
        values.insert("v".to_string(), v.into());
        values
    }

    #[test]
    fn round_trip_row_with_derived_columns() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(false);
        let mut man = manifest("volt", false);
        rec.open(&storage(dir.path()), &mut man).unwrap();

        rec.append(emit(1.5)).unwrap();
        rec.close().unwrap();

        let snapshot = rec.snapshot();
        assert_eq!(snapshot.len(), 1);
        let row = snapshot.latest().unwrap();
        assert_eq!(row.number("v"), Some(1.5));
        assert!(row.t >= 0.0 && row.t < 5.0);
        // No sync mark: sync_t equals elapsed-from-start.
        assert!((row.sync_t - row.t).abs() < 0.5);

        let contents = std::fs::read_to_string(&rec.paths().unwrap().csv).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().starts_with("# volt experiment"));
        let data: Vec<&str> = contents
            .lines()
            .filter(|l| !l.starts_with('#'))
            .collect();
        assert_eq!(data[0], "t,time,sync_t,v");
        assert!(data[1].ends_with(",1.5"));
    }

    #[test]
    fn undeclared_column_is_a_schema_error() {
        let rec = recorder(true);
        let mut values = RowValues::new();
        values.insert("x".to_string(), json!(1.0));
        let err = rec.append(values).unwrap_err();
        assert!(matches!(err, RunError::Schema { column } if column == "x"));
        assert!(rec.snapshot().is_empty());
    }

    #[test]
    fn missing_declared_column_written_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(false);
        let mut man = manifest("gap", false);
        rec.open(&storage(dir.path()), &mut man).unwrap();
        rec.append(RowValues::new()).unwrap();
        rec.close().unwrap();

        let contents = std::fs::read_to_string(&rec.paths().unwrap().csv).unwrap();
        let data_line = contents
            .lines()
            .filter(|l| !l.starts_with('#'))
            .nth(1)
            .unwrap();
        assert!(data_line.ends_with(','), "expected empty trailing cell: {data_line}");
    }

    #[test]
    fn debug_mode_creates_no_files_but_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(true);
        let mut man = manifest("dry", true);
        rec.open(&storage(dir.path()), &mut man).unwrap();

        rec.append(emit(2.0)).unwrap();
        rec.append(emit(3.0)).unwrap();
        rec.close().unwrap();

        assert_eq!(rec.snapshot().len(), 2);
        assert!(rec.paths().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn sync_mark_resets_sync_t_last_call_wins() {
        let rec = recorder(true);
        std::thread::sleep(std::time::Duration::from_millis(30));
        rec.mark_sync();
        rec.mark_sync(); // rapid repeat: last call wins
        rec.append(emit(1.0)).unwrap();

        let snapshot = rec.snapshot();
        let row = snapshot.latest().unwrap();
        assert!(row.t >= 0.03);
        assert!(row.sync_t < row.t, "sync_t {} should restart from the mark", row.sync_t);
    }

    #[test]
    fn manifest_sidecar_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(false);
        let mut man = manifest("meta", false);
        rec.open(&storage(dir.path()), &mut man).unwrap();
        rec.close().unwrap();

        let paths = rec.paths().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.manifest).unwrap()).unwrap();
        assert_eq!(json["experiment"], "meta");
        assert_eq!(json["columns"][0], "v");
        assert_eq!(json["data_file"], man.data_file.clone().unwrap().as_str());
    }

    #[test]
    fn close_is_idempotent() {
        let rec = recorder(true);
        rec.close().unwrap();
        rec.close().unwrap();
        assert!(!rec.is_persisting());
    }

    #[test]
    fn rows_keep_emission_order() {
        let rec = recorder(true);
        for i in 0..20 {
            rec.append(emit(i as f64)).unwrap();
        }
        let values: Vec<f64> = rec
            .snapshot()
            .iter()
            .map(|r| r.number("v").unwrap())
            .collect();
        let expected: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(values, expected);
    }
}
