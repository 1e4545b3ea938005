//! # Recording and CSV Export Module
//!
//! Buffers sensor readings for one recording session and exports them as a
//! CSV artifact when the session ends.
//!
//! ## Architecture
//! - **SensorRecorder**: Long-lived factory holding the sensor subsystem and settings
//! - **Recording**: One session. Created by `start()`, consumed by `serialize()`
//! - **Writer Thread**: Sole owner of the session buffer, fed through a channel
//! - **Spool**: Temporary file that staged readings are flushed to once the
//!   staging buffer passes `flush_threshold`, so long sessions stay bounded in memory
//!
//! ## CSV Layout
//! ```text
//! timestamp,<sensor 1>,...,<sensor n>,accuracy
//! 1700000000000,1.000000;2.000000;3.000000,0.000000,3
//! ```
//! Sensor columns are the distinct sensor names seen in this session, in order
//! of first appearance. A row fills only its own sensor's column (values joined
//! by `;`); every other column, and any NaN value, is written as `0.000000`.

use crate::error::RecorderError;
use crate::reading::{SensorKind, SensorReading};
use crate::sensors::SensorSubsystem;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Rendering of NaN values and of columns a row does not fill
pub const MISSING_VALUE: &str = "0.000000";

/// Separator between the values of one sensor inside its column
const VALUE_SEPARATOR: char = ';';

/// Where readings produced by the sensor subsystem are delivered.
///
/// Cloned into every registered listener. `push` returns false once the
/// session that owns the buffer has finished.
#[derive(Clone)]
pub struct ReadingSink {
    tx: Sender<SensorReading>,
}

impl ReadingSink {
    pub fn push(&self, reading: SensorReading) -> bool {
        self.tx.send(reading).is_ok()
    }

    /// Sink not attached to any recorder; the receiver sees every push
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<SensorReading>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

/// Recorder settings, usually taken from `Config`
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub sampling_period: Duration,
    /// Readings held in memory before they are appended to the spool
    pub flush_threshold: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            sampling_period: Duration::from_micros(crate::reading::SAMPLING_PERIOD_US),
            flush_threshold: 4096,
        }
    }
}

/// The exported CSV of one session.
///
/// Backed by a temporary file that is removed when the artifact is dropped,
/// i.e. once it has been handed over the transfer channel.
#[derive(Debug)]
pub struct CsvArtifact {
    file: NamedTempFile,
    pub rows: usize,
    pub columns: Vec<String>,
    pub size_bytes: u64,
}

impl CsvArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn header(&self) -> String {
        header_line(&self.columns)
    }
}

/// Command sent from the session handle to the writer thread
#[derive(Debug)]
enum RecorderCommand {
    /// Drain pending readings, export, reply and exit
    Finish(Sender<Result<CsvArtifact, RecorderError>>),
}

/// Backing storage for spooled rows
trait SpoolFile: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> SpoolFile for T {}

/// Buffer state owned by the writer thread
struct SessionBuffer {
    /// Readings not yet spooled
    staging: Vec<SensorReading>,
    /// Distinct sensor names in order of first appearance
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    spool: Option<Box<dyn SpoolFile>>,
    /// Length of the spool prefix made of complete batches
    spool_committed: u64,
    spooled_rows: usize,
    flush_threshold: usize,
    /// Set after a spool write fails; readings then stay in memory
    spool_failed: bool,
}

impl SessionBuffer {
    fn new(flush_threshold: usize) -> Self {
        Self {
            staging: Vec::new(),
            columns: Vec::new(),
            column_index: HashMap::new(),
            spool: None,
            spool_committed: 0,
            spooled_rows: 0,
            flush_threshold: flush_threshold.max(1),
            spool_failed: false,
        }
    }

    #[cfg(test)]
    fn with_spool(flush_threshold: usize, spool: Box<dyn SpoolFile>) -> Self {
        Self {
            spool: Some(spool),
            ..Self::new(flush_threshold)
        }
    }

    fn push(&mut self, reading: SensorReading) {
        if !self.column_index.contains_key(&reading.sensor_name) {
            self.column_index
                .insert(reading.sensor_name.clone(), self.columns.len());
            self.columns.push(reading.sensor_name.clone());
        }
        self.staging.push(reading);

        if self.should_flush() {
            if let Err(e) = self.flush_to_spool() {
                log::error!("Failed to flush readings, keeping them in memory: {}", e);
                self.spool_failed = true;
            }
        }
    }

    fn should_flush(&self) -> bool {
        !self.spool_failed && self.staging.len() >= self.flush_threshold
    }

    fn total_rows(&self) -> usize {
        self.spooled_rows + self.staging.len()
    }

    /// Append staged readings to the spool as `timestamp \t column \t accuracy \t cell`.
    ///
    /// A batch is committed whole or not at all: on error the staged readings
    /// are kept and any partially written tail is ignored by `export`.
    fn flush_to_spool(&mut self) -> Result<(), RecorderError> {
        if self.staging.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::new();
        for reading in &self.staging {
            let column = self.column_index[&reading.sensor_name];
            writeln!(
                batch,
                "{}\t{}\t{}\t{}",
                reading.timestamp_ms,
                column,
                reading.accuracy,
                format_cell(&reading.values)
            )
            .map_err(RecorderError::Spool)?;
        }

        if self.spool.is_none() {
            let file = tempfile::tempfile().map_err(RecorderError::Spool)?;
            self.spool = Some(Box::new(file));
        }

        if let Some(spool) = self.spool.as_mut() {
            spool
                .seek(SeekFrom::Start(self.spool_committed))
                .map_err(RecorderError::Spool)?;
            spool.write_all(&batch).map_err(RecorderError::Spool)?;
            spool.flush().map_err(RecorderError::Spool)?;
        }

        log::debug!("Spooled {} readings", self.staging.len());
        self.spool_committed += batch.len() as u64;
        self.spooled_rows += self.staging.len();
        self.staging.clear();
        Ok(())
    }

    /// Write the final CSV: header, spooled rows, then rows still in memory
    fn export(mut self) -> Result<CsvArtifact, RecorderError> {
        log::info!("Writing {} records to file.", self.total_rows());

        let mut artifact = tempfile::Builder::new()
            .prefix("recording")
            .suffix(".csv")
            .tempfile()
            .map_err(RecorderError::Artifact)?;

        let width = self.columns.len();
        {
            let mut out = BufWriter::new(artifact.as_file_mut());
            writeln!(out, "{}", header_line(&self.columns)).map_err(RecorderError::Artifact)?;

            if let Some(mut spool) = self.spool.take() {
                spool.seek(SeekFrom::Start(0)).map_err(RecorderError::Spool)?;
                let committed = Read::take(&mut spool, self.spool_committed);

                for line in BufReader::new(committed).lines() {
                    let line = line.map_err(RecorderError::Spool)?;
                    let mut fields = line.splitn(4, '\t');
                    let (Some(timestamp), Some(column), Some(accuracy), Some(cell)) =
                        (fields.next(), fields.next(), fields.next(), fields.next())
                    else {
                        log::warn!("Skipping malformed spool line: {}", line);
                        continue;
                    };
                    let column = column.parse::<usize>().unwrap_or(usize::MAX);
                    write_row(&mut out, timestamp, column, cell, accuracy, width)
                        .map_err(RecorderError::Artifact)?;
                }
            }

            for reading in &self.staging {
                let column = self.column_index[&reading.sensor_name];
                write_row(
                    &mut out,
                    &reading.timestamp_ms.to_string(),
                    column,
                    &format_cell(&reading.values),
                    &reading.accuracy.to_string(),
                    width,
                )
                .map_err(RecorderError::Artifact)?;
            }

            out.flush().map_err(RecorderError::Artifact)?;
        }

        let size_bytes = artifact
            .as_file()
            .metadata()
            .map_err(RecorderError::Artifact)?
            .len();

        Ok(CsvArtifact {
            file: artifact,
            rows: self.total_rows(),
            columns: self.columns,
            size_bytes,
        })
    }
}

/// Quote a header field that would otherwise split or break the row
fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn header_line(columns: &[String]) -> String {
    let mut header = String::from("timestamp");
    for column in columns {
        header.push(',');
        header.push_str(&escape_field(column));
    }
    header.push_str(",accuracy");
    header
}

fn format_value(value: f32) -> String {
    if value.is_nan() {
        MISSING_VALUE.to_string()
    } else {
        format!("{:.6}", value)
    }
}

fn format_cell(values: &[f32]) -> String {
    if values.is_empty() {
        return MISSING_VALUE.to_string();
    }
    values
        .iter()
        .map(|v| format_value(*v))
        .collect::<Vec<_>>()
        .join(&VALUE_SEPARATOR.to_string())
}

fn write_row(
    out: &mut impl Write,
    timestamp: &str,
    column: usize,
    cell: &str,
    accuracy: &str,
    width: usize,
) -> std::io::Result<()> {
    write!(out, "{}", timestamp)?;
    for index in 0..width {
        if index == column {
            write!(out, ",{}", cell)?;
        } else {
            write!(out, ",{}", MISSING_VALUE)?;
        }
    }
    writeln!(out, ",{}", accuracy)
}

/// Starts recording sessions against a sensor subsystem.
pub struct SensorRecorder {
    sensors: Arc<dyn SensorSubsystem>,
    settings: RecorderSettings,
}

impl SensorRecorder {
    pub fn new(sensors: Arc<dyn SensorSubsystem>, settings: RecorderSettings) -> Self {
        Self { sensors, settings }
    }

    /// Begin a new session with an empty buffer and subscribe to every
    /// available required sensor.
    ///
    /// Sensors the device lacks, or that refuse registration, are logged and
    /// skipped; the session proceeds with fewer columns.
    pub fn start(&self) -> Result<Recording, RecorderError> {
        let (reading_tx, reading_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        let buffer = SessionBuffer::new(self.settings.flush_threshold);

        let writer_thread = thread::Builder::new()
            .name("recorder-writer".to_string())
            .spawn(move || Self::writer_loop(reading_rx, command_rx, buffer))
            .map_err(RecorderError::Thread)?;

        let sink = ReadingSink { tx: reading_tx };
        let available = self.sensors.available();
        let missing: Vec<&'static str> = SensorKind::required()
            .into_iter()
            .filter(|kind| !available.contains(kind))
            .map(|kind| kind.type_name())
            .collect();
        log::debug!("Missing sensors: {:?}", missing);

        for kind in SensorKind::required() {
            if !available.contains(&kind) {
                continue;
            }
            if let Err(e) = self
                .sensors
                .register(kind, self.settings.sampling_period, sink.clone())
            {
                log::warn!("{}", e);
            }
        }

        Ok(Recording {
            sensors: self.sensors.clone(),
            sink,
            command_tx,
            writer_thread: Some(writer_thread),
            subscribed: true,
        })
    }

    /// Writer thread loop
    ///
    /// Owns the session buffer. Readings and the finish command arrive on
    /// separate channels; on finish every reading already queued is drained
    /// before export so arrival order is kept.
    fn writer_loop(
        readings: Receiver<SensorReading>,
        commands: Receiver<RecorderCommand>,
        mut buffer: SessionBuffer,
    ) {
        loop {
            crossbeam_channel::select! {
                recv(readings) -> reading => match reading {
                    Ok(reading) => buffer.push(reading),
                    Err(_) => break,
                },
                recv(commands) -> command => match command {
                    Ok(RecorderCommand::Finish(reply)) => {
                        for reading in readings.try_iter() {
                            buffer.push(reading);
                        }
                        let _ = reply.send(buffer.export());
                        return;
                    }
                    Err(_) => break,
                },
            }
        }
        log::debug!("Recorder writer: session dropped without export");
    }
}

/// One recording session.
///
/// Owns the sensor subscriptions and the writer thread. Dropping it without
/// calling `serialize` unsubscribes and discards the buffered readings.
pub struct Recording {
    sensors: Arc<dyn SensorSubsystem>,
    sink: ReadingSink,
    command_tx: Sender<RecorderCommand>,
    writer_thread: Option<thread::JoinHandle<()>>,
    subscribed: bool,
}

impl Recording {
    /// Append one reading in arrival order
    pub fn on_reading(&self, reading: SensorReading) {
        self.sink.push(reading);
    }

    pub fn sink(&self) -> ReadingSink {
        self.sink.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Unsubscribe from all sensors. Calling it again does nothing.
    pub fn stop(&mut self) {
        if self.subscribed {
            self.sensors.unregister_all();
            self.subscribed = false;
        }
    }

    /// Stop the session if still running and export every buffered reading.
    pub fn serialize(mut self) -> Result<CsvArtifact, RecorderError> {
        self.stop();

        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(RecorderCommand::Finish(reply_tx))
            .map_err(|_| RecorderError::WriterStopped)?;
        let result = reply_rx.recv().map_err(|_| RecorderError::WriterStopped)?;

        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
        result
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        self.stop();
        // Not joined: the writer exits on its own once every sender is gone
    }
}
