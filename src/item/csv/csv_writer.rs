use std::{
    fs::File,
    io::{self, Write},
    path::Path,
    sync::Mutex,
};

use csv::{Writer, WriterBuilder};
use serde::Serialize;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    error::BatchError,
    item::csv::map_csv_error,
};

struct WriterState<W: Write> {
    writer: Writer<W>,
    names: Option<Vec<String>>,
    header_written: bool,
}

/// Delimited flat-file item writer.
///
/// Serializes each item of a chunk into one delimited row. Column names come
/// either from the serde field names (`has_headers`) or from an explicit
/// list set with [`CsvItemWriterBuilder::names`], written once when the step
/// opens the writer.
///
/// `write` only fills the internal buffer; the chunk becomes durable when
/// the step executor calls `flush` at commit time.
pub struct CsvItemWriter<W: Write> {
    state: Mutex<WriterState<W>>,
}

impl<W: Write + Send, T: Serialize> ItemWriter<T> for CsvItemWriter<W> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let mut state = self.lock()?;
        for item in items {
            state.writer.serialize(item).map_err(map_csv_error)?;
        }
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        CsvItemWriter::flush(self)
    }

    fn open(&self) -> ItemWriterResult {
        CsvItemWriter::open(self)
    }
}

impl<W: Write> CsvItemWriter<W> {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WriterState<W>>, BatchError> {
        self.state
            .lock()
            .map_err(|_| BatchError::TransientIo("csv writer lock poisoned".to_string()))
    }

    /// Writes the explicit header row on first use; later calls are no-ops.
    pub fn open(&self) -> ItemWriterResult {
        let mut state = self.lock()?;
        if state.header_written {
            return Ok(());
        }
        state.header_written = true;
        if let Some(names) = state.names.clone() {
            state.writer.write_record(&names).map_err(map_csv_error)?;
        }
        Ok(())
    }

    /// Flushes the internal buffer through to the underlying sink.
    pub fn flush(&self) -> ItemWriterResult {
        let mut state = self.lock()?;
        state
            .writer
            .flush()
            .map_err(|error| BatchError::TransientIo(error.to_string()))
    }

    /// Flushes and returns the underlying sink, consuming the writer.
    pub fn into_inner(self) -> Result<W, BatchError> {
        let state = self
            .state
            .into_inner()
            .map_err(|_| BatchError::TransientIo("csv writer lock poisoned".to_string()))?;
        state
            .writer
            .into_inner()
            .map_err(|error| BatchError::TransientIo(error.to_string()))
    }
}

/// Builder for [`CsvItemWriter`].
///
/// Defaults: comma delimiter, no header row. Explicit [`names`] take
/// precedence over serde-derived headers.
///
/// [`names`]: CsvItemWriterBuilder::names
#[derive(Default)]
pub struct CsvItemWriterBuilder {
    delimiter: u8,
    has_headers: bool,
    names: Option<Vec<String>>,
}

impl CsvItemWriterBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            has_headers: false,
            names: None,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Writes a header row derived from the serde field names.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    /// Writes a header row with exactly these column names, whatever the
    /// struct fields are called.
    pub fn names(mut self, names: &[&str]) -> Self {
        self.names = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    /// Creates a writer over a file, truncating any existing content.
    ///
    /// # Panics
    /// Panics if the file cannot be created; opening the sink is wiring,
    /// not writing.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> CsvItemWriter<File> {
        let writer = WriterBuilder::new()
            .flexible(false)
            .delimiter(self.delimiter)
            .has_headers(self.has_headers && self.names.is_none())
            .from_path(path)
            .expect("Unable to create csv file");

        CsvItemWriter {
            state: Mutex::new(WriterState {
                writer,
                names: self.names,
                header_written: false,
            }),
        }
    }

    /// Creates a writer over any `Write` sink.
    pub fn from_writer<W: io::Write>(self, wtr: W) -> CsvItemWriter<W> {
        let writer = WriterBuilder::new()
            .flexible(false)
            .delimiter(self.delimiter)
            .has_headers(self.has_headers && self.names.is_none())
            .from_writer(wtr);

        CsvItemWriter {
            state: Mutex::new(WriterState {
                writer,
                names: self.names,
                header_written: false,
            }),
        }
    }
}
