use csv::{ReaderBuilder, StringRecordsIntoIter, Terminator, Trim};
use serde::de::DeserializeOwned;
use std::{fs::File, io::Read, path::Path, sync::Mutex};

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
    item::csv::map_csv_error,
};

struct ReaderState<R> {
    records: StringRecordsIntoIter<R>,
    /// Raw records consumed so far, including malformed ones.
    position: usize,
}

/// Delimited flat-file item reader.
///
/// Deserializes one row per `read` call into a Rust struct via serde, from a
/// file, string or any `Read` source. A malformed row is reported as
/// [`BatchError::DataFormat`], so the step's skip policy can discard it and
/// continue with the next row; an I/O failure of the underlying source is
/// [`BatchError::TransientIo`].
///
/// The reader counts raw records consumed and exposes the count through the
/// checkpoint surface, so a restarted step can skip straight to the first
/// record of the chunk that failed.
///
/// # Examples
///
/// ```
/// use chunkflow::item::csv::csv_reader::CsvItemReaderBuilder;
/// use chunkflow::core::item::ItemReader;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Customer {
///     name: String,
///     age: u8,
/// }
///
/// let data = "name,age\nKim,28\nLee,15";
/// let reader = CsvItemReaderBuilder::new()
///     .has_headers(true)
///     .from_reader(data.as_bytes());
///
/// let first: Customer = reader.read().unwrap().unwrap();
/// assert_eq!(first.name, "Kim");
/// assert_eq!(reader.checkpoint(), Some(1));
///
/// let second: Customer = reader.read().unwrap().unwrap();
/// assert_eq!(second.age, 15);
/// assert!(ItemReader::<Customer>::read(&reader).unwrap().is_none());
/// ```
pub struct CsvItemReader<R> {
    state: Mutex<ReaderState<R>>,
}

impl<R> CsvItemReader<R> {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ReaderState<R>>, BatchError> {
        self.state
            .lock()
            .map_err(|_| BatchError::TransientIo("csv reader lock poisoned".to_string()))
    }

    /// Raw records consumed so far, including malformed ones.
    pub fn checkpoint(&self) -> Option<usize> {
        self.lock().ok().map(|state| state.position)
    }

    /// Skips forward to a previously committed position. The cursor cannot
    /// be rewound; reopen the source for that.
    pub fn restore(&self, checkpoint: usize) -> Result<(), BatchError>
    where
        R: Read,
    {
        let mut state = self.lock()?;
        if checkpoint < state.position {
            return Err(BatchError::Configuration(format!(
                "cannot rewind csv reader from record {} to {}",
                state.position, checkpoint
            )));
        }
        while state.position < checkpoint {
            match state.records.next() {
                Some(_) => state.position += 1,
                None => break,
            }
        }
        Ok(())
    }
}

impl<R: Read + Send, T: DeserializeOwned> ItemReader<T> for CsvItemReader<R> {
    fn read(&self) -> ItemReaderResult<T> {
        let mut state = self.lock()?;
        match state.records.next() {
            None => Ok(None),
            Some(Ok(record)) => {
                state.position += 1;
                match record.deserialize(None) {
                    Ok(item) => Ok(Some(item)),
                    Err(error) => Err(BatchError::DataFormat(error.to_string())),
                }
            }
            Some(Err(error)) => {
                if !error.is_io_error() {
                    // The malformed raw record has been consumed; the next
                    // read continues with the following one.
                    state.position += 1;
                }
                Err(map_csv_error(error))
            }
        }
    }

    fn checkpoint(&self) -> Option<usize> {
        CsvItemReader::checkpoint(self)
    }

    fn restore(&self, checkpoint: usize) -> Result<(), BatchError> {
        CsvItemReader::restore(self, checkpoint)
    }
}

/// Builder for [`CsvItemReader`].
///
/// Defaults: comma delimiter, CRLF terminator, no header row, all fields
/// trimmed, strict field counts so formatting problems surface as errors.
#[derive(Default)]
pub struct CsvItemReaderBuilder {
    delimiter: u8,
    terminator: Terminator,
    has_headers: bool,
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: false,
        }
    }

    /// Sets the field delimiter, for example `b'\t'` or `b';'`.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets the record terminator. `Terminator::Any(b'\n')` selects plain
    /// Unix line endings.
    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Treats the first row as column names. Named columns are matched to
    /// struct fields during deserialization instead of relying on order.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    fn configure(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers)
            .flexible(false);
        builder
    }

    /// Creates a reader over any `Read` source.
    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemReader<R> {
        let records = self.configure().from_reader(rdr).into_records();
        CsvItemReader {
            state: Mutex::new(ReaderState {
                records,
                position: 0,
            }),
        }
    }

    /// Creates a reader over a file.
    ///
    /// # Panics
    /// Panics if the file cannot be opened. Opening the source is wiring,
    /// not reading; failures here should surface at construction.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> CsvItemReader<File> {
        let records = self
            .configure()
            .from_path(path)
            .expect("Unable to open csv file")
            .into_records();
        CsvItemReader {
            state: Mutex::new(ReaderState {
                records,
                position: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::CsvItemReaderBuilder;
    use crate::{core::item::ItemReader, error::BatchError};

    #[derive(Debug, Deserialize, PartialEq)]
    struct City {
        city: String,
        country: String,
        pop: u32,
    }

    #[test]
    fn reads_until_exhausted() {
        let data = "city,country,pop
        Boston,United States,4628910
        Concord,United States,42695";

        let reader = CsvItemReaderBuilder::new()
            .has_headers(true)
            .delimiter(b',')
            .from_reader(data.as_bytes());

        let mut cities: Vec<City> = Vec::new();
        while let Some(city) = reader.read().unwrap() {
            cities.push(city);
        }

        assert_eq!(cities.len(), 2);
        assert_eq!(cities[0].city, "Boston");
        assert_eq!(cities[1].pop, 42695);

        // End of data stays end of data.
        assert!(ItemReader::<City>::read(&reader).unwrap().is_none());
        assert_eq!(reader.checkpoint(), Some(2));
    }

    #[test]
    fn malformed_record_is_a_data_format_error() {
        let data = "city,country,pop
        Boston,United States,not-a-number
        Concord,United States,42695";

        let reader = CsvItemReaderBuilder::new()
            .has_headers(true)
            .from_reader(data.as_bytes());

        let error = ItemReader::<City>::read(&reader).unwrap_err();
        assert!(matches!(error, BatchError::DataFormat(_)));

        // The bad record was consumed; the next read moves on.
        let city: City = reader.read().unwrap().unwrap();
        assert_eq!(city.city, "Concord");
    }

    #[test]
    fn restore_skips_raw_records() {
        let data = "Boston,United States,4628910
Concord,United States,42695
Quincy,United States,101636";

        let reader = CsvItemReaderBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_reader(data.as_bytes());
        reader.restore(2).unwrap();

        let city: City = reader.read().unwrap().unwrap();
        assert_eq!(city.city, "Quincy");
        assert_eq!(reader.checkpoint(), Some(3));
    }

    #[test]
    fn restore_cannot_rewind() {
        let data = "Boston,United States,4628910";
        let reader = CsvItemReaderBuilder::new().from_reader(data.as_bytes());
        let _: City = reader.read().unwrap().unwrap();

        let error = reader.restore(0).unwrap_err();
        assert!(matches!(error, BatchError::Configuration(_)));
    }
}
