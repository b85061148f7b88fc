/// Delimited flat-file support for reading and writing tabular data.
///
/// Two components, both configured through builders:
///
/// 1. **CsvItemReader**: deserializes delimited rows into Rust structs via
///    serde, from files, strings or any `Read` source. The reader tracks
///    how many raw records it has consumed, so a restarted step can skip
///    straight to the last committed position.
///
/// 2. **CsvItemWriter**: serializes Rust structs into delimited rows, with
///    a configurable delimiter and either serde-derived headers or an
///    explicit list of output column names.
///
/// # Examples
///
/// Reading delimited data:
///
/// ```
/// use chunkflow::item::csv::csv_reader::CsvItemReaderBuilder;
/// use chunkflow::core::item::ItemReader;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct City {
///     city: String,
///     country: String,
///     pop: u32,
/// }
///
/// let csv_data = "\
/// city,country,pop
/// Boston,United States,4628910
/// Concord,United States,42695
/// ";
///
/// let reader = CsvItemReaderBuilder::new()
///     .has_headers(true)
///     .delimiter(b',')
///     .from_reader(csv_data.as_bytes());
///
/// let mut cities: Vec<City> = Vec::new();
/// while let Some(city) = reader.read().unwrap() {
///     cities.push(city);
/// }
///
/// assert_eq!(cities.len(), 2);
/// assert_eq!(cities[0].city, "Boston");
/// assert_eq!(cities[1].pop, 42695);
/// ```
///
/// Writing with explicit column names:
///
/// ```
/// use chunkflow::item::csv::csv_writer::CsvItemWriterBuilder;
/// use chunkflow::core::item::ItemWriter;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Customer {
///     name: String,
///     age: u8,
///     gender: String,
/// }
///
/// let writer = CsvItemWriterBuilder::new()
///     .delimiter(b'\t')
///     .names(&["Name", "Age", "Gender"])
///     .from_writer(vec![]);
///
/// writer.open().unwrap();
/// writer
///     .write(&[Customer {
///         name: "Kim".to_string(),
///         age: 28,
///         gender: "F".to_string(),
///     }])
///     .unwrap();
///
/// let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
/// assert_eq!(data, "Name\tAge\tGender\nKim\t28\tF\n");
/// ```

/// A module providing facilities for reading delimited data records.
pub mod csv_reader;

/// A module providing facilities for writing delimited data records.
pub mod csv_writer;

use crate::error::BatchError;

/// An I/O failure of the underlying source or sink may succeed on
/// re-attempt; everything else is a malformed record.
pub(crate) fn map_csv_error(error: csv::Error) -> BatchError {
    if error.is_io_error() {
        BatchError::TransientIo(error.to_string())
    } else {
        BatchError::DataFormat(error.to_string())
    }
}
