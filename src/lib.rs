#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # chunkflow

 A chunk-oriented batch job execution engine. Items are read one at a time,
 optionally processed, and written in bounded chunks; each chunk commit is
 checkpointed to a job repository so a failed run can be restarted from the
 first uncommitted chunk instead of from the beginning.

 ## Core Concepts

 - **Job:** the entire batch process, an ordered sequence of steps.
 - **Step:** one independent phase of a job, either chunk-oriented
   (read, process, write in commit intervals) or tasklet-oriented (a single
   unit of work run to completion).
 - **ItemReader:** retrieval of input for a step, one item at a time, with
   an optional resumption cursor.
 - **ItemProcessor:** business logic applied to each item; may filter items
   out of the output.
 - **ItemWriter:** output of a step, one chunk at a time, treated as a
   transactional unit.
 - **JobRepository:** the metadata store for job and step executions,
   checkpoints and stop requests; the launcher consults it to tell a fresh
   run from a restart.
 - **JobLauncher / JobOperator:** start a job with parameters, mint the
   next run identity, query status, request a stop.

 ## Features

 The crate is modular; enable only the adapters you need:

 | **Feature**   | **Description**                                          |
 |---------------|----------------------------------------------------------|
 | csv           | Delimited flat-file `ItemReader` and `ItemWriter`        |
 | logger        | Log-based `ItemWriter`, useful for debugging             |
 | rdbc-postgres | Paged-query `ItemReader` for PostgreSQL                  |
 | rdbc-mysql    | Paged-query `ItemReader` for MySQL and MariaDB           |
 | rdbc-sqlite   | Paged-query `ItemReader` for SQLite                      |
 | full          | Everything above (SQLite flavor of rdbc)                 |

 ## Getting Started

```toml
[dependencies]
chunkflow = { version = "<version>", features = ["csv", "logger"] }
```

Then wire a job from composable parts:

```rust
# use serde::{Deserialize, Serialize};
# use chunkflow::{
#     core::{
#         item::{ItemProcessor, ItemProcessorResult},
#         job::{BatchStatus, JobBuilder},
#         launcher::JobLauncher,
#         parameters::JobParametersBuilder,
#         repository::InMemoryJobRepository,
#         step::StepBuilder,
#     },
#     error::BatchError,
#     item::csv::csv_reader::CsvItemReaderBuilder,
#     item::logger::LoggerWriter,
# };
# #[derive(Deserialize, Serialize, Debug, Clone)]
# struct Customer {
#     name: String,
#     age: u8,
#     gender: String,
# }
# #[derive(Default)]
# struct AdultFilter;
# impl ItemProcessor<Customer, Customer> for AdultFilter {
#     fn process(&self, item: &Customer) -> ItemProcessorResult<Customer> {
#         if item.age >= 20 {
#             Ok(Some(item.clone()))
#         } else {
#             Ok(None)
#         }
#     }
# }

fn main() -> Result<(), BatchError> {
    let csv = "name,age,gender
   Kim,28,F
   Lee,15,M
   Park,40,M";

    let reader = CsvItemReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .from_reader(csv.as_bytes());

    let processor = AdultFilter;
    let writer = LoggerWriter::default();

    let step = StepBuilder::new("filter-adults")
        .chunk::<Customer, Customer>(2) // commit interval
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build();

    let job = JobBuilder::new().name("CUSTOMER_JOB").start(&step).build();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().i64("run.id", 1).build();

    let execution = launcher.run(&job, &parameters)?;
    assert_eq!(execution.status, BatchStatus::Completed);

    Ok(())
}
```

 Re-running the same job with the same parameters is rejected, because a
 completed execution with that identity already exists in the repository.
 Use a [`RunIdIncrementer`](crate::core::parameters::RunIdIncrementer) and
 [`JobLauncher::start_next`](crate::core::launcher::JobLauncher::start_next)
 to mint a fresh run identity per launch.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item readers / writers (for example: csv reader and writer)
pub mod item;
