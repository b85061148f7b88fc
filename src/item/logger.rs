use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemWriter, ItemWriterResult};

/// Item writer that logs every record at info level.
///
/// A sink for demo-style jobs and for debugging a step's read and process
/// phases without wiring a real destination. Safe to re-apply a chunk: the
/// records are simply logged again.
#[derive(Default)]
pub struct LoggerWriter;

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        items.iter().for_each(|item| info!("Record:{:?}", item));
        Ok(())
    }
}
