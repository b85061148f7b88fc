use crate::error::BatchError;

/// Result of a single read attempt. `Ok(None)` signals end of data.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item. `Ok(None)` filters the item out of the
/// chunk: it is counted as filtered, never as written.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of writing or flushing a chunk.
pub type ItemWriterResult = Result<(), BatchError>;

/// Pulls one logical record at a time from a source until exhausted.
///
/// Readers keep their own cursor but are otherwise stateless across calls.
/// Once `read` has returned `Ok(None)`, every further call must keep
/// returning `Ok(None)` rather than an error.
///
/// The `Send + Sync` bound lets a step run as a parallel partition; readers
/// with interior state use thread-safe cells such as `Mutex` or atomics.
pub trait ItemReader<I>: Send + Sync {
    fn read(&self) -> ItemReaderResult<I>;

    /// Resumption position of this reader, measured in raw records consumed.
    ///
    /// The chunk executor persists the value with every commit so a failed
    /// step can resume where the last committed chunk ended. Readers without
    /// positional state return `None` and restart from the beginning.
    fn checkpoint(&self) -> Option<usize> {
        None
    }

    /// Moves the cursor to a previously committed checkpoint.
    ///
    /// Readers without positional state ignore the request.
    fn restore(&self, _checkpoint: usize) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Transforms or filters one record.
///
/// Implementations must be idempotent under re-invocation: a chunk may be
/// processed again after a rolled-back write.
pub trait ItemProcessor<I, O>: Send + Sync {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Accepts a bounded chunk of records and commits them to a destination.
///
/// The slice passed to `write` is one transactional unit: the engine assumes
/// the writer either applies it atomically or tolerates the same chunk being
/// re-applied after a failure.
pub trait ItemWriter<O>: Send + Sync {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    /// Makes previously written items durable. Called once per chunk commit.
    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Called once before the first chunk of a step execution.
    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Called once after the last chunk, whatever the step outcome.
    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Identity processor used when a step declares no processor of its own.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<I: Clone> ItemProcessor<I, I> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<I> {
        Ok(Some(item.clone()))
    }
}
