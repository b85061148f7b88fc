use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    core::{
        chunk::{Chunk, ChunkStatus},
        item::{ItemReader, ItemReaderResult, ItemWriter, PassThroughProcessor},
        partition::PartitionedStepBuilder,
        repository::JobRepository,
        tasklet::{Tasklet, TaskletStepBuilder},
    },
    error::BatchError,
};

use super::item::ItemProcessor;

static DEFAULT_PROCESSOR: PassThroughProcessor = PassThroughProcessor;

/// Status of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// The execution record exists but the executor has not started yet.
    Starting,
    /// The executor is running.
    Started,
    /// Terminal: every chunk was committed.
    Completed,
    /// Terminal: the fault policy was exhausted or a fatal error occurred.
    Failed,
    /// Terminal: an operator requested a halt and the executor stopped at a
    /// chunk boundary.
    Stopped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Stopped
        )
    }

    /// Whether a new attempt may resume from the recorded checkpoint.
    pub(crate) fn is_resumable(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Stopped)
    }
}

/// Execution record of one step, mutated by the executor and persisted to
/// the job repository at every chunk commit.
///
/// Counts are per attempt: a resumed attempt starts them at zero and carries
/// only the reader checkpoint over from the failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub step_name: String,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Items successfully read in this attempt.
    pub read_count: usize,
    /// Items durably written in this attempt.
    pub write_count: usize,
    /// Items the processor elided from the output.
    pub filter_count: usize,
    /// Successful chunk commits.
    pub commit_count: usize,
    /// Rolled-back chunk write attempts.
    pub rollback_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    /// Reader position at the last committed chunk, in raw records consumed.
    pub checkpoint: Option<usize>,
    pub exit_description: String,
}

impl StepExecution {
    pub fn new(step_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_name: step_name.to_string(),
            status: StepStatus::Starting,
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            checkpoint: None,
            exit_description: String::new(),
        }
    }

    /// Total records skipped across read, process and write phases.
    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Resets the record for a fresh attempt, keeping only the identity and
    /// the checkpoint the attempt resumes from.
    pub(crate) fn begin_attempt(&mut self, resume_checkpoint: Option<usize>) {
        self.status = StepStatus::Starting;
        self.start_time = Some(Utc::now());
        self.end_time = None;
        self.read_count = 0;
        self.write_count = 0;
        self.filter_count = 0;
        self.commit_count = 0;
        self.rollback_count = 0;
        self.read_skip_count = 0;
        self.process_skip_count = 0;
        self.write_skip_count = 0;
        self.checkpoint = resume_checkpoint;
        self.exit_description.clear();
    }
}

/// Handles a step executor needs while running: the repository for
/// checkpoint writes and the id of the owning job execution.
///
/// Threaded explicitly through every executor call; there is no ambient
/// repository or transaction state.
pub struct StepContext<'a> {
    repository: &'a dyn JobRepository,
    job_execution_id: Uuid,
}

impl<'a> StepContext<'a> {
    pub fn new(repository: &'a dyn JobRepository, job_execution_id: Uuid) -> Self {
        Self {
            repository,
            job_execution_id,
        }
    }

    pub fn repository(&self) -> &'a dyn JobRepository {
        self.repository
    }

    pub fn job_execution_id(&self) -> Uuid {
        self.job_execution_id
    }

    /// Whether an operator asked this job execution to halt.
    pub fn stop_requested(&self) -> Result<bool, BatchError> {
        self.repository.stop_requested(self.job_execution_id)
    }

    /// Persists a step execution checkpoint before the caller may treat the
    /// chunk as committed.
    pub fn save_step(&self, execution: &StepExecution) -> Result<(), BatchError> {
        self.repository
            .save_step_execution(self.job_execution_id, execution)
    }
}

/// A single phase of a job: either chunk-oriented or tasklet-oriented.
///
/// Steps are `Send + Sync` so they can run as parallel partitions under a
/// [`PartitionedStep`](crate::core::partition::PartitionedStep).
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the step, mutating `execution` and persisting it through the
    /// context.
    ///
    /// # Returns
    /// - `Ok(())` when the execution reached `Completed` or `Stopped`
    /// - `Err(BatchError)` when it reached `Failed`
    fn execute(
        &self,
        ctx: &StepContext<'_>,
        execution: &mut StepExecution,
    ) -> Result<(), BatchError>;
}

/// Chunk-oriented step executor.
///
/// Drives the read, process, write loop in chunks of at most `chunk_size`
/// items. Each successful chunk write is followed by a checkpoint persisted
/// to the job repository, so a failed execution can resume at the first
/// uncommitted chunk. Reader and writer faults are resolved through the
/// configured retry and skip budgets before they can fail the step.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    reader: &'a dyn ItemReader<I>,
    processor: &'a dyn ItemProcessor<I, O>,
    writer: &'a dyn ItemWriter<O>,
    chunk_size: usize,
    skip_limit: usize,
    retry_limit: usize,
    restartable: bool,
    allow_start_if_complete: bool,
    chunk_timeout: Option<Duration>,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        ctx: &StepContext<'_>,
        execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        // Re-running a completed execution is a no-op unless explicitly
        // allowed; the existing terminal status stands.
        if execution.status == StepStatus::Completed && !self.allow_start_if_complete {
            debug!("Step already completed, skipping: {}", self.name);
            return Ok(());
        }

        let resume_checkpoint = if self.restartable && execution.status.is_resumable() {
            execution.checkpoint
        } else {
            None
        };

        execution.begin_attempt(resume_checkpoint);
        info!("Start of step: {}, id: {}", self.name, execution.id);

        let outcome = self.run(ctx, execution, resume_checkpoint);

        Self::log_cleanup(self.writer.close());

        match outcome {
            Ok(()) => {
                execution.end_time = Some(Utc::now());
                ctx.save_step(execution)?;
                info!(
                    "End of step: {}, id: {}, status: {:?}",
                    self.name, execution.id, execution.status
                );
                Ok(())
            }
            Err(error) if matches!(error, BatchError::CancellationRequested(_)) => {
                execution.status = StepStatus::Stopped;
                execution.end_time = Some(Utc::now());
                ctx.save_step(execution)?;
                info!("Step stopped: {}, id: {}", self.name, execution.id);
                Ok(())
            }
            Err(error) => {
                execution.status = StepStatus::Failed;
                execution.exit_description = error.to_string();
                execution.end_time = Some(Utc::now());
                // The failure must be durable before it is acknowledged.
                ctx.save_step(execution)?;
                error!(
                    "Step failed: {}, id: {}: {}",
                    self.name, execution.id, error
                );
                Err(BatchError::Step(self.name.clone(), error.to_string()))
            }
        }
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn run(
        &self,
        ctx: &StepContext<'_>,
        execution: &mut StepExecution,
        resume_checkpoint: Option<usize>,
    ) -> Result<(), BatchError> {
        if let Some(position) = resume_checkpoint {
            info!(
                "Resuming step '{}' from checkpoint {}",
                self.name, position
            );
            self.reader.restore(position)?;
        }

        self.writer.open()?;
        execution.status = StepStatus::Started;
        ctx.save_step(execution)?;

        let base = resume_checkpoint.unwrap_or(0);
        let mut chunk: Chunk<I> = Chunk::new(self.chunk_size);

        loop {
            // A stop request halts between chunks; the in-flight commit of
            // the previous chunk has already resolved.
            if ctx.stop_requested()? {
                info!("Stop requested, halting step '{}'", self.name);
                execution.status = StepStatus::Stopped;
                return Ok(());
            }

            self.read_chunk(execution, &mut chunk)?;
            let finished = chunk.status() == ChunkStatus::Finished;

            let processed = self.process_chunk(execution, chunk.items())?;
            self.write_chunk(execution, &processed)?;

            if !chunk.is_empty() {
                let consumed = base + execution.read_count + execution.read_skip_count;
                execution.checkpoint = Some(self.reader.checkpoint().unwrap_or(consumed));
                execution.commit_count += 1;
                ctx.save_step(execution)?;
            }

            if finished {
                execution.status = StepStatus::Completed;
                return Ok(());
            }
            chunk.clear();
        }
    }

    /// Fills the chunk buffer, resolving reader faults via the retry and
    /// skip budgets. Returns with the chunk either full or finished.
    fn read_chunk(
        &self,
        execution: &mut StepExecution,
        chunk: &mut Chunk<I>,
    ) -> Result<(), BatchError> {
        debug!("Start reading chunk");

        loop {
            match self.read_with_retry() {
                Ok(Some(item)) => {
                    chunk.push(item);
                    execution.read_count += 1;
                    if chunk.status() == ChunkStatus::Full {
                        debug!("End reading chunk: full");
                        return Ok(());
                    }
                }
                Ok(None) => {
                    chunk.mark_finished();
                    debug!("End reading chunk: finished");
                    return Ok(());
                }
                Err(error) if error.is_skippable() => {
                    warn!("Skipping unreadable record: {}", error);
                    execution.read_skip_count += 1;
                    self.check_skip_budget(execution)?;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn read_with_retry(&self) -> ItemReaderResult<I> {
        let mut attempts = 0;
        loop {
            match self.reader.read() {
                Err(error) if error.is_retryable() && attempts < self.retry_limit => {
                    attempts += 1;
                    warn!(
                        "Read failed, re-attempting ({}/{}): {}",
                        attempts, self.retry_limit, error
                    );
                }
                Err(error) if error.is_retryable() => {
                    return Err(BatchError::PolicyExhausted(format!(
                        "read retries exceeded for step '{}': {}",
                        self.name, error
                    )));
                }
                other => return other,
            }
        }
    }

    fn process_chunk(
        &self,
        execution: &mut StepExecution,
        items: &[I],
    ) -> Result<Vec<O>, BatchError> {
        debug!("Processing chunk of {} items", items.len());
        let mut processed = Vec::with_capacity(items.len());

        for item in items {
            match self.processor.process(item) {
                Ok(Some(output)) => processed.push(output),
                Ok(None) => execution.filter_count += 1,
                Err(error) if error.is_skippable() => {
                    warn!("Skipping unprocessable record: {}", error);
                    execution.process_skip_count += 1;
                    self.check_skip_budget(execution)?;
                }
                Err(error) => return Err(error),
            }
        }

        Ok(processed)
    }

    /// Writes one chunk as a transactional unit, re-attempting rolled-back
    /// writes up to the retry budget and isolating skippable records.
    fn write_chunk(
        &self,
        execution: &mut StepExecution,
        items: &[O],
    ) -> Result<(), BatchError> {
        if items.is_empty() {
            return Ok(());
        }
        debug!("Writing chunk of {} items", items.len());

        let mut attempts = 0;
        loop {
            match self.try_commit(items) {
                Ok(()) => {
                    execution.write_count += items.len();
                    return Ok(());
                }
                Err(error) => {
                    execution.rollback_count += 1;
                    warn!("Chunk write rolled back: {}", error);

                    if error.is_skippable() {
                        return self.write_one_by_one(execution, items);
                    }
                    if error.is_retryable() {
                        if attempts < self.retry_limit {
                            attempts += 1;
                            continue;
                        }
                        return Err(BatchError::PolicyExhausted(format!(
                            "write retries exceeded for step '{}': {}",
                            self.name, error
                        )));
                    }
                    return Err(error);
                }
            }
        }
    }

    fn try_commit(&self, items: &[O]) -> Result<(), BatchError> {
        let started = Instant::now();
        self.writer.write(items)?;
        self.writer.flush()?;
        if let Some(timeout) = self.chunk_timeout {
            if started.elapsed() > timeout {
                return Err(BatchError::TransientIo(format!(
                    "chunk commit exceeded {:?}",
                    timeout
                )));
            }
        }
        Ok(())
    }

    /// Re-writes a chunk one item at a time after a skippable write failure,
    /// so the offending records can be identified and skipped while the
    /// remainder is committed.
    fn write_one_by_one(
        &self,
        execution: &mut StepExecution,
        items: &[O],
    ) -> Result<(), BatchError> {
        debug!("Re-writing chunk item by item to isolate bad records");

        for item in items {
            let written = self
                .writer
                .write(std::slice::from_ref(item))
                .and_then(|()| self.writer.flush());
            match written {
                Ok(()) => execution.write_count += 1,
                Err(error) if error.is_skippable() => {
                    warn!("Skipping unwritable record: {}", error);
                    execution.write_skip_count += 1;
                    self.check_skip_budget(execution)?;
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn check_skip_budget(&self, execution: &StepExecution) -> Result<(), BatchError> {
        if execution.skip_count() > self.skip_limit {
            return Err(BatchError::PolicyExhausted(format!(
                "skip limit of {} exceeded for step '{}'",
                self.skip_limit, self.name
            )));
        }
        Ok(())
    }

    fn log_cleanup(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error during cleanup: {}", error);
        }
    }
}

/// Builder for [`ChunkOrientedStep`].
pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    chunk_size: usize,
    skip_limit: usize,
    retry_limit: usize,
    restartable: bool,
    allow_start_if_complete: bool,
    chunk_timeout: Option<Duration>,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            skip_limit: 0,
            retry_limit: 0,
            restartable: true,
            allow_start_if_complete: false,
            chunk_timeout: None,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Commit interval: the number of items per chunk.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Number of skippable records tolerated before the step fails.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Number of re-attempts for a transient read or write failure.
    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Whether a failed execution may resume from its checkpoint. Defaults
    /// to true.
    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Re-execute the step even when a completed execution exists.
    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    /// Upper bound for one chunk commit. An overrun is treated as a
    /// transient writer failure.
    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ChunkOrientedStep<'a, I, O>
    where
        PassThroughProcessor: ItemProcessor<I, O>,
    {
        ChunkOrientedStep {
            name: self.name,
            reader: self.reader.expect("Reader is required for building a step"),
            processor: self.processor.unwrap_or(&DEFAULT_PROCESSOR),
            writer: self.writer.expect("Writer is required for building a step"),
            chunk_size: self.chunk_size,
            skip_limit: self.skip_limit,
            retry_limit: self.retry_limit,
            restartable: self.restartable,
            allow_start_if_complete: self.allow_start_if_complete,
            chunk_timeout: self.chunk_timeout,
        }
    }
}

/// Entry point for step construction.
///
/// ```
/// use chunkflow::core::step::StepBuilder;
/// use chunkflow::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult};
///
/// struct Empty;
/// impl ItemReader<String> for Empty {
///     fn read(&self) -> ItemReaderResult<String> {
///         Ok(None)
///     }
/// }
/// struct Discard;
/// impl ItemWriter<String> for Discard {
///     fn write(&self, _items: &[String]) -> ItemWriterResult {
///         Ok(())
///     }
/// }
///
/// let reader = Empty;
/// let writer = Discard;
/// let step = StepBuilder::new("copy")
///     .chunk::<String, String>(100)
///     .reader(&reader)
///     .writer(&writer)
///     .build();
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Builds a chunk-oriented step with the given commit interval.
    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }

    /// Builds a tasklet step around a single unit of work.
    pub fn tasklet<'a>(self, tasklet: &'a dyn Tasklet) -> TaskletStepBuilder<'a> {
        TaskletStepBuilder::new(&self.name).tasklet(tasklet)
    }

    /// Builds a parent step whose children run as parallel partitions.
    pub fn partitioned<'a>(self) -> PartitionedStepBuilder<'a> {
        PartitionedStepBuilder::new(&self.name)
    }
}
