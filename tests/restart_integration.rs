use std::sync::Mutex;

use rand::distr::{Alphanumeric, SampleString};

use chunkflow::{
    core::{
        item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
        job::{BatchStatus, JobBuilder},
        launcher::JobLauncher,
        parameters::{JobParameters, JobParametersBuilder},
        repository::{InMemoryJobRepository, JobRepository, JsonFileJobRepository},
        step::{StepBuilder, StepStatus},
    },
    error::BatchError,
};

/// Reader over `0..count` with a resumable cursor, as a stand-in for a
/// freshly opened source in a new process.
struct RangeReader {
    count: i64,
    position: Mutex<usize>,
}

impl RangeReader {
    fn new(count: i64) -> Self {
        Self {
            count,
            position: Mutex::new(0),
        }
    }
}

impl ItemReader<i64> for RangeReader {
    fn read(&self) -> ItemReaderResult<i64> {
        let mut position = self.position.lock().unwrap();
        if *position >= self.count as usize {
            return Ok(None);
        }
        let item = *position as i64;
        *position += 1;
        Ok(Some(item))
    }

    fn checkpoint(&self) -> Option<usize> {
        Some(*self.position.lock().unwrap())
    }

    fn restore(&self, checkpoint: usize) -> Result<(), BatchError> {
        *self.position.lock().unwrap() = checkpoint;
        Ok(())
    }
}

/// Writer that rejects any chunk containing the poisoned value.
struct PoisonedWriter {
    poison: i64,
    items: Mutex<Vec<i64>>,
}

impl PoisonedWriter {
    fn new(poison: i64) -> Self {
        Self {
            poison,
            items: Mutex::new(Vec::new()),
        }
    }

    fn items(&self) -> Vec<i64> {
        self.items.lock().unwrap().clone()
    }
}

impl ItemWriter<i64> for PoisonedWriter {
    fn write(&self, items: &[i64]) -> ItemWriterResult {
        if items.contains(&self.poison) {
            return Err(BatchError::TransientIo("sink rejected the chunk".to_string()));
        }
        self.items.lock().unwrap().extend_from_slice(items);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingWriter {
    items: Mutex<Vec<i64>>,
}

impl CollectingWriter {
    fn items(&self) -> Vec<i64> {
        self.items.lock().unwrap().clone()
    }
}

impl ItemWriter<i64> for CollectingWriter {
    fn write(&self, items: &[i64]) -> ItemWriterResult {
        self.items.lock().unwrap().extend_from_slice(items);
        Ok(())
    }
}

fn params(run_id: i64) -> JobParameters {
    JobParametersBuilder::new().i64("run.id", run_id).build()
}

#[test]
fn restart_resumes_at_the_first_uncommitted_chunk() {
    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);

    // First attempt: chunks {0,1,2} and {3,4,5} commit, the chunk holding
    // 6 is rejected.
    {
        let reader = RangeReader::new(10);
        let writer = PoisonedWriter::new(6);
        let step = StepBuilder::new("load")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .writer(&writer)
            .build();
        let job = JobBuilder::new().name("import").start(&step).build();

        let result = launcher.run(&job, &params(1));
        assert!(matches!(result, Err(BatchError::Job(_, _))));
        assert_eq!(writer.items(), vec![0, 1, 2, 3, 4, 5]);

        let execution = repository
            .find_job_execution("import", &params(1))
            .unwrap()
            .unwrap();
        let step_execution = repository
            .find_step_execution(execution.id, "load")
            .unwrap()
            .unwrap();
        assert_eq!(step_execution.status, StepStatus::Failed);
        assert_eq!(step_execution.write_count, 6);
        assert_eq!(step_execution.commit_count, 2);
        assert_eq!(step_execution.rollback_count, 1);
        assert_eq!(step_execution.checkpoint, Some(6));
    }

    // Second attempt with fresh wiring and a healthy sink: only the work
    // after the last committed chunk is redone.
    {
        let reader = RangeReader::new(10);
        let writer = CollectingWriter::default();
        let step = StepBuilder::new("load")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .writer(&writer)
            .build();
        let job = JobBuilder::new().name("import").start(&step).build();

        let execution = launcher.run(&job, &params(1)).unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);

        // Reading resumed exactly at the first item of the failed chunk;
        // no chunk committed by the first attempt was written again.
        assert_eq!(writer.items(), vec![6, 7, 8, 9]);

        let step_execution = repository
            .find_step_execution(execution.id, "load")
            .unwrap()
            .unwrap();
        assert_eq!(step_execution.status, StepStatus::Completed);
        assert_eq!(step_execution.read_count, 4);
        assert_eq!(step_execution.write_count, 4);
        assert_eq!(step_execution.checkpoint, Some(10));
    }
}

#[test]
fn non_restartable_step_starts_over_after_a_failure() {
    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);

    {
        let reader = RangeReader::new(6);
        let writer = PoisonedWriter::new(4);
        let step = StepBuilder::new("load")
            .chunk::<i64, i64>(2)
            .reader(&reader)
            .writer(&writer)
            .restartable(false)
            .build();
        let job = JobBuilder::new().name("replay").start(&step).build();
        assert!(launcher.run(&job, &params(1)).is_err());
    }

    // The relaunch ignores the checkpoint and re-reads from the beginning.
    {
        let reader = RangeReader::new(6);
        let writer = CollectingWriter::default();
        let step = StepBuilder::new("load")
            .chunk::<i64, i64>(2)
            .reader(&reader)
            .writer(&writer)
            .restartable(false)
            .build();
        let job = JobBuilder::new().name("replay").start(&step).build();

        let execution = launcher.run(&job, &params(1)).unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(writer.items(), vec![0, 1, 2, 3, 4, 5]);
    }
}

#[test]
fn metadata_survives_a_process_restart() -> anyhow::Result<()> {
    let metadata_path = std::env::temp_dir().join(format!(
        "chunkflow-meta-{}.json",
        Alphanumeric.sample_string(&mut rand::rng(), 12)
    ));

    // "Process" one: the run fails mid-step and the process goes away.
    {
        let repository = JsonFileJobRepository::open(&metadata_path)?;
        let launcher = JobLauncher::new(&repository);

        let reader = RangeReader::new(10);
        let writer = PoisonedWriter::new(6);
        let step = StepBuilder::new("load")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .writer(&writer)
            .build();
        let job = JobBuilder::new().name("durable-import").start(&step).build();

        assert!(launcher.run(&job, &params(1)).is_err());
    }

    // "Process" two: a new repository instance reloads the metadata file
    // and the relaunch resumes from the persisted checkpoint.
    {
        let repository = JsonFileJobRepository::open(&metadata_path)?;
        let launcher = JobLauncher::new(&repository);

        let reader = RangeReader::new(10);
        let writer = CollectingWriter::default();
        let step = StepBuilder::new("load")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .writer(&writer)
            .build();
        let job = JobBuilder::new().name("durable-import").start(&step).build();

        let execution = launcher.run(&job, &params(1)).unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(writer.items(), vec![6, 7, 8, 9]);
    }

    // "Process" three: the completed run identity is still taken.
    {
        let repository = JsonFileJobRepository::open(&metadata_path)?;
        let launcher = JobLauncher::new(&repository);

        let reader = RangeReader::new(10);
        let writer = CollectingWriter::default();
        let step = StepBuilder::new("load")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .writer(&writer)
            .build();
        let job = JobBuilder::new().name("durable-import").start(&step).build();

        let rejected = launcher.run(&job, &params(1));
        assert!(matches!(rejected, Err(BatchError::AlreadyComplete(_))));
        assert!(writer.items().is_empty());
    }

    std::fs::remove_file(&metadata_path).ok();
    Ok(())
}
