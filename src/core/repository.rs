use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    core::{job::JobExecution, parameters::JobParameters, step::StepExecution},
    error::BatchError,
};

/// Narrow metadata store for job and step execution records.
///
/// The repository is the only state shared between the launcher, the job
/// orchestrator and concurrently running step executors, so implementations
/// must serialize access. Checkpoint writes happen before the caller treats
/// a chunk as committed; a persistence failure is therefore reported as
/// [`BatchError::Repository`] and is fatal to the running step.
pub trait JobRepository: Send + Sync {
    /// Creates a fresh execution record for the given run identity.
    ///
    /// Fails if a record with the same job name and parameters already
    /// exists; the launcher decides beforehand whether an existing record
    /// may be resumed.
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError>;

    /// Looks up the execution addressed by a job name and exact parameters.
    fn find_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, BatchError>;

    fn find_job_execution_by_id(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<JobExecution>, BatchError>;

    /// Most recently created execution of a job, whatever its parameters.
    fn last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError>;

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError>;

    fn find_step_execution(
        &self,
        job_execution_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError>;

    /// Persists a step execution checkpoint. Creates the record on first use.
    fn save_step_execution(
        &self,
        job_execution_id: Uuid,
        execution: &StepExecution,
    ) -> Result<(), BatchError>;

    /// Flags an execution so running executors halt at the next chunk
    /// boundary. The flag clears once the execution reaches a terminal
    /// status, so a later restart is not immediately stopped again.
    fn request_stop(&self, job_execution_id: Uuid) -> Result<(), BatchError>;

    fn stop_requested(&self, job_execution_id: Uuid) -> Result<bool, BatchError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExecutionRecord {
    execution: JobExecution,
    steps: BTreeMap<String, StepExecution>,
    stop_requested: bool,
}

/// Whole metadata set. Shared by the in-memory and JSON-file repositories.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RepositoryState {
    executions: Vec<ExecutionRecord>,
}

impl RepositoryState {
    fn record(&self, execution_id: Uuid) -> Option<&ExecutionRecord> {
        self.executions
            .iter()
            .find(|record| record.execution.id == execution_id)
    }

    fn record_mut(&mut self, execution_id: Uuid) -> Option<&mut ExecutionRecord> {
        self.executions
            .iter_mut()
            .find(|record| record.execution.id == execution_id)
    }

    fn create(
        &mut self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        if self.find(job_name, parameters).is_some() {
            return Err(BatchError::Repository(format!(
                "execution already exists for job '{}' with parameters {}",
                job_name, parameters
            )));
        }
        let execution = JobExecution::new(job_name, parameters.clone());
        debug!(
            "Creating execution record: job: {}, id: {}",
            job_name, execution.id
        );
        self.executions.push(ExecutionRecord {
            execution: execution.clone(),
            steps: BTreeMap::new(),
            stop_requested: false,
        });
        Ok(execution)
    }

    fn find(&self, job_name: &str, parameters: &JobParameters) -> Option<JobExecution> {
        let identity = parameters.identity();
        self.executions
            .iter()
            .find(|record| {
                record.execution.job_name == job_name
                    && record.execution.parameters.identity() == identity
            })
            .map(|record| record.execution.clone())
    }

    fn last(&self, job_name: &str) -> Option<JobExecution> {
        self.executions
            .iter()
            .rev()
            .find(|record| record.execution.job_name == job_name)
            .map(|record| record.execution.clone())
    }

    fn update(&mut self, execution: &JobExecution) -> Result<(), BatchError> {
        let record = self.record_mut(execution.id).ok_or_else(|| {
            BatchError::Repository(format!("unknown job execution: {}", execution.id))
        })?;
        record.execution = execution.clone();
        if execution.status.is_terminal() {
            record.stop_requested = false;
        }
        Ok(())
    }

    fn find_step(&self, execution_id: Uuid, step_name: &str) -> Option<StepExecution> {
        self.record(execution_id)
            .and_then(|record| record.steps.get(step_name).cloned())
    }

    fn save_step(
        &mut self,
        execution_id: Uuid,
        execution: &StepExecution,
    ) -> Result<(), BatchError> {
        let record = self.record_mut(execution_id).ok_or_else(|| {
            BatchError::Repository(format!("unknown job execution: {}", execution_id))
        })?;
        record
            .steps
            .insert(execution.step_name.clone(), execution.clone());
        Ok(())
    }

    fn request_stop(&mut self, execution_id: Uuid) -> Result<(), BatchError> {
        let record = self.record_mut(execution_id).ok_or_else(|| {
            BatchError::Repository(format!("unknown job execution: {}", execution_id))
        })?;
        record.stop_requested = true;
        Ok(())
    }

    fn stop_requested(&self, execution_id: Uuid) -> bool {
        self.record(execution_id)
            .map(|record| record.stop_requested)
            .unwrap_or(false)
    }
}

fn lock_state(state: &Mutex<RepositoryState>) -> Result<MutexGuard<'_, RepositoryState>, BatchError> {
    state
        .lock()
        .map_err(|_| BatchError::Repository("repository lock poisoned".to_string()))
}

/// Mutex-guarded repository for tests and single-shot runs.
///
/// Nothing survives the process; use [`JsonFileJobRepository`] when restart
/// across processes matters.
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        lock_state(&self.state)?.create(job_name, parameters)
    }

    fn find_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock_state(&self.state)?.find(job_name, parameters))
    }

    fn find_job_execution_by_id(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock_state(&self.state)?
            .record(execution_id)
            .map(|record| record.execution.clone()))
    }

    fn last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock_state(&self.state)?.last(job_name))
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
        lock_state(&self.state)?.update(execution)
    }

    fn find_step_execution(
        &self,
        job_execution_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        Ok(lock_state(&self.state)?.find_step(job_execution_id, step_name))
    }

    fn save_step_execution(
        &self,
        job_execution_id: Uuid,
        execution: &StepExecution,
    ) -> Result<(), BatchError> {
        lock_state(&self.state)?.save_step(job_execution_id, execution)
    }

    fn request_stop(&self, job_execution_id: Uuid) -> Result<(), BatchError> {
        lock_state(&self.state)?.request_stop(job_execution_id)
    }

    fn stop_requested(&self, job_execution_id: Uuid) -> Result<bool, BatchError> {
        Ok(lock_state(&self.state)?.stop_requested(job_execution_id))
    }
}

/// Repository persisted as a JSON snapshot on every write.
///
/// The snapshot is replaced atomically (temp file then rename) so a crash
/// mid-write leaves the previous checkpoint intact. Reads are served from
/// memory; the file is only loaded once, at `open`.
pub struct JsonFileJobRepository {
    path: PathBuf,
    state: Mutex<RepositoryState>,
}

impl JsonFileJobRepository {
    /// Opens the repository at `path`, loading existing metadata if the file
    /// is already present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|error| BatchError::Repository(error.to_string()))?;
            serde_json::from_str(&raw)
                .map_err(|error| BatchError::Repository(error.to_string()))?
        } else {
            RepositoryState::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &RepositoryState) -> Result<(), BatchError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|error| BatchError::Repository(error.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|error| BatchError::Repository(error.to_string()))?;
        fs::rename(&tmp, &self.path)
            .map_err(|error| BatchError::Repository(error.to_string()))?;
        Ok(())
    }
}

impl JobRepository for JsonFileJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let mut state = lock_state(&self.state)?;
        let execution = state.create(job_name, parameters)?;
        self.persist(&state)?;
        Ok(execution)
    }

    fn find_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock_state(&self.state)?.find(job_name, parameters))
    }

    fn find_job_execution_by_id(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock_state(&self.state)?
            .record(execution_id)
            .map(|record| record.execution.clone()))
    }

    fn last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock_state(&self.state)?.last(job_name))
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
        let mut state = lock_state(&self.state)?;
        state.update(execution)?;
        self.persist(&state)
    }

    fn find_step_execution(
        &self,
        job_execution_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        Ok(lock_state(&self.state)?.find_step(job_execution_id, step_name))
    }

    fn save_step_execution(
        &self,
        job_execution_id: Uuid,
        execution: &StepExecution,
    ) -> Result<(), BatchError> {
        let mut state = lock_state(&self.state)?;
        state.save_step(job_execution_id, execution)?;
        self.persist(&state)
    }

    fn request_stop(&self, job_execution_id: Uuid) -> Result<(), BatchError> {
        let mut state = lock_state(&self.state)?;
        state.request_stop(job_execution_id)?;
        self.persist(&state)
    }

    fn stop_requested(&self, job_execution_id: Uuid) -> Result<bool, BatchError> {
        Ok(lock_state(&self.state)?.stop_requested(job_execution_id))
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryJobRepository, JobRepository};
    use crate::core::{
        job::BatchStatus, parameters::JobParametersBuilder, step::StepExecution,
    };

    #[test]
    fn create_then_find_by_parameters() {
        let repository = InMemoryJobRepository::new();
        let params = JobParametersBuilder::new().i64("run.id", 1).build();

        let execution = repository.create_job_execution("import", &params).unwrap();
        assert_eq!(execution.status, BatchStatus::Starting);

        let found = repository.find_job_execution("import", &params).unwrap();
        assert_eq!(found.map(|e| e.id), Some(execution.id));
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let repository = InMemoryJobRepository::new();
        let params = JobParametersBuilder::new().i64("run.id", 1).build();

        repository.create_job_execution("import", &params).unwrap();
        assert!(repository.create_job_execution("import", &params).is_err());
    }

    #[test]
    fn parameters_distinguish_executions() {
        let repository = InMemoryJobRepository::new();
        let first = JobParametersBuilder::new().i64("run.id", 1).build();
        let second = JobParametersBuilder::new().i64("run.id", 2).build();

        let a = repository.create_job_execution("import", &first).unwrap();
        let b = repository.create_job_execution("import", &second).unwrap();
        assert_ne!(a.id, b.id);

        let last = repository.last_job_execution("import").unwrap().unwrap();
        assert_eq!(last.id, b.id);
    }

    #[test]
    fn step_checkpoints_round_trip() {
        let repository = InMemoryJobRepository::new();
        let params = JobParametersBuilder::new().build();
        let execution = repository.create_job_execution("import", &params).unwrap();

        let mut step = StepExecution::new("load");
        step.read_count = 42;
        step.checkpoint = Some(40);
        repository.save_step_execution(execution.id, &step).unwrap();

        let found = repository
            .find_step_execution(execution.id, "load")
            .unwrap()
            .unwrap();
        assert_eq!(found.read_count, 42);
        assert_eq!(found.checkpoint, Some(40));
    }

    #[test]
    fn stop_flag_clears_on_terminal_status() {
        let repository = InMemoryJobRepository::new();
        let params = JobParametersBuilder::new().build();
        let mut execution = repository.create_job_execution("import", &params).unwrap();

        repository.request_stop(execution.id).unwrap();
        assert!(repository.stop_requested(execution.id).unwrap());

        execution.status = BatchStatus::Stopped;
        repository.update_job_execution(&execution).unwrap();
        assert!(!repository.stop_requested(execution.id).unwrap());
    }
}
