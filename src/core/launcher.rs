use std::collections::HashMap;

use log::info;
use uuid::Uuid;

use crate::{
    core::{
        job::{BatchStatus, Job, JobExecution},
        parameters::JobParameters,
        repository::JobRepository,
    },
    error::BatchError,
};

/// Starts jobs against the repository, deciding per launch whether the run
/// is fresh or a restart.
///
/// The rules, keyed by the existing execution for (job name, parameters):
/// - none: a new execution is created and run;
/// - `Completed`: rejected, a run with this identity already succeeded;
/// - `Starting`/`Started`/`Stopping`: rejected, the identity is in use;
/// - `Failed`/`Stopped`: resumed when the job is restartable, rejected
///   otherwise.
pub struct JobLauncher<'a> {
    repository: &'a dyn JobRepository,
}

impl<'a> JobLauncher<'a> {
    pub fn new(repository: &'a dyn JobRepository) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &'a dyn JobRepository {
        self.repository
    }

    /// Launches `job` with the given parameters.
    ///
    /// # Returns
    /// - `Ok(JobExecution)` when the execution completed or stopped
    /// - `Err(BatchError)` when the launch was rejected or the execution
    ///   failed
    pub fn run(
        &self,
        job: &dyn Job,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let mut execution = match self.repository.find_job_execution(job.name(), parameters)? {
            Some(existing) => match existing.status {
                BatchStatus::Completed => {
                    return Err(BatchError::AlreadyComplete(job.name().to_string()));
                }
                BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping => {
                    return Err(BatchError::AlreadyRunning(job.name().to_string()));
                }
                BatchStatus::Failed | BatchStatus::Stopped => {
                    if !job.restartable() {
                        return Err(BatchError::NotRestartable(job.name().to_string()));
                    }
                    info!(
                        "Restarting job: {}, id: {}, parameters: {}",
                        job.name(),
                        existing.id,
                        parameters
                    );
                    existing
                }
            },
            None => {
                let created = self
                    .repository
                    .create_job_execution(job.name(), parameters)?;
                info!(
                    "Launching job: {}, id: {}, parameters: {}",
                    job.name(),
                    created.id,
                    parameters
                );
                created
            }
        };

        execution.status = BatchStatus::Starting;
        execution.end_time = None;
        execution.exit_description.clear();
        self.repository.update_job_execution(&execution)?;

        job.execute(self.repository, &mut execution)?;
        Ok(execution)
    }

    /// Launches a fresh run, deriving its parameters from the last known
    /// execution via the job's incrementer.
    pub fn start_next(&self, job: &dyn Job) -> Result<JobExecution, BatchError> {
        let incrementer = job.incrementer().ok_or_else(|| {
            BatchError::Configuration(format!(
                "job '{}' has no parameters incrementer",
                job.name()
            ))
        })?;
        let last = self.repository.last_job_execution(job.name())?;
        let parameters = incrementer.next(last.as_ref().map(|execution| &execution.parameters));
        self.run(job, &parameters)
    }

    /// Current state of an execution, by id.
    pub fn status(&self, execution_id: Uuid) -> Result<Option<JobExecution>, BatchError> {
        self.repository.find_job_execution_by_id(execution_id)
    }

    /// Asks a running execution to halt at the next chunk boundary.
    pub fn request_stop(&self, execution_id: Uuid) -> Result<(), BatchError> {
        self.repository.request_stop(execution_id)?;
        if let Some(mut execution) = self.repository.find_job_execution_by_id(execution_id)? {
            if execution.status.is_running() {
                execution.status = BatchStatus::Stopping;
                self.repository.update_job_execution(&execution)?;
            }
        }
        info!("Stop requested for execution: {}", execution_id);
        Ok(())
    }
}

/// Operational surface over a set of registered jobs: start by name, mint
/// the next run, query status, request stops.
pub struct JobOperator<'a> {
    launcher: JobLauncher<'a>,
    jobs: HashMap<String, &'a dyn Job>,
}

impl<'a> JobOperator<'a> {
    pub fn new(repository: &'a dyn JobRepository) -> Self {
        Self {
            launcher: JobLauncher::new(repository),
            jobs: HashMap::new(),
        }
    }

    pub fn register(&mut self, job: &'a dyn Job) {
        self.jobs.insert(job.name().to_string(), job);
    }

    pub fn job(&self, name: &str) -> Option<&'a dyn Job> {
        self.jobs.get(name).copied()
    }

    /// Picks the job enabled by an externally supplied property value.
    ///
    /// Replaces property-conditional wiring: callers resolve the property
    /// once at startup and launch only the selected job. `None` means no
    /// job is enabled.
    pub fn select(&self, enabled_job_name: Option<&str>) -> Option<&'a dyn Job> {
        enabled_job_name.and_then(|name| self.job(name))
    }

    pub fn start(
        &self,
        name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let job = self.require(name)?;
        self.launcher.run(job, parameters)
    }

    pub fn start_next(&self, name: &str) -> Result<JobExecution, BatchError> {
        let job = self.require(name)?;
        self.launcher.start_next(job)
    }

    pub fn status(&self, execution_id: Uuid) -> Result<Option<JobExecution>, BatchError> {
        self.launcher.status(execution_id)
    }

    pub fn request_stop(&self, execution_id: Uuid) -> Result<(), BatchError> {
        self.launcher.request_stop(execution_id)
    }

    fn require(&self, name: &str) -> Result<&'a dyn Job, BatchError> {
        self.job(name)
            .ok_or_else(|| BatchError::Configuration(format!("no job registered as '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::{JobLauncher, JobOperator};
    use crate::{
        core::{
            job::{BatchStatus, Job, JobExecution},
            parameters::{JobParameters, JobParametersBuilder},
            repository::{InMemoryJobRepository, JobRepository},
        },
        error::BatchError,
    };

    /// Job that terminates with a fixed status, without any steps.
    struct StubJob {
        name: String,
        outcome: BatchStatus,
        restartable: bool,
    }

    impl StubJob {
        fn completing(name: &str) -> Self {
            Self {
                name: name.to_string(),
                outcome: BatchStatus::Completed,
                restartable: true,
            }
        }

        fn failing(name: &str, restartable: bool) -> Self {
            Self {
                name: name.to_string(),
                outcome: BatchStatus::Failed,
                restartable,
            }
        }
    }

    impl Job for StubJob {
        fn name(&self) -> &str {
            &self.name
        }

        fn restartable(&self) -> bool {
            self.restartable
        }

        fn execute(
            &self,
            repository: &dyn JobRepository,
            execution: &mut JobExecution,
        ) -> Result<(), BatchError> {
            execution.status = self.outcome;
            repository.update_job_execution(execution)?;
            match self.outcome {
                BatchStatus::Failed => Err(BatchError::Job(
                    self.name.clone(),
                    "stub failure".to_string(),
                )),
                _ => Ok(()),
            }
        }
    }

    fn params(run_id: i64) -> JobParameters {
        JobParametersBuilder::new().i64("run.id", run_id).build()
    }

    #[test]
    fn completed_execution_rejects_identical_parameters() {
        let repository = InMemoryJobRepository::new();
        let launcher = JobLauncher::new(&repository);
        let job = StubJob::completing("import");

        let execution = launcher.run(&job, &params(1)).unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);

        let rejected = launcher.run(&job, &params(1));
        assert!(matches!(rejected, Err(BatchError::AlreadyComplete(_))));

        // A different identity is a fresh run.
        assert!(launcher.run(&job, &params(2)).is_ok());
    }

    #[test]
    fn failed_non_restartable_job_is_rejected() {
        let repository = InMemoryJobRepository::new();
        let launcher = JobLauncher::new(&repository);
        let job = StubJob::failing("import", false);

        assert!(launcher.run(&job, &params(1)).is_err());
        let rejected = launcher.run(&job, &params(1));
        assert!(matches!(rejected, Err(BatchError::NotRestartable(_))));
    }

    #[test]
    fn failed_restartable_job_can_be_relaunched() {
        let repository = InMemoryJobRepository::new();
        let launcher = JobLauncher::new(&repository);
        let job = StubJob::failing("import", true);

        assert!(launcher.run(&job, &params(1)).is_err());
        // The relaunch reuses the execution record and fails again.
        let relaunched = launcher.run(&job, &params(1));
        assert!(matches!(relaunched, Err(BatchError::Job(_, _))));
    }

    #[test]
    fn running_execution_rejects_identical_parameters() {
        let repository = InMemoryJobRepository::new();
        let launcher = JobLauncher::new(&repository);
        let job = StubJob::completing("import");

        let mut execution = repository
            .create_job_execution("import", &params(1))
            .unwrap();
        execution.status = BatchStatus::Started;
        repository.update_job_execution(&execution).unwrap();

        let rejected = launcher.run(&job, &params(1));
        assert!(matches!(rejected, Err(BatchError::AlreadyRunning(_))));
    }

    #[test]
    fn operator_selects_the_enabled_job() {
        let repository = InMemoryJobRepository::new();
        let mut operator = JobOperator::new(&repository);
        let first = StubJob::completing("FLAT_FILE_CHUNK_JOB");
        let second = StubJob::completing("JDBC_PAGING_CHUNK_JOB");
        operator.register(&first);
        operator.register(&second);

        let selected = operator.select(Some("JDBC_PAGING_CHUNK_JOB")).unwrap();
        assert_eq!(selected.name(), "JDBC_PAGING_CHUNK_JOB");
        assert!(operator.select(Some("UNKNOWN_JOB")).is_none());
        assert!(operator.select(None).is_none());
    }

    #[test]
    fn operator_rejects_unknown_job_names() {
        let repository = InMemoryJobRepository::new();
        let operator = JobOperator::new(&repository);
        let result = operator.start("missing", &JobParameters::new());
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
