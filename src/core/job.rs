use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    core::{
        parameters::{JobParameters, JobParametersIncrementer},
        repository::JobRepository,
        step::{Step, StepContext, StepExecution, StepStatus},
    },
    error::BatchError,
};

use super::build_name;

/// Status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// The execution record exists but the job has not started running.
    Starting,
    /// The job is running.
    Started,
    /// A stop was requested; the job is waiting for the current step to
    /// reach a chunk boundary.
    Stopping,
    /// Terminal: stopped on operator request.
    Stopped,
    /// Terminal: a step on the executed path failed.
    Failed,
    /// Terminal: every step on the executed path completed.
    Completed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }

    pub fn is_running(&self) -> bool {
        !self.is_terminal()
    }
}

/// Execution record of one job run.
///
/// Created by the launcher and owned by the job repository for its
/// lifetime; the run parameters form its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_description: String,
}

impl JobExecution {
    pub(crate) fn new(job_name: &str, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            parameters,
            status: BatchStatus::Starting,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            exit_description: String::new(),
        }
    }
}

/// An ordered sequence of steps with a run identity policy.
///
/// Jobs do not launch themselves: the [`JobLauncher`] decides, against the
/// repository, whether a launch is a fresh run or a restart, then calls
/// `execute` with the execution record it settled on.
///
/// [`JobLauncher`]: crate::core::launcher::JobLauncher
pub trait Job {
    fn name(&self) -> &str;

    /// Whether a failed or stopped execution may be relaunched with the
    /// same parameters.
    fn restartable(&self) -> bool {
        true
    }

    /// Policy that mints the parameters of the next fresh run.
    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        None
    }

    /// Runs the steps, mutating `execution` and persisting it through the
    /// repository.
    ///
    /// # Returns
    /// - `Ok(())` when the execution reached `Completed` or `Stopped`
    /// - `Err(BatchError)` when it reached `Failed`
    fn execute(
        &self,
        repository: &dyn JobRepository,
        execution: &mut JobExecution,
    ) -> Result<(), BatchError>;
}

/// Sequential job: steps run in declaration order.
///
/// A step failure halts the job unless a transition routes the failure to a
/// recovery step. Steps completed by a prior attempt are skipped when the
/// execution is resumed, so a restart re-runs only the unfinished tail.
pub struct JobInstance<'a> {
    id: Uuid,
    name: String,
    steps: Vec<&'a dyn Step>,
    /// Failure transitions: source step name to recovery step name.
    on_failed: HashMap<String, String>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    restartable: bool,
}

impl JobInstance<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name() == name)
    }
}

impl Job for JobInstance<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn restartable(&self) -> bool {
        self.restartable
    }

    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer
    }

    fn execute(
        &self,
        repository: &dyn JobRepository,
        execution: &mut JobExecution,
    ) -> Result<(), BatchError> {
        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());
        execution.exit_description.clear();
        repository.update_job_execution(execution)?;
        info!("Start of job: {}, id: {}", self.name, execution.id);

        let ctx = StepContext::new(repository, execution.id);
        let mut index = 0;
        let mut failure: Option<BatchError> = None;
        let mut stopped = false;

        while index < self.steps.len() {
            let step = self.steps[index];
            let mut step_execution = repository
                .find_step_execution(execution.id, step.name())?
                .unwrap_or_else(|| StepExecution::new(step.name()));

            if step_execution.status == StepStatus::Completed {
                debug!(
                    "Step '{}' completed in a prior attempt, skipping",
                    step.name()
                );
                index += 1;
                continue;
            }

            // The record must exist before the executor checkpoints against it.
            repository.save_step_execution(execution.id, &step_execution)?;

            match step.execute(&ctx, &mut step_execution) {
                Ok(()) if step_execution.status == StepStatus::Stopped => {
                    info!("Job '{}' stopped at step '{}'", self.name, step.name());
                    stopped = true;
                    break;
                }
                Ok(()) => {
                    index += 1;
                }
                Err(error) => match self.on_failed.get(step.name()) {
                    Some(target) => {
                        warn!(
                            "Step '{}' failed, routing to '{}': {}",
                            step.name(),
                            target,
                            error
                        );
                        match self.step_index(target) {
                            Some(next) => index = next,
                            None => {
                                failure = Some(BatchError::Configuration(format!(
                                    "transition from step '{}' targets unknown step '{}'",
                                    step.name(),
                                    target
                                )));
                                break;
                            }
                        }
                    }
                    None => {
                        failure = Some(error);
                        break;
                    }
                },
            }
        }

        execution.status = if stopped {
            BatchStatus::Stopped
        } else if failure.is_some() {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        if let Some(error) = &failure {
            execution.exit_description = error.to_string();
        }
        execution.end_time = Some(Utc::now());
        // The terminal status must be durable before it is acknowledged.
        repository.update_job_execution(execution)?;
        info!(
            "End of job: {}, id: {}, status: {:?}",
            self.name, execution.id, execution.status
        );

        match failure {
            None => Ok(()),
            Some(error) => Err(BatchError::Job(self.name.clone(), error.to_string())),
        }
    }
}

/// Builder for [`JobInstance`].
///
/// ```rust,no_run,compile_fail
/// let job = JobBuilder::new()
///     .name("import-customers")
///     .start(&import_step)
///     .next(&report_step)
///     .on_failed_goto("import", "cleanup")
///     .incrementer(&RunIdIncrementer)
///     .build();
/// ```
pub struct JobBuilder<'a> {
    name: Option<String>,
    steps: Vec<&'a dyn Step>,
    on_failed: HashMap<String, String>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    restartable: bool,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
            on_failed: HashMap::new(),
            incrementer: None,
            restartable: true,
        }
    }

    /// Sets the job name. A random name is generated if not specified.
    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step after the previously added one.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Routes a step failure to a recovery step instead of failing the job.
    pub fn on_failed_goto(mut self, from: &str, to: &str) -> JobBuilder<'a> {
        self.on_failed.insert(from.to_string(), to.to_string());
        self
    }

    /// Sets the policy that mints fresh run parameters for `start_next`.
    pub fn incrementer(
        mut self,
        incrementer: &'a dyn JobParametersIncrementer,
    ) -> JobBuilder<'a> {
        self.incrementer = Some(incrementer);
        self
    }

    /// Forbids relaunching failed executions of this job. Defaults to
    /// restartable.
    pub fn restartable(mut self, restartable: bool) -> JobBuilder<'a> {
        self.restartable = restartable;
        self
    }

    pub fn build(self) -> JobInstance<'a> {
        JobInstance {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            on_failed: self.on_failed,
            incrementer: self.incrementer,
            restartable: self.restartable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchStatus, Job, JobBuilder};
    use crate::core::parameters::{JobParametersIncrementer, RunIdIncrementer};

    #[test]
    fn builder_generates_a_name_when_unset() {
        let job = JobBuilder::new().build();
        assert!(!job.name().is_empty());
    }

    #[test]
    fn builder_keeps_the_given_name() {
        let job = JobBuilder::new().name("FLAT_FILE_CHUNK_JOB").build();
        assert_eq!(job.name(), "FLAT_FILE_CHUNK_JOB");
    }

    #[test]
    fn incrementer_is_exposed_to_the_launcher() {
        let incrementer = RunIdIncrementer;
        let job = JobBuilder::new().incrementer(&incrementer).build();
        let next = job.incrementer().unwrap().next(None);
        assert_eq!(next.get_i64(RunIdIncrementer::RUN_ID_KEY), Some(1));
    }

    #[test]
    fn terminal_statuses() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Stopped.is_terminal());
        assert!(BatchStatus::Started.is_running());
        assert!(BatchStatus::Stopping.is_running());
    }
}
