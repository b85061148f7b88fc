use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info};

use crate::{
    core::step::{Step, StepContext, StepExecution, StepStatus},
    error::BatchError,
};

/// Outcome of one tasklet invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet has more work; the executor invokes it again.
    Continuable,
    /// The tasklet is done.
    Finished,
}

/// A single unit of work executed to completion, for one-shot actions that
/// are not record oriented, such as notifications or cleanup.
pub trait Tasklet: Send + Sync {
    fn execute(&self, execution: &mut StepExecution) -> Result<RepeatStatus, BatchError>;
}

/// Step executor for tasklets.
///
/// Re-invokes a `Continuable` tasklet in a loop bounded by the repeat limit
/// and, optionally, a per-invocation timeout. Stop requests are honored
/// between invocations.
pub struct TaskletStep<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    repeat_limit: usize,
    invocation_timeout: Option<Duration>,
}

impl Step for TaskletStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        ctx: &StepContext<'_>,
        execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        if execution.status == StepStatus::Completed {
            return Ok(());
        }

        execution.begin_attempt(None);
        execution.status = StepStatus::Started;
        ctx.save_step(execution)?;
        info!("Start of step: {}, id: {}", self.name, execution.id);

        let outcome = self.run(ctx, execution);

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
            Err(failure) => {
                execution.status = StepStatus::Failed;
                execution.exit_description = failure.to_string();
                execution.end_time = Some(Utc::now());
                ctx.save_step(execution)?;
                error!(
                    "Step failed: {}, id: {}: {}",
                    self.name, execution.id, failure
                );
                Err(BatchError::Step(self.name.clone(), failure.to_string()))
            }
        }
    }
}

impl TaskletStep<'_> {
    fn run(
        &self,
        ctx: &StepContext<'_>,
        execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        let mut invocations = 0;

        loop {
            if ctx.stop_requested()? {
                info!("Stop requested, halting tasklet '{}'", self.name);
                execution.status = StepStatus::Stopped;
                return Ok(());
            }

            let started = Instant::now();
            let status = self.tasklet.execute(execution)?;
            invocations += 1;

            if let Some(timeout) = self.invocation_timeout {
                if started.elapsed() > timeout {
                    return Err(BatchError::TransientIo(format!(
                        "tasklet invocation exceeded {:?}",
                        timeout
                    )));
                }
            }

            match status {
                RepeatStatus::Finished => {
                    execution.status = StepStatus::Completed;
                    return Ok(());
                }
                RepeatStatus::Continuable if invocations >= self.repeat_limit => {
                    return Err(BatchError::PolicyExhausted(format!(
                        "tasklet '{}' still continuable after {} invocations",
                        self.name, invocations
                    )));
                }
                RepeatStatus::Continuable => {
                    debug!(
                        "Tasklet '{}' continuable, invoking again ({}/{})",
                        self.name, invocations, self.repeat_limit
                    );
                }
            }
        }
    }
}

/// Builder for [`TaskletStep`].
pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: Option<&'a dyn Tasklet>,
    repeat_limit: usize,
    invocation_timeout: Option<Duration>,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasklet: None,
            repeat_limit: 1_000,
            invocation_timeout: None,
        }
    }

    pub fn tasklet(mut self, tasklet: &'a dyn Tasklet) -> Self {
        self.tasklet = Some(tasklet);
        self
    }

    /// Maximum invocations of a continuable tasklet before the step fails.
    pub fn repeat_limit(mut self, repeat_limit: usize) -> Self {
        self.repeat_limit = repeat_limit.max(1);
        self
    }

    /// Upper bound for one invocation. An overrun fails the step like any
    /// other tasklet error.
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> TaskletStep<'a> {
        TaskletStep {
            name: self.name,
            tasklet: self
                .tasklet
                .expect("Tasklet is required for building a step"),
            repeat_limit: self.repeat_limit,
            invocation_timeout: self.invocation_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::{
        parameters::JobParameters, repository::InMemoryJobRepository,
        repository::JobRepository, step::StepBuilder,
    };

    struct CountdownTasklet {
        remaining: AtomicUsize,
    }

    impl Tasklet for CountdownTasklet {
        fn execute(&self, _execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
            let remaining = self.remaining.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(RepeatStatus::Finished);
            }
            self.remaining.store(remaining - 1, Ordering::SeqCst);
            Ok(RepeatStatus::Continuable)
        }
    }

    fn context_fixture(
        repository: &InMemoryJobRepository,
    ) -> (StepContext<'_>, StepExecution) {
        let execution = repository
            .create_job_execution("tasklet-job", &JobParameters::new())
            .unwrap();
        (
            StepContext::new(repository, execution.id),
            StepExecution::new("countdown"),
        )
    }

    #[test]
    fn continuable_tasklet_runs_until_finished() {
        let repository = InMemoryJobRepository::new();
        let (ctx, mut execution) = context_fixture(&repository);

        let tasklet = CountdownTasklet {
            remaining: AtomicUsize::new(3),
        };
        let step = StepBuilder::new("countdown").tasklet(&tasklet).build();

        step.execute(&ctx, &mut execution).unwrap();
        assert_eq!(execution.status, StepStatus::Completed);
        assert_eq!(tasklet.remaining.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slow_invocation_fails_like_any_other_error() {
        struct SlowTasklet;

        impl Tasklet for SlowTasklet {
            fn execute(
                &self,
                _execution: &mut StepExecution,
            ) -> Result<RepeatStatus, BatchError> {
                std::thread::sleep(Duration::from_millis(5));
                Ok(RepeatStatus::Finished)
            }
        }

        let repository = InMemoryJobRepository::new();
        let (ctx, mut execution) = context_fixture(&repository);

        let tasklet = SlowTasklet;
        let step = StepBuilder::new("countdown")
            .tasklet(&tasklet)
            .invocation_timeout(Duration::ZERO)
            .build();

        let result = step.execute(&ctx, &mut execution);
        assert!(result.is_err());
        assert_eq!(execution.status, StepStatus::Failed);
        assert!(execution.exit_description.contains("exceeded"));
    }

    #[test]
    fn repeat_limit_bounds_the_loop() {
        let repository = InMemoryJobRepository::new();
        let (ctx, mut execution) = context_fixture(&repository);

        let tasklet = CountdownTasklet {
            remaining: AtomicUsize::new(50),
        };
        let step = StepBuilder::new("countdown")
            .tasklet(&tasklet)
            .repeat_limit(10)
            .build();

        let result = step.execute(&ctx, &mut execution);
        assert!(result.is_err());
        assert_eq!(execution.status, StepStatus::Failed);
        assert!(execution.exit_description.contains("10 invocations"));
    }
}
