use std::thread;

use chrono::Utc;
use log::{error, info};

use crate::{
    core::step::{Step, StepContext, StepExecution, StepStatus},
    error::BatchError,
};

/// Parent step that runs its children in parallel partitions.
///
/// Each child is an independent step over a disjoint slice of the input,
/// executed on its own worker thread with its own execution record and
/// chunk commits. The parent waits for every partition to reach a terminal
/// state, then aggregates the counts. The job repository is the only state
/// the partitions share.
///
/// Parent status: `Completed` when every partition completed, `Stopped`
/// when at least one stopped and none failed, `Failed` otherwise.
pub struct PartitionedStep<'a> {
    name: String,
    partitions: Vec<&'a dyn Step>,
}

impl Step for PartitionedStep<'_> {
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
        info!(
            "Start of partitioned step: {}, partitions: {}",
            self.name,
            self.partitions.len()
        );

        let results: Vec<Result<StepExecution, BatchError>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .partitions
                .iter()
                .map(|partition| {
                    scope.spawn(move || -> Result<StepExecution, BatchError> {
                        let mut child = ctx
                            .repository()
                            .find_step_execution(ctx.job_execution_id(), partition.name())?
                            .unwrap_or_else(|| StepExecution::new(partition.name()));
                        if child.status == StepStatus::Completed {
                            return Ok(child);
                        }
                        ctx.save_step(&child)?;
                        // A partition failure is terminal state in the child
                        // record; the parent derives its own status from it.
                        let _ = partition.execute(ctx, &mut child);
                        Ok(child)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(BatchError::Step(
                            self.name.clone(),
                            "partition worker panicked".to_string(),
                        ))
                    })
                })
                .collect()
        });

        let mut failed = false;
        let mut stopped = false;

        for result in results {
            match result {
                Ok(child) => {
                    execution.read_count += child.read_count;
                    execution.write_count += child.write_count;
                    execution.filter_count += child.filter_count;
                    execution.commit_count += child.commit_count;
                    execution.rollback_count += child.rollback_count;
                    execution.read_skip_count += child.read_skip_count;
                    execution.process_skip_count += child.process_skip_count;
                    execution.write_skip_count += child.write_skip_count;
                    match child.status {
                        StepStatus::Failed => {
                            failed = true;
                            execution.exit_description = format!(
                                "partition '{}' failed: {}",
                                child.step_name, child.exit_description
                            );
                        }
                        StepStatus::Stopped => stopped = true,
                        _ => {}
                    }
                }
                Err(worker_error) => {
                    failed = true;
                    execution.exit_description = worker_error.to_string();
                }
            }
        }

        execution.status = if failed {
            StepStatus::Failed
        } else if stopped {
            StepStatus::Stopped
        } else {
            StepStatus::Completed
        };
        execution.end_time = Some(Utc::now());
        ctx.save_step(execution)?;
        info!(
            "End of partitioned step: {}, status: {:?}",
            self.name, execution.status
        );

        if failed {
            error!(
                "Partitioned step failed: {}: {}",
                self.name, execution.exit_description
            );
            Err(BatchError::Step(
                self.name.clone(),
                execution.exit_description.clone(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Builder for [`PartitionedStep`].
pub struct PartitionedStepBuilder<'a> {
    name: String,
    partitions: Vec<&'a dyn Step>,
}

impl<'a> PartitionedStepBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            partitions: Vec::new(),
        }
    }

    /// Adds a child step covering one slice of the input.
    pub fn partition(mut self, step: &'a dyn Step) -> Self {
        self.partitions.push(step);
        self
    }

    pub fn build(self) -> PartitionedStep<'a> {
        PartitionedStep {
            name: self.name,
            partitions: self.partitions,
        }
    }
}
