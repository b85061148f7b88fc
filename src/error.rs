use thiserror::Error;

/// Error taxonomy for the batch engine.
///
/// The chunk step executor resolves `TransientIo` and `DataFormat` errors
/// through the configured retry and skip policies; every other variant
/// escalates to the step or job level.
#[derive(Error, Debug)]
pub enum BatchError {
    /// A reader or writer failed in a way that may succeed on re-attempt.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// A record could not be parsed or mapped. Candidate for the skip policy.
    #[error("malformed record: {0}")]
    DataFormat(String),

    /// The retry or skip budget of a step has been exceeded.
    #[error("fault policy exhausted: {0}")]
    PolicyExhausted(String),

    /// Checkpoint or metadata persistence failed. Always fatal to the running
    /// step, since restart correctness depends on the repository.
    #[error("job repository error: {0}")]
    Repository(String),

    /// Cooperative stop raised by a collaborator. The executor finishes the
    /// in-flight commit and marks the execution stopped, not failed.
    #[error("cancellation requested: {0}")]
    CancellationRequested(String),

    /// A completed execution with identical parameters already exists.
    #[error("job '{0}' already has a completed execution for these parameters")]
    AlreadyComplete(String),

    /// An execution with identical parameters is currently running.
    #[error("job '{0}' is already running with these parameters")]
    AlreadyRunning(String),

    /// A prior execution failed and the job does not allow restarts.
    #[error("job '{0}' is not restartable")]
    NotRestartable(String),

    /// Invalid wiring, such as a transition to an unknown step.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A step reached a terminal failure state.
    #[error("step '{0}' failed: {1}")]
    Step(String, String),

    /// A job reached a terminal failure state.
    #[error("job '{0}' failed: {1}")]
    Job(String, String),
}

impl BatchError {
    /// Whether the chunk executor may re-attempt the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchError::TransientIo(_))
    }

    /// Whether the offending record may be skipped under the skip policy.
    pub fn is_skippable(&self) -> bool {
        matches!(self, BatchError::DataFormat(_))
    }
}
