use crate::result::AiError;

/// A self-contained model computation (training run or inference).
///
/// Inputs are snapshots provided by callers (infra/services); jobs do no I/O
/// against providers or stores and are safe to run on a blocking thread.
pub trait AiJob: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Output: Send + 'static;

    /// Stable job name used in logs.
    fn name(&self) -> &'static str;

    /// The input snapshot the job will run on.
    fn input(&self) -> &Self::Input;

    /// Execute the computation.
    fn run(&self) -> Result<Self::Output, AiError>;
}
