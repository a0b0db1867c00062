// compile-service-rs/src/pipeline.rs
// The compile/fix retry loop, written as an explicit state machine so the
// termination conditions are auditable and testable without spawning
// processes or touching the network.

use crate::compiler::{CompileOutcome, CompilerError, TexCompiler};
use crate::fix_client::FixProvider;
use crate::job::Job;
use crate::log_interpreter::{self, ClassifiedError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Loop states. Terminal variants carry the data the response needs.
#[derive(Debug)]
enum LoopState {
    Attempting(u32),
    Succeeded(Vec<u8>),
    FailedFinal(ClassifiedError),
}

#[derive(Debug)]
pub enum JobResult {
    Artifact(Vec<u8>),
    Failed {
        classified: ClassifiedError,
        /// True when the fix service was called at least once.
        fix_attempted: bool,
    },
}

#[derive(Debug)]
pub struct JobOutcome {
    /// Attempts used; always in 1..=max.
    pub attempts: u32,
    /// True when replacement source from the fixer was substituted in.
    pub fix_applied: bool,
    pub result: JobResult,
}

/// Drive a job to a terminal state.
///
/// Each attempt compiles the current source; on failure the log is
/// classified and, when fixing is enabled and attempts remain, the fixer's
/// replacement source feeds the next attempt. A fixer failure ends the
/// loop rather than retrying it independently. Total external calls are
/// bounded by `2 * max_attempts - 1`.
///
/// Errors from the invocation machinery itself (filesystem, spawn) abort
/// the job and surface as an internal error at the HTTP boundary.
pub async fn run_job<C, F>(
    job: &mut Job,
    compiler: &C,
    fixer: &F,
    fix_enabled: bool,
    max_attempts: u32,
) -> Result<JobOutcome, CompilerError>
where
    C: TexCompiler + ?Sized,
    F: FixProvider + ?Sized,
{
    let max_attempts = max_attempts.max(1);
    let mut state = LoopState::Attempting(1);
    let mut attempts = 0;
    let mut fix_applied = false;
    let mut fix_attempted = false;

    loop {
        state = match state {
            LoopState::Attempting(n) => {
                attempts = n;
                log::info!("job {}: compile attempt {}/{}", job.id, n, max_attempts);

                match compiler.compile(job.workdir(), &job.source).await? {
                    CompileOutcome::Success(artifact) => LoopState::Succeeded(artifact),
                    CompileOutcome::Failure { log_text } => {
                        let classified = log_interpreter::interpret(&log_text);
                        log::warn!("job {}: attempt {} failed: {}", job.id, n, classified.message);

                        if !fix_enabled {
                            LoopState::FailedFinal(classified)
                        } else if n >= max_attempts {
                            log::warn!("job {}: attempt ceiling reached", job.id);
                            LoopState::FailedFinal(classified)
                        } else {
                            fix_attempted = true;
                            match fixer.request_fix(&job.source, &classified.message).await {
                                Ok(new_source) => {
                                    job.source = new_source;
                                    fix_applied = true;
                                    LoopState::Attempting(n + 1)
                                }
                                Err(err) => {
                                    log::error!("job {}: fixing unavailable: {}", job.id, err);
                                    LoopState::FailedFinal(classified)
                                }
                            }
                        }
                    }
                }
            }
            LoopState::Succeeded(artifact) => {
                log::info!("job {}: succeeded after {} attempt(s)", job.id, attempts);
                return Ok(JobOutcome {
                    attempts,
                    fix_applied,
                    result: JobResult::Artifact(artifact),
                });
            }
            LoopState::FailedFinal(classified) => {
                log::warn!("job {}: failed after {} attempt(s)", job.id, attempts);
                return Ok(JobOutcome {
                    attempts,
                    fix_applied,
                    result: JobResult::Failed {
                        classified,
                        fix_attempted,
                    },
                });
            }
        };
    }
}
