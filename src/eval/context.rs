use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

/// Per-invocation state handed to every engine.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Shared deadline; every spawned tool is killed once it passes.
    pub deadline: Instant,
    /// Working directory of the hook process.
    pub cwd: PathBuf,
}

impl EvalContext {
    pub fn new(cwd: PathBuf, budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            cwd,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// A copy whose deadline is no later than `now + budget`.
    pub fn narrowed(&self, budget: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + budget),
            cwd: self.cwd.clone(),
        }
    }
}
