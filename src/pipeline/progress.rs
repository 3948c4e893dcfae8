use serde::{Deserialize, Serialize};

/// A coarse milestone of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub status: String,
}

impl Progress {
    pub fn new(current: u32, total: u32, status: impl Into<String>) -> Self {
        Progress {
            current,
            total,
            status: status.into(),
        }
    }
}

/// Receives progress milestones. Closures `Fn(Progress)` implement it.
pub trait ProgressHook: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressHook for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// Hook for runs nobody is watching.
pub struct NoProgress;

impl ProgressHook for NoProgress {
    fn report(&self, _progress: Progress) {}
}
