use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Static limits handed to [`crate::JobManager`] at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobManagerConfig {
    /// Upper bound on jobs in the `Running` state at any instant.
    pub max_concurrent_tasks: usize,

    /// Per-job deadline, measured from the moment the job starts running.
    pub task_timeout: Duration,

    /// Largest accepted payload, in bytes.
    pub max_file_size: u64,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl JobManagerConfig {
    pub fn with_max_concurrent_tasks(mut self, max_concurrent_tasks: usize) -> Self {
        self.max_concurrent_tasks = max_concurrent_tasks;
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Zero slots would stall every job, so it is raised to one.
    pub(crate) fn clamped(mut self) -> Self {
        if self.max_concurrent_tasks == 0 {
            tracing::warn!("max_concurrent_tasks is 0, running with a single slot");
            self.max_concurrent_tasks = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = JobManagerConfig::default();
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.task_timeout, Duration::from_secs(300));
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
    }

    #[test]
    fn zero_slots_clamped() {
        let config = JobManagerConfig::default().with_max_concurrent_tasks(0);
        assert_eq!(config.clone().clamped().max_concurrent_tasks, 1);
        assert_eq!(
            config.with_max_concurrent_tasks(5).clamped().max_concurrent_tasks,
            5
        );
    }
}
