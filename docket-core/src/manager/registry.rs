use std::collections::HashMap;

use crate::entities::{JobId, JobState, JobStats};

use super::job::Job;

/// In-memory job table. Jobs are never evicted; `order` keeps submission order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    jobs: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

impl Registry {
    pub(crate) fn insert(&mut self, job: Job) {
        self.order.push(job.id);
        self.jobs.insert(job.id, job);
    }

    pub(crate) fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Job> + '_ {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    pub(crate) fn stats(&self, max_concurrent_tasks: usize) -> JobStats {
        self.jobs.values().fold(
            JobStats {
                max_concurrent_tasks,
                ..Default::default()
            },
            |mut stats, job| {
                match job.state {
                    JobState::Pending => stats.pending += 1,
                    JobState::Running => stats.running += 1,
                    JobState::Completed => stats.completed += 1,
                    JobState::Failed => stats.failed += 1,
                    JobState::TimedOut => stats.timed_out += 1,
                }
                stats
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DocumentType, ProcessOptions};

    #[test]
    fn iterates_in_submission_order() {
        let mut registry = Registry::default();
        let ids: Vec<JobId> = (0..5)
            .map(|i| {
                let job = Job::new(
                    &format!("doc{i}.txt"),
                    1,
                    DocumentType::Text,
                    ProcessOptions::default(),
                );
                let id = job.id;
                registry.insert(job);
                id
            })
            .collect();

        let listed: Vec<JobId> = registry.iter().map(|job| job.id).collect();
        assert_eq!(listed, ids);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn stats_count_states() {
        let mut registry = Registry::default();
        for _ in 0..3 {
            registry.insert(Job::new(
                "a.pdf",
                1,
                DocumentType::Pdf,
                ProcessOptions::default(),
            ));
        }
        let first = registry.iter().next().map(|job| job.id).unwrap();
        registry.get_mut(&first).unwrap().mark_running();

        let stats = registry.stats(2);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.max_concurrent_tasks, 2);
    }
}
