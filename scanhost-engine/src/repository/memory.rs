//! In-memory job repository
//!
//! Behaves like the database repository including the version check. Used by
//! tests and local dry runs.

use async_trait::async_trait;
use scanhost_core::domain::job::{Job, JobState};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use super::{JobRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
    /// Number of upcoming saves that fail with an optimistic lock conflict
    injected_conflicts: AtomicUsize,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` saves fail as if another writer won
    pub fn inject_save_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Removes a job row, simulating a concurrent delete
    pub fn remove(&self, id: Uuid) -> Option<Job> {
        self.lock().remove(&id)
    }

    /// Returns a snapshot of a job row
    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Job>> {
        // a poisoned map still holds consistent rows, every write is a single insert
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.get(id))
    }

    async fn insert(&self, job: &Job) -> Result<(), RepositoryError> {
        self.lock().insert(job.id, job.clone());
        Ok(())
    }

    async fn save(&self, job: &Job) -> Result<Job, RepositoryError> {
        if self.take_injected_conflict() {
            return Err(RepositoryError::OptimisticLock {
                id: job.id,
                expected_version: job.version,
            });
        }

        let mut jobs = self.lock();
        let stored = jobs.get(&job.id).ok_or(RepositoryError::NotFound(job.id))?;

        if stored.version != job.version {
            return Err(RepositoryError::OptimisticLock {
                id: job.id,
                expected_version: job.version,
            });
        }

        let mut saved = job.clone();
        saved.version += 1;
        jobs.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn force_state_reset(
        &self,
        ids: &[Uuid],
        state: JobState,
    ) -> Result<u64, RepositoryError> {
        let mut jobs = self.lock();
        let mut changed = 0;
        for id in ids {
            if let Some(job) = jobs.get_mut(id) {
                job.state = state;
                job.version += 1;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_in_state(&self, state: JobState) -> Result<Vec<Job>, RepositoryError> {
        let mut found: Vec<Job> = self
            .lock()
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect();
        found.sort_by_key(|job| job.created);
        Ok(found)
    }

    async fn claim_next_ready(&self, server_id: &str) -> Result<Option<Job>, RepositoryError> {
        let mut jobs = self.lock();
        let next = jobs
            .values_mut()
            .filter(|job| job.server_id == server_id && job.state == JobState::ReadyToStart)
            .min_by_key(|job| job.created);

        Ok(next.map(|job| {
            job.state = JobState::Queued;
            job.version += 1;
            job.clone()
        }))
    }
}
