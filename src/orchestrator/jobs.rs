// Per-key lock table and job lifecycle
use crate::model::{JobKey, ScrapeError, ScrapeOutcome};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl JobState {
    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::PartiallySucceeded | JobState::Failed
        )
    }

    pub fn can_advance_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::PartiallySucceeded)
                | (JobState::Running, JobState::Failed)
        )
    }

    pub fn outcome(self) -> Option<ScrapeOutcome> {
        match self {
            JobState::Succeeded => Some(ScrapeOutcome::Success),
            JobState::PartiallySucceeded => Some(ScrapeOutcome::Partial),
            JobState::Failed => Some(ScrapeOutcome::Failed),
            JobState::Pending | JobState::Running => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("job cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

type Table = Arc<Mutex<HashMap<JobKey, JobState>>>;

fn lock(table: &Table) -> MutexGuard<'_, HashMap<JobKey, JobState>> {
    // The map stays consistent even if a holder panicked mid-update.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keys with a job in flight. An entry lives exactly as long as its `JobGuard`.
#[derive(Clone, Default)]
pub struct JobTable {
    inner: Table,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `Pending` job for `key`, or rejects the request if one is already in flight.
    pub fn try_acquire(&self, key: &JobKey) -> Result<JobGuard, ScrapeError> {
        let mut table = lock(&self.inner);
        if table.contains_key(key) {
            return Err(ScrapeError::LockContention(key.clone()));
        }
        table.insert(key.clone(), JobState::Pending);
        debug!("Acquired job lock for {}", key);

        Ok(JobGuard {
            table: self.inner.clone(),
            key: key.clone(),
            state: JobState::Pending,
        })
    }

    #[cfg(test)]
    pub fn state(&self, key: &JobKey) -> Option<JobState> {
        lock(&self.inner).get(key).copied()
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        lock(&self.inner).len()
    }
}

pub struct JobGuard {
    table: Table,
    key: JobKey,
    state: JobState,
}

impl JobGuard {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    #[cfg(test)]
    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        lock(&self.table).insert(self.key.clone(), next);
        Ok(())
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.key);
        debug!("Released job lock for {} ({:?})", self.key, self.state);
    }
}
