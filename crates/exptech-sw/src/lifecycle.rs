//! Worker lifecycle: install → waiting → activate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use exptech_cache::GenerationId;
use serde::{Deserialize, Serialize};

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Constructed, lifecycle not started.
    Parsed,
    /// Install phase running (precache in progress).
    Installing,
    /// Installed, waiting to take over.
    Installed,
    /// Activate phase running (pruning stale generations).
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Superseded by a newer generation.
    Redundant,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Parsed
    }
}

/// One worker instance, tied to the generation it was loaded with.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: WorkerId,

    /// The cache generation this worker serves.
    pub generation: GenerationId,

    /// Current state.
    pub state: WorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a worker for the given generation.
    pub fn new(generation: GenerationId) -> Self {
        Self {
            id: WorkerId::new(),
            generation,
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if superseded.
    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

/// Tracks the installing/waiting/active worker slots.
#[derive(Debug, Default)]
pub struct ServiceWorkerRegistration {
    /// Worker currently installing.
    pub installing: Option<ServiceWorker>,

    /// Worker installed and waiting.
    pub waiting: Option<ServiceWorker>,

    /// Worker controlling clients.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create an empty registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition the installing worker to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Installed);
            self.waiting = Some(worker);
        }
    }

    /// Promote the waiting worker; any previous active worker becomes
    /// redundant.
    pub fn activate(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            worker.set_state(WorkerState::Activating);

            if let Some(mut old) = self.active.take() {
                old.set_state(WorkerState::Redundant);
            }

            worker.set_state(WorkerState::Activated);
            self.active = Some(worker);
        }
    }

    /// Force the waiting worker out of the waiting state.
    pub fn skip_waiting(&mut self) {
        self.activate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(stamp: u64) -> GenerationId {
        GenerationId::new("experience-tech", "1.0.1", stamp)
    }

    #[test]
    fn test_worker_starts_parsed() {
        let worker = ServiceWorker::new(generation(1));
        assert_eq!(worker.state, WorkerState::Parsed);
        assert!(!worker.is_active());
    }

    #[test]
    fn test_state_transitions() {
        let mut worker = ServiceWorker::new(generation(1));
        worker.set_state(WorkerState::Installing);
        assert_eq!(worker.state, WorkerState::Installing);

        worker.set_state(WorkerState::Activated);
        assert!(worker.is_active());
    }

    #[test]
    fn test_registration_install_then_activate() {
        let mut registration = ServiceWorkerRegistration::new();
        registration.installing = Some(ServiceWorker::new(generation(1)));

        registration.install_complete();
        assert!(registration.installing.is_none());
        assert_eq!(
            registration.waiting.as_ref().map(|w| w.state),
            Some(WorkerState::Installed)
        );

        registration.activate();
        assert!(registration.waiting.is_none());
        assert!(registration.active.as_ref().is_some_and(|w| w.is_active()));
    }

    #[test]
    fn test_activation_supersedes_previous_worker() {
        let mut registration = ServiceWorkerRegistration::new();
        registration.installing = Some(ServiceWorker::new(generation(100)));
        registration.install_complete();
        registration.activate();
        let first = registration.active.as_ref().map(|w| w.id).unwrap();

        registration.installing = Some(ServiceWorker::new(generation(200)));
        registration.install_complete();
        registration.skip_waiting();

        let active = registration.active.as_ref().unwrap();
        assert_ne!(active.id, first);
        assert_eq!(active.generation.stamp(), 200);
    }

    #[test]
    fn test_activate_without_waiting_is_noop() {
        let mut registration = ServiceWorkerRegistration::new();
        registration.activate();
        assert!(registration.active.is_none());
    }

    #[test]
    fn test_worker_ids_unique() {
        let a = ServiceWorker::new(generation(1));
        let b = ServiceWorker::new(generation(1));
        assert_ne!(a.id, b.id);
    }
}
