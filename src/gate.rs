//! Concurrency Gate (§4.8): a process-wide admission control so no more than
//! `max_concurrent_users` pipelines run at once, and no user runs twice
//! concurrently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

struct GateState {
    current_processing: HashSet<i64>,
    max_concurrent_users: usize,
}

/// Cloneable handle; all clones share the same admission state.
#[derive(Clone)]
pub struct ConcurrencyGate {
    state: Arc<Mutex<GateState>>,
}

/// Held by the pipeline for the duration of a run; releasing drops it.
pub struct Admission {
    gate: ConcurrencyGate,
    user_id: i64,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent_users: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                current_processing: HashSet::new(),
                max_concurrent_users,
            })),
        }
    }

    /// Tries to admit `user_id`. Returns `None` if the user is already being
    /// processed or the global slot count is exhausted (§4.8: per-user
    /// mutual exclusion plus a global cap, not a strict queue).
    pub async fn try_admit(&self, user_id: i64) -> Option<Admission> {
        let mut state = self.state.lock().await;
        if state.current_processing.contains(&user_id) {
            return None;
        }
        if state.current_processing.len() >= state.max_concurrent_users {
            return None;
        }
        state.current_processing.insert(user_id);
        Some(Admission {
            gate: self.clone(),
            user_id,
        })
    }
}

impl Admission {
    /// Removes `user_id` from the processing set, then sleeps at least 1s
    /// before returning, so a user whose pipeline errors out repeatedly
    /// cannot busy-loop the scheduler (§4.8 step 4 cooldown).
    pub async fn release(self) {
        {
            let mut state = self.gate.state.lock().await;
            state.current_processing.remove(&self.user_id);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_second_admission_for_same_user_while_held() {
        let gate = ConcurrencyGate::new(4);
        let first = gate.try_admit(1).await;
        assert!(first.is_some());
        let second = gate.try_admit(1).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn rejects_admission_past_global_cap() {
        let gate = ConcurrencyGate::new(1);
        let first = gate.try_admit(1).await;
        assert!(first.is_some());
        let second = gate.try_admit(2).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn readmits_after_release() {
        let gate = ConcurrencyGate::new(1);
        let first = gate.try_admit(1).await.unwrap();
        first.release().await;
        let second = gate.try_admit(1).await;
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn readmits_same_user_while_release_is_still_cooling_down() {
        let gate = ConcurrencyGate::new(1);
        let first = gate.try_admit(1).await.unwrap();
        let release_task = tokio::spawn(async move { first.release().await });

        // `user_id` is removed from the processing set before the cooldown
        // sleep, so a re-admission can race ahead of `release_task`
        // finishing its sleep.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = gate.try_admit(1).await;
        assert!(second.is_some());

        release_task.await.unwrap();
    }
}
