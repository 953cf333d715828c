//! Process-local registry of running phase loops, keyed by (tenant, phase).
//! Nothing here is persisted: after a restart the engine rebuilds running
//! state from the desired-mode flags in the store, otherwise a crash would
//! silently stop automation with no operator signal.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use outpost_core::types::Phase;

/// Handle to one running phase loop.
pub struct LoopHandle {
    /// Cooperative stop flag, observed between job steps only.
    pub stop: watch::Sender<bool>,
    pub join: JoinHandle<()>,
    pub started_at: DateTime<Utc>,
}

/// Map of running loops for this process.
#[derive(Default)]
pub struct SchedulerRegistry {
    loops: Mutex<HashMap<(String, Phase), LoopHandle>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, Phase), LoopHandle>> {
        self.loops.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a loop. A live loop keeps its slot: the rejected handle is
    /// handed back so the caller can cancel the duplicate. Finished loops
    /// are replaced.
    pub fn register(&self, tenant_id: &str, phase: Phase, handle: LoopHandle) -> Option<LoopHandle> {
        let mut loops = self.lock();
        let key = (tenant_id.to_string(), phase);
        if let Some(existing) = loops.get(&key) {
            if !existing.join.is_finished() {
                return Some(handle);
            }
        }
        loops.insert(key, handle);
        None
    }

    /// Whether a live loop is registered for (tenant, phase).
    pub fn lookup(&self, tenant_id: &str, phase: Phase) -> bool {
        self.lock()
            .get(&(tenant_id.to_string(), phase))
            .is_some_and(|h| !h.join.is_finished())
    }

    /// Remove and return the loop handle so the caller can stop and await it.
    pub fn take(&self, tenant_id: &str, phase: Phase) -> Option<LoopHandle> {
        self.lock().remove(&(tenant_id.to_string(), phase))
    }

    /// Phases with a live loop for a tenant.
    pub fn running_phases(&self, tenant_id: &str) -> Vec<Phase> {
        self.lock()
            .iter()
            .filter(|((t, _), h)| t == tenant_id && !h.join.is_finished())
            .map(|((_, p), _)| *p)
            .collect()
    }

    /// All registered (tenant, phase) slots, live or not.
    pub fn keys(&self) -> Vec<(String, Phase)> {
        self.lock().keys().cloned().collect()
    }

    /// Remove and return every handle (process shutdown).
    pub fn drain(&self) -> Vec<LoopHandle> {
        self.lock().drain().map(|(_, h)| h).collect()
    }

    /// Drop entries whose loop task has already finished. Returns how many
    /// were evicted.
    pub fn evict_idle(&self) -> usize {
        let mut loops = self.lock();
        let before = loops.len();
        loops.retain(|_, h| !h.join.is_finished());
        before - loops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_handle() -> LoopHandle {
        let (tx, mut rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            // Parks until the stop flag flips.
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    break;
                }
            }
        });
        LoopHandle { stop: tx, join, started_at: Utc::now() }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = SchedulerRegistry::new();
        assert!(!registry.lookup("t1", Phase::Post));

        assert!(registry.register("t1", Phase::Post, live_handle()).is_none());
        assert!(registry.lookup("t1", Phase::Post));
        assert!(!registry.lookup("t1", Phase::Collect));
    }

    #[tokio::test]
    async fn test_register_hands_back_rejected_handle() {
        let registry = SchedulerRegistry::new();
        assert!(registry.register("t1", Phase::Post, live_handle()).is_none());

        // A live slot refuses the newcomer; the caller gets the duplicate
        // handle back and can cancel it without touching the slot.
        let rejected = registry.register("t1", Phase::Post, live_handle()).unwrap();
        let _ = rejected.stop.send(true);
        rejected.join.await.unwrap();
        assert!(registry.lookup("t1", Phase::Post));
    }

    #[tokio::test]
    async fn test_take_then_stop() {
        let registry = SchedulerRegistry::new();
        registry.register("t1", Phase::Post, live_handle());

        let handle = registry.take("t1", Phase::Post).unwrap();
        assert!(!registry.lookup("t1", Phase::Post));
        let _ = handle.stop.send(true);
        handle.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_evict_idle_removes_finished_loops() {
        let registry = SchedulerRegistry::new();
        registry.register("t1", Phase::Post, live_handle());
        registry.register("t1", Phase::Collect, live_handle());

        // Finish the post loop but leave its entry in place.
        {
            let loops = registry.lock();
            let _ = loops[&("t1".to_string(), Phase::Post)].stop.send(true);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(registry.evict_idle(), 1);
        assert_eq!(registry.running_phases("t1"), vec![Phase::Collect]);
    }
}
