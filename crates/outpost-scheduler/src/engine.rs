//! Automation Engine: owns the per-tenant phase loops and their lifecycle.
//!
//! Every loop is a cooperative tokio task: it checks the working-hour gate,
//! runs one bounded job step, then sleeps a jittered interval. Stop is
//! observed only between steps, so an in-flight publish always completes and
//! records its result before the loop exits. A loop never crashes the
//! process: unexpected errors are logged and backed off.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;

use outpost_accounts::{local_day_start_utc, AccountPool, RateLimiter};
use outpost_classify::OutcomeClassifier;
use outpost_core::config::OutPostConfig;
use outpost_core::error::{OutPostError, Result};
use outpost_core::traits::{Collector, Generator, Publisher};
use outpost_core::types::{Mode, Phase, TaskState, Tenant};
use outpost_store::StateDb;

use crate::hours::is_working_hours;
use crate::phases::{PhaseRunner, StepReport};
use crate::registry::{LoopHandle, SchedulerRegistry};
use crate::selector::Dispatcher;
use crate::stats::{StatsAggregator, TodayCounters};
use crate::ticker::{sleep_unless_stopped, Ticker};

/// Result of a `start` call. A second start for a running mode is a no-op,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of a `stop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Which phase loops are live for a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningPhases {
    pub collect: bool,
    pub generate: bool,
    pub post: bool,
}

impl RunningPhases {
    pub fn any(&self) -> bool {
        self.collect || self.generate || self.post
    }
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: RunningPhases,
    pub today: TodayCounters,
    pub pending_draft: u32,
    pub pending_approved: u32,
    pub dispatched: u32,
    pub failed_today: u32,
}

pub struct AutomationEngine {
    store: Arc<StateDb>,
    config: OutPostConfig,
    pool: Arc<AccountPool>,
    stats: Arc<StatsAggregator>,
    runner: Arc<PhaseRunner>,
    registry: SchedulerRegistry,
}

impl AutomationEngine {
    pub fn new(
        store: Arc<StateDb>,
        config: OutPostConfig,
        collector: Arc<dyn Collector>,
        generator: Arc<dyn Generator>,
        publisher: Arc<dyn Publisher>,
    ) -> Arc<Self> {
        let pool = Arc::new(AccountPool::new(store.clone(), config.limits.clone()));
        let limiter = Arc::new(RateLimiter::new(store.clone(), config.limits.clone()));
        let stats = Arc::new(StatsAggregator::new(store.clone()));
        let dispatcher = Dispatcher::new(
            store.clone(),
            pool.clone(),
            limiter,
            OutcomeClassifier::new(store.clone()),
            stats.clone(),
            publisher,
            config.automation.clone(),
        );
        let runner = Arc::new(PhaseRunner::new(
            store.clone(),
            pool.clone(),
            stats.clone(),
            dispatcher,
            collector,
            generator,
            config.automation.clone(),
        ));
        Arc::new(Self {
            store,
            config,
            pool,
            stats,
            runner,
            registry: SchedulerRegistry::new(),
        })
    }

    /// The account pool, for operator commands that manage accounts.
    pub fn pool(&self) -> &AccountPool {
        &self.pool
    }

    /// Start the phase loops of a mode for a tenant. Idempotent per
    /// (tenant, mode); persists the desired mode for crash recovery.
    pub async fn start(self: &Arc<Self>, tenant_id: &str, mode: Mode) -> Result<StartOutcome> {
        let tenant = self.require_tenant(tenant_id)?;
        if !tenant.enabled {
            return Err(OutPostError::Scheduler(format!("tenant {tenant_id} is disabled")));
        }

        let mut started = 0;
        for phase in mode.phases() {
            if self.registry.lookup(tenant_id, phase) {
                continue;
            }
            let (tx, rx) = watch::channel(false);
            let engine = self.clone();
            let tid = tenant_id.to_string();
            let join = tokio::spawn(async move {
                engine.phase_loop(tid, phase, rx).await;
            });
            match self.registry.register(
                tenant_id,
                phase,
                LoopHandle { stop: tx, join, started_at: Utc::now() },
            ) {
                None => started += 1,
                Some(rejected) => {
                    // Lost a race with a concurrent start; cancel the duplicate.
                    let _ = rejected.stop.send(true);
                }
            }
        }

        if started == 0 {
            tracing::debug!("ℹ️ Mode {mode} already running for {tenant_id}");
            return Ok(StartOutcome::AlreadyRunning);
        }
        if mode == Mode::Full {
            // `full` subsumes the single-phase flags.
            for m in [Mode::Collect, Mode::Generate, Mode::Post] {
                self.store.clear_desired_mode(tenant_id, m)?;
            }
        }
        self.store.set_desired_mode(tenant_id, mode)?;
        tracing::info!("▶️ Started {mode} for {tenant_id} ({started} loop(s))");
        Ok(StartOutcome::Started)
    }

    /// Stop a mode's loops, waiting for each in-flight job step to reach its
    /// safe checkpoint before returning.
    ///
    /// While `full` is the desired mode its phases cannot be stopped one at
    /// a time (reconciliation would restart them); stopping `full` clears
    /// every desired flag for the tenant.
    pub async fn stop(&self, tenant_id: &str, mode: Mode) -> Result<StopOutcome> {
        let desired: Vec<Mode> = self
            .store
            .desired_modes()?
            .into_iter()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, m)| m)
            .collect();
        if mode != Mode::Full && desired.contains(&Mode::Full) {
            return Err(OutPostError::Scheduler(format!(
                "mode full covers {mode} for {tenant_id}; stop full instead"
            )));
        }
        if mode == Mode::Full {
            for m in desired {
                self.store.clear_desired_mode(tenant_id, m)?;
            }
        } else {
            self.store.clear_desired_mode(tenant_id, mode)?;
        }

        let mut joins = Vec::new();
        for phase in mode.phases() {
            if let Some(handle) = self.registry.take(tenant_id, phase) {
                let _ = handle.stop.send(true);
                joins.push(handle.join);
            }
        }
        if joins.is_empty() {
            return Ok(StopOutcome::NotRunning);
        }
        for join in joins {
            let _ = join.await;
        }
        tracing::info!("⏹️ Stopped {mode} for {tenant_id}");
        Ok(StopOutcome::Stopped)
    }

    /// Running loops, today's counters, and pipeline depth for a tenant.
    pub fn status(&self, tenant_id: &str) -> Result<EngineStatus> {
        let tenant = self.require_tenant(tenant_id)?;
        let now = Utc::now();
        Ok(EngineStatus {
            running: RunningPhases {
                collect: self.registry.lookup(tenant_id, Phase::Collect),
                generate: self.registry.lookup(tenant_id, Phase::Generate),
                post: self.registry.lookup(tenant_id, Phase::Post),
            },
            today: self.stats.today(&tenant, now)?,
            pending_draft: self.store.count_tasks_in_state(tenant_id, TaskState::Draft)?,
            pending_approved: self.store.count_tasks_in_state(tenant_id, TaskState::Approved)?,
            dispatched: self.store.count_tasks_in_state(tenant_id, TaskState::Dispatched)?,
            failed_today: self
                .store
                .count_failed_since(tenant_id, local_day_start_utc(&tenant, now))?,
        })
    }

    /// Manually run a single phase step, bypassing the interval wait and the
    /// working-hour gate (the operator said "run now").
    pub async fn run_once(&self, tenant_id: &str, phase: Phase) -> Result<StepReport> {
        let tenant = self.require_tenant(tenant_id)?;
        let (tx, mut rx) = watch::channel(false);
        let report = self.runner.run_step(&tenant, phase, &mut rx).await;
        drop(tx);
        report
    }

    /// Restart the loops recorded as desired in the store. Called once on
    /// process startup so a crash never silently stops automation.
    ///
    /// Tasks left DISPATCHED by an interrupted publish are re-queued first:
    /// their outcome is unknown, so they go back to APPROVED for a retry
    /// instead of sitting in limbo.
    pub async fn recover(self: &Arc<Self>) -> Result<u32> {
        let requeued = self.store.requeue_dispatched_tasks(Utc::now())?;
        if requeued > 0 {
            tracing::info!("🔁 Re-queued {requeued} task(s) interrupted mid-publish");
        }
        let mut restored = 0;
        for (tenant_id, mode) in self.store.desired_modes()? {
            match self.start(&tenant_id, mode).await {
                Ok(StartOutcome::Started) => {
                    tracing::info!("🔁 Restored {mode} loops for {tenant_id}");
                    restored += 1;
                }
                Ok(StartOutcome::AlreadyRunning) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Could not restore {mode} for {tenant_id}: {e}");
                }
            }
        }
        Ok(restored)
    }

    /// Drop registry entries for loops that have already exited.
    pub fn evict_idle(&self) -> usize {
        self.registry.evict_idle()
    }

    /// Align running loops with the persisted desired-mode flags: start what
    /// should run, stop what no longer should. The host process calls this
    /// periodically so `start`/`stop` issued by other processes take effect.
    pub async fn reconcile(self: &Arc<Self>) -> Result<()> {
        let desired = self.store.desired_modes()?;
        let mut desired_phases: std::collections::HashSet<(String, Phase)> =
            std::collections::HashSet::new();
        for (tenant_id, mode) in &desired {
            for phase in mode.phases() {
                desired_phases.insert((tenant_id.clone(), phase));
            }
        }

        for (tenant_id, mode) in desired {
            if let Err(e) = self.start(&tenant_id, mode).await {
                tracing::warn!("⚠️ Could not start {mode} for {tenant_id}: {e}");
            }
        }

        for (tenant_id, phase) in self.registry.keys() {
            if desired_phases.contains(&(tenant_id.clone(), phase)) {
                continue;
            }
            if let Some(handle) = self.registry.take(&tenant_id, phase) {
                let _ = handle.stop.send(true);
                let _ = handle.join.await;
                tracing::info!("⏹️ Stopped {phase} loop for {tenant_id} (no longer desired)");
            }
        }
        self.registry.evict_idle();
        Ok(())
    }

    /// Stop every loop without touching the desired-mode flags, so a later
    /// start of the process recovers them. Used on process shutdown.
    pub async fn shutdown(&self) {
        let handles = self.registry.drain();
        if handles.is_empty() {
            return;
        }
        tracing::info!("🧹 Shutting down {} loop(s)", handles.len());
        let mut joins = Vec::new();
        for handle in handles {
            let _ = handle.stop.send(true);
            joins.push(handle.join);
        }
        for join in joins {
            let _ = join.await;
        }
    }

    fn require_tenant(&self, tenant_id: &str) -> Result<Tenant> {
        self.store
            .get_tenant(tenant_id)?
            .ok_or_else(|| OutPostError::NotFound(format!("tenant {tenant_id}")))
    }

    async fn phase_loop(self: Arc<Self>, tenant_id: String, phase: Phase, mut stop: watch::Receiver<bool>) {
        tracing::info!("⏰ {phase} loop started for {tenant_id}");
        let automation = &self.config.automation;
        let ticker = Ticker::from_secs(automation.interval_secs(phase), automation.jitter_pct);
        let backoff = Duration::from_secs(automation.error_backoff_secs);
        let recheck = Duration::from_secs(automation.offhours_recheck_secs);

        loop {
            if *stop.borrow() {
                break;
            }
            let tenant = match self.store.get_tenant(&tenant_id) {
                Ok(Some(t)) => t,
                Ok(None) => {
                    tracing::warn!("⚠️ Tenant {tenant_id} vanished; {phase} loop exits");
                    break;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Tenant load failed for {tenant_id}: {e}; backing off");
                    if !sleep_unless_stopped(backoff, &mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            if !tenant.enabled || !is_working_hours(&tenant, Utc::now()) {
                if !sleep_unless_stopped(recheck, &mut stop).await {
                    break;
                }
                continue;
            }

            match self.runner.run_step(&tenant, phase, &mut stop).await {
                Ok(report) => {
                    if phase == Phase::Post && report.published > 0 {
                        let min = automation.post_success_pause_min_secs;
                        let max = automation.post_success_pause_max_secs.max(min);
                        let pause = rand::thread_rng().gen_range(min..=max);
                        tracing::debug!("😴 Post-success pause {pause}s for {tenant_id}");
                        if !sleep_unless_stopped(Duration::from_secs(pause), &mut stop).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("⚠️ {phase} step failed for {tenant_id}: {e}; backing off");
                    if !sleep_unless_stopped(backoff, &mut stop).await {
                        break;
                    }
                    continue;
                }
            }

            if !ticker.wait(&mut stop).await {
                break;
            }
        }
        tracing::info!("🛑 {phase} loop exited for {tenant_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use outpost_core::types::{
        Account, AccountStatus, ActionCounts, ActionKind, GeneratedContent, PublishResult,
        RawCandidate, Surface, TargetSite, TaskItem,
    };

    struct StaticCollector;

    #[async_trait]
    impl Collector for StaticCollector {
        async fn collect(&self, keyword: &str, _max: usize) -> Result<Vec<RawCandidate>> {
            Ok(vec![
                RawCandidate {
                    surface: Surface::Board,
                    external_ref: format!("{keyword}-1"),
                    title: "First".into(),
                    snippet: String::new(),
                    keyword: keyword.to_string(),
                },
                RawCandidate {
                    surface: Surface::Board,
                    external_ref: format!("{keyword}-2"),
                    title: "Second".into(),
                    snippet: String::new(),
                    keyword: keyword.to_string(),
                },
            ])
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, candidate: &RawCandidate, tone: &str) -> Result<GeneratedContent> {
            Ok(GeneratedContent {
                body: format!("re: {}", candidate.title),
                tone: tone.to_string(),
            })
        }
    }

    struct SlowPublisher {
        delay: Duration,
    }

    #[async_trait]
    impl Publisher for SlowPublisher {
        async fn publish(
            &self,
            _task: &TaskItem,
            _account: &Account,
            _target: &TargetSite,
        ) -> PublishResult {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            PublishResult::ok()
        }
    }

    fn test_config() -> OutPostConfig {
        let mut config = OutPostConfig::default();
        config.automation.post_interval_secs = 3600;
        config.automation.collect_interval_secs = 3600;
        config.automation.generate_interval_secs = 3600;
        config.automation.item_delay_min_secs = 0;
        config.automation.item_delay_max_secs = 0;
        config.automation.post_success_pause_min_secs = 0;
        config.automation.post_success_pause_max_secs = 0;
        config.limits.account_min_interval_secs = 0;
        config.limits.batch_min_interval_secs = 0;
        config
    }

    fn always_on_tenant() -> Tenant {
        let mut tenant = Tenant::new("t1", "Acme");
        tenant.work_start_hour = 0;
        tenant.work_end_hour = 24;
        tenant.workdays = (0..7).collect();
        tenant
    }

    fn engine_with(publish_delay: Duration) -> (Arc<StateDb>, Arc<AutomationEngine>) {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        store.upsert_tenant(&always_on_tenant()).unwrap();
        let engine = AutomationEngine::new(
            store.clone(),
            test_config(),
            Arc::new(StaticCollector),
            Arc::new(EchoGenerator),
            Arc::new(SlowPublisher { delay: publish_delay }),
        );
        (store, engine)
    }

    fn seed_active_account(store: &StateDb) {
        let mut a = Account::new("t1", Surface::Board, "worker", ActionCounts::uniform(20));
        a.status = AccountStatus::Active;
        store.save_account(&a).unwrap();
    }

    #[tokio::test]
    async fn test_start_is_idempotent_per_mode() {
        let (_store, engine) = engine_with(Duration::ZERO);
        assert_eq!(engine.start("t1", Mode::Post).await.unwrap(), StartOutcome::Started);
        assert_eq!(
            engine.start("t1", Mode::Post).await.unwrap(),
            StartOutcome::AlreadyRunning
        );

        let status = engine.status("t1").unwrap();
        assert!(status.running.post);
        assert!(!status.running.collect);

        assert_eq!(engine.stop("t1", Mode::Post).await.unwrap(), StopOutcome::Stopped);
        assert_eq!(engine.stop("t1", Mode::Post).await.unwrap(), StopOutcome::NotRunning);
        assert!(!engine.status("t1").unwrap().running.any());
    }

    #[tokio::test]
    async fn test_start_unknown_tenant_errors() {
        let (_store, engine) = engine_with(Duration::ZERO);
        assert!(engine.start("ghost", Mode::Post).await.is_err());
    }

    #[tokio::test]
    async fn test_full_mode_runs_three_loops() {
        let (store, engine) = engine_with(Duration::ZERO);
        assert_eq!(engine.start("t1", Mode::Full).await.unwrap(), StartOutcome::Started);
        let status = engine.status("t1").unwrap();
        assert!(status.running.collect && status.running.generate && status.running.post);

        // A single-phase start now reports the overlap.
        assert_eq!(
            engine.start("t1", Mode::Post).await.unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(store.desired_modes().unwrap().len(), 1);

        engine.stop("t1", Mode::Full).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_once_pipeline_end_to_end() {
        let (store, engine) = engine_with(Duration::ZERO);
        seed_active_account(&store);

        let collected = engine.run_once("t1", Phase::Collect).await.unwrap();
        assert_eq!(collected.processed, 2);

        let generated = engine.run_once("t1", Phase::Generate).await.unwrap();
        assert_eq!(generated.processed, 2);

        let posted = engine.run_once("t1", Phase::Post).await.unwrap();
        assert_eq!(posted.published, 2);

        let status = engine.status("t1").unwrap();
        assert_eq!(status.today.collected, 2);
        assert_eq!(status.today.generated, 2);
        assert_eq!(status.today.published, 2);
        assert_eq!(status.pending_approved, 0);
        assert_eq!(status.failed_today, 0);
    }

    #[tokio::test]
    async fn test_stop_waits_for_inflight_publish() {
        let (store, engine) = engine_with(Duration::from_millis(400));
        seed_active_account(&store);
        let target = TargetSite::new("t1", Surface::Board, "rustaceans");
        store.save_target(&target).unwrap();
        let mut task = TaskItem::draft("t1", &target.id, ActionKind::Comment, "hi");
        task.state = TaskState::Approved;
        store.save_task(&task).unwrap();

        engine.start("t1", Mode::Post).await.unwrap();
        // Let the loop pick up the task and enter the publish call.
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop("t1", Mode::Post).await.unwrap();

        // The in-flight publish completed and was recorded before exit.
        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Published);

        // And the slot is free again.
        assert_eq!(engine.start("t1", Mode::Post).await.unwrap(), StartOutcome::Started);
        engine.stop("t1", Mode::Post).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_follows_desired_flags() {
        let (store, engine) = engine_with(Duration::ZERO);
        store.set_desired_mode("t1", Mode::Post).unwrap();

        engine.reconcile().await.unwrap();
        assert!(engine.status("t1").unwrap().running.post);

        // Flag cleared elsewhere (e.g. a `stop` from another process).
        store.clear_desired_mode("t1", Mode::Post).unwrap();
        engine.reconcile().await.unwrap();
        assert!(!engine.status("t1").unwrap().running.any());
    }

    #[tokio::test]
    async fn test_shutdown_preserves_desired_flags() {
        let (store, engine) = engine_with(Duration::ZERO);
        engine.start("t1", Mode::Full).await.unwrap();

        engine.shutdown().await;
        assert!(!engine.status("t1").unwrap().running.any());
        // Flags survive so the next process restores the loops.
        assert_eq!(store.desired_modes().unwrap(), vec![("t1".to_string(), Mode::Full)]);
    }

    #[tokio::test]
    async fn test_stop_submode_while_full_is_rejected() {
        let (store, engine) = engine_with(Duration::ZERO);
        engine.start("t1", Mode::Full).await.unwrap();

        assert!(engine.stop("t1", Mode::Post).await.is_err());
        // The loop is still live and the flag untouched, so status and
        // reconciliation agree.
        assert!(engine.status("t1").unwrap().running.post);
        assert_eq!(store.desired_modes().unwrap(), vec![("t1".to_string(), Mode::Full)]);

        assert_eq!(engine.stop("t1", Mode::Full).await.unwrap(), StopOutcome::Stopped);
        assert!(store.desired_modes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_full_clears_submode_flags() {
        let (store, engine) = engine_with(Duration::ZERO);
        engine.start("t1", Mode::Post).await.unwrap();
        engine.start("t1", Mode::Collect).await.unwrap();

        assert_eq!(engine.stop("t1", Mode::Full).await.unwrap(), StopOutcome::Stopped);
        assert!(store.desired_modes().unwrap().is_empty());
        assert!(!engine.status("t1").unwrap().running.any());
    }

    #[tokio::test]
    async fn test_start_full_subsumes_submode_flags() {
        let (store, engine) = engine_with(Duration::ZERO);
        engine.start("t1", Mode::Post).await.unwrap();
        engine.start("t1", Mode::Full).await.unwrap();

        assert_eq!(store.desired_modes().unwrap(), vec![("t1".to_string(), Mode::Full)]);
        engine.stop("t1", Mode::Full).await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_requeues_interrupted_tasks() {
        let (store, engine) = engine_with(Duration::ZERO);
        let target = TargetSite::new("t1", Surface::Board, "rustaceans");
        store.save_target(&target).unwrap();
        let mut task = TaskItem::draft("t1", &target.id, ActionKind::Comment, "hi");
        task.state = TaskState::Dispatched;
        store.save_task(&task).unwrap();

        engine.recover().await.unwrap();

        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Approved);
        assert!(task.last_error.unwrap().contains("interrupted"));
    }

    #[tokio::test]
    async fn test_recover_restores_desired_modes() {
        let (store, engine) = engine_with(Duration::ZERO);
        store.set_desired_mode("t1", Mode::Post).unwrap();

        assert_eq!(engine.recover().await.unwrap(), 1);
        assert!(engine.status("t1").unwrap().running.post);

        // Recovery is idempotent.
        assert_eq!(engine.recover().await.unwrap(), 0);
        engine.stop("t1", Mode::Post).await.unwrap();
    }
}
