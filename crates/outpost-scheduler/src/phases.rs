//! Phase job steps. One step is one bounded unit of work; the engine's loops
//! call these between pacing sleeps, and `run_once` calls them directly.
//!
//! Error posture per phase: a collector failure means "zero results, try
//! later"; a generator failure means "skip this candidate, don't count it";
//! publish failures are resolved by the dispatch selector and classifier.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use outpost_accounts::AccountPool;
use outpost_core::config::AutomationConfig;
use outpost_core::error::Result;
use outpost_core::traits::{Collector, Generator};
use outpost_core::types::{ActionKind, ContactChannel, Phase, Surface, TargetSite, TaskItem, TaskState, Tenant};
use outpost_store::{StatField, StateDb};

use crate::selector::Dispatcher;
use crate::stats::StatsAggregator;

/// What one job step accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepReport {
    /// Items handled this step (candidates saved, tasks generated, or
    /// publish attempts resolved).
    pub processed: u32,
    /// Successful publishes (post phase only; drives the post-success pause).
    pub published: u32,
    /// The step did nothing because a gate held it (daily cap reached).
    pub skipped: bool,
}

/// The action kind content on a surface defaults to.
fn default_action(surface: Surface) -> ActionKind {
    match surface {
        Surface::Board => ActionKind::Comment,
        Surface::Qna => ActionKind::Answer,
        Surface::Email => ActionKind::Post,
    }
}

/// Executes single phase steps against the store and capabilities.
pub struct PhaseRunner {
    store: Arc<StateDb>,
    pool: Arc<AccountPool>,
    stats: Arc<StatsAggregator>,
    dispatcher: Dispatcher,
    collector: Arc<dyn Collector>,
    generator: Arc<dyn Generator>,
    automation: AutomationConfig,
}

impl PhaseRunner {
    pub fn new(
        store: Arc<StateDb>,
        pool: Arc<AccountPool>,
        stats: Arc<StatsAggregator>,
        dispatcher: Dispatcher,
        collector: Arc<dyn Collector>,
        generator: Arc<dyn Generator>,
        automation: AutomationConfig,
    ) -> Self {
        Self { store, pool, stats, dispatcher, collector, generator, automation }
    }

    /// Run one job step for a phase: daily rollover, cap gate, then the
    /// phase's bounded batch of work.
    pub async fn run_step(
        &self,
        tenant: &Tenant,
        phase: Phase,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<StepReport> {
        let now = Utc::now();
        self.pool.rollover(tenant, now)?;

        let cap = match phase {
            Phase::Collect => tenant.daily_collect_cap,
            Phase::Generate => tenant.daily_generate_cap,
            Phase::Post => tenant.daily_post_cap,
        };
        let done_today = self.stats.today(tenant, now)?.for_phase(phase);
        if done_today >= cap {
            tracing::debug!("🧯 {} cap reached for {} ({done_today}/{cap})", phase, tenant.id);
            return Ok(StepReport { skipped: true, ..Default::default() });
        }
        let remaining = (cap - done_today) as usize;

        match phase {
            Phase::Collect => self.collect_step(tenant, remaining).await,
            Phase::Generate => self.generate_step(tenant, remaining).await,
            Phase::Post => {
                let report = self.dispatcher.dispatch_batch(tenant, stop).await?;
                Ok(StepReport {
                    processed: report.published + report.failed + report.requeued,
                    published: report.published,
                    skipped: false,
                })
            }
        }
    }

    /// Collect candidates for the tenant's keywords. Keywords are seeded
    /// from active target names, falling back to the tenant name when the
    /// tenant has no targets yet.
    async fn collect_step(&self, tenant: &Tenant, remaining: usize) -> Result<StepReport> {
        let mut seeds: Vec<(Surface, String)> = Vec::new();
        for surface in [Surface::Board, Surface::Qna, Surface::Email] {
            for target in self.store.active_targets(&tenant.id, surface)? {
                seeds.push((surface, target.name));
            }
        }
        if seeds.is_empty() {
            seeds.push((Surface::Board, tenant.name.clone()));
        }
        seeds.truncate(self.automation.batch_size);

        let mut report = StepReport::default();
        for (surface, keyword) in seeds {
            if (report.processed as usize) >= remaining {
                break;
            }
            let found = match self.collector.collect(&keyword, self.automation.batch_size).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::debug!("🔍 Collector failed for '{keyword}' on {surface}: {e}");
                    continue;
                }
            };
            for candidate in found {
                if (report.processed as usize) >= remaining {
                    break;
                }
                if self.store.save_candidate(&tenant.id, &candidate)? {
                    self.stats.record(tenant, candidate.surface, StatField::Collected, 1, Utc::now())?;
                    report.processed += 1;
                }
            }
        }
        if report.processed > 0 {
            tracing::info!("🔍 Collected {} candidate(s) for {}", report.processed, tenant.id);
        }
        Ok(report)
    }

    /// Turn unconsumed candidates into approved tasks. Approval itself is an
    /// external scoring concern; generated items enter the queue directly.
    async fn generate_step(&self, tenant: &Tenant, remaining: usize) -> Result<StepReport> {
        let batch = self.automation.batch_size.min(remaining);
        let candidates = self.store.unconsumed_candidates(&tenant.id, batch)?;
        if candidates.is_empty() {
            return Ok(StepReport::default());
        }

        let mut report = StepReport::default();
        for (candidate_id, candidate) in candidates {
            let content = match self.generator.generate(&candidate, "professional").await {
                Ok(c) => c,
                Err(e) => {
                    // Skipped, not consumed, not counted against the quota.
                    tracing::debug!("✍️ Generator skipped '{}': {e}", candidate.title);
                    continue;
                }
            };

            let target = TargetSite::new(&tenant.id, candidate.surface, &candidate.title);
            self.store.save_target(&target)?;
            if candidate.surface == Surface::Email {
                let channel =
                    ContactChannel::new(&tenant.id, &target.id, &candidate.external_ref, true);
                self.store.save_channel(&channel)?;
            }

            let mut task = TaskItem::draft(
                &tenant.id,
                &target.id,
                default_action(candidate.surface),
                &content.body,
            );
            task.state = TaskState::Approved;
            self.store.save_task(&task)?;
            self.store.mark_candidate_consumed(&candidate_id)?;
            self.stats.record(tenant, candidate.surface, StatField::Generated, 1, Utc::now())?;
            report.processed += 1;
        }
        if report.processed > 0 {
            tracing::info!("✍️ Generated {} task(s) for {}", report.processed, tenant.id);
        }
        Ok(report)
    }
}
