//! Dispatch / Rotation Selector: pairs ready tasks with eligible accounts.
//!
//! Pops the oldest APPROVED tasks (bounded batch), asks the pool for an
//! account, publishes through the injected capability, hands the result to
//! the outcome classifier, and records stats. When no account qualifies the
//! batch stops early and tasks stay APPROVED; "retry later" is a normal
//! outcome here, never an error. Items are spaced by a randomized delay so
//! publishes never land in synchronized bursts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;

use outpost_accounts::{local_day_start_utc, AccountPool, RateLimiter, Window};
use outpost_classify::{classify, Outcome, OutcomeClassifier};
use outpost_core::config::AutomationConfig;
use outpost_core::error::Result;
use outpost_core::traits::Publisher;
use outpost_core::types::{PublishResult, Surface, TargetStatus, TaskState, Tenant};
use outpost_store::{StatField, StateDb};

use crate::stats::StatsAggregator;
use crate::ticker::sleep_unless_stopped;

/// What one post batch accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchReport {
    pub published: u32,
    pub failed: u32,
    /// Transient failures put back in the APPROVED queue.
    pub requeued: u32,
    /// The batch ended before exhausting its tasks (no account, cap hit,
    /// rate-limited upstream, or stop requested).
    pub stopped_early: bool,
}

pub struct Dispatcher {
    store: Arc<StateDb>,
    pool: Arc<AccountPool>,
    limiter: Arc<RateLimiter>,
    classifier: OutcomeClassifier,
    stats: Arc<StatsAggregator>,
    publisher: Arc<dyn Publisher>,
    automation: AutomationConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<StateDb>,
        pool: Arc<AccountPool>,
        limiter: Arc<RateLimiter>,
        classifier: OutcomeClassifier,
        stats: Arc<StatsAggregator>,
        publisher: Arc<dyn Publisher>,
        automation: AutomationConfig,
    ) -> Self {
        Self { store, pool, limiter, classifier, stats, publisher, automation }
    }

    /// Run one bounded post batch for a tenant.
    pub async fn dispatch_batch(
        &self,
        tenant: &Tenant,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        if !self.limiter.batch_gate_open(tenant, Utc::now())? {
            tracing::debug!("⏳ Batch gate closed for {}; deferring", tenant.id);
            report.stopped_early = true;
            return Ok(report);
        }

        let tasks = self.store.approved_tasks(&tenant.id, self.automation.batch_size)?;
        let total = tasks.len();

        for (i, mut task) in tasks.into_iter().enumerate() {
            if *stop.borrow() {
                report.stopped_early = true;
                break;
            }
            let now = Utc::now();

            let daily = self.limiter.check(tenant, Window::Daily, now)?;
            let hourly = self.limiter.check(tenant, Window::Hourly, now)?;
            if !daily.can_proceed || !hourly.can_proceed {
                tracing::info!(
                    "⏸️ Tenant {} at cap (daily {}/{}, hourly {}/{}); batch stops",
                    tenant.id,
                    daily.used,
                    daily.limit,
                    hourly.used,
                    hourly.limit
                );
                report.stopped_early = true;
                break;
            }

            let Some(target) = self.store.get_target(&task.target_id)? else {
                task.state = TaskState::Failed;
                task.last_error = Some("target no longer exists".into());
                task.updated_at = now;
                self.store.save_task(&task)?;
                report.failed += 1;
                continue;
            };
            if target.status != TargetStatus::Active || !target.allows(task.action) {
                task.state = TaskState::Failed;
                task.last_error = Some(format!("target {} not publishable", target.id));
                task.updated_at = now;
                self.store.save_task(&task)?;
                report.failed += 1;
                continue;
            }

            if let Some(cap) = target.daily_limit {
                let published_today = self
                    .store
                    .count_published_for_target_since(&target.id, local_day_start_utc(tenant, now))?;
                if published_today >= cap {
                    // Cap resets at tenant-local midnight; the task waits.
                    tracing::debug!(
                        "🎯 Target {} at daily cap ({published_today}/{cap}); task waits",
                        target.id
                    );
                    continue;
                }
            }

            let Some(account) =
                self.pool.select_account(tenant, target.surface, task.action, now)?
            else {
                // Task stays APPROVED; a later tick will retry.
                tracing::debug!("💤 No eligible account for {}; batch stops", tenant.id);
                report.stopped_early = true;
                break;
            };

            task.state = TaskState::Dispatched;
            task.updated_at = now;
            self.store.save_task(&task)?;

            let timeout = Duration::from_secs(self.automation.capability_timeout_secs);
            let result = match tokio::time::timeout(
                timeout,
                self.publisher.publish(&task, &account, &target),
            )
            .await
            {
                Ok(r) => r,
                // Classified as a network error downstream, never a bounce.
                Err(_) => PublishResult::failed("capability timeout"),
            };

            let now = Utc::now();
            if result.success {
                self.pool.record_activity(&account.id, task.action, true, now)?;
                task.state = TaskState::Published;
                task.published_at = Some(now);
                task.updated_at = now;
                task.last_error = None;
                self.store.save_task(&task)?;

                let mut target = target;
                target.published_total += 1;
                self.store.save_target(&target)?;
                self.stats.record(tenant, target.surface, StatField::Published, 1, now)?;
                report.published += 1;
                tracing::info!(
                    "📤 Published task {} via {} on {}",
                    task.id,
                    account.identity,
                    target.surface
                );
            } else {
                self.pool.record_activity(&account.id, task.action, false, now)?;
                let raw = result.raw_error.unwrap_or_default();
                let (outcome, _) = classify(&raw);
                let channel_id = self.primary_channel(&target.id, target.surface)?;
                self.classifier.apply(outcome, &account.id, channel_id.as_deref(), now)?;
                tracing::info!(
                    "📥 Publish failed for task {} ({outcome}): {raw}",
                    task.id
                );

                match outcome {
                    Outcome::RateLimited | Outcome::NetworkError => {
                        task.state = TaskState::Approved;
                        task.last_error = Some(raw);
                        task.updated_at = now;
                        self.store.save_task(&task)?;
                        report.requeued += 1;
                        if outcome == Outcome::RateLimited {
                            // Upstream throttling hits the whole batch.
                            report.stopped_early = true;
                            break;
                        }
                    }
                    _ => {
                        task.state = TaskState::Failed;
                        task.last_error = Some(raw);
                        task.updated_at = now;
                        self.store.save_task(&task)?;
                        self.stats.record(tenant, target.surface, StatField::Bounced, 1, now)?;
                        report.failed += 1;
                    }
                }
            }

            if i + 1 < total && self.automation.item_delay_max_secs > 0 {
                let min = self.automation.item_delay_min_secs;
                let max = self.automation.item_delay_max_secs.max(min);
                let delay = rand::thread_rng().gen_range(min..=max);
                if !sleep_unless_stopped(Duration::from_secs(delay), stop).await {
                    report.stopped_early = true;
                    break;
                }
            }
        }
        Ok(report)
    }

    /// The channel a failed email send is attributed to: the primary channel
    /// if any, else the first still-verified one.
    fn primary_channel(&self, target_id: &str, surface: Surface) -> Result<Option<String>> {
        if surface != Surface::Email {
            return Ok(None);
        }
        let channels = self.store.channels_for_target(target_id)?;
        Ok(channels
            .iter()
            .find(|c| c.is_primary)
            .or_else(|| channels.iter().find(|c| c.is_verified))
            .map(|c| c.id.clone()))
    }
}
