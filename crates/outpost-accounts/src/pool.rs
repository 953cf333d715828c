//! Account Pool Manager: account lifecycle, quota bookkeeping, and
//! priority-weighted rotation selection.
//!
//! Selection is optimistic: several phase loops may pick the same account
//! concurrently, and `record_activity` re-checks the effective limit at
//! increment time. A stale read costs at most one extra action per tick,
//! an accepted bounded violation given the generous daily caps.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use outpost_core::config::LimitsConfig;
use outpost_core::error::{OutPostError, Result};
use outpost_core::types::{Account, AccountStatus, ActionCounts, ActionKind, Surface, Tenant};
use outpost_store::StateDb;

use crate::quota::local_today;
use crate::warmup::{effective_limit, RAMP_DAYS};

/// Owns account state for all tenants and answers
/// "which account may act now for this surface and action kind?"
pub struct AccountPool {
    store: Arc<StateDb>,
    limits: LimitsConfig,
}

impl AccountPool {
    pub fn new(store: Arc<StateDb>, limits: LimitsConfig) -> Self {
        Self { store, limits }
    }

    /// Create a fresh account in `New` state.
    pub fn create_account(
        &self,
        tenant_id: &str,
        surface: Surface,
        identity: &str,
        daily_limit: ActionCounts,
    ) -> Result<Account> {
        let account = Account::new(tenant_id, surface, identity, daily_limit);
        self.store.save_account(&account)?;
        tracing::info!("👤 Account created: {} ({} on {})", account.id, identity, surface);
        Ok(account)
    }

    /// Move a `New` or `Resting` account into the warm-up ramp.
    /// A resumed account always restarts from day 0; the surface has
    /// forgotten it, so the ramp starts over.
    pub fn start_warmup(&self, account_id: &str, tenant: &Tenant, now: DateTime<Utc>) -> Result<Account> {
        let mut account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| OutPostError::NotFound(format!("account {account_id}")))?;
        match account.status {
            AccountStatus::New | AccountStatus::Resting => {
                account.status = AccountStatus::Warming;
                account.warmup_day = 0;
                account.last_reset_on = Some(local_today(tenant, now));
                self.store.save_account(&account)?;
                tracing::info!("🔥 Warm-up started: {} (day 0)", account.id);
                Ok(account)
            }
            other => Err(OutPostError::Scheduler(format!(
                "cannot start warm-up from status '{other}'"
            ))),
        }
    }

    /// Park an account without deleting history.
    pub fn rest(&self, account_id: &str) -> Result<()> {
        let mut account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| OutPostError::NotFound(format!("account {account_id}")))?;
        account.status = AccountStatus::Resting;
        self.store.save_account(&account)?;
        Ok(())
    }

    /// Effective daily limit for an account and action kind.
    pub fn effective_limit(&self, account: &Account, kind: ActionKind) -> u32 {
        effective_limit(account.status, account.warmup_day, account.daily_limit.get(kind))
    }

    /// Daily rollover for a tenant's accounts: reset today counters once per
    /// tenant-local calendar day, advance the warm-up ramp by the elapsed
    /// days, and auto-promote completed ramps. Returns how many accounts
    /// rolled over.
    pub fn rollover(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<u32> {
        let today = local_today(tenant, now);
        let mut rolled = 0;
        for mut account in self.store.accounts_for_tenant(&tenant.id)? {
            let advance = match account.last_reset_on {
                Some(last) if last >= today => continue,
                Some(last) => (today - last).num_days().max(0) as u32,
                None => 1,
            };
            account.today = ActionCounts::default();
            account.last_reset_on = Some(today);
            if account.status == AccountStatus::Warming {
                account.warmup_day += advance;
                if account.warmup_day >= RAMP_DAYS {
                    account.status = AccountStatus::Active;
                    tracing::info!("✅ Warm-up complete: {} promoted to active", account.id);
                }
            }
            self.store.save_account(&account)?;
            rolled += 1;
        }
        if rolled > 0 {
            tracing::debug!("🌅 Rollover for {}: {} account(s) reset", tenant.id, rolled);
        }
        Ok(rolled)
    }

    /// Pick an account that may act now, or `None`, which callers must
    /// treat as "retry later", never as an error.
    ///
    /// Eligible set: warming or active, under today's effective limit, and
    /// past the per-account minimum interval. The pick is priority-weighted
    /// random rather than max-priority so load spreads across the pool and
    /// no single account is exhausted first.
    pub fn select_account(
        &self,
        tenant: &Tenant,
        surface: Surface,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let min_interval = Duration::seconds(i64::from(self.limits.account_min_interval_secs));
        let eligible: Vec<Account> = self
            .store
            .accounts_for_surface(&tenant.id, surface)?
            .into_iter()
            .filter(|a| matches!(a.status, AccountStatus::Warming | AccountStatus::Active))
            .filter(|a| a.today.get(kind) < self.effective_limit(a, kind))
            .filter(|a| match a.last_activity_at {
                Some(last) => now - last >= min_interval,
                None => true,
            })
            .collect();

        if eligible.is_empty() {
            tracing::debug!("🚫 No eligible account for {} / {} / {}", tenant.id, surface, kind);
            return Ok(None);
        }

        let total: u64 = eligible.iter().map(|a| u64::from(a.priority_weight.max(1))).sum();
        let mut pick = rand::thread_rng().gen_range(0..total);
        for account in &eligible {
            let w = u64::from(account.priority_weight.max(1));
            if pick < w {
                return Ok(Some(account.clone()));
            }
            pick -= w;
        }
        Ok(eligible.into_iter().last())
    }

    /// Record an attempted action. Success increments today/total counters
    /// (re-checking the limit first, the optimistic guard); the activity
    /// timestamp always advances so cool-down applies even to failures.
    /// Failure side effects (invalidation, quarantine) are the outcome
    /// classifier's job, not the pool's.
    pub fn record_activity(
        &self,
        account_id: &str,
        kind: ActionKind,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| OutPostError::NotFound(format!("account {account_id}")))?;

        account.last_activity_at = Some(now);
        if success {
            let limit = self.effective_limit(&account, kind);
            if account.today.get(kind) < limit {
                account.today.add(kind, 1);
                account.total.add(kind, 1);
            } else {
                tracing::warn!(
                    "⚠️ Quota already reached for {} ({kind}); counting skipped",
                    account.id
                );
            }
        }
        self.store.save_account(&account)?;
        self.store
            .log_activity(&account.tenant_id, &account.id, kind, success, now)?;
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<StateDb>, Tenant, AccountPool) {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        let tenant = Tenant::new("t1", "Acme");
        store.upsert_tenant(&tenant).unwrap();
        let pool = AccountPool::new(store.clone(), LimitsConfig::default());
        (store, tenant, pool)
    }

    fn active_account(pool: &AccountPool, tenant: &Tenant, identity: &str, nominal: u32) -> Account {
        let mut a = pool
            .create_account(&tenant.id, Surface::Board, identity, ActionCounts::uniform(nominal))
            .unwrap();
        a.status = AccountStatus::Active;
        pool.store.save_account(&a).unwrap();
        a
    }

    #[test]
    fn test_warmup_scenario_seven_rollovers() {
        let (_store, tenant, pool) = setup();
        let a = pool
            .create_account(&tenant.id, Surface::Board, "alice", ActionCounts::uniform(20))
            .unwrap();
        let mut now = Utc::now();
        let a = pool.start_warmup(&a.id, &tenant, now).unwrap();
        assert_eq!(a.status, AccountStatus::Warming);
        assert_eq!(pool.effective_limit(&a, ActionKind::Post), 2);

        for _ in 0..7 {
            now += Duration::days(1);
            pool.rollover(&tenant, now).unwrap();
        }
        let a = pool.store.get_account(&a.id).unwrap().unwrap();
        assert_eq!(a.status, AccountStatus::Active);
        assert_eq!(pool.effective_limit(&a, ActionKind::Post), 20);
    }

    #[test]
    fn test_rollover_is_idempotent_within_a_day() {
        let (_store, tenant, pool) = setup();
        let a = pool
            .create_account(&tenant.id, Surface::Board, "alice", ActionCounts::uniform(20))
            .unwrap();
        let now = Utc::now();
        pool.start_warmup(&a.id, &tenant, now).unwrap();

        // Several rollover calls on the same local day advance nothing.
        pool.rollover(&tenant, now).unwrap();
        pool.rollover(&tenant, now).unwrap();
        let a = pool.store.get_account(&a.id).unwrap().unwrap();
        assert_eq!(a.warmup_day, 0);
    }

    #[test]
    fn test_start_warmup_rejected_from_blocked() {
        let (store, tenant, pool) = setup();
        let mut a = pool
            .create_account(&tenant.id, Surface::Board, "alice", ActionCounts::uniform(20))
            .unwrap();
        a.status = AccountStatus::Blocked;
        store.save_account(&a).unwrap();
        assert!(pool.start_warmup(&a.id, &tenant, Utc::now()).is_err());
    }

    #[test]
    fn test_quota_invariant_after_record_activity() {
        let (_store, tenant, pool) = setup();
        let a = active_account(&pool, &tenant, "alice", 3);
        let now = Utc::now();
        // Hammer past the limit; the re-check clamps the counter.
        for i in 0..6 {
            pool.record_activity(&a.id, ActionKind::Post, true, now + Duration::seconds(i))
                .unwrap();
        }
        let a = pool.store.get_account(&a.id).unwrap().unwrap();
        assert!(a.today.post <= pool.effective_limit(&a, ActionKind::Post));
        assert_eq!(a.today.post, 3);
    }

    #[test]
    fn test_zero_limit_soft_disables() {
        let (_store, tenant, pool) = setup();
        active_account(&pool, &tenant, "alice", 0);
        let pick = pool
            .select_account(&tenant, Surface::Board, ActionKind::Post, Utc::now())
            .unwrap();
        assert!(pick.is_none());
    }

    #[test]
    fn test_select_none_when_no_accounts() {
        let (_store, tenant, pool) = setup();
        let pick = pool
            .select_account(&tenant, Surface::Board, ActionKind::Post, Utc::now())
            .unwrap();
        assert!(pick.is_none());
    }

    #[test]
    fn test_min_interval_cooldown_applies_even_on_failure() {
        let (_store, tenant, pool) = setup();
        let a = active_account(&pool, &tenant, "alice", 20);
        let now = Utc::now();
        pool.record_activity(&a.id, ActionKind::Post, false, now).unwrap();

        let soon = pool
            .select_account(&tenant, Surface::Board, ActionKind::Post, now + Duration::seconds(30))
            .unwrap();
        assert!(soon.is_none());

        let later = pool
            .select_account(&tenant, Surface::Board, ActionKind::Post, now + Duration::seconds(121))
            .unwrap();
        assert!(later.is_some());
    }

    #[test]
    fn test_selection_fairness_bound() {
        let (_store, tenant, pool) = setup();
        for name in ["a", "b", "c"] {
            active_account(&pool, &tenant, name, 20);
        }
        let now = Utc::now();
        let mut counts = std::collections::HashMap::new();
        let m = 300;
        for _ in 0..m {
            let picked = pool
                .select_account(&tenant, Surface::Board, ActionKind::Post, now)
                .unwrap()
                .unwrap();
            *counts.entry(picked.identity).or_insert(0u32) += 1;
        }
        // Equal weights: each of the 3 should land near m/3. Statistical,
        // so the bound is loose.
        for (identity, count) in counts {
            assert!(
                (50..=150).contains(&count),
                "unbalanced selection for {identity}: {count}/{m}"
            );
        }
    }

    #[test]
    fn test_weighted_selection_prefers_heavy_account() {
        let (store, tenant, pool) = setup();
        let mut heavy = active_account(&pool, &tenant, "heavy", 20);
        heavy.priority_weight = 9;
        store.save_account(&heavy).unwrap();
        active_account(&pool, &tenant, "light", 20);

        let now = Utc::now();
        let mut heavy_picks = 0;
        for _ in 0..200 {
            let picked = pool
                .select_account(&tenant, Surface::Board, ActionKind::Post, now)
                .unwrap()
                .unwrap();
            if picked.identity == "heavy" {
                heavy_picks += 1;
            }
        }
        // Expect ~90%; anything above 70% shows the weighting works.
        assert!(heavy_picks > 140, "heavy picked only {heavy_picks}/200");
    }
}
