//! Tenant-wide rate windows: daily and rolling-hour caps independent of
//! which account acts, plus the campaign batch gate. Windows are computed by
//! counting logged successes rather than from persisted counters, so they
//! stay correct across process restarts.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

use outpost_core::config::LimitsConfig;
use outpost_core::error::Result;
use outpost_core::types::Tenant;
use outpost_store::StateDb;

/// Which trailing window to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Tenant-local calendar day.
    Daily,
    /// Rolling 60 minutes.
    Hourly,
}

/// Result of a window check.
#[derive(Debug, Clone, Copy)]
pub struct WindowCheck {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub can_proceed: bool,
}

/// The tenant's current local date.
pub fn local_today(tenant: &Tenant, now: DateTime<Utc>) -> NaiveDate {
    let offset = FixedOffset::east_opt(tenant.tz_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    now.with_timezone(&offset).date_naive()
}

/// Start of the tenant's current local day, in UTC.
pub fn local_day_start_utc(tenant: &Tenant, now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = FixedOffset::east_opt(tenant.tz_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    let local = now.with_timezone(&offset);
    let midnight = local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_local_timezone(offset);
    midnight
        .single()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Tenant-wide limit checks, shared by the scheduler and the pool manager.
pub struct RateLimiter {
    store: Arc<StateDb>,
    limits: LimitsConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<StateDb>, limits: LimitsConfig) -> Self {
        Self { store, limits }
    }

    /// Check a trailing window for a tenant.
    pub fn check(&self, tenant: &Tenant, window: Window, now: DateTime<Utc>) -> Result<WindowCheck> {
        let (limit, since) = match window {
            Window::Daily => (self.limits.tenant_daily_cap, local_day_start_utc(tenant, now)),
            Window::Hourly => (tenant.hourly_action_cap, now - Duration::minutes(60)),
        };
        let used = self.store.count_success_since(&tenant.id, since)?;
        let remaining = limit.saturating_sub(used);
        Ok(WindowCheck {
            limit,
            used,
            remaining,
            can_proceed: used < limit,
        })
    }

    /// Campaign batch gate: enough time elapsed since the tenant's last
    /// successful send? Throttles batches against upstream abuse detection.
    pub fn batch_gate_open(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<bool> {
        let min_secs = if tenant.batch_min_interval_secs > 0 {
            tenant.batch_min_interval_secs
        } else {
            self.limits.batch_min_interval_secs
        };
        match self.store.last_success_at(&tenant.id)? {
            Some(last) => Ok((now - last).num_seconds() >= i64::from(min_secs)),
            None => Ok(true),
        }
    }
}
