//! Stats Aggregator: rolls activity into daily per-tenant counters.
//! Counters gate the scheduler's daily caps and feed `status()`; rows are
//! created lazily on the first event of a tenant-local day.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use outpost_accounts::local_today;
use outpost_core::error::Result;
use outpost_core::types::{Phase, Surface, Tenant};
use outpost_store::{StatField, StateDb};

/// Today's counters for a tenant, summed across surfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TodayCounters {
    pub collected: u32,
    pub generated: u32,
    pub published: u32,
    pub opened: u32,
    pub replied: u32,
    pub bounced: u32,
}

impl TodayCounters {
    /// The counter a phase's daily cap gates on.
    pub fn for_phase(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Collect => self.collected,
            Phase::Generate => self.generated,
            Phase::Post => self.published,
        }
    }
}

pub struct StatsAggregator {
    store: Arc<StateDb>,
}

impl StatsAggregator {
    pub fn new(store: Arc<StateDb>) -> Self {
        Self { store }
    }

    /// Increment one counter on the tenant's current local day.
    pub fn record(
        &self,
        tenant: &Tenant,
        surface: Surface,
        field: StatField,
        n: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .bump_stat(&tenant.id, surface, local_today(tenant, now), field, n)
    }

    /// Snapshot of today's counters, summed across all surfaces.
    pub fn today(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<TodayCounters> {
        let mut out = TodayCounters::default();
        for row in self.store.stats_for_day(&tenant.id, local_today(tenant, now))? {
            out.collected += row.collected;
            out.generated += row.generated;
            out.published += row.published;
            out.opened += row.opened;
            out.replied += row.replied;
            out.bounced += row.bounced;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_today_sums_across_surfaces() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        let tenant = Tenant::new("t1", "Acme");
        store.upsert_tenant(&tenant).unwrap();
        let stats = StatsAggregator::new(store);

        let now = Utc::now();
        stats.record(&tenant, Surface::Board, StatField::Published, 2, now).unwrap();
        stats.record(&tenant, Surface::Email, StatField::Published, 3, now).unwrap();
        stats.record(&tenant, Surface::Email, StatField::Bounced, 1, now).unwrap();

        let today = stats.today(&tenant, now).unwrap();
        assert_eq!(today.published, 5);
        assert_eq!(today.bounced, 1);
        assert_eq!(today.collected, 0);
        assert_eq!(today.for_phase(Phase::Post), 5);
    }

    #[test]
    fn test_empty_day_is_zero() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        let tenant = Tenant::new("t1", "Acme");
        store.upsert_tenant(&tenant).unwrap();
        let stats = StatsAggregator::new(store);
        assert_eq!(stats.today(&tenant, Utc::now()).unwrap(), TodayCounters::default());
    }
}
