//! Working-hour gate. All checks are tenant-local: the tenant's UTC offset
//! is applied before comparing the hour and weekday. Windows never wrap
//! midnight; the store rejects wrapping configurations at write time.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};

use outpost_core::types::Tenant;

/// Whether the tenant's automation may act right now.
/// Weekdays are 0 = Monday … 6 = Sunday, hours half-open `[start, end)`.
pub fn is_working_hours(tenant: &Tenant, now: DateTime<Utc>) -> bool {
    let offset = FixedOffset::east_opt(tenant.tz_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    let local = now.with_timezone(&offset);

    let weekday = local.weekday().num_days_from_monday() as u8;
    if !tenant.workdays.contains(&weekday) {
        return false;
    }
    let hour = local.hour() as u8;
    tenant.work_start_hour <= hour && hour < tenant.work_end_hour
}
