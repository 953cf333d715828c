//! # OutPost Accounts
//!
//! Owns account state: the warm-up ramp, daily quota bookkeeping, rotation
//! selection, and the tenant-wide rate windows. Answers the scheduler's one
//! question, "which account may act now?", without a central lock service.

pub mod pool;
pub mod quota;
pub mod warmup;

pub use pool::AccountPool;
pub use quota::{local_day_start_utc, local_today, RateLimiter, Window, WindowCheck};
pub use warmup::{effective_limit, RAMP_DAYS};
