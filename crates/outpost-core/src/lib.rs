//! # OutPost Core
//!
//! Shared foundation for the OutPost automation engine: the tenant-scoped
//! data model (accounts, targets, tasks, contact channels, daily stats),
//! the TOML configuration system, the crate-wide error type, and the
//! capability traits (collector / generator / publisher) that the scheduler
//! consumes through constructor injection.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::OutPostConfig;
pub use error::{OutPostError, Result};
pub use traits::{Collector, Generator, Publisher};
pub use types::{
    Account, AccountStatus, ActionCounts, ActionKind, ContactChannel, DailyStat,
    GeneratedContent, Mode, Phase, PublishResult, RawCandidate, Surface, TargetSite,
    TargetStatus, TaskItem, TaskState, Tenant,
};
