//! Capability traits: the boundary between the scheduler and the outside
//! world. Implementations are injected into the engine at construction so
//! loops reuse one client per process instead of rebuilding credentials per
//! call, and tests swap in doubles.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Account, GeneratedContent, PublishResult, RawCandidate, TargetSite, TaskItem};

/// Finds candidate targets for a keyword on a surface.
/// Any failure is treated by the caller as "zero results, try later".
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, keyword: &str, max_results: usize) -> Result<Vec<RawCandidate>>;
}

/// Produces content for a candidate. An error means "skip this candidate";
/// it does not count against the day's generation quota.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, candidate: &RawCandidate, tone: &str) -> Result<GeneratedContent>;
}

/// Executes a publish action with a given account against a target.
/// Never returns `Err`; delivery failures come back as an unsuccessful
/// `PublishResult` carrying the raw error signal for the classifier.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, task: &TaskItem, account: &Account, target: &TargetSite)
        -> PublishResult;
}
