//! Core data model: accounts, targets, tasks, contact channels, daily stats.
//! Everything is tenant-scoped; there is no cross-tenant sharing.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ─── Surfaces, phases, modes ──────────────────────────────────

/// An external platform type with its own rate and behavior rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Surface {
    /// Community boards (forum-style posting).
    Board,
    /// Q&A sites (answers on existing questions).
    Qna,
    /// Direct email outreach.
    Email,
}

impl Surface {
    /// Parse from the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "board" => Some(Surface::Board),
            "qna" => Some(Surface::Qna),
            "email" => Some(Surface::Email),
            _ => None,
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Surface::Board => write!(f, "board"),
            Surface::Qna => write!(f, "qna"),
            Surface::Email => write!(f, "email"),
        }
    }
}

/// One step of the automation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Collect,
    Generate,
    Post,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Collect => write!(f, "collect"),
            Phase::Generate => write!(f, "generate"),
            Phase::Post => write!(f, "post"),
        }
    }
}

/// What an operator asks the scheduler to run for a tenant.
/// `Full` bundles all three phases, each on its own loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Collect,
    Generate,
    Post,
    Full,
}

impl Mode {
    /// The phases this mode runs.
    pub fn phases(&self) -> Vec<Phase> {
        match self {
            Mode::Collect => vec![Phase::Collect],
            Mode::Generate => vec![Phase::Generate],
            Mode::Post => vec![Phase::Post],
            Mode::Full => vec![Phase::Collect, Phase::Generate, Phase::Post],
        }
    }

    /// Parse from the CLI / storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collect" => Some(Mode::Collect),
            "generate" => Some(Mode::Generate),
            "post" => Some(Mode::Post),
            "full" => Some(Mode::Full),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Collect => write!(f, "collect"),
            Mode::Generate => write!(f, "generate"),
            Mode::Post => write!(f, "post"),
            Mode::Full => write!(f, "full"),
        }
    }
}

// ─── Accounts ──────────────────────────────────────────────────

/// Lifecycle state of a publishing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Freshly created, not yet warming.
    New,
    /// In the warm-up ramp; limits increase day by day.
    Warming,
    /// Fully ramped, nominal limits apply.
    Active,
    /// Manually parked or quota-exhausted; resume restarts the ramp.
    Resting,
    /// Blocked by the target surface.
    Blocked,
    /// Soft-disabled by an operator.
    Disabled,
    /// Quarantined after an auth failure; needs re-authentication.
    Error,
}

impl AccountStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(AccountStatus::New),
            "warming" => Some(AccountStatus::Warming),
            "active" => Some(AccountStatus::Active),
            "resting" => Some(AccountStatus::Resting),
            "blocked" => Some(AccountStatus::Blocked),
            "disabled" => Some(AccountStatus::Disabled),
            "error" => Some(AccountStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::New => write!(f, "new"),
            AccountStatus::Warming => write!(f, "warming"),
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Resting => write!(f, "resting"),
            AccountStatus::Blocked => write!(f, "blocked"),
            AccountStatus::Disabled => write!(f, "disabled"),
            AccountStatus::Error => write!(f, "error"),
        }
    }
}

/// The kind of publish action an account performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Comment,
    Post,
    Answer,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Comment => write!(f, "comment"),
            ActionKind::Post => write!(f, "post"),
            ActionKind::Answer => write!(f, "answer"),
        }
    }
}

impl ActionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "comment" => Some(ActionKind::Comment),
            "post" => Some(ActionKind::Post),
            "answer" => Some(ActionKind::Answer),
            _ => None,
        }
    }
}

/// Per-action-kind counters (daily limits, today counts, lifetime totals).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub comment: u32,
    pub post: u32,
    pub answer: u32,
}

impl ActionCounts {
    pub fn get(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Comment => self.comment,
            ActionKind::Post => self.post,
            ActionKind::Answer => self.answer,
        }
    }

    pub fn add(&mut self, kind: ActionKind, n: u32) {
        match kind {
            ActionKind::Comment => self.comment += n,
            ActionKind::Post => self.post += n,
            ActionKind::Answer => self.answer += n,
        }
    }

    /// Same value for all three kinds.
    pub fn uniform(n: u32) -> Self {
        Self { comment: n, post: n, answer: n }
    }
}

/// A credentialed automation identity on one surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account ID.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Which surface this account acts on.
    pub surface: Surface,
    /// Identity reference (login name, sender address, profile handle).
    pub identity: String,
    /// Current lifecycle state.
    pub status: AccountStatus,
    /// Day index within the warm-up ramp (0-based).
    pub warmup_day: u32,
    /// Nominal daily limits per action kind. A limit of 0 soft-disables
    /// that action kind without deleting history.
    pub daily_limit: ActionCounts,
    /// Actions performed today (reset at tenant-local day rollover).
    pub today: ActionCounts,
    /// Lifetime totals.
    pub total: ActionCounts,
    /// Last time this account acted or tried to act.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Tenant-local date of the last daily rollover applied to this account.
    pub last_reset_on: Option<NaiveDate>,
    /// Rotation weight; higher means picked more often.
    pub priority_weight: u32,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh account in `New` state.
    pub fn new(tenant_id: &str, surface: Surface, identity: &str, daily_limit: ActionCounts) -> Self {
        Self {
            id: format!("acct-{}", uuid::Uuid::new_v4()),
            tenant_id: tenant_id.to_string(),
            surface,
            identity: identity.to_string(),
            status: AccountStatus::New,
            warmup_day: 0,
            daily_limit,
            today: ActionCounts::default(),
            total: ActionCounts::default(),
            last_activity_at: None,
            last_reset_on: None,
            priority_weight: 1,
            created_at: Utc::now(),
        }
    }
}

// ─── Targets & contact channels ────────────────────────────────

/// Lifecycle state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Active,
    Paused,
    /// Permanently invalid; all contact channels hard-bounced.
    Invalid,
}

impl TargetStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TargetStatus::Active),
            "paused" => Some(TargetStatus::Paused),
            "invalid" => Some(TargetStatus::Invalid),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Active => write!(f, "active"),
            TargetStatus::Paused => write!(f, "paused"),
            TargetStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// A destination for published content: a board, a question feed, or a
/// contact reachable over email channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSite {
    pub id: String,
    pub tenant_id: String,
    pub surface: Surface,
    /// Display name (board name, contact name).
    pub name: String,
    pub status: TargetStatus,
    /// Rotation priority among targets (higher = preferred).
    pub priority: u32,
    /// Optional per-target daily cap, independent of account limits.
    pub daily_limit: Option<u32>,
    pub allow_comment: bool,
    pub allow_post: bool,
    pub allow_reply: bool,
    /// Lifetime published count against this target.
    pub published_total: u32,
    pub created_at: DateTime<Utc>,
}

impl TargetSite {
    pub fn new(tenant_id: &str, surface: Surface, name: &str) -> Self {
        Self {
            id: format!("tgt-{}", uuid::Uuid::new_v4()),
            tenant_id: tenant_id.to_string(),
            surface,
            name: name.to_string(),
            status: TargetStatus::Active,
            priority: 1,
            daily_limit: None,
            allow_comment: true,
            allow_post: true,
            allow_reply: true,
            published_total: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether this target accepts the given action kind.
    pub fn allows(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Comment => self.allow_comment,
            ActionKind::Post => self.allow_post,
            ActionKind::Answer => self.allow_reply,
        }
    }
}

/// An email channel belonging to a target contact.
/// Invalidated on hard bounce; soft bounces accumulate `bounce_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactChannel {
    pub id: String,
    pub tenant_id: String,
    pub target_id: String,
    pub address: String,
    pub is_verified: bool,
    pub is_primary: bool,
    pub bounce_count: u32,
    pub last_bounce_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ContactChannel {
    pub fn new(tenant_id: &str, target_id: &str, address: &str, primary: bool) -> Self {
        Self {
            id: format!("ch-{}", uuid::Uuid::new_v4()),
            tenant_id: tenant_id.to_string(),
            target_id: target_id.to_string(),
            address: address.to_string(),
            is_verified: true,
            is_primary: primary,
            bounce_count: 0,
            last_bounce_at: None,
            created_at: Utc::now(),
        }
    }
}

// ─── Tasks ─────────────────────────────────────────────────────

/// Task status; the append-only publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Draft,
    Approved,
    Dispatched,
    Published,
    Failed,
}

impl TaskState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(TaskState::Draft),
            "approved" => Some(TaskState::Approved),
            "dispatched" => Some(TaskState::Dispatched),
            "published" => Some(TaskState::Published),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Draft => write!(f, "draft"),
            TaskState::Approved => write!(f, "approved"),
            TaskState::Dispatched => write!(f, "dispatched"),
            TaskState::Published => write!(f, "published"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work produced by the generate phase and consumed by the post
/// phase. Never deleted; follow-ups are new rows with `sequence + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub tenant_id: String,
    pub target_id: String,
    pub action: ActionKind,
    pub content: String,
    pub state: TaskState,
    /// Position in a multi-step follow-up flow (0 = first touch).
    pub sequence: u32,
    /// Raw error from the last failed publish attempt, if any.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TaskItem {
    /// Create a draft task for a target.
    pub fn draft(tenant_id: &str, target_id: &str, action: ActionKind, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            tenant_id: tenant_id.to_string(),
            target_id: target_id.to_string(),
            action,
            content: content.to_string(),
            state: TaskState::Draft,
            sequence: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }

    /// Create the follow-up to a published task (same target, next sequence).
    pub fn follow_up(&self, content: &str) -> Self {
        let mut next = Self::draft(&self.tenant_id, &self.target_id, self.action, content);
        next.sequence = self.sequence + 1;
        next
    }
}

// ─── Daily stats ───────────────────────────────────────────────

/// One row per tenant per surface per calendar day. Counters only ever
/// increment, and only by the same day's events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStat {
    pub tenant_id: String,
    pub surface: String,
    pub day: String,
    pub collected: u32,
    pub generated: u32,
    pub published: u32,
    pub opened: u32,
    pub replied: u32,
    pub bounced: u32,
}

// ─── Tenants ───────────────────────────────────────────────────

/// A customer owning an independent set of accounts, targets, and schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Offset from UTC in minutes, used for daily rollover and working hours.
    pub tz_offset_minutes: i32,
    /// Working window, tenant-local hours. Must not wrap midnight.
    pub work_start_hour: u8,
    pub work_end_hour: u8,
    /// Working weekdays, 0 = Monday … 6 = Sunday.
    pub workdays: Vec<u8>,
    /// Per-phase daily caps.
    pub daily_collect_cap: u32,
    pub daily_generate_cap: u32,
    pub daily_post_cap: u32,
    /// Tenant-wide send caps regardless of account mix.
    pub hourly_action_cap: u32,
    /// Minimum seconds between campaign batch sends.
    pub batch_min_interval_secs: u32,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            tz_offset_minutes: 0,
            work_start_hour: 9,
            work_end_hour: 18,
            workdays: vec![0, 1, 2, 3, 4],
            daily_collect_cap: 100,
            daily_generate_cap: 60,
            daily_post_cap: 50,
            hourly_action_cap: 10,
            batch_min_interval_secs: 300,
            created_at: Utc::now(),
        }
    }
}

// ─── Capability payloads ───────────────────────────────────────

/// A candidate destination found by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandidate {
    pub surface: Surface,
    /// External reference on the source surface (thread ID, profile URL…).
    pub external_ref: String,
    pub title: String,
    pub snippet: String,
    pub keyword: String,
}

/// Content produced by the generator capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub body: String,
    pub tone: String,
}

/// Outcome of a publish attempt; the sole input to the outcome classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub success: bool,
    /// Raw failure signal (error code / message) when `success` is false.
    pub raw_error: Option<String>,
}

impl PublishResult {
    pub fn ok() -> Self {
        Self { success: true, raw_error: None }
    }

    pub fn failed(raw: impl Into<String>) -> Self {
        Self { success: false, raw_error: Some(raw.into()) }
    }
}
