//! SQLite-backed persistence for OutPost state: accounts, targets, tasks,
//! contact channels, daily stats, the activity log, and the desired-mode
//! flags the scheduler recovers from after a restart.
//!
//! The connection sits behind a `std::sync::Mutex` because several phase
//! loops share one handle; every call is a short synchronous statement.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use outpost_core::error::{OutPostError, Result};
use outpost_core::types::{
    Account, AccountStatus, ActionCounts, ActionKind, ContactChannel, DailyStat, Mode,
    RawCandidate, Surface, TargetSite, TargetStatus, TaskItem, TaskState, Tenant,
};

/// Counter columns of the daily_stats table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    Collected,
    Generated,
    Published,
    Opened,
    Replied,
    Bounced,
}

impl StatField {
    fn column(self) -> &'static str {
        match self {
            StatField::Collected => "collected",
            StatField::Generated => "generated",
            StatField::Published => "published",
            StatField::Opened => "opened",
            StatField::Replied => "replied",
            StatField::Bounced => "bounced",
        }
    }
}

/// The OutPost state database.
pub struct StateDb {
    conn: Mutex<Connection>,
}

impl StateDb {
    /// Open or create the state database at a path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(OutPostError::store)?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        tracing::debug!("💾 State database ready at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(OutPostError::store)?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                tz_offset_minutes INTEGER NOT NULL DEFAULT 0,
                work_start_hour INTEGER NOT NULL DEFAULT 9,
                work_end_hour INTEGER NOT NULL DEFAULT 18,
                workdays TEXT NOT NULL DEFAULT '0,1,2,3,4',
                daily_collect_cap INTEGER NOT NULL DEFAULT 100,
                daily_generate_cap INTEGER NOT NULL DEFAULT 60,
                daily_post_cap INTEGER NOT NULL DEFAULT 50,
                hourly_action_cap INTEGER NOT NULL DEFAULT 10,
                batch_min_interval_secs INTEGER NOT NULL DEFAULT 300,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                surface TEXT NOT NULL,
                identity TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                warmup_day INTEGER NOT NULL DEFAULT 0,
                limit_comment INTEGER NOT NULL DEFAULT 0,
                limit_post INTEGER NOT NULL DEFAULT 0,
                limit_answer INTEGER NOT NULL DEFAULT 0,
                today_comment INTEGER NOT NULL DEFAULT 0,
                today_post INTEGER NOT NULL DEFAULT 0,
                today_answer INTEGER NOT NULL DEFAULT 0,
                total_comment INTEGER NOT NULL DEFAULT 0,
                total_post INTEGER NOT NULL DEFAULT 0,
                total_answer INTEGER NOT NULL DEFAULT 0,
                last_activity_at TEXT,
                last_reset_on TEXT,
                priority_weight INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                surface TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                priority INTEGER NOT NULL DEFAULT 1,
                daily_limit INTEGER,
                allow_comment INTEGER NOT NULL DEFAULT 1,
                allow_post INTEGER NOT NULL DEFAULT 1,
                allow_reply INTEGER NOT NULL DEFAULT 1,
                published_total INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contact_channels (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                address TEXT NOT NULL,
                is_verified INTEGER NOT NULL DEFAULT 1,
                is_primary INTEGER NOT NULL DEFAULT 0,
                bounce_count INTEGER NOT NULL DEFAULT 0,
                last_bounce_at TEXT,
                created_at TEXT NOT NULL
            );

            -- Append-only publish pipeline. Rows are never deleted;
            -- follow-ups supersede published predecessors.
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                action TEXT NOT NULL,
                content TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'draft',
                sequence INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                published_at TEXT
            );

            CREATE TABLE IF NOT EXISTS candidates (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                surface TEXT NOT NULL,
                external_ref TEXT NOT NULL,
                title TEXT NOT NULL,
                snippet TEXT NOT NULL DEFAULT '',
                keyword TEXT NOT NULL DEFAULT '',
                consumed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (tenant_id, external_ref)
            );

            CREATE TABLE IF NOT EXISTS daily_stats (
                tenant_id TEXT NOT NULL,
                surface TEXT NOT NULL,
                day TEXT NOT NULL,
                collected INTEGER NOT NULL DEFAULT 0,
                generated INTEGER NOT NULL DEFAULT 0,
                published INTEGER NOT NULL DEFAULT 0,
                opened INTEGER NOT NULL DEFAULT 0,
                replied INTEGER NOT NULL DEFAULT 0,
                bounced INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tenant_id, surface, day)
            );

            -- Every attempted action, success or not. The rolling rate-limit
            -- windows count rows here, so limits stay correct across restarts.
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                action TEXT NOT NULL,
                success INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activity_tenant_time
                ON activity_log (tenant_id, created_at);

            -- Desired running mode per tenant. Source of truth for loop
            -- recovery after a process restart.
            CREATE TABLE IF NOT EXISTS tenant_modes (
                tenant_id TEXT NOT NULL,
                mode TEXT NOT NULL,
                PRIMARY KEY (tenant_id, mode)
            );
            ",
        )
        .map_err(|e| OutPostError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ─── Tenants ──────────────────────────────────────────────

    /// Insert or update a tenant. Rejects midnight-wrapping working-hour
    /// windows; operators must configure non-wrapping windows.
    pub fn upsert_tenant(&self, t: &Tenant) -> Result<()> {
        if t.work_start_hour >= t.work_end_hour || t.work_end_hour > 24 {
            return Err(OutPostError::Config(format!(
                "Working window {}..{} is invalid (must not wrap midnight)",
                t.work_start_hour, t.work_end_hour
            )));
        }
        let workdays = t
            .workdays
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO tenants
                 (id, name, enabled, tz_offset_minutes, work_start_hour, work_end_hour, workdays,
                  daily_collect_cap, daily_generate_cap, daily_post_cap, hourly_action_cap,
                  batch_min_interval_secs, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    t.id,
                    t.name,
                    t.enabled as i32,
                    t.tz_offset_minutes,
                    t.work_start_hour,
                    t.work_end_hour,
                    workdays,
                    t.daily_collect_cap,
                    t.daily_generate_cap,
                    t.daily_post_cap,
                    t.hourly_action_cap,
                    t.batch_min_interval_secs,
                    t.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| OutPostError::Store(format!("Save tenant: {e}")))?;
        Ok(())
    }

    /// Load a tenant by ID.
    pub fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM tenants WHERE id = ?1")
            .map_err(OutPostError::store)?;
        let mut rows = stmt
            .query_map([id], row_to_tenant)
            .map_err(OutPostError::store)?;
        match rows.next() {
            Some(r) => Ok(Some(r.map_err(OutPostError::store)?)),
            None => Ok(None),
        }
    }

    /// List all tenants.
    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM tenants ORDER BY created_at")
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map([], row_to_tenant)
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Accounts ─────────────────────────────────────────────

    /// Insert or update an account.
    pub fn save_account(&self, a: &Account) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO accounts
                 (id, tenant_id, surface, identity, status, warmup_day,
                  limit_comment, limit_post, limit_answer,
                  today_comment, today_post, today_answer,
                  total_comment, total_post, total_answer,
                  last_activity_at, last_reset_on, priority_weight, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    a.id,
                    a.tenant_id,
                    a.surface.to_string(),
                    a.identity,
                    a.status.to_string(),
                    a.warmup_day,
                    a.daily_limit.comment,
                    a.daily_limit.post,
                    a.daily_limit.answer,
                    a.today.comment,
                    a.today.post,
                    a.today.answer,
                    a.total.comment,
                    a.total.post,
                    a.total.answer,
                    a.last_activity_at.map(|t| t.to_rfc3339()),
                    a.last_reset_on.map(|d| d.to_string()),
                    a.priority_weight,
                    a.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| OutPostError::Store(format!("Save account: {e}")))?;
        Ok(())
    }

    /// Load an account by ID.
    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM accounts WHERE id = ?1")
            .map_err(OutPostError::store)?;
        let mut rows = stmt
            .query_map([id], row_to_account)
            .map_err(OutPostError::store)?;
        match rows.next() {
            Some(r) => Ok(Some(r.map_err(OutPostError::store)?)),
            None => Ok(None),
        }
    }

    /// All accounts of a tenant on a surface.
    pub fn accounts_for_surface(&self, tenant_id: &str, surface: Surface) -> Result<Vec<Account>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM accounts WHERE tenant_id = ?1 AND surface = ?2 ORDER BY created_at")
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map(params![tenant_id, surface.to_string()], row_to_account)
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All accounts of a tenant.
    pub fn accounts_for_tenant(&self, tenant_id: &str) -> Result<Vec<Account>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM accounts WHERE tenant_id = ?1 ORDER BY created_at")
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map([tenant_id], row_to_account)
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete an account (explicit operator action; history stays in the log).
    pub fn delete_account(&self, id: &str) -> Result<()> {
        self.lock()
            .execute("DELETE FROM accounts WHERE id = ?1", [id])
            .map_err(|e| OutPostError::Store(format!("Delete account: {e}")))?;
        Ok(())
    }

    // ─── Targets & contact channels ───────────────────────────

    /// Insert or update a target.
    pub fn save_target(&self, t: &TargetSite) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO targets
                 (id, tenant_id, surface, name, status, priority, daily_limit,
                  allow_comment, allow_post, allow_reply, published_total, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    t.id,
                    t.tenant_id,
                    t.surface.to_string(),
                    t.name,
                    t.status.to_string(),
                    t.priority,
                    t.daily_limit,
                    t.allow_comment as i32,
                    t.allow_post as i32,
                    t.allow_reply as i32,
                    t.published_total,
                    t.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| OutPostError::Store(format!("Save target: {e}")))?;
        Ok(())
    }

    /// Load a target by ID.
    pub fn get_target(&self, id: &str) -> Result<Option<TargetSite>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM targets WHERE id = ?1")
            .map_err(OutPostError::store)?;
        let mut rows = stmt
            .query_map([id], row_to_target)
            .map_err(OutPostError::store)?;
        match rows.next() {
            Some(r) => Ok(Some(r.map_err(OutPostError::store)?)),
            None => Ok(None),
        }
    }

    /// Active targets of a tenant on a surface, highest priority first.
    pub fn active_targets(&self, tenant_id: &str, surface: Surface) -> Result<Vec<TargetSite>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM targets WHERE tenant_id = ?1 AND surface = ?2 AND status = 'active'
                 ORDER BY priority DESC, created_at",
            )
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map(params![tenant_id, surface.to_string()], row_to_target)
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Insert or update a contact channel.
    pub fn save_channel(&self, c: &ContactChannel) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO contact_channels
                 (id, tenant_id, target_id, address, is_verified, is_primary,
                  bounce_count, last_bounce_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    c.id,
                    c.tenant_id,
                    c.target_id,
                    c.address,
                    c.is_verified as i32,
                    c.is_primary as i32,
                    c.bounce_count,
                    c.last_bounce_at.map(|t| t.to_rfc3339()),
                    c.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| OutPostError::Store(format!("Save channel: {e}")))?;
        Ok(())
    }

    /// Load a contact channel by ID.
    pub fn get_channel(&self, id: &str) -> Result<Option<ContactChannel>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM contact_channels WHERE id = ?1")
            .map_err(OutPostError::store)?;
        let mut rows = stmt
            .query_map([id], row_to_channel)
            .map_err(OutPostError::store)?;
        match rows.next() {
            Some(r) => Ok(Some(r.map_err(OutPostError::store)?)),
            None => Ok(None),
        }
    }

    /// All channels of a target, primary first.
    pub fn channels_for_target(&self, target_id: &str) -> Result<Vec<ContactChannel>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM contact_channels WHERE target_id = ?1
                 ORDER BY is_primary DESC, created_at",
            )
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map([target_id], row_to_channel)
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Tasks & candidates ───────────────────────────────────

    /// Insert or update a task.
    pub fn save_task(&self, t: &TaskItem) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO tasks
                 (id, tenant_id, target_id, action, content, state, sequence,
                  last_error, created_at, updated_at, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    t.id,
                    t.tenant_id,
                    t.target_id,
                    t.action.to_string(),
                    t.content,
                    t.state.to_string(),
                    t.sequence,
                    t.last_error,
                    t.created_at.to_rfc3339(),
                    t.updated_at.to_rfc3339(),
                    t.published_at.map(|x| x.to_rfc3339()),
                ],
            )
            .map_err(|e| OutPostError::Store(format!("Save task: {e}")))?;
        Ok(())
    }

    /// Load a task by ID.
    pub fn get_task(&self, id: &str) -> Result<Option<TaskItem>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM tasks WHERE id = ?1")
            .map_err(OutPostError::store)?;
        let mut rows = stmt
            .query_map([id], row_to_task)
            .map_err(OutPostError::store)?;
        match rows.next() {
            Some(r) => Ok(Some(r.map_err(OutPostError::store)?)),
            None => Ok(None),
        }
    }

    /// Oldest approved tasks first, up to `limit`.
    pub fn approved_tasks(&self, tenant_id: &str, limit: usize) -> Result<Vec<TaskItem>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM tasks WHERE tenant_id = ?1 AND state = 'approved'
                 ORDER BY created_at LIMIT ?2",
            )
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map(params![tenant_id, limit as i64], row_to_task)
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Count tasks of a tenant in a given state.
    pub fn count_tasks_in_state(&self, tenant_id: &str, state: TaskState) -> Result<u32> {
        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE tenant_id = ?1 AND state = ?2",
                params![tenant_id, state.to_string()],
                |row| row.get::<_, u32>(0),
            )
            .map_err(OutPostError::store)
    }

    /// Tasks that failed since a point in time (for `status()` counters).
    pub fn count_failed_since(&self, tenant_id: &str, since: DateTime<Utc>) -> Result<u32> {
        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE tenant_id = ?1 AND state = 'failed'
                 AND updated_at >= ?2",
                params![tenant_id, since.to_rfc3339()],
                |row| row.get::<_, u32>(0),
            )
            .map_err(OutPostError::store)
    }

    /// Publishes recorded against one target since a point in time. Backs
    /// the per-target daily cap.
    pub fn count_published_for_target_since(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE target_id = ?1 AND state = 'published'
                 AND published_at >= ?2",
                params![target_id, since.to_rfc3339()],
                |row| row.get::<_, u32>(0),
            )
            .map_err(OutPostError::store)
    }

    /// Put every DISPATCHED task back in the APPROVED queue. A task is
    /// DISPATCHED only while a publish call is in flight, so at process
    /// startup any such row was interrupted mid-publish and its outcome is
    /// unknown. Returns how many tasks were re-queued.
    pub fn requeue_dispatched_tasks(&self, now: DateTime<Utc>) -> Result<u32> {
        let n = self
            .lock()
            .execute(
                "UPDATE tasks SET state = 'approved',
                 last_error = 'interrupted mid-publish', updated_at = ?1
                 WHERE state = 'dispatched'",
                params![now.to_rfc3339()],
            )
            .map_err(|e| OutPostError::Store(format!("Requeue tasks: {e}")))?;
        Ok(n as u32)
    }

    /// Store a collected candidate. Duplicate external refs are ignored.
    /// Returns true if the row was new.
    pub fn save_candidate(&self, tenant_id: &str, c: &RawCandidate) -> Result<bool> {
        let n = self
            .lock()
            .execute(
                "INSERT OR IGNORE INTO candidates
                 (id, tenant_id, surface, external_ref, title, snippet, keyword, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    format!("cand-{}", nanos_id()),
                    tenant_id,
                    c.surface.to_string(),
                    c.external_ref,
                    c.title,
                    c.snippet,
                    c.keyword,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| OutPostError::Store(format!("Save candidate: {e}")))?;
        Ok(n > 0)
    }

    /// Oldest unconsumed candidates, up to `limit`. Returns (row id, candidate).
    pub fn unconsumed_candidates(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<(String, RawCandidate)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, surface, external_ref, title, snippet, keyword FROM candidates
                 WHERE tenant_id = ?1 AND consumed = 0 ORDER BY created_at LIMIT ?2",
            )
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map(params![tenant_id, limit as i64], |row| {
                let id: String = row.get(0)?;
                let surface_str: String = row.get(1)?;
                Ok((
                    id,
                    RawCandidate {
                        surface: Surface::parse(&surface_str).unwrap_or(Surface::Board),
                        external_ref: row.get(2)?,
                        title: row.get(3)?,
                        snippet: row.get(4)?,
                        keyword: row.get(5)?,
                    },
                ))
            })
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Mark a candidate consumed by the generate phase.
    pub fn mark_candidate_consumed(&self, id: &str) -> Result<()> {
        self.lock()
            .execute("UPDATE candidates SET consumed = 1 WHERE id = ?1", [id])
            .map_err(|e| OutPostError::Store(format!("Consume candidate: {e}")))?;
        Ok(())
    }

    // ─── Daily stats ──────────────────────────────────────────

    /// Increment one counter of the (tenant, surface, day) row, creating the
    /// row lazily on the first event of the day.
    pub fn bump_stat(
        &self,
        tenant_id: &str,
        surface: Surface,
        day: NaiveDate,
        field: StatField,
        n: u32,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO daily_stats (tenant_id, surface, day) VALUES (?1, ?2, ?3)",
            params![tenant_id, surface.to_string(), day.to_string()],
        )
        .map_err(OutPostError::store)?;
        conn.execute(
            &format!(
                "UPDATE daily_stats SET {col} = {col} + ?1
                 WHERE tenant_id = ?2 AND surface = ?3 AND day = ?4",
                col = field.column()
            ),
            params![n, tenant_id, surface.to_string(), day.to_string()],
        )
        .map_err(OutPostError::store)?;
        Ok(())
    }

    /// All stat rows of a tenant for a day.
    pub fn stats_for_day(&self, tenant_id: &str, day: NaiveDate) -> Result<Vec<DailyStat>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM daily_stats WHERE tenant_id = ?1 AND day = ?2")
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map(params![tenant_id, day.to_string()], |row| {
                Ok(DailyStat {
                    tenant_id: row.get(0)?,
                    surface: row.get(1)?,
                    day: row.get(2)?,
                    collected: row.get(3)?,
                    generated: row.get(4)?,
                    published: row.get(5)?,
                    opened: row.get(6)?,
                    replied: row.get(7)?,
                    bounced: row.get(8)?,
                })
            })
            .map_err(OutPostError::store)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Activity log (rolling rate windows) ──────────────────

    /// Append an attempted action to the activity log.
    pub fn log_activity(
        &self,
        tenant_id: &str,
        account_id: &str,
        action: ActionKind,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO activity_log (tenant_id, account_id, action, success, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tenant_id, account_id, action.to_string(), success as i32, at.to_rfc3339()],
            )
            .map_err(|e| OutPostError::Store(format!("Log activity: {e}")))?;
        Ok(())
    }

    /// Count successful actions of a tenant since a point in time.
    /// RFC 3339 strings compare chronologically, so this is a plain range scan.
    pub fn count_success_since(&self, tenant_id: &str, since: DateTime<Utc>) -> Result<u32> {
        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM activity_log
                 WHERE tenant_id = ?1 AND success = 1 AND created_at >= ?2",
                params![tenant_id, since.to_rfc3339()],
                |row| row.get::<_, u32>(0),
            )
            .map_err(OutPostError::store)
    }

    /// Timestamp of the tenant's most recent successful action, if any.
    pub fn last_success_at(&self, tenant_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT MAX(created_at) FROM activity_log WHERE tenant_id = ?1 AND success = 1",
                [tenant_id],
                |row| row.get(0),
            )
            .map_err(OutPostError::store)?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)))
    }

    // ─── Desired modes (crash recovery) ───────────────────────

    /// Record that a tenant's mode should be running.
    pub fn set_desired_mode(&self, tenant_id: &str, mode: Mode) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR IGNORE INTO tenant_modes (tenant_id, mode) VALUES (?1, ?2)",
                params![tenant_id, mode.to_string()],
            )
            .map_err(|e| OutPostError::Store(format!("Set mode: {e}")))?;
        Ok(())
    }

    /// Clear a tenant's desired mode.
    pub fn clear_desired_mode(&self, tenant_id: &str, mode: Mode) -> Result<()> {
        self.lock()
            .execute(
                "DELETE FROM tenant_modes WHERE tenant_id = ?1 AND mode = ?2",
                params![tenant_id, mode.to_string()],
            )
            .map_err(|e| OutPostError::Store(format!("Clear mode: {e}")))?;
        Ok(())
    }

    /// All (tenant, mode) pairs that should be running.
    pub fn desired_modes(&self) -> Result<Vec<(String, Mode)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT tenant_id, mode FROM tenant_modes ORDER BY tenant_id")
            .map_err(OutPostError::store)?;
        let rows = stmt
            .query_map([], |row| {
                let tenant: String = row.get(0)?;
                let mode: String = row.get(1)?;
                Ok((tenant, mode))
            })
            .map_err(OutPostError::store)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(t, m)| Mode::parse(&m).map(|m| (t, m)))
            .collect())
    }
}

// ─── Row mappers ───────────────────────────────────────────────

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn nanos_id() -> String {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{:x}-{:x}", t.as_secs(), t.subsec_nanos())
}

fn row_to_tenant(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let workdays_str: String = row.get(6)?;
    let created_at: String = row.get(12)?;
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        enabled: row.get::<_, i32>(2)? != 0,
        tz_offset_minutes: row.get(3)?,
        work_start_hour: row.get(4)?,
        work_end_hour: row.get(5)?,
        workdays: workdays_str
            .split(',')
            .filter_map(|d| d.trim().parse().ok())
            .collect(),
        daily_collect_cap: row.get(7)?,
        daily_generate_cap: row.get(8)?,
        daily_post_cap: row.get(9)?,
        hourly_action_cap: row.get(10)?,
        batch_min_interval_secs: row.get(11)?,
        created_at: parse_ts(created_at),
    })
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let surface_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    let last_activity: Option<String> = row.get(15)?;
    let last_reset: Option<String> = row.get(16)?;
    let created_at: String = row.get(18)?;
    Ok(Account {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        surface: Surface::parse(&surface_str).unwrap_or(Surface::Board),
        identity: row.get(3)?,
        status: AccountStatus::parse(&status_str).unwrap_or(AccountStatus::Disabled),
        warmup_day: row.get(5)?,
        daily_limit: ActionCounts {
            comment: row.get(6)?,
            post: row.get(7)?,
            answer: row.get(8)?,
        },
        today: ActionCounts {
            comment: row.get(9)?,
            post: row.get(10)?,
            answer: row.get(11)?,
        },
        total: ActionCounts {
            comment: row.get(12)?,
            post: row.get(13)?,
            answer: row.get(14)?,
        },
        last_activity_at: parse_opt_ts(last_activity),
        last_reset_on: last_reset.and_then(|s| s.parse().ok()),
        priority_weight: row.get(17)?,
        created_at: parse_ts(created_at),
    })
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<TargetSite> {
    let surface_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    let created_at: String = row.get(11)?;
    Ok(TargetSite {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        surface: Surface::parse(&surface_str).unwrap_or(Surface::Board),
        name: row.get(3)?,
        status: TargetStatus::parse(&status_str).unwrap_or(TargetStatus::Paused),
        priority: row.get(5)?,
        daily_limit: row.get(6)?,
        allow_comment: row.get::<_, i32>(7)? != 0,
        allow_post: row.get::<_, i32>(8)? != 0,
        allow_reply: row.get::<_, i32>(9)? != 0,
        published_total: row.get(10)?,
        created_at: parse_ts(created_at),
    })
}

fn row_to_channel(row: &Row<'_>) -> rusqlite::Result<ContactChannel> {
    let last_bounce: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(ContactChannel {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        target_id: row.get(2)?,
        address: row.get(3)?,
        is_verified: row.get::<_, i32>(4)? != 0,
        is_primary: row.get::<_, i32>(5)? != 0,
        bounce_count: row.get(6)?,
        last_bounce_at: parse_opt_ts(last_bounce),
        created_at: parse_ts(created_at),
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskItem> {
    let action_str: String = row.get(3)?;
    let state_str: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let published_at: Option<String> = row.get(10)?;
    Ok(TaskItem {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        target_id: row.get(2)?,
        action: ActionKind::parse(&action_str).unwrap_or(ActionKind::Post),
        content: row.get(4)?,
        state: TaskState::parse(&state_str).unwrap_or(TaskState::Draft),
        sequence: row.get(6)?,
        last_error: row.get(7)?,
        created_at: parse_ts(created_at),
        updated_at: parse_ts(updated_at),
        published_at: parse_opt_ts(published_at),
    })
}
