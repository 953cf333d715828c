//! # OutPost: Outbound Marketing Automation
//!
//! Per-tenant phase loops (collect → generate → post) with account warm-up,
//! quota tracking, priority-weighted rotation, and publish-failure
//! classification.
//!
//! Usage:
//!   outpost init --tenant acme --name "Acme Inc" --demo
//!   outpost start --tenant acme --mode full
//!   outpost run                      # foreground host for the loops
//!   outpost status --tenant acme
//!   outpost run-once --tenant acme --phase collect
//!   outpost stop --tenant acme --mode full

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use outpost_core::config::OutPostConfig;
use outpost_core::traits::{Collector, Generator, Publisher};
use outpost_core::types::{
    Account, ActionCounts, GeneratedContent, Mode, Phase, PublishResult, RawCandidate, Surface,
    TargetSite, TaskItem, TaskState, Tenant,
};
use outpost_accounts::{local_day_start_utc, AccountPool};
use outpost_scheduler::{AutomationEngine, StatsAggregator};
use outpost_store::StateDb;

/// Exit code when `start` finds the mode already running.
const EXIT_ALREADY_RUNNING: i32 = 2;
/// Exit code when `stop` finds nothing to stop.
const EXIT_NOT_RUNNING: i32 = 3;

#[derive(Parser)]
#[command(
    name = "outpost",
    version,
    about = "📬 OutPost; outbound marketing automation scheduler"
)]
struct Cli {
    /// Config file path (default: ~/.outpost/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Database path override
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a tenant (and default config file if missing)
    Init {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        name: String,
        /// Seed a demo account and target for dry runs
        #[arg(long)]
        demo: bool,
    },
    /// Mark a tenant's automation mode as running
    Start {
        #[arg(long)]
        tenant: String,
        /// collect | generate | post | full
        #[arg(long, default_value = "full")]
        mode: String,
    },
    /// Stop a tenant's automation mode
    Stop {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value = "full")]
        mode: String,
    },
    /// Show running modes, today's counters, and pipeline depth
    Status {
        #[arg(long)]
        tenant: String,
    },
    /// Run a single phase step now, bypassing the interval wait
    RunOnce {
        #[arg(long)]
        tenant: String,
        /// collect | generate | post
        #[arg(long)]
        phase: String,
    },
    /// Host the phase loops in the foreground until Ctrl-C
    Run {
        /// Seconds between desired-mode reconciliation passes
        #[arg(long, default_value = "5")]
        poll_secs: u64,
    },
}

// ─── Dry-run capabilities ──────────────────────────────────────
// Stand-ins for real surface integrations so the engine can be exercised
// end to end without publishing credentials. The collector is deterministic
// per keyword, so candidate dedupe keeps repeated runs from growing the
// queue unboundedly.

struct DryRunCollector;

#[async_trait]
impl Collector for DryRunCollector {
    async fn collect(&self, keyword: &str, max_results: usize) -> outpost_core::error::Result<Vec<RawCandidate>> {
        let n = max_results.min(3);
        Ok((0..n)
            .map(|i| RawCandidate {
                surface: Surface::Board,
                external_ref: format!("dry-{keyword}-{i}"),
                title: format!("{keyword} discussion #{i}"),
                snippet: format!("A thread mentioning {keyword}"),
                keyword: keyword.to_string(),
            })
            .collect())
    }
}

struct DryRunGenerator;

#[async_trait]
impl Generator for DryRunGenerator {
    async fn generate(&self, candidate: &RawCandidate, tone: &str) -> outpost_core::error::Result<GeneratedContent> {
        Ok(GeneratedContent {
            body: format!("[dry-run {tone}] reply to '{}'", candidate.title),
            tone: tone.to_string(),
        })
    }
}

struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, task: &TaskItem, account: &Account, target: &TargetSite) -> PublishResult {
        tracing::info!(
            "🧪 [dry-run] would publish task {} via {} to '{}'",
            task.id,
            account.identity,
            target.name
        );
        PublishResult::ok()
    }
}

fn load_config(cli: &Cli) -> Result<OutPostConfig> {
    let mut config = match &cli.config {
        Some(path) => OutPostConfig::load_from(Path::new(&shellexpand::tilde(path).to_string()))?,
        None => OutPostConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

fn open_store(config: &OutPostConfig) -> Result<Arc<StateDb>> {
    let db_path = shellexpand::tilde(&config.db_path).to_string();
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(StateDb::open(Path::new(&db_path))?))
}

fn build_engine(store: Arc<StateDb>, config: OutPostConfig) -> Arc<AutomationEngine> {
    AutomationEngine::new(
        store,
        config,
        Arc::new(DryRunCollector),
        Arc::new(DryRunGenerator),
        Arc::new(DryRunPublisher),
    )
}

fn parse_mode(s: &str) -> Result<Mode> {
    Mode::parse(s).ok_or_else(|| anyhow::anyhow!("unknown mode '{s}' (collect|generate|post|full)"))
}

fn parse_phase(s: &str) -> Result<Phase> {
    match s {
        "collect" => Ok(Phase::Collect),
        "generate" => Ok(Phase::Generate),
        "post" => Ok(Phase::Post),
        _ => bail!("unknown phase '{s}' (collect|generate|post)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "outpost=debug" } else { "outpost=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let store = open_store(&config)?;

    match &cli.command {
        Command::Init { tenant, name, demo } => {
            if !OutPostConfig::default_path().exists() && cli.config.is_none() {
                config.save()?;
                println!("📝 Wrote default config to {}", OutPostConfig::default_path().display());
            }
            let t = Tenant::new(tenant, name);
            store.upsert_tenant(&t)?;
            println!("✅ Tenant '{tenant}' ready ({name})");

            if *demo {
                let pool = AccountPool::new(store.clone(), config.limits.clone());
                let account = pool.create_account(
                    tenant,
                    Surface::Board,
                    &format!("{tenant}-demo"),
                    ActionCounts::uniform(10),
                )?;
                pool.start_warmup(&account.id, &t, chrono::Utc::now())?;
                let target = TargetSite::new(tenant, Surface::Board, &format!("{name} community"));
                store.save_target(&target)?;
                println!("🧪 Seeded demo account '{}' (warming) and target '{}'", account.identity, target.name);
            }
        }

        Command::Start { tenant, mode } => {
            let mode = parse_mode(mode)?;
            if store.get_tenant(tenant)?.is_none() {
                bail!("tenant '{tenant}' not found (run `outpost init` first)");
            }
            let modes: Vec<Mode> = store
                .desired_modes()?
                .into_iter()
                .filter(|(t, _)| t == tenant)
                .map(|(_, m)| m)
                .collect();
            if modes.contains(&mode) || modes.contains(&Mode::Full) {
                println!("ℹ️ Mode {mode} already running for '{tenant}'");
                std::process::exit(EXIT_ALREADY_RUNNING);
            }
            if mode == Mode::Full {
                // `full` subsumes any single-phase flags.
                for m in modes {
                    store.clear_desired_mode(tenant, m)?;
                }
            }
            store.set_desired_mode(tenant, mode)?;
            println!("▶️ Mode {mode} marked running for '{tenant}'; a `outpost run` host picks it up");
        }

        Command::Stop { tenant, mode } => {
            let mode = parse_mode(mode)?;
            let modes: Vec<Mode> = store
                .desired_modes()?
                .into_iter()
                .filter(|(t, _)| t == tenant)
                .map(|(_, m)| m)
                .collect();
            // While `full` is running its phases cannot be stopped one at a
            // time (the host would restart them); stopping `full` clears
            // every flag.
            if mode != Mode::Full && modes.contains(&Mode::Full) {
                bail!("mode full covers {mode} for '{tenant}'; stop it with --mode full");
            }
            let stopping: Vec<Mode> = if mode == Mode::Full {
                modes
            } else if modes.contains(&mode) {
                vec![mode]
            } else {
                Vec::new()
            };
            if stopping.is_empty() {
                println!("ℹ️ Mode {mode} is not running for '{tenant}'");
                std::process::exit(EXIT_NOT_RUNNING);
            }
            for m in stopping {
                store.clear_desired_mode(tenant, m)?;
            }
            println!("⏹️ Mode {mode} stopped for '{tenant}'");
        }

        Command::Status { tenant } => {
            let Some(t) = store.get_tenant(tenant)? else {
                bail!("tenant '{tenant}' not found");
            };
            let now = chrono::Utc::now();
            let stats = StatsAggregator::new(store.clone());
            let today = stats.today(&t, now)?;
            let modes: Vec<String> = store
                .desired_modes()?
                .into_iter()
                .filter(|(id, _)| id == tenant)
                .map(|(_, m)| m.to_string())
                .collect();

            println!("📬 OutPost status for '{}' ({})", t.id, t.name);
            println!("   Running modes: {}", if modes.is_empty() { "none".into() } else { modes.join(", ") });
            println!(
                "   Today: collected {}, generated {}, published {}, bounced {}",
                today.collected, today.generated, today.published, today.bounced
            );
            println!(
                "   Pipeline: {} draft, {} approved, {} dispatched",
                store.count_tasks_in_state(tenant, TaskState::Draft)?,
                store.count_tasks_in_state(tenant, TaskState::Approved)?,
                store.count_tasks_in_state(tenant, TaskState::Dispatched)?,
            );
            println!(
                "   Failed today: {}",
                store.count_failed_since(tenant, local_day_start_utc(&t, now))?
            );
        }

        Command::RunOnce { tenant, phase } => {
            let phase = parse_phase(phase)?;
            let engine = build_engine(store, config);
            let report = engine.run_once(tenant, phase).await?;
            if report.skipped {
                println!("🧯 {phase} step skipped: daily cap reached");
            } else {
                println!("✅ {phase} step done: {} item(s) processed", report.processed);
            }
        }

        Command::Run { poll_secs } => {
            let engine = build_engine(store, config);
            let restored = engine.recover().await?;
            if restored > 0 {
                println!("🔁 Restored {restored} mode(s) from persisted state");
            }
            println!("📬 OutPost running; Ctrl-C to stop");

            let mut poll = tokio::time::interval(Duration::from_secs((*poll_secs).max(1)));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = poll.tick() => {
                        if let Err(e) = engine.reconcile().await {
                            tracing::warn!("⚠️ Reconcile failed: {e}");
                        }
                    }
                }
            }
            println!("\n👋 Shutting down…");
            engine.shutdown().await;
        }
    }
    Ok(())
}
