//! OutPost configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutPostConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_db_path() -> String { "~/.outpost/outpost.db".into() }

impl Default for OutPostConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            automation: AutomationConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl OutPostConfig {
    /// Load config from the default path (~/.outpost/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::OutPostError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::OutPostError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::OutPostError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outpost")
            .join("config.toml")
    }

    /// Get the OutPost home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outpost")
    }
}

/// Phase loop timing. Distinct intervals reflect distinct costs: collection
/// is expensive upstream, generation is LLM-bound, posting must look
/// human-paced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Base interval between collect steps.
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,
    /// Base interval between generate steps.
    #[serde(default = "default_generate_interval")]
    pub generate_interval_secs: u64,
    /// Base interval between post steps.
    #[serde(default = "default_post_interval")]
    pub post_interval_secs: u64,
    /// Jitter applied to every interval, as a percentage of the base.
    /// Obscures periodic automation signatures.
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: u8,
    /// Max items handled in one job step.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Randomized pause bounds after a successful publish.
    #[serde(default = "default_pause_min")]
    pub post_success_pause_min_secs: u64,
    #[serde(default = "default_pause_max")]
    pub post_success_pause_max_secs: u64,
    /// Randomized delay bounds between items within a post batch.
    #[serde(default = "default_item_delay_min")]
    pub item_delay_min_secs: u64,
    #[serde(default = "default_item_delay_max")]
    pub item_delay_max_secs: u64,
    /// Timeout applied to every external capability call.
    #[serde(default = "default_capability_timeout")]
    pub capability_timeout_secs: u64,
    /// Back-off after an unexpected error at the loop boundary.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    /// Recheck interval while outside the tenant's working hours.
    #[serde(default = "default_offhours_recheck")]
    pub offhours_recheck_secs: u64,
}

fn default_collect_interval() -> u64 { 2700 }
fn default_generate_interval() -> u64 { 600 }
fn default_post_interval() -> u64 { 900 }
fn default_jitter_pct() -> u8 { 15 }
fn default_batch_size() -> usize { 10 }
fn default_pause_min() -> u64 { 600 }
fn default_pause_max() -> u64 { 1200 }
fn default_item_delay_min() -> u64 { 30 }
fn default_item_delay_max() -> u64 { 120 }
fn default_capability_timeout() -> u64 { 120 }
fn default_error_backoff() -> u64 { 60 }
fn default_offhours_recheck() -> u64 { 60 }

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            collect_interval_secs: default_collect_interval(),
            generate_interval_secs: default_generate_interval(),
            post_interval_secs: default_post_interval(),
            jitter_pct: default_jitter_pct(),
            batch_size: default_batch_size(),
            post_success_pause_min_secs: default_pause_min(),
            post_success_pause_max_secs: default_pause_max(),
            item_delay_min_secs: default_item_delay_min(),
            item_delay_max_secs: default_item_delay_max(),
            capability_timeout_secs: default_capability_timeout(),
            error_backoff_secs: default_error_backoff(),
            offhours_recheck_secs: default_offhours_recheck(),
        }
    }
}

impl AutomationConfig {
    /// Interval for a given phase.
    pub fn interval_secs(&self, phase: crate::types::Phase) -> u64 {
        match phase {
            crate::types::Phase::Collect => self.collect_interval_secs,
            crate::types::Phase::Generate => self.generate_interval_secs,
            crate::types::Phase::Post => self.post_interval_secs,
        }
    }
}

/// Default limits applied where a tenant has no explicit setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Tenant-wide daily action cap regardless of account mix.
    #[serde(default = "default_tenant_daily_cap")]
    pub tenant_daily_cap: u32,
    /// Tenant-wide rolling-hour action cap.
    #[serde(default = "default_tenant_hourly_cap")]
    pub tenant_hourly_cap: u32,
    /// Minimum seconds between actions by the same account.
    #[serde(default = "default_account_min_interval")]
    pub account_min_interval_secs: u32,
    /// Minimum seconds between tenant-level campaign batch sends.
    #[serde(default = "default_batch_min_interval")]
    pub batch_min_interval_secs: u32,
    /// Length of the warm-up ramp in days.
    #[serde(default = "default_warmup_days")]
    pub warmup_ramp_days: u32,
}

fn default_tenant_daily_cap() -> u32 { 50 }
fn default_tenant_hourly_cap() -> u32 { 10 }
fn default_account_min_interval() -> u32 { 120 }
fn default_batch_min_interval() -> u32 { 300 }
fn default_warmup_days() -> u32 { 7 }

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            tenant_daily_cap: default_tenant_daily_cap(),
            tenant_hourly_cap: default_tenant_hourly_cap(),
            account_min_interval_secs: default_account_min_interval(),
            batch_min_interval_secs: default_batch_min_interval(),
            warmup_ramp_days: default_warmup_days(),
        }
    }
}
