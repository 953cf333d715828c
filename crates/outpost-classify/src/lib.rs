//! Outcome Classifier: maps a raw publish/send failure signal into a closed
//! taxonomy and applies the invalidation side effects.
//!
//! Classification is pure string-pattern matching against an ordered rule
//! list: first match wins, and hard-bounce patterns are checked before
//! soft-bounce patterns so a numeric SMTP code is never swallowed by a
//! broader pattern. The function is total; every input maps to exactly one
//! outcome, defaulting to the conservative `Unknown`/soft path. A failure is
//! never silently dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use outpost_core::error::{OutPostError, Result};
use outpost_core::types::{AccountStatus, TargetStatus};
use outpost_store::StateDb;

/// The closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Permanent delivery failure; never retry this contact.
    HardBounce,
    /// Transient delivery failure; retry after cool-down.
    SoftBounce,
    /// Login/authentication failure; quarantine the account.
    AuthError,
    /// Upstream throttling; defer to the next scheduler tick.
    RateLimited,
    /// Timeout / connection failure; retry with backoff.
    NetworkError,
    /// Unmatched signal; treated like a soft bounce.
    Unknown,
}

impl Outcome {
    /// Permanent outcomes invalidate the item they hit; transient ones retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Outcome::HardBounce | Outcome::AuthError)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::HardBounce => write!(f, "hard_bounce"),
            Outcome::SoftBounce => write!(f, "soft_bounce"),
            Outcome::AuthError => write!(f, "auth_error"),
            Outcome::RateLimited => write!(f, "rate_limited"),
            Outcome::NetworkError => write!(f, "network_error"),
            Outcome::Unknown => write!(f, "unknown"),
        }
    }
}

/// Ordered rule list. Matching order is a contract, not an accident:
/// hard-bounce codes come first, then auth, throttling, network, and the
/// soft-bounce catch-alls last.
const RULES: &[(&str, Outcome)] = &[
    // Hard bounces (SMTP 55x and permanent wording)
    ("user unknown", Outcome::HardBounce),
    ("no such user", Outcome::HardBounce),
    ("address rejected", Outcome::HardBounce),
    ("recipient rejected", Outcome::HardBounce),
    ("does not exist", Outcome::HardBounce),
    ("invalid recipient", Outcome::HardBounce),
    ("550", Outcome::HardBounce),
    ("551", Outcome::HardBounce),
    ("553", Outcome::HardBounce),
    // Authentication
    ("authentication failed", Outcome::AuthError),
    ("auth failed", Outcome::AuthError),
    ("login failed", Outcome::AuthError),
    ("invalid credentials", Outcome::AuthError),
    ("password", Outcome::AuthError),
    ("535", Outcome::AuthError),
    // Upstream throttling
    ("429", Outcome::RateLimited),
    ("too many", Outcome::RateLimited),
    ("rate limit", Outcome::RateLimited),
    // Network
    ("timeout", Outcome::NetworkError),
    ("timed out", Outcome::NetworkError),
    ("connection refused", Outcome::NetworkError),
    ("connection reset", Outcome::NetworkError),
    ("unreachable", Outcome::NetworkError),
    ("dns", Outcome::NetworkError),
    // Soft bounces
    ("mailbox full", Outcome::SoftBounce),
    ("quota", Outcome::SoftBounce),
    ("try again", Outcome::SoftBounce),
    ("temporarily", Outcome::SoftBounce),
    ("421", Outcome::SoftBounce),
    ("450", Outcome::SoftBounce),
    ("452", Outcome::SoftBounce),
];

/// Soft bounces at or above this count invalidate the channel.
const SOFT_BOUNCE_THRESHOLD: u32 = 3;

/// Classify a raw failure signal. Total over all inputs; unmatched text
/// (including the empty string) resolves to `Unknown`.
pub fn classify(raw: &str) -> (Outcome, bool) {
    let lower = raw.to_lowercase();
    for (pattern, outcome) in RULES {
        if lower.contains(pattern) {
            return (*outcome, outcome.is_permanent());
        }
    }
    (Outcome::Unknown, false)
}

/// Side effects applied by [`OutcomeClassifier::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    pub channel_invalidated: bool,
    pub target_invalidated: bool,
    /// ID of the sibling channel promoted to primary, if any.
    pub promoted_channel: Option<String>,
    pub account_quarantined: bool,
    pub bounce_recorded: bool,
}

/// Applies classification side effects against the state store.
pub struct OutcomeClassifier {
    store: Arc<StateDb>,
}

impl OutcomeClassifier {
    pub fn new(store: Arc<StateDb>) -> Self {
        Self { store }
    }

    /// Apply the side effects of an outcome to an account and (for email)
    /// the contact channel the attempt went through.
    pub fn apply(
        &self,
        outcome: Outcome,
        account_id: &str,
        channel_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SideEffects> {
        let mut effects = SideEffects::default();
        match outcome {
            Outcome::HardBounce => {
                if let Some(ch_id) = channel_id {
                    self.invalidate_channel(ch_id, &mut effects)?;
                }
            }
            Outcome::SoftBounce | Outcome::Unknown => {
                if let Some(ch_id) = channel_id {
                    self.record_soft_bounce(ch_id, now, &mut effects)?;
                }
            }
            Outcome::AuthError => {
                let mut account = self
                    .store
                    .get_account(account_id)?
                    .ok_or_else(|| OutPostError::NotFound(format!("account {account_id}")))?;
                if account.status != AccountStatus::Error {
                    account.status = AccountStatus::Error;
                    self.store.save_account(&account)?;
                    tracing::warn!("🔒 Account quarantined (auth failure): {}", account.id);
                }
                effects.account_quarantined = true;
            }
            Outcome::RateLimited | Outcome::NetworkError => {
                // Retry on a later tick; no state change.
            }
        }
        Ok(effects)
    }

    /// Invalidate a channel. Idempotent: a second invalidation of the same
    /// channel changes nothing and applies no further side effects.
    fn invalidate_channel(&self, channel_id: &str, effects: &mut SideEffects) -> Result<()> {
        let mut channel = self
            .store
            .get_channel(channel_id)?
            .ok_or_else(|| OutPostError::NotFound(format!("channel {channel_id}")))?;
        if !channel.is_verified && !channel.is_primary {
            return Ok(());
        }

        channel.is_verified = false;
        channel.is_primary = false;
        self.store.save_channel(&channel)?;
        effects.channel_invalidated = true;
        tracing::info!("📪 Channel invalidated: {} ({})", channel.id, channel.address);

        // Promote the next valid sibling, or mark the whole target invalid.
        let siblings = self.store.channels_for_target(&channel.target_id)?;
        let next_valid = siblings.iter().find(|c| c.is_verified && c.id != channel.id);
        match next_valid {
            Some(next) => {
                if !next.is_primary {
                    let mut promoted = next.clone();
                    promoted.is_primary = true;
                    self.store.save_channel(&promoted)?;
                    effects.promoted_channel = Some(promoted.id);
                }
            }
            None => {
                if let Some(mut target) = self.store.get_target(&channel.target_id)? {
                    if target.status != TargetStatus::Invalid {
                        target.status = TargetStatus::Invalid;
                        self.store.save_target(&target)?;
                        tracing::warn!("❌ Target invalidated (no valid channels): {}", target.id);
                    }
                    effects.target_invalidated = true;
                }
            }
        }
        Ok(())
    }

    fn record_soft_bounce(
        &self,
        channel_id: &str,
        now: DateTime<Utc>,
        effects: &mut SideEffects,
    ) -> Result<()> {
        let mut channel = self
            .store
            .get_channel(channel_id)?
            .ok_or_else(|| OutPostError::NotFound(format!("channel {channel_id}")))?;
        channel.bounce_count += 1;
        channel.last_bounce_at = Some(now);
        self.store.save_channel(&channel)?;
        effects.bounce_recorded = true;

        if channel.bounce_count >= SOFT_BOUNCE_THRESHOLD {
            tracing::info!(
                "📉 Channel {} reached {} soft bounces; invalidating",
                channel.id,
                channel.bounce_count
            );
            self.invalidate_channel(channel_id, effects)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::types::{Account, ActionCounts, ContactChannel, Surface, TargetSite};

    #[test]
    fn test_classifier_totality() {
        for input in ["", "weird gibberish", "☃", "550", "ok then"] {
            let (outcome, _) = classify(input);
            // Must always land inside the taxonomy.
            let _ = outcome.to_string();
        }
        assert_eq!(classify("").0, Outcome::Unknown);
        assert_eq!(classify("complete nonsense").0, Outcome::Unknown);
    }

    #[test]
    fn test_hard_bounce_classification() {
        let (outcome, permanent) = classify("550 5.1.1 user unknown");
        assert_eq!(outcome, Outcome::HardBounce);
        assert!(permanent);
        assert_eq!(classify("Address Rejected: gone").0, Outcome::HardBounce);
    }

    #[test]
    fn test_hard_checked_before_soft() {
        // Contains both a hard code and a soft phrase; hard must win.
        let (outcome, _) = classify("550 mailbox full");
        assert_eq!(outcome, Outcome::HardBounce);
    }

    #[test]
    fn test_transient_classes() {
        assert_eq!(classify("421 service busy, try later").0, Outcome::SoftBounce);
        assert_eq!(classify("429 too many requests").0, Outcome::RateLimited);
        assert_eq!(classify("connection refused").0, Outcome::NetworkError);
        assert_eq!(classify("operation timed out").0, Outcome::NetworkError);
        assert!(!classify("timeout").1);
    }

    #[test]
    fn test_auth_error() {
        let (outcome, permanent) = classify("535 authentication failed");
        assert_eq!(outcome, Outcome::AuthError);
        assert!(permanent);
    }

    fn setup() -> (Arc<StateDb>, OutcomeClassifier) {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        (store.clone(), OutcomeClassifier::new(store))
    }

    fn seed_target_with_channels(store: &StateDb, n: usize) -> (TargetSite, Vec<ContactChannel>) {
        let target = TargetSite::new("t1", Surface::Email, "contact");
        store.save_target(&target).unwrap();
        let mut channels = Vec::new();
        for i in 0..n {
            let ch = ContactChannel::new("t1", &target.id, &format!("addr{i}@x.com"), i == 0);
            store.save_channel(&ch).unwrap();
            channels.push(ch);
        }
        (target, channels)
    }

    #[test]
    fn test_hard_bounce_promotes_next_channel() {
        let (store, classifier) = setup();
        let account = Account::new("t1", Surface::Email, "sender", ActionCounts::uniform(10));
        store.save_account(&account).unwrap();
        let (target, channels) = seed_target_with_channels(&store, 2);

        let effects = classifier
            .apply(Outcome::HardBounce, &account.id, Some(&channels[0].id), Utc::now())
            .unwrap();
        assert!(effects.channel_invalidated);
        assert!(!effects.target_invalidated);
        assert_eq!(effects.promoted_channel.as_deref(), Some(channels[1].id.as_str()));

        let first = store.get_channel(&channels[0].id).unwrap().unwrap();
        assert!(!first.is_verified && !first.is_primary);
        let second = store.get_channel(&channels[1].id).unwrap().unwrap();
        assert!(second.is_primary);
        let target = store.get_target(&target.id).unwrap().unwrap();
        assert_eq!(target.status, TargetStatus::Active);
    }

    #[test]
    fn test_hard_bounce_last_channel_invalidates_target() {
        let (store, classifier) = setup();
        let account = Account::new("t1", Surface::Email, "sender", ActionCounts::uniform(10));
        store.save_account(&account).unwrap();
        let (target, channels) = seed_target_with_channels(&store, 1);

        let effects = classifier
            .apply(Outcome::HardBounce, &account.id, Some(&channels[0].id), Utc::now())
            .unwrap();
        assert!(effects.channel_invalidated);
        assert!(effects.target_invalidated);

        let ch = store.get_channel(&channels[0].id).unwrap().unwrap();
        assert!(!ch.is_verified);
        let target = store.get_target(&target.id).unwrap().unwrap();
        assert_eq!(target.status, TargetStatus::Invalid);
    }

    #[test]
    fn test_hard_bounce_idempotent() {
        let (store, classifier) = setup();
        let account = Account::new("t1", Surface::Email, "sender", ActionCounts::uniform(10));
        store.save_account(&account).unwrap();
        let (_, channels) = seed_target_with_channels(&store, 1);

        let first = classifier
            .apply(Outcome::HardBounce, &account.id, Some(&channels[0].id), Utc::now())
            .unwrap();
        assert!(first.channel_invalidated);

        // Second invalidation is a no-op: no effects, no error.
        let second = classifier
            .apply(Outcome::HardBounce, &account.id, Some(&channels[0].id), Utc::now())
            .unwrap();
        assert_eq!(second, SideEffects::default());
    }

    #[test]
    fn test_soft_bounce_threshold() {
        let (store, classifier) = setup();
        let account = Account::new("t1", Surface::Email, "sender", ActionCounts::uniform(10));
        store.save_account(&account).unwrap();
        let (target, channels) = seed_target_with_channels(&store, 1);
        let now = Utc::now();

        for _ in 0..2 {
            let fx = classifier
                .apply(Outcome::SoftBounce, &account.id, Some(&channels[0].id), now)
                .unwrap();
            assert!(fx.bounce_recorded);
            assert!(!fx.channel_invalidated);
        }
        // Third soft bounce crosses the threshold.
        let fx = classifier
            .apply(Outcome::SoftBounce, &account.id, Some(&channels[0].id), now)
            .unwrap();
        assert!(fx.channel_invalidated);
        let target = store.get_target(&target.id).unwrap().unwrap();
        assert_eq!(target.status, TargetStatus::Invalid);
    }

    #[test]
    fn test_auth_error_quarantines_account() {
        let (store, classifier) = setup();
        let account = Account::new("t1", Surface::Email, "sender", ActionCounts::uniform(10));
        store.save_account(&account).unwrap();

        let fx = classifier
            .apply(Outcome::AuthError, &account.id, None, Utc::now())
            .unwrap();
        assert!(fx.account_quarantined);
        let acct = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(acct.status, AccountStatus::Error);
    }

    #[test]
    fn test_network_and_rate_limited_change_nothing() {
        let (store, classifier) = setup();
        let account = Account::new("t1", Surface::Email, "sender", ActionCounts::uniform(10));
        store.save_account(&account).unwrap();
        let (_, channels) = seed_target_with_channels(&store, 1);

        for outcome in [Outcome::NetworkError, Outcome::RateLimited] {
            let fx = classifier
                .apply(outcome, &account.id, Some(&channels[0].id), Utc::now())
                .unwrap();
            assert_eq!(fx, SideEffects::default());
        }
        let ch = store.get_channel(&channels[0].id).unwrap().unwrap();
        assert!(ch.is_verified);
        assert_eq!(ch.bounce_count, 0);
    }
}
