use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use td_core::types::FailureCategory;

// ---------------------------------------------------------------------------
// BreakerKey
// ---------------------------------------------------------------------------

/// Identity of one tracked breaker: a (provider, model, category) triple.
///
/// Categories are tracked separately so an expired rate-limit cooldown
/// never forgives an auth failure on the same model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakerKey {
    pub provider: String,
    pub model_id: String,
    pub category: FailureCategory,
}

impl BreakerKey {
    pub fn new(
        provider: impl Into<String>,
        model_id: impl Into<String>,
        category: FailureCategory,
    ) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            category,
        }
    }
}

impl std::fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.provider, self.model_id, self.category)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before a key opens.
    pub failure_threshold: u32,
    /// How long an open key blocks dispatch before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BreakerEntry {
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    retry_at: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            failure_count: 0,
            opened_at: None,
            retry_at: None,
        }
    }

    fn is_open(&self, now: Instant) -> bool {
        matches!(self.retry_at, Some(retry_at) if now < retry_at)
    }
}

// ---------------------------------------------------------------------------
// BreakerStatus (read model)
// ---------------------------------------------------------------------------

/// Snapshot of one tracked key, for the queue-status read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub provider: String,
    pub model_id: String,
    pub category: FailureCategory,
    pub failure_count: u32,
    pub open: bool,
    pub opened_at: Option<DateTime<Utc>>,
    /// Milliseconds until a probe is allowed, when open.
    pub retry_in_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// ExecutionBreaker
// ---------------------------------------------------------------------------

/// Keyed circuit breaker shared by every workspace loop.
///
/// Entries are created lazily on first failure. All mutation goes through
/// the dashmap entry API, so two workspaces racing on the same key cannot
/// corrupt the failure count. State is not persisted across restarts;
/// breakers rebuild from live failures within one cooldown window.
#[derive(Debug)]
pub struct ExecutionBreaker {
    config: BreakerConfig,
    entries: DashMap<BreakerKey, BreakerEntry>,
}

impl ExecutionBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Record a categorized failure for the key.
    ///
    /// Returns `true` when this call transitioned the key from closed to
    /// open, so the caller can emit a breaker-changed event exactly once.
    /// A failure on an already-open key (a failed post-cooldown probe)
    /// pushes `retry_at` forward from now without resetting the count.
    pub fn record_failure(&self, key: &BreakerKey) -> bool {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(BreakerEntry::new);

        let was_open = entry.is_open(now);
        entry.failure_count += 1;

        if entry.failure_count >= self.config.failure_threshold {
            entry.retry_at = Some(now + self.config.cooldown);
            if entry.opened_at.is_none() {
                entry.opened_at = Some(Utc::now());
            }
            if !was_open {
                warn!(
                    breaker = %key,
                    failures = entry.failure_count,
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    "execution breaker opened"
                );
                return true;
            }
            debug!(breaker = %key, failures = entry.failure_count, "open breaker re-armed");
        } else {
            debug!(breaker = %key, failures = entry.failure_count, "failure recorded");
        }
        false
    }

    /// Record a success: the key is cleared entirely and tracking restarts
    /// from zero on the next failure.
    ///
    /// Returns `true` when the key was open (or cooling down) before the
    /// success, i.e. when the breaker just closed.
    pub fn record_success(&self, key: &BreakerKey) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                let was_tracking = entry.retry_at.is_some();
                if was_tracking {
                    info!(breaker = %key, "execution breaker closed after success");
                }
                was_tracking
            }
            None => false,
        }
    }

    /// True while the key's cooldown has not elapsed.
    ///
    /// Once `retry_at` passes this returns `false` without mutating state:
    /// the next attempt is the half-open probe, and only its outcome moves
    /// the breaker (success clears it, failure re-arms the cooldown).
    pub fn is_open(&self, key: &BreakerKey) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|entry| entry.is_open(now))
            .unwrap_or(false)
    }

    /// Current failure count for the key (0 when untracked).
    pub fn failure_count(&self, key: &BreakerKey) -> u32 {
        self.entries
            .get(key)
            .map(|entry| entry.failure_count)
            .unwrap_or(0)
    }

    /// Every tracked key with its live state, for observability.
    pub fn snapshot(&self) -> Vec<BreakerStatus> {
        let now = Instant::now();
        let mut statuses: Vec<BreakerStatus> = self
            .entries
            .iter()
            .map(|item| {
                let key = item.key();
                let entry = item.value();
                let open = entry.is_open(now);
                BreakerStatus {
                    provider: key.provider.clone(),
                    model_id: key.model_id.clone(),
                    category: key.category,
                    failure_count: entry.failure_count,
                    open,
                    opened_at: entry.opened_at,
                    retry_in_ms: entry.retry_at.and_then(|retry_at| {
                        if open {
                            Some(retry_at.saturating_duration_since(now).as_millis() as u64)
                        } else {
                            None
                        }
                    }),
                }
            })
            .collect();
        statuses.sort_by(|a, b| {
            (&a.provider, &a.model_id)
                .cmp(&(&b.provider, &b.model_id))
                .then(a.category.to_string().cmp(&b.category.to_string()))
        });
        statuses
    }

    /// Only the keys currently open, for the queue-status read model.
    pub fn open_breakers(&self) -> Vec<BreakerStatus> {
        self.snapshot().into_iter().filter(|s| s.open).collect()
    }
}

impl Default for ExecutionBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
