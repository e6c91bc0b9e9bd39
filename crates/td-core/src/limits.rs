//! WIP limit and automation-toggle resolution.
//!
//! Each field resolves independently through three tiers: workspace
//! override, global configured default, built-in constant. The resolver is
//! pure and must be called fresh on every capacity check so a settings
//! change takes effect on the next tick.

use serde::{Deserialize, Serialize};

use crate::types::TaskPhase;

/// Built-in fallback for the `ready` phase limit.
pub const BUILTIN_READY_LIMIT: u32 = 25;
/// Built-in fallback for the `executing` phase limit.
pub const BUILTIN_EXECUTING_LIMIT: u32 = 1;

// ---------------------------------------------------------------------------
// Tier inputs
// ---------------------------------------------------------------------------

/// Global workflow defaults, the `[workflow]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    #[serde(default)]
    pub ready_limit: Option<i64>,
    #[serde(default)]
    pub executing_limit: Option<i64>,
    #[serde(default)]
    pub backlog_to_ready: Option<bool>,
    #[serde(default)]
    pub ready_to_executing: Option<bool>,
}

/// Per-workspace overrides. Same shape as the defaults; absent fields
/// fall through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceOverrides {
    #[serde(default)]
    pub ready_limit: Option<i64>,
    #[serde(default)]
    pub executing_limit: Option<i64>,
    #[serde(default)]
    pub backlog_to_ready: Option<bool>,
    #[serde(default)]
    pub ready_to_executing: Option<bool>,
}

// ---------------------------------------------------------------------------
// EffectiveSettings
// ---------------------------------------------------------------------------

/// One immutable resolution of the three tiers. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub ready_limit: Option<u32>,
    pub executing_limit: Option<u32>,
    pub backlog_to_ready: bool,
    pub ready_to_executing: bool,
}

impl EffectiveSettings {
    /// The effective limit for a phase.
    ///
    /// Only `ready` and `executing` resolve through the tier chain; the
    /// remaining phases are unlimited.
    pub fn limit_for(&self, phase: TaskPhase) -> Option<u32> {
        match phase {
            TaskPhase::Ready => self.ready_limit,
            TaskPhase::Executing => self.executing_limit,
            TaskPhase::Backlog | TaskPhase::Complete | TaskPhase::Archived => None,
        }
    }

    /// Whether another task fits into `phase` given the current occupancy.
    pub fn has_capacity(&self, phase: TaskPhase, current_count: usize) -> bool {
        match self.limit_for(phase) {
            Some(limit) => current_count < limit as usize,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

/// Merge the three tiers into one effective settings value.
pub fn resolve(globals: &WorkflowDefaults, overrides: &WorkspaceOverrides) -> EffectiveSettings {
    EffectiveSettings {
        ready_limit: resolve_limit(
            overrides.ready_limit,
            globals.ready_limit,
            Some(BUILTIN_READY_LIMIT),
        ),
        executing_limit: resolve_limit(
            overrides.executing_limit,
            globals.executing_limit,
            Some(BUILTIN_EXECUTING_LIMIT),
        ),
        backlog_to_ready: overrides
            .backlog_to_ready
            .or(globals.backlog_to_ready)
            .unwrap_or(false),
        ready_to_executing: overrides
            .ready_to_executing
            .or(globals.ready_to_executing)
            .unwrap_or(false),
    }
}

/// A limit candidate is valid only when strictly positive; zero and
/// negative values fall through to the next tier. Unlimited is expressed
/// by absence, never by zero.
fn resolve_limit(overridden: Option<i64>, global: Option<i64>, builtin: Option<u32>) -> Option<u32> {
    valid_limit(overridden)
        .or_else(|| valid_limit(global))
        .or(builtin)
}

fn valid_limit(candidate: Option<i64>) -> Option<u32> {
    match candidate {
        Some(v) if v > 0 => u32::try_from(v).ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_apply_when_nothing_configured() {
        let eff = resolve(&WorkflowDefaults::default(), &WorkspaceOverrides::default());
        assert_eq!(eff.ready_limit, Some(BUILTIN_READY_LIMIT));
        assert_eq!(eff.executing_limit, Some(BUILTIN_EXECUTING_LIMIT));
        assert!(!eff.backlog_to_ready);
        assert!(!eff.ready_to_executing);
    }

    #[test]
    fn override_beats_global_beats_builtin() {
        let globals = WorkflowDefaults {
            ready_limit: Some(10),
            executing_limit: Some(2),
            ..Default::default()
        };
        let overrides = WorkspaceOverrides {
            ready_limit: Some(5),
            ..Default::default()
        };
        let eff = resolve(&globals, &overrides);
        assert_eq!(eff.ready_limit, Some(5));
        assert_eq!(eff.executing_limit, Some(2));
    }

    #[test]
    fn zero_and_negative_fall_through() {
        let globals = WorkflowDefaults {
            ready_limit: Some(0),
            executing_limit: Some(-3),
            ..Default::default()
        };
        let overrides = WorkspaceOverrides {
            ready_limit: Some(-1),
            ..Default::default()
        };
        let eff = resolve(&globals, &overrides);
        // Every configured tier is invalid, so both land on the built-ins.
        assert_eq!(eff.ready_limit, Some(BUILTIN_READY_LIMIT));
        assert_eq!(eff.executing_limit, Some(BUILTIN_EXECUTING_LIMIT));
    }

    #[test]
    fn toggles_resolve_independently() {
        let globals = WorkflowDefaults {
            backlog_to_ready: Some(true),
            ..Default::default()
        };
        let overrides = WorkspaceOverrides {
            ready_to_executing: Some(true),
            backlog_to_ready: Some(false),
            ..Default::default()
        };
        let eff = resolve(&globals, &overrides);
        assert!(!eff.backlog_to_ready, "override false beats global true");
        assert!(eff.ready_to_executing);
    }

    #[test]
    fn capacity_checks() {
        let eff = EffectiveSettings {
            ready_limit: Some(2),
            executing_limit: Some(1),
            backlog_to_ready: true,
            ready_to_executing: true,
        };
        assert!(eff.has_capacity(TaskPhase::Ready, 1));
        assert!(!eff.has_capacity(TaskPhase::Ready, 2));
        assert!(!eff.has_capacity(TaskPhase::Executing, 1));
        // Unlimited phases always have room.
        assert!(eff.has_capacity(TaskPhase::Backlog, 10_000));
        assert!(eff.has_capacity(TaskPhase::Complete, 10_000));
    }

    #[test]
    fn zero_executing_limit_pauses_dispatch() {
        // Config tiers reject 0, but the engine must still behave when a
        // zero limit is injected programmatically.
        let eff = EffectiveSettings {
            ready_limit: None,
            executing_limit: Some(0),
            backlog_to_ready: false,
            ready_to_executing: true,
        };
        assert!(!eff.has_capacity(TaskPhase::Executing, 0));
    }

    #[test]
    fn other_phases_are_unlimited() {
        let eff = resolve(&WorkflowDefaults::default(), &WorkspaceOverrides::default());
        assert_eq!(eff.limit_for(TaskPhase::Backlog), None);
        assert_eq!(eff.limit_for(TaskPhase::Complete), None);
        assert_eq!(eff.limit_for(TaskPhase::Archived), None);
    }
}
