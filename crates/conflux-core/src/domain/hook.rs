//! Interception hook definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When a hook runs relative to the backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookType {
    #[default]
    Pre,
    Post,
    Both,
}

/// Phase of an invocation in which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Pre,
    Post,
}

impl HookType {
    /// Whether a hook of this type participates in `phase`.
    pub const fn runs_in(self, phase: HookPhase) -> bool {
        matches!(
            (self, phase),
            (Self::Both, _) | (Self::Pre, HookPhase::Pre) | (Self::Post, HookPhase::Post)
        )
    }
}

/// A persisted hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ascending; ties broken by `created_at`.
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default)]
    pub hook_type: HookType,
    /// Source of the hook rule script.
    pub script: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

const fn default_enabled() -> bool {
    true
}

/// A hook to be created (no id or timestamps yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHook {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default)]
    pub hook_type: HookType,
    pub script: String,
}

impl NewHook {
    pub fn new(name: impl Into<String>, hook_type: HookType, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            execution_order: 0,
            hook_type,
            script: script.into(),
        }
    }

    #[must_use]
    pub const fn with_order(mut self, execution_order: i32) -> Self {
        self.execution_order = execution_order;
        self
    }
}

/// Sort hooks into execution order.
pub fn sort_hooks(hooks: &mut [Hook]) {
    hooks.sort_by(|a, b| {
        a.execution_order
            .cmp(&b.execution_order)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn hook(id: &str, order: i32, created_at: DateTime<Utc>) -> Hook {
        Hook {
            id: id.into(),
            name: id.into(),
            description: None,
            enabled: true,
            execution_order: order,
            hook_type: HookType::Pre,
            script: String::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_sort_by_order_then_creation() {
        let t0 = Utc::now();
        let mut hooks = vec![
            hook("late-tie", 1, t0 + Duration::seconds(5)),
            hook("second", 1, t0),
            hook("first", 0, t0 + Duration::seconds(10)),
        ];
        sort_hooks(&mut hooks);
        let ids: Vec<_> = hooks.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["first", "second", "late-tie"]);
    }

    #[test]
    fn test_hook_type_phases() {
        assert!(HookType::Both.runs_in(HookPhase::Pre));
        assert!(HookType::Both.runs_in(HookPhase::Post));
        assert!(!HookType::Pre.runs_in(HookPhase::Post));
        assert!(!HookType::Post.runs_in(HookPhase::Pre));
    }
}
