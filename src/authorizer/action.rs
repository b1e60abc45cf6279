//! Protected actions
//!
//! An `Action` names an operation the authority has a policy for. Some actions
//! target a user principal and ship two extra ids: one used when the caller
//! acts on their own account, one used when it acts on somebody else's.
//!
//! ```text
//! Action { id: "set-policy", self_id: "set-policy.self", other_id: "set-policy.other" }
//!
//!   caller uid 1000, target uid 1000  ──►  "set-policy.self"
//!   caller uid 1000, target uid  999  ──►  "set-policy.other"
//!   caller uid 1000, no target        ──►  "set-policy.other"
//! ```

use std::borrow::Cow;
use std::fmt;

/// Reserved id of the action every caller may perform.
pub const ALWAYS_ALLOWED_ID: &str = "polgate.always-allowed";

/// Sentinel action granted to everyone without asking the authority.
pub const ACTION_ALWAYS_ALLOWED: Action = Action::new(ALWAYS_ALLOWED_ID);

/// A protected operation, as known by the authority
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action {
    id: Cow<'static, str>,
    self_id: Option<Cow<'static, str>>,
    other_id: Option<Cow<'static, str>>,
}

impl Action {
    /// Plain action: the authority is always asked about `id`.
    pub const fn new(id: &'static str) -> Self {
        Self {
            id: Cow::Borrowed(id),
            self_id: None,
            other_id: None,
        }
    }

    /// Action targeting a user principal.
    pub const fn with_variants(
        id: &'static str,
        self_id: &'static str,
        other_id: &'static str,
    ) -> Self {
        Self {
            id: Cow::Borrowed(id),
            self_id: Some(Cow::Borrowed(self_id)),
            other_id: Some(Cow::Borrowed(other_id)),
        }
    }

    /// Plain action built at runtime (e.g. from command line input).
    pub fn owned(id: impl Into<String>) -> Self {
        Self {
            id: Cow::Owned(id.into()),
            self_id: None,
            other_id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    pub fn other_id(&self) -> Option<&str> {
        self.other_id.as_deref()
    }

    /// Whether the effective id depends on the targeted user.
    pub fn has_variants(&self) -> bool {
        self.self_id.is_some() || self.other_id.is_some()
    }

    /// Pick the id to present to the authority.
    ///
    /// `target_uid` is the user the call acts on, if any. A missing target is
    /// treated as acting on another principal.
    pub fn resolve_id(&self, caller_uid: u32, target_uid: Option<u32>) -> &str {
        if !self.has_variants() {
            return &self.id;
        }

        let variant = if target_uid == Some(caller_uid) {
            self.self_id.as_deref()
        } else {
            self.other_id.as_deref()
        };

        variant.unwrap_or(&self.id)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_ACTION: Action = Action::with_variants("UserOtherActionID", "Self", "Other");

    #[test]
    fn test_plain_action_always_uses_base_id() {
        let action = Action::new("simpleAction");
        assert!(!action.has_variants());
        assert_eq!(action.resolve_id(1000, Some(1000)), "simpleAction");
        assert_eq!(action.resolve_id(1000, Some(999)), "simpleAction");
        assert_eq!(action.resolve_id(1000, None), "simpleAction");
    }

    #[test]
    fn test_self_variant_when_acting_on_own_user() {
        assert_eq!(USER_ACTION.resolve_id(1000, Some(1000)), "Self");
    }

    #[test]
    fn test_other_variant_when_acting_on_another_user() {
        assert_eq!(USER_ACTION.resolve_id(1000, Some(999)), "Other");
        assert_eq!(USER_ACTION.resolve_id(1000, None), "Other");
    }

    #[test]
    fn test_missing_variant_falls_back_to_base_id() {
        let action = Action {
            id: Cow::Borrowed("base"),
            self_id: Some(Cow::Borrowed("base.self")),
            other_id: None,
        };
        assert_eq!(action.resolve_id(1000, Some(1000)), "base.self");
        assert_eq!(action.resolve_id(1000, Some(42)), "base");
    }

    #[test]
    fn test_owned_action_matches_const() {
        assert_eq!(Action::owned(ALWAYS_ALLOWED_ID), ACTION_ALWAYS_ALLOWED);
        assert_eq!(ACTION_ALWAYS_ALLOWED.to_string(), "polgate.always-allowed");
    }
}
