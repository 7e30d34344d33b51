//! Access gate outcomes.

use core::fmt;

use serde::{Deserialize, Serialize};

/// The single output of an access gate evaluation.
///
/// `Checking` is the initial, non-terminal state. Every other variant ends the
/// evaluation cycle and tells the presentation layer whether to render the
/// requested view or where to redirect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Inputs are still loading or the identity is being resolved.
    #[default]
    Checking,
    /// No trusted identity: send the principal to sign in.
    SignIn,
    /// Identity exists but onboarding is not finished.
    Onboarding,
    /// Onboarding is finished; leave the onboarding route.
    Dashboard,
    /// Render the requested view.
    Allow,
}

impl GateDecision {
    /// Whether this decision ends the evaluation cycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Checking)
    }

    /// Whether the requested view may be rendered.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Stable lowercase name, used in logs and JSON.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::SignIn => "sign_in",
            Self::Onboarding => "onboarding",
            Self::Dashboard => "dashboard",
            Self::Allow => "allow",
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
