//! Workspace lifecycle state machine.
//!
//! ```text
//! ┌────────────────────────────┬──────────────────────────────────────────────┐
//! │ From                       │ To                                           │
//! ├────────────────────────────┼──────────────────────────────────────────────┤
//! │ AVAILABLE_FOR_SETUP        │ IN_SETUP                                     │
//! │ IN_SETUP                   │ AVAILABLE_FOR_CONVERSATION, PROBLEM          │
//! │ AVAILABLE_FOR_CONVERSATION │ IN_CONVERSATION                              │
//! │ IN_CONVERSATION            │ AVAILABLE_FOR_CONVERSATION, IN_REVIEW,       │
//! │                            │ PROBLEM                                      │
//! │ IN_REVIEW                  │ MERGED, AVAILABLE_FOR_CONVERSATION           │
//! │ MERGED                     │ IN_SETUP                                     │
//! │ PROBLEM                    │ AVAILABLE_FOR_SETUP                          │
//! └────────────────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! `PROBLEM` is only left through `AVAILABLE_FOR_SETUP`, which forces a clean
//! setup pass instead of resuming partial state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Lifecycle status of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    AvailableForSetup,
    InSetup,
    AvailableForConversation,
    InConversation,
    InReview,
    Merged,
    Problem,
}

impl WorkspaceStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [WorkspaceStatus; 7] = [
        WorkspaceStatus::AvailableForSetup,
        WorkspaceStatus::InSetup,
        WorkspaceStatus::AvailableForConversation,
        WorkspaceStatus::InConversation,
        WorkspaceStatus::InReview,
        WorkspaceStatus::Merged,
        WorkspaceStatus::Problem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::AvailableForSetup => "AVAILABLE_FOR_SETUP",
            WorkspaceStatus::InSetup => "IN_SETUP",
            WorkspaceStatus::AvailableForConversation => "AVAILABLE_FOR_CONVERSATION",
            WorkspaceStatus::InConversation => "IN_CONVERSATION",
            WorkspaceStatus::InReview => "IN_REVIEW",
            WorkspaceStatus::Merged => "MERGED",
            WorkspaceStatus::Problem => "PROBLEM",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        WorkspaceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("unknown workspace status '{}'", s))
    }
}

/// Validates workspace status transitions.
///
/// Every status mutation goes through here; nothing else decides what may
/// happen next to a workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusGuard;

impl StatusGuard {
    /// Statuses reachable from `from` in one step.
    pub fn allowed_transitions(from: WorkspaceStatus) -> &'static [WorkspaceStatus] {
        use WorkspaceStatus::*;

        match from {
            AvailableForSetup => &[InSetup],
            InSetup => &[AvailableForConversation, Problem],
            AvailableForConversation => &[InConversation],
            InConversation => &[AvailableForConversation, InReview, Problem],
            InReview => &[Merged, AvailableForConversation],
            Merged => &[InSetup],
            Problem => &[AvailableForSetup],
        }
    }

    /// Non-failing form of [`StatusGuard::validate_transition`].
    pub fn is_valid_transition(from: WorkspaceStatus, to: WorkspaceStatus) -> bool {
        Self::allowed_transitions(from).contains(&to)
    }

    /// Fail with `InvalidTransition` unless `from -> to` is in the table.
    pub fn validate_transition(
        from: WorkspaceStatus,
        to: WorkspaceStatus,
    ) -> Result<(), LifecycleError> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition { from, to })
        }
    }

    /// Whether a new conversation may be started on a workspace in `status`.
    ///
    /// `AVAILABLE_FOR_SETUP` and `MERGED` qualify because the caller runs
    /// setup first.
    pub fn can_start_conversation(status: WorkspaceStatus) -> bool {
        matches!(
            status,
            WorkspaceStatus::AvailableForConversation
                | WorkspaceStatus::AvailableForSetup
                | WorkspaceStatus::Merged
        )
    }

    /// Whether the workspace must go through setup before it can be used.
    pub fn needs_setup(status: WorkspaceStatus) -> bool {
        matches!(
            status,
            WorkspaceStatus::AvailableForSetup | WorkspaceStatus::Merged
        )
    }
}
