//! Instance state machine and classification of task-level recurrence edits.

use crate::error::CoreError;
use crate::models::{InstanceState, RecurrenceEdit, Task};
use crate::recurrence::RecurrenceRule;
use serde::{Deserialize, Serialize};

/// A requested change of instance state.
///
/// ```text
/// pending --Complete--> completed --Reopen--> pending
/// pending --Skip------> skipped   --Unskip--> pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Complete,
    Reopen,
    Skip,
    Unskip,
}

impl Transition {
    /// The transition that undoes this one.
    pub fn inverse(self) -> Transition {
        match self {
            Transition::Complete => Transition::Reopen,
            Transition::Reopen => Transition::Complete,
            Transition::Skip => Transition::Unskip,
            Transition::Unskip => Transition::Skip,
        }
    }

    /// State an instance must be in for this transition to apply.
    pub fn source(self) -> InstanceState {
        match self {
            Transition::Complete | Transition::Skip => InstanceState::Pending,
            Transition::Reopen => InstanceState::Completed,
            Transition::Unskip => InstanceState::Skipped,
        }
    }

    pub fn target(self) -> InstanceState {
        match self {
            Transition::Complete => InstanceState::Completed,
            Transition::Skip => InstanceState::Skipped,
            Transition::Reopen | Transition::Unskip => InstanceState::Pending,
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Complete => write!(f, "complete"),
            Transition::Reopen => write!(f, "reopen"),
            Transition::Skip => write!(f, "skip"),
            Transition::Unskip => write!(f, "unskip"),
        }
    }
}

impl InstanceState {
    /// Next state after `transition`, or `InvalidTransition` when the edge doesn't exist.
    pub fn apply(self, transition: Transition) -> Result<InstanceState, CoreError> {
        if self == transition.source() {
            Ok(transition.target())
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                transition,
            })
        }
    }
}

/// How an update changed a task's recurrence, with the rules involved.
#[derive(Debug, Clone, PartialEq)]
pub enum RecurrenceChange {
    None,
    Enabled,
    Disabled,
    /// Rule, start date, or timezone replaced while recurrence stays on
    RuleChanged {
        old: RecurrenceRule,
        new: RecurrenceRule,
    },
}

impl RecurrenceChange {
    pub fn classify(before: &Task, after: &Task) -> RecurrenceChange {
        match (before.is_recurring, after.is_recurring) {
            (false, true) => RecurrenceChange::Enabled,
            (true, false) => RecurrenceChange::Disabled,
            (false, false) => RecurrenceChange::None,
            (true, true) => {
                let unchanged = before.recurrence_rule == after.recurrence_rule
                    && before.recurrence_start == after.recurrence_start
                    && before.timezone == after.timezone;
                match (&before.recurrence_rule, &after.recurrence_rule) {
                    (Some(old), Some(new)) if !unchanged => RecurrenceChange::RuleChanged {
                        old: old.clone(),
                        new: new.clone(),
                    },
                    _ => RecurrenceChange::None,
                }
            }
        }
    }

    pub fn edit(&self) -> RecurrenceEdit {
        match self {
            RecurrenceChange::None => RecurrenceEdit::Unchanged,
            RecurrenceChange::Enabled => RecurrenceEdit::Enabled,
            RecurrenceChange::Disabled => RecurrenceEdit::Disabled,
            RecurrenceChange::RuleChanged { .. } => RecurrenceEdit::RuleChanged,
        }
    }
}
