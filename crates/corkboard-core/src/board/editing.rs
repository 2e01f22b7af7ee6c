//! Per-entity editing affordances as explicit transition tables.
//!
//! ```text
//! group: Idle --HeaderClicked--> Naming   --Submit/Blur/Settled(ok)--> Idle
//!        Idle --AddTaskClicked-> Creating --Submit/Blur/Settled(ok)--> Idle
//! task:  Idle --EditClicked----> Editing  --Submit/Blur/Settled(ok)--> Idle
//! ```
//!
//! A submit that needs the server leaves the state in place with
//! `submitted` set; the matching `Settled` event closes it or records the
//! error. Pairs missing from a table are rejected with
//! [`SyncError::InvalidTransition`].

use chrono::{DateTime, Utc};

use super::store::Assignee;
use crate::error::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<Assignee>,
}

impl TaskDraft {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S, E> {
    pub next: S,
    pub effect: Option<E>,
}

impl<S, E> Transition<S, E> {
    fn to(next: S) -> Self {
        Self { next, effect: None }
    }

    fn with(next: S, effect: E) -> Self {
        Self {
            next,
            effect: Some(effect),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GroupEditState {
    #[default]
    Idle,
    Naming {
        draft: String,
        submitted: bool,
        error: Option<String>,
    },
    Creating {
        draft: TaskDraft,
        submitted: bool,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    HeaderClicked,
    AddTaskClicked,
    Input(String),
    DraftInput(TaskDraft),
    /// Explicit submit or Enter.
    Submit,
    /// Focus loss or click outside.
    Blur,
    Settled(Result<(), String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEffect {
    RenameGroup(String),
    CreateTask(TaskDraft),
}

impl GroupEditState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Naming { .. } => "naming",
            Self::Creating { .. } => "creating",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Naming { error, .. } | Self::Creating { error, .. } => error.as_deref(),
            Self::Idle => None,
        }
    }

    pub fn transition(
        &self,
        current_name: &str,
        event: GroupEvent,
    ) -> Result<Transition<Self, GroupEffect>, SyncError> {
        use GroupEditState as S;
        use GroupEvent as E;

        let invalid = SyncError::InvalidTransition {
            state: self.name(),
            event: event.name(),
        };

        let step = match (self, event) {
            (S::Idle, E::HeaderClicked) => Transition::to(S::Naming {
                draft: current_name.to_string(),
                submitted: false,
                error: None,
            }),
            (S::Idle, E::AddTaskClicked) => Transition::to(S::Creating {
                draft: TaskDraft::default(),
                submitted: false,
                error: None,
            }),
            // Late settlement after the editor was dismissed.
            (S::Idle, E::Settled(_)) => Transition::to(S::Idle),

            (S::Naming { submitted: false, .. }, E::Input(draft)) => Transition::to(S::Naming {
                draft,
                submitted: false,
                error: None,
            }),
            (S::Naming { draft, submitted: false, .. }, E::Submit) => {
                let name = draft.trim();
                if name.is_empty() {
                    return Err(SyncError::Validation { field: "name" });
                }
                if name == current_name {
                    Transition::to(S::Idle)
                } else {
                    Transition::with(
                        S::Naming {
                            draft: name.to_string(),
                            submitted: true,
                            error: None,
                        },
                        GroupEffect::RenameGroup(name.to_string()),
                    )
                }
            }
            (S::Naming { .. }, E::Blur) => Transition::to(S::Idle),
            (S::Naming { submitted: true, .. }, E::Settled(Ok(()))) => Transition::to(S::Idle),
            (S::Naming { draft, submitted: true, .. }, E::Settled(Err(message))) => {
                Transition::to(S::Naming {
                    draft: draft.clone(),
                    submitted: false,
                    error: Some(message),
                })
            }

            (S::Creating { submitted: false, .. }, E::DraftInput(draft)) => {
                Transition::to(S::Creating {
                    draft,
                    submitted: false,
                    error: None,
                })
            }
            (S::Creating { draft, submitted: false, .. }, E::Submit) => {
                let title = draft.title.trim();
                if title.is_empty() {
                    return Err(SyncError::Validation { field: "title" });
                }
                let draft = TaskDraft {
                    title: title.to_string(),
                    ..draft.clone()
                };
                Transition::with(
                    S::Creating {
                        draft: draft.clone(),
                        submitted: true,
                        error: None,
                    },
                    GroupEffect::CreateTask(draft),
                )
            }
            (S::Creating { .. }, E::Blur) => Transition::to(S::Idle),
            (S::Creating { submitted: true, .. }, E::Settled(Ok(()))) => Transition::to(S::Idle),
            (S::Creating { draft, submitted: true, .. }, E::Settled(Err(message))) => {
                Transition::to(S::Creating {
                    draft: draft.clone(),
                    submitted: false,
                    error: Some(message),
                })
            }

            _ => return Err(invalid),
        };
        Ok(step)
    }
}

impl GroupEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HeaderClicked => "header-clicked",
            Self::AddTaskClicked => "add-task-clicked",
            Self::Input(_) => "input",
            Self::DraftInput(_) => "draft-input",
            Self::Submit => "submit",
            Self::Blur => "blur",
            Self::Settled(_) => "settled",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TaskEditState {
    #[default]
    Idle,
    Editing {
        draft: String,
        submitted: bool,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    EditClicked,
    Input(String),
    Submit,
    Blur,
    Settled(Result<(), String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEffect {
    RenameTask(String),
}

impl TaskEditState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Editing { .. } => "editing",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Editing { error, .. } => error.as_deref(),
            Self::Idle => None,
        }
    }

    pub fn transition(
        &self,
        current_title: &str,
        event: TaskEvent,
    ) -> Result<Transition<Self, TaskEffect>, SyncError> {
        use TaskEditState as S;
        use TaskEvent as E;

        let invalid = SyncError::InvalidTransition {
            state: self.name(),
            event: event.name(),
        };

        let step = match (self, event) {
            (S::Idle, E::EditClicked) => Transition::to(S::Editing {
                draft: current_title.to_string(),
                submitted: false,
                error: None,
            }),
            (S::Idle, E::Settled(_)) => Transition::to(S::Idle),

            (S::Editing { submitted: false, .. }, E::Input(draft)) => Transition::to(S::Editing {
                draft,
                submitted: false,
                error: None,
            }),
            (S::Editing { draft, submitted: false, .. }, E::Submit) => {
                let title = draft.trim();
                if title.is_empty() {
                    return Err(SyncError::Validation { field: "title" });
                }
                if title == current_title {
                    Transition::to(S::Idle)
                } else {
                    Transition::with(
                        S::Editing {
                            draft: title.to_string(),
                            submitted: true,
                            error: None,
                        },
                        TaskEffect::RenameTask(title.to_string()),
                    )
                }
            }
            (S::Editing { .. }, E::Blur) => Transition::to(S::Idle),
            (S::Editing { submitted: true, .. }, E::Settled(Ok(()))) => Transition::to(S::Idle),
            (S::Editing { draft, submitted: true, .. }, E::Settled(Err(message))) => {
                Transition::to(S::Editing {
                    draft: draft.clone(),
                    submitted: false,
                    error: Some(message),
                })
            }

            _ => return Err(invalid),
        };
        Ok(step)
    }
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EditClicked => "edit-clicked",
            Self::Input(_) => "input",
            Self::Submit => "submit",
            Self::Blur => "blur",
            Self::Settled(_) => "settled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_round_trip_emits_one_rename() {
        let idle = GroupEditState::Idle;
        let naming = idle
            .transition("A", GroupEvent::HeaderClicked)
            .expect("open")
            .next;
        let typed = naming
            .transition("A", GroupEvent::Input("Backlog ".to_string()))
            .expect("type")
            .next;
        let submitted = typed.transition("A", GroupEvent::Submit).expect("submit");
        assert_eq!(
            submitted.effect,
            Some(GroupEffect::RenameGroup("Backlog".to_string()))
        );
        assert!(!submitted.next.is_idle());

        let done = submitted
            .next
            .transition("A", GroupEvent::Settled(Ok(())))
            .expect("settle");
        assert_eq!(done.next, GroupEditState::Idle);
    }

    #[test]
    fn failed_rename_stays_in_naming_with_error() {
        let state = GroupEditState::Naming {
            draft: "Backlog".to_string(),
            submitted: true,
            error: None,
        };
        let next = state
            .transition("A", GroupEvent::Settled(Err("server answered 500".to_string())))
            .expect("settle")
            .next;
        assert_eq!(next.name(), "naming");
        assert_eq!(next.error(), Some("server answered 500"));

        // The user can try again.
        let retry = next.transition("A", GroupEvent::Submit).expect("resubmit");
        assert!(retry.effect.is_some());
    }

    #[test]
    fn blank_or_unchanged_submissions_issue_nothing() {
        let naming = GroupEditState::Naming {
            draft: "   ".to_string(),
            submitted: false,
            error: None,
        };
        assert!(matches!(
            naming.transition("A", GroupEvent::Submit),
            Err(SyncError::Validation { field: "name" })
        ));

        let unchanged = GroupEditState::Naming {
            draft: "A".to_string(),
            submitted: false,
            error: None,
        };
        let step = unchanged.transition("A", GroupEvent::Submit).expect("submit");
        assert_eq!(step.next, GroupEditState::Idle);
        assert_eq!(step.effect, None);
    }

    #[test]
    fn blur_cancels_creating() {
        let creating = GroupEditState::Idle
            .transition("A", GroupEvent::AddTaskClicked)
            .expect("open")
            .next;
        let step = creating.transition("A", GroupEvent::Blur).expect("blur");
        assert_eq!(step.next, GroupEditState::Idle);
        assert_eq!(step.effect, None);
    }

    #[test]
    fn invalid_pairs_fail_loudly() {
        let err = GroupEditState::Idle
            .transition("A", GroupEvent::Submit)
            .expect_err("idle submit");
        assert!(matches!(
            err,
            SyncError::InvalidTransition {
                state: "idle",
                event: "submit"
            }
        ));

        let naming = GroupEditState::Idle
            .transition("A", GroupEvent::HeaderClicked)
            .expect("open")
            .next;
        assert!(naming.transition("A", GroupEvent::AddTaskClicked).is_err());
        assert!(
            TaskEditState::Idle
                .transition("T", TaskEvent::Input("x".to_string()))
                .is_err()
        );
    }

    #[test]
    fn task_title_edit() {
        let editing = TaskEditState::Idle
            .transition("T1", TaskEvent::EditClicked)
            .expect("open")
            .next;
        let typed = editing
            .transition("T1", TaskEvent::Input("Write docs".to_string()))
            .expect("type")
            .next;
        let step = typed.transition("T1", TaskEvent::Submit).expect("submit");
        assert_eq!(
            step.effect,
            Some(TaskEffect::RenameTask("Write docs".to_string()))
        );
        assert!(
            step.next
                .transition("T1", TaskEvent::Input("more".to_string()))
                .is_err(),
            "input is locked while the rename is in flight"
        );
    }
}
