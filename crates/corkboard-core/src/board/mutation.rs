//! One path for every board mutation: plan (validate, stamp, maybe apply
//! locally), dispatch (remote call), settle (commit, discard or record a
//! failure).

use chrono::{DateTime, Utc};
use corkboard_shared::{
    GroupDto, GroupId, GroupRename, TaskCreate, TaskDto, TaskId, TaskPatch, WorkspaceId,
};
use tracing::{debug, warn};

use super::editing::TaskDraft;
use super::store::{Assignee, Slot};
use crate::error::RemoteError;
use crate::remote::WorkspaceApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    RenameGroup {
        group: GroupId,
        name: String,
    },
    CreateTask {
        group: GroupId,
        draft: TaskDraft,
    },
    MoveTask {
        task: TaskId,
        to: GroupId,
    },
    RenameTask {
        task: TaskId,
        title: String,
    },
    AssignTask {
        task: TaskId,
        assignee: Option<Assignee>,
    },
    /// Outer `None` leaves a field alone, `Some(None)` clears it.
    EditTaskDetails {
        task: TaskId,
        description: Option<Option<String>>,
        due_date: Option<Option<DateTime<Utc>>>,
    },
    DeleteTask {
        task: TaskId,
    },
}

/// When the local model changes relative to the remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Applied at plan time. A failure is recorded, not rolled back.
    Optimistic,
    /// Applied only once the server acknowledges.
    Acknowledged,
}

impl Intent {
    pub fn policy(&self) -> CommitPolicy {
        match self {
            Self::MoveTask { .. } => CommitPolicy::Optimistic,
            _ => CommitPolicy::Acknowledged,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::RenameGroup { .. } => "rename group",
            Self::CreateTask { .. } => "create task",
            Self::MoveTask { .. } => "move task",
            Self::RenameTask { .. } => "rename task",
            Self::AssignTask { .. } => "assign task",
            Self::EditTaskDetails { .. } => "edit task",
            Self::DeleteTask { .. } => "delete task",
        }
    }
}

/// Identifies an in-flight mutation. `slot` is `None` for creations, which
/// never supersede each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub epoch: u64,
    pub slot: Option<Slot>,
    pub seq: u64,
}

/// Request captured at plan time. Task requests are addressed through the
/// group the server last acknowledged for that task.
#[derive(Debug, Clone)]
pub(crate) enum RemoteCall {
    RenameGroup {
        workspace: WorkspaceId,
        group: GroupId,
        body: GroupRename,
    },
    CreateTask {
        workspace: WorkspaceId,
        group: GroupId,
        body: TaskCreate,
    },
    UpdateTask {
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
        patch: TaskPatch,
    },
    DeleteTask {
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
    },
}

impl RemoteCall {
    /// The same request sent through `group`. Only task requests carry a
    /// group that can go stale.
    pub(crate) fn readdressed(self, group: GroupId) -> Self {
        match self {
            Self::UpdateTask {
                workspace,
                task,
                patch,
                ..
            } => Self::UpdateTask {
                workspace,
                group,
                task,
                patch,
            },
            Self::DeleteTask { workspace, task, .. } => Self::DeleteTask {
                workspace,
                group,
                task,
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Group(GroupDto),
    Created(TaskDto),
    Updated(Option<TaskDto>),
    Deleted,
}

#[derive(Debug, Clone)]
#[must_use = "a planned mutation does nothing until dispatched and settled"]
pub struct PendingMutation {
    pub(crate) ticket: Ticket,
    pub(crate) intent: Intent,
    pub(crate) call: RemoteCall,
}

impl PendingMutation {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn policy(&self) -> CommitPolicy {
        self.intent.policy()
    }

    #[tracing::instrument(skip(self, remote, bearer), fields(ticket = self.ticket.id, intent = self.intent.label()))]
    pub async fn dispatch<R>(self, remote: &R, bearer: &str) -> Settlement
    where
        R: WorkspaceApi + ?Sized,
    {
        let outcome = match &self.call {
            RemoteCall::RenameGroup {
                workspace,
                group,
                body,
            } => remote
                .rename_group(bearer, *workspace, *group, body)
                .await
                .map(Reply::Group),
            RemoteCall::CreateTask {
                workspace,
                group,
                body,
            } => remote
                .create_task(bearer, *workspace, *group, body)
                .await
                .map(Reply::Created),
            RemoteCall::UpdateTask {
                workspace,
                group,
                task,
                patch,
            } => remote
                .update_task(bearer, *workspace, *group, *task, patch)
                .await
                .map(Reply::Updated),
            RemoteCall::DeleteTask {
                workspace,
                group,
                task,
            } => remote
                .delete_task(bearer, *workspace, *group, *task)
                .await
                .map(|()| Reply::Deleted),
        };

        match &outcome {
            Ok(_) => debug!("remote acknowledged"),
            Err(err) => warn!(error = %err, "remote rejected mutation"),
        }

        Settlement {
            ticket: self.ticket,
            intent: self.intent,
            call: self.call,
            outcome,
        }
    }
}

/// A finished remote call waiting to be folded back into the board.
#[derive(Debug, Clone)]
#[must_use = "settlements must be passed to Board::settle"]
pub struct Settlement {
    pub(crate) ticket: Ticket,
    pub(crate) intent: Intent,
    pub(crate) call: RemoteCall,
    pub(crate) outcome: Result<Reply, RemoteError>,
}

impl Settlement {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&RemoteError> {
        self.outcome.as_ref().err()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Applied,
    /// A newer mutation of the same slot, or a re-hydration, made this
    /// response irrelevant. Nothing changed.
    Superseded,
    Failed {
        failure_id: u64,
        auth_expired: bool,
    },
}

/// A mutation the server did not accept. Kept until retried or dismissed.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub id: u64,
    pub intent: Intent,
    pub error: RemoteError,
    pub at: DateTime<Utc>,
    pub(crate) call: RemoteCall,
}

impl SyncFailure {
    pub fn summary(&self) -> String {
        format!("{} failed: {}", self.intent.label(), self.error)
    }
}
