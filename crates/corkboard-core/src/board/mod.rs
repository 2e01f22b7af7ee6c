//! The board engine for one workspace view.
//!
//! Every local change goes through [`Board::plan`], which validates an
//! [`Intent`], stamps it with a per-entity sequence number and, for
//! optimistic intents, applies it at once. The returned
//! [`PendingMutation`] is dispatched against the remote store and its
//! [`Settlement`] is folded back with [`Board::settle`]. Settlements may
//! arrive in any order; a response whose sequence is no longer the latest
//! for its entity and aspect is discarded.

pub mod dragdrop;
pub mod editing;
pub mod mutation;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use corkboard_shared::{
    GroupId, GroupRename, TaskCreate, TaskId, TaskPatch, WorkspaceSnapshot,
};
use tracing::{debug, info, instrument, warn};

pub use self::dragdrop::{DRAG_FORMAT, DragCoordinator, DragGesture, drag_payload, parse_drop_payload};
pub use self::editing::{
    GroupEditState, GroupEffect, GroupEvent, TaskDraft, TaskEditState, TaskEffect, TaskEvent,
};
pub use self::mutation::{
    CommitPolicy, Intent, PendingMutation, SettleOutcome, Settlement, SyncFailure, Ticket,
};
pub use self::store::{Aspect, Assignee, BoardStore, EntityRef, GroupRecord, Slot, TaskRecord};
use self::mutation::{RemoteCall, Reply};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::remote::WorkspaceApi;

static GROUP_IDLE: GroupEditState = GroupEditState::Idle;
static TASK_IDLE: TaskEditState = TaskEditState::Idle;

pub struct Board {
    clock: Arc<dyn Clock>,
    store: Option<BoardStore>,
    epoch: u64,
    next_ticket: u64,
    next_failure: u64,
    group_editors: BTreeMap<GroupId, GroupEditState>,
    task_editors: BTreeMap<TaskId, TaskEditState>,
    drag: DragCoordinator,
    failures: Vec<SyncFailure>,
    /// The newest unsettled intent per slot.
    in_flight: BTreeMap<Slot, Intent>,
}

impl Board {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            store: None,
            epoch: 0,
            next_ticket: 0,
            next_failure: 0,
            group_editors: BTreeMap::new(),
            task_editors: BTreeMap::new(),
            drag: DragCoordinator::default(),
            failures: Vec::new(),
            in_flight: BTreeMap::new(),
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&BoardStore> {
        self.store.as_ref()
    }

    fn loaded(&self) -> Result<&BoardStore, SyncError> {
        self.store.as_ref().ok_or(SyncError::NotHydrated)
    }

    /// Fetches the named workspace and replaces the whole model. On error
    /// the current model stays as it was.
    #[instrument(skip(self, remote, bearer))]
    pub async fn hydrate<R>(
        &mut self,
        remote: &R,
        bearer: &str,
        workspace_name: &str,
    ) -> Result<(), SyncError>
    where
        R: WorkspaceApi + ?Sized,
    {
        let name = workspace_name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation { field: "workspace" });
        }
        let snapshot = remote.workspace_by_name(bearer, name).await?;
        self.load(name, snapshot);
        Ok(())
    }

    pub fn load(&mut self, workspace_name: &str, snapshot: WorkspaceSnapshot) {
        let store = BoardStore::from_snapshot(workspace_name, snapshot);
        info!(
            workspace = %store.workspace_id(),
            groups = store.groups().count(),
            tasks = store.task_count(),
            "board hydrated"
        );
        self.clear_transient();
        self.store = Some(store);
    }

    /// Drops the model, e.g. when the session ends. Responses still in
    /// flight will be discarded.
    pub fn reset(&mut self) {
        self.clear_transient();
        self.store = None;
    }

    fn clear_transient(&mut self) {
        self.epoch += 1;
        self.group_editors.clear();
        self.task_editors.clear();
        self.drag.cancel();
        self.failures.clear();
        self.in_flight.clear();
    }

    pub fn group_state(&self, group: GroupId) -> &GroupEditState {
        self.group_editors.get(&group).unwrap_or(&GROUP_IDLE)
    }

    pub fn task_state(&self, task: TaskId) -> &TaskEditState {
        self.task_editors.get(&task).unwrap_or(&TASK_IDLE)
    }

    pub fn failures(&self) -> &[SyncFailure] {
        &self.failures
    }

    pub fn dragging(&self) -> Option<&DragGesture> {
        self.drag.active()
    }

    /// Validates `intent` and stamps it. Returns `None` when the intent
    /// would not change anything, in which case no remote call is due.
    /// "Anything" is judged against the newest intent still in flight for
    /// the same slot, not only against committed state.
    #[instrument(skip(self, intent), fields(intent = intent.label()))]
    pub fn plan(&mut self, intent: Intent) -> Result<Option<PendingMutation>, SyncError> {
        self.plan_intent(intent, false)
    }

    fn plan_intent(
        &mut self,
        intent: Intent,
        force: bool,
    ) -> Result<Option<PendingMutation>, SyncError> {
        let epoch = self.epoch;
        let in_flight = &self.in_flight;
        let store = self.store.as_mut().ok_or(SyncError::NotHydrated)?;
        let workspace = store.workspace_id();

        let (intent, slot, call) = match intent {
            Intent::RenameGroup { group, name } => {
                let record = store.group(group).ok_or(SyncError::UnknownGroup(group))?;
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(SyncError::Validation { field: "name" });
                }
                let latest = match in_flight.get(&Slot::group(group, Aspect::GroupName)) {
                    Some(Intent::RenameGroup { name, .. }) => name.as_str(),
                    _ => record.name.as_str(),
                };
                if !force && name == latest {
                    return Ok(None);
                }
                let call = RemoteCall::RenameGroup {
                    workspace,
                    group,
                    body: GroupRename { name: name.clone() },
                };
                (
                    Intent::RenameGroup { group, name },
                    Some(Slot::group(group, Aspect::GroupName)),
                    call,
                )
            }
            Intent::CreateTask { group, draft } => {
                store.group(group).ok_or(SyncError::UnknownGroup(group))?;
                let title = draft.title.trim().to_string();
                if title.is_empty() {
                    return Err(SyncError::Validation { field: "title" });
                }
                let draft = TaskDraft {
                    title,
                    description: non_blank(draft.description),
                    ..draft
                };
                let call = RemoteCall::CreateTask {
                    workspace,
                    group,
                    body: TaskCreate {
                        title: draft.title.clone(),
                        description: draft.description.clone(),
                        due_date: draft.due_date,
                        assigned_to_user_id: draft.assignee.as_ref().map(|a| a.id),
                    },
                };
                (Intent::CreateTask { group, draft }, None, call)
            }
            Intent::MoveTask { task, to } => {
                let record = store.task(task).ok_or(SyncError::UnknownTask(task))?;
                let (from, confirmed) = (record.group_id, record.confirmed_group);
                store.group(to).ok_or(SyncError::UnknownGroup(to))?;
                if from == to {
                    debug!(%task, group = %to, "task already in target group");
                    return Ok(None);
                }
                let call = RemoteCall::UpdateTask {
                    workspace,
                    group: confirmed,
                    task,
                    patch: TaskPatch {
                        to_group_id: Some(to),
                        ..TaskPatch::default()
                    },
                };
                (
                    Intent::MoveTask { task, to },
                    Some(Slot::task(task, Aspect::Placement)),
                    call,
                )
            }
            Intent::RenameTask { task, title } => {
                let record = store.task(task).ok_or(SyncError::UnknownTask(task))?;
                let title = title.trim().to_string();
                if title.is_empty() {
                    return Err(SyncError::Validation { field: "title" });
                }
                let latest = match in_flight.get(&Slot::task(task, Aspect::Title)) {
                    Some(Intent::RenameTask { title, .. }) => title.as_str(),
                    _ => record.title.as_str(),
                };
                if !force && title == latest {
                    return Ok(None);
                }
                let call = RemoteCall::UpdateTask {
                    workspace,
                    group: record.confirmed_group,
                    task,
                    patch: TaskPatch {
                        title: Some(title.clone()),
                        ..TaskPatch::default()
                    },
                };
                (
                    Intent::RenameTask { task, title },
                    Some(Slot::task(task, Aspect::Title)),
                    call,
                )
            }
            Intent::AssignTask { task, assignee } => {
                let record = store.task(task).ok_or(SyncError::UnknownTask(task))?;
                let latest = match in_flight.get(&Slot::task(task, Aspect::Assignment)) {
                    Some(Intent::AssignTask { assignee, .. }) => assignee.as_ref().map(|a| a.id),
                    _ => record.assignee.as_ref().map(|a| a.id),
                };
                let next = assignee.as_ref().map(|a| a.id);
                if !force && latest == next {
                    return Ok(None);
                }
                let call = RemoteCall::UpdateTask {
                    workspace,
                    group: record.confirmed_group,
                    task,
                    patch: TaskPatch {
                        assigned_to_user_id: Some(next),
                        ..TaskPatch::default()
                    },
                };
                (
                    Intent::AssignTask { task, assignee },
                    Some(Slot::task(task, Aspect::Assignment)),
                    call,
                )
            }
            Intent::EditTaskDetails {
                task,
                description,
                due_date,
            } => {
                let record = store.task(task).ok_or(SyncError::UnknownTask(task))?;
                let description = description.map(non_blank);
                if description.is_none() && due_date.is_none() {
                    return Err(SyncError::Validation { field: "details" });
                }
                let call = RemoteCall::UpdateTask {
                    workspace,
                    group: record.confirmed_group,
                    task,
                    patch: TaskPatch {
                        description: description.clone(),
                        due_date,
                        ..TaskPatch::default()
                    },
                };
                (
                    Intent::EditTaskDetails {
                        task,
                        description,
                        due_date,
                    },
                    Some(Slot::task(task, Aspect::Details)),
                    call,
                )
            }
            Intent::DeleteTask { task } => {
                let record = store.task(task).ok_or(SyncError::UnknownTask(task))?;
                if !force && in_flight.contains_key(&Slot::task(task, Aspect::Existence)) {
                    debug!(%task, "delete already in flight");
                    return Ok(None);
                }
                let call = RemoteCall::DeleteTask {
                    workspace,
                    group: record.confirmed_group,
                    task,
                };
                (
                    Intent::DeleteTask { task },
                    Some(Slot::task(task, Aspect::Existence)),
                    call,
                )
            }
        };

        let seq = slot.map(|slot| store.issue(slot)).unwrap_or(0);
        if let Intent::MoveTask { task, to } = &intent {
            store.relocate_task(*task, *to)?;
        }
        if let Some(slot) = slot {
            self.in_flight.insert(slot, intent.clone());
        }

        self.next_ticket += 1;
        let ticket = Ticket {
            id: self.next_ticket,
            epoch,
            slot,
            seq,
        };
        debug!(ticket = ticket.id, seq, policy = ?intent.policy(), "mutation planned");
        Ok(Some(PendingMutation {
            ticket,
            intent,
            call,
        }))
    }

    /// Folds a finished remote call back into the model.
    #[instrument(skip(self, settlement), fields(ticket = settlement.ticket.id, intent = settlement.intent.label()))]
    pub fn settle(&mut self, settlement: Settlement) -> SettleOutcome {
        let Settlement {
            ticket,
            intent,
            call,
            outcome,
        } = settlement;

        if ticket.epoch != self.epoch {
            debug!(epoch = ticket.epoch, current = self.epoch, "response for a previous board");
            return SettleOutcome::Superseded;
        }
        let Some(store) = self.store.as_mut() else {
            return SettleOutcome::Superseded;
        };
        // The server did move the task even when a newer move overtook
        // this one locally.
        if let (Intent::MoveTask { task, to }, Ok(_)) = (&intent, &outcome) {
            store.confirm_placement(*task, *to, ticket.seq);
        }
        if let Some(slot) = ticket.slot {
            if !store.is_latest(slot, ticket.seq) {
                debug!(seq = ticket.seq, ?slot, "superseded by a newer mutation");
                return SettleOutcome::Superseded;
            }
            self.in_flight.remove(&slot);
        }

        match outcome {
            Ok(reply) => match self.commit(&intent, reply) {
                Ok(()) => {
                    self.feed_editor(&intent, Ok(()));
                    SettleOutcome::Applied
                }
                Err(err) => {
                    debug!(error = %err, "entity went away before the response arrived");
                    SettleOutcome::Superseded
                }
            },
            Err(error) => {
                self.feed_editor(&intent, Err(error.to_string()));
                self.next_failure += 1;
                let failure = SyncFailure {
                    id: self.next_failure,
                    intent,
                    error: error.clone(),
                    at: self.clock.now(),
                    call,
                };
                warn!(failure = failure.id, error = %error, "{}", failure.summary());
                let failure_id = failure.id;
                self.failures.push(failure);
                SettleOutcome::Failed {
                    failure_id,
                    auth_expired: error.is_unauthorized(),
                }
            }
        }
    }

    fn commit(&mut self, intent: &Intent, reply: Reply) -> Result<(), SyncError> {
        let store = self.store.as_mut().ok_or(SyncError::NotHydrated)?;
        let workspace = store.workspace_id();

        match (intent, reply) {
            (Intent::RenameGroup { group, .. }, Reply::Group(dto)) => {
                store.rename_group(*group, &dto.name, Some(dto.audit))?;
            }
            (Intent::CreateTask { group, draft }, Reply::Created(dto)) => {
                let mut record = TaskRecord::from_dto(dto, *group, workspace);
                if let (Some(assignee), Some(wanted)) = (record.assignee.as_mut(), &draft.assignee)
                    && assignee.display_name.is_none()
                {
                    assignee.display_name = wanted.display_name.clone();
                }
                store.insert_task(record)?;
            }
            (Intent::MoveTask { task, .. }, Reply::Updated(dto)) => {
                store.task(*task).ok_or(SyncError::UnknownTask(*task))?;
                if let Some(dto) = dto {
                    store.set_task_audit(*task, dto.audit)?;
                }
            }
            (Intent::RenameTask { task, title }, Reply::Updated(dto)) => {
                store.set_title(*task, title)?;
                if let Some(dto) = dto {
                    store.set_task_audit(*task, dto.audit)?;
                }
            }
            (Intent::AssignTask { task, assignee }, Reply::Updated(dto)) => {
                let mut assignee = assignee.clone();
                if let (Some(assignee), Some(dto)) = (assignee.as_mut(), &dto)
                    && assignee.display_name.is_none()
                {
                    assignee.display_name = dto.assigned_to.clone();
                }
                store.set_assignee(*task, assignee)?;
                if let Some(dto) = dto {
                    store.set_task_audit(*task, dto.audit)?;
                }
            }
            (
                Intent::EditTaskDetails {
                    task,
                    description,
                    due_date,
                },
                Reply::Updated(dto),
            ) => {
                store.set_details(*task, description.clone(), *due_date)?;
                if let Some(dto) = dto {
                    store.set_task_audit(*task, dto.audit)?;
                }
            }
            (Intent::DeleteTask { task }, Reply::Deleted) => {
                store.remove_task(*task)?;
                self.task_editors.remove(task);
                self.in_flight
                    .retain(|slot, _| slot.entity != EntityRef::Task(*task));
            }
            (intent, _) => {
                warn!(intent = intent.label(), "reply does not match the request");
            }
        }
        Ok(())
    }

    fn feed_editor(&mut self, intent: &Intent, result: Result<(), String>) {
        match intent {
            Intent::RenameGroup { group, .. } | Intent::CreateTask { group, .. } => {
                let state = self.group_state(*group).clone();
                let awaiting = matches!(
                    (intent, &state),
                    (Intent::RenameGroup { .. }, GroupEditState::Naming { submitted: true, .. })
                        | (Intent::CreateTask { .. }, GroupEditState::Creating { submitted: true, .. })
                );
                if !awaiting {
                    return;
                }
                let name = self
                    .store
                    .as_ref()
                    .and_then(|store| store.group(*group))
                    .map(|g| g.name.clone())
                    .unwrap_or_default();
                match state.transition(&name, GroupEvent::Settled(result)) {
                    Ok(step) => self.put_group_state(*group, step.next),
                    Err(err) => debug!(error = %err, "editor ignored settlement"),
                }
            }
            Intent::RenameTask { task, .. } => {
                let state = self.task_state(*task).clone();
                if !matches!(state, TaskEditState::Editing { submitted: true, .. }) {
                    return;
                }
                let title = self
                    .store
                    .as_ref()
                    .and_then(|store| store.task(*task))
                    .map(|t| t.title.clone())
                    .unwrap_or_default();
                match state.transition(&title, TaskEvent::Settled(result)) {
                    Ok(step) => self.put_task_state(*task, step.next),
                    Err(err) => debug!(error = %err, "editor ignored settlement"),
                }
            }
            _ => {}
        }
    }

    /// Feeds a UI event to a group's editor. A submit that needs the server
    /// comes back as a planned mutation.
    pub fn group_event(
        &mut self,
        group: GroupId,
        event: GroupEvent,
    ) -> Result<Option<PendingMutation>, SyncError> {
        let name = self.latest_group_name(group)?;
        let step = self.group_state(group).transition(&name, event)?;

        let (pending, next) = match step.effect {
            Some(GroupEffect::RenameGroup(name)) => {
                let pending = self.plan(Intent::RenameGroup { group, name })?;
                let next = if pending.is_some() { step.next } else { GroupEditState::Idle };
                (pending, next)
            }
            Some(GroupEffect::CreateTask(draft)) => {
                let pending = self.plan(Intent::CreateTask { group, draft })?;
                (pending, step.next)
            }
            None => (None, step.next),
        };
        self.put_group_state(group, next);
        Ok(pending)
    }

    pub fn task_event(
        &mut self,
        task: TaskId,
        event: TaskEvent,
    ) -> Result<Option<PendingMutation>, SyncError> {
        let title = self.latest_title(task)?;
        let step = self.task_state(task).transition(&title, event)?;

        let (pending, next) = match step.effect {
            Some(TaskEffect::RenameTask(title)) => {
                let pending = self.plan(Intent::RenameTask { task, title })?;
                let next = if pending.is_some() { step.next } else { TaskEditState::Idle };
                (pending, next)
            }
            None => (None, step.next),
        };
        self.put_task_state(task, next);
        Ok(pending)
    }

    /// The group's name as the user last asked for it.
    pub fn latest_group_name(&self, group: GroupId) -> Result<String, SyncError> {
        let record = self.loaded()?.group(group).ok_or(SyncError::UnknownGroup(group))?;
        Ok(match self.in_flight.get(&Slot::group(group, Aspect::GroupName)) {
            Some(Intent::RenameGroup { name, .. }) => name.clone(),
            _ => record.name.clone(),
        })
    }

    /// The task's title as the user last asked for it.
    pub fn latest_title(&self, task: TaskId) -> Result<String, SyncError> {
        let record = self.loaded()?.task(task).ok_or(SyncError::UnknownTask(task))?;
        Ok(match self.in_flight.get(&Slot::task(task, Aspect::Title)) {
            Some(Intent::RenameTask { title, .. }) => title.clone(),
            _ => record.title.clone(),
        })
    }

    /// Starts dragging `task`. Returns the data-transfer payload.
    pub fn drag_start(&mut self, task: TaskId) -> Result<String, SyncError> {
        let origin = self
            .loaded()?
            .task(task)
            .ok_or(SyncError::UnknownTask(task))?
            .group_id;
        self.drag.start(task, origin);
        Ok(drag_payload(task))
    }

    /// Whether dropping on `group` right now would move the dragged task.
    pub fn drag_over(&mut self, group: GroupId) -> bool {
        let known = self
            .store
            .as_ref()
            .is_some_and(|store| store.group(group).is_some());
        known && self.drag.hover(group)
    }

    /// Resolves a drop on `group`. The gesture ends whatever the outcome.
    #[instrument(skip(self, payload))]
    pub fn drop_on(
        &mut self,
        group: GroupId,
        payload: &str,
    ) -> Result<Option<PendingMutation>, SyncError> {
        let task = self.drag.finish(payload)?;
        self.plan(Intent::MoveTask { task, to: group })
    }

    pub fn drag_end(&mut self) {
        self.drag.cancel();
    }

    pub fn dismiss(&mut self, failure_id: u64) -> Result<SyncFailure, SyncError> {
        let index = self
            .failures
            .iter()
            .position(|f| f.id == failure_id)
            .ok_or(SyncError::UnknownFailure(failure_id))?;
        Ok(self.failures.remove(index))
    }

    /// Re-issues a failed mutation through the normal protocol. A failed
    /// move is re-sent only while the task still sits where the user put
    /// it and the server has not already placed it there. Returns `None`
    /// when nothing is left to send.
    #[instrument(skip(self))]
    pub fn retry(&mut self, failure_id: u64) -> Result<Option<PendingMutation>, SyncError> {
        let failure = self.dismiss(failure_id)?;
        info!(failure = failure_id, intent = failure.intent.label(), "retrying");

        let Intent::MoveTask { task, to } = failure.intent else {
            let intent = failure.intent.clone();
            return match self.plan_intent(intent, true) {
                Ok(pending) => Ok(pending),
                Err(err) => {
                    self.failures.push(failure);
                    Err(err)
                }
            };
        };

        let epoch = self.epoch;
        let store = self.store.as_mut().ok_or(SyncError::NotHydrated)?;
        let Some(record) = store.task(task).filter(|t| t.group_id == to) else {
            info!(%task, "task moved since the failure; nothing to retry");
            return Ok(None);
        };
        let confirmed = record.confirmed_group;
        if confirmed == to {
            info!(%task, group = %to, "server already has the task there");
            return Ok(None);
        }
        let slot = Slot::task(task, Aspect::Placement);
        let seq = store.issue(slot);
        self.in_flight.insert(slot, failure.intent.clone());
        self.next_ticket += 1;
        Ok(Some(PendingMutation {
            ticket: Ticket {
                id: self.next_ticket,
                epoch,
                slot: Some(slot),
                seq,
            },
            intent: failure.intent,
            call: failure.call.readdressed(confirmed),
        }))
    }

    /// Plans, dispatches and settles in one go. `None` means there was
    /// nothing to do.
    pub async fn apply<R>(
        &mut self,
        remote: &R,
        bearer: &str,
        intent: Intent,
    ) -> Result<Option<SettleOutcome>, SyncError>
    where
        R: WorkspaceApi + ?Sized,
    {
        let Some(pending) = self.plan(intent)? else {
            return Ok(None);
        };
        let settlement = pending.dispatch(remote, bearer).await;
        Ok(Some(self.settle(settlement)))
    }

    pub fn rename_group(
        &mut self,
        group: GroupId,
        name: &str,
    ) -> Result<Option<PendingMutation>, SyncError> {
        self.plan(Intent::RenameGroup {
            group,
            name: name.to_string(),
        })
    }

    pub fn create_task(
        &mut self,
        group: GroupId,
        draft: TaskDraft,
    ) -> Result<Option<PendingMutation>, SyncError> {
        self.plan(Intent::CreateTask { group, draft })
    }

    pub fn move_task(
        &mut self,
        task: TaskId,
        to: GroupId,
    ) -> Result<Option<PendingMutation>, SyncError> {
        self.plan(Intent::MoveTask { task, to })
    }

    pub fn rename_task(
        &mut self,
        task: TaskId,
        title: &str,
    ) -> Result<Option<PendingMutation>, SyncError> {
        self.plan(Intent::RenameTask {
            task,
            title: title.to_string(),
        })
    }

    pub fn assign_task(
        &mut self,
        task: TaskId,
        assignee: Option<Assignee>,
    ) -> Result<Option<PendingMutation>, SyncError> {
        self.plan(Intent::AssignTask { task, assignee })
    }

    pub fn delete_task(&mut self, task: TaskId) -> Result<Option<PendingMutation>, SyncError> {
        self.plan(Intent::DeleteTask { task })
    }

    fn put_group_state(&mut self, group: GroupId, state: GroupEditState) {
        if state.is_idle() {
            self.group_editors.remove(&group);
        } else {
            self.group_editors.insert(group, state);
        }
    }

    fn put_task_state(&mut self, task: TaskId, state: TaskEditState) {
        if state.is_idle() {
            self.task_editors.remove(&task);
        } else {
            self.task_editors.insert(task, state);
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use corkboard_shared::{Audit, GroupWithTasks, TaskDto, UserId, WorkspaceId};

    use super::*;
    use crate::clock::FixedClock;
    use crate::error::RemoteError;

    fn audit() -> Audit {
        Audit {
            created_by: UserId(1),
            created_at: Utc::now(),
            updated_by: None,
            updated_at: None,
        }
    }

    fn task(id: i64, title: &str) -> TaskDto {
        TaskDto {
            task_id: TaskId(id),
            title: title.to_string(),
            description: None,
            due_date: None,
            assigned_to_user_id: None,
            assigned_to: None,
            audit: audit(),
        }
    }

    fn board() -> Board {
        let mut board = Board::new(Arc::new(FixedClock::new(Utc::now())));
        board.load(
            "Alpha",
            WorkspaceSnapshot {
                workspace_id: WorkspaceId(1),
                groups: vec![
                    GroupWithTasks {
                        group_id: GroupId(10),
                        name: "A".to_string(),
                        tasks: vec![task(100, "T1"), task(101, "T2")],
                        audit: audit(),
                    },
                    GroupWithTasks {
                        group_id: GroupId(20),
                        name: "B".to_string(),
                        tasks: vec![],
                        audit: audit(),
                    },
                ],
            },
        );
        board
    }

    fn settled(pending: PendingMutation, outcome: Result<Reply, RemoteError>) -> Settlement {
        Settlement {
            ticket: pending.ticket,
            intent: pending.intent,
            call: pending.call,
            outcome,
        }
    }

    fn store(board: &Board) -> &BoardStore {
        board.store().expect("hydrated")
    }

    #[test]
    fn late_title_response_does_not_clobber_newer_edit() {
        let mut board = board();
        let first = board
            .rename_task(TaskId(100), "first")
            .expect("plan")
            .expect("pending");
        let second = board
            .rename_task(TaskId(100), "second")
            .expect("plan")
            .expect("pending");

        assert_eq!(
            board.settle(settled(second, Ok(Reply::Updated(None)))),
            SettleOutcome::Applied
        );
        assert_eq!(
            board.settle(settled(first, Ok(Reply::Updated(None)))),
            SettleOutcome::Superseded
        );
        assert_eq!(store(&board).task(TaskId(100)).map(|t| t.title.as_str()), Some("second"));
    }

    #[test]
    fn failed_move_keeps_local_placement_and_can_be_retried() {
        let mut board = board();
        let pending = board
            .move_task(TaskId(100), GroupId(20))
            .expect("plan")
            .expect("pending");
        assert_eq!(pending.policy(), CommitPolicy::Optimistic);
        assert_eq!(store(&board).counters(), vec![(GroupId(10), 1), (GroupId(20), 1)]);

        let outcome = board.settle(settled(
            pending,
            Err(RemoteError::Status {
                code: 500,
                message: "boom".to_string(),
            }),
        ));
        let SettleOutcome::Failed { failure_id, auth_expired } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(!auth_expired);
        assert_eq!(store(&board).task(TaskId(100)).map(|t| t.group_id), Some(GroupId(20)));
        assert_eq!(board.failures().len(), 1);

        let retry = board.retry(failure_id).expect("retry").expect("pending");
        assert!(board.failures().is_empty());
        assert_eq!(
            board.settle(settled(retry, Ok(Reply::Updated(None)))),
            SettleOutcome::Applied
        );
    }

    #[test]
    fn move_retry_is_dropped_once_the_task_moved_again() {
        let mut board = board();
        let pending = board
            .move_task(TaskId(100), GroupId(20))
            .expect("plan")
            .expect("pending");
        let SettleOutcome::Failed { failure_id, .. } = board.settle(settled(
            pending,
            Err(RemoteError::Transport("offline".to_string())),
        )) else {
            panic!("expected failure");
        };

        let back = board
            .move_task(TaskId(100), GroupId(10))
            .expect("plan")
            .expect("pending");
        assert!(board.retry(failure_id).expect("retry").is_none());
        assert_eq!(
            board.settle(settled(back, Ok(Reply::Updated(None)))),
            SettleOutcome::Applied
        );
    }

    #[test]
    fn group_rename_commits_only_on_acknowledgement() {
        let mut board = board();
        assert!(board.group_event(GroupId(10), GroupEvent::HeaderClicked).expect("open").is_none());
        board
            .group_event(GroupId(10), GroupEvent::Input("Backlog".to_string()))
            .expect("type");
        let pending = board
            .group_event(GroupId(10), GroupEvent::Submit)
            .expect("submit")
            .expect("pending");

        assert_eq!(store(&board).group(GroupId(10)).map(|g| g.name.as_str()), Some("A"));
        assert_eq!(board.group_state(GroupId(10)).name(), "naming");

        let mut dto = corkboard_shared::GroupDto {
            group_id: GroupId(10),
            name: "Backlog".to_string(),
            audit: audit(),
        };
        dto.audit.updated_by = Some(UserId(1));
        assert_eq!(
            board.settle(settled(pending, Ok(Reply::Group(dto)))),
            SettleOutcome::Applied
        );
        assert_eq!(store(&board).group(GroupId(10)).map(|g| g.name.as_str()), Some("Backlog"));
        assert!(board.group_state(GroupId(10)).is_idle());
    }

    #[test]
    fn responses_for_a_previous_board_are_ignored() {
        let mut board = board();
        let pending = board
            .delete_task(TaskId(101))
            .expect("plan")
            .expect("pending");
        board.reset();
        assert_eq!(
            board.settle(settled(pending, Ok(Reply::Deleted))),
            SettleOutcome::Superseded
        );
        assert!(!board.is_hydrated());
    }

    #[test]
    fn drop_on_origin_group_is_a_no_op() {
        let mut board = board();
        let payload = board.drag_start(TaskId(100)).expect("drag");
        assert!(!board.drag_over(GroupId(10)));
        assert!(board.drop_on(GroupId(10), &payload).expect("drop").is_none());
        assert!(board.dragging().is_none());
        assert_eq!(store(&board).counters(), vec![(GroupId(10), 2), (GroupId(20), 0)]);
    }

    fn call_group(pending: &PendingMutation) -> GroupId {
        match &pending.call {
            RemoteCall::UpdateTask { group, .. }
            | RemoteCall::DeleteTask { group, .. }
            | RemoteCall::RenameGroup { group, .. }
            | RemoteCall::CreateTask { group, .. } => *group,
        }
    }

    #[test]
    fn reverting_a_pending_title_is_sent_and_wins() {
        let mut board = board();
        let first = board
            .rename_task(TaskId(100), "X")
            .expect("plan")
            .expect("pending");
        let revert = board
            .rename_task(TaskId(100), "T1")
            .expect("plan")
            .expect("revert must reach the server");
        assert_eq!(board.latest_title(TaskId(100)).expect("title"), "T1");
        assert!(board.rename_task(TaskId(100), "T1").expect("plan").is_none());

        assert_eq!(
            board.settle(settled(first, Ok(Reply::Updated(None)))),
            SettleOutcome::Superseded
        );
        assert_eq!(
            board.settle(settled(revert, Ok(Reply::Updated(None)))),
            SettleOutcome::Applied
        );
        assert_eq!(store(&board).task(TaskId(100)).map(|t| t.title.as_str()), Some("T1"));
        assert!(board.rename_task(TaskId(100), "T1").expect("plan").is_none());
    }

    #[test]
    fn reverting_a_pending_group_name_through_the_editor() {
        let mut board = board();
        board.group_event(GroupId(10), GroupEvent::HeaderClicked).expect("open");
        board
            .group_event(GroupId(10), GroupEvent::Input("Backlog".to_string()))
            .expect("type");
        let first = board
            .group_event(GroupId(10), GroupEvent::Submit)
            .expect("submit")
            .expect("pending");
        board.group_event(GroupId(10), GroupEvent::Blur).expect("blur");

        board.group_event(GroupId(10), GroupEvent::HeaderClicked).expect("reopen");
        assert!(matches!(
            board.group_state(GroupId(10)),
            GroupEditState::Naming { draft, .. } if draft == "Backlog"
        ));
        board
            .group_event(GroupId(10), GroupEvent::Input("A".to_string()))
            .expect("type");
        let revert = board
            .group_event(GroupId(10), GroupEvent::Submit)
            .expect("submit")
            .expect("revert must reach the server");

        let dto = |name: &str| corkboard_shared::GroupDto {
            group_id: GroupId(10),
            name: name.to_string(),
            audit: audit(),
        };
        assert_eq!(
            board.settle(settled(revert, Ok(Reply::Group(dto("A"))))),
            SettleOutcome::Applied
        );
        assert_eq!(
            board.settle(settled(first, Ok(Reply::Group(dto("Backlog"))))),
            SettleOutcome::Superseded
        );
        assert_eq!(store(&board).group(GroupId(10)).map(|g| g.name.as_str()), Some("A"));
    }

    #[test]
    fn unassigning_while_an_assignment_is_pending_is_sent() {
        let mut board = board();
        let assign = board
            .assign_task(
                TaskId(100),
                Some(Assignee {
                    id: UserId(7),
                    display_name: Some("Bob".to_string()),
                }),
            )
            .expect("plan")
            .expect("pending");
        let clear = board
            .assign_task(TaskId(100), None)
            .expect("plan")
            .expect("unassign must reach the server");

        assert_eq!(
            board.settle(settled(clear, Ok(Reply::Updated(None)))),
            SettleOutcome::Applied
        );
        assert_eq!(
            board.settle(settled(assign, Ok(Reply::Updated(None)))),
            SettleOutcome::Superseded
        );
        assert_eq!(store(&board).task(TaskId(100)).and_then(|t| t.assignee.clone()), None);
    }

    #[test]
    fn task_requests_use_the_group_the_server_confirmed() {
        let mut board = board();
        let moved = board
            .move_task(TaskId(100), GroupId(20))
            .expect("plan")
            .expect("pending");
        let rename = board
            .rename_task(TaskId(100), "renamed")
            .expect("plan")
            .expect("pending");
        assert_eq!(call_group(&moved), GroupId(10));
        assert_eq!(call_group(&rename), GroupId(10));

        let SettleOutcome::Failed { failure_id, .. } = board.settle(settled(
            moved,
            Err(RemoteError::Transport("offline".to_string())),
        )) else {
            panic!("expected failure");
        };
        let task = store(&board).task(TaskId(100)).expect("task");
        assert_eq!((task.group_id, task.confirmed_group), (GroupId(20), GroupId(10)));

        let delete = board.delete_task(TaskId(100)).expect("plan").expect("pending");
        assert_eq!(call_group(&delete), GroupId(10));

        let retry = board.retry(failure_id).expect("retry").expect("pending");
        assert_eq!(call_group(&retry), GroupId(10));
        assert_eq!(
            board.settle(settled(retry, Ok(Reply::Updated(None)))),
            SettleOutcome::Applied
        );
        assert_eq!(
            store(&board).task(TaskId(100)).map(|t| t.confirmed_group),
            Some(GroupId(20))
        );
        let later = board
            .rename_task(TaskId(100), "again")
            .expect("plan")
            .expect("pending");
        assert_eq!(call_group(&later), GroupId(20));
    }

    #[test]
    fn move_retry_is_dropped_when_the_server_already_has_the_task() {
        let mut board = board();
        let first = board
            .move_task(TaskId(100), GroupId(20))
            .expect("plan")
            .expect("pending");
        let back = board
            .move_task(TaskId(100), GroupId(10))
            .expect("plan")
            .expect("pending");
        let again = board
            .move_task(TaskId(100), GroupId(20))
            .expect("plan")
            .expect("pending");

        let SettleOutcome::Failed { failure_id, .. } = board.settle(settled(
            again,
            Err(RemoteError::Transport("offline".to_string())),
        )) else {
            panic!("expected failure");
        };
        assert_eq!(
            board.settle(settled(first, Ok(Reply::Updated(None)))),
            SettleOutcome::Superseded
        );
        board.settle(settled(back, Err(RemoteError::Transport("offline".to_string()))));

        assert_eq!(
            store(&board).task(TaskId(100)).map(|t| t.confirmed_group),
            Some(GroupId(20))
        );
        assert!(board.retry(failure_id).expect("retry").is_none());
    }
}
