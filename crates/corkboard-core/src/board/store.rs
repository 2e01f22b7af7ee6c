//! Normalized board state for one workspace.
//!
//! Groups and tasks live in tables keyed by id. A task's `group_id` is the
//! only ownership pointer. Per-group task counters are kept incrementally
//! and must always equal the number of tasks pointing at the group.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use corkboard_shared::{Audit, GroupId, TaskDto, TaskId, UserId, WorkspaceId, WorkspaceSnapshot};
use tracing::trace;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignee {
    pub id: UserId,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub group_id: GroupId,
    /// Where the server last confirmed the task. Differs from `group_id`
    /// while a move is in flight or after one failed.
    pub confirmed_group: GroupId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<Assignee>,
    pub audit: Audit,
    order: u64,
    placement_seq: u64,
}

impl TaskRecord {
    pub fn from_dto(dto: TaskDto, group_id: GroupId, workspace_id: WorkspaceId) -> Self {
        let assignee = dto.assigned_to_user_id.map(|id| Assignee {
            id,
            display_name: dto.assigned_to.clone(),
        });
        Self {
            id: dto.task_id,
            group_id,
            confirmed_group: group_id,
            workspace_id,
            title: dto.title,
            description: dto.description,
            due_date: dto.due_date,
            assignee,
            audit: dto.audit,
            order: 0,
            placement_seq: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Group(GroupId),
    Task(TaskId),
}

/// The part of an entity a mutation writes. Mutations on different
/// aspects of one entity never supersede each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Aspect {
    GroupName,
    Placement,
    Title,
    Details,
    Assignment,
    Existence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub entity: EntityRef,
    pub aspect: Aspect,
}

impl Slot {
    pub fn group(group: GroupId, aspect: Aspect) -> Self {
        Self {
            entity: EntityRef::Group(group),
            aspect,
        }
    }

    pub fn task(task: TaskId, aspect: Aspect) -> Self {
        Self {
            entity: EntityRef::Task(task),
            aspect,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoardStore {
    workspace_id: WorkspaceId,
    workspace_name: String,
    group_order: Vec<GroupId>,
    groups: BTreeMap<GroupId, GroupRecord>,
    tasks: BTreeMap<TaskId, TaskRecord>,
    counters: BTreeMap<GroupId, usize>,
    sequences: BTreeMap<Slot, u64>,
    next_order: u64,
}

impl BoardStore {
    pub fn from_snapshot(workspace_name: &str, snapshot: WorkspaceSnapshot) -> Self {
        let mut store = Self {
            workspace_id: snapshot.workspace_id,
            workspace_name: workspace_name.to_string(),
            group_order: Vec::with_capacity(snapshot.groups.len()),
            groups: BTreeMap::new(),
            tasks: BTreeMap::new(),
            counters: BTreeMap::new(),
            sequences: BTreeMap::new(),
            next_order: 0,
        };

        for group in snapshot.groups {
            store.group_order.push(group.group_id);
            store.counters.insert(group.group_id, 0);
            store.groups.insert(
                group.group_id,
                GroupRecord {
                    id: group.group_id,
                    name: group.name,
                    audit: group.audit,
                },
            );
            for task in group.tasks {
                let record = TaskRecord::from_dto(task, group.group_id, snapshot.workspace_id);
                store.place(record);
            }
        }

        debug_assert!(store.verify_counters());
        store
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn workspace_name(&self) -> &str {
        &self.workspace_name
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupRecord> {
        self.group_order.iter().filter_map(|id| self.groups.get(id))
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupRecord> {
        self.groups.get(&id)
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(&id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks owned by `group`, in arrival order.
    pub fn tasks_in(&self, group: GroupId) -> Vec<&TaskRecord> {
        let mut tasks: Vec<_> = self
            .tasks
            .values()
            .filter(|task| task.group_id == group)
            .collect();
        tasks.sort_by_key(|task| task.order);
        tasks
    }

    pub fn counter(&self, group: GroupId) -> usize {
        self.counters.get(&group).copied().unwrap_or(0)
    }

    /// Counters in column order.
    pub fn counters(&self) -> Vec<(GroupId, usize)> {
        self.group_order
            .iter()
            .map(|id| (*id, self.counter(*id)))
            .collect()
    }

    /// Recounts ownership from scratch and compares with the incremental
    /// counters.
    pub fn verify_counters(&self) -> bool {
        let mut actual: BTreeMap<GroupId, usize> =
            self.groups.keys().map(|id| (*id, 0)).collect();
        for task in self.tasks.values() {
            *actual.entry(task.group_id).or_default() += 1;
        }
        actual == self.counters
    }

    fn place(&mut self, mut record: TaskRecord) {
        record.order = self.next_order;
        self.next_order += 1;
        *self.counters.entry(record.group_id).or_default() += 1;
        self.tasks.insert(record.id, record);
    }

    fn require_group(&self, group: GroupId) -> Result<(), SyncError> {
        if self.groups.contains_key(&group) {
            Ok(())
        } else {
            Err(SyncError::UnknownGroup(group))
        }
    }

    fn task_mut(&mut self, task: TaskId) -> Result<&mut TaskRecord, SyncError> {
        self.tasks.get_mut(&task).ok_or(SyncError::UnknownTask(task))
    }

    pub fn insert_task(&mut self, record: TaskRecord) -> Result<(), SyncError> {
        self.require_group(record.group_id)?;
        if let Some(existing) = self.tasks.remove(&record.id) {
            if let Some(count) = self.counters.get_mut(&existing.group_id) {
                *count = count.saturating_sub(1);
            }
        }
        trace!(task = %record.id, group = %record.group_id, "insert task");
        self.place(record);
        debug_assert!(self.verify_counters());
        Ok(())
    }

    /// Repoints `task` at `to`. Returns the previous group, or `None` when
    /// the task already lives there.
    pub fn relocate_task(&mut self, task: TaskId, to: GroupId) -> Result<Option<GroupId>, SyncError> {
        self.require_group(to)?;
        let order = self.next_order;
        let record = self.task_mut(task)?;
        let from = record.group_id;
        if from == to {
            return Ok(None);
        }
        record.group_id = to;
        record.order = order;
        self.next_order += 1;

        if let Some(count) = self.counters.get_mut(&from) {
            *count = count.saturating_sub(1);
        }
        *self.counters.entry(to).or_default() += 1;
        trace!(%task, %from, %to, "relocate task");
        debug_assert!(self.verify_counters());
        Ok(Some(from))
    }

    /// Records that the server placed `task` in `group` for placement
    /// sequence `seq`. Acknowledgements older than the newest one seen are
    /// ignored, whatever order they arrive in.
    pub fn confirm_placement(&mut self, task: TaskId, group: GroupId, seq: u64) {
        if let Some(record) = self.tasks.get_mut(&task)
            && seq > record.placement_seq
        {
            trace!(%task, %group, seq, "placement confirmed");
            record.confirmed_group = group;
            record.placement_seq = seq;
        }
    }

    pub fn remove_task(&mut self, task: TaskId) -> Result<TaskRecord, SyncError> {
        let record = self.tasks.remove(&task).ok_or(SyncError::UnknownTask(task))?;
        if let Some(count) = self.counters.get_mut(&record.group_id) {
            *count = count.saturating_sub(1);
        }
        self.sequences.retain(|slot, _| slot.entity != EntityRef::Task(task));
        debug_assert!(self.verify_counters());
        Ok(record)
    }

    pub fn rename_group(&mut self, group: GroupId, name: &str, audit: Option<Audit>) -> Result<(), SyncError> {
        let record = self.groups.get_mut(&group).ok_or(SyncError::UnknownGroup(group))?;
        record.name = name.to_string();
        if let Some(audit) = audit {
            record.audit = audit;
        }
        Ok(())
    }

    pub fn set_title(&mut self, task: TaskId, title: &str) -> Result<(), SyncError> {
        self.task_mut(task)?.title = title.to_string();
        Ok(())
    }

    pub fn set_details(
        &mut self,
        task: TaskId,
        description: Option<Option<String>>,
        due_date: Option<Option<DateTime<Utc>>>,
    ) -> Result<(), SyncError> {
        let record = self.task_mut(task)?;
        if let Some(description) = description {
            record.description = description;
        }
        if let Some(due_date) = due_date {
            record.due_date = due_date;
        }
        Ok(())
    }

    pub fn set_assignee(&mut self, task: TaskId, assignee: Option<Assignee>) -> Result<(), SyncError> {
        self.task_mut(task)?.assignee = assignee;
        Ok(())
    }

    pub fn set_task_audit(&mut self, task: TaskId, audit: Audit) -> Result<(), SyncError> {
        self.task_mut(task)?.audit = audit;
        Ok(())
    }

    /// Issues the next sequence number for `slot`.
    pub fn issue(&mut self, slot: Slot) -> u64 {
        let seq = self.sequences.entry(slot).or_default();
        *seq += 1;
        *seq
    }

    pub fn is_latest(&self, slot: Slot, seq: u64) -> bool {
        self.sequences.get(&slot).copied() == Some(seq)
    }
}

#[cfg(test)]
mod tests {
    use corkboard_shared::GroupWithTasks;

    use super::*;

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

    fn store() -> BoardStore {
        BoardStore::from_snapshot(
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
        )
    }

    #[test]
    fn snapshot_counts_tasks_per_group() {
        let store = store();
        assert_eq!(store.counters(), vec![(GroupId(10), 2), (GroupId(20), 0)]);
        assert!(store.verify_counters());
    }

    #[test]
    fn relocate_moves_one_edge() {
        let mut store = store();
        assert_eq!(
            store.relocate_task(TaskId(100), GroupId(20)).expect("move"),
            Some(GroupId(10))
        );
        assert_eq!(store.counters(), vec![(GroupId(10), 1), (GroupId(20), 1)]);
        assert_eq!(store.relocate_task(TaskId(100), GroupId(20)).expect("again"), None);
        assert_eq!(store.counter(GroupId(20)), 1);
    }

    #[test]
    fn moved_task_lands_last_in_target() {
        let mut store = store();
        store.relocate_task(TaskId(100), GroupId(20)).expect("move");
        store.relocate_task(TaskId(101), GroupId(20)).expect("move");
        store.relocate_task(TaskId(100), GroupId(10)).expect("back");
        store.relocate_task(TaskId(100), GroupId(20)).expect("again");
        let titles: Vec<_> = store
            .tasks_in(GroupId(20))
            .iter()
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(titles, vec!["T2", "T1"]);
    }

    #[test]
    fn unknown_targets_are_rejected_without_side_effects() {
        let mut store = store();
        assert!(matches!(
            store.relocate_task(TaskId(100), GroupId(99)),
            Err(SyncError::UnknownGroup(GroupId(99)))
        ));
        assert!(matches!(
            store.remove_task(TaskId(7)),
            Err(SyncError::UnknownTask(TaskId(7)))
        ));
        assert_eq!(store.counters(), vec![(GroupId(10), 2), (GroupId(20), 0)]);
    }

    #[test]
    fn sequences_are_per_slot() {
        let mut store = store();
        let title = Slot::task(TaskId(100), Aspect::Title);
        let placement = Slot::task(TaskId(100), Aspect::Placement);

        let first = store.issue(title);
        let second = store.issue(title);
        let other = store.issue(placement);

        assert!(!store.is_latest(title, first));
        assert!(store.is_latest(title, second));
        assert!(store.is_latest(placement, other));
    }
}
