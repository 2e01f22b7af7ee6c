use corkboard_shared::{GroupId, TaskId};
use tracing::warn;

use crate::error::SyncError;

/// Data-transfer format a task card writes on drag start.
pub const DRAG_FORMAT: &str = "text/plain";

pub fn drag_payload(task: TaskId) -> String {
    task.to_string()
}

pub fn parse_drop_payload(raw: &str) -> Result<TaskId, SyncError> {
    raw.trim().parse::<TaskId>().map_err(|_| {
        warn!(raw, "failed to parse dragged task id");
        SyncError::BadDropPayload(raw.to_string())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragGesture {
    pub task: TaskId,
    pub origin: GroupId,
    pub over: Option<GroupId>,
}

/// Tracks the single drag gesture a pointer can perform.
#[derive(Debug, Default, Clone)]
pub struct DragCoordinator {
    active: Option<DragGesture>,
}

impl DragCoordinator {
    pub fn active(&self) -> Option<&DragGesture> {
        self.active.as_ref()
    }

    pub fn start(&mut self, task: TaskId, origin: GroupId) {
        if let Some(previous) = self.active.replace(DragGesture {
            task,
            origin,
            over: None,
        }) {
            warn!(previous = %previous.task, next = %task, "drag started before the previous one ended");
        }
    }

    /// Marks the hovered column. Returns `true` when dropping there would
    /// move the task.
    pub fn hover(&mut self, group: GroupId) -> bool {
        match self.active.as_mut() {
            Some(gesture) => {
                gesture.over = Some(group);
                gesture.origin != group
            }
            None => false,
        }
    }

    /// Ends the gesture and resolves which task the drop refers to. The
    /// payload wins over the tracked gesture when they disagree.
    pub fn finish(&mut self, payload: &str) -> Result<TaskId, SyncError> {
        let gesture = self.active.take();
        let task = parse_drop_payload(payload)?;
        if let Some(gesture) = gesture
            && gesture.task != task
        {
            warn!(tracked = %gesture.task, dropped = %task, "drop payload disagrees with drag source");
        }
        Ok(task)
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_the_plain_task_id() {
        assert_eq!(drag_payload(TaskId(42)), "42");
        assert_eq!(parse_drop_payload(" 42\n").expect("parse"), TaskId(42));
        assert!(matches!(
            parse_drop_payload("card-42"),
            Err(SyncError::BadDropPayload(_))
        ));
    }

    #[test]
    fn hover_reports_droppable_columns() {
        let mut drag = DragCoordinator::default();
        assert!(!drag.hover(GroupId(2)));

        drag.start(TaskId(1), GroupId(1));
        assert!(!drag.hover(GroupId(1)));
        assert!(drag.hover(GroupId(2)));
        assert_eq!(drag.active().and_then(|g| g.over), Some(GroupId(2)));

        assert_eq!(drag.finish("1").expect("drop"), TaskId(1));
        assert!(drag.active().is_none());
    }

    #[test]
    fn bad_payload_still_ends_the_gesture() {
        let mut drag = DragCoordinator::default();
        drag.start(TaskId(1), GroupId(1));
        assert!(drag.finish("").is_err());
        assert!(drag.active().is_none());
    }
}
