use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono_tz::Tz;
use corkboard_shared::{UserDto, WorkspaceDto};
use unicode_width::UnicodeWidthStr;

use crate::board::{Board, GroupEditState, SyncFailure, TaskEditState};
use crate::config::Config;
use crate::datetime::format_due;
use crate::users::{LookupView, display_name};

/// Plain-text board: one block per column, `Name (count)` followed by its
/// tasks in arrival order.
pub fn board_text(board: &Board, tz: &Tz) -> String {
    let Some(store) = board.store() else {
        return "no workspace loaded\n".to_string();
    };

    let mut out = format!(
        "{} (workspace {})\n",
        store.workspace_name(),
        store.workspace_id()
    );

    for group in store.groups() {
        out.push('\n');
        let marker = match board.group_state(group.id) {
            GroupEditState::Idle => "",
            GroupEditState::Naming { .. } => " [renaming]",
            GroupEditState::Creating { .. } => " [adding]",
        };
        out.push_str(&format!(
            "{} ({}){marker}\n",
            group.name,
            store.counter(group.id)
        ));

        let tasks = store.tasks_in(group.id);
        if tasks.is_empty() {
            out.push_str("  (no tasks)\n");
            continue;
        }

        let id_width = tasks
            .iter()
            .map(|t| t.id.to_string().len() + 1)
            .max()
            .unwrap_or(0);
        let title_width = tasks
            .iter()
            .map(|t| UnicodeWidthStr::width(t.title.as_str()))
            .max()
            .unwrap_or(0);

        for task in tasks {
            let id = format!("#{}", task.id);
            let padding = title_width.saturating_sub(UnicodeWidthStr::width(task.title.as_str()));
            let mut line = format!("  {id:<id_width$} {}{}", task.title, " ".repeat(padding));
            if let Some(due) = task.due_date {
                line.push_str(&format!("  due {}", format_due(due, tz)));
            }
            if let Some(assignee) = &task.assignee {
                let name = assignee
                    .display_name
                    .clone()
                    .unwrap_or_else(|| format!("user {}", assignee.id));
                line.push_str(&format!("  @{name}"));
            }
            if matches!(board.task_state(task.id), TaskEditState::Editing { .. }) {
                line.push_str("  [editing]");
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }

    if !board.failures().is_empty() {
        out.push_str("\nnot synced:\n");
        for failure in board.failures() {
            out.push_str(&format!("  [{}] {}\n", failure.id, failure.summary()));
        }
    }

    out
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };
        let tz = crate::datetime::display_timezone(cfg)?;

        Ok(Self { color, tz })
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    #[tracing::instrument(skip(self, board))]
    pub fn print_board(&mut self, board: &Board) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write!(out, "{}", board_text(board, &self.tz))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, workspaces))]
    pub fn print_workspaces(&mut self, workspaces: &[WorkspaceDto]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if workspaces.is_empty() {
            writeln!(out, "no workspaces")?;
            return Ok(());
        }
        let headers = vec!["ID".to_string(), "Name".to_string(), "Created".to_string()];
        let rows = workspaces
            .iter()
            .map(|ws| {
                vec![
                    self.paint(&ws.workspace_id.to_string(), "33"),
                    ws.name.clone(),
                    format_due(ws.audit.created_at, &self.tz),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, view))]
    pub fn print_users(&mut self, view: &LookupView<'_>, has_more: bool) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        match view {
            LookupView::Empty => writeln!(out, "no users")?,
            LookupView::NoMatches { query } => writeln!(out, "no users match {query:?}")?,
            LookupView::Matches(users) => {
                let headers = vec!["ID".to_string(), "Name".to_string(), "Username".to_string()];
                let rows = users.iter().map(|user| self.user_row(user)).collect();
                write_table(&mut out, headers, rows)?;
            }
        }
        if has_more {
            writeln!(out, "(more users available)")?;
        }
        Ok(())
    }

    pub fn print_failures(&mut self, failures: &[SyncFailure]) -> anyhow::Result<()> {
        let mut out = io::stderr().lock();
        for failure in failures {
            writeln!(out, "{}", self.paint(&failure.summary(), "31"))?;
        }
        Ok(())
    }

    fn user_row(&self, user: &UserDto) -> Vec<String> {
        vec![
            self.paint(&user.account_id.to_string(), "33"),
            display_name(user).to_string(),
            user.username.clone(),
        ]
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use corkboard_shared::{Audit, GroupId, GroupWithTasks, TaskDto, TaskId, UserId, WorkspaceId, WorkspaceSnapshot};

    use super::*;
    use crate::clock::FixedClock;

    fn audit() -> Audit {
        Audit {
            created_by: UserId(1),
            created_at: Utc::now(),
            updated_by: None,
            updated_at: None,
        }
    }

    #[test]
    fn board_text_lists_columns_with_counts() {
        let mut board = Board::new(Arc::new(FixedClock::new(Utc::now())));
        board.load(
            "Alpha",
            WorkspaceSnapshot {
                workspace_id: WorkspaceId(1),
                groups: vec![
                    GroupWithTasks {
                        group_id: GroupId(10),
                        name: "A".to_string(),
                        tasks: vec![TaskDto {
                            task_id: TaskId(7),
                            title: "Café menu".to_string(),
                            description: None,
                            due_date: None,
                            assigned_to_user_id: Some(UserId(3)),
                            assigned_to: Some("Bo Diddley".to_string()),
                            audit: audit(),
                        }],
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

        let text = board_text(&board, &chrono_tz::UTC);
        assert_eq!(
            text,
            "Alpha (workspace 1)\n\nA (1)\n  #7 Café menu  @Bo Diddley\n\nB (0)\n  (no tasks)\n"
        );
    }

    #[test]
    fn table_pads_by_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Name".to_string()],
            vec![vec!["1".to_string(), "Zoë".to_string()]],
        )
        .expect("table");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text, "ID Name \n-- ---- \n1  Zoë  \n");
    }
}
