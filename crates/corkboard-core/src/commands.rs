use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, anyhow};
use corkboard_shared::{GroupId, TaskId, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::board::{Assignee, GroupEvent, Intent, SettleOutcome, TaskDraft, TaskEvent};
use crate::cli::Invocation;
use crate::client::BoardClient;
use crate::credential::Credential;
use crate::datetime::parse_due_expr;
use crate::error::SyncError;
use crate::remote::RemoteStore;
use crate::render::Renderer;
use crate::session::{CredentialSlot, RenewalDue, RenewalScheduler};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "login",
        "logout",
        "whoami",
        "workspaces",
        "workspace-create",
        "show",
        "move",
        "rename-group",
        "add",
        "rename-task",
        "assign",
        "describe",
        "delete",
        "users",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(client, renderer, renewals, inv), fields(command = %inv.command))]
pub async fn dispatch<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    renewals: &mut mpsc::UnboundedReceiver<RenewalDue>,
    inv: Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    debug!(args = ?inv.args, modifiers = ?inv.modifiers, "dispatching command");

    match inv.command.as_str() {
        "login" => cmd_login(client, renewals, &inv).await,
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let restored = client.restore().context("failed reading the stored session")?;
            if !restored {
                return Err(anyhow!("not signed in; run `corkboard login <username>` first"));
            }
            match command {
                "logout" => cmd_logout(client).await,
                "whoami" => cmd_whoami(client),
                "workspaces" => cmd_workspaces(client, renderer, &inv).await,
                "workspace-create" => cmd_workspace_create(client, renderer, &inv).await,
                "show" => cmd_show(client, renderer, &inv).await,
                "move" => cmd_move(client, renderer, &inv).await,
                "rename-group" => cmd_rename_group(client, renderer, &inv).await,
                "add" => cmd_add(client, renderer, &inv).await,
                "rename-task" => cmd_rename_task(client, renderer, &inv).await,
                "assign" => cmd_assign(client, renderer, &inv).await,
                "describe" => cmd_describe(client, renderer, &inv).await,
                "delete" => cmd_delete(client, renderer, &inv).await,
                "users" => cmd_users(client, renderer, &inv).await,
                other => Err(anyhow!("unknown command: {other}")),
            }
        }
    }
}

async fn cmd_login<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renewals: &mut mpsc::UnboundedReceiver<RenewalDue>,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    let username = inv.arg(0, "username")?;
    let password = read_password()?;
    let credential = client.login(username, &password).await?;
    println!("signed in as {} ({})", credential.username, expiry_text(&credential));

    if inv.has_flag("watch") {
        keep_alive(client, renewals).await?;
    }
    Ok(())
}

/// Keeps the session renewed until interrupted or until it ends.
async fn keep_alive<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renewals: &mut mpsc::UnboundedReceiver<RenewalDue>,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    let mut session = client.session().subscribe();
    info!("keeping session alive; press Ctrl-C to stop");
    loop {
        tokio::select! {
            due = renewals.recv() => {
                let Some(due) = due else {
                    return Err(anyhow!("renewal timer channel closed"));
                };
                match client.on_renewal_due(due).await {
                    Ok(()) => debug!("session renewed"),
                    Err(SyncError::AuthExpired) => {
                        return Err(anyhow!("session could not be renewed; sign in again"));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            changed = session.changed() => {
                if changed.is_err() || session.borrow_and_update().is_none() {
                    return Err(anyhow!("session ended"));
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed listening for Ctrl-C")?;
                info!("interrupted");
                return Ok(());
            }
        }
    }
}

async fn cmd_logout<R, S, T>(client: &mut BoardClient<R, S, T>) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.logout().await;
    println!("signed out");
    Ok(())
}

fn cmd_whoami<R, S, T>(client: &BoardClient<R, S, T>) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    let credential = client
        .session()
        .current_credential()
        .ok_or(SyncError::NoSession)?;
    println!(
        "{} (user {}, tenant {}), {}",
        credential.username,
        credential.subject_id,
        credential.tenant_id,
        expiry_text(credential)
    );
    Ok(())
}

async fn cmd_workspaces<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.refresh_workspaces().await?;
    if inv.has_flag("all") {
        while client.more_workspaces().await? > 0 {}
    }
    renderer.print_workspaces(client.workspaces().entries())?;
    if !client.workspaces().is_exhausted() {
        println!("(more workspaces available; use --all)");
    }
    Ok(())
}

async fn cmd_workspace_create<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    let name = inv.text_from(0, "name")?;
    let created = client.create_workspace(&name).await?;
    renderer.print_workspaces(std::slice::from_ref(&created))?;
    Ok(())
}

async fn cmd_show<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    renderer.print_board(client.board())
}

/// Moves a task by running the same drag protocol a pointer would.
async fn cmd_move<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    let task: TaskId = parse_id(inv.arg(1, "task")?, "task")?;
    let to: GroupId = parse_id(inv.arg(2, "group")?, "group")?;

    let board = client.board_mut();
    let payload = board.drag_start(task)?;
    if !board.drag_over(to) {
        board.drag_end();
        println!("task {task} is already in group {to}");
        return Ok(());
    }
    let pending = board.drop_on(to, &payload)?;
    finish(client, renderer, pending).await
}

/// Renames a column through its header editor.
async fn cmd_rename_group<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    let group: GroupId = parse_id(inv.arg(1, "group")?, "group")?;
    let name = inv.text_from(2, "name")?;

    let board = client.board_mut();
    board.group_event(group, GroupEvent::HeaderClicked)?;
    board.group_event(group, GroupEvent::Input(name))?;
    let pending = board.group_event(group, GroupEvent::Submit)?;
    finish(client, renderer, pending).await
}

async fn cmd_add<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    let group: GroupId = parse_id(inv.arg(1, "group")?, "group")?;

    let mut draft = TaskDraft::titled(&inv.text_from(2, "title")?);
    draft.description = inv.modifier("desc").map(str::to_string);
    if let Some(due) = inv.modifier("due") {
        draft.due_date = Some(parse_due_expr(due, client.now(), renderer.timezone())?);
    }
    if let Some(user) = inv.modifier("assign") {
        let id: UserId = parse_id(user, "user")?;
        draft.assignee = Some(Assignee {
            id,
            display_name: None,
        });
    }

    let board = client.board_mut();
    board.group_event(group, GroupEvent::AddTaskClicked)?;
    board.group_event(group, GroupEvent::DraftInput(draft))?;
    let pending = board.group_event(group, GroupEvent::Submit)?;
    finish(client, renderer, pending).await
}

async fn cmd_rename_task<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    let task: TaskId = parse_id(inv.arg(1, "task")?, "task")?;
    let title = inv.text_from(2, "title")?;

    let board = client.board_mut();
    board.task_event(task, TaskEvent::EditClicked)?;
    board.task_event(task, TaskEvent::Input(title))?;
    let pending = board.task_event(task, TaskEvent::Submit)?;
    finish(client, renderer, pending).await
}

/// `assign WS TASK USER` assigns, `assign WS TASK` clears the assignee.
async fn cmd_assign<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    let task: TaskId = parse_id(inv.arg(1, "task")?, "task")?;
    let assignee = match inv.args.get(2) {
        Some(raw) => {
            let id: UserId = parse_id(raw, "user")?;
            client.open_users().await?;
            let known = client
                .users()
                .users()
                .iter()
                .find(|user| user.account_id == id)
                .map(Assignee::from);
            Some(known.unwrap_or(Assignee {
                id,
                display_name: None,
            }))
        }
        None => None,
    };
    apply(client, renderer, Intent::AssignTask { task, assignee }).await
}

/// `describe WS TASK desc:TEXT due:EXPR`; an empty value clears the field.
async fn cmd_describe<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    let task: TaskId = parse_id(inv.arg(1, "task")?, "task")?;

    let description = inv.modifier("desc").map(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let due_date = match inv.modifier("due") {
        Some(raw) if raw.trim().is_empty() => Some(None),
        Some(raw) => Some(Some(parse_due_expr(raw, client.now(), renderer.timezone())?)),
        None => None,
    };
    if description.is_none() && due_date.is_none() {
        return Err(anyhow!("describe needs desc:TEXT and/or due:EXPR"));
    }

    apply(
        client,
        renderer,
        Intent::EditTaskDetails {
            task,
            description,
            due_date,
        },
    )
    .await
}

async fn cmd_delete<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_workspace(inv.arg(0, "workspace")?).await?;
    let task: TaskId = parse_id(inv.arg(1, "task")?, "task")?;
    apply(client, renderer, Intent::DeleteTask { task }).await
}

async fn cmd_users<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    inv: &Invocation,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    client.open_users().await?;
    if inv.has_flag("all") {
        while client.more_users().await? > 0 {}
    }
    let query = inv.args.join(" ");
    client.users_mut().search(&query);
    let lookup = client.users();
    renderer.print_users(&lookup.view(), lookup.has_more())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "usage: corkboard [--rc KEY=VALUE] [--config PATH] [--data DIR] <command> [args]\n\n\
         commands:\n  \
           login USERNAME [--watch]          sign in (password on stdin)\n  \
           logout | whoami\n  \
           workspaces [--all]                list workspaces\n  \
           workspace-create NAME\n  \
           show WS                           print the board\n  \
           move WS TASK GROUP\n  \
           rename-group WS GROUP NAME\n  \
           add WS GROUP TITLE [due:EXPR] [assign:USER] [desc:TEXT]\n  \
           rename-task WS TASK TITLE\n  \
           assign WS TASK [USER]\n  \
           describe WS TASK [desc:TEXT] [due:EXPR]\n  \
           delete WS TASK\n  \
           users [QUERY] [--all]"
    );
    Ok(())
}

async fn apply<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    intent: Intent,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    let pending = client.board_mut().plan(intent)?;
    finish(client, renderer, pending).await
}

async fn finish<R, S, T>(
    client: &mut BoardClient<R, S, T>,
    renderer: &mut Renderer,
    pending: Option<crate::board::PendingMutation>,
) -> anyhow::Result<()>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    let Some(pending) = pending else {
        println!("nothing to change");
        return Ok(());
    };
    let outcome = client.complete(pending).await?;
    renderer.print_board(client.board())?;
    match outcome {
        SettleOutcome::Applied => Ok(()),
        SettleOutcome::Superseded => {
            warn!("response arrived for a superseded change");
            Ok(())
        }
        SettleOutcome::Failed { failure_id, .. } => {
            let failures = client.board().failures();
            renderer.print_failures(failures)?;
            let message = failures
                .iter()
                .find(|f| f.id == failure_id)
                .map(|f| f.summary())
                .unwrap_or_else(|| "change was not saved".to_string());
            Err(anyhow!(message))
        }
    }
}

fn expiry_text(credential: &Credential) -> String {
    match credential.expires_at {
        Some(at) => format!("valid until {}", at.to_rfc3339()),
        None => "no expiry".to_string(),
    }
}

fn parse_id<I>(raw: &str, what: &str) -> anyhow::Result<I>
where
    I: std::str::FromStr,
    I::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<I>()
        .with_context(|| format!("invalid {what} id: {raw:?}"))
}

fn read_password() -> anyhow::Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("failed reading password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::FixedClock;
    use crate::config::Config;
    use crate::remote::InMemoryRemote;
    use crate::session::{MemorySlot, SessionManager, TokioScheduler};

    #[test]
    fn abbreviations_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("ad", &known), Some("add"));
        assert_eq!(expand_command_abbrev("workspaces", &known), Some("workspaces"));
        assert_eq!(expand_command_abbrev("workspace-c", &known), Some("workspace-create"));
        assert_eq!(expand_command_abbrev("rename", &known), None);
        assert_eq!(expand_command_abbrev("d", &known), None);
    }

    #[tokio::test]
    async fn due_expressions_are_resolved_against_the_client_clock() {
        let now = Utc.with_ymd_and_hms(2024, 2, 28, 9, 30, 0).single().expect("valid instant");
        let clock = Arc::new(FixedClock::new(now));
        let remote = Arc::new(InMemoryRemote::new(clock.clone()));
        let owner = remote.add_user("ann", "Ann Example", "pw");
        let seeded = remote.add_workspace(owner, "Alpha", &[("A", &[])]);
        let (scheduler, mut renewals) = TokioScheduler::channel();
        let session = SessionManager::new(MemorySlot::default(), scheduler, clock.clone());
        let mut client = BoardClient::new(remote, session, clock, 10, 20);
        client.login("ann", "pw").await.expect("login");

        let cfg = Config::default();
        let mut renderer = Renderer::new(&cfg).expect("renderer");
        let group = seeded.groups[0].to_string();
        let inv = Invocation::parse(
            &cfg,
            ["add", "Alpha", group.as_str(), "Ship", "due:tomorrow"]
                .into_iter()
                .map(OsString::from)
                .collect(),
        )
        .expect("parse");

        dispatch(&mut client, &mut renderer, &mut renewals, inv)
            .await
            .expect("add");

        let expected = parse_due_expr("tomorrow", now, renderer.timezone()).expect("due");
        let store = client.board().store().expect("hydrated");
        let created = store.tasks_in(seeded.groups[0]);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].due_date, Some(expected));
    }
}
