//! In-process stand-in for the board service. It keeps the same contract
//! as [`super::HttpRemote`], records every request, and can be told to
//! fail the next call of a given kind.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corkboard_shared::{
    Audit, GroupDto, GroupId, GroupRename, GroupWithTasks, LoginRequest, LoginResponse,
    PageArgs, RefreshResponse, TaskCreate, TaskDto, TaskId, TaskPatch, UserDto, UserId,
    UsersPage, WorkspaceCreate, WorkspaceDto, WorkspaceId, WorkspaceSnapshot, WorkspacesPage,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::{IdentityApi, WorkspaceApi};
use crate::clock::Clock;
use crate::credential::{Claims, Credential, encode_unsigned};
use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Login,
    Refresh,
    Logout,
    ListUsers,
    ListWorkspaces,
    CreateWorkspace,
    WorkspaceByName,
    RenameGroup,
    CreateTask,
    UpdateTask,
    DeleteTask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub op: Op,
    pub method: &'static str,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SeededWorkspace {
    pub id: WorkspaceId,
    pub groups: Vec<GroupId>,
    /// Task ids per group, in seeding order.
    pub tasks: Vec<Vec<TaskId>>,
}

#[derive(Debug)]
struct Account {
    user: UserDto,
    password: String,
}

#[derive(Debug)]
struct StoredGroup {
    group: GroupDto,
    tasks: Vec<TaskDto>,
}

#[derive(Debug)]
struct StoredWorkspace {
    workspace: WorkspaceDto,
    groups: Vec<StoredGroup>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    token_ttl: Option<chrono::Duration>,
    empty_patch_responses: bool,
    accounts: BTreeMap<UserId, Account>,
    workspaces: BTreeMap<WorkspaceId, StoredWorkspace>,
    refresh_subject: Option<UserId>,
    failures: HashMap<Op, VecDeque<RemoteError>>,
    requests: Vec<RecordedRequest>,
}

impl State {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record<B: Serialize>(&mut self, op: Op, method: &'static str, path: String, body: Option<&B>) {
        let body = body.and_then(|b| serde_json::to_value(b).ok());
        debug!(?op, method, %path, "in-memory request");
        self.requests.push(RecordedRequest {
            op,
            method,
            path,
            body,
        });
    }

    fn injected(&mut self, op: Op) -> Result<(), RemoteError> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn mint(&self, user: UserId, now: DateTime<Utc>) -> Result<String, RemoteError> {
        let account = self
            .accounts
            .get(&user)
            .ok_or_else(|| RemoteError::Unauthorized("unknown account".to_string()))?;
        Ok(encode_unsigned(&Claims {
            id: user.0,
            username: account.user.username.clone(),
            tenant_id: serde_json::json!(1),
            iat: now.timestamp(),
            exp: self.token_ttl.map(|ttl| (now + ttl).timestamp()),
        }))
    }

    fn authorize(&self, bearer: &str, now: DateTime<Utc>) -> Result<UserId, RemoteError> {
        let rejected = || RemoteError::Unauthorized("Could not validate credentials".to_string());
        let credential = Credential::decode(bearer).map_err(|_| rejected())?;
        if credential.is_expired(now) {
            return Err(rejected());
        }
        let user = UserId(credential.subject_id);
        if !self.accounts.contains_key(&user) {
            return Err(rejected());
        }
        Ok(user)
    }

    fn workspace_mut(&mut self, id: WorkspaceId) -> Result<&mut StoredWorkspace, RemoteError> {
        self.workspaces.get_mut(&id).ok_or_else(|| not_found("Workspace"))
    }

    fn display_name(&self, user: Option<UserId>) -> Option<String> {
        user.and_then(|id| self.accounts.get(&id))
            .map(|account| account.user.full_name.clone())
    }
}

fn not_found(what: &str) -> RemoteError {
    RemoteError::Status {
        code: 404,
        message: format!("{what} not found"),
    }
}

fn audit(by: UserId, at: DateTime<Utc>) -> Audit {
    Audit {
        created_by: by,
        created_at: at,
        updated_by: None,
        updated_at: None,
    }
}

fn touch(audit: &mut Audit, by: UserId, at: DateTime<Utc>) {
    audit.updated_by = Some(by);
    audit.updated_at = Some(at);
}

fn task_path(ws: WorkspaceId, group: GroupId, task: TaskId) -> String {
    format!("/workspaces/{ws}/groups/{group}/tasks/{task}")
}

pub struct InMemoryRemote {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Lifetime given to minted access tokens. Without one, tokens carry no
    /// `exp` claim.
    pub fn with_token_ttl(self, ttl: chrono::Duration) -> Self {
        self.state.lock().token_ttl = Some(ttl);
        self
    }

    /// Answer task updates with an empty body, as some deployments do.
    pub fn with_empty_patch_responses(self) -> Self {
        self.state.lock().empty_patch_responses = true;
        self
    }

    pub fn add_user(&self, username: &str, full_name: &str, password: &str) -> UserId {
        let mut state = self.state.lock();
        let id = UserId(state.allocate());
        state.accounts.insert(
            id,
            Account {
                user: UserDto {
                    account_id: id,
                    username: username.to_string(),
                    full_name: full_name.to_string(),
                    email: format!("{username}@example.com"),
                },
                password: password.to_string(),
            },
        );
        id
    }

    /// Seeds a workspace owned by `owner`. Each entry of `groups` is a
    /// column name with the titles of its tasks.
    pub fn add_workspace(
        &self,
        owner: UserId,
        name: &str,
        groups: &[(&str, &[&str])],
    ) -> SeededWorkspace {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let workspace_id = WorkspaceId(state.allocate());
        let mut seeded = SeededWorkspace {
            id: workspace_id,
            groups: Vec::new(),
            tasks: Vec::new(),
        };

        let mut stored_groups = Vec::new();
        for (group_name, titles) in groups {
            let group_id = GroupId(state.allocate());
            let mut tasks = Vec::new();
            let mut ids = Vec::new();
            for title in *titles {
                let task_id = TaskId(state.allocate());
                ids.push(task_id);
                tasks.push(TaskDto {
                    task_id,
                    title: (*title).to_string(),
                    description: None,
                    due_date: None,
                    assigned_to_user_id: None,
                    assigned_to: None,
                    audit: audit(owner, now),
                });
            }
            seeded.groups.push(group_id);
            seeded.tasks.push(ids);
            stored_groups.push(StoredGroup {
                group: GroupDto {
                    group_id,
                    name: (*group_name).to_string(),
                    audit: audit(owner, now),
                },
                tasks,
            });
        }

        state.workspaces.insert(
            workspace_id,
            StoredWorkspace {
                workspace: WorkspaceDto {
                    workspace_id,
                    name: name.to_string(),
                    audit: audit(owner, now),
                },
                groups: stored_groups,
            },
        );
        seeded
    }

    /// Makes the next call of kind `op` fail with `err`. Calls queue up.
    pub fn fail_next(&self, op: Op, err: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Drops the refresh cookie server-side, so the next refresh is a 401.
    pub fn revoke_refresh(&self) {
        self.state.lock().refresh_subject = None;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_for(&self, op: Op) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| request.op == op)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Group currently holding `task`, as the server sees it.
    pub fn task_group(&self, task: TaskId) -> Option<GroupId> {
        let state = self.state.lock();
        state.workspaces.values().find_map(|ws| {
            ws.groups
                .iter()
                .find(|g| g.tasks.iter().any(|t| t.task_id == task))
                .map(|g| g.group.group_id)
        })
    }

    pub fn task(&self, task: TaskId) -> Option<TaskDto> {
        let state = self.state.lock();
        state
            .workspaces
            .values()
            .flat_map(|ws| ws.groups.iter())
            .flat_map(|g| g.tasks.iter())
            .find(|t| t.task_id == task)
            .cloned()
    }

    pub fn group_name(&self, group: GroupId) -> Option<String> {
        let state = self.state.lock();
        state
            .workspaces
            .values()
            .flat_map(|ws| ws.groups.iter())
            .find(|g| g.group.group_id == group)
            .map(|g| g.group.name.clone())
    }
}

#[async_trait]
impl IdentityApi for InMemoryRemote {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record(
            Op::Login,
            "POST",
            "/identity/login".to_string(),
            Some(&serde_json::json!({ "username": request.username })),
        );
        state.injected(Op::Login)?;

        let user = state
            .accounts
            .values()
            .find(|account| {
                account.user.username == request.username && account.password == request.password
            })
            .map(|account| account.user.account_id)
            .ok_or_else(|| RemoteError::Unauthorized("Invalid username or password".to_string()))?;

        let access_token = state.mint(user, now)?;
        let refresh_token = format!("refresh-{}", state.allocate());
        state.refresh_subject = Some(user);
        Ok(LoginResponse {
            access_token,
            refresh_token,
        })
    }

    async fn refresh(&self) -> Result<RefreshResponse, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record::<()>(Op::Refresh, "PUT", "/identity/refresh".to_string(), None);
        state.injected(Op::Refresh)?;

        let user = state
            .refresh_subject
            .ok_or_else(|| RemoteError::Unauthorized("Refresh token missing".to_string()))?;
        Ok(RefreshResponse {
            access_token: state.mint(user, now)?,
        })
    }

    async fn logout(&self) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.record::<()>(Op::Logout, "DELETE", "/identity/logout".to_string(), None);
        state.injected(Op::Logout)?;
        state.refresh_subject = None;
        Ok(())
    }

    async fn list_users(&self, bearer: &str, page: PageArgs) -> Result<UsersPage, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record(Op::ListUsers, "GET", "/identity/users".to_string(), Some(&page));
        state.injected(Op::ListUsers)?;
        state.authorize(bearer, now)?;

        let after = page.last_id.unwrap_or(i64::MIN);
        let limit = page.limit.unwrap_or(10) as usize;
        let users = state
            .accounts
            .range(UserId(after.saturating_add(1))..)
            .take(limit)
            .map(|(_, account)| account.user.clone())
            .collect();
        Ok(UsersPage { users })
    }
}

#[async_trait]
impl WorkspaceApi for InMemoryRemote {
    async fn list_workspaces(
        &self,
        bearer: &str,
        page: PageArgs,
    ) -> Result<WorkspacesPage, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record(Op::ListWorkspaces, "GET", "/workspaces/".to_string(), Some(&page));
        state.injected(Op::ListWorkspaces)?;
        state.authorize(bearer, now)?;

        let after = page.last_id.unwrap_or(i64::MIN);
        let limit = page.limit.unwrap_or(20) as usize;
        let workspaces = state
            .workspaces
            .range(WorkspaceId(after.saturating_add(1))..)
            .take(limit)
            .map(|(_, ws)| ws.workspace.clone())
            .collect();
        Ok(WorkspacesPage { workspaces })
    }

    async fn create_workspace(
        &self,
        bearer: &str,
        body: &WorkspaceCreate,
    ) -> Result<WorkspaceDto, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record(Op::CreateWorkspace, "POST", "/workspaces/".to_string(), Some(body));
        state.injected(Op::CreateWorkspace)?;
        let user = state.authorize(bearer, now)?;

        if state.workspaces.values().any(|ws| ws.workspace.name == body.name) {
            return Err(RemoteError::Status {
                code: 409,
                message: "Workspace already exists".to_string(),
            });
        }

        let workspace_id = WorkspaceId(state.allocate());
        let workspace = WorkspaceDto {
            workspace_id,
            name: body.name.clone(),
            audit: audit(user, now),
        };
        state.workspaces.insert(
            workspace_id,
            StoredWorkspace {
                workspace: workspace.clone(),
                groups: Vec::new(),
            },
        );
        Ok(workspace)
    }

    async fn workspace_by_name(
        &self,
        bearer: &str,
        name: &str,
    ) -> Result<WorkspaceSnapshot, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record::<()>(
            Op::WorkspaceByName,
            "GET",
            format!("/workspaces/by-name/{name}"),
            None,
        );
        state.injected(Op::WorkspaceByName)?;
        state.authorize(bearer, now)?;

        let stored = state
            .workspaces
            .values()
            .find(|ws| ws.workspace.name == name)
            .ok_or_else(|| not_found("Workspace"))?;
        Ok(WorkspaceSnapshot {
            workspace_id: stored.workspace.workspace_id,
            groups: stored
                .groups
                .iter()
                .map(|g| GroupWithTasks {
                    group_id: g.group.group_id,
                    name: g.group.name.clone(),
                    tasks: g.tasks.clone(),
                    audit: g.group.audit.clone(),
                })
                .collect(),
        })
    }

    async fn rename_group(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        body: &GroupRename,
    ) -> Result<GroupDto, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record(
            Op::RenameGroup,
            "PUT",
            format!("/workspaces/{workspace}/groups/{group}"),
            Some(body),
        );
        state.injected(Op::RenameGroup)?;
        let user = state.authorize(bearer, now)?;

        let stored = state
            .workspace_mut(workspace)?
            .groups
            .iter_mut()
            .find(|g| g.group.group_id == group)
            .ok_or_else(|| not_found("Group"))?;
        stored.group.name = body.name.clone();
        touch(&mut stored.group.audit, user, now);
        Ok(stored.group.clone())
    }

    async fn create_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        body: &TaskCreate,
    ) -> Result<TaskDto, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record(
            Op::CreateTask,
            "POST",
            format!("/workspaces/{workspace}/groups/{group}/tasks"),
            Some(body),
        );
        state.injected(Op::CreateTask)?;
        let user = state.authorize(bearer, now)?;

        let task_id = TaskId(state.allocate());
        let assigned_to = state.display_name(body.assigned_to_user_id);
        let task = TaskDto {
            task_id,
            title: body.title.clone(),
            description: body.description.clone(),
            due_date: body.due_date,
            assigned_to_user_id: body.assigned_to_user_id,
            assigned_to,
            audit: audit(user, now),
        };
        state
            .workspace_mut(workspace)?
            .groups
            .iter_mut()
            .find(|g| g.group.group_id == group)
            .ok_or_else(|| not_found("Group"))?
            .tasks
            .push(task.clone());
        Ok(task)
    }

    async fn update_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskDto>, RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record(Op::UpdateTask, "PATCH", task_path(workspace, group, task), Some(patch));
        state.injected(Op::UpdateTask)?;
        let user = state.authorize(bearer, now)?;
        let assigned_to = match patch.assigned_to_user_id {
            Some(assignee) => Some(state.display_name(assignee)),
            None => None,
        };
        let empty_response = state.empty_patch_responses;

        let stored = state.workspace_mut(workspace)?;
        let source = stored
            .groups
            .iter()
            .position(|g| g.group.group_id == group)
            .ok_or_else(|| not_found("Group"))?;
        let index = stored.groups[source]
            .tasks
            .iter()
            .position(|t| t.task_id == task)
            .ok_or_else(|| not_found("Task"))?;
        let target = match patch.to_group_id {
            Some(to) => Some(
                stored
                    .groups
                    .iter()
                    .position(|g| g.group.group_id == to)
                    .ok_or_else(|| not_found("Group"))?,
            ),
            None => None,
        };

        let mut updated = stored.groups[source].tasks.remove(index);
        if let Some(title) = &patch.title {
            updated.title = title.clone();
        }
        if let Some(description) = &patch.description {
            updated.description = description.clone();
        }
        if let Some(due_date) = patch.due_date {
            updated.due_date = due_date;
        }
        if let Some(assignee) = patch.assigned_to_user_id {
            updated.assigned_to_user_id = assignee;
            updated.assigned_to = assigned_to.flatten();
        }
        touch(&mut updated.audit, user, now);

        let destination = target.unwrap_or(source);
        stored.groups[destination].tasks.push(updated.clone());

        Ok((!empty_response).then_some(updated))
    }

    async fn delete_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
    ) -> Result<(), RemoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.record::<()>(Op::DeleteTask, "DELETE", task_path(workspace, group, task), None);
        state.injected(Op::DeleteTask)?;
        state.authorize(bearer, now)?;

        let stored = state
            .workspace_mut(workspace)?
            .groups
            .iter_mut()
            .find(|g| g.group.group_id == group)
            .ok_or_else(|| not_found("Group"))?;
        let before = stored.tasks.len();
        stored.tasks.retain(|t| t.task_id != task);
        if stored.tasks.len() == before {
            return Err(not_found("Task"));
        }
        Ok(())
    }
}
