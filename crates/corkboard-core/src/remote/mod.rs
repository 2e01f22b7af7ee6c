//! Request functions against the board service.
//!
//! Both traits are stateless apart from the refresh cookie, which the
//! transport keeps for itself. Every authenticated call takes the raw
//! bearer token verbatim.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use corkboard_shared::{
    GroupDto, GroupId, GroupRename, LoginRequest, LoginResponse, PageArgs, RefreshResponse,
    TaskCreate, TaskDto, TaskId, TaskPatch, UsersPage, WorkspaceCreate, WorkspaceDto,
    WorkspaceId, WorkspaceSnapshot, WorkspacesPage,
};

pub use self::http::HttpRemote;
pub use self::memory::InMemoryRemote;
use crate::error::RemoteError;

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, RemoteError>;

    /// Exchanges the refresh cookie for a new access token.
    async fn refresh(&self) -> Result<RefreshResponse, RemoteError>;

    async fn logout(&self) -> Result<(), RemoteError>;

    async fn list_users(&self, bearer: &str, page: PageArgs) -> Result<UsersPage, RemoteError>;
}

#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    async fn list_workspaces(
        &self,
        bearer: &str,
        page: PageArgs,
    ) -> Result<WorkspacesPage, RemoteError>;

    async fn create_workspace(
        &self,
        bearer: &str,
        body: &WorkspaceCreate,
    ) -> Result<WorkspaceDto, RemoteError>;

    async fn workspace_by_name(
        &self,
        bearer: &str,
        name: &str,
    ) -> Result<WorkspaceSnapshot, RemoteError>;

    async fn rename_group(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        body: &GroupRename,
    ) -> Result<GroupDto, RemoteError>;

    async fn create_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        body: &TaskCreate,
    ) -> Result<TaskDto, RemoteError>;

    /// The service may answer with an empty body.
    async fn update_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskDto>, RemoteError>;

    async fn delete_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
    ) -> Result<(), RemoteError>;
}

/// Everything the client needs from the service.
pub trait RemoteStore: IdentityApi + WorkspaceApi {}

impl<T: IdentityApi + WorkspaceApi + ?Sized> RemoteStore for T {}
