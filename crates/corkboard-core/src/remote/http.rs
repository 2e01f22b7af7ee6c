use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corkboard_shared::{
    GroupDto, GroupId, GroupRename, LoginRequest, LoginResponse, PageArgs, RefreshResponse,
    TaskCreate, TaskDto, TaskId, TaskPatch, UsersPage, WorkspaceCreate, WorkspaceDto,
    WorkspaceId, WorkspaceSnapshot, WorkspacesPage,
};
use reqwest::cookie::Jar;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{IdentityApi, WorkspaceApi};
use crate::error::RemoteError;

/// Remote store over HTTP. The refresh token travels as a cookie, so the
/// client keeps its own jar for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base: Url,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url.trim())
            .map_err(|err| RemoteError::Transport(format!("invalid base url {base_url:?}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Transport(format!(
                "base url {base_url:?} cannot carry a path"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_provider(Arc::new(Jar::default()))
            .build()
            .map_err(|err| RemoteError::Transport(format!("failed building HTTP client: {err}")))?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Transport(format!("base url {} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn paged(&self, segments: &[&str], page: PageArgs) -> Result<Url, RemoteError> {
        let mut url = self.endpoint(segments)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(limit) = page.limit {
                query.append_pair("limit", &limit.to_string());
            }
            if let Some(last_id) = page.last_id {
                query.append_pair("lastId", &last_id.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, bearer: Option<&str>) -> RequestBuilder {
        debug!(%method, path = url.path(), "remote request");
        let request = self.client.request(method, url);
        match bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
    let response = request
        .send()
        .await
        .map_err(|err| RemoteError::Transport(err.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_detail(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    warn!(status = status.as_u16(), %message, "remote call rejected");

    if status == StatusCode::UNAUTHORIZED {
        Err(RemoteError::Unauthorized(message))
    } else {
        Err(RemoteError::Status {
            code: status.as_u16(),
            message,
        })
    }
}

/// Pulls the message out of a `{"detail": ...}` error body.
fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(trimmed.to_string()),
        },
        _ => Some(trimmed.to_string()),
    }
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let body = response
        .text()
        .await
        .map_err(|err| RemoteError::Transport(err.to_string()))?;
    serde_json::from_str(&body).map_err(|err| RemoteError::Decode(err.to_string()))
}

async fn optional_json<T: DeserializeOwned>(response: Response) -> Result<Option<T>, RemoteError> {
    let body = response
        .text()
        .await
        .map_err(|err| RemoteError::Transport(err.to_string()))?;
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|err| RemoteError::Decode(err.to_string()))
}

#[async_trait]
impl IdentityApi for HttpRemote {
    #[tracing::instrument(skip(self, request), fields(username = %request.username))]
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, RemoteError> {
        let url = self.endpoint(&["identity", "login"])?;
        let response = send(self.request(Method::POST, url, None).json(request)).await?;
        json(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn refresh(&self) -> Result<RefreshResponse, RemoteError> {
        let url = self.endpoint(&["identity", "refresh"])?;
        let response = send(self.request(Method::PUT, url, None)).await?;
        json(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn logout(&self) -> Result<(), RemoteError> {
        let url = self.endpoint(&["identity", "logout"])?;
        send(self.request(Method::DELETE, url, None)).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, bearer))]
    async fn list_users(&self, bearer: &str, page: PageArgs) -> Result<UsersPage, RemoteError> {
        let url = self.paged(&["identity", "users"], page)?;
        let response = send(self.request(Method::GET, url, Some(bearer))).await?;
        json(response).await
    }
}

#[async_trait]
impl WorkspaceApi for HttpRemote {
    #[tracing::instrument(skip(self, bearer))]
    async fn list_workspaces(
        &self,
        bearer: &str,
        page: PageArgs,
    ) -> Result<WorkspacesPage, RemoteError> {
        let url = self.paged(&["workspaces", ""], page)?;
        let response = send(self.request(Method::GET, url, Some(bearer))).await?;
        json(response).await
    }

    #[tracing::instrument(skip(self, bearer, body), fields(name = %body.name))]
    async fn create_workspace(
        &self,
        bearer: &str,
        body: &WorkspaceCreate,
    ) -> Result<WorkspaceDto, RemoteError> {
        let url = self.endpoint(&["workspaces", ""])?;
        let response = send(self.request(Method::POST, url, Some(bearer)).json(body)).await?;
        json(response).await
    }

    #[tracing::instrument(skip(self, bearer))]
    async fn workspace_by_name(
        &self,
        bearer: &str,
        name: &str,
    ) -> Result<WorkspaceSnapshot, RemoteError> {
        let url = self.endpoint(&["workspaces", "by-name", name])?;
        let response = send(self.request(Method::GET, url, Some(bearer))).await?;
        json(response).await
    }

    #[tracing::instrument(skip(self, bearer, body), fields(%workspace, %group))]
    async fn rename_group(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        body: &GroupRename,
    ) -> Result<GroupDto, RemoteError> {
        let (ws, g) = (workspace.to_string(), group.to_string());
        let url = self.endpoint(&["workspaces", &ws, "groups", &g])?;
        let response = send(self.request(Method::PUT, url, Some(bearer)).json(body)).await?;
        json(response).await
    }

    #[tracing::instrument(skip(self, bearer, body), fields(%workspace, %group))]
    async fn create_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        body: &TaskCreate,
    ) -> Result<TaskDto, RemoteError> {
        let (ws, g) = (workspace.to_string(), group.to_string());
        let url = self.endpoint(&["workspaces", &ws, "groups", &g, "tasks"])?;
        let response = send(self.request(Method::POST, url, Some(bearer)).json(body)).await?;
        json(response).await
    }

    #[tracing::instrument(skip(self, bearer, patch), fields(%workspace, %group, %task))]
    async fn update_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskDto>, RemoteError> {
        let (ws, g, t) = (workspace.to_string(), group.to_string(), task.to_string());
        let url = self.endpoint(&["workspaces", &ws, "groups", &g, "tasks", &t])?;
        let response = send(self.request(Method::PATCH, url, Some(bearer)).json(patch)).await?;
        optional_json(response).await
    }

    #[tracing::instrument(skip(self, bearer), fields(%workspace, %group, %task))]
    async fn delete_task(
        &self,
        bearer: &str,
        workspace: WorkspaceId,
        group: GroupId,
        task: TaskId,
    ) -> Result<(), RemoteError> {
        let (ws, g, t) = (workspace.to_string(), group.to_string(), task.to_string());
        let url = self.endpoint(&["workspaces", &ws, "groups", &g, "tasks", &t])?;
        send(self.request(Method::DELETE, url, Some(bearer))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base: &str) -> HttpRemote {
        HttpRemote::new(base, Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn endpoints_keep_base_prefix_and_escape_names() {
        let remote = remote("http://localhost:8000/api/");
        let url = remote
            .endpoint(&["workspaces", "by-name", "Team Alpha/2"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/workspaces/by-name/Team%20Alpha%2F2"
        );

        let listing = remote.endpoint(&["workspaces", ""]).expect("url");
        assert_eq!(listing.path(), "/api/workspaces/");
    }

    #[test]
    fn paging_arguments_use_camel_case_names() {
        let remote = remote("http://localhost:8000");
        let url = remote
            .paged(
                &["identity", "users"],
                PageArgs {
                    limit: Some(10),
                    last_id: Some(42),
                },
            )
            .expect("url");
        assert_eq!(url.query(), Some("limit=10&lastId=42"));

        let bare = remote
            .paged(&["identity", "users"], PageArgs::default())
            .expect("url");
        assert_eq!(bare.query(), None);
    }

    #[test]
    fn error_detail_prefers_detail_field() {
        assert_eq!(
            error_detail(r#"{"detail":"Invalid credentials"}"#).as_deref(),
            Some("Invalid credentials")
        );
        assert_eq!(error_detail("  ").as_deref(), None);
        assert_eq!(error_detail("gateway down").as_deref(), Some("gateway down"));
    }

    #[test]
    fn rejects_urls_without_a_path() {
        assert!(HttpRemote::new("mailto:someone@example.com", Duration::from_secs(1)).is_err());
        assert!(HttpRemote::new("not a url", Duration::from_secs(1)).is_err());
    }
}
