use corkboard_shared::{PageArgs, WorkspaceCreate, WorkspaceDto};
use tracing::{info, instrument};

use crate::error::SyncError;
use crate::remote::WorkspaceApi;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// The workspace sidebar: a cursor-paged listing plus creation.
#[derive(Debug, Clone)]
pub struct WorkspaceDirectory {
    page_size: u32,
    entries: Vec<WorkspaceDto>,
    exhausted: bool,
}

impl Default for WorkspaceDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl WorkspaceDirectory {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            entries: Vec::new(),
            exhausted: false,
        }
    }

    pub fn entries(&self) -> &[WorkspaceDto] {
        &self.entries
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Reloads from the first page. The current listing stays in place
    /// until the first page has arrived.
    pub async fn refresh<R>(&mut self, remote: &R, bearer: &str) -> Result<(), SyncError>
    where
        R: WorkspaceApi + ?Sized,
    {
        let first = self.fetch(remote, bearer, None).await?;
        self.exhausted = first.len() < self.page_size as usize;
        self.entries = first;
        Ok(())
    }

    /// Fetches the page after the last loaded workspace. Returns how many
    /// entries were added.
    #[instrument(skip(self, remote, bearer))]
    pub async fn load_next<R>(&mut self, remote: &R, bearer: &str) -> Result<usize, SyncError>
    where
        R: WorkspaceApi + ?Sized,
    {
        if self.exhausted {
            return Ok(0);
        }
        let last_id = self.entries.last().map(|ws| ws.workspace_id.0);
        let page = self.fetch(remote, bearer, last_id).await?;
        let added = page.len();
        if added < self.page_size as usize {
            self.exhausted = true;
        }
        self.entries.extend(page);
        Ok(added)
    }

    async fn fetch<R>(
        &self,
        remote: &R,
        bearer: &str,
        last_id: Option<i64>,
    ) -> Result<Vec<WorkspaceDto>, SyncError>
    where
        R: WorkspaceApi + ?Sized,
    {
        let page = remote
            .list_workspaces(
                bearer,
                PageArgs {
                    limit: Some(self.page_size),
                    last_id,
                },
            )
            .await?;
        Ok(page.workspaces)
    }

    #[instrument(skip(self, remote, bearer))]
    pub async fn create<R>(
        &mut self,
        remote: &R,
        bearer: &str,
        name: &str,
    ) -> Result<WorkspaceDto, SyncError>
    where
        R: WorkspaceApi + ?Sized,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation { field: "name" });
        }
        let created = remote
            .create_workspace(
                bearer,
                &WorkspaceCreate {
                    name: name.to_string(),
                },
            )
            .await?;
        info!(workspace = %created.workspace_id, name = %created.name, "workspace created");
        if self.exhausted {
            self.entries.push(created.clone());
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use corkboard_shared::LoginRequest;

    use super::*;
    use crate::clock::FixedClock;
    use crate::remote::memory::Op;
    use crate::remote::{IdentityApi, InMemoryRemote};

    #[tokio::test]
    async fn pages_until_a_short_page_and_creates() {
        let remote = InMemoryRemote::new(Arc::new(FixedClock::new(Utc::now())));
        let owner = remote.add_user("ann", "Ann", "pw");
        for name in ["One", "Two", "Three"] {
            remote.add_workspace(owner, name, &[]);
        }
        let token = remote
            .login(&LoginRequest {
                username: "ann".to_string(),
                password: "pw".to_string(),
            })
            .await
            .expect("login")
            .access_token;

        let mut directory = WorkspaceDirectory::new(2);
        directory.refresh(&remote, &token).await.expect("first page");
        assert_eq!(directory.entries().len(), 2);
        assert!(!directory.is_exhausted());

        assert_eq!(directory.load_next(&remote, &token).await.expect("next"), 1);
        assert!(directory.is_exhausted());

        let created = directory.create(&remote, &token, " Four ").await.expect("create");
        assert_eq!(created.name, "Four");
        assert_eq!(directory.entries().len(), 4);

        remote.clear_requests();
        assert!(matches!(
            directory.create(&remote, &token, "  ").await,
            Err(SyncError::Validation { field: "name" })
        ));
        assert!(remote.requests_for(Op::CreateWorkspace).is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_last_listing() {
        let remote = InMemoryRemote::new(Arc::new(FixedClock::new(Utc::now())));
        let owner = remote.add_user("ann", "Ann", "pw");
        remote.add_workspace(owner, "One", &[]);
        let token = remote
            .login(&LoginRequest {
                username: "ann".to_string(),
                password: "pw".to_string(),
            })
            .await
            .expect("login")
            .access_token;

        let mut directory = WorkspaceDirectory::new(5);
        directory.refresh(&remote, &token).await.expect("first load");
        remote.fail_next(
            Op::ListWorkspaces,
            crate::error::RemoteError::Transport("offline".to_string()),
        );

        assert!(matches!(
            directory.refresh(&remote, &token).await,
            Err(SyncError::Network(_))
        ));
        let names: Vec<_> = directory.entries().iter().map(|ws| ws.name.as_str()).collect();
        assert_eq!(names, vec!["One"]);
        assert!(directory.is_exhausted());
    }
}
