//! Wires the session, the board and the pickers to one remote store.
//!
//! Every authenticated call reads the bearer from the session at call
//! time. When the service reports the credential as no longer valid the
//! session ends and everything scoped to it is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use corkboard_shared::WorkspaceDto;
use tracing::{info, instrument, warn};

use crate::board::{Board, Intent, PendingMutation, SettleOutcome};
use crate::clock::Clock;
use crate::credential::Credential;
use crate::error::SyncError;
use crate::remote::RemoteStore;
use crate::session::{CredentialSlot, RenewalDue, RenewalScheduler, SessionManager};
use crate::users::UserLookup;
use crate::workspaces::WorkspaceDirectory;

pub struct BoardClient<R: ?Sized, S, T> {
    remote: Arc<R>,
    session: SessionManager<S, T>,
    clock: Arc<dyn Clock>,
    board: Board,
    users: UserLookup,
    workspaces: WorkspaceDirectory,
    user_page_size: u32,
    workspace_page_size: u32,
}

impl<R, S, T> BoardClient<R, S, T>
where
    R: RemoteStore + ?Sized,
    S: CredentialSlot,
    T: RenewalScheduler,
{
    pub fn new(
        remote: Arc<R>,
        session: SessionManager<S, T>,
        clock: Arc<dyn Clock>,
        user_page_size: u32,
        workspace_page_size: u32,
    ) -> Self {
        Self {
            remote,
            session,
            board: Board::new(clock.clone()),
            clock,
            users: UserLookup::new(user_page_size),
            workspaces: WorkspaceDirectory::new(workspace_page_size),
            user_page_size,
            workspace_page_size,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn session(&self) -> &SessionManager<S, T> {
        &self.session
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Direct access for UI events that never reach the server, like
    /// opening an editor or hovering during a drag.
    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    pub fn users(&self) -> &UserLookup {
        &self.users
    }

    pub fn users_mut(&mut self) -> &mut UserLookup {
        &mut self.users
    }

    pub fn workspaces(&self) -> &WorkspaceDirectory {
        &self.workspaces
    }

    pub fn restore(&mut self) -> Result<bool, SyncError> {
        self.session.restore()
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<Credential, SyncError> {
        let credential = self
            .session
            .login(&*self.remote, username, password)
            .await?
            .clone();
        Ok(credential)
    }

    pub async fn logout(&mut self) {
        self.session.logout(&*self.remote).await;
        self.drop_scoped_state();
    }

    /// Handles a fired renewal timer.
    pub async fn on_renewal_due(&mut self, due: RenewalDue) -> Result<(), SyncError> {
        let result = self.session.renew(&*self.remote, due).await;
        if result.as_ref().is_err_and(SyncError::is_auth_expired) {
            self.drop_scoped_state();
        }
        result
    }

    #[instrument(skip(self))]
    pub async fn open_workspace(&mut self, name: &str) -> Result<(), SyncError> {
        let bearer = self.bearer()?;
        let result = self.board.hydrate(&*self.remote, &bearer, name).await;
        self.guard(result)
    }

    pub async fn refresh_workspaces(&mut self) -> Result<&[WorkspaceDto], SyncError> {
        let bearer = self.bearer()?;
        let result = self.workspaces.refresh(&*self.remote, &bearer).await;
        self.guard(result)?;
        Ok(self.workspaces.entries())
    }

    pub async fn more_workspaces(&mut self) -> Result<usize, SyncError> {
        let bearer = self.bearer()?;
        let result = self.workspaces.load_next(&*self.remote, &bearer).await;
        self.guard(result)
    }

    pub async fn create_workspace(&mut self, name: &str) -> Result<WorkspaceDto, SyncError> {
        let bearer = self.bearer()?;
        let result = self.workspaces.create(&*self.remote, &bearer, name).await;
        self.guard(result)
    }

    pub async fn open_users(&mut self) -> Result<(), SyncError> {
        let bearer = self.bearer()?;
        let result = self.users.open(&*self.remote, &bearer).await;
        self.guard(result)
    }

    pub async fn more_users(&mut self) -> Result<usize, SyncError> {
        let bearer = self.bearer()?;
        let result = self.users.load_more(&*self.remote, &bearer).await;
        self.guard(result)
    }

    /// Plans `intent` and drives it to settlement. `None` means the intent
    /// changed nothing and no request was made.
    pub async fn apply(&mut self, intent: Intent) -> Result<Option<SettleOutcome>, SyncError> {
        let Some(pending) = self.board.plan(intent)? else {
            return Ok(None);
        };
        self.complete(pending).await.map(Some)
    }

    /// Re-sends a recorded sync failure.
    pub async fn retry(&mut self, failure_id: u64) -> Result<Option<SettleOutcome>, SyncError> {
        let Some(pending) = self.board.retry(failure_id)? else {
            return Ok(None);
        };
        self.complete(pending).await.map(Some)
    }

    /// Dispatches an already planned mutation and folds its response back
    /// into the board.
    #[instrument(skip(self, pending), fields(intent = pending.intent().label(), ticket = pending.ticket().id))]
    pub async fn complete(&mut self, pending: PendingMutation) -> Result<SettleOutcome, SyncError> {
        let bearer = match self.bearer() {
            Ok(bearer) => bearer,
            Err(err) => {
                self.board.reset();
                return Err(err);
            }
        };
        let settlement = pending.dispatch(&*self.remote, &bearer).await;
        let outcome = self.board.settle(settlement);
        if let SettleOutcome::Failed {
            auth_expired: true, ..
        } = outcome
        {
            self.expire();
            return Err(SyncError::AuthExpired);
        }
        Ok(outcome)
    }

    fn bearer(&self) -> Result<String, SyncError> {
        self.session.bearer().map(str::to_string)
    }

    fn guard<V>(&mut self, result: Result<V, SyncError>) -> Result<V, SyncError> {
        if result.as_ref().is_err_and(SyncError::is_auth_expired) {
            self.expire();
        }
        result
    }

    fn expire(&mut self) {
        warn!("service rejected the session credential");
        self.session.terminate();
        self.drop_scoped_state();
    }

    fn drop_scoped_state(&mut self) {
        info!("clearing session-scoped state");
        self.board.reset();
        self.users = UserLookup::new(self.user_page_size);
        self.workspaces = WorkspaceDirectory::new(self.workspace_page_size);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use corkboard_shared::TaskId;

    use super::*;
    use crate::board::TaskDraft;
    use crate::clock::FixedClock;
    use crate::remote::InMemoryRemote;
    use crate::remote::memory::Op;
    use crate::session::{MemorySlot, TokioScheduler};

    type TestClient = BoardClient<InMemoryRemote, MemorySlot, TokioScheduler>;

    fn client() -> (TestClient, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let remote = Arc::new(InMemoryRemote::new(clock.clone()));
        let owner = remote.add_user("ann", "Ann Example", "pw");
        remote.add_workspace(owner, "Alpha", &[("A", &["T1"]), ("B", &[])]);
        let (scheduler, _rx) = TokioScheduler::channel();
        let session = SessionManager::new(MemorySlot::default(), scheduler, clock.clone());
        (BoardClient::new(remote, session, clock.clone(), 10, 20), clock)
    }

    #[tokio::test]
    async fn rejected_bearer_ends_the_session_and_clears_the_board() {
        let (mut client, _clock) = client();
        client.login("ann", "pw").await.expect("login");
        client.open_workspace("Alpha").await.expect("open");
        let group = client
            .board()
            .store()
            .and_then(|s| s.groups().next().map(|g| g.id))
            .expect("group");

        client
            .remote()
            .fail_next(Op::CreateTask, crate::error::RemoteError::Unauthorized("expired".into()));
        let result = client
            .apply(Intent::CreateTask {
                group,
                draft: TaskDraft::titled("T2"),
            })
            .await;

        assert!(matches!(result, Err(SyncError::AuthExpired)));
        assert!(client.session().current_credential().is_none());
        assert!(!client.board().is_hydrated());
        assert!(client.board().failures().is_empty());
    }

    #[tokio::test]
    async fn calls_without_a_session_fail_closed() {
        let (mut client, _clock) = client();
        assert!(matches!(
            client.open_workspace("Alpha").await,
            Err(SyncError::NoSession)
        ));
        assert!(client.remote().requests().is_empty());
        assert!(matches!(
            client.apply(Intent::DeleteTask { task: TaskId(1) }).await,
            Err(SyncError::NotHydrated)
        ));
    }
}
