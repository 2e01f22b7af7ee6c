//! Session lifecycle: one live credential, persisted in one slot, with at
//! most one renewal timer pending.
//!
//! ```text
//! NoSession --establish--> Active(armed) --renew ok--> Active(re-armed)
//!     ^                        |
//!     +--terminate / renew failure / logout
//! ```

pub mod slot;
pub mod timer;

use std::sync::Arc;

use corkboard_shared::LoginRequest;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

pub use self::slot::{CredentialSlot, FileSlot, MemorySlot};
pub use self::timer::{RenewalDue, RenewalScheduler, TokioScheduler};
use crate::clock::Clock;
use crate::credential::Credential;
use crate::error::{RemoteError, SyncError};
use crate::remote::IdentityApi;

pub const DEFAULT_RENEWAL_SKEW_MS: i64 = 5_000;

pub struct SessionManager<S, T> {
    slot: S,
    scheduler: T,
    clock: Arc<dyn Clock>,
    skew: chrono::Duration,
    current: Option<Credential>,
    generation: u64,
    armed: Option<u64>,
    watch_tx: watch::Sender<Option<Credential>>,
}

impl<S, T> SessionManager<S, T>
where
    S: CredentialSlot,
    T: RenewalScheduler,
{
    pub fn new(slot: S, scheduler: T, clock: Arc<dyn Clock>) -> Self {
        let (watch_tx, _) = watch::channel(None);
        Self {
            slot,
            scheduler,
            clock,
            skew: chrono::Duration::milliseconds(DEFAULT_RENEWAL_SKEW_MS),
            current: None,
            generation: 0,
            armed: None,
            watch_tx,
        }
    }

    pub fn with_skew(mut self, skew: chrono::Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn skew(&self) -> chrono::Duration {
        self.skew
    }

    pub fn current_credential(&self) -> Option<&Credential> {
        self.current.as_ref()
    }

    /// Raw token for outgoing requests.
    pub fn bearer(&self) -> Result<&str, SyncError> {
        self.current
            .as_ref()
            .map(Credential::raw_token)
            .ok_or(SyncError::NoSession)
    }

    /// Observers see `None` whenever the session ends; that is the cue to
    /// send the user back to sign-in.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.watch_tx.subscribe()
    }

    pub fn renewal_pending(&self) -> bool {
        self.armed.is_some()
    }

    pub fn scheduler(&self) -> &T {
        &self.scheduler
    }

    pub fn slot(&self) -> &S {
        &self.slot
    }

    #[instrument(skip(self, raw_token), fields(len = raw_token.len()))]
    pub fn establish(&mut self, raw_token: &str) -> Result<&Credential, SyncError> {
        let credential = Credential::decode(raw_token)?;
        self.slot.save(credential.raw_token())?;

        self.scheduler.cancel();
        self.armed = None;
        self.generation += 1;

        let now = self.clock.now();
        match credential.renewal_delay(now, self.skew) {
            Some(delay) => {
                let due = RenewalDue {
                    generation: self.generation,
                };
                self.scheduler.arm(delay, due);
                self.armed = Some(self.generation);
                debug!(
                    generation = self.generation,
                    delay_ms = delay.as_millis() as u64,
                    "renewal armed"
                );
            }
            None => {
                debug!(
                    expires_at = ?credential.expires_at,
                    "credential is not renewable ahead of expiry"
                );
            }
        }

        info!(
            subject = credential.subject_id,
            username = %credential.username,
            "session established"
        );
        self.watch_tx.send_replace(Some(credential.clone()));
        Ok(self.current.insert(credential))
    }

    #[instrument(skip(self))]
    pub fn terminate(&mut self) {
        self.scheduler.cancel();
        self.armed = None;
        self.generation += 1;

        if let Err(err) = self.slot.clear() {
            warn!(error = %err, "failed clearing stored session token");
        }

        if self.current.take().is_some() {
            info!("session terminated");
        }
        self.watch_tx.send_replace(None);
    }

    /// Picks up a token left by a previous run. Returns whether a session
    /// is now active.
    #[instrument(skip(self))]
    pub fn restore(&mut self) -> Result<bool, SyncError> {
        let Some(raw) = self.slot.load()? else {
            debug!("no stored session token");
            return Ok(false);
        };

        let credential = match Credential::decode(&raw) {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "stored session token is unreadable; discarding");
                self.terminate();
                return Ok(false);
            }
        };

        if credential.is_expired(self.clock.now()) {
            info!(expires_at = ?credential.expires_at, "stored session token has expired");
            self.terminate();
            return Ok(false);
        }

        self.establish(&raw)?;
        Ok(true)
    }

    #[instrument(skip(self, remote, password))]
    pub async fn login<R>(
        &mut self,
        remote: &R,
        username: &str,
        password: &str,
    ) -> Result<&Credential, SyncError>
    where
        R: IdentityApi + ?Sized,
    {
        let username = username.trim();
        if username.is_empty() {
            return Err(SyncError::Validation { field: "username" });
        }
        if password.is_empty() {
            return Err(SyncError::Validation { field: "password" });
        }

        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = match remote.login(&request).await {
            Ok(response) => response,
            Err(RemoteError::Unauthorized(message)) => {
                warn!("sign-in rejected");
                return Err(SyncError::LoginRejected(message));
            }
            Err(err) => return Err(err.into()),
        };

        self.establish(&response.access_token)
    }

    /// Remote logout is best effort; the local session always ends.
    #[instrument(skip(self, remote))]
    pub async fn logout<R>(&mut self, remote: &R)
    where
        R: IdentityApi + ?Sized,
    {
        if self.current.is_some()
            && let Err(err) = remote.logout().await
        {
            warn!(error = %err, "remote logout failed; ending local session anyway");
        }
        self.terminate();
    }

    /// Handles a fired renewal timer. Fires for a replaced credential are
    /// ignored. A failed refresh ends the session.
    #[instrument(skip(self, remote), fields(generation = due.generation))]
    pub async fn renew<R>(&mut self, remote: &R, due: RenewalDue) -> Result<(), SyncError>
    where
        R: IdentityApi + ?Sized,
    {
        if self.armed != Some(due.generation) {
            debug!(armed = ?self.armed, "ignoring stale renewal fire");
            return Ok(());
        }
        self.armed = None;

        let response = match remote.refresh().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "token refresh failed; signing out");
                self.terminate();
                return Err(SyncError::AuthExpired);
            }
        };

        if let Err(err) = self.establish(&response.access_token) {
            warn!(error = %err, "refreshed token was unusable; signing out");
            self.terminate();
            return Err(SyncError::AuthExpired);
        }
        Ok(())
    }
}
