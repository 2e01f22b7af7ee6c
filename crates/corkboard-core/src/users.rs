//! Search-assist list for the assignment picker.
//!
//! Users are paged from the identity service by cursor (the last seen
//! account id), one page ahead of what is shown. Filtering happens
//! locally over everything loaded so far.

use corkboard_shared::{PageArgs, UserDto};
use tracing::{debug, instrument};

use crate::board::Assignee;
use crate::error::SyncError;
use crate::remote::IdentityApi;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum NextPage {
    /// Nothing prefetched, either before opening or after a failed
    /// prefetch.
    #[default]
    Unknown,
    Ready(Vec<UserDto>),
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupView<'a> {
    /// No users loaded at all.
    Empty,
    NoMatches { query: &'a str },
    Matches(Vec<&'a UserDto>),
}

pub fn display_name(user: &UserDto) -> &str {
    if user.full_name.trim().is_empty() {
        &user.username
    } else {
        &user.full_name
    }
}

impl From<&UserDto> for Assignee {
    fn from(user: &UserDto) -> Self {
        Self {
            id: user.account_id,
            display_name: Some(display_name(user).to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserLookup {
    page_size: u32,
    users: Vec<UserDto>,
    query: String,
    next: NextPage,
}

impl Default for UserLookup {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl UserLookup {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            users: Vec::new(),
            query: String::new(),
            next: NextPage::Unknown,
        }
    }

    /// Loads the first page and prefetches the second. Replaces anything
    /// loaded before.
    #[instrument(skip(self, remote, bearer))]
    pub async fn open<R>(&mut self, remote: &R, bearer: &str) -> Result<(), SyncError>
    where
        R: IdentityApi + ?Sized,
    {
        let first = self.fetch(remote, bearer, None).await?;
        self.users = first;
        self.next = NextPage::Unknown;
        self.prefetch(remote, bearer).await
    }

    pub fn search(&mut self, query: &str) {
        self.query = query.trim().to_string();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn users(&self) -> &[UserDto] {
        &self.users
    }

    /// Loaded users whose display name contains the query, ignoring case.
    /// An empty query matches everyone.
    pub fn filtered(&self) -> Vec<&UserDto> {
        let needle = self.query.to_lowercase();
        self.users
            .iter()
            .filter(|user| needle.is_empty() || display_name(user).to_lowercase().contains(&needle))
            .collect()
    }

    pub fn view(&self) -> LookupView<'_> {
        if self.users.is_empty() {
            return LookupView::Empty;
        }
        let matches = self.filtered();
        if matches.is_empty() {
            LookupView::NoMatches { query: &self.query }
        } else {
            LookupView::Matches(matches)
        }
    }

    /// Whether the lookahead page could not be fetched last time.
    pub fn prefetch_failed(&self) -> bool {
        self.next == NextPage::Unknown && !self.users.is_empty()
    }

    pub fn has_more(&self) -> bool {
        matches!(&self.next, NextPage::Ready(page) if !page.is_empty())
    }

    /// Appends the prefetched page and prefetches the one after it.
    /// Returns how many users were appended; zero when there was nothing
    /// more, in which case no request is made. If the last prefetch
    /// failed it is attempted again first.
    #[instrument(skip(self, remote, bearer))]
    pub async fn load_more<R>(&mut self, remote: &R, bearer: &str) -> Result<usize, SyncError>
    where
        R: IdentityApi + ?Sized,
    {
        if self.next == NextPage::Unknown && !self.users.is_empty() {
            debug!("previous prefetch failed, fetching again");
            self.prefetch(remote, bearer).await?;
        }
        if !self.has_more() {
            return Ok(0);
        }
        let NextPage::Ready(page) = std::mem::take(&mut self.next) else {
            return Ok(0);
        };
        let appended = page.len();
        self.users.extend(page);
        self.prefetch(remote, bearer).await?;
        Ok(appended)
    }

    async fn prefetch<R>(&mut self, remote: &R, bearer: &str) -> Result<(), SyncError>
    where
        R: IdentityApi + ?Sized,
    {
        let Some(cursor) = self.users.last().map(|user| user.account_id.0) else {
            self.next = NextPage::Exhausted;
            return Ok(());
        };
        let page = self.fetch(remote, bearer, Some(cursor)).await?;
        debug!(cursor, prefetched = page.len(), "prefetched users");
        self.next = if page.is_empty() {
            NextPage::Exhausted
        } else {
            NextPage::Ready(page)
        };
        Ok(())
    }

    async fn fetch<R>(
        &self,
        remote: &R,
        bearer: &str,
        last_id: Option<i64>,
    ) -> Result<Vec<UserDto>, SyncError>
    where
        R: IdentityApi + ?Sized,
    {
        let page = remote
            .list_users(
                bearer,
                PageArgs {
                    limit: Some(self.page_size),
                    last_id,
                },
            )
            .await?;
        Ok(page.users)
    }
}
