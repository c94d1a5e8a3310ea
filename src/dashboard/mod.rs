//! The bookmark dashboard: local list state, search, the optimistic delete
//! policy and the merge of change-feed events.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{AuthProvider, BookmarkRepository, ChangeEvent, ChangeFeed, Subscription};
use crate::error::AppError;
use crate::models::{AuthUser, Bookmark, NewBookmark};

pub mod alert;
pub mod form;
pub mod search;
pub mod view;

pub use alert::{AlertSink, ConsoleAlerts};
pub use form::AddBookmarkForm;

pub const DELETE_FAILED_ALERT: &str = "Failed to delete bookmark";

/// What to show when the (filtered) list is empty.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EmptyState {
    pub title: String,
    pub hint: String,
    pub action: Option<String>,
}

pub struct Dashboard {
    user: AuthUser,
    repo: Arc<dyn BookmarkRepository>,
    alerts: Arc<dyn AlertSink>,
    bookmarks: Vec<Bookmark>,
    loading: bool,
    search_query: String,
    add_modal_open: bool,
    feed: Option<Subscription>,
}

impl Dashboard {
    pub fn new(user: AuthUser, repo: Arc<dyn BookmarkRepository>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            user,
            repo,
            alerts,
            bookmarks: Vec::new(),
            loading: true,
            search_query: String::new(),
            add_modal_open: false,
            feed: None,
        }
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_live(&self) -> bool {
        self.feed.is_some()
    }

    /// Replaces the list with the backend's. Failures are logged and the
    /// current list is kept.
    pub async fn fetch_bookmarks(&mut self) {
        match self.repo.fetch_bookmarks().await {
            Ok(bookmarks) => {
                debug!(count = bookmarks.len(), "Bookmarks loaded.");
                self.bookmarks = bookmarks;
            }
            Err(e) => {
                error!(error = %e, "Error fetching bookmarks.");
            }
        }
        self.loading = false;
    }

    /// Removes the bookmark locally first. If the backend refuses, the list
    /// is reloaded from the backend and the user is alerted.
    pub async fn delete_bookmark(&mut self, id: Uuid) {
        self.bookmarks.retain(|b| b.id != id);

        if let Err(e) = self.repo.delete_bookmark(id).await {
            self.fetch_bookmarks().await;
            error!(bookmark_id = %id, error = %e, "Error deleting bookmark.");
            self.alerts.alert(DELETE_FAILED_ALERT);
        }
    }

    /// Patches the list with one change-feed event.
    pub fn apply_change(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Insert(bookmark) => {
                debug!(bookmark_id = %bookmark.id, "Adding new bookmark.");
                self.bookmarks.insert(0, bookmark);
            }
            ChangeEvent::Update(bookmark) => {
                debug!(bookmark_id = %bookmark.id, "Updating bookmark.");
                for slot in self.bookmarks.iter_mut().filter(|b| b.id == bookmark.id) {
                    *slot = bookmark.clone();
                }
            }
            ChangeEvent::Delete { id } => {
                debug!(bookmark_id = %id, "Deleting bookmark.");
                self.bookmarks.retain(|b| b.id != id);
            }
        }
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    pub fn filtered_bookmarks(&self) -> Vec<&Bookmark> {
        search::filter(&self.bookmarks, &self.search_query)
    }

    /// Counts everything saved, not just what the search shows.
    pub fn count_label(&self) -> String {
        match self.bookmarks.len() {
            1 => "1 bookmark saved".to_string(),
            n => format!("{n} bookmarks saved"),
        }
    }

    pub fn empty_state(&self) -> Option<EmptyState> {
        if self.loading || !self.filtered_bookmarks().is_empty() {
            return None;
        }
        Some(if self.search_query.is_empty() {
            EmptyState {
                title: "No bookmarks yet".to_string(),
                hint: "Start by adding your first bookmark".to_string(),
                action: Some("Add Your First Bookmark".to_string()),
            }
        } else {
            EmptyState {
                title: "No bookmarks found".to_string(),
                hint: "Try a different search term".to_string(),
                action: None,
            }
        })
    }

    pub fn open_add_modal(&mut self) {
        self.add_modal_open = true;
    }

    pub fn close_add_modal(&mut self) {
        self.add_modal_open = false;
    }

    pub fn is_add_modal_open(&self) -> bool {
        self.add_modal_open
    }

    /// Saves a new bookmark. The list itself is left alone; the row shows up
    /// through the change-feed's INSERT.
    pub async fn add_bookmark(&mut self, form: &AddBookmarkForm) -> Result<Bookmark, AppError> {
        let (title, url) = form.validate()?;
        let created = self
            .repo
            .insert_bookmark(NewBookmark {
                title,
                url,
                user_id: self.user.id,
            })
            .await?;
        info!(bookmark_id = %created.id, "Bookmark added.");
        self.close_add_modal();
        Ok(created)
    }

    /// Sign-out failures are only logged.
    pub async fn sign_out(&self, auth: &dyn AuthProvider, access_token: &str) {
        match auth.sign_out(access_token).await {
            Ok(()) => info!(user_id = %self.user.id, "Signed out."),
            Err(e) => error!(error = %e, "Error signing out."),
        }
    }

    /// Loads the list, then starts listening for changes to this user's rows.
    pub async fn mount(&mut self, feed: &dyn ChangeFeed) {
        self.fetch_bookmarks().await;

        match feed.subscribe(self.user.id).await {
            Ok(subscription) => {
                info!(user_id = %self.user.id, channel = %subscription.channel(), "Live updates enabled.");
                self.feed = Some(subscription);
            }
            Err(e) => {
                warn!(user_id = %self.user.id, error = %e, "Could not subscribe to changes; continuing without live updates.");
            }
        }
    }

    pub async fn unmount(&mut self) {
        if let Some(subscription) = self.feed.take() {
            subscription.unsubscribe().await;
        }
    }

    /// Tears down the current user's feed and starts over for `user`, whose
    /// rows are read through `repo`.
    pub async fn switch_user(&mut self, user: AuthUser, repo: Arc<dyn BookmarkRepository>, feed: &dyn ChangeFeed) {
        self.unmount().await;
        self.user = user;
        self.repo = repo;
        self.bookmarks.clear();
        self.loading = true;
        self.search_query.clear();
        self.add_modal_open = false;
        self.mount(feed).await;
    }

    /// Waits for the next change. `None` when no feed is mounted or the feed
    /// has ended; an ended feed is released.
    pub async fn next_change(&mut self) -> Option<ChangeEvent> {
        let subscription = self.feed.as_mut()?;
        match subscription.recv().await {
            Some(event) => Some(event),
            None => {
                warn!(user_id = %self.user.id, "Change feed ended; live updates stopped.");
                self.feed = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::dashboard::alert::recording::RecordingAlerts;
    use chrono::Utc;
    use std::time::Duration;

    struct Harness {
        backend: MemoryBackend,
        alerts: Arc<RecordingAlerts>,
        user: AuthUser,
        dashboard: Dashboard,
    }

    fn harness() -> Harness {
        let backend = MemoryBackend::new();
        let alerts = Arc::new(RecordingAlerts::default());
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some("ada@example.com".to_string()),
        };
        let dashboard = Dashboard::new(user.clone(), Arc::new(backend.clone()), alerts.clone());
        Harness {
            backend,
            alerts,
            user,
            dashboard,
        }
    }

    fn titles(dashboard: &Dashboard) -> Vec<String> {
        dashboard.bookmarks().iter().map(|b| b.title.clone()).collect()
    }

    async fn next_change(dashboard: &mut Dashboard) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(2), dashboard.next_change())
            .await
            .expect("change arrives")
            .expect("feed open")
    }

    #[tokio::test]
    async fn test_fetch_loads_newest_first() {
        let mut h = harness();
        h.backend.seed(vec![
            MemoryBackend::bookmark(h.user.id, "old", "https://old.example", 60),
            MemoryBackend::bookmark(h.user.id, "new", "https://new.example", 1),
        ]);

        assert!(h.dashboard.is_loading());
        h.dashboard.fetch_bookmarks().await;

        assert!(!h.dashboard.is_loading());
        assert_eq!(titles(&h.dashboard), vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_fetch_error_is_swallowed() {
        let mut h = harness();
        h.backend.seed(vec![MemoryBackend::bookmark(h.user.id, "kept", "https://k.example", 1)]);
        h.dashboard.fetch_bookmarks().await;

        h.backend.fail_next_fetches(1);
        h.dashboard.fetch_bookmarks().await;

        assert!(!h.dashboard.is_loading());
        assert_eq!(titles(&h.dashboard), vec!["kept"]);
        assert!(h.alerts.messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_first_fetch_shows_empty_state() {
        let mut h = harness();
        h.backend.fail_next_fetches(1);
        h.dashboard.fetch_bookmarks().await;

        assert!(h.dashboard.bookmarks().is_empty());
        assert_eq!(h.dashboard.empty_state().map(|e| e.title), Some("No bookmarks yet".to_string()));
    }

    #[tokio::test]
    async fn test_successful_delete_is_not_restored() {
        let mut h = harness();
        let doomed = MemoryBackend::bookmark(h.user.id, "doomed", "https://d.example", 2);
        let kept = MemoryBackend::bookmark(h.user.id, "kept", "https://k.example", 1);
        h.backend.seed(vec![doomed.clone(), kept]);
        h.dashboard.fetch_bookmarks().await;

        h.dashboard.delete_bookmark(doomed.id).await;

        assert_eq!(titles(&h.dashboard), vec!["kept"]);
        assert_eq!(h.backend.delete_calls(), vec![doomed.id]);
        assert_eq!(h.backend.fetch_calls(), 1);
        assert!(h.alerts.messages().is_empty());

        h.dashboard.fetch_bookmarks().await;
        assert!(h.dashboard.bookmarks().iter().all(|b| b.id != doomed.id));
    }

    #[tokio::test]
    async fn test_failed_delete_refetches_and_alerts() {
        let mut h = harness();
        let target = MemoryBackend::bookmark(h.user.id, "target", "https://t.example", 3);
        let other = MemoryBackend::bookmark(h.user.id, "other", "https://o.example", 2);
        h.backend.seed(vec![target.clone(), other.clone()]);
        h.dashboard.fetch_bookmarks().await;

        // Someone else added a row meanwhile; the refetch shows it verbatim.
        let remote = MemoryBackend::bookmark(h.user.id, "remote", "https://r.example", 0);
        h.backend
            .replace_rows_on_failed_delete(vec![target.clone(), other.clone(), remote.clone()]);
        h.backend.fail_next_deletes(1);

        h.dashboard.delete_bookmark(target.id).await;

        assert_eq!(titles(&h.dashboard), vec!["remote", "other", "target"]);
        assert_eq!(h.backend.fetch_calls(), 2);
        assert_eq!(h.alerts.messages(), vec![DELETE_FAILED_ALERT.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_delete_with_failed_refetch_keeps_optimistic_list() {
        let mut h = harness();
        let target = MemoryBackend::bookmark(h.user.id, "target", "https://t.example", 2);
        let other = MemoryBackend::bookmark(h.user.id, "other", "https://o.example", 1);
        h.backend.seed(vec![target.clone(), other.clone()]);
        h.dashboard.fetch_bookmarks().await;

        h.backend.fail_next_deletes(1);
        h.backend.fail_next_fetches(1);
        h.dashboard.delete_bookmark(target.id).await;

        assert_eq!(titles(&h.dashboard), vec!["other"]);
        assert!(!h.dashboard.is_loading());
        assert_eq!(h.backend.fetch_calls(), 2);
        assert_eq!(h.alerts.messages(), vec![DELETE_FAILED_ALERT.to_string()]);
    }

    #[tokio::test]
    async fn test_apply_change_by_event_type() {
        let mut h = harness();
        let a = MemoryBackend::bookmark(h.user.id, "a", "https://a.example", 3);
        let b = MemoryBackend::bookmark(h.user.id, "b", "https://b.example", 2);
        let c = MemoryBackend::bookmark(h.user.id, "c", "https://c.example", 1);
        h.backend.seed(vec![a.clone(), b.clone(), c.clone()]);
        h.dashboard.fetch_bookmarks().await;
        assert_eq!(titles(&h.dashboard), vec!["c", "b", "a"]);

        let d = MemoryBackend::bookmark(h.user.id, "d", "https://d.example", 0);
        h.dashboard.apply_change(ChangeEvent::Insert(d.clone()));
        assert_eq!(titles(&h.dashboard), vec!["d", "c", "b", "a"]);

        let mut renamed = b.clone();
        renamed.title = "b2".to_string();
        h.dashboard.apply_change(ChangeEvent::Update(renamed));
        assert_eq!(titles(&h.dashboard), vec!["d", "c", "b2", "a"]);
        assert_eq!(h.dashboard.bookmarks()[1], c);

        h.dashboard.apply_change(ChangeEvent::Delete { id: c.id });
        assert_eq!(titles(&h.dashboard), vec!["d", "b2", "a"]);
        assert_eq!(h.dashboard.bookmarks()[0], d);
        assert_eq!(h.dashboard.bookmarks()[2], a);
    }

    #[tokio::test]
    async fn test_update_replaces_every_copy_of_a_duplicated_row() {
        let mut h = harness();
        let a = MemoryBackend::bookmark(h.user.id, "a", "https://a.example", 2);
        let b = MemoryBackend::bookmark(h.user.id, "b", "https://b.example", 1);
        h.backend.seed(vec![a.clone(), b.clone()]);
        h.dashboard.fetch_bookmarks().await;

        // A refresh already showed `a`; its INSERT then arrives from the feed.
        h.dashboard.apply_change(ChangeEvent::Insert(a.clone()));
        assert_eq!(titles(&h.dashboard), vec!["a", "b", "a"]);

        let mut renamed = a.clone();
        renamed.title = "a2".to_string();
        h.dashboard.apply_change(ChangeEvent::Update(renamed));
        assert_eq!(titles(&h.dashboard), vec!["a2", "b", "a2"]);
        assert_eq!(h.dashboard.bookmarks()[1], b);

        h.dashboard.apply_change(ChangeEvent::Delete { id: a.id });
        assert_eq!(titles(&h.dashboard), vec!["b"]);
    }

    #[tokio::test]
    async fn test_update_for_unknown_id_and_repeat_delete_are_noops() {
        let mut h = harness();
        let a = MemoryBackend::bookmark(h.user.id, "a", "https://a.example", 1);
        h.backend.seed(vec![a.clone()]);
        h.dashboard.fetch_bookmarks().await;

        let stranger = MemoryBackend::bookmark(h.user.id, "stranger", "https://s.example", 0);
        h.dashboard.apply_change(ChangeEvent::Update(stranger.clone()));
        h.dashboard.apply_change(ChangeEvent::Delete { id: stranger.id });
        assert_eq!(h.dashboard.bookmarks(), &[a.clone()]);

        // An optimistic delete followed by the feed's DELETE for the same row.
        h.dashboard.delete_bookmark(a.id).await;
        h.dashboard.apply_change(ChangeEvent::Delete { id: a.id });
        assert!(h.dashboard.bookmarks().is_empty());
    }

    #[tokio::test]
    async fn test_search_filters_title_and_url_but_not_count() {
        let mut h = harness();
        h.backend.seed(vec![
            MemoryBackend::bookmark(h.user.id, "Rust Blog", "https://blog.rust-lang.org", 3),
            MemoryBackend::bookmark(h.user.id, "News", "https://news.ycombinator.com", 2),
            MemoryBackend::bookmark(h.user.id, "Crates", "https://crates.io", 1),
        ]);
        h.dashboard.fetch_bookmarks().await;

        h.dashboard.set_search_query("RUST");
        let visible: Vec<&str> = h.dashboard.filtered_bookmarks().iter().map(|b| b.title.as_str()).collect();
        assert_eq!(visible, vec!["Rust Blog"]);

        h.dashboard.set_search_query(".io");
        let visible: Vec<&str> = h.dashboard.filtered_bookmarks().iter().map(|b| b.title.as_str()).collect();
        assert_eq!(visible, vec!["Crates"]);

        assert_eq!(h.dashboard.count_label(), "3 bookmarks saved");

        h.dashboard.set_search_query("nothing-matches");
        let empty = h.dashboard.empty_state().unwrap();
        assert_eq!(empty.title, "No bookmarks found");
        assert_eq!(empty.action, None);
    }

    #[tokio::test]
    async fn test_count_label_singular() {
        let mut h = harness();
        h.backend.seed(vec![MemoryBackend::bookmark(h.user.id, "one", "https://1.example", 1)]);
        h.dashboard.fetch_bookmarks().await;
        assert_eq!(h.dashboard.count_label(), "1 bookmark saved");
        assert!(h.dashboard.empty_state().is_none());
    }

    #[tokio::test]
    async fn test_empty_state_hidden_while_loading() {
        let h = harness();
        assert!(h.dashboard.is_loading());
        assert!(h.dashboard.empty_state().is_none());
        assert_eq!(h.dashboard.count_label(), "0 bookmarks saved");
    }

    #[tokio::test]
    async fn test_add_bookmark_arrives_through_feed() {
        let mut h = harness();
        h.dashboard.mount(&h.backend.clone()).await;
        h.dashboard.open_add_modal();

        let created = h
            .dashboard
            .add_bookmark(&AddBookmarkForm::new("Tera", "keats.github.io/tera"))
            .await
            .unwrap();
        assert!(!h.dashboard.is_add_modal_open());
        assert_eq!(created.url, "https://keats.github.io/tera");
        assert_eq!(created.user_id, h.user.id);
        // Not added locally until the feed says so.
        assert!(h.dashboard.bookmarks().is_empty());

        let event = next_change(&mut h.dashboard).await;
        h.dashboard.apply_change(event);
        assert_eq!(titles(&h.dashboard), vec!["Tera"]);
    }

    #[tokio::test]
    async fn test_invalid_form_keeps_modal_open() {
        let mut h = harness();
        h.dashboard.open_add_modal();
        let err = h.dashboard.add_bookmark(&AddBookmarkForm::new("", "https://x.example")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(h.dashboard.is_add_modal_open());
        assert!(h.backend.rows().is_empty());
    }

    #[tokio::test]
    async fn test_feed_is_scoped_to_user() {
        let mut h = harness();
        let feed = h.backend.clone();
        h.dashboard.mount(&feed).await;
        assert!(h.dashboard.is_live());

        let someone_else = Uuid::new_v4();
        h.backend.emit(
            someone_else,
            ChangeEvent::Insert(MemoryBackend::bookmark(someone_else, "theirs", "https://t.example", 0)),
        );
        let mine = MemoryBackend::bookmark(h.user.id, "mine", "https://m.example", 0);
        h.backend.emit(h.user.id, ChangeEvent::Insert(mine.clone()));

        assert_eq!(next_change(&mut h.dashboard).await, ChangeEvent::Insert(mine));
    }

    #[tokio::test]
    async fn test_unmount_releases_subscription() {
        let mut h = harness();
        let feed = h.backend.clone();
        h.dashboard.mount(&feed).await;
        assert_eq!(h.backend.subscriber_count(), 1);

        h.dashboard.unmount().await;
        assert!(!h.dashboard.is_live());
        assert_eq!(h.dashboard.next_change().await, None);

        // The forwarder is aborted; its broadcast receiver goes with it.
        for _ in 0..10 {
            if h.backend.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_switch_user_resets_state_and_resubscribes() {
        let h = harness();
        let feed = h.backend.clone();
        let next_user = AuthUser {
            id: Uuid::new_v4(),
            email: None,
        };
        h.backend.seed(vec![
            MemoryBackend::bookmark(h.user.id, "first", "https://f.example", 2),
            MemoryBackend::bookmark(next_user.id, "second", "https://s.example", 1),
        ]);
        let mut dashboard = Dashboard::new(
            h.user.clone(),
            Arc::new(h.backend.repository_for(h.user.id)),
            h.alerts.clone(),
        );
        dashboard.mount(&feed).await;
        dashboard.set_search_query("first");
        assert_eq!(titles(&dashboard), vec!["first"]);

        dashboard
            .switch_user(next_user.clone(), Arc::new(h.backend.repository_for(next_user.id)), &feed)
            .await;

        assert_eq!(dashboard.user(), &next_user);
        assert_eq!(dashboard.search_query(), "");
        assert_eq!(titles(&dashboard), vec!["second"]);
        assert!(dashboard.is_live());

        let old_user_row = MemoryBackend::bookmark(h.user.id, "old", "https://o.example", 0);
        h.backend.emit(h.user.id, ChangeEvent::Insert(old_user_row));
        let new_user_row = MemoryBackend::bookmark(next_user.id, "new", "https://n.example", 0);
        h.backend.emit(next_user.id, ChangeEvent::Insert(new_user_row.clone()));

        assert_eq!(next_change(&mut dashboard).await, ChangeEvent::Insert(new_user_row));
    }

    #[tokio::test]
    async fn test_ended_feed_stops_live_updates() {
        let mut h = harness();
        let feed = h.backend.clone();
        h.dashboard.mount(&feed).await;
        assert!(h.dashboard.is_live());

        h.backend.end_feeds();
        let ended = tokio::time::timeout(Duration::from_secs(2), h.dashboard.next_change())
            .await
            .expect("feed end is observed");

        assert_eq!(ended, None);
        assert!(!h.dashboard.is_live());
        // The list keeps working without the feed.
        h.dashboard.apply_change(ChangeEvent::Insert(MemoryBackend::bookmark(h.user.id, "x", "https://x.example", 0)));
        assert_eq!(titles(&h.dashboard), vec!["x"]);
    }

    #[tokio::test]
    async fn test_sign_out_failure_is_only_logged() {
        let h = harness();
        h.backend.fail_next_sign_outs(1);
        h.dashboard.sign_out(&h.backend, "token").await;
        assert!(h.alerts.messages().is_empty());
    }

    #[tokio::test]
    async fn test_created_at_survives_update() {
        let mut h = harness();
        let original = MemoryBackend::bookmark(h.user.id, "a", "https://a.example", 10);
        h.backend.seed(vec![original.clone()]);
        h.dashboard.fetch_bookmarks().await;

        let mut changed = original.clone();
        changed.url = "https://a2.example".to_string();
        h.dashboard.apply_change(ChangeEvent::Update(changed));

        let current = &h.dashboard.bookmarks()[0];
        assert_eq!(current.url, "https://a2.example");
        assert!(current.created_at < Utc::now());
    }
}
