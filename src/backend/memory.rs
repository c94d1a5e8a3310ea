//! In-process stand-in for the managed backend, used by the dashboard tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::{AuthProvider, BookmarkRepository, ChangeEvent, ChangeFeed, Subscription};
use crate::error::AppError;
use crate::models::{AuthUser, Bookmark, NewBookmark, Session};

#[derive(Default)]
struct State {
    rows: Vec<Bookmark>,
    failing_fetches: usize,
    failing_deletes: usize,
    failing_sign_outs: usize,
    delete_calls: Vec<Uuid>,
    fetch_calls: usize,
    /// Rows swapped in right before the next delete fails, to emulate
    /// another client writing in between.
    rows_after_failed_delete: VecDeque<Vec<Bookmark>>,
    forwarders: Vec<AbortHandle>,
}

#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    feed: broadcast::Sender<(Uuid, ChangeEvent)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            feed,
        }
    }

    pub fn bookmark(user_id: Uuid, title: &str, url: &str, minutes_ago: i64) -> Bookmark {
        Bookmark {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            url: url.to_string(),
            created_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    /// Writes rows directly, as another device would. Emits no feed event.
    pub fn seed(&self, rows: Vec<Bookmark>) {
        self.state.lock().unwrap().rows.extend(rows);
    }

    pub fn rows(&self) -> Vec<Bookmark> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.state.lock().unwrap().failing_fetches = count;
    }

    pub fn fail_next_deletes(&self, count: usize) {
        self.state.lock().unwrap().failing_deletes = count;
    }

    pub fn fail_next_sign_outs(&self, count: usize) {
        self.state.lock().unwrap().failing_sign_outs = count;
    }

    pub fn replace_rows_on_failed_delete(&self, rows: Vec<Bookmark>) {
        self.state.lock().unwrap().rows_after_failed_delete.push_back(rows);
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }

    pub fn delete_calls(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().delete_calls.clone()
    }

    /// Pushes a change to every subscriber of `user_id`.
    pub fn emit(&self, user_id: Uuid, event: ChangeEvent) {
        let _ = self.feed.send((user_id, event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.receiver_count()
    }

    /// Ends every open feed, as a dropped socket would.
    pub fn end_feeds(&self) {
        for forwarder in self.state.lock().unwrap().forwarders.drain(..) {
            forwarder.abort();
        }
    }

    /// A repository that only sees `owner`'s rows, like a client holding
    /// that user's access token.
    pub fn repository_for(&self, owner: Uuid) -> UserScopedRepository {
        UserScopedRepository {
            backend: self.clone(),
            owner,
        }
    }
}

pub struct UserScopedRepository {
    backend: MemoryBackend,
    owner: Uuid,
}

#[async_trait]
impl BookmarkRepository for UserScopedRepository {
    async fn fetch_bookmarks(&self) -> Result<Vec<Bookmark>, AppError> {
        let rows = self.backend.fetch_bookmarks().await?;
        Ok(rows.into_iter().filter(|b| b.user_id == self.owner).collect())
    }

    async fn insert_bookmark(&self, bookmark: NewBookmark) -> Result<Bookmark, AppError> {
        if bookmark.user_id != self.owner {
            return Err(AppError::Backend {
                status: 403,
                message: "new row violates row-level security policy".to_string(),
            });
        }
        self.backend.insert_bookmark(bookmark).await
    }

    async fn delete_bookmark(&self, id: Uuid) -> Result<(), AppError> {
        let owned = self.backend.rows().iter().any(|b| b.id == id && b.user_id == self.owner);
        if !owned {
            // Deleting a row you cannot see affects nothing.
            return Ok(());
        }
        self.backend.delete_bookmark(id).await
    }
}

#[async_trait]
impl BookmarkRepository for MemoryBackend {
    async fn fetch_bookmarks(&self) -> Result<Vec<Bookmark>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(AppError::Backend {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let mut rows = state.rows.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_bookmark(&self, bookmark: NewBookmark) -> Result<Bookmark, AppError> {
        let row = Bookmark {
            id: Uuid::new_v4(),
            user_id: bookmark.user_id,
            title: bookmark.title,
            url: bookmark.url,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().rows.push(row.clone());
        self.emit(row.user_id, ChangeEvent::Insert(row.clone()));
        Ok(row)
    }

    async fn delete_bookmark(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls.push(id);
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            if let Some(rows) = state.rows_after_failed_delete.pop_front() {
                state.rows = rows;
            }
            return Err(AppError::Backend {
                status: 500,
                message: "delete failed".to_string(),
            });
        }
        state.rows.retain(|b| b.id != id);
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, _password: &str) -> Result<Session, AppError> {
        Ok(Session {
            access_token: "memory-access".to_string(),
            refresh_token: "memory-refresh".to_string(),
            token_type: "bearer".to_string(),
            expires_at: Some(Utc::now().timestamp() + 3600),
            user: AuthUser {
                id: Uuid::new_v4(),
                email: Some(email.to_string()),
            },
        })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AppError> {
        self.sign_in_with_password(email, password).await.map(Some)
    }

    async fn current_user(&self, _access_token: &str) -> Result<AuthUser, AppError> {
        Err(AppError::NotAuthenticated("memory backend has no users".to_string()))
    }

    async fn refresh_session(&self, _refresh_token: &str) -> Result<Session, AppError> {
        self.sign_in_with_password("refreshed@example.com", "").await
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_sign_outs > 0 {
            state.failing_sign_outs -= 1;
            return Err(AppError::Backend {
                status: 500,
                message: "sign out failed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription, AppError> {
        let mut feed = self.feed.subscribe();
        let (tx, rx) = mpsc::channel(64);
        let forwarder = tokio::spawn(async move {
            while let Ok((owner, event)) = feed.recv().await {
                if owner == user_id && tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        self.state.lock().unwrap().forwarders.push(forwarder.abort_handle());
        Ok(Subscription::new("memory", rx, vec![forwarder]))
    }
}
