//! Seams to the managed backend.
//!
//! The dashboard only talks to these traits. The concrete clients speak the
//! hosted service's REST, auth and realtime surfaces; tests swap in an
//! in-memory implementation.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AuthUser, Bookmark, NewBookmark, Session};

pub mod auth;
pub mod realtime;
pub mod rest;
pub mod session_store;
pub mod subscription;

#[cfg(test)]
pub(crate) mod memory;

pub use auth::GoTrueClient;
pub use realtime::RealtimeClient;
pub use rest::PostgrestClient;
pub use session_store::SessionStore;
pub use subscription::Subscription;

/// A row-level change pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Bookmark),
    Update(Bookmark),
    Delete { id: Uuid },
}

impl ChangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert(_) => "INSERT",
            ChangeEvent::Update(_) => "UPDATE",
            ChangeEvent::Delete { .. } => "DELETE",
        }
    }

    pub fn bookmark_id(&self) -> Uuid {
        match self {
            ChangeEvent::Insert(b) | ChangeEvent::Update(b) => b.id,
            ChangeEvent::Delete { id } => *id,
        }
    }
}

/// Queries and mutations on the bookmarks table, scoped to the
/// authenticated user by the backend's row-level security.
#[async_trait]
pub trait BookmarkRepository: Send + Sync {
    /// All visible bookmarks, newest first.
    async fn fetch_bookmarks(&self) -> Result<Vec<Bookmark>, AppError>;

    async fn insert_bookmark(&self, bookmark: NewBookmark) -> Result<Bookmark, AppError>;

    async fn delete_bookmark(&self, id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError>;

    /// `None` when the account was created but still awaits email confirmation.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AppError>;

    async fn current_user(&self, access_token: &str) -> Result<AuthUser, AppError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AppError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a change-feed limited to rows owned by `user_id`.
    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription, AppError>;
}
