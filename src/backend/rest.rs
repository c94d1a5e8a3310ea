use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, header};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::BookmarkRepository;
use crate::config::ClientConfig;
use crate::error::AppError;
use crate::models::{Bookmark, NewBookmark};

/// Bookmark table access over the backend's PostgREST endpoint.
#[derive(Clone)]
pub struct PostgrestClient {
    client: Client,
    table_url: String,
    schema: String,
    anon_key: String,
    access_token: String,
}

impl PostgrestClient {
    pub fn new(config: &ClientConfig, access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            table_url: config.rest_url(),
            schema: config.db_schema.clone(),
            anon_key: config.supabase_anon_key.clone(),
            access_token: access_token.into(),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header("Accept-Profile", &self.schema)
            .header("Content-Profile", &self.schema)
    }
}

/// Turns a non-2xx response into `AppError::Backend`, preferring the
/// `message` field of a JSON error body.
pub(crate) async fn ensure_success(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(AppError::Backend {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl BookmarkRepository for PostgrestClient {
    async fn fetch_bookmarks(&self) -> Result<Vec<Bookmark>, AppError> {
        let request = self
            .client
            .get(&self.table_url)
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        let response = ensure_success(self.authorized(request).send().await?).await?;
        let bookmarks: Vec<Bookmark> = response.json().await?;
        debug!(count = bookmarks.len(), "Fetched bookmarks.");
        Ok(bookmarks)
    }

    async fn insert_bookmark(&self, bookmark: NewBookmark) -> Result<Bookmark, AppError> {
        let request = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=representation")
            .json(&[&bookmark]);
        let response = ensure_success(self.authorized(request).send().await?).await?;
        let mut rows: Vec<Bookmark> = response.json().await?;
        if rows.is_empty() {
            return Err(AppError::Backend {
                status: 200,
                message: "Insert returned no rows".to_string(),
            });
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete_bookmark(&self, id: Uuid) -> Result<(), AppError> {
        let filter = format!("eq.{id}");
        let request = self.client.delete(&self.table_url).query(&[("id", filter.as_str())]);
        ensure_success(self.authorized(request).send().await?).await?;
        debug!(bookmark_id = %id, "Deleted bookmark.");
        Ok(())
    }
}
