use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::AuthProvider;
use super::rest::ensure_success;
use crate::config::ClientConfig;
use crate::error::AppError;
use crate::models::{AuthUser, Session};

/// Client for the backend's GoTrue-compatible auth endpoints.
#[derive(Clone)]
pub struct GoTrueClient {
    client: Client,
    config: ClientConfig,
}

/// Body of a successful token grant.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: token.user,
        }
    }
}

/// Sign-up answers with a full session when auto-confirm is on, or with the
/// bare user while email confirmation is pending.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

impl GoTrueClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            config: config.clone(),
        }
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, AppError> {
        let response = self
            .client
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.config.supabase_anon_key)
            .json(&body)
            .send()
            .await?;

        if matches!(response.status(), StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
            return Err(AppError::InvalidCredentials);
        }
        let token: TokenResponse = ensure_success(response).await?.json().await?;
        Ok(token.into())
    }
}

#[async_trait]
impl AuthProvider for GoTrueClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AppError::InvalidInput("Email and password are required.".to_string()));
        }
        let session = self
            .token_grant("password", json!({ "email": email.trim(), "password": password }))
            .await?;
        info!(user_id = %session.user.id, "Signed in.");
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AppError> {
        if email.trim().is_empty() || password.len() < 6 {
            return Err(AppError::InvalidInput(
                "Email is required and the password needs at least 6 characters.".to_string(),
            ));
        }
        let response = self
            .client
            .post(self.config.auth_url("signup"))
            .header("apikey", &self.config.supabase_anon_key)
            .json(&json!({ "email": email.trim(), "password": password }))
            .send()
            .await?;
        let outcome: SignUpResponse = ensure_success(response).await?.json().await?;

        match outcome {
            SignUpResponse::Session(token) => {
                let session: Session = token.into();
                info!(user_id = %session.user.id, "Signed up and signed in.");
                Ok(Some(session))
            }
            SignUpResponse::User(user) => {
                info!(user_id = %user.id, "Signed up; awaiting email confirmation.");
                Ok(None)
            }
        }
    }

    async fn current_user(&self, access_token: &str) -> Result<AuthUser, AppError> {
        let response = self
            .client
            .get(self.config.auth_url("user"))
            .header("apikey", &self.config.supabase_anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AppError::NotAuthenticated("Session is no longer valid.".to_string()));
        }
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AppError> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
            .map_err(|e| match e {
                AppError::InvalidCredentials => {
                    AppError::NotAuthenticated("Refresh token rejected; please log in again.".to_string())
                }
                other => other,
            })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.config.auth_url("logout"))
            .header("apikey", &self.config.supabase_anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}
