use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::AppError;

#[derive(Deserialize, Debug, Clone)]
pub struct ClientConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,

    #[serde(default = "default_bookmarks_table")]
    pub bookmarks_table: String,

    #[serde(default = "default_db_schema")]
    pub db_schema: String,

    #[serde(default = "default_realtime_channel")]
    pub realtime_channel: String,

    #[serde(default = "default_session_file")]
    pub session_file: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialClientConfig {
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
    bookmarks_table: Option<String>,
    db_schema: Option<String>,
    realtime_channel: Option<String>,
    session_file: Option<String>,
    log_dir: Option<String>,
    heartbeat_interval_seconds: Option<u64>,
}

fn default_bookmarks_table() -> String {
    "bookmarks".to_string()
}

fn default_db_schema() -> String {
    "public".to_string()
}

fn default_realtime_channel() -> String {
    "bookmarks-changes".to_string()
}

fn default_session_file() -> String {
    "session.toml".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

impl ClientConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, AppError> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) => read_partial(Path::new(path_str))?,
            None => PartialClientConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialClientConfig = envy::from_env::<PartialClientConfig>()
            .map_err(|e| AppError::Config(format!("Failed to load config from environment: {e}")))?;

        // 3. Merge: environment overrides file
        merge(env_config, file_config)
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.supabase_url.trim_end_matches('/')
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url(), self.bookmarks_table)
    }

    pub fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url(), endpoint)
    }

    pub fn realtime_url(&self) -> String {
        let base = self.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            urlencoding::encode(&self.supabase_anon_key)
        )
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        let seconds = if self.heartbeat_interval_seconds > 0 {
            self.heartbeat_interval_seconds
        } else {
            default_heartbeat_interval()
        };
        std::time::Duration::from_secs(seconds)
    }
}

fn read_partial(path: &Path) -> Result<PartialClientConfig, AppError> {
    if !path.exists() {
        return Ok(PartialClientConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("Failed to read config file at {path:?}: {e}")))?;
    toml::from_str(&contents)
        .map_err(|e| AppError::Config(format!("Failed to parse TOML from config file at {path:?}: {e}")))
}

fn merge(env_config: PartialClientConfig, file_config: PartialClientConfig) -> Result<ClientConfig, AppError> {
    Ok(ClientConfig {
        supabase_url: env_config
            .supabase_url
            .or(file_config.supabase_url)
            .ok_or_else(|| AppError::Config("SUPABASE_URL is required".to_string()))?,
        supabase_anon_key: env_config
            .supabase_anon_key
            .or(file_config.supabase_anon_key)
            .ok_or_else(|| AppError::Config("SUPABASE_ANON_KEY is required".to_string()))?,
        bookmarks_table: env_config
            .bookmarks_table
            .or(file_config.bookmarks_table)
            .unwrap_or_else(default_bookmarks_table),
        db_schema: env_config
            .db_schema
            .or(file_config.db_schema)
            .unwrap_or_else(default_db_schema),
        realtime_channel: env_config
            .realtime_channel
            .or(file_config.realtime_channel)
            .unwrap_or_else(default_realtime_channel),
        session_file: env_config
            .session_file
            .or(file_config.session_file)
            .unwrap_or_else(default_session_file),
        log_dir: env_config
            .log_dir
            .or(file_config.log_dir)
            .unwrap_or_else(default_log_dir),
        heartbeat_interval_seconds: env_config
            .heartbeat_interval_seconds
            .or(file_config.heartbeat_interval_seconds)
            .unwrap_or_else(default_heartbeat_interval),
    })
}

#[cfg(test)]
pub(crate) fn test_config(supabase_url: &str) -> ClientConfig {
    ClientConfig {
        supabase_url: supabase_url.to_string(),
        supabase_anon_key: "anon-key".to_string(),
        bookmarks_table: default_bookmarks_table(),
        db_schema: default_db_schema(),
        realtime_channel: default_realtime_channel(),
        session_file: default_session_file(),
        log_dir: default_log_dir(),
        heartbeat_interval_seconds: default_heartbeat_interval(),
    }
}
