use reqwest::Url;

use crate::error::AppError;

/// The add-bookmark modal's fields, as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddBookmarkForm {
    pub title: String,
    pub url: String,
}

impl AddBookmarkForm {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }

    /// Returns the trimmed title and the normalised url.
    pub fn validate(&self) -> Result<(String, String), AppError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::InvalidInput("Title is required".to_string()));
        }

        let raw_url = self.url.trim();
        if raw_url.is_empty() {
            return Err(AppError::InvalidInput("URL is required".to_string()));
        }
        let candidate = if raw_url.contains("://") {
            raw_url.to_string()
        } else {
            format!("https://{raw_url}")
        };

        match Url::parse(&candidate) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
                Ok((title.to_string(), candidate))
            }
            _ => Err(AppError::InvalidInput("Please enter a valid URL".to_string())),
        }
    }
}
