use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::model::{Article, Highlight, HighlightsPage};

pub const DEFAULT_API_URL: &str = "https://www.instapaper.com/api/1.1";

/// Bearer credential pair from the out-of-scope OAuth exchange. The client
/// only attaches it; it never refreshes or negotiates it.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub token_secret: String,
}

trait WithAuth {
    fn with_auth(self, token: &AccessToken) -> Self;
}

impl WithAuth for reqwest::RequestBuilder {
    fn with_auth(self, token: &AccessToken) -> Self {
        self.header("authorization", format!("Bearer {}", token.token))
            .header("x-token-secret", token.token_secret.clone())
    }
}

#[derive(Debug, Deserialize)]
struct HighlightsResponse {
    #[serde(default)]
    highlights: Vec<Highlight>,
    #[serde(default)]
    bookmarks: HashMap<String, Article>,
}

/// Typed wrapper around the paginated highlights feed and the bookmark-add
/// endpoint. Performs no retries; the orchestrator owns retry policy.
pub struct InstapaperClient {
    client: reqwest::Client,
    api_url: String,
    token: AccessToken,
}

impl InstapaperClient {
    pub fn new(api_url: impl Into<String>, token: AccessToken) -> Self {
        InstapaperClient {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            token,
        }
    }

    /// Fetches the page of highlights with ids strictly greater than
    /// `after`, in ascending id order. An empty page means the caller is
    /// fully caught up.
    pub async fn fetch_highlights_page(&self, after: i64) -> Result<HighlightsPage, ApiError> {
        let response = self
            .client
            .post(format!("{}/highlights/list", self.api_url))
            .with_auth(&self.token)
            .json(&json!({ "after": after, "order": "asc" }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let parsed: HighlightsResponse = serde_json::from_str(&body)?;

        tracing::debug!(
            after,
            highlights = parsed.highlights.len(),
            bookmarks = parsed.bookmarks.len(),
            "fetched highlights page"
        );

        Ok(HighlightsPage {
            highlights: parsed.highlights,
            articles_by_id: parsed.bookmarks,
        })
    }

    /// Saves a URL to the account's reading list. Used by the save command
    /// only, never by the sync engine.
    pub async fn add_bookmark(&self, url: &str) -> Result<Article, ApiError> {
        let response = self
            .client
            .post(format!("{}/bookmarks/add", self.api_url))
            .with_auth(&self.token)
            .json(&json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let article: Article = serde_json::from_str(&body)?;
        Ok(article)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_response_decodes_remote_shape() {
        let payload = r#"{
            "highlights": [
                {"id": 3, "article_id": "12", "time": 1700000000, "text": "quoted"},
                {"id": 5, "article_id": "12", "time": 1700000100, "text": "more", "note": "nb"}
            ],
            "bookmarks": {
                "12": {"id": 12, "title": "T", "url": "https://e.com", "saved_at": 1699999999}
            }
        }"#;
        let parsed: HighlightsResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.highlights.len(), 2);
        assert_eq!(parsed.highlights[1].note.as_deref(), Some("nb"));
        assert_eq!(parsed.bookmarks["12"].title, "T");
        assert!(parsed.bookmarks["12"].tags.is_empty());
    }

    #[test]
    fn empty_payload_decodes_to_empty_page() {
        let parsed: HighlightsResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.highlights.is_empty());
        assert!(parsed.bookmarks.is_empty());
    }
}
