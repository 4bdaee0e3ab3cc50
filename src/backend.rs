use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::record::BookmarkRecord;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode: {0}")]
    Decode(String),
}

/// The authoritative store, reduced to the calls the engine needs.
/// The push feed is a separate stream (see `sync::realtime`).
#[async_trait]
pub trait BookmarkBackend: Send + Sync {
    /// Insert a row and return the authoritative record (server id and
    /// timestamp included).
    async fn insert(
        &self,
        owner_id: &str,
        title: &str,
        url: &str,
    ) -> Result<BookmarkRecord, BackendError>;

    async fn delete(&self, id: &str) -> Result<(), BackendError>;

    /// Full list for one owner, `created_at` descending.
    async fn list(&self, owner_id: &str) -> Result<Vec<BookmarkRecord>, BackendError>;
}

// ── REST implementation ─────────────────────────────────────────────────────

/// PostgREST-style HTTP backend: row filters in the query string, api key in
/// both the `apikey` header and the bearer token.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        RestBackend {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/bookmarks", self.base_url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key).bearer_auth(&self.api_key)
    }
}

async fn ok_or_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BookmarkBackend for RestBackend {
    async fn insert(
        &self,
        owner_id: &str,
        title: &str,
        url: &str,
    ) -> Result<BookmarkRecord, BackendError> {
        let resp = self
            .authed(self.client.post(self.table_url()))
            .header("Prefer", "return=representation")
            .json(&json!([{ "user_id": owner_id, "title": title, "url": url }]))
            .send()
            .await?;
        let rows: Vec<BookmarkRecord> = ok_or_status(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no rows".into()))
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let url = format!("{}?id=eq.{}", self.table_url(), id);
        let resp = self.authed(self.client.delete(url)).send().await?;
        ok_or_status(resp).await?;
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<BookmarkRecord>, BackendError> {
        let url = format!(
            "{}?user_id=eq.{}&select=*&order=created_at.desc",
            self.table_url(),
            owner_id
        );
        let resp = self.authed(self.client.get(url)).send().await?;
        Ok(ok_or_status(resp).await?.json().await?)
    }
}
