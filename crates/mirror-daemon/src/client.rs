//! Confluence Cloud REST client.
//!
//! Implements `RemoteClient` over reqwest. Every request runs through
//! `retry_once_after_refresh`, so an expired OAuth token is refreshed and the
//! request replayed once before an `Authentication` error reaches the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirror_core::client::{RemoteClient, RemoteError, Result};
use mirror_core::retry::retry_once_after_refresh;
use mirror_core::{Attachment, RemoteDocument};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Fields requested with every page listing
pub const SEARCH_EXPAND: &str = "body.storage,version,space,metadata.labels,ancestors,history";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How requests are authenticated
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// Account email and API token
    Basic { email: String, api_token: String },
    /// Bearer token, refreshed with the refresh-token grant on 401
    OAuth {
        client_id: String,
        client_secret: String,
        access_token: String,
        refresh_token: String,
        token_url: String,
    },
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContentResult>,
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    base: Option<String>,
    webui: Option<String>,
    download: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentResult {
    id: String,
    #[serde(default)]
    title: String,
    space: Option<SpaceRef>,
    body: Option<Body>,
    version: Option<Version>,
    metadata: Option<Metadata>,
    #[serde(default)]
    ancestors: Vec<Ancestor>,
    history: Option<History>,
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct SpaceRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Body {
    storage: Option<Storage>,
}

#[derive(Debug, Deserialize)]
struct Storage {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Version {
    #[serde(default)]
    number: u64,
    when: Option<DateTime<Utc>>,
    by: Option<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct User {
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    labels: Option<LabelList>,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    results: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Ancestor {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct History {
    created_by: Option<User>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    #[serde(default)]
    results: Vec<AttachmentResult>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResult {
    id: String,
    title: String,
    #[serde(default)]
    extensions: AttachmentExtensions,
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentExtensions {
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    file_size: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Confluence REST client for one tenant
pub struct ConfluenceHttpClient {
    http: HttpClient,
    base_url: String,
    credentials: RwLock<Credentials>,
}

impl ConfluenceHttpClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(RemoteError::NotConnected("tenant url is empty".into()));
        }

        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::NotConnected(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            credentials: RwLock::new(credentials),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/wiki/rest/api{}", self.base_url, path)
    }

    /// Download links are relative to the `/wiki` context path
    fn download_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/wiki{}", self.base_url, href)
        }
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &*self.credentials.read().await {
            Credentials::Basic { email, api_token } => request.basic_auth(email, Some(api_token)),
            Credentials::OAuth { access_token, .. } => request.bearer_auth(access_token),
        }
    }

    async fn send_once(&self, url: &str, query: &[(&str, String)]) -> Result<Response> {
        let request = self.authorize(self.http.get(url).query(query)).await;
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let text = response.text().await.unwrap_or_default();
        debug!("GET {} failed with status {}", url, status);
        Err(RemoteError::from_status(status.as_u16(), text, retry_after))
    }

    async fn get_json_once<T: DeserializeOwned + Send>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.send_once(url, query).await?;
        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|e| RemoteError::Api {
            status,
            message: format!("Unexpected response body: {}", e),
        })
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        retry_once_after_refresh(
            move || self.get_json_once(url, query),
            move || self.refresh_credentials(),
        )
        .await
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        retry_once_after_refresh(
            move || async move {
                let response = self.send_once(url, &[]).await?;
                response
                    .bytes()
                    .await
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| RemoteError::Network(e.to_string()))
            },
            move || self.refresh_credentials(),
        )
        .await
    }

    /// Exchange the refresh token for a new access token
    async fn refresh_credentials(&self) -> Result<()> {
        let mut credentials = self.credentials.write().await;
        match &mut *credentials {
            Credentials::Basic { .. } => Err(RemoteError::Authentication(
                "API token rejected; update tenant.apiToken".into(),
            )),
            Credentials::OAuth {
                client_id,
                client_secret,
                access_token,
                refresh_token,
                token_url,
            } => {
                info!("Refreshing OAuth access token");
                let response = self
                    .http
                    .post(token_url.as_str())
                    .json(&serde_json::json!({
                        "grant_type": "refresh_token",
                        "client_id": client_id,
                        "client_secret": client_secret,
                        "refresh_token": refresh_token,
                    }))
                    .send()
                    .await
                    .map_err(|e| RemoteError::Network(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(RemoteError::Authentication(format!(
                        "Token refresh failed ({}): {}",
                        status, text
                    )));
                }

                let token: TokenResponse = response.json().await.map_err(|e| {
                    RemoteError::Authentication(format!("Invalid token response: {}", e))
                })?;
                *access_token = token.access_token;
                if let Some(rotated) = token.refresh_token {
                    *refresh_token = rotated;
                }
                Ok(())
            }
        }
    }

    fn to_document(&self, result: ContentResult, base: &str) -> RemoteDocument {
        let version = result.version;
        let author = version
            .as_ref()
            .and_then(|v| v.by.as_ref())
            .or_else(|| result.history.as_ref().and_then(|h| h.created_by.as_ref()))
            .map(|user| user.display_name.clone())
            .unwrap_or_default();

        RemoteDocument {
            id: result.id,
            title: result.title,
            space_key: result.space.map(|s| s.key).unwrap_or_default(),
            content: result
                .body
                .and_then(|b| b.storage)
                .map(|s| s.value)
                .unwrap_or_default(),
            version: version.as_ref().map(|v| v.number).unwrap_or(0),
            last_modified: version.as_ref().and_then(|v| v.when).unwrap_or_default(),
            author,
            url: result
                .links
                .webui
                .map(|webui| format!("{}{}", base, webui))
                .unwrap_or_default(),
            labels: result
                .metadata
                .and_then(|m| m.labels)
                .map(|l| l.results.into_iter().map(|label| label.name).collect())
                .unwrap_or_default(),
            parent_id: result.ancestors.last().map(|a| a.id.clone()),
            attachments: Vec::new(),
        }
    }
}

#[async_trait]
impl RemoteClient for ConfluenceHttpClient {
    #[instrument(skip(self), level = "debug")]
    async fn search_documents(&self, query: &str, limit: usize) -> Result<Vec<RemoteDocument>> {
        let url = self.api_url("/content/search");
        let params = [
            ("cql", query.to_string()),
            ("limit", limit.to_string()),
            ("expand", SEARCH_EXPAND.to_string()),
        ];
        let response: SearchResponse = self.get_json(&url, &params).await?;

        let base = response
            .links
            .base
            .unwrap_or_else(|| format!("{}/wiki", self.base_url));
        let documents: Vec<RemoteDocument> = response
            .results
            .into_iter()
            .map(|result| self.to_document(result, &base))
            .collect();

        debug!("Search returned {} pages", documents.len());
        Ok(documents)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_attachments(&self, page_id: &str) -> Result<Vec<Attachment>> {
        let url = self.api_url(&format!("/content/{}/child/attachment", page_id));
        let response: AttachmentResponse = self.get_json(&url, &[]).await?;

        Ok(response
            .results
            .into_iter()
            .filter_map(|result| {
                let download = result.links.download?;
                Some(Attachment {
                    id: result.id,
                    title: result.title,
                    media_type: result.extensions.media_type,
                    file_size: result.extensions.file_size,
                    download_url: download,
                    page_id: page_id.to_string(),
                })
            })
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn download_attachment(&self, download_url: &str) -> Result<Vec<u8>> {
        let bytes = self.get_bytes(&self.download_url(download_url)).await?;
        debug!("Downloaded {} bytes", bytes.len());
        Ok(bytes)
    }

    async fn test_connection(&self) -> Result<()> {
        let url = self.api_url("/space");
        let _: serde_json::Value = self.get_json(&url, &[("limit", "1".to_string())]).await?;
        info!("Connected to {}", self.base_url);
        Ok(())
    }
}
