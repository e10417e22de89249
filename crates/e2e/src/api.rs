//! HTTP client for the posts API under test

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use webcheck_common::Settings;

use crate::error::E2eResult;

/// Status, content type and raw body of one response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub text: String,
}

impl ApiResponse {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
    }

    /// Body parsed as untyped JSON
    pub fn body(&self) -> E2eResult<Value> {
        Ok(serde_json::from_str(&self.text)?)
    }

    pub fn json<T: DeserializeOwned>(&self) -> E2eResult<T> {
        Ok(serde_json::from_str(&self.text)?)
    }
}

/// Client for `{API_BASE}/posts`
#[derive(Debug, Clone)]
pub struct PostsClient {
    client: Client,
    base_url: String,
}

impl PostsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> E2eResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> E2eResult<Self> {
        Self::new(&settings.api_base, settings.launch_timeout)
    }

    fn collection(&self) -> String {
        format!("{}/posts", self.base_url)
    }

    fn item(&self, id: i64) -> String {
        format!("{}/posts/{}", self.base_url, id)
    }

    /// `GET /posts` with optional query parameters
    pub async fn list(&self, query: &[(&str, &str)]) -> E2eResult<ApiResponse> {
        self.send(self.client.get(self.collection()).query(query)).await
    }

    pub async fn get(&self, id: i64) -> E2eResult<ApiResponse> {
        self.send(self.client.get(self.item(id))).await
    }

    pub async fn create<B: Serialize + ?Sized>(&self, payload: &B) -> E2eResult<ApiResponse> {
        self.send(self.client.post(self.collection()).json(payload)).await
    }

    /// `PUT /posts/{id}`
    pub async fn replace<B: Serialize + ?Sized>(&self, id: i64, payload: &B) -> E2eResult<ApiResponse> {
        self.send(self.client.put(self.item(id)).json(payload)).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, id: i64, payload: &B) -> E2eResult<ApiResponse> {
        self.send(self.client.patch(self.item(id)).json(payload)).await
    }

    pub async fn delete(&self, id: i64) -> E2eResult<ApiResponse> {
        self.send(self.client.delete(self.item(id))).await
    }

    async fn send(&self, request: RequestBuilder) -> E2eResult<ApiResponse> {
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let url = resp.url().to_string();
        let text = resp.text().await?;

        debug!("{} -> {} ({} bytes)", url, status, text.len());
        Ok(ApiResponse {
            status,
            content_type,
            text,
        })
    }
}
