//! CloudShare REST API client
//!
//! Implements `FileService` over the server's `/files` endpoints.
//! Auth: `Authorization: Bearer {token}`, looked up before every request.
//! Uploads are multipart (`file` field) with a streamed body so progress
//! advances while bytes are on the wire.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    sanitize_api_error, FileRecord, FileService, ProgressCallback, ServiceError, UploadSource,
};
use crate::auth::AuthTokenProvider;
use crate::client_config::ClientConfig;

/// Upload body chunk size; one progress report per chunk
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

pub struct CloudShareApi {
    base_url: String,
    client: reqwest::Client,
    auth: Arc<dyn AuthTokenProvider>,
}

impl CloudShareApi {
    pub fn new(config: &ClientConfig, auth: Arc<dyn AuthTokenProvider>) -> Self {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .default_headers(default_headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn files_url(&self, suffix: &str) -> String {
        format!("{}/files{}", self.base_url, suffix)
    }

    fn file_url(&self, id: &str, suffix: &str) -> String {
        format!("{}/files/{}{}", self.base_url, urlencoding::encode(id), suffix)
    }

    /// Attach the session credential, if there is one. Each request starts
    /// from a fresh builder, so an ended session never leaks an old token.
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ServiceError> {
        match self.auth.bearer_token().await? {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .map_err(|e| {
                        ServiceError::AuthenticationFailed(format!(
                            "Invalid characters in bearer token: {}",
                            e
                        ))
                    })?;
                value.set_sensitive(true);
                Ok(request.header(AUTHORIZATION, value))
            }
            None => {
                debug!("No session, sending request unauthenticated");
                Ok(request)
            }
        }
    }

    /// Send and map transport failures and non-2xx responses.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, ServiceError> {
        let resp = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| ServiceError::NetworkError(format!("{} failed: {}", what, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!("{} rejected with {}", what, status);
            return Err(ServiceError::ServerRejection {
                status: status.as_u16(),
                message: sanitize_api_error(&body),
            });
        }
        Ok(resp)
    }

    async fn parse_record(resp: Response, what: &str) -> Result<FileRecord, ServiceError> {
        resp.json::<FileRecord>().await.map_err(|e| {
            ServiceError::ParseError(format!("Parse {} response failed: {}", what, e))
        })
    }
}

#[async_trait]
impl FileService for CloudShareApi {
    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<FileRecord>, ServiceError> {
        let url = match name_filter.filter(|f| !f.is_empty()) {
            Some(filter) => format!("{}?name={}", self.files_url(""), urlencoding::encode(filter)),
            None => self.files_url(""),
        };

        let resp = self.send(self.client.get(&url), "List").await?;
        let records: Vec<FileRecord> = resp.json().await.map_err(|e| {
            ServiceError::ParseError(format!("Parse list response failed: {}", e))
        })?;
        debug!("Listed {} files", records.len());
        Ok(records)
    }

    async fn upload(
        &self,
        source: &UploadSource,
        on_progress: Option<ProgressCallback>,
    ) -> Result<FileRecord, ServiceError> {
        let total = source.size();
        let data = Arc::clone(source.bytes());
        info!("Uploading {} ({} bytes)", source.name(), total);

        let stream = futures_util::stream::iter((0..data.len()).step_by(UPLOAD_CHUNK_SIZE)).map(
            move |start| {
                let end = (start + UPLOAD_CHUNK_SIZE).min(data.len());
                if let Some(ref cb) = on_progress {
                    cb(end as u64, total);
                }
                Ok::<_, std::io::Error>(data[start..end].to_vec())
            },
        );
        let body = reqwest::Body::wrap_stream(stream);

        let part = reqwest::multipart::Part::stream_with_length(body, total)
            .file_name(source.name().to_string())
            .mime_str(source.media_type())
            .map_err(|e| {
                ServiceError::Validation(format!(
                    "Invalid media type '{}': {}",
                    source.media_type(),
                    e
                ))
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        // Streamed bodies cannot be replayed; a failed upload is reported, never retried here.
        let request = self.client.post(self.files_url("/upload")).multipart(form);
        let resp = self.send(request, "Upload").await?;
        let record = Self::parse_record(resp, "upload").await?;
        info!("Uploaded {} as {}", source.name(), record.id);
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        // 2xx with an empty or echoed body; the body is not needed.
        self.send(self.client.delete(self.file_url(id, "")), "Delete")
            .await?;
        info!("Deleted {}", id);
        Ok(())
    }

    async fn toggle_public(&self, id: &str) -> Result<FileRecord, ServiceError> {
        let request = self.client.patch(self.file_url(id, "/toggle-public"));
        let resp = self.send(request, "Toggle visibility").await?;
        Self::parse_record(resp, "toggle visibility").await
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<FileRecord, ServiceError> {
        let request = self
            .client
            .patch(self.file_url(id, "/rename"))
            .json(&serde_json::json!({ "name": new_name }));
        let resp = self.send(request, "Rename").await?;
        Self::parse_record(resp, "rename").await
    }
}
