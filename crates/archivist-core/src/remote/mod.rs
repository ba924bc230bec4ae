//! Remote submission client.
//!
//! Logs in once, caches the session token, uploads the packaged archive
//! (and optionally the gallery images) and creates the article record. A
//! request rejected with 401/403 triggers exactly one re-login; a second
//! rejection in a row is an authentication failure.

mod types;

pub use types::{ArticleMetadata, SubmissionRecord};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use crate::archive::mask_password;
use crate::config::{resolve_env_var, ApiConfig};
use crate::error::{ConfigError, PipelineError, PipelineResult};
use types::{ArticleRequest, Envelope, LoginRequest};

const USER_AGENT: &str = concat!("archivist/", env!("CARGO_PKG_VERSION"));

/// Outcome of one authenticated call.
enum CallError {
    /// 401/403: the session token was rejected
    AuthExpired,
    Failed(PipelineError),
}

impl From<PipelineError> for CallError {
    fn from(e: PipelineError) -> Self {
        CallError::Failed(e)
    }
}

/// Client for the login, upload and article endpoints.
pub struct SubmissionClient {
    client: reqwest::Client,
    config: ApiConfig,
    password: String,
    token: Mutex<Option<String>>,
}

impl SubmissionClient {
    /// Build a client from the `[api]` section.
    pub fn new(config: &ApiConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        let device_id = HeaderValue::from_str(&config.device_id).map_err(|_| {
            ConfigError::ValidationError("api.device_id is not a valid header value".into())
        })?;
        headers.insert("Device-Id", device_id);

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::ValidationError(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            password: resolve_env_var(&config.password).unwrap_or_default(),
            config: config.clone(),
            token: Mutex::new(None),
        })
    }

    /// Log in and cache the session token.
    pub async fn authenticate(&self) -> PipelineResult<String> {
        tracing::debug!(
            "Logging in as {} (password {})",
            self.config.account,
            mask_password(&self.password)
        );

        let resp = self
            .client
            .post(&self.config.login_endpoint)
            .json(&LoginRequest {
                account: &self.config.account,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| PipelineError::AuthenticationFailed {
                message: format!("login request failed: {e}"),
            })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PipelineError::AuthenticationFailed {
                message: format!("HTTP {}: {}", status.as_u16(), truncate(&body)),
            });
        }

        let envelope: Envelope =
            serde_json::from_str(&body).map_err(|e| PipelineError::AuthenticationFailed {
                message: format!("unreadable login response: {e}"),
            })?;
        let token = envelope
            .code_ok()
            .then(|| envelope.token())
            .flatten()
            .ok_or_else(|| PipelineError::AuthenticationFailed {
                message: envelope
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("login rejected: {}", truncate(&body))),
            })?;

        *self.token.lock().await = Some(token.clone());
        tracing::info!("Logged in to submission API");
        Ok(token)
    }

    async fn session(&self) -> PipelineResult<String> {
        if let Some(token) = self.token.lock().await.clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// Run `call` with the session token, re-authenticating once on 401/403.
    async fn with_session<T, F, Fut>(&self, mut call: F) -> PipelineResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let token = self.session().await?;
        match call(token).await {
            Ok(value) => return Ok(value),
            Err(CallError::Failed(e)) => return Err(e),
            Err(CallError::AuthExpired) => {
                tracing::warn!("Session rejected, logging in again");
                *self.token.lock().await = None;
            }
        }

        let token = self.authenticate().await?;
        match call(token).await {
            Ok(value) => Ok(value),
            Err(CallError::Failed(e)) => Err(e),
            Err(CallError::AuthExpired) => {
                *self.token.lock().await = None;
                Err(PipelineError::AuthenticationFailed {
                    message: "session rejected again after re-login".to_string(),
                })
            }
        }
    }

    /// Upload one file and return its asset reference.
    pub async fn upload(&self, path: &Path) -> PipelineResult<String> {
        let urls = self
            .with_session(|token| async move {
                let form = Form::new().part("file", file_part(path).await?);
                self.post_upload(path, form, &token).await
            })
            .await?;

        urls.into_iter()
            .next()
            .ok_or_else(|| PipelineError::UploadRejected {
                path: path.to_path_buf(),
                status: 200,
                body: "response contained no url".to_string(),
            })
    }

    /// Upload images in batches of `api.upload_batch_size`, preserving order.
    pub async fn upload_gallery(&self, images: &[PathBuf]) -> PipelineResult<Vec<String>> {
        let batch_size = self.config.upload_batch_size.max(1);
        let total_batches = images.len().div_ceil(batch_size);
        let mut urls = Vec::with_capacity(images.len());

        for (i, batch) in images.chunks(batch_size).enumerate() {
            tracing::info!(
                "Uploading gallery batch {}/{} ({} images)",
                i + 1,
                total_batches,
                batch.len()
            );
            let subject = batch[0].as_path();
            let batch_urls = self
                .with_session(|token| async move {
                    let mut form = Form::new();
                    for image in batch {
                        form = form.part("file", file_part(image).await?);
                    }
                    self.post_upload(subject, form, &token).await
                })
                .await?;

            if batch_urls.is_empty() {
                return Err(PipelineError::UploadRejected {
                    path: subject.to_path_buf(),
                    status: 200,
                    body: "gallery batch returned no urls".to_string(),
                });
            }
            urls.extend(batch_urls);
        }
        Ok(urls)
    }

    async fn post_upload(&self, path: &Path, form: Form, token: &str) -> Result<Vec<String>, CallError> {
        let resp = self
            .client
            .post(&self.config.upload_endpoint)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::UploadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let (status, body) = read_response(resp).await?;
        let rejected = |body: String| PipelineError::UploadRejected {
            path: path.to_path_buf(),
            status: status.as_u16(),
            body: truncate(&body).to_string(),
        };

        if !status.is_success() {
            return Err(rejected(body).into());
        }
        let envelope: Envelope = serde_json::from_str(&body).map_err(|_| rejected(body.clone()))?;
        if !envelope.code_ok() {
            return Err(rejected(body).into());
        }
        Ok(envelope.urls())
    }

    /// Create the article record; returns the article id when the server sends one.
    pub async fn submit_article(
        &self,
        metadata: &ArticleMetadata,
        asset_url: &str,
    ) -> PipelineResult<Option<String>> {
        let cover = metadata.images.first().map(String::as_str).unwrap_or_default();
        let request = ArticleRequest {
            title: &metadata.title,
            images: &metadata.images,
            cover,
            category_id: self.config.category_id,
            kind: "image",
            require_membership: metadata.require_membership,
            status: "pending",
            attachment: asset_url,
            image_count: metadata.stats.image_count,
            video_count: metadata.stats.video_count,
            size_mb: metadata.stats.total_mb(),
        };

        self.with_session(|token| {
            let request = &request;
            async move {
                let resp = self
                    .client
                    .post(&self.config.article_endpoint)
                    .bearer_auth(&token)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| PipelineError::SubmissionFailed {
                        message: format!("article request failed: {e}"),
                        status_code: None,
                    })?;

                let (status, body) = read_response(resp).await?;
                if !status.is_success() {
                    return Err(CallError::Failed(PipelineError::SubmissionFailed {
                        message: truncate(&body).to_string(),
                        status_code: Some(status.as_u16()),
                    }));
                }

                let envelope: Envelope =
                    serde_json::from_str(&body).map_err(|e| PipelineError::SubmissionFailed {
                        message: format!("unreadable article response: {e}"),
                        status_code: Some(status.as_u16()),
                    })?;
                if envelope.code_ok() || envelope.data_success() {
                    Ok(envelope.article_id())
                } else {
                    Err(CallError::Failed(PipelineError::SubmissionFailed {
                        message: envelope
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("API code {:?}", envelope.code)),
                        status_code: Some(status.as_u16()),
                    }))
                }
            }
        })
        .await
    }

    /// The full Uploading stage for one item.
    ///
    /// Uploads `gallery` first (when non-empty and enabled), then the archive,
    /// then creates the article unless `api.publish` is off.
    pub async fn submit(
        &self,
        archive: &Path,
        mut metadata: ArticleMetadata,
        gallery: &[PathBuf],
    ) -> PipelineResult<SubmissionRecord> {
        if self.config.upload_gallery && !gallery.is_empty() {
            metadata.images = self.upload_gallery(gallery).await?;
        }

        let asset_url = self.upload(archive).await?;
        tracing::info!("Uploaded {:?} -> {}", archive, asset_url);

        let article_id = if self.config.publish {
            let id = self.submit_article(&metadata, &asset_url).await?;
            tracing::info!(
                "Article submitted: {} (id {})",
                metadata.title,
                id.as_deref().unwrap_or("n/a")
            );
            id
        } else {
            None
        };

        Ok(SubmissionRecord {
            asset_url,
            gallery: metadata.images,
            article_id,
        })
    }

    #[cfg(test)]
    pub(crate) async fn set_token(&self, token: &str) {
        *self.token.lock().await = Some(token.to_string());
    }
}

async fn file_part(path: &Path) -> PipelineResult<Part> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PipelineError::UploadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| PipelineError::UploadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
        .len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string());

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    Ok(Part::stream_with_length(body, len).file_name(name))
}

/// Split off 401/403 and read the body of everything else.
async fn read_response(resp: Response) -> Result<(StatusCode, String), CallError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CallError::AuthExpired);
    }
    let body = resp.text().await.unwrap_or_default();
    Ok((status, body))
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ContentStats;

    fn config(server: &mockito::Server) -> ApiConfig {
        ApiConfig {
            enabled: true,
            account: "uploader".into(),
            password: "pw".into(),
            login_endpoint: format!("{}/login", server.url()),
            upload_endpoint: format!("{}/upload", server.url()),
            article_endpoint: format!("{}/article", server.url()),
            device_id: "test-device".into(),
            upload_batch_size: 2,
            ..ApiConfig::default()
        }
    }

    fn archive(dir: &Path) -> PathBuf {
        let path = dir.join("set [2P - 0MB].7z");
        std::fs::write(&path, b"7z bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn test_login_caches_token() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/login")
            .match_header("device-id", "test-device")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "account": "uploader",
                "password": "pw"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .expect(1)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"code":200,"data":[{"url":"https://cdn/x.7z"}]}"#)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = archive(dir.path());
        let client = SubmissionClient::new(&config(&server)).unwrap();

        assert_eq!(client.upload(&path).await.unwrap(), "https://cdn/x.7z");
        assert_eq!(client.upload(&path).await.unwrap(), "https://cdn/x.7z");
        login.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":401,"message":"bad credentials"}"#)
            .create_async()
            .await;

        let client = SubmissionClient::new(&config(&server)).unwrap();
        let err = client.authenticate().await.unwrap_err();
        assert!(matches!(err, PipelineError::AuthenticationFailed { .. }));
        assert!(err.to_string().contains("bad credentials"));
    }

    #[tokio::test]
    async fn test_expired_session_is_renewed_once() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"token":"fresh"}}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer fresh")
            .with_status(201)
            .with_body(r#"{"code":201,"data":{"url":"https://cdn/y.7z"}}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SubmissionClient::new(&config(&server)).unwrap();
        client.set_token("stale").await;

        let url = client.upload(&archive(dir.path())).await.unwrap();
        assert_eq!(url, "https://cdn/y.7z");
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_rejection_is_authentication_failure() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .expect(2)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/upload")
            .with_status(403)
            .with_body("forbidden")
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SubmissionClient::new(&config(&server)).unwrap();
        let err = client.upload(&archive(dir.path())).await.unwrap_err();

        assert!(matches!(err, PipelineError::AuthenticationFailed { .. }));
        login.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_rejected_with_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/upload")
            .with_status(413)
            .with_body("payload too large")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SubmissionClient::new(&config(&server)).unwrap();
        let err = client.upload(&archive(dir.path())).await.unwrap_err();

        match err {
            PipelineError::UploadRejected { status, body, .. } => {
                assert_eq!(status, 413);
                assert_eq!(body, "payload too large");
            }
            other => panic!("expected UploadRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_upload_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .create_async()
            .await;

        let client = SubmissionClient::new(&config(&server)).unwrap();
        let err = client.upload(Path::new("/nope/missing.7z")).await.unwrap_err();
        assert!(matches!(err, PipelineError::UploadFailed { .. }));
    }

    #[tokio::test]
    async fn test_submit_article_success_flag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .create_async()
            .await;
        let article = server
            .mock("POST", "/article")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "title": "set [2P - 0MB]",
                "categoryId": 2,
                "type": "image",
                "status": "pending",
                "attachment": "https://cdn/x.7z",
                "imageCount": 2
            })))
            .with_status(200)
            .with_body(r#"{"code":500,"data":{"success":true,"data":{"id":77}}}"#)
            .create_async()
            .await;

        let client = SubmissionClient::new(&config(&server)).unwrap();
        let metadata = ArticleMetadata {
            title: "set [2P - 0MB]".into(),
            stats: ContentStats {
                image_count: 2,
                video_count: 0,
                total_bytes: 10,
            },
            images: vec![],
            require_membership: true,
        };
        let id = client.submit_article(&metadata, "https://cdn/x.7z").await.unwrap();
        assert_eq!(id.as_deref(), Some("77"));
        article.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_article_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/article")
            .with_status(200)
            .with_body(r#"{"code":400,"message":"title exists","data":{"success":false}}"#)
            .create_async()
            .await;

        let client = SubmissionClient::new(&config(&server)).unwrap();
        let err = client
            .submit_article(&ArticleMetadata::default(), "ref")
            .await
            .unwrap_err();
        match err {
            PipelineError::SubmissionFailed {
                message,
                status_code,
            } => {
                assert_eq!(message, "title exists");
                assert_eq!(status_code, Some(200));
            }
            other => panic!("expected SubmissionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gallery_uploads_in_batches() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/upload")
            .with_status(200)
            .with_body(r#"{"code":0,"data":[{"url":"u"}]}"#)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let images: Vec<PathBuf> = (1..=3)
            .map(|i| {
                let p = dir.path().join(format!("image_{i:03}.webp"));
                std::fs::write(&p, b"img").unwrap();
                p
            })
            .collect();

        let client = SubmissionClient::new(&config(&server)).unwrap();
        let urls = client.upload_gallery(&images).await.unwrap();
        assert_eq!(urls.len(), 2);
        upload.assert_async().await;
    }
}
