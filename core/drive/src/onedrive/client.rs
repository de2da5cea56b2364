//! Microsoft Graph drive client.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use skyview_common::{DrivePath, Error, ItemId, Result};

use super::auth::TokenManager;
use super::upload::{content_range, needs_upload_session, send_chunks, ChunkSink, ChunkStatus};
use crate::api::{collect_stream, ByteStream, DriveApi, ItemRef};
use crate::config::{AppConfig, ClientType};
use crate::model::{
    CollectionPage, CreateFolderRequest, CreateLinkRequest, DeltaPage, DriveItem,
    GraphErrorResponse, LinkScope, LinkType, Permission, UploadSession,
};

/// Characters escaped inside a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

fn encode_path(path: &DrivePath) -> String {
    path.components()
        .iter()
        .map(|c| encode_segment(c))
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds Graph URLs for the signed-in user's drive.
#[derive(Debug, Clone)]
struct UrlBuilder {
    graph_base: String,
    drive_base: String,
}

impl UrlBuilder {
    fn new(graph_base_url: &str) -> Self {
        let graph_base = graph_base_url.trim_end_matches('/').to_string();
        Self {
            drive_base: format!("{}/me/drive", graph_base),
            graph_base,
        }
    }

    /// Whether `link` points at the configured Graph endpoint.
    fn is_graph_link(&self, link: &str) -> bool {
        link.strip_prefix(&self.graph_base)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// URL of the item itself.
    fn item(&self, target: &ItemRef) -> String {
        match target {
            ItemRef::Root => format!("{}/root", self.drive_base),
            ItemRef::Id(id) => format!("{}/items/{}", self.drive_base, encode_segment(id.as_str())),
            ItemRef::Path(path) => format!("{}/root:/{}", self.drive_base, encode_path(path)),
        }
    }

    /// URL of a navigation property or action of the item.
    fn action(&self, target: &ItemRef, action: &str) -> String {
        match target {
            ItemRef::Path(path) => {
                format!("{}/root:/{}:/{}", self.drive_base, encode_path(path), action)
            }
            other => format!("{}/{}", self.item(other), action),
        }
    }

    /// URL of an action on the child `name` of `parent`, addressed by path.
    fn child_action(&self, parent: &ItemRef, name: &str, action: &str) -> String {
        let name = encode_segment(name);
        match parent {
            ItemRef::Root => format!("{}/root:/{}:/{}", self.drive_base, name, action),
            ItemRef::Id(id) => format!(
                "{}/items/{}:/{}:/{}",
                self.drive_base,
                encode_segment(id.as_str()),
                name,
                action
            ),
            ItemRef::Path(path) => format!(
                "{}/root:/{}/{}:/{}",
                self.drive_base,
                encode_path(path),
                name,
                action
            ),
        }
    }
}

/// Map an unsuccessful response to an error.
///
/// The Graph error envelope supplies code and message when present.
fn classify_error(status: StatusCode, body: &str) -> Error {
    let (code, message) = match serde_json::from_str::<GraphErrorResponse>(body) {
        Ok(parsed) => (parsed.error.code, parsed.error.message),
        Err(_) => (
            status.canonical_reason().unwrap_or("unknown").to_string(),
            body.to_string(),
        ),
    };

    match status {
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::UNAUTHORIZED => Error::Authentication(message),
        StatusCode::FORBIDDEN => Error::PermissionDenied(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        _ => Error::Service {
            status: status.as_u16(),
            code,
            message,
        },
    }
}

async fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_error(status, &body)
}

/// Microsoft Graph API client for OneDrive.
pub struct GraphClient {
    http: Client,
    token_manager: Arc<TokenManager>,
    urls: UrlBuilder,
    client_type: ClientType,
}

impl GraphClient {
    /// Create a new Graph client.
    ///
    /// # Errors
    /// - HTTP client construction failed
    pub fn new(token_manager: Arc<TokenManager>, config: &AppConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("SkyView/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_manager,
            urls: UrlBuilder::new(&config.graph_base_url),
            client_type: config.client_type,
        })
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = self.token_manager.get_access_token().await?;
        Ok(format!("Bearer {}", token.expose()))
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let auth = self.auth_header().await?;

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, auth)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to {}: {}", what, e)))?;

        self.handle_response(response).await
    }

    async fn upload_simple(&self, parent: &ItemRef, name: &str, data: Bytes) -> Result<DriveItem> {
        let url = self.urls.child_action(parent, name, "content");
        let auth = self.auth_header().await?;

        let response = self
            .http
            .put(&url)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload file: {}", e)))?;

        self.handle_response(response).await
    }

    async fn create_upload_session(&self, parent: &ItemRef, name: &str) -> Result<UploadSession> {
        let url = self.urls.child_action(parent, name, "createUploadSession");
        let auth = self.auth_header().await?;

        let body = serde_json::json!({
            "item": { "@microsoft.graph.conflictBehavior": "replace" }
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create upload session: {}", e)))?;

        self.handle_response(response).await
    }
}

/// Chunks of one upload session.
///
/// The upload URL is pre-authenticated; sending a bearer token is refused.
struct UploadSessionSink<'a> {
    http: &'a Client,
    upload_url: String,
}

#[async_trait]
impl<'a> ChunkSink for UploadSessionSink<'a> {
    async fn put_chunk(
        &self,
        range: Range<u64>,
        total: u64,
        chunk: Bytes,
    ) -> Result<Option<DriveItem>> {
        let response = self
            .http
            .put(&self.upload_url)
            .header(header::CONTENT_LENGTH, chunk.len().to_string())
            .header(header::CONTENT_RANGE, content_range(&range, total))
            .body(chunk)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload chunk: {}", e)))?;

        match ChunkStatus::from_status(response.status()) {
            ChunkStatus::Accepted => Ok(None),
            ChunkStatus::Completed => response
                .json()
                .await
                .map(Some)
                .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e))),
            ChunkStatus::Failed => Err(error_from_response(response).await),
        }
    }

    async fn cancel(&self) {
        if let Err(e) = self.http.delete(&self.upload_url).send().await {
            tracing::warn!("Failed to cancel upload session: {}", e);
        }
    }
}

#[async_trait]
impl DriveApi for GraphClient {
    fn name(&self) -> &str {
        "graph"
    }

    async fn get_item(&self, target: &ItemRef) -> Result<DriveItem> {
        self.get_json(&self.urls.item(target), &[], "get item").await
    }

    async fn get_item_with_children(&self, target: &ItemRef) -> Result<DriveItem> {
        tracing::debug!("Listing {}", target);
        self.get_json(
            &self.urls.item(target),
            &[("$expand", self.client_type.expand())],
            "list folder",
        )
        .await
    }

    async fn upload(
        &self,
        parent: &ItemRef,
        name: &str,
        data: ByteStream,
        size: u64,
    ) -> Result<DriveItem> {
        if !needs_upload_session(size) {
            let data = collect_stream(data, size).await?;
            return self.upload_simple(parent, name, data).await;
        }

        let session = self.create_upload_session(parent, name).await?;
        tracing::debug!("Uploading {} ({} bytes) in chunks", name, size);

        let sink = UploadSessionSink {
            http: &self.http,
            upload_url: session.upload_url,
        };
        send_chunks(&sink, data, size).await
    }

    async fn download_stream(&self, id: &ItemId) -> Result<ByteStream> {
        let url = self.urls.action(&ItemRef::Id(id.clone()), "content");
        let auth = self.auth_header().await?;

        // The content endpoint redirects to a pre-authenticated URL; reqwest
        // drops the Authorization header when the host changes.
        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start download: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| Error::Network(format!("Stream read error: {}", e))));

        Ok(Box::pin(stream))
    }

    async fn delete(&self, id: &ItemId) -> Result<()> {
        let url = self.urls.item(&ItemRef::Id(id.clone()));
        let auth = self.auth_header().await?;

        let response = self
            .http
            .delete(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete item: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn create_folder(&self, parent: &ItemRef, name: &str) -> Result<DriveItem> {
        let url = self.urls.action(parent, "children");
        let auth = self.auth_header().await?;

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .json(&CreateFolderRequest::new(name))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create folder: {}", e)))?;

        self.handle_response(response).await
    }

    async fn create_link(
        &self,
        id: &ItemId,
        link_type: LinkType,
        scope: LinkScope,
    ) -> Result<Permission> {
        let url = self.urls.action(&ItemRef::Id(id.clone()), "createLink");
        let auth = self.auth_header().await?;

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .json(&CreateLinkRequest { link_type, scope })
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create sharing link: {}", e)))?;

        self.handle_response(response).await
    }

    async fn list_permissions(&self, id: &ItemId) -> Result<Vec<Permission>> {
        let url = self.urls.action(&ItemRef::Id(id.clone()), "permissions");
        let page: CollectionPage<Permission> =
            self.get_json(&url, &[], "list permissions").await?;
        Ok(page.value)
    }

    async fn delta(&self, folder: &ItemRef, continuation: Option<&str>) -> Result<DeltaPage> {
        // Next and delta links are absolute URLs carrying their own token.
        let url = match continuation {
            Some(link) => {
                if !self.urls.is_graph_link(link) {
                    return Err(Error::InvalidInput(format!(
                        "Delta link does not point at Microsoft Graph: {}",
                        link
                    )));
                }
                link.to_string()
            }
            None => self.urls.action(folder, "delta"),
        };

        let page: CollectionPage<DriveItem> = self.get_json(&url, &[], "fetch changes").await?;
        Ok(page.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://graph.microsoft.com/v1.0";

    fn urls() -> UrlBuilder {
        UrlBuilder::new(BASE)
    }

    #[test]
    fn test_item_urls() {
        let urls = urls();
        assert_eq!(urls.item(&ItemRef::Root), format!("{}/me/drive/root", BASE));
        assert_eq!(
            urls.item(&ItemRef::id("ABC!101").unwrap()),
            format!("{}/me/drive/items/ABC!101", BASE)
        );
        assert_eq!(
            urls.item(&ItemRef::path("/Documents/My Files").unwrap()),
            format!("{}/me/drive/root:/Documents/My%20Files", BASE)
        );
    }

    #[test]
    fn test_action_urls() {
        let urls = urls();
        assert_eq!(
            urls.action(&ItemRef::Root, "delta"),
            format!("{}/me/drive/root/delta", BASE)
        );
        assert_eq!(
            urls.action(&ItemRef::id("X").unwrap(), "createLink"),
            format!("{}/me/drive/items/X/createLink", BASE)
        );
        assert_eq!(
            urls.action(&ItemRef::path("Photos").unwrap(), "children"),
            format!("{}/me/drive/root:/Photos:/children", BASE)
        );
    }

    #[test]
    fn test_child_action_urls() {
        let urls = urls();
        assert_eq!(
            urls.child_action(&ItemRef::Root, "report #1.txt", "content"),
            format!("{}/me/drive/root:/report%20%231.txt:/content", BASE)
        );
        assert_eq!(
            urls.child_action(&ItemRef::id("F!1").unwrap(), "a.bin", "createUploadSession"),
            format!("{}/me/drive/items/F!1:/a.bin:/createUploadSession", BASE)
        );
        assert_eq!(
            urls.child_action(&ItemRef::path("/A/B").unwrap(), "c.txt", "content"),
            format!("{}/me/drive/root:/A/B/c.txt:/content", BASE)
        );
    }

    #[test]
    fn test_trailing_slash_in_base_url() {
        let urls = UrlBuilder::new("http://localhost:8080/v1.0/");
        assert_eq!(urls.item(&ItemRef::Root), "http://localhost:8080/v1.0/me/drive/root");
    }

    #[test]
    fn test_graph_link_check() {
        let urls = urls();
        assert!(urls.is_graph_link(&format!("{}/me/drive/root/delta?token=abc", BASE)));
        assert!(urls.is_graph_link(&format!("{}/drives/b!x/root/delta?token=abc", BASE)));
        assert!(!urls.is_graph_link("https://evil.example/v1.0/me/drive/root/delta"));
        assert!(!urls.is_graph_link(&format!("{}.evil.example/x", BASE)));
    }

    #[test]
    fn test_classify_graph_errors() {
        let body = r#"{"error":{"code":"itemNotFound","message":"The resource could not be found."}}"#;
        match classify_error(StatusCode::NOT_FOUND, body) {
            Error::NotFound(message) => assert_eq!(message, "The resource could not be found."),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            classify_error(StatusCode::UNAUTHORIZED, ""),
            Error::Authentication(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, ""),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::CONFLICT, ""),
            Error::Conflict(_)
        ));
    }

    #[test]
    fn test_classify_service_error_keeps_code() {
        let body = r#"{"error":{"code":"quotaLimitReached","message":"Insufficient quota"}}"#;
        match classify_error(StatusCode::INSUFFICIENT_STORAGE, body) {
            Error::Service {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 507);
                assert_eq!(code, "quotaLimitReached");
                assert_eq!(message, "Insufficient quota");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_classify_non_json_body() {
        match classify_error(StatusCode::BAD_GATEWAY, "upstream down") {
            Error::Service { code, message, .. } => {
                assert_eq!(code, "Bad Gateway");
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
