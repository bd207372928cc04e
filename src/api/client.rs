//! Google Drive v3 client implementing `NodeStore`.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::BoxStream;
use reqwest::header::{CONTENT_RANGE, LOCATION};
use reqwest::{Body, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::store::{ContentUpload, NodePage, NodePatch, NodeStore};
use crate::auth::Token;
use crate::error::{DriveError, Result};
use crate::fs::node::FOLDER_MIME_TYPE;
use crate::fs::{Node, NodeKind};
use crate::http::HttpClient;

/// Base URL for file metadata
const API_URL: &str = "https://www.googleapis.com/drive/v3/files";

/// Base URL for content uploads
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// Fields requested for every node
const FILE_FIELDS: &str =
    "id,name,mimeType,parents,size,modifiedTime,viewedByMeTime,trashed,explicitlyTrashed";

/// Resumable upload chunks other than the last must be multiples of this.
const UPLOAD_CHUNK_ALIGN: usize = 256 * 1024;

/// Largest page size the files.list endpoint accepts.
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    parents: Vec<String>,
    size: Option<String>,
    modified_time: Option<DateTime<Utc>>,
    viewed_by_me_time: Option<DateTime<Utc>>,
    #[serde(default)]
    trashed: bool,
    #[serde(default)]
    explicitly_trashed: bool,
}

impl From<DriveFile> for Node {
    fn from(file: DriveFile) -> Self {
        Node {
            kind: NodeKind::from_mime_type(&file.mime_type),
            size: file
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            id: file.id,
            name: file.name,
            parents: file.parents,
            mime_type: file.mime_type,
            modified: file.modified_time,
            accessed: file.viewed_by_me_time,
            trashed: file.trashed,
            explicitly_trashed: file.explicitly_trashed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Escape a literal for use inside a `q` query string.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `Content-Range` header for a resumable chunk; `total` is only known for
/// the final request.
fn content_range(offset: u64, len: usize, total: Option<u64>) -> String {
    let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total)
    }
}

fn aligned_len(len: usize) -> usize {
    len / UPLOAD_CHUNK_ALIGN * UPLOAD_CHUNK_ALIGN
}

fn patch_body(patch: &NodePatch) -> Value {
    let mut body = Map::new();
    if let Some(name) = &patch.name {
        body.insert("name".into(), Value::from(name.as_str()));
    }
    if let Some(trashed) = patch.trashed {
        body.insert("trashed".into(), Value::from(trashed));
    }
    if let Some(modified) = &patch.modified {
        body.insert("modifiedTime".into(), Value::from(format_time(modified)));
    }
    if let Some(accessed) = &patch.accessed {
        body.insert("viewedByMeTime".into(), Value::from(format_time(accessed)));
    }
    Value::Object(body)
}

/// Drive API client.
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: HttpClient,
}

impl DriveClient {
    /// Create a client over an authenticated transport.
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Create a client with a default transport for `token`.
    pub fn from_token(token: Token) -> Self {
        Self::new(HttpClient::new(token))
    }

    async fn fetch<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let response = self.http.send(build).await?;
        Ok(response.json::<T>().await?)
    }

    async fn list(&self, q: &str, order_by: &str, page_token: Option<&str>, page_size: usize) -> Result<FileList> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE).to_string();
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        self.fetch(|| {
            let mut query = vec![
                ("q", q),
                ("fields", fields.as_str()),
                ("orderBy", order_by),
                ("pageSize", page_size.as_str()),
                ("spaces", "drive"),
            ];
            if let Some(token) = page_token {
                query.push(("pageToken", token));
            }
            self.http.request(Method::GET, API_URL).query(&query)
        })
        .await
    }
}

#[async_trait]
impl NodeStore for DriveClient {
    async fn get(&self, id: &str) -> Result<Node> {
        let url = format!("{}/{}", API_URL, id);
        let file: DriveFile = self
            .fetch(|| {
                self.http
                    .request(Method::GET, &url)
                    .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            })
            .await?;
        Ok(file.into())
    }

    async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<Node>> {
        let q = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            escape_query(parent_id),
            escape_query(name)
        );
        let list = self.list(&q, "createdTime", None, 10).await?;
        Ok(list.files.into_iter().next().map(Node::from))
    }

    async fn list_children(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<NodePage> {
        let q = format!("'{}' in parents and trashed = false", escape_query(parent_id));
        let list = self.list(&q, "name", page_token, page_size).await?;
        Ok(NodePage {
            nodes: list.files.into_iter().map(Node::from).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn list_trashed(&self, page_token: Option<&str>, page_size: usize) -> Result<NodePage> {
        let list = self
            .list("trashed = true", "createdTime", page_token, page_size)
            .await?;
        Ok(NodePage {
            nodes: list
                .files
                .into_iter()
                .filter(|f| f.explicitly_trashed)
                .map(Node::from)
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn create(&self, parent_id: &str, name: &str, kind: NodeKind) -> Result<Node> {
        let mut body = json!({ "name": name, "parents": [parent_id] });
        if kind == NodeKind::Directory {
            body["mimeType"] = Value::from(FOLDER_MIME_TYPE);
        }
        let file: DriveFile = self
            .fetch(|| {
                self.http
                    .request(Method::POST, API_URL)
                    .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
                    .json(&body)
            })
            .await?;
        Ok(file.into())
    }

    async fn patch(&self, id: &str, patch: NodePatch) -> Result<Node> {
        let url = format!("{}/{}", API_URL, id);
        let body = patch_body(&patch);
        let add_parents = patch.add_parents.join(",");
        let remove_parents = patch.remove_parents.join(",");
        let file: DriveFile = self
            .fetch(|| {
                let mut query = vec![("fields", FILE_FIELDS), ("supportsAllDrives", "true")];
                if !add_parents.is_empty() {
                    query.push(("addParents", add_parents.as_str()));
                }
                if !remove_parents.is_empty() {
                    query.push(("removeParents", remove_parents.as_str()));
                }
                self.http.request(Method::PATCH, &url).query(&query).json(&body)
            })
            .await?;
        Ok(file.into())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/{}", API_URL, id);
        self.http
            .send(|| {
                self.http
                    .request(Method::DELETE, &url)
                    .query(&[("supportsAllDrives", "true")])
            })
            .await?;
        Ok(())
    }

    async fn write_content(&self, id: &str, data: Bytes) -> Result<Node> {
        let url = format!("{}/{}", UPLOAD_URL, id);
        let file: DriveFile = self
            .fetch(|| {
                self.http
                    .request(Method::PATCH, &url)
                    .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
                    .body(data.clone())
            })
            .await?;
        Ok(file.into())
    }

    async fn begin_upload(&self, id: &str) -> Result<Box<dyn ContentUpload>> {
        let url = format!("{}/{}", UPLOAD_URL, id);
        let response = self
            .http
            .send(|| {
                self.http
                    .request(Method::PATCH, &url)
                    .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
                    .json(&json!({}))
            })
            .await?;
        let session_uri = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(DriveError::InvalidResponse)?
            .to_string();

        tracing::debug!(node = id, "opened resumable upload session");
        Ok(Box::new(ResumableUpload {
            http: self.http.clone(),
            session_uri,
            offset: 0,
            pending: BytesMut::new(),
        }))
    }

    async fn upload_stream(
        &self,
        id: &str,
        body: BoxStream<'static, Result<Bytes>>,
    ) -> Result<Node> {
        let url = format!("{}/{}", UPLOAD_URL, id);
        let builder = self
            .http
            .request(Method::PATCH, &url)
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .body(Body::wrap_stream(body));
        // A streamed body cannot be replayed, so no retries here.
        let response = self.http.send_once(builder, &[]).await?;
        let file: DriveFile = response.json().await?;
        Ok(file.into())
    }

    async fn read_content(&self, id: &str) -> Result<Bytes> {
        let url = format!("{}/{}", API_URL, id);
        let response = self
            .http
            .send(|| {
                self.http
                    .request(Method::GET, &url)
                    .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            })
            .await?;
        Ok(response.bytes().await?)
    }
}

/// One resumable upload session.
///
/// Chunks are sent in 256 KiB multiples; any tail waits for the next append
/// or for `finish`, which sends it as the final chunk.
struct ResumableUpload {
    http: HttpClient,
    session_uri: String,
    offset: u64,
    pending: BytesMut,
}

#[async_trait]
impl ContentUpload for ResumableUpload {
    async fn append(&mut self, data: Bytes) -> Result<()> {
        self.pending.extend_from_slice(&data);
        let len = aligned_len(self.pending.len());
        if len == 0 {
            return Ok(());
        }

        let chunk = self.pending.split_to(len).freeze();
        let builder = self
            .http
            .request(Method::PUT, &self.session_uri)
            .header(CONTENT_RANGE, content_range(self.offset, len, None))
            .body(chunk);
        self.http
            .send_once(builder, &[StatusCode::PERMANENT_REDIRECT])
            .await?;
        self.offset += len as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<Node> {
        let ResumableUpload {
            http,
            session_uri,
            offset,
            mut pending,
        } = *self;
        let len = pending.remaining();
        let total = offset + len as u64;
        let builder = http
            .request(Method::PUT, &session_uri)
            .header(CONTENT_RANGE, content_range(offset, len, Some(total)))
            .body(pending.split().freeze());
        let response = http.send_once(builder, &[]).await?;
        let file: DriveFile = response.json().await?;
        Ok(file.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_file_conversion() {
        let file: DriveFile = serde_json::from_str(
            r#"{
                "id": "1abc",
                "name": "report.txt",
                "mimeType": "text/plain",
                "parents": ["0Aroot", "1other"],
                "size": "1234",
                "modifiedTime": "2021-03-04T05:06:07.000Z",
                "trashed": false
            }"#,
        )
        .unwrap();
        let node = Node::from(file);
        assert_eq!(node.id, "1abc");
        assert!(node.is_file());
        assert_eq!(node.size, 1234);
        assert_eq!(node.parents, vec!["0Aroot", "1other"]);
        assert!(node.modified.is_some());
        assert!(node.accessed.is_none());
    }

    #[test]
    fn test_folder_conversion() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"d","name":"Folder1","mimeType":"application/vnd.google-apps.folder"}"#,
        )
        .unwrap();
        let node = Node::from(file);
        assert!(node.is_dir());
        assert_eq!(node.size, 0);
        assert!(node.parents.is_empty());
    }

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
        assert_eq!(escape_query("plain"), "plain");
    }

    #[test]
    fn test_content_range() {
        assert_eq!(content_range(0, 262144, None), "bytes 0-262143/*");
        assert_eq!(content_range(262144, 10, Some(262154)), "bytes 262144-262153/262154");
        assert_eq!(content_range(524288, 0, Some(524288)), "bytes */524288");
    }

    #[test]
    fn test_aligned_len() {
        assert_eq!(aligned_len(100), 0);
        assert_eq!(aligned_len(UPLOAD_CHUNK_ALIGN), UPLOAD_CHUNK_ALIGN);
        assert_eq!(aligned_len(UPLOAD_CHUNK_ALIGN * 2 + 7), UPLOAD_CHUNK_ALIGN * 2);
    }

    #[test]
    fn test_patch_body() {
        let patch = NodePatch {
            name: Some("new".to_string()),
            trashed: Some(true),
            add_parents: vec!["p".to_string()],
            ..Default::default()
        };
        let body = patch_body(&patch);
        assert_eq!(body["name"], "new");
        assert_eq!(body["trashed"], true);
        assert!(body.get("parents").is_none());
        assert!(body.get("modifiedTime").is_none());
    }
}
