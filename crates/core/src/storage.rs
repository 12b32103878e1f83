use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::naming::parse_backup_filename;
use crate::{Error, Result};

pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_API_VERSION: &str = "2022-11-28";
pub const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const LIST_PAGE_SIZE: u32 = 100;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Opaque blob store: objects carry an id, a label and named text files.
/// Nothing is retried.
pub trait RemoteStore {
    fn provider(&self) -> &'static str;

    fn create<'a>(
        &'a self,
        label: &'a str,
        files: BTreeMap<String, String>,
    ) -> BoxFuture<'a, String>;

    /// Everything visible to the credentials, not only this backup family.
    fn list(&self) -> BoxFuture<'_, Vec<RemoteObject>>;

    fn read_content<'a>(&'a self, content: &'a ContentRef) -> BoxFuture<'a, String>;

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentRef {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteObject {
    pub id: String,
    pub label: String,
    pub files: BTreeMap<String, ContentRef>,
}

impl RemoteObject {
    /// The single `.json` file of a backup entry.
    pub fn payload(&self) -> Option<&ContentRef> {
        self.files
            .values()
            .find(|c| c.filename.ends_with(crate::naming::FILENAME_SUFFIX))
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        self.payload()
            .and_then(|c| parse_backup_filename(&c.filename))
    }
}

#[derive(Debug, Clone)]
pub struct GistStoreConfig {
    pub api_base: String,
    pub token: String,
    pub user_agent: String,
}

pub struct GistStore {
    config: GistStoreConfig,
    client: reqwest::Client,
}

impl GistStore {
    pub fn new(config: GistStoreConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(Error::config("remote store token is not configured"));
        }
        Ok(Self {
            config: GistStoreConfig {
                api_base: config.api_base.trim_end_matches('/').to_string(),
                ..config
            },
            client: reqwest::Client::new(),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(reqwest::header::USER_AGENT, &self.config.user_agent)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
            .bearer_auth(&self.config.token)
    }

    async fn send(&self, req: reqwest::RequestBuilder, op: &str) -> Result<String> {
        self.send_page(req, op).await.map(|(body, _)| body)
    }

    /// Like `send`, also returning the `rel="next"` target of the `Link` header.
    async fn send_page(
        &self,
        req: reqwest::RequestBuilder,
        op: &str,
    ) -> Result<(String, Option<String>)> {
        let res = req
            .send()
            .await
            .map_err(|e| Error::remote(format!("{op} request failed: {e}")))?;
        let status = res.status();
        let next = res
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);
        let body = res
            .text()
            .await
            .map_err(|e| Error::remote(format!("{op} read response failed: {e}")))?;
        debug!(
            event = "store.response",
            op,
            status = status.as_u16(),
            has_next = next.is_some(),
            "store.response"
        );
        check_envelope(status, &body)?;
        Ok((body, next))
    }
}

impl RemoteStore for GistStore {
    fn provider(&self) -> &'static str {
        "github.gist"
    }

    fn create<'a>(
        &'a self,
        label: &'a str,
        files: BTreeMap<String, String>,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let files: BTreeMap<String, GistFileContent> = files
                .into_iter()
                .map(|(name, content)| (name, GistFileContent { content }))
                .collect();
            let payload = CreateGist {
                description: label,
                public: false,
                files,
            };
            let url = format!("{}/gists", self.config.api_base);
            let body = self
                .send(self.request(reqwest::Method::POST, &url).json(&payload), "create")
                .await?;
            let created: CreatedGist = decode_json(&body)?;
            Ok(created.id)
        })
    }

    fn list(&self) -> BoxFuture<'_, Vec<RemoteObject>> {
        Box::pin(async move {
            let url = format!("{}/gists", self.config.api_base);
            let first = self
                .request(reqwest::Method::GET, &url)
                .query(&[("per_page", LIST_PAGE_SIZE)]);
            let (body, mut next) = self.send_page(first, "list").await?;
            let mut items: Vec<GistItem> = decode_json(&body)?;

            let mut seen = HashSet::new();
            while let Some(url) = next.take() {
                if !seen.insert(url.clone()) {
                    return Err(Error::remote(format!("list pagination loops at {url}")));
                }
                let (body, following) = self
                    .send_page(self.request(reqwest::Method::GET, &url), "list")
                    .await?;
                let page: Vec<GistItem> = decode_json(&body)?;
                items.extend(page);
                next = following;
            }

            debug!(
                event = "store.list",
                objects = items.len(),
                pages = seen.len() + 1,
                "store.list"
            );
            Ok(items.into_iter().map(GistItem::into_remote).collect())
        })
    }

    fn read_content<'a>(&'a self, content: &'a ContentRef) -> BoxFuture<'a, String> {
        Box::pin(async move {
            self.send(self.request(reqwest::Method::GET, &content.url), "read")
                .await
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/gists/{id}", self.config.api_base);
            self.send(self.request(reqwest::Method::DELETE, &url), "delete")
                .await?;
            Ok(())
        })
    }
}

/// Target of the `rel="next"` entry in a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim(), "rel=\"next\"" | "rel=next"));
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        is_next.then(|| target.to_string())
    })
}

/// A `message` field in any JSON object body is a failure, whatever the status.
pub(crate) fn check_envelope(status: reqwest::StatusCode, body: &str) -> Result<()> {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = map.get("message") {
            let message = match message {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(Error::remote(message));
        }
    }
    if !status.is_success() {
        return Err(Error::remote(format!("http {status}: {body}")));
    }
    Ok(())
}

fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::remote(format!("invalid json: {e}; body={body}")))
}

#[derive(Debug, Serialize)]
struct CreateGist<'a> {
    description: &'a str,
    public: bool,
    files: BTreeMap<String, GistFileContent>,
}

#[derive(Debug, Serialize)]
struct GistFileContent {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CreatedGist {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GistItem {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    files: BTreeMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    filename: Option<String>,
    raw_url: Option<String>,
}

impl GistItem {
    fn into_remote(self) -> RemoteObject {
        let files = self
            .files
            .into_iter()
            .filter_map(|(key, file)| {
                let url = file.raw_url?;
                let filename = file.filename.unwrap_or_else(|| key.clone());
                Some((key, ContentRef { filename, url }))
            })
            .collect();
        RemoteObject {
            id: self.id,
            label: self.description.unwrap_or_default(),
            files,
        }
    }
}

#[derive(Debug)]
struct StoredObject {
    id: String,
    label: String,
    files: BTreeMap<String, String>,
}

/// Lists the most recently created object first, like the gist API.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
    pub reads: AtomicUsize,
    inner: Mutex<Vec<StoredObject>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an object after everything already listed.
    pub async fn seed(&self, id: &str, label: &str, files: &[(&str, &str)]) {
        self.inner.lock().await.push(StoredObject {
            id: id.to_string(),
            label: label.to_string(),
            files: files
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_string()))
                .collect(),
        });
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.lock().await.iter().map(|o| o.id.clone()).collect()
    }

    pub async fn object_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn content(&self, id: &str, filename: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .iter()
            .find(|o| o.id == id)
            .and_then(|o| o.files.get(filename).cloned())
    }
}

impl RemoteStore for InMemoryStore {
    fn provider(&self) -> &'static str {
        "test.mem"
    }

    fn create<'a>(
        &'a self,
        label: &'a str,
        files: BTreeMap<String, String>,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let id = format!("mem:{}", uuid::Uuid::new_v4());
            self.inner.lock().await.insert(
                0,
                StoredObject {
                    id: id.clone(),
                    label: label.to_string(),
                    files,
                },
            );
            self.created.fetch_add(1, Ordering::Relaxed);
            Ok(id)
        })
    }

    fn list(&self) -> BoxFuture<'_, Vec<RemoteObject>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .iter()
                .map(|o| RemoteObject {
                    id: o.id.clone(),
                    label: o.label.clone(),
                    files: o
                        .files
                        .keys()
                        .map(|name| {
                            (
                                name.clone(),
                                ContentRef {
                                    filename: name.clone(),
                                    url: format!("mem://{}/{}", o.id, name),
                                },
                            )
                        })
                        .collect(),
                })
                .collect())
        })
    }

    fn read_content<'a>(&'a self, content: &'a ContentRef) -> BoxFuture<'a, String> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::Relaxed);
            let (id, filename) = content
                .url
                .strip_prefix("mem://")
                .and_then(|rest| rest.split_once('/'))
                .ok_or_else(|| Error::remote(format!("bad content url: {}", content.url)))?;
            self.content(id, filename)
                .await
                .ok_or_else(|| Error::remote("Not Found"))
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let pos = inner
                .iter()
                .position(|o| o.id == id)
                .ok_or_else(|| Error::remote("Not Found"))?;
            inner.remove(pos);
            self.deleted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}
