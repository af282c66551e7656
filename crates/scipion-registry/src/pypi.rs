//! PyPI JSON API.
//!
//! Only `GET <index>/<project>/json` is used: project info plus the files of
//! every release.

use crate::RegistryError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tracing::debug;

/// Source of project metadata.
pub trait ProjectIndex {
    /// Metadata of `name`, `None` when the index does not know it.
    fn project(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<PypiProject>, RegistryError>> + Send;
}

/// Client for a PyPI-compatible JSON API.
#[derive(Debug, Clone)]
pub struct PypiClient {
    base_url: String,
    client: Client,
}

impl PypiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ProjectIndex for PypiClient {
    async fn project(&self, name: &str) -> Result<Option<PypiProject>, RegistryError> {
        let url = format!("{}/{}/json", self.base_url, name);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(RegistryError::Http {
                url,
                status: resp.status().as_u16(),
            });
        }

        let project: PypiProject = resp
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(format!("{}: {}", url, e)))?;
        Ok(Some(project))
    }
}

/// Index kept in memory, for offline catalogs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    projects: HashMap<String, PypiProject>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, project: PypiProject) -> &mut Self {
        self.projects.insert(name.into(), project);
        self
    }
}

impl ProjectIndex for MemoryIndex {
    async fn project(&self, name: &str) -> Result<Option<PypiProject>, RegistryError> {
        Ok(self.projects.get(name).cloned())
    }
}

/// Body of `<index>/<project>/json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PypiProject {
    #[serde(default)]
    pub info: ProjectInfo,
    #[serde(default)]
    pub releases: BTreeMap<String, Vec<ReleaseFile>>,
}

/// The `info` object. Missing and `null` fields are both `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub home_page: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub project_urls: Option<BTreeMap<String, String>>,
}

/// First non-empty value, or a single blank so the listing keeps its columns.
fn first_filled<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> String {
    values
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
        .unwrap_or(" ")
        .to_string()
}

impl ProjectInfo {
    /// `home_page`, falling back to the `Homepage` project URL.
    pub fn home_page(&self) -> String {
        let project_url = self
            .project_urls
            .as_ref()
            .and_then(|urls| urls.get("Homepage"))
            .map(String::as_str);
        first_filled([self.home_page.as_deref(), project_url])
    }

    pub fn summary(&self) -> String {
        first_filled([self.summary.as_deref()])
    }

    /// `author`, falling back to the author e-mail.
    pub fn author(&self) -> String {
        first_filled([self.author.as_deref(), self.author_email.as_deref()])
    }

    pub fn email(&self) -> String {
        first_filled([self.author_email.as_deref()])
    }
}

/// One uploaded file of a release; only the first file of each release is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    #[serde(default)]
    pub comment_text: Option<String>,
    #[serde(default)]
    pub upload_time: Option<String>,
}

impl ReleaseFile {
    pub fn with_comment(comment: &str, upload_time: &str) -> Self {
        Self {
            comment_text: Some(comment.to_string()),
            upload_time: Some(upload_time.to_string()),
        }
    }
}
