//! The plugin catalog: pip name to catalog entry.
//!
//! ```json
//! {
//!   "scipion-em-relion": {"pipName": "scipion-em-relion", "name": "relion"},
//!   "scipion-em-xmipp": {"pipName": "scipion-em-xmipp", "pluginSourceUrl": "https://github.com/I2PC/scipion-em-xmipp.git"}
//! }
//! ```

use crate::RegistryError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One plugin as listed in the catalog. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(default)]
    pub pip_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plugin_source_url: String,
}

/// Catalog keyed by pip name, sorted.
pub type Catalog = BTreeMap<String, CatalogEntry>;

/// Decode a catalog document, filling missing pip names from the keys.
pub fn parse_catalog(text: &str) -> Result<Catalog, serde_json::Error> {
    let mut catalog: Catalog = serde_json::from_str(text)?;
    for (key, entry) in catalog.iter_mut() {
        if entry.pip_name.is_empty() {
            entry.pip_name = key.clone();
        }
    }
    Ok(catalog)
}

/// Where the catalog comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// A local JSON file; its content is authoritative, the index is not queried.
    File(PathBuf),
    /// A URL fetched on every load.
    Url(String),
}

/// Outcome of fetching the catalog. Only local read and decode problems are errors.
#[derive(Debug)]
pub enum CatalogFetch {
    Loaded(Catalog),
    /// The server could not be reached, or the connection dropped mid-body.
    Unreachable(String),
    /// The server answered with a non-success status.
    Unavailable(u16),
    /// The server answered with something that is not a catalog.
    Invalid(String),
}

impl CatalogSource {
    /// A location naming an existing file is a file source, anything else a URL.
    pub fn from_location(location: &str) -> Self {
        if Path::new(location).is_file() {
            CatalogSource::File(PathBuf::from(location))
        } else {
            CatalogSource::Url(location.to_string())
        }
    }

    /// Whether entries from this source should be completed with index metadata.
    pub fn uses_index(&self) -> bool {
        matches!(self, CatalogSource::Url(_))
    }

    pub async fn fetch(&self, client: &Client) -> Result<CatalogFetch, RegistryError> {
        match self {
            CatalogSource::File(path) => {
                let text = fs::read_to_string(path).map_err(|source| RegistryError::Io {
                    path: path.clone(),
                    source,
                })?;
                let catalog = parse_catalog(&text).map_err(|source| RegistryError::Json {
                    path: path.clone(),
                    source,
                })?;
                Ok(CatalogFetch::Loaded(catalog))
            }
            CatalogSource::Url(url) => {
                debug!("GET {}", url);
                let resp = match client.get(url).send().await {
                    Ok(resp) => resp,
                    Err(e) => return Ok(CatalogFetch::Unreachable(e.to_string())),
                };
                if !resp.status().is_success() {
                    return Ok(CatalogFetch::Unavailable(resp.status().as_u16()));
                }
                let text = match resp.text().await {
                    Ok(text) => text,
                    Err(e) => return Ok(CatalogFetch::Unreachable(e.to_string())),
                };
                match parse_catalog(&text) {
                    Ok(catalog) => Ok(CatalogFetch::Loaded(catalog)),
                    Err(e) => Ok(CatalogFetch::Invalid(format!("{}: {}", url, e))),
                }
            }
        }
    }
}
