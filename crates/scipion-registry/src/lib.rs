//! Package index client and plugin catalog.
//!
//! Plugins are pip distributions published on a PyPI-compatible index. A
//! release declares the core versions it supports in its upload comment
//! (`scipion-3.0`); [`compat`] turns the release list into the set usable
//! with the running core. The catalog of known plugins is a JSON document
//! served over HTTP or kept as a local file.

pub mod catalog;
pub mod compat;
pub mod pypi;

pub use catalog::{parse_catalog, Catalog, CatalogEntry, CatalogFetch, CatalogSource};
pub use compat::{compatible_releases, declared_core_versions, CompatibleReleases};
pub use pypi::{MemoryIndex, ProjectIndex, ProjectInfo, PypiClient, PypiProject, ReleaseFile};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Transport level failure talking to the index or the catalog server.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} answered with HTTP {status}")]
    Http { url: String, status: u16 },

    /// The body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A local catalog file could not be read.
    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A local catalog file is not valid JSON.
    #[error("Failed to parse {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
