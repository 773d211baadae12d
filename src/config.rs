//! Catalog service configuration.
//!
//! Loaded from a JSON file (every field optional), then overridden by
//! `HYRAX_THREDDS_*` environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `HYRAX_THREDDS_CONTENT_PATH` | `content_path` |
//! | `HYRAX_THREDDS_PREFIX` | `thredds_prefix` |
//! | `HYRAX_THREDDS_USE_MEMORY_CACHE` | `use_memory_cache` |
//! | `HYRAX_THREDDS_ALLOW_DIRECT_DATA_SOURCE_ACCESS` | `allow_direct_data_source_access` |
//! | `HYRAX_THREDDS_BES_ROOT` | `bes_root` |

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use thredds_cache::SimpleWebService;
use thredds_types::env_utils::{env_bool, env_string};

const ENV_PREFIX: &str = "HYRAX_THREDDS_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogServiceConfig {
    /// Directory holding the root catalog and the catalogs it references.
    pub content_path: PathBuf,
    /// Root catalog file name inside `content_path`.
    pub root_catalog: String,
    /// URL prefix of every catalog key (e.g. `thredds/`).
    pub thredds_prefix: String,
    pub use_memory_cache: bool,
    /// Offer the file service for BES datasets as well as DAP.
    pub allow_direct_data_source_access: bool,
    /// Filesystem root served by the directory BES provider.
    pub bes_root: PathBuf,
    /// Web services advertised in dynamic catalogs, in order.
    pub services: Vec<SimpleWebService>,
}

impl Default for CatalogServiceConfig {
    fn default() -> Self {
        Self {
            content_path: PathBuf::from("."),
            root_catalog: "catalog.xml".to_string(),
            thredds_prefix: "thredds/".to_string(),
            use_memory_cache: true,
            allow_direct_data_source_access: false,
            bes_root: PathBuf::from("."),
            services: vec![
                SimpleWebService::dap("/opendap/"),
                SimpleWebService::file("/opendap/"),
            ],
        }
    }
}

impl CatalogServiceConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Config file (or defaults), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        let var = |name: &str| format!("{}{}", ENV_PREFIX, name);
        if let Some(path) = env_string(&var("CONTENT_PATH")) {
            self.content_path = PathBuf::from(path);
        }
        if let Some(prefix) = env_string(&var("PREFIX")) {
            self.thredds_prefix = prefix;
        }
        if let Some(cache) = env_bool(&var("USE_MEMORY_CACHE")) {
            self.use_memory_cache = cache;
        }
        if let Some(allow) = env_bool(&var("ALLOW_DIRECT_DATA_SOURCE_ACCESS")) {
            self.allow_direct_data_source_access = allow;
        }
        if let Some(root) = env_string(&var("BES_ROOT")) {
            self.bes_root = PathBuf::from(root);
        }
        self
    }

    /// The prefix in key form: no leading slash, one trailing slash (or empty).
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.thredds_prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        }
    }

    pub fn root_catalog_path(&self) -> PathBuf {
        self.content_path.join(&self.root_catalog)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.content_path.is_dir() {
            return Err(anyhow!(
                "content_path {} is not a directory",
                self.content_path.display()
            ));
        }
        if !self.root_catalog_path().is_file() {
            return Err(anyhow!(
                "root catalog {} does not exist",
                self.root_catalog_path().display()
            ));
        }
        if !self.bes_root.is_dir() {
            return Err(anyhow!("bes_root {} is not a directory", self.bes_root.display()));
        }
        if self.root_catalog.contains('/') {
            return Err(anyhow!("root_catalog must be a file name, got '{}'", self.root_catalog));
        }
        Ok(())
    }
}
