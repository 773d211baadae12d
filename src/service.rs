//! The catalog service: one explicitly constructed [`CatalogManager`] with
//! its collaborators, owned by the hosting server between `init` and
//! `shutdown`.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use thredds_cache::{
    Catalog, CatalogContext, CatalogManager, DirectoryBesProvider, ServiceRegistry,
};
use thredds_types::thredds::CATALOG_FILE;
use tracing::info;

use crate::config::CatalogServiceConfig;

pub struct CatalogService {
    config: CatalogServiceConfig,
    prefix: String,
    root_key: String,
    manager: CatalogManager,
}

impl CatalogService {
    /// Build the service with the directory BES provider over
    /// `config.bes_root` and register the root catalog tree.
    pub fn init(config: CatalogServiceConfig) -> Result<Self> {
        config.validate()?;
        let bes = DirectoryBesProvider::new(&config.bes_root)
            .with_context(|| format!("Failed to open BES root {}", config.bes_root.display()))?;
        let services = Arc::new(ServiceRegistry::new());
        for service in &config.services {
            services.register(Arc::new(service.clone()));
        }
        let ctx = CatalogContext::new(Arc::new(bes))
            .with_services(services)
            .with_direct_data_source_access(config.allow_direct_data_source_access);
        Self::with_context(config, ctx)
    }

    /// Build the service around caller-supplied collaborators.
    pub fn with_context(config: CatalogServiceConfig, ctx: CatalogContext) -> Result<Self> {
        let prefix = config.normalized_prefix();
        let manager = CatalogManager::new(ctx);
        let root_key = manager
            .add_catalog(
                &config.content_path,
                &prefix,
                &config.root_catalog,
                config.use_memory_cache,
            )
            .with_context(|| {
                format!(
                    "Failed to load root catalog {}",
                    config.root_catalog_path().display()
                )
            })?;
        info!(
            "catalog service ready: {} catalog(s) under '{}'",
            manager.keys().len(),
            prefix
        );
        Ok(Self {
            config,
            prefix,
            root_key,
            manager,
        })
    }

    /// Release every catalog. The service answers nothing afterwards.
    pub fn shutdown(&self) {
        self.manager.destroy();
    }

    pub fn config(&self) -> &CatalogServiceConfig {
        &self.config
    }

    pub fn manager(&self) -> &CatalogManager {
        &self.manager
    }

    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    /// Map a request path to a catalog key.
    ///
    /// Leading slashes and the THREDDS prefix are stripped; the bare prefix
    /// names the root catalog, a directory names its `catalog.xml`, and an
    /// `.html` request names the `.xml` catalog. Paths outside the prefix
    /// map to nothing.
    pub fn catalog_key_from_relative_url(&self, relative_url: &str) -> Option<String> {
        let path = relative_url.trim_start_matches('/');
        let bare_prefix = self.prefix.trim_end_matches('/');
        if path.is_empty() || path == bare_prefix || path == self.prefix {
            return Some(self.root_key.clone());
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;

        let mut key = format!("{}{}", self.prefix, rest);
        if key.ends_with('/') {
            key.push_str(CATALOG_FILE);
        }
        if let Some(stem) = key.strip_suffix(".html") {
            key = format!("{}.xml", stem);
        }
        Some(key)
    }

    /// The catalog answering `relative_url`, if any.
    pub fn lookup(&self, relative_url: &str) -> Result<Option<Arc<dyn Catalog>>> {
        let Some(key) = self.catalog_key_from_relative_url(relative_url) else {
            return Ok(None);
        };
        self.manager
            .get_catalog(&key)
            .with_context(|| format!("Failed to build catalog '{}'", key))
    }

    /// Write the processed (or raw) document for `relative_url` to `sink`.
    /// Returns false when there is no such catalog.
    pub fn write_catalog(&self, relative_url: &str, raw: bool, sink: &mut dyn Write) -> Result<bool> {
        let Some(catalog) = self.lookup(relative_url)? else {
            return Ok(false);
        };
        if raw {
            catalog.write_raw_xml(sink)?;
        } else {
            catalog.write_processed_xml(sink)?;
        }
        Ok(true)
    }
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService")
            .field("root_key", &self.root_key)
            .field("manager", &self.manager)
            .finish()
    }
}
