//! The catalog abstraction shared by file-backed and BES-backed catalogs.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thredds_types::{CatalogError, Document, Result};

use crate::bes::BesCatalogProvider;
use crate::inherited::InheritedMetadataRegistry;
use crate::services::ServiceRegistry;
use crate::transform::{BesToThreddsTransform, DocumentTransform, IdentityTransform};

/// Where a catalog's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// A THREDDS catalog file at `path_prefix/file_name`, served under
    /// `url_prefix + file_name`.
    StaticFile {
        path_prefix: PathBuf,
        url_prefix: String,
        file_name: String,
        use_memory_cache: bool,
    },
    /// A listing of a BES resource.
    DynamicBes { resource_id: String },
}

/// One materialized catalog.
///
/// Buffers are guarded by a per-catalog lock: readers see either the
/// previous or the current document, never a partial one.
pub trait Catalog: Send + Sync {
    fn catalog_key(&self) -> &str;

    fn name(&self) -> &str;

    fn source(&self) -> CatalogSource;

    /// True when the catalog's source changed since it was built.
    fn needs_refresh(&self) -> bool;

    /// Source document before the ingest transform.
    fn raw_document(&self) -> Result<Document>;

    /// Client-facing document.
    fn processed_document(&self) -> Result<Document>;

    fn write_processed_xml(&self, sink: &mut dyn Write) -> Result<()>;

    fn write_raw_xml(&self, sink: &mut dyn Write) -> Result<()>;

    /// Re-read the source and rebuild the buffers in place. On failure the
    /// previous buffers stay in service.
    fn reload(&self) -> Result<()>;

    fn last_modified(&self) -> Option<DateTime<Utc>>;

    fn uses_memory_cache(&self) -> bool;

    /// SHA-256 (hex) of the processed document.
    fn content_digest(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_processed_xml(&mut buf)?;
        Ok(digest(&buf))
    }

    /// Release cached buffers.
    fn destroy(&self);
}

impl std::fmt::Debug for dyn Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("key", &self.catalog_key())
            .field("source", &self.source())
            .finish()
    }
}

/// Collaborators shared by every catalog built by one manager.
#[derive(Clone)]
pub struct CatalogContext {
    pub bes: Arc<dyn BesCatalogProvider>,
    /// Applied to static catalog files to produce their processed document.
    pub catalog_ingest: Arc<dyn DocumentTransform>,
    /// Turns BES `showCatalog` responses into THREDDS catalogs.
    pub bes_ingest: Arc<dyn DocumentTransform>,
    pub services: Arc<ServiceRegistry>,
    pub inherited: Arc<InheritedMetadataRegistry>,
    /// Advertise the file service for BES datasets too.
    pub allow_direct_data_source_access: bool,
}

impl CatalogContext {
    /// Context with identity/native transforms and empty registries.
    pub fn new(bes: Arc<dyn BesCatalogProvider>) -> Self {
        Self {
            bes,
            catalog_ingest: Arc::new(IdentityTransform),
            bes_ingest: Arc::new(BesToThreddsTransform),
            services: Arc::new(ServiceRegistry::new()),
            inherited: Arc::new(InheritedMetadataRegistry::new()),
            allow_direct_data_source_access: false,
        }
    }

    pub fn with_catalog_ingest(mut self, transform: Arc<dyn DocumentTransform>) -> Self {
        self.catalog_ingest = transform;
        self
    }

    pub fn with_bes_ingest(mut self, transform: Arc<dyn DocumentTransform>) -> Self {
        self.bes_ingest = transform;
        self
    }

    pub fn with_services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = services;
        self
    }

    pub fn with_inherited(mut self, inherited: Arc<InheritedMetadataRegistry>) -> Self {
        self.inherited = inherited;
        self
    }

    pub fn with_direct_data_source_access(mut self, allow: bool) -> Self {
        self.allow_direct_data_source_access = allow;
        self
    }
}

pub(crate) fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn parse_buffer(catalog_key: &str, buffer: &[u8]) -> Result<Document> {
    Document::from_bytes(buffer).map_err(|e| CatalogError::xml(catalog_key, e))
}

pub(crate) fn write_buffer(catalog_key: &str, sink: &mut dyn Write, buffer: &[u8]) -> Result<()> {
    sink.write_all(buffer)
        .map_err(|e| CatalogError::upstream(catalog_key, format!("failed to write catalog: {}", e)))
}
