//! Catalogs read from THREDDS catalog files on disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thredds_types::thredds::{CATALOG, THREDDS_NS};
use thredds_types::{CatalogError, Document, Result};
use tracing::debug;

use crate::catalog::{parse_buffer, write_buffer, Catalog, CatalogSource};
use crate::transform::DocumentTransform;

#[derive(Debug, Default)]
struct Buffers {
    raw: Option<Vec<u8>>,
    processed: Option<Vec<u8>>,
    /// File modification time seen when the buffers were built.
    file_mtime: Option<SystemTime>,
}

/// A catalog backed by `path_prefix/file_name`.
///
/// With the memory cache on, the raw and processed documents are held in
/// memory and the file is only consulted to detect changes. With it off,
/// every access reads (and transforms) the file again.
pub struct StaticFileCatalog {
    key: String,
    name: String,
    path_prefix: PathBuf,
    url_prefix: String,
    file_name: String,
    use_memory_cache: bool,
    ingest: Arc<dyn DocumentTransform>,
    buffers: RwLock<Buffers>,
}

impl StaticFileCatalog {
    /// Read and validate the catalog file. The catalog key is
    /// `url_prefix + file_name`.
    pub fn new(
        path_prefix: impl Into<PathBuf>,
        url_prefix: &str,
        file_name: &str,
        use_memory_cache: bool,
        ingest: Arc<dyn DocumentTransform>,
    ) -> Result<Self> {
        let path_prefix = path_prefix.into();
        let key = format!("{}{}", url_prefix, file_name);
        let path = path_prefix.join(file_name);

        let file_mtime = check_file(&path)?;
        let (raw, doc) = read_catalog(&path)?;
        let name = catalog_name(&doc, &path)?;

        let mut buffers = Buffers {
            file_mtime: Some(file_mtime),
            ..Buffers::default()
        };
        if use_memory_cache {
            let processed = apply_ingest(ingest.as_ref(), &key, &doc)?;
            buffers.raw = Some(raw);
            buffers.processed = Some(processed.to_bytes());
        }
        debug!("static catalog '{}' read from {}", key, path.display());

        Ok(Self {
            key,
            name,
            path_prefix,
            url_prefix: url_prefix.to_string(),
            file_name: file_name.to_string(),
            use_memory_cache,
            ingest,
            buffers: RwLock::new(buffers),
        })
    }

    pub fn file_path(&self) -> PathBuf {
        self.path_prefix.join(&self.file_name)
    }

    pub fn path_prefix(&self) -> &Path {
        &self.path_prefix
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn read_processed(&self) -> Result<Vec<u8>> {
        if let Some(buf) = &self.buffers.read().processed {
            return Ok(buf.clone());
        }
        let (_, doc) = read_catalog(&self.file_path())?;
        Ok(apply_ingest(self.ingest.as_ref(), &self.key, &doc)?.to_bytes())
    }

    fn read_raw(&self) -> Result<Vec<u8>> {
        if let Some(buf) = &self.buffers.read().raw {
            return Ok(buf.clone());
        }
        read_catalog(&self.file_path()).map(|(raw, _)| raw)
    }
}

impl Catalog for StaticFileCatalog {
    fn catalog_key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> CatalogSource {
        CatalogSource::StaticFile {
            path_prefix: self.path_prefix.clone(),
            url_prefix: self.url_prefix.clone(),
            file_name: self.file_name.clone(),
            use_memory_cache: self.use_memory_cache,
        }
    }

    fn needs_refresh(&self) -> bool {
        let seen = self.buffers.read().file_mtime;
        match fs::metadata(self.file_path()).and_then(|m| m.modified()) {
            Ok(current) => seen.map_or(true, |seen| current > seen),
            Err(_) => true,
        }
    }

    fn raw_document(&self) -> Result<Document> {
        parse_buffer(&self.key, &self.read_raw()?)
    }

    fn processed_document(&self) -> Result<Document> {
        parse_buffer(&self.key, &self.read_processed()?)
    }

    fn write_processed_xml(&self, sink: &mut dyn Write) -> Result<()> {
        if let Some(buf) = &self.buffers.read().processed {
            return write_buffer(&self.key, sink, buf);
        }
        write_buffer(&self.key, sink, &self.read_processed()?)
    }

    fn write_raw_xml(&self, sink: &mut dyn Write) -> Result<()> {
        if let Some(buf) = &self.buffers.read().raw {
            return write_buffer(&self.key, sink, buf);
        }
        write_buffer(&self.key, sink, &self.read_raw()?)
    }

    fn reload(&self) -> Result<()> {
        let path = self.file_path();
        let file_mtime = check_file(&path)?;
        let (raw, doc) = read_catalog(&path)?;
        catalog_name(&doc, &path)?;
        let processed = if self.use_memory_cache {
            Some(apply_ingest(self.ingest.as_ref(), &self.key, &doc)?.to_bytes())
        } else {
            None
        };

        let mut buffers = self.buffers.write();
        buffers.file_mtime = Some(file_mtime);
        if self.use_memory_cache {
            buffers.raw = Some(raw);
            buffers.processed = processed;
        }
        Ok(())
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        fs::metadata(self.file_path())
            .and_then(|m| m.modified())
            .ok()
            .or(self.buffers.read().file_mtime)
            .map(DateTime::<Utc>::from)
    }

    fn uses_memory_cache(&self) -> bool {
        self.use_memory_cache
    }

    fn destroy(&self) {
        let mut buffers = self.buffers.write();
        buffers.raw = None;
        buffers.processed = None;
    }
}

fn check_file(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path).map_err(|e| {
        CatalogError::config(
            path.display().to_string(),
            format!("catalog file is not accessible: {}", e),
        )
    })?;
    if !meta.is_file() {
        return Err(CatalogError::config(
            path.display().to_string(),
            "catalog path is not a regular file",
        ));
    }
    meta.modified().map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_catalog(path: &Path) -> Result<(Vec<u8>, Document)> {
    let raw = fs::read(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = Document::from_bytes(&raw).map_err(|e| CatalogError::xml(path.display().to_string(), e))?;
    Ok((raw, doc))
}

fn catalog_name(doc: &Document, path: &Path) -> Result<String> {
    if !doc.root.is(THREDDS_NS, CATALOG) {
        return Err(CatalogError::config(
            path.display().to_string(),
            format!("root element is <{}>, not a THREDDS <catalog>", doc.root.name),
        ));
    }
    doc.root.attr("name").map(str::to_string).ok_or_else(|| {
        CatalogError::config(
            path.display().to_string(),
            "<catalog> is missing its name attribute",
        )
    })
}

fn apply_ingest(ingest: &dyn DocumentTransform, key: &str, doc: &Document) -> Result<Document> {
    ingest
        .transform(doc)
        .map_err(|e| CatalogError::upstream(key, format!("catalog ingest transform failed: {:#}", e)))
}
