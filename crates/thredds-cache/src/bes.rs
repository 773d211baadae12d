//! The BES catalog capability and a directory-backed implementation.
//!
//! A BES `showCatalog` response looks like:
//!
//! ```xml
//! <response xmlns="http://xml.opendap.org/ns/bes/1.0#">
//!   <showCatalog>
//!     <dataset name="/data" size="4096" lastModified="2024-05-01T10:00:00" node="true" count="2">
//!       <dataset name="sst" size="4096" lastModified="..." node="true" count="12"/>
//!       <dataset name="a.nc" size="1024" lastModified="..." node="false">
//!         <serviceRef>dap</serviceRef>
//!       </dataset>
//!     </dataset>
//!   </showCatalog>
//! </response>
//! ```
//!
//! Failures come back as a `BESError` document instead.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use thredds_types::thredds::BES_NS;
use thredds_types::{Document, Element};

use crate::services::DAP_SERVICE_ID;

/// Outcome of a BES catalog request.
#[derive(Debug, Clone)]
pub enum BesReply {
    /// A `showCatalog` response.
    Catalog(Document),
    /// A `BESError` response. Not-found conditions are reported this way.
    Error(Document),
}

impl BesReply {
    pub fn is_error(&self) -> bool {
        matches!(self, BesReply::Error(_))
    }

    pub fn document(&self) -> &Document {
        match self {
            BesReply::Catalog(doc) | BesReply::Error(doc) => doc,
        }
    }
}

/// Source of BES directory listings.
///
/// `Err` is reserved for transport-level failures; ordinary BES errors
/// (missing resource, permission denied) are returned as [`BesReply::Error`].
pub trait BesCatalogProvider: Send + Sync {
    fn get_bes_catalog(&self, resource_id: &str) -> Result<BesReply>;
}

/// Build a `BESError` response document.
pub fn bes_error_document(error_type: u32, message: &str) -> Document {
    let error = bes("BESError")
        .with_child(bes("Type").with_text(error_type.to_string()))
        .with_child(bes("Message").with_text(message))
        .with_child(bes("Administrator").with_text("support@localhost"));
    Document::new(bes("response").with_child(error))
}

/// The message text of a `BESError` document, if it is one.
pub fn bes_error_message(doc: &Document) -> Option<String> {
    let error = if doc.root.is(BES_NS, "BESError") {
        Some(&doc.root)
    } else {
        doc.root.descendants().find(|e| e.is(BES_NS, "BESError"))
    }?;
    error.child(BES_NS, "Message").map(|m| m.text_trim())
}

fn bes(name: &str) -> Element {
    Element::new_ns(BES_NS, name)
}

/// BES catalog over a local directory tree.
///
/// Resource ids are interpreted relative to `root`. Files whose names match
/// the data pattern are advertised with a `dap` service reference.
#[derive(Debug)]
pub struct DirectoryBesProvider {
    root: PathBuf,
    data_pattern: Regex,
    include_hidden: bool,
}

const DEFAULT_DATA_PATTERN: &str = r"(?i)\.(nc|nc4|h5|hdf|hdf5|he5|cdf|dods)(\.gz|\.bz2)?$";

/// BES error type for "resource not found".
const BES_NOT_FOUND_ERROR: u32 = 5;
/// BES error type for "forbidden".
const BES_FORBIDDEN_ERROR: u32 = 4;

impl DirectoryBesProvider {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(anyhow!("BES root {} is not a directory", root.display()));
        }
        Ok(Self {
            root,
            data_pattern: Regex::new(DEFAULT_DATA_PATTERN)?,
            include_hidden: false,
        })
    }

    /// Replace the pattern deciding which files are DAP datasets.
    pub fn with_data_pattern(mut self, pattern: &str) -> Result<Self> {
        self.data_pattern =
            Regex::new(pattern).map_err(|e| anyhow!("Invalid data pattern '{}': {}", pattern, e))?;
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a resource id onto the filesystem, refusing anything that escapes `root`.
    fn resolve(&self, resource_id: &str) -> Option<PathBuf> {
        let relative = Path::new(resource_id.trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }

    fn dataset_element(&self, name: &str, path: &Path) -> Result<Element> {
        let meta = std::fs::metadata(path)
            .map_err(|e| anyhow!("Failed to stat {}: {}", path.display(), e))?;
        let is_node = meta.is_dir();
        let mut el = bes("dataset")
            .with_attr("name", name)
            .with_attr("size", meta.len().to_string())
            .with_attr("lastModified", format_time(meta.modified().ok()))
            .with_attr("node", is_node.to_string());
        if is_node {
            el.set_attr("count", self.list(path)?.len().to_string());
        } else if self.data_pattern.is_match(name) {
            el.push(bes("serviceRef").with_text(DAP_SERVICE_ID));
        }
        Ok(el)
    }

    fn list(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| anyhow!("Failed to list {}: {}", dir.display(), e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| anyhow!("Failed to list {}: {}", dir.display(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.include_hidden && name.starts_with('.') {
                continue;
            }
            out.push((name, entry.path()));
        }
        out.sort();
        Ok(out)
    }
}

impl BesCatalogProvider for DirectoryBesProvider {
    fn get_bes_catalog(&self, resource_id: &str) -> Result<BesReply> {
        let Some(path) = self.resolve(resource_id) else {
            return Ok(BesReply::Error(bes_error_document(
                BES_FORBIDDEN_ERROR,
                &format!("Resource id '{}' is outside the BES root", resource_id),
            )));
        };
        if !path.exists() {
            return Ok(BesReply::Error(bes_error_document(
                BES_NOT_FOUND_ERROR,
                &format!("Cannot find resource '{}'", resource_id),
            )));
        }

        let display_name = if resource_id.is_empty() { "/" } else { resource_id };
        let mut top = self.dataset_element(display_name, &path)?;
        if path.is_dir() {
            for (name, child) in self.list(&path)? {
                top.push(self.dataset_element(&name, &child)?);
            }
        }
        let doc = Document::new(bes("response").with_child(bes("showCatalog").with_child(top)));
        Ok(BesReply::Catalog(doc))
    }
}

fn format_time(time: Option<SystemTime>) -> String {
    time.map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}
