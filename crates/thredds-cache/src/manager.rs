//! The catalog registry: every catalog reachable from the configured roots,
//! the parent/child graph between them and the `datasetScan`s they declare.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thredds_types::paths::{basename, dirname, is_remote, normalize_path};
use thredds_types::thredds::{CATALOG_REF, DATASET_SCAN, THREDDS_NS, XLINK_NS};
use thredds_types::{CatalogError, Result};
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, CatalogContext, CatalogSource};
use crate::dataset_scan::DatasetScan;
use crate::metrics::CacheMetrics;
use crate::static_file::StaticFileCatalog;

#[derive(Default)]
struct Registry {
    catalogs: HashMap<String, Arc<dyn Catalog>>,
    /// parent key -> child keys, in discovery order
    children: HashMap<String, Vec<String>>,
    /// In registration order; owned by `DatasetScan::owner_key`.
    scans: Vec<Arc<DatasetScan>>,
}

/// Owns every registered catalog.
///
/// All graph mutation (add, purge, the purge-and-rebuild of a stale catalog)
/// happens under one lock. Building a dynamic catalog does not hold it.
pub struct CatalogManager {
    ctx: CatalogContext,
    registry: Mutex<Registry>,
    metrics: CacheMetrics,
}

impl CatalogManager {
    pub fn new(ctx: CatalogContext) -> Self {
        Self {
            ctx,
            registry: Mutex::new(Registry::default()),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn context(&self) -> &CatalogContext {
        &self.ctx
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Register the catalog file `path_prefix/file_name` under
    /// `url_prefix + file_name`, together with every local catalog it
    /// references. Returns the new key.
    ///
    /// Adding a key that is already registered only logs a warning.
    pub fn add_catalog(
        &self,
        path_prefix: &Path,
        url_prefix: &str,
        file_name: &str,
        use_memory_cache: bool,
    ) -> Result<String> {
        let mut registry = self.registry.lock();
        self.add_static(
            &mut registry,
            path_prefix,
            url_prefix,
            file_name,
            use_memory_cache,
            &mut Vec::new(),
        )
    }

    fn add_static(
        &self,
        registry: &mut Registry,
        path_prefix: &Path,
        url_prefix: &str,
        file_name: &str,
        use_memory_cache: bool,
        chain: &mut Vec<String>,
    ) -> Result<String> {
        let key = format!("{}{}", url_prefix, file_name);
        if registry.catalogs.contains_key(&key) {
            warn!("catalog '{}' is already registered", key);
            return Ok(key);
        }
        if registry.children.contains_key(&key) {
            let err = CatalogError::invalid_state(format!(
                "catalog '{}' has recorded children but is not registered",
                key
            ));
            error!("{}", err);
            return Err(err);
        }

        let catalog = StaticFileCatalog::new(
            path_prefix,
            url_prefix,
            file_name,
            use_memory_cache,
            self.ctx.catalog_ingest.clone(),
        )?;
        let raw = catalog.raw_document()?;

        chain.push(key.clone());
        let mut children = Vec::new();
        for catalog_ref in raw.root.descendants().filter(|e| e.is(THREDDS_NS, CATALOG_REF)) {
            let Some(href) = catalog_ref.attr_ns(XLINK_NS, "href") else {
                warn!("catalog '{}': catalogRef without an xlink:href", key);
                continue;
            };
            if is_remote(href) {
                info!("catalog '{}': leaving remote catalogRef '{}' unresolved", key, href);
                continue;
            }
            if href.starts_with('/') {
                info!("catalog '{}': catalogRef '{}' points at a catalog service, not a file", key, href);
                continue;
            }

            let child_url_prefix = normalize_path(&format!("{}{}", url_prefix, dirname(href)));
            let child_path_prefix = path_prefix.join(dirname(href));
            let child_file = basename(href);
            let child_key = format!("{}{}", child_url_prefix, child_file);
            // the chain only covers this add; a refresh starts with an empty one
            if chain.contains(&child_key) || reaches(registry, &child_key, &key) {
                let err = CatalogError::CycleDetected {
                    catalog_key: child_key,
                    chain: chain.clone(),
                };
                error!("catalog '{}': {}", key, err);
                continue;
            }

            match self.add_static(
                registry,
                &child_path_prefix,
                &child_url_prefix,
                child_file,
                use_memory_cache,
                chain,
            ) {
                Ok(child_key) => children.push(child_key),
                Err(e) => error!("catalog '{}': failed to add child catalog '{}': {}", key, href, e),
            }
        }
        chain.pop();

        for scan in raw.root.descendants().filter(|e| e.is(THREDDS_NS, DATASET_SCAN)) {
            match DatasetScan::new(&key, url_prefix, scan, &raw, self.ctx.clone()) {
                Ok(scan) => {
                    debug!("catalog '{}': datasetScan at '{}'", key, scan.url_prefix());
                    registry.scans.push(Arc::new(scan));
                }
                Err(e) => warn!("catalog '{}': skipping datasetScan: {}", key, e),
            }
        }

        self.ctx.inherited.ingest(&key, &raw);
        if !children.is_empty() {
            registry.children.insert(key.clone(), children);
        }
        registry.catalogs.insert(key.clone(), Arc::new(catalog));
        info!("catalog '{}' registered", key);
        Ok(key)
    }

    /// The catalog for `key`.
    ///
    /// A stale static catalog is purged and rebuilt; if the rebuild fails the
    /// subtree stays purged and `Ok(None)` is returned. A key under a
    /// registered `datasetScan` is built from the BES and registered as a
    /// child of the scan's owner.
    pub fn get_catalog(&self, key: &str) -> Result<Option<Arc<dyn Catalog>>> {
        let mut registry = self.registry.lock();
        if let Some(catalog) = registry.catalogs.get(key).cloned() {
            if !catalog.needs_refresh() {
                self.metrics.record_hit();
                return Ok(Some(catalog));
            }
            let CatalogSource::StaticFile {
                path_prefix,
                url_prefix,
                file_name,
                use_memory_cache,
            } = catalog.source()
            else {
                self.metrics.record_hit();
                return Ok(Some(catalog));
            };

            info!("catalog '{}' changed on disk, rebuilding", key);
            self.purge_locked(&mut registry, key, &mut HashSet::new());
            return match self.add_static(
                &mut registry,
                &path_prefix,
                &url_prefix,
                &file_name,
                use_memory_cache,
                &mut Vec::new(),
            ) {
                Ok(_) => {
                    self.metrics.record_refresh();
                    Ok(registry.catalogs.get(key).cloned())
                }
                Err(e) => {
                    warn!("catalog '{}' could not be rebuilt and stays purged: {}", key, e);
                    self.metrics.record_refresh_failure();
                    Ok(None)
                }
            };
        }

        let scan = registry.scans.iter().find(|s| s.matches(key)).cloned();
        drop(registry);
        let Some(scan) = scan else {
            debug!("no catalog for '{}'", key);
            self.metrics.record_miss();
            return Ok(None);
        };

        let catalog: Arc<dyn Catalog> = match scan.get_catalog(key) {
            Ok(Some(catalog)) => Arc::new(catalog),
            Ok(None) => {
                self.metrics.record_miss();
                return Ok(None);
            }
            Err(e) => {
                warn!("catalog '{}' could not be built: {}", key, e);
                self.metrics.record_dynamic_load_failure();
                return Err(e);
            }
        };
        self.metrics.record_dynamic_load();

        let mut registry = self.registry.lock();
        if let Some(existing) = registry.catalogs.get(key) {
            // built concurrently by another request
            return Ok(Some(existing.clone()));
        }
        let owner = scan.owner_key().to_string();
        if registry.catalogs.contains_key(&owner) {
            registry.catalogs.insert(key.to_string(), catalog.clone());
            registry.children.entry(owner).or_default().push(key.to_string());
        } else {
            debug!("owner '{}' of '{}' was purged; not caching", owner, key);
        }
        Ok(Some(catalog))
    }

    /// Remove `key` and, depth first, every catalog recorded beneath it.
    /// Returns false when `key` was not registered.
    pub fn purge_catalog(&self, key: &str) -> bool {
        let mut registry = self.registry.lock();
        let existed = registry.catalogs.contains_key(key);
        self.purge_locked(&mut registry, key, &mut HashSet::new());
        existed
    }

    fn purge_locked(&self, registry: &mut Registry, key: &str, visited: &mut HashSet<String>) {
        if !visited.insert(key.to_string()) {
            return;
        }
        if registry.catalogs.remove(key).is_some() {
            self.metrics.record_purge();
            debug!("catalog '{}' purged", key);
        }
        if let Some(children) = registry.children.remove(key) {
            for child in children {
                self.purge_locked(registry, &child, visited);
            }
        }
        registry.scans.retain(|s| s.owner_key() != key);
        self.ctx.inherited.purge(key);
    }

    /// Re-run the load of `key` in place. Returns false for unknown keys.
    /// A failed reload keeps the previous content.
    pub fn reload_catalog(&self, key: &str) -> Result<bool> {
        let Some(catalog) = self.registry.lock().catalogs.get(key).cloned() else {
            return Ok(false);
        };
        let dynamic = matches!(catalog.source(), CatalogSource::DynamicBes { .. });
        match catalog.reload() {
            Ok(()) => {
                if dynamic {
                    self.metrics.record_dynamic_load();
                } else {
                    self.metrics.record_refresh();
                }
                Ok(true)
            }
            Err(e) => {
                if dynamic {
                    self.metrics.record_dynamic_load_failure();
                } else {
                    self.metrics.record_refresh_failure();
                }
                Err(e)
            }
        }
    }

    /// Modification time of `key`'s content, or now for unknown keys.
    pub fn last_modified(&self, key: &str) -> DateTime<Utc> {
        self.registry
            .lock()
            .catalogs
            .get(key)
            .and_then(|c| c.last_modified())
            .unwrap_or_else(Utc::now)
    }

    pub fn has_inherited_metadata(&self, path: &str) -> bool {
        self.ctx.inherited.has_inherited_metadata(path)
    }

    /// Release every catalog and forget all registrations.
    pub fn destroy(&self) {
        let mut registry = self.registry.lock();
        for (key, catalog) in registry.catalogs.drain() {
            catalog.destroy();
            self.ctx.inherited.purge(&key);
        }
        registry.children.clear();
        registry.scans.clear();
        info!("catalog manager destroyed");
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registry.lock().catalogs.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn children_of(&self, key: &str) -> Vec<String> {
        self.registry
            .lock()
            .children
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registry.lock().catalogs.contains_key(key)
    }

    pub fn scan_count(&self) -> usize {
        self.registry.lock().scans.len()
    }

    /// Indented rendering of the catalog graph, roots first.
    pub fn tree(&self) -> String {
        let registry = self.registry.lock();
        let child_keys: HashSet<&str> = registry
            .children
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        let mut roots: Vec<&str> = registry
            .catalogs
            .keys()
            .map(String::as_str)
            .filter(|k| !child_keys.contains(k))
            .collect();
        roots.sort_unstable();

        let mut out = String::new();
        let mut visited = HashSet::new();
        for root in roots {
            render(&registry, root, 0, &mut visited, &mut out);
        }
        for scan in &registry.scans {
            let _ = writeln!(
                out,
                "scan {} -> {} (owner {})",
                scan.url_prefix(),
                scan.location(),
                scan.owner_key()
            );
        }
        out
    }
}

/// True when `to` is `from` or lies beneath it in the recorded child edges.
fn reaches(registry: &Registry, from: &str, to: &str) -> bool {
    let mut stack = vec![from];
    let mut visited = HashSet::new();
    while let Some(key) = stack.pop() {
        if key == to {
            return true;
        }
        if !visited.insert(key) {
            continue;
        }
        if let Some(children) = registry.children.get(key) {
            stack.extend(children.iter().map(String::as_str));
        }
    }
    false
}

fn render<'a>(registry: &'a Registry, key: &'a str, depth: usize, visited: &mut HashSet<&'a str>, out: &mut String) {
    let kind = match registry.catalogs.get(key).map(|c| c.source()) {
        Some(CatalogSource::StaticFile { .. }) => "static",
        Some(CatalogSource::DynamicBes { .. }) => "dynamic",
        None => "missing",
    };
    let _ = writeln!(out, "{}{} [{}]", "  ".repeat(depth), key, kind);
    if !visited.insert(key) {
        return;
    }
    for child in registry.children.get(key).into_iter().flatten() {
        render(registry, child, depth + 1, visited, out);
    }
}

impl std::fmt::Debug for CatalogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogManager")
            .field("catalogs", &self.keys().len())
            .field("scans", &self.scan_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bes::DirectoryBesProvider;
    use std::fs;
    use tempfile::TempDir;

    const NS: &str = "http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0";

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            path,
            format!(
                r#"<catalog xmlns="{}" xmlns:xlink="http://www.w3.org/1999/xlink" name="{}">{}</catalog>"#,
                NS, rel, body
            ),
        )
        .unwrap();
    }

    fn manager(dir: &Path) -> CatalogManager {
        CatalogManager::new(CatalogContext::new(Arc::new(
            DirectoryBesProvider::new(dir).unwrap(),
        )))
    }

    #[test]
    fn test_unresolvable_refs_are_left_alone() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "catalog.xml",
            r#"<catalogRef xlink:href="http://example.com/catalog.xml" xlink:title="remote"/>
               <catalogRef xlink:href="/opendap/catalog.xml" xlink:title="service"/>"#,
        );
        let m = manager(dir.path());
        m.add_catalog(dir.path(), "", "catalog.xml", true).unwrap();
        assert_eq!(m.keys(), vec!["catalog.xml"]);
        assert!(m.children_of("catalog.xml").is_empty());
    }

    #[test]
    fn test_re_adding_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "catalog.xml", "");
        let m = manager(dir.path());
        let first = m.add_catalog(dir.path(), "", "catalog.xml", true).unwrap();
        let second = m.add_catalog(dir.path(), "", "catalog.xml", true).unwrap();
        assert_eq!(first, second);
        assert_eq!(m.keys().len(), 1);
    }

    #[test]
    fn test_broken_child_is_dropped() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "catalog.xml",
            r#"<catalogRef xlink:href="missing/catalog.xml" xlink:title="m"/>"#,
        );
        let m = manager(dir.path());
        m.add_catalog(dir.path(), "", "catalog.xml", true).unwrap();
        assert_eq!(m.keys(), vec!["catalog.xml"]);
    }

    #[test]
    fn test_unknown_key_and_last_modified() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path());
        assert!(m.get_catalog("nope.xml").unwrap().is_none());
        assert_eq!(m.metrics().snapshot().misses, 1);
        assert!(!m.reload_catalog("nope.xml").unwrap());
        let before = Utc::now();
        assert!(m.last_modified("nope.xml") >= before);
    }

    #[test]
    fn test_tree_rendering() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "catalog.xml", r#"<catalogRef xlink:href="a/catalog.xml" xlink:title="a"/>"#);
        write(dir.path(), "a/catalog.xml", "");
        let m = manager(dir.path());
        m.add_catalog(dir.path(), "", "catalog.xml", true).unwrap();
        assert_eq!(m.tree(), "catalog.xml [static]\n  a/catalog.xml [static]\n");
    }
}
