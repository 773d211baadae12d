//! Catalogs built on demand from BES directory listings.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thredds_rules::{Filter, Namer, Proxy, SortedDatasets, TimeCoverageInjector};
use thredds_types::paths::{join_root_path, with_trailing_slash};
use thredds_types::thredds::{
    access_element, is_graph_element, node_name, set_node_name, BES_NS, BES_SERVICE_REF,
    CATALOG_REF, DATASET, THREDDS_NS,
};
use thredds_types::{CatalogError, Document, Element, Result};
use tracing::{debug, error, warn};

use crate::bes::{bes_error_message, BesReply};
use crate::catalog::{parse_buffer, write_buffer, Catalog, CatalogContext, CatalogSource};
use crate::services::{WebServiceHandler, DAP_SERVICE_ID, FILE_SERVICE_ID};

/// Everything a dynamic catalog needs to build itself.
#[derive(Debug, Clone)]
pub struct DynamicCatalogConfig {
    pub catalog_key: String,
    /// BES resource listed by this catalog.
    pub resource_id: String,
    /// Static metadata placed at the top of the dataset.
    pub metadata: Vec<Element>,
    pub filter: Filter,
    /// Display order of the (renamed) entries.
    pub ascending: bool,
    pub namer: Namer,
    pub time_coverage: TimeCoverageInjector,
    pub proxies: Vec<Proxy>,
    /// Catalog-specific `<service>` declarations.
    pub services: Vec<Element>,
    /// Advertise the process-wide web services.
    pub use_service_registry: bool,
}

impl DynamicCatalogConfig {
    /// A configuration with no rules: every entry is listed ascending, and
    /// the registered web services are advertised.
    pub fn new(catalog_key: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            catalog_key: catalog_key.into(),
            resource_id: resource_id.into(),
            metadata: Vec::new(),
            filter: Filter::default(),
            ascending: true,
            namer: Namer::default(),
            time_coverage: TimeCoverageInjector::disabled(),
            proxies: Vec::new(),
            services: Vec::new(),
            use_service_registry: true,
        }
    }
}

#[derive(Debug)]
struct Loaded {
    raw: Vec<u8>,
    processed: Vec<u8>,
    loaded_at: DateTime<Utc>,
}

/// A catalog listing one BES resource.
///
/// The catalog never goes stale on its own (`needs_refresh` is always
/// false); it changes only through [`Catalog::reload`].
pub struct DynamicBesCatalog {
    config: DynamicCatalogConfig,
    ctx: CatalogContext,
    /// `None` once destroyed.
    state: RwLock<Option<Loaded>>,
}

impl DynamicBesCatalog {
    /// Run the first load pass. Fails when the BES listing cannot be fetched
    /// or transformed.
    pub fn new(config: DynamicCatalogConfig, ctx: CatalogContext) -> Result<Self> {
        let catalog = Self {
            config,
            ctx,
            state: RwLock::new(None),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    pub fn config(&self) -> &DynamicCatalogConfig {
        &self.config
    }

    pub fn resource_id(&self) -> &str {
        &self.config.resource_id
    }

    fn with_state<T>(&self, f: impl FnOnce(&Loaded) -> Result<T>) -> Result<T> {
        match self.state.read().as_ref() {
            Some(loaded) => f(loaded),
            None => Err(CatalogError::Destroyed {
                catalog_key: self.config.catalog_key.clone(),
            }),
        }
    }

    /// Path used to look up inherited metadata and services: the resource
    /// as seen through the DAP service.
    fn inherited_lookup_path(&self) -> String {
        match self.ctx.services.get(DAP_SERVICE_ID) {
            Some(dap) => with_trailing_slash(&join_root_path(dap.base(), &self.config.resource_id)),
            None => with_trailing_slash(&self.config.resource_id),
        }
    }

    fn fetch(&self) -> Result<Document> {
        let resource_id = &self.config.resource_id;
        let reply = self
            .ctx
            .bes
            .get_bes_catalog(resource_id)
            .map_err(|e| CatalogError::upstream(resource_id.as_str(), format!("{:#}", e)))?;
        match reply {
            BesReply::Catalog(doc) => Ok(doc),
            BesReply::Error(doc) => {
                error!(
                    "BES showCatalog for '{}' failed:\n{}",
                    resource_id,
                    doc.to_xml_string()
                );
                let message = bes_error_message(&doc)
                    .unwrap_or_else(|| "BES returned an error document".to_string());
                Err(CatalogError::upstream(resource_id.as_str(), message))
            }
        }
    }

    /// `<service>` elements for the catalog: registered handlers, then the
    /// declared services, then inherited ones. First definition of a name wins.
    fn collect_services(&self, handlers: &[Arc<dyn WebServiceHandler>], lookup_path: &str) -> Vec<Element> {
        let registered = handlers
            .iter()
            .filter(|_| self.config.use_service_registry)
            .map(|h| h.thredds_service());
        let declared = self.config.services.iter().cloned();
        let inherited = self.ctx.inherited.get_inherited_services(lookup_path);

        let mut seen = BTreeSet::new();
        registered
            .chain(declared)
            .chain(inherited)
            .filter(|s| {
                let name = s.attr("name").unwrap_or_default();
                if seen.insert(name.to_string()) {
                    true
                } else {
                    debug!("catalog '{}': service '{}' already attached", self.config.catalog_key, name);
                    false
                }
            })
            .collect()
    }

    /// `access` elements for a dataset with the given id.
    fn access_elements(&self, handlers: &[Arc<dyn WebServiceHandler>], dataset_id: &str, is_bes: bool) -> Vec<Element> {
        let access = |h: &Arc<dyn WebServiceHandler>| {
            access_element(h.service_id(), &h.thredds_url_path(dataset_id))
        };
        if is_bes {
            handlers
                .iter()
                .filter(|h| h.service_id() != FILE_SERVICE_ID || self.ctx.allow_direct_data_source_access)
                .map(access)
                .collect()
        } else {
            handlers
                .iter()
                .filter(|h| h.service_id() == FILE_SERVICE_ID)
                .map(access)
                .collect()
        }
    }

    /// Detach the BES service references of a dataset and add its access
    /// elements. BES datasets are those referencing the DAP service.
    fn attach_access(&self, handlers: &[Arc<dyn WebServiceHandler>], dataset: &mut Element, force_bes: bool) {
        let refs = dataset.drain_elements(|c| c.is(BES_NS, BES_SERVICE_REF));
        let is_bes = force_bes || refs.iter().any(|r| r.text_trim() == DAP_SERVICE_ID);
        let id = dataset
            .attr("ID")
            .or_else(|| dataset.attr("name"))
            .unwrap_or_default()
            .to_string();
        for access in self.access_elements(handlers, &id, is_bes) {
            dataset.push(access);
        }
    }

    /// The load pass. Nothing is published unless every step succeeds.
    fn build(&self) -> Result<Loaded> {
        let cfg = &self.config;
        let key = cfg.catalog_key.as_str();

        let bes_doc = self.fetch()?;
        let mut catalog = self
            .ctx
            .bes_ingest
            .transform(&bes_doc)
            .map_err(|e| CatalogError::upstream(cfg.resource_id.as_str(), format!("BES catalog ingest failed: {:#}", e)))?
            .root;

        let handlers = self.ctx.services.handlers();
        let lookup_path = self.inherited_lookup_path();

        let services = self.collect_services(&handlers, &lookup_path);
        for (index, service) in services.into_iter().enumerate() {
            catalog.insert(index, service);
        }

        let top = catalog
            .child_mut(THREDDS_NS, DATASET)
            .ok_or_else(|| CatalogError::xml(key, "ingested catalog has no top-level dataset"))?;
        top.set_attr("name", key);

        // a scan's own inherited metadata also comes back from the registry
        let inherited: Vec<Element> = self
            .ctx
            .inherited
            .get_inherited_metadata(&lookup_path)
            .into_iter()
            .filter(|m| !cfg.metadata.contains(m))
            .collect();
        let metadata: Vec<Element> = cfg.metadata.iter().cloned().chain(inherited).collect();
        let metadata_count = metadata.len();
        for (index, m) in metadata.into_iter().enumerate() {
            top.insert(index, m);
        }

        let mut graph: Vec<Element> = top
            .drain_elements(is_graph_element)
            .into_iter()
            .filter(|e| {
                let name = node_name(e).unwrap_or_default();
                let keep = cfg.filter.include(name, e.is(THREDDS_NS, CATALOG_REF));
                if !keep {
                    debug!("catalog '{}': filter dropped '{}'", key, name);
                }
                keep
            })
            .collect();

        let not_renamed: SortedDatasets = graph
            .iter()
            .map(|e| (node_name(e).unwrap_or_default().to_string(), e.clone()))
            .collect();

        for element in graph.iter_mut().filter(|e| e.is(THREDDS_NS, DATASET)) {
            self.attach_access(&handlers, element, false);
            if !element.has_descendant(THREDDS_NS, DATASET) {
                let name = node_name(element).unwrap_or_default().to_string();
                if let Some(coverage) = cfg.time_coverage.get_time_coverage(&name) {
                    element.insert(1, coverage.to_element());
                }
            }
        }

        for element in graph.iter_mut() {
            let Some(name) = node_name(element).map(str::to_string) else {
                continue;
            };
            if let Some(new_name) = cfg.namer.get_name(&name) {
                debug!("catalog '{}': renamed '{}' to '{}'", key, name, new_name);
                set_node_name(element, &new_name);
            }
        }

        let mut sorted = SortedDatasets::new();
        for element in graph {
            let name = node_name(&element).unwrap_or_default().to_string();
            if sorted.insert(&name, element).is_some() {
                warn!("catalog '{}': more than one entry named '{}', keeping the last", key, name);
            }
        }
        for element in sorted.into_ordered(cfg.ascending) {
            top.push(element);
        }

        let now = Utc::now();
        let mut top_inserted = 0;
        for proxy in &cfg.proxies {
            let Some(mut dataset) = proxy.get_proxy_dataset(&not_renamed, now) else {
                debug!("catalog '{}': no source for proxy '{}'", key, proxy.settings().name);
                continue;
            };
            self.attach_access(&handlers, &mut dataset, true);
            if proxy.is_top() {
                top.insert(metadata_count + top_inserted, dataset);
                top_inserted += 1;
            } else {
                top.push(dataset);
            }
        }

        Ok(Loaded {
            raw: bes_doc.to_bytes(),
            processed: Document::new(catalog).to_bytes(),
            loaded_at: now,
        })
    }
}

impl Catalog for DynamicBesCatalog {
    fn catalog_key(&self) -> &str {
        &self.config.catalog_key
    }

    fn name(&self) -> &str {
        &self.config.catalog_key
    }

    fn source(&self) -> CatalogSource {
        CatalogSource::DynamicBes {
            resource_id: self.config.resource_id.clone(),
        }
    }

    fn needs_refresh(&self) -> bool {
        false
    }

    fn raw_document(&self) -> Result<Document> {
        self.with_state(|s| parse_buffer(&self.config.catalog_key, &s.raw))
    }

    fn processed_document(&self) -> Result<Document> {
        self.with_state(|s| parse_buffer(&self.config.catalog_key, &s.processed))
    }

    fn write_processed_xml(&self, sink: &mut dyn Write) -> Result<()> {
        self.with_state(|s| write_buffer(&self.config.catalog_key, sink, &s.processed))
    }

    fn write_raw_xml(&self, sink: &mut dyn Write) -> Result<()> {
        self.with_state(|s| write_buffer(&self.config.catalog_key, sink, &s.raw))
    }

    /// Runs the load pass while holding the write lock; readers wait and
    /// then see the new buffers, or the old ones if the pass failed.
    fn reload(&self) -> Result<()> {
        let mut state = self.state.write();
        let loaded = self.build()?;
        debug!(
            "catalog '{}': loaded {} bytes from BES resource '{}'",
            self.config.catalog_key,
            loaded.processed.len(),
            self.config.resource_id
        );
        *state = Some(loaded);
        Ok(())
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.state.read().as_ref().map(|s| s.loaded_at)
    }

    fn uses_memory_cache(&self) -> bool {
        true
    }

    fn destroy(&self) {
        *self.state.write() = None;
    }
}

impl std::fmt::Debug for DynamicBesCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicBesCatalog")
            .field("catalog_key", &self.config.catalog_key)
            .field("resource_id", &self.config.resource_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bes::{bes_error_document, BesCatalogProvider, DirectoryBesProvider};
    use crate::services::{ServiceRegistry, SimpleWebService};
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;
    use thredds_rules::{Clude, MatchTarget, NameRule};
    use thredds_types::thredds::{thredds, ACCESS, SERVICE, TIME_COVERAGE};

    fn context(bes: Arc<dyn BesCatalogProvider>) -> CatalogContext {
        let services = Arc::new(ServiceRegistry::new());
        services.register(Arc::new(SimpleWebService::dap("/opendap/")));
        services.register(Arc::new(SimpleWebService::file("/opendap/files/")));
        CatalogContext::new(bes).with_services(services)
    }

    fn data_dir(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        for f in files {
            fs::write(dir.path().join("data").join(f), b"0123").unwrap();
        }
        dir
    }

    fn entry_names(doc: &Document) -> Vec<String> {
        let top = doc.root.child(THREDDS_NS, DATASET).unwrap();
        top.elements()
            .filter(|e| is_graph_element(e))
            .filter_map(|e| node_name(e).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_load_pass_lists_sorted_entries_with_access() {
        let dir = data_dir(&["b.nc", "A.nc", "c.nc"]);
        fs::create_dir_all(dir.path().join("data/sub")).unwrap();
        let bes = Arc::new(DirectoryBesProvider::new(dir.path()).unwrap());
        let cat = DynamicBesCatalog::new(
            DynamicCatalogConfig::new("thredds/data/catalog.xml", "/data"),
            context(bes),
        )
        .unwrap();

        let doc = cat.processed_document().unwrap();
        assert_eq!(entry_names(&doc), vec!["A.nc", "b.nc", "c.nc", "sub"]);

        let services: Vec<_> = doc
            .root
            .children_named(THREDDS_NS, SERVICE)
            .filter_map(|s| s.attr("name"))
            .collect();
        assert_eq!(services, vec!["dap", "file"]);

        let top = doc.root.child(THREDDS_NS, DATASET).unwrap();
        assert_eq!(top.attr("name"), Some("thredds/data/catalog.xml"));
        let a = top.child(THREDDS_NS, DATASET).unwrap();
        let access: Vec<_> = a.children_named(THREDDS_NS, ACCESS).collect();
        // file service withheld from BES datasets by default
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].attr("serviceName"), Some("dap"));
        assert_eq!(access[0].attr("urlPath"), Some("data/A.nc"));
        assert!(a.child(BES_NS, BES_SERVICE_REF).is_none());

        assert!(!cat.needs_refresh());
        assert!(cat.last_modified().is_some());
        assert!(cat.raw_document().unwrap().root.is(BES_NS, "response"));
    }

    #[test]
    fn test_non_dap_dataset_gets_only_file_access() {
        let dir = data_dir(&["notes.txt", "sst.nc"]);
        let bes = Arc::new(DirectoryBesProvider::new(dir.path()).unwrap());
        let cat = DynamicBesCatalog::new(
            DynamicCatalogConfig::new("thredds/data/catalog.xml", "/data"),
            context(bes),
        )
        .unwrap();

        let doc = cat.processed_document().unwrap();
        let top = doc.root.child(THREDDS_NS, DATASET).unwrap();
        let notes = top
            .children_named(THREDDS_NS, DATASET)
            .find(|d| d.attr("name") == Some("notes.txt"))
            .unwrap();
        assert_eq!(notes.attr("ID"), Some("/data/notes.txt"));

        let access: Vec<_> = notes.children_named(THREDDS_NS, ACCESS).collect();
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].attr("serviceName"), Some("file"));
        assert_eq!(access[0].attr("urlPath"), Some("data/notes.txt"));
    }

    #[test]
    fn test_filter_drops_private_datasets() {
        let dir = data_dir(&["public.nc", "private_data.nc"]);
        let bes = Arc::new(DirectoryBesProvider::new(dir.path()).unwrap());
        let mut config = DynamicCatalogConfig::new("data/catalog.xml", "/data");
        config.filter = Filter::new(vec![Clude::new(Some("private*"), None, true, false, true).unwrap()]);

        let cat = DynamicBesCatalog::new(config, context(bes)).unwrap();
        assert_eq!(entry_names(&cat.processed_document().unwrap()), vec!["public.nc"]);
    }

    #[test]
    fn test_descending_sort_and_rename() {
        let dir = data_dir(&["a.nc", "b.nc"]);
        let bes = Arc::new(DirectoryBesProvider::new(dir.path()).unwrap());
        let mut config = DynamicCatalogConfig::new("data/catalog.xml", "/data");
        config.ascending = false;
        config.namer = Namer::new(
            vec![NameRule::new(MatchTarget::Name, r"^a\.nc$", "zz.nc").unwrap()],
            "data",
        );

        let cat = DynamicBesCatalog::new(config, context(bes)).unwrap();
        // sorted after renaming
        assert_eq!(entry_names(&cat.processed_document().unwrap()), vec!["zz.nc", "b.nc"]);
    }

    #[test]
    fn test_proxy_uses_filtered_pre_rename_snapshot() {
        let dir = data_dir(&["x_2020.nc", "x_2021.nc", "y_2022.nc"]);
        let bes = Arc::new(DirectoryBesProvider::new(dir.path()).unwrap());
        let mut config = DynamicCatalogConfig::new("data/catalog.xml", "/data");
        config.metadata = vec![thredds("metadata").with_child(thredds("publisher"))];
        config.filter = Filter::new(vec![Clude::new(Some("x_*"), None, true, false, false).unwrap()]);
        config.namer = Namer::new(
            vec![NameRule::new(MatchTarget::Name, r"^x_(\d+)\.nc$", "Year $1").unwrap()],
            "data",
        );
        config.proxies = Proxy::from_config(Some(
            &thredds("addProxies").with_child(Element::new("simpleLatest")),
        ))
        .unwrap();

        let cat = DynamicBesCatalog::new(config, context(bes)).unwrap();
        let doc = cat.processed_document().unwrap();
        let top = doc.root.child(THREDDS_NS, DATASET).unwrap();
        let children: Vec<&Element> = top.elements().collect();
        assert!(children[0].is(THREDDS_NS, "metadata"));
        // top proxy sits right after the metadata block
        assert_eq!(children[1].attr("name"), Some("latest"));
        assert_eq!(children[1].attr("ID"), Some("/data/x_2021.nc"));
        assert_eq!(children[1].attr("serviceName"), Some("latest"));
        assert_eq!(
            children[1].child(THREDDS_NS, ACCESS).and_then(|a| a.attr("urlPath")),
            Some("data/x_2021.nc")
        );
        assert_eq!(entry_names(&doc), vec!["latest", "Year 2020", "Year 2021"]);
    }

    #[test]
    fn test_time_coverage_is_second_child_of_leaf() {
        let dir = data_dir(&["sst_2019.nc"]);
        let bes = Arc::new(DirectoryBesProvider::new(dir.path()).unwrap());
        let mut config = DynamicCatalogConfig::new("data/catalog.xml", "/data");
        let tc = thredds("addTimeCoverage")
            .with_attr("datasetNameMatchPattern", r"sst_(\d{4})\.nc")
            .with_attr("startTimeSubstitutionPattern", "$1-01-01T00:00:00")
            .with_attr("duration", "1 year");
        config.time_coverage = TimeCoverageInjector::from_config(Some(&tc), "data").unwrap();

        let cat = DynamicBesCatalog::new(config, context(bes)).unwrap();
        let doc = cat.processed_document().unwrap();
        let ds = doc
            .root
            .child(THREDDS_NS, DATASET)
            .and_then(|t| t.child(THREDDS_NS, DATASET))
            .unwrap();
        let second = ds.elements().nth(1).unwrap();
        assert!(second.is(THREDDS_NS, TIME_COVERAGE));
        assert_eq!(second.child(THREDDS_NS, "start").map(|s| s.text()), Some("2019-01-01T00:00:00".to_string()));
    }

    /// Serves a listing until told to fail.
    struct FlakyBes {
        inner: DirectoryBesProvider,
        failing: Mutex<bool>,
    }

    impl BesCatalogProvider for FlakyBes {
        fn get_bes_catalog(&self, resource_id: &str) -> anyhow::Result<BesReply> {
            if *self.failing.lock() {
                return Ok(BesReply::Error(bes_error_document(1, "BES went away")));
            }
            self.inner.get_bes_catalog(resource_id)
        }
    }

    #[test]
    fn test_failed_reload_keeps_previous_buffers() {
        let dir = data_dir(&["a.nc"]);
        let bes = Arc::new(FlakyBes {
            inner: DirectoryBesProvider::new(dir.path()).unwrap(),
            failing: Mutex::new(false),
        });
        let cat = DynamicBesCatalog::new(DynamicCatalogConfig::new("data/catalog.xml", "/data"), context(bes.clone())).unwrap();
        let before = cat.content_digest().unwrap();

        *bes.failing.lock() = true;
        let err = cat.reload().unwrap_err();
        assert!(err.to_string().contains("BES went away"));
        assert_eq!(cat.content_digest().unwrap(), before);
    }

    #[test]
    fn test_missing_resource_and_destroy() {
        let dir = data_dir(&[]);
        let bes: Arc<dyn BesCatalogProvider> = Arc::new(DirectoryBesProvider::new(dir.path()).unwrap());
        let missing = DynamicBesCatalog::new(DynamicCatalogConfig::new("nope/catalog.xml", "/nope"), context(bes.clone()));
        assert!(matches!(missing.unwrap_err(), CatalogError::Upstream { .. }));

        let cat = DynamicBesCatalog::new(DynamicCatalogConfig::new("data/catalog.xml", "/data"), context(bes)).unwrap();
        cat.destroy();
        assert!(matches!(cat.processed_document().unwrap_err(), CatalogError::Destroyed { .. }));
    }
}
