//! `datasetScan` elements: configuration for the dynamic catalogs under a
//! URL prefix.

use thredds_rules::{Filter, Namer, Proxy, TimeCoverageInjector};
use thredds_types::paths::{basename, path_append};
use thredds_types::thredds::{
    parse_bool, ADD_PROXIES, ADD_TIME_COVERAGE, CATALOG_FILE, FILTER, METADATA, NAMER, SERVICE,
    SERVICE_NAME, SORT, THREDDS_NS,
};
use thredds_types::{CatalogError, Document, Element, Result};
use tracing::{debug, error};

use crate::catalog::CatalogContext;
use crate::dynamic_bes::{DynamicBesCatalog, DynamicCatalogConfig};

/// One `datasetScan` of a static catalog.
///
/// Resolution is pure configuration: nothing is cached here, the manager
/// registers the catalogs this produces.
pub struct DatasetScan {
    owner_key: String,
    name: String,
    path: String,
    location: String,
    url_prefix: String,
    metadata: Vec<Element>,
    filter: Filter,
    namer: Option<Element>,
    time_coverage: Option<Element>,
    proxies: Vec<Proxy>,
    ascending: bool,
    use_hyrax_services: bool,
    services: Vec<Element>,
    ctx: CatalogContext,
}

impl DatasetScan {
    /// `owner_raw` is the owning catalog's raw document; `serviceName`
    /// references inside the scan are resolved against its services.
    pub fn new(
        owner_key: &str,
        owner_url_prefix: &str,
        scan: &Element,
        owner_raw: &Document,
        ctx: CatalogContext,
    ) -> Result<Self> {
        let required = |attr: &str| {
            scan.attr(attr).map(str::to_string).ok_or_else(|| {
                CatalogError::config(
                    owner_key,
                    format!("<datasetScan> is missing its {} attribute", attr),
                )
            })
        };
        let path = required("path")?;
        let location = required("location")?;
        let name = scan.attr("name").unwrap_or(&path).to_string();

        let filter = Filter::from_config(scan.child(THREDDS_NS, FILTER))?;
        let namer = scan.child(THREDDS_NS, NAMER).cloned();
        let time_coverage = scan.child(THREDDS_NS, ADD_TIME_COVERAGE).cloned();
        // surface bad patterns now rather than on the first request
        Namer::from_config(namer.as_ref(), "")?;
        TimeCoverageInjector::from_config(time_coverage.as_ref(), "")?;
        let proxies = Proxy::from_config(scan.child(THREDDS_NS, ADD_PROXIES))?;

        let ascending = scan
            .child(THREDDS_NS, SORT)
            .and_then(|s| s.child(THREDDS_NS, "lexigraphicByName"))
            .map_or(true, |l| parse_bool(l.attr("increasing"), true));

        let metadata = scan.children_named(THREDDS_NS, METADATA).cloned().collect();
        let services = resolve_services(owner_key, scan, owner_raw);

        Ok(Self {
            owner_key: owner_key.to_string(),
            name,
            url_prefix: path_append(owner_url_prefix, &path),
            path,
            location,
            metadata,
            filter,
            namer,
            time_coverage,
            proxies,
            ascending,
            use_hyrax_services: parse_bool(scan.attr("useHyraxServices"), true),
            services,
            ctx,
        })
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// URL prefix of every catalog this scan serves.
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// True when `catalog_key` lies at or under this scan's URL prefix.
    pub fn matches(&self, catalog_key: &str) -> bool {
        let prefix = self.url_prefix.trim_end_matches('/');
        match catalog_key.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// BES resource listed by the catalog at `catalog_key`.
    pub fn resource_id(&self, catalog_key: &str) -> String {
        let catalog_path = catalog_path(catalog_key);
        let relative = catalog_path
            .strip_prefix(self.url_prefix.trim_end_matches('/'))
            .unwrap_or(catalog_path)
            .trim_start_matches('/');
        format!("{}/{}", self.location.trim_end_matches('/'), relative)
    }

    /// Build the dynamic catalog for `catalog_key`, or `None` when the key
    /// is outside this scan or does not name a directory's `catalog.xml`.
    pub fn get_catalog(&self, catalog_key: &str) -> Result<Option<DynamicBesCatalog>> {
        if !self.matches(catalog_key) {
            return Ok(None);
        }
        if basename(catalog_key) != CATALOG_FILE {
            debug!(
                "datasetScan '{}': '{}' is not a catalog document",
                self.name, catalog_key
            );
            return Ok(None);
        }
        let catalog_path = catalog_path(catalog_key);
        let resource_id = self.resource_id(catalog_key);
        debug!(
            "datasetScan '{}': catalog '{}' lists BES resource '{}'",
            self.name, catalog_key, resource_id
        );

        let config = DynamicCatalogConfig {
            catalog_key: catalog_key.to_string(),
            resource_id,
            metadata: self.metadata.clone(),
            filter: self.filter.clone(),
            ascending: self.ascending,
            namer: Namer::from_config(self.namer.as_ref(), catalog_path)?,
            time_coverage: TimeCoverageInjector::from_config(self.time_coverage.as_ref(), catalog_path)?,
            proxies: self.proxies.clone(),
            services: self.services.clone(),
            use_service_registry: self.use_hyrax_services,
        };
        DynamicBesCatalog::new(config, self.ctx.clone()).map(Some)
    }
}

impl std::fmt::Debug for DatasetScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetScan")
            .field("owner_key", &self.owner_key)
            .field("name", &self.name)
            .field("url_prefix", &self.url_prefix)
            .field("location", &self.location)
            .finish()
    }
}

/// Directory part of a catalog key: `a/b/catalog.xml` -> `a/b`.
fn catalog_path(catalog_key: &str) -> &str {
    if catalog_key.ends_with('/') {
        return catalog_key.trim_end_matches('/');
    }
    match catalog_key.rfind('/') {
        Some(idx) if idx > 0 => &catalog_key[..idx],
        _ => catalog_key,
    }
}

fn resolve_services(owner_key: &str, scan: &Element, owner_raw: &Document) -> Vec<Element> {
    let declared: Vec<&Element> = owner_raw
        .root
        .descendants()
        .filter(|e| e.is(THREDDS_NS, SERVICE))
        .collect();
    let mut resolved: Vec<Element> = Vec::new();
    for reference in scan.descendants().filter(|e| e.is(THREDDS_NS, SERVICE_NAME)) {
        let wanted = reference.text_trim();
        let found = declared
            .iter()
            .find(|s| s.attr("name").is_some_and(|n| n.eq_ignore_ascii_case(&wanted)));
        match found {
            Some(service) if !resolved.iter().any(|r| r.attr("name") == service.attr("name")) => {
                resolved.push((*service).clone())
            }
            Some(_) => {}
            None => error!(
                "catalog '{}': datasetScan references undefined service '{}'",
                owner_key, wanted
            ),
        }
    }
    resolved
}
