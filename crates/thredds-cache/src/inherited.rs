//! Registry of metadata and services that `datasetScan`s hand down to the
//! dynamic catalogs beneath them.
//!
//! A scan such as
//!
//! ```xml
//! <datasetScan name="Data" path="data" location="/data/">
//!   <metadata inherited="true">
//!     <serviceName>dap</serviceName>
//!     <publisher>...</publisher>
//!   </metadata>
//! </datasetScan>
//! ```
//!
//! contributes its inherited metadata under the root path formed by joining
//! the base of each OPeNDAP service the scan uses with the scan location
//! (e.g. `/opendap/data/`). Any catalog whose lookup path starts with that
//! root sees the contribution.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use thredds_types::paths::{join_root_path, with_trailing_slash};
use thredds_types::thredds::{
    parse_bool, DATASET_SCAN, METADATA, OPENDAP_SERVICE_TYPE, SERVICE, SERVICE_NAME, THREDDS_NS,
};
use thredds_types::{Document, Element};
use tracing::{debug, error, warn};

/// root path -> contributing catalog key -> elements
type Contributions = BTreeMap<String, BTreeMap<String, Vec<Element>>>;

#[derive(Debug, Default)]
struct Inventory {
    metadata: Contributions,
    services: Contributions,
    roots_by_catalog: HashMap<String, BTreeSet<String>>,
}

impl Inventory {
    fn purge(&mut self, catalog_key: &str) -> bool {
        let Some(roots) = self.roots_by_catalog.remove(catalog_key) else {
            return false;
        };
        for root in &roots {
            for map in [&mut self.metadata, &mut self.services] {
                if let Some(bucket) = map.get_mut(root) {
                    bucket.remove(catalog_key);
                    if bucket.is_empty() {
                        debug!("inherited: dropping empty root path '{}'", root);
                        map.remove(root);
                    }
                }
            }
        }
        true
    }
}

/// One scan's contribution, computed before the registry lock is taken.
#[derive(Debug)]
struct ScanContribution {
    roots: Vec<String>,
    metadata: Vec<Element>,
    service: Option<Element>,
}

/// Inherited metadata index. All state sits behind one lock, so a lookup
/// never sees half of a catalog's contributions.
#[derive(Debug, Default)]
pub struct InheritedMetadataRegistry {
    inventory: RwLock<Inventory>,
}

impl InheritedMetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the inherited metadata declared by `raw` (a catalog's raw
    /// document) under `catalog_key`, replacing anything previously recorded
    /// for that key. Returns the number of root paths contributed to.
    pub fn ingest(&self, catalog_key: &str, raw: &Document) -> usize {
        let contributions = extract(raw);

        let mut inventory = self.inventory.write();
        inventory.purge(catalog_key);

        let mut roots = BTreeSet::new();
        for contribution in contributions {
            for root in contribution.roots {
                debug!(
                    "inherited: catalog '{}' contributes {} metadata element(s) to '{}'",
                    catalog_key,
                    contribution.metadata.len(),
                    root
                );
                inventory
                    .metadata
                    .entry(root.clone())
                    .or_default()
                    .entry(catalog_key.to_string())
                    .or_default()
                    .extend(contribution.metadata.iter().cloned());
                if let Some(service) = &contribution.service {
                    inventory
                        .services
                        .entry(root.clone())
                        .or_default()
                        .entry(catalog_key.to_string())
                        .or_default()
                        .push(service.clone());
                }
                roots.insert(root);
            }
        }
        let count = roots.len();
        if !roots.is_empty() {
            inventory
                .roots_by_catalog
                .insert(catalog_key.to_string(), roots);
        }
        count
    }

    /// Remove everything contributed by `catalog_key`.
    pub fn purge(&self, catalog_key: &str) {
        if !self.inventory.write().purge(catalog_key) {
            debug!("inherited: nothing recorded for '{}'", catalog_key);
        }
    }

    /// Metadata from every root path that prefixes `path`.
    pub fn get_inherited_metadata(&self, path: &str) -> Vec<Element> {
        let inventory = self.inventory.read();
        inventory
            .metadata
            .iter()
            .filter(|(root, _)| path.starts_with(root.as_str()))
            .flat_map(|(_, by_catalog)| by_catalog.values().flatten().cloned())
            .collect()
    }

    /// Services from every root path that prefixes `path`, first definition
    /// of each name winning.
    pub fn get_inherited_services(&self, path: &str) -> Vec<Element> {
        let inventory = self.inventory.read();
        let mut seen = BTreeSet::new();
        let mut services = Vec::new();
        for (root, by_catalog) in inventory
            .services
            .iter()
            .filter(|(root, _)| path.starts_with(root.as_str()))
        {
            for service in by_catalog.values().flatten() {
                let name = service.attr("name").unwrap_or_default().to_string();
                if seen.insert(name.clone()) {
                    services.push(service.clone());
                } else {
                    warn!(
                        "inherited: duplicate service name '{}' under root path '{}', keeping the first",
                        name, root
                    );
                }
            }
        }
        services
    }

    pub fn has_inherited_metadata(&self, path: &str) -> bool {
        self.inventory
            .read()
            .metadata
            .keys()
            .any(|root| path.starts_with(root.as_str()))
    }

    /// Root paths currently holding metadata.
    pub fn root_paths(&self) -> Vec<String> {
        self.inventory.read().metadata.keys().cloned().collect()
    }

    /// Catalog keys currently contributing anything.
    pub fn contributor_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inventory
            .read()
            .roots_by_catalog
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        *self.inventory.write() = Inventory::default();
    }
}

fn extract(raw: &Document) -> Vec<ScanContribution> {
    let services: Vec<&Element> = top_level_services(&raw.root);
    let mut out = Vec::new();

    for scan in raw
        .root
        .descendants()
        .filter(|e| e.is(THREDDS_NS, DATASET_SCAN))
    {
        let metadata: Vec<Element> = scan
            .children_named(THREDDS_NS, METADATA)
            .filter(|m| parse_bool(m.attr("inherited"), false))
            .cloned()
            .collect();
        if metadata.is_empty() {
            continue;
        }

        let location = with_trailing_slash(scan.attr("location").unwrap_or_default());
        let service_name = metadata
            .iter()
            .find_map(|m| m.child(THREDDS_NS, SERVICE_NAME))
            .map(|s| s.text_trim());

        let (service, roots) = match service_name {
            Some(name) => match find_service(&services, &name) {
                Some((top, named)) => {
                    let roots = dap_services(named)
                        .into_iter()
                        .map(|dap| join_root_path(dap.attr("base").unwrap_or_default(), &location))
                        .collect();
                    (Some(top.clone()), roots)
                }
                None => {
                    error!("inherited: failed to locate service '{}'", name);
                    (None, Vec::new())
                }
            },
            None => (None, Vec::new()),
        };

        if roots.is_empty() {
            debug!(
                "inherited: datasetScan '{}' has inherited metadata but no OPeNDAP service to root it",
                scan.attr("name").unwrap_or_default()
            );
            continue;
        }
        out.push(ScanContribution {
            roots,
            metadata,
            service,
        });
    }
    out
}

/// Services not nested inside another service.
fn top_level_services(root: &Element) -> Vec<&Element> {
    let mut out = Vec::new();
    let mut stack: Vec<&Element> = vec![root];
    while let Some(el) = stack.pop() {
        for child in el.elements() {
            if child.is(THREDDS_NS, SERVICE) {
                out.push(child);
            } else {
                stack.push(child);
            }
        }
    }
    out
}

/// The top-level service containing (or being) the service called `name`,
/// and the named service itself.
fn find_service<'a>(services: &[&'a Element], name: &str) -> Option<(&'a Element, &'a Element)> {
    for &top in services {
        if top.attr("name") == Some(name) {
            return Some((top, top));
        }
        if let Some(nested) = top
            .descendants()
            .find(|s| s.is(THREDDS_NS, SERVICE) && s.attr("name") == Some(name))
        {
            return Some((top, nested));
        }
    }
    None
}

/// `service` itself if it is OPeNDAP, plus its OPeNDAP children.
fn dap_services(service: &Element) -> Vec<&Element> {
    let is_dap = |s: &Element| {
        s.attr("serviceType")
            .is_some_and(|t| t.to_uppercase() == OPENDAP_SERVICE_TYPE)
    };
    let mut out = Vec::new();
    if is_dap(service) {
        out.push(service);
    }
    out.extend(
        service
            .children_named(THREDDS_NS, SERVICE)
            .filter(|s| is_dap(*s)),
    );
    out
}
