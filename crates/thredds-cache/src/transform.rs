//! Document transforms applied when catalogs are ingested.

use anyhow::{anyhow, Result};
use thredds_types::paths::path_append;
use thredds_types::thredds::{
    thredds, BES_NS, BES_SERVICE_REF, CATALOG, CATALOG_REF, DATASET, DATA_SIZE, DATE, THREDDS_NS,
    XLINK_NS,
};
use thredds_types::Document;

use crate::bes::bes_error_message;

/// An XML-to-XML transform (an XSLT in a full deployment).
pub trait DocumentTransform: Send + Sync {
    fn transform(&self, input: &Document) -> Result<Document>;
}

/// Returns its input unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl DocumentTransform for IdentityTransform {
    fn transform(&self, input: &Document) -> Result<Document> {
        Ok(input.clone())
    }
}

/// Converts a BES `showCatalog` response into a THREDDS catalog.
///
/// Collections become `catalogRef`s pointing at `<name>/catalog.xml`; other
/// entries become `dataset`s carrying their size, modification date and any
/// BES `serviceRef`s, which the load pass consumes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BesToThreddsTransform;

impl DocumentTransform for BesToThreddsTransform {
    fn transform(&self, input: &Document) -> Result<Document> {
        if let Some(message) = bes_error_message(input) {
            return Err(anyhow!("BES returned an error: {}", message));
        }
        let top = input
            .root
            .child(BES_NS, "showCatalog")
            .and_then(|s| s.child(BES_NS, "dataset"))
            .ok_or_else(|| anyhow!("Not a BES showCatalog response (root <{}>)", input.root.name))?;

        let top_name = top.attr("name").unwrap_or("/");
        let mut top_dataset = thredds(DATASET)
            .with_attr("name", top_name)
            .with_attr("ID", top_name);

        for entry in top.children_named(BES_NS, "dataset") {
            let Some(name) = entry.attr("name") else {
                tracing::warn!("BES catalog entry without a name under '{}'", top_name);
                continue;
            };
            let id = path_append(top_name, name);
            if entry.attr("node") == Some("true") {
                let mut catalog_ref = thredds(CATALOG_REF)
                    .with_attr("name", name)
                    .with_attr("ID", format!("{}/", id));
                catalog_ref.set_attr_ns("xlink", XLINK_NS, "href", format!("{}/catalog.xml", name));
                catalog_ref.set_attr_ns("xlink", XLINK_NS, "title", name);
                catalog_ref.set_attr_ns("xlink", XLINK_NS, "type", "simple");
                top_dataset.push(catalog_ref);
            } else {
                let mut dataset = thredds(DATASET).with_attr("name", name).with_attr("ID", id);
                if let Some(size) = entry.attr("size") {
                    dataset.push(thredds(DATA_SIZE).with_attr("units", "bytes").with_text(size));
                }
                if let Some(modified) = entry.attr("lastModified").filter(|m| !m.is_empty()) {
                    dataset.push(thredds(DATE).with_attr("type", "modified").with_text(modified));
                }
                for service_ref in entry.children_named(BES_NS, BES_SERVICE_REF) {
                    let mut r = service_ref.clone();
                    r.prefix = Some("bes".to_string());
                    dataset.push(r);
                }
                top_dataset.push(dataset);
            }
        }

        let mut catalog = thredds(CATALOG).with_attr("name", top_name);
        catalog.namespaces = vec![
            (None, THREDDS_NS.to_string()),
            (Some("xlink".to_string()), XLINK_NS.to_string()),
            (Some("bes".to_string()), BES_NS.to_string()),
        ];
        catalog.push(top_dataset);
        Ok(Document::new(catalog))
    }
}
