//! THREDDS catalog vocabulary: namespaces, element names and small constructors.

use crate::xml::Element;

/// THREDDS InvCatalog 1.0 namespace.
pub const THREDDS_NS: &str = "http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0";
/// XLink namespace, used by `catalogRef`.
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
/// BES response namespace.
pub const BES_NS: &str = "http://xml.opendap.org/ns/bes/1.0#";

pub const CATALOG: &str = "catalog";
pub const CATALOG_REF: &str = "catalogRef";
pub const DATASET: &str = "dataset";
pub const DATASET_SCAN: &str = "datasetScan";
pub const SERVICE: &str = "service";
pub const SERVICE_NAME: &str = "serviceName";
pub const METADATA: &str = "metadata";
pub const ACCESS: &str = "access";
pub const TIME_COVERAGE: &str = "timeCoverage";
pub const DATE: &str = "date";
pub const DATA_SIZE: &str = "dataSize";
pub const FILTER: &str = "filter";
pub const NAMER: &str = "namer";
pub const ADD_TIME_COVERAGE: &str = "addTimeCoverage";
pub const ADD_PROXIES: &str = "addProxies";
pub const SORT: &str = "sort";

/// File name of the catalog document in each catalog directory.
pub const CATALOG_FILE: &str = "catalog.xml";

/// Element name used by the BES for a service reference inside a dataset.
pub const BES_SERVICE_REF: &str = "serviceRef";

/// Service type (compared case-insensitively) whose base URL roots inherited metadata.
pub const OPENDAP_SERVICE_TYPE: &str = "OPENDAP";

/// A new element in the THREDDS namespace.
pub fn thredds(name: &str) -> Element {
    Element::new_ns(THREDDS_NS, name)
}

/// A `<service>` element.
pub fn service_element(name: &str, service_type: &str, base: &str) -> Element {
    thredds(SERVICE)
        .with_attr("name", name)
        .with_attr("serviceType", service_type)
        .with_attr("base", base)
}

/// An `<access>` element pointing at `url_path` through `service_name`.
pub fn access_element(service_name: &str, url_path: &str) -> Element {
    thredds(ACCESS)
        .with_attr("serviceName", service_name)
        .with_attr("urlPath", url_path)
}

/// Display name of a `dataset` or `catalogRef`.
///
/// `catalogRef` elements carry their name as `xlink:title`; plain `name` wins
/// when both are present.
pub fn node_name(el: &Element) -> Option<&str> {
    el.attr("name").or_else(|| el.attr_ns(XLINK_NS, "title"))
}

/// Rename a `dataset` or `catalogRef` in place, keeping the attribute it was named by.
pub fn set_node_name(el: &mut Element, name: &str) {
    if el.attr("name").is_none() && el.attr_ns(XLINK_NS, "title").is_some() {
        el.set_attr_ns("xlink", XLINK_NS, "title", name);
    } else {
        el.set_attr("name", name);
    }
}

/// True for `dataset` and `catalogRef` elements.
pub fn is_graph_element(el: &Element) -> bool {
    el.is(THREDDS_NS, DATASET) || el.is(THREDDS_NS, CATALOG_REF)
}

/// Parse a THREDDS boolean attribute (`true`/`false`, case-insensitive).
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" => true,
        Some(v) if v == "false" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_prefers_name_attribute() {
        let mut r = thredds(CATALOG_REF);
        r.set_attr_ns("xlink", XLINK_NS, "title", "Ref");
        assert_eq!(node_name(&r), Some("Ref"));

        set_node_name(&mut r, "Renamed");
        assert_eq!(r.attr_ns(XLINK_NS, "title"), Some("Renamed"));
        assert!(r.attr("name").is_none());

        let mut d = thredds(DATASET).with_attr("name", "a.nc");
        set_node_name(&mut d, "b.nc");
        assert_eq!(node_name(&d), Some("b.nc"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool(Some("TRUE"), false));
        assert!(!parse_bool(Some("false"), true));
        assert!(parse_bool(Some("maybe"), true));
        assert!(!parse_bool(None, false));
    }
}
