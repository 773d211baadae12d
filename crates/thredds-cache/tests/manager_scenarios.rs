//! End-to-end scenarios for the catalog manager.
//!
//! These tests verify:
//! 1. catalogRef graphs are registered and purged as a unit
//! 2. stale static catalogs are rebuilt, and a failed rebuild leaves them purged
//! 3. readers never see a partially rebuilt catalog
//! 4. datasetScans produce dynamic catalogs with filters and inherited metadata
//! 5. catalogRef cycles are cut instead of recursing, also when a child is refreshed

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use thredds_cache::{
    CatalogContext, CatalogManager, CatalogSource, DirectoryBesProvider, DocumentTransform,
    IdentityTransform, ServiceRegistry, SimpleWebService,
};
use thredds_types::thredds::{node_name, DATASET, THREDDS_NS};
use thredds_types::Document;

const HEADER: &str = r#"xmlns="http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink""#;

fn write_catalog(root: &Path, rel: &str, name: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("catalog has a parent dir")).expect("create dirs");
    fs::write(&path, format!(r#"<catalog {} name="{}">{}</catalog>"#, HEADER, name, body))
        .expect("write catalog");
}

fn catalog_ref(href: &str) -> String {
    format!(r#"<catalogRef xlink:href="{}" xlink:title="{}"/>"#, href, href)
}

/// Move the file's modification time into the future so the change is
/// visible regardless of filesystem timestamp granularity.
fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).expect("open for touch");
    file.set_modified(SystemTime::now() + Duration::from_secs(10))
        .expect("set mtime");
}

fn context(bes_root: &Path) -> CatalogContext {
    let services = Arc::new(ServiceRegistry::new());
    services.register(Arc::new(SimpleWebService::dap("/opendap/")));
    services.register(Arc::new(SimpleWebService::file("/opendap/")));
    CatalogContext::new(Arc::new(
        DirectoryBesProvider::new(bes_root).expect("bes root exists"),
    ))
    .with_services(services)
}

fn processed_name(manager: &CatalogManager, key: &str) -> Option<String> {
    let catalog = manager.get_catalog(key).expect("lookup")?;
    let doc = catalog.processed_document().expect("processed document");
    doc.root.attr("name").map(str::to_string)
}

fn entry_names(doc: &Document) -> Vec<String> {
    doc.root
        .child(THREDDS_NS, DATASET)
        .expect("top dataset")
        .elements()
        .filter_map(|e| node_name(e).map(str::to_string))
        .collect()
}

#[test]
fn test_parent_with_child_ref_registers_and_purges_both() {
    let content = TempDir::new().expect("temp dir");
    write_catalog(content.path(), "catalog.xml", "Top", &catalog_ref("child/catalog.xml"));
    write_catalog(content.path(), "child/catalog.xml", "Child", "");

    let manager = CatalogManager::new(context(content.path()));
    let key = manager
        .add_catalog(content.path(), "thredds/", "catalog.xml", true)
        .expect("add");

    assert_eq!(key, "thredds/catalog.xml");
    assert_eq!(manager.keys(), vec!["thredds/catalog.xml", "thredds/child/catalog.xml"]);
    assert_eq!(manager.children_of(&key), vec!["thredds/child/catalog.xml"]);
    assert_eq!(processed_name(&manager, "thredds/child/catalog.xml").as_deref(), Some("Child"));

    assert!(manager.purge_catalog(&key));
    assert!(manager.keys().is_empty());
    assert!(manager.children_of(&key).is_empty());
}

#[test]
fn test_purge_recurses_through_the_graph_and_inherited_registry() {
    let content = TempDir::new().expect("temp dir");
    let scan = |loc: &str| {
        format!(
            r#"<service name="dap" serviceType="OPeNDAP" base="/opendap/"/>
               <datasetScan name="{loc}" path="{loc}" location="/{loc}/">
                 <metadata inherited="true"><serviceName>dap</serviceName></metadata>
               </datasetScan>"#
        )
    };
    write_catalog(
        content.path(),
        "catalog.xml",
        "A",
        &format!("{}{}{}", scan("a"), catalog_ref("b/catalog.xml"), catalog_ref("c/catalog.xml")),
    );
    write_catalog(content.path(), "b/catalog.xml", "B", &scan("b"));
    write_catalog(
        content.path(),
        "c/catalog.xml",
        "C",
        &format!("{}{}", scan("c"), catalog_ref("d/catalog.xml")),
    );
    write_catalog(content.path(), "c/d/catalog.xml", "D", &scan("d"));

    let ctx = context(content.path());
    let inherited = ctx.inherited.clone();
    let manager = CatalogManager::new(ctx);
    manager
        .add_catalog(content.path(), "", "catalog.xml", true)
        .expect("add");

    assert_eq!(
        manager.keys(),
        vec!["b/catalog.xml", "c/catalog.xml", "c/d/catalog.xml", "catalog.xml"]
    );
    assert_eq!(manager.children_of("c/catalog.xml"), vec!["c/d/catalog.xml"]);
    assert_eq!(inherited.contributor_keys().len(), 4);
    assert_eq!(manager.scan_count(), 4);
    assert!(manager.has_inherited_metadata("/opendap/d/x.nc"));

    manager.purge_catalog("catalog.xml");
    assert!(manager.keys().is_empty());
    assert!(manager.children_of("c/catalog.xml").is_empty());
    assert!(inherited.contributor_keys().is_empty());
    assert!(inherited.root_paths().is_empty());
    assert_eq!(manager.scan_count(), 0);
    assert_eq!(manager.metrics().snapshot().purges, 4);
}

#[test]
fn test_stale_catalog_is_rebuilt() {
    let content = TempDir::new().expect("temp dir");
    write_catalog(content.path(), "catalog.xml", "v1", "");
    let manager = CatalogManager::new(context(content.path()));
    manager
        .add_catalog(content.path(), "", "catalog.xml", true)
        .expect("add");
    assert_eq!(processed_name(&manager, "catalog.xml").as_deref(), Some("v1"));

    write_catalog(content.path(), "catalog.xml", "v2", "");
    bump_mtime(&content.path().join("catalog.xml"));

    assert_eq!(processed_name(&manager, "catalog.xml").as_deref(), Some("v2"));
    let stats = manager.metrics().snapshot();
    assert_eq!(stats.refreshes, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_failed_rebuild_leaves_catalog_purged() {
    let content = TempDir::new().expect("temp dir");
    write_catalog(content.path(), "catalog.xml", "Top", &catalog_ref("child/catalog.xml"));
    write_catalog(content.path(), "child/catalog.xml", "Child", "");
    let manager = CatalogManager::new(context(content.path()));
    manager
        .add_catalog(content.path(), "", "catalog.xml", true)
        .expect("add");

    fs::write(content.path().join("catalog.xml"), "<catalog").expect("corrupt");
    bump_mtime(&content.path().join("catalog.xml"));

    assert!(manager.get_catalog("catalog.xml").expect("lookup").is_none());
    assert!(!manager.contains("catalog.xml"));
    assert!(!manager.contains("child/catalog.xml"));
    assert_eq!(manager.metrics().snapshot().refresh_failures, 1);
}

/// Identity transform that takes its time, widening the rebuild window.
struct SlowTransform;

impl DocumentTransform for SlowTransform {
    fn transform(&self, input: &Document) -> anyhow::Result<Document> {
        thread::sleep(Duration::from_millis(20));
        IdentityTransform.transform(input)
    }
}

#[test]
fn test_readers_see_whole_documents_during_rebuild() {
    let content = TempDir::new().expect("temp dir");
    let datasets: String = (0..200)
        .map(|i| format!(r#"<dataset name="d{:03}" ID="d{:03}"/>"#, i, i))
        .collect();
    write_catalog(content.path(), "catalog.xml", "old", &datasets);

    let manager = Arc::new(CatalogManager::new(
        context(content.path()).with_catalog_ingest(Arc::new(SlowTransform)),
    ));
    manager
        .add_catalog(content.path(), "", "catalog.xml", true)
        .expect("add");
    let old = manager
        .get_catalog("catalog.xml")
        .expect("lookup")
        .expect("registered");

    write_catalog(content.path(), "catalog.xml", "new", &datasets);
    bump_mtime(&content.path().join("catalog.xml"));

    let reader = {
        let manager = manager.clone();
        let old = old.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                let doc = old.processed_document().expect("old buffers stay readable");
                assert_eq!(doc.root.attr("name"), Some("old"));
                assert_eq!(doc.root.children_named(THREDDS_NS, DATASET).count(), 200);

                if let Some(current) = manager.get_catalog("catalog.xml").expect("lookup") {
                    let doc = current.processed_document().expect("well-formed");
                    assert!(matches!(doc.root.attr("name"), Some("old") | Some("new")));
                    assert_eq!(doc.root.children_named(THREDDS_NS, DATASET).count(), 200);
                }
            }
        })
    };

    assert_eq!(processed_name(&manager, "catalog.xml").as_deref(), Some("new"));
    reader.join().expect("reader thread");
    assert_eq!(processed_name(&manager, "catalog.xml").as_deref(), Some("new"));
}

#[test]
fn test_cycles_are_cut() {
    let content = TempDir::new().expect("temp dir");
    write_catalog(
        content.path(),
        "catalog.xml",
        "Top",
        &format!("{}{}", catalog_ref("a/catalog.xml"), catalog_ref("catalog.xml")),
    );
    write_catalog(content.path(), "a/catalog.xml", "A", &catalog_ref("../catalog.xml"));

    let manager = CatalogManager::new(context(content.path()));
    manager
        .add_catalog(content.path(), "", "catalog.xml", true)
        .expect("add");

    assert_eq!(manager.keys(), vec!["a/catalog.xml", "catalog.xml"]);
    assert_eq!(manager.children_of("catalog.xml"), vec!["a/catalog.xml"]);
    assert!(manager.children_of("a/catalog.xml").is_empty());
}

#[test]
fn test_refreshing_a_child_does_not_record_a_back_edge() {
    let content = TempDir::new().expect("temp dir");
    write_catalog(content.path(), "catalog.xml", "Top", &catalog_ref("a/catalog.xml"));
    write_catalog(content.path(), "a/catalog.xml", "A", &catalog_ref("../catalog.xml"));
    let child_file = content.path().join("a/catalog.xml");

    let manager = CatalogManager::new(context(content.path()));
    manager
        .add_catalog(content.path(), "", "catalog.xml", true)
        .expect("add");

    for offset in [10, 20] {
        let file = fs::File::options().write(true).open(&child_file).expect("open for touch");
        file.set_modified(SystemTime::now() + Duration::from_secs(offset))
            .expect("set mtime");
        manager
            .get_catalog("a/catalog.xml")
            .expect("lookup")
            .expect("rebuilt child");

        assert!(manager.children_of("a/catalog.xml").is_empty());
        assert_eq!(manager.children_of("catalog.xml"), vec!["a/catalog.xml"]);
        assert_eq!(manager.tree(), "catalog.xml [static]\n  a/catalog.xml [static]\n");
    }
    assert_eq!(manager.metrics().snapshot().refreshes, 2);
}

fn scan_catalog(content: &Path, data: &Path, scan_body: &str) -> CatalogManager {
    write_catalog(
        content,
        "catalog.xml",
        "Top",
        &format!(
            r#"<service name="dap" serviceType="OPeNDAP" base="/opendap/"/>
               <datasetScan name="Data" path="data" location="/data/">{}</datasetScan>"#,
            scan_body
        ),
    );
    let manager = CatalogManager::new(context(data));
    manager
        .add_catalog(content, "thredds/", "catalog.xml", true)
        .expect("add");
    manager
}

fn data_tree(files: &[&str]) -> TempDir {
    let data = TempDir::new().expect("temp dir");
    for f in files {
        let path = data.path().join("data").join(f);
        fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        fs::write(path, b"CDF").expect("write data");
    }
    data
}

#[test]
fn test_scan_filter_excludes_private_data() {
    let content = TempDir::new().expect("temp dir");
    let data = data_tree(&["public.nc", "private_data.nc"]);
    let manager = scan_catalog(
        content.path(),
        data.path(),
        r#"<filter><exclude wildcard="private*"/></filter>"#,
    );

    let catalog = manager
        .get_catalog("thredds/data/catalog.xml")
        .expect("lookup")
        .expect("dynamic catalog");
    assert_eq!(
        catalog.source(),
        CatalogSource::DynamicBes {
            resource_id: "/data/".to_string()
        }
    );
    let doc = catalog.processed_document().expect("processed");
    assert_eq!(entry_names(&doc), vec!["public.nc"]);

    // registered beneath the owning catalog
    assert_eq!(manager.children_of("thredds/catalog.xml"), vec!["thredds/data/catalog.xml"]);
    assert_eq!(manager.metrics().snapshot().dynamic_loads, 1);
    manager.get_catalog("thredds/data/catalog.xml").expect("lookup");
    assert_eq!(manager.metrics().snapshot().hits, 1);

    manager.purge_catalog("thredds/catalog.xml");
    assert!(!manager.contains("thredds/data/catalog.xml"));
}

#[test]
fn test_scan_ignores_keys_that_are_not_catalog_documents() {
    let content = TempDir::new().expect("temp dir");
    let data = data_tree(&["a.nc"]);
    let manager = scan_catalog(content.path(), data.path(), "");

    for key in ["thredds/data/junk1.xml", "thredds/data/junk2.xml", "thredds/data/a.nc"] {
        assert!(manager.get_catalog(key).expect("lookup").is_none());
    }
    assert_eq!(manager.keys(), vec!["thredds/catalog.xml"]);
    assert!(manager.children_of("thredds/catalog.xml").is_empty());
    assert_eq!(manager.metrics().snapshot().misses, 3);
    assert_eq!(manager.metrics().snapshot().dynamic_loads, 0);

    assert!(manager
        .get_catalog("thredds/data/catalog.xml")
        .expect("lookup")
        .is_some());
    assert_eq!(manager.keys().len(), 2);
}

#[test]
fn test_scan_sort_and_inherited_metadata() {
    let content = TempDir::new().expect("temp dir");
    let data = data_tree(&["sst/a.nc", "sst/C.nc", "sst/b.nc"]);
    let manager = scan_catalog(
        content.path(),
        data.path(),
        r#"<metadata inherited="true"><serviceName>dap</serviceName><publisher>Ocean Lab</publisher></metadata>
           <sort><lexigraphicByName increasing="false"/></sort>"#,
    );

    let catalog = manager
        .get_catalog("thredds/data/sst/catalog.xml")
        .expect("lookup")
        .expect("dynamic catalog");
    let doc = catalog.processed_document().expect("processed");
    assert_eq!(entry_names(&doc), vec!["C.nc", "b.nc", "a.nc"]);

    let top = doc.root.child(THREDDS_NS, DATASET).expect("top dataset");
    let metadata: Vec<_> = top.children_named(THREDDS_NS, "metadata").collect();
    // the scan's own block, not repeated by the inherited lookup
    assert_eq!(metadata.len(), 1);
    assert!(metadata[0].child(THREDDS_NS, "publisher").is_some());
}

#[test]
fn test_scan_lookup_of_missing_resource_fails() {
    let content = TempDir::new().expect("temp dir");
    let data = data_tree(&["a.nc"]);
    let manager = scan_catalog(content.path(), data.path(), "");

    let err = manager
        .get_catalog("thredds/data/nope/catalog.xml")
        .expect_err("BES reports a missing resource");
    assert!(!err.is_configuration_error());
    assert!(!manager.contains("thredds/data/nope/catalog.xml"));
    assert_eq!(manager.metrics().snapshot().dynamic_load_failures, 1);
}

#[test]
fn test_dynamic_reload_picks_up_new_files() {
    let content = TempDir::new().expect("temp dir");
    let data = data_tree(&["a.nc"]);
    let manager = scan_catalog(content.path(), data.path(), "");
    let key = "thredds/data/catalog.xml";

    let catalog = manager.get_catalog(key).expect("lookup").expect("dynamic");
    assert!(!catalog.needs_refresh());
    assert_eq!(entry_names(&catalog.processed_document().expect("doc")), vec!["a.nc"]);

    fs::write(data.path().join("data/b.nc"), b"CDF").expect("write");
    // still the first listing until reloaded
    assert_eq!(entry_names(&catalog.processed_document().expect("doc")).len(), 1);

    assert!(manager.reload_catalog(key).expect("reload"));
    assert_eq!(
        entry_names(&catalog.processed_document().expect("doc")),
        vec!["a.nc", "b.nc"]
    );
    assert!(manager.last_modified(key) <= chrono::Utc::now());
}

#[test]
fn test_destroy_releases_everything() {
    let content = TempDir::new().expect("temp dir");
    let data = data_tree(&["a.nc"]);
    let manager = scan_catalog(content.path(), data.path(), "");
    let dynamic = manager
        .get_catalog("thredds/data/catalog.xml")
        .expect("lookup")
        .expect("dynamic");

    manager.destroy();
    assert!(manager.keys().is_empty());
    assert_eq!(manager.scan_count(), 0);
    assert!(dynamic.processed_document().is_err());
}
