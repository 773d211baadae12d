//! THREDDS catalog cache.
//!
//! - [`CatalogManager`]: registry of static catalogs, their catalogRef graph
//!   and the `datasetScan`s that produce dynamic catalogs on demand
//! - [`StaticFileCatalog`] / [`DynamicBesCatalog`]: the two [`Catalog`] kinds
//! - [`InheritedMetadataRegistry`]: metadata handed down by `datasetScan`s
//! - capabilities supplied by the host: [`BesCatalogProvider`],
//!   [`DocumentTransform`], [`WebServiceHandler`]

pub mod bes;
pub mod catalog;
pub mod dataset_scan;
pub mod dynamic_bes;
pub mod inherited;
pub mod manager;
pub mod metrics;
pub mod services;
pub mod static_file;
pub mod transform;

pub use bes::{BesCatalogProvider, BesReply, DirectoryBesProvider};
pub use catalog::{Catalog, CatalogContext, CatalogSource};
pub use dataset_scan::DatasetScan;
pub use dynamic_bes::{DynamicBesCatalog, DynamicCatalogConfig};
pub use inherited::InheritedMetadataRegistry;
pub use manager::CatalogManager;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use services::{ServiceRegistry, SimpleWebService, WebServiceHandler};
pub use static_file::StaticFileCatalog;
pub use transform::{BesToThreddsTransform, DocumentTransform, IdentityTransform};
