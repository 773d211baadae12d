//! Hyrax THREDDS catalog service.
//!
//! Ties the catalog cache to a configuration and a lifecycle:
//!
//! - [`CatalogServiceConfig`]: JSON file plus `HYRAX_THREDDS_*` overrides
//! - [`CatalogService`]: explicit `init`/`shutdown`, request path to catalog
//!   key mapping, catalog lookup and output
//!
//! The building blocks live in the workspace crates and are re-exported
//! here: [`thredds_types`] (XML model, errors), [`thredds_rules`] (filter,
//! namer, time coverage, proxies) and [`thredds_cache`] (catalogs and the
//! manager).

pub mod config;
pub mod service;

pub use config::CatalogServiceConfig;
pub use service::CatalogService;

pub use thredds_cache;
pub use thredds_rules;
pub use thredds_types;
