//! Rules a dataset scan applies to a BES directory listing.
//!
//! All of these are built once from the `datasetScan` configuration and are
//! immutable afterwards, so they can be shared freely between load passes.

pub mod filter;
pub mod namer;
pub mod proxy;
pub mod sorted;
pub mod time_coverage;

pub use filter::{Clude, Filter};
pub use namer::{MatchTarget, NameRule, Namer};
pub use proxy::{Proxy, ProxySettings};
pub use sorted::SortedDatasets;
pub use time_coverage::{TimeCoverage, TimeCoverageInjector};
