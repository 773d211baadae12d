//! Shared building blocks for the THREDDS catalog crates.
//!
//! - [`xml`]: owned XML tree with parsing and namespace-aware serialization
//! - [`thredds`]: THREDDS/XLink/BES vocabulary
//! - [`paths`]: slash-separated path joins
//! - [`env_utils`]: environment-variable configuration helpers
//! - [`error`]: the [`CatalogError`] taxonomy

pub mod env_utils;
pub mod error;
pub mod paths;
pub mod thredds;
pub mod xml;

pub use error::{CatalogError, ErrorKind, Result};
pub use xml::{Attribute, Document, Element, Node, ParseError};
