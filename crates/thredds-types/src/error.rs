//! Error taxonomy shared by every catalog crate.
//!
//! Variants are grouped into three coarse [`ErrorKind`]s so a hosting layer can
//! decide between "not found", "bad configuration" and "try again later"
//! without inspecting messages.

use std::fmt;
use std::path::PathBuf;

/// Result alias used throughout the catalog crates.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Coarse classification of a [`CatalogError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The catalog/scan definition itself is wrong. Retrying will not help.
    Configuration,
    /// An upstream source (BES, disk, a fetched document) failed.
    Upstream,
    /// The registries are in a state that should be impossible.
    Internal,
}

/// Errors raised while building, loading or registering catalogs.
#[derive(Debug)]
pub enum CatalogError {
    /// A required attribute is missing or a pattern does not compile.
    BadConfiguration {
        /// What was being configured (e.g. "filter", "catalog.xml")
        context: String,
        /// Human-readable detail
        message: String,
    },

    /// Reading a catalog file failed.
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A document could not be parsed.
    Xml {
        /// Where the document came from
        context: String,
        /// Parser message
        message: String,
    },

    /// The BES (or another external capability) failed or returned an error document.
    Upstream {
        /// Resource that was requested
        resource: String,
        /// Error detail, including the BES error text when available
        message: String,
    },

    /// The catalog registries disagree with each other.
    InvalidState {
        /// Description of the inconsistency
        message: String,
    },

    /// A catalogRef chain leads back to one of its own ancestors.
    CycleDetected {
        /// The key that closed the cycle
        catalog_key: String,
        /// Ancestor chain, root first
        chain: Vec<String>,
    },

    /// The catalog's buffers were released and cannot be rebuilt.
    Destroyed {
        /// Key of the destroyed catalog
        catalog_key: String,
    },
}

impl CatalogError {
    /// Shorthand for a [`CatalogError::BadConfiguration`].
    pub fn config(context: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::BadConfiguration {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`CatalogError::Xml`].
    pub fn xml(context: impl Into<String>, message: impl fmt::Display) -> Self {
        CatalogError::Xml {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a [`CatalogError::Upstream`].
    pub fn upstream(resource: impl Into<String>, message: impl fmt::Display) -> Self {
        CatalogError::Upstream {
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a [`CatalogError::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        CatalogError::InvalidState {
            message: message.into(),
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::BadConfiguration { .. } | CatalogError::CycleDetected { .. } => {
                ErrorKind::Configuration
            }
            CatalogError::Io { .. }
            | CatalogError::Xml { .. }
            | CatalogError::Upstream { .. }
            | CatalogError::Destroyed { .. } => ErrorKind::Upstream,
            CatalogError::InvalidState { .. } => ErrorKind::Internal,
        }
    }

    /// True for errors that stem from a bad catalog or scan definition.
    pub fn is_configuration_error(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::BadConfiguration { context, message } => {
                write!(f, "bad configuration ({}): {}", context, message)
            }
            CatalogError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            CatalogError::Xml { context, message } => {
                write!(f, "failed to parse XML from {}: {}", context, message)
            }
            CatalogError::Upstream { resource, message } => {
                write!(f, "upstream failure for '{}': {}", resource, message)
            }
            CatalogError::InvalidState { message } => {
                write!(f, "invalid catalog registry state: {}", message)
            }
            CatalogError::CycleDetected { catalog_key, chain } => {
                write!(
                    f,
                    "catalog '{}' references one of its ancestors ({} -> {})",
                    catalog_key,
                    chain.join(" -> "),
                    catalog_key
                )
            }
            CatalogError::Destroyed { catalog_key } => {
                write!(f, "catalog '{}' has been destroyed", catalog_key)
            }
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            CatalogError::config("filter", "bad regex").kind(),
            ErrorKind::Configuration
        );
        assert!(CatalogError::CycleDetected {
            catalog_key: "a/catalog.xml".into(),
            chain: vec!["catalog.xml".into()],
        }
        .is_configuration_error());
        assert_eq!(
            CatalogError::upstream("/data", "BES said no").kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            CatalogError::invalid_state("children without catalog").kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_cycle_message_names_chain() {
        let err = CatalogError::CycleDetected {
            catalog_key: "a/catalog.xml".into(),
            chain: vec!["catalog.xml".into(), "a/catalog.xml".into(), "b/catalog.xml".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("catalog.xml -> a/catalog.xml -> b/catalog.xml -> a/catalog.xml"));
    }
}
