//! Web service handlers advertised in THREDDS catalogs.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thredds_types::thredds::service_element;
use thredds_types::Element;

/// Well-known id of the DAP service. BES datasets reference it by this id.
pub const DAP_SERVICE_ID: &str = "dap";
/// Well-known id of the direct file-download service.
pub const FILE_SERVICE_ID: &str = "file";

/// A service that can serve catalog datasets.
pub trait WebServiceHandler: Send + Sync {
    fn service_id(&self) -> &str;

    /// THREDDS `serviceType` (e.g. `OPeNDAP`, `HTTPServer`).
    fn thredds_service_type(&self) -> &str;

    fn base(&self) -> &str;

    /// `urlPath` for an `access` element, relative to [`WebServiceHandler::base`].
    fn thredds_url_path(&self, dataset_id: &str) -> String;

    /// `<service>` element describing this handler.
    fn thredds_service(&self) -> Element {
        service_element(self.service_id(), self.thredds_service_type(), self.base())
    }
}

/// A handler described entirely by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleWebService {
    pub id: String,
    pub service_type: String,
    pub base: String,
    /// Appended to every dataset url path (e.g. `.html`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_suffix: Option<String>,
}

impl SimpleWebService {
    pub fn new(id: &str, service_type: &str, base: &str) -> Self {
        Self {
            id: id.to_string(),
            service_type: service_type.to_string(),
            base: base.to_string(),
            url_suffix: None,
        }
    }

    /// Default DAP service rooted at `base`.
    pub fn dap(base: &str) -> Self {
        Self::new(DAP_SERVICE_ID, "OPeNDAP", base)
    }

    /// Default file-download service rooted at `base`.
    pub fn file(base: &str) -> Self {
        Self::new(FILE_SERVICE_ID, "HTTPServer", base)
    }
}

impl WebServiceHandler for SimpleWebService {
    fn service_id(&self) -> &str {
        &self.id
    }

    fn thredds_service_type(&self) -> &str {
        &self.service_type
    }

    fn base(&self) -> &str {
        &self.base
    }

    fn thredds_url_path(&self, dataset_id: &str) -> String {
        let path = dataset_id.trim_start_matches('/');
        match &self.url_suffix {
            Some(suffix) => format!("{}{}", path, suffix),
            None => path.to_string(),
        }
    }
}

/// Process-wide list of web service handlers, in registration order.
#[derive(Default)]
pub struct ServiceRegistry {
    handlers: RwLock<Vec<Arc<dyn WebServiceHandler>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler with the same id in place.
    pub fn register(&self, handler: Arc<dyn WebServiceHandler>) {
        let mut handlers = self.handlers.write();
        match handlers
            .iter_mut()
            .find(|h| h.service_id() == handler.service_id())
        {
            Some(slot) => *slot = handler,
            None => handlers.push(handler),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn WebServiceHandler>> {
        self.handlers
            .read()
            .iter()
            .find(|h| h.service_id() == id)
            .cloned()
    }

    pub fn handlers(&self) -> Vec<Arc<dyn WebServiceHandler>> {
        self.handlers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self
            .handlers
            .read()
            .iter()
            .map(|h| h.service_id().to_string())
            .collect();
        f.debug_struct("ServiceRegistry").field("handlers", &ids).finish()
    }
}
