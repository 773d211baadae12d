//! "Latest" proxy datasets synthesized from a catalog's entries.
//!
//! ```xml
//! <addProxies>
//!   <simpleLatest name="latest.xml" top="true" serviceName="latest"/>
//!   <latestComplete name="latestComplete.xml" top="false" lastModifiedLimit="60"/>
//! </addProxies>
//! ```

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thredds_types::thredds::{node_name, parse_bool, DATASET, DATE, THREDDS_NS};
use thredds_types::{CatalogError, Element, Result};
use tracing::{debug, error, warn};

use crate::sorted::SortedDatasets;

const DEFAULT_NAME: &str = "latest";
const DEFAULT_SERVICE_NAME: &str = "latest";
const DEFAULT_LAST_MODIFIED_LIMIT_MINUTES: f64 = 60.0;
const THREDDS_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Naming and placement shared by both proxy kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Name given to the proxy dataset.
    pub name: String,
    /// `serviceName` attribute set on the proxy dataset.
    pub service_name: String,
    /// Insert right after the metadata block instead of at the end.
    pub top: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            top: true,
        }
    }
}

impl ProxySettings {
    fn from_element(el: &Element) -> Self {
        Self {
            name: el.attr("name").unwrap_or(DEFAULT_NAME).to_string(),
            service_name: el
                .attr("serviceName")
                .unwrap_or(DEFAULT_SERVICE_NAME)
                .to_string(),
            top: parse_bool(el.attr("top"), true),
        }
    }
}

/// A configured proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum Proxy {
    /// Clone of the dataset with the greatest name.
    SimpleLatest(ProxySettings),
    /// Clone of the dataset with the greatest name among those last modified
    /// longer ago than `last_modified_limit`.
    LatestComplete {
        settings: ProxySettings,
        last_modified_limit: Duration,
    },
}

impl Proxy {
    /// Build the proxies listed in an optional `<addProxies>` element.
    /// Unknown children are ignored.
    pub fn from_config(add_proxies: Option<&Element>) -> Result<Vec<Proxy>> {
        let Some(add_proxies) = add_proxies else {
            return Ok(Vec::new());
        };
        let mut proxies = Vec::new();
        for el in add_proxies.elements() {
            match el.name.as_str() {
                "simpleLatest" => proxies.push(Proxy::SimpleLatest(ProxySettings::from_element(el))),
                "latestComplete" => proxies.push(Proxy::LatestComplete {
                    settings: ProxySettings::from_element(el),
                    last_modified_limit: last_modified_limit(el.attr("lastModifiedLimit"))?,
                }),
                other => debug!("addProxies: ignoring <{}>", other),
            }
        }
        Ok(proxies)
    }

    pub fn settings(&self) -> &ProxySettings {
        match self {
            Proxy::SimpleLatest(settings) => settings,
            Proxy::LatestComplete { settings, .. } => settings,
        }
    }

    pub fn is_top(&self) -> bool {
        self.settings().top
    }

    /// Synthesize the proxy from `datasets` (entries under their original
    /// names). Only `dataset` entries are candidates.
    pub fn get_proxy_dataset(&self, datasets: &SortedDatasets, now: DateTime<Utc>) -> Option<Element> {
        let mut candidates = datasets
            .iter()
            .rev()
            .filter(|(_, e)| e.is(THREDDS_NS, DATASET));

        let source = match self {
            Proxy::SimpleLatest(_) => candidates.next().map(|(_, e)| e),
            Proxy::LatestComplete {
                last_modified_limit,
                ..
            } => candidates
                .find(|(name, e)| match modified_time(e) {
                    Some(lmt) => now.signed_duration_since(lmt) > *last_modified_limit,
                    None => {
                        debug!("latestComplete: '{}' has no usable modified date", name);
                        false
                    }
                })
                .map(|(_, e)| e),
        }?;

        let settings = self.settings();
        let mut proxy = source.clone();
        proxy.set_attr("serviceName", settings.service_name.clone());
        proxy.set_attr("name", settings.name.clone());
        debug!(
            "proxy '{}' synthesized from '{}'",
            settings.name,
            node_name(source).unwrap_or_default()
        );
        Some(proxy)
    }
}

/// The `thredds:date type="modified"` value of a dataset.
fn modified_time(dataset: &Element) -> Option<DateTime<Utc>> {
    let date = dataset
        .children_named(THREDDS_NS, DATE)
        .find(|d| d.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("modified")))?;
    let text = date.text_trim();
    let Some(stamp) = text.get(..19) else {
        warn!("latestComplete: short thredds:date value '{}'", text);
        return None;
    };
    match NaiveDateTime::parse_from_str(stamp, THREDDS_DATE_FORMAT) {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            error!("latestComplete: failed to parse thredds:date '{}': {}", text, e);
            None
        }
    }
}

/// `lastModifiedLimit` in minutes (fractions allowed), as a duration.
fn last_modified_limit(raw: Option<&str>) -> Result<Duration> {
    let bad = |reason: &str| {
        CatalogError::config(
            "latestComplete",
            format!("bad lastModifiedLimit '{}': {}", raw.unwrap_or_default(), reason),
        )
    };
    let minutes = match raw {
        None => DEFAULT_LAST_MODIFIED_LIMIT_MINUTES,
        Some(raw) => raw.trim().parse::<f64>().map_err(|e| bad(&e.to_string()))?,
    };
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(bad("must be a finite, non-negative number of minutes"));
    }
    let millis = minutes * 60_000.0;
    if millis > i64::MAX as f64 {
        return Err(bad("out of range"));
    }
    Duration::try_milliseconds(millis as i64).ok_or_else(|| bad("out of range"))
}
