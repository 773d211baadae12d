//! Derives a `timeCoverage` for a dataset from its name or path.
//!
//! ```xml
//! <addTimeCoverage datasetNameMatchPattern="([0-9]{4})([0-9]{2})([0-9]{2})\.nc$"
//!                  startTimeSubstitutionPattern="$1-$2-$3T00:00:00"
//!                  duration="1 day"/>
//! ```

use regex::Regex;
use thredds_types::paths::path_append;
use thredds_types::thredds::{thredds, TIME_COVERAGE};
use thredds_types::{CatalogError, Element, Result};

use crate::namer::{convert_template, substitute_first_match};

/// A computed coverage: a start time and a duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeCoverage {
    pub start: String,
    pub duration: String,
}

impl TimeCoverage {
    /// `<timeCoverage><start/><duration/></timeCoverage>`
    pub fn to_element(&self) -> Element {
        thredds(TIME_COVERAGE)
            .with_child(thredds("start").with_text(self.start.clone()))
            .with_child(thredds("duration").with_text(self.duration.clone()))
    }
}

#[derive(Debug, Clone)]
enum Subject {
    Name(Regex),
    Path(Regex),
}

#[derive(Debug, Clone)]
struct Configured {
    subject: Subject,
    start_template: String,
    duration: String,
}

/// Time-coverage rule of a dataset scan. Unconfigured injectors never produce anything.
#[derive(Debug, Clone, Default)]
pub struct TimeCoverageInjector {
    rule: Option<Configured>,
    catalog_path: String,
}

impl TimeCoverageInjector {
    /// An injector that never produces a coverage.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build from an optional `<addTimeCoverage>` element.
    ///
    /// A name pattern takes precedence over a path pattern. Missing pieces
    /// leave the injector disabled; a pattern that does not compile is an error.
    pub fn from_config(config: Option<&Element>, catalog_path: &str) -> Result<Self> {
        let Some(config) = config else {
            return Ok(Self::disabled());
        };
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| {
                CatalogError::config("addTimeCoverage", format!("bad pattern '{}': {}", p, e))
            })
        };
        let subject = match (
            config.attr("datasetNameMatchPattern"),
            config.attr("datasetPathMatchPattern"),
        ) {
            (Some(name), _) => Some(Subject::Name(compile(name)?)),
            (None, Some(path)) => Some(Subject::Path(compile(path)?)),
            (None, None) => None,
        };
        let start = config.attr("startTimeSubstitutionPattern");
        let duration = config.attr("duration");

        let rule = match (subject, start, duration) {
            (Some(subject), Some(start), Some(duration)) => Some(Configured {
                subject,
                start_template: convert_template(start),
                duration: duration.to_string(),
            }),
            _ => {
                tracing::debug!("addTimeCoverage is incomplete; time coverage disabled");
                None
            }
        };
        Ok(Self {
            rule,
            catalog_path: catalog_path.to_string(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.rule.is_some()
    }

    /// Coverage for the dataset called `name`, if the rule matches.
    pub fn get_time_coverage(&self, name: &str) -> Option<TimeCoverage> {
        let rule = self.rule.as_ref()?;
        let start = match &rule.subject {
            Subject::Name(re) => substitute_first_match(re, &rule.start_template, name),
            Subject::Path(re) => substitute_first_match(
                re,
                &rule.start_template,
                &path_append(&self.catalog_path, name),
            ),
        }?;
        Some(TimeCoverage {
            start,
            duration: rule.duration.clone(),
        })
    }
}
