//! Include/exclude rules applied to the entries of a dynamic catalog.
//!
//! A `<filter>` holds any number of `<include>` and `<exclude>` children:
//!
//! ```xml
//! <filter>
//!   <include wildcard="*.nc"/>
//!   <exclude regExp="^\..*" atomic="true" collection="true"/>
//! </filter>
//! ```
//!
//! Every rule is consulted and the results are combined with AND. A rule
//! "hits" an entry when all of its configured patterns match the name and the
//! rule applies to the entry's kind (`atomic` for datasets, `collection` for
//! catalogRefs). A hit yields `!exclude`; anything else yields `exclude`. So
//! an include rule rejects every entry it does not hit, and an exclude rule
//! passes every entry it does not hit.

use regex::Regex;
use thredds_types::thredds::{parse_bool, FILTER, THREDDS_NS};
use thredds_types::{CatalogError, Element, Result};

/// One `<include>` or `<exclude>` rule.
#[derive(Debug, Clone)]
pub struct Clude {
    wildcard: Option<Regex>,
    regexp: Option<Regex>,
    applies_to_atomic: bool,
    applies_to_collection: bool,
    exclude: bool,
}

impl Clude {
    /// Build a rule. Patterns are matched against the whole name.
    pub fn new(
        wildcard: Option<&str>,
        regexp: Option<&str>,
        applies_to_atomic: bool,
        applies_to_collection: bool,
        exclude: bool,
    ) -> Result<Self> {
        let wildcard = wildcard
            .map(|w| compile_anchored(&wildcard_to_regex(w)))
            .transpose()?;
        let regexp = regexp.map(compile_anchored).transpose()?;
        Ok(Self {
            wildcard,
            regexp,
            applies_to_atomic,
            applies_to_collection,
            exclude,
        })
    }

    /// Build a rule from an `<include>` or `<exclude>` element.
    pub fn from_element(el: &Element) -> Result<Self> {
        Self::new(
            el.attr("wildcard"),
            el.attr("regExp"),
            parse_bool(el.attr("atomic"), true),
            parse_bool(el.attr("collection"), false),
            el.name == "exclude",
        )
    }

    fn name_matches(&self, name: &str) -> bool {
        self.wildcard.as_ref().map_or(true, |r| r.is_match(name))
            && self.regexp.as_ref().map_or(true, |r| r.is_match(name))
    }

    fn applies_to(&self, is_collection: bool) -> bool {
        if is_collection {
            self.applies_to_collection
        } else {
            self.applies_to_atomic
        }
    }

    /// This rule's verdict for one entry.
    pub fn include(&self, name: &str, is_collection: bool) -> bool {
        if self.name_matches(name) && self.applies_to(is_collection) {
            !self.exclude
        } else {
            self.exclude
        }
    }

    pub fn is_exclude(&self) -> bool {
        self.exclude
    }
}

/// The conjunction of a scan's filter rules. An empty filter includes everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    rules: Vec<Clude>,
}

impl Filter {
    pub fn new(rules: Vec<Clude>) -> Self {
        Self { rules }
    }

    /// Build from an optional `<filter>` element.
    pub fn from_config(filter: Option<&Element>) -> Result<Self> {
        let Some(filter) = filter else {
            return Ok(Self::default());
        };
        if !filter.is(THREDDS_NS, FILTER) {
            return Err(CatalogError::config(
                "filter",
                format!("expected a <filter> element, found <{}>", filter.name),
            ));
        }
        let rules = filter
            .elements()
            .filter(|e| e.name == "include" || e.name == "exclude")
            .map(Clude::from_element)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn include(&self, name: &str, is_collection: bool) -> bool {
        self.rules.iter().all(|r| r.include(name, is_collection))
    }

    pub fn rules(&self) -> &[Clude] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Translate a `*` wildcard into a regular expression. Everything other than
/// `*` is matched literally.
fn wildcard_to_regex(wildcard: &str) -> String {
    wildcard
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

fn compile_anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| CatalogError::config("filter", format!("bad pattern '{}': {}", pattern, e)))
}
