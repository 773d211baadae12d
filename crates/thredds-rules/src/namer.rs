//! Rename rules for dynamic catalog entries.
//!
//! ```xml
//! <namer>
//!   <regExpOnName regExp="([0-9]{4})([0-9]{2})([0-9]{2})" replaceString="Day $1-$2-$3"/>
//!   <regExpOnPath regExp="sst/(.*)\.nc$" replaceString="SST $1"/>
//! </namer>
//! ```

use regex::Regex;
use thredds_types::paths::path_append;
use thredds_types::thredds::{NAMER, THREDDS_NS};
use thredds_types::{CatalogError, Element, Result};

/// What a rename rule is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTarget {
    /// The entry name alone.
    Name,
    /// The catalog path joined with the entry name.
    Path,
}

/// A single rename rule.
#[derive(Debug, Clone)]
pub struct NameRule {
    target: MatchTarget,
    pattern: Regex,
    replacement: String,
}

impl NameRule {
    pub fn new(target: MatchTarget, pattern: &str, replace_string: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| CatalogError::config("namer", format!("bad regExp '{}': {}", pattern, e)))?;
        Ok(Self {
            target,
            pattern,
            replacement: convert_template(replace_string),
        })
    }

    pub fn target(&self) -> MatchTarget {
        self.target
    }

    fn apply(&self, subject: &str) -> Option<String> {
        substitute_first_match(&self.pattern, &self.replacement, subject)
    }
}

/// Ordered rename rules; the first rule that produces a name wins.
#[derive(Debug, Clone, Default)]
pub struct Namer {
    rules: Vec<NameRule>,
    catalog_path: String,
}

impl Namer {
    pub fn new(rules: Vec<NameRule>, catalog_path: impl Into<String>) -> Self {
        Self {
            rules,
            catalog_path: catalog_path.into(),
        }
    }

    /// Build from an optional `<namer>` element.
    pub fn from_config(namer: Option<&Element>, catalog_path: &str) -> Result<Self> {
        let mut rules = Vec::new();
        if let Some(namer) = namer {
            if !namer.is(THREDDS_NS, NAMER) {
                return Err(CatalogError::config(
                    "namer",
                    format!("expected a <namer> element, found <{}>", namer.name),
                ));
            }
            for rule in namer.elements() {
                let target = match rule.name.as_str() {
                    "regExpOnName" => MatchTarget::Name,
                    "regExpOnPath" => MatchTarget::Path,
                    other => {
                        tracing::warn!("namer: ignoring unsupported rule <{}>", other);
                        continue;
                    }
                };
                let pattern = rule.attr("regExp").ok_or_else(|| {
                    CatalogError::config("namer", format!("<{}> is missing regExp", rule.name))
                })?;
                let replace = rule.attr("replaceString").ok_or_else(|| {
                    CatalogError::config("namer", format!("<{}> is missing replaceString", rule.name))
                })?;
                rules.push(NameRule::new(target, pattern, replace)?);
            }
        }
        Ok(Self::new(rules, catalog_path))
    }

    /// New name for `name`, or `None` when no rule applies.
    pub fn get_name(&self, name: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| match rule.target {
            MatchTarget::Name => rule.apply(name),
            MatchTarget::Path => rule.apply(&path_append(&self.catalog_path, name)),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Expand `replacement` against the first match of `pattern` in `subject`.
///
/// Only the expanded template is returned; text around the match is dropped.
/// An empty expansion counts as no match.
pub(crate) fn substitute_first_match(pattern: &Regex, replacement: &str, subject: &str) -> Option<String> {
    let caps = pattern.captures(subject)?;
    let mut out = String::new();
    caps.expand(replacement, &mut out);
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Convert a `$1`/`\$` style replacement template into `regex` expansion syntax.
pub(crate) fn convert_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 4);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('$') => out.push_str("$$"),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            '$' => {
                if chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                    out.push_str("${");
                    while let Some(d) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
                        out.push(d);
                        chars.next();
                    }
                    out.push('}');
                } else {
                    out.push('$');
                }
            }
            _ => out.push(c),
        }
    }
    out
}
