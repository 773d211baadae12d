//! Case-insensitive, name-ordered collection of catalog entries.

use std::collections::BTreeMap;

use thredds_types::Element;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct NameKey {
    folded: String,
    exact: String,
}

impl NameKey {
    fn new(name: &str) -> Self {
        Self {
            folded: name.to_lowercase(),
            exact: name.to_string(),
        }
    }
}

/// Entries ordered by name ignoring case. Names that differ only by case are
/// both kept, ordered by their exact spelling; re-inserting an identical name
/// replaces the earlier entry.
#[derive(Debug, Clone, Default)]
pub struct SortedDatasets {
    entries: BTreeMap<NameKey, Element>,
}

impl SortedDatasets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, element: Element) -> Option<Element> {
        self.entries.insert(NameKey::new(name), element)
    }

    pub fn get(&self, name: &str) -> Option<&Element> {
        self.entries.get(&NameKey::new(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in ascending order.
    pub fn names(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.entries.keys().map(|k| k.exact.as_str())
    }

    /// `(name, element)` pairs in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &Element)> {
        self.entries.iter().map(|(k, v)| (k.exact.as_str(), v))
    }

    /// Consume into elements, ascending or descending.
    pub fn into_ordered(self, ascending: bool) -> Vec<Element> {
        let values = self.entries.into_values();
        if ascending {
            values.collect()
        } else {
            values.rev().collect()
        }
    }
}

impl FromIterator<(String, Element)> for SortedDatasets {
    fn from_iter<I: IntoIterator<Item = (String, Element)>>(iter: I) -> Self {
        let mut sorted = Self::new();
        for (name, element) in iter {
            sorted.insert(&name, element);
        }
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(n: &str) -> (String, Element) {
        (n.to_string(), Element::new("dataset").with_attr("name", n))
    }

    #[test]
    fn test_case_insensitive_order() {
        let sorted: SortedDatasets = ["b.nc", "C.nc", "a.nc", "B2.nc"]
            .into_iter()
            .map(named)
            .collect();
        let names: Vec<_> = sorted.names().collect();
        assert_eq!(names, vec!["a.nc", "b.nc", "B2.nc", "C.nc"]);
        let desc: Vec<_> = sorted
            .into_ordered(false)
            .into_iter()
            .map(|e| e.attr("name").unwrap_or_default().to_string())
            .collect();
        assert_eq!(desc, vec!["C.nc", "B2.nc", "b.nc", "a.nc"]);
    }

    #[test]
    fn test_case_variants_are_both_kept() {
        let sorted: SortedDatasets = ["Data.nc", "data.nc"].into_iter().map(named).collect();
        assert_eq!(sorted.len(), 2);
        let names: Vec<_> = sorted.names().collect();
        assert_eq!(names, vec!["Data.nc", "data.nc"]);
    }
}
