//! Owned, namespace-aware XML tree.
//!
//! Documents are parsed with `roxmltree` (a read-only DOM) and copied into the
//! owned [`Element`] tree below, which the catalog load pass builds and
//! rearranges freely. Serialization is done here: it tracks the namespace
//! bindings in scope and only emits the `xmlns` declarations a subtree needs,
//! so elements cloned from one document can be grafted into another.

use std::fmt;
use std::io::Write;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Failure to parse a document.
#[derive(Debug, Clone)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

/// An attribute, optionally namespace qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with its attributes, declared namespaces and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Prefix used when writing the element; `None` means the default namespace.
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    /// `xmlns` declarations made on this element in the source document.
    pub namespaces: Vec<(Option<String>, String)>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    /// Element with no namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Element in `namespace`, written with the default-namespace form.
    pub fn new_ns(namespace: &str, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder form of [`Element::set_attr`].
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder form of [`Element::push`].
    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    /// Builder form of [`Element::push_text`].
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// True when this element has the given namespace and local name.
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an unqualified attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Value of a namespace-qualified attribute.
    pub fn attr_ns(&self, namespace: &str, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set (or replace) an unqualified attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.namespace.is_none() && a.name == name)
        {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute {
                prefix: None,
                namespace: None,
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Set (or replace) a namespace-qualified attribute.
    pub fn set_attr_ns(&mut self, prefix: &str, namespace: &str, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.name == name)
        {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute {
                prefix: Some(prefix.to_string()),
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Remove an unqualified attribute, returning its value.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self
            .attributes
            .iter()
            .position(|a| a.namespace.is_none() && a.name == name)?;
        Some(self.attributes.remove(idx).value)
    }

    /// Direct element children.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Direct element children, mutably.
    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First direct child with the given name.
    pub fn child(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(namespace, name))
    }

    /// First direct child with the given name, mutably.
    pub fn child_mut(&mut self, namespace: &str, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.is(namespace, name))
    }

    /// All direct children with the given name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.is(namespace, name))
    }

    /// Every element below this one in document order, excluding `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        let mut stack: Vec<&Element> = self.elements().collect();
        stack.reverse();
        Descendants { stack }
    }

    /// True if any element below this one has the given name.
    pub fn has_descendant(&self, namespace: &str, name: &str) -> bool {
        self.descendants().any(|e| e.is(namespace, name))
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Direct text content with surrounding whitespace removed.
    pub fn text_trim(&self) -> String {
        self.text().trim().to_string()
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    /// Insert an element child at a node index (clamped to the end).
    pub fn insert(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, Node::Element(child));
    }

    /// Remove and return the element children matching `pred`, keeping the rest in order.
    pub fn drain_elements<F>(&mut self, mut pred: F) -> Vec<Element>
    where
        F: FnMut(&Element) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(self.children.len());
        for node in std::mem::take(&mut self.children) {
            match node {
                Node::Element(e) if pred(&e) => taken.push(e),
                other => kept.push(other),
            }
        }
        self.children = kept;
        taken
    }
}

/// Pre-order iterator returned by [`Element::descendants`].
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        let start = self.stack.len();
        self.stack.extend(next.elements());
        self.stack[start..].reverse();
        Some(next)
    }
}

/// A whole XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Parse a document from text. Comments, processing instructions and
    /// whitespace-only text are dropped.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let opts = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, opts)
            .map_err(|e| ParseError(e.to_string()))?;
        Ok(Self {
            root: convert(doc.root_element()),
        })
    }

    /// Parse a UTF-8 encoded document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ParseError(format!("document is not valid UTF-8: {}", e)))?;
        Self::parse(text.trim_start_matches('\u{feff}'))
    }

    /// Pretty-printed serialization with an XML declaration.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let mut scope = Vec::new();
        write_element(&mut out, &self.root, &mut scope, 0, true);
        out.push('\n');
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml_string().into_bytes()
    }

    /// Serialize into `sink`.
    pub fn write_to(&self, sink: &mut dyn Write) -> std::io::Result<()> {
        sink.write_all(self.to_xml_string().as_bytes())
    }
}

fn convert(node: roxmltree::Node<'_, '_>) -> Element {
    let in_scope: Vec<(Option<&str>, &str)> = node
        .namespaces()
        .filter(|ns| !ns.uri().is_empty())
        .map(|ns| (ns.name(), ns.uri()))
        .collect();
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();

    let namespaces = in_scope
        .iter()
        .filter(|b| b.0 != Some("xml") && !inherited.contains(b))
        .map(|(p, u)| (p.map(str::to_string), u.to_string()))
        .collect();

    let tag = node.tag_name();
    let namespace = tag.namespace().map(str::to_string);
    let prefix = namespace
        .as_deref()
        .and_then(|uri| element_prefix(&in_scope, uri));

    let attributes = node
        .attributes()
        .map(|a| Attribute {
            prefix: a.namespace().and_then(|uri| attribute_prefix(&in_scope, uri)),
            namespace: a.namespace().map(str::to_string),
            name: a.name().to_string(),
            value: a.value().to_string(),
        })
        .collect();

    let mut children = Vec::new();
    for child in node.children() {
        if child.is_element() {
            children.push(Node::Element(convert(child)));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                if !text.trim().is_empty() {
                    children.push(Node::Text(text.to_string()));
                }
            }
        }
    }

    Element {
        prefix,
        namespace,
        name: tag.name().to_string(),
        namespaces,
        attributes,
        children,
    }
}

fn element_prefix(scope: &[(Option<&str>, &str)], uri: &str) -> Option<String> {
    if scope.iter().any(|(p, u)| p.is_none() && *u == uri) {
        return None;
    }
    scope
        .iter()
        .find(|(p, u)| p.is_some() && *u == uri)
        .and_then(|(p, _)| p.map(str::to_string))
}

fn attribute_prefix(scope: &[(Option<&str>, &str)], uri: &str) -> Option<String> {
    if uri == XML_NS {
        return Some("xml".to_string());
    }
    scope
        .iter()
        .find(|(p, u)| p.is_some() && *u == uri)
        .and_then(|(p, _)| p.map(str::to_string))
}

type Scope = Vec<(Option<String>, String)>;

fn resolve<'a>(scope: &'a Scope, prefix: Option<&str>) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, u)| u.as_str())
        .filter(|u| !u.is_empty())
}

fn bind(scope: &mut Scope, decls: &mut Scope, prefix: Option<&str>, uri: &str) {
    if resolve(scope, prefix).unwrap_or("") != uri {
        scope.push((prefix.map(str::to_string), uri.to_string()));
        decls.push((prefix.map(str::to_string), uri.to_string()));
    }
}

fn qualified(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) => format!("{}:{}", p, name),
        None => name.to_string(),
    }
}

fn write_element(out: &mut String, el: &Element, scope: &mut Scope, depth: usize, pretty: bool) {
    let mark = scope.len();
    let mut decls = Scope::new();

    for (prefix, uri) in &el.namespaces {
        bind(scope, &mut decls, prefix.as_deref(), uri);
    }
    match &el.namespace {
        Some(uri) => bind(scope, &mut decls, el.prefix.as_deref(), uri),
        None => bind(scope, &mut decls, None, ""),
    }

    let mut attrs = Vec::with_capacity(el.attributes.len());
    for (i, attr) in el.attributes.iter().enumerate() {
        let prefix = match (&attr.namespace, &attr.prefix) {
            (None, _) => None,
            (Some(_), Some(p)) => Some(p.clone()),
            (Some(_), None) => Some(format!("ns{}", i)),
        };
        if let (Some(uri), Some(p)) = (&attr.namespace, &prefix) {
            if p != "xml" {
                bind(scope, &mut decls, Some(p), uri);
            }
        }
        attrs.push((qualified(prefix.as_deref(), &attr.name), &attr.value));
    }

    let tag = qualified(el.prefix.as_deref().filter(|_| el.namespace.is_some()), &el.name);
    out.push('<');
    out.push_str(&tag);
    for (prefix, uri) in &decls {
        match prefix {
            Some(p) => out.push_str(&format!(" xmlns:{}=\"{}\"", p, escape(uri, true))),
            None => out.push_str(&format!(" xmlns=\"{}\"", escape(uri, true))),
        }
    }
    for (name, value) in attrs {
        out.push_str(&format!(" {}=\"{}\"", name, escape(value, true)));
    }

    if el.children.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        let block = pretty && el.children.iter().all(|n| matches!(n, Node::Element(_)));
        for child in &el.children {
            match child {
                Node::Element(e) => {
                    if block {
                        out.push('\n');
                        out.push_str(&"  ".repeat(depth + 1));
                    }
                    write_element(out, e, scope, depth + 1, block);
                }
                Node::Text(t) => out.push_str(&escape(t, false)),
            }
        }
        if block {
            out.push('\n');
            out.push_str(&"  ".repeat(depth));
        }
        out.push_str("</");
        out.push_str(&tag);
        out.push('>');
    }

    scope.truncate(mark);
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#10;"),
            _ => out.push(c),
        }
    }
    out
}
