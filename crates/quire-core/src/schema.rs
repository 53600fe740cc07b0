//! Parsed document representation.
//!
//! The engine treats a schema as opaque content with one exception:
//! link and image elements, whose urls it rewrites when paths change.
//! Elements are addressed by the child-index path from the root.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The kind of element in a document tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Document,
    Heading { level: u8 },
    Paragraph,
    Quote,
    /// `marker` is the literal list prefix including indentation, e.g. `"  - "`.
    ListItem { marker: String },
    CodeBlock { lang: String },
    Text,
    Link,
    Image,
}

/// One element of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub kind: ElementKind,

    /// Literal text: code for code blocks, label for links, alt for images.
    pub text: String,

    /// Raw reference as written in the source, links and images only.
    pub url: Option<String>,

    pub children: Vec<Element>,
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            text: String::new(),
            url: None,
            children: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::new(ElementKind::Text)
        }
    }

    /// Builder pattern: set literal text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Builder pattern: set url.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Builder pattern: set children.
    pub fn with_children(mut self, children: Vec<Element>) -> Self {
        self.children = children;
        self
    }

    /// Whether this element carries a reference.
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, ElementKind::Link | ElementKind::Image)
    }
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub root: Element,
}

impl Default for Schema {
    fn default() -> Self {
        Self::empty()
    }
}

impl Schema {
    /// The fallback document used when parsing fails.
    pub fn empty() -> Self {
        Self {
            root: Element::new(ElementKind::Document),
        }
    }

    pub fn from_blocks(blocks: Vec<Element>) -> Self {
        Self {
            root: Element::new(ElementKind::Document).with_children(blocks),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Looks up the element at a structural address.
    pub fn get(&self, address: &[usize]) -> Option<&Element> {
        let mut current = &self.root;
        for &i in address {
            current = current.children.get(i)?;
        }
        Some(current)
    }

    /// Mutable lookup at a structural address.
    pub fn get_mut(&mut self, address: &[usize]) -> Option<&mut Element> {
        let mut current = &mut self.root;
        for &i in address {
            current = current.children.get_mut(i)?;
        }
        Some(current)
    }

    /// Visits every link and image element with its address, depth first.
    pub fn references(&self) -> Vec<(Vec<usize>, &Element)> {
        let mut found = Vec::new();
        let mut address = Vec::new();
        collect_references(&self.root, &mut address, &mut found);
        found
    }
}

fn collect_references<'a>(
    element: &'a Element,
    address: &mut Vec<usize>,
    found: &mut Vec<(Vec<usize>, &'a Element)>,
) {
    if element.is_reference() {
        found.push((address.clone(), element));
    }
    for (i, child) in element.children.iter().enumerate() {
        address.push(i);
        collect_references(child, address, found);
        address.pop();
    }
}

/// A local reference from a document to another path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Child-index path from the schema root to the link or image element.
    pub address: Vec<usize>,

    /// Absolute path the reference currently resolves to.
    pub target_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::from_blocks(vec![Element::new(ElementKind::Paragraph).with_children(vec![
            Element::text("see "),
            Element::new(ElementKind::Link)
                .with_text("b")
                .with_url("./b.md"),
        ])])
    }

    #[test]
    fn test_get_by_address() {
        let schema = sample();
        let link = schema.get(&[0, 1]).unwrap();
        assert_eq!(link.url.as_deref(), Some("./b.md"));
        assert!(schema.get(&[0, 5]).is_none());
        assert_eq!(schema.get(&[]).unwrap().kind, ElementKind::Document);
    }

    #[test]
    fn test_references_reports_addresses() {
        let schema = sample();
        let refs = schema.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, vec![0, 1]);
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut schema = sample();
        schema.get_mut(&[0, 1]).unwrap().url = Some("../b.md".into());
        assert_eq!(schema.get(&[0, 1]).unwrap().url.as_deref(), Some("../b.md"));
    }
}
