//! Load fly-scan layout configuration XML into an owned document tree.
//!
//! The structure parser needs to walk the document several times and to
//! resolve an element's parent group by node identity, so this crate keeps
//! the whole document in memory as an arena of [`Element`] nodes, each
//! addressed by a stable [`NodeId`] assigned in document order.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

pub mod schema;

pub use schema::{Schema, SchemaViolation};

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("xml: {0}")]
    Xml(String),
    #[error("invalid document: {0}")]
    Invalid(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable handle of an element within its [`Document`], assigned in
/// document (pre-)order during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the element in document order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One XML element with its attributes, text content and tree links.
#[derive(Debug, Clone)]
pub struct Element {
    pub id: NodeId,
    pub tag: String,
    /// Attributes in declaration order.
    pub attributes: Vec<(String, String)>,
    /// Concatenated, trimmed character data directly inside this element.
    pub text: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Element {
    /// Value of the named attribute, if declared.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// An owned XML document: an element arena plus the root handle.
#[derive(Debug)]
pub struct Document {
    elements: Vec<Element>,
}

impl Document {
    /// Parse an XML string into a document tree.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();

        let mut elements: Vec<Element> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(event)) => {
                    let id = push_element(&mut elements, &stack, &event)?;
                    stack.push(id);
                }
                Ok(Event::Empty(event)) => {
                    push_element(&mut elements, &stack, &event)?;
                }
                Ok(Event::Text(event)) => {
                    let text = event
                        .unescape()
                        .map_err(|err| XmlError::Xml(err.to_string()))?;
                    if let Some(&current) = stack.last() {
                        let element = &mut elements[current.0];
                        match &mut element.text {
                            Some(existing) => {
                                existing.push(' ');
                                existing.push_str(text.trim());
                            }
                            None => element.text = Some(text.trim().to_string()),
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Eof) => break,
                Err(err) => return Err(XmlError::Xml(err.to_string())),
                _ => {}
            }
            buf.clear();
        }

        if elements.is_empty() {
            return Err(XmlError::Invalid("document has no root element".into()));
        }
        if !stack.is_empty() {
            return Err(XmlError::Invalid("unclosed element at end of input".into()));
        }
        debug!(elements = elements.len(), "parsed xml document");
        Ok(Document { elements })
    }

    /// Read and parse an XML file.
    pub fn from_file(path: &Path) -> Result<Self, XmlError> {
        let xml = std::fs::read_to_string(path)?;
        Self::parse(&xml)
    }

    /// The document root element.
    pub fn root(&self) -> &Element {
        // parse() rejects empty documents, element 0 is always the root
        &self.elements[0]
    }

    /// Look an element up by its handle.
    pub fn get(&self, id: NodeId) -> &Element {
        &self.elements[id.0]
    }

    /// Direct children of an element, in declaration order.
    pub fn children<'a>(&'a self, element: &'a Element) -> impl Iterator<Item = &'a Element> {
        element.children.iter().map(move |id| self.get(*id))
    }

    /// First direct child with the given tag.
    pub fn child_with_tag<'a>(&'a self, element: &'a Element, tag: &str) -> Option<&'a Element> {
        self.children(element).find(|child| child.tag == tag)
    }

    /// All elements with the given tag, in document order.
    pub fn elements_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements.iter().filter(move |element| element.tag == tag)
    }

    /// All elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    /// Path of tags from the root down to the element, for diagnostics.
    pub fn tag_path(&self, element: &Element) -> String {
        let mut tags = vec![element.tag.as_str()];
        let mut cursor = element.parent;
        while let Some(id) = cursor {
            let parent = self.get(id);
            tags.push(parent.tag.as_str());
            cursor = parent.parent;
        }
        tags.reverse();
        format!("/{}", tags.join("/"))
    }
}

fn push_element(
    elements: &mut Vec<Element>,
    stack: &[NodeId],
    event: &BytesStart<'_>,
) -> Result<NodeId, XmlError> {
    let id = NodeId(elements.len());
    let tag = String::from_utf8_lossy(event.name().as_ref()).to_string();
    let mut attributes = Vec::new();
    for attr in event.attributes() {
        let attr = attr.map_err(|err| XmlError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| XmlError::Xml(err.to_string()))?
            .to_string();
        attributes.push((key, value));
    }
    let parent = stack.last().copied();
    if let Some(parent_id) = parent {
        elements[parent_id.0].children.push(id);
    } else if !elements.is_empty() {
        return Err(XmlError::Invalid(format!(
            "unexpected second root element <{tag}>"
        )));
    }
    elements.push(Element {
        id,
        tag,
        attributes,
        text: None,
        parent,
        children: Vec::new(),
    });
    Ok(id)
}
