//! Validation of a configuration document against the packaged XML Schema.
//!
//! The schema file (`schema/saveFlyData.xsd`) is the single source of truth
//! for the configuration vocabulary, including the declared default of the
//! trigger poll interval. Only the XSD subset the vocabulary uses is
//! interpreted: top-level element declarations with inline complex types,
//! `xs:sequence` / `xs:choice` content models, and `xs:attribute`
//! declarations with `use="required"` or a `default`.
//!
//! Validation never stops at the first problem; the complete violation log
//! is returned so a broken configuration surfaces every complaint at once.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::{Document, Element, XmlError};

/// The packaged schema text, compiled into the binary.
pub const SCHEMA_TEXT: &str = include_str!("../schema/saveFlyData.xsd");

/// One problem found while validating a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Tag path from the document root to the offending element.
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone)]
struct AttributeRule {
    name: String,
    required: bool,
    default: Option<String>,
    kind: AttributeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeKind {
    Text,
    Integer,
    Decimal,
    Boolean,
}

impl AttributeKind {
    fn from_xsd(name: Option<&str>) -> Self {
        match name {
            Some("xs:integer") => AttributeKind::Integer,
            Some("xs:decimal") => AttributeKind::Decimal,
            Some("xs:boolean") => AttributeKind::Boolean,
            _ => AttributeKind::Text,
        }
    }

    fn accepts(self, value: &str) -> bool {
        match self {
            AttributeKind::Text => true,
            AttributeKind::Integer => value.parse::<i64>().is_ok(),
            AttributeKind::Decimal => value.parse::<f64>().is_ok(),
            AttributeKind::Boolean => matches!(
                value.to_ascii_lowercase().as_str(),
                "t" | "true" | "f" | "false" | "1" | "0"
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct ChildRule {
    tag: String,
    min: usize,
    /// `None` means unbounded.
    max: Option<usize>,
}

#[derive(Debug, Clone)]
enum ContentModel {
    /// No element children allowed.
    Empty,
    /// Each listed child tag with its occurrence bounds.
    Sequence(Vec<ChildRule>),
    /// Any of the listed tags, repeated freely.
    Choice(Vec<String>),
}

#[derive(Debug, Clone)]
struct ElementRule {
    attributes: Vec<AttributeRule>,
    content: ContentModel,
    mixed: bool,
}

/// The interpreted schema: element rules keyed by tag.
#[derive(Debug)]
pub struct Schema {
    elements: HashMap<String, ElementRule>,
}

impl Schema {
    /// Interpret the packaged schema.
    pub fn packaged() -> Result<Self, XmlError> {
        Self::from_xsd(SCHEMA_TEXT)
    }

    /// Interpret an XSD document (the supported subset).
    pub fn from_xsd(xsd: &str) -> Result<Self, XmlError> {
        let doc = Document::parse(xsd)?;
        let root = doc.root();
        if root.tag != "xs:schema" {
            return Err(XmlError::Invalid(format!(
                "schema root is <{}>, expected <xs:schema>",
                root.tag
            )));
        }

        let mut elements = HashMap::new();
        for decl in doc.children(root).filter(|el| el.tag == "xs:element") {
            let name = decl
                .attr("name")
                .ok_or_else(|| XmlError::Invalid("unnamed xs:element declaration".into()))?;
            elements.insert(name.to_string(), element_rule(&doc, decl)?);
        }
        debug!(elements = elements.len(), "interpreted schema");
        Ok(Schema { elements })
    }

    /// Declared default of an attribute, if the schema carries one.
    pub fn attribute_default(&self, element: &str, attribute: &str) -> Option<&str> {
        self.elements
            .get(element)?
            .attributes
            .iter()
            .find(|rule| rule.name == attribute)?
            .default
            .as_deref()
    }

    /// Validate a document, returning every violation found.
    pub fn validate(&self, doc: &Document) -> Vec<SchemaViolation> {
        let mut log = Vec::new();
        self.validate_element(doc, doc.root(), &mut log);
        log
    }

    fn validate_element(&self, doc: &Document, element: &Element, log: &mut Vec<SchemaViolation>) {
        let path = doc.tag_path(element);
        let rule = match self.elements.get(&element.tag) {
            Some(rule) => rule,
            None => {
                log.push(SchemaViolation {
                    path,
                    message: format!("element <{}> is not declared in the schema", element.tag),
                });
                return;
            }
        };

        for attr in &rule.attributes {
            match element.attr(&attr.name) {
                Some(value) => {
                    if !attr.kind.accepts(value) {
                        log.push(SchemaViolation {
                            path: path.clone(),
                            message: format!(
                                "attribute '{}' has invalid value '{}'",
                                attr.name, value
                            ),
                        });
                    }
                }
                None if attr.required => {
                    log.push(SchemaViolation {
                        path: path.clone(),
                        message: format!("required attribute '{}' is missing", attr.name),
                    });
                }
                None => {}
            }
        }
        for (name, _) in &element.attributes {
            if !rule.attributes.iter().any(|attr| &attr.name == name) {
                log.push(SchemaViolation {
                    path: path.clone(),
                    message: format!("attribute '{name}' is not declared"),
                });
            }
        }

        if element.text.is_some() && !rule.mixed {
            log.push(SchemaViolation {
                path: path.clone(),
                message: "element does not allow character data".into(),
            });
        }

        match &rule.content {
            ContentModel::Empty => {
                for child in doc.children(element) {
                    log.push(SchemaViolation {
                        path: path.clone(),
                        message: format!("unexpected child element <{}>", child.tag),
                    });
                }
            }
            ContentModel::Sequence(rules) => {
                for child in doc.children(element) {
                    if !rules.iter().any(|rule| rule.tag == child.tag) {
                        log.push(SchemaViolation {
                            path: path.clone(),
                            message: format!("unexpected child element <{}>", child.tag),
                        });
                    }
                }
                for child_rule in rules {
                    let count = doc
                        .children(element)
                        .filter(|child| child.tag == child_rule.tag)
                        .count();
                    if count < child_rule.min {
                        log.push(SchemaViolation {
                            path: path.clone(),
                            message: format!(
                                "missing required child element <{}>",
                                child_rule.tag
                            ),
                        });
                    }
                    if let Some(max) = child_rule.max {
                        if count > max {
                            log.push(SchemaViolation {
                                path: path.clone(),
                                message: format!(
                                    "child element <{}> declared {count} times, at most {max} allowed",
                                    child_rule.tag
                                ),
                            });
                        }
                    }
                }
            }
            ContentModel::Choice(allowed) => {
                for child in doc.children(element) {
                    if !allowed.iter().any(|tag| tag == &child.tag) {
                        log.push(SchemaViolation {
                            path: path.clone(),
                            message: format!("unexpected child element <{}>", child.tag),
                        });
                    }
                }
            }
        }

        for child in doc.children(element) {
            self.validate_element(doc, child, log);
        }
    }
}

fn element_rule(doc: &Document, decl: &Element) -> Result<ElementRule, XmlError> {
    let Some(complex) = doc.child_with_tag(decl, "xs:complexType") else {
        return Ok(ElementRule {
            attributes: Vec::new(),
            content: ContentModel::Empty,
            mixed: false,
        });
    };
    let mixed = complex.attr("mixed") == Some("true");

    let mut attributes = Vec::new();
    for attr in doc.children(complex).filter(|el| el.tag == "xs:attribute") {
        let name = attr
            .attr("name")
            .ok_or_else(|| XmlError::Invalid("unnamed xs:attribute declaration".into()))?;
        attributes.push(AttributeRule {
            name: name.to_string(),
            required: attr.attr("use") == Some("required"),
            default: attr.attr("default").map(str::to_string),
            kind: AttributeKind::from_xsd(attr.attr("type")),
        });
    }

    let content = if let Some(sequence) = doc.child_with_tag(complex, "xs:sequence") {
        let mut rules = Vec::new();
        for entry in doc.children(sequence).filter(|el| el.tag == "xs:element") {
            let tag = entry
                .attr("ref")
                .ok_or_else(|| XmlError::Invalid("sequence entry without ref".into()))?;
            rules.push(ChildRule {
                tag: tag.to_string(),
                min: occurs(entry.attr("minOccurs"), 1)?,
                max: match entry.attr("maxOccurs") {
                    Some("unbounded") => None,
                    other => Some(occurs(other, 1)?),
                },
            });
        }
        ContentModel::Sequence(rules)
    } else if let Some(choice) = doc.child_with_tag(complex, "xs:choice") {
        let mut allowed = Vec::new();
        for entry in doc.children(choice).filter(|el| el.tag == "xs:element") {
            let tag = entry
                .attr("ref")
                .ok_or_else(|| XmlError::Invalid("choice entry without ref".into()))?;
            allowed.push(tag.to_string());
        }
        ContentModel::Choice(allowed)
    } else {
        ContentModel::Empty
    };

    Ok(ElementRule {
        attributes,
        content,
        mixed,
    })
}

fn occurs(value: Option<&str>, default: usize) -> Result<usize, XmlError> {
    match value {
        None => Ok(default),
        Some(text) => text
            .parse()
            .map_err(|_| XmlError::Invalid(format!("invalid occurrence bound '{text}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packaged_schema_interprets() {
        let schema = Schema::packaged().expect("packaged schema");
        assert_eq!(
            schema.attribute_default("timeoutPV", "poll_time_s"),
            Some("0.1")
        );
        assert_eq!(schema.attribute_default("link", "linktype"), Some("NeXus"));
        assert_eq!(schema.attribute_default("triggerPV", "pvname"), None);
    }

    #[test]
    fn accepts_valid_document() {
        let doc = Document::parse(
            r#"
            <saveFlyData version="1.0">
                <triggerPV pvname="sim:Start" done_value="0" done_text="Done"/>
                <timeoutPV pvname="sim:ScanTime"/>
                <NX_structure>
                    <group name="root" class="NXroot">
                        <field name="title"><text>demo</text></field>
                        <PV label="I0" pvname="sim:I0" string="false"/>
                        <link name="alias" source="/entry/I0"/>
                    </group>
                </NX_structure>
            </saveFlyData>
            "#,
        )
        .expect("parse");
        let schema = Schema::packaged().expect("packaged schema");
        let log = schema.validate(&doc);
        assert!(log.is_empty(), "unexpected violations: {log:?}");
    }

    #[test]
    fn collects_every_violation() {
        // missing done_text, undeclared attribute, non-integer done_value,
        // plus two complaints about <mystery> (unexpected child, unknown tag)
        let doc = Document::parse(
            r#"
            <saveFlyData version="1.0">
                <triggerPV pvname="sim:Start" done_value="soon" bogus="1"/>
                <timeoutPV pvname="sim:ScanTime"/>
                <NX_structure>
                    <group name="root" class="NXroot">
                        <mystery/>
                    </group>
                </NX_structure>
            </saveFlyData>
            "#,
        )
        .expect("parse");
        let schema = Schema::packaged().expect("packaged schema");
        let log = schema.validate(&doc);
        assert_eq!(log.len(), 5, "violations: {log:?}");
        let rendered = log
            .iter()
            .map(SchemaViolation::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        assert!(rendered.contains("done_text"));
        assert!(rendered.contains("bogus"));
        assert!(rendered.contains("mystery"));
        assert!(rendered.contains("done_value"));
    }

    #[test]
    fn missing_top_level_declarations_are_reported() {
        let doc = Document::parse(
            r#"
            <saveFlyData version="1.0">
                <NX_structure>
                    <group name="root" class="NXroot"/>
                </NX_structure>
            </saveFlyData>
            "#,
        )
        .expect("parse");
        let schema = Schema::packaged().expect("packaged schema");
        let log = schema.validate(&doc);
        let rendered = log
            .iter()
            .map(SchemaViolation::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        assert!(rendered.contains("<triggerPV>"));
        assert!(rendered.contains("<timeoutPV>"));
    }
}
