//! Parse the XML configuration into the path-keyed structure registries.
//!
//! The walk runs in a fixed pass order over the document: all `group`
//! elements, then `field`, then `PV`, then `link`, each pass in document
//! order. Groups must therefore be declared before anything that names
//! them as parent, and links can reference any other spec. Parents are
//! resolved by document-node identity, not by path string manipulation,
//! because a node's path is only known once its parent chain is resolved.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use flynx_xml::{Document, Element, NodeId, Schema, XmlError};

use crate::spec::{FieldSpec, GroupSpec, LinkSpec, LinkType, PvSpec, SpecKind};
use crate::value::Value;

/// Expected root element of a configuration document.
pub const ROOT_TAG: &str = "saveFlyData";

/// Fallback trigger poll interval when neither the schema nor the
/// configuration declares one.
pub const DEFAULT_POLL_INTERVAL_S: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("configuration '{file}' failed schema validation:\n{log}")]
    SchemaInvalid { file: String, log: String },
    #[error("root element is <{0}>, expected <{ROOT_TAG}>")]
    WrongRootTag(String),
    #[error("missing <{0}> declaration")]
    MissingDeclaration(&'static str),
    #[error("missing required attribute '{attribute}' on <{tag}>")]
    MissingAttribute {
        tag: &'static str,
        attribute: &'static str,
    },
    #[error("invalid value '{value}' for attribute '{attribute}' on <{tag}>")]
    InvalidAttribute {
        tag: &'static str,
        attribute: &'static str,
        value: String,
    },
    #[error("duplicate HDF5 path '{0}'")]
    DuplicatePath(String),
    #[error("PV label '{0}' used more than once")]
    DuplicateLabel(String),
    #[error("no registered parent group for <{tag}> '{name}'")]
    UnresolvedParent {
        tag: &'static str,
        name: String,
    },
    #[error("unsupported link type '{kind}' for '{path}'")]
    UnsupportedLinkType { kind: String, path: String },
}

/// Trigger declaration: the signal whose value reports scan completion.
#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub pv_name: String,
    /// Numeric done indicator.
    pub done_value: i64,
    /// Textual done indicator.
    pub done_text: String,
}

impl TriggerSpec {
    /// Whether a trigger reading reports the scan as finished. Both the
    /// numeric and the textual form are accepted.
    pub fn is_done(&self, value: &Value) -> bool {
        match value {
            Value::Int(v) => *v == self.done_value,
            Value::Float(v) => *v == self.done_value as f64,
            Value::Text(v) => v == &self.done_text,
            _ => false,
        }
    }
}

/// Timeout declaration: the signal carrying the scan time budget.
#[derive(Debug, Clone)]
pub struct TimeoutSpec {
    pub pv_name: String,
}

/// The parsed configuration: declarations plus path-keyed registries.
///
/// All four registries share one global path namespace; any collision is a
/// fatal [`ConfigError::DuplicatePath`] at parse time.
#[derive(Debug)]
pub struct Structure {
    config_file: PathBuf,
    config_version: String,
    trigger: TriggerSpec,
    timeout: TimeoutSpec,
    poll_interval: Duration,
    groups: BTreeMap<String, GroupSpec>,
    fields: BTreeMap<String, FieldSpec>,
    pvs: BTreeMap<String, PvSpec>,
    links: BTreeMap<String, LinkSpec>,
}

impl Structure {
    /// Read, validate and parse a configuration file.
    pub fn from_file(config_file: &Path) -> Result<Self, ConfigError> {
        let doc = Document::from_file(config_file)?;
        Self::from_document(&doc, config_file)
    }

    /// Validate and parse an already-loaded configuration document.
    pub fn from_document(doc: &Document, config_file: &Path) -> Result<Self, ConfigError> {
        let schema = Schema::packaged()?;
        let violations = schema.validate(doc);
        if !violations.is_empty() {
            let log = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ConfigError::SchemaInvalid {
                file: config_file.display().to_string(),
                log,
            });
        }

        let root = doc.root();
        if root.tag != ROOT_TAG {
            return Err(ConfigError::WrongRootTag(root.tag.clone()));
        }
        let config_version = attr_required(root, ROOT_TAG, "version")?;

        let trigger_el = doc
            .child_with_tag(root, "triggerPV")
            .ok_or(ConfigError::MissingDeclaration("triggerPV"))?;
        let trigger = TriggerSpec {
            pv_name: attr_required(trigger_el, "triggerPV", "pvname")?,
            done_value: parse_attr(trigger_el, "triggerPV", "done_value")?,
            done_text: attr_required(trigger_el, "triggerPV", "done_text")?,
        };

        let timeout_el = doc
            .child_with_tag(root, "timeoutPV")
            .ok_or(ConfigError::MissingDeclaration("timeoutPV"))?;
        let timeout = TimeoutSpec {
            pv_name: attr_required(timeout_el, "timeoutPV", "pvname")?,
        };
        // the schema's declared default governs unless the configuration
        // overrides it
        let poll_default = schema
            .attribute_default("timeoutPV", "poll_time_s")
            .and_then(|text| text.parse().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_S);
        let poll_s: f64 = match timeout_el.attr("poll_time_s") {
            Some(text) => text.parse().map_err(|_| ConfigError::InvalidAttribute {
                tag: "timeoutPV",
                attribute: "poll_time_s",
                value: text.to_string(),
            })?,
            None => poll_default,
        };
        // xs:decimal admits values Duration cannot represent
        let poll_interval =
            Duration::try_from_secs_f64(poll_s).map_err(|_| ConfigError::InvalidAttribute {
                tag: "timeoutPV",
                attribute: "poll_time_s",
                value: poll_s.to_string(),
            })?;

        doc.child_with_tag(root, "NX_structure")
            .ok_or(ConfigError::MissingDeclaration("NX_structure"))?;

        let mut builder = Builder::default();
        for element in doc.elements_with_tag("group") {
            builder.add_group(doc, element)?;
        }
        for element in doc.elements_with_tag("field") {
            builder.add_field(doc, element)?;
        }
        for element in doc.elements_with_tag("PV") {
            builder.add_pv(doc, element)?;
        }
        for element in doc.elements_with_tag("link") {
            builder.add_link(doc, element)?;
        }

        debug!(
            groups = builder.groups.len(),
            fields = builder.fields.len(),
            pvs = builder.pvs.len(),
            links = builder.links.len(),
            "configuration parsed"
        );
        Ok(Structure {
            config_file: config_file.to_path_buf(),
            config_version,
            trigger,
            timeout,
            poll_interval,
            groups: builder.groups,
            fields: builder.fields,
            pvs: builder.pvs,
            links: builder.links,
        })
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// The `version` attribute of the configuration root element.
    pub fn config_version(&self) -> &str {
        &self.config_version
    }

    pub fn trigger(&self) -> &TriggerSpec {
        &self.trigger
    }

    pub fn timeout(&self) -> &TimeoutSpec {
        &self.timeout
    }

    /// Interval between trigger polls while waiting for scan completion.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Groups in path order.
    pub fn groups(&self) -> impl Iterator<Item = &GroupSpec> {
        self.groups.values()
    }

    /// Groups shallowest-first, ties broken by path. This is the
    /// materialization order: every parent precedes its children
    /// regardless of declaration order.
    pub fn groups_by_depth(&self) -> Vec<&GroupSpec> {
        let mut groups: Vec<&GroupSpec> = self.groups.values().collect();
        groups.sort_by_key(|group| (group.depth(), group.path.clone()));
        groups
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn pvs(&self) -> impl Iterator<Item = &PvSpec> {
        self.pvs.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkSpec> {
        self.links.values()
    }

    pub fn group(&self, path: &str) -> Option<&GroupSpec> {
        self.groups.get(path)
    }

    pub fn pv(&self, path: &str) -> Option<&PvSpec> {
        self.pvs.get(path)
    }

    /// Every registered path with its registry kind, in path order.
    pub fn all_paths(&self) -> Vec<(&str, SpecKind)> {
        let mut paths: Vec<(&str, SpecKind)> = Vec::new();
        paths.extend(self.groups.keys().map(|p| (p.as_str(), SpecKind::Group)));
        paths.extend(self.fields.keys().map(|p| (p.as_str(), SpecKind::Field)));
        paths.extend(self.pvs.keys().map(|p| (p.as_str(), SpecKind::Pv)));
        paths.extend(self.links.keys().map(|p| (p.as_str(), SpecKind::Link)));
        paths.sort_by_key(|(path, _)| path.to_string());
        paths
    }
}

#[derive(Default)]
struct Builder {
    groups: BTreeMap<String, GroupSpec>,
    fields: BTreeMap<String, FieldSpec>,
    pvs: BTreeMap<String, PvSpec>,
    links: BTreeMap<String, LinkSpec>,
    /// Document-node identity → group path, for parent resolution.
    group_by_node: HashMap<NodeId, String>,
    labels: HashSet<String>,
    paths: HashSet<String>,
}

impl Builder {
    fn claim(&mut self, path: &str) -> Result<(), ConfigError> {
        if !self.paths.insert(path.to_string()) {
            return Err(ConfigError::DuplicatePath(path.to_string()));
        }
        Ok(())
    }

    /// Path of the group a child element is declared inside, resolved by
    /// the identity of the child's document parent node.
    fn parent_path(
        &self,
        doc: &Document,
        element: &Element,
        tag: &'static str,
        name: &str,
    ) -> Result<String, ConfigError> {
        let unresolved = || ConfigError::UnresolvedParent {
            tag,
            name: name.to_string(),
        };
        let parent_id = element.parent.ok_or_else(unresolved)?;
        let parent = doc.get(parent_id);
        if parent.tag != "group" {
            return Err(unresolved());
        }
        self.group_by_node
            .get(&parent.id)
            .cloned()
            .ok_or_else(unresolved)
    }

    fn register_child(&mut self, parent: &str, path: &str) {
        if let Some(group) = self.groups.get_mut(parent) {
            group.children.push(path.to_string());
        }
    }

    fn add_group(&mut self, doc: &Document, element: &Element) -> Result<(), ConfigError> {
        let name = attr_required(element, "group", "name")?;
        let nx_class = attr_required(element, "group", "class")?;
        let attributes = declared_attributes(doc, element);

        let parent_el = element.parent.map(|id| doc.get(id));
        let (path, parent) = match parent_el {
            Some(el) if el.tag == "NX_structure" => ("/".to_string(), None),
            Some(el) if el.tag == "group" => {
                let parent_path = self
                    .group_by_node
                    .get(&el.id)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnresolvedParent {
                        tag: "group",
                        name: name.clone(),
                    })?;
                (join_path(&parent_path, &name), Some(parent_path))
            }
            _ => {
                return Err(ConfigError::UnresolvedParent {
                    tag: "group",
                    name,
                })
            }
        };

        self.claim(&path)?;
        if let Some(parent_path) = &parent {
            self.register_child(parent_path, &path);
        }
        self.group_by_node.insert(element.id, path.clone());
        self.groups.insert(
            path.clone(),
            GroupSpec {
                node: element.id,
                name,
                nx_class,
                path,
                parent,
                children: Vec::new(),
                attributes,
            },
        );
        Ok(())
    }

    fn add_field(&mut self, doc: &Document, element: &Element) -> Result<(), ConfigError> {
        let name = attr_required(element, "field", "name")?;
        let parent = self.parent_path(doc, element, "field", &name)?;
        let path = join_path(&parent, &name);
        let text = doc
            .child_with_tag(element, "text")
            .and_then(|el| el.text.clone())
            .unwrap_or_default();

        self.claim(&path)?;
        self.register_child(&parent, &path);
        self.fields.insert(
            path.clone(),
            FieldSpec {
                node: element.id,
                name,
                path,
                parent,
                text,
                attributes: declared_attributes(doc, element),
            },
        );
        Ok(())
    }

    fn add_pv(&mut self, doc: &Document, element: &Element) -> Result<(), ConfigError> {
        let label = attr_required(element, "PV", "label")?;
        if !self.labels.insert(label.clone()) {
            return Err(ConfigError::DuplicateLabel(label));
        }
        let pv_name = attr_required(element, "PV", "pvname")?;
        let parent = self.parent_path(doc, element, "PV", &label)?;
        let path = join_path(&parent, &label);

        // relative length limits refer to siblings in the owning group
        let length_limit = element.attr("length_limit").map(|limit| {
            if limit.starts_with('/') {
                limit.to_string()
            } else {
                join_path(&parent, limit)
            }
        });

        self.claim(&path)?;
        self.register_child(&parent, &path);
        self.pvs.insert(
            path.clone(),
            PvSpec {
                node: element.id,
                label,
                pv_name,
                path,
                parent,
                as_string: flag(element.attr("string")),
                acquire_after_scan: flag(element.attr("acquire_after_scan")),
                length_limit,
                attributes: declared_attributes(doc, element),
            },
        );
        Ok(())
    }

    fn add_link(&mut self, doc: &Document, element: &Element) -> Result<(), ConfigError> {
        let name = attr_required(element, "link", "name")?;
        let source_path = attr_required(element, "link", "source")?;
        let parent = self.parent_path(doc, element, "link", &name)?;
        let path = join_path(&parent, &name);

        let kind = element.attr("linktype").unwrap_or("NeXus");
        let link_type = match kind {
            "NeXus" => LinkType::NeXus,
            other => {
                return Err(ConfigError::UnsupportedLinkType {
                    kind: other.to_string(),
                    path,
                })
            }
        };

        self.claim(&path)?;
        self.register_child(&parent, &path);
        self.links.insert(
            path.clone(),
            LinkSpec {
                node: element.id,
                name,
                path,
                parent,
                source_path,
                link_type,
            },
        );
        Ok(())
    }
}

fn attr_required(
    element: &Element,
    tag: &'static str,
    attribute: &'static str,
) -> Result<String, ConfigError> {
    element
        .attr(attribute)
        .map(str::to_string)
        .ok_or(ConfigError::MissingAttribute { tag, attribute })
}

fn parse_attr(
    element: &Element,
    tag: &'static str,
    attribute: &'static str,
) -> Result<i64, ConfigError> {
    let text = attr_required(element, tag, attribute)?;
    text.parse().map_err(|_| ConfigError::InvalidAttribute {
        tag,
        attribute,
        value: text,
    })
}

fn declared_attributes(doc: &Document, element: &Element) -> Vec<(String, String)> {
    doc.children(element)
        .filter(|child| child.tag == "attribute")
        .filter_map(|child| {
            Some((child.attr("name")?.to_string(), child.attr("value")?.to_string()))
        })
        .collect()
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn flag(value: Option<&str>) -> bool {
    value
        .map(|text| matches!(text.to_ascii_lowercase().as_str(), "t" | "true" | "1"))
        .unwrap_or(false)
}
