//! Immutable spec objects describing one node of the output hierarchy.
//!
//! All specs are created during configuration parsing and never mutated
//! afterwards. Runtime state (live connections, materialized HDF5 handles)
//! is owned elsewhere, keyed by the spec's path.

use flynx_xml::NodeId;

/// Which registry a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecKind {
    Group,
    Field,
    Pv,
    Link,
}

/// A named, typed container node ("group" element).
#[derive(Debug, Clone)]
pub struct GroupSpec {
    /// Document node the spec was built from, for identity lookups.
    pub node: NodeId,
    pub name: String,
    /// NeXus class tag written as the `NX_class` attribute.
    pub nx_class: String,
    /// Absolute path; `/` for the document root group.
    pub path: String,
    /// Parent group path; `None` for the root group.
    pub parent: Option<String>,
    /// Paths of owned child specs, in declaration order.
    pub children: Vec<String>,
    /// User-declared attributes, in declaration order.
    pub attributes: Vec<(String, String)>,
}

impl GroupSpec {
    /// Nesting depth: 0 for the root group.
    pub fn depth(&self) -> usize {
        if self.path == "/" {
            0
        } else {
            self.path.matches('/').count()
        }
    }
}

/// A static leaf value ("field" element), written once at file creation.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub node: NodeId,
    pub name: String,
    pub path: String,
    pub parent: String,
    /// Static text content; may be empty.
    pub text: String,
    pub attributes: Vec<(String, String)>,
}

/// A PV-backed data source ("PV" element).
#[derive(Debug, Clone)]
pub struct PvSpec {
    pub node: NodeId,
    /// Unique label across the whole configuration; also the dataset name.
    pub label: String,
    /// External process-variable name this source reads from.
    pub pv_name: String,
    pub path: String,
    pub parent: String,
    /// Read the value as text instead of its native type.
    pub as_string: bool,
    /// Defer acquisition to the final pass, after the scan completes.
    pub acquire_after_scan: bool,
    /// Absolute path of another data source whose live value bounds this
    /// source's array length.
    pub length_limit: Option<String>,
    pub attributes: Vec<(String, String)>,
}

/// Supported link flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// NeXus-style alias: tag the source with a `target` attribute, then
    /// hard-link it under the new name.
    NeXus,
}

/// A named alias of an already-materialized node ("link" element).
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub node: NodeId,
    pub name: String,
    pub path: String,
    pub parent: String,
    /// Path of the existing node this link aliases.
    pub source_path: String,
    pub link_type: LinkType,
}
