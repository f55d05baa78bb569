//! Structure model for fly-scan data files.
//!
//! A [`Structure`] is parsed once from an XML configuration and holds
//! immutable spec objects (groups, static fields, PV-backed data sources,
//! links) in path-keyed registries. Live connection state never lives in
//! the specs: it is held separately in [`Bindings`], created by a
//! [`ValueProvider`] implementation.

pub mod bind;
pub mod manager;
pub mod sim;
pub mod spec;
pub mod structure;
pub mod value;

pub use bind::{Bindings, ReadRequest, ValueConnection, ValueProvider};
pub use manager::StructureManager;
pub use spec::{FieldSpec, GroupSpec, LinkSpec, LinkType, PvSpec, SpecKind};
pub use structure::{ConfigError, Structure, TimeoutSpec, TriggerSpec};
pub use value::Value;
