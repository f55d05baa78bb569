//! Binding of PV specs to live data-source connections.
//!
//! The traits here are the seam between the structure model and whatever
//! transport actually reaches the control system. [`Bindings`] owns one
//! connection per data-source path and tracks nothing else; specs stay
//! immutable in the [`Structure`](crate::Structure).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::spec::PvSpec;
use crate::structure::Structure;
use crate::value::Value;

/// Parameters of a single value read.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    /// Return the textual representation instead of the native type.
    pub as_string: bool,
    /// How long the read may block waiting for the source.
    pub timeout: Duration,
    /// Force a fresh fetch from the source rather than serving the last
    /// monitored value.
    pub fresh: bool,
}

/// One live connection to a named data source.
pub trait ValueConnection: Send {
    /// Whether the source is currently reachable.
    fn is_connected(&self) -> bool;

    /// Read the current value; `None` when no value is available.
    fn get(&self, request: &ReadRequest) -> Option<Value>;

    /// Human-readable description of the source, if the transport knows one.
    fn description(&self) -> Option<String> {
        None
    }

    /// Engineering units of the source, if the transport knows them.
    fn units(&self) -> Option<String> {
        None
    }

    /// Native type name of the source, if the transport knows it.
    fn type_name(&self) -> Option<String> {
        None
    }
}

/// Factory for [`ValueConnection`]s.
///
/// Connecting is not allowed to fail eagerly: a source that is offline
/// still yields a connection object reporting `is_connected() == false`,
/// and may come online later.
pub trait ValueProvider {
    fn connect(&self, pv_name: &str) -> Box<dyn ValueConnection>;
}

/// Live connections for every data source of a structure, keyed by the
/// owning spec's path.
pub struct Bindings {
    connections: BTreeMap<String, Box<dyn ValueConnection>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
        }
    }

    /// Open a connection for every data source that does not have one yet.
    /// Safe to call repeatedly; existing connections are kept.
    pub fn connect_all(&mut self, structure: &Structure, provider: &dyn ValueProvider) {
        for spec in structure.pvs() {
            if self.connections.contains_key(&spec.path) {
                continue;
            }
            debug!(path = %spec.path, pv = %spec.pv_name, "opening connection");
            self.connections
                .insert(spec.path.clone(), provider.connect(&spec.pv_name));
        }
    }

    /// The connection bound to a data-source path.
    pub fn connection(&self, path: &str) -> Option<&dyn ValueConnection> {
        self.connections.get(path).map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether every bound connection currently reports connected.
    pub fn all_connected(&self) -> bool {
        self.connections.values().all(|conn| conn.is_connected())
    }

    /// Specs whose connection is currently down.
    pub fn unconnected<'a>(&self, structure: &'a Structure) -> Vec<&'a PvSpec> {
        structure
            .pvs()
            .filter(|spec| {
                self.connection(&spec.path)
                    .map(|conn| !conn.is_connected())
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Poll until every connection is up or the budget is spent. Returns
    /// whether full connectivity was reached; stragglers are logged.
    pub fn wait_connected(
        &self,
        structure: &Structure,
        total: Duration,
        poll: Duration,
    ) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.all_connected() {
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(poll);
        }
        for spec in self.unconnected(structure) {
            warn!(path = %spec.path, pv = %spec.pv_name, "data source never connected");
        }
        false
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProvider;
    use crate::structure::tests::FIXTURE;
    use std::path::Path;

    fn fixture_structure() -> Structure {
        let doc = flynx_xml::Document::parse(FIXTURE).expect("parse fixture");
        Structure::from_document(&doc, Path::new("fixture.xml")).expect("structure")
    }

    #[test]
    fn connect_all_is_idempotent() {
        let structure = fixture_structure();
        let provider = SimProvider::new();
        provider.set_value("sim:I0", Value::Int(12345));

        let mut bindings = Bindings::new();
        bindings.connect_all(&structure, &provider);
        assert_eq!(bindings.len(), 4);
        bindings.connect_all(&structure, &provider);
        assert_eq!(bindings.len(), 4);
        assert_eq!(provider.connect_count("sim:I0"), 1);
    }

    #[test]
    fn offline_sources_are_reported_not_fatal() {
        let structure = fixture_structure();
        let provider = SimProvider::new();
        provider.set_value("sim:I0", Value::Int(12345));
        provider.set_offline("sim:comment");

        let mut bindings = Bindings::new();
        bindings.connect_all(&structure, &provider);
        assert!(!bindings.all_connected());

        let down = bindings.unconnected(&structure);
        assert_eq!(down.len(), 3);
        assert!(down.iter().any(|spec| spec.pv_name == "sim:comment"));
    }

    #[test]
    fn wait_connected_returns_once_all_sources_are_up() {
        let structure = fixture_structure();
        let provider = SimProvider::new();
        for pv in ["sim:wave", "sim:wave.NORD", "sim:I0", "sim:comment"] {
            provider.set_value(pv, Value::Int(0));
        }

        let mut bindings = Bindings::new();
        bindings.connect_all(&structure, &provider);
        assert!(bindings.wait_connected(
            &structure,
            Duration::from_millis(50),
            Duration::from_millis(5),
        ));

        provider.set_offline("sim:wave");
        assert!(!bindings.wait_connected(
            &structure,
            Duration::from_millis(20),
            Duration::from_millis(5),
        ));
    }

    #[test]
    fn reads_go_through_the_bound_connection() {
        let structure = fixture_structure();
        let provider = SimProvider::new();
        provider.set_value("sim:I0", Value::Int(12345));

        let mut bindings = Bindings::new();
        bindings.connect_all(&structure, &provider);
        let conn = bindings.connection("/entry/data/I0").expect("bound");
        let request = ReadRequest {
            as_string: false,
            timeout: Duration::from_secs(1),
            fresh: true,
        };
        assert_eq!(conn.get(&request), Some(Value::Int(12345)));
    }
}
