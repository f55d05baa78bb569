//! In-process simulated data sources.
//!
//! Backs the CLI's offline mode and the test suites of every crate in the
//! workspace. State is shared behind a mutex so tests can flip values and
//! connectivity while connections are already handed out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bind::{ReadRequest, ValueConnection, ValueProvider};
use crate::value::Value;

#[derive(Default)]
struct SimState {
    values: HashMap<String, Value>,
    offline: HashSet<String>,
    no_data: HashSet<String>,
    descriptions: HashMap<String, String>,
    units: HashMap<String, String>,
    connect_counts: HashMap<String, usize>,
}

/// A [`ValueProvider`] serving values from an in-process table.
#[derive(Default, Clone)]
pub struct SimProvider {
    state: Arc<Mutex<SimState>>,
}

impl SimProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set (or replace) the value of a source. The source is brought
    /// online if it was marked offline or valueless.
    pub fn set_value(&self, pv_name: &str, value: Value) {
        let mut state = self.lock();
        state.offline.remove(pv_name);
        state.no_data.remove(pv_name);
        state.values.insert(pv_name.to_string(), value);
    }

    /// Mark a source unreachable. Connections to it stay alive and report
    /// disconnected until a value is set again.
    pub fn set_offline(&self, pv_name: &str) {
        self.lock().offline.insert(pv_name.to_string());
    }

    /// Mark a source reachable but currently valueless: reads return
    /// nothing while the connection still reports connected.
    pub fn set_no_data(&self, pv_name: &str) {
        let mut state = self.lock();
        state.offline.remove(pv_name);
        state.values.remove(pv_name);
        state.no_data.insert(pv_name.to_string());
    }

    pub fn set_description(&self, pv_name: &str, description: &str) {
        self.lock()
            .descriptions
            .insert(pv_name.to_string(), description.to_string());
    }

    pub fn set_units(&self, pv_name: &str, units: &str) {
        self.lock()
            .units
            .insert(pv_name.to_string(), units.to_string());
    }

    /// How many connections were opened for a source name.
    pub fn connect_count(&self, pv_name: &str) -> usize {
        self.lock()
            .connect_counts
            .get(pv_name)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a value is present for a source name.
    pub fn has_value(&self, pv_name: &str) -> bool {
        self.lock().values.contains_key(pv_name)
    }
}

impl ValueProvider for SimProvider {
    fn connect(&self, pv_name: &str) -> Box<dyn ValueConnection> {
        *self
            .lock()
            .connect_counts
            .entry(pv_name.to_string())
            .or_insert(0) += 1;
        Box::new(SimConnection {
            pv_name: pv_name.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

struct SimConnection {
    pv_name: String,
    state: Arc<Mutex<SimState>>,
}

impl SimConnection {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ValueConnection for SimConnection {
    fn is_connected(&self) -> bool {
        let state = self.lock();
        !state.offline.contains(&self.pv_name)
            && (state.values.contains_key(&self.pv_name)
                || state.no_data.contains(&self.pv_name))
    }

    fn get(&self, request: &ReadRequest) -> Option<Value> {
        let state = self.lock();
        if state.offline.contains(&self.pv_name) {
            return None;
        }
        let value = state.values.get(&self.pv_name)?.clone();
        Some(if request.as_string {
            value.to_text()
        } else {
            value
        })
    }

    fn description(&self) -> Option<String> {
        self.lock().descriptions.get(&self.pv_name).cloned()
    }

    fn units(&self) -> Option<String> {
        self.lock().units.get(&self.pv_name).cloned()
    }

    fn type_name(&self) -> Option<String> {
        let name = match self.lock().values.get(&self.pv_name)? {
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::Text(_) => "string",
            Value::IntArray(_) => "int[]",
            Value::FloatArray(_) => "double[]",
            Value::TextArray(_) => "string[]",
        };
        Some(name.to_string())
    }
}
