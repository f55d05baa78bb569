//! High level fly-scan save facade.
//!
//! A [`SaveSession`] drives one complete save: parse (or reuse) the
//! structure, bind its data sources, create the output file, record the
//! before-scan values, wait for the scan trigger to report completion,
//! then record the after-scan values and close the file.
//!
//! ```rust,no_run
//! use flynx::{SaveSession, SessionError, SimProvider, StructureManager};
//! use std::path::Path;
//!
//! # fn run() -> Result<(), SessionError> {
//! let mut manager = StructureManager::new();
//! let provider = SimProvider::new();
//! let completed = SaveSession::run(
//!     Path::new("scan.h5"),
//!     Path::new("layout.xml"),
//!     &mut manager,
//!     &provider,
//! )?;
//! println!("scan completed in time: {completed}");
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

pub use flynx_core::bind::{Bindings, ReadRequest, ValueConnection, ValueProvider};
pub use flynx_core::manager::StructureManager;
pub use flynx_core::sim::SimProvider;
pub use flynx_core::spec::{FieldSpec, GroupSpec, LinkSpec, LinkType, PvSpec, SpecKind};
pub use flynx_core::structure::{ConfigError, Structure, TimeoutSpec, TriggerSpec};
pub use flynx_core::value::Value;
pub use flynx_writer::{FileWriter, ReadPolicy, WriterError};
pub use flynx_xml::{Document, Schema, SchemaViolation, XmlError};

/// How long a session waits for its data sources to connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Scan time budget used when the timeout source has no usable value.
pub const DEFAULT_SCAN_BUDGET: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// One save: a structure, its live bindings and one output file.
pub struct SaveSession {
    structure: Arc<Structure>,
    bindings: Bindings,
    writer: FileWriter,
    trigger: Box<dyn ValueConnection>,
    timeout: Box<dyn ValueConnection>,
}

impl SaveSession {
    /// Open a session: reuse (or parse) the structure, bind every data
    /// source, wait for connectivity, and create the output file with
    /// its groups and static fields.
    ///
    /// Sources that never connect are logged and degraded later, not
    /// treated as fatal here.
    pub fn begin(
        output: &Path,
        config: &Path,
        manager: &mut StructureManager,
        provider: &dyn ValueProvider,
    ) -> Result<Self, SessionError> {
        let structure = manager.get_or_create(config)?;
        let mut bindings = Bindings::new();
        bindings.connect_all(&structure, provider);
        bindings.wait_connected(&structure, CONNECT_TIMEOUT, structure.poll_interval());

        let trigger = provider.connect(&structure.trigger().pv_name);
        let timeout = provider.connect(&structure.timeout().pv_name);
        let writer = FileWriter::create(Arc::clone(&structure), output)?;
        Ok(SaveSession {
            structure,
            bindings,
            writer,
            trigger,
            timeout,
        })
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    /// Record every before-scan data source.
    pub fn write_preliminary(&mut self) -> Result<(), SessionError> {
        self.writer.write_preliminary(&self.bindings)?;
        Ok(())
    }

    /// Poll the trigger until it reports completion or the scan budget
    /// is spent. Returns whether the scan completed in time; on timeout
    /// the save still proceeds with whatever the sources hold.
    pub fn wait_for_done(&self) -> bool {
        let budget = self.scan_budget();
        let poll = self.structure.poll_interval();
        info!(?budget, "waiting for scan completion");
        let deadline = Instant::now() + budget;
        loop {
            let request = ReadRequest {
                as_string: false,
                timeout: poll,
                fresh: true,
            };
            if let Some(value) = self.trigger.get(&request) {
                if self.structure.trigger().is_done(&value) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                warn!(?budget, "scan did not complete within its time budget");
                return false;
            }
            std::thread::sleep(poll);
        }
    }

    /// Record the after-scan sources and links, then close the file.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        self.writer.write_final(&self.bindings)?;
        Ok(())
    }

    /// Run a complete save. Returns whether the scan completed before
    /// its time budget ran out.
    pub fn run(
        output: &Path,
        config: &Path,
        manager: &mut StructureManager,
        provider: &dyn ValueProvider,
    ) -> Result<bool, SessionError> {
        let mut session = Self::begin(output, config, manager, provider)?;
        session.write_preliminary()?;
        let completed = session.wait_for_done();
        session.finish()?;
        info!(output = %output.display(), completed, "save finished");
        Ok(completed)
    }

    /// Scan time budget, in seconds, read from the timeout source.
    fn scan_budget(&self) -> Duration {
        let request = ReadRequest {
            as_string: false,
            timeout: Duration::from_secs(5),
            fresh: true,
        };
        // a live source can serve garbage; anything Duration cannot
        // represent falls back to the default budget
        let budget = self
            .timeout
            .get(&request)
            .and_then(|value| value.as_f64())
            .filter(|seconds| *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());
        match budget {
            Some(budget) => budget,
            None => {
                warn!(default = ?DEFAULT_SCAN_BUDGET, "timeout source has no usable value");
                DEFAULT_SCAN_BUDGET
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        <saveFlyData version="1.0">
            <triggerPV pvname="sim:Start" done_value="0" done_text="Done"/>
            <timeoutPV pvname="sim:ScanTime" poll_time_s="0.01"/>
            <NX_structure>
                <group name="root" class="NXroot">
                    <group name="entry" class="NXentry">
                        <field name="title">
                            <text>session test</text>
                        </field>
                        <PV label="I0" pvname="sim:I0"/>
                        <PV label="note" pvname="sim:note" string="true"
                            acquire_after_scan="true"/>
                    </group>
                </group>
            </NX_structure>
        </saveFlyData>
    "#;

    fn provider() -> SimProvider {
        let provider = SimProvider::new();
        provider.set_value("sim:I0", Value::Int(7));
        provider.set_value("sim:note", Value::Text("done note".into()));
        provider.set_value("sim:ScanTime", Value::Float(0.5));
        provider.set_value("sim:Start", Value::Int(0));
        provider
    }

    fn write_config(dir: &Path) -> std::path::PathBuf {
        let config = dir.join("layout.xml");
        std::fs::write(&config, CONFIG).expect("write config");
        config
    }

    #[test]
    fn run_saves_a_complete_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_config(dir.path());
        let output = dir.path().join("scan.h5");

        let mut manager = StructureManager::new();
        let completed =
            SaveSession::run(&output, &config, &mut manager, &provider()).expect("save");
        assert!(completed);

        let file = hdf5::File::open(&output).expect("reopen");
        let i0 = file.dataset("/entry/I0").expect("I0");
        assert_eq!(i0.read_raw::<i64>().expect("read"), vec![7]);
        assert!(file.dataset("/entry/note").is_ok());
    }

    #[test]
    fn timed_out_scan_still_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_config(dir.path());
        let output = dir.path().join("scan.h5");

        let provider = provider();
        provider.set_value("sim:Start", Value::Int(1)); // scan never done
        provider.set_value("sim:ScanTime", Value::Float(0.05));

        let mut manager = StructureManager::new();
        let completed =
            SaveSession::run(&output, &config, &mut manager, &provider).expect("save");
        assert!(!completed);
        assert!(hdf5::File::open(&output).is_ok());
    }

    #[test]
    fn garbage_timeout_value_falls_back_to_the_default_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_config(dir.path());
        let output = dir.path().join("scan.h5");

        let provider = provider();
        provider.set_value("sim:ScanTime", Value::Float(1e300));

        let mut manager = StructureManager::new();
        let completed =
            SaveSession::run(&output, &config, &mut manager, &provider).expect("save");
        assert!(completed);
        assert!(hdf5::File::open(&output).is_ok());
    }

    #[test]
    fn structure_is_reused_across_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_config(dir.path());
        let provider = provider();

        let mut manager = StructureManager::new();
        let first = dir.path().join("first.h5");
        SaveSession::run(&first, &config, &mut manager, &provider).expect("first save");
        let active = manager.active().expect("active structure");

        let second = dir.path().join("second.h5");
        SaveSession::run(&second, &config, &mut manager, &provider).expect("second save");
        let reused = manager.active().expect("still active");
        assert!(Arc::ptr_eq(&active, &reused));
    }
}
