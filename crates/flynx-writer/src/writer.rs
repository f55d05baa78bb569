use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, Location};
use tracing::{debug, error, info, warn};

use flynx_core::bind::{Bindings, ReadRequest, ValueConnection};
use flynx_core::spec::{LinkSpec, LinkType, PvSpec};
use flynx_core::structure::Structure;
use flynx_core::value::Value;

use crate::{ReadPolicy, WriterError, NOT_CONNECTED_TEXT, NO_DATA_TEXT};

/// Writes one output file for one structure.
///
/// Group handles are cached by path so later passes address parents
/// without path arithmetic. The handle cache is cleared before the file
/// handle is dropped.
pub struct FileWriter {
    structure: Arc<Structure>,
    output_path: PathBuf,
    file: Option<File>,
    groups: HashMap<String, Group>,
}

impl FileWriter {
    /// Create the output file, its group hierarchy and the static fields.
    ///
    /// Groups are materialized shallowest-first so parents always exist.
    /// A static field that cannot be written is a fatal error: the
    /// configuration promised it unconditionally.
    pub fn create(structure: Arc<Structure>, output_path: &Path) -> Result<Self, WriterError> {
        info!(output = %output_path.display(), "creating output file");
        let file = File::create(output_path)?;
        let mut writer = FileWriter {
            structure,
            output_path: output_path.to_path_buf(),
            file: Some(file),
            groups: HashMap::new(),
        };
        writer.write_root_attributes()?;
        writer.create_groups()?;
        writer.write_static_fields()?;
        Ok(writer)
    }

    /// Record every before-scan data source. Per-source failures degrade
    /// to sentinel datasets.
    pub fn write_preliminary(&mut self, bindings: &Bindings) -> Result<(), WriterError> {
        debug!("preliminary pass");
        self.write_pass(bindings, false, ReadPolicy::preliminary())
    }

    /// Record the after-scan sources, the completion timestamp and the
    /// link aliases, then close the file. The file is closed even when
    /// the pass fails partway.
    pub fn write_final(&mut self, bindings: &Bindings) -> Result<(), WriterError> {
        debug!("final pass");
        let result = self.final_inner(bindings);
        let closed = self.close();
        result.and(closed)
    }

    /// Release all handles and close the file. Idempotent.
    pub fn close(&mut self) -> Result<(), WriterError> {
        // group handles must not outlive the file handle
        self.groups.clear();
        if let Some(file) = self.file.take() {
            file.close()?;
            info!(output = %self.output_path.display(), "output file closed");
        }
        Ok(())
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn final_inner(&mut self, bindings: &Bindings) -> Result<(), WriterError> {
        let file = self.file.as_ref().ok_or(WriterError::Closed)?;
        write_text_attr(file, "timestamp", &chrono::Local::now().to_rfc3339())?;
        self.write_pass(bindings, true, ReadPolicy::final_pass())?;
        self.resolve_links()
    }

    fn write_root_attributes(&self) -> Result<(), WriterError> {
        let file = self.file.as_ref().ok_or(WriterError::Closed)?;
        let (major, minor, patch) = hdf5::library_version();
        write_text_attr(file, "file_name", &self.output_path.display().to_string())?;
        write_text_attr(file, "creator", env!("CARGO_PKG_NAME"))?;
        write_text_attr(file, "creator_version", env!("CARGO_PKG_VERSION"))?;
        write_text_attr(
            file,
            "creator_config_file",
            &self.structure.config_file().display().to_string(),
        )?;
        write_text_attr(file, "config_version", self.structure.config_version())?;
        write_text_attr(file, "HDF5_Version", &format!("{major}.{minor}.{patch}"))?;
        Ok(())
    }

    fn create_groups(&mut self) -> Result<(), WriterError> {
        let file = self.file.as_ref().ok_or(WriterError::Closed)?;
        for spec in self.structure.clone().groups_by_depth() {
            let group = if spec.path == "/" {
                file.group("/")?
            } else {
                let parent_path = spec.parent.as_deref().unwrap_or("/");
                let parent = self
                    .groups
                    .get(parent_path)
                    .ok_or_else(|| WriterError::MissingParent(parent_path.to_string()))?;
                parent.create_group(&spec.name)?
            };
            // the file root never carries an NX_class tag
            if spec.path != "/" {
                write_text_attr(&group, "NX_class", &spec.nx_class)?;
            }
            for (name, value) in &spec.attributes {
                write_text_attr(&group, name, value)?;
            }
            debug!(path = %spec.path, class = %spec.nx_class, "group created");
            self.groups.insert(spec.path.clone(), group);
        }
        Ok(())
    }

    fn write_static_fields(&self) -> Result<(), WriterError> {
        for spec in self.structure.fields() {
            let parent = self
                .groups
                .get(&spec.parent)
                .ok_or_else(|| WriterError::MissingParent(spec.parent.clone()))?;
            let value = Value::TextArray(vec![spec.text.clone()]);
            let result = write_dataset(parent, &spec.name, &value).and_then(|dataset| {
                for (name, attr_value) in &spec.attributes {
                    write_text_attr(&dataset, name, attr_value)?;
                }
                Ok(())
            });
            result.map_err(|source| WriterError::StaticField {
                path: spec.path.clone(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    /// Write every data source matching `after_scan`. Each source is
    /// isolated: a failure is logged and recorded in the file, and the
    /// pass moves on.
    fn write_pass(
        &self,
        bindings: &Bindings,
        after_scan: bool,
        policy: ReadPolicy,
    ) -> Result<(), WriterError> {
        if self.file.is_none() {
            return Err(WriterError::Closed);
        }
        let structure = self.structure.clone();
        for spec in structure.pvs() {
            if spec.acquire_after_scan != after_scan {
                continue;
            }
            let connection = bindings.connection(&spec.path);
            let connected = connection.map(ValueConnection::is_connected).unwrap_or(false);

            // after-scan sources that never connected leave no dataset;
            // before-scan sources always leave at least a sentinel
            if after_scan && !connected {
                warn!(path = %spec.path, pv = %spec.pv_name, "skipping unconnected source");
                continue;
            }

            let value = self.acquire(spec, connection, connected, bindings, policy);
            if let Err(err) = self.store(spec, connection, &value) {
                error!(path = %spec.path, %err, "failed to store data source");
                self.store_failure(spec, &err);
            }
        }
        Ok(())
    }

    /// Read one source, degrading to sentinel text instead of failing.
    fn acquire(
        &self,
        spec: &PvSpec,
        connection: Option<&dyn ValueConnection>,
        connected: bool,
        bindings: &Bindings,
        policy: ReadPolicy,
    ) -> Value {
        let Some(connection) = connection.filter(|_| connected) else {
            warn!(path = %spec.path, pv = %spec.pv_name, "source not connected");
            return Value::Text(NOT_CONNECTED_TEXT.to_string());
        };
        let request = ReadRequest {
            as_string: spec.as_string,
            timeout: policy.timeout,
            fresh: policy.fresh,
        };
        let Some(value) = connection.get(&request) else {
            warn!(path = %spec.path, pv = %spec.pv_name, "source returned no value");
            return Value::Text(NO_DATA_TEXT.to_string());
        };
        match self.live_limit(spec, bindings, policy) {
            Some(limit) => value.truncated(limit),
            None => value,
        }
    }

    /// Current value of the source's declared length bound, if any.
    fn live_limit(
        &self,
        spec: &PvSpec,
        bindings: &Bindings,
        policy: ReadPolicy,
    ) -> Option<usize> {
        let limit_path = spec.length_limit.as_deref()?;
        let connection = bindings.connection(limit_path)?;
        let request = ReadRequest {
            as_string: false,
            timeout: policy.timeout,
            fresh: policy.fresh,
        };
        let limit = connection.get(&request)?.as_index();
        if limit.is_none() {
            warn!(path = %spec.path, limit = %limit_path, "length limit is not a valid bound");
        }
        limit
    }

    fn store(
        &self,
        spec: &PvSpec,
        connection: Option<&dyn ValueConnection>,
        value: &Value,
    ) -> Result<(), WriterError> {
        let parent = self
            .groups
            .get(&spec.parent)
            .ok_or_else(|| WriterError::MissingParent(spec.parent.clone()))?;
        let dataset = write_dataset(parent, &spec.label, value)?;

        write_text_attr(&dataset, "epics_pv", &spec.pv_name)?;
        // metadata is only trustworthy while the source is reachable
        let meta = |f: fn(&dyn ValueConnection) -> Option<String>| {
            connection
                .filter(|conn| conn.is_connected())
                .and_then(f)
                .unwrap_or_default()
        };
        write_text_attr(&dataset, "units", &meta(|conn| conn.units()))?;
        write_text_attr(&dataset, "epics_type", &meta(|conn| conn.type_name()))?;
        write_text_attr(
            &dataset,
            "epics_description",
            &meta(|conn| conn.description()),
        )?;
        for (name, attr_value) in &spec.attributes {
            write_text_attr(&dataset, name, attr_value)?;
        }
        Ok(())
    }

    /// Record a storage failure in place of the dataset, best effort.
    fn store_failure(&self, spec: &PvSpec, err: &WriterError) {
        let Some(parent) = self.groups.get(&spec.parent) else {
            return;
        };
        let note = Value::TextArray(vec![err.to_string()]);
        if let Err(second) = write_dataset(parent, &spec.label, &note) {
            error!(path = %spec.path, %second, "failed to record storage failure");
        }
    }

    /// Resolve link aliases, last, once every possible source exists.
    fn resolve_links(&self) -> Result<(), WriterError> {
        let file = self.file.as_ref().ok_or(WriterError::Closed)?;
        for spec in self.structure.links() {
            match spec.link_type {
                LinkType::NeXus => self.resolve_nexus_link(file, spec)?,
            }
        }
        Ok(())
    }

    fn resolve_nexus_link(&self, file: &File, spec: &LinkSpec) -> Result<(), WriterError> {
        tag_link_target(file, &spec.source_path)?;
        file.link_hard(&spec.source_path, &spec.path)?;
        debug!(path = %spec.path, source = %spec.source_path, "link resolved");
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(err) = self.close() {
                error!(%err, "failed to close output file");
            }
        }
    }
}

/// Tag a link source with a `target` attribute naming its own path, the
/// NeXus convention for linked data. An existing tag is left alone.
fn tag_link_target(file: &File, source_path: &str) -> Result<(), WriterError> {
    if let Ok(dataset) = file.dataset(source_path) {
        if dataset.attr("target").is_err() {
            write_text_attr(&dataset, "target", source_path)?;
        }
    } else if let Ok(group) = file.group(source_path) {
        if group.attr("target").is_err() {
            write_text_attr(&group, "target", source_path)?;
        }
    }
    Ok(())
}

/// Create (or replace) a dataset. Storage is always array shaped; a
/// scalar value is stored as a one-element array.
fn write_dataset(
    group: &Group,
    name: &str,
    value: &Value,
) -> Result<hdf5::Dataset, WriterError> {
    if group.link_exists(name) {
        group.unlink(name)?;
    }
    let dataset = match value.clone().normalized() {
        Value::IntArray(data) => group
            .new_dataset_builder()
            .with_data(data.as_slice())
            .create(name)?,
        Value::FloatArray(data) => group
            .new_dataset_builder()
            .with_data(data.as_slice())
            .create(name)?,
        other => {
            let Value::TextArray(data) = other else {
                return Err(WriterError::Hdf5(hdf5::Error::Internal(format!(
                    "non-array value for dataset '{name}'"
                ))));
            };
            let text = data
                .iter()
                .map(|item| item.parse::<VarLenUnicode>())
                .collect::<Result<Vec<_>, _>>()?;
            group
                .new_dataset_builder()
                .with_data(text.as_slice())
                .create(name)?
        }
    };
    Ok(dataset)
}

/// Write a variable-length UTF-8 attribute on any HDF5 object.
fn write_text_attr(location: &Location, name: &str, value: &str) -> Result<(), WriterError> {
    let text = value.parse::<VarLenUnicode>()?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&text)?;
    Ok(())
}
