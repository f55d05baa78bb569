//! End-to-end writes against simulated data sources, verified by
//! reopening the finished file.

use std::path::Path;
use std::sync::Arc;

use hdf5::types::VarLenUnicode;

use flynx_core::bind::Bindings;
use flynx_core::sim::SimProvider;
use flynx_core::structure::Structure;
use flynx_core::value::Value;
use flynx_writer::{FileWriter, NOT_CONNECTED_TEXT, NO_DATA_TEXT};

const CONFIG: &str = r#"
    <saveFlyData version="1.0">
        <triggerPV pvname="sim:Start" done_value="0" done_text="Done"/>
        <timeoutPV pvname="sim:ScanTime"/>
        <NX_structure>
            <group name="root" class="NXroot">
                <group name="entry" class="NXentry">
                    <field name="title">
                        <text>fly scan</text>
                    </field>
                    <group name="data" class="NXdata">
                        <attribute name="signal" value="raw"/>
                        <PV label="raw" pvname="sim:wave" length_limit="nord"/>
                        <PV label="nord" pvname="sim:wave.NORD"/>
                        <PV label="I0" pvname="sim:I0"/>
                        <PV label="comment" pvname="sim:comment" string="true"
                            acquire_after_scan="true"/>
                    </group>
                    <link name="I0" source="/entry/data/I0"/>
                </group>
            </group>
        </NX_structure>
    </saveFlyData>
"#;

fn fixture_structure(dir: &Path) -> Arc<Structure> {
    let config = dir.join("layout.xml");
    std::fs::write(&config, CONFIG).expect("write config");
    Arc::new(Structure::from_file(&config).expect("parse config"))
}

fn online_provider() -> SimProvider {
    let provider = SimProvider::new();
    provider.set_value("sim:wave", Value::FloatArray((0..10).map(f64::from).collect()));
    provider.set_value("sim:wave.NORD", Value::Int(5));
    provider.set_value("sim:I0", Value::Int(12345));
    provider.set_value("sim:comment", Value::Text("all good".into()));
    provider.set_description("sim:I0", "ion chamber");
    provider.set_units("sim:I0", "counts");
    provider
}

fn save(dir: &Path, provider: &SimProvider) -> std::path::PathBuf {
    let structure = fixture_structure(dir);
    let mut bindings = Bindings::new();
    bindings.connect_all(&structure, provider);

    let output = dir.join("scan.h5");
    let mut writer = FileWriter::create(structure, &output).expect("create file");
    writer.write_preliminary(&bindings).expect("preliminary pass");
    writer.write_final(&bindings).expect("final pass");
    output
}

fn read_text(dataset: &hdf5::Dataset) -> Vec<String> {
    dataset
        .read_raw::<VarLenUnicode>()
        .expect("read text data")
        .into_iter()
        .map(|item| item.to_string())
        .collect()
}

fn read_attr(location: &hdf5::Location, name: &str) -> String {
    location
        .attr(name)
        .expect("attribute present")
        .read_scalar::<VarLenUnicode>()
        .expect("read attribute")
        .to_string()
}

#[test]
fn full_save_produces_expected_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = online_provider();
    let output = save(dir.path(), &provider);

    let file = hdf5::File::open(&output).expect("reopen file");
    assert_eq!(read_attr(&file, "creator"), "flynx-writer");
    assert_eq!(read_attr(&file, "config_version"), "1.0");
    assert!(!read_attr(&file, "timestamp").is_empty());
    // only subgroups are class tagged, never the root itself
    assert!(file.attr("NX_class").is_err());

    let entry = file.group("/entry").expect("entry group");
    assert_eq!(read_attr(&entry, "NX_class"), "NXentry");
    let data = file.group("/entry/data").expect("data group");
    assert_eq!(read_attr(&data, "signal"), "raw");

    let title = file.dataset("/entry/title").expect("title dataset");
    assert_eq!(read_text(&title), vec!["fly scan".to_string()]);

    let i0 = file.dataset("/entry/data/I0").expect("I0 dataset");
    assert_eq!(i0.read_raw::<i64>().expect("read I0"), vec![12345]);
    assert_eq!(read_attr(&i0, "epics_pv"), "sim:I0");
    assert_eq!(read_attr(&i0, "units"), "counts");
    assert_eq!(read_attr(&i0, "epics_description"), "ion chamber");
    assert_eq!(read_attr(&i0, "epics_type"), "int");

    let comment = file.dataset("/entry/data/comment").expect("comment dataset");
    assert_eq!(read_text(&comment), vec!["all good".to_string()]);
}

#[test]
fn arrays_are_truncated_to_the_live_length_bound() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = online_provider();
    let output = save(dir.path(), &provider);

    let file = hdf5::File::open(&output).expect("reopen file");
    let raw = file.dataset("/entry/data/raw").expect("raw dataset");
    let data = raw.read_raw::<f64>().expect("read raw");
    assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn links_alias_tagged_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = online_provider();
    let output = save(dir.path(), &provider);

    let file = hdf5::File::open(&output).expect("reopen file");
    let alias = file.dataset("/entry/I0").expect("linked dataset");
    assert_eq!(alias.read_raw::<i64>().expect("read alias"), vec![12345]);
    assert_eq!(read_attr(&alias, "target"), "/entry/data/I0");

    let source = file.dataset("/entry/data/I0").expect("source dataset");
    assert_eq!(read_attr(&source, "target"), "/entry/data/I0");
}

#[test]
fn offline_source_degrades_to_sentinel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = online_provider();
    provider.set_offline("sim:I0");
    let output = save(dir.path(), &provider);

    let file = hdf5::File::open(&output).expect("reopen file");
    let i0 = file.dataset("/entry/data/I0").expect("I0 dataset");
    assert_eq!(read_text(&i0), vec![NOT_CONNECTED_TEXT.to_string()]);
    // metadata attrs are still written with empty placeholders
    assert_eq!(read_attr(&i0, "epics_pv"), "sim:I0");
    assert_eq!(read_attr(&i0, "units"), "");
}

#[test]
fn connected_source_without_a_value_degrades_to_no_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = online_provider();
    provider.set_no_data("sim:I0");
    let output = save(dir.path(), &provider);

    let file = hdf5::File::open(&output).expect("reopen file");
    let i0 = file.dataset("/entry/data/I0").expect("I0 dataset");
    assert_eq!(read_text(&i0), vec![NO_DATA_TEXT.to_string()]);
}

#[test]
fn unconnected_after_scan_source_leaves_no_dataset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = online_provider();
    provider.set_offline("sim:comment");
    let output = save(dir.path(), &provider);

    let file = hdf5::File::open(&output).expect("reopen file");
    assert!(file.dataset("/entry/data/comment").is_err());
    // the rest of the pass still ran
    assert!(file.dataset("/entry/data/I0").is_ok());
    assert!(!read_attr(&file, "timestamp").is_empty());
}

#[test]
fn link_to_after_scan_source_resolves_after_the_final_pass() {
    let config_xml = r#"
        <saveFlyData version="1.0">
            <triggerPV pvname="sim:Start" done_value="0" done_text="Done"/>
            <timeoutPV pvname="sim:ScanTime"/>
            <NX_structure>
                <group name="root" class="NXroot">
                    <group name="entry" class="NXentry">
                        <group name="data" class="NXdata">
                            <PV label="counts" pvname="sim:counts"
                                acquire_after_scan="true"/>
                        </group>
                        <link name="counts" source="/entry/data/counts"/>
                    </group>
                </group>
            </NX_structure>
        </saveFlyData>
    "#;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("layout.xml");
    std::fs::write(&config, config_xml).expect("write config");
    let structure = Arc::new(Structure::from_file(&config).expect("parse config"));

    let provider = SimProvider::new();
    provider.set_value("sim:counts", Value::IntArray(vec![1, 2, 3]));
    let mut bindings = Bindings::new();
    bindings.connect_all(&structure, &provider);

    let output = dir.path().join("scan.h5");
    let mut writer = FileWriter::create(structure, &output).expect("create file");
    writer.write_preliminary(&bindings).expect("preliminary pass");
    writer.write_final(&bindings).expect("final pass");

    let file = hdf5::File::open(&output).expect("reopen file");
    let alias = file.dataset("/entry/counts").expect("linked dataset");
    assert_eq!(alias.read_raw::<i64>().expect("read alias"), vec![1, 2, 3]);
    assert_eq!(read_attr(&alias, "target"), "/entry/data/counts");
}

#[test]
fn file_is_closed_even_when_the_final_pass_fails() {
    let config_xml = r#"
        <saveFlyData version="1.0">
            <triggerPV pvname="sim:Start" done_value="0" done_text="Done"/>
            <timeoutPV pvname="sim:ScanTime"/>
            <NX_structure>
                <group name="root" class="NXroot">
                    <group name="entry" class="NXentry">
                        <PV label="I0" pvname="sim:I0"/>
                        <link name="ghost" source="/entry/missing"/>
                    </group>
                </group>
            </NX_structure>
        </saveFlyData>
    "#;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("layout.xml");
    std::fs::write(&config, config_xml).expect("write config");
    let structure = Arc::new(Structure::from_file(&config).expect("parse config"));

    let provider = SimProvider::new();
    provider.set_value("sim:I0", Value::Int(1));
    let mut bindings = Bindings::new();
    bindings.connect_all(&structure, &provider);

    let output = dir.path().join("scan.h5");
    let mut writer = FileWriter::create(structure, &output).expect("create file");
    writer.write_preliminary(&bindings).expect("preliminary pass");
    assert!(writer.write_final(&bindings).is_err());

    // the broken link aborted the pass, but the file was still closed
    // and holds everything written before the failure
    let file = hdf5::File::open(&output).expect("reopen file");
    assert!(file.dataset("/entry/I0").is_ok());
}

#[test]
fn every_configured_path_is_materialized() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = online_provider();
    let output = save(dir.path(), &provider);
    let structure = fixture_structure(dir.path());

    let file = hdf5::File::open(&output).expect("reopen file");
    for (path, kind) in structure.all_paths() {
        let present = match kind {
            flynx_core::SpecKind::Group => file.group(path).is_ok(),
            _ => file.dataset(path).is_ok(),
        };
        assert!(present, "missing {path}");
    }
}
