//! Run one complete save against simulated data sources.
//!
//! ```sh
//! cargo run -p flynx --example save_sim
//! ```

use std::path::Path;

use flynx::{SaveSession, SimProvider, StructureManager, Value};

const CONFIG: &str = r#"
    <saveFlyData version="1.0">
        <triggerPV pvname="sim:Start" done_value="0" done_text="Done"/>
        <timeoutPV pvname="sim:ScanTime" poll_time_s="0.05"/>
        <NX_structure>
            <group name="root" class="NXroot">
                <group name="entry" class="NXentry">
                    <field name="title">
                        <text>simulated fly scan</text>
                    </field>
                    <group name="data" class="NXdata">
                        <attribute name="signal" value="raw"/>
                        <PV label="raw" pvname="sim:wave" length_limit="nord"/>
                        <PV label="nord" pvname="sim:wave.NORD"/>
                        <PV label="I0" pvname="sim:I0"/>
                    </group>
                    <link name="I0" source="/entry/data/I0"/>
                </group>
            </group>
        </NX_structure>
    </saveFlyData>
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let config = dir.path().join("layout.xml");
    std::fs::write(&config, CONFIG)?;

    let provider = SimProvider::new();
    provider.set_value("sim:wave", Value::FloatArray((0..100).map(f64::from).collect()));
    provider.set_value("sim:wave.NORD", Value::Int(42));
    provider.set_value("sim:I0", Value::Int(12345));
    provider.set_value("sim:ScanTime", Value::Float(1.0));
    provider.set_value("sim:Start", Value::Int(0));

    let output = Path::new("sim_scan.h5");
    let mut manager = StructureManager::new();
    let completed = SaveSession::run(output, &config, &mut manager, &provider)?;
    println!(
        "saved {} (scan completed in time: {completed})",
        output.display()
    );
    Ok(())
}
