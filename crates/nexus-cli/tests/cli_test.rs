use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const NX_TINY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- tiny test definition -->
<definition name="NXtiny" type="group" extends="NXobject" category="application" xmlns="http://definition.nexusformat.org/nxdl/3.1">
    <group type="NXentry">
        <field name="title"/>
        <field name="count" type="NX_POSINT"/>
    </group>
</definition>
"#;

fn cargo_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dataconverter"))
}

/// Schema root holding `applications/NXtiny.nxdl.xml`
fn schema_root() -> TempDir {
    let dir = TempDir::new().expect("temp dir should be created");
    let applications = dir.path().join("applications");
    fs::create_dir_all(&applications).expect("applications dir should be created");
    fs::write(applications.join("NXtiny.nxdl.xml"), NX_TINY).expect("definition should be written");
    dir
}

fn run(root: &Path, args: &[&str]) -> Output {
    Command::new(cargo_bin())
        .arg("--schema-root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("dataconverter should execute")
}

fn write_input(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("input.json");
    fs::write(&path, content).expect("input should be written");
    path
}

#[test]
fn test_generate_template_prints_required_keys() {
    let root = schema_root();
    let output = run(root.path(), &["generate-template", "--nxdl", "NXtiny"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let template: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(
        template["required"],
        serde_json::json!({"/ENTRY[entry]/title": null, "/ENTRY[entry]/count": null})
    );
}

#[test]
fn test_convert_writes_output_file() {
    let root = schema_root();
    let work = TempDir::new().unwrap();
    let input = write_input(
        work.path(),
        r#"{"/ENTRY[entry]/title": "first light", "/ENTRY[entry]/count": 3}"#,
    );
    let target = work.path().join("out.nxs.json");

    let output = run(
        root.path(),
        &[
            "convert",
            input.to_str().unwrap(),
            "--reader",
            "json_map",
            "--nxdl",
            "NXtiny",
            "--output",
            target.to_str().unwrap(),
        ],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let written = fs::read_to_string(&target).expect("output should exist");
    assert!(written.contains("first light"));
}

#[test]
fn test_validation_failure_prints_report_and_exits_one() {
    let root = schema_root();
    let work = TempDir::new().unwrap();
    let input = write_input(work.path(), r#"{"/ENTRY[entry]/count": 0}"#);
    let target = work.path().join("out.nxs.json");

    let output = run(
        root.path(),
        &[
            "convert",
            input.to_str().unwrap(),
            "-r",
            "json_map",
            "-n",
            "NXtiny",
            "-o",
            target.to_str().unwrap(),
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MissingRequired"), "stderr: {stderr}");
    assert!(stderr.contains("/ENTRY[entry]/title"), "stderr: {stderr}");
    assert!(!target.exists());
}

#[test]
fn test_setup_errors_use_distinct_exit_codes() {
    let root = schema_root();
    let work = TempDir::new().unwrap();
    let input = write_input(work.path(), "{}");
    let target = work.path().join("out.nxs.json");
    let input = input.to_str().unwrap();
    let target = target.to_str().unwrap();

    let missing_schema = run(
        root.path(),
        &["convert", input, "-r", "json_map", "-n", "NXnowhere", "-o", target],
    );
    assert_eq!(missing_schema.status.code(), Some(2));

    let unknown_reader = run(
        root.path(),
        &["convert", input, "-r", "mpes", "-n", "NXtiny", "-o", target],
    );
    assert_eq!(unknown_reader.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&unknown_reader.stderr).contains("Unknown reader 'mpes'"));
}

#[test]
fn test_params_file_supplies_missing_arguments() {
    let root = schema_root();
    let work = TempDir::new().unwrap();
    let input = write_input(
        work.path(),
        r#"{"/ENTRY[entry]/title": "from params", "/ENTRY[entry]/count": 1}"#,
    );
    let target = work.path().join("params_out.nxs.json");
    let params = work.path().join("params.yaml");
    fs::write(
        &params,
        format!(
            "dataconverter:\n  reader: json_map\n  nxdl: NXtiny\n  input-file: {}\n  output: {}\n",
            input.display(),
            target.display()
        ),
    )
    .unwrap();

    let output = run(
        root.path(),
        &["convert", "--params-file", params.to_str().unwrap()],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(target.exists());
}

#[test]
fn test_definition_survives_text_round_trip() {
    let work = TempDir::new().unwrap();
    let xml = work.path().join("NXtiny.nxdl.xml");
    fs::write(&xml, NX_TINY).unwrap();

    let to_text = run(work.path(), &["nxdl2nyaml", xml.to_str().unwrap()]);
    assert!(to_text.status.success(), "stderr: {}", String::from_utf8_lossy(&to_text.stderr));
    let text_path = work.path().join("NXtiny.yaml");
    let text = fs::read_to_string(&text_path).expect("text form should be written");
    assert!(text.starts_with("# tiny test definition\n"));
    assert!(text.contains("NXtiny(NXobject):"));
    assert!(text.contains("count(NX_POSINT):"));

    let back = work.path().join("back.nxdl.xml");
    let to_xml = run(
        work.path(),
        &[
            "nyaml2nxdl",
            text_path.to_str().unwrap(),
            "--output",
            back.to_str().unwrap(),
        ],
    );
    assert!(to_xml.status.success(), "stderr: {}", String::from_utf8_lossy(&to_xml.stderr));
    assert_eq!(fs::read_to_string(&back).unwrap(), NX_TINY);
}

#[test]
fn test_unreadable_definition_file_fails() {
    let work = TempDir::new().unwrap();
    let missing = work.path().join("NXmissing.nxdl.xml");
    let output = run(work.path(), &["nxdl2nyaml", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read"));
}
