//! End-to-end conversions against small on-disk definitions

use nexus_ir::{Partition, Value};
use nexus_pipeline::{ConvertOptions, ConvertOutcome, ConvertRequest, Converter, Error};
use nexus_schema::SchemaSearchPath;
use nexus_validation::DiagnosticKind;
use nexus_writer::ContainerTree;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const NX_EMPTY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definition name="NXempty" type="group" extends="NXobject" category="application">
    <group type="NXentry">
        <field name="definition"/>
    </group>
</definition>
"#;

const NX_HAPPY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definition name="NXhappy" type="group" extends="NXobject" category="application">
    <group type="NXentry">
        <field name="start_time" type="NX_DATE_TIME"/>
        <field name="count" type="NX_POSINT"/>
    </group>
</definition>
"#;

const NX_SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definition name="NXsourcetype" type="group" extends="NXobject" category="application">
    <group type="NXentry">
        <group name="source" type="NXsource">
            <field name="type">
                <enumeration>
                    <item value="laser"/>
                    <item value="x-ray"/>
                    <item value="electron"/>
                    <item value="other"/>
                </enumeration>
            </field>
        </group>
    </group>
</definition>
"#;

const NX_BEAM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definition name="NXbeamline" type="group" extends="NXobject" category="application">
    <group type="NXentry">
        <group name="beam" type="NXbeam" optional="true">
            <field name="wavelength" type="NX_FLOAT" units="NX_WAVELENGTH"/>
            <field name="energy" type="NX_FLOAT" units="NX_ENERGY"/>
        </group>
    </group>
</definition>
"#;

const NX_DETECTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definition name="NXdetmode" type="group" extends="NXobject" category="application">
    <group type="NXentry">
        <group type="NXinstrument">
            <group type="NXdetector">
                <field name="mode" recommended="true"/>
            </group>
        </group>
    </group>
</definition>
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let applications = dir.path().join("defs").join("applications");
        fs::create_dir_all(&applications).unwrap();
        for (name, xml) in [
            ("NXempty", NX_EMPTY),
            ("NXhappy", NX_HAPPY),
            ("NXsourcetype", NX_SOURCE),
            ("NXbeamline", NX_BEAM),
            ("NXdetmode", NX_DETECTOR),
        ] {
            fs::write(applications.join(format!("{name}.nxdl.xml")), xml).unwrap();
        }
        Self { dir }
    }

    fn converter(&self) -> Converter {
        Converter::new(SchemaSearchPath::new(vec![self.dir.path().join("defs")]))
    }

    fn input(&self, name: &str, content: serde_json::Value) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content.to_string()).unwrap();
        path
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("out.nxs.json")
    }
}

fn request(schema: &str, input: &Path, output: &Path) -> ConvertRequest {
    ConvertRequest::new()
        .with_reader("json_map")
        .with_schema(schema)
        .with_input(input)
        .with_output(output)
}

#[test]
fn test_empty_template_has_only_the_required_definition() {
    let workspace = Workspace::new();
    let converter = workspace.converter();
    let options = ConvertOptions {
        generate_template: true,
        ..ConvertOptions::default()
    };

    let outcome = converter
        .convert(ConvertRequest::new().with_schema("NXempty").with_options(options))
        .unwrap();
    let ConvertOutcome::Template(mut template) = outcome else {
        panic!("expected the template");
    };
    assert_eq!(
        template.to_json(),
        json!({"required": {"/ENTRY[entry]/definition": null}})
    );

    let schema = converter.loader().load("NXempty").unwrap();
    let report = nexus_validation::validate(&mut template, &schema);
    assert!(report
        .find(DiagnosticKind::MissingRequired, "/ENTRY[entry]/definition")
        .is_some());
    assert_eq!(report.errors().count(), 1);
}

#[test]
fn test_happy_path_writes_typed_values() {
    let workspace = Workspace::new();
    let input = workspace.input(
        "happy.json",
        json!({
            "/ENTRY[entry]/start_time": "2023-05-01T10:00:00+02:00",
            "/ENTRY[entry]/count": 5
        }),
    );
    let output = workspace.output();

    let outcome = workspace
        .converter()
        .convert(request("NXhappy", &input, &output))
        .unwrap();
    let ConvertOutcome::Written { report, .. } = outcome else {
        panic!("expected a written file");
    };
    assert!(report.is_empty());

    let tree = ContainerTree::load(&output).unwrap();
    assert_eq!(
        tree.dataset_value("/entry/start_time").unwrap(),
        Value::from("2023-05-01T10:00:00+02:00")
    );
    assert_eq!(tree.dataset_value("/entry/count").unwrap(), Value::from(5i64));
    assert_eq!(tree.attribute("/entry", "type"), Some(&json!("NXentry")));
    assert_eq!(tree.attribute("/", "default"), Some(&json!("entry")));
}

#[test]
fn test_open_enumeration_warns_and_still_writes() {
    let workspace = Workspace::new();
    let input = workspace.input(
        "source.json",
        json!({"/ENTRY[entry]/source/type": "neutron"}),
    );
    let output = workspace.output();

    let outcome = workspace
        .converter()
        .convert(request("NXsourcetype", &input, &output))
        .unwrap();
    let ConvertOutcome::Written { report, .. } = outcome else {
        panic!("expected a written file");
    };
    assert_eq!(report.errors().count(), 0);
    assert_eq!(report.warnings().count(), 1);
    assert_eq!(report.count(DiagnosticKind::EnumViolation), 1);

    let tree = ContainerTree::load(&output).unwrap();
    assert_eq!(
        tree.dataset_value("/entry/source/type").unwrap(),
        Value::from("neutron")
    );
    assert_eq!(tree.attribute("/entry/source", "type"), Some(&json!("NXsource")));
}

#[test]
fn test_partial_optional_group_fails_without_output() {
    let workspace = Workspace::new();
    let input = workspace.input(
        "beam.json",
        json!({
            "/ENTRY[entry]/beam/wavelength": 532,
            "/ENTRY[entry]/beam/wavelength/@units": "nm"
        }),
    );
    let output = workspace.output();

    let error = workspace
        .converter()
        .convert(request("NXbeamline", &input, &output))
        .unwrap_err();
    assert_eq!(error.exit_code(), 1);
    let Error::Validation(report) = error else {
        panic!("expected a validation failure");
    };
    assert!(report
        .find(DiagnosticKind::OptionalParentClosure, "/ENTRY[entry]/beam")
        .is_some());
    assert!(!output.exists());
}

#[test]
fn test_instance_path_keys_are_salvaged_and_written() {
    let workspace = Workspace::new();
    let input = workspace.input(
        "detector.json",
        json!({"/entry/instrument/detector/mode": "count"}),
    );
    let output = workspace.output();

    let outcome = workspace
        .converter()
        .convert(request("NXdetmode", &input, &output))
        .unwrap();
    let ConvertOutcome::Written { template, report, .. } = outcome else {
        panic!("expected a written file");
    };
    assert!(report.is_valid());
    let salvaged = "/ENTRY[entry]/INSTRUMENT[instrument]/DETECTOR[detector]/mode";
    assert_eq!(template.partition_of(salvaged), Some(Partition::Recommended));
    assert_eq!(template.undocumented().count(), 0);

    let tree = ContainerTree::load(&output).unwrap();
    assert_eq!(
        tree.dataset_value("/entry/instrument/detector/mode").unwrap(),
        Value::from("count")
    );
    assert_eq!(
        tree.attribute("/entry/instrument/detector", "type"),
        Some(&json!("NXdetector"))
    );
}

#[test]
fn test_strict_mode_rejects_unknown_keys() {
    let workspace = Workspace::new();
    let input = workspace.input(
        "strict.json",
        json!({
            "/ENTRY[entry]/start_time": "2023-05-01T10:00:00Z",
            "/ENTRY[entry]/count": 1,
            "/entry/notes": "not in the schema"
        }),
    );
    let output = workspace.output();

    let lenient = workspace
        .converter()
        .convert(request("NXhappy", &input, &output))
        .unwrap();
    let ConvertOutcome::Written { report, summary, .. } = lenient else {
        panic!("expected a written file");
    };
    assert_eq!(report.count(DiagnosticKind::UndocumentedPath), 1);
    assert_eq!(summary.skipped, 1);

    let strict = ConvertOptions {
        strict: true,
        ..ConvertOptions::default()
    };
    let error = workspace
        .converter()
        .convert(request("NXhappy", &input, &output).with_options(strict))
        .unwrap_err();
    assert!(matches!(error, Error::Validation(_)));
}

#[test]
fn test_params_file_drives_the_run() {
    let workspace = Workspace::new();
    let input = workspace.input(
        "params_input.json",
        json!({
            "/ENTRY[entry]/start_time": "2022-01-22T12:14:12.05018Z",
            "/ENTRY[entry]/count": 2
        }),
    );
    let output = workspace.output();
    let params = workspace.dir.path().join("params.yaml");
    fs::write(
        &params,
        format!(
            "dataconverter:\n  reader: json_map\n  nxdl: NXhappy\n  input-file: {}\n  output: {}\n",
            input.display(),
            output.display()
        ),
    )
    .unwrap();

    let options = ConvertOptions {
        params_file: Some(params),
        ..ConvertOptions::default()
    };
    let outcome = workspace
        .converter()
        .convert(ConvertRequest::new().with_options(options))
        .unwrap();
    assert!(matches!(outcome, ConvertOutcome::Written { .. }));
    assert!(output.exists());
}

#[test]
fn test_setup_failures_map_to_exit_codes() {
    let workspace = Workspace::new();
    let input = workspace.input("x.json", json!({}));
    let output = workspace.output();
    let converter = workspace.converter();

    let missing = converter
        .convert(request("NXnowhere", &input, &output))
        .unwrap_err();
    assert!(matches!(missing, Error::SchemaNotFound { .. }));
    assert_eq!(missing.exit_code(), 2);

    let unsupported = converter
        .convert(request("NXhappy", &input, &output).with_reader("example"))
        .unwrap_err();
    assert!(matches!(unsupported, Error::UnsupportedSchema { .. }));

    let unknown = converter
        .convert(request("NXhappy", &input, &output).with_reader("mpes"))
        .unwrap_err();
    assert!(matches!(unknown, Error::UnknownReader { .. }));
    assert_eq!(unknown.exit_code(), 4);
}

#[test]
fn test_params_schema_roots_stay_with_their_request() {
    let workspace = Workspace::new();
    let extra = workspace.dir.path().join("extra");
    fs::create_dir_all(extra.join("applications")).unwrap();
    fs::write(
        extra.join("applications").join("NXextra.nxdl.xml"),
        NX_HAPPY.replace("NXhappy", "NXextra"),
    )
    .unwrap();
    let input = workspace.input(
        "extra.json",
        json!({
            "/ENTRY[entry]/start_time": "2024-02-02T08:00:00Z",
            "/ENTRY[entry]/count": 3
        }),
    );
    let output = workspace.output();
    let params = workspace.dir.path().join("extra.yaml");
    fs::write(
        &params,
        format!("dataconverter:\n  schema-root: {}\n", extra.display()),
    )
    .unwrap();

    let converter = workspace.converter();
    let with_params = ConvertOptions {
        params_file: Some(params),
        ..ConvertOptions::default()
    };
    let outcome = converter
        .convert(request("NXextra", &input, &output).with_options(with_params))
        .unwrap();
    assert!(matches!(outcome, ConvertOutcome::Written { .. }));
    assert_eq!(
        converter.loader().search_path().roots(),
        [workspace.dir.path().join("defs")]
    );

    let error = converter
        .convert(request("NXextra", &input, &output))
        .unwrap_err();
    assert!(matches!(error, Error::SchemaNotFound { .. }));
}
