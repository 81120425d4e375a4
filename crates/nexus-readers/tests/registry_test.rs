//! Reader selection and filling a seeded template

use nexus_ir::{Partition, Template, Value};
use nexus_readers::{Error, ReadOptions, ReaderRegistry};
use std::fs;
use tempfile::TempDir;

fn seeded(schema: &str) -> Template {
    let mut template = Template::new(schema, "NX");
    for (key, partition) in [
        ("/ENTRY[entry]/definition", Partition::Required),
        ("/ENTRY[entry]/start_time", Partition::Required),
        ("/ENTRY[entry]/INSTRUMENT[instrument]/DETECTOR[detector]/mode", Partition::Recommended),
    ] {
        template.seed(key, partition).unwrap();
    }
    template
}

#[test]
fn test_selected_reader_fills_template_in_place() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("values.json");
    fs::write(
        &input,
        r#"{
            "/ENTRY[entry]/definition": "NXscan",
            "/ENTRY[entry]/start_time": "2023-05-01T10:00:00+02:00",
            "/entry/instrument/detector/mode": "count"
        }"#,
    )?;

    let registry = ReaderRegistry::with_builtins();
    let reader = registry.select("json_map", "NXscan")?;
    let mut template = seeded("NXscan");
    let order_before: Vec<String> = template.documented().map(str::to_string).collect();

    reader.read(&mut template, &[input], &ReadOptions::new())?;

    let order_after: Vec<String> = template.documented().map(str::to_string).collect();
    assert_eq!(order_before, order_after);
    assert!(template.is_set("/ENTRY[entry]/start_time"));
    assert!(!template.is_set("/ENTRY[entry]/INSTRUMENT[instrument]/DETECTOR[detector]/mode"));
    assert_eq!(
        template
            .value("/entry/instrument/detector/mode")
            .and_then(Value::as_str),
        Some("count")
    );
    assert_eq!(
        template.partition_of("/entry/instrument/detector/mode"),
        Some(Partition::Undocumented)
    );
    Ok(())
}

#[test]
fn test_example_reader_is_limited_to_its_fixture() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("example.yaml");
    fs::write(&input, "start_time: \"2022-01-22T12:14:12.05018Z\"\n")?;

    let registry = ReaderRegistry::with_builtins();
    assert!(matches!(
        registry.select("example", "NXscan"),
        Err(Error::UnsupportedSchema { .. })
    ));

    let reader = registry.select("example", "NXtest")?;
    let mut template = seeded("NXtest");
    reader.read(&mut template, &[input], &ReadOptions::new())?;
    assert_eq!(
        template.value("/ENTRY[entry]/definition").and_then(Value::as_str),
        Some("NXtest")
    );
    assert_eq!(template.undocumented().count(), 0);
    Ok(())
}

#[test]
fn test_unreadable_input_reports_path() {
    let registry = ReaderRegistry::with_builtins();
    let reader = registry.select("json_map", "NXscan").ok().unwrap();
    let mut template = seeded("NXscan");
    let missing = std::path::PathBuf::from("/nonexistent/values.json");
    let error = reader
        .read(&mut template, &[missing], &ReadOptions::new())
        .unwrap_err();
    assert!(matches!(error, Error::Io { .. }));
    assert!(error.to_string().contains("/nonexistent/values.json"));
}
