//! Validation engine
//!
//! Steps run in a fixed order because later ones read what earlier ones
//! normalised:
//!
//! 1. required closure
//! 2. undocumented salvage
//! 3. per-value type and enumeration rules
//! 4. optional-parent closure
//! 5. units consistency

use crate::reporter::{DiagnosticKind, ValidationReport};
use crate::rules::{Checked, NxType, check_enumeration, check_value};
use nexus_ir::{Partition, SchemaPath, Segment, Template, Value};
use nexus_schema::{NodeKind, Optionality, Schema};
use tracing::{debug, info, trace};

/// Validation configuration
#[derive(Debug, Clone, Default)]
pub struct ValidationConfig {
    /// Undocumented keys left after salvage are errors instead of warnings
    pub strict: bool,
}

/// Main validation engine
pub struct ValidationEngine<'s> {
    schema: &'s Schema,
    config: ValidationConfig,
}

impl<'s> ValidationEngine<'s> {
    /// Create a new validation engine
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            config: ValidationConfig::default(),
        }
    }

    /// Create with specific configuration
    pub fn with_config(schema: &'s Schema, config: ValidationConfig) -> Self {
        Self { schema, config }
    }

    /// Validate and normalise a filled template, collecting every finding
    pub fn validate(&self, template: &mut Template) -> ValidationReport {
        let mut report = ValidationReport::new();

        self.check_required(template, &mut report);
        self.salvage_undocumented(template, &mut report);
        self.check_values(template, &mut report);
        self.check_optional_parents(template, &mut report);
        self.check_units(template, &mut report);

        info!(
            schema = %self.schema.name,
            errors = report.errors().count(),
            warnings = report.warnings().count(),
            "Validation finished"
        );
        report
    }

    fn check_required(&self, template: &Template, report: &mut ValidationReport) {
        let presence = Presence::collect(self.schema, template);
        for key in template.keys(Partition::Required) {
            let Ok(path) = SchemaPath::parse(key) else {
                continue;
            };
            let lone = template.is_lone_group(key);
            for instance in presence.instances(&path) {
                if lone {
                    if !presence.any_below(&instance) {
                        report.error(
                            DiagnosticKind::MissingRequired,
                            instance.to_string(),
                            "required group has no content",
                        );
                    }
                    continue;
                }
                if presence.contains(&instance) {
                    continue;
                }
                // A missing field already explains its missing unit
                if instance.is_units()
                    && instance
                        .parent()
                        .is_some_and(|field| !presence.contains(&field))
                {
                    continue;
                }
                report.error(
                    DiagnosticKind::MissingRequired,
                    instance.to_string(),
                    "required value is missing",
                );
            }
        }
    }

    fn salvage_undocumented(&self, template: &mut Template, report: &mut ValidationReport) {
        let undocumented: Vec<String> = template.undocumented().map(str::to_string).collect();

        for key in &undocumented {
            if template.partition_of(key) != Some(Partition::Undocumented) {
                continue;
            }
            let Some(target) = self.salvage_target(template, key) else {
                continue;
            };
            let (to, partition) = target;
            match template.relocate(key, &to, partition) {
                Ok(landed) => {
                    debug!(
                        from = %key,
                        to = %to,
                        partition = landed.as_str(),
                        "Salvaged undocumented key"
                    );
                }
                Err(e) => {
                    trace!(key = %key, error = %e, "Salvage failed");
                    continue;
                }
            }

            let twin = format!("{key}/@units");
            if template.partition_of(&twin) == Some(Partition::Undocumented) {
                let to_units = format!("{to}/@units");
                if let Err(e) = template.relocate(&twin, &to_units, partition) {
                    trace!(key = %twin, error = %e, "Units salvage failed");
                }
            }
        }

        let remaining: Vec<String> = template.undocumented().map(str::to_string).collect();
        for key in remaining {
            let detail = "key does not resolve to any schema node";
            if self.config.strict {
                report.error(DiagnosticKind::UndocumentedPath, key, detail);
            } else {
                report.warn(DiagnosticKind::UndocumentedPath, key, detail);
            }
        }
    }

    /// Documented spelling and partition for an undocumented key
    fn salvage_target(&self, template: &Template, key: &str) -> Option<(String, Partition)> {
        let path = SchemaPath::parse(key).ok()?;
        let resolved = self.schema.resolve(&path)?;
        let to = resolved.to_string();

        if let Some(partition) = template.partition_of(&to).filter(|p| p.is_documented()) {
            return Some((to, partition));
        }

        // Prefer the partition the builder chose for the same concept
        let concept = resolved.concept_path();
        let seeded = template
            .documented()
            .find(|k| SchemaPath::parse(k).is_ok_and(|p| p.concept_path() == concept))
            .and_then(|k| template.partition_of(k));
        if let Some(partition) = seeded {
            return Some((to, partition));
        }

        let owner = if resolved.is_units() {
            resolved.parent().and_then(|field| self.schema.node(&field).cloned())
        } else {
            self.schema.node(&resolved).cloned()
        }?;
        let partition = match owner.optionality {
            Optionality::Required => Partition::Required,
            Optionality::Recommended => Partition::Recommended,
            Optionality::Optional => Partition::Optional,
        };
        Some((to, partition))
    }

    fn check_values(&self, template: &mut Template, report: &mut ValidationReport) {
        let filled: Vec<(String, Value)> = template
            .entries()
            .filter(|(_, partition, _)| partition.is_documented())
            .filter_map(|(key, _, value)| value.map(|v| (key.to_string(), v.clone())))
            .collect();

        for (key, value) in filled {
            let Ok(path) = SchemaPath::parse(&key) else {
                continue;
            };
            if path.is_units() {
                continue;
            }
            let Some(node) = self.schema.node(&path) else {
                continue;
            };
            if !matches!(node.kind, NodeKind::Field | NodeKind::Attribute) {
                continue;
            }

            let value = match check_value(&value, NxType::from_token(node.type_token.as_deref())) {
                Checked::Valid => value,
                Checked::Coerced(coerced) => {
                    trace!(key = %key, "Coerced value to {}", coerced.describe());
                    if let Err(e) = template.set(&key, coerced.clone()) {
                        trace!(key = %key, error = %e, "Could not store coerced value");
                    }
                    coerced
                }
                Checked::Invalid { kind, detail } => {
                    report.error(kind, &key, detail);
                    continue;
                }
            };

            if let Some(spec) = &node.enumeration {
                let outside = check_enumeration(&value, spec);
                if outside.is_empty() {
                    continue;
                }
                let detail = format!(
                    "{} not in [{}]",
                    outside
                        .iter()
                        .map(|v| format!("'{v}'"))
                        .collect::<Vec<_>>()
                        .join(", "),
                    spec.items.join(", ")
                );
                if spec.open {
                    report.warn(DiagnosticKind::EnumViolation, &key, detail);
                } else {
                    report.error(DiagnosticKind::EnumViolation, &key, detail);
                }
            }
        }
    }

    fn check_optional_parents(&self, template: &Template, report: &mut ValidationReport) {
        let presence = Presence::collect(self.schema, template);
        for (parent, descendants) in template.optional_parents() {
            let Ok(parent_path) = SchemaPath::parse(parent) else {
                continue;
            };
            let descendants: Vec<(SchemaPath, bool)> = descendants
                .iter()
                .filter_map(|d| SchemaPath::parse(d).ok().map(|p| (p, template.is_lone_group(d))))
                .filter(|(p, _)| p.is_child_of(&parent_path))
                .collect();

            // Each concrete instance of the parent is closed on its own
            for instance in presence.instances(&parent_path) {
                let mut present = Vec::new();
                let mut missing = Vec::new();
                for (descendant, lone) in &descendants {
                    let concrete = descendant.replace_prefix(parent_path.len(), &instance);
                    let spellings = presence.instances_below(&concrete, instance.len());
                    let set = spellings.iter().any(|spelling| {
                        if *lone {
                            presence.any_below(spelling)
                        } else {
                            presence.contains(spelling)
                        }
                    });
                    if set {
                        present.push(concrete.to_string());
                    } else {
                        missing.push(concrete.to_string());
                    }
                }
                if !present.is_empty() && !missing.is_empty() {
                    report.error(
                        DiagnosticKind::OptionalParentClosure,
                        instance.to_string(),
                        format!("{} set but {} missing", present.join(", "), missing.join(", ")),
                    );
                }
            }
        }
    }

    fn check_units(&self, template: &Template, report: &mut ValidationReport) {
        let presence = Presence::collect(self.schema, template);
        for (key, _, value) in template.entries() {
            if value.is_none() {
                continue;
            }
            let Ok(path) = SchemaPath::parse(key) else {
                continue;
            };
            if !path.is_units() {
                continue;
            }
            let Some(field) = path.parent() else {
                continue;
            };
            let resolved = self.schema.resolve(&field).unwrap_or_else(|| field.clone());
            if !template.is_set(&field.to_string()) && !presence.contains(&resolved) {
                report.error(
                    DiagnosticKind::OrphanUnits,
                    key,
                    format!("units set but {field} has no value"),
                );
            }
        }
    }
}

/// Set keys in their resolved spelling, for rename-tolerant presence checks
struct Presence {
    set: Vec<SchemaPath>,
}

impl Presence {
    fn collect(schema: &Schema, template: &Template) -> Self {
        let set = template
            .entries()
            .filter(|(_, _, value)| value.is_some())
            .filter_map(|(key, _, _)| SchemaPath::parse(key).ok())
            .map(|path| schema.resolve(&path).unwrap_or(path))
            .collect();
        Self { set }
    }

    fn contains(&self, path: &SchemaPath) -> bool {
        self.set.contains(path)
    }

    /// True when a set key lies strictly below `path`
    fn any_below(&self, path: &SchemaPath) -> bool {
        self.set.iter().any(|p| p.is_child_of(path))
    }

    /// Concrete spellings of a seeded key, one per populated instance combination
    fn instances(&self, path: &SchemaPath) -> Vec<SchemaPath> {
        self.instances_below(path, 0)
    }

    /// Like [`Presence::instances`], keeping the first `fixed` segments as given.
    ///
    /// A `TYPE[name]` segment expands to every instance of `TYPE` that a set key
    /// uses under the same concrete prefix. The seeded name stands in only when no
    /// key populates that level.
    fn instances_below(&self, path: &SchemaPath, fixed: usize) -> Vec<SchemaPath> {
        let mut spellings = vec![path.prefix(fixed)];
        for (depth, segment) in path.segments().iter().enumerate().skip(fixed) {
            let mut next = Vec::new();
            for prefix in &spellings {
                let Segment::Named { concept, .. } = segment else {
                    next.push(prefix.child(segment.clone()));
                    continue;
                };
                let mut populated: Vec<&Segment> = Vec::new();
                for found in self
                    .set
                    .iter()
                    .filter(|p| p.len() > depth && p.starts_with(prefix))
                    .map(|p| &p.segments()[depth])
                {
                    let same_concept =
                        matches!(found, Segment::Named { concept: c, .. } if c == concept);
                    if same_concept && !populated.contains(&found) {
                        populated.push(found);
                    }
                }
                if populated.is_empty() {
                    next.push(prefix.child(segment.clone()));
                } else {
                    next.extend(populated.into_iter().map(|s| prefix.child(s.clone())));
                }
            }
            spellings = next;
        }
        spellings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::Severity;
    use nexus_schema::{TemplateBuilder, schema_from_document};

    const DEFINITION: &str = r#"<definition name="NXunit" type="group" category="application">
    <group type="NXentry">
        <field name="definition">
            <enumeration>
                <item value="NXunit"/>
            </enumeration>
        </field>
        <field name="count" type="NX_POSINT"/>
        <field name="ratio" type="NX_FLOAT" minOccurs="0"/>
        <group name="beam" type="NXbeam" optional="true">
            <field name="wavelength" type="NX_FLOAT" units="NX_WAVELENGTH"/>
            <field name="energy" type="NX_FLOAT" units="NX_ENERGY"/>
        </group>
        <group type="NXsample"/>
    </group>
</definition>"#;

    fn fixture() -> (Schema, Template) {
        let document = nexus_nxdl::parse_xml(DEFINITION).unwrap();
        let schema = schema_from_document(&document).unwrap();
        let template = TemplateBuilder::new(&schema).build().unwrap();
        (schema, template)
    }

    const MULTI_INSTANCE: &str = r#"<definition name="NXmulti" type="group" category="application">
    <group type="NXentry">
        <field name="definition"/>
        <group type="NXdetector" optional="true">
            <field name="a"/>
            <field name="b"/>
        </group>
    </group>
</definition>"#;

    fn multi_instance() -> (Schema, Template) {
        let document = nexus_nxdl::parse_xml(MULTI_INSTANCE).unwrap();
        let schema = schema_from_document(&document).unwrap();
        let template = TemplateBuilder::new(&schema).build().unwrap();
        (schema, template)
    }

    fn fill_required(template: &mut Template) {
        template.set("/ENTRY[entry]/definition", Value::from("NXunit")).unwrap();
        template.set("/ENTRY[entry]/count", Value::from(2_i64)).unwrap();
        template
            .set("/ENTRY[entry]/SAMPLE[sample]/name", Value::from("quartz"))
            .unwrap();
    }

    #[test]
    fn test_empty_template_reports_missing_required() {
        let (schema, mut template) = fixture();
        let report = ValidationEngine::new(&schema).validate(&mut template);
        let missing: Vec<&str> = report
            .iter()
            .filter(|d| d.kind == DiagnosticKind::MissingRequired)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(
            missing,
            vec![
                "/ENTRY[entry]/definition",
                "/ENTRY[entry]/count",
                "/ENTRY[entry]/SAMPLE[sample]"
            ]
        );
    }

    #[test]
    fn test_lone_group_satisfied_by_descendant() {
        let (schema, mut template) = fixture();
        fill_required(&mut template);
        let report = ValidationEngine::new(&schema).validate(&mut template);
        assert!(report.is_valid(), "{report:?}");
        // the sample name is not in the schema, so it is reported but salvage cannot place it
        assert_eq!(report.count(DiagnosticKind::UndocumentedPath), 1);
    }

    #[test]
    fn test_coercion_is_stored_and_idempotent() {
        let (schema, mut template) = fixture();
        fill_required(&mut template);
        template.set("/ENTRY[entry]/ratio", Value::from(3_i64)).unwrap();

        let engine = ValidationEngine::new(&schema);
        assert!(engine.validate(&mut template).is_valid());
        assert_eq!(template.value("/ENTRY[entry]/ratio"), Some(&Value::from(3.0)));

        let snapshot = template.clone();
        engine.validate(&mut template);
        assert_eq!(template, snapshot);
    }

    #[test]
    fn test_closed_enumeration_violation_is_an_error() {
        let (schema, mut template) = fixture();
        fill_required(&mut template);
        template.set("/ENTRY[entry]/definition", Value::from("NXother")).unwrap();
        let report = ValidationEngine::new(&schema).validate(&mut template);
        let diagnostic = report
            .find(DiagnosticKind::EnumViolation, "/ENTRY[entry]/definition")
            .unwrap();
        assert_eq!(diagnostic.severity, Severity::Error);
    }

    #[test]
    fn test_optional_parent_closure() {
        let (schema, mut template) = fixture();
        fill_required(&mut template);
        template
            .set("/ENTRY[entry]/beam/wavelength", Value::from(532_i64))
            .unwrap();
        template
            .set("/ENTRY[entry]/beam/wavelength/@units", Value::from("nm"))
            .unwrap();
        let report = ValidationEngine::new(&schema).validate(&mut template);
        let diagnostic = report
            .find(DiagnosticKind::OptionalParentClosure, "/ENTRY[entry]/beam")
            .unwrap();
        assert!(diagnostic.detail.contains("/ENTRY[entry]/beam/energy"));
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_salvage_moves_instance_keys_with_units() {
        let (schema, mut template) = fixture();
        fill_required(&mut template);
        template.set("/entry/beam/wavelength", Value::from(1.5)).unwrap();
        template.set("/entry/beam/wavelength/@units", Value::from("nm")).unwrap();
        template.set("/entry/beam/energy", Value::from(2.0)).unwrap();
        template.set("/entry/beam/energy/@units", Value::from("eV")).unwrap();

        let report = ValidationEngine::new(&schema).validate(&mut template);
        assert!(report.is_valid(), "{report:?}");
        assert_eq!(
            template.partition_of("/ENTRY[entry]/beam/wavelength/@units"),
            Some(Partition::Optional)
        );
        assert_eq!(
            template.value("/ENTRY[entry]/beam/energy"),
            Some(&Value::from(2.0))
        );
        assert!(!template.contains("/entry/beam/energy"));
    }

    #[test]
    fn test_strict_mode_promotes_undocumented() {
        let (schema, mut template) = fixture();
        fill_required(&mut template);
        template.set("/ENTRY[entry]/unknown", Value::from(1_i64)).unwrap();
        let config = ValidationConfig { strict: true };
        let report = ValidationEngine::with_config(&schema, config).validate(&mut template);
        let diagnostic = report
            .find(DiagnosticKind::UndocumentedPath, "/ENTRY[entry]/unknown")
            .unwrap();
        assert_eq!(diagnostic.severity, Severity::Error);
    }

    #[test]
    fn test_orphan_units() {
        let (schema, mut template) = fixture();
        fill_required(&mut template);
        template
            .set("/ENTRY[entry]/beam/energy/@units", Value::from("eV"))
            .unwrap();
        let report = ValidationEngine::new(&schema).validate(&mut template);
        assert!(
            report
                .find(DiagnosticKind::OrphanUnits, "/ENTRY[entry]/beam/energy/@units")
                .is_some()
        );
    }

    #[test]
    fn test_each_optional_instance_is_closed_separately() {
        let (schema, mut template) = multi_instance();
        template.set("/ENTRY[entry]/definition", Value::from("NXmulti")).unwrap();
        template.set("/ENTRY[entry]/DETECTOR[det1]/a", Value::from(1_i64)).unwrap();
        template.set("/ENTRY[entry]/DETECTOR[det2]/b", Value::from(2_i64)).unwrap();

        let report = ValidationEngine::new(&schema).validate(&mut template);
        assert_eq!(report.count(DiagnosticKind::OptionalParentClosure), 2, "{report:?}");
        let det1 = report
            .find(DiagnosticKind::OptionalParentClosure, "/ENTRY[entry]/DETECTOR[det1]")
            .unwrap();
        assert!(det1.detail.contains("/ENTRY[entry]/DETECTOR[det1]/b"));
        assert!(
            report
                .find(DiagnosticKind::OptionalParentClosure, "/ENTRY[entry]/DETECTOR[det2]")
                .is_some()
        );
    }

    #[test]
    fn test_complete_and_absent_optional_instances_pass() {
        let (schema, mut template) = multi_instance();
        template.set("/ENTRY[entry]/definition", Value::from("NXmulti")).unwrap();
        template.set("/ENTRY[entry]/DETECTOR[det1]/a", Value::from(1_i64)).unwrap();
        template.set("/ENTRY[entry]/DETECTOR[det1]/b", Value::from(2_i64)).unwrap();

        let report = ValidationEngine::new(&schema).validate(&mut template);
        assert!(report.is_valid(), "{report:?}");
    }

    #[test]
    fn test_every_populated_entry_needs_its_required_fields() {
        let (schema, mut template) = multi_instance();
        template.set("/ENTRY[entry1]/definition", Value::from("NXmulti")).unwrap();
        template.set("/ENTRY[entry2]/DETECTOR[detector]/a", Value::from(1_i64)).unwrap();
        template.set("/ENTRY[entry2]/DETECTOR[detector]/b", Value::from(2_i64)).unwrap();

        let report = ValidationEngine::new(&schema).validate(&mut template);
        let missing: Vec<&str> = report
            .iter()
            .filter(|d| d.kind == DiagnosticKind::MissingRequired)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(missing, vec!["/ENTRY[entry2]/definition"]);
        assert_eq!(report.errors().count(), 1);
    }
}
