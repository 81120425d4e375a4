//! Schema loader with search-path lookup and inheritance resolution

use crate::inheritance::{InheritanceGraph, merge_inherited};
use crate::model::{
    Category, DimSpec, DimensionsSpec, EnumerationSpec, NodeKind, Optionality, Schema,
    SchemaNode, Units,
};
use crate::registry::ConcurrentSchemaRegistry;
use crate::{Error, Result};
use nexus_nxdl::{Dim, ElementKind, NxdlDocument, NxdlElement};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Definition every other definition ultimately extends; it contributes nothing
pub const IMPLICIT_ROOT: &str = "NXobject";

/// Name of the root base class, available even without a file on the search path
pub const ROOT_BASE_CLASS: &str = "NXroot";

/// Name of the test fixture definition, looked up in the fixture directory first
pub const TEST_FIXTURE: &str = "NXtest";

const BUILTIN_NXROOT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definition name="NXroot" type="group" extends="NXobject" category="base">
    <doc>
        Definition of the root group of a data file.
    </doc>
    <attribute name="NX_class"/>
    <attribute name="file_time" type="NX_DATE_TIME"/>
    <attribute name="file_name"/>
    <attribute name="file_update_time" type="NX_DATE_TIME"/>
    <attribute name="NeXus_version"/>
    <attribute name="HDF5_Version"/>
    <attribute name="creator"/>
    <attribute name="default"/>
    <group type="NXentry"/>
</definition>
"#;

/// Ordered schema roots, each holding the three definition subdirectories
#[derive(Debug, Clone, Default)]
pub struct SchemaSearchPath {
    roots: Vec<PathBuf>,
    fixtures: Option<PathBuf>,
}

impl SchemaSearchPath {
    /// Subdirectories searched under every root, in order
    pub const SUBDIRECTORIES: [&'static str; 3] =
        ["base_classes", "applications", "contributed_definitions"];

    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            fixtures: None,
        }
    }

    /// Directory holding the `NXtest` fixture
    pub fn with_fixtures(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures = Some(dir.into());
        self
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// First file defining `name`, XML form preferred over text form
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_names = [format!("{name}.nxdl.xml"), format!("{name}.yaml")];

        if name == TEST_FIXTURE {
            if let Some(found) = self
                .fixtures
                .iter()
                .flat_map(|dir| file_names.iter().map(move |f| dir.join(f)))
                .find(|path| path.is_file())
            {
                return Some(found);
            }
        }

        self.roots
            .iter()
            .flat_map(|root| Self::SUBDIRECTORIES.iter().map(move |sub| root.join(sub)))
            .flat_map(|dir| file_names.iter().map(move |f| dir.join(f)))
            .find(|path| path.is_file())
    }

    fn describe(&self) -> String {
        let mut dirs: Vec<String> = self
            .roots
            .iter()
            .map(|root| root.display().to_string())
            .collect();
        if let Some(fixtures) = &self.fixtures {
            dirs.push(fixtures.display().to_string());
        }
        if dirs.is_empty() {
            "no schema roots".to_string()
        } else {
            dirs.join(", ")
        }
    }
}

/// Loads definitions by name, resolves `extends` and caches the result
pub struct SchemaLoader {
    registry: Arc<ConcurrentSchemaRegistry>,
    search_path: SchemaSearchPath,
}

impl SchemaLoader {
    /// Create a new schema loader over the given search path
    pub fn new(search_path: SchemaSearchPath) -> Self {
        Self {
            registry: Arc::new(ConcurrentSchemaRegistry::new()),
            search_path,
        }
    }

    /// Create a new schema loader with a pre-configured registry
    pub fn with_registry(
        registry: Arc<ConcurrentSchemaRegistry>,
        search_path: SchemaSearchPath,
    ) -> Self {
        Self {
            registry,
            search_path,
        }
    }

    /// Load a definition by name.
    ///
    /// Checks the cache first, then the search path. The returned schema has its
    /// whole `extends` chain spliced in.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no root defines `name`, [`Error::Conflict`] for
    /// contradictory optionality, [`Error::Inheritance`] for cycles or missing parents.
    pub fn load(&self, name: &str) -> Result<Arc<Schema>> {
        if let Some(cached) = self.registry.get(name) {
            debug!("Cache hit for schema: {}", name);
            return Ok(cached);
        }

        trace!("Cache miss for schema: {}", name);
        let mut graph = InheritanceGraph::new();
        let schema = Arc::new(self.resolve(name, &mut graph)?);
        self.registry.register(name, Arc::clone(&schema));
        info!(schema = %name, children = schema.children().len(), "Loaded schema");
        Ok(schema)
    }

    /// Load a definition from a specific file, resolving `extends` through the search path.
    ///
    /// # Errors
    ///
    /// Same as [`SchemaLoader::load`], plus I/O and syntax errors for `path`.
    pub fn load_from_file(&self, path: &Path) -> Result<Schema> {
        let mut schema = read_definition(path)?;
        let mut graph = InheritanceGraph::new();
        self.apply_extends(&mut schema, &mut graph)?;
        Ok(schema)
    }

    pub fn search_path(&self) -> &SchemaSearchPath {
        &self.search_path
    }

    /// Get the registry (for testing/debugging)
    pub fn registry(&self) -> &ConcurrentSchemaRegistry {
        &self.registry
    }

    fn resolve(&self, name: &str, graph: &mut InheritanceGraph) -> Result<Schema> {
        let mut schema = match self.search_path.locate(name) {
            Some(path) => {
                trace!("Found schema file: {:?}", path);
                read_definition(&path)?
            }
            None if name == ROOT_BASE_CLASS => {
                debug!("Using built-in {}", ROOT_BASE_CLASS);
                let document = nexus_nxdl::parse_xml(BUILTIN_NXROOT).map_err(|source| {
                    Error::Syntax {
                        path: "<built-in NXroot>".to_string(),
                        source,
                    }
                })?;
                schema_from_document(&document)?
            }
            None => {
                return Err(Error::NotFound {
                    name: name.to_string(),
                    searched: self.search_path.describe(),
                });
            }
        };
        self.apply_extends(&mut schema, graph)?;
        Ok(schema)
    }

    fn apply_extends(&self, schema: &mut Schema, graph: &mut InheritanceGraph) -> Result<()> {
        let Some(parent_name) = schema.extends.clone() else {
            return Ok(());
        };
        if parent_name == IMPLICIT_ROOT {
            return Ok(());
        }
        if graph.would_create_cycle(&schema.name, &parent_name) {
            return Err(Error::Inheritance(format!(
                "Circular dependency detected: {} -> {}",
                schema.name, parent_name
            )));
        }
        graph.add_edge(schema.name.clone(), parent_name.clone());

        let parent = match self.registry.get(&parent_name) {
            Some(cached) => cached,
            None => match self.resolve(&parent_name, graph) {
                Ok(parent) => {
                    let parent = Arc::new(parent);
                    self.registry.register(parent_name.clone(), Arc::clone(&parent));
                    parent
                }
                Err(Error::NotFound { .. }) => {
                    return Err(Error::Inheritance(format!(
                        "Parent schema not found: {} (extended by {})",
                        parent_name, schema.name
                    )));
                }
                Err(e) => return Err(e),
            },
        };

        merge_inherited(&parent.root, &mut schema.root);
        debug!(schema = %schema.name, parent = %parent_name, "Spliced inherited children");
        Ok(())
    }
}

impl Default for SchemaLoader {
    fn default() -> Self {
        Self::new(SchemaSearchPath::new(vec![PathBuf::from(".")]))
    }
}

/// Read and convert one definition file without resolving `extends`
fn read_definition(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)?;
    let is_text = path
        .extension()
        .is_some_and(|e| e == "yaml" || e == "yml");
    let parsed = if is_text {
        nexus_nxdl::parse_text(&content)
    } else {
        nexus_nxdl::parse_xml(&content)
    };
    let document = parsed.map_err(|source| Error::Syntax {
        path: path.display().to_string(),
        source,
    })?;
    schema_from_document(&document)
}

/// Convert a parsed NXDL document into the semantic model.
///
/// # Errors
///
/// [`Error::Conflict`] for unnamed definitions, unknown categories, malformed
/// occurrence counts and contradictory optionality.
pub fn schema_from_document(document: &NxdlDocument) -> Result<Schema> {
    let root = &document.root;
    let name = root
        .name()
        .ok_or_else(|| Error::conflict("<unnamed>", "/", "definition has no name"))?;
    let category = match root.attr("category") {
        Some(token) => Category::parse(token)
            .ok_or_else(|| Error::conflict(name, "/", format!("unknown category '{token}'")))?,
        None => Category::Application,
    };

    let mut schema = Schema::new(name, category);
    schema.extends = root.attr("extends").map(str::to_string);
    schema.version = root
        .attr("version")
        .map(str::to_string)
        .or_else(|| root.attr("xmlns").and_then(namespace_version));
    schema.doc = root.doc_text().filter(|t| !t.is_empty());
    if let Some(symbols) = &root.symbols {
        schema.symbols = symbols
            .symbols
            .iter()
            .filter_map(|s| {
                let name = s.name()?.to_string();
                Some((name, s.doc.as_ref().map(|d| d.text())))
            })
            .collect();
    }

    let converter = NodeConverter {
        schema: name,
        default: category.default_optionality(),
    };
    schema.root.children = converter.children(&root.children, "")?;
    Ok(schema)
}

/// `3.1` out of `http://definition.nexusformat.org/nxdl/3.1`
fn namespace_version(namespace: &str) -> Option<String> {
    namespace
        .rsplit('/')
        .next()
        .filter(|v| v.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
}

struct NodeConverter<'a> {
    schema: &'a str,
    default: Optionality,
}

impl NodeConverter<'_> {
    fn children(&self, elements: &[NxdlElement], parent: &str) -> Result<Vec<SchemaNode>> {
        elements.iter().map(|e| self.node(e, parent)).collect()
    }

    fn node(&self, element: &NxdlElement, parent: &str) -> Result<SchemaNode> {
        let label = match (element.name(), element.type_token()) {
            (Some(name), _) => name.to_string(),
            (None, Some(ty)) => format!("({ty})"),
            (None, None) => element.kind.tag().to_string(),
        };
        let location = format!("{parent}/{label}");

        let kind = match element.kind {
            ElementKind::Group => NodeKind::Group,
            ElementKind::Field => NodeKind::Field,
            ElementKind::Attribute => NodeKind::Attribute,
            ElementKind::Choice => NodeKind::Choice,
            ElementKind::Link => NodeKind::Link,
            ElementKind::Definition => {
                return Err(Error::conflict(self.schema, location, "nested definition"));
            }
        };

        let mut node = SchemaNode::new(kind, self.optionality(element, &location)?);
        node.name = element.name().map(str::to_string);
        node.type_token = element.type_token().map(str::to_string);
        node.max_occurs = element.attr("maxOccurs").map(str::to_string);
        node.units = element.attr("units").map(Units::parse);
        node.target = element.attr("target").map(str::to_string);
        node.doc = element.doc_text().filter(|t| !t.is_empty());
        node.enumeration = element.enumeration.as_ref().map(|e| {
            let items = e
                .items
                .iter()
                .filter_map(|item| item.value().map(str::to_string))
                .collect();
            let open = e.attributes.get("open").is_some_and(|v| v == "true");
            EnumerationSpec::from_items(items, open)
        });
        node.dimensions = element.dimensions.as_ref().map(|d| DimensionsSpec {
            rank: d.attributes.get("rank").cloned(),
            dims: d.dims.iter().map(dim_spec).collect(),
        });
        node.children = self.children(&element.children, &location)?;
        Ok(node)
    }

    /// Normalise the optionality attributes of one element.
    ///
    /// `recommended="true"` wins over a zero `minOccurs`; any two explicit flags, or a
    /// flag that contradicts `minOccurs`, is a conflict.
    fn optionality(&self, element: &NxdlElement, location: &str) -> Result<Optionality> {
        let flag = |key: &str| {
            element
                .attr(key)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
        };
        let optional = flag("optional");
        let recommended = flag("recommended");
        let required = flag("required");

        let min_occurs = match element.attr("minOccurs") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                Error::conflict(
                    self.schema,
                    location,
                    format!("minOccurs '{raw}' is not a count"),
                )
            })?),
            None => None,
        };

        let explicit: Vec<&str> = [
            ("optional", optional),
            ("recommended", recommended),
            ("required", required),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();
        if explicit.len() > 1 {
            return Err(Error::conflict(
                self.schema,
                location,
                format!("{} are all set to true", explicit.join(" and ")),
            ));
        }
        match (explicit.first(), min_occurs) {
            (Some(&"required"), Some(0)) => {
                return Err(Error::conflict(
                    self.schema,
                    location,
                    "required=\"true\" contradicts minOccurs=\"0\"",
                ));
            }
            (Some(flag), Some(min)) if *flag != "required" && min > 0 => {
                return Err(Error::conflict(
                    self.schema,
                    location,
                    format!("{flag}=\"true\" contradicts minOccurs=\"{min}\""),
                ));
            }
            _ => {}
        }

        Ok(if recommended {
            Optionality::Recommended
        } else if optional || min_occurs == Some(0) {
            Optionality::Optional
        } else if required || min_occurs.is_some() {
            Optionality::Required
        } else {
            self.default
        })
    }
}

fn dim_spec(dim: &Dim) -> DimSpec {
    let attr = |key: &str| dim.attributes.get(key).cloned();
    DimSpec {
        index: attr("index"),
        value: attr("value"),
        reference: attr("ref"),
        incr: attr("incr"),
        refindex: attr("refindex"),
        doc: dim.doc.as_ref().map(|d| d.text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const ENTRY_DEFINITION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definition name="NXsimple" type="group" extends="NXobject" category="application" xmlns="http://definition.nexusformat.org/nxdl/3.1">
    <group type="NXentry">
        <field name="definition">
            <enumeration>
                <item value="NXsimple"/>
            </enumeration>
        </field>
        <field name="title" minOccurs="0"/>
        <field name="notes" recommended="true"/>
        <group type="NXsource">
            <field name="type">
                <enumeration>
                    <item value="laser"/>
                    <item value="x-ray"/>
                    <item value="other"/>
                </enumeration>
            </field>
        </group>
    </group>
</definition>
"#;

    fn create_test_root(files: &[(&str, &str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (sub, name, content) in files {
            let sub = dir.path().join(sub);
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join(format!("{name}.nxdl.xml")), content).unwrap();
        }
        dir
    }

    fn create_test_loader(root: &TempDir) -> SchemaLoader {
        SchemaLoader::new(SchemaSearchPath::new(vec![root.path().to_path_buf()]))
    }

    fn definition(name: &str, extends: &str, body: &str) -> String {
        format!(
            "<definition name=\"{name}\" type=\"group\" extends=\"{extends}\" category=\"application\">\n{body}\n</definition>\n"
        )
    }

    #[test]
    fn test_load_normalises_optionality_and_enumerations() {
        let root = create_test_root(&[("applications", "NXsimple", ENTRY_DEFINITION)]);
        let loader = create_test_loader(&root);
        let schema = loader.load("NXsimple").unwrap();

        assert_eq!(schema.category, Category::Application);
        assert_eq!(schema.version.as_deref(), Some("3.1"));
        let entry = &schema.children()[0];
        let optionality: Vec<Optionality> = entry.children.iter().map(|c| c.optionality).collect();
        assert_eq!(
            optionality,
            vec![
                Optionality::Required,
                Optionality::Optional,
                Optionality::Recommended,
                Optionality::Required,
            ]
        );
        let source_type = &entry.children[3].children[0];
        let enumeration = source_type.enumeration.as_ref().unwrap();
        assert!(enumeration.open);
        assert_eq!(enumeration.items, vec!["laser", "x-ray"]);
    }

    #[test]
    fn test_cache_hit_returns_same_schema() {
        let root = create_test_root(&[("applications", "NXsimple", ENTRY_DEFINITION)]);
        let loader = create_test_loader(&root);
        let first = loader.load("NXsimple").unwrap();
        let second = loader.load("NXsimple").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(loader.registry().contains("NXsimple"));
    }

    #[test]
    fn test_missing_schema() {
        let root = create_test_root(&[]);
        let loader = create_test_loader(&root);
        let err = loader.load("NXmissing").unwrap_err();
        assert!(matches!(err, Error::NotFound { ref name, .. } if name == "NXmissing"));
    }

    #[test]
    fn test_subdirectory_order() {
        let base = definition("NXdup", "NXobject", "    <field name=\"from_base\"/>");
        let app = definition("NXdup", "NXobject", "    <field name=\"from_app\"/>");
        let root = create_test_root(&[
            ("applications", "NXdup", &app),
            ("base_classes", "NXdup", &base),
        ]);
        let schema = create_test_loader(&root).load("NXdup").unwrap();
        assert_eq!(schema.children()[0].name.as_deref(), Some("from_base"));
    }

    #[test]
    fn test_conflicting_optionality() {
        let body = "    <group type=\"NXentry\">\n        <field name=\"x\" recommended=\"true\" required=\"true\"/>\n    </group>";
        let bad = definition("NXbad", "NXobject", body);
        let root = create_test_root(&[("applications", "NXbad", &bad)]);
        let err = create_test_loader(&root).load("NXbad").unwrap_err();
        match err {
            Error::Conflict { schema, location, .. } => {
                assert_eq!(schema, "NXbad");
                assert_eq!(location, "/(NXentry)/x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_extends_splices_parent_children() {
        let parent = definition(
            "NXparent",
            "NXobject",
            "    <group type=\"NXentry\">\n        <field name=\"title\"/>\n        <field name=\"definition\"/>\n    </group>",
        );
        let child = definition(
            "NXchild",
            "NXparent",
            "    <group type=\"NXentry\">\n        <field name=\"definition\"/>\n        <field name=\"mode\"/>\n    </group>",
        );
        let root = create_test_root(&[
            ("applications", "NXparent", &parent),
            ("applications", "NXchild", &child),
        ]);
        let loader = create_test_loader(&root);
        let schema = loader.load("NXchild").unwrap();
        let names: Vec<&str> = schema.children()[0]
            .children
            .iter()
            .filter_map(|c| c.name.as_deref())
            .collect();
        assert_eq!(names, vec!["definition", "mode", "title"]);
        assert!(loader.registry().contains("NXparent"));
    }

    #[test]
    fn test_extends_cycle_is_rejected() {
        let a = definition("NXa", "NXb", "");
        let b = definition("NXb", "NXa", "");
        let root = create_test_root(&[("applications", "NXa", &a), ("applications", "NXb", &b)]);
        let err = create_test_loader(&root).load("NXa").unwrap_err();
        assert!(matches!(err, Error::Inheritance(_)), "{err}");
    }

    #[test]
    fn test_builtin_root_and_fixture_lookup() {
        let root = create_test_root(&[]);
        let loader = create_test_loader(&root);
        let nxroot = loader.load(ROOT_BASE_CLASS).unwrap();
        assert_eq!(nxroot.category, Category::Base);
        assert!(nxroot.children().iter().all(|c| c.optionality == Optionality::Optional));

        let fixtures = TempDir::new().unwrap();
        fs::write(
            fixtures.path().join("NXtest.nxdl.xml"),
            definition("NXtest", "NXobject", "    <group type=\"NXentry\"/>"),
        )
        .unwrap();
        let search = SchemaSearchPath::new(vec![root.path().to_path_buf()])
            .with_fixtures(fixtures.path());
        let schema = SchemaLoader::new(search).load(TEST_FIXTURE).unwrap();
        assert_eq!(schema.name, "NXtest");
    }

    #[test]
    fn test_text_form_definitions_load() {
        let dir = TempDir::new().unwrap();
        let apps = dir.path().join("applications");
        fs::create_dir_all(&apps).unwrap();
        fs::write(
            apps.join("NXtext.yaml"),
            "category: application\nNXtext(NXobject):\n  (NXentry):\n    title:\n      exists: optional\n",
        )
        .unwrap();
        let schema = create_test_loader(&dir).load("NXtext").unwrap();
        assert_eq!(schema.children()[0].children[0].optionality, Optionality::Optional);
    }
}
