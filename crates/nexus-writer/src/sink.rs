//! Output seam of the writer

use crate::container::ContainerTree;
use crate::Result;
use nexus_ir::Value;

/// Destination for groups, datasets, attributes and links, addressed by instance path.
///
/// The writer creates every group before anything below it and a dataset
/// before its attributes, so a sink may reject writes whose parent is missing.
pub trait HierarchicalSink {
    /// Create the group at `path`, annotated with its schema type token
    fn create_group(&mut self, path: &str, type_token: &str) -> Result<()>;

    /// Store a scalar or array, compressing it if the value asks for it
    fn write_dataset(&mut self, path: &str, value: &Value) -> Result<()>;

    /// Attach an attribute to the group or dataset at `owner` (`/` is the file root)
    fn write_attribute(&mut self, owner: &str, name: &str, value: &Value) -> Result<()>;

    /// Create a soft link at `path` pointing to `target`
    fn link(&mut self, path: &str, target: &str) -> Result<()>;
}

impl HierarchicalSink for ContainerTree {
    fn create_group(&mut self, path: &str, type_token: &str) -> Result<()> {
        self.insert_group(path, type_token)
    }

    fn write_dataset(&mut self, path: &str, value: &Value) -> Result<()> {
        self.insert_dataset(path, value)
    }

    fn write_attribute(&mut self, owner: &str, name: &str, value: &Value) -> Result<()> {
        self.insert_attribute(owner, name, value)
    }

    fn link(&mut self, path: &str, target: &str) -> Result<()> {
        self.insert_link(path, target)
    }
}
