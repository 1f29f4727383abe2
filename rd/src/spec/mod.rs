//! Spec parsing collaborator
//!
//! Turns a spec directory into TaskDescriptors. Turning requirement prose
//! into tasks happens elsewhere; this only reads the structured task list.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::TaskDescriptor;
use crate::tasks::StructuralError;

pub trait SpecParser: Send + Sync {
    fn parse(&self, spec_dir: &Path) -> Result<Vec<TaskDescriptor>, StructuralError>;
}

#[derive(Debug, Deserialize)]
struct TasksDocument {
    #[serde(default)]
    tasks: Vec<TaskDescriptor>,
}

/// Reads `<spec_dir>/<tasks_file>`, a YAML document with a `tasks:` list
#[derive(Debug, Clone)]
pub struct YamlSpecParser {
    tasks_file: String,
}

impl YamlSpecParser {
    pub fn new(tasks_file: impl Into<String>) -> Self {
        Self {
            tasks_file: tasks_file.into(),
        }
    }

    pub fn tasks_path(&self, spec_dir: &Path) -> PathBuf {
        spec_dir.join(&self.tasks_file)
    }
}

impl Default for YamlSpecParser {
    fn default() -> Self {
        Self::new("tasks.yml")
    }
}

impl SpecParser for YamlSpecParser {
    fn parse(&self, spec_dir: &Path) -> Result<Vec<TaskDescriptor>, StructuralError> {
        let path = self.tasks_path(spec_dir);
        debug!(?path, "YamlSpecParser::parse: called");

        let content = fs::read_to_string(&path)
            .map_err(|e| StructuralError::MalformedDescriptor(format!("cannot read {}: {}", path.display(), e)))?;
        let doc: TasksDocument = serde_yaml::from_str(&content)
            .map_err(|e| StructuralError::MalformedDescriptor(format!("{}: {}", path.display(), e)))?;

        for (i, task) in doc.tasks.iter().enumerate() {
            if task.id.trim().is_empty() {
                return Err(StructuralError::MalformedDescriptor(format!(
                    "{}: task #{} has an empty id",
                    path.display(),
                    i + 1
                )));
            }
            if task.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(StructuralError::MalformedDescriptor(format!(
                    "{}: task {} has an empty command",
                    path.display(),
                    task.id
                )));
            }
        }

        info!(path = %path.display(), count = doc.tasks.len(), "Spec parsed");
        Ok(doc.tasks)
    }
}
