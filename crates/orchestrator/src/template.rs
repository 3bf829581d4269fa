//! Job script templates.
//!
//! Placeholders are written `{NAME}`. `{{` and `}}` produce literal braces,
//! so shell expansions in a template are written `${{HOME}}`. Any other
//! placeholder name is an error rather than being left in the script.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::ResourceProfile;
use crate::error::{OrchestratorError, Result};

pub const PLACEHOLDERS: &[&str] = &[
    "ENTITY_NAME",
    "VERSION",
    "RUNNER_DIR",
    "SOURCE_DIR",
    "DEFINITION_PATH",
    "REMOTE_HOST",
    "REMOTE_PATH",
    "PARTITION",
    "CPUS",
    "MEMORY",
    "TIME",
];

/// Values substituted into a job template for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameters {
    pub entity_name: String,
    pub version: String,
    pub runner_dir: String,
    pub source_dir: String,
    pub definition_path: String,
    pub remote_host: String,
    pub remote_path: String,
    pub resources: ResourceProfile,
}

impl JobParameters {
    fn variables(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("ENTITY_NAME", self.entity_name.clone()),
            ("VERSION", self.version.clone()),
            ("RUNNER_DIR", self.runner_dir.clone()),
            ("SOURCE_DIR", self.source_dir.clone()),
            ("DEFINITION_PATH", self.definition_path.clone()),
            ("REMOTE_HOST", self.remote_host.clone()),
            ("REMOTE_PATH", self.remote_path.clone()),
            ("PARTITION", self.resources.partition.clone()),
            ("CPUS", self.resources.cpus.to_string()),
            ("MEMORY", self.resources.memory.clone()),
            ("TIME", self.resources.time.clone()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    source: String,
}

impl JobTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            OrchestratorError::Template(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(Self::new(source))
    }

    pub fn render(&self, params: &JobParameters) -> Result<String> {
        let variables = params.variables();
        let mut out = String::with_capacity(self.source.len());
        let mut chars = self.source.char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                    chars.next();
                    out.push('{');
                }
                '{' => {
                    let rest = &self.source[idx + 1..];
                    let end = rest.find('}').ok_or_else(|| {
                        OrchestratorError::Template(format!(
                            "unclosed placeholder at byte {}",
                            idx
                        ))
                    })?;
                    let name = &rest[..end];
                    let value = variables.get(name).ok_or_else(|| {
                        OrchestratorError::Template(format!("unknown placeholder {{{}}}", name))
                    })?;
                    out.push_str(value);
                    // Skip the name and the closing brace
                    for _ in 0..name.chars().count() + 1 {
                        chars.next();
                    }
                }
                '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => {
                    return Err(OrchestratorError::Template(format!(
                        "single '}}' at byte {}",
                        idx
                    )));
                }
                other => out.push(other),
            }
        }

        Ok(out)
    }
}
