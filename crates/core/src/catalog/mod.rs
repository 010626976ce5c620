//! Tool catalog: the load-time registry of every callable tool.
//!
//! Toolkits register their definitions once at startup. After that the
//! catalog is shared behind an `Arc` and never mutated again.

mod definition;
pub mod schema;

pub use definition::{
    AuthRequirement, ParamSpec, ToolContext, ToolDefinition, ToolHandler, ToolSummary, ValueType,
};

use crate::error::CatalogError;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Named collection of related tools for one provider
#[derive(Debug, Clone)]
pub struct Toolkit {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tools: Vec<ToolDefinition>,
}

impl Toolkit {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            description: description.into(),
            tools: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }
}

/// Registry of tool definitions keyed by qualified name
#[derive(Debug, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single tool under its own name.
    pub fn register(&mut self, def: ToolDefinition) -> Result<(), CatalogError> {
        check_definition(&def)?;
        if self.tools.contains_key(def.name()) {
            return Err(CatalogError::DuplicateTool {
                name: def.name().to_string(),
            });
        }

        tracing::debug!("Registered tool {}", def.name());
        self.tools.insert(def.name().to_string(), def);
        Ok(())
    }

    /// Register every tool of a toolkit as `<toolkit>.<tool>`. Nothing is
    /// registered if any name collides.
    pub fn register_toolkit(&mut self, toolkit: Toolkit) -> Result<(), CatalogError> {
        if toolkit.name.trim().is_empty() || toolkit.name.contains('.') {
            return Err(CatalogError::InvalidDefinition {
                reason: format!("invalid toolkit name `{}`", toolkit.name),
            });
        }

        let tools: Vec<ToolDefinition> = toolkit
            .tools
            .into_iter()
            .map(|tool| tool.qualify(&toolkit.name))
            .collect();

        let mut seen = HashSet::new();
        for tool in &tools {
            check_definition(tool)?;
            if self.tools.contains_key(tool.name()) || !seen.insert(tool.name().to_string()) {
                return Err(CatalogError::DuplicateTool {
                    name: tool.name().to_string(),
                });
            }
        }

        tracing::info!(
            "Registered toolkit {} v{} ({} tools)",
            toolkit.name,
            toolkit.version,
            tools.len()
        );

        for tool in tools {
            self.tools.insert(tool.name().to_string(), tool);
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<ToolDefinition, CatalogError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                name: name.to_string(),
            })
    }

    /// Schema-check a payload, reporting every violating field.
    pub fn validate_input(&self, def: &ToolDefinition, payload: &Value) -> Result<(), CatalogError> {
        let violations = schema::violations(def, payload);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::InvalidInput {
                tool: def.name().to_string(),
                violations,
            })
        }
    }

    /// All definitions, sorted by name
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools.values().map(ToolSummary::from).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn check_definition(def: &ToolDefinition) -> Result<(), CatalogError> {
    if def.name().trim().is_empty() {
        return Err(CatalogError::InvalidDefinition {
            reason: "tool name cannot be empty".into(),
        });
    }

    let mut names = HashSet::new();
    for param in def.params() {
        if !names.insert(param.name.as_str()) {
            return Err(CatalogError::InvalidDefinition {
                reason: format!("tool `{}` declares `{}` twice", def.name(), param.name),
            });
        }
    }
    Ok(())
}
