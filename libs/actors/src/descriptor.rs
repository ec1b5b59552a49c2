//! Graph Descriptors
//!
//! Plain data handed over by the graph compiler. Wiring strings stay symbolic
//! here; the wiring phase resolves them.

use crate::envelope::Payload;
use crate::error::{Result, RuntimeError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-actor diagnostic switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugFlags {
    /// Log every delivery to this actor at info level
    #[serde(default)]
    pub verbose: bool,
}

/// Plain actor descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub uid: String,
    /// Key into the behavior registry
    #[serde(default)]
    pub behavior: Option<String>,
    /// `"-> pin"` or `"=> pin"`
    #[serde(default)]
    pub inputs: Vec<String>,
    /// `"pin -> target"` or `"pin => target"`, target single or `[a, b]`
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub settings: Payload,
    #[serde(default)]
    pub debug: DebugFlags,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            behavior: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            settings: Payload::Null,
            debug: DebugFlags::default(),
        }
    }

    pub fn behavior(mut self, key: impl Into<String>) -> Self {
        self.behavior = Some(key.into());
        self
    }

    pub fn input(mut self, decl: impl Into<String>) -> Self {
        self.inputs.push(decl.into());
        self
    }

    pub fn output(mut self, decl: impl Into<String>) -> Self {
        self.outputs.push(decl.into());
        self
    }

    pub fn settings(mut self, settings: Payload) -> Self {
        self.settings = settings;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.debug.verbose = true;
        self
    }
}

/// Filter (router) descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDescriptor {
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub behavior: Option<String>,
    /// `"selector : [ targetRef, ... ]"`
    #[serde(default)]
    pub table: Vec<String>,
    #[serde(default)]
    pub settings: Payload,
    #[serde(default)]
    pub debug: DebugFlags,
}

impl FilterDescriptor {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            behavior: None,
            table: Vec::new(),
            settings: Payload::Null,
            debug: DebugFlags::default(),
        }
    }

    pub fn behavior(mut self, key: impl Into<String>) -> Self {
        self.behavior = Some(key.into());
        self
    }

    pub fn scope(mut self, entry: impl Into<String>) -> Self {
        self.table.push(entry.into());
        self
    }
}

/// Complete compiled graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
    #[serde(default)]
    pub filters: Vec<FilterDescriptor>,
}

impl GraphDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: NodeDescriptor) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn filter(mut self, filter: FilterDescriptor) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| RuntimeError::configuration(format!("invalid graph JSON: {e}"), None))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| RuntimeError::configuration(format!("invalid graph TOML: {e}"), None))
    }

    /// Load from a `.json` or `.toml` file
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading graph descriptor {}", path.display()))?;

        let descriptor = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text)?,
            Some("json") => Self::from_json_str(&text)?,
            other => anyhow::bail!(
                "unsupported graph descriptor extension {:?} for {}",
                other,
                path.display()
            ),
        };
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_json_defaults() {
        let graph = GraphDescriptor::from_json_str(
            r#"{"nodes": [{"name": "X", "uid": "1", "outputs": ["ping => pong @ Y (2)"]}]}"#,
        )
        .unwrap();

        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.filters.is_empty());
        assert_eq!(graph.nodes[0].settings, Payload::Null);
        assert!(!graph.nodes[0].debug.verbose);
    }

    #[test]
    fn test_toml_file_round_trip_through_loader() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[nodes]]
name = "Y"
uid = "2"
behavior = "echo"
inputs = ["=> pong"]
debug = {{ verbose = true }}

[[filters]]
name = "R"
uid = "3"
table = ["route : [pong @ Y (2)]"]
"#
        )
        .unwrap();

        let graph = GraphDescriptor::from_path(file.path()).unwrap();
        assert_eq!(graph.nodes[0].behavior.as_deref(), Some("echo"));
        assert!(graph.nodes[0].debug.verbose);
        assert_eq!(graph.filters[0].table, vec!["route : [pong @ Y (2)]".to_string()]);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(GraphDescriptor::from_path(file.path()).is_err());
    }

    #[test]
    fn test_builder() {
        let node = NodeDescriptor::new("X", "1")
            .behavior("pinger")
            .input("-> start")
            .output("ping => pong @ Y (2)")
            .settings(json!({"n": 1}))
            .verbose();
        assert_eq!(node.inputs, vec!["-> start"]);
        assert!(node.debug.verbose);
    }
}
