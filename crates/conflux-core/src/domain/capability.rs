//! Capability records enumerated from backends.
//!
//! These are ephemeral: every discovery pass rebuilds them. Unknown fields
//! a backend sends (annotations, icons, ...) are carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of capability a backend can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Tool,
    Resource,
    ResourceTemplate,
    Prompt,
}

/// A tool from `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolRecord {
    /// Create a tool with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: empty_object_schema(),
            extra: Map::new(),
        }
    }
}

/// A concrete resource from `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResourceRecord {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            extra: Map::new(),
        }
    }
}

/// A parameterized resource from `resources/templates/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateRecord {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A declared prompt argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt from `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PromptRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Operator rule replacing how a capability is presented to clients.
///
/// Keyed by (`server_id`, `kind`, `original_name`). For resources the
/// original name is the backend-native URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRule {
    pub server_id: String,
    pub kind: CapabilityKind,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl DisplayRule {
    /// Whether this rule targets the given capability.
    pub fn matches(&self, server_id: &str, kind: CapabilityKind, original_name: &str) -> bool {
        self.server_id == server_id && self.kind == kind && self.original_name == original_name
    }

    /// Apply the substitution to a tool.
    pub fn apply_to_tool(&self, tool: &mut ToolRecord) {
        if let Some(name) = &self.name {
            tool.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            tool.description = Some(description.clone());
        }
        if let Some(schema) = &self.input_schema {
            tool.input_schema = schema.clone();
        }
    }

    /// Apply the substitution to a prompt.
    pub fn apply_to_prompt(&self, prompt: &mut PromptRecord) {
        if let Some(name) = &self.name {
            prompt.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            prompt.description = Some(description.clone());
        }
    }

    /// Apply the substitution to a resource. The URI is never rewritten.
    pub fn apply_to_resource(&self, resource: &mut ResourceRecord) {
        if let Some(name) = &self.name {
            resource.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            resource.description = Some(description.clone());
        }
    }

    /// Apply the substitution to a resource template.
    pub fn apply_to_template(&self, template: &mut ResourceTemplateRecord) {
        if let Some(name) = &self.name {
            template.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            template.description = Some(description.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_keeps_unknown_fields() {
        let raw = json!({
            "name": "search",
            "inputSchema": {"type": "object"},
            "annotations": {"readOnlyHint": true}
        });
        let tool: ToolRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(tool.extra.get("annotations"), Some(&json!({"readOnlyHint": true})));
        assert_eq!(serde_json::to_value(&tool).unwrap(), raw);
    }

    #[test]
    fn test_display_rule_rewrites_tool() {
        let rule = DisplayRule {
            server_id: "s1".into(),
            kind: CapabilityKind::Tool,
            original_name: "search".into(),
            name: Some("web_search".into()),
            description: None,
            input_schema: None,
        };
        let mut tool = ToolRecord::new("search", "Search things");
        assert!(rule.matches("s1", CapabilityKind::Tool, "search"));
        rule.apply_to_tool(&mut tool);
        assert_eq!(tool.name, "web_search");
        assert_eq!(tool.description.as_deref(), Some("Search things"));
    }
}
