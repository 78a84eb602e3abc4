//! MCP-style tools served at `/tools`.
//!
//! A [`Tool`] is a named, stateless capability with a JSON Schema for its
//! parameters. The [`ToolRegistry`] holds them in registration order and
//! the server dispatches `POST /tools/{name}` through it after checking
//! parameters with [`validate_params`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Component, Path};

use crate::calc;
use crate::files::FileStore;

/// What a tool may touch while executing.
pub struct ToolContext {
    files: FileStore,
}

impl ToolContext {
    pub fn new(files: FileStore) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Route segment and registry key, e.g. `"read_file"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Runs the tool with already validated parameters. The value is
    /// returned to the caller as `{ "result": ... }`.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Listing entry for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// `read_file` and `calculate`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ReadFileTool));
        registry.register(Box::new(CalculateTool));
        registry
    }

    /// Adds a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks `params` against a tool's schema: required fields, primitive
/// types and enums. Missing optional fields get their schema default.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let Some(params_obj) = params.as_object() else {
        bail!("parameters must be a JSON object");
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !params_obj.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    let mut result = params_obj.clone();
    for (name, prop) in &properties {
        match params_obj.get(name) {
            Some(value) => {
                if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                    let ok = match expected {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !ok {
                        bail!("parameter '{}' must be of type '{}'", name, expected);
                    }
                }
                if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
                    if !allowed.contains(value) {
                        bail!("parameter '{}' has invalid value {}", name, value);
                    }
                }
            }
            None => {
                if let Some(default) = prop.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

// ============ read_file ============

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file from the data directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Path to the file relative to the data directory"
                }
            },
            "required": ["filepath"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let filepath = params["filepath"].as_str().unwrap_or("");
        if filepath.trim().is_empty() {
            bail!("filepath must not be empty");
        }
        let relative = Path::new(filepath);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("invalid filepath: must stay inside the data directory");
        }

        let path = ctx.files().data_dir().join(relative);
        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("file {} not found in data directory", filepath)
            }
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8(content)
            .map_err(|_| anyhow::anyhow!("invalid file {}: not UTF-8 text", filepath))?;

        Ok(json!({ "filepath": filepath, "content": text }))
    }
}

// ============ calculate ============

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression with + - * / and parentheses"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Expression to evaluate, e.g. '2 + 2' or '(10 - 4) * 5'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let expression = params["expression"].as_str().unwrap_or("");
        let value = calc::evaluate(expression)
            .map_err(|e| anyhow::anyhow!("invalid expression: {}", e))?;
        Ok(json!({
            "expression": expression,
            "value": value,
            "formatted": calc::format_result(value),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext::new(FileStore::new(dir))
    }

    #[test]
    fn test_builtins_registered_in_order() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["read_file", "calculate"]);
        assert!(registry.find("web_search").is_none());

        let mut registry = registry;
        registry.register(Box::new(ReadFileTool));
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["calculate", "read_file"]);
    }

    #[test]
    fn test_validate_params() {
        let schema = json!({
            "type": "object",
            "properties": {
                "q": { "type": "string" },
                "n": { "type": "integer", "default": 3 },
                "unit": { "type": "string", "enum": ["deg", "rad"] }
            },
            "required": ["q"]
        });
        let ok = validate_params(&schema, &json!({ "q": "x" })).unwrap();
        assert_eq!(ok["n"], 3);
        assert!(ok.get("unit").is_none());

        let err = validate_params(&schema, &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: q"));

        let err = validate_params(&schema, &json!({ "q": 1 })).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));
        assert!(validate_params(&schema, &json!([1])).is_err());

        let ok = validate_params(&schema, &json!({ "q": "x", "n": 9, "unit": "rad" })).unwrap();
        assert_eq!(ok["n"], 9);
        assert_eq!(ok["unit"], "rad");
        let err = validate_params(&schema, &json!({ "q": "x", "unit": "grad" })).unwrap_err();
        assert!(err.to_string().contains("invalid value"));
    }

    #[tokio::test]
    async fn test_read_file_inside_data_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "remember").unwrap();

        let result = ReadFileTool
            .execute(json!({ "filepath": "notes.txt" }), &ctx(tmp.path()))
            .await
            .unwrap();
        assert_eq!(result["content"], "remember");
    }

    #[tokio::test]
    async fn test_read_file_rejects_traversal_and_missing() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(tmp.path());

        let err = ReadFileTool
            .execute(json!({ "filepath": "../etc/passwd" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid filepath"));

        let err = ReadFileTool
            .execute(json!({ "filepath": "/etc/passwd" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid filepath"));

        let err = ReadFileTool
            .execute(json!({ "filepath": "nope.txt" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_calculate() {
        let tmp = TempDir::new().unwrap();
        let result = CalculateTool
            .execute(json!({ "expression": "(2 + 3) * 4" }), &ctx(tmp.path()))
            .await
            .unwrap();
        assert_eq!(result["value"], 20.0);
        assert_eq!(result["formatted"], "20");

        let err = CalculateTool
            .execute(json!({ "expression": "1/0" }), &ctx(tmp.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }
}
