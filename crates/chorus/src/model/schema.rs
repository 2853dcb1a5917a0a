use crate::tools::ToolDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Translates registry tools into the function-calling shape one model family accepts.
pub trait SchemaDialect: Send + Sync {
    /// Name under which the model sees the tool.
    fn function_name(&self, namespaced: &str) -> String;

    /// Parameter schema in a form the model API will accept.
    fn parameters(&self, schema: &Value) -> Value;

    /// Longest function name the model API accepts, if it has a limit.
    fn max_name_len(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    OpenAi,
    Simplified,
    Passthrough,
}

impl DialectKind {
    pub fn build(&self) -> Box<dyn SchemaDialect> {
        match self {
            DialectKind::OpenAi => Box::new(OpenAiDialect),
            DialectKind::Simplified => Box::new(SimplifiedDialect),
            DialectKind::Passthrough => Box::new(PassthroughDialect),
        }
    }
}

/// Sends names and schemas exactly as providers declared them.
pub struct PassthroughDialect;

impl SchemaDialect for PassthroughDialect {
    fn function_name(&self, namespaced: &str) -> String {
        namespaced.to_string()
    }

    fn parameters(&self, schema: &Value) -> Value {
        schema.clone()
    }
}

/// Keeps names but flattens schema constructs many model APIs refuse to parse.
pub struct SimplifiedDialect;

impl SchemaDialect for SimplifiedDialect {
    fn function_name(&self, namespaced: &str) -> String {
        namespaced.to_string()
    }

    fn parameters(&self, schema: &Value) -> Value {
        simplify_schema(schema)
    }
}

/// OpenAI-style function calling: restricted names, object-typed parameters.
pub struct OpenAiDialect;

const MAX_FUNCTION_NAME_LEN: usize = 64;

static INVALID_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("static regex"));

impl SchemaDialect for OpenAiDialect {
    fn function_name(&self, namespaced: &str) -> String {
        let name = namespaced.replacen(crate::tools::NAMESPACE_SEPARATOR, "__", 1);
        let mut name = INVALID_NAME_CHARS.replace_all(&name, "_").to_string();
        name.truncate(MAX_FUNCTION_NAME_LEN);
        name
    }

    fn max_name_len(&self) -> Option<usize> {
        Some(MAX_FUNCTION_NAME_LEN)
    }

    fn parameters(&self, schema: &Value) -> Value {
        let mut params = simplify_schema(schema);
        match params.as_object_mut() {
            Some(map) => {
                map.entry("type").or_insert_with(|| json!("object"));
                if map.get("type") == Some(&json!("object")) {
                    map.entry("properties").or_insert_with(|| json!({}));
                }
                params
            }
            None => json!({"type": "object", "properties": {}}),
        }
    }
}

// Keys strict function-calling APIs reject or ignore
const UNSUPPORTED_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$defs",
    "definitions",
    "$comment",
    "additionalProperties",
    "default",
    "examples",
    "format",
    "title",
];

const MAX_REF_DEPTH: usize = 8;

/// Inlines local `$ref`s, collapses nullable unions and drops unsupported keywords.
pub fn simplify_schema(schema: &Value) -> Value {
    let defs = schema
        .get("$defs")
        .or_else(|| schema.get("definitions"))
        .cloned()
        .unwrap_or(Value::Null);
    simplify_node(schema, &defs, 0)
}

fn simplify_node(node: &Value, defs: &Value, depth: usize) -> Value {
    let Some(map) = node.as_object() else {
        return node.clone();
    };

    if let Some(target) = map.get("$ref").and_then(Value::as_str) {
        let resolved = target
            .rsplit('/')
            .next()
            .and_then(|name| defs.get(name))
            .filter(|_| depth < MAX_REF_DEPTH);
        return match resolved {
            Some(def) => simplify_node(def, defs, depth + 1),
            // Unresolvable or too deep; fall back to an open object
            None => json!({"type": "object"}),
        };
    }

    let mut out = Map::new();

    // A union collapses to its first non-null branch; sibling keys still apply
    for key in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = map.get(key) {
            if let Some(branch) = branches.iter().find(|b| !is_null_schema(b)) {
                if let Value::Object(inlined) = simplify_node(branch, defs, depth) {
                    out.extend(inlined);
                }
            }
        }
    }

    if let Some(Value::Array(parts)) = map.get("allOf") {
        for part in parts {
            if let Value::Object(inlined) = simplify_node(part, defs, depth) {
                merge_object_schema(&mut out, inlined);
            }
        }
    }

    for (key, value) in map {
        if UNSUPPORTED_KEYS.contains(&key.as_str())
            || matches!(key.as_str(), "anyOf" | "oneOf" | "allOf")
        {
            continue;
        }
        let value = match key.as_str() {
            "type" => collapse_type(value),
            "properties" => match value.as_object() {
                Some(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), simplify_node(prop, defs, depth)))
                        .collect(),
                ),
                None => value.clone(),
            },
            "items" => simplify_node(value, defs, depth),
            _ => value.clone(),
        };
        out.insert(key.clone(), value);
    }

    Value::Object(out)
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null")
}

fn collapse_type(value: &Value) -> Value {
    match value {
        Value::Array(types) => types
            .iter()
            .find(|t| t.as_str() != Some("null"))
            .cloned()
            .unwrap_or_else(|| json!("string")),
        other => other.clone(),
    }
}

fn merge_object_schema(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match (key.as_str(), target.get_mut(&key), value) {
            ("properties", Some(Value::Object(existing)), Value::Object(more)) => {
                existing.extend(more);
            }
            ("required", Some(Value::Array(existing)), Value::Array(more)) => {
                for item in more {
                    if !existing.contains(&item) {
                        existing.push(item);
                    }
                }
            }
            (_, _, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// One function definition as offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The registry's tools rendered for one dialect, plus the name mapping needed to
/// turn the model's calls back into registry names.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    functions: Vec<FunctionSchema>,
    to_namespaced: HashMap<String, String>,
    to_wire: HashMap<String, String>,
}

impl ToolCatalog {
    pub fn build(descriptors: &[ToolDescriptor], dialect: &dyn SchemaDialect) -> Self {
        let mut catalog = ToolCatalog::default();
        for descriptor in descriptors {
            let base = dialect.function_name(&descriptor.name);
            let mut wire = base.clone();
            let mut suffix = 2;
            // Sanitizing can fold distinct names together
            while catalog.to_namespaced.contains_key(&wire) {
                let tag = format!("_{}", suffix);
                let mut head = base.clone();
                if let Some(max) = dialect.max_name_len() {
                    head.truncate(max.saturating_sub(tag.len()));
                }
                wire = format!("{}{}", head, tag);
                suffix += 1;
            }
            catalog
                .to_namespaced
                .insert(wire.clone(), descriptor.name.clone());
            catalog
                .to_wire
                .insert(descriptor.name.clone(), wire.clone());
            catalog.functions.push(FunctionSchema {
                name: wire,
                description: descriptor.description.clone(),
                parameters: dialect.parameters(&descriptor.input_schema),
            });
        }
        catalog
    }

    pub fn functions(&self) -> &[FunctionSchema] {
        &self.functions
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn namespaced_name(&self, wire: &str) -> Option<&str> {
        self.to_namespaced.get(wire).map(String::as_str)
    }

    pub fn wire_name(&self, namespaced: &str) -> Option<&str> {
        self.to_wire.get(namespaced).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(provider: &str, tool: &str, schema: Value) -> ToolDescriptor {
        ToolDescriptor::from_tool(provider, chorus_protocol::Tool::new(tool, "", schema))
    }

    #[test]
    fn test_nullable_union_collapses() {
        let schema = json!({
            "type": "object",
            "properties": {
                "limit": {"anyOf": [{"type": "integer"}, {"type": "null"}], "description": "max rows"},
                "tag": {"type": ["string", "null"]}
            },
            "additionalProperties": false,
            "$schema": "http://json-schema.org/draft-07/schema#"
        });
        let simplified = simplify_schema(&schema);
        assert_eq!(
            simplified,
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "max rows"},
                    "tag": {"type": "string"}
                }
            })
        );
    }

    #[test]
    fn test_local_refs_are_inlined() {
        let schema = json!({
            "type": "object",
            "properties": {"point": {"$ref": "#/$defs/Point"}},
            "$defs": {"Point": {"type": "object", "properties": {"x": {"type": "number"}}}}
        });
        let simplified = simplify_schema(&schema);
        assert_eq!(
            simplified["properties"]["point"],
            json!({"type": "object", "properties": {"x": {"type": "number"}}})
        );
        assert!(simplified.get("$defs").is_none());
    }

    #[test]
    fn test_self_referential_schema_terminates() {
        let schema = json!({
            "type": "object",
            "properties": {"node": {"$ref": "#/definitions/Node"}},
            "definitions": {"Node": {"type": "object", "properties": {"next": {"$ref": "#/definitions/Node"}}}}
        });
        let simplified = simplify_schema(&schema);
        assert_eq!(simplified["properties"]["node"]["type"], "object");
    }

    #[test]
    fn test_all_of_merges_properties() {
        let schema = json!({
            "allOf": [
                {"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a"]},
                {"properties": {"b": {"type": "string"}}, "required": ["b"]}
            ]
        });
        let simplified = simplify_schema(&schema);
        assert_eq!(simplified["properties"]["a"]["type"], "string");
        assert_eq!(simplified["properties"]["b"]["type"], "string");
        assert_eq!(simplified["required"], json!(["a", "b"]));
    }

    #[test]
    fn test_openai_names_and_parameters() {
        let dialect = OpenAiDialect;
        assert_eq!(dialect.function_name("files.read"), "files__read");
        assert_eq!(dialect.function_name("web.fetch.url"), "web__fetch_url");
        assert_eq!(dialect.parameters(&json!({})), json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn test_catalog_maps_names_both_ways() {
        let descriptors = vec![
            descriptor("files", "read", json!({"type": "object"})),
            descriptor("search", "query", json!({"type": "object"})),
        ];
        let catalog = ToolCatalog::build(&descriptors, &OpenAiDialect);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.functions()[0].name, "files__read");
        assert_eq!(catalog.namespaced_name("search__query"), Some("search.query"));
        assert_eq!(catalog.wire_name("files.read"), Some("files__read"));
    }

    #[test]
    fn test_catalog_disambiguates_folded_names() {
        let descriptors = vec![
            descriptor("web", "fetch.url", json!({})),
            descriptor("web", "fetch_url", json!({})),
        ];
        let catalog = ToolCatalog::build(&descriptors, &OpenAiDialect);
        assert_eq!(catalog.functions()[0].name, "web__fetch_url");
        assert_eq!(catalog.functions()[1].name, "web__fetch_url_2");
        assert_eq!(catalog.namespaced_name("web__fetch_url_2"), Some("web.fetch_url"));
    }

    #[test]
    fn test_disambiguated_names_respect_length_limit() {
        let long = "x".repeat(80);
        let descriptors = vec![
            descriptor("web", &format!("{}.a", long), json!({})),
            descriptor("web", &format!("{}.b", long), json!({})),
        ];
        let catalog = ToolCatalog::build(&descriptors, &OpenAiDialect);
        let names: Vec<&str> = catalog.functions().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names[0].len(), MAX_FUNCTION_NAME_LEN);
        assert_eq!(names[1].len(), MAX_FUNCTION_NAME_LEN);
        assert!(names[1].ends_with("_2"));
        assert_ne!(names[0], names[1]);
        assert_eq!(catalog.namespaced_name(names[1]), Some(format!("web.{}.b", long).as_str()));
    }
}
