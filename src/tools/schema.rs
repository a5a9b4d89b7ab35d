//! 工具参数声明与校验，以及工具调用格式的 JSON Schema
//!
//! 每个工具用 ParameterSchema 声明参数（名称、类型、是否必填、默认值、可选值）；
//! 分发前先用它校验模型给出的参数并补全默认值，同一份声明再导出为 JSON Schema 写进 system prompt。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::{Map, Value};

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 单个参数声明
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldType,
    pub required: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

/// 工具的参数声明集合
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParameterSchema {
    pub fields: Vec<FieldSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: FieldType, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
            default: None,
            allowed: Vec::new(),
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: FieldType, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
            default: None,
            allowed: Vec::new(),
        });
        self
    }

    /// 带默认值的可选参数；缺省时由校验补全
    pub fn with_default(
        mut self,
        name: &str,
        kind: FieldType,
        default: Value,
        description: &str,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
            default: Some(default),
            allowed: Vec::new(),
        });
        self
    }

    /// 限定最近一个参数的取值（仅字符串参数）
    pub fn one_of(mut self, values: &[&str]) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.allowed = values.iter().map(|v| v.to_string()).collect();
        }
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 校验参数并补全默认值；null 视为空对象，未声明的多余字段原样保留
    pub fn validate(&self, args: &Value) -> Result<Value, String> {
        let mut obj = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(format!(
                    "arguments must be a JSON object, got {}",
                    json_type_name(other)
                ))
            }
        };

        let mut problems = Vec::new();
        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        problems.push(format!("missing required field '{}'", field.name));
                    } else if let Some(default) = &field.default {
                        obj.insert(field.name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        problems.push(format!(
                            "field '{}' expected {}, got {}",
                            field.name,
                            field.kind.as_str(),
                            json_type_name(value)
                        ));
                    } else if !field.allowed.is_empty() {
                        let s = value.as_str().unwrap_or_default();
                        if !field.allowed.iter().any(|a| a == s) {
                            problems.push(format!(
                                "field '{}' must be one of [{}], got '{}'",
                                field.name,
                                field.allowed.join(", "),
                                s
                            ));
                        }
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(Value::Object(obj))
        } else {
            Err(problems.join("; "))
        }
    }

    /// 导出为 JSON Schema（写入 system prompt）
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::String(field.kind.as_str().into()));
            prop.insert("description".into(), Value::String(field.description.clone()));
            if let Some(default) = &field.default {
                prop.insert("default".into(), default.clone());
            }
            if !field.allowed.is_empty() {
                prop.insert(
                    "enum".into(),
                    Value::Array(field.allowed.iter().cloned().map(Value::String).collect()),
                );
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }
        let required: Vec<Value> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| Value::String(f.name.clone()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// 单次工具调用格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 调用 id，可省略；省略时按迭代与序号生成
    pub id: Option<String>,
    /// 工具名，如 read_file、bash、str_replace_editor
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

/// 一轮中请求多个工具调用时的格式
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatchFormat {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let single = schema_for!(ToolCallFormat);
    let batch = schema_for!(ToolCallBatchFormat);
    let single = serde_json::to_string_pretty(&single).unwrap_or_default();
    let batch = serde_json::to_string_pretty(&batch).unwrap_or_default();
    format!("Single call:\n{single}\n\nSeveral calls in one turn:\n{batch}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn editor_schema() -> ParameterSchema {
        ParameterSchema::new()
            .required("command", FieldType::String, "action")
            .one_of(&["view", "create"])
            .required("path", FieldType::String, "file path")
            .with_default("limit", FieldType::Integer, json!(100), "max lines")
    }

    #[test]
    fn test_validate_fills_defaults() {
        let out = editor_schema()
            .validate(&json!({"command": "view", "path": "a.rs"}))
            .unwrap();
        assert_eq!(out["limit"], 100);
    }

    #[test]
    fn test_validate_reports_missing_and_mismatched() {
        let err = editor_schema()
            .validate(&json!({"command": "view", "limit": "ten"}))
            .unwrap_err();
        assert!(err.contains("missing required field 'path'"));
        assert!(err.contains("field 'limit' expected integer, got string"));
    }

    #[test]
    fn test_validate_rejects_non_object_and_enum() {
        assert!(editor_schema().validate(&json!("x")).is_err());
        let err = editor_schema()
            .validate(&json!({"command": "delete", "path": "a"}))
            .unwrap_err();
        assert!(err.contains("must be one of [view, create]"));
    }

    #[test]
    fn test_null_args_treated_as_empty() {
        let schema = ParameterSchema::new().optional("x", FieldType::Boolean, "flag");
        assert_eq!(schema.validate(&Value::Null).unwrap(), json!({}));
    }

    #[test]
    fn test_json_schema_export() {
        let schema = editor_schema().to_json_schema();
        assert_eq!(schema["required"], json!(["command", "path"]));
        assert_eq!(schema["properties"]["command"]["enum"], json!(["view", "create"]));
        assert_eq!(schema["properties"]["limit"]["default"], 100);
        assert!(tool_call_schema_json().contains("tool_calls"));
    }
}
