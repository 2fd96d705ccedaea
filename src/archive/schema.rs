use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A field as the source store reports it, ids and all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Option<Value>,
}

/// Creation-ready projection of one field. Never carries a server id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

fn local_date_format() -> Value {
    json!({ "name": "local", "format": "l" })
}

fn project_choices(options: Option<&Value>) -> Value {
    let choices = options
        .and_then(|o| o.get("choices"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|choice| {
                    let mut out = Map::new();
                    if let Some(name) = choice.get("name") {
                        out.insert("name".into(), name.clone());
                    }
                    if let Some(color) = choice.get("color") {
                        out.insert("color".into(), color.clone());
                    }
                    Value::Object(out)
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    json!({ "choices": choices })
}

fn project_options(field: &FieldDefinition) -> Option<Value> {
    let options = field.options.as_ref();
    match field.field_type.as_str() {
        "checkbox" => options.cloned(),
        "singleSelect" | "multipleSelects" => Some(project_choices(options)),
        "number" => {
            let precision = options
                .and_then(|o| o.get("precision"))
                .cloned()
                .unwrap_or(Value::Null);
            Some(json!({ "precision": precision }))
        }
        "date" => {
            let date_format = options
                .and_then(|o| o.get("dateFormat"))
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(local_date_format);
            Some(json!({ "dateFormat": date_format }))
        }
        // attachments and everything else: options are not portable
        _ => None,
    }
}

pub fn project_field(field: &FieldDefinition) -> FieldSchema {
    FieldSchema {
        field_type: field.field_type.clone(),
        name: field.name.clone(),
        description: field.description.clone().unwrap_or_default(),
        options: project_options(field),
    }
}

/// Portable schema for a new archive table, in source order, minus the
/// migrated flag.
pub fn project_schema(fields: &[FieldDefinition], flag_field: &str) -> Vec<FieldSchema> {
    fields
        .iter()
        .filter(|f| f.name != flag_field)
        .map(project_field)
        .collect()
}
