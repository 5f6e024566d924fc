//! Source record to destination payload translation

use chrono::Utc;
use serde_json::{json, Map, Value};
use shared::{EntityType, Issue, SourceRecord};

use crate::core::Mappings;
use crate::traits::{RecordTransformer, TransformOutcome};

const DEFAULT_TASK_TYPE: u64 = 1;
const DEFAULT_NOTE_TYPE: &str = "common";
const FALLBACK_DEADLINE_SECS: i64 = 86_400;

/// Translates stages and custom fields through the configured mappings.
/// Anything without a mapping is dropped, never guessed.
#[derive(Debug, Clone, Default)]
pub struct MappingTransformer {
    pipeline_id: Option<String>,
}

impl MappingTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination pipeline stamped into every lead payload
    pub fn with_pipeline_id(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    fn lead(&self, record: &SourceRecord, mappings: &Mappings, out: &mut Map<String, Value>) {
        out.insert("name".into(), name_or_default(record, "Lead"));
        out.insert(
            "price".into(),
            record.attributes.get("price").filter(|p| p.is_number()).cloned().unwrap_or(json!(0)),
        );
        if let Some(pipeline) = &self.pipeline_id {
            out.insert("pipeline_id".into(), numeric_or_string(pipeline));
        }
        // An unmapped stage is left to the destination default
        if let Some(stage) = record.stage_id.as_deref().and_then(|s| mappings.stage_for(s)) {
            out.insert("status_id".into(), numeric_or_string(stage));
        }

        let tags: Vec<Value> = record
            .attributes
            .pointer("/_embedded/tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .filter(|name| !name.is_empty())
                    .map(|name| json!({ "name": name }))
                    .collect()
            })
            .unwrap_or_default();
        if !tags.is_empty() {
            out.insert("_embedded".into(), json!({ "tags": tags }));
        }
    }

    fn task(&self, record: &SourceRecord, out: &mut Map<String, Value>) {
        let attrs = &record.attributes;
        out.insert(
            "task_type_id".into(),
            attrs.get("task_type_id").cloned().unwrap_or(json!(DEFAULT_TASK_TYPE)),
        );
        out.insert(
            "text".into(),
            attrs.get("text").cloned().unwrap_or(Value::String(String::new())),
        );
        let deadline = attrs
            .get("complete_till")
            .and_then(Value::as_i64)
            .filter(|t| *t > 0)
            .unwrap_or_else(|| Utc::now().timestamp() + FALLBACK_DEADLINE_SECS);
        out.insert("complete_till".into(), json!(deadline));
        match attrs.get("result") {
            Some(Value::Object(result)) if !result.is_empty() => {
                out.insert("result".into(), Value::Object(result.clone()));
            }
            Some(Value::String(text)) if !text.is_empty() => {
                out.insert("result".into(), json!({ "text": text }));
            }
            _ => {}
        }
    }

    fn note(&self, record: &SourceRecord, out: &mut Map<String, Value>) {
        let attrs = &record.attributes;
        out.insert(
            "note_type".into(),
            attrs.get("note_type").cloned().unwrap_or(json!(DEFAULT_NOTE_TYPE)),
        );
        out.insert("params".into(), attrs.get("params").cloned().unwrap_or(json!({})));
    }
}

impl RecordTransformer for MappingTransformer {
    fn transform(&self, record: &SourceRecord, mappings: &Mappings) -> TransformOutcome {
        let mut payload = Map::new();
        let mut warnings = Vec::new();

        match record.entity_type {
            EntityType::Leads => self.lead(record, mappings, &mut payload),
            EntityType::Contacts => {
                payload.insert("name".into(), name_or_default(record, "Contact"));
            }
            EntityType::Companies => {
                payload.insert("name".into(), name_or_default(record, "Company"));
            }
            EntityType::Tasks => self.task(record, &mut payload),
            EntityType::Notes => self.note(record, &mut payload),
        }

        if record.entity_type.is_root() {
            let (fields, dropped) = custom_fields(record, mappings);
            if !fields.is_empty() {
                payload.insert("custom_fields_values".into(), Value::Array(fields));
            }
            // A missing mapping document is reported once before the run
            if dropped > 0 && mappings.fields.is_some() {
                warnings.push(Issue::new(format!(
                    "{} {}: {dropped} custom field(s) have no mapping and were not transferred",
                    record.entity_type, record.id
                )));
            }
        }

        TransformOutcome {
            payload: Value::Object(payload),
            warnings,
        }
    }
}

fn name_or_default(record: &SourceRecord, kind: &str) -> Value {
    record
        .attributes
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .map(|n| Value::String(n.to_string()))
        .unwrap_or_else(|| Value::String(format!("{kind} #{}", record.id)))
}

/// Mapped custom field values, plus the number of fields that had values but no mapping
fn custom_fields(record: &SourceRecord, mappings: &Mappings) -> (Vec<Value>, usize) {
    let Some(values) = record.attributes.get("custom_fields_values").and_then(Value::as_array) else {
        return (Vec::new(), 0);
    };

    let mut mapped = Vec::new();
    let mut dropped = 0;
    for field in values {
        let source_field = match field.get("field_id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => continue,
        };
        let field_values = field.get("values").cloned().unwrap_or(json!([]));
        if field_values.as_array().map_or(true, Vec::is_empty) {
            continue;
        }
        match mappings.field_for(record.entity_type, &source_field) {
            Some(destination_field) => mapped.push(json!({
                "field_id": numeric_or_string(destination_field),
                "values": field_values,
            })),
            None => dropped += 1,
        }
    }
    (mapped, dropped)
}

fn numeric_or_string(id: &str) -> Value {
    id.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::String(id.to_string()))
}
