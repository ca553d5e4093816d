//! JSON Schema → Gemini Schema rewrite for tool parameter declarations.
//!
//! Gemini's Schema dialect is a subset of JSON Schema with SCREAMING types,
//! `nullable` instead of `type: null` unions, and no `$ref` indirection. Tool
//! schemas written for OpenAI-style endpoints are rewritten recursively.

use serde_json::{Map, Value, json};

/// Keywords Gemini rejects outright.
const DROPPED_KEYWORDS: &[&str] = &[
    "$id",
    "$ref",
    "$schema",
    "$defs",
    "additionalProperties",
    "allOf",
    "anyOf",
    "default",
    "definitions",
    "examples",
    "title",
    "type",
];

/// Keywords copied through after recursion where applicable.
const KEPT_KEYWORDS: &[&str] = &[
    "description",
    "enum",
    "format",
    "maxItems",
    "maximum",
    "minItems",
    "minimum",
    "nullable",
    "pattern",
    "required",
];

/// Rewrite `schema` into Gemini Schema form, resolving `$ref` against `root`.
pub(crate) fn to_gemini_schema(root: &Value, schema: &Value) -> Value {
    convert(root, schema, &mut Vec::new())
}

fn convert(root: &Value, schema: &Value, visiting: &mut Vec<String>) -> Value {
    let Some(object) = schema.as_object() else {
        return json!({});
    };

    // $ref: resolve against the root document, guarding against cycles.
    if let Some(reference) = object.get("$ref").and_then(Value::as_str) {
        if visiting.iter().any(|seen| seen == reference) {
            return json!({});
        }

        let Some(resolved) = reference.strip_prefix('#').and_then(|pointer| root.pointer(pointer)) else {
            log::debug!("Dropping unresolvable schema reference {reference:?}");
            return json!({});
        };

        visiting.push(reference.to_string());
        let converted = convert(root, resolved, visiting);
        visiting.pop();

        return converted;
    }

    let mut out = Map::new();

    // allOf: shallow-merge each converted subschema.
    if let Some(all_of) = object.get("allOf").and_then(Value::as_array) {
        for subschema in all_of {
            if let Value::Object(entries) = convert(root, subschema, visiting) {
                out.extend(entries);
            }
        }
    }

    // anyOf: a {type: null} member becomes `nullable`; a single remaining
    // member is inlined, more than one is kept as a converted union.
    if let Some(any_of) = object.get("anyOf").and_then(Value::as_array) {
        let (null_members, rest): (Vec<_>, Vec<_>) = any_of
            .iter()
            .partition(|member| member.get("type").and_then(Value::as_str) == Some("null"));

        if !null_members.is_empty() {
            out.insert("nullable".into(), Value::Bool(true));
        }

        match rest.as_slice() {
            [] => {}
            [only] => {
                if let Value::Object(entries) = convert(root, only, visiting) {
                    out.extend(entries);
                }
            }
            many => {
                let converted: Vec<Value> = many.iter().map(|member| convert(root, member, visiting)).collect();
                out.insert("anyOf".into(), Value::Array(converted));
            }
        }
    }

    if let Some(kind) = object.get("type").and_then(Value::as_str) {
        out.insert("type".into(), Value::String(kind.to_uppercase()));
    }

    if let Some(properties) = object.get("properties").and_then(Value::as_object) {
        let converted: Map<String, Value> = properties
            .iter()
            .map(|(name, subschema)| (name.clone(), convert(root, subschema, visiting)))
            .collect();
        out.insert("properties".into(), Value::Object(converted));
    }

    if let Some(items) = object.get("items") {
        out.insert("items".into(), convert(root, items, visiting));
    }

    for (key, value) in object {
        if KEPT_KEYWORDS.contains(&key.as_str()) && !out.contains_key(key) {
            out.insert(key.clone(), value.clone());
        } else if !DROPPED_KEYWORDS.contains(&key.as_str())
            && !matches!(key.as_str(), "properties" | "items")
            && !out.contains_key(key)
        {
            log::trace!("Dropping schema keyword {key:?}");
        }
    }

    Value::Object(out)
}
