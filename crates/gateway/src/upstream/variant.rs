//! Compatibility variants of a canonical request.
//!
//! Responses-compatible upstreams disagree on field names and input shapes.
//! Rather than fingerprinting them, the gateway expands one canonical request
//! into an ordered list of equivalent bodies and lets the selector try them
//! in order, so earlier (richer) shapes are preferred.

use serde_json::{Value, json};

use crate::messages::responses::ResponsesRequest;

/// Expand a canonical request into deduplicated candidate bodies.
pub(crate) fn build_variants(request: &ResponsesRequest, stream: bool) -> Vec<Value> {
    let mut base = serde_json::to_value(request).unwrap_or_else(|_| json!({}));
    base["stream"] = Value::Bool(stream);

    let mut variants = vec![base];

    // max_output_tokens -> max_tokens rename.
    expand(&mut variants, |variant| {
        let tokens = variant.get("max_output_tokens")?.clone();
        let mut next = variant.clone();

        let object = next.as_object_mut()?;
        object.remove("max_output_tokens");
        object.insert("max_tokens".into(), tokens);

        Some(next)
    });

    // Fold instructions into a leading system message.
    expand(&mut variants, |variant| {
        let instructions = variant.get("instructions")?.as_str()?.to_string();
        variant.get("input")?.as_array()?;

        let mut next = variant.clone();
        let object = next.as_object_mut()?;
        object.remove("instructions");

        let system = json!({
            "role": "system",
            "content": [{"type": "input_text", "text": instructions}],
        });

        if let Some(input) = object.get_mut("input").and_then(Value::as_array_mut) {
            input.insert(0, system);
        }

        Some(next)
    });

    // Plain chat-style input when nothing structured is present.
    if !has_images_or_tools(&variants[0]) {
        expand(&mut variants, |variant| {
            let input = variant.get("input")?.as_array()?;

            let simplified: Vec<Value> = input
                .iter()
                .filter_map(|item| {
                    let role = item.get("role")?.as_str()?;
                    Some(json!({"role": role, "content": flat_text(item)}))
                })
                .collect();

            if simplified.is_empty() {
                return None;
            }

            let mut next = variant.clone();
            next["input"] = Value::Array(simplified);
            Some(next)
        });

        // Single concatenated prompt.
        let prompt = full_prompt(&variants[0]);
        if !prompt.is_empty() {
            let mut next = variants[0].clone();
            if let Some(object) = next.as_object_mut() {
                object.remove("instructions");
                object.insert(
                    "input".into(),
                    json!([{"role": "user", "content": [{"type": "input_text", "text": prompt}]}]),
                );
            }
            variants.push(next);
        }
    }

    // image_url: "…" -> image_url: {url: "…"}.
    expand(&mut variants, |variant| {
        let mut next = variant.clone();
        wrap_image_urls(&mut next).then_some(next)
    });

    // Reasoning effort spellings.
    expand_many(&mut variants, |variant| {
        let effort = reasoning_effort(variant)?;
        let stripped = without_keys(variant, &["reasoning", "reasoning_effort"]);

        let mut as_object = stripped.clone();
        if let Some(object) = as_object.as_object_mut() {
            object.insert("reasoning".into(), json!({"effort": effort}));
        }

        let mut as_string = stripped.clone();
        if let Some(object) = as_string.as_object_mut() {
            object.insert("reasoning_effort".into(), Value::String(effort));
        }

        Some(vec![as_object, as_string, stripped])
    });

    // Caching/identity fields some upstreams reject.
    expand_many(&mut variants, |variant| {
        let has_retention = variant.get("prompt_cache_retention").is_some();
        let has_identifier = variant.get("safety_identifier").is_some();

        if !has_retention && !has_identifier {
            return None;
        }

        let mut out = Vec::new();
        if has_retention {
            out.push(without_keys(variant, &["prompt_cache_retention"]));
        }
        if has_identifier {
            out.push(without_keys(variant, &["safety_identifier"]));
        }
        if has_retention && has_identifier {
            out.push(without_keys(variant, &["prompt_cache_retention", "safety_identifier"]));
        }

        Some(out)
    });

    dedup(variants)
}

/// Append `transform(v)` for each variant currently in the list.
fn expand(variants: &mut Vec<Value>, transform: impl Fn(&Value) -> Option<Value>) {
    let additions: Vec<Value> = variants.iter().filter_map(&transform).collect();
    variants.extend(additions);
}

fn expand_many(variants: &mut Vec<Value>, transform: impl Fn(&Value) -> Option<Vec<Value>>) {
    let additions: Vec<Value> = variants.iter().filter_map(&transform).flatten().collect();
    variants.extend(additions);
}

fn has_images_or_tools(variant: &Value) -> bool {
    if variant.get("tools").map(|tools| !tools.is_null()).unwrap_or(false) {
        return true;
    }

    let Some(input) = variant.get("input").and_then(Value::as_array) else {
        return false;
    };

    input.iter().any(|item| {
        let is_tool_item = matches!(
            item.get("type").and_then(Value::as_str),
            Some("function_call" | "function_call_output")
        );

        let has_image = item
            .get("content")
            .and_then(Value::as_array)
            .is_some_and(|parts| {
                parts
                    .iter()
                    .any(|part| part.get("type").and_then(Value::as_str) == Some("input_image"))
            });

        is_tool_item || has_image
    })
}

fn flat_text(item: &Value) -> String {
    match item.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

fn full_prompt(variant: &Value) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(instructions) = variant.get("instructions").and_then(Value::as_str) {
        sections.push(instructions.to_string());
    }

    if let Some(input) = variant.get("input").and_then(Value::as_array) {
        for item in input {
            let text = flat_text(item);
            if !text.is_empty() {
                sections.push(text);
            }
        }
    }

    sections.join("\n")
}

/// Rewrite every string-valued `image_url` into `{url}`; false when the
/// variant had none.
fn wrap_image_urls(value: &mut Value) -> bool {
    match value {
        Value::Object(object) => {
            let mut changed = false;

            if let Some(url @ Value::String(_)) = object.get("image_url").cloned()
                && object.get("type").and_then(Value::as_str) == Some("input_image")
            {
                object.insert("image_url".into(), json!({"url": url}));
                changed = true;
            }

            for nested in object.values_mut() {
                changed |= wrap_image_urls(nested);
            }

            changed
        }
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= wrap_image_urls(item);
            }
            changed
        }
        _ => false,
    }
}

fn reasoning_effort(variant: &Value) -> Option<String> {
    if let Some(effort) = variant.pointer("/reasoning/effort").and_then(Value::as_str) {
        return Some(effort.to_string());
    }

    variant
        .get("reasoning_effort")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn without_keys(variant: &Value, keys: &[&str]) -> Value {
    let mut next = variant.clone();
    if let Some(object) = next.as_object_mut() {
        for key in keys {
            object.remove(*key);
        }
    }
    next
}

/// Deduplicate by structural equality, keeping first occurrences.
fn dedup(variants: Vec<Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for variant in variants {
        let key = stable_string(&variant);
        if seen.insert(key) {
            out.push(variant);
        }
    }

    out
}

/// Canonical stringification: `serde_json` maps are ordered, so plain
/// serialization is stable.
fn stable_string(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
