//! Choice items as delivered by lookup endpoints, and their normalization into
//! the `{value, text}` shape the form works with.
use crate::model::ChoicesSource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// How a lookup source lays out its items.
///
/// `KeyValue` sources emit `{key, value}` where `value` is the human-readable label.
/// `Auto` infers that layout from the presence of both fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemShape {
    #[default]
    Auto,
    KeyValue,
    ValueText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: JsonValue,
    pub text: String,
}

impl Choice {
    pub fn new(value: impl Into<JsonValue>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
        }
    }

    pub fn matches(&self, value: &JsonValue) -> bool {
        same_value(&self.value, value)
    }
}

/// Loose equality: `"3"` and `3` name the same choice.
pub fn same_value(a: &JsonValue, b: &JsonValue) -> bool {
    a == b || (is_scalar(a) && is_scalar(b) && display(a) == display(b))
}

/// Hash key consistent with [`same_value`]: scalars collapse to their display text.
pub fn value_key(v: &JsonValue) -> String {
    if is_scalar(v) {
        format!("s:{}", display(v))
    } else {
        format!("j:{v}")
    }
}

fn is_scalar(v: &JsonValue) -> bool {
    matches!(
        v,
        JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_)
    )
}

/// Display text for a scalar, or compact JSON for anything else.
pub fn display(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn get_by_path<'a>(v: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut cur = v;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

/// Pull the item array out of a lookup payload.
///
/// Accepts a bare array, `{items: [...]}`, `{data: {items: [...]}}` or `{results: [...]}`.
/// An explicit `path` (dot separated, `;` for alternatives) wins when it resolves.
pub fn extract_items(payload: &JsonValue, path: Option<&str>) -> Vec<JsonValue> {
    if let Some(p) = path.filter(|p| !p.is_empty()) {
        for alt in p.split(';') {
            if let Some(arr) = get_by_path(payload, alt.trim()).and_then(|x| x.as_array()) {
                return arr.clone();
            }
        }
    }
    payload
        .as_array()
        .or_else(|| payload.get("items").and_then(|x| x.as_array()))
        .or_else(|| {
            payload
                .get("data")
                .and_then(|d| d.get("items"))
                .and_then(|x| x.as_array())
        })
        .or_else(|| payload.get("results").and_then(|x| x.as_array()))
        .cloned()
        .unwrap_or_default()
}

fn non_null<'a>(obj: &'a Map<String, JsonValue>, key: &str) -> Option<&'a JsonValue> {
    obj.get(key).filter(|v| !v.is_null())
}

// Lookup imports store `value` as a nested `{value, text}` object.
fn unwrap_nested(v: &JsonValue) -> (JsonValue, Option<String>) {
    match v.as_object() {
        Some(inner) => {
            let value = non_null(inner, "value").cloned().unwrap_or(JsonValue::Null);
            let text = non_null(inner, "text").map(display);
            (value, text)
        }
        None => (v.clone(), None),
    }
}

fn text_of(obj: &Map<String, JsonValue>) -> Option<String> {
    ["text", "title", "name", "label"]
        .iter()
        .find_map(|k| non_null(obj, k))
        .map(display)
}

/// Normalize one raw item into a [`Choice`]. Items without a usable value are dropped.
///
/// With both `key` and `value` present (and `Auto` or `KeyValue` shape), `key` becomes the
/// stored value and `value` the display text, unless the item also carries `text`.
/// An item that is already `{value, text}` comes back unchanged.
pub fn normalize_item(
    raw: &JsonValue,
    shape: ItemShape,
    value_name: Option<&str>,
    title_name: Option<&str>,
) -> Option<Choice> {
    let obj = match raw {
        JsonValue::Null => return None,
        JsonValue::Object(obj) => obj,
        JsonValue::Array(_) => return None,
        scalar => return Some(Choice::new(scalar.clone(), display(scalar))),
    };

    if let Some(v) = value_name.and_then(|vn| non_null(obj, vn)) {
        let (value, nested_text) = unwrap_nested(v);
        if !value.is_null() {
            let text = title_name
                .and_then(|tn| non_null(obj, tn))
                .map(display)
                .or(nested_text)
                .or_else(|| text_of(obj))
                .unwrap_or_else(|| display(&value));
            return Some(Choice { value, text });
        }
    }

    let key = non_null(obj, "key");
    let swap = match shape {
        ItemShape::KeyValue => key.is_some(),
        ItemShape::Auto => key.is_some() && non_null(obj, "value").is_some(),
        ItemShape::ValueText => false,
    };
    if let Some(key) = key.filter(|_| swap) {
        let (label_value, nested_text) = non_null(obj, "value")
            .map(unwrap_nested)
            .unwrap_or((JsonValue::Null, None));
        let text = non_null(obj, "text")
            .map(display)
            .or(nested_text)
            .or_else(|| (!label_value.is_null()).then(|| display(&label_value)))
            .unwrap_or_else(|| display(key));
        return Some(Choice {
            value: key.clone(),
            text,
        });
    }

    let (value, nested_text) = match non_null(obj, "value") {
        Some(v) => unwrap_nested(v),
        None => (
            non_null(obj, "key")
                .or_else(|| non_null(obj, "id"))
                .cloned()
                .unwrap_or(JsonValue::Null),
            None,
        ),
    };
    if value.is_null() {
        return None;
    }
    let text = non_null(obj, "text")
        .map(display)
        .or(nested_text)
        .or_else(|| text_of(obj))
        .unwrap_or_else(|| display(&value));
    Some(Choice { value, text })
}

/// Normalize a whole lookup payload according to its source description.
pub fn normalize_payload(payload: &JsonValue, source: &ChoicesSource) -> Vec<Choice> {
    extract_items(payload, source.path.as_deref())
        .iter()
        .filter_map(|raw| {
            normalize_item(
                raw,
                source.item_shape,
                source.value_name.as_deref(),
                source.title_name.as_deref(),
            )
        })
        .collect()
}

/// Static `choices` declared inline on an element.
pub fn static_choices(raw: &[JsonValue]) -> Vec<Choice> {
    raw.iter()
        .filter_map(|c| normalize_item(c, ItemShape::ValueText, None, None))
        .collect()
}
