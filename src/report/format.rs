//! Human-readable rendering of recorded answers.
use crate::model::SurveyDefinition;
use chrono::DateTime;
use serde_json::{Map, Value as JsonValue};

pub const NOT_ANSWERED: &str = "Not answered";

// Sub-field order for repeating panels whose shape is known up front.
const KNOWN_LAYOUTS: &[(&str, &[&str])] = &[
    ("visited_countries", &["country", "favorite_city"]),
    (
        "flights",
        &["airline", "flight_number", "departure", "arrival", "date"],
    ),
    ("family_members", &["name", "relationship", "age"]),
];

/// `favorite_city` → `Favorite City`.
pub fn title_case(raw: &str) -> String {
    raw.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title of the element named `field` anywhere in the definition, else the title-cased name.
pub fn field_label(field: &str, def: Option<&SurveyDefinition>) -> String {
    def.and_then(|d| d.find_element(field))
        .and_then(|el| el.title.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| title_case(field))
}

/// RFC 3339 timestamps as `YYYY-MM-DD HH:MM`; anything else passes through.
pub fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn is_blank(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn scalar(v: &JsonValue) -> String {
    match v {
        JsonValue::Bool(true) => "Yes".into(),
        JsonValue::Bool(false) => "No".into(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn inline(v: &JsonValue, def: Option<&SurveyDefinition>) -> String {
    match v {
        JsonValue::Array(items) => items
            .iter()
            .filter(|i| !is_blank(i))
            .map(|i| inline(i, def))
            .collect::<Vec<_>>()
            .join(", "),
        JsonValue::Object(obj) => listing(obj, None, def),
        other => scalar(other),
    }
}

fn listing(
    obj: &Map<String, JsonValue>,
    layout: Option<&[&str]>,
    def: Option<&SurveyDefinition>,
) -> String {
    let mut keys: Vec<&str> = Vec::new();
    if let Some(order) = layout {
        keys.extend(order.iter().copied().filter(|k| obj.contains_key(*k)));
    }
    for k in obj.keys() {
        if !keys.contains(&k.as_str()) {
            keys.push(k);
        }
    }
    keys.into_iter()
        .filter_map(|k| {
            let v = obj.get(k).filter(|v| !is_blank(v))?;
            Some(format!("{}: {}", field_label(k, def), inline(v, def)))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format an answer with the viewer's placeholder for missing values.
pub fn format_value(
    value: Option<&JsonValue>,
    field: Option<&str>,
    def: Option<&SurveyDefinition>,
) -> String {
    format_value_with(value, field, def, NOT_ANSWERED)
}

/// Format an answer. Repeating-panel instances become numbered `[n] Label: value` segments.
pub fn format_value_with(
    value: Option<&JsonValue>,
    field: Option<&str>,
    def: Option<&SurveyDefinition>,
    placeholder: &str,
) -> String {
    let Some(value) = value.filter(|v| !is_blank(v)) else {
        return placeholder.to_string();
    };
    let layout = field.and_then(|f| {
        KNOWN_LAYOUTS
            .iter()
            .find(|(name, _)| *name == f)
            .map(|(_, order)| *order)
    });
    match value {
        JsonValue::Array(items) if items.iter().any(|i| i.is_object()) => items
            .iter()
            .filter_map(|i| i.as_object())
            .enumerate()
            .map(|(n, obj)| format!("[{}] {}", n + 1, listing(obj, layout, def)))
            .collect::<Vec<_>>()
            .join("; "),
        JsonValue::Object(obj) => listing(obj, layout, def),
        other => inline(other, def),
    }
}
