//! CSV export of loaded responses.
use crate::model::{ResponseRecord, SurveyDefinition};
use crate::report::format::{field_label, format_value_with};

const MISSING: &str = "-";

/// Quote a field when it contains a delimiter, quote or line break; inner quotes are doubled.
pub fn escape_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Survey fields in definition order, followed by keys seen only in response data.
pub fn collect_columns(responses: &[ResponseRecord], def: Option<&SurveyDefinition>) -> Vec<String> {
    let mut cols = def.map(|d| d.data_field_names()).unwrap_or_default();
    for r in responses {
        if let Some(obj) = r.response_data.as_object() {
            for k in obj.keys() {
                if !cols.contains(k) {
                    cols.push(k.clone());
                }
            }
        }
    }
    cols
}

pub fn export_responses(responses: &[ResponseRecord], def: Option<&SurveyDefinition>) -> String {
    let cols = collect_columns(responses, def);
    let mut out = String::new();
    let mut header = vec!["Response ID".to_string(), "Submitted At".to_string()];
    header.extend(cols.iter().map(|c| field_label(c, def)));
    push_row(&mut out, &header);
    for r in responses {
        let mut row = vec![
            r.response_id.clone(),
            r.submitted_at.clone().unwrap_or_else(|| MISSING.to_string()),
        ];
        for c in &cols {
            row.push(format_value_with(
                r.response_data.get(c),
                Some(c.as_str()),
                def,
                MISSING,
            ));
        }
        push_row(&mut out, &row);
    }
    out
}

fn push_row(out: &mut String, cells: &[String]) {
    let line = cells
        .iter()
        .map(|c| escape_field(c))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

/// File name for an export of one survey's responses.
pub fn export_file_name(survey_name: &str, stamp: &str) -> String {
    let slug: String = survey_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_responses_{stamp}.csv", slug.trim_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, data: serde_json::Value) -> ResponseRecord {
        ResponseRecord {
            response_id: id.into(),
            response_data: data,
            submitted_at: Some("2024-05-01T10:00:00Z".into()),
            ..Default::default()
        }
    }

    #[test]
    fn escaping_quotes_only_when_needed() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a, b"), "\"a, b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn definition_columns_come_first() {
        let def = SurveyDefinition::parse(&json!({"elements": [
            {"type": "text", "name": "traveller", "title": "Your name"},
            {"type": "boolean", "name": "returning"}
        ]}))
        .unwrap();
        let rows = vec![
            record("r1", json!({"extra": 1, "traveller": "Ana"})),
            record("r2", json!({"returning": true, "notes": "x"})),
        ];
        assert_eq!(
            collect_columns(&rows, Some(&def)),
            vec!["traveller", "returning", "extra", "notes"]
        );
        let csv = export_responses(&rows, Some(&def));
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "Response ID,Submitted At,Your name,Returning,Extra,Notes"
        );
        assert_eq!(lines[1], "r1,2024-05-01T10:00:00Z,Ana,-,1,-");
        assert_eq!(lines[2], "r2,2024-05-01T10:00:00Z,-,Yes,-,x");
    }

    #[test]
    fn formatted_cells_are_escaped() {
        let rows = vec![record("r1", json!({"cities": ["Paris", "Rome"]}))];
        let csv = export_responses(&rows, None);
        assert!(csv.contains(",\"Paris, Rome\"\n"));
    }

    #[test]
    fn file_names_are_slugged() {
        assert_eq!(
            export_file_name("Travel Survey 2024", "20240501"),
            "travel_survey_2024_responses_20240501.csv"
        );
    }
}
