use crate::engine::choices::ItemShape;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ---------------- Survey definition (SurveyJS-shaped) ----------------------

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SurveyDefinition {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pages: Vec<Page>,
    // Single-page surveys may list elements at the root
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub assets: Option<JsonValue>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    // Static choices: strings, numbers or {value, text} objects
    #[serde(default)]
    pub choices: Vec<JsonValue>,
    #[serde(default, alias = "choicesSource")]
    pub choices_by_url: Option<ChoicesSource>,
    // Static panel children
    #[serde(default)]
    pub elements: Vec<Element>,
    // Dynamic panel template
    #[serde(default)]
    pub template_elements: Vec<Element>,
    #[serde(default)]
    pub template_title: Option<String>,
    #[serde(default)]
    pub panel_count: Option<usize>,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub render_as: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
}

/// Remote lookup description attached to a choice question.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChoicesSource {
    #[serde(alias = "urlTemplate")]
    pub url: String,
    #[serde(default, alias = "valueField")]
    pub value_name: Option<String>,
    #[serde(default, alias = "textField")]
    pub title_name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub item_shape: ItemShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Text { numeric: bool },
    Comment,
    Boolean,
    Dropdown,
    Checkbox,
    Typeahead,
    Panel,
    DynamicPanel,
    Display,
}

impl Element {
    pub fn question_kind(&self) -> QuestionKind {
        let render_as = self.render_as.as_deref().unwrap_or("");
        match self.kind.to_ascii_lowercase().as_str() {
            "typeahead" => QuestionKind::Typeahead,
            "dropdown" | "radiogroup" | "tagbox" if render_as == "typeahead" => {
                QuestionKind::Typeahead
            }
            "dropdown" | "radiogroup" | "rating" => QuestionKind::Dropdown,
            "checkbox" => QuestionKind::Checkbox,
            "boolean" => QuestionKind::Boolean,
            "comment" => QuestionKind::Comment,
            "panel" => QuestionKind::Panel,
            "paneldynamic" => QuestionKind::DynamicPanel,
            "html" | "image" | "expression" => QuestionKind::Display,
            _ => QuestionKind::Text {
                numeric: matches!(self.input_type.as_deref(), Some("number") | Some("range")),
            },
        }
    }

    pub fn label(&self) -> String {
        self.title.clone().unwrap_or_else(|| self.name.clone())
    }
}

impl SurveyDefinition {
    pub fn parse(v: &JsonValue) -> Result<Self, serde_json::Error> {
        // Some backends wrap the definition: {"survey": {...}} or {"definition": {...}}
        let inner = v
            .get("definition")
            .or_else(|| v.get("survey"))
            .filter(|x| x.is_object())
            .unwrap_or(v);
        serde_json::from_value(inner.clone())
    }

    /// Top-level elements across all pages, in page order.
    pub fn top_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements
            .iter()
            .chain(self.pages.iter().flat_map(|p| p.elements.iter()))
    }

    /// Find an element by name anywhere: top level, static panels or dynamic panel templates.
    pub fn find_element(&self, name: &str) -> Option<&Element> {
        fn walk<'a>(els: &'a [Element], name: &str) -> Option<&'a Element> {
            for el in els {
                if el.name == name {
                    return Some(el);
                }
                if let Some(hit) = walk(&el.elements, name) {
                    return Some(hit);
                }
                if let Some(hit) = walk(&el.template_elements, name) {
                    return Some(hit);
                }
            }
            None
        }
        walk(&self.elements, name)
            .or_else(|| self.pages.iter().find_map(|p| walk(&p.elements, name)))
    }

    /// Names under which answers appear in response data, in definition order.
    /// Static panels contribute their children; a dynamic panel contributes its own name.
    pub fn data_field_names(&self) -> Vec<String> {
        fn walk(els: &[Element], out: &mut Vec<String>) {
            for el in els {
                match el.question_kind() {
                    QuestionKind::Panel => walk(&el.elements, out),
                    QuestionKind::Display => {}
                    _ => {
                        if !el.name.is_empty() && !out.contains(&el.name) {
                            out.push(el.name.clone());
                        }
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.elements, &mut out);
        for p in &self.pages {
            walk(&p.elements, &mut out);
        }
        out
    }
}

// ---------------- Backend REST shapes --------------------------------------

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Customer {
    #[serde(default)]
    #[allow(dead_code)]
    pub id: Option<JsonValue>,
    pub name: String,
    pub hex_id: String,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_deleted: Option<bool>,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub created_at: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CustomerList {
    #[serde(default)]
    pub customers: Vec<Customer>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Namespace {
    #[serde(default)]
    #[allow(dead_code)]
    pub id: Option<JsonValue>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_deleted: Option<bool>,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NamespaceList {
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SurveySummary {
    pub survey_id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<JsonValue>,
    #[serde(default)]
    pub response_count: Option<u64>,
    #[serde(default)]
    pub is_deleted: Option<bool>,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SurveyList {
    #[serde(default)]
    pub surveys: Vec<SurveySummary>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResponseRecord {
    pub response_id: String,
    #[serde(default)]
    pub response_data: JsonValue,
    #[serde(default)]
    pub submitted_at: Option<String>,
    #[serde(default)]
    pub respondent_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResponsesPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
}

#[derive(Debug, Serialize, Clone)]
pub struct SubmitRequest {
    pub survey_data: JsonValue,
    pub submitted_at: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SubmitAck {
    pub response_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// The customer/namespace/survey triple a session operates on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SurveyTarget {
    pub customer_hex: String,
    pub customer_name: String,
    pub namespace: String,
    pub survey_id: String,
    pub survey_name: String,
}

impl SurveyTarget {
    pub fn breadcrumb(&self) -> String {
        format!(
            "{} › {} › {}",
            self.customer_name, self.namespace, self.survey_name
        )
    }
}
