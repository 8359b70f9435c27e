//! Validation capabilities handed to each choice field when the form is built.
use crate::engine::choices::{same_value, Choice};
use crate::engine::survey_model::is_empty_value;
use crate::model::QuestionKind;
use serde_json::Value as JsonValue;

pub const REQUIRED: &str = "This field is required";
pub const NOT_A_CHOICE: &str = "Value is not one of the available choices";
pub const NOT_A_NUMBER: &str = "Must be a number";

pub struct ValidationContext<'a> {
    pub value: Option<&'a JsonValue>,
    pub required: bool,
    /// Choices currently resident for the field, when it has any.
    pub choices: Option<&'a [Choice]>,
    /// Value committed through explicit selection, for widgets that track one.
    pub committed: Option<&'a JsonValue>,
}

pub trait ChoiceValidator {
    fn is_value_empty(&self, value: Option<&JsonValue>) -> bool {
        value.map_or(true, is_empty_value)
    }

    /// Error message for the field, if any.
    fn validate(&self, ctx: &ValidationContext<'_>) -> Option<String>;
}

/// Required check plus membership in the resident choice list.
pub struct EngineDefault;

impl ChoiceValidator for EngineDefault {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Option<String> {
        if self.is_value_empty(ctx.value) {
            return ctx.required.then(|| REQUIRED.to_string());
        }
        let (Some(value), Some(choices)) = (ctx.value, ctx.choices) else {
            return None;
        };
        if choices.is_empty() {
            return None;
        }
        let member = |v: &JsonValue| choices.iter().any(|c| c.matches(v));
        let ok = match value {
            JsonValue::Array(items) => items.iter().all(member),
            v => member(v),
        };
        (!ok).then(|| NOT_A_CHOICE.to_string())
    }
}

/// Paginated remote choices are never fully resident, so a typeahead value is
/// valid when it is the one the widget committed, whatever page is loaded.
pub struct TypeaheadSelection;

impl ChoiceValidator for TypeaheadSelection {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Option<String> {
        if self.is_value_empty(ctx.value) {
            return ctx.required.then(|| REQUIRED.to_string());
        }
        let value = ctx.value?;
        if ctx.committed.is_some_and(|c| same_value(c, value)) {
            return None;
        }
        if ctx.choices.is_some_and(|cs| cs.iter().any(|c| c.matches(value))) {
            return None;
        }
        Some(NOT_A_CHOICE.to_string())
    }
}

/// Free-text answers; numeric inputs must parse.
pub struct TextAnswer {
    pub numeric: bool,
}

impl ChoiceValidator for TextAnswer {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Option<String> {
        if self.is_value_empty(ctx.value) {
            return ctx.required.then(|| REQUIRED.to_string());
        }
        match ctx.value {
            Some(JsonValue::String(s)) if self.numeric && s.trim().parse::<f64>().is_err() => {
                Some(NOT_A_NUMBER.to_string())
            }
            _ => None,
        }
    }
}

pub fn validator_for(kind: QuestionKind) -> Box<dyn ChoiceValidator> {
    match kind {
        QuestionKind::Typeahead => Box::new(TypeaheadSelection),
        QuestionKind::Text { numeric } => Box::new(TextAnswer { numeric }),
        QuestionKind::Comment => Box::new(TextAnswer { numeric: false }),
        _ => Box::new(EngineDefault),
    }
}
