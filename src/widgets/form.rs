use crate::engine::choices::{display, static_choices, Choice};
use crate::engine::controller::ChoiceController;
use crate::engine::survey_model::{ElementHandle, SurveyModel};
use crate::engine::validation::{validator_for, ChoiceValidator, ValidationContext};
use crate::error::FieldError;
use crate::model::{Element, QuestionKind};
use crate::widgets::chrome::panel_block;
use crate::widgets::typeahead::TypeaheadState;
use ratatui::prelude::*;
use ratatui::widgets::*;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

pub const OPTIONS_VISIBLE: usize = 8;

pub enum RowKind {
    Section {
        title: String,
    },
    /// Header of a repeating panel; new instances are added here.
    PanelHeader {
        panel: String,
        title: String,
    },
    Instance {
        panel: String,
        index: usize,
        title: String,
    },
    Question {
        handle: ElementHandle,
        kind: QuestionKind,
        label: String,
        required: bool,
        validator: Box<dyn ChoiceValidator>,
    },
    Note {
        text: String,
    },
}

pub struct FormRow {
    pub kind: RowKind,
    pub depth: usize,
}

impl FormRow {
    pub fn handle(&self) -> Option<&ElementHandle> {
        match &self.kind {
            RowKind::Question { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Repeating panel this row belongs to, with the instance index when it has one.
    pub fn panel_context(&self) -> Option<(&str, Option<usize>)> {
        match &self.kind {
            RowKind::PanelHeader { panel, .. } => Some((panel.as_str(), None)),
            RowKind::Instance { panel, index, .. } => Some((panel.as_str(), Some(*index))),
            RowKind::Question { handle, .. } => handle
                .panel
                .as_ref()
                .map(|slot| (slot.panel.as_str(), Some(slot.index))),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmAction {
    Reset,
    Cancel,
}

#[derive(Default)]
pub struct FormState {
    pub title: String,
    pub rows: Vec<FormRow>,
    pub selected: usize,
    pub editing: bool,
    pub edit_buffer: String,
    pub option_cursor: usize,
    pub option_offset: usize,
    pub message: Option<String>,
    pub disabled: bool,
    pub errors: HashMap<ElementHandle, String>,
    pub confirm: Option<ConfirmAction>,
}

impl FormState {
    pub fn submit_idx(&self) -> usize {
        self.rows.len()
    }

    pub fn reset_idx(&self) -> usize {
        self.rows.len() + 1
    }

    pub fn cancel_idx(&self) -> usize {
        self.rows.len() + 2
    }

    pub fn selected_row(&self) -> Option<&FormRow> {
        self.rows.get(self.selected)
    }

    pub fn selected_handle(&self) -> Option<&ElementHandle> {
        self.selected_row().and_then(|r| r.handle())
    }

    pub fn row_of(&self, handle: &ElementHandle) -> Option<usize> {
        self.rows.iter().position(|r| r.handle() == Some(handle))
    }
}

/// Read-only view of everything a row needs to render or validate.
pub struct FormView<'a> {
    pub model: &'a SurveyModel,
    pub controller: &'a ChoiceController,
    pub typeaheads: &'a HashMap<ElementHandle, TypeaheadState>,
}

impl FormView<'_> {
    pub fn choices(&self, handle: &ElementHandle) -> Vec<Choice> {
        match self.model.element(handle) {
            Some(el) if el.choices_by_url.is_some() => self.controller.choices(handle).to_vec(),
            Some(el) => static_choices(&el.choices),
            None => Vec::new(),
        }
    }
}

fn instance_title(panel: &Element, index: usize) -> String {
    match panel.template_title.as_deref() {
        Some(t) if !t.trim().is_empty() => t.replace("{panelIndex}", &(index + 1).to_string()),
        _ => format!("{} #{}", panel.label(), index + 1),
    }
}

fn push_elements(
    model: &SurveyModel,
    els: &[Element],
    slot: Option<(&str, usize)>,
    depth: usize,
    rows: &mut Vec<FormRow>,
) {
    for el in els {
        let kind = el.question_kind();
        match kind {
            QuestionKind::Panel => {
                rows.push(FormRow {
                    kind: RowKind::Section { title: el.label() },
                    depth,
                });
                push_elements(model, &el.elements, slot, depth + 1, rows);
            }
            QuestionKind::DynamicPanel if slot.is_some() => rows.push(FormRow {
                kind: RowKind::Note {
                    text: format!("{} (nested repeating panels are not supported)", el.label()),
                },
                depth,
            }),
            QuestionKind::DynamicPanel => {
                rows.push(FormRow {
                    kind: RowKind::PanelHeader {
                        panel: el.name.clone(),
                        title: el.label(),
                    },
                    depth,
                });
                for i in 0..model.panel_len(&el.name) {
                    rows.push(FormRow {
                        kind: RowKind::Instance {
                            panel: el.name.clone(),
                            index: i,
                            title: instance_title(el, i),
                        },
                        depth: depth + 1,
                    });
                    push_elements(
                        model,
                        &el.template_elements,
                        Some((&el.name, i)),
                        depth + 2,
                        rows,
                    );
                }
            }
            QuestionKind::Display => rows.push(FormRow {
                kind: RowKind::Note { text: el.label() },
                depth,
            }),
            _ => {
                let handle = match slot {
                    Some((panel, i)) => ElementHandle::in_panel(panel, i, &el.name),
                    None => ElementHandle::top(&el.name),
                };
                rows.push(FormRow {
                    kind: RowKind::Question {
                        handle,
                        kind,
                        label: el.label(),
                        required: el.is_required,
                        validator: validator_for(kind),
                    },
                    depth,
                });
            }
        }
    }
}

/// Rows for the current shape of the model: pages, static panels and one row
/// block per repeating-panel instance.
pub fn build_rows(model: &SurveyModel) -> Vec<FormRow> {
    let mut rows = Vec::new();
    let def = model.definition();
    for page in &def.pages {
        if let Some(t) = page.title.as_ref().filter(|t| !t.trim().is_empty()) {
            rows.push(FormRow {
                kind: RowKind::Section { title: t.clone() },
                depth: 0,
            });
        }
        push_elements(model, &page.elements, None, 0, &mut rows);
    }
    push_elements(model, &def.elements, None, 0, &mut rows);
    rows
}

fn choice_text(choices: &[Choice], v: &JsonValue) -> String {
    choices
        .iter()
        .find(|c| c.matches(v))
        .map(|c| c.text.clone())
        .unwrap_or_else(|| display(v))
}

/// One-line summary of an answer for a non-editing row.
pub fn value_summary(kind: QuestionKind, value: Option<&JsonValue>, choices: &[Choice]) -> String {
    let Some(v) = value else {
        return match kind {
            QuestionKind::Dropdown => "(none)".into(),
            QuestionKind::Checkbox => "0 selected".into(),
            _ => String::new(),
        };
    };
    match (kind, v) {
        (QuestionKind::Boolean, JsonValue::Bool(b)) => if *b { "Yes" } else { "No" }.into(),
        (QuestionKind::Checkbox, JsonValue::Array(items)) => {
            let texts: Vec<String> = items.iter().map(|i| choice_text(choices, i)).collect();
            format!("{} selected: {}", texts.len(), texts.join(", "))
        }
        _ => choice_text(choices, v),
    }
}

fn is_checked(value: Option<&JsonValue>, choice: &Choice) -> bool {
    match value {
        Some(JsonValue::Array(items)) => items.iter().any(|i| choice.matches(i)),
        Some(v) => choice.matches(v),
        None => false,
    }
}

pub fn draw_form(
    f: &mut Frame,
    area: Rect,
    form: &FormState,
    view: &FormView<'_>,
    highlight: bool,
    cursor_on: bool,
) {
    let mut lines: Vec<Line> = Vec::new();
    let mut sel_span = (0usize, 0usize);
    for (i, row) in form.rows.iter().enumerate() {
        let start = lines.len();
        let sel = if i == form.selected { '›' } else { ' ' };
        let indent = "  ".repeat(row.depth);
        match &row.kind {
            RowKind::Section { title } => {
                lines.push(Line::from(Span::styled(
                    format!("  {indent}-- {title} --"),
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                )));
            }
            RowKind::PanelHeader { panel, title } => {
                let mut spans = vec![Span::styled(
                    format!("{sel} {indent}{title} ({})", view.model.panel_len(panel)),
                    Style::default().add_modifier(Modifier::BOLD),
                )];
                if i == form.selected {
                    spans.push(Span::styled("  + add", crate::theme::text_muted()));
                }
                lines.push(Line::from(spans));
            }
            RowKind::Instance { title, .. } => {
                let mut spans = vec![Span::styled(
                    format!("{sel} {indent}{title}"),
                    crate::theme::text_active_bold(),
                )];
                if i == form.selected {
                    spans.push(Span::styled("  - remove", crate::theme::text_muted()));
                }
                lines.push(Line::from(spans));
            }
            RowKind::Note { text } => {
                lines.push(Line::from(Span::styled(
                    format!("  {indent}{text}"),
                    crate::theme::text_muted(),
                )));
            }
            RowKind::Question {
                handle,
                kind,
                label,
                required,
                ..
            } => {
                let editing = form.editing && i == form.selected;
                let req = if *required { " *" } else { "" };
                let prefix = format!("{sel} {indent}{label}{req}: ");
                let value_style = if i == form.selected {
                    if form.editing {
                        crate::theme::text_editing_bold()
                    } else {
                        crate::theme::text_active_bold()
                    }
                } else {
                    Style::default()
                };
                let value = view.model.value(handle);
                let loading = view.controller.is_loading(handle);
                match kind {
                    QuestionKind::Typeahead => {
                        let fallback = TypeaheadState::new();
                        let ta = view.typeaheads.get(handle).unwrap_or(&fallback);
                        lines.extend(ta.lines(prefix, value_style, editing, cursor_on, loading));
                    }
                    QuestionKind::Boolean => {
                        let val = match value {
                            Some(JsonValue::Bool(true)) => "[x]",
                            _ => "[ ]",
                        };
                        lines.push(Line::from(vec![
                            Span::raw(prefix),
                            Span::styled(val.to_string(), value_style),
                        ]));
                    }
                    QuestionKind::Dropdown | QuestionKind::Checkbox => {
                        let choices = view.choices(handle);
                        let mut head = vec![
                            Span::raw(prefix),
                            Span::styled(value_summary(*kind, value, &choices), value_style),
                        ];
                        if loading {
                            head.push(Span::styled(" …", crate::theme::text_muted()));
                        } else if view
                            .controller
                            .slot(handle)
                            .is_some_and(|s| s.last_error.is_some())
                        {
                            // previous options stay usable after a failed refresh
                            head.push(Span::styled(" (lookup failed)", crate::theme::text_muted()));
                        }
                        lines.push(Line::from(head));
                        if editing {
                            if choices.is_empty() {
                                lines.push(Line::from(Span::styled(
                                    "    (no options)",
                                    crate::theme::text_muted(),
                                )));
                            }
                            let start = form.option_offset.min(choices.len());
                            let end = (start + OPTIONS_VISIBLE).min(choices.len());
                            for (oi, c) in choices.iter().enumerate().take(end).skip(start) {
                                let checked = is_checked(value, c);
                                let mark = match (kind, checked) {
                                    (QuestionKind::Checkbox, true) => "[x]",
                                    (QuestionKind::Checkbox, false) => "[ ]",
                                    (_, true) => "(•)",
                                    (_, false) => "( )",
                                };
                                let cur = if oi == form.option_cursor { '›' } else { ' ' };
                                let st = if oi == form.option_cursor {
                                    crate::theme::list_cursor_style()
                                } else {
                                    crate::theme::text_muted()
                                };
                                lines.push(Line::from(vec![Span::styled(
                                    format!("  {cur} {mark} {}", c.text),
                                    st,
                                )]));
                            }
                        }
                    }
                    QuestionKind::Text { .. } | QuestionKind::Comment => {
                        let mut val = if editing {
                            form.edit_buffer.clone()
                        } else {
                            value.map(display).unwrap_or_default()
                        };
                        if editing && cursor_on {
                            val.push('▏');
                        }
                        lines.push(Line::from(vec![
                            Span::raw(prefix),
                            Span::styled(val, value_style),
                        ]));
                    }
                    QuestionKind::Panel | QuestionKind::DynamicPanel | QuestionKind::Display => {}
                }
                if let Some(err) = form.errors.get(handle) {
                    lines.push(Line::from(Span::styled(
                        format!("  {indent}! {err}"),
                        crate::theme::text_error(),
                    )));
                }
            }
        }
        if i == form.selected {
            sel_span = (start, lines.len());
        }
    }
    // Buttons: Submit | Reset | Cancel
    if !form.rows.is_empty() {
        lines.push(Line::from(""));
    }
    let buttons_line = lines.len();
    let can_submit = !form.disabled;
    let mut submit_style = if can_submit {
        crate::theme::text_active_bold()
    } else {
        crate::theme::text_muted()
    };
    let mut reset_style = if form.disabled {
        crate::theme::text_muted()
    } else {
        Style::default().fg(crate::theme::ACTIVE)
    };
    let mut cancel_style = crate::theme::text_muted();
    if form.selected == form.submit_idx() {
        submit_style = if can_submit {
            crate::theme::list_cursor_style()
        } else {
            Style::default()
                .fg(crate::theme::MUTED)
                .bg(crate::theme::ACCENT)
        };
    }
    if form.selected == form.reset_idx() {
        reset_style = crate::theme::list_cursor_style();
    }
    if form.selected == form.cancel_idx() {
        cancel_style = crate::theme::list_cursor_style();
    }
    lines.push(Line::from(vec![
        Span::styled("  [ Submit ]  ", submit_style),
        Span::styled("Reset  ", reset_style),
        Span::styled("Cancel", cancel_style),
    ]));
    if form.selected >= form.submit_idx() {
        sel_span = (buttons_line, buttons_line + 1);
    }
    if let Some(msg) = &form.message {
        lines.push(Line::from(Span::styled(
            msg.clone(),
            crate::theme::text_muted(),
        )));
    }
    let title = if form.editing {
        format!("{} — editing", form.title)
    } else {
        form.title.clone()
    };
    // keep the selected row (and its dropdown) on screen
    let visible = area.height.saturating_sub(2) as usize;
    let scroll = sel_span
        .1
        .saturating_sub(visible)
        .min(sel_span.0);
    let block = panel_block(&title, highlight);
    let p = Paragraph::new(lines)
        .block(block)
        .scroll((scroll as u16, 0));
    f.render_widget(p, area);
}

/// Run every row's validator. Errors land in `form.errors`; returns true when clean.
pub fn validate_form(form: &mut FormState, view: &FormView<'_>) -> bool {
    let mut errors = HashMap::new();
    for row in &form.rows {
        let RowKind::Question {
            handle,
            required,
            validator,
            ..
        } = &row.kind
        else {
            continue;
        };
        let choices = view.choices(handle);
        let ctx = ValidationContext {
            value: view.model.value(handle),
            required: *required,
            choices: (!choices.is_empty()).then_some(choices.as_slice()),
            committed: view
                .typeaheads
                .get(handle)
                .and_then(|ta| ta.selected_value()),
        };
        if let Some(msg) = validator.validate(&ctx) {
            errors.insert(handle.clone(), msg);
        }
    }
    form.errors = errors;
    form.errors.is_empty()
}

/// Attach backend validation messages to the first field with a matching name.
/// Returns how many messages found a field.
pub fn apply_field_errors(form: &mut FormState, errors: &[FieldError]) -> usize {
    let mut mapped = 0;
    for fe in errors {
        let Some(name) = fe.field.as_deref() else {
            continue;
        };
        let hit = form
            .rows
            .iter()
            .filter_map(|r| r.handle())
            .find(|h| h.name == name)
            .cloned();
        if let Some(h) = hit {
            form.errors.insert(h, fe.message.clone());
            mapped += 1;
        }
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::ControllerSettings;
    use crate::engine::validation::REQUIRED;
    use crate::model::SurveyDefinition;
    use pretty_assertions::assert_eq;
    use ratatui::backend::TestBackend;
    use serde_json::json;

    fn travel_model() -> SurveyModel {
        SurveyModel::new(
            SurveyDefinition::parse(&json!({"pages": [{"title": "Trip", "elements": [
                {"type": "text", "name": "traveller", "isRequired": true},
                {"type": "panel", "name": "contact", "title": "Contact", "elements": [
                    {"type": "text", "name": "email"}
                ]},
                {"type": "paneldynamic", "name": "visited_countries", "title": "Visited",
                 "panelCount": 2, "templateTitle": "Country {panelIndex}",
                 "templateElements": [
                    {"type": "dropdown", "name": "country", "choices": ["fr", "de"]}
                 ]}
            ]}]}))
            .unwrap(),
        )
    }

    fn describe(rows: &[FormRow]) -> Vec<String> {
        rows.iter()
            .map(|r| match &r.kind {
                RowKind::Section { title } => format!("section {title}"),
                RowKind::PanelHeader { panel, .. } => format!("panel {panel}"),
                RowKind::Instance { title, .. } => format!("instance {title}"),
                RowKind::Question { handle, .. } => format!("q {handle}"),
                RowKind::Note { text } => format!("note {text}"),
            })
            .collect()
    }

    #[test]
    fn rows_follow_pages_panels_and_instances() {
        let rows = build_rows(&travel_model());
        assert_eq!(
            describe(&rows),
            vec![
                "section Trip",
                "q traveller",
                "section Contact",
                "q email",
                "panel visited_countries",
                "instance Country 1",
                "q visited_countries[0].country",
                "instance Country 2",
                "q visited_countries[1].country",
            ]
        );
        assert_eq!(
            rows[6].panel_context(),
            Some(("visited_countries", Some(0)))
        );
    }

    #[test]
    fn validation_flags_required_and_foreign_values() {
        let mut model = travel_model();
        model.set_value(
            &ElementHandle::in_panel("visited_countries", 1, "country"),
            Some(json!("xx")),
        );
        let controller = ChoiceController::new(ControllerSettings::default());
        let typeaheads = HashMap::new();
        let view = FormView {
            model: &model,
            controller: &controller,
            typeaheads: &typeaheads,
        };
        let mut form = FormState {
            rows: build_rows(&model),
            ..Default::default()
        };
        assert!(!validate_form(&mut form, &view));
        assert_eq!(
            form.errors.get(&ElementHandle::top("traveller")).map(String::as_str),
            Some(REQUIRED)
        );
        assert!(form
            .errors
            .contains_key(&ElementHandle::in_panel("visited_countries", 1, "country")));
        assert_eq!(form.errors.len(), 2);
    }

    #[test]
    fn backend_field_errors_attach_by_name() {
        let model = travel_model();
        let mut form = FormState {
            rows: build_rows(&model),
            ..Default::default()
        };
        let n = apply_field_errors(
            &mut form,
            &[
                FieldError {
                    field: Some("email".into()),
                    message: "invalid email".into(),
                },
                FieldError {
                    field: None,
                    message: "bad".into(),
                },
            ],
        );
        assert_eq!(n, 1);
        assert_eq!(
            form.errors.get(&ElementHandle::top("email")).map(String::as_str),
            Some("invalid email")
        );
    }

    #[test]
    fn summaries_use_choice_text() {
        let choices = vec![Choice::new("fr", "France"), Choice::new("de", "Germany")];
        assert_eq!(
            value_summary(QuestionKind::Dropdown, Some(&json!("de")), &choices),
            "Germany"
        );
        assert_eq!(
            value_summary(QuestionKind::Checkbox, Some(&json!(["fr", "de"])), &choices),
            "2 selected: France, Germany"
        );
        assert_eq!(value_summary(QuestionKind::Dropdown, None, &choices), "(none)");
    }

    #[test]
    fn golden_choice_editor_renders_expected_window() {
        let options = [
            "Alpha", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India",
        ];
        let mut model = SurveyModel::new(
            SurveyDefinition::parse(&json!({"elements": [
                {"type": "dropdown", "name": "color", "title": "Color", "isRequired": true,
                 "choices": options}
            ]}))
            .unwrap(),
        );
        model.set_value(&ElementHandle::top("color"), Some(json!("Bravo")));
        let controller = ChoiceController::new(ControllerSettings::default());
        let typeaheads = HashMap::new();
        let view = FormView {
            model: &model,
            controller: &controller,
            typeaheads: &typeaheads,
        };
        let form = FormState {
            title: "Pick Test".into(),
            rows: build_rows(&model),
            editing: true,
            option_cursor: 1,
            ..Default::default()
        };
        let backend = TestBackend::new(40, 12);
        let mut terminal = Terminal::new(backend).unwrap();
        let _ = terminal.draw(|f| {
            let area = ratatui::layout::Rect {
                x: 0,
                y: 0,
                width: 40,
                height: 12,
            };
            draw_form(f, area, &form, &view, true, false);
        });
        // Extract inner content (strip 1-char border)
        let buf = terminal.backend().buffer().clone();
        let mut inner_lines: Vec<String> = Vec::new();
        for y in 1..(buf.area.height - 1) {
            let mut line = String::new();
            for x in 1..(buf.area.width - 1) {
                let cell = &buf[(x, y)];
                let ch = cell.symbol().chars().next().unwrap_or(' ');
                line.push(ch);
            }
            while line.ends_with(' ') {
                line.pop();
            }
            inner_lines.push(line);
        }
        let current_top = inner_lines
            .iter()
            .take(9)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let golden = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/golden/choice_editor.txt"
        ));
        assert_eq!(current_top.trim_end(), golden.trim_end());
    }
}
