use crate::app::Effect;
use crate::engine::choices::Choice;
use crate::engine::controller::{
    ApplyOutcome, ChoiceController, ControllerSettings, LoadTrigger, RequestOutcome,
};
use crate::engine::survey_model::{ElementHandle, SurveyModel};
use crate::error::FieldError;
use crate::model::{QuestionKind, SurveyDefinition, SurveyTarget};
use crate::widgets::form::{
    apply_field_errors, build_rows, draw_form, validate_form, ConfirmAction, FormState, FormView,
    RowKind, OPTIONS_VISIBLE,
};
use crate::widgets::typeahead::{TypeaheadEvent, TypeaheadState};
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

/// One survey session: the answers, the lookups feeding its choice fields and
/// the editors bound to them. Dropped as a whole when the survey is closed.
pub struct FormWidget {
    pub session: u64,
    pub target: SurveyTarget,
    pub form: FormState,
    model: SurveyModel,
    controller: ChoiceController,
    typeaheads: HashMap<ElementHandle, TypeaheadState>,
}

fn parse_answer(text: &str, numeric: bool) -> Option<JsonValue> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if numeric {
        if let Ok(n) = t.parse::<i64>() {
            return Some(JsonValue::from(n));
        }
        if let Some(n) = t.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Some(JsonValue::Number(n));
        }
    }
    Some(JsonValue::String(text.to_string()))
}

impl FormWidget {
    pub fn new(
        session: u64,
        target: SurveyTarget,
        definition: SurveyDefinition,
        settings: ControllerSettings,
        now: Instant,
    ) -> Self {
        let title = definition
            .title
            .clone()
            .unwrap_or_else(|| target.survey_name.clone());
        let mut w = Self {
            session,
            target,
            form: FormState {
                title,
                ..Default::default()
            },
            model: SurveyModel::new(definition),
            controller: ChoiceController::new(settings),
            typeaheads: HashMap::new(),
        };
        w.rebuild(now);
        w
    }

    pub fn model(&self) -> &SurveyModel {
        &self.model
    }

    pub fn controller(&self) -> &ChoiceController {
        &self.controller
    }

    pub fn typeahead(&self, handle: &ElementHandle) -> Option<&TypeaheadState> {
        self.typeaheads.get(handle)
    }

    fn choices_for(&self, handle: &ElementHandle) -> Vec<Choice> {
        FormView {
            model: &self.model,
            controller: &self.controller,
            typeaheads: &self.typeaheads,
        }
        .choices(handle)
    }

    fn panel_names(&self) -> Vec<String> {
        self.model
            .dynamic_panels()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    fn request(
        &mut self,
        handle: &ElementHandle,
        trigger: LoadTrigger,
        search: Option<&str>,
        now: Instant,
    ) -> RequestOutcome {
        let scope = self.model.scope(handle);
        self.controller.request(handle, trigger, search, &scope, now)
    }

    fn search_text(&self, handle: &ElementHandle) -> Option<String> {
        self.typeaheads
            .get(handle)
            .map(|ta| ta.input.clone())
            .filter(|s| !s.is_empty() && self.form.editing)
    }

    /// Rows and lookup registrations for the current panel layout. Newly seen remote
    /// fields get an initial load.
    fn rebuild(&mut self, now: Instant) {
        self.form.rows = build_rows(&self.model);
        let live: HashSet<ElementHandle> = self
            .form
            .rows
            .iter()
            .filter_map(|r| r.handle().cloned())
            .collect();
        self.typeaheads.retain(|h, _| live.contains(h));
        let mut fresh = Vec::new();
        for row in &self.form.rows {
            let RowKind::Question { handle, kind, .. } = &row.kind else {
                continue;
            };
            let typeahead = *kind == QuestionKind::Typeahead;
            if typeahead && !self.typeaheads.contains_key(handle) {
                let mut ta = TypeaheadState::new();
                ta.sync_external(self.model.value(handle), &[]);
                self.typeaheads.insert(handle.clone(), ta);
            }
            let source = self
                .model
                .element(handle)
                .and_then(|el| el.choices_by_url.clone());
            if let Some(source) = source {
                if !self.controller.is_registered(handle) {
                    self.controller.register(handle.clone(), source, typeahead);
                    fresh.push(handle.clone());
                }
            }
        }
        for h in fresh {
            self.request(&h, LoadTrigger::Initial, None, now);
        }
        self.form.selected = self.form.selected.min(self.form.cancel_idx());
    }

    fn sync_typeaheads(&mut self) {
        for (h, ta) in self.typeaheads.iter_mut() {
            ta.sync_external(self.model.value(h), self.controller.choices(h));
        }
    }

    /// Propagate value changes. Fields whose lookup URL references a changed field
    /// lose their answer and reload; panel add/remove rebuilds the rows.
    fn after_change(&mut self, now: Instant) {
        let panels = self.panel_names();
        let mut structural = false;
        let mut reload: Vec<ElementHandle> = Vec::new();
        // dependency chains are short; the bound only guards against cycles
        for _ in 0..16 {
            let changes = self.model.take_changes();
            if changes.is_empty() {
                break;
            }
            for ch in changes {
                self.form.errors.remove(&ch.handle);
                if ch.handle.panel.is_none() && panels.contains(&ch.handle.name) {
                    structural = true;
                    continue;
                }
                for dep in self.controller.dependents_of(&ch.handle) {
                    debug!(changed = %ch.handle, dependent = %dep, "clearing dependent field");
                    self.model.set_value(&dep, None);
                    if !reload.contains(&dep) {
                        reload.push(dep);
                    }
                }
            }
        }
        if structural {
            self.rebuild(now);
        }
        for dep in reload {
            let search = self.search_text(&dep);
            self.request(&dep, LoadTrigger::ParentChanged, search.as_deref(), now);
        }
        self.sync_typeaheads();
    }

    /// Lookups whose debounce has expired, as fetch effects.
    pub fn poll(&mut self, now: Instant) -> Vec<Effect> {
        let session = self.session;
        self.controller
            .due(now)
            .into_iter()
            .map(|lookup| Effect::FetchChoices { session, lookup })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.controller.next_deadline()
    }

    pub fn apply_choices(
        &mut self,
        key: &str,
        request_id: u64,
        outcome: Result<JsonValue, String>,
    ) -> ApplyOutcome {
        let Ok(handle) = key.parse::<ElementHandle>() else {
            return ApplyOutcome::Stale;
        };
        let res = self.controller.apply(&handle, request_id, outcome);
        if matches!(res, ApplyOutcome::Applied(_)) {
            let choices = self.controller.choices(&handle);
            if let Some(ta) = self.typeaheads.get_mut(&handle) {
                ta.set_results(choices);
            }
            if self.form.selected_handle() == Some(&handle) {
                let n = choices.len();
                self.form.option_cursor = self.form.option_cursor.min(n.saturating_sub(1));
                self.form.option_offset = self.form.option_offset.min(self.form.option_cursor);
            }
        }
        res
    }

    pub fn add_instance(&mut self, panel: &str, now: Instant) -> usize {
        let index = self.model.add_panel_instance(panel);
        self.after_change(now);
        let target = self.form.rows.iter().position(|r| {
            matches!(&r.kind, RowKind::Instance { panel: p, index: i, .. } if p == panel && *i == index)
        });
        if let Some(row) = target {
            self.form.selected = row;
        }
        index
    }

    /// Remove a panel instance. Its lookups and timers go with it; later
    /// instances move up and keep their editor state.
    pub fn remove_instance(&mut self, panel: &str, index: usize, now: Instant) -> bool {
        if !self.model.remove_panel_instance(panel, index) {
            return false;
        }
        self.controller.forget_panel(panel);
        let mut moved = HashMap::new();
        for (h, ta) in self.typeaheads.drain() {
            match &h.panel {
                Some(slot) if slot.panel == panel => {
                    if slot.index == index {
                        continue;
                    }
                    let i = if slot.index > index {
                        slot.index - 1
                    } else {
                        slot.index
                    };
                    moved.insert(ElementHandle::in_panel(panel, i, &h.name), ta);
                }
                _ => {
                    moved.insert(h, ta);
                }
            }
        }
        self.typeaheads = moved;
        self.form.errors.retain(|h, _| !h.belongs_to_panel(panel));
        self.after_change(now);
        true
    }

    /// Clear every answer through the model and reload all lookups.
    pub fn reset(&mut self, now: Instant) {
        self.controller.cancel_all();
        for p in self.panel_names() {
            self.controller.forget_panel(&p);
        }
        self.model.clear();
        self.form.errors.clear();
        self.form.editing = false;
        self.form.confirm = None;
        self.form.message = None;
        for ta in self.typeaheads.values_mut() {
            ta.blur();
        }
        self.after_change(now);
        self.rebuild(now);
        for h in self.controller.handles() {
            self.request(&h, LoadTrigger::Initial, None, now);
        }
        self.sync_typeaheads();
    }

    fn submit(&mut self) -> Vec<Effect> {
        if self.form.disabled {
            return Vec::new();
        }
        let view = FormView {
            model: &self.model,
            controller: &self.controller,
            typeaheads: &self.typeaheads,
        };
        if !validate_form(&mut self.form, &view) {
            let n = self.form.errors.len();
            self.form.message = Some(format!("{n} field(s) need attention"));
            if let Some(first) = self
                .form
                .rows
                .iter()
                .position(|r| r.handle().is_some_and(|h| self.form.errors.contains_key(h)))
            {
                self.form.selected = first;
            }
            return vec![Effect::ShowToast {
                text: "Please fix the highlighted fields".into(),
                level: crate::ui::ToastLevel::Error,
                seconds: 3,
            }];
        }
        self.form.disabled = true;
        self.form.message = Some("Submitting…".into());
        vec![Effect::SubmitResponse {
            session: self.session,
            target: self.target.clone(),
            data: self.model.data(),
        }]
    }

    /// The backend refused or could not take the submission. Nothing is retried;
    /// the form is editable again so the user can resubmit.
    pub fn submission_failed(&mut self, message: &str, field_errors: &[FieldError]) {
        self.form.disabled = false;
        let mapped = apply_field_errors(&mut self.form, field_errors);
        let unmapped: Vec<&str> = field_errors
            .iter()
            .filter(|e| e.field.is_none())
            .map(|e| e.message.as_str())
            .collect();
        let mut text = format!("Submission failed: {message}");
        if !unmapped.is_empty() && unmapped != [message] {
            text.push_str(&format!(" ({})", unmapped.join("; ")));
        }
        if mapped > 0 {
            text.push_str(" Fix the marked fields and submit again.");
        } else {
            text.push_str(" Submit again when ready.");
        }
        self.form.message = Some(text);
    }

    pub fn submission_succeeded(&mut self, response_id: &str, now: Instant) {
        self.reset(now);
        self.form.disabled = false;
        self.form.selected = 0;
        self.form.message = Some(format!("Submitted. Response ID: {response_id}"));
    }

    fn selected_question(&self) -> Option<(ElementHandle, QuestionKind)> {
        match &self.form.selected_row()?.kind {
            RowKind::Question { handle, kind, .. } => Some((handle.clone(), *kind)),
            _ => None,
        }
    }

    fn set_answer(&mut self, handle: &ElementHandle, value: Option<JsonValue>, now: Instant) {
        self.model.set_value(handle, value);
        self.after_change(now);
    }

    fn move_option_cursor(&mut self, delta: isize, len: usize) {
        if len == 0 {
            return;
        }
        let f = &mut self.form;
        f.option_cursor = if delta < 0 {
            f.option_cursor.saturating_sub(1)
        } else {
            (f.option_cursor + 1).min(len - 1)
        };
        if f.option_cursor < f.option_offset {
            f.option_offset = f.option_cursor;
        }
        if f.option_cursor >= f.option_offset + OPTIONS_VISIBLE {
            f.option_offset = f.option_cursor + 1 - OPTIONS_VISIBLE;
        }
    }

    fn begin_edit(&mut self, handle: &ElementHandle, kind: QuestionKind, now: Instant) {
        match kind {
            QuestionKind::Boolean => {
                let next = !matches!(self.model.value(handle), Some(JsonValue::Bool(true)));
                self.set_answer(handle, Some(JsonValue::Bool(next)), now);
            }
            QuestionKind::Text { .. } | QuestionKind::Comment => {
                self.form.edit_buffer = self
                    .model
                    .value(handle)
                    .map(crate::engine::choices::display)
                    .unwrap_or_default();
                self.form.editing = true;
            }
            QuestionKind::Dropdown | QuestionKind::Checkbox => {
                let choices = self.choices_for(handle);
                let current = self.model.value(handle).and_then(|v| match v {
                    JsonValue::Array(items) => items.first(),
                    other => Some(other),
                });
                let pos = current
                    .and_then(|v| choices.iter().position(|c| c.matches(v)))
                    .unwrap_or(0);
                self.form.option_cursor = pos;
                self.form.option_offset = pos.saturating_sub(OPTIONS_VISIBLE - 1);
                self.form.editing = true;
            }
            QuestionKind::Typeahead => {
                if let Some(ta) = self.typeaheads.get_mut(handle) {
                    ta.focus();
                    ta.open_dropdown();
                }
                self.form.editing = true;
            }
            QuestionKind::Panel | QuestionKind::DynamicPanel | QuestionKind::Display => {}
        }
    }

    fn end_edit(&mut self) {
        self.form.editing = false;
        for ta in self.typeaheads.values_mut() {
            ta.blur();
        }
    }

    fn apply_typeahead(
        &mut self,
        handle: &ElementHandle,
        events: Vec<TypeaheadEvent>,
        now: Instant,
    ) -> bool {
        let mut committed = false;
        for ev in events {
            match ev {
                TypeaheadEvent::Commit(v) => {
                    committed |= v.is_some();
                    self.model.set_value(handle, v);
                }
                TypeaheadEvent::Search(text) => {
                    self.request(handle, LoadTrigger::Search, Some(&text), now);
                }
            }
        }
        self.after_change(now);
        committed
    }

    fn edit_key(&mut self, key: KeyCode, now: Instant) -> Vec<Effect> {
        let Some((handle, kind)) = self.selected_question() else {
            self.end_edit();
            return Vec::new();
        };
        match kind {
            QuestionKind::Text { .. } | QuestionKind::Comment => {
                match key {
                    KeyCode::Char(c) => self.form.edit_buffer.push(c),
                    KeyCode::Backspace => {
                        self.form.edit_buffer.pop();
                    }
                    KeyCode::Enter => {
                        let numeric = matches!(kind, QuestionKind::Text { numeric: true });
                        let value = parse_answer(&self.form.edit_buffer, numeric);
                        self.end_edit();
                        self.set_answer(&handle, value, now);
                    }
                    KeyCode::Esc => self.end_edit(),
                    _ => {}
                }
            }
            QuestionKind::Dropdown | QuestionKind::Checkbox => {
                let choices = self.choices_for(&handle);
                match key {
                    KeyCode::Up => self.move_option_cursor(-1, choices.len()),
                    KeyCode::Down => self.move_option_cursor(1, choices.len()),
                    KeyCode::Char(' ') if kind == QuestionKind::Checkbox => {
                        if let Some(c) = choices.get(self.form.option_cursor) {
                            let mut items = match self.model.value(&handle) {
                                Some(JsonValue::Array(items)) => items.clone(),
                                _ => Vec::new(),
                            };
                            if let Some(pos) = items.iter().position(|v| c.matches(v)) {
                                items.remove(pos);
                            } else {
                                items.push(c.value.clone());
                            }
                            self.set_answer(&handle, Some(JsonValue::Array(items)), now);
                        }
                    }
                    KeyCode::Enter if kind == QuestionKind::Dropdown => {
                        if let Some(c) = choices.get(self.form.option_cursor) {
                            let value = c.value.clone();
                            self.end_edit();
                            self.set_answer(&handle, Some(value), now);
                        }
                    }
                    KeyCode::Enter | KeyCode::Esc => self.end_edit(),
                    KeyCode::Char('r') => {
                        self.request(&handle, LoadTrigger::Manual, None, now);
                    }
                    _ => {}
                }
            }
            QuestionKind::Typeahead => {
                let Some(ta) = self.typeaheads.get_mut(&handle) else {
                    self.end_edit();
                    return Vec::new();
                };
                let events = match key {
                    KeyCode::Char(c) => ta.type_char(c),
                    KeyCode::Backspace => ta.backspace(),
                    KeyCode::Delete => ta.clear(),
                    KeyCode::Up => {
                        ta.move_cursor(-1);
                        Vec::new()
                    }
                    KeyCode::Down => {
                        ta.open_dropdown();
                        ta.move_cursor(1);
                        Vec::new()
                    }
                    KeyCode::Enter => ta.activate(),
                    KeyCode::Esc => {
                        self.end_edit();
                        return Vec::new();
                    }
                    _ => Vec::new(),
                };
                if self.apply_typeahead(&handle, events, now) {
                    self.end_edit();
                }
            }
            _ => self.end_edit(),
        }
        Vec::new()
    }

    pub fn handle_key(&mut self, key: KeyCode, now: Instant) -> Vec<Effect> {
        if self.form.disabled {
            return Vec::new();
        }
        if self.form.editing {
            return self.edit_key(key, now);
        }
        let mut effects = Vec::new();
        match key {
            KeyCode::Up => {
                self.form.confirm = None;
                self.form.selected = self.form.selected.saturating_sub(1);
            }
            KeyCode::Down => {
                self.form.confirm = None;
                if self.form.selected < self.form.cancel_idx() {
                    self.form.selected += 1;
                }
            }
            KeyCode::Left if self.form.selected > self.form.submit_idx() => {
                self.form.selected -= 1;
            }
            KeyCode::Right
                if self.form.selected >= self.form.submit_idx()
                    && self.form.selected < self.form.cancel_idx() =>
            {
                self.form.selected += 1;
            }
            KeyCode::Enter => effects.extend(self.activate_selected(now)),
            KeyCode::Char(' ') => {
                if let Some((h, QuestionKind::Boolean)) = self.selected_question() {
                    self.begin_edit(&h, QuestionKind::Boolean, now);
                }
            }
            KeyCode::Char('+') => {
                let panel = self
                    .form
                    .selected_row()
                    .and_then(|r| r.panel_context())
                    .map(|(p, _)| p.to_string());
                if let Some(p) = panel {
                    self.add_instance(&p, now);
                }
            }
            KeyCode::Char('-') => {
                let slot = self
                    .form
                    .selected_row()
                    .and_then(|r| r.panel_context())
                    .and_then(|(p, i)| Some((p.to_string(), i?)));
                if let Some((p, i)) = slot {
                    self.remove_instance(&p, i, now);
                    self.form.message = Some(format!("Removed entry {}", i + 1));
                }
            }
            KeyCode::Char('r') => {
                if let Some((h, _)) = self.selected_question() {
                    let search = self.search_text(&h);
                    match self.request(&h, LoadTrigger::Manual, search.as_deref(), now) {
                        RequestOutcome::Skipped(missing) => {
                            self.form.message =
                                Some(format!("Waiting for: {}", missing.join(", ")));
                        }
                        RequestOutcome::Scheduled(_) => {
                            self.form.message = Some("Reloading choices…".into());
                        }
                        RequestOutcome::NotRegistered => {}
                    }
                }
            }
            KeyCode::Esc => {
                if self.form.confirm.take().is_some() {
                    self.form.message = None;
                } else {
                    self.form.confirm = Some(ConfirmAction::Cancel);
                    self.form.message = Some("Press Esc again to close the survey".into());
                    self.form.selected = self.form.cancel_idx();
                    return effects;
                }
            }
            _ => {}
        }
        effects
    }

    fn activate_selected(&mut self, now: Instant) -> Vec<Effect> {
        let sel = self.form.selected;
        if sel == self.form.submit_idx() {
            return self.submit();
        }
        if sel == self.form.reset_idx() {
            // two-step confirm
            if self.form.confirm == Some(ConfirmAction::Reset) {
                self.reset(now);
                return vec![Effect::ShowToast {
                    text: "Form reset".into(),
                    level: crate::ui::ToastLevel::Info,
                    seconds: 2,
                }];
            }
            self.form.confirm = Some(ConfirmAction::Reset);
            self.form.message = Some("Press Enter to confirm Reset • Esc to cancel".into());
            return Vec::new();
        }
        if sel == self.form.cancel_idx() {
            if self.form.confirm == Some(ConfirmAction::Cancel) {
                self.form.confirm = None;
                return vec![Effect::CloseView];
            }
            self.form.confirm = Some(ConfirmAction::Cancel);
            self.form.message = Some("Press Enter to confirm Cancel • Esc to stay".into());
            return Vec::new();
        }
        let panel = match self.form.selected_row().map(|r| &r.kind) {
            Some(RowKind::PanelHeader { panel, .. }) => Some(panel.clone()),
            Some(RowKind::Instance { .. }) => {
                self.form.message = Some("Press - to remove this entry".into());
                None
            }
            _ => None,
        };
        if let Some(p) = panel {
            self.add_instance(&p, now);
        } else if let Some((h, kind)) = self.selected_question() {
            self.begin_edit(&h, kind, now);
        }
        Vec::new()
    }
}

impl crate::widgets::Widget for FormWidget {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        let view = FormView {
            model: &self.model,
            controller: &self.controller,
            typeaheads: &self.typeaheads,
        };
        draw_form(f, area, &self.form, &view, focused, tick % 2 == 0);
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        self.handle_key(key, Instant::now())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const HEX: &str = "0123456789abcdef0123456789abcdef";

    fn target() -> SurveyTarget {
        SurveyTarget {
            customer_hex: HEX.into(),
            customer_name: "Acme".into(),
            namespace: "travel".into(),
            survey_id: "trip".into(),
            survey_name: "Trip".into(),
        }
    }

    fn cascading() -> SurveyDefinition {
        SurveyDefinition::parse(&json!({"elements": [
            {"type": "dropdown", "name": "country", "isRequired": true,
             "choicesByUrl": {"url": format!("/{HEX}/travel/lookups/countries")}},
            {"type": "dropdown", "name": "city",
             "choicesByUrl": {"url": format!("/{HEX}/travel/lookups/cities?parent_key={{country}}")}},
            {"type": "paneldynamic", "name": "stops", "panelCount": 1, "templateElements": [
                {"type": "dropdown", "name": "stop_country", "renderAs": "typeahead",
                 "choicesByUrl": {"url": format!("/{HEX}/travel/lookups/countries")}},
                {"type": "dropdown", "name": "stop_city",
                 "choicesByUrl": {"url": format!("/{HEX}/travel/lookups/cities?parent_key={{panel.stop_country}}")}}
            ]}
        ]}))
        .unwrap()
    }

    fn settings() -> ControllerSettings {
        ControllerSettings {
            api_url: "http://api".into(),
            token: Some("tok".into()),
            ..ControllerSettings::default()
        }
    }

    fn fetches(effects: &[Effect]) -> Vec<(String, u64, String)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::FetchChoices { lookup, .. } => Some((
                    lookup.handle.to_string(),
                    lookup.request_id,
                    lookup.request.url.clone(),
                )),
                _ => None,
            })
            .collect()
    }

    fn countries() -> JsonValue {
        json!([{"key": "fr", "value": "France"}, {"key": "de", "value": "Germany"}])
    }

    #[test]
    fn initial_loads_skip_unresolved_parents() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        let f = fetches(&w.poll(now));
        let keys: Vec<&str> = f.iter().map(|(k, _, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["country", "stops[0].stop_country"]);
        assert_eq!(f[0].2, format!("http://api/{HEX}/travel/lookups/countries"));
    }

    #[test]
    fn choosing_a_parent_reloads_the_child_after_the_debounce() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        let f = fetches(&w.poll(now));
        assert!(matches!(
            w.apply_choices("country", f[0].1, Ok(countries())),
            ApplyOutcome::Applied(2)
        ));
        // row 0 is country: open, move to Germany, pick
        w.handle_key(KeyCode::Enter, now);
        w.handle_key(KeyCode::Down, now);
        w.handle_key(KeyCode::Enter, now);
        assert_eq!(w.model().top_value("country"), Some(&json!("de")));
        assert!(w.poll(now).is_empty());
        let later = now + Duration::from_millis(300);
        let f = fetches(&w.poll(later));
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].0, "city");
        assert!(f[0].2.ends_with("cities?parent_key=de"));
    }

    #[test]
    fn changing_the_parent_clears_the_child_answer() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        let f = fetches(&w.poll(now));
        w.apply_choices("country", f[0].1, Ok(countries()));
        w.set_answer(&ElementHandle::top("country"), Some(json!("fr")), now);
        w.set_answer(&ElementHandle::top("city"), Some(json!("paris")), now);
        w.set_answer(&ElementHandle::top("country"), Some(json!("de")), now);
        assert_eq!(w.model().top_value("city"), None);
    }

    #[test]
    fn panel_fields_resolve_against_their_own_instance() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        w.poll(now);
        w.add_instance("stops", now);
        let stop = ElementHandle::in_panel("stops", 1, "stop_country");
        w.set_answer(&stop, Some(json!("it")), now);
        let later = now + Duration::from_millis(300);
        let f = fetches(&w.poll(later));
        let city: Vec<_> = f.iter().filter(|(k, _, _)| k == "stops[1].stop_city").collect();
        assert_eq!(city.len(), 1);
        assert!(city[0].2.ends_with("parent_key=it"));
        assert!(!f.iter().any(|(k, _, _)| k == "stops[0].stop_city"));
    }

    #[test]
    fn removing_an_instance_cancels_its_timers_and_shifts_editors() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        w.poll(now);
        w.add_instance("stops", now);
        w.set_answer(
            &ElementHandle::in_panel("stops", 1, "stop_country"),
            Some(json!("it")),
            now,
        );
        assert!(w.remove_instance("stops", 0, now));
        assert_eq!(w.model().panel_len("stops"), 1);
        // what was instance 1 is now instance 0 and its editor shows its value
        let h = ElementHandle::in_panel("stops", 0, "stop_country");
        assert_eq!(w.model().value(&h), Some(&json!("it")));
        assert_eq!(w.typeahead(&h).map(|t| t.input.as_str()), Some("it"));
        assert!(w.typeahead(&ElementHandle::in_panel("stops", 1, "stop_country")).is_none());
        let handles = w.controller().handles();
        assert!(!handles.contains(&ElementHandle::in_panel("stops", 1, "stop_city")));
    }

    #[test]
    fn stale_lookup_results_are_ignored() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        let first = fetches(&w.poll(now));
        // a manual reload supersedes the initial request
        w.request(&ElementHandle::top("country"), LoadTrigger::Manual, None, now);
        let second = fetches(&w.poll(now));
        assert_eq!(
            w.apply_choices("country", first[0].1, Ok(countries())),
            ApplyOutcome::Stale
        );
        assert!(matches!(
            w.apply_choices("country", second[0].1, Ok(json!([{"value": "es", "text": "Spain"}]))),
            ApplyOutcome::Applied(1)
        ));
        assert_eq!(w.controller().choices(&ElementHandle::top("country"))[0].text, "Spain");
    }

    #[test]
    fn switching_the_parent_drops_the_child_lookup_in_flight() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        w.poll(now);
        let country = ElementHandle::top("country");
        let city = ElementHandle::top("city");
        w.set_answer(&country, Some(json!("fr")), now);
        let t1 = now + Duration::from_millis(300);
        let french = fetches(&w.poll(t1));
        assert_eq!(french.len(), 1);
        assert!(french[0].2.ends_with("parent_key=fr"));

        // country changes while the French city lookup is still out
        w.set_answer(&country, Some(json!("de")), t1);
        assert_eq!(
            w.apply_choices("city", french[0].1, Ok(json!([{"key": "par", "value": "Paris"}]))),
            ApplyOutcome::Stale
        );
        assert!(w.controller().choices(&city).is_empty());
        assert!(w.controller().is_loading(&city));

        let german = fetches(&w.poll(t1 + Duration::from_millis(300)));
        assert_eq!(german.len(), 1);
        assert!(german[0].2.ends_with("parent_key=de"));
        assert!(matches!(
            w.apply_choices("city", german[0].1, Ok(json!([{"key": "ber", "value": "Berlin"}]))),
            ApplyOutcome::Applied(1)
        ));
        assert_eq!(w.controller().choices(&city)[0].text, "Berlin");
    }

    #[test]
    fn submit_validates_then_disables_the_form() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        w.form.selected = w.form.submit_idx();
        let effects = w.handle_key(KeyCode::Enter, now);
        assert!(matches!(effects.as_slice(), [Effect::ShowToast { .. }]));
        assert!(w.form.errors.contains_key(&ElementHandle::top("country")));

        w.set_answer(&ElementHandle::top("country"), Some(json!("fr")), now);
        w.form.selected = w.form.submit_idx();
        let effects = w.handle_key(KeyCode::Enter, now);
        match effects.as_slice() {
            [Effect::SubmitResponse { session, data, .. }] => {
                assert_eq!(*session, 1);
                assert_eq!(data["country"], json!("fr"));
            }
            _ => panic!("expected a submission"),
        }
        assert!(w.form.disabled);
        // keys are ignored while the submission is in flight
        assert!(w.handle_key(KeyCode::Enter, now).is_empty());

        w.submission_failed(
            "The server rejected the submission",
            &[FieldError {
                field: Some("country".into()),
                message: "unknown country".into(),
            }],
        );
        assert!(!w.form.disabled);
        assert_eq!(
            w.form.errors.get(&ElementHandle::top("country")).map(String::as_str),
            Some("unknown country")
        );
    }

    #[test]
    fn success_resets_answers_and_keeps_panel_count() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        w.set_answer(&ElementHandle::top("country"), Some(json!("fr")), now);
        w.add_instance("stops", now);
        w.submission_succeeded("r-42", now);
        assert_eq!(w.model().top_value("country"), None);
        assert_eq!(w.model().panel_len("stops"), 1);
        assert!(w.form.message.as_deref().unwrap_or("").contains("r-42"));
    }

    #[test]
    fn typeahead_selection_commits_through_the_model() {
        let now = Instant::now();
        let mut w = FormWidget::new(1, target(), cascading(), settings(), now);
        let f = fetches(&w.poll(now));
        let stop = ElementHandle::in_panel("stops", 0, "stop_country");
        let id = f.iter().find(|(k, _, _)| k == "stops[0].stop_country").unwrap().1;
        w.form.selected = w.form.row_of(&stop).unwrap();
        w.handle_key(KeyCode::Enter, now);
        w.handle_key(KeyCode::Char('g'), now);
        w.handle_key(KeyCode::Char('e'), now);
        // typing alone never writes a value
        assert_eq!(w.model().value(&stop), None);
        let later = now + Duration::from_millis(300);
        let f = fetches(&w.poll(later));
        let search = f.iter().find(|(k, _, _)| k == "stops[0].stop_country").unwrap();
        assert!(search.2.contains("search=ge"));
        assert_eq!(w.apply_choices(&search.0, id, Ok(countries())), ApplyOutcome::Stale);
        w.apply_choices(&search.0, search.1, Ok(json!([{"key": "de", "value": "Germany"}])));
        w.handle_key(KeyCode::Enter, now);
        assert_eq!(w.model().value(&stop), Some(&json!("de")));
        assert!(!w.form.editing);
        assert_eq!(w.typeahead(&stop).map(|t| t.input.as_str()), Some("Germany"));
    }

    #[test]
    fn numeric_text_answers_are_stored_as_numbers() {
        assert_eq!(parse_answer("42", true), Some(json!(42)));
        assert_eq!(parse_answer("4.5", true), Some(json!(4.5)));
        assert_eq!(parse_answer("abc", true), Some(json!("abc")));
        assert_eq!(parse_answer("  ", false), None);
    }
}
