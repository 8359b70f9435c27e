//! Search-as-you-type editor for single-select fields with remote choices.
//!
//! Typed text and the committed value are kept apart: text only becomes a value
//! through [`TypeaheadState::activate`]. The state never writes the form model
//! itself; it returns [`TypeaheadEvent`]s which the form applies through the
//! model's setter, so `selected_value()` and the stored answer cannot drift.
use crate::engine::choices::{display, same_value, value_key, Choice};
use crate::widgets::form::OPTIONS_VISIBLE;
use ratatui::prelude::*;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Typing,
    Selected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeaheadEvent {
    /// Input text changed; ask for matching choices.
    Search(String),
    /// Write this value (or clear the answer) through the model.
    Commit(Option<JsonValue>),
}

#[derive(Debug, Clone, Default)]
pub struct TypeaheadState {
    pub input: String,
    selected: Option<Choice>,
    results: Vec<Choice>,
    cursor: usize,
    offset: usize,
    open: bool,
    focused: bool,
    // every choice seen so far by value key, used to show text for externally set values
    known: HashMap<String, Choice>,
}

impl TypeaheadState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        if self.selected.is_some() {
            Phase::Selected
        } else if self.input.is_empty() {
            Phase::Idle
        } else {
            Phase::Typing
        }
    }

    pub fn selected_value(&self) -> Option<&JsonValue> {
        self.selected.as_ref().map(|c| &c.value)
    }

    pub fn results(&self) -> &[Choice] {
        &self.results
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn remember(&mut self, choices: &[Choice]) {
        for c in choices {
            self.known
                .entry(value_key(&c.value))
                .or_insert_with(|| c.clone());
        }
    }

    fn text_for(&self, value: &JsonValue) -> String {
        self.known
            .get(&value_key(value))
            .map(|c| c.text.clone())
            .unwrap_or_else(|| display(value))
    }

    // A keystroke that moves the text away from the selection drops it.
    fn after_edit(&mut self) -> Vec<TypeaheadEvent> {
        let mut out = Vec::new();
        let diverged = self
            .selected
            .as_ref()
            .is_some_and(|s| s.text != self.input);
        if diverged {
            self.selected = None;
            out.push(TypeaheadEvent::Commit(None));
        }
        self.open = !self.input.is_empty();
        self.cursor = 0;
        self.offset = 0;
        out.push(TypeaheadEvent::Search(self.input.clone()));
        out
    }

    pub fn type_char(&mut self, c: char) -> Vec<TypeaheadEvent> {
        self.input.push(c);
        self.after_edit()
    }

    pub fn backspace(&mut self) -> Vec<TypeaheadEvent> {
        if self.input.pop().is_none() {
            return Vec::new();
        }
        if self.input.is_empty() {
            return self.clear();
        }
        self.after_edit()
    }

    /// Full clear: text, selection and the stored answer.
    pub fn clear(&mut self) -> Vec<TypeaheadEvent> {
        self.input.clear();
        self.selected = None;
        self.open = false;
        self.cursor = 0;
        self.offset = 0;
        vec![TypeaheadEvent::Commit(None)]
    }

    /// New results for the current search. Never selects anything, even an exact match.
    pub fn set_results(&mut self, choices: &[Choice]) {
        self.remember(choices);
        self.results = choices.to_vec();
        if self.cursor >= self.results.len() {
            self.cursor = self.results.len().saturating_sub(1);
        }
        self.offset = self.offset.min(self.cursor);
    }

    pub fn open_dropdown(&mut self) {
        self.open = true;
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.results.is_empty() {
            return;
        }
        let last = self.results.len() - 1;
        self.cursor = if delta < 0 {
            self.cursor.saturating_sub(delta.unsigned_abs())
        } else {
            (self.cursor + delta as usize).min(last)
        };
        if self.cursor < self.offset {
            self.offset = self.cursor;
        }
        if self.cursor >= self.offset + OPTIONS_VISIBLE {
            self.offset = self.cursor + 1 - OPTIONS_VISIBLE;
        }
    }

    /// Commit the highlighted result. The only way typed text becomes a value.
    pub fn activate(&mut self) -> Vec<TypeaheadEvent> {
        if !self.open {
            return Vec::new();
        }
        let Some(choice) = self.results.get(self.cursor).cloned() else {
            return Vec::new();
        };
        self.input = choice.text.clone();
        let value = choice.value.clone();
        self.selected = Some(choice);
        self.open = false;
        vec![TypeaheadEvent::Commit(Some(value))]
    }

    pub fn focus(&mut self) {
        self.focused = true;
    }

    pub fn blur(&mut self) {
        self.focused = false;
        self.open = false;
    }

    /// Reconcile with the value the model holds after a change made elsewhere
    /// (reset, a parent field clearing it, a programmatic set).
    ///
    /// A selection that no longer matches the model is dropped whatever the focus.
    /// Displayed text is only rewritten while the field is not focused.
    pub fn sync_external(&mut self, value: Option<&JsonValue>, choices: &[Choice]) {
        self.remember(choices);
        let matches = match (self.selected_value(), value) {
            (Some(sel), Some(v)) => same_value(sel, v),
            (None, None) => true,
            _ => false,
        };
        if matches {
            return;
        }
        if self.focused {
            self.selected = None;
            return;
        }
        match value {
            None => {
                self.selected = None;
                self.input.clear();
            }
            Some(v) => {
                let text = self.text_for(v);
                self.input = text.clone();
                self.selected = Some(Choice {
                    value: v.clone(),
                    text,
                });
            }
        }
        self.open = false;
        self.cursor = 0;
        self.offset = 0;
    }

    /// Lines for the field row and, while open, its dropdown.
    pub fn lines(
        &self,
        prefix: String,
        row_style: Style,
        editing: bool,
        cursor_on: bool,
        loading: bool,
    ) -> Vec<Line<'static>> {
        let mut shown = self.input.clone();
        if editing && cursor_on {
            shown.push('▏');
        }
        let mut head = vec![Span::raw(prefix), Span::styled(shown, row_style)];
        match self.phase() {
            Phase::Selected => head.push(Span::styled(" ✓", crate::theme::text_muted())),
            Phase::Typing if !editing => {
                head.push(Span::styled(" (not selected)", crate::theme::text_error()))
            }
            _ => {}
        }
        if loading {
            head.push(Span::styled(" …", crate::theme::text_muted()));
        }
        let mut out = vec![Line::from(head)];
        if !(editing && self.open) {
            return out;
        }
        if self.results.is_empty() {
            let note = if loading { "Searching…" } else { "No matches" };
            out.push(Line::from(Span::styled(
                format!("    {note}"),
                crate::theme::text_muted(),
            )));
            return out;
        }
        let start = self.offset.min(self.results.len());
        let end = (start + OPTIONS_VISIBLE).min(self.results.len());
        for (i, c) in self.results.iter().enumerate().take(end).skip(start) {
            let cur = if i == self.cursor { '›' } else { ' ' };
            let st = if i == self.cursor {
                crate::theme::list_cursor_style()
            } else {
                crate::theme::text_muted()
            };
            out.push(Line::from(Span::styled(format!("  {cur} {}", c.text), st)));
        }
        if self.results.len() > end {
            out.push(Line::from(Span::styled(
                format!("    … {} more", self.results.len() - end),
                crate::theme::text_muted(),
            )));
        }
        out
    }
}
