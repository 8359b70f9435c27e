pub mod chrome;
pub mod form;
pub mod form_widget;
pub mod header;
pub mod picker;
pub mod response_viewer;
pub mod status_bar;
pub mod typeahead;

use crate::app::Effect;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use std::any::Any;

/// A screen that owns its own state and turns keys into effects for the shell.
pub trait Widget {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64);
    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        let _ = key;
        Vec::new()
    }
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
