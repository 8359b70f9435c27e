use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::ui::{AppState, View};
use crate::widgets::form_widget::FormWidget;
use crate::widgets::response_viewer::ResponseViewer;

/// Where the user is: the picker, or the survey a session or viewer belongs to.
pub fn location(state: &AppState) -> String {
    let pane = state.pane.as_ref().map(|w| w.as_any());
    match state.view {
        View::Picker => "Surveys".to_string(),
        View::Survey => pane
            .and_then(|w| w.downcast_ref::<FormWidget>())
            .map(|fw| fw.target.breadcrumb())
            .unwrap_or_default(),
        View::Responses => pane
            .and_then(|w| w.downcast_ref::<ResponseViewer>())
            .map(|v| format!("{} › responses", v.target.breadcrumb()))
            .unwrap_or_default(),
    }
}

pub fn draw_header(f: &mut Frame, area: Rect, state: &AppState) {
    let mut spans = vec![
        Span::styled(" survey-tui ", state.theme.title_style()),
        Span::raw(" "),
        Span::raw(location(state)),
    ];
    let mut backend = state.settings.api_url.clone();
    if state.settings.mock_mode {
        backend.push_str(" (mock)");
    }
    let used = spans.iter().map(|s| s.width()).sum::<usize>();
    let pad = (area.width as usize).saturating_sub(used + backend.chars().count() + 1);
    spans.push(Span::raw(" ".repeat(pad)));
    spans.push(Span::styled(backend, crate::theme::text_muted()));
    let p = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(state.theme.border_unfocused()),
    );
    f.render_widget(p, area);
}
