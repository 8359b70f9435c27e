use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::*;

use crate::ui::{AppState, ToastLevel, View};
use crate::widgets::form_widget::FormWidget;

fn toast_spans(state: &AppState) -> Vec<Span<'static>> {
    let Some(t) = &state.toast else {
        return Vec::new();
    };
    let color = crate::theme::toast_color(t.level);
    let tag = match t.level {
        ToastLevel::Success => "[OK]",
        ToastLevel::Error => "[ERROR]",
        ToastLevel::Info => "[INFO]",
    };
    vec![
        Span::styled(
            format!("{tag} "),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(t.text.clone(), Style::default().fg(color)),
    ]
}

fn pending_lookups(state: &AppState) -> usize {
    state
        .pane
        .as_ref()
        .and_then(|w| w.as_any().downcast_ref::<FormWidget>())
        .map(|fw| fw.controller().pending_count())
        .unwrap_or(0)
}

pub fn help_text(state: &AppState) -> &'static str {
    match state.view {
        View::Picker => "↑/↓ select  Enter open  ← collapse  v responses  r refresh  d deleted  q quit",
        View::Survey => "↑/↓ move  Enter edit  Space toggle  +/- panels  r reload  esc close",
        View::Responses => "↑/↓ select  n/p page  e export  c copy  esc back",
    }
}

pub fn draw_footer(f: &mut Frame, area: Rect, state: &AppState) {
    let mut spans: Vec<Span> = Vec::new();
    if let Some(msg) = &state.status_text {
        let spinner = ["⠋", "⠙", "⠸", "⠴", "⠦", "⠇"][state.tick as usize % 6];
        spans.push(Span::raw(format!(" {spinner} {msg}")));
        spans.push(Span::raw("  |  "));
    }
    let pending = pending_lookups(state);
    if pending > 0 {
        spans.push(Span::styled(
            format!("{pending} lookup(s) queued  |  "),
            Style::default().fg(Color::Magenta),
        ));
    }
    let toast = toast_spans(state);
    if !toast.is_empty() {
        spans.extend(toast);
        spans.push(Span::raw("  |  "));
    }
    spans.push(Span::styled(help_text(state), crate::theme::text_muted()));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::Toast;
    use ratatui::backend::TestBackend;

    #[test]
    fn footer_shows_toast_tag_and_help() {
        let mut state = AppState::default();
        state.toast = Some(Toast {
            text: "Exported 3 rows".into(),
            level: ToastLevel::Success,
            expires_at_tick: 10,
        });
        let mut terminal = Terminal::new(TestBackend::new(120, 1)).unwrap();
        terminal.draw(|f| draw_footer(f, f.area(), &state)).unwrap();
        let buf = terminal.backend().buffer().clone();
        let line: String = (0..120u16).map(|x| buf[(x, 0u16)].symbol().to_string()).collect();
        assert!(line.starts_with("[OK] Exported 3 rows"), "{line}");
        assert!(line.contains("Enter open"));
    }
}
