use ratatui::widgets::{Block, Borders};

/// Bordered block used by every pane; the focused one gets the highlight colour.
pub fn panel_block<'a>(title: &'a str, focused: bool) -> Block<'a> {
    let b = Block::default().borders(Borders::ALL).title(title);
    if focused {
        b.border_style(crate::theme::border_focused())
    } else {
        b.border_style(crate::theme::border_unfocused())
    }
}
