use crate::ui::ToastLevel;
use ratatui::style::{Color, Modifier, Style};

/// Colours for the whole client. There is one palette; the free functions below
/// read it so widgets do not have to carry a theme around.
#[derive(Clone, Debug)]
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub frame: Color,
    pub selected: Color,
    pub success: Color,
    pub error: Color,
    pub muted: Color,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            bg: Color::Rgb(24, 24, 26),
            fg: Color::White,
            accent: ACCENT,
            frame: Color::Rgb(90, 90, 100),
            selected: Color::Rgb(255, 120, 0),
            success: Color::Green,
            error: Color::Red,
            muted: MUTED,
        }
    }

    pub fn border_focused(&self) -> Style {
        Style::default().fg(self.selected)
    }

    pub fn border_unfocused(&self) -> Style {
        Style::default().fg(self.frame)
    }

    pub fn title_style(&self) -> Style {
        Style::default()
            .fg(self.accent)
            .add_modifier(Modifier::BOLD)
    }

    pub fn base_style(&self) -> Style {
        Style::default().bg(self.bg).fg(self.fg)
    }

    pub fn list_cursor_style(&self) -> Style {
        Style::default()
            .fg(self.bg)
            .bg(self.selected)
            .add_modifier(Modifier::BOLD)
    }

    pub fn toast_color(&self, level: ToastLevel) -> Color {
        match level {
            ToastLevel::Success => self.success,
            ToastLevel::Error => self.error,
            ToastLevel::Info => self.accent,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

pub const ACCENT: Color = Color::Rgb(64, 160, 255);
pub const ACTIVE: Color = Color::Cyan;
pub const MUTED: Color = Color::DarkGray;

pub fn border_focused() -> Style {
    Theme::default().border_focused()
}

pub fn border_unfocused() -> Style {
    Theme::default().border_unfocused()
}

pub fn text_active_bold() -> Style {
    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
}

pub fn text_editing_bold() -> Style {
    Style::default()
        .fg(Theme::default().selected)
        .add_modifier(Modifier::BOLD)
}

pub fn text_muted() -> Style {
    Style::default().fg(MUTED)
}

pub fn text_error() -> Style {
    Style::default().fg(Theme::default().error)
}

pub fn toast_color(level: ToastLevel) -> Color {
    Theme::default().toast_color(level)
}

pub fn list_cursor_style() -> Style {
    Theme::default().list_cursor_style()
}
