use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::*;

use crate::app::{update, AppMsg, Effect};
use crate::nav::flatten::flatten_nodes;
use crate::ui::{AppState, FlatNode};
use crate::widgets::chrome::panel_block;
use serde_json::Value as JsonValue;

const SPINNER: [&str; 6] = ["⠋", "⠙", "⠸", "⠴", "⠦", "⠇"];

fn deleted_marker(is_deleted: Option<bool>) -> &'static str {
    if is_deleted == Some(true) {
        " (deleted)"
    } else {
        ""
    }
}

fn node_text(state: &AppState, node: &FlatNode) -> (String, Style) {
    let chevron = |key: &str| {
        if state.expanded.contains(key) {
            "▾"
        } else {
            "▸"
        }
    };
    let loading = |key: &str| {
        if state.loading.contains(key) {
            format!(" ({} loading)", SPINNER[state.tick as usize % 6])
        } else {
            String::new()
        }
    };
    match node {
        FlatNode::Customer { key, customer } => {
            let inactive = if customer.is_active == Some(false) {
                " (inactive)"
            } else {
                ""
            };
            let style = if customer.is_deleted == Some(true) {
                crate::theme::text_muted()
            } else {
                Style::default()
            };
            (
                format!(
                    "{} {}{}{inactive}{}",
                    chevron(key),
                    customer.name,
                    deleted_marker(customer.is_deleted),
                    loading(key)
                ),
                style,
            )
        }
        FlatNode::Namespace { key, namespace, .. } => {
            let style = if namespace.is_deleted == Some(true) {
                crate::theme::text_muted()
            } else {
                Style::default()
            };
            let about = namespace
                .description
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| format!(" — {d}"))
                .unwrap_or_default();
            (
                format!(
                    "  {} {}{about}{}{}",
                    chevron(key),
                    namespace.name,
                    deleted_marker(namespace.is_deleted),
                    loading(key)
                ),
                style,
            )
        }
        FlatNode::Survey { key, summary, .. } => {
            let count = summary
                .response_count
                .map(|n| format!(" — {n} responses"))
                .unwrap_or_default();
            let version = match &summary.version {
                Some(JsonValue::Null) | None => String::new(),
                Some(JsonValue::String(v)) => format!(" v{v}"),
                Some(v) => format!(" v{v}"),
            };
            let style = if summary.is_deleted == Some(true) {
                crate::theme::text_muted()
            } else {
                Style::default().fg(crate::theme::ACCENT)
            };
            (
                format!(
                    "      {}{version}{}{count}{}",
                    summary.name,
                    deleted_marker(summary.is_deleted),
                    loading(key)
                ),
                style,
            )
        }
        FlatNode::Empty { depth, text } => {
            (format!("{}{text}", "  ".repeat(depth * 2)), crate::theme::text_muted())
        }
    }
}

pub fn draw_picker(f: &mut Frame, area: Rect, state: &AppState) {
    let nodes = flatten_nodes(state);
    let inner_h = area.height.saturating_sub(2);
    let total = nodes.len();
    let ih = inner_h as usize;
    let start = state.menu_offset.min(total.saturating_sub(ih));
    let end = (start + ih).min(total);
    let mut items: Vec<ListItem> = nodes
        .iter()
        .enumerate()
        .skip(start)
        .take(end - start)
        .map(|(idx, node)| {
            let (text, style) = node_text(state, node);
            if idx == state.selected {
                ListItem::new(format!("> {text}")).style(crate::theme::list_cursor_style())
            } else {
                ListItem::new(format!("  {text}")).style(style)
            }
        })
        .collect();
    if items.is_empty() {
        let text = if state.loading.contains(crate::ui::CUSTOMERS_KEY) {
            format!("{} loading customers…", SPINNER[state.tick as usize % 6])
        } else if let Some(e) = &state.last_error {
            e.clone()
        } else {
            "No customers. Press r to reload.".to_string()
        };
        items.push(ListItem::new(text).style(crate::theme::text_muted()));
    }
    let title = if state.include_deleted {
        "Customers (showing deleted)"
    } else {
        "Customers"
    };
    let list = List::new(items).block(panel_block(title, true));
    f.render_widget(list, area);
}

fn keep_visible(state: &mut AppState) {
    let ih = state.menu_viewport_h as usize;
    if state.selected < state.menu_offset {
        state.menu_offset = state.selected;
    } else if ih > 0 && state.selected >= state.menu_offset + ih {
        state.menu_offset = state.selected + 1 - ih;
    }
}

/// Keys while the picker tree has focus.
pub(crate) fn on_picker_key(state: &mut AppState, key: KeyCode) -> Vec<Effect> {
    let nodes = flatten_nodes(state);
    let total = nodes.len();
    let page = (state.menu_viewport_h as usize).max(1);
    match key {
        KeyCode::Up => state.selected = state.selected.saturating_sub(1),
        KeyCode::Down => {
            if state.selected + 1 < total {
                state.selected += 1;
            }
        }
        KeyCode::PageUp => state.selected = state.selected.saturating_sub(page),
        KeyCode::PageDown => state.selected = (state.selected + page).min(total.saturating_sub(1)),
        KeyCode::Home => state.selected = 0,
        KeyCode::End => state.selected = total.saturating_sub(1),
        KeyCode::Enter | KeyCode::Right => {
            if let Some(node) = nodes.get(state.selected).cloned() {
                return update(state, AppMsg::Enter(node));
            }
        }
        KeyCode::Left => {
            if let Some(node) = nodes.get(state.selected).cloned() {
                return update(state, AppMsg::Collapse(node));
            }
        }
        KeyCode::Char('r') => {
            return match nodes.get(state.selected).cloned() {
                Some(node @ (FlatNode::Customer { .. } | FlatNode::Namespace { .. })) => {
                    update(state, AppMsg::Refresh(node))
                }
                _ => update(state, AppMsg::ReloadCustomers),
            };
        }
        KeyCode::Char('R') => return update(state, AppMsg::ReloadCustomers),
        KeyCode::Char('d') => return update(state, AppMsg::ToggleDeleted),
        KeyCode::Char('v') => {
            if let Some(FlatNode::Survey { target, .. }) = nodes.get(state.selected) {
                let target = target.clone();
                return update(state, AppMsg::OpenResponses(target));
            }
        }
        _ => {}
    }
    keep_visible(state);
    Vec::new()
}
