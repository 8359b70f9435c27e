use crate::app::Effect;
use crate::model::{ResponseRecord, ResponsesPage, SurveyDefinition, SurveyTarget};
use crate::report::csv::{collect_columns, export_file_name, export_responses};
use crate::report::format::{field_label, format_timestamp, format_value};
use crate::ui::ToastLevel;
use crate::widgets::chrome::panel_block;
use chrono::Utc;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::{List, ListItem, Paragraph, Wrap};

/// Paged list of recorded responses for one survey, with a detail pane for the
/// focused response.
pub struct ResponseViewer {
    pub target: SurveyTarget,
    definition: Option<SurveyDefinition>,
    responses: Vec<ResponseRecord>,
    total: u64,
    page: u32,
    page_size: u32,
    selected: usize,
    scroll_y: u16,
    last_viewport_h: u16,
    pub loading: bool,
    pub error: Option<String>,
}

impl ResponseViewer {
    pub fn new(target: SurveyTarget, page_size: u32) -> Self {
        Self {
            target,
            definition: None,
            responses: Vec::new(),
            total: 0,
            page: 1,
            page_size: page_size.max(1),
            selected: 0,
            scroll_y: 0,
            last_viewport_h: 0,
            loading: true,
            error: None,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_count(&self) -> u32 {
        let size = u64::from(self.page_size);
        (self.total.div_ceil(size)).max(1) as u32
    }

    pub fn responses(&self) -> &[ResponseRecord] {
        &self.responses
    }

    /// Request for `page`; the definition is only fetched with the first load.
    pub fn load_page(&mut self, page: u32) -> Effect {
        self.loading = true;
        Effect::LoadResponses {
            target: self.target.clone(),
            page,
            size: self.page_size,
            with_definition: self.definition.is_none(),
        }
    }

    pub fn set_page(
        &mut self,
        data: ResponsesPage,
        page: u32,
        definition: Option<SurveyDefinition>,
    ) {
        if definition.is_some() {
            self.definition = definition;
        }
        self.total = data.total;
        self.responses = data.responses;
        self.page = page;
        self.selected = 0;
        self.scroll_y = 0;
        self.loading = false;
        self.error = None;
    }

    pub fn set_error(&mut self, e: String) {
        self.loading = false;
        self.error = Some(e);
    }

    /// `(label, value)` rows for one response, survey fields first.
    pub fn detail_rows(&self, record: &ResponseRecord) -> Vec<(String, String)> {
        let def = self.definition.as_ref();
        let mut rows = vec![
            ("Response ID".to_string(), record.response_id.clone()),
            (
                "Submitted At".to_string(),
                record
                    .submitted_at
                    .as_deref()
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".into()),
            ),
        ];
        if let Some(r) = &record.respondent_id {
            rows.push(("Respondent".into(), r.clone()));
        }
        for field in collect_columns(std::slice::from_ref(record), def) {
            rows.push((
                field_label(&field, def),
                format_value(record.response_data.get(&field), Some(&field), def),
            ));
        }
        rows
    }

    fn copy_text(&self) -> Option<String> {
        let record = self.responses.get(self.selected)?;
        Some(
            self.detail_rows(record)
                .into_iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    fn export(&self) -> Effect {
        if self.responses.is_empty() {
            return Effect::ShowToast {
                text: "No responses to export".into(),
                level: ToastLevel::Info,
                seconds: 2,
            };
        }
        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        Effect::ExportCsv {
            file_name: export_file_name(&self.target.survey_name, &stamp),
            contents: export_responses(&self.responses, self.definition.as_ref()),
            rows: self.responses.len(),
        }
    }

    fn list_items(&self) -> Vec<ListItem<'static>> {
        self.responses
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let when = r
                    .submitted_at
                    .as_deref()
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".into());
                let text = format!("{when}  {}", r.response_id);
                if i == self.selected {
                    ListItem::new(format!("› {text}")).style(crate::theme::list_cursor_style())
                } else {
                    ListItem::new(format!("  {text}"))
                }
            })
            .collect()
    }
}

impl crate::widgets::Widget for ResponseViewer {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);
        let title = format!(
            "Responses — page {}/{} ({} total)",
            self.page,
            self.page_count(),
            self.total
        );
        let mut items = self.list_items();
        if items.is_empty() {
            let text = if self.loading {
                let spinner = ["⠋", "⠙", "⠸", "⠴", "⠦", "⠇"][tick as usize % 6];
                format!("{spinner} loading…")
            } else if let Some(e) = &self.error {
                e.clone()
            } else {
                "No responses yet".to_string()
            };
            let style = if self.error.is_some() {
                crate::theme::text_error()
            } else {
                crate::theme::text_muted()
            };
            items.push(ListItem::new(text).style(style));
        }
        // keep the cursor inside the visible window
        let inner_h = chunks[0].height.saturating_sub(2) as usize;
        let skip = if inner_h > 0 && self.selected >= inner_h {
            self.selected + 1 - inner_h
        } else {
            0
        };
        let items: Vec<ListItem> = items.into_iter().skip(skip).collect();
        f.render_widget(
            List::new(items).block(panel_block(&title, focused)),
            chunks[0],
        );

        let mut lines: Vec<Line> = Vec::new();
        if let Some(record) = self.responses.get(self.selected) {
            for (label, value) in self.detail_rows(record) {
                lines.push(Line::from(vec![
                    Span::styled(format!("{label}: "), crate::theme::text_active_bold()),
                    Span::raw(value),
                ]));
            }
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "n/p page  e export CSV  c copy  esc back",
            crate::theme::text_muted(),
        )));
        self.last_viewport_h = chunks[1].height.saturating_sub(2);
        let p = Paragraph::new(lines)
            .block(panel_block("Details", false))
            .wrap(Wrap { trim: false })
            .scroll((self.scroll_y, 0));
        f.render_widget(p, chunks[1]);
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        match key {
            KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
                self.scroll_y = 0;
            }
            KeyCode::Down => {
                if self.selected + 1 < self.responses.len() {
                    self.selected += 1;
                    self.scroll_y = 0;
                }
            }
            KeyCode::PageDown => {
                self.scroll_y = self.scroll_y.saturating_add(self.last_viewport_h.max(1))
            }
            KeyCode::PageUp => {
                self.scroll_y = self.scroll_y.saturating_sub(self.last_viewport_h.max(1))
            }
            KeyCode::Char('n') if !self.loading && self.page < self.page_count() => {
                return vec![self.load_page(self.page + 1)];
            }
            KeyCode::Char('p') if !self.loading && self.page > 1 => {
                return vec![self.load_page(self.page - 1)];
            }
            KeyCode::Char('r') if !self.loading => return vec![self.load_page(self.page)],
            KeyCode::Char('e') => return vec![self.export()],
            KeyCode::Char('c') => {
                if let Some(text) = self.copy_text() {
                    return vec![Effect::CopyToClipboard { text }];
                }
            }
            KeyCode::Esc | KeyCode::Backspace => return vec![Effect::CloseView],
            _ => {}
        }
        Vec::new()
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
    use crate::widgets::Widget;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn viewer() -> ResponseViewer {
        let target = SurveyTarget {
            survey_name: "Trip Survey".into(),
            ..Default::default()
        };
        let mut v = ResponseViewer::new(target, 2);
        let def = SurveyDefinition::parse(&json!({"elements": [
            {"type": "text", "name": "traveller", "title": "Your name"},
            {"type": "paneldynamic", "name": "visited_countries", "templateElements": [
                {"type": "text", "name": "country"}, {"type": "text", "name": "favorite_city"}
            ]}
        ]}))
        .unwrap();
        v.set_page(
            ResponsesPage {
                total: 3,
                responses: vec![
                    ResponseRecord {
                        response_id: "r-1".into(),
                        submitted_at: Some("2024-03-01T10:15:00Z".into()),
                        response_data: json!({
                            "traveller": "Ada",
                            "visited_countries": [{"country": "France", "favorite_city": "Paris"}]
                        }),
                        ..Default::default()
                    },
                    ResponseRecord {
                        response_id: "r-2".into(),
                        response_data: json!({"traveller": "Bob, Jr."}),
                        ..Default::default()
                    },
                ],
            },
            1,
            Some(def),
        );
        v
    }

    #[test]
    fn details_use_labels_and_formatter() {
        let v = viewer();
        let rows = v.detail_rows(&v.responses()[0]);
        assert_eq!(rows[1], ("Submitted At".into(), "2024-03-01 10:15".into()));
        assert!(rows.contains(&("Your name".into(), "Ada".into())));
        assert!(rows.contains(&(
            "Visited Countries".into(),
            "[1] Country: France, Favorite City: Paris".into()
        )));
    }

    #[test]
    fn paging_requests_follow_the_total() {
        let mut v = viewer();
        assert_eq!(v.page_count(), 2);
        assert!(v.on_key(KeyCode::Char('p')).is_empty());
        match v.on_key(KeyCode::Char('n')).as_slice() {
            [Effect::LoadResponses {
                page,
                size,
                with_definition,
                ..
            }] => {
                assert_eq!((*page, *size, *with_definition), (2, 2, false));
            }
            _ => panic!("expected a page load"),
        }
        // no second request while one is in flight
        assert!(v.on_key(KeyCode::Char('n')).is_empty());
    }

    #[test]
    fn export_quotes_and_names_the_file() {
        let mut v = viewer();
        match v.on_key(KeyCode::Char('e')).as_slice() {
            [Effect::ExportCsv {
                file_name,
                contents,
                rows,
            }] => {
                assert!(file_name.starts_with("trip_survey_responses_"));
                assert_eq!(*rows, 2);
                assert!(contents.contains("\"Bob, Jr.\""));
            }
            _ => panic!("expected an export"),
        }
    }

    #[test]
    fn copy_targets_the_focused_response() {
        let mut v = viewer();
        v.on_key(KeyCode::Down);
        match v.on_key(KeyCode::Char('c')).as_slice() {
            [Effect::CopyToClipboard { text }] => {
                assert!(text.starts_with("Response ID: r-2"));
                assert!(text.contains("Your name: Bob, Jr."));
            }
            _ => panic!("expected a clipboard copy"),
        }
    }
}
