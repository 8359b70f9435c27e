use crate::app::{poll_lookups, update, AppMsg, Effect};
use crate::config::{env_bool, Settings};
use crate::error::FieldError;
use crate::model::{Customer, Namespace, ResponsesPage, SubmitAck, SurveySummary, SurveyTarget};
use crate::nav::keys::{responses_key, survey_key};
use crate::services::api::ApiClient;
use crate::services::loader;
use crate::widgets::form_widget::FormWidget;
use crate::widgets::header::draw_header;
use crate::widgets::picker::{draw_picker, on_picker_key};
use crate::widgets::status_bar::draw_footer;
use crate::widgets::Widget;
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub(crate) const CUSTOMERS_KEY: &str = "customers";
const TICK_RATE: Duration = Duration::from_millis(200);

fn run_effects(state: &mut AppState, effects: Vec<Effect>) {
    for eff in effects {
        let (Some(api), Some(tx)) = (state.api.clone(), state.tx.clone()) else {
            // no backend wired (tests); only local effects apply
            run_local_effect(state, eff);
            continue;
        };
        match eff {
            Effect::LoadCustomers { include_deleted } => {
                state.dbg(format!("load customers (deleted={include_deleted})"));
                loader::spawn_load_customers(api, include_deleted, CUSTOMERS_KEY.into(), tx);
            }
            Effect::LoadNamespaces {
                hex,
                include_deleted,
                key,
            } => {
                state.dbg(format!("load namespaces {key}"));
                loader::spawn_load_namespaces(api, hex, include_deleted, key, tx);
            }
            Effect::LoadSurveys {
                hex,
                namespace,
                include_deleted,
                key,
            } => {
                state.dbg(format!("load surveys {key}"));
                loader::spawn_load_surveys(api, hex, namespace, include_deleted, key, tx);
            }
            Effect::LoadSurvey { target, key } => {
                state.dbg(format!("load survey {key}"));
                loader::spawn_load_survey(api, target, key, tx);
            }
            Effect::FetchChoices { session, lookup } => {
                let key = lookup.handle.to_string();
                state.dbg(format!(
                    "lookup {key} #{} -> {}",
                    lookup.request_id, lookup.request.url
                ));
                loader::spawn_fetch_choices(
                    api,
                    lookup.request,
                    key,
                    session,
                    lookup.request_id,
                    tx,
                );
            }
            Effect::SubmitResponse {
                session,
                target,
                data,
            } => {
                let key = survey_key(&target);
                state.dbg(format!("submit {key} (session {session})"));
                state.status_text = Some("Submitting…".into());
                loader::spawn_submit(api, target, data, key, session, tx);
            }
            Effect::LoadResponses {
                target,
                page,
                size,
                with_definition,
            } => {
                let key = responses_key(&target);
                state.dbg(format!("load responses {key} page={page} size={size}"));
                loader::spawn_load_responses(api, target, page, size, with_definition, key, tx);
            }
            other => run_local_effect(state, other),
        }
    }
}

fn run_local_effect(state: &mut AppState, eff: Effect) {
    match eff {
        Effect::ExportCsv {
            file_name,
            contents,
            rows,
        } => {
            let path = state.settings.export_dir().join(&file_name);
            match std::fs::write(&path, contents) {
                Ok(()) => {
                    info!(path = %path.display(), rows, "responses exported");
                    state.dbg(format!("exported {rows} rows to {}", path.display()));
                    show_toast(
                        state,
                        format!("Exported {rows} responses to {}", path.display()),
                        ToastLevel::Success,
                        4,
                    );
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "export failed");
                    show_toast(state, format!("Export failed: {e}"), ToastLevel::Error, 5);
                }
            }
        }
        Effect::CopyToClipboard { text } => {
            let copied = arboard::Clipboard::new().and_then(|mut c| c.set_text(text));
            match copied {
                Ok(()) => show_toast(state, "Copied to clipboard".into(), ToastLevel::Info, 2),
                Err(e) => {
                    state.dbg(format!("clipboard: {e}"));
                    show_toast(state, "Clipboard unavailable".into(), ToastLevel::Error, 3);
                }
            }
        }
        Effect::ShowToast {
            text,
            level,
            seconds,
        } => show_toast(state, text, level, seconds),
        Effect::CloseView => {
            let effects = update(state, AppMsg::CloseView);
            run_effects(state, effects);
        }
        Effect::LoadCustomers { .. }
        | Effect::LoadNamespaces { .. }
        | Effect::LoadSurveys { .. }
        | Effect::LoadSurvey { .. }
        | Effect::FetchChoices { .. }
        | Effect::SubmitResponse { .. }
        | Effect::LoadResponses { .. } => state.dbg("no backend; request dropped"),
    }
}

fn show_toast(state: &mut AppState, text: String, level: ToastLevel, seconds: u64) {
    let ticks = seconds.saturating_mul(5); // ~200ms tick
    state.toast = Some(Toast {
        text,
        level,
        expires_at_tick: state.tick.saturating_add(ticks),
    });
}

#[derive(Default)]
pub(crate) struct AppState {
    pub(crate) settings: Settings,
    pub(crate) api: Option<ApiClient>,
    pub(crate) config_path: Option<PathBuf>,
    pub(crate) log_path: Option<PathBuf>,
    pub(crate) view: View,
    // Picker tree
    pub(crate) selected: usize,
    pub(crate) menu_offset: usize,
    pub(crate) menu_viewport_h: u16,
    pub(crate) customers: Vec<Customer>,
    pub(crate) namespaces: HashMap<String, Vec<Namespace>>,
    pub(crate) surveys: HashMap<String, Vec<SurveySummary>>,
    pub(crate) expanded: HashSet<String>,
    pub(crate) loading: HashSet<String>,
    pub(crate) include_deleted: bool,
    // Survey being fetched; a load for anything else is ignored
    pub(crate) opening: Option<SurveyTarget>,
    pub(crate) next_session: u64,
    // Form or response viewer, when one is open
    pub(crate) pane: Option<Box<dyn Widget>>,
    pub(crate) last_error: Option<String>,
    pub(crate) status_text: Option<String>,
    pub(crate) boot_done: bool,
    pub(crate) tick: u64,
    pub(crate) toast: Option<Toast>,
    pub(crate) debug_log: VecDeque<String>,
    pub(crate) theme: crate::theme::Theme,
    tx: Option<Sender<LoadMsg>>,
    rx: Option<Receiver<LoadMsg>>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum View {
    #[default]
    Picker,
    Survey,
    Responses,
}

impl AppState {
    pub fn dbg(&mut self, msg: impl Into<String>) {
        const MAX_LOG_LINES: usize = 200;
        let msg = msg.into();
        debug!(target: "survey_tui::ui", "{msg}");
        if self.debug_log.len() >= MAX_LOG_LINES {
            self.debug_log.pop_front();
        }
        self.debug_log.push_back(msg);
    }

    fn form(&self) -> Option<&FormWidget> {
        self.pane.as_ref()?.as_any().downcast_ref::<FormWidget>()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

pub struct Toast {
    pub text: String,
    pub level: ToastLevel,
    pub expires_at_tick: u64,
}

/// One visible row of the customer › namespace › survey tree.
#[derive(Clone, Debug)]
pub(crate) enum FlatNode {
    Customer {
        key: String,
        customer: Customer,
    },
    Namespace {
        key: String,
        hex: String,
        customer_name: String,
        namespace: Namespace,
    },
    Survey {
        key: String,
        target: SurveyTarget,
        summary: SurveySummary,
    },
    Empty {
        depth: usize,
        text: String,
    },
}

pub(crate) enum LoadOutcome {
    Customers(Vec<Customer>),
    Namespaces(Vec<Namespace>),
    Surveys(Vec<SurveySummary>),
    Survey(JsonValue),
    Choices(JsonValue),
    Submitted(SubmitAck),
    Rejected {
        message: String,
        field_errors: Vec<FieldError>,
    },
    Responses {
        data: ResponsesPage,
        page: u32,
        definition: Option<JsonValue>,
    },
}

pub(crate) struct LoadMsg {
    pub(crate) key: String,
    pub(crate) outcome: Result<LoadOutcome, String>,
    pub(crate) kind: LoadKind,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum LoadKind {
    Customers,
    Namespaces,
    Surveys,
    Survey,
    Choices { session: u64, request_id: u64 },
    Submit { session: u64 },
    Responses,
}

fn dispatch_load(state: &mut AppState, msg: LoadMsg) {
    state.loading.remove(&msg.key);
    let LoadMsg { key, outcome, kind } = msg;
    let effects = match kind {
        LoadKind::Customers => update(state, AppMsg::LoadedCustomers { outcome }),
        LoadKind::Namespaces => update(state, AppMsg::LoadedNamespaces { key, outcome }),
        LoadKind::Surveys => update(state, AppMsg::LoadedSurveys { key, outcome }),
        LoadKind::Survey => update(state, AppMsg::LoadedSurvey { key, outcome }),
        LoadKind::Choices {
            session,
            request_id,
        } => update(
            state,
            AppMsg::LoadedChoices {
                key,
                session,
                request_id,
                outcome,
            },
        ),
        LoadKind::Submit { session } => update(state, AppMsg::Submitted { session, outcome }),
        LoadKind::Responses => update(state, AppMsg::LoadedResponses { key, outcome }),
    };
    run_effects(state, effects);
}

/// One turn of background work: loader results, then lookups whose debounce ran out.
fn pump(state: &mut AppState) {
    if !state.boot_done {
        state.boot_done = true;
        let effects = update(state, AppMsg::ReloadCustomers);
        run_effects(state, effects);
    }
    let mut drained: Vec<LoadMsg> = Vec::new();
    if let Some(rx) = &state.rx {
        while let Ok(msg) = rx.try_recv() {
            drained.push(msg);
        }
    }
    for msg in drained {
        dispatch_load(state, msg);
    }
    let lookups = poll_lookups(state, Instant::now());
    run_effects(state, lookups);
}

fn headless_target(raw: &str) -> Option<SurveyTarget> {
    let mut parts = raw.splitn(3, '/');
    let (hex, ns, id) = (parts.next()?, parts.next()?, parts.next()?);
    if hex.is_empty() || ns.is_empty() || id.is_empty() {
        return None;
    }
    Some(SurveyTarget {
        customer_hex: hex.into(),
        customer_name: hex.into(),
        namespace: ns.into(),
        survey_id: id.into(),
        survey_name: id.into(),
    })
}

fn run_headless(state: &mut AppState) -> Result<()> {
    let ticks: u64 = std::env::var("SURVEY_TUI_TICKS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10);
    let summary = env_bool("SURVEY_TUI_SMOKE_SUMMARY", false);
    let mut open = std::env::var("SURVEY_TUI_HEADLESS_OPEN")
        .ok()
        .and_then(|s| headless_target(&s));
    let backend = ratatui::backend::TestBackend::new(80, 24);
    let mut terminal = Terminal::new(backend)?;
    for _ in 0..ticks {
        pump(state);
        if let Some(target) = open.take() {
            let node = FlatNode::Survey {
                key: survey_key(&target),
                target,
                summary: SurveySummary::default(),
            };
            let effects = update(state, AppMsg::Enter(node));
            run_effects(state, effects);
        }
        terminal.draw(|f| ui(f, state))?;
        state.tick = state.tick.wrapping_add(1);
        std::thread::sleep(TICK_RATE);
    }
    if summary {
        let (rows, remote_fields) = state
            .form()
            .map(|fw| (fw.form.rows.len(), fw.controller().handles().len()))
            .unwrap_or((0, 0));
        let summary = serde_json::json!({
            "ok": state.last_error.is_none(),
            "view": format!("{:?}", state.view),
            "customers": state.customers.len(),
            "survey_open": state.form().is_some(),
            "rows": rows,
            "remote_fields": remote_fields,
        });
        println!("{summary}");
    }
    Ok(())
}

/// Keys the shell handles itself; everything else goes to the picker or the open pane.
fn handle_key(state: &mut AppState, code: KeyCode, modifiers: KeyModifiers) -> bool {
    if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }
    let effects = match state.view {
        View::Picker => {
            if code == KeyCode::Char('q') {
                return true;
            }
            on_picker_key(state, code)
        }
        View::Survey | View::Responses => match state.pane.as_mut() {
            Some(w) => w.on_key(code),
            None => update(state, AppMsg::CloseView),
        },
    };
    run_effects(state, effects);
    false
}

pub fn run(settings: Settings, config_path: Option<PathBuf>, log_path: PathBuf) -> Result<()> {
    let api = ApiClient::new(&settings).context("setting up the API client")?;
    let (tx, rx) = mpsc::channel::<LoadMsg>();
    let mut state = AppState {
        api: Some(api),
        settings,
        config_path,
        log_path: Some(log_path),
        tx: Some(tx),
        rx: Some(rx),
        ..Default::default()
    };
    match &state.config_path {
        Some(p) => state.dbg(format!("settings: {}", p.display())),
        None => state.dbg("settings: defaults (no survey-tui.yaml found)"),
    }
    if let Some(p) = state.log_path.clone() {
        state.dbg(format!("log file: {}", p.display()));
    }
    if env_bool("SURVEY_TUI_HEADLESS", false) {
        return run_headless(&mut state);
    }
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut last_tick = Instant::now();
    let res: Result<()> = loop {
        pump(&mut state);
        if let Err(e) = terminal.draw(|f| ui(f, &mut state)) {
            break Err(e.into());
        }
        let now = Instant::now();
        let mut timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        // wake up for the next debounced lookup rather than the next tick
        if let Some(deadline) = state.form().and_then(|fw| fw.next_deadline()) {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }
        match event::poll(timeout) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if handle_key(&mut state, key.code, key.modifiers) {
                        break Ok(());
                    }
                }
                Ok(_) => {}
                Err(e) => break Err(e.into()),
            },
            Ok(false) => {}
            Err(e) => break Err(e.into()),
        }
        if last_tick.elapsed() >= TICK_RATE {
            state.tick = state.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    };
    disable_raw_mode()?;
    execute!(std::io::stdout(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    res
}

fn ui(f: &mut Frame, state: &mut AppState) {
    if let Some(t) = &state.toast {
        if state.tick >= t.expires_at_tick {
            state.toast = None;
        }
    }
    let screen = f.area();
    f.render_widget(Block::default().style(state.theme.base_style()), screen);

    const DEBUG_H: u16 = 4;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(0),
            Constraint::Length(DEBUG_H),
            Constraint::Length(1),
        ])
        .split(screen);
    draw_header(f, chunks[0], state);
    let main = chunks[1];
    match state.view {
        View::Picker => {
            state.menu_viewport_h = main.height.saturating_sub(2);
            draw_picker(f, main, state);
        }
        View::Survey | View::Responses => {
            let tick = state.tick;
            if let Some(w) = state.pane.as_mut() {
                w.render(f, main, true, tick);
            }
        }
    }
    draw_debug(f, chunks[2], state);
    draw_footer(f, chunks[3], state);
}

fn draw_debug(f: &mut Frame, area: Rect, state: &AppState) {
    let b = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            "Debug",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        ));
    let h = area.height.saturating_sub(1) as usize;
    let start = state.debug_log.len().saturating_sub(h);
    let lines: Vec<Line> = state
        .debug_log
        .iter()
        .skip(start)
        .map(|s| Line::raw(s.clone()))
        .collect();
    let p = Paragraph::new(lines)
        .style(Style::default().fg(Color::Gray))
        .block(b)
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    #[test]
    fn headless_target_needs_three_parts() {
        let t = headless_target("abc/travel/trip").unwrap();
        assert_eq!(t.customer_hex, "abc");
        assert_eq!(t.namespace, "travel");
        assert_eq!(t.survey_id, "trip");
        assert!(headless_target("abc/travel").is_none());
        assert!(headless_target("abc//trip").is_none());
    }

    #[test]
    fn debug_log_is_bounded() {
        let mut state = AppState::default();
        for i in 0..250 {
            state.dbg(format!("line {i}"));
        }
        assert_eq!(state.debug_log.len(), 200);
        assert_eq!(state.debug_log.front().map(String::as_str), Some("line 50"));
    }

    #[test]
    fn toasts_expire_on_tick() {
        let mut state = AppState::default();
        run_effects(
            &mut state,
            vec![Effect::ShowToast {
                text: "hi".into(),
                level: ToastLevel::Info,
                seconds: 1,
            }],
        );
        assert_eq!(state.toast.as_ref().map(|t| t.expires_at_tick), Some(5));
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        state.tick = 5;
        terminal.draw(|f| ui(f, &mut state)).unwrap();
        assert!(state.toast.is_none());
    }

    #[test]
    fn close_effect_returns_to_the_picker() {
        let mut state = AppState::default();
        state.view = View::Responses;
        run_effects(&mut state, vec![Effect::CloseView]);
        assert_eq!(state.view, View::Picker);
    }

    #[test]
    fn export_writes_into_the_export_dir() {
        let dir = std::env::temp_dir().join(format!("survey-tui-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut state = AppState::default();
        state.settings.export_dir = Some(dir.clone());
        run_effects(
            &mut state,
            vec![Effect::ExportCsv {
                file_name: "trip_responses_x.csv".into(),
                contents: "a,b\n".into(),
                rows: 1,
            }],
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("trip_responses_x.csv")).unwrap(),
            "a,b\n"
        );
        assert!(matches!(
            state.toast.as_ref().map(|t| t.level),
            Some(ToastLevel::Success)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
