use crate::engine::controller::{ApplyOutcome, PendingLookup};
use crate::model::{SurveyDefinition, SurveyTarget};
use crate::nav::flatten::flatten_nodes;
use crate::nav::keys::{namespace_key, responses_key, survey_key};
use crate::ui::{AppState, FlatNode, LoadOutcome, ToastLevel, View, CUSTOMERS_KEY};
use crate::widgets::form_widget::FormWidget;
use crate::widgets::response_viewer::ResponseViewer;
use serde_json::Value as JsonValue;
use std::time::Instant;
use tracing::{error, info, warn};

pub enum AppMsg {
    Enter(FlatNode),
    Collapse(FlatNode),
    Refresh(FlatNode),
    ReloadCustomers,
    ToggleDeleted,
    OpenResponses(SurveyTarget),
    CloseView,
    LoadedCustomers {
        outcome: Result<LoadOutcome, String>,
    },
    LoadedNamespaces {
        key: String,
        outcome: Result<LoadOutcome, String>,
    },
    LoadedSurveys {
        key: String,
        outcome: Result<LoadOutcome, String>,
    },
    LoadedSurvey {
        key: String,
        outcome: Result<LoadOutcome, String>,
    },
    LoadedChoices {
        key: String,
        session: u64,
        request_id: u64,
        outcome: Result<LoadOutcome, String>,
    },
    Submitted {
        session: u64,
        outcome: Result<LoadOutcome, String>,
    },
    LoadedResponses {
        key: String,
        outcome: Result<LoadOutcome, String>,
    },
}

#[allow(clippy::large_enum_variant)]
pub enum Effect {
    LoadCustomers {
        include_deleted: bool,
    },
    LoadNamespaces {
        hex: String,
        include_deleted: bool,
        key: String,
    },
    LoadSurveys {
        hex: String,
        namespace: String,
        include_deleted: bool,
        key: String,
    },
    LoadSurvey {
        target: SurveyTarget,
        key: String,
    },
    FetchChoices {
        session: u64,
        lookup: PendingLookup,
    },
    SubmitResponse {
        session: u64,
        target: SurveyTarget,
        data: JsonValue,
    },
    LoadResponses {
        target: SurveyTarget,
        page: u32,
        size: u32,
        with_definition: bool,
    },
    ExportCsv {
        file_name: String,
        contents: String,
        rows: usize,
    },
    CopyToClipboard {
        text: String,
    },
    ShowToast {
        text: String,
        level: ToastLevel,
        seconds: u64,
    },
    CloseView,
}

pub(crate) fn form_widget_mut(state: &mut AppState) -> Option<&mut FormWidget> {
    state.pane.as_mut()?.as_any_mut().downcast_mut::<FormWidget>()
}

pub(crate) fn response_viewer_mut(state: &mut AppState) -> Option<&mut ResponseViewer> {
    state
        .pane
        .as_mut()?
        .as_any_mut()
        .downcast_mut::<ResponseViewer>()
}

/// Lookups of the open survey whose debounce has expired.
pub fn poll_lookups(state: &mut AppState, now: Instant) -> Vec<Effect> {
    form_widget_mut(state)
        .map(|fw| fw.poll(now))
        .unwrap_or_default()
}

fn error_toast(text: String) -> Effect {
    Effect::ShowToast {
        text,
        level: ToastLevel::Error,
        seconds: 4,
    }
}

fn toggle_children(state: &mut AppState, key: &str, loaded: bool, load: Effect) -> Vec<Effect> {
    if state.expanded.remove(key) {
        return Vec::new();
    }
    state.expanded.insert(key.to_string());
    if loaded || state.loading.contains(key) {
        return Vec::new();
    }
    state.loading.insert(key.to_string());
    vec![load]
}

pub fn update(state: &mut AppState, msg: AppMsg) -> Vec<Effect> {
    use AppMsg::*;
    let mut effects: Vec<Effect> = Vec::new();
    match msg {
        Enter(node) => match node {
            FlatNode::Customer { key, customer } => {
                let loaded = state.namespaces.contains_key(&key);
                let load = Effect::LoadNamespaces {
                    hex: customer.hex_id.clone(),
                    include_deleted: state.include_deleted,
                    key: key.clone(),
                };
                effects = toggle_children(state, &key, loaded, load);
            }
            FlatNode::Namespace {
                key,
                hex,
                namespace,
                ..
            } => {
                let loaded = state.surveys.contains_key(&key);
                let load = Effect::LoadSurveys {
                    hex,
                    namespace: namespace.slug.clone(),
                    include_deleted: state.include_deleted,
                    key: key.clone(),
                };
                effects = toggle_children(state, &key, loaded, load);
            }
            FlatNode::Survey { key, target, .. } => {
                state.dbg(format!("open survey {}", target.breadcrumb()));
                state.loading.insert(key.clone());
                state.status_text = Some(format!("Loading {}…", target.survey_name));
                state.opening = Some(target.clone());
                effects.push(Effect::LoadSurvey { target, key });
            }
            FlatNode::Empty { .. } => {}
        },
        Collapse(node) => {
            let key = match &node {
                FlatNode::Customer { key, .. } | FlatNode::Namespace { key, .. } => key.clone(),
                FlatNode::Survey { target, .. } => {
                    namespace_key(&target.customer_hex, &target.namespace)
                }
                FlatNode::Empty { .. } => return effects,
            };
            state.expanded.remove(&key);
            // park the cursor on the collapsed row
            if let Some(idx) = flatten_nodes(state).iter().position(|n| match n {
                FlatNode::Customer { key: k, .. } | FlatNode::Namespace { key: k, .. } => *k == key,
                _ => false,
            }) {
                state.selected = idx;
            }
        }
        Refresh(node) => match node {
            FlatNode::Customer { key, customer } => {
                state.namespaces.remove(&key);
                state.surveys.retain(|k, _| !k.starts_with(&format!("{key}/")));
                state.expanded.remove(&key);
                let load = Effect::LoadNamespaces {
                    hex: customer.hex_id,
                    include_deleted: state.include_deleted,
                    key: key.clone(),
                };
                effects = toggle_children(state, &key, false, load);
            }
            FlatNode::Namespace {
                key,
                hex,
                namespace,
                ..
            } => {
                state.surveys.remove(&key);
                state.expanded.remove(&key);
                let load = Effect::LoadSurveys {
                    hex,
                    namespace: namespace.slug,
                    include_deleted: state.include_deleted,
                    key: key.clone(),
                };
                effects = toggle_children(state, &key, false, load);
            }
            FlatNode::Survey { .. } | FlatNode::Empty { .. } => {}
        },
        ReloadCustomers => {
            if !state.loading.contains(CUSTOMERS_KEY) {
                state.loading.insert(CUSTOMERS_KEY.to_string());
                effects.push(Effect::LoadCustomers {
                    include_deleted: state.include_deleted,
                });
            }
        }
        ToggleDeleted => {
            state.include_deleted = !state.include_deleted;
            state.namespaces.clear();
            state.surveys.clear();
            state.expanded.clear();
            state.selected = 0;
            state.menu_offset = 0;
            state.loading.remove(CUSTOMERS_KEY);
            let text = if state.include_deleted {
                "Showing deleted entries"
            } else {
                "Hiding deleted entries"
            };
            effects.push(Effect::ShowToast {
                text: text.into(),
                level: ToastLevel::Info,
                seconds: 2,
            });
            effects.extend(update(state, ReloadCustomers));
        }
        OpenResponses(target) => {
            state.dbg(format!("responses for {}", target.breadcrumb()));
            let mut viewer = ResponseViewer::new(target, state.settings.lookup.page_size as u32);
            effects.push(viewer.load_page(1));
            state.pane = Some(Box::new(viewer));
            state.view = View::Responses;
        }
        CloseView => {
            if let Some(fw) = form_widget_mut(state) {
                // outstanding timers die with the session
                let session = fw.session;
                state.dbg(format!("survey session {session} closed"));
            }
            state.pane = None;
            state.opening = None;
            state.status_text = None;
            state.view = View::Picker;
        }
        LoadedCustomers { outcome } => match outcome {
            Ok(LoadOutcome::Customers(list)) => {
                state.dbg(format!("loaded {} customers", list.len()));
                state.customers = list;
                state.last_error = None;
                state.selected = state.selected.min(state.customers.len().saturating_sub(1));
            }
            Ok(_) => state.dbg("unexpected customers payload"),
            Err(e) => {
                state.dbg(format!("load customers error: {e}"));
                state.last_error = Some(e.clone());
                effects.push(error_toast(format!("Failed to load customers: {e}")));
            }
        },
        LoadedNamespaces { key, outcome } => match outcome {
            Ok(LoadOutcome::Namespaces(list)) => {
                state.dbg(format!("loaded {} namespaces for {key}", list.len()));
                state.namespaces.insert(key, list);
            }
            Ok(_) => state.dbg(format!("unexpected namespaces payload for {key}")),
            Err(e) => {
                state.dbg(format!("load namespaces error ({key}): {e}"));
                state.expanded.remove(&key);
                effects.push(error_toast(format!("Failed to load namespaces: {e}")));
            }
        },
        LoadedSurveys { key, outcome } => match outcome {
            Ok(LoadOutcome::Surveys(list)) => {
                state.dbg(format!("loaded {} surveys for {key}", list.len()));
                state.surveys.insert(key, list);
            }
            Ok(_) => state.dbg(format!("unexpected surveys payload for {key}")),
            Err(e) => {
                state.dbg(format!("load surveys error ({key}): {e}"));
                state.expanded.remove(&key);
                effects.push(error_toast(format!("Failed to load surveys: {e}")));
            }
        },
        LoadedSurvey { key, outcome } => {
            let Some(target) = state
                .opening
                .take_if(|t| survey_key(t) == key)
            else {
                state.dbg(format!("survey load for {key} ignored (no longer opening)"));
                return effects;
            };
            state.status_text = None;
            let raw = match outcome {
                Ok(LoadOutcome::Survey(raw)) => raw,
                Ok(_) => return effects,
                Err(e) => {
                    state.dbg(format!("load survey error ({key}): {e}"));
                    effects.push(error_toast(format!("Failed to load survey: {e}")));
                    return effects;
                }
            };
            match SurveyDefinition::parse(&raw) {
                Ok(def) => {
                    state.next_session += 1;
                    let session = state.next_session;
                    let settings = state.settings.controller_settings();
                    let widget = FormWidget::new(session, target, def, settings, Instant::now());
                    state.dbg(format!(
                        "survey session {session}: {} rows, {} remote fields",
                        widget.form.rows.len(),
                        widget.controller().handles().len()
                    ));
                    info!(session, survey = %key, "survey opened");
                    state.pane = Some(Box::new(widget));
                    state.view = View::Survey;
                }
                Err(e) => {
                    warn!(survey = %key, error = %e, "survey definition rejected");
                    state.dbg(format!("invalid survey definition ({key}): {e}"));
                    effects.push(error_toast(format!("Invalid survey definition: {e}")));
                }
            }
        }
        LoadedChoices {
            key,
            session,
            request_id,
            outcome,
        } => {
            let payload = outcome.and_then(|o| match o {
                LoadOutcome::Choices(v) => Ok(v),
                _ => Err("unexpected lookup payload".to_string()),
            });
            let note = match form_widget_mut(state) {
                Some(fw) if fw.session == session => {
                    match fw.apply_choices(&key, request_id, payload) {
                        ApplyOutcome::Applied(n) => format!("choices {key}: {n} items"),
                        ApplyOutcome::Stale => format!("stale choices for {key} dropped (#{request_id})"),
                        ApplyOutcome::Failed(e) => format!("lookup {key} failed: {e}"),
                    }
                }
                _ => format!("choices for closed session {session} dropped ({key})"),
            };
            state.dbg(note);
        }
        Submitted { session, outcome } => {
            state.status_text = None;
            let now = Instant::now();
            let live = form_widget_mut(state).filter(|fw| fw.session == session);
            match outcome {
                Ok(LoadOutcome::Submitted(ack)) => {
                    if let Some(fw) = live {
                        fw.submission_succeeded(&ack.response_id, now);
                    }
                    info!(session, response_id = %ack.response_id, "response submitted");
                    state.dbg(format!("submitted: response {}", ack.response_id));
                    effects.push(Effect::ShowToast {
                        text: format!("Response submitted (ID: {})", ack.response_id),
                        level: ToastLevel::Success,
                        seconds: 4,
                    });
                }
                Ok(LoadOutcome::Rejected {
                    message,
                    field_errors,
                }) => {
                    if let Some(fw) = live {
                        fw.submission_failed(&message, &field_errors);
                    }
                    error!(session, %message, fields = field_errors.len(), "submission rejected");
                    state.dbg(format!("submission rejected: {message}"));
                    effects.push(error_toast(format!("Submission failed: {message}")));
                }
                other => {
                    let message = match other {
                        Err(e) => e,
                        Ok(_) => "unexpected submission response".to_string(),
                    };
                    if let Some(fw) = live {
                        fw.submission_failed(&message, &[]);
                    }
                    error!(session, %message, "submission failed");
                    state.dbg(format!("submission failed: {message}"));
                    effects.push(error_toast(format!("Submission failed: {message}")));
                }
            }
        }
        LoadedResponses { key, outcome } => {
            let Some(viewer) = response_viewer_mut(state).filter(|v| responses_key(&v.target) == key)
            else {
                state.dbg(format!("responses for {key} dropped (viewer closed)"));
                return effects;
            };
            let note = match outcome {
                Ok(LoadOutcome::Responses {
                    data,
                    page,
                    definition,
                }) => {
                    let def = definition.and_then(|raw| SurveyDefinition::parse(&raw).ok());
                    let n = data.responses.len();
                    viewer.set_page(data, page, def);
                    format!("loaded {n} responses (page {page})")
                }
                Ok(_) => "unexpected responses payload".to_string(),
                Err(e) => {
                    viewer.set_error(e.clone());
                    effects.push(error_toast(format!("Failed to load responses: {e}")));
                    format!("load responses error ({key}): {e}")
                }
            };
            state.dbg(note);
        }
    }
    effects
}

#[cfg(test)]
mod tests;
