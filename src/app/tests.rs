use super::*;
use crate::error::FieldError;
use crate::model::{Customer, Namespace, ResponsesPage, SubmitAck};
use crate::nav::keys::customer_key;
use serde_json::json;

const HEX: &str = "0123456789abcdef0123456789abcdef";

fn acme() -> Customer {
    Customer {
        name: "Acme".into(),
        hex_id: HEX.into(),
        ..Default::default()
    }
}

fn target() -> SurveyTarget {
    SurveyTarget {
        customer_hex: HEX.into(),
        customer_name: "Acme".into(),
        namespace: "travel".into(),
        survey_id: "trip".into(),
        survey_name: "Trip".into(),
    }
}

fn survey_json() -> JsonValue {
    json!({"title": "Trip planner", "elements": [
        {"type": "text", "name": "traveller", "isRequired": true},
        {"type": "dropdown", "name": "country",
         "choicesByUrl": {"url": format!("/{HEX}/travel/lookups/countries")}}
    ]})
}

fn open_survey(st: &mut AppState) -> u64 {
    let node = FlatNode::Survey {
        key: survey_key(&target()),
        target: target(),
        summary: Default::default(),
    };
    let effects = update(st, AppMsg::Enter(node));
    assert!(matches!(effects.as_slice(), [Effect::LoadSurvey { .. }]));
    let _ = update(
        st,
        AppMsg::LoadedSurvey {
            key: survey_key(&target()),
            outcome: Ok(LoadOutcome::Survey(survey_json())),
        },
    );
    form_widget_mut(st).expect("form open").session
}

#[test]
fn enter_toggles_a_customer_and_loads_once() {
    let mut st = AppState::default();
    st.customers = vec![acme()];
    let node = FlatNode::Customer {
        key: customer_key(HEX),
        customer: acme(),
    };
    let effects = update(&mut st, AppMsg::Enter(node.clone()));
    assert!(matches!(effects.as_slice(), [Effect::LoadNamespaces { hex, .. }] if hex == HEX));
    assert!(st.expanded.contains(&customer_key(HEX)));

    // a second press while loading collapses without another request
    assert!(update(&mut st, AppMsg::Enter(node.clone())).is_empty());
    assert!(!st.expanded.contains(&customer_key(HEX)));

    let _ = update(
        &mut st,
        AppMsg::LoadedNamespaces {
            key: customer_key(HEX),
            outcome: Ok(LoadOutcome::Namespaces(vec![Namespace {
                name: "Travel".into(),
                slug: "travel".into(),
                ..Default::default()
            }])),
        },
    );
    // cached children are shown without refetching
    assert!(update(&mut st, AppMsg::Enter(node)).is_empty());
    assert!(st.expanded.contains(&customer_key(HEX)));
}

#[test]
fn failed_namespace_load_collapses_and_reports() {
    let mut st = AppState::default();
    st.customers = vec![acme()];
    let key = customer_key(HEX);
    let _ = update(
        &mut st,
        AppMsg::Enter(FlatNode::Customer {
            key: key.clone(),
            customer: acme(),
        }),
    );
    let effects = update(
        &mut st,
        AppMsg::LoadedNamespaces {
            key: key.clone(),
            outcome: Err("HTTP 500".into()),
        },
    );
    assert!(!st.expanded.contains(&key));
    assert!(matches!(
        effects.as_slice(),
        [Effect::ShowToast { level: ToastLevel::Error, text, .. }] if text.contains("HTTP 500")
    ));
}

#[test]
fn loaded_survey_opens_a_fresh_session() {
    let mut st = AppState::default();
    let first = open_survey(&mut st);
    assert!(matches!(st.view, View::Survey));
    assert_eq!(form_widget_mut(&mut st).unwrap().form.title, "Trip planner");

    let _ = update(&mut st, AppMsg::CloseView);
    assert!(matches!(st.view, View::Picker));
    let second = open_survey(&mut st);
    assert!(second > first);
}

#[test]
fn survey_load_for_an_abandoned_open_is_ignored() {
    let mut st = AppState::default();
    let effects = update(
        &mut st,
        AppMsg::LoadedSurvey {
            key: survey_key(&target()),
            outcome: Ok(LoadOutcome::Survey(survey_json())),
        },
    );
    assert!(effects.is_empty());
    assert!(st.pane.is_none());
    assert!(matches!(st.view, View::Picker));
}

#[test]
fn invalid_definition_stays_in_the_picker() {
    let mut st = AppState::default();
    st.opening = Some(target());
    let effects = update(
        &mut st,
        AppMsg::LoadedSurvey {
            key: survey_key(&target()),
            outcome: Ok(LoadOutcome::Survey(json!({"elements": "nope"}))),
        },
    );
    assert!(st.pane.is_none());
    assert!(matches!(effects.as_slice(), [Effect::ShowToast { level: ToastLevel::Error, .. }]));
}

#[test]
fn choices_reach_only_the_live_session() {
    let mut st = AppState::default();
    let session = open_survey(&mut st);
    let lookups = poll_lookups(&mut st, Instant::now());
    let request_id = match lookups.as_slice() {
        [Effect::FetchChoices { lookup, .. }] => lookup.request_id,
        _ => panic!("expected the country lookup"),
    };

    let _ = update(
        &mut st,
        AppMsg::LoadedChoices {
            key: "country".into(),
            session: session + 7,
            request_id,
            outcome: Ok(LoadOutcome::Choices(json!([{"value": "fr", "text": "France"}]))),
        },
    );
    let h = crate::engine::survey_model::ElementHandle::top("country");
    assert!(form_widget_mut(&mut st).unwrap().controller().choices(&h).is_empty());

    let _ = update(
        &mut st,
        AppMsg::LoadedChoices {
            key: "country".into(),
            session,
            request_id,
            outcome: Ok(LoadOutcome::Choices(json!([{"value": "fr", "text": "France"}]))),
        },
    );
    assert_eq!(form_widget_mut(&mut st).unwrap().controller().choices(&h).len(), 1);
}

#[test]
fn submission_results_update_the_form() {
    let mut st = AppState::default();
    let session = open_survey(&mut st);

    let effects = update(
        &mut st,
        AppMsg::Submitted {
            session,
            outcome: Ok(LoadOutcome::Rejected {
                message: "Validation failed".into(),
                field_errors: vec![FieldError {
                    field: Some("traveller".into()),
                    message: "too short".into(),
                }],
            }),
        },
    );
    assert!(matches!(effects.as_slice(), [Effect::ShowToast { level: ToastLevel::Error, .. }]));
    {
        let fw = form_widget_mut(&mut st).unwrap();
        assert!(!fw.form.disabled);
        assert!(fw.form.message.as_deref().unwrap().contains("Validation failed"));
        assert_eq!(fw.form.errors.len(), 1);
    }

    let effects = update(
        &mut st,
        AppMsg::Submitted {
            session,
            outcome: Ok(LoadOutcome::Submitted(SubmitAck {
                response_id: "resp-42".into(),
                created_at: None,
            })),
        },
    );
    assert!(matches!(effects.as_slice(), [Effect::ShowToast { level: ToastLevel::Success, .. }]));
    let fw = form_widget_mut(&mut st).unwrap();
    assert_eq!(fw.form.message.as_deref(), Some("Submitted. Response ID: resp-42"));
    assert!(fw.form.errors.is_empty());
}

#[test]
fn responses_land_in_the_matching_viewer() {
    let mut st = AppState::default();
    let effects = update(&mut st, AppMsg::OpenResponses(target()));
    assert!(matches!(
        effects.as_slice(),
        [Effect::LoadResponses { page: 1, with_definition: true, .. }]
    ));
    assert!(matches!(st.view, View::Responses));

    let page = ResponsesPage {
        total: 1,
        responses: vec![Default::default()],
    };
    let _ = update(
        &mut st,
        AppMsg::LoadedResponses {
            key: responses_key(&target()),
            outcome: Ok(LoadOutcome::Responses {
                data: page,
                page: 1,
                definition: Some(survey_json()),
            }),
        },
    );
    let viewer = response_viewer_mut(&mut st).unwrap();
    assert!(!viewer.loading);
    assert_eq!(viewer.responses().len(), 1);

    // a late page for another survey is dropped
    let mut other = target();
    other.survey_id = "other".into();
    let _ = update(
        &mut st,
        AppMsg::LoadedResponses {
            key: responses_key(&other),
            outcome: Err("boom".into()),
        },
    );
    assert!(response_viewer_mut(&mut st).unwrap().error.is_none());
}

#[test]
fn toggling_deleted_clears_caches_and_reloads() {
    let mut st = AppState::default();
    st.customers = vec![acme()];
    st.namespaces.insert(customer_key(HEX), Vec::new());
    st.expanded.insert(customer_key(HEX));
    let effects = update(&mut st, AppMsg::ToggleDeleted);
    assert!(st.include_deleted);
    assert!(st.namespaces.is_empty());
    assert!(st.expanded.is_empty());
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::LoadCustomers { include_deleted: true })));
}
