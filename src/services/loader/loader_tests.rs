use super::*;
use crate::config::Settings;
use crate::error::FieldError;
use crate::model::ChoicesSource;
use serde_json::json;
use std::sync::mpsc;
use std::time::Duration;

fn rejection(status: u16) -> ApiError {
    ApiError::Status {
        url: "/x".into(),
        status,
        message: "The server rejected the submission".into(),
        field_errors: vec![FieldError {
            field: Some("email".into()),
            message: "invalid email".into(),
        }],
    }
}

#[test]
fn submit_outcome_maps_acks_and_rejections() {
    let ok = submit_outcome(Ok(SubmitAck {
        response_id: "r-1".into(),
        created_at: None,
    }));
    assert!(matches!(ok, Ok(LoadOutcome::Submitted(ack)) if ack.response_id == "r-1"));

    match submit_outcome(Err(rejection(422))) {
        Ok(LoadOutcome::Rejected {
            message,
            field_errors,
        }) => {
            assert_eq!(message, "The server rejected the submission");
            assert_eq!(field_errors[0].field.as_deref(), Some("email"));
        }
        _ => panic!("expected a rejection outcome"),
    }

    // server faults are plain failures
    assert!(submit_outcome(Err(rejection(503))).is_err());
}

#[test]
fn submission_timestamp_is_rfc3339() {
    let body = submission_body(json!({"a": 1}));
    assert!(chrono::DateTime::parse_from_rfc3339(&body.submitted_at).is_ok());
    assert_eq!(body.survey_data, json!({"a": 1}));
}

#[test]
fn choices_are_fetched_from_mock_fixtures() {
    let dir = std::env::temp_dir().join(format!("survey-tui-mock-{}", std::process::id()));
    std::fs::create_dir_all(dir.join("lookups")).unwrap();
    std::fs::write(
        dir.join("lookups").join("countries.json"),
        r#"[{"key":"fr","value":"France"}]"#,
    )
    .unwrap();
    let settings = Settings {
        mock_mode: true,
        mock_dir: Some(dir.clone()),
        ..Settings::default()
    };
    let api = ApiClient::new(&settings).unwrap();
    let request = ResolvedRequest {
        url: "/mock/lookups/countries?search=fr&size=20".into(),
        headers: Vec::new(),
        auth_required: true,
        source: ChoicesSource::default(),
    };
    let (tx, rx) = mpsc::channel();
    spawn_fetch_choices(api, request, "country".into(), 7, 3, tx);
    let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(msg.key, "country");
    assert!(matches!(
        msg.kind,
        LoadKind::Choices {
            session: 7,
            request_id: 3
        }
    ));
    match msg.outcome {
        Ok(LoadOutcome::Choices(v)) => assert_eq!(v[0]["key"], "fr"),
        _ => panic!("expected choices"),
    }
    let _ = std::fs::remove_dir_all(&dir);
}
