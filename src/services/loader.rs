use crate::engine::controller::ResolvedRequest;
use crate::error::ApiError;
use crate::model::{SubmitAck, SubmitRequest, SurveyTarget};
use crate::services::api::ApiClient;
use crate::ui::{LoadKind, LoadMsg, LoadOutcome};
use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use std::sync::mpsc::Sender;
use std::thread;

fn spawn_job<F>(key: String, kind: LoadKind, tx: Sender<LoadMsg>, job: F)
where
    F: FnOnce() -> Result<LoadOutcome, String> + Send + 'static,
{
    thread::spawn(move || {
        let outcome = job();
        // receiver gone means the app is shutting down
        let _ = tx.send(LoadMsg { key, outcome, kind });
    });
}

pub fn spawn_load_customers(
    api: ApiClient,
    include_deleted: bool,
    key: String,
    tx: Sender<LoadMsg>,
) {
    spawn_job(key, LoadKind::Customers, tx, move || {
        api.list_customers(include_deleted)
            .map(|l| LoadOutcome::Customers(l.customers))
            .map_err(|e| e.user_message())
    });
}

pub fn spawn_load_namespaces(
    api: ApiClient,
    hex: String,
    include_deleted: bool,
    key: String,
    tx: Sender<LoadMsg>,
) {
    spawn_job(key, LoadKind::Namespaces, tx, move || {
        api.list_namespaces(&hex, include_deleted)
            .map(|l| LoadOutcome::Namespaces(l.namespaces))
            .map_err(|e| e.user_message())
    });
}

pub fn spawn_load_surveys(
    api: ApiClient,
    hex: String,
    namespace: String,
    include_deleted: bool,
    key: String,
    tx: Sender<LoadMsg>,
) {
    spawn_job(key, LoadKind::Surveys, tx, move || {
        api.list_surveys(&hex, &namespace, include_deleted)
            .map(|l| LoadOutcome::Surveys(l.surveys))
            .map_err(|e| e.user_message())
    });
}

pub fn spawn_load_survey(api: ApiClient, target: SurveyTarget, key: String, tx: Sender<LoadMsg>) {
    spawn_job(key, LoadKind::Survey, tx, move || {
        api.survey_definition(&target.customer_hex, &target.namespace, &target.survey_id)
            .map(LoadOutcome::Survey)
            .map_err(|e| e.user_message())
    });
}

/// Run one lookup. `key` is the field instance; the session and request id travel
/// back so the form can drop results that no longer apply.
pub fn spawn_fetch_choices(
    api: ApiClient,
    request: ResolvedRequest,
    key: String,
    session: u64,
    request_id: u64,
    tx: Sender<LoadMsg>,
) {
    spawn_job(
        key,
        LoadKind::Choices {
            session,
            request_id,
        },
        tx,
        move || {
            api.fetch_choices(&request)
                .map(LoadOutcome::Choices)
                .map_err(|e| e.to_string())
        },
    );
}

/// Rejections with a readable body become an outcome the form can show inline;
/// everything else is a plain failure.
pub(crate) fn submit_outcome(result: Result<SubmitAck, ApiError>) -> Result<LoadOutcome, String> {
    match result {
        Ok(ack) => Ok(LoadOutcome::Submitted(ack)),
        Err(e) if e.is_rejection() => Ok(LoadOutcome::Rejected {
            message: e.user_message(),
            field_errors: e.field_errors().to_vec(),
        }),
        Err(e) => Err(e.user_message()),
    }
}

pub(crate) fn submission_body(data: JsonValue) -> SubmitRequest {
    SubmitRequest {
        survey_data: data,
        submitted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

pub fn spawn_submit(
    api: ApiClient,
    target: SurveyTarget,
    data: JsonValue,
    key: String,
    session: u64,
    tx: Sender<LoadMsg>,
) {
    spawn_job(key, LoadKind::Submit { session }, tx, move || {
        let body = submission_body(data);
        submit_outcome(api.submit_response(
            &target.customer_hex,
            &target.namespace,
            &target.survey_id,
            &body,
        ))
    });
}

/// Load one page of responses. The survey definition comes along on the first
/// page so the viewer can label fields.
pub fn spawn_load_responses(
    api: ApiClient,
    target: SurveyTarget,
    page: u32,
    size: u32,
    with_definition: bool,
    key: String,
    tx: Sender<LoadMsg>,
) {
    spawn_job(key, LoadKind::Responses, tx, move || {
        let data = api
            .list_responses(
                &target.customer_hex,
                &target.namespace,
                &target.survey_id,
                page,
                size,
            )
            .map_err(|e| e.user_message())?;
        let definition = if with_definition {
            // labels are optional; a missing definition still shows raw field names
            api.survey_definition(&target.customer_hex, &target.namespace, &target.survey_id)
                .ok()
        } else {
            None
        };
        Ok(LoadOutcome::Responses {
            data,
            page,
            definition,
        })
    });
}

#[cfg(test)]
mod loader_tests;
