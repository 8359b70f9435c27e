//! Blocking client for the survey backend. Calls run on loader threads, never the UI thread.
use crate::config::Settings;
use crate::engine::controller::{auth_headers_for, prefix_api_url, ResolvedRequest};
use crate::error::{parse_error_body, ApiError};
use crate::model::{
    CustomerList, NamespaceList, ResponsesPage, SubmitAck, SubmitRequest, SurveyList,
};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use urlencoding::encode;

const OPERATIONS: &str = "/api/v1/operations/customers";

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: String,
    mock_mode: bool,
    mock_dir: Option<PathBuf>,
    token: Option<String>,
    tenant_id: Option<String>,
}

/// Fixture file for a mock-only path: `/mock/lookups/countries?x=1` → `<dir>/lookups/countries.json`.
pub fn mock_fixture_path(dir: &Path, url: &str) -> Option<PathBuf> {
    let path = url.split(['?', '#']).next()?;
    let rel = path.strip_prefix("/mock/")?.trim_matches('/');
    if rel.is_empty() || rel.split('/').any(|seg| seg == "..") {
        return None;
    }
    Some(dir.join(format!("{rel}.json")))
}

fn with_deleted(url: String, include_deleted: bool) -> String {
    if include_deleted {
        format!("{url}?include_deleted=true")
    } else {
        url
    }
}

impl ApiClient {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|source| ApiError::Client { source })?;
        Ok(Self {
            http,
            base: settings.api_url.clone(),
            mock_mode: settings.mock_mode,
            mock_dir: settings.mock_dir.clone(),
            token: settings.auth.token.clone(),
            tenant_id: settings.auth.tenant_id.clone(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        prefix_api_url(path, &self.base, self.mock_mode)
    }

    fn auth_headers(&self, url: &str) -> Vec<(String, String)> {
        auth_headers_for(
            url,
            &self.base,
            self.token.as_deref(),
            self.tenant_id.as_deref(),
        )
    }

    fn read_mock(&self, url: &str) -> Option<Result<JsonValue, ApiError>> {
        if !self.mock_mode || !url.starts_with("/mock/") {
            return None;
        }
        let dir = self.mock_dir.clone().unwrap_or_else(|| PathBuf::from("mock"));
        let Some(path) = mock_fixture_path(&dir, url) else {
            return Some(Err(ApiError::MockMissing { path: dir }));
        };
        debug!(%url, fixture = %path.display(), "serving mock fixture");
        Some(match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ApiError::Decode {
                url: url.to_string(),
                source,
            }),
            Err(_) => Err(ApiError::MockMissing { path }),
        })
    }

    fn send(&self, req: RequestBuilder, url: &str) -> Result<JsonValue, ApiError> {
        let resp = req.send().map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status();
        let body = resp.text().map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            let (message, field_errors) = parse_error_body(status.as_u16(), &body);
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                message,
                field_errors,
            });
        }
        if body.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    fn get_with(&self, url: &str, headers: &[(String, String)]) -> Result<JsonValue, ApiError> {
        if let Some(mocked) = self.read_mock(url) {
            return mocked;
        }
        debug!(%url, "GET");
        let mut req = self.http.get(url).header("Accept", "application/json");
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        self.send(req, url)
    }

    pub fn get_json(&self, path: &str) -> Result<JsonValue, ApiError> {
        let url = self.url(path);
        let headers = self.auth_headers(&url);
        self.get_with(&url, &headers)
    }

    pub fn post_json(&self, path: &str, body: &JsonValue) -> Result<JsonValue, ApiError> {
        let url = self.url(path);
        debug!(%url, "POST");
        let mut req = self.http.post(&url).json(body);
        for (k, v) in self.auth_headers(&url) {
            req = req.header(k, v);
        }
        self.send(req, &url)
    }

    fn decode<T: DeserializeOwned>(path: &str, v: JsonValue) -> Result<T, ApiError> {
        serde_json::from_value(v).map_err(|source| ApiError::Decode {
            url: path.to_string(),
            source,
        })
    }

    pub fn list_customers(&self, include_deleted: bool) -> Result<CustomerList, ApiError> {
        let path = with_deleted(OPERATIONS.to_string(), include_deleted);
        Self::decode(&path, self.get_json(&path)?)
    }

    pub fn list_namespaces(
        &self,
        hex: &str,
        include_deleted: bool,
    ) -> Result<NamespaceList, ApiError> {
        let path = with_deleted(
            format!("{OPERATIONS}/{}/namespaces", encode(hex)),
            include_deleted,
        );
        Self::decode(&path, self.get_json(&path)?)
    }

    pub fn list_surveys(
        &self,
        hex: &str,
        namespace: &str,
        include_deleted: bool,
    ) -> Result<SurveyList, ApiError> {
        let path = with_deleted(
            format!(
                "{OPERATIONS}/{}/namespaces/{}/surveys",
                encode(hex),
                encode(namespace)
            ),
            include_deleted,
        );
        Self::decode(&path, self.get_json(&path)?)
    }

    pub fn survey_definition(
        &self,
        hex: &str,
        namespace: &str,
        survey_id: &str,
    ) -> Result<JsonValue, ApiError> {
        self.get_json(&format!(
            "/{}/{}/survey?survey_name={}",
            encode(hex),
            encode(namespace),
            encode(survey_id)
        ))
    }

    pub fn submit_response(
        &self,
        hex: &str,
        namespace: &str,
        survey_id: &str,
        body: &SubmitRequest,
    ) -> Result<SubmitAck, ApiError> {
        let path = format!(
            "/{}/{}/responses?survey_name={}",
            encode(hex),
            encode(namespace),
            encode(survey_id)
        );
        let payload = serde_json::to_value(body).map_err(|source| ApiError::Decode {
            url: path.clone(),
            source,
        })?;
        Self::decode(&path, self.post_json(&path, &payload)?)
    }

    pub fn list_responses(
        &self,
        hex: &str,
        namespace: &str,
        survey_id: &str,
        page: u32,
        size: u32,
    ) -> Result<ResponsesPage, ApiError> {
        let path = format!(
            "{OPERATIONS}/{}/namespaces/{}/responses?page={page}&size={size}&survey_name={}",
            encode(hex),
            encode(namespace),
            encode(survey_id)
        );
        Self::decode(&path, self.get_json(&path)?)
    }

    /// Execute a lookup exactly as the choice controller built it; headers are not re-derived.
    pub fn fetch_choices(&self, request: &ResolvedRequest) -> Result<JsonValue, ApiError> {
        self.get_with(&request.url, &request.headers)
    }
}
