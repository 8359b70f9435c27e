use serde_json::Value as JsonValue;
use std::path::PathBuf;
use thiserror::Error;

/// A validation message the backend attached to a specific field, when it said which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
        field_errors: Vec<FieldError>,
    },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("mock fixture not found: {}", path.display())]
    MockMissing { path: PathBuf },
}

impl ApiError {
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ApiError::Status { field_errors, .. } => field_errors.as_slice(),
            _ => &[],
        }
    }

    /// Status responses that carry a message meant for the user.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if (400..500).contains(status))
    }

    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{line}:{column}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },
}

fn loc_field(loc: &JsonValue) -> Option<String> {
    // FastAPI locations look like ["body", "survey_data", "email"]
    loc.as_array()?
        .iter()
        .rev()
        .filter_map(|p| p.as_str())
        .find(|p| !matches!(*p, "body" | "query" | "path" | "survey_data"))
        .map(str::to_string)
}

/// Pull a user-facing message and per-field errors out of an error body.
///
/// Understands `{detail: "..."}`, `{detail: [{loc, msg}]}` and `{errors: [...]}` where
/// items are strings or `{field, message}` objects.
pub fn parse_error_body(status: u16, body: &str) -> (String, Vec<FieldError>) {
    let generic = format!("Request failed (HTTP {status})");
    let Ok(v) = serde_json::from_str::<JsonValue>(body) else {
        let text = body.trim();
        let message = if text.is_empty() || text.len() > 200 {
            generic
        } else {
            text.to_string()
        };
        return (message, Vec::new());
    };
    let mut fields = Vec::new();
    match v.get("detail") {
        Some(JsonValue::String(s)) => return (s.clone(), fields),
        Some(JsonValue::Array(items)) => {
            for it in items {
                let message = it
                    .get("msg")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| it.to_string());
                let field = it.get("loc").and_then(loc_field);
                fields.push(FieldError { field, message });
            }
        }
        _ => {}
    }
    if let Some(items) = v.get("errors").and_then(|e| e.as_array()) {
        for it in items {
            match it {
                JsonValue::String(s) => fields.push(FieldError {
                    field: None,
                    message: s.clone(),
                }),
                other => fields.push(FieldError {
                    field: other
                        .get("field")
                        .and_then(|f| f.as_str())
                        .map(str::to_string),
                    message: other
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                }),
            }
        }
    }
    let message = v
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or_else(|| {
            (fields.len() == 1 && fields[0].field.is_none()).then(|| fields[0].message.clone())
        })
        .unwrap_or_else(|| {
            if fields.is_empty() {
                generic
            } else {
                "The server rejected the submission".to_string()
            }
        });
    (message, fields)
}
