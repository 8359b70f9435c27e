//! Tracing setup. The terminal belongs to the UI, so events go to a file.
use crate::config::env_bool;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub fn log_path() -> PathBuf {
    std::env::var("SURVEY_TUI_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("survey-tui.log"))
}

fn filter() -> EnvFilter {
    std::env::var("SURVEY_TUI_LOG")
        .ok()
        .and_then(|s| EnvFilter::try_new(s).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

pub fn init() -> Result<PathBuf> {
    let path = log_path();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {path:?}"))?;
    let writer = Mutex::new(file);
    let registry = tracing_subscriber::registry().with(filter());
    let installed = if env_bool("SURVEY_TUI_LOG_JSON", false) {
        registry
            .with(fmt::layer().json().with_writer(writer).with_ansi(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .try_init()
    };
    // a second init (tests, embedding) keeps the first subscriber
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(path)
}
