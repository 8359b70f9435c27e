use crate::engine::controller::{ControllerSettings, MAX_PAGE_SIZE};
use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "survey-tui.yaml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub mock_mode: bool,
    pub mock_dir: Option<PathBuf>,
    pub auth: AuthSettings,
    pub lookup: LookupSettings,
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    pub token: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LookupSettings {
    pub debounce_ms: u64,
    pub min_search_len: usize,
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            mock_mode: false,
            mock_dir: None,
            auth: AuthSettings::default(),
            lookup: LookupSettings::default(),
            export_dir: None,
        }
    }
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            min_search_len: 2,
            page_size: 20,
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "on" => Some(true),
        "0" | "false" | "FALSE" | "False" | "no" | "NO" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

impl Settings {
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| {
            let (line, column) = e
                .location()
                .map(|l| (l.line(), l.column()))
                .unwrap_or((0, 0));
            ConfigError::Parse {
                path: path.to_path_buf(),
                line,
                column,
                message: e.to_string(),
            }
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(path, &text)
    }

    /// Apply overrides from a variable source; `get` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("SURVEY_TUI_API_URL").or_else(|| get("VITE_API_URL")) {
            if !url.trim().is_empty() {
                self.api_url = url.trim().to_string();
            }
        }
        if let Some(mock) = get("SURVEY_TUI_MOCK").as_deref().and_then(parse_bool) {
            self.mock_mode = mock;
        }
        if let Some(dir) = get("SURVEY_TUI_MOCK_DIR") {
            self.mock_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = get("SURVEY_TUI_TOKEN") {
            self.auth.token = Some(token);
        }
        if let Some(tenant) = get("SURVEY_TUI_TENANT") {
            self.auth.tenant_id = Some(tenant);
        }
        if let Some(ms) = get("SURVEY_TUI_DEBOUNCE_MS").and_then(|s| s.trim().parse().ok()) {
            self.lookup.debounce_ms = ms;
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            api_url: self.api_url.clone(),
            mock_mode: self.mock_mode,
            debounce: Duration::from_millis(self.lookup.debounce_ms),
            min_search_len: self.lookup.min_search_len,
            page_size: self.lookup.page_size.clamp(1, MAX_PAGE_SIZE),
            token: self.auth.token.clone(),
            tenant_id: self.auth.tenant_id.clone(),
        }
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Candidate settings files in lookup order.
pub fn candidate_paths(
    config_dir: Option<&Path>,
    cwd: &Path,
    home: Option<&Path>,
) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(dir) = config_dir {
        out.push(dir.join(CONFIG_FILE));
    }
    out.push(cwd.join(CONFIG_FILE));
    out.push(cwd.join(".tui").join(CONFIG_FILE));
    let mut cur = cwd;
    while let Some(parent) = cur.parent() {
        out.push(parent.join(".tui").join(CONFIG_FILE));
        cur = parent;
    }
    if let Some(home) = home {
        let p = home.join(".tui").join(CONFIG_FILE);
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}

/// Discover and read settings, then apply environment overrides. No file means defaults.
pub fn load() -> Result<(Settings, Option<PathBuf>)> {
    let config_dir = std::env::var("SURVEY_TUI_CONFIG_DIR").ok().map(PathBuf::from);
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let home = std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())
        .map(PathBuf::from);
    if let Some(dir) = &config_dir {
        // an explicit directory must hold the file
        let p = dir.join(CONFIG_FILE);
        if !p.exists() {
            anyhow::bail!("SURVEY_TUI_CONFIG_DIR is set but {p:?} does not exist");
        }
    }
    let found = candidate_paths(config_dir.as_deref(), &cwd, home.as_deref())
        .into_iter()
        .find(|p| p.is_file());
    let mut settings = match &found {
        Some(p) => Settings::from_file(p).with_context(|| format!("loading settings from {p:?}"))?,
        None => Settings::default(),
    };
    settings.apply_overrides(|k| std::env::var(k).ok());
    Ok((settings, found))
}
