//! Cascading choice resolution: builds lookup requests from templated sources,
//! debounces them per field instance and applies only the latest dispatched result.
use crate::engine::choices::{normalize_payload, Choice};
use crate::engine::debounce::Debouncer;
use crate::engine::panel_locator::{locate, scalar_text, ElementScope};
use crate::engine::survey_model::ElementHandle;
use crate::engine::template::{self, is_panel_ref, panel_field};
use crate::model::ChoicesSource;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub api_url: String,
    pub mock_mode: bool,
    pub debounce: Duration,
    pub min_search_len: usize,
    pub page_size: usize,
    pub token: Option<String>,
    pub tenant_id: Option<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            mock_mode: false,
            debounce: Duration::from_millis(300),
            min_search_len: 2,
            page_size: 20,
            token: None,
            tenant_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTrigger {
    Initial,
    Search,
    ParentChanged,
    Manual,
}

impl LoadTrigger {
    fn debounced(self) -> bool {
        matches!(self, LoadTrigger::Search | LoadTrigger::ParentChanged)
    }
}

pub struct ChoiceLoadContext<'a> {
    pub handle: &'a ElementHandle,
    pub source: &'a ChoicesSource,
    pub search: Option<&'a str>,
    pub typeahead: bool,
    pub trigger: LoadTrigger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub auth_required: bool,
    pub source: ChoicesSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ready(ResolvedRequest),
    /// Placeholders that had no value yet; nothing should be fetched.
    Unresolved(Vec<String>),
}

/// Extension point a renderer calls before loading choices from a remote source.
pub trait RemoteChoiceHook {
    fn on_before_remote_choice_load(
        &self,
        ctx: &ChoiceLoadContext<'_>,
        scope: &dyn ElementScope,
    ) -> Resolution;
}

fn tenant_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https?://[^/]+)?/[0-9a-fA-F]{32}/[^/?#]+/")
            .expect("tenant path pattern is valid")
    })
}

/// Tenant-scoped URLs carry the customer hex and namespace in the path and
/// must not receive global auth headers.
pub fn is_tenant_scoped(url: &str) -> bool {
    tenant_path_re().is_match(url)
}

/// Prefix a relative URL with the API origin. Absolute URLs pass through, and so do
/// `/mock/` paths in mock mode.
pub fn prefix_api_url(url: &str, api_url: &str, mock_mode: bool) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if mock_mode && url.starts_with("/mock/") {
        return url.to_string();
    }
    let base = api_url.trim_end_matches('/');
    if url.starts_with('/') {
        format!("{base}{url}")
    } else {
        format!("{base}/{url}")
    }
}

fn path_of(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .map(|rest| rest.find('/').map(|i| &rest[i..]).unwrap_or("/"))
        .unwrap_or(url)
}

// Path the tenant check runs on: the API origin, base path included, is stripped first.
fn request_path<'a>(url: &'a str, api_url: &str) -> &'a str {
    url.strip_prefix(api_url.trim_end_matches('/'))
        .filter(|rest| rest.starts_with('/'))
        .unwrap_or_else(|| path_of(url))
}

/// Whether `url` takes the global bearer and tenant headers.
pub fn requires_auth(url: &str, api_url: &str) -> bool {
    !is_tenant_scoped(request_path(url, api_url))
}

/// Global auth headers for `url`. Tenant-scoped paths get none.
pub fn auth_headers_for(
    url: &str,
    api_url: &str,
    token: Option<&str>,
    tenant_id: Option<&str>,
) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if !requires_auth(url, api_url) {
        return headers;
    }
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));
    }
    if let Some(tenant) = tenant_id.filter(|t| !t.is_empty()) {
        headers.push(("X-Tenant-ID".to_string(), tenant.to_string()));
    }
    headers
}

/// Request builder used by the terminal form.
pub struct RequestBuilder {
    pub settings: ControllerSettings,
}

impl RequestBuilder {
    fn lookup(&self, name: &str, scope: &dyn ElementScope) -> Option<String> {
        if is_panel_ref(name) {
            return locate(name, scope);
        }
        // top-level field first, then a sibling inside the same panel instance
        scope
            .form_data()
            .get(name)
            .and_then(|v| scalar_text(v, name))
            .or_else(|| {
                let v = scope.panel_instance()?.get(name)?;
                scalar_text(v, name)
            })
    }
}

impl RemoteChoiceHook for RequestBuilder {
    fn on_before_remote_choice_load(
        &self,
        ctx: &ChoiceLoadContext<'_>,
        scope: &dyn ElementScope,
    ) -> Resolution {
        let resolved = template::resolve(&ctx.source.url, |name| self.lookup(name, scope));
        let missing = template::unresolved_placeholders(&resolved);
        if !missing.is_empty() {
            return Resolution::Unresolved(missing);
        }
        let mut url = prefix_api_url(&resolved, &self.settings.api_url, self.settings.mock_mode);
        // decided on the resolved URL: the tenant hex is often a placeholder itself
        let auth_required = requires_auth(&url, &self.settings.api_url);
        let headers = auth_headers_for(
            &url,
            &self.settings.api_url,
            self.settings.token.as_deref(),
            self.settings.tenant_id.as_deref(),
        );
        if ctx.typeahead {
            if let Some(search) = ctx.search.map(str::trim) {
                if search.chars().count() >= self.settings.min_search_len {
                    let size = self.settings.page_size.clamp(1, MAX_PAGE_SIZE);
                    let sep = if url.contains('?') { '&' } else { '?' };
                    url.push_str(&format!(
                        "{sep}search={}&size={size}",
                        urlencoding::encode(search)
                    ));
                }
            }
        }
        debug!(field = %ctx.handle, trigger = ?ctx.trigger, %url, auth_required, "lookup request built");
        Resolution::Ready(ResolvedRequest {
            url,
            headers,
            auth_required,
            source: ctx.source.clone(),
        })
    }
}

/// One remote lookup on its way out: created when a search or parent change
/// schedules it, superseded by a newer one for the same field instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLookup {
    pub request_id: u64,
    pub handle: ElementHandle,
    pub request: ResolvedRequest,
}

pub struct ChoiceSlot {
    pub source: ChoicesSource,
    pub typeahead: bool,
    pub choices: Vec<Choice>,
    pub loaded: bool,
    pub last_error: Option<String>,
    pub last_url: Option<String>,
    dependencies: Vec<String>,
    active: Option<u64>,
}

impl ChoiceSlot {
    fn new(source: ChoicesSource, typeahead: bool) -> Self {
        let dependencies = template::placeholders(&source.url);
        Self {
            source,
            typeahead,
            choices: Vec::new(),
            loaded: false,
            last_error: None,
            last_url: None,
            dependencies,
            active: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.active.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Scheduled(u64),
    Skipped(Vec<String>),
    NotRegistered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(usize),
    Stale,
    Failed(String),
}

pub struct ChoiceController {
    hook: Box<dyn RemoteChoiceHook>,
    debounce: Duration,
    slots: HashMap<ElementHandle, ChoiceSlot>,
    debouncer: Debouncer<PendingLookup>,
    next_request_id: u64,
}

impl ChoiceController {
    pub fn new(settings: ControllerSettings) -> Self {
        let debounce = settings.debounce;
        Self::with_hook(Box::new(RequestBuilder { settings }), debounce)
    }

    pub fn with_hook(hook: Box<dyn RemoteChoiceHook>, debounce: Duration) -> Self {
        Self {
            hook,
            debounce,
            slots: HashMap::new(),
            debouncer: Debouncer::new(),
            next_request_id: 1,
        }
    }

    pub fn register(&mut self, handle: ElementHandle, source: ChoicesSource, typeahead: bool) {
        self.slots
            .entry(handle)
            .or_insert_with(|| ChoiceSlot::new(source, typeahead));
    }

    pub fn is_registered(&self, handle: &ElementHandle) -> bool {
        self.slots.contains_key(handle)
    }

    pub fn slot(&self, handle: &ElementHandle) -> Option<&ChoiceSlot> {
        self.slots.get(handle)
    }

    pub fn choices(&self, handle: &ElementHandle) -> &[Choice] {
        self.slots
            .get(handle)
            .map(|s| s.choices.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_loading(&self, handle: &ElementHandle) -> bool {
        self.debouncer.is_pending(&handle.to_string())
            || self.slots.get(handle).is_some_and(|s| s.in_flight())
    }

    /// Build and schedule a lookup for `handle`. Searches and parent changes are
    /// debounced; initial and manual loads fire on the next poll.
    pub fn request(
        &mut self,
        handle: &ElementHandle,
        trigger: LoadTrigger,
        search: Option<&str>,
        scope: &dyn ElementScope,
        now: Instant,
    ) -> RequestOutcome {
        let Some(slot) = self.slots.get_mut(handle) else {
            return RequestOutcome::NotRegistered;
        };
        let ctx = ChoiceLoadContext {
            handle,
            source: &slot.source,
            search,
            typeahead: slot.typeahead,
            trigger,
        };
        let key = handle.to_string();
        match self.hook.on_before_remote_choice_load(&ctx, scope) {
            Resolution::Unresolved(missing) => {
                debug!(field = %handle, ?missing, "lookup skipped: unresolved placeholders");
                self.debouncer.cancel(&key);
                slot.active = None;
                slot.choices.clear();
                slot.loaded = false;
                RequestOutcome::Skipped(missing)
            }
            Resolution::Ready(request) => {
                let request_id = self.next_request_id;
                self.next_request_id += 1;
                let delay = if trigger.debounced() {
                    self.debounce
                } else {
                    Duration::ZERO
                };
                // results of anything dispatched earlier are stale from now on
                slot.active = Some(request_id);
                let pending = PendingLookup {
                    request_id,
                    handle: handle.clone(),
                    request,
                };
                if let Some(old) = self.debouncer.schedule_at(key, now, delay, pending) {
                    debug!(field = %handle, superseded = old.request_id, "lookup superseded");
                }
                RequestOutcome::Scheduled(request_id)
            }
        }
    }

    /// Lookups whose debounce expired. A lookup is already the active request for
    /// its field from the moment it was scheduled.
    pub fn due(&mut self, now: Instant) -> Vec<PendingLookup> {
        let mut out = Vec::new();
        for (_, lookup) in self.debouncer.due(now) {
            let Some(slot) = self.slots.get_mut(&lookup.handle) else {
                continue;
            };
            slot.active = Some(lookup.request_id);
            slot.last_url = Some(lookup.request.url.clone());
            debug!(
                field = %lookup.handle,
                request_id = lookup.request_id,
                url = %lookup.request.url,
                "lookup dispatched"
            );
            out.push(lookup);
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// Apply a lookup result. Only the most recently dispatched request for a field
    /// may change its choices; failures keep the previous list.
    pub fn apply(
        &mut self,
        handle: &ElementHandle,
        request_id: u64,
        outcome: Result<JsonValue, String>,
    ) -> ApplyOutcome {
        let Some(slot) = self.slots.get_mut(handle) else {
            return ApplyOutcome::Stale;
        };
        if slot.active != Some(request_id) {
            debug!(field = %handle, request_id, active = ?slot.active, "stale lookup result dropped");
            return ApplyOutcome::Stale;
        }
        slot.active = None;
        match outcome {
            Ok(payload) => {
                slot.choices = normalize_payload(&payload, &slot.source);
                slot.loaded = true;
                slot.last_error = None;
                ApplyOutcome::Applied(slot.choices.len())
            }
            Err(e) => {
                warn!(field = %handle, request_id, error = %e, "lookup failed; keeping previous choices");
                slot.last_error = Some(e.clone());
                ApplyOutcome::Failed(e)
            }
        }
    }

    /// Registered fields whose source template references the changed field.
    pub fn dependents_of(&self, changed: &ElementHandle) -> Vec<ElementHandle> {
        let mut out: Vec<ElementHandle> = self
            .slots
            .iter()
            .filter(|(h, _)| *h != changed)
            .filter(|(h, slot)| {
                slot.dependencies.iter().any(|dep| match panel_field(dep) {
                    Some(field) => field == changed.name && changed.panel == h.panel,
                    None => {
                        *dep == changed.name
                            && (changed.panel.is_none() || changed.panel == h.panel)
                    }
                })
            })
            .map(|(h, _)| h.clone())
            .collect();
        out.sort();
        out
    }

    /// Tear down every field instance of a dynamic panel: timers, guards and choices.
    pub fn forget_panel(&mut self, panel: &str) {
        let prefix = format!("{panel}[");
        let dropped = self.debouncer.cancel_where(|k| k.starts_with(&prefix));
        self.slots.retain(|h, _| !h.belongs_to_panel(panel));
        if dropped > 0 {
            debug!(panel, dropped, "pending lookups cancelled");
        }
    }

    /// Cancel timers and invalidate in-flight requests; loaded choices stay.
    pub fn cancel_all(&mut self) {
        self.debouncer.clear();
        for slot in self.slots.values_mut() {
            slot.active = None;
        }
    }

    pub fn pending_count(&self) -> usize {
        self.debouncer.len()
    }

    pub fn handles(&self) -> Vec<ElementHandle> {
        let mut out: Vec<ElementHandle> = self.slots.keys().cloned().collect();
        out.sort();
        out
    }
}
