//! In-memory form model for one survey session.
//!
//! Values are only written through [`SurveyModel::set_value`] and the panel
//! instance operations, each of which records a [`ValueChange`] the form drains
//! to drive dependent lookups.
use crate::engine::panel_locator::ElementScope;
use crate::model::{Element, QuestionKind, SurveyDefinition};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

pub type JsonMap = Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelSlot {
    pub panel: String,
    pub index: usize,
}

/// Identifies one field instance: a top-level question, or a template question
/// inside a given dynamic panel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle {
    pub name: String,
    pub panel: Option<PanelSlot>,
}

impl ElementHandle {
    pub fn top(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            panel: None,
        }
    }

    pub fn in_panel(panel: impl Into<String>, index: usize, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            panel: Some(PanelSlot {
                panel: panel.into(),
                index,
            }),
        }
    }

    pub fn belongs_to_panel(&self, panel: &str) -> bool {
        self.panel.as_ref().is_some_and(|s| s.panel == panel)
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.panel {
            Some(slot) => write!(f, "{}[{}].{}", slot.panel, slot.index, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ElementHandle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(open) = s.find('[') else {
            return Ok(Self::top(s));
        };
        let close = s[open..]
            .find("].")
            .map(|i| open + i)
            .ok_or_else(|| format!("malformed element handle: {s}"))?;
        let index = s[open + 1..close]
            .parse::<usize>()
            .map_err(|e| format!("malformed element handle {s}: {e}"))?;
        Ok(Self::in_panel(&s[..open], index, &s[close + 2..]))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub handle: ElementHandle,
    pub old: Option<JsonValue>,
    pub new: Option<JsonValue>,
}

pub struct SurveyModel {
    definition: SurveyDefinition,
    values: JsonMap,
    changes: Vec<ValueChange>,
}

/// Null, blank strings and empty arrays count as "no answer" and are not stored.
pub fn is_empty_value(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn find_in<'a>(els: &'a [Element], name: &str) -> Option<&'a Element> {
    for el in els {
        if el.name == name && el.question_kind() != QuestionKind::Panel {
            return Some(el);
        }
        if el.question_kind() == QuestionKind::Panel {
            if let Some(hit) = find_in(&el.elements, name) {
                return Some(hit);
            }
        }
    }
    None
}

fn collect_dynamic<'a>(els: &'a [Element], out: &mut Vec<&'a Element>) {
    for el in els {
        match el.question_kind() {
            QuestionKind::DynamicPanel => out.push(el),
            QuestionKind::Panel => collect_dynamic(&el.elements, out),
            _ => {}
        }
    }
}

fn initial_values(definition: &SurveyDefinition) -> JsonMap {
    let mut panels = Vec::new();
    for el in definition.top_elements() {
        collect_dynamic(std::slice::from_ref(el), &mut panels);
    }
    let mut values = JsonMap::new();
    for p in panels {
        let n = p.panel_count.unwrap_or(0);
        if n > 0 {
            let instances = (0..n).map(|_| JsonValue::Object(JsonMap::new())).collect();
            values.insert(p.name.clone(), JsonValue::Array(instances));
        }
    }
    values
}

impl SurveyModel {
    pub fn new(definition: SurveyDefinition) -> Self {
        let values = initial_values(&definition);
        Self {
            definition,
            values,
            changes: Vec::new(),
        }
    }

    pub fn definition(&self) -> &SurveyDefinition {
        &self.definition
    }

    /// Dynamic panels declared in the survey, in definition order.
    pub fn dynamic_panels(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        for el in self.definition.top_elements() {
            collect_dynamic(std::slice::from_ref(el), &mut out);
        }
        out
    }

    /// Element backing a handle. Panel handles resolve against their panel's template.
    pub fn element(&self, handle: &ElementHandle) -> Option<&Element> {
        match &handle.panel {
            None => {
                let tops: Vec<&Element> = self.definition.top_elements().collect();
                tops.iter().find_map(|el| find_in(std::slice::from_ref(*el), &handle.name))
            }
            Some(slot) => {
                let panel = self
                    .dynamic_panels()
                    .into_iter()
                    .find(|p| p.name == slot.panel)?;
                find_in(&panel.template_elements, &handle.name)
            }
        }
    }

    pub fn value(&self, handle: &ElementHandle) -> Option<&JsonValue> {
        match &handle.panel {
            None => self.values.get(&handle.name),
            Some(slot) => self
                .panel_instance(&slot.panel, slot.index)?
                .get(&handle.name),
        }
    }

    pub fn top_value(&self, name: &str) -> Option<&JsonValue> {
        self.values.get(name)
    }

    pub fn panel_instance(&self, panel: &str, index: usize) -> Option<&JsonMap> {
        self.values.get(panel)?.as_array()?.get(index)?.as_object()
    }

    pub fn panel_len(&self, panel: &str) -> usize {
        self.values
            .get(panel)
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0)
    }

    /// Write a value through the model. Empty values remove the answer.
    /// Returns `true` and records a change only when the stored value differs.
    pub fn set_value(&mut self, handle: &ElementHandle, value: Option<JsonValue>) -> bool {
        let new = value.filter(|v| !is_empty_value(v));
        let old = self.value(handle).cloned();
        if old == new {
            return false;
        }
        let bag = match &handle.panel {
            None => &mut self.values,
            Some(slot) => {
                let Some(bag) = self
                    .values
                    .get_mut(&slot.panel)
                    .and_then(|v| v.as_array_mut())
                    .and_then(|a| a.get_mut(slot.index))
                    .and_then(|v| v.as_object_mut())
                else {
                    return false;
                };
                bag
            }
        };
        match &new {
            Some(v) => {
                bag.insert(handle.name.clone(), v.clone());
            }
            None => {
                bag.remove(&handle.name);
            }
        }
        self.changes.push(ValueChange {
            handle: handle.clone(),
            old,
            new,
        });
        true
    }

    fn panel_changed(&mut self, panel: &str, old: Option<JsonValue>) {
        let new = self.values.get(panel).cloned();
        self.changes.push(ValueChange {
            handle: ElementHandle::top(panel),
            old,
            new,
        });
    }

    /// Append an empty instance to a dynamic panel and return its index.
    pub fn add_panel_instance(&mut self, panel: &str) -> usize {
        let old = self.values.get(panel).cloned();
        let entry = self
            .values
            .entry(panel.to_string())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        if !entry.is_array() {
            *entry = JsonValue::Array(Vec::new());
        }
        let mut index = 0;
        if let Some(arr) = entry.as_array_mut() {
            arr.push(JsonValue::Object(JsonMap::new()));
            index = arr.len() - 1;
        }
        self.panel_changed(panel, old);
        index
    }

    pub fn remove_panel_instance(&mut self, panel: &str, index: usize) -> bool {
        let old = self.values.get(panel).cloned();
        let Some(arr) = self.values.get_mut(panel).and_then(|v| v.as_array_mut()) else {
            return false;
        };
        if index >= arr.len() {
            return false;
        }
        arr.remove(index);
        if arr.is_empty() {
            self.values.remove(panel);
        }
        self.panel_changed(panel, old);
        true
    }

    /// Reset every answer to the initial state, recording a change per top-level key.
    pub fn clear(&mut self) {
        let fresh = initial_values(&self.definition);
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        for k in fresh.keys() {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        let old_values = std::mem::replace(&mut self.values, fresh);
        for k in keys {
            let old = old_values.get(&k).cloned();
            let new = self.values.get(&k).cloned();
            if old != new {
                self.changes.push(ValueChange {
                    handle: ElementHandle::top(k),
                    old,
                    new,
                });
            }
        }
    }

    /// Snapshot of the answers, as submitted.
    pub fn data(&self) -> JsonValue {
        JsonValue::Object(self.values.clone())
    }

    pub fn take_changes(&mut self) -> Vec<ValueChange> {
        std::mem::take(&mut self.changes)
    }

    /// Every answerable field instance in display order.
    pub fn handles(&self) -> Vec<ElementHandle> {
        fn walk(model: &SurveyModel, els: &[Element], out: &mut Vec<ElementHandle>) {
            for el in els {
                match el.question_kind() {
                    QuestionKind::Panel => walk(model, &el.elements, out),
                    QuestionKind::DynamicPanel => {
                        let mut names = Vec::new();
                        template_names(&el.template_elements, &mut names);
                        for i in 0..model.panel_len(&el.name) {
                            for n in &names {
                                out.push(ElementHandle::in_panel(&el.name, i, n));
                            }
                        }
                    }
                    QuestionKind::Display => {}
                    _ => out.push(ElementHandle::top(&el.name)),
                }
            }
        }
        fn template_names(els: &[Element], out: &mut Vec<String>) {
            for el in els {
                match el.question_kind() {
                    QuestionKind::Panel => template_names(&el.elements, out),
                    // one level of dynamic nesting
                    QuestionKind::DynamicPanel | QuestionKind::Display => {}
                    _ => out.push(el.name.clone()),
                }
            }
        }
        let mut out = Vec::new();
        let tops: Vec<&Element> = self.definition.top_elements().collect();
        for el in tops {
            walk(self, std::slice::from_ref(el), &mut out);
        }
        out
    }

    pub fn scope<'a>(&'a self, handle: &'a ElementHandle) -> ModelScope<'a> {
        ModelScope {
            model: self,
            handle,
        }
    }
}

/// Introspection view of one field instance, used for placeholder resolution.
pub struct ModelScope<'a> {
    model: &'a SurveyModel,
    handle: &'a ElementHandle,
}

impl ElementScope for ModelScope<'_> {
    fn panel_instance(&self) -> Option<&JsonMap> {
        let slot = self.handle.panel.as_ref()?;
        self.model.panel_instance(&slot.panel, slot.index)
    }

    fn form_data(&self) -> &JsonMap {
        &self.model.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn travel_model() -> SurveyModel {
        let def = SurveyDefinition::parse(&json!({
            "pages": [{"elements": [
                {"type": "text", "name": "traveller"},
                {"type": "dropdown", "name": "country"},
                {"type": "paneldynamic", "name": "visited_countries", "panelCount": 2,
                 "templateElements": [
                    {"type": "dropdown", "name": "country"},
                    {"type": "text", "name": "favorite_city"}
                 ]}
            ]}]
        }))
        .unwrap();
        SurveyModel::new(def)
    }

    #[test]
    fn handles_round_trip_through_display() {
        let h = ElementHandle::in_panel("visited_countries", 1, "country");
        assert_eq!(h.to_string(), "visited_countries[1].country");
        assert_eq!(h.to_string().parse::<ElementHandle>().unwrap(), h);
        assert_eq!("email".parse::<ElementHandle>().unwrap(), ElementHandle::top("email"));
        assert!("p[x].a".parse::<ElementHandle>().is_err());
    }

    #[test]
    fn panel_count_seeds_instances() {
        let m = travel_model();
        assert_eq!(m.panel_len("visited_countries"), 2);
        assert_eq!(
            m.handles(),
            vec![
                ElementHandle::top("traveller"),
                ElementHandle::top("country"),
                ElementHandle::in_panel("visited_countries", 0, "country"),
                ElementHandle::in_panel("visited_countries", 0, "favorite_city"),
                ElementHandle::in_panel("visited_countries", 1, "country"),
                ElementHandle::in_panel("visited_countries", 1, "favorite_city"),
            ]
        );
    }

    #[test]
    fn set_value_records_changes_only_on_difference() {
        let mut m = travel_model();
        let h = ElementHandle::top("traveller");
        assert!(m.set_value(&h, Some(json!("Ana"))));
        assert!(!m.set_value(&h, Some(json!("Ana"))));
        assert!(m.set_value(&h, Some(json!(""))));
        assert_eq!(m.value(&h), None);
        let changes = m.take_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].old, Some(json!("Ana")));
        assert_eq!(changes[1].new, None);
        assert!(m.take_changes().is_empty());
    }

    #[test]
    fn panel_values_live_in_their_instance() {
        let mut m = travel_model();
        let h1 = ElementHandle::in_panel("visited_countries", 1, "country");
        m.set_value(&h1, Some(json!("fr")));
        assert_eq!(
            m.data(),
            json!({"visited_countries": [{}, {"country": "fr"}]})
        );
        assert_eq!(m.value(&ElementHandle::top("country")), None);
        let missing = ElementHandle::in_panel("visited_countries", 5, "country");
        assert!(!m.set_value(&missing, Some(json!("x"))));
    }

    #[test]
    fn add_and_remove_instances() {
        let mut m = travel_model();
        assert_eq!(m.add_panel_instance("visited_countries"), 2);
        assert!(m.remove_panel_instance("visited_countries", 0));
        assert!(!m.remove_panel_instance("visited_countries", 9));
        assert_eq!(m.panel_len("visited_countries"), 2);
        let changes = m.take_changes();
        assert!(changes
            .iter()
            .all(|c| c.handle == ElementHandle::top("visited_countries")));
    }

    #[test]
    fn clear_restores_initial_state() {
        let mut m = travel_model();
        m.set_value(&ElementHandle::top("traveller"), Some(json!("Ana")));
        m.add_panel_instance("visited_countries");
        m.take_changes();
        m.clear();
        assert_eq!(m.data(), json!({"visited_countries": [{}, {}]}));
        let names: Vec<String> = m.take_changes().iter().map(|c| c.handle.to_string()).collect();
        assert_eq!(names, vec!["visited_countries", "traveller"]);
    }

    #[test]
    fn element_lookup_is_scoped_to_the_panel_template() {
        let m = travel_model();
        let top = m.element(&ElementHandle::top("country")).unwrap();
        assert_eq!(top.name, "country");
        let inner = m
            .element(&ElementHandle::in_panel("visited_countries", 0, "favorite_city"))
            .unwrap();
        assert_eq!(inner.name, "favorite_city");
        assert!(m.element(&ElementHandle::top("favorite_city")).is_none());
    }
}
