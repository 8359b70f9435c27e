//! Resolution of `panel.<field>` references relative to a field instance.
use crate::engine::choices::display;
use crate::engine::survey_model::JsonMap;
use crate::engine::template::panel_field;
use serde_json::Value as JsonValue;
use tracing::debug;

/// A node on the path from a field up to the survey root.
/// Every accessor is optional; renderers expose whatever they have.
pub trait AncestorNode {
    fn data(&self) -> Option<&JsonMap> {
        None
    }
    fn value(&self) -> Option<&JsonValue> {
        None
    }
    fn question_value(&self, name: &str) -> Option<&JsonValue> {
        let _ = name;
        None
    }
}

/// What a rendering engine knows about where a field instance sits.
pub trait ElementScope {
    /// Value bag of the nearest enclosing dynamic-panel instance.
    fn panel_instance(&self) -> Option<&JsonMap>;
    /// Explicit parent-panel back-reference.
    fn parent_panel(&self) -> Option<&dyn AncestorNode> {
        None
    }
    /// Explicit `panel` property on the field.
    fn panel(&self) -> Option<&dyn AncestorNode> {
        None
    }
    /// Ancestors, nearest first.
    fn ancestors(&self) -> Vec<&dyn AncestorNode> {
        Vec::new()
    }
    /// Whole form value, keyed by top-level name.
    fn form_data(&self) -> &JsonMap;
}

fn present(v: Option<&JsonValue>) -> Option<&JsonValue> {
    v.filter(|v| match v {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.is_empty(),
        _ => true,
    })
}

fn read_node<'a>(node: &'a dyn AncestorNode, name: &str) -> Option<&'a JsonValue> {
    present(node.data().and_then(|d| d.get(name)))
        .or_else(|| present(node.value().and_then(|v| v.get(name))))
        .or_else(|| present(node.question_value(name)))
}

/// Turn a located candidate into URL text. Compound values must expose a usable scalar.
pub(crate) fn scalar_text(candidate: &JsonValue, name: &str) -> Option<String> {
    match candidate {
        JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
            Some(display(candidate)).filter(|s| !s.is_empty())
        }
        JsonValue::Object(obj) => ["value", "key", "id", "code", name]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find(|v| matches!(v, JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_)))
            .map(display)
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn scan_repeating_groups<'a>(form: &'a JsonMap, name: &str) -> Option<&'a JsonValue> {
    let mut hits = form
        .iter()
        .filter_map(|(group, v)| v.as_array().map(|arr| (group, arr)))
        .flat_map(|(group, arr)| {
            arr.iter()
                .filter_map(|inst| present(inst.as_object()?.get(name)))
                .map(move |v| (group, v))
        });
    let (group, first) = hits.next()?;
    let others = hits.count();
    if others > 0 {
        debug!(
            field = name,
            group = group.as_str(),
            others,
            "panel reference matched several instances; using the first"
        );
    }
    Some(first)
}

/// Locate the value a `panel.<name>` reference points at, as seen from `scope`.
///
/// Sources are tried nearest first: the enclosing dynamic-panel instance, the parent
/// panel, the field's panel property, the generic ancestor chain, then a scan of
/// every top-level repeating group (first instance wins). A bare `name` is accepted too.
pub fn locate(field_ref: &str, scope: &dyn ElementScope) -> Option<String> {
    let name = panel_field(field_ref).unwrap_or(field_ref);
    let candidate = present(scope.panel_instance().and_then(|bag| bag.get(name)))
        .or_else(|| scope.parent_panel().and_then(|p| read_node(p, name)))
        .or_else(|| scope.panel().and_then(|p| read_node(p, name)))
        .or_else(|| {
            scope
                .ancestors()
                .into_iter()
                .find_map(|a| read_node(a, name))
        })
        .or_else(|| scan_repeating_groups(scope.form_data(), name))?;
    scalar_text(candidate, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: JsonValue) -> JsonMap {
        v.as_object().cloned().unwrap_or_default()
    }

    struct Node {
        data: Option<JsonMap>,
        value: Option<JsonValue>,
        questions: Vec<(String, JsonValue)>,
    }

    impl Node {
        fn empty() -> Self {
            Node {
                data: None,
                value: None,
                questions: Vec::new(),
            }
        }
    }

    impl AncestorNode for Node {
        fn data(&self) -> Option<&JsonMap> {
            self.data.as_ref()
        }
        fn value(&self) -> Option<&JsonValue> {
            self.value.as_ref()
        }
        fn question_value(&self, name: &str) -> Option<&JsonValue> {
            self.questions.iter().find(|(n, _)| n == name).map(|(_, v)| v)
        }
    }

    struct FakeScope {
        instance: Option<JsonMap>,
        parent: Option<Node>,
        panel: Option<Node>,
        ancestors: Vec<Node>,
        form: JsonMap,
    }

    impl Default for FakeScope {
        fn default() -> Self {
            FakeScope {
                instance: None,
                parent: None,
                panel: None,
                ancestors: Vec::new(),
                form: JsonMap::new(),
            }
        }
    }

    impl ElementScope for FakeScope {
        fn panel_instance(&self) -> Option<&JsonMap> {
            self.instance.as_ref()
        }
        fn parent_panel(&self) -> Option<&dyn AncestorNode> {
            self.parent.as_ref().map(|n| n as &dyn AncestorNode)
        }
        fn panel(&self) -> Option<&dyn AncestorNode> {
            self.panel.as_ref().map(|n| n as &dyn AncestorNode)
        }
        fn ancestors(&self) -> Vec<&dyn AncestorNode> {
            self.ancestors.iter().map(|n| n as &dyn AncestorNode).collect()
        }
        fn form_data(&self) -> &JsonMap {
            &self.form
        }
    }

    #[test]
    fn enclosing_instance_wins() {
        let scope = FakeScope {
            instance: Some(map(json!({"country": "fr"}))),
            parent: Some(Node {
                data: Some(map(json!({"country": "de"}))),
                ..Node::empty()
            }),
            form: map(json!({"trips": [{"country": "es"}]})),
            ..Default::default()
        };
        assert_eq!(locate("panel.country", &scope).as_deref(), Some("fr"));
    }

    #[test]
    fn falls_through_parent_then_panel_then_ancestors() {
        let mut scope = FakeScope {
            parent: Some(Node {
                value: Some(json!({"country": "de"})),
                ..Node::empty()
            }),
            panel: Some(Node {
                data: Some(map(json!({"country": "it"}))),
                ..Node::empty()
            }),
            ancestors: vec![
                Node::empty(),
                Node {
                    questions: vec![("country".into(), json!("pt"))],
                    ..Node::empty()
                },
            ],
            ..Default::default()
        };
        assert_eq!(locate("panel.country", &scope).as_deref(), Some("de"));
        scope.parent = None;
        assert_eq!(locate("panel.country", &scope).as_deref(), Some("it"));
        scope.panel = None;
        assert_eq!(locate("panel.country", &scope).as_deref(), Some("pt"));
    }

    #[test]
    fn last_resort_scan_takes_first_matching_instance() {
        let scope = FakeScope {
            form: map(json!({
                "name": "x",
                "trips": [{"city": "a"}, {"country": "fr"}, {"country": "de"}]
            })),
            ..Default::default()
        };
        assert_eq!(locate("panel.country", &scope).as_deref(), Some("fr"));
        assert_eq!(locate("panel.missing", &scope), None);
    }

    #[test]
    fn compound_values_extract_a_scalar_or_give_up() {
        let with = |v: JsonValue| FakeScope {
            instance: Some(map(json!({ "country": v }))),
            ..Default::default()
        };
        assert_eq!(
            locate("panel.country", &with(json!({"value": "fr", "text": "France"}))).as_deref(),
            Some("fr")
        );
        assert_eq!(
            locate("panel.country", &with(json!({"code": 33}))).as_deref(),
            Some("33")
        );
        assert_eq!(
            locate("panel.country", &with(json!({"country": "nl"}))).as_deref(),
            Some("nl")
        );
        assert_eq!(locate("panel.country", &with(json!({"label": "?"}))), None);
        assert_eq!(locate("panel.country", &with(json!(["fr"]))), None);
    }

    #[test]
    fn empty_strings_do_not_stop_the_search() {
        let scope = FakeScope {
            instance: Some(map(json!({"country": ""}))),
            form: map(json!({"trips": [{"country": "fr"}]})),
            ..Default::default()
        };
        assert_eq!(locate("panel.country", &scope).as_deref(), Some("fr"));
    }
}
