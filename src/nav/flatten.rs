use crate::model::SurveyTarget;
use crate::nav::keys::{customer_key, namespace_key, survey_key};
use crate::ui::{AppState, FlatNode};

/// The picker tree as visible rows. Children appear only under expanded nodes
/// whose listing has arrived.
pub fn flatten_nodes(state: &AppState) -> Vec<FlatNode> {
    let mut out = Vec::new();
    for customer in &state.customers {
        let ckey = customer_key(&customer.hex_id);
        out.push(FlatNode::Customer {
            key: ckey.clone(),
            customer: customer.clone(),
        });
        if !state.expanded.contains(&ckey) {
            continue;
        }
        let Some(namespaces) = state.namespaces.get(&ckey) else {
            continue;
        };
        if namespaces.is_empty() {
            out.push(FlatNode::Empty {
                depth: 1,
                text: "(no namespaces)".into(),
            });
        }
        for ns in namespaces {
            let nkey = namespace_key(&customer.hex_id, &ns.slug);
            out.push(FlatNode::Namespace {
                key: nkey.clone(),
                hex: customer.hex_id.clone(),
                customer_name: customer.name.clone(),
                namespace: ns.clone(),
            });
            if !state.expanded.contains(&nkey) {
                continue;
            }
            let Some(surveys) = state.surveys.get(&nkey) else {
                continue;
            };
            if surveys.is_empty() {
                out.push(FlatNode::Empty {
                    depth: 2,
                    text: "(no surveys)".into(),
                });
            }
            for s in surveys {
                let target = SurveyTarget {
                    customer_hex: customer.hex_id.clone(),
                    customer_name: customer.name.clone(),
                    namespace: ns.slug.clone(),
                    survey_id: s.survey_id.clone(),
                    survey_name: s.name.clone(),
                };
                out.push(FlatNode::Survey {
                    key: survey_key(&target),
                    target,
                    summary: s.clone(),
                });
            }
        }
    }
    out
}
