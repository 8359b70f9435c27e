//! URL template substitution for remote choice sources.
//!
//! Placeholders are `{name}` tokens where `name` is any run of characters other
//! than braces, so dotted references such as `{panel.country}` are a single token.
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"))
}

/// Substitute every `{name}` in `template` with the URL-encoded result of `lookup(name)`.
///
/// A placeholder whose lookup yields `None` or an empty string is left in place verbatim,
/// so one missing dependency never corrupts the rest of the URL. Callers inspect the
/// result with [`unresolved_placeholders`] to decide whether the request is ready.
pub fn resolve<F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match lookup(name) {
                Some(v) if !v.is_empty() => urlencoding::encode(&v).into_owned(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(template) {
        let name = caps[1].to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Placeholders still present after resolution.
pub fn unresolved_placeholders(url: &str) -> Vec<String> {
    placeholders(url)
}

/// True when the name is a `panel.<field>` reference.
pub fn is_panel_ref(name: &str) -> bool {
    panel_field(name).is_some()
}

/// Field part of a `panel.<field>` reference.
pub fn panel_field(name: &str) -> Option<&str> {
    name.strip_prefix("panel.").filter(|f| !f.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl FnMut(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn substitutes_all_resolved_placeholders() {
        let url = resolve("/{a}/{b}", lookup_from(&[("a", "x"), ("b", "y")]));
        assert_eq!(url, "/x/y");
    }

    #[test]
    fn unresolved_placeholder_is_preserved_verbatim() {
        let url = resolve("/{a}/{b}", lookup_from(&[("a", "x")]));
        assert_eq!(url, "/x/{b}");
        assert_eq!(unresolved_placeholders(&url), vec!["b".to_string()]);
    }

    #[test]
    fn empty_value_counts_as_unresolved() {
        let url = resolve("/lookups/cities?parent_key={country}", lookup_from(&[("country", "")]));
        assert_eq!(url, "/lookups/cities?parent_key={country}");
    }

    #[test]
    fn values_are_url_encoded() {
        let url = resolve("/q?name={n}", lookup_from(&[("n", "São Paulo & co")]));
        assert_eq!(url, "/q?name=S%C3%A3o%20Paulo%20%26%20co");
    }

    #[test]
    fn dotted_references_are_one_token() {
        let mut seen = Vec::new();
        let url = resolve("/cities?country={panel.country}", |n| {
            seen.push(n.to_string());
            Some("fr".into())
        });
        assert_eq!(url, "/cities?country=fr");
        assert_eq!(seen, vec!["panel.country"]);
    }

    #[test]
    fn repeated_placeholder_resolves_each_occurrence() {
        let mut calls = 0;
        let url = resolve("/{a}/{a}", |_| {
            calls += 1;
            Some("v".into())
        });
        assert_eq!(url, "/v/v");
        assert_eq!(calls, 2);
        assert_eq!(placeholders("/{a}/{a}/{b}"), vec!["a", "b"]);
    }

    #[test]
    fn panel_refs_are_recognised() {
        assert_eq!(panel_field("panel.city"), Some("city"));
        assert!(!is_panel_ref("panel."));
        assert!(!is_panel_ref("country"));
    }

    proptest! {
        #[test]
        fn unresolved_names_survive_resolution(name in "[a-z][a-z0-9_.]{0,12}") {
            let template = format!("/base/{{{name}}}/tail");
            let url = resolve(&template, |_| None);
            prop_assert_eq!(url, template);
        }

        #[test]
        fn substitution_is_order_independent(a in "[a-z0-9]{1,8}", b in "[a-z0-9]{1,8}") {
            let forward = resolve("/{x}/{y}", |n| Some(if n == "x" { a.clone() } else { b.clone() }));
            let reversed = resolve("/{y}/{x}", |n| Some(if n == "x" { a.clone() } else { b.clone() }));
            prop_assert_eq!(forward, format!("/{a}/{b}"));
            prop_assert_eq!(reversed, format!("/{b}/{a}"));
        }
    }
}
