use crate::model::SurveyTarget;

pub fn customer_key(hex: &str) -> String {
    format!("customer:{hex}")
}

pub fn namespace_key(hex: &str, slug: &str) -> String {
    format!("{}/ns:{slug}", customer_key(hex))
}

pub fn survey_key(target: &SurveyTarget) -> String {
    format!(
        "{}/survey:{}",
        namespace_key(&target.customer_hex, &target.namespace),
        target.survey_id
    )
}

pub fn responses_key(target: &SurveyTarget) -> String {
    format!("{}/responses", survey_key(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_nest_by_prefix() {
        let t = SurveyTarget {
            customer_hex: "abc".into(),
            namespace: "travel".into(),
            survey_id: "trip".into(),
            ..Default::default()
        };
        let ns = namespace_key("abc", "travel");
        assert_eq!(ns, "customer:abc/ns:travel");
        assert!(ns.starts_with(&customer_key("abc")));
        assert_eq!(survey_key(&t), "customer:abc/ns:travel/survey:trip");
        assert_eq!(responses_key(&t), "customer:abc/ns:travel/survey:trip/responses");
    }
}
