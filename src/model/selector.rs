//! Label selector predicates shared by the coordinator (to compute the
//! eligible-node set) and tests.
//!
//! `k8s-openapi`'s `LabelSelector` is a plain data type with no matching
//! logic of its own; the API server evaluates it for list calls made with
//! a label-selector query string, but the coordinator needs to re-evaluate
//! it in memory against informer-cached `Node`s, so we implement the
//! standard `matchLabels`/`matchExpressions` semantics directly.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

/// Label key/value pair every `ClusterUpgrade` must carry to be considered
/// by either reconciler; unlabeled objects of the same kind are ignored.
pub const CONTAINERSHIP_MANAGED_LABEL_KEY: &str = "containership.io/managed";
pub const CONTAINERSHIP_MANAGED_LABEL_VALUE: &str = "true";

/// Evaluate a `LabelSelector` against a label map using standard
/// Kubernetes semantics. `None` selects everything (the spec's "nil = all
/// nodes").
pub fn selector_matches(selector: Option<&LabelSelector>, labels: &BTreeMap<String, String>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            if !expression_matches(expr, labels) {
                return false;
            }
        }
    }

    true
}

fn expression_matches(expr: &LabelSelectorRequirement, labels: &BTreeMap<String, String>) -> bool {
    let values = expr.values.as_deref().unwrap_or(&[]);
    match expr.operator.as_str() {
        "In" => labels.get(&expr.key).is_some_and(|v| values.contains(v)),
        "NotIn" => !labels.get(&expr.key).is_some_and(|v| values.contains(v)),
        "Exists" => labels.contains_key(&expr.key),
        "DoesNotExist" => !labels.contains_key(&expr.key),
        _ => false,
    }
}

pub fn is_containership_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(CONTAINERSHIP_MANAGED_LABEL_KEY).map(String::as_str)
        == Some(CONTAINERSHIP_MANAGED_LABEL_VALUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn nil_selector_matches_everything() {
        assert!(selector_matches(None, &labels(&[])));
        assert!(selector_matches(None, &labels(&[("role", "worker")])));
    }

    #[test]
    fn match_labels_requires_exact_subset() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("role", "worker")])),
            match_expressions: None,
        };

        assert!(selector_matches(Some(&selector), &labels(&[("role", "worker")])));
        assert!(selector_matches(
            Some(&selector),
            &labels(&[("role", "worker"), ("zone", "a")])
        ));
        assert!(!selector_matches(Some(&selector), &labels(&[("role", "control-plane")])));
        assert!(!selector_matches(Some(&selector), &labels(&[])));
    }

    #[test]
    fn match_expressions_in_and_not_in() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "role".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["worker".to_string(), "edge".to_string()]),
            }]),
        };

        assert!(selector_matches(Some(&selector), &labels(&[("role", "worker")])));
        assert!(!selector_matches(Some(&selector), &labels(&[("role", "control-plane")])));
    }

    #[test]
    fn match_expressions_exists() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "role".to_string(),
                operator: "Exists".to_string(),
                values: None,
            }]),
        };

        assert!(selector_matches(Some(&selector), &labels(&[("role", "anything")])));
        assert!(!selector_matches(Some(&selector), &labels(&[("zone", "a")])));
    }

    #[test]
    fn containership_managed_requires_exact_value() {
        assert!(is_containership_managed(&labels(&[(
            CONTAINERSHIP_MANAGED_LABEL_KEY,
            "true"
        )])));
        assert!(!is_containership_managed(&labels(&[(
            CONTAINERSHIP_MANAGED_LABEL_KEY,
            "false"
        )])));
        assert!(!is_containership_managed(&labels(&[])));
    }
}
