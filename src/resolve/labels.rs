//! Label compatibility over the domain type hierarchy.

use crate::models::DataDictionary;
use std::collections::HashSet;

/// The universal root label, ignored during comparison.
const ROOT_LABEL: &str = "entity";

/// Normalizes a label set: strips dotted package prefixes, lowercases and
/// drops the universal root label.
fn normalize(labels: &[String]) -> HashSet<String> {
    labels
        .iter()
        .map(|label| {
            label
                .rsplit('.')
                .next()
                .unwrap_or(label)
                .to_lowercase()
        })
        .filter(|label| label != ROOT_LABEL)
        .collect()
}

/// Returns true if the two label sets are compatible.
///
/// Compatible iff any of:
/// - direct overlap after normalization;
/// - one type is an ancestor of the other in the schema;
/// - the two types share any common ancestor.
///
/// An empty side (after dropping the root label) is compatible with
/// anything: an unlabelled mention carries no evidence against a typed
/// candidate.
#[must_use]
pub fn labels_compatible(a: &[String], b: &[String], dictionary: &DataDictionary) -> bool {
    let set_a = normalize(a);
    let set_b = normalize(b);
    if set_a.is_empty() || set_b.is_empty() {
        return true;
    }
    if set_a.intersection(&set_b).next().is_some() {
        return true;
    }
    for label_a in &set_a {
        for label_b in &set_b {
            if dictionary.is_ancestor(label_a, label_b)
                || dictionary.is_ancestor(label_b, label_a)
            {
                return true;
            }
            let ancestors_a = dictionary.ancestors(label_a);
            if !ancestors_a.is_empty()
                && ancestors_a
                    .intersection(&dictionary.ancestors(label_b))
                    .next()
                    .is_some()
            {
                return true;
            }
        }
    }
    false
}
