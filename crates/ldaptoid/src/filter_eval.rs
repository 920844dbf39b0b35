// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Filter evaluator (C8): a pure function matching a decoded `Filter` tree
//! against an entry's projected attributes.
//!
//! Projects via the same [`crate::entry::Entry::attributes`] the search
//! executor uses, for symmetry (REDESIGN GUIDANCE).

use crate::ber::filter::{Assertion, Filter, Substrings};
use crate::model::Snapshot;

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn attr_values<'a>(attrs: &'a [(String, Vec<String>)], name: &str) -> Option<&'a [String]> {
    attrs
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_slice())
}

fn is_present(attrs: &[(String, Vec<String>)], name: &str) -> bool {
    attr_values(attrs, name)
        .map(|vs| vs.iter().any(|v| !v.is_empty()))
        .unwrap_or(false)
}

fn any_value_equals(attrs: &[(String, Vec<String>)], assertion: &Assertion) -> bool {
    match attr_values(attrs, &assertion.attribute) {
        Some(values) => {
            let target = normalize(&assertion.value);
            values.iter().any(|v| normalize(v) == target)
        }
        None => false,
    }
}

fn any_value_compares(
    attrs: &[(String, Vec<String>)],
    assertion: &Assertion,
    ge: bool,
) -> bool {
    match attr_values(attrs, &assertion.attribute) {
        Some(values) => {
            let target = normalize(&assertion.value);
            values.iter().any(|v| {
                let nv = normalize(v);
                if ge {
                    nv >= target
                } else {
                    nv <= target
                }
            })
        }
        None => false,
    }
}

fn matches_substrings(attrs: &[(String, Vec<String>)], sub: &Substrings) -> bool {
    match attr_values(attrs, &sub.attribute) {
        Some(values) => {
            // Multi-valued attributes are concatenated with a single space
            // before matching, per §4.8.
            let joined = normalize(&values.join(" "));
            let mut rest = joined.as_str();
            if let Some(initial) = &sub.initial {
                let needle = normalize(initial);
                if !rest.starts_with(&needle) {
                    return false;
                }
                rest = &rest[needle.len()..];
            }
            for any in &sub.any {
                let needle = normalize(any);
                match rest.find(&needle) {
                    Some(idx) => rest = &rest[idx + needle.len()..],
                    None => return false,
                }
            }
            if let Some(finalp) = &sub.finalp {
                let needle = normalize(finalp);
                if !rest.ends_with(&needle) {
                    return false;
                }
            }
            true
        }
        None => false,
    }
}

/// `evaluate(filter, attrs) -> bool`. `_snapshot` is accepted for interface
/// symmetry with callers that also need it to build `attrs`; evaluation
/// itself only ever looks at the already-projected attribute list.
pub fn evaluate(filter: &Filter, attrs: &[(String, Vec<String>)], _snapshot: &Snapshot) -> bool {
    match filter {
        Filter::And(items) => items.iter().all(|f| evaluate(f, attrs, _snapshot)),
        Filter::Or(items) => items.iter().any(|f| evaluate(f, attrs, _snapshot)),
        Filter::Not(inner) => !evaluate(inner, attrs, _snapshot),
        Filter::Equality(a) => any_value_equals(attrs, a),
        Filter::Approx(a) => any_value_equals(attrs, a),
        Filter::Substrings(s) => matches_substrings(attrs, s),
        Filter::GreaterOrEqual(a) => any_value_compares(attrs, a, true),
        Filter::LessOrEqual(a) => any_value_compares(attrs, a, false),
        Filter::Present(attr) => is_present(attrs, attr),
        // The search layer rejects a request whose filter contains this
        // variant before evaluation ever runs; treated as non-matching here
        // only so this match stays exhaustive.
        Filter::Unsupported => false,
    }
}
