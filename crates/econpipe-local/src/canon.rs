//! Stable cache keys for tool invocations.
//!
//! Key layout: `{tool}::{normalized query}::{canonical options JSON}`.
//!
//! Array-order-insensitive: arrays inside options are sorted by the serialized form of their
//! (canonicalized) elements, so `["b","a"]` and `["a","b"]` produce the same key. That is right
//! for set-like fields such as `includedSources` and wrong for order-sensitive lists. Do not
//! route order-sensitive parameters through this path.

use serde_json::Value;

/// Trim, collapse whitespace runs to one space, lowercase.
pub fn canon_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Like [`canon_query`] but accepts any JSON value; non-strings are stringified first.
pub fn canon_query_value(query: &Value) -> String {
    match query {
        Value::String(s) => canon_query(s),
        Value::Null => String::new(),
        other => canon_query(&other.to_string()),
    }
}

/// Recursively canonicalize an options value.
///
/// - objects: drop null-valued keys, sort keys, recurse
/// - arrays: recurse, then sort by each element's serialized form
pub fn canon_options(options: &Value) -> Value {
    match options {
        Value::Object(m) => {
            // Sort explicitly: `preserve_order` may be enabled elsewhere in the dependency graph.
            let mut entries: Vec<(&String, &Value)> =
                m.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canon_options(v));
            }
            Value::Object(out)
        }
        Value::Array(xs) => {
            let mut items: Vec<(String, Value)> = xs
                .iter()
                .map(|x| {
                    let c = canon_options(x);
                    (c.to_string(), c)
                })
                .collect();
            items.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(items.into_iter().map(|(_, v)| v).collect())
        }
        other => other.clone(),
    }
}

pub fn build_tool_key(tool: &str, query: &str, options: &Value) -> String {
    format!("{tool}::{}::{}", canon_query(query), canon_options(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn query_whitespace_and_case_do_not_matter() {
        assert_eq!(canon_query("  GDP \t growth\n  US "), "gdp growth us");
        assert_eq!(
            build_tool_key("economic_search", "GDP  Growth", &json!({})),
            build_tool_key("economic_search", " gdp growth", &json!({}))
        );
    }

    #[test]
    fn key_order_and_nulls_do_not_matter() {
        let a = json!({"maxNumResults": 5, "searchType": "proprietary", "relevanceThreshold": null});
        let b = json!({"searchType": "proprietary", "maxNumResults": 5});
        assert_eq!(
            build_tool_key("t", "q", &a),
            build_tool_key("t", "q", &b)
        );
        assert_eq!(
            build_tool_key("t", "q", &b),
            r#"t::q::{"maxNumResults":5,"searchType":"proprietary"}"#
        );
    }

    #[test]
    fn array_order_insensitive_by_construction() {
        // Pinned on purpose: order-sensitive arrays would collide here.
        let a = json!({"includedSources": ["valyu/fred", "valyu/bls", "valyu/worldbank"]});
        let b = json!({"includedSources": ["valyu/worldbank", "valyu/fred", "valyu/bls"]});
        assert_eq!(build_tool_key("t", "q", &a), build_tool_key("t", "q", &b));
    }

    #[test]
    fn nested_objects_inside_arrays_are_canonicalized_before_sorting() {
        let a = json!({"filters": [{"b": 1, "a": null}, {"z": [3, 1, 2]}]});
        let b = json!({"filters": [{"z": [2, 3, 1]}, {"b": 1}]});
        assert_eq!(canon_options(&a), canon_options(&b));
    }

    #[test]
    fn different_tools_or_values_produce_different_keys() {
        let o = json!({"maxNumResults": 5});
        assert_ne!(build_tool_key("a", "q", &o), build_tool_key("b", "q", &o));
        assert_ne!(
            build_tool_key("a", "q", &o),
            build_tool_key("a", "q", &json!({"maxNumResults": 6}))
        );
    }

    #[test]
    fn non_string_queries_are_stringified() {
        assert_eq!(canon_query_value(&json!(2024)), "2024");
        assert_eq!(canon_query_value(&json!(null)), "");
        assert_eq!(canon_query_value(&json!(" US  CPI ")), "us cpi");
    }

    proptest! {
        #[test]
        fn reversing_object_insertion_order_keeps_key(
            entries in proptest::collection::btree_map("[a-z]{1,6}", 0i64..100, 0..8),
            nulls in proptest::collection::vec("[A-Z]{1,4}", 0..3),
        ) {
            let mut fwd = serde_json::Map::new();
            for (k, v) in entries.iter() {
                fwd.insert(k.clone(), json!(v));
            }
            let mut rev = serde_json::Map::new();
            for (k, v) in entries.iter().rev() {
                rev.insert(k.clone(), json!(v));
            }
            for k in nulls {
                rev.insert(k, Value::Null);
            }
            prop_assert_eq!(
                build_tool_key("t", "q", &Value::Object(fwd)),
                build_tool_key("t", "q", &Value::Object(rev))
            );
        }

        #[test]
        fn shuffled_arrays_keep_key(mut xs in proptest::collection::vec("[a-z/]{1,10}", 0..10)) {
            let a = json!({"includedSources": xs.clone()});
            xs.reverse();
            let b = json!({"includedSources": xs});
            prop_assert_eq!(build_tool_key("t", "q", &a), build_tool_key("t", "q", &b));
        }
    }
}
