use serde_json::{json, Value};

/// Fields searched by the fuzzy part of the product query
pub const SEARCH_FIELDS: [&str; 3] = ["name", "description", "slug"];

/// Escape the characters that carry meaning inside a wildcard pattern
pub fn escape_wildcard(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Build the `_search` body for a product query.
///
/// A document matches when any clause does: a fuzzy multi-field match, or the
/// lowercased query appearing anywhere in `name` or `slug`. The fuzzy clause
/// gets the query as typed and leaves normalization to the index analyzer.
pub fn product_search_body(query: &str) -> Value {
    let lowered = query.trim().to_lowercase();
    let pattern = format!("*{}*", escape_wildcard(&lowered));

    json!({
        "track_total_hits": true,
        "query": {
            "bool": {
                "should": [
                    {
                        "multi_match": {
                            "query": query,
                            "fields": SEARCH_FIELDS,
                            "fuzziness": "AUTO"
                        }
                    },
                    { "wildcard": { "name": { "value": pattern, "case_insensitive": true } } },
                    { "wildcard": { "slug": { "value": pattern, "case_insensitive": true } } }
                ],
                "minimum_should_match": 1
            }
        }
    })
}

/// Build the `_delete_by_query` body removing documents not listed in `keep_ids`
pub fn prune_body(keep_ids: &[String]) -> Value {
    json!({
        "query": {
            "bool": {
                "must_not": [
                    { "ids": { "values": keep_ids } }
                ]
            }
        }
    })
}
