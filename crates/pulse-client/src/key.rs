//! Deterministic cache key derivation (§4.6, §8's round-trip laws).

use serde_json::Value;

/// Recursively sorts object keys so that two structurally-equal JSON values serialize to the same
/// string regardless of field insertion order: `stable_stringify({a:1,b:2}) ==
/// stable_stringify({b:2,a:1})`.
pub fn stable_stringify(value: &Value) -> String {
    serde_json::to_string(&sorted(value)).expect("serializing a sorted Value cannot fail")
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted_map = serde_json::Map::new();
            for (k, v) in entries {
                sorted_map.insert(k.clone(), sorted(v));
            }
            Value::Object(sorted_map)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// A deterministic, platform-independent 32-bit string hash (FNV-1a), encoded in base-36.
///
/// This deliberately does not use [`std::hash::Hash`]/`RandomState`, whose output varies between
/// processes: cache keys must be reproducible across runs for dedup and for tests (§8's
/// round-trip laws).
pub fn hash(input: &str) -> String {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    to_base36(hash)
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base-36 alphabet is ASCII")
}

/// Derives a GraphQL request's cache key: `"gql:" + (operationName|queryHash) + (":" +
/// variablesHash)?`, per §4.6/§6.
pub fn generate_cache_key(
    query: &str,
    operation_name: Option<&str>,
    variables: Option<&Value>,
) -> String {
    let mut key = String::from("gql:");
    match operation_name {
        Some(name) if !name.is_empty() => key.push_str(name),
        _ => key.push_str(&hash(&normalize_query(query))),
    }
    if let Some(vars) = variables {
        key.push(':');
        key.push_str(&hash(&stable_stringify(vars)));
    }
    key
}

/// Collapses all runs of whitespace to a single space so that cosmetic formatting differences in
/// a query string don't change its cache key.
fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_stringify_is_order_independent() {
        let a = json!({"a": 1, "b": 2, "nested": {"y": 1, "x": 2}});
        let b = json!({"b": 2, "nested": {"x": 2, "y": 1}, "a": 1});
        assert_eq!(stable_stringify(&a), stable_stringify(&b));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash("hello"), hash("hello"));
        assert_ne!(hash("hello"), hash("world"));
    }

    #[test]
    fn cache_key_prefers_operation_name() {
        let key = generate_cache_key("query Foo { x }", Some("Foo"), None);
        assert_eq!(key, "gql:Foo");
    }

    #[test]
    fn cache_key_falls_back_to_query_hash() {
        let key1 = generate_cache_key("query { x }", None, None);
        let key2 = generate_cache_key("query { x }", None, None);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("gql:"));
    }

    #[test]
    fn cache_key_incorporates_variables_hash() {
        let vars = json!({"id": 1});
        let with_vars = generate_cache_key("query Foo { x }", Some("Foo"), Some(&vars));
        let without_vars = generate_cache_key("query Foo { x }", Some("Foo"), None);
        assert_ne!(with_vars, without_vars);
        assert!(with_vars.starts_with("gql:Foo:"));
    }

    #[test]
    fn cache_key_is_variable_order_independent() {
        let vars_a = json!({"a": 1, "b": 2});
        let vars_b = json!({"b": 2, "a": 1});
        let key_a = generate_cache_key("query Foo { x }", Some("Foo"), Some(&vars_a));
        let key_b = generate_cache_key("query Foo { x }", Some("Foo"), Some(&vars_b));
        assert_eq!(key_a, key_b);
    }
}
