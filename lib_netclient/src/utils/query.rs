//! Query-string rendering for request URLs.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Ordered list of query parameters, rendered in insertion order.
pub type QueryParams = Vec<(String, String)>;

/// Renders `params` as a percent-encoded query string with the given
/// `prefix` (typically `"?"`). Returns an empty string for an empty list so
/// callers can append the result unconditionally.
pub fn to_query_string(params: &QueryParams, prefix: &str) -> String {
    if params.is_empty() {
        return String::new();
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    format!("{prefix}{}", serializer.finish())
}

/// Convenience constructor for a [`QueryParams`] list from string pairs.
pub fn query(pairs: &[(&str, &str)]) -> QueryParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_pairs_in_order() {
        let params = query(&[("b", "2"), ("a", "1")]);
        assert_eq!(to_query_string(&params, "?"), "?b=2&a=1");
    }

    #[test]
    fn empty_params_render_nothing() {
        assert_eq!(to_query_string(&QueryParams::new(), "?"), "");
    }

    #[test]
    fn values_are_percent_encoded() {
        let params = query(&[("q", "a b&c")]);
        assert_eq!(to_query_string(&params, "?"), "?q=a+b%26c");
    }
}
