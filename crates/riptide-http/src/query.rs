//! Query-string extraction.
//!
//! Splits the raw request URL into the routable path and decoded query
//! parameters. Pairs are separated by `&`; a pair without `=` stores the
//! empty string; a pair that fails to decode is dropped.

use riptide_core::{url_decode, Request};

/// Populate `req.query_parameters` from `req.url` and set `req.path` to
/// the URL without its query string.
pub fn split_query(req: &mut Request) {
    match req.url.split_once('?') {
        None => req.path = req.url.clone(),
        Some((path, query)) => {
            let path = path.to_string();
            let query = query.to_string();
            req.path = path;
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                add_param(req, pair);
            }
        }
    }
}

fn add_param(req: &mut Request, pair: &str) {
    match pair.split_once('=') {
        None => {
            if let Some(key) = url_decode(pair) {
                req.query_parameters.insert(key, String::new());
            }
        }
        Some((key, value)) => {
            if let (Some(key), Some(value)) = (url_decode(key), url_decode(value)) {
                req.query_parameters.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide_core::Method;

    fn split(url: &str) -> Request {
        let mut req = Request::new(Method::Get, url);
        split_query(&mut req);
        req
    }

    #[test]
    fn url_without_query_is_the_path() {
        let req = split("/plain/path");
        assert_eq!(req.path, "/plain/path");
        assert!(req.query_parameters.is_empty());
    }

    #[test]
    fn splits_pairs_and_decodes() {
        let req = split("/p?k1=v1&k2=a%20b&k3=x+y");
        assert_eq!(req.path, "/p");
        assert_eq!(req.query_parameters["k1"], "v1");
        assert_eq!(req.query_parameters["k2"], "a b");
        assert_eq!(req.query_parameters["k3"], "x y");
    }

    #[test]
    fn missing_equals_stores_empty_string() {
        let req = split("/p?flag");
        assert_eq!(req.query_parameters["flag"], "");
    }

    #[test]
    fn bare_question_mark_yields_no_parameters() {
        let req = split("/p?");
        assert_eq!(req.path, "/p");
        assert!(req.query_parameters.is_empty());
    }

    #[test]
    fn invalid_escape_drops_the_parameter() {
        let req = split("/p?good=1&bad=%zz");
        assert_eq!(req.query_parameters.len(), 1);
        assert_eq!(req.query_parameters["good"], "1");
    }

    #[test]
    fn later_duplicate_key_wins() {
        let req = split("/p?k=1&k=2");
        assert_eq!(req.query_parameters["k"], "2");
    }

    #[test]
    fn equals_at_end_stores_empty_value() {
        let req = split("/p?k=");
        assert_eq!(req.query_parameters["k"], "");
    }

    mod properties {
        use proptest::prelude::*;
        use riptide_core::url_decode;

        proptest! {
            // The decoder inverts %HH encoding for any byte sequence that
            // is valid UTF-8; non-UTF-8 decodes are rejected.
            #[test]
            fn decode_inverts_percent_encoding(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                let encoded: String = bytes.iter().map(|b| format!("%{b:02X}")).collect();
                let decoded = url_decode(&encoded);
                match String::from_utf8(bytes.clone()) {
                    Ok(expected) => prop_assert_eq!(decoded.as_deref(), Some(expected.as_str())),
                    Err(_) => prop_assert_eq!(decoded, None),
                }
            }

            #[test]
            fn decode_round_trips_query_values(value in "[a-zA-Z0-9 +%/=&?#]{0,32}") {
                let encoded: String = value
                    .bytes()
                    .map(|b| format!("%{b:02X}"))
                    .collect();
                prop_assert_eq!(url_decode(&encoded), Some(value));
            }
        }
    }
}
