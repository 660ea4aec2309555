//! Glue between framework header bags and the envelope's key-value lists.

use http::{
    header::{HeaderName, HeaderValue},
    HeaderMap,
};
use tracing::debug;

use crate::rpc::KeyValue;

/// Flattens a header bag into the envelope's key-value list, in iteration
/// order. Keys are already lowercased by `http`; values that are not valid
/// UTF-8 are skipped.
pub fn headers_to_kv(headers: &HeaderMap) -> Vec<KeyValue> {
    let mut out = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => {
                out.push(KeyValue { key: name.as_str().to_owned(), value: value.to_owned() })
            }
            Err(_) => debug!(header = %name, "skipping non-utf8 header value"),
        }
    }
    out
}

/// Reconstructs a header bag from an envelope's key-value list. A missing
/// list yields an empty bag; entries that do not parse as headers are
/// skipped.
pub fn kv_to_headers(entries: Option<&[KeyValue]>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for kv in entries.unwrap_or_default() {
        match (HeaderName::try_from(kv.key.as_str()), HeaderValue::try_from(kv.value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(key = %kv.key, "skipping unparseable header entry"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_lowercases() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Token", HeaderValue::from_static("abc"));
        headers.append("accept", HeaderValue::from_static("a"));
        headers.append("accept", HeaderValue::from_static("b"));

        let kv = headers_to_kv(&headers);
        assert!(kv.iter().any(|e| e.key == "x-token" && e.value == "abc"));
        assert_eq!(kv.iter().filter(|e| e.key == "accept").count(), 2);

        let back = kv_to_headers(Some(kv.as_slice()));
        assert_eq!(back, headers);
    }

    #[test]
    fn missing_list_yields_empty_bag() {
        assert!(kv_to_headers(None).is_empty());
    }

    #[test]
    fn unparseable_entries_are_skipped() {
        let kv = vec![
            KeyValue { key: "ok".to_owned(), value: "fine".to_owned() },
            KeyValue { key: "bad key".to_owned(), value: "x".to_owned() },
        ];
        let headers = kv_to_headers(Some(kv.as_slice()));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("ok").unwrap(), "fine");
    }
}
