//! Header maps as they travel inside frames.
//!
//! Header names are lowercased. A header that appears more than once is kept
//! as a list (`set-cookie` is the usual case); peers that send numeric values
//! are accepted and rendered as text.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// Hop-by-hop headers that never cross the tunnel.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// One header value on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderField {
    Text(String),
    Number(serde_json::Number),
    List(Vec<String>),
}

impl HeaderField {
    fn values(&self) -> Vec<String> {
        match self {
            HeaderField::Text(s) => vec![s.clone()],
            HeaderField::Number(n) => vec![n.to_string()],
            HeaderField::List(list) => list.clone(),
        }
    }
}

/// Header map carried by tunneled requests and responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderField>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), HeaderField::Text(value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderField> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// First value of a header, if present.
    pub fn get(&self, name: &str) -> Option<String> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|field| field.values().into_iter().next())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop connection-scoped headers.
    pub fn strip_hop_by_hop(&mut self) {
        for name in HOP_BY_HOP {
            self.0.remove(*name);
        }
    }

    /// Collect an HTTP header map, folding repeated names into lists.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut out: BTreeMap<String, HeaderField> = BTreeMap::new();
        for name in map.keys() {
            let values: Vec<String> = map
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_owned))
                .collect();
            let field = match values.len() {
                0 => continue,
                1 => HeaderField::Text(values.into_iter().next().unwrap_or_default()),
                _ => HeaderField::List(values),
            };
            out.insert(name.as_str().to_owned(), field);
        }
        Self(out)
    }

    /// Render into an HTTP header map. Invalid names or values are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, field) in &self.0 {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::debug!(header = %name, "Skipping invalid header name");
                continue;
            };
            for value in field.values() {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    map.append(name.clone(), value);
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_headers_fold_into_lists() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HeaderValue::from_static("a=1"));
        map.append("set-cookie", HeaderValue::from_static("b=2"));
        map.insert("content-type", HeaderValue::from_static("text/plain"));

        let headers = Headers::from_header_map(&map);
        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(json["set-cookie"], serde_json::json!(["a=1", "b=2"]));
        assert_eq!(json["content-type"], "text/plain");

        let back = headers.to_header_map();
        assert_eq!(back.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn numeric_values_are_accepted() {
        let headers: Headers =
            serde_json::from_str(r#"{"content-length": 10, "Content-Type": "text/plain"}"#)
                .unwrap();
        assert_eq!(headers.get("content-length").as_deref(), Some("10"));
        assert_eq!(headers.to_header_map().get("content-length").unwrap(), "10");
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = Headers::new();
        headers.insert("Transfer-Encoding", "chunked");
        headers.insert("connection", "keep-alive");
        headers.insert("etag", "\"abc\"");
        headers.strip_hop_by_hop();
        assert!(!headers.contains("transfer-encoding"));
        assert!(!headers.contains("connection"));
        assert!(headers.contains("ETag"));
    }
}
