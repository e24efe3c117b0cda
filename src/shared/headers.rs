//! Header merging with `null`-deletes-key semantics.

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

/// One source of headers for [`merge_headers`].
#[derive(Debug, Clone)]
pub enum HeaderSource {
    /// Native header map; every entry sets (or appends) its key
    Map(HeaderMap),
    /// Key/value record; `null` deletes a key and arrays append one
    /// occurrence per element
    Record(Map<String, Value>),
}

impl From<HeaderMap> for HeaderSource {
    fn from(map: HeaderMap) -> Self {
        Self::Map(map)
    }
}

impl From<Map<String, Value>> for HeaderSource {
    fn from(record: Map<String, Value>) -> Self {
        Self::Record(record)
    }
}

impl<'a> From<&'a [(&'a str, &'a str)]> for HeaderSource {
    fn from(pairs: &'a [(&'a str, &'a str)]) -> Self {
        Self::Record(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
                .collect(),
        )
    }
}

fn header_name(key: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(key.as_bytes())
        .map_err(|e| Error::configuration(format!("Invalid header name '{}': {}", key, e)))
}

fn header_value(key: &str, value: &Value) -> Result<HeaderValue> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    HeaderValue::from_str(&text)
        .map_err(|e| Error::configuration(format!("Invalid value for header '{}': {}", key, e)))
}

/// Overlay `other` onto `base`: every key present in `other` replaces the
/// key's values in `base`, keeping all of its occurrences.
pub fn overlay_headers(base: &mut HeaderMap, other: &HeaderMap) {
    for key in other.keys() {
        let mut values = other.get_all(key).iter();
        if let Some(first) = values.next() {
            base.insert(key.clone(), first.clone());
        }
        for value in values {
            base.append(key.clone(), value.clone());
        }
    }
}

/// Merge header sources left to right into one map.
///
/// Later sources replace earlier values per key. A `null` value removes the
/// key from the accumulated result, an array appends each element as its own
/// occurrence, and non-string values are JSON-stringified.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::headers::merge_headers;
/// use serde_json::json;
///
/// let a = json!({"x": "1", "y": "keep"}).as_object().cloned().unwrap();
/// let b = json!({"x": "2"}).as_object().cloned().unwrap();
/// let c = json!({"y": null}).as_object().cloned().unwrap();
///
/// let merged = merge_headers([a.into(), b.into(), c.into()]).unwrap();
/// assert_eq!(merged.get("x").unwrap(), "2");
/// assert!(!merged.contains_key("y"));
/// ```
pub fn merge_headers<I>(sources: I) -> Result<HeaderMap>
where
    I: IntoIterator<Item = HeaderSource>,
{
    let mut merged = HeaderMap::new();

    for source in sources {
        match source {
            HeaderSource::Map(map) => overlay_headers(&mut merged, &map),
            HeaderSource::Record(record) => {
                for (key, value) in &record {
                    let name = header_name(key)?;
                    match value {
                        Value::Null => {
                            merged.remove(&name);
                        },
                        Value::Array(items) => {
                            for item in items {
                                merged.append(name.clone(), header_value(key, item)?);
                            }
                        },
                        other => {
                            merged.insert(name, header_value(key, other)?);
                        },
                    }
                }
            },
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> HeaderSource {
        HeaderSource::Record(value.as_object().cloned().unwrap())
    }

    #[test]
    fn right_biased_merge() {
        let merged = merge_headers([record(json!({"x": "1"})), record(json!({"x": "2"}))]).unwrap();
        assert_eq!(merged.get("x").unwrap(), "2");
        assert_eq!(merged.get_all("x").iter().count(), 1);
    }

    #[test]
    fn null_deletes_key() {
        let merged = merge_headers([record(json!({"x": "1"})), record(json!({"x": null}))]).unwrap();
        assert!(!merged.contains_key("x"));
    }

    #[test]
    fn arrays_append_occurrences() {
        let merged =
            merge_headers([record(json!({"accept": ["text/plain", "application/json"]}))]).unwrap();
        let values: Vec<_> = merged
            .get_all("accept")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["text/plain", "application/json"]);
    }

    #[test]
    fn non_string_values_are_stringified() {
        let merged = merge_headers([record(json!({"x-count": 3, "x-meta": {"a": 1}}))]).unwrap();
        assert_eq!(merged.get("x-count").unwrap(), "3");
        assert_eq!(merged.get("x-meta").unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn header_maps_and_records_mix() {
        let mut native = HeaderMap::new();
        native.insert("authorization", HeaderValue::from_static("Bearer a"));
        native.insert("x-trace", HeaderValue::from_static("t1"));

        let merged = merge_headers([
            record(json!({"Authorization": "Bearer old", "x-keep": "k"})),
            native.into(),
            record(json!({"x-trace": null})),
        ])
        .unwrap();

        assert_eq!(merged.get("authorization").unwrap(), "Bearer a");
        assert_eq!(merged.get("x-keep").unwrap(), "k");
        assert!(!merged.contains_key("x-trace"));
    }

    #[test]
    fn invalid_header_name_is_a_configuration_error() {
        let err = merge_headers([record(json!({"bad header": "v"}))]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
