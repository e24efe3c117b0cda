//! OpenAPI-style parameter serialization.
//!
//! Turns JSON values into path and query string fragments according to a
//! parameter [`ParamStyle`] and explode flag. Only one level of nesting is
//! supported: arrays of primitives and objects with primitive members.

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Text produced by [`date_param`]
static DATE_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z$").unwrap());

const NESTED_VALUE_ERROR: &str =
    "Deeply-nested arrays/objects aren't supported. Provide your own query serializer to handle these.";

/// Parameter serialization style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamStyle {
    /// `name=a,b` / `name=a&name=b`
    Form,
    /// `a,b`
    Simple,
    /// `.a.b`
    Label,
    /// `;name=a;name=b`
    Matrix,
    /// `name=a%20b`
    SpaceDelimited,
    /// `name=a|b`
    PipeDelimited,
    /// `name[key]=value`
    DeepObject,
}

impl ParamStyle {
    fn array_separator(self, explode: bool) -> &'static str {
        if explode {
            self.explode_separator()
        } else {
            match self {
                Self::PipeDelimited => "|",
                Self::SpaceDelimited => "%20",
                _ => ",",
            }
        }
    }

    fn explode_separator(self) -> &'static str {
        match self {
            Self::Label => ".",
            Self::Matrix => ";",
            Self::Simple => ",",
            _ => "&",
        }
    }

    fn prefixes_separator(self) -> bool {
        matches!(self, Self::Label | Self::Matrix)
    }
}

/// Formats a timestamp the way date parameters are sent on the wire
/// (ISO-8601 with millisecond precision, `Z` suffix).
///
/// Values in this form are emitted without percent-encoding.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::params::date_param;
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
/// assert_eq!(date_param(at), "2024-05-01T12:30:00.000Z");
/// ```
pub fn date_param(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn encode(raw: &str, allow_reserved: bool) -> String {
    if allow_reserved || DATE_TEXT.is_match(raw) {
        raw.to_string()
    } else {
        urlencoding::encode(raw).into_owned()
    }
}

/// String form of a scalar value; nested values are rejected.
pub(crate) fn scalar_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Array(_) | Value::Object(_) => Err(Error::configuration(NESTED_VALUE_ERROR)),
    }
}

/// Serialize a single `name=value` pair.
///
/// `null` serializes to the empty string. Arrays and objects are rejected.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::params::serialize_primitive;
/// use serde_json::json;
///
/// assert_eq!(serialize_primitive("q", &json!("a b"), false).unwrap(), "q=a%20b");
/// assert_eq!(serialize_primitive("q", &json!("a/b"), true).unwrap(), "q=a/b");
/// assert_eq!(serialize_primitive("q", &json!(null), false).unwrap(), "");
/// assert!(serialize_primitive("q", &json!({"a": 1}), false).is_err());
/// ```
pub fn serialize_primitive(name: &str, value: &Value, allow_reserved: bool) -> Result<String> {
    if value.is_null() {
        return Ok(String::new());
    }
    let text = scalar_text(value)?;
    Ok(format!("{}={}", name, encode(&text, allow_reserved)))
}

/// Serialize an array parameter.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::params::{serialize_array, ParamStyle};
/// use serde_json::json;
///
/// let values = vec![json!(3), json!(4), json!(5)];
/// assert_eq!(serialize_array("id", &values, ParamStyle::Form, true, false).unwrap(), "id=3&id=4&id=5");
/// assert_eq!(serialize_array("id", &values, ParamStyle::PipeDelimited, false, false).unwrap(), "id=3|4|5");
/// assert_eq!(serialize_array("id", &values, ParamStyle::Matrix, true, false).unwrap(), ";id=3;id=4;id=5");
/// ```
pub fn serialize_array(
    name: &str,
    values: &[Value],
    style: ParamStyle,
    explode: bool,
    allow_reserved: bool,
) -> Result<String> {
    if !explode {
        let joined = values
            .iter()
            .map(|v| scalar_text(v).map(|text| encode(&text, allow_reserved)))
            .collect::<Result<Vec<_>>>()?
            .join(style.array_separator(false));
        return Ok(match style {
            ParamStyle::Label => format!(".{}", joined),
            ParamStyle::Matrix => format!(";{}={}", name, joined),
            ParamStyle::Simple => joined,
            _ => format!("{}={}", name, joined),
        });
    }

    let separator = style.array_separator(true);
    let joined = values
        .iter()
        .map(|v| match style {
            ParamStyle::Label | ParamStyle::Simple => {
                scalar_text(v).map(|text| encode(&text, allow_reserved))
            },
            _ => serialize_primitive(name, v, allow_reserved),
        })
        .collect::<Result<Vec<_>>>()?
        .join(separator);

    Ok(if style.prefixes_separator() {
        format!("{}{}", separator, joined)
    } else {
        joined
    })
}

/// Serialize an object parameter.
///
/// Non-exploded styles other than `deepObject` flatten the members into one
/// `key,value,key,value` list. Exploded styles and `deepObject` serialize each
/// member separately, naming them `name[key]` for `deepObject`.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::params::{serialize_object, ParamStyle};
/// use serde_json::json;
///
/// let filter = json!({"role": "admin", "page": 2});
/// let filter = filter.as_object().unwrap();
/// assert_eq!(
///     serialize_object("filter", filter, ParamStyle::DeepObject, true, false).unwrap(),
///     "filter[role]=admin&filter[page]=2"
/// );
/// assert_eq!(
///     serialize_object("filter", filter, ParamStyle::Form, false, false).unwrap(),
///     "filter=role,admin,page,2"
/// );
/// ```
pub fn serialize_object(
    name: &str,
    value: &Map<String, Value>,
    style: ParamStyle,
    explode: bool,
    allow_reserved: bool,
) -> Result<String> {
    if style != ParamStyle::DeepObject && !explode {
        let mut parts = Vec::with_capacity(value.len() * 2);
        for (key, member) in value {
            parts.push(key.clone());
            parts.push(encode(&scalar_text(member)?, allow_reserved));
        }
        let joined = parts.join(",");
        return Ok(match style {
            ParamStyle::Form => format!("{}={}", name, joined),
            ParamStyle::Label => format!(".{}", joined),
            ParamStyle::Matrix => format!(";{}={}", name, joined),
            _ => joined,
        });
    }

    let separator = style.explode_separator();
    let joined = value
        .iter()
        .map(|(key, member)| {
            let member_name = if style == ParamStyle::DeepObject {
                format!("{}[{}]", name, key)
            } else {
                key.clone()
            };
            serialize_primitive(&member_name, member, allow_reserved)
        })
        .collect::<Result<Vec<_>>>()?
        .join(separator);

    Ok(if style.prefixes_separator() {
        format!("{}{}", separator, joined)
    } else {
        joined
    })
}
