//! URL building: path template expansion and query string serialization.

use crate::error::Result;
use crate::shared::params::{
    scalar_text, serialize_array, serialize_object, serialize_primitive, ParamStyle,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Regex for `{param}` placeholders in a URL template
static PATH_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]+\}").unwrap());

/// Serialization policy for array-valued query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayPolicy {
    /// Serialization style
    pub style: ParamStyle,
    /// Whether members become separate `name=value` occurrences
    pub explode: bool,
}

impl Default for ArrayPolicy {
    fn default() -> Self {
        Self {
            style: ParamStyle::Form,
            explode: true,
        }
    }
}

/// Serialization policy for object-valued query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPolicy {
    /// Serialization style
    pub style: ParamStyle,
    /// Whether members become separate `key=value` occurrences
    pub explode: bool,
}

impl Default for ObjectPolicy {
    fn default() -> Self {
        Self {
            style: ParamStyle::DeepObject,
            explode: true,
        }
    }
}

/// Per-field override of the global query serialization policy.
///
/// Every field left as `None` falls back to the global default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamPolicy {
    /// Skip percent-encoding of reserved characters
    pub allow_reserved: Option<bool>,
    /// Policy used when the field holds an array
    pub array: Option<ArrayPolicy>,
    /// Policy used when the field holds an object
    pub object: Option<ObjectPolicy>,
}

/// Options for the default query serializer.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::url::{ArrayPolicy, ParamPolicy, QuerySerializerOptions};
/// use ocxp_client::shared::params::ParamStyle;
/// use serde_json::json;
///
/// let options = QuerySerializerOptions::default().parameter(
///     "tags",
///     ParamPolicy {
///         array: Some(ArrayPolicy { style: ParamStyle::Form, explode: false }),
///         ..Default::default()
///     },
/// );
///
/// let query = json!({"tags": ["a", "b"], "ids": [1, 2], "skip": null});
/// let out = options.serialize(query.as_object().unwrap()).unwrap();
/// assert_eq!(out, "tags=a,b&ids=1&ids=2");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySerializerOptions {
    /// Skip percent-encoding of reserved characters
    pub allow_reserved: bool,
    /// Default policy for array values
    pub array: ArrayPolicy,
    /// Default policy for object values
    pub object: ObjectPolicy,
    /// Per-field overrides keyed by query parameter name
    pub parameters: HashMap<String, ParamPolicy>,
}

impl QuerySerializerOptions {
    /// Add a per-field override.
    pub fn parameter(mut self, name: impl Into<String>, policy: ParamPolicy) -> Self {
        self.parameters.insert(name.into(), policy);
        self
    }

    /// Serialize query parameters, skipping `null` fields.
    pub fn serialize(&self, query: &Map<String, Value>) -> Result<String> {
        let mut search = Vec::with_capacity(query.len());

        for (name, value) in query {
            let field = self.parameters.get(name);
            let allow_reserved = field
                .and_then(|f| f.allow_reserved)
                .unwrap_or(self.allow_reserved);

            let serialized = match value {
                Value::Null => continue,
                Value::Array(values) => {
                    let policy = field.and_then(|f| f.array).unwrap_or(self.array);
                    serialize_array(name, values, policy.style, policy.explode, allow_reserved)?
                },
                Value::Object(members) => {
                    let policy = field.and_then(|f| f.object).unwrap_or(self.object);
                    serialize_object(name, members, policy.style, policy.explode, allow_reserved)?
                },
                scalar => serialize_primitive(name, scalar, allow_reserved)?,
            };

            if !serialized.is_empty() {
                search.push(serialized);
            }
        }

        Ok(search.join("&"))
    }
}

/// Custom query serializer function.
pub type QuerySerializerFn = dyn Fn(&Map<String, Value>) -> Result<String> + Send + Sync;

/// Query string serializer: policy-driven default or a caller-supplied function.
#[derive(Clone)]
pub enum QuerySerializer {
    /// Built-in serializer driven by [`QuerySerializerOptions`]
    Options(QuerySerializerOptions),
    /// Caller-supplied serializer, used for shapes the built-in one rejects
    Custom(Arc<QuerySerializerFn>),
}

impl QuerySerializer {
    /// Wrap a custom serializer function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Serialize query parameters into a query string (without leading `?`).
    pub fn serialize(&self, query: &Map<String, Value>) -> Result<String> {
        match self {
            Self::Options(options) => options.serialize(query),
            Self::Custom(f) => f(query),
        }
    }
}

impl Default for QuerySerializer {
    fn default() -> Self {
        Self::Options(QuerySerializerOptions::default())
    }
}

impl From<QuerySerializerOptions> for QuerySerializer {
    fn from(options: QuerySerializerOptions) -> Self {
        Self::Options(options)
    }
}

impl fmt::Debug for QuerySerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Options(options) => f.debug_tuple("Options").field(options).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Expand `{param}` placeholders in a URL template.
///
/// A trailing `*` marks an exploded parameter, a leading `.` selects label
/// style and a leading `;` selects matrix style; everything else is simple
/// style. Placeholders without a value are removed.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::url::serialize_path;
/// use serde_json::json;
///
/// let path = json!({"id": "x y", "ids": [1, 2], "v": "2"});
/// let path = path.as_object().unwrap();
/// assert_eq!(serialize_path("/a/{id}", path).unwrap(), "/a/x%20y");
/// assert_eq!(serialize_path("/a/{ids}", path).unwrap(), "/a/1,2");
/// assert_eq!(serialize_path("/a{;v}", path).unwrap(), "/a;v=2");
/// assert_eq!(serialize_path("/a/{missing}", path).unwrap(), "/a/");
/// ```
pub fn serialize_path(template: &str, path: &Map<String, Value>) -> Result<String> {
    let mut url = String::with_capacity(template.len());
    let mut last_end = 0;

    for token in PATH_PARAM.find_iter(template) {
        url.push_str(&template[last_end..token.start()]);
        last_end = token.end();

        let mut name = &template[token.start() + 1..token.end() - 1];
        let mut explode = false;
        let mut style = ParamStyle::Simple;

        if let Some(stripped) = name.strip_suffix('*') {
            explode = true;
            name = stripped;
        }
        if let Some(stripped) = name.strip_prefix('.') {
            name = stripped;
            style = ParamStyle::Label;
        } else if let Some(stripped) = name.strip_prefix(';') {
            name = stripped;
            style = ParamStyle::Matrix;
        }

        match path.get(name) {
            None | Some(Value::Null) => {},
            Some(Value::Array(values)) => {
                url.push_str(&serialize_array(name, values, style, explode, false)?);
            },
            Some(Value::Object(members)) => {
                url.push_str(&serialize_object(name, members, style, explode, false)?);
            },
            Some(scalar) if style == ParamStyle::Matrix => {
                url.push(';');
                url.push_str(&serialize_primitive(name, scalar, false)?);
            },
            Some(scalar) => {
                let text = scalar_text(scalar)?;
                let text = if style == ParamStyle::Label {
                    format!(".{}", text)
                } else {
                    text
                };
                url.push_str(&urlencoding::encode(&text));
            },
        }
    }

    url.push_str(&template[last_end..]);
    Ok(url)
}

/// Build a full request URL from a base URL, a path template, path
/// parameters and query parameters.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::url::{get_url, QuerySerializer};
/// use serde_json::json;
///
/// let path = json!({"id": 7});
/// let query = json!({"limit": 10});
/// let url = get_url(
///     Some("https://api.example.com/v1"),
///     "items/{id}",
///     path.as_object(),
///     query.as_object(),
///     &QuerySerializer::default(),
/// )
/// .unwrap();
/// assert_eq!(url, "https://api.example.com/v1/items/7?limit=10");
/// ```
pub fn get_url(
    base_url: Option<&str>,
    template: &str,
    path: Option<&Map<String, Value>>,
    query: Option<&Map<String, Value>>,
    query_serializer: &QuerySerializer,
) -> Result<String> {
    let base = base_url.unwrap_or("").trim_end_matches('/');
    let mut url = if template.starts_with('/') {
        format!("{}{}", base, template)
    } else {
        format!("{}/{}", base, template)
    };

    if let Some(path) = path {
        url = serialize_path(&url, path)?;
    }

    let search = match query {
        Some(query) => query_serializer.serialize(query)?,
        None => String::new(),
    };
    let search = search.strip_prefix('?').unwrap_or(&search);
    if !search.is_empty() {
        url.push('?');
        url.push_str(search);
    }

    Ok(url)
}
