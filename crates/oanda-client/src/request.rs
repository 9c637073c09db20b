//! Logical call specs and request building
//!
//! A [`RequestSpec`] describes a call the way an endpoint method states it:
//! path template, verb, data, extra headers. [`RequestBuilder`] turns that
//! plus a credential and the configured environment into a fully-addressed
//! [`PreparedRequest`]. GET-style calls carry their data in the query string;
//! mutating verbs JSON-encode it as the body.

use common::Secret;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::warn;

use crate::config::Environment;
use crate::error::{Error, Result};

/// Immutable description of one logical call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub path: String,
    pub method: Method,
    pub data: Option<Value>,
    pub extra_headers: Vec<(String, String)>,
    /// Streaming specs target the stream host instead of the REST host.
    pub stream: bool,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Method::GET,
            data: None,
            extra_headers: Vec::new(),
            stream: false,
        }
    }

    pub fn get_with(path: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::get(path)
        }
    }

    pub fn post(path: impl Into<String>, data: Value) -> Self {
        Self {
            method: Method::POST,
            data: Some(data),
            ..Self::get(path)
        }
    }

    pub fn patch(path: impl Into<String>, data: Value) -> Self {
        Self {
            method: Method::PATCH,
            data: Some(data),
            ..Self::get(path)
        }
    }

    /// PATCH without a body (e.g. order cancellation).
    pub fn patch_empty(path: impl Into<String>) -> Self {
        Self {
            method: Method::PATCH,
            ..Self::get(path)
        }
    }

    /// GET against the streaming host; data always goes into the query.
    pub fn stream(path: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            stream: true,
            ..Self::get(path)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

/// A request ready to hand to the transport. Immutable once built.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// Builds [`PreparedRequest`]s for a fixed environment.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    environment: Environment,
}

impl RequestBuilder {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// Assemble the absolute URL, headers, and body for one attempt.
    ///
    /// Fails with `MalformedEndpoint` when the path template cannot be made
    /// into a URL under the environment's base.
    pub fn build(&self, spec: &RequestSpec, key: &Secret<String>) -> Result<PreparedRequest> {
        let mut url = self.absolute_endpoint(spec)?;

        let carries_query = spec.method == Method::GET || spec.stream;
        if carries_query {
            append_query_data(&mut url, spec.data.as_ref());
        }

        let body = if carries_query {
            None
        } else {
            match &spec.data {
                Some(data) => Some(serde_json::to_string(data).map_err(|e| {
                    Error::Config(format!("request body encode failed: {e}"))
                })?),
                None => None,
            }
        };

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", key.expose()))
            .map_err(|e| Error::Config(format!("API key is not a valid header value: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        for (name, value) in &spec.extra_headers {
            let name = match HeaderName::from_bytes(name.as_bytes()) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            let value = match HeaderValue::from_str(value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }

        Ok(PreparedRequest {
            url,
            method: spec.method.clone(),
            headers,
            body,
        })
    }

    /// Join the path template onto the environment base URL. Any query string
    /// embedded in the template survives the join.
    fn absolute_endpoint(&self, spec: &RequestSpec) -> Result<Url> {
        let path = spec.path.trim_matches('/');
        if path.is_empty() || path.contains(char::is_whitespace) || path.contains("://") {
            return Err(Error::MalformedEndpoint {
                path: spec.path.clone(),
                reason: "path template is not a relative endpoint".into(),
            });
        }

        let base = if spec.stream {
            self.environment.stream_base_url()
        } else {
            self.environment.rest_base_url()
        };

        Url::parse(&format!("{base}/{path}")).map_err(|e| Error::MalformedEndpoint {
            path: spec.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// Merge a JSON object into the URL query string. Scalars are rendered
/// directly; arrays become comma-separated lists (the shape OANDA expects
/// for e.g. `instruments`).
fn append_query_data(url: &mut Url, data: Option<&Value>) {
    let Some(Value::Object(map)) = data else {
        return;
    };
    if map.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in map {
        pairs.append_pair(key, &query_value(value));
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(query_value)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
