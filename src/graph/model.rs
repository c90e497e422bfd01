use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Delete,
}

/// Request body of one batch item.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// URL-encoded form, used by product set operations.
    Form(String),
    /// JSON payload, used by catalog item operations.
    Json(Value),
}

impl RequestBody {
    /// Batch items carry their body as a string.
    pub fn encode(&self) -> String {
        match self {
            RequestBody::Form(form) => form.clone(),
            RequestBody::Json(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub method: HttpMethod,
    pub relative_url: String,
    pub body: Option<RequestBody>,
}

impl BatchRequest {
    pub fn new(method: HttpMethod, relative_url: impl Into<String>, body: Option<RequestBody>) -> Self {
        Self {
            method,
            relative_url: relative_url.into(),
            body,
        }
    }
}

/// Positional result for one batch item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchResponse {
    pub code: u16,
    #[serde(default)]
    pub body: String,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        self.code == 200
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// The `id` field of a JSON body, as returned by create calls.
    pub fn created_id(&self) -> Option<String> {
        let value = self.json()?;
        match value.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Remote error message, when the body carries one.
    pub fn error_message(&self) -> Option<String> {
        self.json()?
            .get("error")?
            .get("message")?
            .as_str()
            .map(str::to_string)
    }
}

#[derive(Serialize)]
pub(crate) struct WireRequest<'a> {
    pub method: HttpMethod,
    pub relative_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}
