//! The GraphQL response envelope, shared by both transports.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LinkError;

/// One entry of a response's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path of the response field the error belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// An error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        let Some(path) = &self.path else {
            return Ok(());
        };
        let rendered: Vec<String> = path
            .iter()
            .map(|segment| match segment {
                PathSegment::Field(name) => name.clone(),
                PathSegment::Index(index) => format!("[{index}]"),
            })
            .collect();
        write!(f, " (at {})", rendered.join("."))
    }
}

impl std::error::Error for GraphQLError {}

/// Line and column (both 1-based) in the request document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQLLocation {
    pub line: u32,
    pub column: u32,
}

/// A field name or list index in an error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// `{ data, errors, extensions }` as returned by a GraphQL server, over
/// HTTP or inside a streaming `next` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    /// A response carrying `data` and nothing else, as read from the cache.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Deserialize the whole `data` member.
    ///
    /// Any error in the response fails the call, partial data included.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, LinkError> {
        let data = self.checked_data()?;
        T::deserialize(data)
            .map_err(|e| LinkError::MalformedResponse(format!("cannot decode data: {e}")))
    }

    /// Deserialize one top-level field of `data`.
    ///
    /// ```ignore
    /// // { "data": { "run": { "id": "r1", "status": "STARTED" } } }
    /// let run: Run = response.decode_field("run")?;
    /// ```
    pub fn decode_field<T: DeserializeOwned>(&self, name: &str) -> Result<T, LinkError> {
        let value = self
            .checked_data()?
            .get(name)
            .ok_or_else(|| LinkError::MalformedResponse(format!("no field `{name}` in data")))?;
        T::deserialize(value)
            .map_err(|e| LinkError::MalformedResponse(format!("cannot decode `{name}`: {e}")))
    }

    fn checked_data(&self) -> Result<&Value, LinkError> {
        if self.has_errors() {
            return Err(LinkError::Server(self.errors.clone()));
        }
        self.data
            .as_ref()
            .ok_or_else(|| LinkError::MalformedResponse("response has no data".into()))
    }

    /// Reject a response without data.
    ///
    /// Errors alone become [`LinkError::Server`]; neither data nor errors is
    /// [`LinkError::MalformedResponse`]. Partial data alongside errors is
    /// kept for the caller to inspect.
    pub fn into_result(self) -> Result<Self, LinkError> {
        match (&self.data, self.has_errors()) {
            (Some(data), _) if !data.is_null() => Ok(self),
            (_, true) => Err(LinkError::Server(self.errors)),
            (_, false) => Err(LinkError::MalformedResponse("response has no data".into())),
        }
    }
}
