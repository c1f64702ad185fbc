//! GraphQL operation types.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::classify::main_definition;
use crate::headers::HeaderSet;

/// A GraphQL operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A query operation (read-only).
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (real-time updates).
    Subscription,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// A GraphQL operation.
///
/// The serialized form is the standard request payload (`query`,
/// `variables`, `operationName`, `extensions`). The kind and per-call
/// headers travel alongside it and are fixed once the operation is built.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    /// The GraphQL document.
    pub query: String,

    /// Optional variables for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Optional operation name (for documents with multiple operations).
    #[serde(skip_serializing_if = "Option::is_none", rename = "operationName")]
    pub operation_name: Option<String>,

    /// Extensions (implementation-specific metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,

    #[serde(skip)]
    kind: Option<OperationKind>,

    #[serde(skip)]
    headers: HeaderSet,
}

impl Operation {
    fn with_kind(query: String, kind: Option<OperationKind>) -> Self {
        Self {
            query,
            variables: None,
            operation_name: None,
            extensions: None,
            kind,
            headers: HeaderSet::new(),
        }
    }

    /// Create a query operation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let op = Operation::query(r#"
    ///     query RunsRoot {
    ///         runs { id status }
    ///     }
    /// "#);
    /// ```
    pub fn query(query: impl Into<String>) -> Self {
        Self::with_kind(query.into(), Some(OperationKind::Query))
    }

    /// Create a mutation operation.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::with_kind(query.into(), Some(OperationKind::Mutation))
    }

    /// Create a subscription operation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let op = Operation::subscription(r#"
    ///     subscription RunLogs($runId: ID!) {
    ///         runLogs(runId: $runId) { message }
    ///     }
    /// "#)
    /// .variable("runId", "a1b2");
    /// ```
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::with_kind(query.into(), Some(OperationKind::Subscription))
    }

    /// Create an operation from a raw document.
    ///
    /// The kind is read from the document's main definition. A document with
    /// no query, mutation or subscription definition produces an operation
    /// without a kind, which the router rejects.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let definition = main_definition(&query);
        let mut op = Self::with_kind(query, definition.as_ref().map(|d| d.kind));
        op.operation_name = definition.and_then(|d| d.name);
        op
    }

    /// Set a variable value.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Set all variables from a serializable value.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        self.variables = serde_json::to_value(variables).ok();
        self
    }

    /// Set variables from a HashMap.
    pub fn variables_map(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = Some(Value::Object(variables.into_iter().collect()));
        self
    }

    /// Set the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set extensions (implementation-specific metadata).
    pub fn extensions(mut self, extensions: impl Serialize) -> Self {
        self.extensions = serde_json::to_value(extensions).ok();
        self
    }

    /// Add a per-call header, merged over the client's static headers.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = self.headers.with(name, value);
        self
    }

    /// The operation kind, if known.
    pub fn kind(&self) -> Option<OperationKind> {
        self.kind
    }

    /// Check if this is a subscription.
    pub fn is_subscription(&self) -> bool {
        self.kind == Some(OperationKind::Subscription)
    }

    /// Per-call headers.
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// A human-readable identity: the operation name, or `anonymous <kind>`.
    pub fn identity(&self) -> String {
        match (&self.operation_name, self.kind) {
            (Some(name), _) => name.clone(),
            (None, Some(kind)) => format!("anonymous {kind}"),
            (None, None) => "anonymous".into(),
        }
    }

    /// A stable signature of document, operation name and variables.
    ///
    /// Insignificant whitespace is collapsed and object keys in the
    /// variables are sorted, so two operations that would produce the same
    /// result share a signature. The operation name is part of it because
    /// it selects one operation out of a multi-operation document.
    pub fn signature(&self) -> String {
        let document = self.query.split_whitespace().collect::<Vec<_>>().join(" ");
        let name = self.operation_name.as_deref().unwrap_or_default();
        let variables = match &self.variables {
            Some(Value::Object(map)) if map.is_empty() => String::new(),
            Some(vars) => serde_json::to_string(&Canonical(vars)).unwrap_or_default(),
            None => String::new(),
        };
        format!("{document}|{name}|{variables}")
    }
}

/// Serializes a JSON value with object keys in sorted order, whatever order
/// the underlying map keeps them in.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            Value::Object(map) => {
                let sorted: BTreeMap<&str, Canonical<'_>> =
                    map.iter().map(|(k, v)| (k.as_str(), Canonical(v))).collect();
                sorted.serialize(serializer)
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_operation() {
        let op = Operation::query("{ users { id } }");
        assert_eq!(op.kind(), Some(OperationKind::Query));
        assert!(op.variables.is_none());
    }

    #[test]
    fn test_subscription_operation() {
        let op = Operation::subscription("subscription { userCreated { id } }");
        assert_eq!(op.kind(), Some(OperationKind::Subscription));
        assert!(op.is_subscription());
    }

    #[test]
    fn test_variables() {
        let op = Operation::query("query($id: ID!) { user(id: $id) { name } }")
            .variable("id", "123")
            .variable("limit", 10);

        let vars = op.variables.unwrap();
        assert_eq!(vars["id"], "123");
        assert_eq!(vars["limit"], 10);
    }

    #[test]
    fn test_new_infers_kind_and_name() {
        let op = Operation::new("mutation LaunchRun { launch { id } }");
        assert_eq!(op.kind(), Some(OperationKind::Mutation));
        assert_eq!(op.operation_name.as_deref(), Some("LaunchRun"));
        assert_eq!(op.identity(), "LaunchRun");

        let op = Operation::new("fragment F on Run { id }");
        assert_eq!(op.kind(), None);
    }

    #[test]
    fn test_wire_payload_omits_kind_and_headers() {
        let op = Operation::query("{ a }")
            .operation_name("A")
            .header("X-Trace", "1");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json, serde_json::json!({"query": "{ a }", "operationName": "A"}));
        assert_eq!(op.headers().get("X-Trace"), Some("1"));
    }

    #[test]
    fn test_signature_ignores_whitespace_and_key_order() {
        let a = Operation::query("query {\n  runs { id }\n}")
            .variables(serde_json::json!({"b": 2, "a": 1}));
        let b = Operation::query("query { runs { id } }")
            .variables(serde_json::json!({"a": 1, "b": 2}));
        assert_eq!(a.signature(), b.signature());

        let c = Operation::query("query { runs { id } }").variable("a", 2);
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn test_signature_sorts_nested_variables() {
        let a = Operation::query("{ runs }")
            .variables(serde_json::json!({"filter": {"status": "QUEUED", "job": "etl"}}));
        let b = Operation::query("{ runs }")
            .variables(serde_json::json!({"filter": {"job": "etl", "status": "QUEUED"}}));
        assert_eq!(a.signature(), b.signature());
        assert!(a.signature().ends_with(r#"{"filter":{"job":"etl","status":"QUEUED"}}"#));
    }

    #[test]
    fn test_signature_includes_operation_name() {
        let document = "query A { a } query B { b }";
        let a = Operation::query(document).operation_name("A");
        let b = Operation::query(document).operation_name("B");
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), Operation::query(document).operation_name("A").signature());
    }
}
