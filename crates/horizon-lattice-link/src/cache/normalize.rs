//! Normalization of result data into entity records.
//!
//! An object is an entity when it carries a string `__typename` and an
//! identity: the type's configured key fields, else `id` (or `_id`).
//! Entities are lifted out of the tree into flat records and replaced by
//! `{"__ref": "Type:id"}`. Everything else stays embedded.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LinkError, Result};

/// Reserved key marking a reference to an entity record.
pub(crate) const REF: &str = "__ref";

const TYPENAME: &str = "__typename";

/// How entities of one type are identified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyFields {
    /// Identify by these fields, all of which must be present.
    Fields(Vec<String>),
    /// Never normalize; objects of this type stay embedded in their parent.
    Embedded,
}

/// Per-type identity rules for the cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypePolicies {
    policies: HashMap<String, KeyFields>,
}

impl TypePolicies {
    /// Create an empty policy set (every type uses `id`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Identify `typename` by `fields` instead of `id`.
    pub fn key_fields<I, S>(mut self, typename: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies.insert(
            typename.into(),
            KeyFields::Fields(fields.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Keep objects of `typename` embedded.
    pub fn embedded(mut self, typename: impl Into<String>) -> Self {
        self.policies.insert(typename.into(), KeyFields::Embedded);
        self
    }

    fn get(&self, typename: &str) -> Option<&KeyFields> {
        self.policies.get(typename)
    }
}

/// The field shape an operation selected, merged across list elements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Selection(BTreeMap<String, Selection>);

impl Selection {
    pub(crate) fn fields(&self) -> impl Iterator<Item = (&String, &Selection)> {
        self.0.iter()
    }
}

/// A result split into its root tree and the entity records it mentions.
#[derive(Debug)]
pub(crate) struct Normalized {
    pub root: Map<String, Value>,
    pub selection: Selection,
    /// Records in the order they were completed; an entity that appears
    /// twice is listed twice and merged field by field.
    pub entities: Vec<(String, Map<String, Value>)>,
}

/// Normalize the `data` member of a response.
pub(crate) fn normalize(data: &Value, policies: &TypePolicies) -> Result<Normalized> {
    let Value::Object(fields) = data else {
        return Err(LinkError::CacheNormalization(format!(
            "result data must be an object, got {}",
            kind_of(data)
        )));
    };

    let mut normalizer = Normalizer {
        policies,
        entities: Vec::new(),
    };
    let mut selection = Selection::default();
    let root = normalizer.fields(fields, &mut selection, "data")?;
    Ok(Normalized {
        root,
        selection,
        entities: normalizer.entities,
    })
}

struct Normalizer<'a> {
    policies: &'a TypePolicies,
    entities: Vec<(String, Map<String, Value>)>,
}

impl Normalizer<'_> {
    fn value(&mut self, value: &Value, selection: &mut Selection, path: &str) -> Result<Value> {
        match value {
            Value::Object(fields) => self.object(fields, selection, path),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.value(item, selection, &format!("{path}.{i}")))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            scalar => Ok(scalar.clone()),
        }
    }

    fn object(
        &mut self,
        fields: &Map<String, Value>,
        selection: &mut Selection,
        path: &str,
    ) -> Result<Value> {
        if fields.contains_key(REF) {
            return Err(LinkError::CacheNormalization(format!(
                "`{REF}` is reserved (at {path})"
            )));
        }
        let identity = self.identify(fields, path)?;
        let record = self.fields(fields, selection, path)?;
        match identity {
            Some(key) => {
                let reference = reference(&key);
                self.entities.push((key, record));
                Ok(reference)
            }
            None => Ok(Value::Object(record)),
        }
    }

    fn fields(
        &mut self,
        fields: &Map<String, Value>,
        selection: &mut Selection,
        path: &str,
    ) -> Result<Map<String, Value>> {
        let mut record = Map::new();
        for (name, value) in fields {
            let nested = selection.0.entry(name.clone()).or_default();
            let value = self.value(value, nested, &format!("{path}.{name}"))?;
            record.insert(name.clone(), value);
        }
        Ok(record)
    }

    fn identify(&self, fields: &Map<String, Value>, path: &str) -> Result<Option<String>> {
        let typename = match fields.get(TYPENAME) {
            None => return Ok(None),
            Some(Value::String(typename)) => typename,
            Some(other) => {
                return Err(LinkError::CacheNormalization(format!(
                    "`{TYPENAME}` must be a string, got {} (at {path})",
                    kind_of(other)
                )));
            }
        };

        match self.policies.get(typename) {
            Some(KeyFields::Embedded) => Ok(None),
            Some(KeyFields::Fields(keys)) => {
                // BTreeMap keeps the rendered key independent of field order.
                let mut identity = BTreeMap::new();
                for key in keys {
                    match fields.get(key) {
                        Some(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                            identity.insert(key.as_str(), value);
                        }
                        Some(Value::Null) | None => {
                            return Err(LinkError::CacheNormalization(format!(
                                "{typename} is missing key field `{key}` (at {path})"
                            )));
                        }
                        Some(other) => {
                            return Err(LinkError::CacheNormalization(format!(
                                "{typename} key field `{key}` must be a scalar, got {} (at {path})",
                                kind_of(other)
                            )));
                        }
                    }
                }
                let rendered = serde_json::to_string(&identity)
                    .map_err(|e| LinkError::CacheNormalization(e.to_string()))?;
                Ok(Some(format!("{typename}:{rendered}")))
            }
            None => match fields.get("id").or_else(|| fields.get("_id")) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(id)) => Ok(Some(format!("{typename}:{id}"))),
                Some(Value::Number(id)) => Ok(Some(format!("{typename}:{id}"))),
                Some(other) => Err(LinkError::CacheNormalization(format!(
                    "{typename}.id must be a string or number, got {} (at {path})",
                    kind_of(other)
                ))),
            },
        }
    }
}

pub(crate) fn reference(key: &str) -> Value {
    let mut fields = Map::new();
    fields.insert(REF.into(), Value::String(key.into()));
    Value::Object(fields)
}

/// The entity key of a `{"__ref": ...}` value.
pub(crate) fn as_reference(value: &Value) -> Option<&str> {
    match value {
        Value::Object(fields) if fields.len() == 1 => fields.get(REF).and_then(Value::as_str),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
