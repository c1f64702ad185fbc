//! The normalized operation cache.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::normalize::{Normalized, Selection, TypePolicies, as_reference, normalize};
use crate::error::Result;
use crate::operation::{GraphQLResponse, Operation};

const TARGET: &str = "horizon_lattice_link::cache";

/// A serializable copy of the cache contents.
///
/// Used to seed a new cache ([`OperationCache::restore`]) or to persist
/// one ([`OperationCache::extract`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Entity records keyed by `Typename:id`.
    #[serde(default)]
    pub entities: BTreeMap<String, Map<String, Value>>,
    /// Stored operation results keyed by operation signature.
    #[serde(default)]
    roots: BTreeMap<String, RootEntry>,
}

impl CacheSnapshot {
    /// Number of entity records in the snapshot.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the snapshot holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.roots.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RootEntry {
    data: Map<String, Value>,
    selection: Selection,
}

#[derive(Default)]
struct Store {
    entities: HashMap<String, Map<String, Value>>,
    roots: HashMap<String, RootEntry>,
}

impl Store {
    /// Merge a normalized result. Returns whether anything changed.
    fn apply(&mut self, signature: String, normalized: Normalized) -> bool {
        let mut changed = false;
        for (key, fields) in normalized.entities {
            let record = self.entities.entry(key).or_default();
            for (name, value) in fields {
                if record.get(&name) != Some(&value) {
                    record.insert(name, value);
                    changed = true;
                }
            }
        }

        let root = RootEntry {
            data: normalized.root,
            selection: normalized.selection,
        };
        if self.roots.get(&signature) != Some(&root) {
            self.roots.insert(signature, root);
            changed = true;
        }
        changed
    }

    fn read_object(&self, fields: &Map<String, Value>, selection: &Selection) -> Option<Value> {
        let mut out = Map::new();
        for (name, nested) in selection.fields() {
            // Fields selected by a sibling list element may be absent here.
            if let Some(value) = fields.get(name) {
                out.insert(name.clone(), self.read_value(value, nested)?);
            }
        }
        Some(Value::Object(out))
    }

    fn read_value(&self, value: &Value, selection: &Selection) -> Option<Value> {
        if let Some(key) = as_reference(value) {
            let record = self.entities.get(key)?;
            return self.read_object(record, selection);
        }
        match value {
            Value::Object(fields) => self.read_object(fields, selection),
            Value::Array(items) => items
                .iter()
                .map(|item| self.read_value(item, selection))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            scalar => Some(scalar.clone()),
        }
    }
}

/// A normalized, entity-keyed store of operation results.
///
/// Results from both transports go through the same normalization and the
/// same field-level last-write-wins merge. A write is applied under a
/// single write lock, so readers see either none or all of it.
///
/// # Example
///
/// ```ignore
/// let cache = OperationCache::new();
/// let op = Operation::query("{ run(id: \"r1\") { __typename id status } }");
///
/// cache.write(&op, &json!({"run": {"__typename": "Run", "id": "r1", "status": "QUEUED"}}))?;
/// assert_eq!(cache.read(&op).unwrap()["run"]["status"], "QUEUED");
/// ```
pub struct OperationCache {
    policies: TypePolicies,
    store: RwLock<Store>,
    version: watch::Sender<u64>,
}

impl Default for OperationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationCache {
    /// Create an empty cache identifying entities by `id`.
    pub fn new() -> Self {
        Self::with_policies(TypePolicies::default())
    }

    /// Create an empty cache with custom identity rules.
    pub fn with_policies(policies: TypePolicies) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            policies,
            store: RwLock::new(Store::default()),
            version,
        }
    }

    /// The identity rules in use.
    pub fn policies(&self) -> &TypePolicies {
        &self.policies
    }

    /// Normalize `data` and merge it into the cache as the result of
    /// `operation`.
    ///
    /// Returns whether the visible state changed. Writing the same data
    /// twice changes nothing the second time and does not notify watchers.
    /// On a [`CacheNormalization`](crate::LinkError::CacheNormalization)
    /// error nothing is written.
    pub fn write(&self, operation: &Operation, data: &Value) -> Result<bool> {
        let normalized = match normalize(data, &self.policies) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::warn!(
                    target: TARGET,
                    operation = %operation.identity(),
                    error = %e,
                    "dropping cache write"
                );
                return Err(e);
            }
        };
        let entities = normalized.entities.len();

        let changed = self.store.write().apply(operation.signature(), normalized);
        if changed {
            self.bump();
        }
        tracing::trace!(
            target: TARGET,
            operation = %operation.identity(),
            entities,
            changed,
            "cache write"
        );
        Ok(changed)
    }

    /// Write the data of a response, if it has any.
    pub fn write_response(&self, operation: &Operation, response: &GraphQLResponse) -> Result<bool> {
        match &response.data {
            Some(data) if !data.is_null() => self.write(operation, data),
            _ => Ok(false),
        }
    }

    /// Read the result of `operation` composed from the current entity
    /// records.
    ///
    /// Returns `None` on a miss: the operation was never written, or an
    /// entity it references has been evicted.
    pub fn read(&self, operation: &Operation) -> Option<Value> {
        let store = self.store.read();
        let root = store.roots.get(&operation.signature())?;
        store.read_object(&root.data, &root.selection)
    }

    /// The raw normalized record for `key` (`Typename:id`).
    pub fn entity(&self, key: &str) -> Option<Map<String, Value>> {
        self.store.read().entities.get(key).cloned()
    }

    /// Remove one entity record. Queries referencing it miss afterwards.
    pub fn evict(&self, key: &str) -> bool {
        let removed = self.store.write().entities.remove(key).is_some();
        if removed {
            tracing::debug!(target: TARGET, key, "evicted entity");
            self.bump();
        }
        removed
    }

    /// Remove everything.
    pub fn clear(&self) {
        let had_contents = {
            let mut store = self.store.write();
            let had_contents = !store.entities.is_empty() || !store.roots.is_empty();
            *store = Store::default();
            had_contents
        };
        if had_contents {
            self.bump();
        }
    }

    /// Copy the cache contents.
    pub fn extract(&self) -> CacheSnapshot {
        let store = self.store.read();
        CacheSnapshot {
            entities: store
                .entities
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            roots: store
                .roots
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Replace the cache contents with `snapshot`.
    pub fn restore(&self, snapshot: CacheSnapshot) {
        {
            let mut store = self.store.write();
            store.entities = snapshot.entities.into_iter().collect();
            store.roots = snapshot.roots.into_iter().collect();
        }
        tracing::debug!(target: TARGET, "restored cache snapshot");
        self.bump();
    }

    /// Number of entity records.
    pub fn len(&self) -> usize {
        self.store.read().entities.len()
    }

    /// Whether the cache holds no entity records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current version, bumped on every visible change.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Watch the version counter.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl std::fmt::Debug for OperationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationCache")
            .field("entities", &self.len())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use serde_json::json;

    fn run_query() -> Operation {
        Operation::query("query Run($id: ID!) { run(id: $id) { __typename id status } }")
            .variable("id", "r1")
    }

    #[test]
    fn test_read_composes_current_entities() {
        let cache = OperationCache::new();
        let query = run_query();
        cache
            .write(&query, &json!({"run": {"__typename": "Run", "id": "r1", "status": "QUEUED"}}))
            .unwrap();

        // A subscription pushes a newer status for the same entity.
        let sub = Operation::subscription("subscription { runUpdated { __typename id status } }");
        cache
            .write(&sub, &json!({"runUpdated": {"__typename": "Run", "id": "r1", "status": "SUCCESS"}}))
            .unwrap();

        assert_eq!(
            cache.read(&query),
            Some(json!({"run": {"__typename": "Run", "id": "r1", "status": "SUCCESS"}}))
        );
    }

    #[test]
    fn test_fields_merge_last_write_wins() {
        let cache = OperationCache::new();
        let a = Operation::query("{ run { __typename id status } }");
        let b = Operation::query("{ run { __typename id startTime } }");
        cache
            .write(&a, &json!({"run": {"__typename": "Run", "id": "r1", "status": "QUEUED"}}))
            .unwrap();
        cache
            .write(&b, &json!({"run": {"__typename": "Run", "id": "r1", "startTime": 10}}))
            .unwrap();

        let record = cache.entity("Run:r1").unwrap();
        assert_eq!(record["status"], json!("QUEUED"));
        assert_eq!(record["startTime"], json!(10));
        // Each query reads only what it selected.
        assert_eq!(cache.read(&a).unwrap()["run"].get("startTime"), None);
    }

    #[test]
    fn test_identical_write_is_idempotent() {
        let cache = OperationCache::new();
        let query = run_query();
        let data = json!({"run": {"__typename": "Run", "id": "r1", "status": "QUEUED"}});

        assert!(cache.write(&query, &data).unwrap());
        let version = cache.version();
        let snapshot = cache.extract();

        assert!(!cache.write(&query, &data).unwrap());
        assert_eq!(cache.version(), version);
        assert_eq!(cache.extract(), snapshot);
    }

    #[test]
    fn test_failed_write_leaves_cache_untouched() {
        let cache = OperationCache::new();
        let query = run_query();
        cache
            .write(&query, &json!({"run": {"__typename": "Run", "id": "r1", "status": "QUEUED"}}))
            .unwrap();
        let before = cache.extract();

        // The first entity is fine, the second is malformed: neither lands.
        let result = cache.write(
            &query,
            &json!({"run": {"__typename": "Run", "id": "r1", "status": "FAILURE",
                            "owner": {"__typename": "User", "id": [1]}}}),
        );
        assert!(matches!(result, Err(LinkError::CacheNormalization(_))));
        assert_eq!(cache.extract(), before);
    }

    #[test]
    fn test_evict_turns_reads_into_misses() {
        let cache = OperationCache::new();
        let query = run_query();
        cache
            .write(&query, &json!({"run": {"__typename": "Run", "id": "r1", "status": "QUEUED"}}))
            .unwrap();

        assert!(cache.evict("Run:r1"));
        assert!(!cache.evict("Run:r1"));
        assert_eq!(cache.read(&query), None);
    }

    #[test]
    fn test_snapshot_round_trip_and_clear() {
        let cache = OperationCache::new();
        let query = run_query();
        cache
            .write(&query, &json!({"run": {"__typename": "Run", "id": "r1", "status": "QUEUED"}}))
            .unwrap();

        let seeded = OperationCache::new();
        seeded.restore(cache.extract());
        assert_eq!(seeded.read(&query), cache.read(&query));

        seeded.clear();
        assert!(seeded.is_empty());
        assert_eq!(seeded.read(&query), None);
    }

    #[test]
    fn test_cyclic_entities_read_by_shape() {
        let cache = OperationCache::new();
        let query = Operation::query("{ user { __typename id friend { __typename id friend { __typename id } } } }");
        cache
            .write(
                &query,
                &json!({"user": {"__typename": "User", "id": "1",
                    "friend": {"__typename": "User", "id": "2",
                        "friend": {"__typename": "User", "id": "1"}}}}),
            )
            .unwrap();

        let read = cache.read(&query).unwrap();
        assert_eq!(read["user"]["friend"]["friend"]["id"], json!("1"));
    }
}
