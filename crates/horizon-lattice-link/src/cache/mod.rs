//! Normalized client-side cache.
//!
//! Results are split into entity records keyed by `Typename:id` plus a
//! per-operation root tree that references them. Reading an operation
//! composes its root tree with the current records, so an update to an
//! entity from any operation is visible to every query that selected it.

mod normalize;
mod store;

pub use normalize::{KeyFields, TypePolicies};
pub use store::{CacheSnapshot, OperationCache};
