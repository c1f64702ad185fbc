//! GraphQL operations, their classification, and their results.

mod classify;
mod request;
mod response;

pub use classify::{Route, classify};
pub use request::{Operation, OperationKind};
pub use response::{GraphQLError, GraphQLLocation, GraphQLResponse, PathSegment};
