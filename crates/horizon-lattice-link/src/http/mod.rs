//! HTTP plumbing for the request transport.
//!
//! A thin wrapper over `reqwest` that speaks [`HeaderSet`](crate::HeaderSet)
//! and maps failures onto [`LinkError`](crate::LinkError). GraphQL over HTTP
//! only needs `POST` with a JSON body, so that is all it offers.
//!
//! # Example
//!
//! ```ignore
//! use horizon_lattice_link::http::HttpClient;
//!
//! let client = HttpClient::builder().build()?;
//! let response = client
//!     .post("http://localhost:3000/graphql")
//!     .json(&serde_json::json!({"query": "{ version }"}))
//!     .send()
//!     .await?
//!     .error_for_status_with_body()
//!     .await?;
//! let body: serde_json::Value = response.json().await?;
//! ```

mod client;
mod request;
mod response;

pub use client::{HttpClient, HttpClientBuilder, HttpClientConfig};
pub use request::HttpRequestBuilder;
pub use response::HttpResponse;
