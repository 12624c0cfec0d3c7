//! Provider API module.
//!
//! The reconciler never talks to a cloud service directly; every resource
//! kind goes through the abstract [`ProviderApi`] capability. The HTTP
//! client is the one concrete implementation.

mod api;
mod http;

pub use api::{CreateRequest, DeleteRequest, ProviderApi, UpdateRequest};
pub use http::HttpProvider;

#[cfg(test)]
pub use api::MockProviderApi;
