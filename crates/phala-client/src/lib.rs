//! REST client for the Phala Cloud control plane.
//!
//! All operations return `Result<T, CloudError>`; the `safe_*` twins return
//! [`SafeResult`](phala_types::SafeResult) instead. Requests carry the API key
//! in the `X-API-Key` header.

pub mod client;
pub mod config;
mod cvms;
mod discovery;
mod provision;
pub mod safe;

pub use client::{PhalaCloudClient, API_KEY_HEADER};
pub use config::ClientConfig;
pub use discovery::VerifiedPubkey;
pub use reqwest::Method;
pub use safe::safe;
