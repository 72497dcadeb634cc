//! Client for the third-party game metadata API.

pub mod api;
pub mod errors;
pub mod json;
pub mod token;

pub use api::{DEFAULT_RATE_LIMIT, DEFAULT_REQUEST_TTL, RecordCache, UpstreamApi, cache_key};
pub use errors::UpstreamError;
pub use token::{Credential, TokenCache};
