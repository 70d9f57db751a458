//! OAuth token acquisition and caching
//!
//! [`TokenProvider`] acquires tokens for a `(tenant, scope)` pair through one
//! of five flows and records every result in the [`TokenCache`]. The HTTP
//! executor only ever uses the silent path, through the [`TokenSource`] seam.

pub mod authority;
pub mod cache;
pub mod error;
pub mod identity;
pub mod interactive;
pub mod provider;
pub mod token;

pub use authority::Authority;
pub use cache::{CacheContent, CachePersistence, FileCachePersistence, MemoryCachePersistence, TokenCache};
pub use error::AuthError;
pub use identity::IdentityClient;
pub use provider::{AuthMode, StaticTokenSource, TokenProvider, TokenSource, UserCredentials};
pub use token::{AccountIdentity, Token};
