//! Acquisition and caching of bearer tokens for the cognitive translation service
//!
//! Every request to the translation API must carry a short-lived bearer token
//! obtained from a separate issuance endpoint. Asking the issuance endpoint
//! for a fresh token on every translation call would add a network round trip
//! to each request and quickly run into the endpoint's per-subscription rate
//! limits, so this crate provides a [`TokenProvider`] that caches the token it
//! last obtained and transparently fetches a replacement once the cached one
//! is too close to expiry to be handed out.
//!
//! The service considers an issued token valid for ten minutes. The provider
//! serves a cached token for only eight ([`CACHE_TTL`]), so a caller always
//! has at least two minutes of real validity in hand even in the face of
//! clock skew or a slow request.
//!
//! The provider is cheap to clone and safe to share between concurrent
//! callers. When several callers observe an invalid cache at the same time,
//! only a single request is made to the issuance endpoint and every caller
//! receives that one result. A caller that gives up waiting (a timeout, a
//! dropped future) never cancels the shared request; it is allowed to
//! complete and populate the cache for everyone else.
//!
//! ```no_run
//! use translate_tokens::{transport::HttpTransport, TokenProvider};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = TokenProvider::new(HttpTransport::with_default_client()?);
//! provider.set_subscription_key("my-subscription-key").await;
//! provider.set_region("westus").await;
//!
//! let token = provider.get_access_token().await?;
//! // attach `token` as the `Authorization` header of a translation request
//! # Ok(())
//! # }
//! ```
//!
//! The outbound transport is an injected capability. [`transport::Transport`]
//! describes the seam, and [`transport::HttpTransport`] is the HTTP
//! implementation used in production; tests substitute their own.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod credential;
pub mod endpoint;
mod provider;
pub mod transport;

pub use braids::*;
pub use credential::{CachedCredential, CredentialStatus, CACHE_TTL};
pub use provider::{TokenError, TokenProvider};
