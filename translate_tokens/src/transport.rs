//! The outbound transport used to reach the token issuance endpoint
//!
//! The provider never talks to the network directly; it hands an
//! [`IssueTokenRequest`] to a [`Transport`] and interprets the status and
//! body that come back. Production code uses [`HttpTransport`]; tests
//! substitute a scripted implementation.

use async_trait::async_trait;
use std::error;

use crate::{Region, SubscriptionKey};

pub mod http;

pub use http::HttpTransport;

/// A request to the token issuance endpoint
#[derive(Clone, Debug)]
pub struct IssueTokenRequest {
    /// The derived issuance endpoint URL
    pub endpoint: String,
    /// The identity presented to the endpoint
    pub subscription_key: SubscriptionKey,
    /// The region header value; may be empty
    pub region: Region,
}

/// The status and body returned by the issuance endpoint
#[derive(Clone, Debug)]
pub struct IssueTokenResponse {
    /// HTTP status code of the response
    pub status: u16,
    /// The response body; the raw token text on success, an error payload otherwise
    pub body: String,
}

impl IssueTokenResponse {
    /// Whether the response carries a success status
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An asynchronous transport for issuance requests
///
/// A transport performs exactly one attempt per call; retries and caching
/// are the caller's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The error type returned when the network call itself fails
    type Error: error::Error + Send + Sync + 'static;

    /// Sends a single issuance request and returns the endpoint's response
    ///
    /// A non-success status is not an error at this layer; it is returned
    /// as a response so the caller can surface the status and body.
    async fn send(&self, request: IssueTokenRequest) -> Result<IssueTokenResponse, Self::Error>;
}
