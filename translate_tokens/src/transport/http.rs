//! A transport backed by a shared HTTP client

use async_trait::async_trait;
use thiserror::Error;

use super::{IssueTokenRequest, IssueTokenResponse, Transport};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const SUBSCRIPTION_REGION_HEADER: &str = "Ocp-Apim-Subscription-Region";

/// Sends issuance requests over HTTP
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Constructs a transport over an existing client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Constructs a transport with a client identifying this crate as its user agent
    pub fn with_default_client() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("translate_tokens/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

/// An error while carrying a request to the issuance endpoint
#[derive(Debug, Error)]
pub enum HttpTransportError {
    /// The derived endpoint could not be parsed as a URL
    #[error("invalid issuance endpoint: {0}")]
    InvalidEndpoint(String),
    /// A header value contained bytes that cannot be sent
    #[error("invalid request header value")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    /// The request could not be sent
    #[error("error sending request to the issuance endpoint")]
    RequestSend(#[source] reqwest::Error),
    /// The response body could not be read
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
}

#[async_trait]
impl Transport for HttpTransport {
    type Error = HttpTransportError;

    async fn send(&self, request: IssueTokenRequest) -> Result<IssueTokenResponse, Self::Error> {
        send_request(&self.client, request).await
    }
}

#[tracing::instrument(
    err,
    skip(client, request),
    fields(endpoint = %request.endpoint),
)]
async fn send_request(
    client: &reqwest::Client,
    request: IssueTokenRequest,
) -> Result<IssueTokenResponse, HttpTransportError> {
    let url = reqwest::Url::parse(&request.endpoint)
        .map_err(|error| HttpTransportError::InvalidEndpoint(error.to_string()))?;

    let mut key = reqwest::header::HeaderValue::from_str(request.subscription_key.as_str())?;
    key.set_sensitive(true);
    let region = reqwest::header::HeaderValue::from_str(request.region.as_str())?;

    tracing::trace!("requesting token from issuance endpoint");

    let response = client
        .post(url)
        .header(SUBSCRIPTION_KEY_HEADER, key)
        .header(SUBSCRIPTION_REGION_HEADER, region)
        .header(reqwest::header::CONTENT_LENGTH, "0")
        .send()
        .await
        .map_err(HttpTransportError::RequestSend)?;

    let status = response.status().as_u16();

    tracing::debug!(
        response.status = status,
        "received response from issuance endpoint"
    );

    let body = response.text().await.map_err(HttpTransportError::BodyRead)?;

    Ok(IssueTokenResponse { status, body })
}
