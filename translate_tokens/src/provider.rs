use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::{
    credential::CachedCredential,
    endpoint,
    transport::{IssueTokenRequest, Transport},
    BearerToken, Region, SubscriptionKey,
};

/// An error produced while obtaining an access token
///
/// The error is `Clone` so that a single in-flight request's outcome can be
/// delivered to every caller waiting on it.
#[derive(Clone, Debug, Error)]
pub enum TokenError {
    /// No subscription key has been configured on the provider
    ///
    /// Not retryable until a key is supplied via
    /// [`TokenProvider::set_subscription_key`].
    #[error("no subscription key has been set")]
    MissingSubscriptionKey,
    /// The issuance endpoint rejected the request
    #[error("issuance endpoint returned status {status}: {body}")]
    Service {
        /// HTTP status code returned by the endpoint
        status: u16,
        /// The response body, verbatim
        body: String,
    },
    /// The network call itself failed
    #[error("transport failure while requesting token: {0}")]
    Transport(String),
}

type FetchResult = Result<BearerToken, TokenError>;

struct ProviderState {
    subscription_key: Option<SubscriptionKey>,
    region: Region,
    endpoint: String,
    cached: Option<CachedCredential>,
    in_flight: Option<watch::Receiver<Option<FetchResult>>>,
    // Bumped whenever the subscription key changes; a fetch started under an
    // older epoch must not write the cache or clear newer in-flight state.
    epoch: u64,
}

struct Inner<T, C> {
    transport: T,
    clock: C,
    state: Mutex<ProviderState>,
}

/// Issues and caches bearer tokens for the translation service
///
/// One provider instance manages the credential for one subscription.
/// Cloning is cheap; clones share the cache, the configured identity, and
/// any in-flight request.
///
/// [`get_access_token`][Self::get_access_token] serves a cached token when
/// one is fresh, and otherwise fetches a new one through the injected
/// [`Transport`]. Concurrent callers that find the cache invalid share a
/// single fetch.
#[must_use]
pub struct TokenProvider<T, C = System> {
    inner: Arc<Inner<T, C>>,
}

impl<T, C> Clone for TokenProvider<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, C> fmt::Debug for TokenProvider<T, C>
where
    T: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("transport", &self.inner.transport)
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

impl<T> TokenProvider<T, System> {
    /// Constructs a provider over the given transport
    ///
    /// The provider starts with no subscription key and the global endpoint.
    pub fn new(transport: T) -> Self {
        Self::with_clock(transport, System)
    }
}

impl<T, C> TokenProvider<T, C> {
    /// Constructs a provider with a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock(transport: T, clock: C) -> Self {
        let region = Region::from_static("");
        let endpoint = endpoint::issuance_endpoint(&region);

        Self {
            inner: Arc::new(Inner {
                transport,
                clock,
                state: Mutex::new(ProviderState {
                    subscription_key: None,
                    region,
                    endpoint,
                    cached: None,
                    in_flight: None,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Stores the subscription key presented to the issuance endpoint
    ///
    /// Setting a key that differs from the current one drops any cached
    /// credential and detaches any in-flight fetch, forcing the next call to
    /// [`get_access_token`][Self::get_access_token] onto the network. The
    /// key itself is not validated here; a missing or blank key is reported
    /// at fetch time.
    pub async fn set_subscription_key(&self, key: impl Into<SubscriptionKey>) {
        let key = key.into();
        let mut state = self.inner.state.lock().await;

        if state.subscription_key.as_ref() != Some(&key) {
            tracing::debug!("subscription key changed, dropping cached credential");
            state.cached = None;
            state.in_flight = None;
            state.epoch += 1;
        }

        state.subscription_key = Some(key);
    }

    /// Sets the region used to select the issuance endpoint
    ///
    /// An empty or whitespace-only region selects the global endpoint. A
    /// cached credential remains usable for its own lifetime; only the next
    /// fetch targets the new endpoint.
    pub async fn set_region(&self, region: impl Into<Region>) {
        let region = region.into();
        let mut state = self.inner.state.lock().await;

        state.endpoint = endpoint::issuance_endpoint(&region);
        tracing::debug!(endpoint = %state.endpoint, "issuance endpoint updated");
        state.region = region;
    }
}

impl<T, C> TokenProvider<T, C>
where
    T: Transport + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Returns a currently valid bearer token, fetching one if necessary
    ///
    /// A cached token is returned without network activity while it is
    /// fresh. Otherwise a single request is made to the issuance endpoint;
    /// callers arriving while that request is in flight await its result
    /// rather than issuing their own. On success the returned token already
    /// carries the `Bearer ` prefix and has been cached.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MissingSubscriptionKey`] when no key is
    /// configured, [`TokenError::Service`] when the endpoint responds with a
    /// non-success status, and [`TokenError::Transport`] when the network
    /// call fails. A failed fetch never disturbs previously cached state.
    pub async fn get_access_token(&self) -> Result<BearerToken, TokenError> {
        let mut rx = {
            let mut state = self.inner.state.lock().await;

            let key = match &state.subscription_key {
                Some(key) if !key.as_str().trim().is_empty() => key.clone(),
                _ => return Err(TokenError::MissingSubscriptionKey),
            };

            if let Some(cached) = &state.cached {
                if cached.is_fresh_at(self.inner.clock.now()) {
                    tracing::trace!("serving cached credential");
                    return Ok(cached.token().to_owned());
                }
            }

            match &state.in_flight {
                Some(rx) => {
                    tracing::debug!("joining in-flight token request");
                    rx.clone()
                }
                None => self.spawn_fetch(&mut state, key),
            }
        };

        loop {
            {
                let published = rx.borrow_and_update();
                if let Some(result) = published.as_ref() {
                    return result.clone();
                }
            }

            if rx.changed().await.is_err() {
                return Err(TokenError::Transport(
                    "token request was abandoned before completing".to_owned(),
                ));
            }
        }
    }

    /// Registers a new in-flight fetch and spawns it as a detached task
    ///
    /// The task is deliberately not tied to the calling future: a caller
    /// that stops waiting must not cancel a request other callers (or the
    /// cache) still benefit from.
    fn spawn_fetch(
        &self,
        state: &mut ProviderState,
        key: SubscriptionKey,
    ) -> watch::Receiver<Option<FetchResult>> {
        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx.clone());

        let request = IssueTokenRequest {
            endpoint: state.endpoint.clone(),
            subscription_key: key,
            region: state.region.clone(),
        };
        let epoch = state.epoch;
        let inner = Arc::clone(&self.inner);

        tracing::debug!(endpoint = %request.endpoint, "requesting new token");

        tokio::spawn(async move {
            let result = match inner.transport.send(request).await {
                Ok(response) if response.is_success() => {
                    Ok(BearerToken::new(format!("Bearer {}", response.body)))
                }
                Ok(response) => Err(TokenError::Service {
                    status: response.status,
                    body: response.body,
                }),
                Err(error) => Err(TokenError::Transport(error.to_string())),
            };

            {
                let mut state = inner.state.lock().await;
                if state.epoch == epoch {
                    state.in_flight = None;
                    match &result {
                        Ok(token) => {
                            let issued = inner.clock.now();
                            tracing::info!(issued = issued.0, "caching new credential");
                            state.cached = Some(CachedCredential::new(token.clone(), issued));
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "token request failed");
                        }
                    }
                }
            }

            // Send can only fail once every receiver is gone, in which case
            // the result has already served its purpose above.
            let _ = tx.send(Some(result));
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicU64, AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
    };

    use aliri_clock::UnixTime;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        credential::CACHE_TTL,
        endpoint::GLOBAL_ENDPOINT,
        transport::IssueTokenResponse,
    };

    #[derive(Clone, Debug, Default)]
    struct SharedClock(Arc<AtomicU64>);

    impl SharedClock {
        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for SharedClock {
        fn now(&self) -> UnixTime {
            UnixTime(self.0.load(Ordering::SeqCst))
        }
    }

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct StubFault(String);

    enum Script {
        Token(&'static str),
        Status(u16, &'static str),
        Fault(&'static str),
    }

    #[derive(Clone, Default)]
    struct StubTransport {
        calls: Arc<AtomicUsize>,
        script: Arc<StdMutex<VecDeque<Script>>>,
        seen: Arc<StdMutex<Vec<IssueTokenRequest>>>,
        gate: Option<Arc<Notify>>,
    }

    impl StubTransport {
        fn scripted(script: Vec<Script>) -> Self {
            Self {
                script: Arc::new(StdMutex::new(script.into())),
                ..Self::default()
            }
        }

        fn gated(script: Vec<Script>) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            let transport = Self {
                gate: Some(Arc::clone(&gate)),
                ..Self::scripted(script)
            };
            (transport, gate)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn request(&self, idx: usize) -> IssueTokenRequest {
            self.seen.lock().unwrap()[idx].clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for StubTransport {
        type Error = StubFault;

        async fn send(
            &self,
            request: IssueTokenRequest,
        ) -> Result<IssueTokenResponse, StubFault> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);

            match self.script.lock().unwrap().pop_front() {
                Some(Script::Token(body)) => Ok(IssueTokenResponse {
                    status: 200,
                    body: body.to_owned(),
                }),
                Some(Script::Status(status, body)) => Ok(IssueTokenResponse {
                    status,
                    body: body.to_owned(),
                }),
                Some(Script::Fault(message)) => Err(StubFault(message.to_owned())),
                None => Ok(IssueTokenResponse {
                    status: 200,
                    body: "fallback-token".to_owned(),
                }),
            }
        }
    }

    fn provider(script: Vec<Script>) -> (TokenProvider<StubTransport, SharedClock>, StubTransport, SharedClock) {
        let transport = StubTransport::scripted(script);
        let clock = SharedClock::default();
        let provider = TokenProvider::with_clock(transport.clone(), clock.clone());
        (provider, transport, clock)
    }

    async fn yield_a_while() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn missing_key_fails_without_network_activity() {
        let (provider, transport, _) = provider(vec![]);

        let error = provider.get_access_token().await.unwrap_err();

        assert!(matches!(error, TokenError::MissingSubscriptionKey));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn blank_key_is_treated_as_missing() {
        let (provider, transport, _) = provider(vec![]);
        provider.set_subscription_key("   ").await;

        let error = provider.get_access_token().await.unwrap_err();

        assert!(matches!(error, TokenError::MissingSubscriptionKey));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn token_is_prefixed_and_served_from_cache() {
        let (provider, transport, _) = provider(vec![Script::Token("abc123")]);
        provider.set_subscription_key("key-1").await;

        let first = provider.get_access_token().await.unwrap();
        let second = provider.get_access_token().await.unwrap();

        assert_eq!(first.as_str(), "Bearer abc123");
        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn refetches_once_ttl_has_elapsed() {
        let (provider, transport, clock) =
            provider(vec![Script::Token("first"), Script::Token("second")]);
        provider.set_subscription_key("key-1").await;

        let first = provider.get_access_token().await.unwrap();

        clock.advance(CACHE_TTL.0 - 1);
        let still_cached = provider.get_access_token().await.unwrap();
        assert_eq!(first, still_cached);
        assert_eq!(transport.calls(), 1);

        clock.advance(1);
        let refreshed = provider.get_access_token().await.unwrap();
        assert_eq!(refreshed.as_str(), "Bearer second");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn key_change_invalidates_a_fresh_cache() {
        let (provider, transport, _) =
            provider(vec![Script::Token("first"), Script::Token("second")]);
        provider.set_subscription_key("key-1").await;

        provider.get_access_token().await.unwrap();
        provider.set_subscription_key("key-2").await;
        let refreshed = provider.get_access_token().await.unwrap();

        assert_eq!(refreshed.as_str(), "Bearer second");
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.request(1).subscription_key.as_str(), "key-2");
    }

    #[tokio::test]
    async fn setting_the_same_key_keeps_the_cache() {
        let (provider, transport, _) = provider(vec![Script::Token("only")]);
        provider.set_subscription_key("key-1").await;

        provider.get_access_token().await.unwrap();
        provider.set_subscription_key("key-1").await;
        provider.get_access_token().await.unwrap();

        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn region_change_keeps_the_cache_but_retargets_the_next_fetch() {
        let (provider, transport, clock) =
            provider(vec![Script::Token("first"), Script::Token("second")]);
        provider.set_subscription_key("key-1").await;

        provider.get_access_token().await.unwrap();
        assert_eq!(transport.request(0).endpoint, GLOBAL_ENDPOINT);

        provider.set_region("westus").await;
        provider.get_access_token().await.unwrap();
        assert_eq!(transport.calls(), 1);

        clock.advance(CACHE_TTL.0);
        provider.get_access_token().await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(
            transport.request(1).endpoint,
            "https://westus.api.cognitive.microsoft.com/sts/v1.0/issueToken"
        );
        assert_eq!(transport.request(1).region.as_str(), "westus");
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_fetch() {
        let (provider, transport, _) = provider(vec![Script::Token("abc123")]);
        provider.set_subscription_key("key-1").await;

        let (a, b, c) = tokio::join!(
            provider.get_access_token(),
            provider.get_access_token(),
            provider.get_access_token(),
        );

        let a = a.unwrap();
        assert_eq!(a.as_str(), "Bearer abc123");
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_failure() {
        let (provider, transport, _) = provider(vec![Script::Status(401, "denied")]);
        provider.set_subscription_key("key-1").await;

        let (a, b) = tokio::join!(provider.get_access_token(), provider.get_access_token());

        for result in [a, b].iter() {
            match result {
                Err(TokenError::Service { status, body }) => {
                    assert_eq!(*status, 401);
                    assert_eq!(body, "denied");
                }
                other => panic!("expected service error, got {:?}", other),
            }
        }
        assert_eq!(transport.calls(), 1);

        // the failed fetch is not sticky; the next call tries again
        provider.get_access_token().await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn transport_fault_is_surfaced_and_retryable() {
        let (provider, transport, _) =
            provider(vec![Script::Fault("connection reset"), Script::Token("ok")]);
        provider.set_subscription_key("key-1").await;

        let error = provider.get_access_token().await.unwrap_err();
        match error {
            TokenError::Transport(message) => assert!(message.contains("connection reset")),
            other => panic!("expected transport error, got {:?}", other),
        }

        let token = provider.get_access_token().await.unwrap();
        assert_eq!(token.as_str(), "Bearer ok");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn aborted_waiter_does_not_cancel_the_shared_fetch() {
        let (transport, gate) = StubTransport::gated(vec![Script::Token("abc123")]);
        let provider = TokenProvider::with_clock(transport.clone(), SharedClock::default());
        provider.set_subscription_key("key-1").await;

        let waiter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get_access_token().await })
        };

        // let the waiter register the fetch, then give up on it
        yield_a_while().await;
        waiter.abort();

        gate.notify_one();
        yield_a_while().await;

        let token = provider.get_access_token().await.unwrap();
        assert_eq!(token.as_str(), "Bearer abc123");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_completing_after_key_change_does_not_populate_the_cache() {
        let (transport, gate) =
            StubTransport::gated(vec![Script::Token("stale"), Script::Token("fresh")]);
        let provider = TokenProvider::with_clock(transport.clone(), SharedClock::default());
        provider.set_subscription_key("key-1").await;

        let waiter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.get_access_token().await })
        };

        yield_a_while().await;
        provider.set_subscription_key("key-2").await;

        gate.notify_one();
        let stale = waiter.await.unwrap().unwrap();
        assert_eq!(stale.as_str(), "Bearer stale");

        // the stale fetch resolved its own waiter but must not have cached
        gate.notify_one();
        let fresh = provider.get_access_token().await.unwrap();
        assert_eq!(fresh.as_str(), "Bearer fresh");
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.request(1).subscription_key.as_str(), "key-2");
    }
}
