use aliri_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{BearerToken, BearerTokenRef};

/// How long an obtained token is served from cache
///
/// The issuance endpoint considers a token valid for ten minutes; serving it
/// for only eight leaves a caller at least two minutes of real validity to
/// absorb clock skew and in-flight request latency.
pub const CACHE_TTL: DurationSecs = DurationSecs(480);

/// A credential's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialStatus {
    /// The credential may be handed to callers
    Fresh,
    /// The credential is too close to expiry and must be replaced
    Expired,
}

/// A bearer token together with the time it was obtained
#[derive(Clone, Debug)]
pub struct CachedCredential {
    token: BearerToken,
    issued: UnixTime,
}

impl CachedCredential {
    /// Records a token obtained at `issued`
    pub fn new(token: BearerToken, issued: UnixTime) -> Self {
        Self { token, issued }
    }

    /// Gets the cached bearer token
    #[inline]
    pub fn token(&self) -> &BearerTokenRef {
        &self.token
    }

    /// Gets the time the token was obtained
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time this entry stops being served from cache
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.issued + CACHE_TTL
    }

    /// Gets the credential's status based on the system clock
    #[inline]
    pub fn status(&self) -> CredentialStatus {
        self.status_with_clock(&System)
    }

    /// Gets the credential's status based on the current time as reported
    /// by the provided clock
    #[inline]
    pub fn status_with_clock<C: Clock>(&self, clock: &C) -> CredentialStatus {
        self.status_at(clock.now())
    }

    /// Gets the credential's status as of the provided time
    #[inline]
    pub fn status_at(&self, time: UnixTime) -> CredentialStatus {
        if time < self.expiry() {
            CredentialStatus::Fresh
        } else {
            CredentialStatus::Expired
        }
    }

    /// Whether the credential may still be served as of the provided time
    #[inline]
    pub fn is_fresh_at(&self, time: UnixTime) -> bool {
        self.status_at(time) == CredentialStatus::Fresh
    }
}
