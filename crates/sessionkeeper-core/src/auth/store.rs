//! The token store: sole owner of the persisted token and its expiry.
//!
//! The pair is mirrored in memory and written through to a
//! [`StorageBackend`]. Token and expiry are always written and cleared
//! together. Every operation is total: backend faults are logged and the
//! in-memory mirror stays authoritative for the rest of the process.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::storage::{MemoryStorage, StorageBackend};
use super::token::{self, TokenClaims};
use crate::clock::{Clock, SystemClock};
use crate::utils::{format_remaining, mask_token};

/// Storage key for the bearer token.
pub const TOKEN_KEY: &str = "sessionkeeper.v1.token";

/// Storage key for the ISO-8601 expiry timestamp.
pub const EXPIRY_KEY: &str = "sessionkeeper.v1.expiry";

/// Lead time before expiry at which a refresh becomes due (5 minutes).
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 300;

/// Lifetime assumed when neither the caller nor the token states one (24 hours).
pub const DEFAULT_FALLBACK_LIFETIME_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub refresh_threshold: Duration,
    pub fallback_lifetime: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::seconds(DEFAULT_REFRESH_THRESHOLD_SECS),
            fallback_lifetime: Duration::seconds(DEFAULT_FALLBACK_LIFETIME_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

/// Proof that the store has not been cleared or rewritten since it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    epoch: u64,
}

/// Diagnostic classification of the stored token, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Missing,
    Invalid,
    Expired,
    RefreshNeeded,
    Valid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenStatusReport {
    pub status: TokenStatus,
    pub message: String,
}

#[derive(Debug, Default)]
struct StoreInner {
    current: Option<StoredToken>,
    // Bumped by every write and clear.
    epoch: u64,
}

pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
    inner: Mutex<StoreInner>,
}

impl TokenStore {
    /// Create a store and load any previously persisted pair from `backend`.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        settings: StoreSettings,
    ) -> Self {
        let current = Self::load(backend.as_ref());
        Self {
            backend,
            clock,
            settings,
            inner: Mutex::new(StoreInner { current, epoch: 0 }),
        }
    }

    /// A non-persistent store on the system clock with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock),
            StoreSettings::default(),
        )
    }

    fn load(backend: &dyn StorageBackend) -> Option<StoredToken> {
        let token = backend.get(TOKEN_KEY);
        let expiry = backend.get(EXPIRY_KEY);
        let (token, expiry) = match (token, expiry) {
            (Ok(token), Ok(expiry)) => (token, expiry),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Token storage unreadable, starting without a session");
                return None;
            }
        };

        match (token, expiry) {
            (None, None) => None,
            (Some(token), Some(raw_expiry)) => match DateTime::parse_from_rfc3339(&raw_expiry) {
                Ok(expiry) => {
                    debug!(token = %mask_token(&token), %expiry, "Loaded stored token");
                    Some(StoredToken {
                        token,
                        expiry: expiry.with_timezone(&Utc),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Stored expiry is unparseable, discarding token");
                    Self::remove_pair(backend);
                    None
                }
            },
            _ => {
                warn!("Stored token and expiry are out of step, discarding both");
                Self::remove_pair(backend);
                None
            }
        }
    }

    fn remove_pair(backend: &dyn StorageBackend) {
        if let Err(e) = backend.remove_many(&[TOKEN_KEY, EXPIRY_KEY]) {
            warn!(error = %e, "Failed to remove stored token");
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ===== Writes =====

    /// Store `token` and return its computed expiry.
    ///
    /// The expiry is `now + duration_hint` when a hint is given, else the
    /// token's own `exp` claim, else `now + fallback_lifetime`.
    pub fn set_token(&self, token: &str, duration_hint: Option<Duration>) -> DateTime<Utc> {
        let mut inner = self.lock();
        self.write_locked(&mut inner, token, duration_hint)
    }

    fn write_locked(
        &self,
        inner: &mut StoreInner,
        token: &str,
        duration_hint: Option<Duration>,
    ) -> DateTime<Utc> {
        let expiry = self.compute_expiry(token, duration_hint);
        let raw_expiry = expiry.to_rfc3339();

        if let Err(e) = self
            .backend
            .set_many(&[(TOKEN_KEY, token), (EXPIRY_KEY, raw_expiry.as_str())])
        {
            warn!(error = %e, "Failed to persist token, keeping it for this process only");
        }

        inner.current = Some(StoredToken {
            token: token.to_string(),
            expiry,
        });
        inner.epoch += 1;
        debug!(token = %mask_token(token), %expiry, "Token stored");
        expiry
    }

    fn compute_expiry(&self, token: &str, duration_hint: Option<Duration>) -> DateTime<Utc> {
        let now = self.clock.now();
        // A hint that overflows the calendar counts as no hint.
        if let Some(expiry) = duration_hint.and_then(|hint| now.checked_add_signed(hint)) {
            return expiry;
        }
        if let Some(exp) = token::decode(token).and_then(|claims| claims.expires_at()) {
            return exp;
        }
        now.checked_add_signed(self.settings.fallback_lifetime)
            .unwrap_or_else(|| now + Duration::days(1))
    }

    /// Remove token and expiry, invalidating every outstanding reservation.
    pub fn clear(&self) {
        let mut inner = self.lock();
        Self::remove_pair(self.backend.as_ref());
        inner.current = None;
        inner.epoch += 1;
        debug!("Token store cleared");
    }

    /// Clear only if `reservation` is still current. Returns whether it cleared.
    pub fn clear_if_current(&self, reservation: &Reservation) -> bool {
        let mut inner = self.lock();
        if inner.epoch != reservation.epoch {
            return false;
        }
        Self::remove_pair(self.backend.as_ref());
        inner.current = None;
        inner.epoch += 1;
        debug!("Token store cleared");
        true
    }

    /// Take a reservation against the current contents.
    pub fn reserve(&self) -> Reservation {
        Reservation {
            epoch: self.lock().epoch,
        }
    }

    /// Whether nothing was written or cleared since `reservation` was taken.
    pub fn is_current(&self, reservation: &Reservation) -> bool {
        self.lock().epoch == reservation.epoch
    }

    /// Store `token` only if `reservation` is still current. Returns the new
    /// expiry, or `None` if the store changed in the meantime.
    pub fn commit(
        &self,
        reservation: Reservation,
        token: &str,
        duration_hint: Option<Duration>,
    ) -> Option<DateTime<Utc>> {
        let mut inner = self.lock();
        if inner.epoch != reservation.epoch {
            debug!("Discarding token write from a stale reservation");
            return None;
        }
        Some(self.write_locked(&mut inner, token, duration_hint))
    }

    // ===== Reads =====

    pub fn stored(&self) -> Option<StoredToken> {
        self.lock().current.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.lock().current.as_ref().map(|c| c.token.clone())
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.lock().current.as_ref().map(|c| c.expiry)
    }

    /// Decode `token`, or the stored token when `None`.
    pub fn decode(&self, token: Option<&str>) -> Option<TokenClaims> {
        match token {
            Some(token) => token::decode(token),
            None => self.token().and_then(|t| token::decode(&t)),
        }
    }

    /// Structurally decodable and not past its `exp` claim. Tokens without an
    /// `exp` claim never expire by this check.
    pub fn is_valid(&self, token: Option<&str>) -> bool {
        match self.decode(token) {
            Some(claims) => match claims.expires_at() {
                Some(exp) => exp > self.clock.now(),
                None => true,
            },
            None => false,
        }
    }

    /// True when no expiry is stored or it has passed.
    pub fn is_expired(&self) -> bool {
        match self.expiry() {
            Some(expiry) => expiry <= self.clock.now(),
            None => true,
        }
    }

    /// True iff `0 < expiry - now <= refresh_threshold`.
    pub fn needs_refresh(&self) -> bool {
        match self.expiry() {
            Some(expiry) => {
                let remaining = expiry - self.clock.now();
                remaining > Duration::zero() && remaining <= self.settings.refresh_threshold
            }
            None => false,
        }
    }

    /// Time until the stored token enters its refresh window, never negative.
    pub fn time_until_refresh(&self) -> Duration {
        match self.expiry() {
            Some(expiry) => self.time_until_refresh_from(expiry),
            None => Duration::zero(),
        }
    }

    pub fn time_until_refresh_from(&self, expiry: DateTime<Utc>) -> Duration {
        let refresh_at = expiry
            .checked_sub_signed(self.settings.refresh_threshold)
            .unwrap_or(expiry);
        (refresh_at - self.clock.now()).max(Duration::zero())
    }

    /// Diagnostic status of the stored token. Not used for control flow.
    pub fn status(&self) -> TokenStatusReport {
        let Some(stored) = self.stored() else {
            return TokenStatusReport {
                status: TokenStatus::Missing,
                message: "No token stored".to_string(),
            };
        };

        let Some(claims) = token::decode(&stored.token) else {
            return TokenStatusReport {
                status: TokenStatus::Invalid,
                message: "Token is malformed".to_string(),
            };
        };

        let now = self.clock.now();
        let claim_expired = claims.expires_at().is_some_and(|exp| exp <= now);
        if stored.expiry <= now || claim_expired {
            let expired_at = claims
                .expires_at()
                .map_or(stored.expiry, |exp| exp.min(stored.expiry));
            return TokenStatusReport {
                status: TokenStatus::Expired,
                message: format!("Token expired {} ago", format_remaining(now - expired_at)),
            };
        }

        let remaining = format_remaining(stored.expiry - now);
        if self.needs_refresh() {
            TokenStatusReport {
                status: TokenStatus::RefreshNeeded,
                message: format!("Refresh due, expires in {}", remaining),
            }
        } else {
            TokenStatusReport {
                status: TokenStatus::Valid,
                message: format!("Valid for {}", remaining),
            }
        }
    }
}
