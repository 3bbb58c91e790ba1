//! The session controller: single owner of [`SessionState`].
//!
//! Every transition (initialize, login, register, refresh, logout, user
//! updates) goes through this type. It keeps at most one refresh call in
//! flight and at most one refresh timer armed. State is published through a
//! `tokio::sync::watch` channel so UI code can observe it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{AuthBackend, AuthGrant};
use super::error::SessionError;
use super::state::{Credentials, Registration, SessionPhase, SessionState, User, UserUpdate};
use crate::auth::{TokenStatusReport, TokenStore};
use crate::utils::format_remaining;

type SharedRefresh = Shared<BoxFuture<'static, Result<String, SessionError>>>;

/// Longest single timer sleep. A longer wait re-arms when it wakes early.
const MAX_TIMER_DELAY_SECS: i64 = 86_400;

struct InFlightRefresh {
    id: u64,
    future: SharedRefresh,
}

struct RefreshTimer {
    id: u64,
    fires_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    store: TokenStore,
    state: watch::Sender<SessionState>,
    timer: Mutex<Option<RefreshTimer>>,
    in_flight: Mutex<Option<InFlightRefresh>>,
    next_id: AtomicU64,
    initialized: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn AuthBackend>, store: TokenStore) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                state,
                timer: Mutex::new(None),
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(1),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    /// The bearer token to attach to outgoing requests.
    pub fn token(&self) -> Option<String> {
        self.inner.store.token()
    }

    pub fn is_session_expired(&self) -> bool {
        self.inner.store.is_expired()
    }

    pub fn needs_token_refresh(&self) -> bool {
        self.inner.store.needs_refresh()
    }

    pub fn get_token_status(&self) -> TokenStatusReport {
        self.inner.store.status()
    }

    /// When the armed refresh timer will fire, if one is armed.
    pub fn pending_refresh_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.timer).as_ref().map(|t| t.fires_at)
    }

    fn publish(&self, state: SessionState) {
        debug!(phase = ?state.phase, "Session state changed");
        self.inner.state.send_replace(state);
    }

    fn begin_loading(&self) {
        self.inner.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Start-up
    // =========================================================================

    /// Restore the session from the token store. Runs once; later calls are
    /// no-ops. Returns an error when a stored session had to be discarded.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            debug!("Session already initialized");
            return Ok(());
        }

        let store = &self.inner.store;
        let Some(stored_token) = store.token() else {
            debug!("No stored session");
            self.publish(SessionState::unauthenticated(None));
            return Ok(());
        };

        self.begin_loading();

        if store.decode(Some(&stored_token)).is_none() {
            warn!("Stored token is malformed, clearing session");
            store.clear();
            self.publish(SessionState::unauthenticated(None));
            return Err(SessionError::MalformedToken);
        }

        let token = if store.is_expired() || !store.is_valid(Some(&stored_token)) {
            info!("Stored token expired, attempting forced refresh");
            // A failed refresh has already cleared the store and published
            // the unauthenticated state.
            self.refresh_token(true).await?
        } else {
            stored_token
        };

        let reservation = store.reserve();
        match self.inner.backend.fetch_current_user(&token).await {
            Ok(user) => {
                if !store.is_current(&reservation) {
                    debug!("Session changed while restoring, keeping the newer state");
                    return Err(SessionError::Superseded);
                }
                let Some(expiry) = store.expiry() else {
                    return Err(SessionError::NoToken);
                };
                info!(user = %user.username, "Session restored");
                self.publish(SessionState::authenticated(user, token, expiry));
                self.schedule_refresh(expiry);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Stored token rejected, clearing session");
                if store.clear_if_current(&reservation) {
                    self.cancel_refresh_timer();
                    self.publish(SessionState::unauthenticated(None));
                }
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Login / registration
    // =========================================================================

    pub async fn login(&self, credentials: &Credentials) -> Result<User, SessionError> {
        self.begin_loading();
        match self.inner.backend.authenticate(credentials).await {
            Ok(grant) => {
                info!(username = %credentials.username, "Login successful");
                Ok(self.establish(grant))
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                self.record_failure(e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn register(&self, registration: &Registration) -> Result<User, SessionError> {
        self.begin_loading();
        match self.inner.backend.register(registration).await {
            Ok(grant) => {
                info!(username = %registration.username, "Registration successful");
                Ok(self.establish(grant))
            }
            Err(e) => {
                error!(error = %e, "Registration failed");
                self.record_failure(e.user_message());
                Err(e.into())
            }
        }
    }

    fn establish(&self, grant: AuthGrant) -> User {
        self.cancel_refresh_timer();
        // Any refresh still in flight belongs to the previous token.
        lock(&self.inner.in_flight).take();
        self.inner.initialized.store(true, Ordering::SeqCst);

        let lifetime = grant.lifetime();
        let expiry = self.inner.store.set_token(&grant.token, lifetime);
        let user = grant.user;
        self.publish(SessionState::authenticated(user.clone(), grant.token, expiry));
        self.schedule_refresh(expiry);
        user
    }

    fn record_failure(&self, message: String) {
        self.inner.state.send_modify(|s| {
            s.is_loading = false;
            s.error = Some(message);
            if s.phase != SessionPhase::Authenticated {
                s.phase = SessionPhase::Unauthenticated;
            }
        });
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Exchange the stored token for a new one.
    ///
    /// Concurrent non-forced calls share one network request and resolve to
    /// the same token. Without `force`, an expired token is never refreshed.
    /// Any failure clears the session.
    pub async fn refresh_token(&self, force: bool) -> Result<String, SessionError> {
        let future = {
            let mut slot = lock(&self.inner.in_flight);
            let joined = if force {
                None
            } else {
                slot.as_ref().map(|in_flight| in_flight.future.clone())
            };
            match joined {
                Some(future) => {
                    debug!("Joining in-flight token refresh");
                    future
                }
                None => {
                    let id = self.next_id();
                    let future = self.clone().run_refresh(id, force).boxed().shared();
                    *slot = Some(InFlightRefresh {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    async fn run_refresh(self, id: u64, force: bool) -> Result<String, SessionError> {
        let result = self.perform_refresh(force).await;
        let mut slot = lock(&self.inner.in_flight);
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *slot = None;
        }
        result
    }

    async fn perform_refresh(&self, force: bool) -> Result<String, SessionError> {
        let store = &self.inner.store;
        let reservation = store.reserve();

        let Some(token) = store.token() else {
            warn!("Refresh requested without a stored token");
            self.fail_closed(Some(SessionError::NoToken.user_message()));
            return Err(SessionError::NoToken);
        };

        if !force && store.is_expired() {
            warn!("Refusing routine refresh of an expired token");
            if store.clear_if_current(&reservation) {
                self.cancel_refresh_timer();
                self.publish(SessionState::unauthenticated(Some(
                    SessionError::Expired.user_message(),
                )));
            }
            return Err(SessionError::Expired);
        }

        debug!(force, "Refreshing token");
        match self.inner.backend.refresh(&token).await {
            Ok(grant) => match store.commit(reservation, &grant.token, grant.lifetime()) {
                Some(expiry) => {
                    let new_token = grant.token;
                    // During restore the phase is published by `initialize`
                    // once the user is known.
                    self.inner.state.send_if_modified(|s| {
                        if s.phase != SessionPhase::Authenticated {
                            return false;
                        }
                        s.token = Some(new_token.clone());
                        s.session_expiry = Some(expiry);
                        true
                    });
                    self.schedule_refresh(expiry);
                    info!(%expiry, "Token refreshed");
                    Ok(new_token)
                }
                None => {
                    debug!("Session changed during refresh, discarding new token");
                    Err(SessionError::Superseded)
                }
            },
            Err(e) => {
                error!(error = %e, "Token refresh failed");
                if store.clear_if_current(&reservation) {
                    self.cancel_refresh_timer();
                    self.publish(SessionState::unauthenticated(Some(e.user_message())));
                }
                Err(e.into())
            }
        }
    }

    fn fail_closed(&self, message: Option<String>) {
        self.cancel_refresh_timer();
        self.inner.store.clear();
        self.publish(SessionState::unauthenticated(message));
    }

    // =========================================================================
    // Timer
    // =========================================================================

    /// Arm the refresh timer for a token expiring at `expiry`, replacing any
    /// armed timer. A refresh window that is already open fires at once.
    pub fn schedule_refresh(&self, expiry: DateTime<Utc>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, refresh timer not armed");
            return;
        };

        let delay = self
            .inner
            .store
            .time_until_refresh_from(expiry)
            .min(Duration::seconds(MAX_TIMER_DELAY_SECS));
        let fires_at = self.inner.store.now() + delay;
        let sleep_for = delay.to_std().unwrap_or_default();
        // Fixed when armed, so scheduling latency does not push it back.
        let deadline = tokio::time::Instant::now() + sleep_for;
        let id = self.next_id();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let mut slot = lock(&self.inner.timer);
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }
        let handle = runtime.spawn(async move {
            if !sleep_for.is_zero() {
                tokio::time::sleep_until(deadline).await;
            }
            if let Some(inner) = weak.upgrade() {
                SessionController { inner }.on_timer_fired(id).await;
            }
        });
        *slot = Some(RefreshTimer {
            id,
            fires_at,
            handle,
        });
        debug!(%fires_at, in_ = %format_remaining(delay), "Refresh timer armed");
    }

    fn cancel_refresh_timer(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.handle.abort();
            debug!("Refresh timer cancelled");
        }
    }

    async fn on_timer_fired(self, id: u64) {
        {
            // Detach first so the refresh below can arm a successor without
            // aborting this task.
            let mut slot = lock(&self.inner.timer);
            match slot.as_ref() {
                Some(timer) if timer.id == id => {
                    slot.take();
                }
                _ => return,
            }
        }

        let store = &self.inner.store;
        if store.token().is_none() {
            debug!("Refresh timer fired without a session");
            return;
        }

        if store.is_expired() {
            warn!("Session expired before it could be refreshed");
            let reservation = store.reserve();
            if store.clear_if_current(&reservation) {
                self.publish(SessionState::unauthenticated(Some(
                    SessionError::Expired.user_message(),
                )));
            }
            return;
        }

        if store.needs_refresh() {
            if let Err(e) = self.refresh_token(false).await {
                warn!(error = %e, "Scheduled token refresh failed");
            }
        } else if let Some(expiry) = store.expiry() {
            debug!("Refresh window not open yet, re-arming timer");
            self.schedule_refresh(expiry);
        }
    }

    // =========================================================================
    // Logout / user updates
    // =========================================================================

    /// Log out on this device. The server is notified on a best-effort basis;
    /// local state is always cleared.
    pub async fn logout(&self) {
        if let Some(token) = self.inner.store.token() {
            if let Err(e) = self.inner.backend.invalidate_session(&token).await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        self.cancel_refresh_timer();
        lock(&self.inner.in_flight).take();
        self.inner.store.clear();
        self.publish(SessionState::unauthenticated(None));
        info!("Logged out");
    }

    /// Merge `update` into the current user. Returns `false` when there is no
    /// authenticated user to update.
    pub fn update_user(&self, update: UserUpdate) -> bool {
        self.inner.state.send_if_modified(move |s| {
            if s.phase != SessionPhase::Authenticated {
                return false;
            }
            match s.user.as_mut() {
                Some(user) => {
                    user.apply(update);
                    true
                }
                None => false,
            }
        })
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Disarm the refresh timer, leaving stored state untouched.
    pub fn shutdown(&self) {
        self.cancel_refresh_timer();
    }
}
