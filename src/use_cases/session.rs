// Session state manager: the single source of truth for who is logged in.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::DateTime;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::entities::{
    AuthEvent, AuthState, CurrentUser, Identity, PresenceRecord, PresenceStatus, RealtimeEvent,
    Session,
};
use crate::domain::errors::{
    AuthError, BalanceUpdateError, DataFetchError, GatewayError, PresenceError,
};
use crate::domain::ports::{Clock, RealtimeSource, RemoteGateway, SessionStore};
use crate::domain::validation::{validate_email, validate_password, validate_username};

const PRESENCE_BROADCAST_CAPACITY: usize = 64;
const REALTIME_RETRY_MAX: Duration = Duration::from_secs(60);

/// Timer settings for the background work tied to an active session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Period of the presence heartbeat.
    pub presence_interval: Duration,
    /// How long before expiry the access token is refreshed.
    pub refresh_margin: Duration,
    /// Back-off between token refresh attempts that failed in transit.
    pub refresh_retry: Duration,
    /// First delay before resubscribing to a realtime feed that closed; doubles up to a minute.
    pub realtime_retry: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            presence_interval: Duration::from_secs(60),
            refresh_margin: Duration::from_secs(60),
            refresh_retry: Duration::from_secs(30),
            realtime_retry: Duration::from_secs(2),
        }
    }
}

/// Collaborators injected into the session manager.
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn RemoteGateway>,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
    pub realtime: Option<Arc<dyn RealtimeSource>>,
}

/// What observers see: auth state, the live session and the merged user view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: AuthState,
    pub session: Option<Session>,
    pub user: Option<CurrentUser>,
}

#[derive(Default)]
struct SessionTasks {
    heartbeat: Option<JoinHandle<()>>,
    keeper: Option<JoinHandle<()>>,
    realtime: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort_all(&mut self) {
        for handle in [
            self.heartbeat.take(),
            self.keeper.take(),
            self.realtime.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    deps: SessionDeps,
    settings: SessionSettings,
    snapshot: watch::Sender<SessionSnapshot>,
    presence_tx: broadcast::Sender<PresenceRecord>,
    // Bumped whenever the active session is replaced or cleared.
    generation: AtomicU64,
    // Bumped around every confirmed balance change; see refresh_generation.
    balance_epoch: AtomicU64,
    adjustments_in_flight: AtomicUsize,
    tasks: Mutex<SessionTasks>,
    // Serializes session persistence so a stale clear never wipes a newer save.
    persist_lock: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.abort_all();
        }
    }
}

/// Shared handle to the process-wide session state.
///
/// Clones are cheap and observe the same state. Identity and wallet data are
/// loaded asynchronously after authentication, so `current_user()` is
/// eventually consistent with `auth_state()`.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

// Decrements the in-flight counter however the adjustment ends.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionManager {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        let (snapshot, _rx) = watch::channel(SessionSnapshot::default());
        let (presence_tx, _presence_rx) = broadcast::channel(PRESENCE_BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                deps,
                settings,
                snapshot,
                presence_tx,
                generation: AtomicU64::new(0),
                balance_epoch: AtomicU64::new(0),
                adjustments_in_flight: AtomicUsize::new(0),
                tasks: Mutex::new(SessionTasks::default()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn presence_events(&self) -> broadcast::Receiver<PresenceRecord> {
        self.inner.presence_tx.subscribe()
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.snapshot.borrow().state
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.inner.snapshot.borrow().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.active_session().map(|session| session.access_token)
    }

    fn active_session(&self) -> Option<Session> {
        let snapshot = self.inner.snapshot.borrow();
        match snapshot.state {
            AuthState::Authenticated => snapshot.session.clone(),
            _ => None,
        }
    }

    // The session on record, even while a new login is in flight.
    fn recorded_session(&self) -> Option<Session> {
        self.inner.snapshot.borrow().session.clone()
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Restores the session persisted by a previous run, if any.
    pub async fn init(&self) {
        let stored = match self.inner.deps.store.load().await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "failed to load persisted session");
                None
            }
        };
        let Some(session) = stored else {
            debug!("no persisted session to restore");
            return;
        };

        let now = self.inner.deps.clock.now_epoch_seconds();
        if !session.is_expired(now) {
            info!(user_id = %session.user_id, "restoring persisted session");
            self.handle_auth_event(AuthEvent::SignedIn(session)).await;
            return;
        }

        match self
            .inner
            .deps
            .gateway
            .refresh_session(&session.refresh_token)
            .await
        {
            Ok(fresh) => {
                info!(user_id = %fresh.user_id, "refreshed expired persisted session");
                self.handle_auth_event(AuthEvent::SignedIn(fresh)).await;
            }
            Err(err) => {
                warn!(error = %err, "persisted session could not be refreshed; discarding");
                self.persist(self.generation(), None).await;
            }
        }
    }

    /// Stops background work without signing out; the persisted session survives.
    pub fn teardown(&self) {
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.abort_all();
        }
        debug!("session manager torn down");
    }

    #[tracing::instrument(name = "login", skip_all, fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = validate_email(email)?;
        validate_password(password)?;

        let (attempt, previous) = self.begin_authenticating()?;
        let result = self.inner.deps.gateway.sign_in(&email, password).await;
        self.finish_authenticating(attempt, previous, result).await
    }

    #[tracing::instrument(name = "signup", skip_all, fields(email = %email))]
    pub async fn signup(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        let email = validate_email(email)?;
        let username = validate_username(username)?;
        validate_password(password)?;

        let (attempt, previous) = self.begin_authenticating()?;
        let result = self
            .inner
            .deps
            .gateway
            .sign_up(&email, &username, password)
            .await;
        self.finish_authenticating(attempt, previous, result).await
    }

    fn begin_authenticating(&self) -> Result<(u64, AuthState), AuthError> {
        let mut previous = None;
        self.inner.snapshot.send_if_modified(|snapshot| {
            if snapshot.state == AuthState::Authenticating {
                return false;
            }
            previous = Some(snapshot.state);
            snapshot.state = AuthState::Authenticating;
            true
        });
        let previous = previous.ok_or(AuthError::InProgress)?;
        Ok((self.generation(), previous))
    }

    async fn finish_authenticating(
        &self,
        attempt: u64,
        previous: AuthState,
        result: Result<Session, GatewayError>,
    ) -> Result<(), AuthError> {
        match result {
            Ok(session) => {
                if self.establish(session, attempt).await {
                    Ok(())
                } else {
                    Err(AuthError::Cancelled)
                }
            }
            Err(err) => {
                warn!(error = %err, "authentication failed");
                let generation = &self.inner.generation;
                self.inner.snapshot.send_if_modified(|snapshot| {
                    if generation.load(Ordering::SeqCst) != attempt {
                        return false;
                    }
                    // Only the state was touched; a token refreshed meanwhile stays.
                    snapshot.state = previous;
                    true
                });
                Err(AuthError::from_gateway(err))
            }
        }
    }

    // Adopt a gateway-issued session unless the generation moved on since `expected`.
    async fn establish(&self, session: Session, expected: u64) -> bool {
        let generation = expected + 1;
        if self
            .inner
            .generation
            .compare_exchange(expected, generation, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(user_id = %session.user_id, "session superseded before it was recorded");
            return false;
        }

        let user_id = session.user_id.clone();
        self.inner.snapshot.send_modify(|snapshot| {
            snapshot.state = AuthState::Authenticated;
            snapshot.session = Some(session.clone());
            snapshot.user = None;
        });
        info!(%user_id, "session established");

        self.persist(generation, Some(&session)).await;
        self.start_background_tasks(generation);
        self.schedule_refresh(generation);
        true
    }

    /// Clears local state immediately; the remote sign-out runs in the background.
    pub fn logout(&self) {
        let Some(session) = self.clear_local() else {
            debug!("logout without an active session");
            return;
        };
        info!(user_id = %session.user_id, "logged out");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let gateway = self.inner.deps.gateway.clone();
                handle.spawn(async move {
                    if let Err(err) = gateway.sign_out(&session.access_token).await {
                        warn!(error = %err, "remote sign-out failed");
                    }
                });
            }
            Err(_) => warn!("no async runtime available; skipping remote sign-out"),
        }
    }

    fn clear_local(&self) -> Option<Session> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut previous = None;
        self.inner.snapshot.send_modify(|snapshot| {
            previous = snapshot.session.take();
            snapshot.user = None;
            snapshot.state = AuthState::Unauthenticated;
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let manager = self.clone();
            handle.spawn(async move { manager.persist(generation, None).await });
        }
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.abort_all();
        }
        previous
    }

    async fn persist(&self, generation: u64, session: Option<&Session>) {
        let _guard = self.inner.persist_lock.lock().await;
        if self.generation() != generation {
            return;
        }
        let result = match session {
            Some(session) => self.inner.deps.store.save(session).await,
            None => self.inner.deps.store.clear().await,
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to persist session state");
        }
    }

    /// Applies an authentication transition pushed by the gateway.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                self.establish(session, self.generation()).await;
            }
            AuthEvent::TokenRefreshed(mut session) => {
                let Some(current) = self
                    .recorded_session()
                    .filter(|current| current.user_id == session.user_id)
                else {
                    self.establish(session, self.generation()).await;
                    return;
                };
                if session.email.is_empty() {
                    session.email = current.email;
                }

                let generation = self.generation();
                let current_generation = &self.inner.generation;
                self.inner.snapshot.send_if_modified(|snapshot| {
                    if current_generation.load(Ordering::SeqCst) != generation {
                        return false;
                    }
                    snapshot.session = Some(session.clone());
                    true
                });
                debug!(user_id = %session.user_id, "access token refreshed");
                self.persist(generation, Some(&session)).await;
                // Realtime channels are joined with the access token; rejoin with the new one.
                self.restart_realtime(generation);
                self.schedule_refresh(generation);
            }
            AuthEvent::SignedOut | AuthEvent::SessionExpired => {
                if let Some(session) = self.clear_local() {
                    info!(user_id = %session.user_id, ?event, "session ended by gateway");
                }
            }
        }
    }

    /// Loads identity and wallet for the active session into the snapshot.
    pub async fn refresh_user(&self) -> Result<(), DataFetchError> {
        self.refresh_generation(self.generation()).await
    }

    async fn refresh_generation(&self, generation: u64) -> Result<(), DataFetchError> {
        let session = self
            .active_session()
            .ok_or(DataFetchError::NotAuthenticated)?;
        let gateway = &self.inner.deps.gateway;
        let balance_epoch = self.inner.balance_epoch.load(Ordering::SeqCst);

        let profile = gateway
            .fetch_identity(&session.access_token, &session.user_id)
            .await?
            .ok_or(DataFetchError::NotFound { table: "profiles" })?;
        let wallet = gateway
            .fetch_wallet(&session.access_token, &session.user_id)
            .await?;
        if wallet.is_none() {
            debug!(user_id = %session.user_id, "no wallet row yet; using empty wallet");
        }
        let user = CurrentUser::from_parts(Identity::from_profile(profile, session.email), wallet);

        let inner = &self.inner;
        let applied = inner.snapshot.send_if_modified(|snapshot| {
            if inner.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            let mut user = user.clone();
            // A balance change raced this fetch; the cached coins already account for it.
            let raced = inner.balance_epoch.load(Ordering::SeqCst) != balance_epoch
                || inner.adjustments_in_flight.load(Ordering::SeqCst) > 0;
            if raced {
                if let Some(cached) = snapshot.user.as_ref().filter(|u| u.id == user.id) {
                    user.coins = cached.coins;
                }
            }
            snapshot.user = Some(user);
            true
        });
        if applied {
            debug!(user_id = %user.id, coins = user.coins, "user refreshed");
        } else {
            debug!("discarding user refresh for a superseded session");
        }
        Ok(())
    }

    // Run the refresh on a later tick, never inside the caller's callback.
    fn schedule_refresh(&self, generation: u64) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Err(err) = manager.refresh_generation(generation).await {
                warn!(error = %err, "failed to refresh user data");
            }
        });
    }

    /// Applies a signed balance change once the gateway has confirmed it.
    #[tracing::instrument(name = "update_user_coins", skip(self))]
    pub async fn update_user_coins(&self, delta: i64) -> Result<(), BalanceUpdateError> {
        let snapshot = self.snapshot();
        if snapshot.state != AuthState::Authenticated {
            return Err(BalanceUpdateError::NotReady);
        }
        let (Some(session), Some(user)) = (snapshot.session, snapshot.user) else {
            return Err(BalanceUpdateError::NotReady);
        };
        if delta == 0 {
            return Ok(());
        }

        let generation = self.generation();
        let inner = &self.inner;
        inner.adjustments_in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlightGuard(&inner.adjustments_in_flight);
        inner.balance_epoch.fetch_add(1, Ordering::SeqCst);

        inner
            .deps
            .gateway
            .adjust_balance(&session.access_token, &user.id, delta)
            .await
            .map_err(|err| {
                warn!(error = %err, user_id = %user.id, "balance update rejected");
                BalanceUpdateError::Rejected(
                    err.message().map(str::to_string).unwrap_or_else(|| err.to_string()),
                )
            })?;

        inner.balance_epoch.fetch_add(1, Ordering::SeqCst);
        inner.snapshot.send_if_modified(|snapshot| {
            if inner.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            match snapshot.user.as_mut() {
                Some(cached) if cached.id == user.id => {
                    cached.coins = cached.coins.saturating_add(delta);
                    true
                }
                _ => false,
            }
        });
        info!(user_id = %user.id, delta, "balance updated");
        Ok(())
    }

    /// Best-effort presence heartbeat; failures are only logged.
    pub async fn update_presence(&self) {
        match self.try_update_presence().await {
            Ok(()) => {}
            Err(PresenceError::NotAuthenticated) => debug!("presence skipped without session"),
            Err(err) => warn!(error = %err, "presence heartbeat failed"),
        }
    }

    pub async fn try_update_presence(&self) -> Result<(), PresenceError> {
        let session = self
            .active_session()
            .ok_or(PresenceError::NotAuthenticated)?;
        self.inner
            .deps
            .gateway
            .upsert_presence(&session.access_token, &session.user_id, PresenceStatus::Online)
            .await
            .map_err(PresenceError::Gateway)
    }

    fn start_background_tasks(&self, generation: u64) {
        let Ok(mut tasks) = self.inner.tasks.lock() else {
            warn!("session task registry poisoned; background tasks not started");
            return;
        };
        if self.generation() != generation {
            return;
        }
        tasks.abort_all();
        tasks.heartbeat = Some(self.spawn_heartbeat(generation));
        tasks.keeper = Some(self.spawn_keeper(generation));
        if let Some(source) = self.inner.deps.realtime.clone() {
            tasks.realtime = Some(self.spawn_realtime(source, generation));
        }
    }

    fn spawn_heartbeat(&self, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.presence_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = upgrade(&weak, generation) else {
                    break;
                };
                manager.update_presence().await;
            }
        })
    }

    // Refreshes the access token ahead of expiry; gives up with SessionExpired.
    fn spawn_keeper(&self, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let margin = self.inner.settings.refresh_margin.as_secs();
        let retry = self.inner.settings.refresh_retry.max(Duration::from_secs(1));
        tokio::spawn(async move {
            loop {
                let Some(manager) = upgrade(&weak, generation) else {
                    break;
                };
                let Some(session) = manager.recorded_session() else {
                    break;
                };
                let now = manager.inner.deps.clock.now_epoch_seconds();
                let wait = session.expires_at.saturating_sub(margin).saturating_sub(now);
                drop(manager);

                tokio::time::sleep(Duration::from_secs(wait)).await;

                let Some(manager) = upgrade(&weak, generation) else {
                    break;
                };
                let refreshed = manager
                    .inner
                    .deps
                    .gateway
                    .refresh_session(&session.refresh_token)
                    .await;
                match refreshed {
                    Ok(fresh) => {
                        manager
                            .handle_auth_event(AuthEvent::TokenRefreshed(fresh))
                            .await;
                    }
                    Err(err) => {
                        let now = manager.inner.deps.clock.now_epoch_seconds();
                        let rejected = matches!(
                            err,
                            GatewayError::Upstream { status, .. } if (400..500).contains(&status)
                        );
                        if rejected || session.is_expired(now) {
                            warn!(error = %err, "session refresh failed; ending session");
                            manager.handle_auth_event(AuthEvent::SessionExpired).await;
                            break;
                        }
                        warn!(error = %err, "session refresh failed; retrying");
                        drop(manager);
                        tokio::time::sleep(retry).await;
                    }
                }
            }
        })
    }

    fn restart_realtime(&self, generation: u64) {
        let Some(source) = self.inner.deps.realtime.clone() else {
            return;
        };
        let Ok(mut tasks) = self.inner.tasks.lock() else {
            warn!("session task registry poisoned; realtime not restarted");
            return;
        };
        if self.generation() != generation {
            return;
        }
        if let Some(previous) = tasks.realtime.replace(self.spawn_realtime(source, generation)) {
            previous.abort();
        }
    }

    // Keeps a feed subscribed for as long as the session lasts, resubscribing with back-off.
    fn spawn_realtime(&self, source: Arc<dyn RealtimeSource>, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let first_retry = self.inner.settings.realtime_retry.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut retry = first_retry;
            loop {
                let Some(session) = upgrade(&weak, generation)
                    .and_then(|manager| manager.recorded_session())
                else {
                    break;
                };
                match source.subscribe(&session).await {
                    Ok(events) => {
                        retry = first_retry;
                        pump_realtime(weak.clone(), generation, events).await;
                    }
                    Err(err) => warn!(error = %err, "realtime subscription failed"),
                }
                if upgrade(&weak, generation).is_none() {
                    break;
                }
                debug!(retry_secs = retry.as_secs_f64(), "resubscribing to realtime feed");
                tokio::time::sleep(retry).await;
                retry = (retry * 2).min(REALTIME_RETRY_MAX);
            }
        })
    }

    /// Feeds externally obtained realtime events into the active session.
    ///
    /// Replaces any feed already attached; the pump stops with the session.
    pub fn attach_realtime(&self, events: mpsc::Receiver<RealtimeEvent>) {
        let generation = self.generation();
        if self.active_session().is_none() {
            debug!("realtime feed attached without a session; ignoring");
            return;
        }
        let handle = tokio::spawn(pump_realtime(
            Arc::downgrade(&self.inner),
            generation,
            events,
        ));
        match self.inner.tasks.lock() {
            Ok(mut tasks) => {
                if let Some(previous) = tasks.realtime.replace(handle) {
                    previous.abort();
                }
            }
            Err(_) => handle.abort(),
        }
    }

    fn handle_realtime_event(&self, event: RealtimeEvent, generation: u64) {
        match event {
            RealtimeEvent::TableChanged { table, user_id, .. } => {
                let relevant = matches!(table.as_str(), "wallets" | "profiles");
                let current = self.active_session().map(|session| session.user_id);
                let ours = match (&user_id, &current) {
                    (Some(changed), Some(current)) => changed == current,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if relevant && ours {
                    debug!(%table, "table change for current user; refetching");
                    self.schedule_refresh(generation);
                }
            }
            RealtimeEvent::PresenceChanged { user_id, status } => {
                let now = self.inner.deps.clock.now_epoch_seconds();
                let record = PresenceRecord {
                    user_id,
                    status,
                    last_active: DateTime::from_timestamp(now as i64, 0).unwrap_or_default(),
                };
                // No subscribers is fine.
                let _ = self.inner.presence_tx.send(record);
            }
        }
    }
}

async fn pump_realtime(
    weak: Weak<Inner>,
    generation: u64,
    mut events: mpsc::Receiver<RealtimeEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = upgrade(&weak, generation) else {
            break;
        };
        manager.handle_realtime_event(event, generation);
    }
    debug!("realtime feed ended");
}

fn upgrade(weak: &Weak<Inner>, generation: u64) -> Option<SessionManager> {
    let inner = weak.upgrade()?;
    if inner.generation.load(Ordering::SeqCst) != generation {
        return None;
    }
    Some(SessionManager { inner })
}
