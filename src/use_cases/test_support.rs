use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::domain::entities::{
    AccountEmail, LeaderboardPeriod, LeaderboardRecord, PresenceStatus, ProfileFlag,
    ProfileSummary, PurchaseNotification, RealtimeEvent, Session, Wallet,
};
use crate::domain::errors::GatewayError;
use crate::domain::ports::{AuthGateway, Clock, DataGateway, Notifier, RealtimeSource};
use crate::interface_adapters::session_store::InMemorySessionStore;
use crate::use_cases::session::{SessionDeps, SessionManager, SessionSettings};

pub(crate) const NOW: u64 = 1_700_000_000;
pub(crate) const TOKEN_TTL: u64 = 3600;

// Shared fixed time source for deterministic use-case tests.
pub(crate) struct FixedClock(pub(crate) u64);

impl Clock for FixedClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Default)]
pub(crate) struct FailureFlags {
    pub sign_in: bool,
    pub sign_out: bool,
    pub refresh: bool,
    pub fetch_identity: bool,
    pub fetch_wallet: bool,
    pub adjust_balance: bool,
    pub presence: bool,
    pub leaderboard: bool,
    pub list_wallets: bool,
    pub set_flag: bool,
}

#[derive(Clone)]
struct Account {
    user_id: String,
    password: String,
}

#[derive(Default)]
struct GatewayTables {
    accounts: HashMap<String, Account>,
    profiles: HashMap<String, ProfileSummary>,
    wallets: HashMap<String, Wallet>,
    leaderboard: Vec<LeaderboardRecord>,
    adjustments: Vec<(String, i64)>,
    presence: Vec<(String, PresenceStatus)>,
    flag_updates: Vec<(String, ProfileFlag, bool)>,
    refresh_tokens: Vec<String>,
}

// In-memory gateway that records every mutation and can be told to fail.
#[derive(Clone)]
pub(crate) struct RecordingGateway {
    tables: Arc<Mutex<GatewayTables>>,
    failures: Arc<Mutex<FailureFlags>>,
    issued: Arc<AtomicUsize>,
    sign_outs: Arc<AtomicUsize>,
    sign_in_gate: Option<Arc<Notify>>,
}

impl RecordingGateway {
    pub(crate) fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(GatewayTables::default())),
            failures: Arc::new(Mutex::new(FailureFlags::default())),
            issued: Arc::new(AtomicUsize::new(0)),
            sign_outs: Arc::new(AtomicUsize::new(0)),
            sign_in_gate: None,
        }
    }

    pub(crate) fn with_failures(self, failures: FailureFlags) -> Self {
        self.set_failures(failures);
        self
    }

    // sign_in waits for a notify_one() on the gate before answering.
    pub(crate) fn with_sign_in_gate(mut self, gate: Arc<Notify>) -> Self {
        self.sign_in_gate = Some(gate);
        self
    }

    pub(crate) fn set_failures(&self, failures: FailureFlags) {
        *self.failures.lock().expect("failures mutex poisoned") = failures;
    }

    fn failures(&self) -> FailureFlags {
        *self.failures.lock().expect("failures mutex poisoned")
    }

    pub(crate) fn insert_test_account(
        &self,
        email: &str,
        password: &str,
        username: &str,
        balance: i64,
    ) -> String {
        let user_id = format!("user-{username}");
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        guard.accounts.insert(
            email.to_string(),
            Account {
                user_id: user_id.clone(),
                password: password.to_string(),
            },
        );
        guard.profiles.insert(
            user_id.clone(),
            ProfileSummary {
                id: user_id.clone(),
                username: username.to_string(),
                is_admin: false,
                is_owner: false,
            },
        );
        let mut wallet = Wallet::empty(user_id.clone());
        wallet.balance = balance;
        guard.wallets.insert(user_id.clone(), wallet);
        user_id
    }

    pub(crate) fn set_flags(&self, user_id: &str, is_admin: bool, is_owner: bool) {
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        if let Some(profile) = guard.profiles.get_mut(user_id) {
            profile.is_admin = is_admin;
            profile.is_owner = is_owner;
        }
    }

    pub(crate) fn set_test_balance(&self, user_id: &str, balance: i64) {
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        if let Some(wallet) = guard.wallets.get_mut(user_id) {
            wallet.balance = balance;
        }
    }

    pub(crate) fn remove_test_wallet(&self, user_id: &str) {
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        guard.wallets.remove(user_id);
    }

    pub(crate) fn push_leaderboard(&self, user_id: &str, username: Option<&str>, points: i64) {
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        guard.leaderboard.push(LeaderboardRecord {
            user_id: user_id.to_string(),
            username: username.map(str::to_string),
            points,
        });
    }

    pub(crate) fn balance_of(&self, user_id: &str) -> Option<i64> {
        let guard = self.tables.lock().expect("tables mutex poisoned");
        guard.wallets.get(user_id).map(|wallet| wallet.balance)
    }

    pub(crate) fn adjustments(&self) -> Vec<(String, i64)> {
        let guard = self.tables.lock().expect("tables mutex poisoned");
        guard.adjustments.clone()
    }

    pub(crate) fn presence_calls(&self) -> usize {
        let guard = self.tables.lock().expect("tables mutex poisoned");
        guard.presence.len()
    }

    pub(crate) fn flag_updates(&self) -> Vec<(String, ProfileFlag, bool)> {
        let guard = self.tables.lock().expect("tables mutex poisoned");
        guard.flag_updates.clone()
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        let guard = self.tables.lock().expect("tables mutex poisoned");
        guard.refresh_tokens.len()
    }

    pub(crate) fn sign_out_calls(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    // Session shaped like the ones the gateway hands out.
    pub(crate) fn issue_session(&self, user_id: &str, email: &str) -> Session {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Session {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
            user_id: user_id.to_string(),
            email: email.to_string(),
            expires_at: NOW + TOKEN_TTL,
        }
    }

    fn upstream(status: u16, message: &str) -> GatewayError {
        GatewayError::Upstream {
            status,
            message: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl AuthGateway for RecordingGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        if let Some(gate) = &self.sign_in_gate {
            gate.notified().await;
        }
        if self.failures().sign_in {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }

        let account = {
            let guard = self.tables.lock().expect("tables mutex poisoned");
            guard.accounts.get(email).cloned()
        };
        match account {
            Some(account) if account.password == password => {
                Ok(self.issue_session(&account.user_id, email))
            }
            _ => Err(Self::upstream(400, "Invalid login credentials")),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<Session, GatewayError> {
        {
            let guard = self.tables.lock().expect("tables mutex poisoned");
            if guard.accounts.contains_key(email) {
                return Err(Self::upstream(422, "User already registered"));
            }
        }
        let user_id = self.insert_test_account(email, password, username, 0);
        Ok(self.issue_session(&user_id, email))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        if self.failures().refresh {
            return Err(Self::upstream(400, "Invalid Refresh Token"));
        }
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        guard.refresh_tokens.push(refresh_token.to_string());
        let account = guard.accounts.iter().next().map(|(email, account)| {
            (email.clone(), account.user_id.clone())
        });
        drop(guard);

        let (email, user_id) = account.ok_or_else(|| Self::upstream(400, "no account"))?;
        Ok(self.issue_session(&user_id, &email))
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), GatewayError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if self.failures().sign_out {
            return Err(GatewayError::Transport("sign out failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataGateway for RecordingGateway {
    async fn fetch_identity(
        &self,
        _token: &str,
        user_id: &str,
    ) -> Result<Option<ProfileSummary>, GatewayError> {
        if self.failures().fetch_identity {
            return Err(Self::upstream(500, "profiles unavailable"));
        }
        let guard = self.tables.lock().expect("tables mutex poisoned");
        Ok(guard.profiles.get(user_id).cloned())
    }

    async fn fetch_wallet(
        &self,
        _token: &str,
        user_id: &str,
    ) -> Result<Option<Wallet>, GatewayError> {
        if self.failures().fetch_wallet {
            return Err(Self::upstream(500, "wallets unavailable"));
        }
        let guard = self.tables.lock().expect("tables mutex poisoned");
        Ok(guard.wallets.get(user_id).cloned())
    }

    async fn adjust_balance(
        &self,
        _token: &str,
        user_id: &str,
        delta: i64,
    ) -> Result<(), GatewayError> {
        if self.failures().adjust_balance {
            return Err(Self::upstream(500, "rpc failed"));
        }
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        let wallet = guard
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| Self::upstream(404, "wallet not found"))?;
        if wallet.balance + delta < 0 {
            return Err(Self::upstream(400, "insufficient funds"));
        }
        wallet.balance += delta;
        guard.adjustments.push((user_id.to_string(), delta));
        Ok(())
    }

    async fn upsert_presence(
        &self,
        _token: &str,
        user_id: &str,
        status: PresenceStatus,
    ) -> Result<(), GatewayError> {
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        guard.presence.push((user_id.to_string(), status));
        drop(guard);
        if self.failures().presence {
            return Err(Self::upstream(503, "presence unavailable"));
        }
        Ok(())
    }

    async fn fetch_leaderboard(
        &self,
        _token: Option<&str>,
        _period: LeaderboardPeriod,
        limit: usize,
    ) -> Result<Vec<LeaderboardRecord>, GatewayError> {
        if self.failures().leaderboard {
            return Err(Self::upstream(500, "leaderboard unavailable"));
        }
        let guard = self.tables.lock().expect("tables mutex poisoned");
        Ok(guard.leaderboard.iter().take(limit).cloned().collect())
    }

    async fn list_profiles(&self, _token: &str) -> Result<Vec<ProfileSummary>, GatewayError> {
        let guard = self.tables.lock().expect("tables mutex poisoned");
        let mut profiles: Vec<ProfileSummary> = guard.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(profiles)
    }

    async fn list_wallets(&self, _token: &str) -> Result<Vec<Wallet>, GatewayError> {
        if self.failures().list_wallets {
            return Err(Self::upstream(500, "wallets unavailable"));
        }
        let guard = self.tables.lock().expect("tables mutex poisoned");
        Ok(guard.wallets.values().cloned().collect())
    }

    async fn list_account_emails(&self, _token: &str) -> Result<Vec<AccountEmail>, GatewayError> {
        let guard = self.tables.lock().expect("tables mutex poisoned");
        Ok(guard
            .accounts
            .iter()
            .map(|(email, account)| AccountEmail {
                user_id: account.user_id.clone(),
                email: email.clone(),
            })
            .collect())
    }

    async fn set_profile_flag(
        &self,
        _token: &str,
        user_id: &str,
        flag: ProfileFlag,
        value: bool,
    ) -> Result<(), GatewayError> {
        if self.failures().set_flag {
            return Err(Self::upstream(403, "permission denied"));
        }
        let mut guard = self.tables.lock().expect("tables mutex poisoned");
        if let Some(profile) = guard.profiles.get_mut(user_id) {
            match flag {
                ProfileFlag::Admin => profile.is_admin = value,
                ProfileFlag::Owner => profile.is_owner = value,
            }
        }
        guard.flag_updates.push((user_id.to_string(), flag, value));
        Ok(())
    }
}

// Realtime source whose channel senders are handed back to the test.
#[derive(Clone, Default)]
pub(crate) struct ChannelRealtime {
    senders: Arc<Mutex<Vec<mpsc::Sender<RealtimeEvent>>>>,
    // Access token of every subscription, in order.
    tokens: Arc<Mutex<Vec<String>>>,
}

impl ChannelRealtime {
    pub(crate) fn latest_sender(&self) -> Option<mpsc::Sender<RealtimeEvent>> {
        let guard = self.senders.lock().expect("senders mutex poisoned");
        guard.last().cloned()
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.tokens.lock().expect("tokens mutex poisoned").clone()
    }

    // Drops every sender, closing the feeds the way a dropped socket does.
    pub(crate) fn close_all(&self) {
        self.senders.lock().expect("senders mutex poisoned").clear();
    }
}

#[async_trait]
impl RealtimeSource for ChannelRealtime {
    async fn subscribe(
        &self,
        session: &Session,
    ) -> Result<mpsc::Receiver<RealtimeEvent>, GatewayError> {
        let (tx, rx) = mpsc::channel(16);
        self.tokens
            .lock()
            .expect("tokens mutex poisoned")
            .push(session.access_token.clone());
        self.senders
            .lock()
            .expect("senders mutex poisoned")
            .push(tx);
        Ok(rx)
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingNotifier {
    sent: Arc<Mutex<Vec<PurchaseNotification>>>,
    should_fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn failing() -> Self {
        Self {
            sent: Arc::default(),
            should_fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<PurchaseNotification> {
        self.sent.lock().expect("sent mutex poisoned").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &PurchaseNotification) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .expect("sent mutex poisoned")
            .push(notification.clone());
        if self.should_fail {
            return Err(GatewayError::Transport("webhook unreachable".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn test_settings() -> SessionSettings {
    SessionSettings {
        presence_interval: Duration::from_secs(60),
        refresh_margin: Duration::from_secs(60),
        refresh_retry: Duration::from_secs(30),
        realtime_retry: Duration::from_secs(2),
    }
}

pub(crate) fn build_manager(gateway: &RecordingGateway) -> (SessionManager, InMemorySessionStore) {
    let store = InMemorySessionStore::default();
    let manager = SessionManager::new(
        SessionDeps {
            gateway: Arc::new(gateway.clone()),
            store: Arc::new(store.clone()),
            clock: Arc::new(FixedClock(NOW)),
            realtime: None,
        },
        test_settings(),
    );
    (manager, store)
}

// Logs in and waits for the deferred identity refresh to land.
pub(crate) async fn logged_in(
    gateway: &RecordingGateway,
    username: &str,
    balance: i64,
) -> (SessionManager, String) {
    let email = format!("{username}@example.com");
    let user_id = gateway.insert_test_account(&email, "hunter22", username, balance);
    let (manager, _store) = build_manager(gateway);
    manager
        .login(&email, "hunter22")
        .await
        .expect("expected login to succeed");
    wait_for_user(&manager).await;
    (manager, user_id)
}

pub(crate) async fn wait_for_user(manager: &SessionManager) {
    let mut rx = manager.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.user.is_some()))
        .await
        .expect("timed out waiting for user")
        .expect("session channel closed");
}
