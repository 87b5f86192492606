use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::entities::{
    AccountEmail, LeaderboardPeriod, LeaderboardRecord, PresenceStatus, ProfileFlag,
    ProfileSummary, PurchaseNotification, RealtimeEvent, Session, Wallet,
};
use crate::domain::errors::GatewayError;

// Auth half of the remote data gateway.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError>;
    async fn sign_up(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<Session, GatewayError>;
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, GatewayError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), GatewayError>;
}

// Row storage and remote procedures. Every call runs as the token's owner.
#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn fetch_identity(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Option<ProfileSummary>, GatewayError>;
    async fn fetch_wallet(&self, token: &str, user_id: &str)
    -> Result<Option<Wallet>, GatewayError>;
    async fn adjust_balance(
        &self,
        token: &str,
        user_id: &str,
        delta: i64,
    ) -> Result<(), GatewayError>;
    async fn upsert_presence(
        &self,
        token: &str,
        user_id: &str,
        status: PresenceStatus,
    ) -> Result<(), GatewayError>;
    async fn fetch_leaderboard(
        &self,
        token: Option<&str>,
        period: LeaderboardPeriod,
        limit: usize,
    ) -> Result<Vec<LeaderboardRecord>, GatewayError>;
    async fn list_profiles(&self, token: &str) -> Result<Vec<ProfileSummary>, GatewayError>;
    async fn list_wallets(&self, token: &str) -> Result<Vec<Wallet>, GatewayError>;
    async fn list_account_emails(&self, token: &str) -> Result<Vec<AccountEmail>, GatewayError>;
    async fn set_profile_flag(
        &self,
        token: &str,
        user_id: &str,
        flag: ProfileFlag,
        value: bool,
    ) -> Result<(), GatewayError>;
}

// The full gateway surface consumed by the session manager and use cases.
pub trait RemoteGateway: AuthGateway + DataGateway {}

impl<T> RemoteGateway for T where T: AuthGateway + DataGateway {}

// Port for the gateway's own session persistence between runs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<Session>, String>;
    async fn save(&self, session: &Session) -> Result<(), String>;
    async fn clear(&self) -> Result<(), String>;
}

// Realtime change feed scoped to one session; dropping the receiver ends it.
#[async_trait]
pub trait RealtimeSource: Send + Sync {
    async fn subscribe(
        &self,
        session: &Session,
    ) -> Result<mpsc::Receiver<RealtimeEvent>, GatewayError>;
}

// Outbound purchase notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &PurchaseNotification) -> Result<(), GatewayError>;
}

// Port for retrieving the current time.
pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}
