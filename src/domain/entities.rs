use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// Authenticated connection issued by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub email: String,
    // Epoch seconds after which the access token is rejected.
    pub expires_at: u64,
}

impl Session {
    pub fn is_expired(&self, now_epoch_seconds: u64) -> bool {
        self.expires_at <= now_epoch_seconds
    }
}

// Profile record keyed by the session's user id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub is_owner: bool,
}

impl Identity {
    pub fn from_profile(profile: ProfileSummary, email: impl Into<String>) -> Self {
        Self {
            id: profile.id,
            username: profile.username,
            email: email.into(),
            is_admin: profile.is_admin,
            is_owner: profile.is_owner,
        }
    }
}

// Virtual currency balance and counters for one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Wallet {
    pub user_id: String,
    pub balance: i64,
    pub last_reward_claim: Option<DateTime<Utc>>,
    pub total_wagered: i64,
    pub total_games: i64,
    pub level: Option<i32>,
}

impl Wallet {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: 0,
            last_reward_claim: None,
            total_wagered: 0,
            total_games: 0,
            level: None,
        }
    }
}

/// Combined identity and wallet view handed to every consumer of the session.
///
/// The balance is a cached copy; the gateway always holds the authoritative
/// value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub coins: i64,
    pub is_admin: bool,
    pub is_owner: bool,
    pub level: Option<i32>,
    pub last_reward_claim: Option<DateTime<Utc>>,
    pub total_wagered: i64,
    pub total_games: i64,
}

impl CurrentUser {
    pub fn from_parts(identity: Identity, wallet: Option<Wallet>) -> Self {
        let wallet = wallet.unwrap_or_else(|| Wallet::empty(identity.id.clone()));
        Self {
            id: identity.id,
            username: identity.username,
            email: identity.email,
            coins: wallet.balance,
            is_admin: identity.is_admin,
            is_owner: identity.is_owner,
            level: wallet.level,
            last_reward_claim: wallet.last_reward_claim,
            total_wagered: wallet.total_wagered,
            total_games: wallet.total_games,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.is_admin || self.is_owner
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
        }
    }
}

// Short-lived record telling other clients a user is active.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: String,
    pub last_active: DateTime<Utc>,
    pub status: PresenceStatus,
}

// Calendar month the leaderboard aggregates over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaderboardPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub username: String,
    pub points: i64,
    pub rank: usize,
}

// Leaderboard row as stored, before ranking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardRecord {
    pub user_id: String,
    pub username: Option<String>,
    pub points: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopItem {
    pub id: String,
    pub name: String,
    pub duration: String,
    pub duration_days: u32,
    pub price: i64,
    pub description: String,
}

// Message forwarded to the purchase webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseNotification {
    pub item_name: String,
    pub duration: String,
    pub price: i64,
    pub phone_number: String,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub item_id: String,
    pub price: i64,
    pub key: String,
}

// Profile flags as listed for the admin console.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileSummary {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    pub is_owner: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountEmail {
    pub user_id: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminUserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub is_owner: bool,
    pub balance: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileFlag {
    Admin,
    Owner,
}

impl ProfileFlag {
    pub fn column(&self) -> &'static str {
        match self {
            ProfileFlag::Admin => "is_admin",
            ProfileFlag::Owner => "is_owner",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
}

// Authentication transitions pushed by the gateway side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
    SessionExpired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

// Change notifications delivered over the realtime channels.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    TableChanged {
        table: String,
        kind: ChangeKind,
        user_id: Option<String>,
    },
    PresenceChanged {
        user_id: String,
        status: PresenceStatus,
    },
}
