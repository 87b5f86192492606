use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::entities::{
    AccountEmail, LeaderboardRecord, PresenceStatus, ProfileSummary, PurchaseNotification, Wallet,
};

#[derive(Debug, Serialize)]
pub struct PasswordGrantRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshGrantRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SignUpRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    // Copied into the new user's metadata; the gateway provisions the profile from it.
    pub data: SignUpMetadata<'a>,
}

#[derive(Debug, Serialize)]
pub struct SignUpMetadata<'a> {
    pub username: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

// Session grant returned by the token and signup endpoints.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub expires_at: Option<u64>,
    pub user: GatewayUser,
}

impl TokenResponse {
    // Absolute expiry, falling back to issue time plus lifetime.
    pub fn expires_at(&self, now_epoch_seconds: u64) -> u64 {
        self.expires_at
            .unwrap_or_else(|| now_epoch_seconds + self.expires_in.unwrap_or(3600))
    }
}

// Signup answers with a full session, or with the bare user while email
// confirmation is pending.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenResponse),
    PendingConfirmation(GatewayUser),
}

// The gateway's auth and data endpoints disagree on error field names.
#[derive(Debug, Default, Deserialize)]
pub struct GatewayErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl GatewayErrorResponse {
    pub fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_owner: bool,
}

impl From<ProfileRow> for ProfileSummary {
    fn from(row: ProfileRow) -> Self {
        ProfileSummary {
            id: row.id,
            username: row.username.unwrap_or_default(),
            is_admin: row.is_admin,
            is_owner: row.is_owner,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRow {
    pub user_id: String,
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub last_reward_claim: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_wagered: i64,
    #[serde(default)]
    pub total_games: i64,
    #[serde(default)]
    pub level: Option<i32>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            user_id: row.user_id,
            balance: row.balance,
            last_reward_claim: row.last_reward_claim,
            total_wagered: row.total_wagered,
            total_games: row.total_games,
            level: row.level,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardProfile {
    #[serde(default)]
    pub username: Option<String>,
}

// Leaderboard row with the embedded profile join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub user_id: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub profiles: Option<LeaderboardProfile>,
}

impl From<LeaderboardRow> for LeaderboardRecord {
    fn from(row: LeaderboardRow) -> Self {
        LeaderboardRecord {
            user_id: row.user_id,
            username: row.profiles.and_then(|profile| profile.username),
            points: row.points,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdminUsersResponse {
    #[serde(default)]
    pub users: Vec<GatewayUser>,
}

impl AdminUsersResponse {
    pub fn into_emails(self) -> Vec<AccountEmail> {
        self.users
            .into_iter()
            .map(|user| AccountEmail {
                user_id: user.id,
                email: user.email.unwrap_or_default(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceRpcRequest {
    pub target_user_id: String,
    pub amount_change: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceRpcRequest {
    pub target_user_id: String,
    pub presence_status: PresenceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub content: String,
    pub embeds: Vec<WebhookEmbed>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookEmbed {
    pub title: String,
    pub fields: Vec<WebhookField>,
    pub color: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookField {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

// Brand green (#2ecc71) used for purchase embeds.
const PURCHASE_EMBED_COLOR: u32 = 3_066_993;

impl WebhookPayload {
    pub fn purchase(notification: &PurchaseNotification) -> Self {
        let field = |name: &str, value: String, inline: bool| WebhookField {
            name: name.to_string(),
            value,
            inline,
        };
        WebhookPayload {
            content: format!("New Purchase: {}", notification.item_name),
            embeds: vec![WebhookEmbed {
                title: "Purchase Details".to_string(),
                fields: vec![
                    field("Item", notification.item_name.clone(), true),
                    field("Duration", notification.duration.clone(), true),
                    field("Price", format!("{} coins", notification.price), true),
                    field("Phone Number", notification.phone_number.clone(), false),
                    field("Generated Key", notification.key.clone(), false),
                ],
                color: PURCHASE_EMBED_COLOR,
            }],
        }
    }
}

// Phoenix channel frame carried over the realtime websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostgresChangesPayload {
    pub data: PostgresChange,
}

#[derive(Debug, Deserialize)]
pub struct PostgresChange {
    pub table: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastPayload {
    pub event: String,
    pub payload: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceBroadcast {
    pub user_id: String,
    pub status: PresenceStatus,
}
