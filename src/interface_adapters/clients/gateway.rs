use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::domain::entities::{
    AccountEmail, LeaderboardPeriod, LeaderboardRecord, PresenceStatus, ProfileFlag,
    ProfileSummary, Session, Wallet,
};
use crate::domain::errors::GatewayError;
use crate::domain::ports::{AuthGateway, Clock, DataGateway};
use crate::interface_adapters::protocol::{
    AdminUsersResponse, BalanceRpcRequest, GatewayErrorResponse, LeaderboardRow,
    PasswordGrantRequest, PresenceRpcRequest, ProfileRow, RefreshGrantRequest, SignUpMetadata,
    SignUpRequest, SignUpResponse, TokenResponse, WalletRow,
};

const PROFILE_COLUMNS: &str = "id,username,is_admin,is_owner";
const LEADERBOARD_COLUMNS: &str = "id,points,user_id,profiles:user_id(username)";

// Thin reqwest client for the hosted backend's auth, row and rpc endpoints.
#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
    anon_key: String,
    clock: Arc<dyn Clock>,
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        anon_key: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GatewayError> {
        // Url::join drops the last path segment unless the base ends with '/'.
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url =
            Url::parse(&base).map_err(|err| GatewayError::Transport(format!("{base}: {err}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            base_url,
            anon_key: anon_key.into(),
            clock,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|err| GatewayError::Transport(format!("{path}: {err}")))
    }

    fn endpoint_with(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, GatewayError> {
        let mut url = self.endpoint(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    // Every call carries the project key; the bearer is the user's token when signed in.
    fn request(&self, method: Method, url: Url, token: Option<&str>) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(&self.anon_key))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, GatewayError> {
        let res = builder
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let status = res.status();

        // Keep upstream status/message so callers can tell rejection from outage.
        if !status.is_success() {
            let message = res
                .json::<GatewayErrorResponse>()
                .await
                .ok()
                .and_then(GatewayErrorResponse::into_message);
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(res)
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, GatewayError> {
        Self::send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))
    }

    fn session_from(&self, tokens: TokenResponse, fallback_email: &str) -> Session {
        let expires_at = tokens.expires_at(self.clock.now_epoch_seconds());
        Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            email: tokens
                .user
                .email
                .filter(|email| !email.is_empty())
                .unwrap_or_else(|| fallback_email.to_string()),
            user_id: tokens.user.id,
            expires_at,
        }
    }
}

#[async_trait]
impl AuthGateway for HttpGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let url = self.endpoint_with("auth/v1/token", &[("grant_type", "password")])?;
        let builder = self
            .request(Method::POST, url, None)
            .json(&PasswordGrantRequest { email, password });
        let tokens: TokenResponse = Self::send_json(builder).await?;
        Ok(self.session_from(tokens, email))
    }

    async fn sign_up(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<Session, GatewayError> {
        let url = self.endpoint("auth/v1/signup")?;
        let builder = self.request(Method::POST, url, None).json(&SignUpRequest {
            email,
            password,
            data: SignUpMetadata { username },
        });
        match Self::send_json::<SignUpResponse>(builder).await? {
            SignUpResponse::Session(tokens) => Ok(self.session_from(tokens, email)),
            SignUpResponse::PendingConfirmation(user) => {
                debug!(user_id = %user.id, "signup awaiting email confirmation");
                Err(GatewayError::ConfirmationRequired)
            }
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        let url = self.endpoint_with("auth/v1/token", &[("grant_type", "refresh_token")])?;
        let builder = self
            .request(Method::POST, url, None)
            .json(&RefreshGrantRequest { refresh_token });
        let tokens: TokenResponse = Self::send_json(builder).await?;
        Ok(self.session_from(tokens, ""))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), GatewayError> {
        let url = self.endpoint("auth/v1/logout")?;
        Self::send(self.request(Method::POST, url, Some(access_token))).await?;
        Ok(())
    }
}

#[async_trait]
impl DataGateway for HttpGateway {
    async fn fetch_identity(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Option<ProfileSummary>, GatewayError> {
        let id_filter = format!("eq.{user_id}");
        let url = self.endpoint_with(
            "rest/v1/profiles",
            &[("select", PROFILE_COLUMNS), ("id", id_filter.as_str())],
        )?;
        let rows: Vec<ProfileRow> =
            Self::send_json(self.request(Method::GET, url, Some(token))).await?;
        Ok(rows.into_iter().next().map(ProfileSummary::from))
    }

    async fn fetch_wallet(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Option<Wallet>, GatewayError> {
        let user_filter = format!("eq.{user_id}");
        let url = self.endpoint_with(
            "rest/v1/wallets",
            &[("select", "*"), ("user_id", user_filter.as_str())],
        )?;
        let rows: Vec<WalletRow> =
            Self::send_json(self.request(Method::GET, url, Some(token))).await?;
        Ok(rows.into_iter().next().map(Wallet::from))
    }

    async fn adjust_balance(
        &self,
        token: &str,
        user_id: &str,
        delta: i64,
    ) -> Result<(), GatewayError> {
        let url = self.endpoint("rest/v1/rpc/update_user_balance")?;
        let builder = self
            .request(Method::POST, url, Some(token))
            .json(&BalanceRpcRequest {
                target_user_id: user_id.to_string(),
                amount_change: delta,
            });
        Self::send(builder).await?;
        Ok(())
    }

    async fn upsert_presence(
        &self,
        token: &str,
        user_id: &str,
        status: PresenceStatus,
    ) -> Result<(), GatewayError> {
        let url = self.endpoint("rest/v1/rpc/upsert_user_presence")?;
        let builder = self
            .request(Method::POST, url, Some(token))
            .json(&PresenceRpcRequest {
                target_user_id: user_id.to_string(),
                presence_status: status,
            });
        Self::send(builder).await?;
        Ok(())
    }

    async fn fetch_leaderboard(
        &self,
        token: Option<&str>,
        period: LeaderboardPeriod,
        limit: usize,
    ) -> Result<Vec<LeaderboardRecord>, GatewayError> {
        let start = format!("eq.{}", period.start.format("%Y-%m-%d"));
        let end = format!("eq.{}", period.end.format("%Y-%m-%d"));
        let limit = limit.to_string();
        let url = self.endpoint_with(
            "rest/v1/leaderboard",
            &[
                ("select", LEADERBOARD_COLUMNS),
                ("period_start", start.as_str()),
                ("period_end", end.as_str()),
                ("order", "points.desc"),
                ("limit", limit.as_str()),
            ],
        )?;
        let rows: Vec<LeaderboardRow> =
            Self::send_json(self.request(Method::GET, url, token)).await?;
        Ok(rows.into_iter().map(LeaderboardRecord::from).collect())
    }

    async fn list_profiles(&self, token: &str) -> Result<Vec<ProfileSummary>, GatewayError> {
        let url = self.endpoint_with(
            "rest/v1/profiles",
            &[("select", PROFILE_COLUMNS), ("order", "username.asc")],
        )?;
        let rows: Vec<ProfileRow> =
            Self::send_json(self.request(Method::GET, url, Some(token))).await?;
        Ok(rows.into_iter().map(ProfileSummary::from).collect())
    }

    async fn list_wallets(&self, token: &str) -> Result<Vec<Wallet>, GatewayError> {
        let url = self.endpoint_with("rest/v1/wallets", &[("select", "user_id,balance")])?;
        let rows: Vec<WalletRow> =
            Self::send_json(self.request(Method::GET, url, Some(token))).await?;
        Ok(rows.into_iter().map(Wallet::from).collect())
    }

    async fn list_account_emails(&self, token: &str) -> Result<Vec<AccountEmail>, GatewayError> {
        let url = self.endpoint("auth/v1/admin/users")?;
        let users: AdminUsersResponse =
            Self::send_json(self.request(Method::GET, url, Some(token))).await?;
        Ok(users.into_emails())
    }

    async fn set_profile_flag(
        &self,
        token: &str,
        user_id: &str,
        flag: ProfileFlag,
        value: bool,
    ) -> Result<(), GatewayError> {
        let id_filter = format!("eq.{user_id}");
        let url = self.endpoint_with("rest/v1/profiles", &[("id", id_filter.as_str())])?;
        let mut patch = Map::new();
        patch.insert(flag.column().to_string(), Value::Bool(value));
        let builder = self
            .request(Method::PATCH, url, Some(token))
            .header("Prefer", "return=minimal")
            .json(&patch);
        Self::send(builder).await?;
        Ok(())
    }
}
