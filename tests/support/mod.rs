// Fake hosted backend shared by the integration tests in this binary.
#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

pub const TEST_ANON_KEY: &str = "test-anon-key";

// Global base URL used by all tests after the server publishes its bound address.
static SERVER_URL: OnceLock<String> = OnceLock::new();
// One-time guard that ensures the server bootstrap path runs only once.
static SERVER_READY: OnceLock<()> = OnceLock::new();
// Backend tables; tests seed and inspect them directly.
static BACKEND: OnceLock<Backend> = OnceLock::new();

#[derive(Clone, Default)]
pub struct Backend {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    // email -> (user id, password)
    accounts: HashMap<String, (String, String)>,
    profiles: HashMap<String, Value>,
    wallets: HashMap<String, i64>,
    leaderboard: Vec<Value>,
    // access or refresh token -> user id
    tokens: HashMap<String, String>,
    presence: Vec<(String, String)>,
    webhooks: Vec<Value>,
    issued: u64,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "message": message })))
}

impl Backend {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner.lock().expect("backend mutex poisoned")
    }

    pub fn seed_account(
        &self,
        email: &str,
        password: &str,
        username: &str,
        balance: i64,
    ) -> String {
        let user_id = format!("user-{}", uuid::Uuid::new_v4());
        let mut tables = self.lock();
        tables
            .accounts
            .insert(email.to_string(), (user_id.clone(), password.to_string()));
        tables.profiles.insert(
            user_id.clone(),
            json!({ "id": user_id, "username": username, "is_admin": false, "is_owner": false }),
        );
        tables.wallets.insert(user_id.clone(), balance);
        user_id
    }

    pub fn set_admin(&self, user_id: &str) {
        let mut tables = self.lock();
        if let Some(profile) = tables.profiles.get_mut(user_id) {
            profile["is_admin"] = json!(true);
        }
    }

    pub fn push_leaderboard(
        &self,
        user_id: &str,
        points: i64,
        period_start: &str,
        period_end: &str,
    ) {
        let mut tables = self.lock();
        tables.leaderboard.push(json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "user_id": user_id,
            "points": points,
            "period_start": period_start,
            "period_end": period_end,
        }));
    }

    pub fn balance_of(&self, user_id: &str) -> Option<i64> {
        self.lock().wallets.get(user_id).copied()
    }

    pub fn presence_for(&self, user_id: &str) -> Vec<String> {
        self.lock()
            .presence
            .iter()
            .filter(|(id, _)| id == user_id)
            .map(|(_, status)| status.clone())
            .collect()
    }

    pub fn webhooks(&self) -> Vec<Value> {
        self.lock().webhooks.clone()
    }

    fn issue(&self, user_id: &str) -> Value {
        let mut tables = self.lock();
        tables.issued += 1;
        let access = format!("access-{}-{}", tables.issued, uuid::Uuid::new_v4());
        let refresh = format!("refresh-{}-{}", tables.issued, uuid::Uuid::new_v4());
        tables.tokens.insert(access.clone(), user_id.to_string());
        tables.tokens.insert(refresh.clone(), user_id.to_string());
        let email = tables
            .accounts
            .iter()
            .find(|(_, (id, _))| id == user_id)
            .map(|(email, _)| email.clone())
            .unwrap_or_default();
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "token_type": "bearer",
            "expires_in": 3600,
            "user": { "id": user_id, "email": email },
        })
    }

    // Every request must carry the project key; row routes also need a signed-in bearer.
    fn caller(&self, headers: &HeaderMap) -> Result<Option<String>, ApiError> {
        let key = headers.get("apikey").and_then(|v| v.to_str().ok());
        if key != Some(TEST_ANON_KEY) {
            return Err(api_error(StatusCode::UNAUTHORIZED, "No API key found in request"));
        }
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();
        Ok(self.lock().tokens.get(token).cloned())
    }

    fn signed_in(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        self.caller(headers)?
            .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "JWT expired"))
    }
}

pub fn backend() -> &'static Backend {
    BACKEND.get_or_init(Backend::default)
}

fn eq_filter<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.strip_prefix("eq."))
}

async fn token(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    backend.caller(&headers)?;
    let user_id = match params.get("grant_type").map(String::as_str) {
        Some("password") => {
            let email = body["email"].as_str().unwrap_or_default();
            let password = body["password"].as_str().unwrap_or_default();
            let tables = backend.lock();
            match tables.accounts.get(email) {
                Some((user_id, expected)) if expected == password => user_id.clone(),
                _ => {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(json!({
                            "error": "invalid_grant",
                            "error_description": "Invalid login credentials"
                        })),
                    ));
                }
            }
        }
        Some("refresh_token") => {
            let refresh = body["refresh_token"].as_str().unwrap_or_default();
            let tables = backend.lock();
            tables
                .tokens
                .get(refresh)
                .cloned()
                .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Invalid Refresh Token"))?
        }
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "unsupported grant_type")),
    };
    Ok(Json(backend.issue(&user_id)))
}

async fn signup(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    backend.caller(&headers)?;
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default().to_string();
    let username = body["data"]["username"].as_str().unwrap_or_default().to_string();
    if backend.lock().accounts.contains_key(&email) {
        return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, "User already registered"));
    }
    let user_id = backend.seed_account(&email, &password, &username, 0);
    // Addresses under confirm.test simulate projects that require email confirmation.
    if email.ends_with("@confirm.test") {
        return Ok(Json(json!({ "id": user_id, "email": email, "aud": "authenticated" })));
    }
    Ok(Json(backend.issue(&user_id)))
}

async fn logout(
    State(backend): State<Backend>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    backend.signed_in(&headers)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_users(
    State(backend): State<Backend>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    backend.signed_in(&headers)?;
    let tables = backend.lock();
    let users: Vec<Value> = tables
        .accounts
        .iter()
        .map(|(email, (id, _))| json!({ "id": id, "email": email }))
        .collect();
    Ok(Json(json!({ "users": users })))
}

async fn profiles(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    backend.signed_in(&headers)?;
    let tables = backend.lock();
    let rows: Vec<Value> = match eq_filter(&params, "id") {
        Some(id) => tables.profiles.get(id).cloned().into_iter().collect(),
        None => tables.profiles.values().cloned().collect(),
    };
    Ok(Json(Value::Array(rows)))
}

async fn patch_profile(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let caller = backend.signed_in(&headers)?;
    let id = eq_filter(&params, "id")
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing id filter"))?
        .to_string();
    let mut tables = backend.lock();
    let caller_is_admin = tables
        .profiles
        .get(&caller)
        .is_some_and(|p| p["is_admin"] == json!(true) || p["is_owner"] == json!(true));
    if !caller_is_admin {
        return Err(api_error(StatusCode::FORBIDDEN, "permission denied"));
    }
    let profile = tables
        .profiles
        .get_mut(&id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "profile not found"))?;
    if let Some(fields) = body.as_object() {
        for (key, value) in fields {
            profile[key.as_str()] = value.clone();
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn wallets(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    backend.signed_in(&headers)?;
    let tables = backend.lock();
    let row = |(user_id, balance): (&String, &i64)| {
        json!({ "user_id": user_id, "balance": balance, "total_wagered": 0, "total_games": 0 })
    };
    let rows: Vec<Value> = match eq_filter(&params, "user_id") {
        Some(user_id) => tables.wallets.get_key_value(user_id).map(row).into_iter().collect(),
        None => tables.wallets.iter().map(row).collect(),
    };
    Ok(Json(Value::Array(rows)))
}

async fn leaderboard(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    backend.caller(&headers)?;
    let start = eq_filter(&params, "period_start").unwrap_or_default();
    let end = eq_filter(&params, "period_end").unwrap_or_default();
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(usize::MAX);
    let tables = backend.lock();
    let mut rows: Vec<Value> = tables
        .leaderboard
        .iter()
        .filter(|row| row["period_start"] == start && row["period_end"] == end)
        .map(|row| {
            let user_id = row["user_id"].as_str().unwrap_or_default();
            let profile = tables
                .profiles
                .get(user_id)
                .map(|p| json!({ "username": p["username"] }));
            json!({
                "id": row["id"],
                "user_id": user_id,
                "points": row["points"],
                "profiles": profile,
            })
        })
        .collect();
    rows.sort_by_key(|row| std::cmp::Reverse(row["points"].as_i64().unwrap_or(0)));
    rows.truncate(limit);
    Ok(Json(Value::Array(rows)))
}

async fn update_balance(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    backend.signed_in(&headers)?;
    let user_id = body["target_user_id"].as_str().unwrap_or_default();
    let change = body["amount_change"].as_i64().unwrap_or(0);
    let mut tables = backend.lock();
    let balance = tables
        .wallets
        .get_mut(user_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "wallet not found"))?;
    if *balance + change < 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "insufficient funds"));
    }
    *balance += change;
    Ok(Json(Value::Null))
}

async fn upsert_presence(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    backend.signed_in(&headers)?;
    let user_id = body["target_user_id"].as_str().unwrap_or_default().to_string();
    let status = body["presence_status"].as_str().unwrap_or_default().to_string();
    backend.lock().presence.push((user_id, status));
    Ok(Json(Value::Null))
}

async fn webhook(State(backend): State<Backend>, Json(body): Json<Value>) -> StatusCode {
    backend.lock().webhooks.push(body);
    StatusCode::NO_CONTENT
}

fn router(backend: Backend) -> Router {
    Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/admin/users", get(admin_users))
        .route("/rest/v1/profiles", get(profiles).patch(patch_profile))
        .route("/rest/v1/wallets", get(wallets))
        .route("/rest/v1/leaderboard", get(leaderboard))
        .route("/rest/v1/rpc/update_user_balance", post(update_balance))
        .route("/rest/v1/rpc/upsert_user_presence", post(upsert_presence))
        .route("/webhook", post(webhook))
        .with_state(backend)
}

// Ensure the fake backend is running and return the shared base URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published_url = Arc::new(OnceLock::<String>::new());
        let published_url_thread = Arc::clone(&published_url);
        // The server outlives individual `#[tokio::test]` runtimes on its own thread.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("http://{}", addr));
                axum::serve(listener, router(backend().clone()))
                    .await
                    .expect("server failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

fn wait_for_server_url_and_readiness(published_url: Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url
        .strip_prefix("http://")
        .expect("base url should use http://");
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}

// Unique address so tests sharing the backend never collide.
pub fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", uuid::Uuid::new_v4())
}
