use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};
use url::Url;

use crate::domain::entities::{ChangeKind, RealtimeEvent, Session};
use crate::domain::errors::GatewayError;
use crate::domain::ports::RealtimeSource;
use crate::interface_adapters::protocol::{
    BroadcastPayload, PhoenixFrame, PostgresChangesPayload, PresenceBroadcast,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PROTOCOL_VERSION: &str = "1.0.0";

pub const WALLETS_TOPIC: &str = "realtime:wallets";
pub const PROFILES_TOPIC: &str = "realtime:profiles";
pub const PRESENCE_TOPIC: &str = "realtime:presence";

/// Websocket client for the backend's change feed.
///
/// Each `subscribe` opens its own connection, joins the wallet, profile and
/// presence channels for the session's user and forwards decoded events. The
/// connection task stops once the returned receiver is dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    socket_url: Url,
    heartbeat: Duration,
}

impl RealtimeClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, GatewayError> {
        let mut socket_url = Url::parse(base_url)
            .map_err(|err| GatewayError::Transport(format!("{base_url}: {err}")))?;
        let scheme = match socket_url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        socket_url
            .set_scheme(scheme)
            .map_err(|_| GatewayError::Transport(format!("{base_url}: unsupported scheme")))?;
        let path = format!(
            "{}/realtime/v1/websocket",
            socket_url.path().trim_end_matches('/')
        );
        socket_url.set_path(&path);
        socket_url
            .query_pairs_mut()
            .clear()
            .append_pair("apikey", anon_key)
            .append_pair("vsn", PROTOCOL_VERSION);
        Ok(Self {
            socket_url,
            heartbeat: HEARTBEAT_INTERVAL,
        })
    }

    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }
}

#[async_trait]
impl RealtimeSource for RealtimeClient {
    async fn subscribe(
        &self,
        session: &Session,
    ) -> Result<mpsc::Receiver<RealtimeEvent>, GatewayError> {
        let (ws, _response) = connect_async(self.socket_url.as_str())
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        for frame in join_frames(session) {
            let text =
                serde_json::to_string(&frame).map_err(|err| GatewayError::Decode(err.to_string()))?;
            sink.send(Message::Text(text.into()))
                .await
                .map_err(|err| GatewayError::Transport(err.to_string()))?;
        }
        debug!(user_id = %session.user_id, "realtime channels joined");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let heartbeat = self.heartbeat;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; joins already count as traffic.
            ticker.tick().await;
            let mut next_ref: u64 = 100;

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        next_ref += 1;
                        let beat = heartbeat_frame(next_ref);
                        let Ok(text) = serde_json::to_string(&beat) else {
                            continue;
                        };
                        if let Err(err) = sink.send(Message::Text(text.into())).await {
                            warn!(error = %err, "realtime heartbeat failed");
                            break;
                        }
                    }
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let frame: PhoenixFrame = match serde_json::from_str(text.as_str()) {
                                Ok(frame) => frame,
                                Err(err) => {
                                    debug!(error = %err, "ignoring undecodable realtime frame");
                                    continue;
                                }
                            };
                            if let Some(event) = parse_frame(&frame) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("realtime socket closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            error!(error = %err, "realtime socket error");
                            break;
                        }
                    },
                }
            }
            let _ = sink.close().await;
        });

        Ok(rx)
    }
}

fn join_frames(session: &Session) -> Vec<PhoenixFrame> {
    let changes = |table: &str, filter: String| {
        json!({
            "config": {
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table, "filter": filter }
                ]
            },
            "access_token": session.access_token,
        })
    };
    let join = |topic: &str, payload: Value, reference: u64| PhoenixFrame {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload,
        reference: Some(reference.to_string()),
    };

    vec![
        join(
            WALLETS_TOPIC,
            changes("wallets", format!("user_id=eq.{}", session.user_id)),
            1,
        ),
        join(
            PROFILES_TOPIC,
            changes("profiles", format!("id=eq.{}", session.user_id)),
            2,
        ),
        join(
            PRESENCE_TOPIC,
            json!({
                "config": { "broadcast": { "self": false } },
                "access_token": session.access_token,
            }),
            3,
        ),
    ]
}

fn heartbeat_frame(reference: u64) -> PhoenixFrame {
    PhoenixFrame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

// Decode the frames that carry application events; replies and system frames yield None.
pub fn parse_frame(frame: &PhoenixFrame) -> Option<RealtimeEvent> {
    match frame.event.as_str() {
        "postgres_changes" => {
            let change = serde_json::from_value::<PostgresChangesPayload>(frame.payload.clone())
                .ok()?
                .data;
            let kind = match change.kind.as_str() {
                "INSERT" => ChangeKind::Insert,
                "UPDATE" => ChangeKind::Update,
                "DELETE" => ChangeKind::Delete,
                _ => return None,
            };
            let owner_column = if change.table == "profiles" { "id" } else { "user_id" };
            let user_id = [change.record.as_ref(), change.old_record.as_ref()]
                .into_iter()
                .flatten()
                .find_map(|row| row.get(owner_column).and_then(Value::as_str))
                .map(str::to_string);
            Some(RealtimeEvent::TableChanged {
                table: change.table,
                kind,
                user_id,
            })
        }
        "broadcast" if frame.topic == PRESENCE_TOPIC => {
            let broadcast = serde_json::from_value::<BroadcastPayload>(frame.payload.clone()).ok()?;
            if broadcast.event != "presence" {
                return None;
            }
            let presence = serde_json::from_value::<PresenceBroadcast>(broadcast.payload).ok()?;
            Some(RealtimeEvent::PresenceChanged {
                user_id: presence.user_id,
                status: presence.status,
            })
        }
        _ => None,
    }
}
